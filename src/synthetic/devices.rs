//! Device models behind the synthetic site.
//!
//! All powers are watts; generation and consumption are both positive.

use std::f64::consts::PI;

use rand::{Rng, SeedableRng, rngs::StdRng};

/// Gaussian noise with mean 0, via the Box-Muller transform.
///
/// # Arguments
///
/// * `rng` - Random number generator
/// * `std_dev` - Standard deviation of the noise
pub fn gaussian_noise(rng: &mut StdRng, std_dev: f64) -> f64 {
    if std_dev <= 0.0 {
        return 0.0;
    }

    let u1: f64 = rng.random::<f64>().clamp(1e-9, 1.0);
    let u2: f64 = rng.random::<f64>();
    let z0 = (-2.0 * u1.ln()).sqrt() * (2.0 * PI * u2).cos();
    z0 * std_dev
}

/// Fraction of peak output at `hour` (UTC, fractional): a half-cosine centred on
/// the midpoint of sunrise and sunset, zero outside.
pub fn daylight_frac(hour: f64, sunrise_hour: u32, sunset_hour: u32) -> f64 {
    let (rise, set) = (f64::from(sunrise_hour), f64::from(sunset_hour));
    if hour < rise || hour >= set || set <= rise {
        return 0.0;
    }
    (PI * (hour - rise) / (set - rise)).sin()
}

/// A PV array with a half-cosine daily profile and multiplicative noise.
#[derive(Debug, Clone)]
pub struct SolarArray {
    pub peak_w: f64,
    pub sunrise_hour: u32,
    pub sunset_hour: u32,
    /// Noise standard deviation as a fraction of output.
    pub noise_frac: f64,
    rng: StdRng,
}

impl SolarArray {
    /// # Panics
    ///
    /// Panics if `sunrise_hour >= sunset_hour` or `sunset_hour > 24`.
    pub fn new(
        peak_w: f64,
        sunrise_hour: u32,
        sunset_hour: u32,
        noise_frac: f64,
        seed: u64,
    ) -> Self {
        assert!(sunrise_hour < sunset_hour && sunset_hour <= 24);
        Self {
            peak_w: peak_w.max(0.0),
            sunrise_hour,
            sunset_hour,
            noise_frac: noise_frac.max(0.0),
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Output at `hour`, never negative.
    pub fn power_w(&mut self, hour: f64) -> f64 {
        let frac = daylight_frac(hour, self.sunrise_hour, self.sunset_hour);
        if frac <= 0.0 {
            return 0.0;
        }
        let mult = 1.0 + gaussian_noise(&mut self.rng, self.noise_frac);
        (self.peak_w * frac * mult).max(0.0)
    }
}

/// Household consumption peaking in the evening.
#[derive(Debug, Clone)]
pub struct HouseholdLoad {
    pub base_w: f64,
    pub amplitude_w: f64,
    pub noise_std_w: f64,
    rng: StdRng,
}

impl HouseholdLoad {
    pub fn new(base_w: f64, amplitude_w: f64, noise_std_w: f64, seed: u64) -> Self {
        Self {
            base_w,
            amplitude_w,
            noise_std_w,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Demand at `hour`, never negative.
    pub fn demand_w(&mut self, hour: f64) -> f64 {
        let angle = 2.0 * PI * (hour - 12.0) / 24.0;
        let noise = gaussian_noise(&mut self.rng, self.noise_std_w);
        (self.base_w + self.amplitude_w * angle.sin() + noise).max(0.0)
    }
}

/// Battery power flows for one step.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct BatteryFlow {
    pub charge_w: f64,
    pub discharge_w: f64,
}

/// A home battery that absorbs solar surplus and covers deficits.
#[derive(Debug, Clone)]
pub struct HomeBattery {
    pub capacity_wh: f64,
    pub max_power_w: f64,
    /// State of charge (%).
    pub soc: f64,
    /// Lowest state of charge it discharges to (%).
    pub min_soc: f64,
}

impl HomeBattery {
    /// # Panics
    ///
    /// Panics if `capacity_wh <= 0` or `soc` is outside `[0, 100]`.
    pub fn new(capacity_wh: f64, max_power_w: f64, soc: f64, min_soc: f64) -> Self {
        assert!(capacity_wh > 0.0, "capacity_wh must be > 0");
        assert!((0.0..=100.0).contains(&soc));
        Self {
            capacity_wh,
            max_power_w: max_power_w.max(0.0),
            soc,
            min_soc: min_soc.clamp(0.0, 100.0),
        }
    }

    /// Settles `surplus_w` (solar minus load) over `seconds`.
    ///
    /// Positive surplus charges, negative discharges, both limited by power
    /// rating and state of charge.
    pub fn step(&mut self, surplus_w: f64, seconds: f64) -> BatteryFlow {
        let hours = seconds / 3600.0;
        if hours <= 0.0 {
            return BatteryFlow::default();
        }
        let flow = if surplus_w > 0.0 {
            let room_w = (100.0 - self.soc) / 100.0 * self.capacity_wh / hours;
            BatteryFlow {
                charge_w: surplus_w.min(self.max_power_w).min(room_w.max(0.0)),
                discharge_w: 0.0,
            }
        } else {
            let available_w = (self.soc - self.min_soc) / 100.0 * self.capacity_wh / hours;
            BatteryFlow {
                charge_w: 0.0,
                discharge_w: (-surplus_w).min(self.max_power_w).min(available_w.max(0.0)),
            }
        };
        let delta_wh = (flow.charge_w - flow.discharge_w) * hours;
        self.soc = (self.soc + delta_wh / self.capacity_wh * 100.0).clamp(0.0, 100.0);
        flow
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_noise_is_zero_without_spread() {
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(gaussian_noise(&mut rng, 0.0), 0.0);
    }

    #[test]
    fn test_daylight_profile() {
        assert_eq!(daylight_frac(3.0, 6, 18), 0.0);
        assert_eq!(daylight_frac(18.0, 6, 18), 0.0);
        assert!((daylight_frac(12.0, 6, 18) - 1.0).abs() < 1e-12);
        assert!(daylight_frac(7.0, 6, 18) > 0.0);
    }

    #[test]
    fn test_solar_is_dark_at_night() {
        let mut pv = SolarArray::new(5_000.0, 6, 18, 0.05, 42);
        assert_eq!(pv.power_w(2.0), 0.0);
        assert!(pv.power_w(12.0) > 0.0);
    }

    #[test]
    fn test_solar_is_deterministic_per_seed() {
        let mut a = SolarArray::new(5_000.0, 6, 18, 0.1, 7);
        let mut b = SolarArray::new(5_000.0, 6, 18, 0.1, 7);
        for h in 6..18 {
            assert_eq!(a.power_w(f64::from(h)), b.power_w(f64::from(h)));
        }
    }

    #[test]
    #[should_panic]
    fn test_solar_rejects_inverted_day() {
        let _ = SolarArray::new(5_000.0, 18, 6, 0.0, 0);
    }

    #[test]
    fn test_load_is_never_negative() {
        let mut load = HouseholdLoad::new(100.0, 500.0, 200.0, 3);
        for m in 0..(24 * 60) {
            assert!(load.demand_w(f64::from(m) / 60.0) >= 0.0);
        }
    }

    #[test]
    fn test_battery_charge_limited_by_power() {
        let mut bat = HomeBattery::new(10_000.0, 2_000.0, 50.0, 10.0);
        let flow = bat.step(3_000.0, 3600.0);
        assert_eq!(flow.charge_w, 2_000.0);
        assert!((bat.soc - 70.0).abs() < 1e-9);
    }

    #[test]
    fn test_battery_stops_at_full() {
        let mut bat = HomeBattery::new(1_000.0, 5_000.0, 90.0, 10.0);
        let flow = bat.step(5_000.0, 3600.0);
        assert!((flow.charge_w - 100.0).abs() < 1e-9);
        assert!((bat.soc - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_battery_stops_at_min_soc() {
        let mut bat = HomeBattery::new(1_000.0, 5_000.0, 30.0, 10.0);
        let flow = bat.step(-1_000.0, 3600.0);
        assert!((flow.discharge_w - 200.0).abs() < 1e-9);
        assert!((bat.soc - 10.0).abs() < 1e-9);
        assert_eq!(bat.step(-1_000.0, 3600.0), BatteryFlow::default());
    }
}
