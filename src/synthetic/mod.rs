//! Deterministic synthetic site telemetry.
//!
//! A seeded home with PV, a household load, a battery and a three-phase grid
//! meter, sampled once a minute. Used to exercise the pipelines without a live
//! time-series database.

pub mod devices;

use chrono::{DateTime, Duration, DurationRound, Timelike, Utc};
use rand::{SeedableRng, rngs::StdRng};
use tracing::{debug, info};

use crate::config::{SourcesConfig, SyntheticConfig};
use crate::error::StoreError;
use crate::io::import::{PriceRow, store_battery_samples, store_grid_samples, store_prices};
use crate::model::{BatterySystemSample, GridMeterSample};
use crate::store::TimeSeriesStore;

pub use devices::{BatteryFlow, HomeBattery, HouseholdLoad, SolarArray, gaussian_noise};

/// Seconds between generated samples.
pub const SAMPLE_INTERVAL_SECONDS: i64 = 60;

const NOMINAL_VOLTAGE: f64 = 230.0;
const NOMINAL_POWER_FACTOR: f64 = 0.95;

/// Samples generated for one time range.
#[derive(Debug, Clone, Default)]
pub struct SiteTelemetry {
    pub battery: Vec<BatterySystemSample>,
    pub grid: Vec<GridMeterSample>,
    pub prices: Vec<PriceRow>,
}

impl SiteTelemetry {
    /// Writes every sample into the series named by `sources`.
    ///
    /// # Errors
    ///
    /// Propagates the store's write error.
    pub fn store(
        &self,
        store: &mut dyn TimeSeriesStore,
        sources: &SourcesConfig,
    ) -> Result<usize, StoreError> {
        let mut n = store_battery_samples(store, &sources.checkwatt, &self.battery)?;
        n += store_grid_samples(store, &sources.shelly_em3, &self.grid)?;
        n += store_prices(store, &sources.spotprice, &self.prices)?;
        Ok(n)
    }
}

/// The simulated site.
#[derive(Debug, Clone)]
pub struct SyntheticSite {
    solar: SolarArray,
    load: HouseholdLoad,
    battery: HomeBattery,
    price_rng: StdRng,
    meter_rng: StdRng,
    config: SyntheticConfig,
    import_wh: f64,
    returned_wh: f64,
}

impl SyntheticSite {
    /// Builds the site from validated parameters.
    ///
    /// # Panics
    ///
    /// Panics if the parameters would be rejected by
    /// [`EngineConfig::validate`](crate::config::EngineConfig::validate).
    pub fn new(config: &SyntheticConfig) -> Self {
        let seed = config.seed;
        let noise_frac = config.noise_std_w / config.solar_peak_w.max(1.0);
        Self {
            solar: SolarArray::new(
                config.solar_peak_w,
                config.sunrise_hour,
                config.sunset_hour,
                noise_frac,
                seed,
            ),
            load: HouseholdLoad::new(
                config.base_load_w,
                config.load_amplitude_w,
                config.noise_std_w,
                seed.wrapping_add(1),
            ),
            battery: HomeBattery::new(
                config.battery_capacity_wh,
                config.battery_max_power_w,
                config.initial_soc,
                config.min_soc,
            ),
            price_rng: StdRng::seed_from_u64(seed.wrapping_add(2)),
            meter_rng: StdRng::seed_from_u64(seed.wrapping_add(3)),
            config: config.clone(),
            import_wh: config.initial_meter_wh,
            returned_wh: config.initial_meter_wh / 2.0,
        }
    }

    /// Generates one-minute samples over `[from, to)` and one price per hour
    /// starting at or before `from`.
    pub fn generate(&mut self, from: DateTime<Utc>, to: DateTime<Utc>) -> SiteTelemetry {
        let mut out = SiteTelemetry::default();
        let step = Duration::seconds(SAMPLE_INTERVAL_SECONDS);
        let step_secs = SAMPLE_INTERVAL_SECONDS as f64;

        let mut t = from;
        let mut minute: u32 = 0;
        while t < to {
            if self.config.meter_reboot_minute == Some(minute) {
                info!(timestamp = %t.to_rfc3339(), "synthetic grid meter reboot");
                self.import_wh = 0.0;
                self.returned_wh = 0.0;
            }

            let hour = hour_of_day(t);
            let solar_w = self.solar.power_w(hour);
            let load_w = self.load.demand_w(hour);
            let flow = self.battery.step(solar_w - load_w, step_secs);

            let net_w = load_w - solar_w + flow.charge_w - flow.discharge_w;
            let import_w = net_w.max(0.0);
            let export_w = (-net_w).max(0.0);

            out.battery.push(BatterySystemSample {
                timestamp: t,
                solar_yield: Some(solar_w),
                battery_charge: Some(flow.charge_w),
                battery_discharge: Some(flow.discharge_w),
                battery_soc: Some(self.battery.soc),
                energy_import: Some(import_w),
                energy_export: Some(export_w),
            });
            out.grid.push(self.meter_sample(t, net_w));

            self.import_wh += import_w * step_secs / 3600.0;
            self.returned_wh += export_w * step_secs / 3600.0;

            t += step;
            minute += 1;
        }

        out.prices = self.prices(from, to);
        debug!(
            samples = out.battery.len(),
            prices = out.prices.len(),
            soc = self.battery.soc,
            "synthetic telemetry generated"
        );
        out
    }

    fn meter_sample(&mut self, timestamp: DateTime<Utc>, net_w: f64) -> GridMeterSample {
        let phase_current = net_w.abs() / 3.0 / NOMINAL_VOLTAGE;
        let mut voltage = || NOMINAL_VOLTAGE + gaussian_noise(&mut self.meter_rng, 1.0);
        let (v1, v2, v3) = (voltage(), voltage(), voltage());
        GridMeterSample {
            timestamp,
            total_power: net_w,
            total_energy: self.import_wh,
            total_energy_returned: self.returned_wh,
            net_total_energy: self.import_wh - self.returned_wh,
            phase1_voltage: Some(v1),
            phase2_voltage: Some(v2),
            phase3_voltage: Some(v3),
            phase1_current: Some(phase_current),
            phase2_current: Some(phase_current),
            phase3_current: Some(phase_current),
            phase1_pf: Some(NOMINAL_POWER_FACTOR),
            phase2_pf: Some(NOMINAL_POWER_FACTOR),
            phase3_pf: Some(NOMINAL_POWER_FACTOR),
        }
    }

    /// Hourly prices peaking in the early evening, never negative.
    fn prices(&mut self, from: DateTime<Utc>, to: DateTime<Utc>) -> Vec<PriceRow> {
        let Ok(mut t) = from.duration_trunc(Duration::hours(1)) else {
            return Vec::new();
        };
        let mut rows = Vec::new();
        while t < to {
            let angle = 2.0 * std::f64::consts::PI * (hour_of_day(t) - 12.0) / 24.0;
            let noise = gaussian_noise(&mut self.price_rng, 0.5);
            let total = (self.config.price_base_cents
                + self.config.price_amplitude_cents * angle.sin()
                + noise)
                .max(0.0);
            rows.push(PriceRow {
                timestamp: t,
                price_total: Some(total),
                price_sell: Some(total * self.config.sell_ratio),
            });
            t += Duration::hours(1);
        }
        rows
    }
}

/// Fractional hour of the UTC day.
fn hour_of_day(t: DateTime<Utc>) -> f64 {
    f64::from(t.hour()) + f64::from(t.minute()) / 60.0 + f64::from(t.second()) / 3600.0
}

/// Generates telemetry for `[from, to)` and writes it into `store`.
///
/// # Arguments
///
/// * `store` - Store receiving the samples
/// * `sources` - Series the samples are written to
/// * `config` - Site parameters and seed
/// * `from` - First sample time
/// * `to` - End of the range, exclusive
///
/// # Errors
///
/// Propagates the store's write error.
pub fn populate(
    store: &mut dyn TimeSeriesStore,
    sources: &SourcesConfig,
    config: &SyntheticConfig,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
) -> Result<usize, StoreError> {
    let telemetry = SyntheticSite::new(config).generate(from, to);
    let n = telemetry.store(store, sources)?;
    info!(seed = config.seed, points = n, "synthetic telemetry stored");
    Ok(n)
}
