//! Numeric helpers shared by every tier.
//!
//! All helpers treat `None` as "not measured" and exclude it, never as zero.

use tracing::warn;

/// Default sanity ceiling for a household power reading (W).
///
/// Main fuse 3x25 A at 230 V sustains about 17 kW; heat pump, EV and water
/// heater together peak near 25 kW.
pub const DEFAULT_MAX_REASONABLE_POWER_W: f64 = 25_000.0;

/// Mean of the present values, or `None` if there are none.
pub fn mean_present(values: &[Option<f64>]) -> Option<f64> {
    let (sum, n) = values
        .iter()
        .flatten()
        .fold((0.0_f64, 0_usize), |(s, n), v| (s + v, n + 1));
    if n == 0 { None } else { Some(sum / n as f64) }
}

/// Sum of the present values, or `None` if there are none.
pub fn sum_present(values: &[Option<f64>]) -> Option<f64> {
    values.iter().flatten().fold(None, |acc, v| Some(acc.unwrap_or(0.0) + v))
}

/// Last present value, or `None` if there are none.
pub fn last_present(values: &[Option<f64>]) -> Option<f64> {
    values.iter().rev().flatten().next().copied()
}

/// Largest present value, or `None` if there are none.
pub fn max_present(values: &[Option<f64>]) -> Option<f64> {
    values.iter().flatten().copied().reduce(f64::max)
}

/// Mean of the present values, `default` when none are present.
///
/// # Examples
///
/// ```
/// use meter_rollup::metrics::primitives::safe_mean;
///
/// assert_eq!(safe_mean(&[Some(1.0), None, Some(3.0)], 0.0), 2.0);
/// assert_eq!(safe_mean(&[None, None], -1.0), -1.0);
/// ```
pub fn safe_mean(values: &[Option<f64>], default: f64) -> f64 {
    mean_present(values).unwrap_or(default)
}

/// Sum of the present values, `default` when none are present.
pub fn safe_sum(values: &[Option<f64>], default: f64) -> f64 {
    sum_present(values).unwrap_or(default)
}

/// Last present value, `default` when none are present.
pub fn safe_last(values: &[Option<f64>], default: f64) -> f64 {
    last_present(values).unwrap_or(default)
}

/// Returns `true` for a finite, non-negative power at or below the ceiling.
pub fn is_reasonable_power(value: f64, max_reasonable_power: f64) -> bool {
    value.is_finite() && value >= 0.0 && value <= max_reasonable_power
}

/// Replaces a missing, negative, or implausibly large power value with `0.0`.
///
/// Emits a warning naming `field` whenever the value is replaced, so a single
/// corrupt reading is visible in the logs instead of poisoning energy sums.
pub fn sanitize_power_value(value: Option<f64>, field: &str, max_reasonable_power: f64) -> f64 {
    match value {
        Some(v) if is_reasonable_power(v, max_reasonable_power) => v,
        Some(v) => {
            warn!(
                field,
                value = v,
                ceiling = max_reasonable_power,
                "suspicious power value zeroed"
            );
            0.0
        }
        None => {
            warn!(field, "missing power value zeroed");
            0.0
        }
    }
}

/// Energy (Wh) delivered by a constant average power (W) over an interval.
///
/// # Examples
///
/// ```
/// use meter_rollup::metrics::primitives::calculate_energy_sum;
///
/// assert_eq!(calculate_energy_sum(1200.0, 300), 100.0);
/// ```
pub fn calculate_energy_sum(avg_power_w: f64, interval_seconds: i64) -> f64 {
    avg_power_w * interval_seconds as f64 / 3600.0
}

/// Site consumption from the energy-conservation identity.
///
/// `consumption = grid + solar + battery_discharge - battery_charge`
///
/// Works the same for power averages (W) and energy sums (Wh). `grid` is net
/// grid flow: positive while importing, negative while exporting.
pub fn calculate_total_consumption(
    grid: f64,
    solar: f64,
    battery_discharge: f64,
    battery_charge: f64,
) -> f64 {
    grid + solar + battery_discharge - battery_charge
}

/// Net grid power: positive = import, negative = export.
pub fn calculate_net_grid_power(import: f64, export: f64) -> f64 {
    import - export
}

/// Cost in currency units for `energy_kwh` at a price in cents per kWh.
pub fn calculate_electricity_cost(energy_kwh: f64, price_cents_per_kwh: f64) -> f64 {
    energy_kwh * price_cents_per_kwh / 100.0
}

/// Share of solar yield consumed on site, in percent.
///
/// Returns `0.0` when there was no solar yield. The result is clamped to
/// `[0, 100]`.
pub fn calculate_self_consumption_ratio(solar_yield_wh: f64, solar_direct_wh: f64) -> f64 {
    if solar_yield_wh <= 0.0 {
        return 0.0;
    }
    (solar_direct_wh / solar_yield_wh * 100.0).clamp(0.0, 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mean_excludes_absent_values() {
        assert_eq!(mean_present(&[Some(2.0), None, Some(4.0)]), Some(3.0));
        assert_eq!(mean_present(&[None]), None);
        assert_eq!(mean_present(&[]), None);
    }

    #[test]
    fn safe_helpers_fall_back_to_default() {
        assert_eq!(safe_mean(&[], 5.0), 5.0);
        assert_eq!(safe_sum(&[None, None], 1.5), 1.5);
        assert_eq!(safe_last(&[], 9.0), 9.0);
    }

    #[test]
    fn sum_does_not_treat_absent_as_zero_result() {
        assert_eq!(sum_present(&[None, None]), None);
        assert_eq!(sum_present(&[Some(0.0), None]), Some(0.0));
        assert_eq!(safe_sum(&[Some(1.0), None, Some(2.5)], 0.0), 3.5);
    }

    #[test]
    fn last_skips_trailing_absent() {
        assert_eq!(safe_last(&[Some(40.0), Some(41.0), None], 0.0), 41.0);
    }

    #[test]
    fn max_of_present_values() {
        assert_eq!(max_present(&[Some(1.0), None, Some(7.0), Some(3.0)]), Some(7.0));
        assert_eq!(max_present(&[None]), None);
    }

    #[test]
    fn sanitize_keeps_reasonable_values() {
        assert_eq!(sanitize_power_value(Some(1234.5), "solar_yield", 25_000.0), 1234.5);
        assert_eq!(sanitize_power_value(Some(25_000.0), "solar_yield", 25_000.0), 25_000.0);
    }

    #[test]
    fn sanitize_zeroes_bad_values() {
        assert_eq!(sanitize_power_value(None, "solar_yield", 25_000.0), 0.0);
        assert_eq!(sanitize_power_value(Some(-5.0), "solar_yield", 25_000.0), 0.0);
        assert_eq!(sanitize_power_value(Some(30_000.0), "solar_yield", 25_000.0), 0.0);
        assert_eq!(sanitize_power_value(Some(f64::NAN), "solar_yield", 25_000.0), 0.0);
    }

    #[test]
    fn energy_sum_per_interval() {
        assert!((calculate_energy_sum(1000.0, 300) - 83.333_333).abs() < 1e-5);
        assert_eq!(calculate_energy_sum(1000.0, 900), 250.0);
        assert_eq!(calculate_energy_sum(1000.0, 3600), 1000.0);
        assert_eq!(calculate_energy_sum(0.0, 300), 0.0);
    }

    #[test]
    fn consumption_identity() {
        // importing 500 W, 2 kW solar, battery charging 1 kW
        assert_eq!(calculate_total_consumption(500.0, 2000.0, 0.0, 1000.0), 1500.0);
        // exporting 1 kW with battery discharging
        assert_eq!(calculate_total_consumption(-1000.0, 1500.0, 300.0, 0.0), 800.0);
    }

    #[test]
    fn net_grid_and_cost() {
        assert_eq!(calculate_net_grid_power(800.0, 200.0), 600.0);
        assert!((calculate_electricity_cost(2.0, 15.0) - 0.30).abs() < 1e-12);
    }

    #[test]
    fn self_consumption_ratio_bounds() {
        assert_eq!(calculate_self_consumption_ratio(0.0, 0.0), 0.0);
        assert_eq!(calculate_self_consumption_ratio(1000.0, 1000.0), 100.0);
        assert_eq!(calculate_self_consumption_ratio(1000.0, 250.0), 25.0);
        assert_eq!(calculate_self_consumption_ratio(1000.0, 1200.0), 100.0);
    }
}
