//! Turns cumulative grid-meter counters into per-window energy.
//!
//! The meter's counters only move forward, except when the device reboots and
//! starts again from zero. Between two samples the exact counter difference is
//! used; across a reboot the segment is gap-filled from the instantaneous
//! power readings on either side.

use tracing::warn;

use crate::config::ThresholdConfig;
use crate::error::ReconcileError;
use crate::model::GridMeterSample;

/// Tunables for counter reconciliation.
///
/// `reset_threshold_wh` and `export_ceiling_wh` are independent: the first
/// decides whether a counter decrease is a reboot, the second bounds how much
/// export a single window can plausibly contain.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReconcileSettings {
    /// Counter decrease (Wh) between two samples that counts as a reset.
    pub reset_threshold_wh: f64,
    /// Minimum counter value (Wh) for the first sample to be trusted.
    pub min_baseline_wh: f64,
    /// Largest plausible export (Wh) within one window.
    pub export_ceiling_wh: f64,
}

impl Default for ReconcileSettings {
    fn default() -> Self {
        Self {
            reset_threshold_wh: 10_000.0,
            min_baseline_wh: 100.0,
            export_ceiling_wh: 5_000.0,
        }
    }
}

impl From<&ThresholdConfig> for ReconcileSettings {
    fn from(t: &ThresholdConfig) -> Self {
        Self {
            reset_threshold_wh: t.reset_threshold_wh,
            min_baseline_wh: t.min_counter_baseline_wh,
            export_ceiling_wh: t.export_ceiling_wh,
        }
    }
}

/// Export-only energy from the returned-energy counter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExportEnergy {
    pub energy_wh: f64,
    pub avg_power_w: f64,
}

/// Net grid energy over one window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CounterReading {
    /// Net energy (Wh); negative while exporting.
    pub energy_delta_wh: f64,
    /// Mean net power (W) over the sampled span.
    pub avg_power_w: f64,
    /// Seconds between the first and last sample.
    pub elapsed_seconds: f64,
    /// Number of gap-filled segments.
    pub resets: usize,
    /// `None` when the export counter failed its sanity checks.
    pub export: Option<ExportEnergy>,
}

/// Reconciles time-ordered grid-meter samples for one window.
///
/// # Arguments
///
/// * `samples` - Grid-meter samples of the window, oldest first
/// * `settings` - Reset, baseline and export thresholds
///
/// # Errors
///
/// - [`ReconcileError::InsufficientSamples`] with fewer than two samples.
/// - [`ReconcileError::ImplausibleBaseline`] when the first sample's import
///   or returned counter is below `min_baseline_wh`, which means the meter
///   reported before its counters were loaded.
/// - [`ReconcileError::InvalidTimeRange`] when the samples span no time.
pub fn reconcile(
    samples: &[GridMeterSample],
    settings: &ReconcileSettings,
) -> Result<CounterReading, ReconcileError> {
    let (first, last) = match samples {
        [first, .., last] => (first, last),
        _ => {
            return Err(ReconcileError::InsufficientSamples {
                count: samples.len(),
            });
        }
    };

    if first.total_energy < settings.min_baseline_wh
        || first.total_energy_returned < settings.min_baseline_wh
    {
        return Err(ReconcileError::ImplausibleBaseline {
            total_wh: first.total_energy,
            returned_wh: first.total_energy_returned,
            min_wh: settings.min_baseline_wh,
        });
    }

    let elapsed_seconds = seconds_between(first, last);
    if elapsed_seconds <= 0.0 {
        return Err(ReconcileError::InvalidTimeRange { elapsed_seconds });
    }

    let mut energy_delta_wh = 0.0;
    let mut resets = 0;
    for pair in samples.windows(2) {
        let (prev, curr) = (&pair[0], &pair[1]);
        let total_reset = prev.total_energy - curr.total_energy > settings.reset_threshold_wh;
        let returned_reset =
            prev.total_energy_returned - curr.total_energy_returned > settings.reset_threshold_wh;

        energy_delta_wh += if total_reset || returned_reset {
            resets += 1;
            let avg_power = (prev.total_power + curr.total_power) / 2.0;
            let segment = avg_power * seconds_between(prev, curr) / 3600.0;
            warn!(
                from = %prev.timestamp,
                to = %curr.timestamp,
                total_before = prev.total_energy,
                total_after = curr.total_energy,
                returned_before = prev.total_energy_returned,
                returned_after = curr.total_energy_returned,
                avg_power_w = avg_power,
                gap_fill_wh = segment,
                "counter reset detected, gap-filling from average power"
            );
            segment
        } else {
            curr.net_total_energy - prev.net_total_energy
        };
    }

    Ok(CounterReading {
        energy_delta_wh,
        avg_power_w: energy_delta_wh * 3600.0 / elapsed_seconds,
        elapsed_seconds,
        resets,
        export: export_energy(first, last, settings),
    })
}

/// First-vs-last difference of the returned-energy counter, if plausible.
fn export_energy(
    first: &GridMeterSample,
    last: &GridMeterSample,
    settings: &ReconcileSettings,
) -> Option<ExportEnergy> {
    let start = first.total_energy_returned;
    let end = last.total_energy_returned;
    let elapsed = seconds_between(first, last);

    if start < settings.min_baseline_wh || elapsed <= 0.0 {
        warn!(
            start_wh = start,
            end_wh = end,
            "export energy skipped: missing data or invalid time"
        );
        return None;
    }
    if end < start {
        warn!(start_wh = start, end_wh = end, "export energy skipped: counter reset detected");
        return None;
    }
    let diff = end - start;
    if diff > settings.export_ceiling_wh {
        warn!(
            diff_wh = diff,
            elapsed_seconds = elapsed,
            ceiling_wh = settings.export_ceiling_wh,
            "export energy skipped: implausible diff"
        );
        return None;
    }
    Some(ExportEnergy {
        energy_wh: diff,
        avg_power_w: diff * 3600.0 / elapsed,
    })
}

fn seconds_between(a: &GridMeterSample, b: &GridMeterSample) -> f64 {
    (b.timestamp - a.timestamp).num_milliseconds() as f64 / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeDelta, TimeZone, Utc};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 8, 12, 0, 0).unwrap()
    }

    fn sample(minute: i64, power: f64, total: f64, returned: f64) -> GridMeterSample {
        GridMeterSample {
            timestamp: t0() + TimeDelta::minutes(minute),
            total_power: power,
            total_energy: total,
            total_energy_returned: returned,
            net_total_energy: total - returned,
            phase1_voltage: None,
            phase2_voltage: None,
            phase3_voltage: None,
            phase1_current: None,
            phase2_current: None,
            phase3_current: None,
            phase1_pf: None,
            phase2_pf: None,
            phase3_pf: None,
        }
    }

    #[test]
    fn test_exact_counter_difference_without_reset() {
        let samples = [
            sample(0, 1200.0, 50_000.0, 2_000.0),
            sample(1, 1200.0, 50_020.0, 2_000.0),
            sample(2, 1200.0, 50_040.0, 2_000.0),
            sample(5, 1200.0, 50_100.0, 2_000.0),
        ];
        let r = reconcile(&samples, &ReconcileSettings::default()).unwrap();
        assert_eq!(r.energy_delta_wh, 100.0);
        assert_eq!(r.elapsed_seconds, 300.0);
        assert_eq!(r.avg_power_w, 1200.0);
        assert_eq!(r.resets, 0);
        let export = r.export.unwrap();
        assert_eq!(export.energy_wh, 0.0);
    }

    #[test]
    fn test_reset_segment_is_gap_filled() {
        let per_minute_1000w = 1000.0 / 60.0;
        let per_minute_800w = 800.0 / 60.0;
        let base = 30_000.0;
        let samples = [
            sample(0, 1000.0, base, 500.0),
            sample(1, 1000.0, base + per_minute_1000w, 500.0),
            sample(2, 1000.0, base + 2.0 * per_minute_1000w, 500.0),
            // meter rebooted: counters restart near zero
            sample(3, 800.0, 0.0, 0.0),
            sample(4, 800.0, per_minute_800w, 0.0),
        ];
        let r = reconcile(&samples, &ReconcileSettings::default()).unwrap();
        assert_eq!(r.resets, 1);
        assert!((r.energy_delta_wh - 61.666_667).abs() < 1e-3, "{}", r.energy_delta_wh);
        assert!((r.avg_power_w - 925.0).abs() < 1e-3, "{}", r.avg_power_w);
        assert_eq!(r.elapsed_seconds, 240.0);
        // returned counter went backwards
        assert_eq!(r.export, None);
    }

    #[test]
    fn test_small_decrease_is_not_a_reset() {
        let samples = [
            sample(0, 0.0, 20_000.0, 9_000.0),
            sample(5, 0.0, 19_990.0, 9_000.0),
        ];
        let r = reconcile(&samples, &ReconcileSettings::default()).unwrap();
        assert_eq!(r.resets, 0);
        assert_eq!(r.energy_delta_wh, -10.0);
    }

    #[test]
    fn test_net_export_is_negative_energy() {
        let samples = [
            sample(0, -600.0, 10_000.0, 3_000.0),
            sample(5, -600.0, 10_000.0, 3_050.0),
        ];
        let r = reconcile(&samples, &ReconcileSettings::default()).unwrap();
        assert_eq!(r.energy_delta_wh, -50.0);
        assert_eq!(r.avg_power_w, -600.0);
        let export = r.export.unwrap();
        assert_eq!(export.energy_wh, 50.0);
        assert_eq!(export.avg_power_w, 600.0);
    }

    #[test]
    fn test_single_sample_is_rejected() {
        let err = reconcile(&[sample(0, 0.0, 1_000.0, 1_000.0)], &ReconcileSettings::default());
        assert_eq!(err, Err(ReconcileError::InsufficientSamples { count: 1 }));
        assert_eq!(
            reconcile(&[], &ReconcileSettings::default()),
            Err(ReconcileError::InsufficientSamples { count: 0 })
        );
    }

    #[test]
    fn test_low_baseline_is_rejected() {
        let samples = [
            sample(0, 500.0, 50.0, 5_000.0),
            sample(5, 500.0, 90.0, 5_000.0),
        ];
        let err = reconcile(&samples, &ReconcileSettings::default());
        assert!(matches!(err, Err(ReconcileError::ImplausibleBaseline { .. })));

        let samples = [
            sample(0, 500.0, 5_000.0, 99.0),
            sample(5, 500.0, 5_040.0, 99.0),
        ];
        let err = reconcile(&samples, &ReconcileSettings::default());
        assert!(matches!(err, Err(ReconcileError::ImplausibleBaseline { .. })));
    }

    #[test]
    fn test_zero_span_is_rejected() {
        let samples = [
            sample(2, 500.0, 5_000.0, 5_000.0),
            sample(2, 500.0, 5_000.0, 5_000.0),
        ];
        let err = reconcile(&samples, &ReconcileSettings::default());
        assert!(matches!(err, Err(ReconcileError::InvalidTimeRange { .. })));
    }

    #[test]
    fn test_export_above_ceiling_is_omitted() {
        let samples = [
            sample(0, 0.0, 10_000.0, 1_000.0),
            sample(5, 0.0, 10_000.0, 7_000.0),
        ];
        let r = reconcile(&samples, &ReconcileSettings::default()).unwrap();
        assert_eq!(r.export, None);
        // the net figure is still produced
        assert_eq!(r.energy_delta_wh, -6_000.0);
    }

    #[test]
    fn test_thresholds_are_independent() {
        let settings = ReconcileSettings {
            export_ceiling_wh: 8_000.0,
            ..ReconcileSettings::default()
        };
        let samples = [
            sample(0, 0.0, 10_000.0, 1_000.0),
            sample(5, 0.0, 10_000.0, 7_000.0),
        ];
        let r = reconcile(&samples, &settings).unwrap();
        assert_eq!(r.export.map(|e| e.energy_wh), Some(6_000.0));
        assert_eq!(r.resets, 0);
    }
}
