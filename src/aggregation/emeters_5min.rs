//! Base tier: raw battery-system and grid-meter samples into 5-minute records.

use tracing::{debug, warn};

use crate::config::{EngineConfig, SeriesConfig};
use crate::error::{SkipReason, StoreError, ValidationFailure, WindowOutcome};
use crate::metrics::primitives::{
    calculate_energy_sum, calculate_net_grid_power, calculate_total_consumption, last_present,
    mean_present, safe_mean, sanitize_power_value,
};
use crate::model::{BatterySystemSample, EnergyMetrics, GridMeterSample, MetricRecord};
use crate::reconcile::{ReconcileSettings, reconcile};
use crate::store::{Point, TimeSeriesStore};
use crate::window::{Tier, Window};

use super::AggregationPipeline;
use super::fetch_series;

/// Samples of both raw streams inside one window, in time order.
#[derive(Debug, Clone, Default)]
pub struct BaseTierData {
    pub battery: Vec<BatterySystemSample>,
    pub grid: Vec<GridMeterSample>,
}

/// Computes `emeters_5min` records.
#[derive(Debug, Clone)]
pub struct Emeters5MinAggregator {
    battery_source: SeriesConfig,
    grid_source: SeriesConfig,
    destination: SeriesConfig,
    max_reasonable_power_w: f64,
    reconcile: ReconcileSettings,
}

impl Emeters5MinAggregator {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            battery_source: config.sources.checkwatt.clone(),
            grid_source: config.sources.shelly_em3.clone(),
            destination: config.destinations.emeters_5min.clone(),
            max_reasonable_power_w: config.thresholds.max_reasonable_power_w,
            reconcile: ReconcileSettings::from(&config.thresholds),
        }
    }

    /// Averages one battery-system power field, zeroing implausible results.
    fn battery_avg(
        &self,
        samples: &[BatterySystemSample],
        field: &str,
        get: fn(&BatterySystemSample) -> Option<f64>,
    ) -> f64 {
        let values: Vec<Option<f64>> = samples.iter().map(get).collect();
        sanitize_power_value(
            Some(safe_mean(&values, 0.0)),
            field,
            self.max_reasonable_power_w,
        )
    }
}

impl AggregationPipeline for Emeters5MinAggregator {
    type Raw = BaseTierData;
    type Metrics = EnergyMetrics;

    fn tier(&self) -> Tier {
        Tier::FiveMinute
    }

    fn fetch_data(
        &self,
        store: &dyn TimeSeriesStore,
        window: &Window,
    ) -> Result<BaseTierData, StoreError> {
        let battery = fetch_series(store, &self.battery_source, window.sample_range())?
            .iter()
            .map(|(ts, fields)| BatterySystemSample::from_fields(*ts, fields))
            .collect();

        let mut grid = Vec::new();
        for (ts, fields) in fetch_series(store, &self.grid_source, window.sample_range())? {
            match GridMeterSample::from_fields(ts, &fields) {
                Some(sample) => grid.push(sample),
                None => warn!(
                    source = %self.grid_source,
                    timestamp = %ts,
                    "grid meter sample without counters dropped"
                ),
            }
        }

        Ok(BaseTierData { battery, grid })
    }

    fn validate_data(&self, raw: &BaseTierData, _window: &Window) -> Result<(), SkipReason> {
        if raw.battery.is_empty() && raw.grid.is_empty() {
            return Err(SkipReason::NoData {
                sources: "checkwatt, shelly_em3",
            });
        }
        Ok(())
    }

    fn calculate_metrics(
        &self,
        raw: BaseTierData,
        window: &Window,
    ) -> WindowOutcome<EnergyMetrics> {
        let interval = window.duration_seconds();
        let mut m = EnergyMetrics::default();

        if !raw.battery.is_empty() {
            let b = &raw.battery;
            let solar = self.battery_avg(b, "solar_yield", |s| s.solar_yield);
            let charge = self.battery_avg(b, "battery_charge", |s| s.battery_charge);
            let discharge = self.battery_avg(b, "battery_discharge", |s| s.battery_discharge);
            let import = self.battery_avg(b, "energy_import", |s| s.energy_import);
            let export = self.battery_avg(b, "energy_export", |s| s.energy_export);

            m.solar_yield_avg = Some(solar);
            m.battery_charge_avg = Some(charge);
            m.battery_discharge_avg = Some(discharge);
            m.energy_import_avg = Some(import);
            m.energy_export_avg = Some(export);
            m.cw_emeter_avg = Some(calculate_net_grid_power(import, export));

            m.solar_yield_sum = Some(calculate_energy_sum(solar, interval));
            m.battery_charge_sum = Some(calculate_energy_sum(charge, interval));
            m.battery_discharge_sum = Some(calculate_energy_sum(discharge, interval));
            m.energy_import_sum = Some(calculate_energy_sum(import, interval));
            m.energy_export_sum = Some(calculate_energy_sum(export, interval));

            let soc: Vec<Option<f64>> = b.iter().map(|s| s.battery_soc).collect();
            m.battery_soc = last_present(&soc);
        }

        let mut counter_error = None;
        if !raw.grid.is_empty() {
            match reconcile(&raw.grid, &self.reconcile) {
                Ok(reading) => {
                    m.emeter_avg = Some(reading.avg_power_w);
                    m.emeter_sum = Some(reading.energy_delta_wh);
                    m.ts_diff = Some(reading.elapsed_seconds);
                    if let Some(export) = reading.export {
                        m.energy_returned_avg = Some(export.avg_power_w);
                        m.energy_returned_sum = Some(export.energy_wh);
                    }

                    let g = &raw.grid;
                    let voltages: Vec<_> = g.iter().map(GridMeterSample::mean_voltage).collect();
                    let currents: Vec<_> = g.iter().map(GridMeterSample::mean_current).collect();
                    let pfs: Vec<_> = g.iter().map(GridMeterSample::mean_power_factor).collect();
                    m.grid_voltage_avg = mean_present(&voltages);
                    m.grid_current_avg = mean_present(&currents);
                    m.grid_power_factor_avg = mean_present(&pfs);
                }
                Err(e) => {
                    warn!(
                        window_end = %window.end.to_rfc3339(),
                        source = %self.grid_source,
                        error = %e,
                        "grid meter fields dropped"
                    );
                    counter_error = Some(e);
                }
            }
        }

        if let (Some(grid), Some(solar), Some(discharge), Some(charge)) = (
            m.emeter_avg,
            m.solar_yield_avg,
            m.battery_discharge_avg,
            m.battery_charge_avg,
        ) {
            m.consumption_avg = Some(calculate_total_consumption(grid, solar, discharge, charge));
        }
        if let (Some(grid), Some(solar), Some(discharge), Some(charge)) = (
            m.emeter_sum,
            m.solar_yield_sum,
            m.battery_discharge_sum,
            m.battery_charge_sum,
        ) {
            m.consumption_sum = Some(calculate_total_consumption(grid, solar, discharge, charge));
        }

        if let (true, Some(e)) = (m.is_empty(), counter_error) {
            return WindowOutcome::Skipped(SkipReason::Validation(ValidationFailure::Counters(e)));
        }

        debug!(
            window_end = %window.end.to_rfc3339(),
            battery_samples = raw.battery.len(),
            grid_samples = raw.grid.len(),
            "aggregated 5-minute window"
        );
        WindowOutcome::Completed(m)
    }

    fn write_results(
        &self,
        store: &mut dyn TimeSeriesStore,
        window: &Window,
        metrics: &EnergyMetrics,
    ) -> Result<(), StoreError> {
        let point =
            Point::new(&self.destination.measurement, window.end).with_fields(metrics.fields());
        store.write(&self.destination.bucket, point)
    }
}
