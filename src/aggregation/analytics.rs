//! Rollup tiers: 5-minute records into 15-minute and 1-hour analytics.
//!
//! Besides summing energy, a rollup joins the hour's spot price, runs the
//! cost waterfall, and copies weather and indoor temperatures through.

use std::collections::BTreeMap;

use chrono::{DateTime, TimeDelta, Utc};
use tracing::{debug, warn};

use crate::config::{EngineConfig, SeriesConfig};
use crate::error::{SkipReason, StoreError, WindowOutcome};
use crate::metrics::primitives::{
    calculate_self_consumption_ratio, last_present, max_present, mean_present, sum_present,
};
use crate::metrics::waterfall::{EnergyFlows, allocate};
use crate::model::{
    AnalyticsMetrics, EnergyMetrics, FieldMap, MetricRecord, SpotPrice, WeatherObservation,
};
use crate::store::{Point, TimeSeriesStore};
use crate::window::{RollupTier, Tier, TimeRange, Window};

use super::AggregationPipeline;
use super::fetch_series;

/// Inputs of one rollup window.
#[derive(Debug, Clone, Default)]
pub struct RollupData {
    /// Contributing 5-minute records, keyed by their window end.
    pub records: Vec<(DateTime<Utc>, EnergyMetrics)>,
    /// Price of the hour containing the window start.
    pub price: Option<SpotPrice>,
    pub weather: WeatherObservation,
    /// Per-field means of the temperature series.
    pub temperatures: BTreeMap<String, f64>,
}

/// Computes `analytics_15min` or `analytics_1hour` records.
#[derive(Debug, Clone)]
pub struct AnalyticsAggregator {
    tier: RollupTier,
    base: SeriesConfig,
    spotprice: SeriesConfig,
    weather: SeriesConfig,
    temperatures: SeriesConfig,
    destination: SeriesConfig,
}

impl AnalyticsAggregator {
    /// Creates a rollup pipeline for `tier`.
    ///
    /// # Arguments
    ///
    /// * `config` - Source and destination series
    /// * `tier` - Which rollup to compute
    pub fn new(config: &EngineConfig, tier: RollupTier) -> Self {
        Self {
            tier,
            base: config.destinations.emeters_5min.clone(),
            spotprice: config.sources.spotprice.clone(),
            weather: config.sources.weather.clone(),
            temperatures: config.sources.temperatures.clone(),
            destination: config.destinations.for_tier(tier.into()).clone(),
        }
    }
}

/// Mean of each field across all points.
fn field_means(points: BTreeMap<DateTime<Utc>, FieldMap>) -> BTreeMap<String, f64> {
    let mut acc: BTreeMap<String, Vec<Option<f64>>> = BTreeMap::new();
    for fields in points.into_values() {
        for (name, value) in fields {
            acc.entry(name).or_default().push(Some(value));
        }
    }
    acc.into_iter()
        .filter_map(|(name, values)| mean_present(&values).map(|m| (name, m)))
        .collect()
}

/// Fetches optional side data, treating a failed read as no data.
fn fetch_side(
    store: &dyn TimeSeriesStore,
    series: &SeriesConfig,
    range: TimeRange,
) -> BTreeMap<DateTime<Utc>, FieldMap> {
    fetch_series(store, series, range).unwrap_or_else(|e| {
        warn!(
            bucket = %series.bucket,
            error = %e,
            "side data unavailable, continuing without it"
        );
        BTreeMap::new()
    })
}

impl AggregationPipeline for AnalyticsAggregator {
    type Raw = RollupData;
    type Metrics = AnalyticsMetrics;

    fn tier(&self) -> Tier {
        self.tier.into()
    }

    fn fetch_data(
        &self,
        store: &dyn TimeSeriesStore,
        window: &Window,
    ) -> Result<RollupData, StoreError> {
        let records = fetch_series(store, &self.base, window.record_range())?
            .into_iter()
            .map(|(ts, fields)| (ts, EnergyMetrics::from_fields(&fields)))
            .collect();

        let hour = window.hour_start();
        let price_range = TimeRange::half_open(hour, hour + TimeDelta::hours(1));
        let price = fetch_side(store, &self.spotprice, price_range)
            .into_values()
            .next()
            .map(|fields| SpotPrice::from_fields(&fields));

        let weather = field_means(fetch_side(store, &self.weather, window.sample_range()));
        let weather = WeatherObservation::from_fields(&weather);
        let temperatures =
            field_means(fetch_side(store, &self.temperatures, window.sample_range()));

        Ok(RollupData {
            records,
            price,
            weather,
            temperatures,
        })
    }

    fn validate_data(&self, raw: &RollupData, _window: &Window) -> Result<(), SkipReason> {
        if raw.records.is_empty() {
            return Err(SkipReason::NoData {
                sources: "emeters_5min",
            });
        }
        Ok(())
    }

    fn calculate_metrics(
        &self,
        raw: RollupData,
        window: &Window,
    ) -> WindowOutcome<AnalyticsMetrics> {
        let column = |get: fn(&EnergyMetrics) -> Option<f64>| -> Vec<Option<f64>> {
            raw.records.iter().map(|(_, r)| get(r)).collect()
        };
        let solar_avg = column(|r| r.solar_yield_avg);
        let consumption_avg = column(|r| r.consumption_avg);
        let emeter_avg = column(|r| r.emeter_avg);

        let mut m = AnalyticsMetrics {
            solar_yield_avg: mean_present(&solar_avg),
            consumption_avg: mean_present(&consumption_avg),
            emeter_avg: mean_present(&emeter_avg),
            battery_charge_avg: mean_present(&column(|r| r.battery_charge_avg)),
            battery_discharge_avg: mean_present(&column(|r| r.battery_discharge_avg)),
            energy_import_avg: mean_present(&column(|r| r.energy_import_avg)),
            energy_export_avg: mean_present(&column(|r| r.energy_export_avg)),
            cw_emeter_avg: mean_present(&column(|r| r.cw_emeter_avg)),
            energy_returned_avg: mean_present(&column(|r| r.energy_returned_avg)),
            grid_voltage_avg: mean_present(&column(|r| r.grid_voltage_avg)),
            grid_current_avg: mean_present(&column(|r| r.grid_current_avg)),
            grid_power_factor_avg: mean_present(&column(|r| r.grid_power_factor_avg)),
            solar_yield_sum: sum_present(&column(|r| r.solar_yield_sum)),
            consumption_sum: sum_present(&column(|r| r.consumption_sum)),
            emeter_sum: sum_present(&column(|r| r.emeter_sum)),
            battery_charge_sum: sum_present(&column(|r| r.battery_charge_sum)),
            battery_discharge_sum: sum_present(&column(|r| r.battery_discharge_sum)),
            energy_import_sum: sum_present(&column(|r| r.energy_import_sum)),
            energy_export_sum: sum_present(&column(|r| r.energy_export_sum)),
            energy_returned_sum: sum_present(&column(|r| r.energy_returned_sum)),
            ts_diff: sum_present(&column(|r| r.ts_diff)),
            battery_soc: last_present(&column(|r| r.battery_soc)),
            weather: raw.weather,
            temperatures: raw.temperatures,
            ..AnalyticsMetrics::default()
        };

        if self.tier == RollupTier::OneHour {
            m.consumption_max = max_present(&consumption_avg);
            m.solar_yield_max = max_present(&solar_avg);
            m.grid_power_max = max_present(&emeter_avg);
        }

        if let Some(price) = raw.price {
            m.price_total = price.price_total;
            m.price_sell = price.price_sell;
            if let (Some(solar), Some(consumption), Some(charge), Some(discharge)) = (
                m.solar_yield_sum,
                m.consumption_sum,
                m.battery_charge_sum,
                m.battery_discharge_sum,
            ) {
                let flows = EnergyFlows {
                    solar_yield_sum: solar,
                    consumption_sum: consumption,
                    battery_charge_sum: charge,
                    battery_discharge_sum: discharge,
                };
                m.cost = allocate(&flows, &price);
            }
        }

        if let Some(solar) = m.solar_yield_sum {
            let direct = if solar <= 0.0 {
                0.0
            } else if let Some(cost) = &m.cost {
                cost.solar_to_consumption
            } else {
                let charge = m.battery_charge_sum.unwrap_or(0.0);
                let export = m.energy_export_sum.unwrap_or(0.0);
                (solar - charge - export).max(0.0)
            };
            m.solar_direct_sum = Some(direct);
            m.self_consumption_ratio = Some(calculate_self_consumption_ratio(solar, direct));
        }

        debug!(
            tier = %self.tier,
            window_end = %window.end.to_rfc3339(),
            records = raw.records.len(),
            expected = Tier::from(self.tier).base_windows(),
            priced = m.cost.is_some(),
            "aggregated rollup window"
        );
        WindowOutcome::Completed(m)
    }

    fn write_results(
        &self,
        store: &mut dyn TimeSeriesStore,
        window: &Window,
        metrics: &AnalyticsMetrics,
    ) -> Result<(), StoreError> {
        let point =
            Point::new(&self.destination.measurement, window.end).with_fields(metrics.fields());
        store.write(&self.destination.bucket, point)
    }
}
