//! Shared test fixtures for integration tests.
#![allow(dead_code)]

use chrono::{DateTime, TimeDelta, TimeZone, Utc};

use meter_rollup::backfill::WindowRecord;
use meter_rollup::config::EngineConfig;
use meter_rollup::error::StoreError;
use meter_rollup::io::import::{PriceRow, store_battery_samples, store_grid_samples, store_prices};
use meter_rollup::model::{BatterySystemSample, GridMeterSample};
use meter_rollup::store::{InMemoryStore, Point, Query, Row, TimeSeriesStore};
use meter_rollup::window::Tier;

/// Timestamp on the fixture day (2026-01-08, UTC).
pub fn at(h: u32, m: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 8, h, m, 0).unwrap()
}

/// Production preset; fixtures write to its source series.
pub fn config() -> EngineConfig {
    EngineConfig::production()
}

/// Constant site behaviour, all in watts.
#[derive(Debug, Clone, Copy)]
pub struct SteadySite {
    pub solar_w: f64,
    pub charge_w: f64,
    pub discharge_w: f64,
    /// Grid power, positive = import.
    pub grid_w: f64,
}

/// Sunny midday: solar covers the load and charges the battery, the rest is
/// imported.
pub const MIDDAY: SteadySite = SteadySite {
    solar_w: 3_000.0,
    charge_w: 1_000.0,
    discharge_w: 0.0,
    grid_w: 1_200.0,
};

/// One battery-system and one grid-meter sample per minute over
/// `[from, from + minutes)`.
///
/// Counters start at 50 kWh imported and 20 kWh returned and integrate
/// `grid_w` exactly.
pub fn steady_samples(
    site: SteadySite,
    from: DateTime<Utc>,
    minutes: i64,
) -> (Vec<BatterySystemSample>, Vec<GridMeterSample>) {
    let mut battery = Vec::new();
    let mut grid = Vec::new();
    let (mut total, mut returned) = (50_000.0, 20_000.0);
    for i in 0..minutes {
        let timestamp = from + TimeDelta::minutes(i);
        battery.push(BatterySystemSample {
            timestamp,
            solar_yield: Some(site.solar_w),
            battery_charge: Some(site.charge_w),
            battery_discharge: Some(site.discharge_w),
            battery_soc: Some(50.0 + i as f64 * 0.1),
            energy_import: Some(site.grid_w.max(0.0)),
            energy_export: Some((-site.grid_w).max(0.0)),
        });
        grid.push(grid_sample(timestamp, site.grid_w, total, returned));
        if site.grid_w > 0.0 {
            total += site.grid_w / 60.0;
        } else {
            returned += -site.grid_w / 60.0;
        }
    }
    (battery, grid)
}

pub fn grid_sample(
    timestamp: DateTime<Utc>,
    power: f64,
    total: f64,
    returned: f64,
) -> GridMeterSample {
    GridMeterSample {
        timestamp,
        total_power: power,
        total_energy: total,
        total_energy_returned: returned,
        net_total_energy: total - returned,
        phase1_voltage: Some(230.0),
        phase2_voltage: Some(231.0),
        phase3_voltage: Some(229.0),
        phase1_current: Some(power.abs() / 690.0),
        phase2_current: Some(power.abs() / 690.0),
        phase3_current: Some(power.abs() / 690.0),
        phase1_pf: Some(0.95),
        phase2_pf: Some(0.95),
        phase3_pf: Some(0.95),
    }
}

/// Hourly prices over `[from, from + hours)`.
pub fn flat_prices(from: DateTime<Utc>, hours: i64, total: f64, sell: f64) -> Vec<PriceRow> {
    (0..hours)
        .map(|h| PriceRow {
            timestamp: from + TimeDelta::hours(h),
            price_total: Some(total),
            price_sell: Some(sell),
        })
        .collect()
}

/// A store holding `minutes` of steady telemetry and flat prices.
pub fn steady_store(
    config: &EngineConfig,
    site: SteadySite,
    from: DateTime<Utc>,
    minutes: i64,
) -> InMemoryStore {
    let mut store = InMemoryStore::new();
    let (battery, grid) = steady_samples(site, from, minutes);
    let s = &config.sources;
    store_battery_samples(&mut store, &s.checkwatt, &battery).unwrap();
    store_grid_samples(&mut store, &s.shelly_em3, &grid).unwrap();
    store_prices(&mut store, &s.spotprice, &flat_prices(from, minutes / 60 + 1, 10.0, 4.0))
        .unwrap();
    store
}

/// Value of `name` in a record, if written.
pub fn field(record: &WindowRecord, name: &str) -> Option<f64> {
    record
        .fields
        .iter()
        .find(|(k, _)| k == name)
        .map(|(_, v)| *v)
}

/// Records of one tier, in processing order.
pub fn records_of(records: &[WindowRecord], tier: Tier) -> Vec<&WindowRecord> {
    records.iter().filter(|r| r.tier == tier).collect()
}

pub fn assert_close(actual: f64, expected: f64, tol: f64) {
    assert!(
        (actual - expected).abs() <= tol,
        "expected {expected} ± {tol}, got {actual}"
    );
}

/// Wraps an in-memory store and refuses reads or writes for one bucket.
pub struct FaultyStore {
    pub inner: InMemoryStore,
    pub reject_writes_to: Option<String>,
    pub reject_reads_from: Option<String>,
}

impl FaultyStore {
    pub fn new(inner: InMemoryStore) -> Self {
        Self {
            inner,
            reject_writes_to: None,
            reject_reads_from: None,
        }
    }
}

impl TimeSeriesStore for FaultyStore {
    fn query(&self, query: &Query) -> Result<Vec<Row>, StoreError> {
        if self.reject_reads_from.as_deref() == Some(query.bucket.as_str()) {
            return Err(StoreError::Query {
                bucket: query.bucket.clone(),
                measurement: query.measurement.clone(),
                message: "connection refused".into(),
            });
        }
        self.inner.query(query)
    }

    fn write(&mut self, bucket: &str, point: Point) -> Result<(), StoreError> {
        if self.reject_writes_to.as_deref() == Some(bucket) {
            return Err(StoreError::Write {
                bucket: bucket.to_string(),
                message: "bucket is read-only".into(),
            });
        }
        self.inner.write(bucket, point)
    }
}
