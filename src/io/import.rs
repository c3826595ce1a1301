//! CSV import of raw telemetry and prices into a store.
//!
//! Every file has a `timestamp` column in RFC 3339 followed by one column per
//! field; empty cells are missing readings.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::{debug, info};

use crate::config::SeriesConfig;
use crate::error::StoreError;
use crate::model::{BatterySystemSample, FieldMap, GridMeterSample, SpotPrice};
use crate::store::{Point, TimeSeriesStore};

/// Errors raised while loading CSV input.
#[derive(Debug, Error)]
pub enum ImportError {
    #[error("cannot open {path}: {source}")]
    Open {
        path: String,
        source: std::io::Error,
    },
    #[error("malformed CSV: {0}")]
    Csv(#[from] csv::Error),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// One row of a spot price file.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PriceRow {
    pub timestamp: DateTime<Utc>,
    pub price_total: Option<f64>,
    pub price_sell: Option<f64>,
}

impl PriceRow {
    pub fn price(&self) -> SpotPrice {
        SpotPrice {
            price_total: self.price_total,
            price_sell: self.price_sell,
        }
    }
}

/// Parses every row of a CSV reader.
///
/// # Errors
///
/// Returns `ImportError::Csv` on the first malformed row.
pub fn read_rows<T: DeserializeOwned>(reader: impl Read) -> Result<Vec<T>, ImportError> {
    let mut rdr = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
    let rows = rdr.deserialize().collect::<Result<Vec<T>, _>>()?;
    Ok(rows)
}

fn open(path: &Path) -> Result<File, ImportError> {
    File::open(path).map_err(|source| ImportError::Open {
        path: path.display().to_string(),
        source,
    })
}

/// Writes one point per timestamp, skipping samples with no fields.
fn store_points(
    store: &mut dyn TimeSeriesStore,
    series: &SeriesConfig,
    points: impl IntoIterator<Item = (DateTime<Utc>, FieldMap)>,
) -> Result<usize, StoreError> {
    let mut written = 0;
    for (timestamp, fields) in points {
        if fields.is_empty() {
            debug!(series = %series, %timestamp, "empty sample not stored");
            continue;
        }
        let point = Point::new(&series.measurement, timestamp).with_fields(fields);
        store.write(&series.bucket, point)?;
        written += 1;
    }
    Ok(written)
}

/// Stores battery-system samples under their source field names.
///
/// # Errors
///
/// Propagates the store's write error.
pub fn store_battery_samples(
    store: &mut dyn TimeSeriesStore,
    series: &SeriesConfig,
    samples: &[BatterySystemSample],
) -> Result<usize, StoreError> {
    store_points(store, series, samples.iter().map(|s| (s.timestamp, s.to_fields())))
}

/// Stores grid-meter samples.
///
/// # Errors
///
/// Propagates the store's write error.
pub fn store_grid_samples(
    store: &mut dyn TimeSeriesStore,
    series: &SeriesConfig,
    samples: &[GridMeterSample],
) -> Result<usize, StoreError> {
    store_points(store, series, samples.iter().map(|s| (s.timestamp, s.to_fields())))
}

/// Stores hourly prices.
///
/// # Errors
///
/// Propagates the store's write error.
pub fn store_prices(
    store: &mut dyn TimeSeriesStore,
    series: &SeriesConfig,
    rows: &[PriceRow],
) -> Result<usize, StoreError> {
    let points = rows.iter().map(|r| {
        let mut fields = FieldMap::new();
        if let Some(v) = r.price_total {
            fields.insert("price_total".into(), v);
        }
        if let Some(v) = r.price_sell {
            fields.insert("price_sell".into(), v);
        }
        (r.timestamp, fields)
    });
    store_points(store, series, points)
}

/// Loads a battery-system CSV file into `series`.
///
/// # Errors
///
/// Returns an `ImportError` if the file cannot be read or parsed, or the
/// store rejects a point.
pub fn import_battery_csv(
    path: &Path,
    store: &mut dyn TimeSeriesStore,
    series: &SeriesConfig,
) -> Result<usize, ImportError> {
    let samples: Vec<BatterySystemSample> = read_rows(open(path)?)?;
    let n = store_battery_samples(store, series, &samples)?;
    info!(path = %path.display(), series = %series, points = n, "imported battery samples");
    Ok(n)
}

/// Loads a grid-meter CSV file into `series`.
///
/// # Errors
///
/// Returns an `ImportError` if the file cannot be read or parsed, or the
/// store rejects a point.
pub fn import_grid_csv(
    path: &Path,
    store: &mut dyn TimeSeriesStore,
    series: &SeriesConfig,
) -> Result<usize, ImportError> {
    let samples: Vec<GridMeterSample> = read_rows(open(path)?)?;
    let n = store_grid_samples(store, series, &samples)?;
    info!(path = %path.display(), series = %series, points = n, "imported grid meter samples");
    Ok(n)
}

/// Loads a spot price CSV file into `series`.
///
/// # Errors
///
/// Returns an `ImportError` if the file cannot be read or parsed, or the
/// store rejects a point.
pub fn import_price_csv(
    path: &Path,
    store: &mut dyn TimeSeriesStore,
    series: &SeriesConfig,
) -> Result<usize, ImportError> {
    let rows: Vec<PriceRow> = read_rows(open(path)?)?;
    let n = store_prices(store, series, &rows)?;
    info!(path = %path.display(), series = %series, points = n, "imported spot prices");
    Ok(n)
}
