//! Time-series store abstraction and an in-memory implementation.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::error::StoreError;
use crate::model::FieldMap;
use crate::window::TimeRange;

/// Selects rows of one measurement within a time range.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub bucket: String,
    pub measurement: String,
    pub range: TimeRange,
}

/// One `(timestamp, field, value)` triple.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    pub timestamp: DateTime<Utc>,
    pub field: String,
    pub value: f64,
}

/// A set of fields written under one timestamp.
#[derive(Debug, Clone, PartialEq)]
pub struct Point {
    pub measurement: String,
    pub timestamp: DateTime<Utc>,
    pub fields: FieldMap,
}

impl Point {
    pub fn new(measurement: &str, timestamp: DateTime<Utc>) -> Self {
        Self {
            measurement: measurement.to_string(),
            timestamp,
            fields: FieldMap::new(),
        }
    }

    /// Adds every `(name, value)` pair as a field.
    pub fn with_fields(mut self, fields: impl IntoIterator<Item = (String, f64)>) -> Self {
        self.fields.extend(fields);
        self
    }
}

/// Backing store for raw telemetry and computed records.
///
/// Writing a point at an existing `(bucket, measurement, timestamp)` replaces
/// it, which makes re-running a window an overwrite.
pub trait TimeSeriesStore {
    /// Returns matching rows ordered by timestamp, then field name.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Query` if the backend cannot answer.
    fn query(&self, query: &Query) -> Result<Vec<Row>, StoreError>;

    /// Upserts one point.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Write` if the backend rejects the point.
    fn write(&mut self, bucket: &str, point: Point) -> Result<(), StoreError>;
}

/// Groups rows into per-timestamp field maps, in ascending time order.
pub fn pivot(rows: Vec<Row>) -> BTreeMap<DateTime<Utc>, FieldMap> {
    let mut out: BTreeMap<DateTime<Utc>, FieldMap> = BTreeMap::new();
    for row in rows {
        out.entry(row.timestamp)
            .or_default()
            .insert(row.field, row.value);
    }
    out
}

type SeriesKey = (String, String);

/// Store kept entirely in memory, used for CSV-driven runs and tests.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    series: BTreeMap<SeriesKey, BTreeMap<DateTime<Utc>, FieldMap>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// All points of one series in ascending time order.
    pub fn points<'a>(
        &'a self,
        bucket: &str,
        measurement: &str,
    ) -> impl Iterator<Item = (DateTime<Utc>, &'a FieldMap)> + 'a {
        self.series
            .get(&(bucket.to_string(), measurement.to_string()))
            .into_iter()
            .flat_map(|s| s.iter().map(|(ts, f)| (*ts, f)))
    }

    /// The point at exactly `timestamp`, if any.
    pub fn point(
        &self,
        bucket: &str,
        measurement: &str,
        timestamp: DateTime<Utc>,
    ) -> Option<&FieldMap> {
        self.series
            .get(&(bucket.to_string(), measurement.to_string()))
            .and_then(|s| s.get(&timestamp))
    }

    /// Number of points in one series.
    pub fn len(&self, bucket: &str, measurement: &str) -> usize {
        self.series
            .get(&(bucket.to_string(), measurement.to_string()))
            .map_or(0, BTreeMap::len)
    }

    pub fn is_empty(&self) -> bool {
        self.series.values().all(BTreeMap::is_empty)
    }
}

impl TimeSeriesStore for InMemoryStore {
    fn query(&self, query: &Query) -> Result<Vec<Row>, StoreError> {
        let key = (query.bucket.clone(), query.measurement.clone());
        let Some(series) = self.series.get(&key) else {
            return Ok(Vec::new());
        };
        if query.range.start > query.range.stop {
            return Ok(Vec::new());
        }
        let rows = series
            .range(query.range.start..=query.range.stop)
            .filter(|(ts, _)| query.range.contains(**ts))
            .flat_map(|(ts, fields)| {
                fields.iter().map(move |(field, value)| Row {
                    timestamp: *ts,
                    field: field.clone(),
                    value: *value,
                })
            })
            .collect();
        Ok(rows)
    }

    fn write(&mut self, bucket: &str, point: Point) -> Result<(), StoreError> {
        if point.fields.is_empty() {
            return Err(StoreError::Write {
                bucket: bucket.to_string(),
                message: format!("point at {} has no fields", point.timestamp.to_rfc3339()),
            });
        }
        self.series
            .entry((bucket.to_string(), point.measurement))
            .or_default()
            .insert(point.timestamp, point.fields);
        Ok(())
    }
}
