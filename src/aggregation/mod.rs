//! Per-tier aggregation pipelines.
//!
//! The 5-minute tier reads raw telemetry; the 15-minute and 1-hour tiers read
//! only persisted 5-minute records plus prices and weather.

pub mod analytics;
pub mod emeters_5min;
pub mod pipeline;

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::config::SeriesConfig;
use crate::error::StoreError;
use crate::model::FieldMap;
use crate::store::{Query, TimeSeriesStore, pivot};
use crate::window::TimeRange;

pub use analytics::AnalyticsAggregator;
pub use emeters_5min::Emeters5MinAggregator;
pub use pipeline::{AggregationPipeline, aggregate_window};

/// Fetches one series over `range`, grouped by timestamp.
fn fetch_series(
    store: &dyn TimeSeriesStore,
    series: &SeriesConfig,
    range: TimeRange,
) -> Result<BTreeMap<DateTime<Utc>, FieldMap>, StoreError> {
    let rows = store.query(&Query {
        bucket: series.bucket.clone(),
        measurement: series.measurement.clone(),
        range,
    })?;
    Ok(pivot(rows))
}
