//! Error and outcome types shared by every aggregation stage.

use thiserror::Error;

/// Failure modes of the energy counter reconciler.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ReconcileError {
    #[error("insufficient samples: need at least 2, got {count}")]
    InsufficientSamples { count: usize },
    #[error(
        "implausible counter baseline: total={total_wh:.1} Wh, returned={returned_wh:.1} Wh \
         (minimum {min_wh:.1} Wh)"
    )]
    ImplausibleBaseline {
        total_wh: f64,
        returned_wh: f64,
        min_wh: f64,
    },
    #[error("invalid time range: samples span {elapsed_seconds:.1} s")]
    InvalidTimeRange { elapsed_seconds: f64 },
}

/// Errors raised by a time-series store.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StoreError {
    #[error("query against {bucket}/{measurement} failed: {message}")]
    Query {
        bucket: String,
        measurement: String,
        message: String,
    },
    #[error("write to {bucket} rejected: {message}")]
    Write { bucket: String, message: String },
}

/// Why a window was not computed even though nothing went wrong.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SkipReason {
    /// No samples were available from any source the tier depends on.
    #[error("no data from {sources}")]
    NoData { sources: &'static str },
    /// Data was present but did not pass validation.
    #[error("validation failed: {0}")]
    Validation(ValidationFailure),
}

/// Data that arrived but cannot be aggregated.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationFailure {
    #[error(transparent)]
    Counters(#[from] ReconcileError),
    #[error("window start {start} is not {expected_seconds}s before end {end}")]
    WindowShape {
        start: String,
        end: String,
        expected_seconds: i64,
    },
    #[error("window end {end} is not aligned to {interval_seconds}s")]
    Unaligned { end: String, interval_seconds: i64 },
    #[error("every computable field was absent")]
    EmptyRecord,
}

/// Per-window failures that abort the window but never the batch.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum WindowError {
    #[error("fetch failed: {0}")]
    Fetch(StoreError),
    #[error("computation failed: {0}")]
    Computation(String),
    #[error("persistence failed: {0}")]
    Persistence(StoreError),
}

/// Result of running one window through a pipeline.
///
/// Only [`WindowOutcome::Completed`] carries metrics; the other variants say
/// why there is no record for the window.
#[derive(Debug, Clone, PartialEq)]
pub enum WindowOutcome<M> {
    Completed(M),
    Skipped(SkipReason),
    Failed(WindowError),
}

impl<M> WindowOutcome<M> {
    /// Returns the metrics if the window completed.
    pub fn into_metrics(self) -> Option<M> {
        match self {
            Self::Completed(m) => Some(m),
            Self::Skipped(_) | Self::Failed(_) => None,
        }
    }
}
