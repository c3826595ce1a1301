//! The four-stage pipeline every tier implements, and its driver.

use tracing::{debug, error, info, warn};

use crate::error::{SkipReason, StoreError, ValidationFailure, WindowError, WindowOutcome};
use crate::model::MetricRecord;
use crate::store::TimeSeriesStore;
use crate::window::{Tier, Window};

/// One aggregation tier: fetch, validate, compute and persist a window.
pub trait AggregationPipeline {
    /// Everything fetched for one window.
    type Raw;
    /// The record produced for one window.
    type Metrics: MetricRecord;

    /// The tier this pipeline computes.
    fn tier(&self) -> Tier;

    /// Reads every input of `window` from the store.
    ///
    /// # Errors
    ///
    /// Propagates the first failing store query.
    fn fetch_data(&self, store: &dyn TimeSeriesStore, window: &Window)
    -> Result<Self::Raw, StoreError>;

    /// Decides whether the fetched data is enough to compute anything.
    ///
    /// # Errors
    ///
    /// Returns the reason the window should be skipped.
    fn validate_data(&self, raw: &Self::Raw, window: &Window) -> Result<(), SkipReason>;

    /// Computes the window's record.
    ///
    /// Returns [`WindowOutcome::Completed`] with the record, or why there is
    /// none.
    fn calculate_metrics(&self, raw: Self::Raw, window: &Window) -> WindowOutcome<Self::Metrics>;

    /// Upserts the record at `window.end`.
    ///
    /// # Errors
    ///
    /// Propagates the store's write error.
    fn write_results(
        &self,
        store: &mut dyn TimeSeriesStore,
        window: &Window,
        metrics: &Self::Metrics,
    ) -> Result<(), StoreError>;
}

/// Runs one window through `pipeline`.
///
/// Never panics and never returns early on a bad window: every way a window
/// can go wrong ends up in the returned outcome. With `persist` false nothing
/// is written, and the same inputs always give the same metrics.
pub fn aggregate_window<P>(
    pipeline: &P,
    store: &mut dyn TimeSeriesStore,
    window: &Window,
    persist: bool,
) -> WindowOutcome<P::Metrics>
where
    P: AggregationPipeline + ?Sized,
{
    let tier = pipeline.tier();
    let window_end = window.end.to_rfc3339();

    let window = match Window::new(tier, window.start, window.end) {
        Ok(w) => w,
        Err(e) => {
            warn!(%tier, window_end = %window_end, error = %e, "window rejected");
            return WindowOutcome::Skipped(SkipReason::Validation(e));
        }
    };

    let raw = match pipeline.fetch_data(&*store, &window) {
        Ok(raw) => raw,
        Err(e) => {
            error!(%tier, window_end = %window_end, error = %e, "fetch failed");
            return WindowOutcome::Failed(WindowError::Fetch(e));
        }
    };

    if let Err(reason) = pipeline.validate_data(&raw, &window) {
        log_skip(tier, &window_end, &reason);
        return WindowOutcome::Skipped(reason);
    }

    let metrics = match pipeline.calculate_metrics(raw, &window) {
        WindowOutcome::Completed(m) => m,
        WindowOutcome::Skipped(reason) => {
            log_skip(tier, &window_end, &reason);
            return WindowOutcome::Skipped(reason);
        }
        WindowOutcome::Failed(e) => {
            error!(%tier, window_end = %window_end, error = %e, "computation failed");
            return WindowOutcome::Failed(e);
        }
    };

    let bad = metrics.non_finite_fields();
    if !bad.is_empty() {
        let e = WindowError::Computation(format!("non-finite fields: {}", bad.join(", ")));
        error!(%tier, window_end = %window_end, error = %e, "computation failed");
        return WindowOutcome::Failed(e);
    }
    if metrics.fields().is_empty() {
        let reason = SkipReason::Validation(ValidationFailure::EmptyRecord);
        log_skip(tier, &window_end, &reason);
        return WindowOutcome::Skipped(reason);
    }

    if persist {
        if let Err(e) = pipeline.write_results(store, &window, &metrics) {
            error!(%tier, window_end = %window_end, error = %e, "persistence failed");
            return WindowOutcome::Failed(WindowError::Persistence(e));
        }
        debug!(%tier, window_end = %window_end, "window persisted");
    }

    WindowOutcome::Completed(metrics)
}

fn log_skip(tier: Tier, window_end: &str, reason: &SkipReason) {
    match reason {
        SkipReason::NoData { .. } => {
            info!(%tier, window_end = %window_end, %reason, "window skipped");
        }
        SkipReason::Validation(_) => {
            warn!(%tier, window_end = %window_end, %reason, "window skipped");
        }
    }
}
