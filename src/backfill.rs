//! Batch driver: walks every window of a time range, tier by tier.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use tracing::info;

use crate::aggregation::{
    AggregationPipeline, AnalyticsAggregator, Emeters5MinAggregator, aggregate_window,
};
use crate::config::EngineConfig;
use crate::error::{WindowError, WindowOutcome};
use crate::model::MetricRecord;
use crate::store::TimeSeriesStore;
use crate::window::{Tier, Window, WindowClock};

/// A completed window's persisted fields.
#[derive(Debug, Clone, PartialEq)]
pub struct WindowRecord {
    pub tier: Tier,
    pub window_end: DateTime<Utc>,
    pub fields: Vec<(String, f64)>,
}

/// Outcome counts for one tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TierSummary {
    pub completed: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl TierSummary {
    pub fn total(&self) -> usize {
        self.completed + self.skipped + self.failed
    }
}

/// A failed window and why.
#[derive(Debug, Clone, PartialEq)]
pub struct WindowFailure {
    pub tier: Tier,
    pub window_end: DateTime<Utc>,
    pub error: WindowError,
}

/// Everything a backfill run produced.
#[derive(Debug, Clone, Default)]
pub struct BackfillReport {
    /// Outcome counts per tier that was run.
    pub tiers: BTreeMap<Tier, TierSummary>,
    /// Completed records in processing order.
    pub records: Vec<WindowRecord>,
    pub failures: Vec<WindowFailure>,
}

impl BackfillReport {
    /// Counts for `tier`, zero if it was not run.
    pub fn summary(&self, tier: Tier) -> TierSummary {
        self.tiers.get(&tier).copied().unwrap_or_default()
    }

    /// Whether any window failed.
    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }

    fn record<M: MetricRecord>(&mut self, window: &Window, outcome: WindowOutcome<M>) {
        let summary = self.tiers.entry(window.tier).or_default();
        match outcome {
            WindowOutcome::Completed(m) => {
                summary.completed += 1;
                self.records.push(WindowRecord {
                    tier: window.tier,
                    window_end: window.end,
                    fields: m.fields(),
                });
            }
            WindowOutcome::Skipped(_) => summary.skipped += 1,
            WindowOutcome::Failed(error) => {
                summary.failed += 1;
                self.failures.push(WindowFailure {
                    tier: window.tier,
                    window_end: window.end,
                    error,
                });
            }
        }
    }
}

impl fmt::Display for BackfillReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "--- Backfill Report ---")?;
        for (tier, s) in &self.tiers {
            writeln!(
                f,
                "{:<6} {:>5} windows: {} completed, {} skipped, {} failed",
                tier.label(),
                s.total(),
                s.completed,
                s.skipped,
                s.failed
            )?;
        }
        for failure in &self.failures {
            writeln!(
                f,
                "failed {} window ending {}: {}",
                failure.tier,
                failure.window_end.to_rfc3339(),
                failure.error
            )?;
        }
        write!(f, "Records produced:      {}", self.records.len())
    }
}

/// Runs one tier over `[from, to]`.
fn run_tier<P: AggregationPipeline>(
    pipeline: &P,
    store: &mut dyn TimeSeriesStore,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
    persist: bool,
    report: &mut BackfillReport,
) {
    let tier = pipeline.tier();
    report.tiers.entry(tier).or_default();
    let mut clock = WindowClock::new(tier, from, to);
    clock.run(|window| {
        let outcome = aggregate_window(pipeline, store, &window, persist);
        report.record(&window, outcome);
    });
    let s = report.summary(tier);
    info!(
        %tier,
        completed = s.completed,
        skipped = s.skipped,
        failed = s.failed,
        "tier finished"
    );
}

/// Aggregates every window of `tiers` between `from` and `to`.
///
/// The base tier runs first, then 15-minute, then 1-hour, regardless of the
/// order `tiers` is given in. A failed window is recorded in the report and
/// the run continues with the next one.
///
/// With `persist` false nothing is written, so rollup tiers only see the
/// 5-minute records already in the store.
///
/// # Arguments
///
/// * `config` - Source and destination series plus thresholds
/// * `store` - Store read from and written to
/// * `from` - Earliest window start
/// * `to` - Latest window end
/// * `tiers` - Tiers to run
/// * `persist` - Whether completed records are written back
pub fn run_backfill(
    config: &EngineConfig,
    store: &mut dyn TimeSeriesStore,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
    tiers: &[Tier],
    persist: bool,
) -> BackfillReport {
    let mut report = BackfillReport::default();
    info!(
        from = %from.to_rfc3339(),
        to = %to.to_rfc3339(),
        persist,
        "backfill started"
    );

    for tier in Tier::ALL.into_iter().filter(|t| tiers.contains(t)) {
        match tier.rollup() {
            None => {
                let pipeline = Emeters5MinAggregator::new(config);
                run_tier(&pipeline, store, from, to, persist, &mut report);
            }
            Some(rollup) => {
                let pipeline = AnalyticsAggregator::new(config, rollup);
                run_tier(&pipeline, store, from, to, persist, &mut report);
            }
        }
    }

    report
}
