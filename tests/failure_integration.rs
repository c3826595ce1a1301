//! Integration tests for store failures and bad meter data.

mod common;

use common::{FaultyStore, MIDDAY, at, field, grid_sample, records_of};
use meter_rollup::aggregation::{Emeters5MinAggregator, aggregate_window};
use meter_rollup::backfill::run_backfill;
use meter_rollup::error::{ReconcileError, SkipReason, ValidationFailure, WindowError, WindowOutcome};
use meter_rollup::io::import::store_grid_samples;
use meter_rollup::store::InMemoryStore;
use meter_rollup::window::{Tier, Window};

#[test]
fn rejected_writes_fail_windows_but_not_the_run() {
    let config = common::config();
    let inner = common::steady_store(&config, MIDDAY, at(12, 0), 60);
    let mut store = FaultyStore::new(inner);
    store.reject_writes_to = Some(config.destinations.emeters_5min.bucket.clone());

    let report = run_backfill(&config, &mut store, at(12, 0), at(13, 0), &Tier::ALL, true);

    let base = report.summary(Tier::FiveMinute);
    assert_eq!((base.completed, base.failed), (0, 12));
    assert!(report.has_failures());
    assert!(
        report
            .failures
            .iter()
            .all(|f| matches!(f.error, WindowError::Persistence(_)))
    );
    // Nothing was persisted, so the rollups find no records.
    assert_eq!(report.summary(Tier::FifteenMinute).skipped, 4);
    assert_eq!(report.summary(Tier::OneHour).skipped, 1);
}

#[test]
fn rejected_writes_do_not_matter_in_dry_run() {
    let config = common::config();
    let inner = common::steady_store(&config, MIDDAY, at(12, 0), 60);
    let mut store = FaultyStore::new(inner);
    store.reject_writes_to = Some(config.destinations.emeters_5min.bucket.clone());

    let report = run_backfill(&config, &mut store, at(12, 0), at(13, 0), &[Tier::FiveMinute], false);
    assert_eq!(report.summary(Tier::FiveMinute).completed, 12);
    assert!(!report.has_failures());
}

#[test]
fn unreadable_source_fails_the_window() {
    let config = common::config();
    let inner = common::steady_store(&config, MIDDAY, at(12, 0), 60);
    let mut store = FaultyStore::new(inner);
    store.reject_reads_from = Some(config.sources.shelly_em3.bucket.clone());

    let window = Window::ending_at(Tier::FiveMinute, at(12, 5)).unwrap();
    let outcome = aggregate_window(&Emeters5MinAggregator::new(&config), &mut store, &window, true);
    assert!(matches!(outcome, WindowOutcome::Failed(WindowError::Fetch(_))));

    let dest = &config.destinations.emeters_5min;
    assert_eq!(store.inner.len(&dest.bucket, &dest.measurement), 0);
}

#[test]
fn unreadable_side_data_leaves_rollups_intact() {
    let config = common::config();
    let inner = common::steady_store(&config, MIDDAY, at(12, 0), 60);
    let mut store = FaultyStore::new(inner);
    store.reject_reads_from = Some(config.sources.weather.bucket.clone());

    let report = run_backfill(&config, &mut store, at(12, 0), at(13, 0), &Tier::ALL, true);
    assert!(!report.has_failures());
    assert_eq!(report.summary(Tier::FifteenMinute).completed, 4);
    assert_eq!(report.summary(Tier::OneHour).completed, 1);

    let hour = records_of(&report.records, Tier::OneHour)[0];
    assert!(field(hour, "solar_yield_sum").is_some());
    assert!(field(hour, "net_cost").is_some());
    assert_eq!(field(hour, "air_temperature"), None);
}

#[test]
fn unreadable_prices_drop_only_the_cost_fields() {
    let config = common::config();
    let inner = common::steady_store(&config, MIDDAY, at(12, 0), 60);
    let mut store = FaultyStore::new(inner);
    store.reject_reads_from = Some(config.sources.spotprice.bucket.clone());

    let report = run_backfill(&config, &mut store, at(12, 0), at(13, 0), &Tier::ALL, true);
    assert!(!report.has_failures());
    for r in records_of(&report.records, Tier::FifteenMinute) {
        assert!(field(r, "emeter_sum").is_some());
        assert_eq!(field(r, "price_total"), None);
        assert_eq!(field(r, "net_cost"), None);
        assert!(field(r, "self_consumption_ratio").is_some());
    }
}

#[test]
fn meter_reboot_is_gap_filled() {
    let config = common::config();
    let t = |m| at(12, m);
    // 1 kW import; the meter restarts from zero between minutes 2 and 3.
    let grid = vec![
        grid_sample(t(0), 1_000.0, 50_000.0, 20_000.0),
        grid_sample(t(1), 1_000.0, 50_016.0, 20_000.0),
        grid_sample(t(2), 1_000.0, 50_033.0, 20_000.0),
        grid_sample(t(3), 1_000.0, 17.0, 0.0),
        grid_sample(t(4), 1_000.0, 33.0, 0.0),
    ];
    let mut store = InMemoryStore::new();
    store_grid_samples(&mut store, &config.sources.shelly_em3, &grid).unwrap();

    let report = run_backfill(&config, &mut store, at(12, 0), at(12, 5), &[Tier::FiveMinute], true);
    let r = &report.records[0];
    let delta = field(r, "emeter_sum").unwrap();
    // 16 + 17 from the counters, ~16.7 from average power across the reset,
    // 16 after it.
    assert!((delta - (16.0 + 17.0 + 1_000.0 / 60.0 + 16.0)).abs() < 1e-6, "delta {delta}");
    // The returned counter went backwards, so export is omitted.
    assert_eq!(field(r, "energy_returned_sum"), None);
}

#[test]
fn meter_starting_from_zero_is_skipped() {
    let config = common::config();
    let grid: Vec<_> = (0..5)
        .map(|m| grid_sample(at(12, m), 600.0, 10.0 * f64::from(m), 0.0))
        .collect();
    let mut store = InMemoryStore::new();
    store_grid_samples(&mut store, &config.sources.shelly_em3, &grid).unwrap();

    let window = Window::ending_at(Tier::FiveMinute, at(12, 5)).unwrap();
    let outcome = aggregate_window(&Emeters5MinAggregator::new(&config), &mut store, &window, true);
    assert!(matches!(
        outcome,
        WindowOutcome::Skipped(SkipReason::Validation(ValidationFailure::Counters(
            ReconcileError::ImplausibleBaseline { .. }
        )))
    ));
}
