//! meter-rollup entry point: config loading, data import and backfill.

mod cli;

use std::path::Path;
use std::process;

use anyhow::{Context, bail};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use meter_rollup::backfill::run_backfill;
use meter_rollup::config::EngineConfig;
use meter_rollup::io::export::export_csv;
use meter_rollup::io::import::{import_battery_csv, import_grid_csv, import_price_csv};
use meter_rollup::store::InMemoryStore;
use meter_rollup::synthetic;

use cli::CliOptions;

fn load_config(cli: &CliOptions) -> anyhow::Result<EngineConfig> {
    let mut config = if let Some(ref path) = cli.config {
        EngineConfig::from_toml_file(path)
            .with_context(|| format!("loading config {}", path.display()))?
    } else if let Some(ref name) = cli.preset {
        EngineConfig::from_preset(name)?
    } else {
        EngineConfig::production()
    };

    if let Some(seed) = cli.seed {
        config.synthetic.seed = seed;
    }

    let errors = config.validate();
    if !errors.is_empty() {
        for e in &errors {
            eprintln!("{e}");
        }
        bail!("configuration has {} error(s)", errors.len());
    }
    Ok(config)
}

fn load_inputs(
    cli: &CliOptions,
    config: &EngineConfig,
    store: &mut InMemoryStore,
) -> anyhow::Result<()> {
    let sources = &config.sources;
    if let Some(ref path) = cli.checkwatt {
        import_battery_csv(path, store, &sources.checkwatt)?;
    }
    if let Some(ref path) = cli.shelly {
        import_grid_csv(path, store, &sources.shelly_em3)?;
    }
    if let Some(ref path) = cli.prices {
        import_price_csv(path, store, &sources.spotprice)?;
    }
    if cli.synthetic {
        synthetic::populate(store, sources, &config.synthetic, cli.from, cli.to)
            .context("storing synthetic telemetry")?;
    }
    if store.is_empty() {
        warn!("no input data; every window will be skipped");
    }
    Ok(())
}

/// Runs the backfill and returns whether every window succeeded.
fn run(cli: &CliOptions) -> anyhow::Result<bool> {
    let config = load_config(cli)?;
    let mut store = InMemoryStore::new();
    load_inputs(cli, &config, &mut store)?;

    let report = run_backfill(
        &config,
        &mut store,
        cli.from,
        cli.to,
        &cli.tiers,
        !cli.dry_run,
    );
    println!("{report}");

    if let Some(ref path) = cli.out {
        export_csv(&report.records, Path::new(path))
            .with_context(|| format!("writing {}", path.display()))?;
        info!(path = %path.display(), records = report.records.len(), "records exported");
    }

    Ok(!report.has_failures())
}

fn main() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();

    let cli = match cli::parse_args() {
        Ok(cli) => cli,
        Err(e) => {
            eprintln!("error: {e}");
            cli::print_usage();
            process::exit(1);
        }
    };

    match run(&cli) {
        Ok(true) => {}
        Ok(false) => process::exit(2),
        Err(e) => {
            eprintln!("error: {e:#}");
            process::exit(1);
        }
    }
}
