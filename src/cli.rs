use std::env;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use meter_rollup::window::Tier;

/// Environment variable naming the config file when `--config` is absent.
pub const CONFIG_ENV: &str = "METER_ROLLUP_CONFIG";

pub struct CliOptions {
    pub config: Option<PathBuf>,
    pub preset: Option<String>,
    pub checkwatt: Option<PathBuf>,
    pub shelly: Option<PathBuf>,
    pub prices: Option<PathBuf>,
    pub synthetic: bool,
    pub seed: Option<u64>,
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    pub tiers: Vec<Tier>,
    pub dry_run: bool,
    pub out: Option<PathBuf>,
}

pub fn parse_args() -> Result<CliOptions, String> {
    let args: Vec<String> = env::args().skip(1).collect();
    let mut opts = parse_options(&args)?;
    if opts.config.is_none() && opts.preset.is_none() {
        opts.config = env::var(CONFIG_ENV).ok().map(PathBuf::from);
    }
    Ok(opts)
}

fn parse_options(args: &[String]) -> Result<CliOptions, String> {
    let mut i = 0usize;
    let mut config = None;
    let mut preset = None;
    let mut checkwatt = None;
    let mut shelly = None;
    let mut prices = None;
    let mut synthetic = false;
    let mut seed = None;
    let mut from = None;
    let mut to = None;
    let mut tiers = None;
    let mut dry_run = false;
    let mut out = None;

    while i < args.len() {
        match args[i].as_str() {
            "--config" => {
                i += 1;
                let path =
                    args.next_or_err(i, "missing value for --config (expected a TOML file path)")?;
                if config.replace(PathBuf::from(path)).is_some() {
                    return Err("--config provided more than once".to_string());
                }
            }
            "--preset" => {
                i += 1;
                let name =
                    args.next_or_err(i, "missing value for --preset (expected a preset name)")?;
                if preset.replace(name.to_string()).is_some() {
                    return Err("--preset provided more than once".to_string());
                }
            }
            "--checkwatt" => {
                i += 1;
                let path =
                    args.next_or_err(i, "missing value for --checkwatt (expected a CSV path)")?;
                checkwatt = Some(PathBuf::from(path));
            }
            "--shelly" => {
                i += 1;
                let path = args.next_or_err(i, "missing value for --shelly (expected a CSV path)")?;
                shelly = Some(PathBuf::from(path));
            }
            "--prices" => {
                i += 1;
                let path = args.next_or_err(i, "missing value for --prices (expected a CSV path)")?;
                prices = Some(PathBuf::from(path));
            }
            "--synthetic" => synthetic = true,
            "--seed" => {
                i += 1;
                let raw = args.next_or_err(i, "missing value for --seed (expected a u64)")?;
                let s = raw
                    .parse::<u64>()
                    .map_err(|_| format!("--seed value \"{raw}\" is not a valid u64"))?;
                seed = Some(s);
            }
            "--from" => {
                i += 1;
                let raw = args.next_or_err(i, "missing value for --from (expected RFC 3339)")?;
                from = Some(parse_time("--from", raw)?);
            }
            "--to" => {
                i += 1;
                let raw = args.next_or_err(i, "missing value for --to (expected RFC 3339)")?;
                to = Some(parse_time("--to", raw)?);
            }
            "--tier" => {
                i += 1;
                let raw = args.next_or_err(
                    i,
                    "missing value for --tier (expected 5min|15min|1hour|all)",
                )?;
                tiers = Some(parse_tiers(raw)?);
            }
            "--dry-run" => dry_run = true,
            "--out" => {
                i += 1;
                let path = args.next_or_err(i, "missing value for --out (expected a file path)")?;
                if out.replace(PathBuf::from(path)).is_some() {
                    return Err("--out provided more than once".to_string());
                }
            }
            "--help" | "-h" => {
                print_usage();
                std::process::exit(0);
            }
            other => return Err(format!("unknown argument: {other}")),
        }
        i += 1;
    }

    if config.is_some() && preset.is_some() {
        return Err(
            "arguments `--config` and `--preset` are mutually exclusive; choose one source"
                .to_string(),
        );
    }

    let from = from.ok_or_else(|| "--from is required".to_string())?;
    let to = to.ok_or_else(|| "--to is required".to_string())?;
    if from >= to {
        return Err(format!("--from ({from}) must be before --to ({to})"));
    }

    Ok(CliOptions {
        config,
        preset,
        checkwatt,
        shelly,
        prices,
        synthetic,
        seed,
        from,
        to,
        tiers: tiers.unwrap_or_else(|| Tier::ALL.to_vec()),
        dry_run,
        out,
    })
}

fn parse_time(flag: &str, raw: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| format!("{flag} value \"{raw}\" is not an RFC 3339 timestamp: {e}"))
}

fn parse_tiers(raw: &str) -> Result<Vec<Tier>, String> {
    if raw == "all" {
        return Ok(Tier::ALL.to_vec());
    }
    raw.parse::<Tier>().map(|t| vec![t])
}

trait SliceArgExt {
    fn next_or_err(&self, index: usize, err: &str) -> Result<&str, String>;
}

impl SliceArgExt for [String] {
    fn next_or_err(&self, index: usize, err: &str) -> Result<&str, String> {
        self.get(index)
            .map(String::as_str)
            .ok_or_else(|| err.to_string())
    }
}

pub fn print_usage() {
    eprintln!("meter-rollup: windowed aggregation and cost allocation for energy meters");
    eprintln!();
    eprintln!("Usage: meter-rollup --from <rfc3339> --to <rfc3339> [OPTIONS]");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  --config <path>      Load config from a TOML file (or ${CONFIG_ENV})");
    eprintln!("  --preset <name>      Use a built-in preset (production, test)");
    eprintln!("  --checkwatt <csv>    Import battery-system samples");
    eprintln!("  --shelly <csv>       Import grid-meter samples");
    eprintln!("  --prices <csv>       Import hourly spot prices");
    eprintln!("  --synthetic          Generate synthetic telemetry for the range");
    eprintln!("  --seed <u64>         Override the synthetic seed");
    eprintln!("  --tier <tier>        5min, 15min, 1hour or all (default: all)");
    eprintln!("  --dry-run            Compute windows without writing results");
    eprintln!("  --out <path>         Export computed records to CSV");
    eprintln!("  --help               Show this help message");
}

#[cfg(test)]
mod tests {
    use super::parse_options;
    use meter_rollup::window::Tier;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| (*s).to_string()).collect()
    }

    const RANGE: [&str; 4] = ["--from", "2026-01-08T00:00:00Z", "--to", "2026-01-09T00:00:00Z"];

    #[test]
    fn defaults_to_all_tiers() {
        let opts = parse_options(&args(&RANGE)).expect("parse should succeed");
        assert_eq!(opts.tiers, Tier::ALL.to_vec());
        assert!(!opts.dry_run);
        assert!(opts.config.is_none());
    }

    #[test]
    fn supports_single_tier_and_flags() {
        let mut list = RANGE.to_vec();
        list.extend(["--tier", "15min", "--dry-run", "--synthetic", "--seed", "7"]);
        let opts = parse_options(&args(&list)).expect("parse should succeed");
        assert_eq!(opts.tiers, vec![Tier::FifteenMinute]);
        assert!(opts.dry_run && opts.synthetic);
        assert_eq!(opts.seed, Some(7));
    }

    #[test]
    fn rejects_config_with_preset() {
        let mut list = RANGE.to_vec();
        list.extend(["--config", "a.toml", "--preset", "test"]);
        assert!(parse_options(&args(&list)).is_err());
    }

    #[test]
    fn rejects_inverted_range() {
        let list = ["--from", "2026-01-09T00:00:00Z", "--to", "2026-01-08T00:00:00Z"];
        assert!(parse_options(&args(&list)).is_err());
    }

    #[test]
    fn rejects_unknown_tier() {
        let mut list = RANGE.to_vec();
        list.extend(["--tier", "2hour"]);
        assert!(parse_options(&args(&list)).is_err());
    }

    #[test]
    fn requires_range() {
        assert!(parse_options(&args(&["--dry-run"])).is_err());
    }
}
