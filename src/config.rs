//! TOML-based engine configuration and preset definitions.

use std::fmt;
use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::window::Tier;

/// Top-level engine configuration parsed from TOML.
///
/// All fields have defaults matching the production deployment. Load from
/// TOML with [`EngineConfig::from_toml_file`] or use
/// [`EngineConfig::production`] for the built-in default.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EngineConfig {
    /// Raw telemetry and side-data series (read only).
    #[serde(default)]
    pub sources: SourcesConfig,
    /// Where each tier's records are written.
    #[serde(default)]
    pub destinations: DestinationsConfig,
    /// Sanity limits applied while aggregating.
    #[serde(default)]
    pub thresholds: ThresholdConfig,
    /// Parameters of the synthetic site used by `--synthetic`.
    #[serde(default)]
    pub synthetic: SyntheticConfig,
}

/// A bucket plus the measurement inside it.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SeriesConfig {
    pub bucket: String,
    pub measurement: String,
}

impl SeriesConfig {
    pub fn new(bucket: &str, measurement: &str) -> Self {
        Self {
            bucket: bucket.to_string(),
            measurement: measurement.to_string(),
        }
    }
}

impl fmt::Display for SeriesConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.bucket, self.measurement)
    }
}

/// Raw telemetry and side-data series.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SourcesConfig {
    /// Battery/solar system samples.
    pub checkwatt: SeriesConfig,
    /// Three-phase grid meter samples.
    pub shelly_em3: SeriesConfig,
    /// Hourly spot prices.
    pub spotprice: SeriesConfig,
    pub weather: SeriesConfig,
    pub temperatures: SeriesConfig,
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            checkwatt: SeriesConfig::new("checkwatt_full_data", "checkwatt"),
            shelly_em3: SeriesConfig::new("shelly_em3_emeters_raw", "shelly_em3"),
            spotprice: SeriesConfig::new("spotprice", "spot"),
            weather: SeriesConfig::new("weather", "weather"),
            temperatures: SeriesConfig::new("temperatures", "temperatures"),
        }
    }
}

/// Destination series of each tier.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DestinationsConfig {
    pub emeters_5min: SeriesConfig,
    pub analytics_15min: SeriesConfig,
    pub analytics_1hour: SeriesConfig,
}

impl Default for DestinationsConfig {
    fn default() -> Self {
        Self {
            emeters_5min: SeriesConfig::new("emeters_5min", "energy"),
            analytics_15min: SeriesConfig::new("analytics_15min", "analytics"),
            analytics_1hour: SeriesConfig::new("analytics_1hour", "analytics"),
        }
    }
}

impl DestinationsConfig {
    /// Destination of `tier`.
    pub fn for_tier(&self, tier: Tier) -> &SeriesConfig {
        match tier {
            Tier::FiveMinute => &self.emeters_5min,
            Tier::FifteenMinute => &self.analytics_15min,
            Tier::OneHour => &self.analytics_1hour,
        }
    }
}

/// Sanity limits.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ThresholdConfig {
    /// Power averages above this (W) are zeroed.
    pub max_reasonable_power_w: f64,
    /// Counter decrease (Wh) treated as a meter reset.
    pub reset_threshold_wh: f64,
    /// Smallest trusted first-sample counter value (Wh).
    pub min_counter_baseline_wh: f64,
    /// Largest plausible export (Wh) per 5-minute window.
    pub export_ceiling_wh: f64,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            max_reasonable_power_w: 25_000.0,
            reset_threshold_wh: 10_000.0,
            min_counter_baseline_wh: 100.0,
            export_ceiling_wh: 5_000.0,
        }
    }
}

/// Synthetic site parameters.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SyntheticConfig {
    /// Master random seed.
    pub seed: u64,
    /// Peak solar output at noon (W).
    pub solar_peak_w: f64,
    /// Sunrise hour (UTC, inclusive).
    pub sunrise_hour: u32,
    /// Sunset hour (UTC, exclusive).
    pub sunset_hour: u32,
    /// Mean household load (W).
    pub base_load_w: f64,
    /// Sinusoidal load amplitude (W).
    pub load_amplitude_w: f64,
    /// Gaussian noise standard deviation (W).
    pub noise_std_w: f64,
    /// Battery capacity (Wh).
    pub battery_capacity_wh: f64,
    /// Battery charge/discharge power limit (W).
    pub battery_max_power_w: f64,
    /// Initial state of charge (%).
    pub initial_soc: f64,
    /// Lowest state of charge the battery discharges to (%).
    pub min_soc: f64,
    /// Starting grid-meter import counter (Wh).
    pub initial_meter_wh: f64,
    /// Minute offset at which the grid meter reboots, if any.
    pub meter_reboot_minute: Option<u32>,
    /// Mean spot price (cents/kWh).
    pub price_base_cents: f64,
    /// Daily spot price swing (cents/kWh).
    pub price_amplitude_cents: f64,
    /// Sell-back price as a share of the spot price (0.0–1.0).
    pub sell_ratio: f64,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            solar_peak_w: 6_000.0,
            sunrise_hour: 6,
            sunset_hour: 18,
            base_load_w: 900.0,
            load_amplitude_w: 600.0,
            noise_std_w: 50.0,
            battery_capacity_wh: 10_000.0,
            battery_max_power_w: 5_000.0,
            initial_soc: 50.0,
            min_soc: 10.0,
            initial_meter_wh: 1_250_000.0,
            meter_reboot_minute: None,
            price_base_cents: 8.0,
            price_amplitude_cents: 5.0,
            sell_ratio: 0.6,
        }
    }
}

/// Configuration error with field path and constraint description.
#[derive(Debug)]
pub struct ConfigError {
    /// Dotted field path (e.g., `"thresholds.reset_threshold_wh"`).
    pub field: String,
    /// Human-readable constraint description.
    pub message: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "config error: {}: {}", self.field, self.message)
    }
}

impl std::error::Error for ConfigError {}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::production()
    }
}

impl EngineConfig {
    /// Returns the production layout.
    pub fn production() -> Self {
        Self {
            sources: SourcesConfig::default(),
            destinations: DestinationsConfig::default(),
            thresholds: ThresholdConfig::default(),
            synthetic: SyntheticConfig::default(),
        }
    }

    /// Returns the test layout: every bucket suffixed with `_test`, and the
    /// battery system read from its v2 measurement.
    pub fn test() -> Self {
        let test = |s: &SeriesConfig| SeriesConfig {
            bucket: format!("{}_test", s.bucket),
            measurement: s.measurement.clone(),
        };
        let sources = SourcesConfig::default();
        let destinations = DestinationsConfig::default();
        Self {
            sources: SourcesConfig {
                checkwatt: SeriesConfig {
                    measurement: "checkwatt_v2".to_string(),
                    ..test(&sources.checkwatt)
                },
                shelly_em3: test(&sources.shelly_em3),
                spotprice: test(&sources.spotprice),
                weather: test(&sources.weather),
                temperatures: test(&sources.temperatures),
            },
            destinations: DestinationsConfig {
                emeters_5min: test(&destinations.emeters_5min),
                analytics_15min: test(&destinations.analytics_15min),
                analytics_1hour: test(&destinations.analytics_1hour),
            },
            thresholds: ThresholdConfig::default(),
            synthetic: SyntheticConfig::default(),
        }
    }

    /// Available preset names.
    pub const PRESETS: &[&str] = &["production", "test"];

    /// Loads a configuration from a named preset.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if the preset name is unknown.
    pub fn from_preset(name: &str) -> Result<Self, ConfigError> {
        match name {
            "production" => Ok(Self::production()),
            "test" => Ok(Self::test()),
            _ => Err(ConfigError {
                field: "preset".to_string(),
                message: format!(
                    "unknown preset \"{name}\", available: {}",
                    Self::PRESETS.join(", ")
                ),
            }),
        }
    }

    /// Parses a configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if the file cannot be read or the TOML is invalid.
    pub fn from_toml_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|e| ConfigError {
            field: "config".to_string(),
            message: format!("cannot read \"{}\": {e}", path.display()),
        })?;
        Self::from_toml_str(&content)
    }

    /// Parses a configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if the TOML is invalid or contains unknown fields.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        toml::from_str(s).map_err(|e| ConfigError {
            field: "toml".to_string(),
            message: e.to_string(),
        })
    }

    /// Validates all fields and returns a list of errors.
    ///
    /// Returns an empty vector if configuration is valid.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();

        let series = [
            ("sources.checkwatt", &self.sources.checkwatt),
            ("sources.shelly_em3", &self.sources.shelly_em3),
            ("sources.spotprice", &self.sources.spotprice),
            ("sources.weather", &self.sources.weather),
            ("sources.temperatures", &self.sources.temperatures),
            ("destinations.emeters_5min", &self.destinations.emeters_5min),
            ("destinations.analytics_15min", &self.destinations.analytics_15min),
            ("destinations.analytics_1hour", &self.destinations.analytics_1hour),
        ];
        for (path, s) in series {
            if s.bucket.trim().is_empty() {
                errors.push(ConfigError {
                    field: format!("{path}.bucket"),
                    message: "must not be empty".into(),
                });
            }
            if s.measurement.trim().is_empty() {
                errors.push(ConfigError {
                    field: format!("{path}.measurement"),
                    message: "must not be empty".into(),
                });
            }
        }

        let d = &self.destinations;
        if d.emeters_5min == d.analytics_15min
            || d.emeters_5min == d.analytics_1hour
            || d.analytics_15min == d.analytics_1hour
        {
            errors.push(ConfigError {
                field: "destinations".into(),
                message: "each tier needs its own bucket/measurement".into(),
            });
        }

        let t = &self.thresholds;
        for (field, value) in [
            ("thresholds.max_reasonable_power_w", t.max_reasonable_power_w),
            ("thresholds.reset_threshold_wh", t.reset_threshold_wh),
            ("thresholds.min_counter_baseline_wh", t.min_counter_baseline_wh),
            ("thresholds.export_ceiling_wh", t.export_ceiling_wh),
        ] {
            if !(value.is_finite() && value > 0.0) {
                errors.push(ConfigError {
                    field: field.into(),
                    message: "must be > 0".into(),
                });
            }
        }

        let syn = &self.synthetic;
        if syn.sunrise_hour >= syn.sunset_hour || syn.sunset_hour > 24 {
            errors.push(ConfigError {
                field: "synthetic.sunrise_hour".into(),
                message: "must be < synthetic.sunset_hour <= 24".into(),
            });
        }
        if syn.battery_capacity_wh <= 0.0 {
            errors.push(ConfigError {
                field: "synthetic.battery_capacity_wh".into(),
                message: "must be > 0".into(),
            });
        }
        if !(0.0..=100.0).contains(&syn.initial_soc) {
            errors.push(ConfigError {
                field: "synthetic.initial_soc".into(),
                message: "must be in [0, 100]".into(),
            });
        }
        if !(0.0..=syn.initial_soc.max(0.0)).contains(&syn.min_soc) {
            errors.push(ConfigError {
                field: "synthetic.min_soc".into(),
                message: "must be in [0, synthetic.initial_soc]".into(),
            });
        }
        if !(0.0..=1.0).contains(&syn.sell_ratio) {
            errors.push(ConfigError {
                field: "synthetic.sell_ratio".into(),
                message: "must be in [0.0, 1.0]".into(),
            });
        }
        // Half of the starting value seeds the returned-energy counter.
        if syn.initial_meter_wh / 2.0 < t.min_counter_baseline_wh {
            errors.push(ConfigError {
                field: "synthetic.initial_meter_wh".into(),
                message: "must be >= 2 * thresholds.min_counter_baseline_wh".into(),
            });
        }

        errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn production_preset_valid() {
        let cfg = EngineConfig::production();
        let errors = cfg.validate();
        assert!(errors.is_empty(), "production should be valid: {errors:?}");
    }

    #[test]
    fn example_file_matches_production() {
        let cfg = EngineConfig::from_toml_str(include_str!("../config/engine.example.toml"));
        assert_eq!(cfg.ok(), Some(EngineConfig::production()));
    }

    #[test]
    fn from_preset_unknown() {
        let err = EngineConfig::from_preset("staging");
        assert!(err.is_err());
        let e = err.unwrap_err();
        assert!(e.message.contains("unknown preset"));
    }

    #[test]
    fn all_presets_are_valid() {
        for name in EngineConfig::PRESETS {
            let cfg = EngineConfig::from_preset(name);
            assert!(cfg.is_ok(), "preset \"{name}\" should load");
            let errors = cfg.as_ref().map(|c| c.validate()).unwrap_or_default();
            assert!(
                errors.is_empty(),
                "preset \"{name}\" should be valid: {errors:?}"
            );
        }
    }

    #[test]
    fn test_preset_uses_test_buckets() {
        let cfg = EngineConfig::test();
        assert_eq!(cfg.sources.checkwatt.bucket, "checkwatt_full_data_test");
        assert_eq!(cfg.sources.checkwatt.measurement, "checkwatt_v2");
        assert_eq!(cfg.sources.shelly_em3.measurement, "shelly_em3");
        assert_eq!(cfg.destinations.analytics_1hour.bucket, "analytics_1hour_test");
    }

    #[test]
    fn valid_toml_parses() {
        let toml = r#"
[sources]
checkwatt = { bucket = "cw", measurement = "checkwatt" }
shelly_em3 = { bucket = "shelly", measurement = "em3" }

[destinations]
emeters_5min = { bucket = "e5", measurement = "energy" }

[thresholds]
max_reasonable_power_w = 17000.0
export_ceiling_wh = 4000.0
"#;
        let cfg = EngineConfig::from_toml_str(toml);
        assert!(cfg.is_ok(), "valid TOML should parse: {:?}", cfg.err());
        let cfg = cfg.ok();
        assert_eq!(
            cfg.as_ref().map(|c| c.sources.shelly_em3.to_string()),
            Some("shelly/em3".to_string())
        );
        assert_eq!(cfg.as_ref().map(|c| c.thresholds.export_ceiling_wh), Some(4000.0));
        // untouched fields keep their defaults
        assert_eq!(cfg.as_ref().map(|c| c.thresholds.reset_threshold_wh), Some(10_000.0));
        assert_eq!(
            cfg.as_ref().map(|c| c.sources.spotprice.bucket.clone()),
            Some("spotprice".to_string())
        );
    }

    #[test]
    fn invalid_toml_unknown_field() {
        let toml = r#"
[thresholds]
reset_threshold_wh = 10000.0
bogus_field = true
"#;
        assert!(EngineConfig::from_toml_str(toml).is_err());
    }

    #[test]
    fn series_needs_both_keys() {
        let toml = r#"
[sources]
weather = { bucket = "weather" }
"#;
        assert!(EngineConfig::from_toml_str(toml).is_err());
    }

    #[test]
    fn validation_catches_empty_bucket() {
        let mut cfg = EngineConfig::production();
        cfg.sources.spotprice.bucket = " ".to_string();
        let errors = cfg.validate();
        assert!(errors.iter().any(|e| e.field == "sources.spotprice.bucket"));
    }

    #[test]
    fn validation_catches_non_positive_threshold() {
        let mut cfg = EngineConfig::production();
        cfg.thresholds.reset_threshold_wh = 0.0;
        cfg.thresholds.export_ceiling_wh = f64::NAN;
        let errors = cfg.validate();
        assert!(errors.iter().any(|e| e.field == "thresholds.reset_threshold_wh"));
        assert!(errors.iter().any(|e| e.field == "thresholds.export_ceiling_wh"));
    }

    #[test]
    fn validation_catches_shared_destination() {
        let mut cfg = EngineConfig::production();
        cfg.destinations.analytics_1hour = cfg.destinations.analytics_15min.clone();
        let errors = cfg.validate();
        assert!(errors.iter().any(|e| e.field == "destinations"));
    }

    #[test]
    fn validation_catches_bad_synthetic_soc() {
        let mut cfg = EngineConfig::production();
        cfg.synthetic.initial_soc = 140.0;
        let errors = cfg.validate();
        assert!(errors.iter().any(|e| e.field == "synthetic.initial_soc"));
    }

    #[test]
    fn destination_per_tier() {
        let cfg = EngineConfig::production();
        assert_eq!(cfg.destinations.for_tier(Tier::FiveMinute).bucket, "emeters_5min");
        assert_eq!(cfg.destinations.for_tier(Tier::OneHour).bucket, "analytics_1hour");
    }
}
