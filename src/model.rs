//! Raw telemetry samples, side data, and the per-window metric records.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::metrics::waterfall::CostAllocation;

/// Field values of one store row group, keyed by field name.
pub type FieldMap = BTreeMap<String, f64>;

/// A record that is persisted as one point of named numeric fields.
pub trait MetricRecord {
    /// Every present field, in persisted order. Absent fields are omitted.
    fn fields(&self) -> Vec<(String, f64)>;

    /// Names of fields holding NaN or infinite values.
    fn non_finite_fields(&self) -> Vec<String> {
        self.fields()
            .into_iter()
            .filter(|(_, v)| !v.is_finite())
            .map(|(k, _)| k)
            .collect()
    }
}

/// Collects present fields in order.
#[derive(Default)]
struct FieldList(Vec<(String, f64)>);

impl FieldList {
    fn put(&mut self, name: &str, value: Option<f64>) {
        if let Some(v) = value {
            self.0.push((name.to_owned(), v));
        }
    }
}

/// One reading from the battery/solar system (CheckWatt).
///
/// Power fields are instantaneous watts; any of them may be missing.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BatterySystemSample {
    pub timestamp: DateTime<Utc>,
    pub solar_yield: Option<f64>,
    pub battery_charge: Option<f64>,
    pub battery_discharge: Option<f64>,
    /// State of charge (%).
    pub battery_soc: Option<f64>,
    pub energy_import: Option<f64>,
    pub energy_export: Option<f64>,
}

impl BatterySystemSample {
    const SOLAR_YIELD: &'static str = "SolarYield";
    const BATTERY_CHARGE: &'static str = "BatteryCharge";
    const BATTERY_DISCHARGE: &'static str = "BatteryDischarge";
    const BATTERY_SOC: &'static str = "Battery_SoC";
    const ENERGY_IMPORT: &'static str = "EnergyImport";
    const ENERGY_EXPORT: &'static str = "EnergyExport";

    /// Builds a sample from the fields stored under one timestamp.
    pub fn from_fields(timestamp: DateTime<Utc>, fields: &FieldMap) -> Self {
        let get = |k: &str| fields.get(k).copied();
        Self {
            timestamp,
            solar_yield: get(Self::SOLAR_YIELD),
            battery_charge: get(Self::BATTERY_CHARGE),
            battery_discharge: get(Self::BATTERY_DISCHARGE),
            battery_soc: get(Self::BATTERY_SOC),
            energy_import: get(Self::ENERGY_IMPORT),
            energy_export: get(Self::ENERGY_EXPORT),
        }
    }

    /// Present fields under their stored names.
    pub fn to_fields(&self) -> FieldMap {
        [
            (Self::SOLAR_YIELD, self.solar_yield),
            (Self::BATTERY_CHARGE, self.battery_charge),
            (Self::BATTERY_DISCHARGE, self.battery_discharge),
            (Self::BATTERY_SOC, self.battery_soc),
            (Self::ENERGY_IMPORT, self.energy_import),
            (Self::ENERGY_EXPORT, self.energy_export),
        ]
        .into_iter()
        .filter_map(|(k, v)| v.map(|v| (k.to_owned(), v)))
        .collect()
    }
}

/// One reading from the three-phase grid meter (Shelly EM3).
///
/// `total_energy` and `total_energy_returned` only ever grow unless the
/// device reboots; `net_total_energy` legitimately falls while exporting.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct GridMeterSample {
    pub timestamp: DateTime<Utc>,
    /// Instantaneous total power (W), positive = import.
    pub total_power: f64,
    /// Cumulative imported energy (Wh).
    pub total_energy: f64,
    /// Cumulative returned (exported) energy (Wh).
    pub total_energy_returned: f64,
    /// Cumulative net energy (Wh).
    pub net_total_energy: f64,
    pub phase1_voltage: Option<f64>,
    pub phase2_voltage: Option<f64>,
    pub phase3_voltage: Option<f64>,
    pub phase1_current: Option<f64>,
    pub phase2_current: Option<f64>,
    pub phase3_current: Option<f64>,
    pub phase1_pf: Option<f64>,
    pub phase2_pf: Option<f64>,
    pub phase3_pf: Option<f64>,
}

impl GridMeterSample {
    const PHASE_FIELDS: [&'static str; 9] = [
        "phase1_voltage",
        "phase2_voltage",
        "phase3_voltage",
        "phase1_current",
        "phase2_current",
        "phase3_current",
        "phase1_pf",
        "phase2_pf",
        "phase3_pf",
    ];

    /// Builds a sample from stored fields.
    ///
    /// Returns `None` when any of the power or counter fields is missing:
    /// a counter sample without its counters cannot be reconciled.
    pub fn from_fields(timestamp: DateTime<Utc>, fields: &FieldMap) -> Option<Self> {
        let get = |k: &str| fields.get(k).copied();
        let [v1, v2, v3, c1, c2, c3, pf1, pf2, pf3] = Self::PHASE_FIELDS.map(get);
        Some(Self {
            timestamp,
            total_power: get("total_power")?,
            total_energy: get("total_energy")?,
            total_energy_returned: get("total_energy_returned")?,
            net_total_energy: get("net_total_energy")?,
            phase1_voltage: v1,
            phase2_voltage: v2,
            phase3_voltage: v3,
            phase1_current: c1,
            phase2_current: c2,
            phase3_current: c3,
            phase1_pf: pf1,
            phase2_pf: pf2,
            phase3_pf: pf3,
        })
    }

    /// Present fields under their stored names.
    pub fn to_fields(&self) -> FieldMap {
        let mut out = FieldMap::new();
        out.insert("total_power".into(), self.total_power);
        out.insert("total_energy".into(), self.total_energy);
        out.insert("total_energy_returned".into(), self.total_energy_returned);
        out.insert("net_total_energy".into(), self.net_total_energy);
        let phases = [
            self.phase1_voltage,
            self.phase2_voltage,
            self.phase3_voltage,
            self.phase1_current,
            self.phase2_current,
            self.phase3_current,
            self.phase1_pf,
            self.phase2_pf,
            self.phase3_pf,
        ];
        for (name, value) in Self::PHASE_FIELDS.iter().zip(phases) {
            if let Some(v) = value {
                out.insert((*name).to_owned(), v);
            }
        }
        out
    }

    /// Mean voltage across phases, `None` unless all three read above 0 V.
    pub fn mean_voltage(&self) -> Option<f64> {
        match (self.phase1_voltage, self.phase2_voltage, self.phase3_voltage) {
            (Some(a), Some(b), Some(c)) if a > 0.0 && b > 0.0 && c > 0.0 => {
                Some((a + b + c) / 3.0)
            }
            _ => None,
        }
    }

    /// Mean current across phases, `None` if any phase is missing.
    pub fn mean_current(&self) -> Option<f64> {
        mean3(self.phase1_current, self.phase2_current, self.phase3_current)
    }

    /// Mean power factor across phases, `None` if any phase is missing.
    pub fn mean_power_factor(&self) -> Option<f64> {
        mean3(self.phase1_pf, self.phase2_pf, self.phase3_pf)
    }
}

fn mean3(a: Option<f64>, b: Option<f64>, c: Option<f64>) -> Option<f64> {
    Some((a? + b? + c?) / 3.0)
}

/// Hourly electricity price, in cents per kWh.
#[derive(Debug, Clone, Copy, PartialEq, Default, Deserialize)]
pub struct SpotPrice {
    /// Buy price including taxes and transfer.
    pub price_total: Option<f64>,
    /// Sell-back price.
    pub price_sell: Option<f64>,
}

impl SpotPrice {
    pub fn new(price_total: f64, price_sell: f64) -> Self {
        Self {
            price_total: Some(price_total),
            price_sell: Some(price_sell),
        }
    }

    pub fn from_fields(fields: &FieldMap) -> Self {
        Self {
            price_total: fields.get("price_total").copied(),
            price_sell: fields.get("price_sell").copied(),
        }
    }
}

/// Weather means over a window.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct WeatherObservation {
    pub air_temperature: Option<f64>,
    pub cloud_cover: Option<f64>,
    pub solar_radiation: Option<f64>,
    pub wind_speed: Option<f64>,
}

impl WeatherObservation {
    pub fn from_fields(fields: &FieldMap) -> Self {
        let get = |k: &str| fields.get(k).copied();
        Self {
            air_temperature: get("air_temperature"),
            cloud_cover: get("cloud_cover"),
            solar_radiation: get("solar_radiation"),
            wind_speed: get("wind_speed"),
        }
    }
}

/// Metrics for one 5-minute window, persisted to `emeters_5min`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct EnergyMetrics {
    // battery/solar system stream
    pub solar_yield_avg: Option<f64>,
    pub battery_charge_avg: Option<f64>,
    pub battery_discharge_avg: Option<f64>,
    pub energy_import_avg: Option<f64>,
    pub energy_export_avg: Option<f64>,
    pub cw_emeter_avg: Option<f64>,
    pub solar_yield_sum: Option<f64>,
    pub battery_charge_sum: Option<f64>,
    pub battery_discharge_sum: Option<f64>,
    pub energy_import_sum: Option<f64>,
    pub energy_export_sum: Option<f64>,
    pub battery_soc: Option<f64>,
    // grid meter stream
    pub emeter_avg: Option<f64>,
    pub emeter_sum: Option<f64>,
    pub ts_diff: Option<f64>,
    pub energy_returned_avg: Option<f64>,
    pub energy_returned_sum: Option<f64>,
    pub grid_voltage_avg: Option<f64>,
    pub grid_current_avg: Option<f64>,
    pub grid_power_factor_avg: Option<f64>,
    // both streams
    pub consumption_avg: Option<f64>,
    pub consumption_sum: Option<f64>,
}

impl EnergyMetrics {
    /// Rebuilds a record from persisted fields.
    pub fn from_fields(fields: &FieldMap) -> Self {
        let get = |k: &str| fields.get(k).copied();
        Self {
            solar_yield_avg: get("solar_yield_avg"),
            battery_charge_avg: get("battery_charge_avg"),
            battery_discharge_avg: get("battery_discharge_avg"),
            energy_import_avg: get("energy_import_avg"),
            energy_export_avg: get("energy_export_avg"),
            cw_emeter_avg: get("cw_emeter_avg"),
            solar_yield_sum: get("solar_yield_sum"),
            battery_charge_sum: get("battery_charge_sum"),
            battery_discharge_sum: get("battery_discharge_sum"),
            energy_import_sum: get("energy_import_sum"),
            energy_export_sum: get("energy_export_sum"),
            battery_soc: get("battery_soc"),
            emeter_avg: get("emeter_avg"),
            emeter_sum: get("emeter_sum"),
            ts_diff: get("ts_diff"),
            energy_returned_avg: get("energy_returned_avg"),
            energy_returned_sum: get("energy_returned_sum"),
            grid_voltage_avg: get("grid_voltage_avg"),
            grid_current_avg: get("grid_current_avg"),
            grid_power_factor_avg: get("grid_power_factor_avg"),
            consumption_avg: get("consumption_avg"),
            consumption_sum: get("consumption_sum"),
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

impl MetricRecord for EnergyMetrics {
    fn fields(&self) -> Vec<(String, f64)> {
        let mut f = FieldList::default();
        f.put("solar_yield_avg", self.solar_yield_avg);
        f.put("battery_charge_avg", self.battery_charge_avg);
        f.put("battery_discharge_avg", self.battery_discharge_avg);
        f.put("energy_import_avg", self.energy_import_avg);
        f.put("energy_export_avg", self.energy_export_avg);
        f.put("cw_emeter_avg", self.cw_emeter_avg);
        f.put("solar_yield_sum", self.solar_yield_sum);
        f.put("battery_charge_sum", self.battery_charge_sum);
        f.put("battery_discharge_sum", self.battery_discharge_sum);
        f.put("energy_import_sum", self.energy_import_sum);
        f.put("energy_export_sum", self.energy_export_sum);
        f.put("battery_soc", self.battery_soc);
        f.put("emeter_avg", self.emeter_avg);
        f.put("emeter_sum", self.emeter_sum);
        f.put("ts_diff", self.ts_diff);
        f.put("energy_returned_avg", self.energy_returned_avg);
        f.put("energy_returned_sum", self.energy_returned_sum);
        f.put("grid_voltage_avg", self.grid_voltage_avg);
        f.put("grid_current_avg", self.grid_current_avg);
        f.put("grid_power_factor_avg", self.grid_power_factor_avg);
        f.put("consumption_avg", self.consumption_avg);
        f.put("consumption_sum", self.consumption_sum);
        f.0
    }
}

/// Metrics for one 15-minute or 1-hour window.
///
/// Carries every `*_avg` and `*_sum` field of [`EnergyMetrics`] under the same
/// name, plus peaks, prices, the cost split and side data.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AnalyticsMetrics {
    pub solar_yield_avg: Option<f64>,
    pub consumption_avg: Option<f64>,
    pub emeter_avg: Option<f64>,
    pub battery_charge_avg: Option<f64>,
    pub battery_discharge_avg: Option<f64>,
    pub energy_import_avg: Option<f64>,
    pub energy_export_avg: Option<f64>,
    pub cw_emeter_avg: Option<f64>,
    pub energy_returned_avg: Option<f64>,
    pub grid_voltage_avg: Option<f64>,
    pub grid_current_avg: Option<f64>,
    pub grid_power_factor_avg: Option<f64>,
    pub solar_yield_sum: Option<f64>,
    pub consumption_sum: Option<f64>,
    pub emeter_sum: Option<f64>,
    pub battery_charge_sum: Option<f64>,
    pub battery_discharge_sum: Option<f64>,
    pub energy_import_sum: Option<f64>,
    pub energy_export_sum: Option<f64>,
    pub energy_returned_sum: Option<f64>,
    /// Seconds of counter span behind `emeter_sum`.
    pub ts_diff: Option<f64>,
    pub battery_soc: Option<f64>,
    /// Peak values, 1-hour tier only.
    pub consumption_max: Option<f64>,
    pub solar_yield_max: Option<f64>,
    pub grid_power_max: Option<f64>,
    pub price_total: Option<f64>,
    pub price_sell: Option<f64>,
    pub cost: Option<CostAllocation>,
    pub solar_direct_sum: Option<f64>,
    pub self_consumption_ratio: Option<f64>,
    pub weather: WeatherObservation,
    /// Indoor/outdoor temperature means, copied through by name.
    pub temperatures: BTreeMap<String, f64>,
}

impl MetricRecord for AnalyticsMetrics {
    fn fields(&self) -> Vec<(String, f64)> {
        let mut f = FieldList::default();
        f.put("solar_yield_avg", self.solar_yield_avg);
        f.put("consumption_avg", self.consumption_avg);
        f.put("emeter_avg", self.emeter_avg);
        f.put("battery_charge_avg", self.battery_charge_avg);
        f.put("battery_discharge_avg", self.battery_discharge_avg);
        f.put("energy_import_avg", self.energy_import_avg);
        f.put("energy_export_avg", self.energy_export_avg);
        f.put("cw_emeter_avg", self.cw_emeter_avg);
        f.put("energy_returned_avg", self.energy_returned_avg);
        f.put("grid_voltage_avg", self.grid_voltage_avg);
        f.put("grid_current_avg", self.grid_current_avg);
        f.put("grid_power_factor_avg", self.grid_power_factor_avg);
        f.put("solar_yield_sum", self.solar_yield_sum);
        f.put("consumption_sum", self.consumption_sum);
        f.put("emeter_sum", self.emeter_sum);
        f.put("battery_charge_sum", self.battery_charge_sum);
        f.put("battery_discharge_sum", self.battery_discharge_sum);
        f.put("energy_import_sum", self.energy_import_sum);
        f.put("energy_export_sum", self.energy_export_sum);
        f.put("energy_returned_sum", self.energy_returned_sum);
        f.put("ts_diff", self.ts_diff);
        f.put("battery_soc", self.battery_soc);
        f.put("consumption_max", self.consumption_max);
        f.put("solar_yield_max", self.solar_yield_max);
        f.put("grid_power_max", self.grid_power_max);
        f.put("price_total", self.price_total);
        f.put("price_sell", self.price_sell);
        if let Some(cost) = &self.cost {
            for (name, value) in cost.fields() {
                f.put(name, Some(value));
            }
        }
        f.put("solar_direct_sum", self.solar_direct_sum);
        f.put("self_consumption_ratio", self.self_consumption_ratio);
        f.put("air_temperature", self.weather.air_temperature);
        f.put("cloud_cover", self.weather.cloud_cover);
        f.put("solar_radiation", self.weather.solar_radiation);
        f.put("wind_speed", self.weather.wind_speed);
        for (name, value) in &self.temperatures {
            f.put(name, Some(*value));
        }
        f.0
    }
}
