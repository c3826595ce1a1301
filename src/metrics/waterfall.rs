//! Fixed-priority allocation of solar and battery energy, and its value.
//!
//! Solar serves consumption first, then battery charging, and whatever is left
//! is exported. Battery discharge serves the consumption solar could not cover
//! and the rest is exported. Grid import covers the remainder.

use tracing::warn;

use crate::model::SpotPrice;

use super::primitives::calculate_electricity_cost;

/// Summed energies (Wh) for one rollup window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EnergyFlows {
    pub solar_yield_sum: f64,
    pub consumption_sum: f64,
    pub battery_charge_sum: f64,
    pub battery_discharge_sum: f64,
}

/// Energy split (Wh) and monetary value (currency units) of one window.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct CostAllocation {
    pub solar_to_consumption: f64,
    pub solar_direct_value: f64,
    pub solar_to_battery: f64,
    pub solar_to_export: f64,
    pub solar_export_revenue: f64,
    pub battery_charge_from_solar_cost: f64,
    pub grid_to_battery: f64,
    pub battery_charge_from_grid_cost: f64,
    pub battery_charge_total_cost: f64,
    pub battery_to_consumption: f64,
    pub battery_discharge_value: f64,
    pub battery_to_export: f64,
    pub battery_export_revenue: f64,
    pub grid_import_cost: f64,
    pub battery_arbitrage: f64,
    pub total_electricity_cost: f64,
    pub total_solar_savings: f64,
    pub net_cost: f64,
}

impl CostAllocation {
    /// Every output under its persisted name.
    pub fn fields(&self) -> [(&'static str, f64); 18] {
        [
            ("solar_to_consumption", self.solar_to_consumption),
            ("solar_direct_value", self.solar_direct_value),
            ("solar_to_battery", self.solar_to_battery),
            ("solar_to_export", self.solar_to_export),
            ("solar_export_revenue", self.solar_export_revenue),
            ("battery_charge_from_solar_cost", self.battery_charge_from_solar_cost),
            ("grid_to_battery", self.grid_to_battery),
            ("battery_charge_from_grid_cost", self.battery_charge_from_grid_cost),
            ("battery_charge_total_cost", self.battery_charge_total_cost),
            ("battery_to_consumption", self.battery_to_consumption),
            ("battery_discharge_value", self.battery_discharge_value),
            ("battery_to_export", self.battery_to_export),
            ("battery_export_revenue", self.battery_export_revenue),
            ("grid_import_cost", self.grid_import_cost),
            ("battery_arbitrage", self.battery_arbitrage),
            ("total_electricity_cost", self.total_electricity_cost),
            ("total_solar_savings", self.total_solar_savings),
            ("net_cost", self.net_cost),
        ]
    }
}

/// Runs the allocation waterfall.
///
/// Returns `None` when either price is missing: a cost computed against a
/// guessed price would be wrong, so no cost fields are produced at all.
///
/// Inputs are used as given. A negative sum (consumption can dip below zero
/// when the counter span is shorter than the battery window) flows through
/// the steps unchanged and is logged.
///
/// # Arguments
///
/// * `flows` - Summed energies of the window, in Wh
/// * `price` - Buy and sell price of the hour, in cents per kWh
///
/// # Examples
///
/// ```
/// use meter_rollup::metrics::waterfall::{allocate, EnergyFlows};
/// use meter_rollup::model::SpotPrice;
///
/// let flows = EnergyFlows {
///     solar_yield_sum: 600.0,
///     consumption_sum: 150.0,
///     battery_charge_sum: 0.0,
///     battery_discharge_sum: 0.0,
/// };
/// let cost = allocate(&flows, &SpotPrice::new(5.5, 3.0)).unwrap();
/// assert_eq!(cost.solar_to_consumption, 150.0);
/// assert_eq!(cost.solar_to_export, 450.0);
/// ```
pub fn allocate(flows: &EnergyFlows, price: &SpotPrice) -> Option<CostAllocation> {
    let price_total = price.price_total?;
    let price_sell = price.price_sell?;
    let buy = |wh: f64| calculate_electricity_cost(wh / 1000.0, price_total);
    let sell = |wh: f64| calculate_electricity_cost(wh / 1000.0, price_sell);

    let EnergyFlows {
        solar_yield_sum: solar,
        consumption_sum: consumption,
        battery_charge_sum: charge,
        battery_discharge_sum: discharge,
    } = *flows;
    for (name, value) in [
        ("solar_yield_sum", solar),
        ("consumption_sum", consumption),
        ("battery_charge_sum", charge),
        ("battery_discharge_sum", discharge),
    ] {
        if value < 0.0 {
            warn!(field = name, value, "negative energy in cost allocation");
        }
    }

    let solar_to_consumption = solar.min(consumption);
    let solar_to_battery = (solar - solar_to_consumption).min(charge);
    let solar_to_export = solar - solar_to_consumption - solar_to_battery;

    let battery_charge_from_solar_cost = sell(solar_to_battery);
    let grid_to_battery = charge - solar_to_battery;
    let battery_charge_from_grid_cost = buy(grid_to_battery);
    let battery_charge_total_cost = battery_charge_from_solar_cost + battery_charge_from_grid_cost;

    let remaining = consumption - solar_to_consumption;
    let battery_to_consumption = discharge.min(remaining);
    let battery_to_export = discharge - battery_to_consumption;
    let battery_discharge_value = buy(battery_to_consumption);
    let battery_export_revenue = sell(battery_to_export);

    let grid_import_cost = buy(remaining - battery_to_consumption);
    let battery_arbitrage =
        battery_discharge_value + battery_export_revenue - battery_charge_total_cost;

    let solar_direct_value = buy(solar_to_consumption);
    let solar_export_revenue = sell(solar_to_export);
    let total_solar_savings = solar_direct_value + solar_export_revenue;

    Some(CostAllocation {
        solar_to_consumption,
        solar_direct_value,
        solar_to_battery,
        solar_to_export,
        solar_export_revenue,
        battery_charge_from_solar_cost,
        grid_to_battery,
        battery_charge_from_grid_cost,
        battery_charge_total_cost,
        battery_to_consumption,
        battery_discharge_value,
        battery_to_export,
        battery_export_revenue,
        grid_import_cost,
        battery_arbitrage,
        total_electricity_cost: grid_import_cost,
        total_solar_savings,
        net_cost: grid_import_cost - total_solar_savings - battery_arbitrage,
    })
}
