//! Windowed aggregation and cost allocation for home energy meters.
//!
//! Raw battery-system and grid-meter telemetry is aggregated into 5-minute
//! energy records, which roll up into 15-minute and 1-hour analytics with a
//! spot-price cost waterfall.

pub mod aggregation;
pub mod backfill;
pub mod config;
pub mod error;
pub mod io;
pub mod metrics;
pub mod model;
pub mod reconcile;
pub mod store;
pub mod synthetic;
pub mod window;
