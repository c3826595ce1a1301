//! Pure numeric building blocks used by every aggregation tier.

pub mod primitives;
pub mod waterfall;

pub use waterfall::{CostAllocation, EnergyFlows, allocate};
