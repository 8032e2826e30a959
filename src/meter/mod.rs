//! Consumption metering.

pub mod consumption;
