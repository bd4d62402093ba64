pub mod controller;
pub mod metrics;
pub mod telemetry;
