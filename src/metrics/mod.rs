//! Metrics Module
//! 
//! Prometheus counters for outbound connection attempts.

pub mod collector;

pub use collector::{ConnectorMetrics, ConnectorStats};
