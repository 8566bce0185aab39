//! Configuration Module
//! 
//! Connector timeouts, logging, and the named proxies and databases used by
//! the probe driver. Loaded from TOML with environment and CLI overrides.

pub mod manager;
pub mod types;

pub use manager::ConfigManager;
pub use types::*;
