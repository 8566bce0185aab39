//! Target Addresses
//! 
//! The host and port model shared by the connector, its resolver and the
//! proxy tunnels.

pub mod types;

pub use types::*;
