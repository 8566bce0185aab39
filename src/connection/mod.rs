//! Connection Module
//! 
//! Outbound connection establishment through resolver-selected routes.

pub mod connector;
pub mod tunnel;

pub use connector::ProxyConnector;
