//! ProxyScope Library
//! 
//! Per-call proxy selection for outbound TCP connections.
//! 
//! A caller binds a proxy for one logical unit of work with
//! [`ProxyContext`]; any code in that unit that opens connections through a
//! [`ProxyConnector`] is routed through it, while concurrently running units
//! of work keep their own selection.

pub mod config;
pub mod connection;
pub mod context;
pub mod metrics;
pub mod probe;
pub mod protocol;
pub mod routing;

pub use config::Config;
pub use connection::ProxyConnector;
pub use context::{ProxyContext, ProxyScope};
pub use routing::{Proxy, ProxyEndpoint, ProxyResolver, ScopedProxyResolver};

/// Common error type for the library
pub type Result<T> = anyhow::Result<T>;
