//! Routing Module
//! 
//! Proxy endpoint types, the resolver hook consulted before each outbound
//! connection, and its process-wide registration.

pub mod registry;
pub mod selector;
pub mod types;

pub use selector::{ProxyResolver, ScopedProxyResolver};
pub use types::*;
