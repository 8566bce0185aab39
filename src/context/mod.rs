//! Proxy Context Module
//! 
//! Scoped, per-unit-of-work selection of the proxy that outbound
//! connections should use.

pub mod scope;

pub use scope::{ProxyContext, ProxyScope, ScopeId};
