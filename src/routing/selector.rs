//! Proxy Selection
//!
//! The hook the connector consults immediately before opening a TCP
//! connection.

use tracing::{debug, error};

use crate::context::ProxyContext;
use crate::protocol::TargetAddr;
use super::Proxy;

/// Decides which route(s) an outbound connection should take
pub trait ProxyResolver: Send + Sync {
    /// Candidate routes for `target:port`, tried in order.
    ///
    /// Implementations must return at least one candidate; `Proxy::Direct`
    /// is the universal fallback.
    fn select(&self, target: &TargetAddr, port: u16) -> Vec<Proxy>;

    /// Observability hook called after a candidate failed to connect.
    ///
    /// Must not fail the caller. The connector discards any panic raised here.
    fn connect_failed(&self, target: &TargetAddr, port: u16, proxy: &Proxy, cause: &anyhow::Error);
}

/// Resolver that answers with whatever [`ProxyContext`] holds for the
/// calling unit of work, or a direct connection when nothing is bound.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScopedProxyResolver;

impl ScopedProxyResolver {
    pub fn new() -> Self {
        Self
    }
}

impl ProxyResolver for ScopedProxyResolver {
    fn select(&self, target: &TargetAddr, port: u16) -> Vec<Proxy> {
        let proxy = ProxyContext::current().unwrap_or(Proxy::Direct);
        debug!("Selected {} for {}:{}", proxy, target.host_for_authority(), port);
        vec![proxy]
    }

    fn connect_failed(&self, target: &TargetAddr, port: u16, proxy: &Proxy, cause: &anyhow::Error) {
        error!(
            "Failed to connect to {}:{} via {}: {:#}",
            target.host_for_authority(),
            port,
            proxy,
            cause
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::ProxyEndpoint;

    #[test]
    fn test_select_direct_without_scope() {
        let resolver = ScopedProxyResolver::new();
        let target = TargetAddr::Domain("db1".into());
        assert_eq!(resolver.select(&target, 5432), vec![Proxy::Direct]);
    }

    #[test]
    fn test_select_scoped_proxy() {
        let resolver = ScopedProxyResolver::new();
        let target = TargetAddr::Domain("db1".into());
        let proxy: Proxy = ProxyEndpoint::socks5("localhost", 1080).unwrap().into();

        let selected = ProxyContext::sync_scope(proxy.clone(), || resolver.select(&target, 5432));
        assert_eq!(selected, vec![proxy]);
        assert_eq!(resolver.select(&target, 5432), vec![Proxy::Direct]);
    }

    #[test]
    fn test_connect_failed_does_not_panic() {
        let resolver = ScopedProxyResolver::new();
        let cause = anyhow::anyhow!("connection refused");
        resolver.connect_failed(&TargetAddr::Domain("db1".into()), 5432, &Proxy::Direct, &cause);
    }
}
