//! Database Reachability Probe
//!
//! Stands in for a database client: it opens its session through the
//! shared [`ProxyConnector`] and knows nothing about proxies. The proxy is
//! chosen by the caller with [`do_via_proxy`].

use std::fmt;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use anyhow::{bail, Context};
use tracing::{debug, info};

use crate::connection::ProxyConnector;
use crate::context::ProxyContext;
use crate::protocol::TargetAddr;
use crate::routing::Proxy;
use crate::Result;

pub const POSTGRESQL_DEFAULT_PORT: u16 = 5432;

/// A named database endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseTarget {
    pub name: String,
    pub host: TargetAddr,
    pub port: u16,
}

impl DatabaseTarget {
    pub fn new(name: &str, host: &str, port: u16) -> Result<Self> {
        if port == 0 {
            bail!("Database '{}' has invalid port 0", name);
        }

        Ok(Self {
            name: name.to_string(),
            host: TargetAddr::parse_host(host)
                .with_context(|| format!("Database '{}' has invalid host", name))?,
            port,
        })
    }

    /// PostgreSQL on its default port
    pub fn postgres(host: &str) -> Result<Self> {
        Self::new(host, host, POSTGRESQL_DEFAULT_PORT)
    }
}

impl fmt::Display for DatabaseTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host.host_for_authority(), self.port)
    }
}

/// A database and the proxy it must be reached through
#[derive(Debug, Clone)]
pub struct DatabaseRoute {
    pub target: DatabaseTarget,
    pub proxy: Proxy,
}

/// Outcome of a successful probe
#[derive(Debug, Clone)]
pub struct ProbeReport {
    pub name: String,
    pub target: String,
    /// The proxy that was selected while the probe ran
    pub proxy: Proxy,
    pub local_addr: SocketAddr,
    pub peer_addr: SocketAddr,
    pub elapsed: Duration,
}

impl fmt::Display for ProbeReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Connected to {} at {} via {} (local {}, peer {}) in {:?}",
            self.name, self.target, self.proxy, self.local_addr, self.peer_addr, self.elapsed
        )
    }
}

/// Opens a session to a database through the connector
#[derive(Debug, Clone)]
pub struct DatabaseProbe {
    connector: Arc<ProxyConnector>,
}

impl DatabaseProbe {
    pub fn new(connector: Arc<ProxyConnector>) -> Self {
        Self { connector }
    }

    /// Establish a TCP session with `target` and report its addresses
    pub async fn probe(&self, target: &DatabaseTarget) -> Result<ProbeReport> {
        debug!("Probing database {} at {}", target.name, target);
        let started = Instant::now();

        let stream = self
            .connector
            .connect(&target.host, target.port)
            .await
            .with_context(|| format!("Failed to connect to database {} at {}", target.name, target))?;

        let report = ProbeReport {
            name: target.name.clone(),
            target: target.to_string(),
            proxy: ProxyContext::current().unwrap_or(Proxy::Direct),
            local_addr: stream.local_addr()?,
            peer_addr: stream.peer_addr()?,
            elapsed: started.elapsed(),
        };

        info!("{}", report);
        Ok(report)
    }
}

/// Run `work` with every connection it opens routed through `proxy`
pub async fn do_via_proxy<F, T>(proxy: impl Into<Proxy>, work: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    ProxyContext::scope(proxy, work).await
}
