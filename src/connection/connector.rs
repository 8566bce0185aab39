//! Proxy-aware Connector
//!
//! The single path through which outbound TCP connections are opened.
//! Before dialing it asks its [`ProxyResolver`] which route(s) to take.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;
use anyhow::{anyhow, Context};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::config::ConnectorConfig;
use crate::metrics::ConnectorMetrics;
use crate::protocol::{parse_host_port, TargetAddr};
use crate::routing::{registry, Proxy, ProxyProtocol, ProxyResolver};
use crate::Result;
use super::tunnel;

/// Opens TCP connections along the routes chosen by a resolver
#[derive(Clone)]
pub struct ProxyConnector {
    resolver: Arc<dyn ProxyResolver>,
    config: ConnectorConfig,
    metrics: Option<Arc<ConnectorMetrics>>,
}

impl ProxyConnector {
    /// Create a connector that consults `resolver`
    pub fn new(resolver: Arc<dyn ProxyResolver>, config: ConnectorConfig) -> Self {
        Self {
            resolver,
            config,
            metrics: None,
        }
    }

    /// Create a connector backed by the process-wide resolver
    pub fn from_installed(config: ConnectorConfig) -> Result<Self> {
        let resolver = registry::installed()
            .ok_or_else(|| anyhow!("No proxy resolver installed; call registry::install first"))?;
        Ok(Self::new(resolver, config))
    }

    /// Record attempts in `metrics`
    pub fn with_metrics(mut self, metrics: Arc<ConnectorMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn config(&self) -> &ConnectorConfig {
        &self.config
    }

    /// Connect to `host:port`
    pub async fn connect_str(&self, authority: &str) -> Result<TcpStream> {
        let (target, port) = parse_host_port(authority)?;
        self.connect(&target, port).await
    }

    /// Connect to `target:port`.
    ///
    /// Candidates from the resolver are tried in order. Each failure is
    /// reported through [`ProxyResolver::connect_failed`] before moving on.
    /// When every candidate fails the last error is returned; there is no
    /// retry and no fallback to a direct connection.
    pub async fn connect(&self, target: &TargetAddr, port: u16) -> Result<TcpStream> {
        let mut candidates = self.resolver.select(target, port);
        if candidates.is_empty() {
            warn!(
                "Resolver returned no candidates for {}:{}, connecting directly",
                target.host_for_authority(),
                port
            );
            candidates.push(Proxy::Direct);
        }

        let total = candidates.len();
        let mut last_error = None;

        for (i, candidate) in candidates.into_iter().enumerate() {
            debug!(
                "Attempt {}/{} to {}:{} via {}",
                i + 1,
                total,
                target.host_for_authority(),
                port,
                candidate
            );

            let route = candidate.route_kind();
            let started = Instant::now();
            if let Some(metrics) = &self.metrics {
                metrics.record_attempt(route);
            }

            match self.connect_via(&candidate, target, port).await {
                Ok(stream) => {
                    if let Some(metrics) = &self.metrics {
                        metrics.record_success(route, started.elapsed());
                    }
                    info!(
                        "Connected to {}:{} via {}",
                        target.host_for_authority(),
                        port,
                        candidate
                    );
                    return Ok(stream);
                }
                Err(e) => {
                    if let Some(metrics) = &self.metrics {
                        metrics.record_failure(route, started.elapsed());
                    }
                    self.report_failure(target, port, &candidate, &e);
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| anyhow!("No connection candidates were attempted")))
    }

    /// Open the connection for one candidate route
    async fn connect_via(&self, proxy: &Proxy, target: &TargetAddr, port: u16) -> Result<TcpStream> {
        let endpoint = match proxy {
            Proxy::Direct => {
                return tunnel::dial(target, port, self.config.connect_timeout).await;
            }
            Proxy::Via(endpoint) => endpoint,
        };

        let stream = tunnel::dial(endpoint.host(), endpoint.port(), self.config.connect_timeout)
            .await
            .with_context(|| format!("Unable to reach proxy {}", endpoint))?;

        let negotiation = async {
            match endpoint.protocol() {
                ProxyProtocol::Socks5 => tunnel::socks5_tunnel(stream, endpoint, target, port).await,
                ProxyProtocol::Http => tunnel::http_tunnel(stream, endpoint, target, port).await,
            }
        };

        timeout(self.config.handshake_timeout, negotiation)
            .await
            .map_err(|_| {
                anyhow!(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    format!(
                        "proxy {} did not complete negotiation within {:?}",
                        endpoint, self.config.handshake_timeout
                    ),
                ))
            })?
    }

    /// Call the resolver's failure hook, discarding any panic it raises
    fn report_failure(&self, target: &TargetAddr, port: u16, proxy: &Proxy, cause: &anyhow::Error) {
        let hook = AssertUnwindSafe(|| self.resolver.connect_failed(target, port, proxy, cause));

        if panic::catch_unwind(hook).is_err() {
            warn!("Proxy resolver failure hook panicked; ignoring");
            if let Some(metrics) = &self.metrics {
                metrics.record_hook_panic();
            }
        }
    }
}

impl std::fmt::Debug for ProxyConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyConnector")
            .field("config", &self.config)
            .field("metrics", &self.metrics.is_some())
            .finish()
    }
}
