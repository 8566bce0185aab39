//! Routing Types

use std::fmt;
use std::sync::Arc;
use anyhow::{anyhow, bail, Context};
use tokio::net::lookup_host;

use crate::protocol::TargetAddr;
use crate::Result;

/// Proxy protocol type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProxyProtocol {
    Socks5,
    Http,
}

impl ProxyProtocol {
    /// Lower-case name used in configuration and logs
    pub fn as_str(&self) -> &'static str {
        match self {
            ProxyProtocol::Socks5 => "socks5",
            ProxyProtocol::Http => "http",
        }
    }
}

impl std::str::FromStr for ProxyProtocol {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "socks" | "socks5" => Ok(ProxyProtocol::Socks5),
            "http" => Ok(ProxyProtocol::Http),
            other => Err(anyhow!("Unknown proxy protocol '{}', expected 'socks5' or 'http'", other)),
        }
    }
}

/// Proxy authentication
#[derive(Clone, PartialEq, Eq)]
pub struct ProxyAuth {
    pub username: String,
    pub password: String,
}

impl ProxyAuth {
    /// Credentials usable by both SOCKS5 (RFC 1929) and HTTP Basic
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Result<Self> {
        let username = username.into();
        let password = password.into();

        if username.is_empty() || username.len() > 255 {
            bail!("Proxy username must be 1-255 bytes, got {}", username.len());
        }
        if password.is_empty() || password.len() > 255 {
            bail!("Proxy password must be 1-255 bytes, got {}", password.len());
        }

        Ok(Self { username, password })
    }
}

impl fmt::Debug for ProxyAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyAuth")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// An upstream proxy a connection may be routed through.
///
/// Immutable once built; share it behind an `Arc` (see [`Proxy::Via`]).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyEndpoint {
    protocol: ProxyProtocol,
    host: TargetAddr,
    port: u16,
    auth: Option<ProxyAuth>,
}

impl ProxyEndpoint {
    /// Build an endpoint, rejecting malformed hosts and port 0 up front
    pub fn new(protocol: ProxyProtocol, host: &str, port: u16) -> Result<Self> {
        if port == 0 {
            bail!("Proxy port cannot be 0 ({}://{})", protocol.as_str(), host);
        }

        let host = TargetAddr::parse_host(host)
            .with_context(|| format!("Invalid {} proxy host '{}'", protocol.as_str(), host))?;

        Ok(Self {
            protocol,
            host,
            port,
            auth: None,
        })
    }

    /// SOCKS5 proxy at `host:port`
    pub fn socks5(host: &str, port: u16) -> Result<Self> {
        Self::new(ProxyProtocol::Socks5, host, port)
    }

    /// HTTP CONNECT proxy at `host:port`
    pub fn http(host: &str, port: u16) -> Result<Self> {
        Self::new(ProxyProtocol::Http, host, port)
    }

    /// Attach credentials
    pub fn with_auth(mut self, auth: ProxyAuth) -> Self {
        self.auth = Some(auth);
        self
    }

    /// Resolve the proxy host now, so an unresolvable proxy is reported to
    /// the caller that configured it instead of at first use.
    pub async fn resolved(self) -> Result<Self> {
        if self.host.ip().is_some() {
            return Ok(self);
        }

        let authority = self.authority();
        let addr = lookup_host(authority.as_str())
            .await
            .with_context(|| format!("Unable to resolve proxy host {}", authority))?
            .next()
            .ok_or_else(|| anyhow!("Proxy host {} resolved to no addresses", authority))?;

        Ok(Self {
            host: TargetAddr::from_ip(addr.ip()),
            ..self
        })
    }

    pub fn protocol(&self) -> ProxyProtocol {
        self.protocol
    }

    pub fn host(&self) -> &TargetAddr {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn auth(&self) -> Option<&ProxyAuth> {
        self.auth.as_ref()
    }

    /// `host:port`, IPv6 bracketed
    pub fn authority(&self) -> String {
        format!("{}:{}", self.host.host_for_authority(), self.port)
    }
}

impl fmt::Display for ProxyEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.protocol.as_str(), self.authority())
    }
}

/// One candidate route handed to the connector by a resolver
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Proxy {
    /// No proxy: dial the target directly
    Direct,
    /// Tunnel through the given upstream proxy
    Via(Arc<ProxyEndpoint>),
}

impl Proxy {
    pub fn is_direct(&self) -> bool {
        matches!(self, Proxy::Direct)
    }

    /// The endpoint, unless this is the direct route
    pub fn endpoint(&self) -> Option<&ProxyEndpoint> {
        match self {
            Proxy::Direct => None,
            Proxy::Via(endpoint) => Some(endpoint),
        }
    }

    /// Short label for metrics: `direct`, `socks5` or `http`
    pub fn route_kind(&self) -> &'static str {
        match self {
            Proxy::Direct => "direct",
            Proxy::Via(endpoint) => endpoint.protocol().as_str(),
        }
    }
}

impl fmt::Display for Proxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Proxy::Direct => write!(f, "DIRECT"),
            Proxy::Via(endpoint) => write!(f, "{}", endpoint),
        }
    }
}

impl From<ProxyEndpoint> for Proxy {
    fn from(endpoint: ProxyEndpoint) -> Self {
        Proxy::Via(Arc::new(endpoint))
    }
}

impl From<Arc<ProxyEndpoint>> for Proxy {
    fn from(endpoint: Arc<ProxyEndpoint>) -> Self {
        Proxy::Via(endpoint)
    }
}
