//! Target Address Types

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use anyhow::{anyhow, bail};
use crate::Result;

/// Maximum length of a domain name accepted by a SOCKS5 proxy
pub const MAX_DOMAIN_LEN: usize = 255;

/// Host of an outbound connection: an IP literal or a name the proxy resolves
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TargetAddr {
    Ipv4(Ipv4Addr),
    Ipv6(Ipv6Addr),
    Domain(String),
}

impl TargetAddr {
    /// Create from socket address
    pub fn from_socket_addr(addr: &SocketAddr) -> Self {
        Self::from_ip(addr.ip())
    }

    /// Create from an IP address
    pub fn from_ip(ip: IpAddr) -> Self {
        match ip {
            IpAddr::V4(v4) => TargetAddr::Ipv4(v4),
            IpAddr::V6(v6) => TargetAddr::Ipv6(v6),
        }
    }

    /// Parse a bare host: IP literals become IP variants, anything else a domain.
    /// Bracketed IPv6 literals (`[::1]`) are accepted.
    pub fn parse_host(host: &str) -> Result<Self> {
        let trimmed = host.trim();
        let unbracketed = trimmed
            .strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .unwrap_or(trimmed);

        if let Ok(ip) = unbracketed.parse::<IpAddr>() {
            return Ok(Self::from_ip(ip));
        }

        if unbracketed.is_empty() {
            bail!("Host cannot be empty");
        }
        if unbracketed.len() > MAX_DOMAIN_LEN {
            bail!("Domain name too long: {} bytes", unbracketed.len());
        }
        if unbracketed.chars().any(|c| c.is_whitespace() || matches!(c, '/' | ':' | '[' | ']')) {
            bail!("Invalid character in host name: {}", unbracketed);
        }

        Ok(TargetAddr::Domain(unbracketed.to_string()))
    }

    /// Host portion suitable for `host:port` formatting (IPv6 bracketed)
    pub fn host_for_authority(&self) -> String {
        match self {
            TargetAddr::Ipv6(ip) => format!("[{}]", ip),
            other => other.to_string(),
        }
    }

    /// The IP address if this is not a domain
    pub fn ip(&self) -> Option<IpAddr> {
        match self {
            TargetAddr::Ipv4(ip) => Some(IpAddr::V4(*ip)),
            TargetAddr::Ipv6(ip) => Some(IpAddr::V6(*ip)),
            TargetAddr::Domain(_) => None,
        }
    }
}

impl fmt::Display for TargetAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetAddr::Ipv4(ip) => write!(f, "{}", ip),
            TargetAddr::Ipv6(ip) => write!(f, "{}", ip),
            TargetAddr::Domain(domain) => write!(f, "{}", domain),
        }
    }
}

/// Parse `host:port`, `[v6]:port` or `a.b.c.d:port`
pub fn parse_host_port(input: &str) -> Result<(TargetAddr, u16)> {
    let input = input.trim();

    if let Ok(addr) = input.parse::<SocketAddr>() {
        return Ok((TargetAddr::from_socket_addr(&addr), addr.port()));
    }

    let (host, port) = input
        .rsplit_once(':')
        .ok_or_else(|| anyhow!("Expected host:port, got '{}'", input))?;

    let port = port
        .parse::<u16>()
        .map_err(|e| anyhow!("Invalid port in '{}': {}", input, e))?;

    if port == 0 {
        bail!("Port cannot be 0 in '{}'", input);
    }

    Ok((TargetAddr::parse_host(host)?, port))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_host_port_variants() {
        let (host, port) = parse_host_port("db1:5432").unwrap();
        assert_eq!(host, TargetAddr::Domain("db1".to_string()));
        assert_eq!(port, 5432);

        let (host, port) = parse_host_port("10.0.0.7:1080").unwrap();
        assert_eq!(host, TargetAddr::Ipv4(Ipv4Addr::new(10, 0, 0, 7)));
        assert_eq!(port, 1080);

        let (host, port) = parse_host_port("[::1]:8080").unwrap();
        assert_eq!(host, TargetAddr::Ipv6(Ipv6Addr::LOCALHOST));
        assert_eq!(port, 8080);
    }

    #[test]
    fn test_parse_host_port_rejects_garbage() {
        assert!(parse_host_port("no-port").is_err());
        assert!(parse_host_port("host:notaport").is_err());
        assert!(parse_host_port("host:0").is_err());
        assert!(parse_host_port(":5432").is_err());
    }

    #[test]
    fn test_domain_length_limit() {
        let long = "a".repeat(MAX_DOMAIN_LEN + 1);
        assert!(TargetAddr::parse_host(&long).is_err());
        assert!(TargetAddr::parse_host(&long[..MAX_DOMAIN_LEN]).is_ok());
    }

    #[test]
    fn test_authority_formatting() {
        assert_eq!(TargetAddr::Ipv6(Ipv6Addr::LOCALHOST).host_for_authority(), "[::1]");
        assert_eq!(TargetAddr::Domain("databasea".into()).host_for_authority(), "databasea");
    }
}
