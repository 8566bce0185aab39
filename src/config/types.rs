//! Configuration Types

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::probe::POSTGRESQL_DEFAULT_PORT;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub connector: ConnectorConfig,
    pub monitoring: MonitoringConfig,
    pub proxies: Vec<ProxyConfig>,
    pub databases: Vec<DatabaseConfig>,
}

/// Connector configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ConnectorConfig {
    /// Limit on each TCP dial (to the target or to the proxy)
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,
    /// Limit on the SOCKS5 / HTTP CONNECT negotiation with a proxy
    #[serde(with = "humantime_serde")]
    pub handshake_timeout: Duration,
}

/// Monitoring configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MonitoringConfig {
    pub log_level: String,
    pub metrics_enabled: bool,
}

/// Named upstream proxy
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProxyConfig {
    pub name: String,
    #[serde(default = "default_proxy_protocol")]
    pub protocol: String,
    pub host: String,
    pub port: u16,
    pub auth: Option<ProxyAuthConfig>,
}

/// Proxy authentication configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProxyAuthConfig {
    pub username: String,
    pub password: String,
}

/// Database endpoint probed by the driver
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    pub name: String,
    pub host: String,
    #[serde(default = "default_database_port")]
    pub port: u16,
    /// Name of an entry in `proxies`; absent means a direct connection
    pub proxy: Option<String>,
}

fn default_proxy_protocol() -> String {
    "socks5".to_string()
}

fn default_database_port() -> u16 {
    POSTGRESQL_DEFAULT_PORT
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            handshake_timeout: Duration::from_secs(5),
        }
    }
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: true,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            connector: ConnectorConfig::default(),
            monitoring: MonitoringConfig::default(),
            proxies: vec![
                ProxyConfig {
                    name: "proxy-a".to_string(),
                    protocol: "socks5".to_string(),
                    host: "localhost".to_string(),
                    port: 1080,
                    auth: None,
                },
                ProxyConfig {
                    name: "proxy-b".to_string(),
                    protocol: "socks5".to_string(),
                    host: "localhost".to_string(),
                    port: 1081,
                    auth: None,
                },
            ],
            databases: vec![
                DatabaseConfig {
                    name: "databasea".to_string(),
                    host: "databasea".to_string(),
                    port: POSTGRESQL_DEFAULT_PORT,
                    proxy: Some("proxy-a".to_string()),
                },
                DatabaseConfig {
                    name: "databaseb".to_string(),
                    host: "databaseb".to_string(),
                    port: POSTGRESQL_DEFAULT_PORT,
                    proxy: Some("proxy-b".to_string()),
                },
            ],
        }
    }
}
