//! Configuration Manager

use super::{Config, DatabaseConfig, ProxyConfig};
use crate::probe::{DatabaseRoute, DatabaseTarget};
use crate::routing::{Proxy, ProxyAuth, ProxyEndpoint, ProxyProtocol};
use crate::Result;
use anyhow::{Context, anyhow, bail};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

const MAX_TIMEOUT: Duration = Duration::from_secs(3600);
const VALID_LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Manages configuration loading and validation
pub struct ConfigManager;

impl ConfigManager {
    /// Load configuration from file
    pub fn load_from_file(path: &Path) -> Result<Config> {
        if path.exists() {
            tracing::info!("Loading configuration from: {}", path.display());
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;

            let config = Self::parse(&content)
                .with_context(|| format!("Failed to load config file: {}", path.display()))?;

            tracing::info!("Configuration loaded and validated successfully");
            Ok(config)
        } else {
            tracing::warn!("Configuration file not found at {}, using defaults", path.display());
            let config = Config::default();
            config.validate()?;
            Ok(config)
        }
    }

    /// Parse and validate a TOML document
    pub fn parse(content: &str) -> Result<Config> {
        let config: Config = toml::from_str(content)
            .context("Failed to parse configuration")?;

        config.validate()
            .context("Configuration validation failed")?;

        Ok(config)
    }

    /// Load configuration from environment variables
    pub fn load_from_env() -> Result<Config> {
        let mut config = Config::default();
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }
}

impl Config {
    /// Apply `PROXYSCOPE_*` overrides using `lookup` to read variables
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(timeout) = lookup("PROXYSCOPE_CONNECT_TIMEOUT") {
            self.connector.connect_timeout = humantime::parse_duration(&timeout)
                .with_context(|| format!("Invalid PROXYSCOPE_CONNECT_TIMEOUT: {}", timeout))?;
        }

        if let Some(timeout) = lookup("PROXYSCOPE_HANDSHAKE_TIMEOUT") {
            self.connector.handshake_timeout = humantime::parse_duration(&timeout)
                .with_context(|| format!("Invalid PROXYSCOPE_HANDSHAKE_TIMEOUT: {}", timeout))?;
        }

        if let Some(log_level) = lookup("PROXYSCOPE_LOG_LEVEL") {
            self.monitoring.log_level = log_level;
        }

        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        self.validate_connector_config()
            .context("Connector configuration validation failed")?;

        self.validate_proxy_configs()
            .context("Proxy configuration validation failed")?;

        self.validate_database_configs()
            .context("Database configuration validation failed")?;

        self.validate_monitoring_config()
            .context("Monitoring configuration validation failed")?;

        Ok(())
    }

    /// Validate connector configuration
    fn validate_connector_config(&self) -> Result<()> {
        for (name, value) in [
            ("connect_timeout", self.connector.connect_timeout),
            ("handshake_timeout", self.connector.handshake_timeout),
        ] {
            if value.is_zero() {
                bail!("{} must be greater than 0", name);
            }
            if value > MAX_TIMEOUT {
                bail!("{} cannot exceed 1 hour", name);
            }
        }

        Ok(())
    }

    /// Validate proxy configurations
    fn validate_proxy_configs(&self) -> Result<()> {
        let mut names = HashSet::new();

        for (i, proxy) in self.proxies.iter().enumerate() {
            if proxy.name.is_empty() {
                bail!("Proxy {} has empty name", i);
            }

            if !names.insert(proxy.name.as_str()) {
                bail!("Proxy name '{}' is defined more than once", proxy.name);
            }

            proxy.to_endpoint()
                .with_context(|| format!("Proxy '{}' is invalid", proxy.name))?;
        }

        Ok(())
    }

    /// Validate database configurations
    fn validate_database_configs(&self) -> Result<()> {
        for (i, database) in self.databases.iter().enumerate() {
            if database.name.is_empty() {
                bail!("Database {} has empty name", i);
            }

            if database.host.is_empty() {
                bail!("Database '{}' has empty host", database.name);
            }

            if database.port == 0 {
                bail!("Database '{}' has invalid port 0", database.name);
            }

            if let Some(proxy) = &database.proxy {
                if !self.proxies.iter().any(|p| &p.name == proxy) {
                    bail!("Database '{}' refers to unknown proxy '{}'", database.name, proxy);
                }
            }
        }

        Ok(())
    }

    /// Validate monitoring configuration
    fn validate_monitoring_config(&self) -> Result<()> {
        if !VALID_LOG_LEVELS.contains(&self.monitoring.log_level.as_str()) {
            bail!("monitoring.log_level must be one of: {}", VALID_LOG_LEVELS.join(", "));
        }

        Ok(())
    }

    /// Build the in-memory proxy endpoints, keyed by name
    pub fn proxy_endpoints(&self) -> Result<HashMap<String, Arc<ProxyEndpoint>>> {
        self.proxies
            .iter()
            .map(|proxy| -> Result<(String, Arc<ProxyEndpoint>)> {
                Ok((proxy.name.clone(), Arc::new(proxy.to_endpoint()?)))
            })
            .collect()
    }

    /// Pair every configured database with the proxy it must be reached through
    pub fn database_routes(&self) -> Result<Vec<DatabaseRoute>> {
        let endpoints = self.proxy_endpoints()?;
        self.routes_with(&endpoints)
    }

    /// Like [`Config::database_routes`], but resolves every proxy host first
    /// so an unresolvable proxy fails here rather than on first use.
    pub async fn resolved_routes(&self) -> Result<Vec<DatabaseRoute>> {
        let mut endpoints = HashMap::with_capacity(self.proxies.len());

        for proxy in &self.proxies {
            let endpoint = proxy
                .to_endpoint()?
                .resolved()
                .await
                .with_context(|| format!("Proxy '{}' cannot be resolved", proxy.name))?;
            endpoints.insert(proxy.name.clone(), Arc::new(endpoint));
        }

        self.routes_with(&endpoints)
    }

    fn routes_with(&self, endpoints: &HashMap<String, Arc<ProxyEndpoint>>) -> Result<Vec<DatabaseRoute>> {
        self.databases
            .iter()
            .map(|database| database.to_route(endpoints))
            .collect()
    }

    /// Merge with CLI arguments
    pub fn merge_with_cli_args(
        &mut self,
        log_level: Option<&str>,
        connect_timeout: Option<u64>,
    ) {
        if let Some(level) = log_level {
            self.monitoring.log_level = level.to_string();
            tracing::info!("CLI override: log level set to {}", level);
        }

        if let Some(timeout_secs) = connect_timeout {
            self.connector.connect_timeout = Duration::from_secs(timeout_secs);
            tracing::info!("CLI override: connect timeout set to {}s", timeout_secs);
        }
    }
}

impl ProxyConfig {
    /// Convert to a validated endpoint
    pub fn to_endpoint(&self) -> Result<ProxyEndpoint> {
        let protocol: ProxyProtocol = self.protocol.parse()?;
        let endpoint = ProxyEndpoint::new(protocol, &self.host, self.port)?;

        match &self.auth {
            Some(auth) => Ok(endpoint.with_auth(ProxyAuth::new(&auth.username, &auth.password)?)),
            None => Ok(endpoint),
        }
    }
}

impl DatabaseConfig {
    fn to_route(&self, endpoints: &HashMap<String, Arc<ProxyEndpoint>>) -> Result<DatabaseRoute> {
        let proxy = match &self.proxy {
            Some(name) => endpoints
                .get(name)
                .cloned()
                .map(Proxy::Via)
                .ok_or_else(|| anyhow!("Database '{}' refers to unknown proxy '{}'", self.name, name))?,
            None => Proxy::Direct,
        };

        Ok(DatabaseRoute {
            target: DatabaseTarget::new(&self.name, &self.host, self.port)?,
            proxy,
        })
    }
}
