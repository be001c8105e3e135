//! Static configuration: allow-list, providers, server.
//!
//! Priority: environment > TOML file > defaults.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::access::AllowList;
use crate::location::providers::{self, GeoEndpoint, ProviderEndpoint};
use crate::location::{LocationError, ResolverSettings};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub allowed_cities: Vec<String>,
    pub log_level: String,
    pub server: ServerConfig,
    pub providers: ProvidersConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            allowed_cities: Vec::new(),
            log_level: "info".to_string(),
            server: ServerConfig::default(),
            providers: ProvidersConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvidersConfig {
    pub echo_timeout_secs: u64,
    pub geo_timeout_secs: u64,
    pub strict_private_ranges: bool,
    pub geolocation: GeoEndpoint,
    pub ip_echo: Vec<ProviderEndpoint>,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            echo_timeout_secs: providers::DEFAULT_ECHO_TIMEOUT.as_secs(),
            geo_timeout_secs: providers::DEFAULT_GEO_TIMEOUT.as_secs(),
            strict_private_ranges: false,
            geolocation: GeoEndpoint::default(),
            ip_echo: providers::default_echo_endpoints(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot parse {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid value for {var}: {value}")]
    Env { var: &'static str, value: String },
    #[error("timeouts must be non-zero")]
    ZeroTimeout,
    #[error(transparent)]
    Provider(#[from] LocationError),
}

impl Config {
    /// Load from an optional TOML file, then apply `CITYGATE_*` overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None => Self::default(),
        };
        config.apply_env(|var| std::env::var(var).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let display = path.display().to_string();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: display.clone(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| ConfigError::Parse { path: display, source })
    }

    /// Apply overrides from a variable lookup (the process environment in
    /// production).
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(cities) = lookup("CITYGATE_ALLOWED_CITIES") {
            self.allowed_cities = cities
                .split(';')
                .map(str::trim)
                .filter(|c| !c.is_empty())
                .map(String::from)
                .collect();
        }
        if let Some(level) = lookup("CITYGATE_LOG") {
            self.log_level = level;
        }
        if let Some(host) = lookup("CITYGATE_HOST") {
            self.server.host = host;
        }
        if let Some(port) = lookup("CITYGATE_PORT") {
            self.server.port = port.trim().parse().map_err(|_| ConfigError::Env {
                var: "CITYGATE_PORT",
                value: port.clone(),
            })?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.providers.echo_timeout_secs == 0 || self.providers.geo_timeout_secs == 0 {
            return Err(ConfigError::ZeroTimeout);
        }
        self.resolver_settings().validate()?;
        Ok(())
    }

    pub fn resolver_settings(&self) -> ResolverSettings {
        ResolverSettings {
            echo: self.providers.ip_echo.clone(),
            geo: self.providers.geolocation.clone(),
            echo_timeout: Duration::from_secs(self.providers.echo_timeout_secs),
            geo_timeout: Duration::from_secs(self.providers.geo_timeout_secs),
            strict_private_ranges: self.providers.strict_private_ranges,
        }
    }

    pub fn allow_list(&self) -> AllowList {
        AllowList::new(self.allowed_cities.iter().cloned())
    }

    /// The defaults rendered as TOML, as a starting point for a config file.
    pub fn sample() -> String {
        toml::to_string_pretty(&Self::default())
            .unwrap_or_else(|e| format!("# cannot render sample config: {}", e))
    }
}
