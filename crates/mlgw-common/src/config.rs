//! Gateway configuration, loaded once at startup from a TOML file.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration loading or validation failure.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("cannot parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("cannot serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("invalid config: {0}")]
    Validation(String),
}

/// Where the tenant identifier is read from on each inbound request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TenantSource {
    /// A request header, e.g. `x-tenant-id`.
    Header { name: String },
    /// The first path segment; stripped before forwarding.
    PathSegment,
    /// A query-string parameter.
    Query { param: String },
}

impl Default for TenantSource {
    fn default() -> Self {
        Self::Header {
            name: "x-tenant-id".to_string(),
        }
    }
}

impl std::fmt::Display for TenantSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Header { name } => write!(f, "header '{name}'"),
            Self::PathSegment => write!(f, "first path segment"),
            Self::Query { param } => write!(f, "query parameter '{param}'"),
        }
    }
}

/// Configuration for a gateway instance.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GatewayConfig {
    /// Address the HTTP listener binds to. Default: `0.0.0.0:8000`.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,

    /// Connection string of the shared relational store. `memory://` selects
    /// the in-process store used for local development.
    pub store_url: String,

    /// Base URL of the upstream tracking server.
    pub upstream_url: String,

    /// Base directory; each tenant gets `<artifact_base>/<tenant-id>`.
    #[serde(default = "default_artifact_base")]
    pub artifact_base: PathBuf,

    /// Durable tenant ledger. Default: `<artifact_base>/tenants.json`.
    #[serde(default)]
    pub ledger_path: Option<PathBuf>,

    /// Tenant identifier extraction rule.
    #[serde(default)]
    pub tenant_source: TenantSource,

    /// Schema names no tenant may claim.
    #[serde(default = "default_reserved_names")]
    pub reserved_names: Vec<String>,

    /// Prepended to every derived schema name.
    #[serde(default)]
    pub schema_prefix: String,

    /// Upper bound a request waits for its tenant to be provisioned.
    #[serde(default = "default_provision_wait_ms")]
    pub provision_wait_ms: u64,

    /// Timeout for a single upstream call.
    #[serde(default = "default_upstream_timeout_ms")]
    pub upstream_timeout_ms: u64,

    /// Largest request body the proxy buffers.
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

impl GatewayConfig {
    /// Minimal configuration with defaults for everything optional.
    pub fn new(store_url: impl Into<String>, upstream_url: impl Into<String>) -> Self {
        Self {
            listen_addr: default_listen_addr(),
            store_url: store_url.into(),
            upstream_url: upstream_url.into(),
            artifact_base: default_artifact_base(),
            ledger_path: None,
            tenant_source: TenantSource::default(),
            reserved_names: default_reserved_names(),
            schema_prefix: String::new(),
            provision_wait_ms: default_provision_wait_ms(),
            upstream_timeout_ms: default_upstream_timeout_ms(),
            max_body_bytes: default_max_body_bytes(),
        }
    }

    /// Load and validate configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse and validate configuration from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.store_url.trim().is_empty() {
            return Err(ConfigError::Validation("store_url must not be empty".into()));
        }
        if !(self.upstream_url.starts_with("http://") || self.upstream_url.starts_with("https://"))
        {
            return Err(ConfigError::Validation(format!(
                "upstream_url must be an http(s) URL, got '{}'",
                self.upstream_url
            )));
        }
        if let Some(bad) = self
            .schema_prefix
            .chars()
            .find(|c| !(c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '_'))
        {
            return Err(ConfigError::Validation(format!(
                "schema_prefix contains disallowed character {bad:?}"
            )));
        }
        match &self.tenant_source {
            TenantSource::Header { name } if name.trim().is_empty() => {
                return Err(ConfigError::Validation("tenant header name is empty".into()));
            }
            TenantSource::Query { param } if param.trim().is_empty() => {
                return Err(ConfigError::Validation("tenant query parameter is empty".into()));
            }
            _ => {}
        }
        if self.provision_wait_ms == 0 {
            return Err(ConfigError::Validation("provision_wait_ms must be > 0".into()));
        }
        Ok(())
    }

    pub fn ledger_path(&self) -> PathBuf {
        self.ledger_path
            .clone()
            .unwrap_or_else(|| self.artifact_base.join("tenants.json"))
    }

    pub fn provision_wait(&self) -> Duration {
        Duration::from_millis(self.provision_wait_ms)
    }

    pub fn upstream_timeout(&self) -> Duration {
        Duration::from_millis(self.upstream_timeout_ms)
    }
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8000))
}

fn default_artifact_base() -> PathBuf {
    PathBuf::from("./tenants_data")
}

fn default_reserved_names() -> Vec<String> {
    [
        "public",
        "information_schema",
        "pg_catalog",
        "pg_toast",
        "gateway",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

const fn default_provision_wait_ms() -> u64 {
    30_000
}

const fn default_upstream_timeout_ms() -> u64 {
    60_000
}

const fn default_max_body_bytes() -> usize {
    64 * 1024 * 1024 // 64 MB
}
