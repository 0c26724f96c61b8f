use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{GatewayError, GatewayResult};

/// Longest accepted tenant identifier, in bytes. Matches the Postgres
/// identifier limit so an unprefixed schema name always fits.
pub const MAX_TENANT_ID_LEN: usize = 63;

/// Validated tenant identifier.
///
/// The accepted alphabet is `[a-z0-9-]`, first and last character
/// alphanumeric. Parsing never normalizes input: `"Acme"` is rejected rather
/// than lowered, so two distinct raw identifiers can never collapse into one.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TenantId(String);

impl TenantId {
    pub fn parse(raw: &str) -> GatewayResult<Self> {
        if raw.is_empty() {
            return Err(GatewayError::invalid_tenant(raw, "empty identifier"));
        }
        if raw.len() > MAX_TENANT_ID_LEN {
            return Err(GatewayError::invalid_tenant(
                raw,
                format!("longer than {MAX_TENANT_ID_LEN} bytes"),
            ));
        }
        if let Some(bad) = raw
            .chars()
            .find(|c| !(c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '-'))
        {
            return Err(GatewayError::invalid_tenant(
                raw,
                format!("disallowed character {bad:?}"),
            ));
        }
        if raw.starts_with('-') || raw.ends_with('-') {
            return Err(GatewayError::invalid_tenant(
                raw,
                "must start and end with a letter or digit",
            ));
        }
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Namespace token for the relational store: hyphens become underscores.
    ///
    /// Injective because `_` never appears in a valid identifier.
    pub fn namespace_token(&self) -> String {
        self.0.replace('-', "_")
    }
}

impl std::fmt::Display for TenantId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for TenantId {
    type Error = GatewayError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<TenantId> for String {
    fn from(id: TenantId) -> Self {
        id.0
    }
}

/// Name of a tenant's schema in the shared relational store.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SchemaName(pub String);

impl SchemaName {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Double-quoted form for DDL. Schema names are built from the tenant
    /// alphabet plus a configured prefix, so they never contain quotes.
    pub fn quoted(&self) -> String {
        format!("\"{}\"", self.0)
    }
}

impl std::fmt::Display for SchemaName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Directory holding one tenant's artifacts.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArtifactRoot(pub PathBuf);

impl ArtifactRoot {
    pub fn as_path(&self) -> &Path {
        &self.0
    }
}

impl std::fmt::Display for ArtifactRoot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.display())
    }
}
