//! Namespace layout: the pure mapping tenant id -> schema name -> artifact root.

use std::collections::HashSet;
use std::path::PathBuf;

use mlgw_common::{ArtifactRoot, GatewayConfig, GatewayError, GatewayResult, SchemaName, TenantId};

/// Postgres truncates identifiers beyond this many bytes.
pub const MAX_SCHEMA_NAME_LEN: usize = 63;

/// Resolved resource locations of one tenant.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Namespace {
    pub schema: SchemaName,
    pub artifact_root: ArtifactRoot,
}

/// Deterministic derivation of tenant namespaces.
#[derive(Clone, Debug)]
pub struct NamespaceLayout {
    schema_prefix: String,
    artifact_base: PathBuf,
    reserved: HashSet<String>,
}

impl NamespaceLayout {
    pub fn new(
        schema_prefix: impl Into<String>,
        artifact_base: impl Into<PathBuf>,
        reserved: impl IntoIterator<Item = String>,
    ) -> Self {
        Self {
            schema_prefix: schema_prefix.into(),
            artifact_base: artifact_base.into(),
            reserved: reserved.into_iter().map(|n| n.to_ascii_lowercase()).collect(),
        }
    }

    pub fn from_config(config: &GatewayConfig) -> Self {
        Self::new(
            config.schema_prefix.clone(),
            config.artifact_base.clone(),
            config.reserved_names.iter().cloned(),
        )
    }

    /// Derive the namespace of `id`, rejecting reserved or unusable names.
    ///
    /// Touches neither the store nor the filesystem.
    pub fn resolve(&self, id: &TenantId) -> GatewayResult<Namespace> {
        let schema = format!("{}{}", self.schema_prefix, id.namespace_token());
        if schema.len() > MAX_SCHEMA_NAME_LEN {
            return Err(GatewayError::invalid_tenant(
                id.as_str(),
                format!("schema name '{schema}' exceeds {MAX_SCHEMA_NAME_LEN} bytes"),
            ));
        }
        if schema.starts_with("pg_") {
            return Err(GatewayError::invalid_tenant(
                id.as_str(),
                "schema names starting with 'pg_' are reserved by the store",
            ));
        }
        if self.reserved.contains(&schema) || self.reserved.contains(id.as_str()) {
            return Err(GatewayError::invalid_tenant(
                id.as_str(),
                format!("'{schema}' is a reserved name"),
            ));
        }
        Ok(Namespace {
            schema: SchemaName(schema),
            artifact_root: ArtifactRoot(self.artifact_base.join(id.as_str())),
        })
    }
}
