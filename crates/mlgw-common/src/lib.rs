//! mlgw-common: tenant identifiers, error taxonomy, configuration.

pub mod config;
pub mod error;
pub mod id;

pub use config::{ConfigError, GatewayConfig, TenantSource};
pub use error::{GatewayError, GatewayResult};
pub use id::{ArtifactRoot, MAX_TENANT_ID_LEN, SchemaName, TenantId};
