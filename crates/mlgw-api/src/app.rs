//! Wiring a `Gateway` from a `GatewayConfig`.

use std::sync::Arc;

use mlgw_common::{GatewayConfig, GatewayResult};
use mlgw_coord::{
    FsArtifactStore, MemoryNamespaceStore, NamespaceLayout, NamespaceStore, PgNamespaceStore,
    Provisioner, TenantLedger, TenantRegistry,
};
use tracing::{info, warn};

use crate::backend::{HttpTrackingBackend, TrackingBackend};
use crate::gateway::Gateway;

/// Store URL scheme selecting the in-process namespace store.
pub const MEMORY_STORE_SCHEME: &str = "memory:";

/// Namespace store for `store_url`: in-process for `memory:` URLs,
/// PostgreSQL otherwise. The PostgreSQL pool connects lazily.
pub fn namespace_store(store_url: &str) -> GatewayResult<Arc<dyn NamespaceStore>> {
    if store_url.starts_with(MEMORY_STORE_SCHEME) {
        warn!("using in-memory namespace store; schemas are not persisted");
        return Ok(Arc::new(MemoryNamespaceStore::new()));
    }
    Ok(Arc::new(PgNamespaceStore::connect_lazy(store_url)?))
}

/// Build a gateway forwarding to `config.upstream_url`, restoring the
/// tenant registry from the configured ledger.
pub async fn build_gateway(config: &GatewayConfig) -> GatewayResult<Gateway> {
    let backend: Arc<dyn TrackingBackend> = Arc::new(HttpTrackingBackend::new(
        config.upstream_url.clone(),
        config.upstream_timeout(),
    )?);
    build_gateway_with(config, namespace_store(&config.store_url)?, backend).await
}

/// Like [`build_gateway`] with the store and backend supplied by the caller.
pub async fn build_gateway_with(
    config: &GatewayConfig,
    store: Arc<dyn NamespaceStore>,
    backend: Arc<dyn TrackingBackend>,
) -> GatewayResult<Gateway> {
    let provisioner = Arc::new(Provisioner::new(
        NamespaceLayout::from_config(config),
        store,
        Arc::new(FsArtifactStore),
    ));
    let ledger = Arc::new(TenantLedger::new(config.ledger_path()));
    let registry = TenantRegistry::with_ledger(provisioner, ledger).await?;
    info!(
        upstream = %config.upstream_url,
        tenant_source = %config.tenant_source,
        tenants = registry.list().len(),
        "gateway assembled"
    );
    Ok(Gateway::new(
        registry,
        backend,
        config.tenant_source.clone(),
        config.provision_wait(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_scheme_selects_in_process_store() {
        let store = namespace_store("memory://").unwrap();
        store.ping().await.unwrap();
    }

    #[tokio::test]
    async fn postgres_pool_is_lazy() {
        // No server is listening; building the store must still succeed.
        assert!(namespace_store("postgresql://mlflow@127.0.0.1:1/mlflow").is_ok());
    }
}
