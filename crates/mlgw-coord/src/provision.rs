//! Schema provisioner: creates a tenant's schema and artifact directory.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use mlgw_common::{ArtifactRoot, GatewayError, GatewayResult, SchemaName, TenantId};
use tracing::{debug, info};

use crate::namespace::{Namespace, NamespaceLayout};

/// The shared relational store, seen only through schema creation.
#[async_trait]
pub trait NamespaceStore: Send + Sync {
    /// Create `schema` if it does not exist. Must be idempotent.
    async fn create_namespace(&self, schema: &SchemaName) -> GatewayResult<()>;

    /// Cheap reachability probe used by readiness checks.
    async fn ping(&self) -> GatewayResult<()>;
}

/// The shared artifact storage, seen only through directory creation.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Create the directory tree at `root` if absent. Must be idempotent.
    async fn create_root(&self, root: &ArtifactRoot) -> GatewayResult<()>;
}

/// Artifact roots on a local or mounted filesystem.
#[derive(Debug, Default)]
pub struct FsArtifactStore;

#[async_trait]
impl ArtifactStore for FsArtifactStore {
    async fn create_root(&self, root: &ArtifactRoot) -> GatewayResult<()> {
        tokio::fs::create_dir_all(root.as_path()).await.map_err(|e| {
            GatewayError::StorageUnavailable(format!(
                "cannot create artifact root '{root}': {e}"
            ))
        })
    }
}

/// In-process store for local development (`store_url = "memory://"`) and tests.
///
/// Counts every namespace-creation call that reaches it and can be switched
/// offline to simulate an unreachable database.
#[derive(Debug)]
pub struct MemoryNamespaceStore {
    schemas: Mutex<HashSet<SchemaName>>,
    create_calls: AtomicUsize,
    online: AtomicBool,
}

impl MemoryNamespaceStore {
    pub fn new() -> Self {
        Self {
            schemas: Mutex::new(HashSet::new()),
            create_calls: AtomicUsize::new(0),
            online: AtomicBool::new(true),
        }
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    /// Number of `create_namespace` calls received, including failed ones.
    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub fn contains(&self, schema: &str) -> bool {
        self.schemas
            .lock()
            .map(|s| s.contains(&SchemaName(schema.to_string())))
            .unwrap_or(false)
    }

    pub fn schema_count(&self) -> usize {
        self.schemas.lock().map(|s| s.len()).unwrap_or(0)
    }

    fn check_online(&self) -> GatewayResult<()> {
        if self.online.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(GatewayError::BackendUnavailable(
                "memory store is offline".into(),
            ))
        }
    }
}

impl Default for MemoryNamespaceStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NamespaceStore for MemoryNamespaceStore {
    async fn create_namespace(&self, schema: &SchemaName) -> GatewayResult<()> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        self.check_online()?;
        let mut schemas = self
            .schemas
            .lock()
            .map_err(|_| GatewayError::BackendUnavailable("memory store poisoned".into()))?;
        schemas.insert(schema.clone());
        Ok(())
    }

    async fn ping(&self) -> GatewayResult<()> {
        self.check_online()
    }
}

/// Creates tenant namespaces: derive, claim, create schema, create directory.
///
/// Every step is idempotent, so two processes racing on the same brand-new
/// tenant both succeed with identical results.
pub struct Provisioner {
    layout: NamespaceLayout,
    store: Arc<dyn NamespaceStore>,
    artifacts: Arc<dyn ArtifactStore>,
    /// Schema name -> owning tenant, guarding against token collisions.
    claims: DashMap<SchemaName, TenantId>,
}

impl Provisioner {
    pub fn new(
        layout: NamespaceLayout,
        store: Arc<dyn NamespaceStore>,
        artifacts: Arc<dyn ArtifactStore>,
    ) -> Self {
        Self {
            layout,
            store,
            artifacts,
            claims: DashMap::new(),
        }
    }

    pub fn layout(&self) -> &NamespaceLayout {
        &self.layout
    }

    pub fn store(&self) -> &Arc<dyn NamespaceStore> {
        &self.store
    }

    /// Record `id` as the owner of its schema name without touching the store.
    /// Used when restoring tenants from the ledger.
    pub fn claim(&self, id: &TenantId) -> GatewayResult<Namespace> {
        let ns = self.layout.resolve(id)?;
        match self.claims.entry(ns.schema.clone()) {
            Entry::Occupied(owner) if owner.get() != id => {
                return Err(GatewayError::invalid_tenant(
                    id.as_str(),
                    format!("schema '{}' already belongs to tenant '{}'", ns.schema, owner.get()),
                ));
            }
            Entry::Occupied(_) => {}
            Entry::Vacant(v) => {
                v.insert(id.clone());
            }
        }
        Ok(ns)
    }

    /// Ensure the tenant's schema and artifact root exist.
    pub async fn provision(&self, id: &TenantId) -> GatewayResult<Namespace> {
        let ns = self.claim(id)?;
        debug!(tenant = %id, schema = %ns.schema, "creating schema");
        self.store.create_namespace(&ns.schema).await?;
        debug!(tenant = %id, root = %ns.artifact_root, "creating artifact root");
        self.artifacts.create_root(&ns.artifact_root).await?;
        info!(tenant = %id, schema = %ns.schema, root = %ns.artifact_root, "tenant namespace ready");
        Ok(ns)
    }
}
