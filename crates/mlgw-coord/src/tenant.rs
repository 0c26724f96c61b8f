//! Tenant registry: maps tenant IDs to their provisioning state.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use mlgw_common::{ArtifactRoot, GatewayError, GatewayResult, SchemaName, TenantId};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{info, warn};

use crate::ledger::TenantLedger;
use crate::provision::Provisioner;

/// A provisioned tenant and its resolved resource locations.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tenant {
    pub id: TenantId,
    /// Display name, set when the tenant was created explicitly.
    pub name: Option<String>,
    pub schema: SchemaName,
    pub artifact_root: ArtifactRoot,
    pub created_at: DateTime<Utc>,
}

/// Externally visible provisioning state of a tenant.
#[derive(Clone, Debug)]
pub enum TenantState {
    Unprovisioned,
    Provisioning,
    Ready(Arc<Tenant>),
    /// Last attempt failed; the next `ensure_ready` retries.
    Failed(GatewayError),
}

impl TenantState {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Unprovisioned => "unprovisioned",
            Self::Provisioning => "provisioning",
            Self::Ready(_) => "ready",
            Self::Failed(_) => "failed",
        }
    }
}

type Outcome = GatewayResult<Arc<Tenant>>;

/// Per-tenant slot. `Provisioning` carries the pending operation late
/// arrivals attach to; it exists only while provisioning is in flight.
enum Slot {
    Provisioning(watch::Receiver<Option<Outcome>>),
    Ready(Arc<Tenant>),
    Failed(GatewayError),
}

struct Inner {
    slots: DashMap<TenantId, Slot>,
    provisioner: Arc<Provisioner>,
    ledger: Option<Arc<TenantLedger>>,
}

/// Thread-safe registry of tenant provisioning state.
///
/// Mutual exclusion is per tenant key: the first caller to find a tenant
/// unprovisioned installs a `Provisioning` slot and spawns the work; every
/// concurrent caller for that tenant waits on the same outcome. Tenants never
/// contend with each other. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct TenantRegistry {
    inner: Arc<Inner>,
}

impl TenantRegistry {
    /// Empty, memory-only registry.
    pub fn new(provisioner: Arc<Provisioner>) -> Self {
        Self {
            inner: Arc::new(Inner {
                slots: DashMap::new(),
                provisioner,
                ledger: None,
            }),
        }
    }

    /// Registry backed by `ledger`; previously provisioned tenants are
    /// restored as `Ready`.
    pub async fn with_ledger(
        provisioner: Arc<Provisioner>,
        ledger: Arc<TenantLedger>,
    ) -> GatewayResult<Self> {
        let slots = DashMap::new();
        for tenant in ledger.load().await? {
            provisioner.claim(&tenant.id)?;
            slots.insert(tenant.id.clone(), Slot::Ready(Arc::new(tenant)));
        }
        info!(
            tenants = slots.len(),
            ledger = %ledger.path().display(),
            "tenant registry restored"
        );
        Ok(Self {
            inner: Arc::new(Inner {
                slots,
                provisioner,
                ledger: Some(ledger),
            }),
        })
    }

    pub fn provisioner(&self) -> &Arc<Provisioner> {
        &self.inner.provisioner
    }

    /// Current state of `id`, never blocking on provisioning.
    pub fn resolve(&self, id: &TenantId) -> TenantState {
        match self.inner.slots.get(id).as_deref() {
            None => TenantState::Unprovisioned,
            Some(Slot::Provisioning(_)) => TenantState::Provisioning,
            Some(Slot::Ready(tenant)) => TenantState::Ready(Arc::clone(tenant)),
            Some(Slot::Failed(err)) => TenantState::Failed(err.clone()),
        }
    }

    /// Return the tenant once it is fully provisioned, provisioning it first
    /// if needed.
    ///
    /// Dropping the returned future abandons only this caller's wait; the
    /// provisioning task keeps running for other waiters.
    pub async fn ensure_ready(&self, id: &TenantId) -> GatewayResult<Arc<Tenant>> {
        self.ensure_ready_named(id, None).await
    }

    /// Explicitly provision a tenant with a display name.
    ///
    /// Fails with `TenantExists` when the tenant is already ready. If a lazy
    /// provisioning of the same tenant is in flight, this attaches to it and
    /// the name is not applied.
    pub async fn create(&self, id: &TenantId, name: Option<String>) -> GatewayResult<Arc<Tenant>> {
        if let TenantState::Ready(_) = self.resolve(id) {
            return Err(GatewayError::TenantExists(id.to_string()));
        }
        self.ensure_ready_named(id, name).await
    }

    /// A ready tenant, or `TenantNotFound`.
    pub fn get(&self, id: &TenantId) -> GatewayResult<Arc<Tenant>> {
        match self.resolve(id) {
            TenantState::Ready(tenant) => Ok(tenant),
            _ => Err(GatewayError::TenantNotFound(id.to_string())),
        }
    }

    /// All ready tenants, sorted by id.
    pub fn list(&self) -> Vec<Arc<Tenant>> {
        let mut tenants: Vec<Arc<Tenant>> = self
            .inner
            .slots
            .iter()
            .filter_map(|e| match e.value() {
                Slot::Ready(t) => Some(Arc::clone(t)),
                _ => None,
            })
            .collect();
        tenants.sort_by(|a, b| a.id.cmp(&b.id));
        tenants
    }

    async fn ensure_ready_named(
        &self,
        id: &TenantId,
        name: Option<String>,
    ) -> GatewayResult<Arc<Tenant>> {
        // Fast path: ready tenants never touch the entry lock.
        if let Some(slot) = self.inner.slots.get(id)
            && let Slot::Ready(tenant) = slot.value()
        {
            return Ok(Arc::clone(tenant));
        }

        // Unusable ids fail here, before they can occupy a slot.
        self.inner.provisioner.layout().resolve(id)?;

        let rx = match self.inner.slots.entry(id.clone()) {
            Entry::Occupied(mut occupied) => match occupied.get() {
                Slot::Ready(tenant) => return Ok(Arc::clone(tenant)),
                Slot::Provisioning(rx) => rx.clone(),
                Slot::Failed(_) => {
                    let (tx, rx) = watch::channel(None);
                    occupied.insert(Slot::Provisioning(rx.clone()));
                    self.spawn_provisioning(id.clone(), name, tx);
                    rx
                }
            },
            Entry::Vacant(vacant) => {
                let (tx, rx) = watch::channel(None);
                vacant.insert(Slot::Provisioning(rx.clone()));
                self.spawn_provisioning(id.clone(), name, tx);
                rx
            }
        };

        self.wait(id, rx).await
    }

    fn spawn_provisioning(
        &self,
        id: TenantId,
        name: Option<String>,
        tx: watch::Sender<Option<Outcome>>,
    ) {
        let inner = Arc::clone(&self.inner);
        info!(tenant = %id, "provisioning tenant");
        tokio::spawn(async move {
            let outcome = inner.provision(&id, name).await;
            // Publish to the map before waking waiters so anyone woken sees
            // the settled slot.
            match &outcome {
                Ok(tenant) => {
                    inner.slots.insert(id.clone(), Slot::Ready(Arc::clone(tenant)));
                }
                Err(err) => {
                    warn!(tenant = %id, error = %err, retryable = err.is_retryable(), "tenant provisioning failed");
                    inner.slots.insert(id.clone(), Slot::Failed(err.clone()));
                }
            }
            let _ = tx.send(Some(outcome));
        });
    }

    async fn wait(
        &self,
        id: &TenantId,
        mut rx: watch::Receiver<Option<Outcome>>,
    ) -> GatewayResult<Arc<Tenant>> {
        let settled = match rx.wait_for(Option::is_some).await {
            Ok(outcome) => outcome.clone(),
            Err(_) => None,
        };
        match settled {
            Some(outcome) => outcome,
            None => {
                // The provisioning task died without reporting. Clear its slot
                // so the next caller can start over.
                self.inner.slots.remove_if(id, |_, slot| {
                    matches!(slot, Slot::Provisioning(pending) if pending.same_channel(&rx))
                });
                Err(GatewayError::BackendUnavailable(format!(
                    "provisioning of tenant '{id}' was aborted"
                )))
            }
        }
    }
}

impl Inner {
    async fn provision(&self, id: &TenantId, name: Option<String>) -> Outcome {
        let ns = self.provisioner.provision(id).await?;
        let tenant = Tenant {
            id: id.clone(),
            name,
            schema: ns.schema,
            artifact_root: ns.artifact_root,
            created_at: Utc::now(),
        };
        if let Some(ledger) = &self.ledger {
            ledger.record(&tenant).await?;
        }
        info!(tenant = %id, "tenant ready");
        Ok(Arc::new(tenant))
    }
}
