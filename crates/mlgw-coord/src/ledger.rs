//! Tenant ledger: durable record of provisioned tenants.
//!
//! Layout: a single JSON document
//!   { "tenants": { "<tenant-id>": { ...Tenant... } } }
//! rewritten through a temp file and rename, so readers never observe a
//! half-written ledger.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use mlgw_common::{GatewayError, GatewayResult, TenantId};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::tenant::Tenant;

#[derive(Debug, Default, Serialize, Deserialize)]
struct LedgerFile {
    #[serde(default)]
    tenants: BTreeMap<TenantId, Tenant>,
}

/// JSON-file backing for the tenant registry.
#[derive(Debug)]
pub struct TenantLedger {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl TenantLedger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load every recorded tenant. A missing file is an empty ledger; an
    /// unreadable or corrupt one is an error.
    pub async fn load(&self) -> GatewayResult<Vec<Tenant>> {
        Ok(self.read_file().await?.tenants.into_values().collect())
    }

    /// Insert or replace `tenant` and flush the ledger to disk.
    pub async fn record(&self, tenant: &Tenant) -> GatewayResult<()> {
        let _guard = self.write_lock.lock().await;
        let mut file = self.read_file().await?;
        file.tenants.insert(tenant.id.clone(), tenant.clone());
        self.write_file(&file).await
    }

    async fn read_file(&self) -> GatewayResult<LedgerFile> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(LedgerFile::default());
            }
            Err(e) => {
                return Err(GatewayError::StorageUnavailable(format!(
                    "cannot read tenant ledger '{}': {e}",
                    self.path.display()
                )));
            }
        };
        serde_json::from_slice(&bytes).map_err(|e| {
            GatewayError::StorageUnavailable(format!(
                "cannot parse tenant ledger '{}': {e}",
                self.path.display()
            ))
        })
    }

    async fn write_file(&self, file: &LedgerFile) -> GatewayResult<()> {
        let storage_err = |what: &str, e: &dyn std::fmt::Display| {
            GatewayError::StorageUnavailable(format!(
                "cannot {what} tenant ledger '{}': {e}",
                self.path.display()
            ))
        };

        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| storage_err("create directory for", &e))?;
        }
        let json = serde_json::to_vec_pretty(file).map_err(|e| storage_err("serialize", &e))?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &json)
            .await
            .map_err(|e| storage_err("write", &e))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| storage_err("replace", &e))
    }
}
