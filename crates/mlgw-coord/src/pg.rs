//! Postgres-backed namespace store.

use std::time::Duration;

use async_trait::async_trait;
use mlgw_common::{GatewayError, GatewayResult, SchemaName};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tracing::debug;

use crate::provision::NamespaceStore;

const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);

/// Creates tenant schemas in a shared Postgres database.
///
/// The pool connects lazily, so the gateway starts even while the database
/// is down; provisioning then fails with `BackendUnavailable` until it
/// comes back.
#[derive(Clone, Debug)]
pub struct PgNamespaceStore {
    pool: PgPool,
}

impl PgNamespaceStore {
    pub fn connect_lazy(store_url: &str) -> GatewayResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(4)
            .acquire_timeout(ACQUIRE_TIMEOUT)
            .connect_lazy(store_url)
            .map_err(|e| GatewayError::BackendUnavailable(format!("invalid store url: {e}")))?;
        Ok(Self { pool })
    }
}

/// SQLSTATE `unique_violation`, raised on `pg_namespace_nspname_index`.
const UNIQUE_VIOLATION: &str = "23505";
/// SQLSTATE `duplicate_schema`.
const DUPLICATE_SCHEMA: &str = "42P06";

fn unavailable(e: sqlx::Error) -> GatewayError {
    GatewayError::BackendUnavailable(format!("store error: {e}"))
}

/// Whether a failed `CREATE SCHEMA IF NOT EXISTS` lost a race with another
/// session creating the same schema, leaving it in place.
fn lost_creation_race(sqlstate: Option<&str>) -> bool {
    matches!(sqlstate, Some(UNIQUE_VIOLATION | DUPLICATE_SCHEMA))
}

#[async_trait]
impl NamespaceStore for PgNamespaceStore {
    async fn create_namespace(&self, schema: &SchemaName) -> GatewayResult<()> {
        // Identifiers cannot be bound as parameters; the schema name is
        // restricted to [a-z0-9_] by construction.
        let ddl = format!("CREATE SCHEMA IF NOT EXISTS {}", schema.quoted());
        match sqlx::query(&ddl).execute(&self.pool).await {
            Ok(_) => Ok(()),
            Err(e) if lost_creation_race(e.as_database_error().and_then(|d| d.code()).as_deref()) => {
                debug!(%schema, error = %e, "schema created concurrently by another session");
                Ok(())
            }
            Err(e) => Err(unavailable(e)),
        }
    }

    async fn ping(&self) -> GatewayResult<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(unavailable)?;
        Ok(())
    }
}
