//! Per-request tenant binding.

use std::sync::Arc;

use mlgw_common::{ArtifactRoot, SchemaName, TenantId};
use mlgw_coord::Tenant;
use uuid::Uuid;

use crate::backend::scoped_store_uri;

/// The resolved tenant a single request is bound to.
///
/// Built once the tenant is ready and never mutated afterwards, so a request
/// cannot be retargeted mid-flight. Not shared between requests.
#[derive(Debug)]
pub struct RequestContext {
    request_id: Uuid,
    tenant: Arc<Tenant>,
}

impl RequestContext {
    pub fn new(tenant: Arc<Tenant>) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            tenant,
        }
    }

    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    pub fn tenant_id(&self) -> &TenantId {
        &self.tenant.id
    }

    pub fn schema(&self) -> &SchemaName {
        &self.tenant.schema
    }

    pub fn artifact_root(&self) -> &ArtifactRoot {
        &self.tenant.artifact_root
    }

    /// Store connection string with this tenant's schema as search path.
    pub fn store_uri(&self, store_url: &str) -> String {
        scoped_store_uri(store_url, self.schema())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn tenant(raw: &str) -> Arc<Tenant> {
        Arc::new(Tenant {
            id: TenantId::parse(raw).unwrap(),
            name: None,
            schema: SchemaName(raw.replace('-', "_")),
            artifact_root: ArtifactRoot(PathBuf::from("/data").join(raw)),
            created_at: Default::default(),
        })
    }

    #[test]
    fn contexts_get_distinct_request_ids() {
        let t = tenant("acme-corp");
        let a = RequestContext::new(Arc::clone(&t));
        let b = RequestContext::new(t);
        assert_ne!(a.request_id(), b.request_id());
        assert_eq!(a.tenant_id(), b.tenant_id());
    }

    #[test]
    fn store_uri_binds_search_path() {
        let ctx = RequestContext::new(tenant("acme-corp"));
        assert_eq!(ctx.schema().as_str(), "acme_corp");
        assert_eq!(
            ctx.store_uri("postgresql://mlflow@postgres:5432/mlflow_multitenant"),
            "postgresql://mlflow@postgres:5432/mlflow_multitenant?options=-csearch_path%3Dacme_corp"
        );
    }
}
