//! Routing gateway: tenant extraction, lazy provisioning, forwarding.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http::Request;
use mlgw_common::{GatewayError, GatewayResult, TenantId, TenantSource};
use mlgw_coord::TenantRegistry;
use tracing::{Instrument, debug, info_span};

use crate::backend::{BackendRequest, BackendResponse, TrackingBackend};
use crate::context::RequestContext;

/// Where a request goes once its tenant is known.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutedTenant {
    pub tenant_id: TenantId,
    /// Path and query to forward; differs from the inbound one only when the
    /// tenant came from the first path segment.
    pub path_and_query: String,
}

/// Extract the tenant identifier from `request` according to `source`.
///
/// Fails with `MissingTenant` when the datum is absent or empty and with
/// `InvalidTenantId` when it is malformed.
pub fn extract_tenant<B>(source: &TenantSource, request: &Request<B>) -> GatewayResult<RoutedTenant> {
    let uri = request.uri();
    let path_and_query = uri
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| "/".to_string());
    let missing = || GatewayError::MissingTenant(format!("expected in {source}"));

    match source {
        TenantSource::Header { name } => {
            let raw = request
                .headers()
                .get(name.as_str())
                .ok_or_else(missing)?
                .to_str()
                .map_err(|_| GatewayError::invalid_tenant("<non-ascii>", "header is not valid ASCII"))?
                .trim();
            if raw.is_empty() {
                return Err(missing());
            }
            Ok(RoutedTenant {
                tenant_id: TenantId::parse(raw)?,
                path_and_query,
            })
        }
        TenantSource::PathSegment => {
            let rest = uri.path().trim_start_matches('/');
            let (segment, remainder) = match rest.find('/') {
                Some(idx) => (&rest[..idx], &rest[idx..]),
                None => (rest, "/"),
            };
            if segment.is_empty() {
                return Err(missing());
            }
            let tenant_id = TenantId::parse(segment)?;
            let forwarded = match uri.query() {
                Some(q) => format!("{remainder}?{q}"),
                None => remainder.to_string(),
            };
            Ok(RoutedTenant {
                tenant_id,
                path_and_query: forwarded,
            })
        }
        TenantSource::Query { param } => {
            let raw = uri
                .query()
                .and_then(|q| {
                    url::form_urlencoded::parse(q.as_bytes())
                        .find(|(k, _)| k == param.as_str())
                        .map(|(_, v)| v.into_owned())
                })
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(missing)?;
            Ok(RoutedTenant {
                tenant_id: TenantId::parse(raw.trim())?,
                path_and_query,
            })
        }
    }
}

/// Request-facing component binding every call to one tenant namespace.
pub struct Gateway {
    registry: TenantRegistry,
    backend: Arc<dyn TrackingBackend>,
    source: TenantSource,
    provision_wait: Duration,
}

impl Gateway {
    pub fn new(
        registry: TenantRegistry,
        backend: Arc<dyn TrackingBackend>,
        source: TenantSource,
        provision_wait: Duration,
    ) -> Self {
        Self {
            registry,
            backend,
            source,
            provision_wait,
        }
    }

    pub fn registry(&self) -> &TenantRegistry {
        &self.registry
    }

    /// Route `request` to its tenant's namespace and return the backend's
    /// response unchanged.
    ///
    /// The first request seen for a tenant provisions it (schema and artifact
    /// directory) before being forwarded, so even a read-only call can cause
    /// that durable write. Every error except `Upstream` is raised before the
    /// backend is contacted.
    pub async fn handle(&self, request: Request<Bytes>) -> GatewayResult<BackendResponse> {
        let routed = extract_tenant(&self.source, &request)?;

        let tenant = tokio::time::timeout(
            self.provision_wait,
            self.registry.ensure_ready(&routed.tenant_id),
        )
        .await
        .map_err(|_| {
            GatewayError::BackendUnavailable(format!(
                "tenant '{}' still provisioning after {:?}",
                routed.tenant_id, self.provision_wait
            ))
        })??;

        let ctx = RequestContext::new(tenant);
        let span = info_span!(
            "forward",
            request_id = %ctx.request_id(),
            tenant = %ctx.tenant_id(),
            schema = %ctx.schema(),
        );

        let (parts, body) = request.into_parts();
        let backend_request = BackendRequest {
            method: parts.method,
            path_and_query: routed.path_and_query,
            headers: parts.headers,
            body,
        };

        async {
            let response = self.backend.call(&ctx, backend_request).await?;
            debug!(status = %response.status(), "backend responded");
            Ok::<_, GatewayError>(response)
        }
        .instrument(span)
        .await
    }
}
