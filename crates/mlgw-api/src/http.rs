//! HTTP surface: tenant administration routes plus the tenant-scoped proxy.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Path, Request, State};
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use mlgw_common::{GatewayError, TenantId};
use mlgw_coord::Tenant;
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::gateway::Gateway;

#[derive(Clone)]
pub struct AppState {
    gateway: Arc<Gateway>,
    max_body_bytes: usize,
}

impl AppState {
    pub fn new(gateway: Arc<Gateway>, max_body_bytes: usize) -> Self {
        Self {
            gateway,
            max_body_bytes,
        }
    }
}

/// Error body returned for every failure the gateway itself produces.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error_code: String,
    pub message: String,
    pub retryable: bool,
}

/// Wrapper turning a `GatewayError` into an HTTP response.
pub struct ApiError(pub GatewayError);

impl From<GatewayError> for ApiError {
    fn from(err: GatewayError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            GatewayError::MissingTenant(_) | GatewayError::InvalidTenantId { .. } => {
                StatusCode::BAD_REQUEST
            }
            GatewayError::BackendUnavailable(_) | GatewayError::StorageUnavailable(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            GatewayError::Upstream(_) => StatusCode::BAD_GATEWAY,
            GatewayError::TenantNotFound(_) => StatusCode::NOT_FOUND,
            GatewayError::TenantExists(_) => StatusCode::CONFLICT,
        };
        let body = ErrorBody {
            error_code: self.0.code().to_string(),
            message: self.0.to_string(),
            retryable: self.0.is_retryable(),
        };
        let mut response = (status, Json(body)).into_response();
        if self.0.is_retryable() {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from_static("1"));
        }
        response
    }
}

/// Tenant as shown by the administration routes.
#[derive(Debug, Serialize, Deserialize)]
pub struct TenantView {
    pub tenant_id: String,
    pub name: Option<String>,
    pub schema: String,
    pub artifact_root: String,
    pub created_at: String,
}

impl From<&Tenant> for TenantView {
    fn from(t: &Tenant) -> Self {
        Self {
            tenant_id: t.id.to_string(),
            name: t.name.clone(),
            schema: t.schema.to_string(),
            artifact_root: t.artifact_root.to_string(),
            created_at: t.created_at.to_rfc3339(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateTenantRequest {
    pub tenant_id: String,
    #[serde(default)]
    pub name: Option<String>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/gateway/healthz", get(healthz))
        .route("/gateway/readyz", get(readyz))
        .route("/gateway/tenants", get(list_tenants).post(create_tenant))
        .route("/gateway/tenants/{tenant_id}", get(get_tenant))
        .fallback(proxy)
        .with_state(state)
}

/// Serve `router` on `addr` until `shutdown` resolves.
pub async fn serve(
    addr: SocketAddr,
    router: Router,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, "gateway listening");
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
}

async fn healthz() -> &'static str {
    "ok"
}

async fn readyz(State(state): State<AppState>) -> Result<&'static str, ApiError> {
    state.gateway.registry().provisioner().store().ping().await?;
    Ok("ready")
}

async fn list_tenants(State(state): State<AppState>) -> Json<Vec<TenantView>> {
    let tenants = state.gateway.registry().list();
    Json(tenants.iter().map(|t| TenantView::from(&**t)).collect())
}

async fn get_tenant(
    State(state): State<AppState>,
    Path(tenant_id): Path<String>,
) -> Result<Json<TenantView>, ApiError> {
    let id = TenantId::parse(&tenant_id)?;
    let tenant = state.gateway.registry().get(&id)?;
    Ok(Json(TenantView::from(&*tenant)))
}

async fn create_tenant(
    State(state): State<AppState>,
    Json(req): Json<CreateTenantRequest>,
) -> Result<(StatusCode, Json<TenantView>), ApiError> {
    let id = TenantId::parse(&req.tenant_id)?;
    let tenant = state.gateway.registry().create(&id, req.name).await?;
    Ok((StatusCode::CREATED, Json(TenantView::from(&*tenant))))
}

async fn proxy(State(state): State<AppState>, request: Request) -> Response {
    let (parts, body) = request.into_parts();
    let bytes = match axum::body::to_bytes(body, state.max_body_bytes).await {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(error = %e, "rejecting request body");
            let body = ErrorBody {
                error_code: "PAYLOAD_TOO_LARGE".to_string(),
                message: format!("request body exceeds {} bytes", state.max_body_bytes),
                retryable: false,
            };
            return (StatusCode::PAYLOAD_TOO_LARGE, Json(body)).into_response();
        }
    };

    match state
        .gateway
        .handle(axum::http::Request::from_parts(parts, bytes))
        .await
    {
        Ok(response) => response.map(Body::from),
        Err(err) => {
            if !matches!(
                err,
                GatewayError::MissingTenant(_) | GatewayError::InvalidTenantId { .. }
            ) {
                warn!(error = %err, "request not forwarded");
            }
            ApiError(err).into_response()
        }
    }
}
