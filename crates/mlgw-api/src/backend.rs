//! Backend adapter: issues a tenant-scoped call against the shared tracking server.
//!
//! The adapter holds no tenant state. Each call is parameterized entirely by
//! the `RequestContext` it receives, so one instance serves all tenants
//! concurrently.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::header::{self, HeaderMap, HeaderName, HeaderValue};
use http::{Method, Response};
use mlgw_common::{GatewayError, GatewayResult, SchemaName};
use tracing::debug;

use crate::context::RequestContext;

/// Tenant the call is executed for.
pub const TENANT_HEADER: &str = "x-mlgw-tenant";
/// Schema the upstream must use as its active search path.
pub const SCHEMA_HEADER: &str = "x-mlgw-schema";
/// Artifact root the upstream must write this call's artifacts under.
pub const ARTIFACT_ROOT_HEADER: &str = "x-mlgw-artifact-root";

const HOP_BY_HOP: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// A request as it will be replayed against the backend.
#[derive(Debug, Clone)]
pub struct BackendRequest {
    pub method: Method,
    /// Path plus optional query, always starting with `/`.
    pub path_and_query: String,
    pub headers: HeaderMap,
    pub body: Bytes,
}

pub type BackendResponse = Response<Bytes>;

/// The shared tracking backend, bound to one tenant per call.
#[async_trait]
pub trait TrackingBackend: Send + Sync {
    /// Execute `request` inside the tenant namespace described by `ctx`.
    ///
    /// Any response the backend produces, whatever its status, is returned
    /// as `Ok` unchanged. `Err` means the backend could not be reached.
    async fn call(&self, ctx: &RequestContext, request: BackendRequest)
    -> GatewayResult<BackendResponse>;
}

/// Tracking server reached over HTTP.
pub struct HttpTrackingBackend {
    client: reqwest::Client,
    base_url: String,
}

impl HttpTrackingBackend {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> GatewayResult<Self> {
        // Redirects go back to the caller untouched; following them would
        // resend the namespace headers to whatever `Location` names.
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| GatewayError::Upstream(format!("cannot build http client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl TrackingBackend for HttpTrackingBackend {
    async fn call(
        &self,
        ctx: &RequestContext,
        request: BackendRequest,
    ) -> GatewayResult<BackendResponse> {
        let url = format!("{}{}", self.base_url, request.path_and_query);
        let mut headers = strip_hop_by_hop(request.headers);
        headers.remove(header::HOST);
        headers.remove(header::CONTENT_LENGTH);
        bind_namespace(&mut headers, ctx)?;

        debug!(request_id = %ctx.request_id(), method = %request.method, %url, "forwarding");
        let upstream = self
            .client
            .request(request.method, &url)
            .headers(headers)
            .body(request.body)
            .send()
            .await
            .map_err(|e| GatewayError::Upstream(format!("{url}: {e}")))?;

        let status = upstream.status();
        let mut headers = strip_hop_by_hop(upstream.headers().clone());
        headers.remove(header::CONTENT_LENGTH);
        let body = upstream
            .bytes()
            .await
            .map_err(|e| GatewayError::Upstream(format!("{url}: reading body: {e}")))?;

        let mut response = Response::new(body);
        *response.status_mut() = status;
        *response.headers_mut() = headers;
        Ok(response)
    }
}

/// Overwrite the namespace binding headers, discarding any value a client
/// may have supplied itself.
pub fn bind_namespace(headers: &mut HeaderMap, ctx: &RequestContext) -> GatewayResult<()> {
    let root = ctx.artifact_root().to_string();
    let pairs = [
        (TENANT_HEADER, ctx.tenant_id().as_str().to_string()),
        (SCHEMA_HEADER, ctx.schema().as_str().to_string()),
        (ARTIFACT_ROOT_HEADER, root),
    ];
    for (name, value) in pairs {
        let value = HeaderValue::from_str(&value).map_err(|_| {
            GatewayError::Upstream(format!("cannot encode {name} value '{value}' as a header"))
        })?;
        headers.insert(HeaderName::from_static(name), value);
    }
    Ok(())
}

fn strip_hop_by_hop(mut headers: HeaderMap) -> HeaderMap {
    for name in HOP_BY_HOP {
        headers.remove(name);
    }
    headers
}

/// Tenant-scoped connection string: `store_url` with `schema` as search path.
pub fn scoped_store_uri(store_url: &str, schema: &SchemaName) -> String {
    let sep = if store_url.contains('?') { '&' } else { '?' };
    format!("{store_url}{sep}options=-csearch_path%3D{schema}")
}
