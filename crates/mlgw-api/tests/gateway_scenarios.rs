use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderValue, Method, Request, Response, StatusCode};
use mlgw_api::http::ErrorBody;
use mlgw_api::{
    AppState, BackendRequest, BackendResponse, Gateway, RequestContext, TrackingBackend,
    build_gateway, build_gateway_with, router,
};
use mlgw_common::{GatewayConfig, GatewayError, GatewayResult, TenantId, TenantSource};
use mlgw_coord::MemoryNamespaceStore;

// ---- Fixtures ----

/// A call as observed by the fake backend.
#[derive(Debug, Clone)]
struct Seen {
    tenant: String,
    schema: String,
    artifact_root: String,
    path_and_query: String,
    body: Bytes,
}

/// Backend that records every call and answers with a fixed status.
struct RecordingBackend {
    calls: Mutex<Vec<Seen>>,
    status: StatusCode,
}

impl RecordingBackend {
    fn new() -> Self {
        Self::answering(StatusCode::OK)
    }

    fn answering(status: StatusCode) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            status,
        }
    }

    fn calls(&self) -> Vec<Seen> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl TrackingBackend for RecordingBackend {
    async fn call(
        &self,
        ctx: &RequestContext,
        request: BackendRequest,
    ) -> GatewayResult<BackendResponse> {
        self.calls.lock().unwrap().push(Seen {
            tenant: ctx.tenant_id().to_string(),
            schema: ctx.schema().to_string(),
            artifact_root: ctx.artifact_root().to_string(),
            path_and_query: request.path_and_query,
            body: request.body,
        });
        let mut response = Response::new(Bytes::from_static(b"{\"ok\":true}"));
        *response.status_mut() = self.status;
        response
            .headers_mut()
            .insert(http::header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
        response
            .headers_mut()
            .insert("x-upstream", HeaderValue::from_static("recording"));
        Ok(response)
    }
}

struct Harness {
    gateway: Arc<Gateway>,
    store: Arc<MemoryNamespaceStore>,
    backend: Arc<RecordingBackend>,
    dir: tempfile::TempDir,
}

impl Harness {
    fn base(&self) -> &Path {
        self.dir.path()
    }
}

async fn harness_with(source: TenantSource, backend: RecordingBackend) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let mut config = GatewayConfig::new("memory://", "http://tracking:5000");
    config.artifact_base = dir.path().to_path_buf();
    config.tenant_source = source;
    config.provision_wait_ms = 2_000;

    let store = Arc::new(MemoryNamespaceStore::new());
    let backend = Arc::new(backend);
    let gateway = build_gateway_with(&config, store.clone(), backend.clone())
        .await
        .unwrap();
    Harness {
        gateway: Arc::new(gateway),
        store,
        backend,
        dir,
    }
}

async fn harness() -> Harness {
    harness_with(TenantSource::default(), RecordingBackend::new()).await
}

fn tenant_request(method: Method, uri: &str, tenant: Option<&str>, body: &'static [u8]) -> Request<Bytes> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(t) = tenant {
        builder = builder.header("x-tenant-id", t);
    }
    builder.body(Bytes::from_static(body)).unwrap()
}

// ---- Gateway ----

#[tokio::test]
async fn first_write_provisions_then_forwards() {
    let h = harness().await;
    let req = tenant_request(
        Method::POST,
        "/api/2.0/mlflow/experiments/create",
        Some("acme-corp"),
        br#"{"name":"exp1"}"#,
    );
    let response = h.gateway.handle(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    assert!(h.store.contains("acme_corp"));
    assert!(h.base().join("acme-corp").is_dir());

    let calls = h.backend.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].tenant, "acme-corp");
    assert_eq!(calls[0].schema, "acme_corp");
    assert_eq!(
        calls[0].artifact_root,
        h.base().join("acme-corp").display().to_string()
    );
    assert_eq!(calls[0].path_and_query, "/api/2.0/mlflow/experiments/create");
    assert_eq!(&calls[0].body[..], br#"{"name":"exp1"}"#);

    // Second request for the same tenant does not touch the store again.
    let again = tenant_request(Method::GET, "/api/2.0/mlflow/experiments/search", Some("acme-corp"), b"");
    h.gateway.handle(again).await.unwrap();
    assert_eq!(h.store.create_calls(), 1);
    assert_eq!(h.backend.calls().len(), 2);
}

#[tokio::test]
async fn read_request_also_provisions() {
    let h = harness().await;
    let req = tenant_request(Method::GET, "/api/2.0/mlflow/experiments/search", Some("beta"), b"");
    h.gateway.handle(req).await.unwrap();
    assert!(h.store.contains("beta"));
    assert_eq!(h.gateway.registry().list().len(), 1);
}

#[tokio::test]
async fn invalid_tenant_is_rejected_without_side_effects() {
    let h = harness().await;
    let req = tenant_request(Method::POST, "/api/2.0/mlflow/runs/create", Some("Acme Corp!"), b"{}");
    let err = h.gateway.handle(req).await.unwrap_err();
    assert!(matches!(err, GatewayError::InvalidTenantId { .. }));
    assert_eq!(h.store.create_calls(), 0);
    assert!(h.backend.calls().is_empty());
    assert!(h.gateway.registry().list().is_empty());
}

#[tokio::test]
async fn missing_tenant_never_reaches_backend() {
    let h = harness().await;
    let req = tenant_request(Method::GET, "/api/2.0/mlflow/experiments/search", None, b"");
    let err = h.gateway.handle(req).await.unwrap_err();
    assert!(matches!(err, GatewayError::MissingTenant(_)));
    assert!(h.backend.calls().is_empty());
}

#[tokio::test]
async fn store_outage_fails_retryably_then_recovers() {
    let h = harness().await;
    h.store.set_online(false);

    let req = || tenant_request(Method::GET, "/api/2.0/mlflow/experiments/search", Some("gamma"), b"");
    let err = h.gateway.handle(req()).await.unwrap_err();
    assert!(matches!(err, GatewayError::BackendUnavailable(_)));
    assert!(err.is_retryable());
    assert!(h.backend.calls().is_empty());

    h.store.set_online(true);
    h.gateway.handle(req()).await.unwrap();
    assert!(h.store.contains("gamma"));
    assert_eq!(h.backend.calls().len(), 1);
}

#[tokio::test]
async fn tenants_are_isolated_from_each_other() {
    let h = harness().await;
    for tenant in ["acme-corp", "globex"] {
        let req = tenant_request(Method::POST, "/api/2.0/mlflow/runs/create", Some(tenant), b"{}");
        h.gateway.handle(req).await.unwrap();
    }
    let calls = h.backend.calls();
    assert_eq!(calls[0].schema, "acme_corp");
    assert_eq!(calls[1].schema, "globex");
    assert_ne!(calls[0].artifact_root, calls[1].artifact_root);
}

#[tokio::test]
async fn upstream_status_passes_through_unchanged() {
    let h = harness_with(
        TenantSource::default(),
        RecordingBackend::answering(StatusCode::NOT_FOUND),
    )
    .await;
    let req = tenant_request(Method::GET, "/api/2.0/mlflow/runs/get?run_id=x", Some("acme-corp"), b"");
    let response = h.gateway.handle(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn path_segment_tenant_is_stripped_before_forwarding() {
    let h = harness_with(TenantSource::PathSegment, RecordingBackend::new()).await;
    let req = tenant_request(
        Method::GET,
        "/acme-corp/api/2.0/mlflow/runs/search?max_results=5",
        None,
        b"",
    );
    h.gateway.handle(req).await.unwrap();
    let calls = h.backend.calls();
    assert_eq!(calls[0].tenant, "acme-corp");
    assert_eq!(calls[0].path_and_query, "/api/2.0/mlflow/runs/search?max_results=5");
}

#[tokio::test]
async fn ledger_restores_tenants_after_restart() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = GatewayConfig::new("memory://", "http://tracking:5000");
    config.artifact_base = dir.path().to_path_buf();

    let first = build_gateway_with(
        &config,
        Arc::new(MemoryNamespaceStore::new()),
        Arc::new(RecordingBackend::new()),
    )
    .await
    .unwrap();
    first
        .registry()
        .create(&TenantId::parse("acme-corp").unwrap(), Some("Acme".into()))
        .await
        .unwrap();

    let store = Arc::new(MemoryNamespaceStore::new());
    let second = build_gateway_with(&config, store.clone(), Arc::new(RecordingBackend::new()))
        .await
        .unwrap();
    let tenants = second.registry().list();
    assert_eq!(tenants.len(), 1);
    assert_eq!(tenants[0].name.as_deref(), Some("Acme"));

    let req = tenant_request(Method::GET, "/api/2.0/mlflow/experiments/search", Some("acme-corp"), b"");
    second.handle(req).await.unwrap();
    assert_eq!(store.create_calls(), 0);
}

// ---- HTTP router ----

/// Serve `app` on an ephemeral port and return its base URL.
async fn spawn(app: axum::Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    format!("http://{addr}")
}

async fn spawn_app(h: &Harness, max_body_bytes: usize) -> String {
    spawn(router(AppState::new(Arc::clone(&h.gateway), max_body_bytes))).await
}

#[tokio::test]
async fn router_maps_client_errors_to_400() {
    let h = harness().await;
    let base = spawn_app(&h, 1024).await;
    let client = reqwest::Client::new();

    let response = client
        .get(format!("{base}/api/2.0/mlflow/experiments/search"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: ErrorBody = serde_json::from_slice(&response.bytes().await.unwrap()).unwrap();
    assert_eq!(body.error_code, "MISSING_TENANT");
    assert!(!body.retryable);

    let response = client
        .get(format!("{base}/api/2.0/mlflow/experiments/search"))
        .header("x-tenant-id", "Acme Corp!")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: ErrorBody = serde_json::from_slice(&response.bytes().await.unwrap()).unwrap();
    assert_eq!(body.error_code, "INVALID_TENANT_ID");
}

#[tokio::test]
async fn router_marks_outage_retryable() {
    let h = harness().await;
    h.store.set_online(false);
    let base = spawn_app(&h, 1024).await;

    let response = reqwest::Client::new()
        .get(format!("{base}/api/2.0/mlflow/experiments/search"))
        .header("x-tenant-id", "acme-corp")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(response.headers()[http::header::RETRY_AFTER], "1");
    let body: ErrorBody = serde_json::from_slice(&response.bytes().await.unwrap()).unwrap();
    assert_eq!(body.error_code, "BACKEND_UNAVAILABLE");
    assert!(body.retryable);
}

#[tokio::test]
async fn router_forwards_and_rejects_oversized_bodies() {
    let h = harness().await;
    let base = spawn_app(&h, 4).await;
    let client = reqwest::Client::new();

    let ok = client
        .post(format!("{base}/api/2.0/mlflow/runs/create"))
        .header("x-tenant-id", "acme-corp")
        .body("{}")
        .send()
        .await
        .unwrap();
    assert_eq!(ok.status(), StatusCode::OK);
    assert_eq!(ok.headers()["x-upstream"], "recording");
    assert_eq!(ok.headers()[http::header::CONTENT_TYPE], "application/json");
    assert_eq!(&ok.bytes().await.unwrap()[..], b"{\"ok\":true}");

    let too_big = client
        .post(format!("{base}/api/2.0/mlflow/runs/create"))
        .header("x-tenant-id", "acme-corp")
        .body("0123456789")
        .send()
        .await
        .unwrap();
    assert_eq!(too_big.status(), StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(h.backend.calls().len(), 1);
}

#[tokio::test]
async fn admin_routes_manage_tenants() {
    let h = harness().await;
    let base = spawn_app(&h, 1024).await;
    let client = reqwest::Client::new();

    let health = client.get(format!("{base}/gateway/healthz")).send().await.unwrap();
    assert_eq!(health.status(), StatusCode::OK);
    assert_eq!(health.text().await.unwrap(), "ok");

    let create = || {
        client
            .post(format!("{base}/gateway/tenants"))
            .header("content-type", "application/json")
            .body(r#"{"tenant_id":"acme-corp","name":"Acme"}"#)
            .send()
    };
    let created = create().await.unwrap();
    assert_eq!(created.status(), StatusCode::CREATED);
    let view: serde_json::Value = serde_json::from_slice(&created.bytes().await.unwrap()).unwrap();
    assert_eq!(view["schema"], "acme_corp");
    assert_eq!(view["name"], "Acme");

    assert_eq!(create().await.unwrap().status(), StatusCode::CONFLICT);

    let fetched = client
        .get(format!("{base}/gateway/tenants/acme-corp"))
        .send()
        .await
        .unwrap();
    assert_eq!(fetched.status(), StatusCode::OK);

    let unknown = client
        .get(format!("{base}/gateway/tenants/globex"))
        .send()
        .await
        .unwrap();
    assert_eq!(unknown.status(), StatusCode::NOT_FOUND);
    // A lookup never provisions.
    assert!(!h.store.contains("globex"));

    let listed = client.get(format!("{base}/gateway/tenants")).send().await.unwrap();
    let list: Vec<serde_json::Value> = serde_json::from_slice(&listed.bytes().await.unwrap()).unwrap();
    assert_eq!(list.len(), 1);
    assert_eq!(list[0]["tenant_id"], "acme-corp");
}

#[tokio::test]
async fn readiness_follows_store() {
    let h = harness().await;
    let base = spawn_app(&h, 1024).await;
    let client = reqwest::Client::new();
    let url = format!("{base}/gateway/readyz");

    assert_eq!(client.get(&url).send().await.unwrap().status(), StatusCode::OK);
    h.store.set_online(false);
    assert_eq!(
        client.get(&url).send().await.unwrap().status(),
        StatusCode::SERVICE_UNAVAILABLE
    );
}

// ---- HTTP backend ----

/// Upstream echoing the namespace headers it received, answering with a
/// custom header, a content type and one hop-by-hop header.
async fn spawn_echo_upstream() -> String {
    use axum::response::Redirect;
    use axum::routing::{any, get};

    async fn echo(headers: http::HeaderMap) -> (StatusCode, [(&'static str, &'static str); 3], String) {
        let get = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .unwrap_or("")
                .to_string()
        };
        (
            StatusCode::IM_A_TEAPOT,
            [
                ("x-upstream", "1"),
                ("content-type", "text/plain; charset=utf-8"),
                ("proxy-authenticate", "Basic"),
            ],
            format!(
                "{}|{}|{}",
                get("x-mlgw-tenant"),
                get("x-mlgw-schema"),
                get("x-mlgw-artifact-root")
            ),
        )
    }

    let upstream = axum::Router::new()
        .route("/start", get(|| async { Redirect::temporary("/elsewhere") }))
        .route("/elsewhere", get(|| async { "followed" }))
        .route("/{*path}", any(echo));
    spawn(upstream).await
}

async fn gateway_for(upstream: &str, dir: &Path) -> Gateway {
    let mut config = GatewayConfig::new("memory://", upstream);
    config.artifact_base = dir.to_path_buf();
    build_gateway(&config).await.unwrap()
}

#[tokio::test]
async fn http_backend_injects_namespace_headers() {
    let upstream = spawn_echo_upstream().await;
    let dir = tempfile::tempdir().unwrap();
    let gateway = gateway_for(&upstream, dir.path()).await;

    let req = Request::builder()
        .uri("/api/2.0/mlflow/experiments/search")
        .header("x-tenant-id", "acme-corp")
        .header("x-mlgw-schema", "globex")
        .body(Bytes::new())
        .unwrap();
    let response = gateway.handle(req).await.unwrap();

    assert_eq!(response.status(), StatusCode::IM_A_TEAPOT);
    let body = String::from_utf8(response.body().to_vec()).unwrap();
    assert_eq!(
        body,
        format!("acme-corp|acme_corp|{}", dir.path().join("acme-corp").display())
    );
}

#[tokio::test]
async fn http_backend_returns_upstream_headers() {
    let upstream = spawn_echo_upstream().await;
    let dir = tempfile::tempdir().unwrap();
    let gateway = gateway_for(&upstream, dir.path()).await;

    let req = tenant_request(Method::GET, "/api/2.0/mlflow/runs/get", Some("acme-corp"), b"");
    let response = gateway.handle(req).await.unwrap();
    assert_eq!(response.headers()["x-upstream"], "1");
    assert_eq!(
        response.headers()[http::header::CONTENT_TYPE],
        "text/plain; charset=utf-8"
    );
    assert!(!response.headers().contains_key(http::header::PROXY_AUTHENTICATE));

    // Same through the served router.
    let base = spawn(router(AppState::new(Arc::new(gateway), 1024))).await;
    let served = reqwest::Client::new()
        .get(format!("{base}/api/2.0/mlflow/runs/get"))
        .header("x-tenant-id", "acme-corp")
        .send()
        .await
        .unwrap();
    assert_eq!(served.status(), StatusCode::IM_A_TEAPOT);
    assert_eq!(served.headers()["x-upstream"], "1");
    assert_eq!(
        served.headers()[http::header::CONTENT_TYPE],
        "text/plain; charset=utf-8"
    );
    assert!(!served.headers().contains_key(http::header::PROXY_AUTHENTICATE));
}

#[tokio::test]
async fn http_backend_does_not_follow_redirects() {
    let upstream = spawn_echo_upstream().await;
    let dir = tempfile::tempdir().unwrap();
    let gateway = gateway_for(&upstream, dir.path()).await;

    let req = tenant_request(Method::GET, "/start", Some("acme-corp"), b"");
    let response = gateway.handle(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
    assert_eq!(response.headers()[http::header::LOCATION], "/elsewhere");
    assert_ne!(&response.body()[..], b"followed");
}

#[tokio::test]
async fn http_backend_unreachable_is_upstream_error() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = GatewayConfig::new("memory://", "http://127.0.0.1:1");
    config.artifact_base = dir.path().to_path_buf();
    config.upstream_timeout_ms = 2_000;
    let gateway = build_gateway(&config).await.unwrap();

    let req = tenant_request(Method::GET, "/api/2.0/mlflow/experiments/search", Some("acme-corp"), b"");
    let err = gateway.handle(req).await.unwrap_err();
    assert!(matches!(err, GatewayError::Upstream(_)));
    // The namespace was still provisioned before the forward failed.
    assert!(gateway.registry().get(&TenantId::parse("acme-corp").unwrap()).is_ok());

}
