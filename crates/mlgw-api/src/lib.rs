//! mlgw-api: tenant-routing gateway, HTTP surface, tracking-backend adapter.

pub mod app;
pub mod backend;
pub mod context;
pub mod gateway;
pub mod http;

pub use app::{build_gateway, build_gateway_with, namespace_store};
pub use backend::{
    BackendRequest, BackendResponse, HttpTrackingBackend, TrackingBackend, scoped_store_uri,
};
pub use context::RequestContext;
pub use gateway::{Gateway, RoutedTenant, extract_tenant};
pub use http::{AppState, router, serve};
