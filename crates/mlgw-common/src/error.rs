use thiserror::Error;

/// Top-level error type for the gateway.
///
/// Every variant is `Clone` so a single provisioning outcome can be handed to
/// all requests waiting on the same tenant.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    #[error("missing tenant identifier: {0}")]
    MissingTenant(String),

    #[error("invalid tenant id '{id}': {reason}")]
    InvalidTenantId { id: String, reason: String },

    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("upstream error: {0}")]
    Upstream(String),

    #[error("tenant not found: {0}")]
    TenantNotFound(String),

    #[error("tenant already exists: {0}")]
    TenantExists(String),
}

pub type GatewayResult<T> = Result<T, GatewayError>;

impl GatewayError {
    pub fn invalid_tenant(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidTenantId {
            id: id.into(),
            reason: reason.into(),
        }
    }

    /// Transient infrastructure failures; the caller may retry with backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::BackendUnavailable(_) | Self::StorageUnavailable(_)
        )
    }

    /// Stable machine-readable code used in HTTP error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            Self::MissingTenant(_) => "MISSING_TENANT",
            Self::InvalidTenantId { .. } => "INVALID_TENANT_ID",
            Self::BackendUnavailable(_) => "BACKEND_UNAVAILABLE",
            Self::StorageUnavailable(_) => "STORAGE_UNAVAILABLE",
            Self::Upstream(_) => "UPSTREAM_ERROR",
            Self::TenantNotFound(_) => "TENANT_NOT_FOUND",
            Self::TenantExists(_) => "TENANT_EXISTS",
        }
    }
}
