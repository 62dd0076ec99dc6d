//! Error types for the PatroniCluster controller

use thiserror::Error;

/// Error variants are named with the `Error` suffix for clarity (e.g., `KubeError`, `ValidationError`).
#[allow(clippy::enum_variant_names)]
#[derive(Error, Debug)]
pub enum Error {
    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Missing object key: {0}")]
    MissingObjectKey(&'static str),

    #[error("Malformed queue key: {0}")]
    MalformedKey(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Cache sync failed: {0}")]
    CacheSyncError(String),
}

impl Error {
    /// Check if this error is retryable
    ///
    /// The worker pool retries every error up to its ceiling; this only
    /// decides how loudly a failure is logged.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::KubeError(e) => match e {
                kube::Error::Api(api_err) => {
                    // 4xx errors (except 409 Conflict, 429 TooManyRequests) are usually not retryable
                    let code = api_err.code;
                    if (400..500).contains(&code) {
                        return code == 404 || code == 409 || code == 429;
                    }
                    true
                }
                _ => true,
            },
            // The cache may catch up with an object it has not seen yet
            Error::NotFound(_) => true,
            Error::CacheSyncError(_) => true,
            Error::SerializationError(_)
            | Error::MissingObjectKey(_)
            | Error::MalformedKey(_)
            | Error::InvalidConfig(_)
            | Error::ValidationError(_) => false,
        }
    }

    /// Whether a create failed because the object is already there
    pub fn is_already_exists(&self) -> bool {
        matches!(self, Error::KubeError(kube::Error::Api(api_err)) if api_err.code == 409 && api_err.reason == "AlreadyExists")
    }

    /// Whether the error means the object does not exist
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::NotFound(_) => true,
            Error::KubeError(kube::Error::Api(api_err)) => api_err.code == 404,
            _ => false,
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Process-wide sink for errors that leave the reconcile loop
///
/// Covers keys that could not be computed and keys dropped after exhausting
/// their retries. Nothing is propagated further; the caller carries on.
pub fn handle_error(key: &str, error: &Error, metrics: Option<&crate::health::Metrics>) {
    tracing::error!(key, error = %error, retryable = error.is_retryable(), "Dropping work item");
    if let Some(metrics) = metrics {
        metrics.record_dropped();
    }
}
