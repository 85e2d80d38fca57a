use thiserror::Error;

#[derive(Error, Debug)]
pub enum KubeSkippyError {
    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    #[error("metrics query failed: {0}")]
    MetricsError(String),

    #[error("advisor request failed: {0}")]
    AdvisorError(String),

    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("JSON serialization error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    ConfigError(String),

    #[error("safety check denied: {0}")]
    SafetyDenied(String),

    #[error("validation error: {0}")]
    ValidationError(String),

    #[error("remediation executor error: {0}")]
    ExecutorError(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("resource not found: {0}")]
    NotFound(String),

    #[error("invalid state transition from {from:?} to {to:?}")]
    InvalidStateTransition { from: String, to: String },

    #[error("internal error: {0}")]
    InternalError(String),
}

pub type Result<T> = std::result::Result<T, KubeSkippyError>;
