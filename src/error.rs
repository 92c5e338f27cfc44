use thiserror::Error;

/// Errors from the embedding service. `Unavailable` is the only variant the
/// orchestrator treats as non-fatal — everything else indicates a bug.
#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("embedding provider unavailable: {0}")]
    Unavailable(String),
    #[error("embedding request failed: {0}")]
    Request(String),
    #[error("embedding dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },
}

/// Errors from the vector store. `Unavailable` is recovered by the
/// orchestrator (the semantic stage runs without persistence); the other
/// variants propagate since they indicate misuse, not a degraded dependency.
#[derive(Debug, Error)]
pub enum VectorStoreError {
    #[error("vector store unavailable: {0}")]
    Unavailable(String),
    #[error("invalid query: {0}")]
    InvalidInput(String),
}

#[derive(Debug, Error)]
pub enum CompressorError {
    #[error("compression backend unavailable: {0}")]
    Unavailable(String),
    #[error("compression failed: {0}")]
    Failed(String),
}

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache backend error: {0}")]
    Backend(String),
}

/// Errors from the dashboard client (tenant config fetch, event emission,
/// per-user API key validation). Every variant is recovered by the caller;
/// this type exists for logging, not control flow.
#[derive(Debug, Error)]
pub enum DashboardError {
    #[error("dashboard unreachable: {0}")]
    Unreachable(String),
    #[error("dashboard request timed out")]
    Timeout,
    #[error("dashboard returned {status}: {body}")]
    ApiError { status: u16, body: String },
}

/// Errors from a provider adapter (the `/v1/chat` forwarding layer).
/// `Unavailable` conditions elsewhere in the pipeline never use this type
/// — it's specific to the out-of-scope completion-forwarding interface.
#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("request failed: {0}")]
    Request(String),
    #[error("provider returned {status}: {body}")]
    ApiError { status: u16, body: String },
    #[error("failed to parse provider response: {0}")]
    Parse(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingVar(String),
    #[error("invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },
}

/// Top-level error surfaced by the pipeline and the HTTP façade. Most
/// dependency failures never reach this type — they're absorbed as a
/// disabled stage and a route label instead. This is what's left once
/// that absorption has already happened.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("invalid request: {0}")]
    InvalidInput(String),
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("request timed out")]
    Timeout,
    #[error("internal error: {0}")]
    Internal(String),
    #[error("provider error: {0}")]
    Provider(#[from] InferenceError),
}

impl From<ConfigError> for PipelineError {
    fn from(err: ConfigError) -> Self {
        PipelineError::InvalidInput(err.to_string())
    }
}
