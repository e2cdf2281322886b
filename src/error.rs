// Error taxonomy for the automation engine.
//
// Failures are bulkheaded per subject/rule/message: a storage failure
// propagates to the caller, a rule evaluation failure is logged and
// isolated, a transport failure enters the retry ladder.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

/// Durable-store failures. Never swallowed: `record` and `insert` callers
/// see these directly so no event or message is silently dropped.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("constraint conflict: {0}")]
    Conflict(String),
    #[error("corrupt stored value: {0}")]
    Corrupt(String),
}

/// Outbound transport failures, as reported by the email/SMS providers.
#[derive(Error, Debug, Clone)]
pub enum TransportError {
    #[error("rate limited by provider")]
    RateLimited,
    #[error("invalid recipient: {0}")]
    InvalidRecipient(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("transport timed out")]
    Timeout,
}

impl TransportError {
    /// Permanent failures skip the retry ladder entirely.
    pub fn is_permanent(&self) -> bool {
        matches!(self, TransportError::InvalidRecipient(_))
    }
}

/// Text-generation capability failures. Never fatal: the dispatcher falls
/// back to the static template rendering.
#[derive(Error, Debug, Clone)]
pub enum GenerationError {
    #[error("generation timed out")]
    Timeout,
    #[error("generation failed: {0}")]
    Failed(String),
}

#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("rule '{rule}' evaluation failed: {message}")]
    RuleEvaluation { rule: String, message: String },
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Generation(#[from] GenerationError),
    #[error("{0} not found")]
    NotFound(String),
    #[error("invalid request: {0}")]
    BadRequest(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl EngineError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            EngineError::Storage(_) => StatusCode::SERVICE_UNAVAILABLE,
            EngineError::NotFound(_) => StatusCode::NOT_FOUND,
            EngineError::BadRequest(_) => StatusCode::BAD_REQUEST,
            EngineError::Transport(_) | EngineError::Generation(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            EngineError::Storage(_) => "STORAGE_ERROR",
            EngineError::RuleEvaluation { .. } => "RULE_EVALUATION_ERROR",
            EngineError::Transport(_) => "TRANSPORT_ERROR",
            EngineError::Generation(_) => "GENERATION_ERROR",
            EngineError::NotFound(_) => "NOT_FOUND",
            EngineError::BadRequest(_) => "BAD_REQUEST",
            EngineError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl IntoResponse for EngineError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = match &self {
            // Internal detail stays in the logs, not in the response body.
            EngineError::Storage(e) => {
                tracing::error!("storage error: {}", e);
                "durable store unavailable".to_string()
            }
            EngineError::Internal(msg) => {
                tracing::error!("internal error: {}", msg);
                "an internal error occurred".to_string()
            }
            other => other.to_string(),
        };

        let body = serde_json::json!({
            "code": self.error_code(),
            "message": message,
            "timestamp": chrono::Utc::now().to_rfc3339(),
        });

        (status, Json(body)).into_response()
    }
}

/// Result alias for handlers and engine entry points.
pub type EngineResult<T> = Result<T, EngineError>;
