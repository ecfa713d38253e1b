use thiserror::Error;

/// Errors from state store operations (used by the store trait in
/// reconcile-core and its adapters in reconcile-infra).
#[derive(Debug, Error)]
pub enum StateError {
    #[error("state i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("state serialization error: {0}")]
    Serialization(String),

    /// Integrity violation; the run must stop and the state be repaired by hand.
    #[error("state corrupted: {0}")]
    Corruption(String),

    #[error("state backend error: {0}")]
    Backend(String),
}

impl StateError {
    pub fn is_corruption(&self) -> bool {
        matches!(self, StateError::Corruption(_))
    }
}

/// Failure reported by a resource provider or job runner.
///
/// `retryable` marks transient failures (timeouts, throttling) that the
/// executor retries with backoff; anything else fails the node at once.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ProviderError {
    pub message: String,
    pub retryable: bool,
}

impl ProviderError {
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: true,
        }
    }

    pub fn terminal(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: false,
        }
    }
}
