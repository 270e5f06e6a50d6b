use memnet_llm::LlmError;
use memnet_store::StoreError;
use thiserror::Error;

/// Failure surface of the memory service: its own request validation
/// plus whatever the collaborators raise, passed through unchanged. No
/// retries or backoff happen at this layer.
#[derive(Debug, Error)]
pub enum MemoryError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Llm(#[from] LlmError),

    #[error("invalid request: {0}")]
    Validation(String),
}
