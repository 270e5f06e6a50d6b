use thiserror::Error;

/// Failure surface shared by every vector store backend.
///
/// Absence is not an error: `get` on an unknown id returns `None` and
/// never produces a variant here.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The collection exists with a different vector dimension and
    /// recreation was not allowed.
    #[error("collection '{name}' declares dimension {actual}, expected {expected}")]
    SchemaMismatch {
        name: String,
        expected: usize,
        actual: usize,
    },

    /// Transport-level failure reaching an HTTP backend.
    #[error("backend unreachable: {0}")]
    Transport(#[from] reqwest::Error),

    /// Transport or command failure on the redis backend.
    #[error("redis backend error: {0}")]
    Redis(#[from] redis::RedisError),

    /// The backend answered, but not with success: non-2xx status or an
    /// in-body error code.
    #[error("backend returned {status}: {body}")]
    Protocol { status: u16, body: String },

    /// The backend answered with a body this client cannot decode.
    #[error("failed to decode backend response: {0}")]
    Decode(#[from] serde_json::Error),

    /// Caller-side input rejected before any write.
    #[error("invalid input: {0}")]
    Validation(String),
}
