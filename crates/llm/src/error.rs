use thiserror::Error;

#[derive(Debug, Error)]
pub enum LlmError {
    /// Transport-level failure reaching the model endpoint.
    #[error("model endpoint unreachable: {0}")]
    Transport(#[from] reqwest::Error),

    /// The endpoint answered with a non-2xx status.
    #[error("model endpoint returned {status}: {body}")]
    Protocol { status: u16, body: String },

    /// The endpoint answered 2xx but the body is not the expected shape
    /// (missing choices, missing embedding data, …).
    #[error("malformed model response: {0}")]
    Malformed(String),

    /// Caller-side input rejected before any request.
    #[error("invalid input: {0}")]
    Validation(String),
}
