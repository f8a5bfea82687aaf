use thiserror::Error;

/// Failures of a single chat turn.
///
/// Every variant except `Cancelled` is shown to the user as an assistant
/// message; none of them end the session.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ChatError {
    /// Network failure, non-2xx status, or a non-JSON response.
    #[error("{0}")]
    Transport(String),

    /// JSON response without the expected assistant text.
    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    /// The user stopped the request.
    #[error("Request cancelled")]
    Cancelled,

    /// The attached file could not be decoded as text.
    #[error("Could not read {name} as text: {reason}")]
    AttachmentRead { name: String, reason: String },

    /// The attached file exceeds the configured size limit.
    #[error("{name} is {size} bytes, larger than the {limit} byte limit")]
    AttachmentTooLarge { name: String, size: u64, limit: u64 },
}

impl ChatError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ChatError::Cancelled)
    }
}
