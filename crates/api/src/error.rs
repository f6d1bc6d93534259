use thiserror::Error;

/// Errors raised by the HTTP clients in this crate.
#[derive(Debug, Clone, Error)]
pub enum RelayError {
    /// Transport-level failure (connection, timeout, non-2xx status).
    #[error("http request to {url} failed: {reason}")]
    Http { url: String, reason: String },

    /// The node answered with a JSON-RPC error object.
    #[error("rpc error {code}: {message}")]
    Rpc { code: i64, message: String },

    /// The response body did not have the expected shape.
    #[error("malformed response: {0}")]
    Malformed(String),
}

impl RelayError {
    /// Whether retrying the same request may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Http { .. })
    }
}
