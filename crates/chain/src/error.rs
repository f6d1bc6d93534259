//! Error taxonomy for chain interaction.

use sentinel_api::RelayError;
use thiserror::Error;

/// Errors raised while reading from or writing to a chain.
///
/// Cloneable so a single failed chunk can be reported against every call
/// that was batched into it.
#[derive(Debug, Clone, Error)]
pub enum ChainError {
    /// Malformed input (length mismatch, unknown name). Rejects only the offending call.
    #[error("validation failed: {0}")]
    Validation(String),

    /// RPC failure. Propagates to the caller of the affected batch only.
    #[error("chain read failed: {0}")]
    ChainRead(String),

    /// The node answered with a JSON-RPC error (reverts included). Not retried.
    #[error("rpc rejected request: {0}")]
    Rejected(String),

    /// A response could not be decoded into the expected ABI shape.
    #[error("failed to decode {what}: {reason}")]
    Decode { what: &'static str, reason: String },

    /// The pre-broadcast dry run reverted.
    #[error("simulation failed: {0}")]
    Simulation(String),

    /// The signing collaborator refused or failed.
    #[error("signing failed: {0}")]
    Signing(String),

    /// The relay rejected the transaction.
    #[error("broadcast via {relay} failed: {reason}")]
    Broadcast { relay: &'static str, reason: String },

    /// An outbound call exceeded its time budget.
    #[error("{operation} timed out after {timeout_ms}ms")]
    Timeout { operation: &'static str, timeout_ms: u64 },
}

impl ChainError {
    pub fn decode(what: &'static str, err: impl std::fmt::Display) -> Self {
        Self::Decode {
            what,
            reason: err.to_string(),
        }
    }

    pub fn read(err: impl std::fmt::Display) -> Self {
        Self::ChainRead(err.to_string())
    }

    /// Whether the same call may succeed if retried.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::ChainRead(_) | Self::Timeout { .. })
    }
}

impl From<RelayError> for ChainError {
    fn from(err: RelayError) -> Self {
        match err {
            RelayError::Rpc { code, message } => Self::Rejected(format!("{code}: {message}")),
            other => Self::ChainRead(other.to_string()),
        }
    }
}


pub type ChainResult<T> = Result<T, ChainError>;
