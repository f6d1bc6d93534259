//! Error type for state synchronization and liquidation evaluation.

use sentinel_chain::ChainError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Chain(#[from] ChainError),

    #[error("unknown network: {0}")]
    UnknownNetwork(String),

    #[error("store operation failed: {0}")]
    Store(String),

    /// Malformed request, e.g. an unknown property or runtime variable name.
    #[error("validation failed: {0}")]
    Validation(String),
}

pub type SyncResult<T> = Result<T, SyncError>;
