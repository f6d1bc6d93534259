//! Position sentinel core logic.
//!
//! This crate provides:
//! - The per-network data model and in-memory chain state cache
//! - Event-sourced cache updates gated on a chain baseline
//! - Consistency audits of cached positions against authoritative reads
//! - Decimal health factor evaluation and liquidation pair selection
//! - Reserve loading, price/reserve sweeps and baseline user sync
//! - Collaborator ports (store, notifier, secrets) and configuration
//! - A single-writer runner per network
//!
//! Supports any Aave v2/v3 style pool on EVM chains.

mod auditor;
mod baseline;
mod cache;
pub mod config;
pub mod decimal;
mod engine;
mod error;
mod model;
pub mod ports;
mod reserves;
mod runner;
mod synchronizer;
#[cfg(test)]
mod test_support;

pub use auditor::{AccountCheck, AuditReport, AuditRequest, ConsistencyAuditor, Mismatch};
pub use baseline::{BaselineReport, BaselineSync};
pub use cache::ChainStateCache;
pub use config::{
    GasTier, LiquidationConfig, NetworkConfig, RuntimeVariable, RuntimeVariables, SentinelConfig,
    SweepConfig, SyncConfig,
};
pub use engine::{
    select_most_profitable, EvaluationReport, GasQuote, LiquidationAction, LiquidationEngine,
    LiquidationOpportunity, LiquidationReward, Valuation,
};
pub use error::{SyncError, SyncResult};
pub use model::{NetworkContext, Reserve, SyncStatus, UserAddress, UserReserve, UserReserveProperty};
pub use ports::{
    EnvSecretStore, InMemoryStore, LogNotifier, Notifier, PositionStore, RecordKey, Upsert,
    UpsertSummary,
};
pub use reserves::{AggregatorChange, ReserveLoader, ReserveSweepReport};
pub use runner::{NetworkRunner, RunnerDeps, RunnerRegistry};
pub use synchronizer::{BlockOutcome, StateSynchronizer, UnknownEventPolicy};
