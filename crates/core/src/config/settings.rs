//! Process configuration with profile support.
//!
//! A `SentinelConfig` is read from TOML, or built from a named profile
//! (`default`, `testing`, `production`) when no file is given. Every field
//! has a default, so a file only needs the networks it monitors.

use std::str::FromStr;
use std::time::Duration;

use anyhow::{bail, Context};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::network::NetworkConfig;
use crate::synchronizer::UnknownEventPolicy;

/// Environment variable selecting the profile.
pub const PROFILE_ENV: &str = "SENTINEL_PROFILE";

/// Environment variable pointing at a TOML config file.
pub const CONFIG_PATH_ENV: &str = "SENTINEL_CONFIG";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SentinelConfig {
    #[serde(default = "default_profile_name")]
    pub profile: String,

    #[serde(default)]
    pub networks: Vec<NetworkConfig>,

    #[serde(default)]
    pub sync: SyncConfig,

    #[serde(default)]
    pub liquidation: LiquidationConfig,

    #[serde(default)]
    pub sweeps: SweepConfig,
}

fn default_profile_name() -> String {
    "default".to_string()
}

/// Event ingestion, batching and RPC behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Placeholder inserts buffered before a bulk write
    #[serde(default = "default_insert_flush_threshold")]
    pub insert_flush_threshold: usize,

    /// Calls per multicall `aggregate` request
    #[serde(default = "default_multicall_chunk_size")]
    pub multicall_chunk_size: usize,

    /// Per-attempt RPC timeout (milliseconds)
    #[serde(default = "default_rpc_timeout_ms")]
    pub rpc_timeout_ms: u64,

    /// Attempts per RPC call, including the first
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: usize,

    /// First backoff delay (milliseconds), doubled per retry
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,

    /// Cap on a single backoff delay (milliseconds)
    #[serde(default = "default_retry_max_delay_ms")]
    pub retry_max_delay_ms: u64,

    #[serde(default)]
    pub unknown_event_policy: UnknownEventPolicy,

    /// Users above this health factor are dropped from tracking
    #[serde(default = "default_healthy_health_factor")]
    pub healthy_health_factor: Decimal,

    /// Run a consistency audit after every applied event
    #[serde(default = "default_audit_after_events")]
    pub audit_after_events: bool,

    /// Log poller tick (milliseconds)
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Widest `eth_getLogs` range per request
    #[serde(default = "default_max_block_range")]
    pub max_block_range: u64,

    /// Blocks buffered between the poller and the runner
    #[serde(default = "default_block_channel_capacity")]
    pub block_channel_capacity: usize,
}

fn default_insert_flush_threshold() -> usize {
    25
}
fn default_multicall_chunk_size() -> usize {
    300
}
fn default_rpc_timeout_ms() -> u64 {
    10_000
}
fn default_retry_attempts() -> usize {
    3
}
fn default_retry_base_delay_ms() -> u64 {
    100
}
fn default_retry_max_delay_ms() -> u64 {
    2_000
}
fn default_healthy_health_factor() -> Decimal {
    Decimal::TWO
}
fn default_audit_after_events() -> bool {
    true
}
fn default_poll_interval_ms() -> u64 {
    2_000
}
fn default_max_block_range() -> u64 {
    500
}
fn default_block_channel_capacity() -> usize {
    256
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            insert_flush_threshold: default_insert_flush_threshold(),
            multicall_chunk_size: default_multicall_chunk_size(),
            rpc_timeout_ms: default_rpc_timeout_ms(),
            retry_attempts: default_retry_attempts(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            retry_max_delay_ms: default_retry_max_delay_ms(),
            unknown_event_policy: UnknownEventPolicy::default(),
            healthy_health_factor: default_healthy_health_factor(),
            audit_after_events: default_audit_after_events(),
            poll_interval_ms: default_poll_interval_ms(),
            max_block_range: default_max_block_range(),
            block_channel_capacity: default_block_channel_capacity(),
        }
    }
}

impl SyncConfig {
    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc_timeout_ms)
    }
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
    pub fn retry_policy(&self) -> sentinel_chain::RetryPolicy {
        sentinel_chain::RetryPolicy {
            attempts: self.retry_attempts,
            base_delay: Duration::from_millis(self.retry_base_delay_ms),
            max_delay: Duration::from_millis(self.retry_max_delay_ms),
            timeout: self.rpc_timeout(),
        }
    }
}

/// Gas cost multiplier applied once gross profit exceeds `min_gross_profit_usd`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GasTier {
    pub min_gross_profit_usd: Decimal,
    pub multiplier: Decimal,
}

/// Liquidation evaluation and execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiquidationConfig {
    /// Send liquidation transactions. When off, opportunities are only reported.
    #[serde(default)]
    pub execution_enabled: bool,

    /// Gas units assumed for one liquidation
    #[serde(default = "default_average_gas_units")]
    pub average_gas_units: u64,

    /// Gas cost multipliers by gross profit, any order
    #[serde(default = "default_gas_tiers")]
    pub gas_tiers: Vec<GasTier>,

    /// Opportunities must net more than this (USD)
    #[serde(default)]
    pub min_net_profit_usd: Decimal,

    /// Receive aTokens instead of the underlying collateral
    #[serde(default)]
    pub receive_a_token: bool,

    /// Gas limit for liquidation transactions
    #[serde(default = "default_gas_limit")]
    pub gas_limit: u64,

    /// Relay answer timeout (milliseconds)
    #[serde(default = "default_broadcast_timeout_ms")]
    pub broadcast_timeout_ms: u64,
}

fn default_average_gas_units() -> u64 {
    900_000
}
fn default_gas_tiers() -> Vec<GasTier> {
    [(50, 2), (500, 4), (5_000, 8)]
        .into_iter()
        .map(|(profit, multiplier)| GasTier {
            min_gross_profit_usd: Decimal::from(profit),
            multiplier: Decimal::from(multiplier),
        })
        .collect()
}
fn default_gas_limit() -> u64 {
    sentinel_chain::DEFAULT_GAS_LIMIT
}
fn default_broadcast_timeout_ms() -> u64 {
    10_000
}

impl Default for LiquidationConfig {
    fn default() -> Self {
        Self {
            execution_enabled: false,
            average_gas_units: default_average_gas_units(),
            gas_tiers: default_gas_tiers(),
            min_net_profit_usd: Decimal::ZERO,
            receive_a_token: false,
            gas_limit: default_gas_limit(),
            broadcast_timeout_ms: default_broadcast_timeout_ms(),
        }
    }
}

impl LiquidationConfig {
    pub fn broadcast_timeout(&self) -> Duration {
        Duration::from_millis(self.broadcast_timeout_ms)
    }
}

/// Periodic refresh jobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepConfig {
    /// Price refresh (seconds)
    #[serde(default = "default_price_interval")]
    pub price_interval_secs: u64,

    /// Full reserve refresh (seconds)
    #[serde(default = "default_reserve_interval")]
    pub reserve_interval_secs: u64,

    /// Baseline load of placeholder users (seconds)
    #[serde(default = "default_baseline_interval")]
    pub baseline_interval_secs: u64,

    /// Health check over every tracked user (seconds)
    #[serde(default = "default_evaluation_interval")]
    pub evaluation_interval_secs: u64,
}

fn default_price_interval() -> u64 {
    60
}
fn default_reserve_interval() -> u64 {
    3_600
}
fn default_baseline_interval() -> u64 {
    30
}
fn default_evaluation_interval() -> u64 {
    300
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            price_interval_secs: default_price_interval(),
            reserve_interval_secs: default_reserve_interval(),
            baseline_interval_secs: default_baseline_interval(),
            evaluation_interval_secs: default_evaluation_interval(),
        }
    }
}

impl SweepConfig {
    pub fn price_interval(&self) -> Duration {
        Duration::from_secs(self.price_interval_secs)
    }
    pub fn reserve_interval(&self) -> Duration {
        Duration::from_secs(self.reserve_interval_secs)
    }
    pub fn baseline_interval(&self) -> Duration {
        Duration::from_secs(self.baseline_interval_secs)
    }
    pub fn evaluation_interval(&self) -> Duration {
        Duration::from_secs(self.evaluation_interval_secs)
    }
}

impl Default for SentinelConfig {
    fn default() -> Self {
        Self {
            profile: default_profile_name(),
            networks: Vec::new(),
            sync: SyncConfig::default(),
            liquidation: LiquidationConfig::default(),
            sweeps: SweepConfig::default(),
        }
    }
}

impl SentinelConfig {
    /// Load configuration from a TOML file and expand `${VAR}` references.
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let content =
            std::fs::read_to_string(path).with_context(|| format!("reading config file {path}"))?;
        let mut config: Self =
            toml::from_str(&content).with_context(|| format!("parsing config file {path}"))?;
        config.expand_env_vars();
        config.validate()?;
        Ok(config)
    }

    /// Short timings and small batches for local runs.
    pub fn testing() -> Self {
        Self {
            profile: "testing".to_string(),
            networks: Vec::new(),
            sync: SyncConfig {
                insert_flush_threshold: 5,
                multicall_chunk_size: 50,
                rpc_timeout_ms: 5_000,
                retry_attempts: 2,
                poll_interval_ms: 1_000,
                ..SyncConfig::default()
            },
            liquidation: LiquidationConfig {
                execution_enabled: false,
                ..LiquidationConfig::default()
            },
            sweeps: SweepConfig {
                price_interval_secs: 15,
                reserve_interval_secs: 300,
                baseline_interval_secs: 5,
                evaluation_interval_secs: 60,
            },
        }
    }

    /// Conservative settings. Execution still has to be enabled explicitly.
    pub fn production() -> Self {
        Self {
            profile: "production".to_string(),
            networks: Vec::new(),
            sync: SyncConfig {
                retry_attempts: 5,
                ..SyncConfig::default()
            },
            liquidation: LiquidationConfig {
                min_net_profit_usd: Decimal::ONE,
                ..LiquidationConfig::default()
            },
            sweeps: SweepConfig::default(),
        }
    }

    /// Profile named by `SENTINEL_PROFILE`, or the default.
    pub fn from_env() -> Self {
        let profile = std::env::var(PROFILE_ENV).unwrap_or_else(|_| "default".to_string());
        match profile.to_lowercase().as_str() {
            "testing" | "test" => Self::testing(),
            "production" | "prod" => Self::production(),
            _ => Self::default(),
        }
    }

    /// The file named by `SENTINEL_CONFIG` if set, else the env profile.
    pub fn load() -> anyhow::Result<Self> {
        match std::env::var(CONFIG_PATH_ENV) {
            Ok(path) => Self::from_file(&path),
            Err(_) => {
                let config = Self::from_env();
                config.validate()?;
                Ok(config)
            }
        }
    }

    pub fn expand_env_vars(&mut self) {
        for network in &mut self.networks {
            network.expand_env_vars();
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.sync.insert_flush_threshold == 0 {
            bail!("sync.insert_flush_threshold must be positive");
        }
        if self.sync.multicall_chunk_size == 0 {
            bail!("sync.multicall_chunk_size must be positive");
        }
        if self.sync.retry_attempts == 0 {
            bail!("sync.retry_attempts must be at least 1");
        }
        for (i, network) in self.networks.iter().enumerate() {
            if self.networks[..i].iter().any(|other| other.name == network.name) {
                bail!("network {} configured twice", network.name);
            }
            network
                .validate()
                .with_context(|| format!("network {}", network.name))?;
        }
        Ok(())
    }

    pub fn network(&self, name: &str) -> Option<&NetworkConfig> {
        self.networks.iter().find(|n| n.name == name)
    }

    /// Log the current configuration.
    pub fn log_config(&self) {
        tracing::info!(profile = %self.profile, networks = self.networks.len(), "Sentinel configuration loaded");
        tracing::info!(
            flush_threshold = self.sync.insert_flush_threshold,
            chunk_size = self.sync.multicall_chunk_size,
            rpc_timeout_ms = self.sync.rpc_timeout_ms,
            retry_attempts = self.sync.retry_attempts,
            unknown_events = %self.sync.unknown_event_policy,
            healthy_hf = %self.sync.healthy_health_factor,
            "Sync settings"
        );
        tracing::info!(
            execution_enabled = self.liquidation.execution_enabled,
            average_gas_units = self.liquidation.average_gas_units,
            min_net_profit = %self.liquidation.min_net_profit_usd,
            "Liquidation parameters"
        );
        tracing::info!(
            price_secs = self.sweeps.price_interval_secs,
            reserve_secs = self.sweeps.reserve_interval_secs,
            baseline_secs = self.sweeps.baseline_interval_secs,
            "Sweep intervals"
        );
        for network in &self.networks {
            tracing::info!(
                network = %network.name,
                chain_id = network.chain_id,
                pool = %network.pool,
                native_private_relay = network.native_private_relay,
                "Network configured"
            );
        }
    }
}

impl FromStr for SentinelConfig {
    type Err = anyhow::Error;

    /// Parse TOML text, expanding `${VAR}` references.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut config: Self = toml::from_str(s).context("parsing config")?;
        config.expand_env_vars();
        config.validate()?;
        Ok(config)
    }
}
