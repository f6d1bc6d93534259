//! Per-network configuration: RPC endpoints, relay routing and contract addresses.

use alloy::primitives::Address;
use anyhow::bail;
use sentinel_chain::GasSettings;
use serde::{Deserialize, Serialize};

use crate::model::NetworkContext;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Network name, used in logs and as part of every store key
    pub name: String,

    pub chain_id: u64,

    /// HTTP RPC endpoint; `${VAR}` references are expanded
    pub rpc_url: String,

    /// The RPC accepts `eth_sendPrivateTransaction`
    #[serde(default)]
    pub native_private_relay: bool,

    /// Protect relay endpoint for chains without native private submission
    #[serde(default)]
    pub protect_relay_url: Option<String>,

    pub pool: Address,
    pub data_provider: Address,
    pub addresses_provider: Address,
    pub multicall: Address,

    /// Resolved through the addresses provider when absent
    #[serde(default)]
    pub price_oracle: Option<Address>,

    /// Required only when liquidation execution is enabled
    #[serde(default)]
    pub liquidation_executor: Option<Address>,

    /// Wrapped native token reserve, prices gas in USD
    pub wrapped_native: Address,

    /// Name of the signing key in the secret store
    #[serde(default = "default_signer_secret")]
    pub signer_secret: String,

    #[serde(default)]
    pub gas: GasSettings,

    /// First block to poll; the current head when absent
    #[serde(default)]
    pub start_block: Option<u64>,

    /// Borrowers loaded at startup, before any event mentions them
    #[serde(default)]
    pub seed_users: Vec<Address>,
}

fn default_signer_secret() -> String {
    "liquidator-private-key".to_string()
}

impl NetworkConfig {
    pub fn expand_env_vars(&mut self) {
        self.rpc_url = expand_env(&self.rpc_url);
        if let Some(ref mut url) = self.protect_relay_url {
            *url = expand_env(url);
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.name.is_empty() {
            bail!("network name is empty");
        }
        if self.rpc_url.is_empty() {
            bail!("rpc_url is empty");
        }
        if self.pool.is_zero() || self.data_provider.is_zero() || self.multicall.is_zero() {
            bail!("pool, data_provider and multicall addresses are required");
        }
        if self.price_oracle.is_none() && self.addresses_provider.is_zero() {
            bail!("either price_oracle or addresses_provider is required");
        }
        if !self.native_private_relay && self.protect_relay_url.is_none() {
            tracing::warn!(network = %self.name, "No private relay configured, execution will be unavailable");
        }
        Ok(())
    }

    pub fn context(&self) -> NetworkContext {
        NetworkContext::new(
            self.name.clone(),
            self.chain_id,
            self.rpc_url.clone(),
            self.pool,
            self.data_provider,
            self.addresses_provider,
            self.multicall,
            self.wrapped_native,
        )
        .with_price_oracle(self.price_oracle)
        .with_liquidation_executor(self.liquidation_executor)
    }
}

/// Expand `${VAR_NAME}` patterns with environment variable values. Unset
/// variables are left as written.
pub(crate) fn expand_env(s: &str) -> String {
    let Ok(re) = regex_lite::Regex::new(r"\$\{([^}]+)\}") else {
        return s.to_string();
    };

    let mut result = s.to_string();
    for cap in re.captures_iter(s) {
        if let (Some(full_match), Some(var_match)) = (cap.get(0), cap.get(1)) {
            if let Ok(value) = std::env::var(var_match.as_str()) {
                result = result.replace(full_match.as_str(), &value);
            }
        }
    }
    result
}
