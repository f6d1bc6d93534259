//! Configuration: the TOML/profile settings file, per-network sections and
//! the runtime-adjustable variables derived from them.

mod network;
mod runtime;
mod settings;

pub use network::NetworkConfig;
pub use runtime::{RuntimeVariable, RuntimeVariables};
pub use settings::{
    GasTier, LiquidationConfig, SentinelConfig, SweepConfig, SyncConfig, CONFIG_PATH_ENV,
    PROFILE_ENV,
};
