//! Settings that may change while the process runs.
//!
//! Each variable has a name, a typed getter and a parser for its setter;
//! there is no way to reach a field that is not listed in
//! [`RuntimeVariable`].

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use parking_lot::RwLock;
use rust_decimal::Decimal;
use tracing::info;

use super::settings::SentinelConfig;
use crate::error::SyncError;
use crate::synchronizer::UnknownEventPolicy;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RuntimeVariable {
    ExecutionEnabled,
    MinNetProfitUsd,
    HealthyHealthFactor,
    InsertFlushThreshold,
    UnknownEventPolicy,
    AverageGasUnits,
    AuditAfterEvents,
}

impl RuntimeVariable {
    pub const ALL: [RuntimeVariable; 7] = [
        RuntimeVariable::ExecutionEnabled,
        RuntimeVariable::MinNetProfitUsd,
        RuntimeVariable::HealthyHealthFactor,
        RuntimeVariable::InsertFlushThreshold,
        RuntimeVariable::UnknownEventPolicy,
        RuntimeVariable::AverageGasUnits,
        RuntimeVariable::AuditAfterEvents,
    ];

    pub fn name(self) -> &'static str {
        match self {
            RuntimeVariable::ExecutionEnabled => "execution_enabled",
            RuntimeVariable::MinNetProfitUsd => "min_net_profit_usd",
            RuntimeVariable::HealthyHealthFactor => "healthy_health_factor",
            RuntimeVariable::InsertFlushThreshold => "insert_flush_threshold",
            RuntimeVariable::UnknownEventPolicy => "unknown_event_policy",
            RuntimeVariable::AverageGasUnits => "average_gas_units",
            RuntimeVariable::AuditAfterEvents => "audit_after_events",
        }
    }
}

impl fmt::Display for RuntimeVariable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for RuntimeVariable {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|v| v.name() == s)
            .ok_or_else(|| SyncError::Validation(format!("unknown runtime variable: {s}")))
    }
}

fn parse<T: FromStr>(variable: RuntimeVariable, value: &str) -> Result<T, SyncError>
where
    T::Err: fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| SyncError::Validation(format!("{variable}: {e}")))
}

/// Live settings shared by the synchronizer and the liquidation engine.
#[derive(Debug)]
pub struct RuntimeVariables {
    execution_enabled: AtomicBool,
    min_net_profit_usd: RwLock<Decimal>,
    healthy_health_factor: RwLock<Decimal>,
    insert_flush_threshold: AtomicUsize,
    unknown_event_policy: RwLock<UnknownEventPolicy>,
    average_gas_units: AtomicU64,
    audit_after_events: AtomicBool,
}

impl Default for RuntimeVariables {
    fn default() -> Self {
        Self::from_config(&SentinelConfig::default())
    }
}

impl RuntimeVariables {
    pub fn from_config(config: &SentinelConfig) -> Self {
        Self {
            execution_enabled: AtomicBool::new(config.liquidation.execution_enabled),
            min_net_profit_usd: RwLock::new(config.liquidation.min_net_profit_usd),
            healthy_health_factor: RwLock::new(config.sync.healthy_health_factor),
            insert_flush_threshold: AtomicUsize::new(config.sync.insert_flush_threshold),
            unknown_event_policy: RwLock::new(config.sync.unknown_event_policy),
            average_gas_units: AtomicU64::new(config.liquidation.average_gas_units),
            audit_after_events: AtomicBool::new(config.sync.audit_after_events),
        }
    }

    pub fn execution_enabled(&self) -> bool {
        self.execution_enabled.load(Ordering::Relaxed)
    }

    pub fn min_net_profit_usd(&self) -> Decimal {
        *self.min_net_profit_usd.read()
    }

    pub fn healthy_health_factor(&self) -> Decimal {
        *self.healthy_health_factor.read()
    }

    pub fn insert_flush_threshold(&self) -> usize {
        self.insert_flush_threshold.load(Ordering::Relaxed)
    }

    pub fn unknown_event_policy(&self) -> UnknownEventPolicy {
        *self.unknown_event_policy.read()
    }

    pub fn average_gas_units(&self) -> u64 {
        self.average_gas_units.load(Ordering::Relaxed)
    }

    pub fn audit_after_events(&self) -> bool {
        self.audit_after_events.load(Ordering::Relaxed)
    }

    pub fn get(&self, variable: RuntimeVariable) -> String {
        match variable {
            RuntimeVariable::ExecutionEnabled => self.execution_enabled().to_string(),
            RuntimeVariable::MinNetProfitUsd => self.min_net_profit_usd().to_string(),
            RuntimeVariable::HealthyHealthFactor => self.healthy_health_factor().to_string(),
            RuntimeVariable::InsertFlushThreshold => self.insert_flush_threshold().to_string(),
            RuntimeVariable::UnknownEventPolicy => self.unknown_event_policy().to_string(),
            RuntimeVariable::AverageGasUnits => self.average_gas_units().to_string(),
            RuntimeVariable::AuditAfterEvents => self.audit_after_events().to_string(),
        }
    }

    /// Parse and store `value`. Invalid values leave the variable unchanged.
    pub fn set(&self, variable: RuntimeVariable, value: &str) -> Result<(), SyncError> {
        match variable {
            RuntimeVariable::ExecutionEnabled => {
                self.execution_enabled.store(parse(variable, value)?, Ordering::Relaxed)
            }
            RuntimeVariable::MinNetProfitUsd => {
                *self.min_net_profit_usd.write() = parse(variable, value)?
            }
            RuntimeVariable::HealthyHealthFactor => {
                let hf: Decimal = parse(variable, value)?;
                if hf <= Decimal::ONE {
                    return Err(SyncError::Validation(format!(
                        "{variable} must be above 1, got {hf}"
                    )));
                }
                *self.healthy_health_factor.write() = hf
            }
            RuntimeVariable::InsertFlushThreshold => {
                let threshold: usize = parse(variable, value)?;
                if threshold == 0 {
                    return Err(SyncError::Validation(format!("{variable} must be positive")));
                }
                self.insert_flush_threshold.store(threshold, Ordering::Relaxed)
            }
            RuntimeVariable::UnknownEventPolicy => {
                *self.unknown_event_policy.write() = parse(variable, value)?
            }
            RuntimeVariable::AverageGasUnits => {
                self.average_gas_units.store(parse(variable, value)?, Ordering::Relaxed)
            }
            RuntimeVariable::AuditAfterEvents => {
                self.audit_after_events.store(parse(variable, value)?, Ordering::Relaxed)
            }
        }
        info!(variable = %variable, value = %self.get(variable), "Runtime variable updated");
        Ok(())
    }

    /// Set by name, as received from an operator.
    pub fn set_by_name(&self, name: &str, value: &str) -> Result<(), SyncError> {
        self.set(name.parse()?, value)
    }

    pub fn snapshot(&self) -> BTreeMap<&'static str, String> {
        RuntimeVariable::ALL
            .into_iter()
            .map(|v| (v.name(), self.get(v)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_config() {
        let vars = RuntimeVariables::default();
        assert!(!vars.execution_enabled());
        assert_eq!(vars.insert_flush_threshold(), 25);
        assert_eq!(vars.get(RuntimeVariable::UnknownEventPolicy), "skip_log");
    }

    #[test]
    fn test_set_by_name() {
        let vars = RuntimeVariables::default();
        vars.set_by_name("execution_enabled", "true").unwrap();
        vars.set_by_name("min_net_profit_usd", "12.5").unwrap();
        vars.set_by_name("unknown_event_policy", "abort_block").unwrap();

        assert!(vars.execution_enabled());
        assert_eq!(vars.min_net_profit_usd(), Decimal::new(125, 1));
        assert_eq!(vars.unknown_event_policy(), UnknownEventPolicy::AbortBlock);
    }

    #[test]
    fn test_unknown_name_is_validation_error() {
        let vars = RuntimeVariables::default();
        assert!(matches!(
            vars.set_by_name("chunk_size", "10"),
            Err(SyncError::Validation(_))
        ));
    }

    #[test]
    fn test_invalid_value_keeps_previous() {
        let vars = RuntimeVariables::default();
        assert!(vars.set(RuntimeVariable::InsertFlushThreshold, "0").is_err());
        assert!(vars.set(RuntimeVariable::HealthyHealthFactor, "0.9").is_err());
        assert!(vars.set(RuntimeVariable::ExecutionEnabled, "maybe").is_err());
        assert_eq!(vars.insert_flush_threshold(), 25);
        assert_eq!(vars.healthy_health_factor(), Decimal::TWO);
    }

    #[test]
    fn test_snapshot_lists_every_variable() {
        let snapshot = RuntimeVariables::default().snapshot();
        assert_eq!(snapshot.len(), RuntimeVariable::ALL.len());
        assert_eq!(snapshot["average_gas_units"], "900000");
    }
}
