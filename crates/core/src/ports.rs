//! Collaborator ports: persistence, notifications and secrets.
//!
//! Each collaborator is a trait so runners can be wired to real services
//! or to the in-process implementations below.

use std::collections::BTreeMap;

use alloy::primitives::Address;
use async_trait::async_trait;
use dashmap::DashMap;
use sentinel_chain::{ChainError, ChainResult, SecretStore};
use serde::Serialize;
use serde_json::Value;
use tracing::warn;

use crate::error::{SyncError, SyncResult};

/// Store key: one record per address and network, optionally scoped to a reserve.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordKey {
    pub network: String,
    pub address: Address,
    pub reserve: Option<Address>,
}

impl RecordKey {
    pub fn user(network: &str, address: Address) -> Self {
        Self {
            network: network.to_string(),
            address,
            reserve: None,
        }
    }

    pub fn user_reserve(network: &str, address: Address, reserve: Address) -> Self {
        Self {
            network: network.to_string(),
            address,
            reserve: Some(reserve),
        }
    }
}

/// Field map of a stored record.
pub type Record = BTreeMap<String, Value>;

/// Field map of any serializable struct.
pub fn to_record<T: Serialize>(value: &T) -> SyncResult<Record> {
    match serde_json::to_value(value).map_err(|e| SyncError::Store(e.to_string()))? {
        Value::Object(map) => Ok(map.into_iter().collect()),
        other => Err(SyncError::Store(format!("record is not an object: {other}"))),
    }
}

/// One bulk upsert item: insert `record` if the key is absent, otherwise
/// overwrite only `update_fields` from it.
#[derive(Debug, Clone, PartialEq)]
pub struct Upsert {
    pub key: RecordKey,
    pub record: Record,
    pub update_fields: Vec<&'static str>,
}

impl Upsert {
    /// Insert-only item; an existing record is left untouched.
    pub fn insert_if_absent(key: RecordKey, record: Record) -> Self {
        Self {
            key,
            record,
            update_fields: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpsertSummary {
    pub inserted: usize,
    pub updated: usize,
}

#[async_trait]
pub trait PositionStore: Send + Sync {
    async fn get(&self, key: &RecordKey) -> SyncResult<Option<Record>>;

    async fn bulk_upsert(&self, items: Vec<Upsert>) -> SyncResult<UpsertSummary>;
}

/// Process-local store.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    records: DashMap<RecordKey, Record>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl PositionStore for InMemoryStore {
    async fn get(&self, key: &RecordKey) -> SyncResult<Option<Record>> {
        Ok(self.records.get(key).map(|r| r.clone()))
    }

    async fn bulk_upsert(&self, items: Vec<Upsert>) -> SyncResult<UpsertSummary> {
        let mut summary = UpsertSummary::default();
        for item in items {
            match self.records.get_mut(&item.key) {
                Some(mut existing) => {
                    for field in &item.update_fields {
                        let value = item.record.get(*field).ok_or_else(|| {
                            SyncError::Store(format!("update field {field} missing from record"))
                        })?;
                        existing.insert(field.to_string(), value.clone());
                    }
                    if !item.update_fields.is_empty() {
                        summary.updated += 1;
                    }
                }
                None => {
                    self.records.insert(item.key, item.record);
                    summary.inserted += 1;
                }
            }
        }
        Ok(summary)
    }
}

/// Operator-facing alerts.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_alert(&self, subject: &str, body: &str) -> SyncResult<()>;
}

/// Emits alerts as `warn` log lines.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send_alert(&self, subject: &str, body: &str) -> SyncResult<()> {
        warn!(target: "sentinel::alert", subject, body, "Operator alert");
        Ok(())
    }
}

/// Secrets from environment variables. The secret name is upper-cased and
/// `-` becomes `_`, so `liquidator-key` reads `LIQUIDATOR_KEY`.
#[derive(Debug, Default, Clone, Copy)]
pub struct EnvSecretStore;

impl EnvSecretStore {
    fn variable(name: &str) -> String {
        name.to_ascii_uppercase().replace('-', "_")
    }
}

#[async_trait]
impl SecretStore for EnvSecretStore {
    async fn get_and_decrypt_secret(&self, name: &str) -> ChainResult<String> {
        let variable = Self::variable(name);
        std::env::var(&variable)
            .map_err(|_| ChainError::Signing(format!("secret {name} not found in ${variable}")))
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(fields: &[(&str, Value)]) -> Record {
        fields
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[tokio::test]
    async fn test_upsert_inserts_then_updates_listed_fields() {
        let store = InMemoryStore::new();
        let key = RecordKey::user("mainnet", Address::repeat_byte(1));

        let first = Upsert::insert_if_absent(
            key.clone(),
            record(&[("status", json!(0)), ("healthFactor", json!("0"))]),
        );
        let summary = store.bulk_upsert(vec![first]).await.unwrap();
        assert_eq!(summary, UpsertSummary { inserted: 1, updated: 0 });

        let second = Upsert {
            key: key.clone(),
            record: record(&[("status", json!(1)), ("healthFactor", json!("1.5"))]),
            update_fields: vec!["healthFactor"],
        };
        let summary = store.bulk_upsert(vec![second]).await.unwrap();
        assert_eq!(summary, UpsertSummary { inserted: 0, updated: 1 });

        let stored = store.get(&key).await.unwrap().unwrap();
        assert_eq!(stored["status"], json!(0));
        assert_eq!(stored["healthFactor"], json!("1.5"));
    }

    #[tokio::test]
    async fn test_insert_if_absent_leaves_existing_record() {
        let store = InMemoryStore::new();
        let key = RecordKey::user("mainnet", Address::repeat_byte(1));
        store
            .bulk_upsert(vec![Upsert::insert_if_absent(key.clone(), record(&[("status", json!(1))]))])
            .await
            .unwrap();
        store
            .bulk_upsert(vec![Upsert::insert_if_absent(key.clone(), record(&[("status", json!(0))]))])
            .await
            .unwrap();

        assert_eq!(store.get(&key).await.unwrap().unwrap()["status"], json!(1));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_networks_are_separate_keys() {
        let store = InMemoryStore::new();
        let address = Address::repeat_byte(1);
        store
            .bulk_upsert(vec![
                Upsert::insert_if_absent(RecordKey::user("mainnet", address), Record::new()),
                Upsert::insert_if_absent(RecordKey::user("polygon", address), Record::new()),
            ])
            .await
            .unwrap();
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_env_secret_variable_name() {
        assert_eq!(EnvSecretStore::variable("liquidator-key"), "LIQUIDATOR_KEY");
    }
}
