//! HTTP log polling into ordered block payloads.
//!
//! Logs for the watched contracts are fetched in block ranges and regrouped
//! into one [`BlockPayload`] per block, logs sorted by index. The watch list is
//! swappable at runtime since aggregator addresses are only known after the
//! reserves are loaded, and can change on a reserve sweep.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::Address;
use alloy::rpc::types::{Filter, Log};
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::ChainResult;
use crate::events::{AccountRef, BlockPayload, EventKind, EventLog, LogTransaction};
use crate::provider::ChainClient;

pub struct LogPoller {
    client: Arc<dyn ChainClient>,
    watched: RwLock<Vec<Address>>,
    interval: Duration,
    max_block_range: u64,
}

fn to_event_log(log: &Log) -> EventLog {
    EventLog {
        account: AccountRef {
            address: log.address(),
        },
        topics: log.topics().to_vec(),
        data: log.data().data.clone(),
        index: log.log_index.unwrap_or_default(),
        transaction: log.transaction_hash.map(|hash| LogTransaction { hash, from: None }),
    }
}

/// Group logs by block, dropping removed and pending logs.
pub fn group_by_block(logs: &[Log]) -> Vec<BlockPayload> {
    let mut blocks: BTreeMap<u64, BlockPayload> = BTreeMap::new();
    for log in logs.iter().filter(|log| !log.removed) {
        let Some(number) = log.block_number else {
            continue;
        };
        let block = blocks.entry(number).or_insert_with(|| BlockPayload {
            number,
            hash: log.block_hash,
            logs: Vec::new(),
        });
        block.logs.push(to_event_log(log));
    }

    blocks
        .into_values()
        .map(|mut block| {
            block.logs.sort_by_key(|log| log.index);
            block
        })
        .collect()
}

impl LogPoller {
    pub fn new(client: Arc<dyn ChainClient>, watched: Vec<Address>) -> Self {
        Self {
            client,
            watched: RwLock::new(watched),
            interval: Duration::from_secs(2),
            max_block_range: 500,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_max_block_range(mut self, range: u64) -> Self {
        self.max_block_range = range.max(1);
        self
    }

    pub fn set_watched(&self, watched: Vec<Address>) {
        *self.watched.write() = watched;
    }

    /// Fetch `[from, to]` as block payloads.
    pub async fn poll_range(&self, from: u64, to: u64) -> ChainResult<Vec<BlockPayload>> {
        let filter = Filter::new()
            .address(self.watched.read().clone())
            .event_signature(EventKind::all_signatures())
            .from_block(from)
            .to_block(to);
        let logs = self.client.get_logs(&filter).await?;
        Ok(group_by_block(&logs))
    }

    /// Poll from `start` (or the current head) forever, sending each block to
    /// `sink` in order. Returns when the receiver is dropped.
    pub async fn run(&self, start: Option<u64>, sink: mpsc::Sender<BlockPayload>) {
        let mut next = match start {
            Some(block) => block,
            None => loop {
                match self.client.block_number().await {
                    Ok(head) => break head + 1,
                    Err(err) => {
                        warn!(error = %err, "Cannot read head block, retrying");
                        tokio::time::sleep(self.interval).await;
                    }
                }
            },
        };
        info!(chain_id = self.client.chain_id(), from = next, "Log poller started");

        let mut ticker = tokio::time::interval(self.interval);
        loop {
            ticker.tick().await;

            let head = match self.client.block_number().await {
                Ok(head) => head,
                Err(err) => {
                    warn!(error = %err, "Head block read failed");
                    continue;
                }
            };

            while next <= head {
                let to = head.min(next + self.max_block_range - 1);
                match self.poll_range(next, to).await {
                    Ok(blocks) => {
                        debug!(from = next, to, blocks = blocks.len(), "Polled logs");
                        for block in blocks {
                            if sink.send(block).await.is_err() {
                                info!("Block receiver closed, stopping poller");
                                return;
                            }
                        }
                        next = to + 1;
                    }
                    Err(err) => {
                        warn!(from = next, to, error = %err, "Log poll failed, will retry");
                        break;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::{Bytes, LogData, B256};

    fn rpc_log(block: u64, index: u64, removed: bool) -> Log {
        Log {
            inner: alloy::primitives::Log {
                address: Address::with_last_byte(1),
                data: LogData::new_unchecked(
                    vec![EventKind::Supply.signature_hash()],
                    Bytes::new(),
                ),
            },
            block_hash: Some(B256::with_last_byte(block as u8)),
            block_number: Some(block),
            block_timestamp: None,
            transaction_hash: Some(B256::with_last_byte(0x77)),
            transaction_index: Some(0),
            log_index: Some(index),
            removed,
        }
    }

    #[test]
    fn test_group_by_block_orders_blocks_and_logs() {
        let logs = vec![
            rpc_log(11, 4, false),
            rpc_log(10, 2, false),
            rpc_log(11, 1, false),
            rpc_log(10, 0, false),
            rpc_log(12, 0, true),
        ];

        let blocks = group_by_block(&logs);
        assert_eq!(blocks.iter().map(|b| b.number).collect::<Vec<_>>(), vec![10, 11]);
        assert_eq!(blocks[0].logs.iter().map(|l| l.index).collect::<Vec<_>>(), vec![0, 2]);
        assert_eq!(blocks[1].logs.iter().map(|l| l.index).collect::<Vec<_>>(), vec![1, 4]);
        assert_eq!(blocks[0].logs[0].emitter(), Address::with_last_byte(1));
    }
}
