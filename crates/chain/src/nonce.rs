//! Nonce sequencing per signer address.
//!
//! One cursor per address, guarded by an async mutex: the network read and
//! the increment happen under the same lock, so concurrent acquisitions never
//! observe the same value. The cursor lives in memory only and is rebuilt from
//! the network's pending count after a restart.

use std::sync::Arc;

use alloy::primitives::Address;
use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::ChainResult;
use crate::provider::ChainClient;

#[derive(Debug, Default)]
pub struct NonceCursor {
    /// Next nonce to hand out, if known.
    next: Mutex<Option<u64>>,
}

impl NonceCursor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the next nonce.
    ///
    /// Refreshes from the network's pending transaction count when the
    /// network is ahead of the cached value (transactions landed from
    /// elsewhere), otherwise hands out the cached value and advances it.
    pub async fn acquire(&self, client: &dyn ChainClient, address: Address) -> ChainResult<u64> {
        let mut next = self.next.lock().await;
        let network = client.transaction_count(address).await?;

        let nonce = match *next {
            Some(cached) if cached >= network => cached,
            Some(cached) => {
                debug!(%address, cached, network, "Network nonce ahead of cursor, refreshing");
                network
            }
            None => network,
        };
        *next = Some(nonce + 1);
        Ok(nonce)
    }

    /// Give back `nonce` when its transaction was never broadcast.
    ///
    /// Only the most recent nonce can be returned; older ones would leave a
    /// gap behind a later issued value, which the network count fixes on the
    /// next acquisition anyway.
    pub async fn release(&self, nonce: u64) -> bool {
        let mut next = self.next.lock().await;
        if *next == Some(nonce + 1) {
            *next = Some(nonce);
            true
        } else {
            warn!(nonce, "Cannot release nonce, later nonces already issued");
            false
        }
    }
}

/// Cursors keyed by signer address.
#[derive(Debug, Default)]
pub struct NonceManager {
    cursors: DashMap<Address, Arc<NonceCursor>>,
}

impl NonceManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cursor(&self, address: Address) -> Arc<NonceCursor> {
        self.cursors.entry(address).or_default().clone()
    }

    pub async fn acquire(&self, client: &dyn ChainClient, address: Address) -> ChainResult<u64> {
        self.cursor(address).acquire(client, address).await
    }

    pub async fn release(&self, address: Address, nonce: u64) -> bool {
        self.cursor(address).release(nonce).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeChain;
    use alloy::primitives::Bytes;

    const SIGNER: Address = Address::with_last_byte(0x51);

    fn chain() -> FakeChain {
        FakeChain::new(Address::ZERO, |_, _| Ok(Bytes::new()))
    }

    #[tokio::test]
    async fn test_concurrent_acquisitions_distinct() {
        let chain = chain();
        chain.set_network_nonce(7);
        let cursor = NonceCursor::new();

        let (a, b) = tokio::join!(cursor.acquire(&chain, SIGNER), cursor.acquire(&chain, SIGNER));
        let (a, b) = (a.unwrap(), b.unwrap());

        assert_ne!(a, b);
        assert_eq!(a.min(b), 7);
        assert_eq!(a.max(b), 8);
    }

    #[tokio::test]
    async fn test_many_concurrent_acquisitions_strictly_increasing() {
        let chain = Arc::new(chain());
        let manager = Arc::new(NonceManager::new());

        let handles: Vec<_> = (0..32)
            .map(|_| {
                let chain = chain.clone();
                let manager = manager.clone();
                tokio::spawn(async move { manager.acquire(chain.as_ref(), SIGNER).await })
            })
            .collect();

        let mut nonces = Vec::new();
        for handle in handles {
            nonces.push(handle.await.unwrap().unwrap());
        }
        nonces.sort_unstable();
        assert_eq!(nonces, (0..32).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_network_ahead_refreshes_cursor() {
        let chain = chain();
        let cursor = NonceCursor::new();

        assert_eq!(cursor.acquire(&chain, SIGNER).await.unwrap(), 0);
        assert_eq!(cursor.acquire(&chain, SIGNER).await.unwrap(), 1);

        chain.set_network_nonce(10);
        assert_eq!(cursor.acquire(&chain, SIGNER).await.unwrap(), 10);
        assert_eq!(cursor.acquire(&chain, SIGNER).await.unwrap(), 11);
    }

    #[tokio::test]
    async fn test_release_only_latest() {
        let chain = chain();
        let cursor = NonceCursor::new();

        let first = cursor.acquire(&chain, SIGNER).await.unwrap();
        let second = cursor.acquire(&chain, SIGNER).await.unwrap();

        assert!(!cursor.release(first).await);
        assert!(cursor.release(second).await);
        assert_eq!(cursor.acquire(&chain, SIGNER).await.unwrap(), second);
    }
}
