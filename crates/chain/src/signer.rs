//! Signing collaborators.
//!
//! Key material never leaves the signer: the executor hands over a complete
//! transaction request and receives the signed, EIP-2718 encoded bytes.

use alloy::eips::eip2718::Encodable2718;
use alloy::network::{Ethereum, EthereumWallet, TransactionBuilder};
use alloy::primitives::{Address, Bytes};
use alloy::rpc::types::TransactionRequest;
use alloy::signers::local::PrivateKeySigner;
use async_trait::async_trait;
use tracing::info;

use crate::error::{ChainError, ChainResult};

/// Source of encrypted secrets (key vault, KMS, environment).
#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn get_and_decrypt_secret(&self, name: &str) -> ChainResult<String>;
}

#[async_trait]
pub trait TransactionSigner: Send + Sync {
    fn address(&self) -> Address;

    /// Sign a fully populated request. Returns the raw transaction bytes.
    async fn sign_transaction(&self, tx: TransactionRequest) -> ChainResult<Bytes>;
}

/// Signs with a private key held in process memory.
pub struct LocalKeySigner {
    wallet: EthereumWallet,
    address: Address,
}

impl std::fmt::Debug for LocalKeySigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalKeySigner")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

impl LocalKeySigner {
    /// Accepts the key with or without `0x`.
    pub fn from_private_key(private_key: &str) -> ChainResult<Self> {
        let signer: PrivateKeySigner = private_key
            .trim()
            .trim_start_matches("0x")
            .parse()
            .map_err(|e| ChainError::Signing(format!("invalid private key: {e}")))?;
        let address = signer.address();
        Ok(Self {
            wallet: EthereumWallet::from(signer),
            address,
        })
    }

    /// Load the key named `secret_name` from `store`.
    pub async fn from_secret_store(store: &dyn SecretStore, secret_name: &str) -> ChainResult<Self> {
        let key = store.get_and_decrypt_secret(secret_name).await?;
        let signer = Self::from_private_key(&key)?;
        info!(address = %signer.address, secret = secret_name, "Signer loaded");
        Ok(signer)
    }
}

#[async_trait]
impl TransactionSigner for LocalKeySigner {
    fn address(&self) -> Address {
        self.address
    }

    async fn sign_transaction(&self, tx: TransactionRequest) -> ChainResult<Bytes> {
        let tx = TransactionBuilder::<Ethereum>::with_from(tx, self.address);
        let envelope = TransactionBuilder::<Ethereum>::build(tx, &self.wallet)
            .await
            .map_err(|e| ChainError::Signing(e.to_string()))?;
        Ok(envelope.encoded_2718().into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::U256;

    // Well-known development key (anvil account 0).
    const DEV_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

    struct StaticSecrets;

    #[async_trait]
    impl SecretStore for StaticSecrets {
        async fn get_and_decrypt_secret(&self, name: &str) -> ChainResult<String> {
            match name {
                "liquidator" => Ok(DEV_KEY.to_string()),
                other => Err(ChainError::Signing(format!("unknown secret {other}"))),
            }
        }
    }

    #[test]
    fn test_address_from_key() {
        let signer = LocalKeySigner::from_private_key(DEV_KEY).unwrap();
        let expected: Address = "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266".parse().unwrap();
        assert_eq!(signer.address(), expected);
    }

    #[test]
    fn test_invalid_key_is_signing_error() {
        assert!(matches!(
            LocalKeySigner::from_private_key("0x1234"),
            Err(ChainError::Signing(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_secret_propagates() {
        let err = LocalKeySigner::from_secret_store(&StaticSecrets, "missing")
            .await
            .unwrap_err();
        assert!(matches!(err, ChainError::Signing(_)));
    }

    #[tokio::test]
    async fn test_sign_eip1559_transaction() {
        let signer = LocalKeySigner::from_secret_store(&StaticSecrets, "liquidator")
            .await
            .unwrap();
        let tx = TransactionRequest::default()
            .with_to(Address::with_last_byte(1))
            .with_value(U256::ZERO)
            .with_nonce(0)
            .with_chain_id(1)
            .with_gas_limit(21_000)
            .with_max_fee_per_gas(20_000_000_000)
            .with_max_priority_fee_per_gas(1_000_000_000);

        let raw = signer.sign_transaction(tx).await.unwrap();
        assert_eq!(raw[0], 0x02);
    }
}
