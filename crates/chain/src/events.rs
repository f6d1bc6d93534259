//! Inbound block payloads and typed protocol events.
//!
//! A block arrives as an ordered list of raw logs. Each log is matched on
//! `topic0` against a fixed signature table and decoded into a
//! [`ProtocolEvent`] variant; unknown signatures decode to `None` so the
//! caller decides whether to skip the log or abandon the block.

use alloy::primitives::{Address, Bytes, B256, I256, U256};
use alloy::sol_types::SolEvent;
use serde::{Deserialize, Serialize};
use smallvec::{smallvec, SmallVec};

use crate::contracts::{IAggregator, IPool};
use crate::error::{ChainError, ChainResult};

/// An address wrapper as it appears in the ingestion payload (`{ "address": "0x.." }`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountRef {
    pub address: Address,
}

/// Transaction that emitted a log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogTransaction {
    pub hash: B256,
    #[serde(default)]
    pub from: Option<AccountRef>,
}

/// One raw log inside a block payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventLog {
    /// Emitting contract.
    pub account: AccountRef,
    pub topics: Vec<B256>,
    #[serde(default)]
    pub data: Bytes,
    #[serde(default)]
    pub index: u64,
    #[serde(default)]
    pub transaction: Option<LogTransaction>,
}

impl EventLog {
    pub fn emitter(&self) -> Address {
        self.account.address
    }

    pub fn signature(&self) -> Option<B256> {
        self.topics.first().copied()
    }

    /// Sender of the emitting transaction, when the payload carries it.
    pub fn sender(&self) -> Option<Address> {
        self.transaction
            .as_ref()
            .and_then(|tx| tx.from)
            .map(|from| from.address)
    }
}

/// A block with its logs in emission order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockPayload {
    pub number: u64,
    #[serde(default)]
    pub hash: Option<B256>,
    pub logs: Vec<EventLog>,
}

/// Recognized event kinds, keyed by signature hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Supply,
    Deposit,
    Withdraw,
    Borrow,
    Repay,
    LiquidationCall,
    CollateralEnabled,
    CollateralDisabled,
    ReserveDataUpdated,
    AnswerUpdated,
}

impl EventKind {
    pub const ALL: [EventKind; 10] = [
        EventKind::Supply,
        EventKind::Deposit,
        EventKind::Withdraw,
        EventKind::Borrow,
        EventKind::Repay,
        EventKind::LiquidationCall,
        EventKind::CollateralEnabled,
        EventKind::CollateralDisabled,
        EventKind::ReserveDataUpdated,
        EventKind::AnswerUpdated,
    ];

    pub fn signature_hash(self) -> B256 {
        match self {
            EventKind::Supply => IPool::Supply::SIGNATURE_HASH,
            EventKind::Deposit => IPool::Deposit::SIGNATURE_HASH,
            EventKind::Withdraw => IPool::Withdraw::SIGNATURE_HASH,
            EventKind::Borrow => IPool::Borrow::SIGNATURE_HASH,
            EventKind::Repay => IPool::Repay::SIGNATURE_HASH,
            EventKind::LiquidationCall => IPool::LiquidationCall::SIGNATURE_HASH,
            EventKind::CollateralEnabled => IPool::ReserveUsedAsCollateralEnabled::SIGNATURE_HASH,
            EventKind::CollateralDisabled => IPool::ReserveUsedAsCollateralDisabled::SIGNATURE_HASH,
            EventKind::ReserveDataUpdated => IPool::ReserveDataUpdated::SIGNATURE_HASH,
            EventKind::AnswerUpdated => IAggregator::AnswerUpdated::SIGNATURE_HASH,
        }
    }

    pub fn from_signature(signature: B256) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.signature_hash() == signature)
    }

    pub fn name(self) -> &'static str {
        match self {
            EventKind::Supply => "Supply",
            EventKind::Deposit => "Deposit",
            EventKind::Withdraw => "Withdraw",
            EventKind::Borrow => "Borrow",
            EventKind::Repay => "Repay",
            EventKind::LiquidationCall => "LiquidationCall",
            EventKind::CollateralEnabled => "ReserveUsedAsCollateralEnabled",
            EventKind::CollateralDisabled => "ReserveUsedAsCollateralDisabled",
            EventKind::ReserveDataUpdated => "ReserveDataUpdated",
            EventKind::AnswerUpdated => "AnswerUpdated",
        }
    }

    /// All signatures, for log filters.
    pub fn all_signatures() -> Vec<B256> {
        Self::ALL.into_iter().map(Self::signature_hash).collect()
    }
}

/// Borrow rate mode as encoded in `Borrow.interestRateMode`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterestRateMode {
    Stable,
    Variable,
}

impl TryFrom<u8> for InterestRateMode {
    type Error = ChainError;

    fn try_from(mode: u8) -> Result<Self, Self::Error> {
        match mode {
            1 => Ok(Self::Stable),
            2 => Ok(Self::Variable),
            other => Err(ChainError::decode(
                "interestRateMode",
                format!("unsupported mode {other}"),
            )),
        }
    }
}

/// A decoded protocol event. `user` is always the account whose position
/// changes (`onBehalfOf` where the event distinguishes it from the caller).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolEvent {
    /// Supply (v3) or Deposit (v2).
    Supply {
        reserve: Address,
        user: Address,
        amount: U256,
    },
    Withdraw {
        reserve: Address,
        user: Address,
        amount: U256,
    },
    Borrow {
        reserve: Address,
        user: Address,
        amount: U256,
        mode: InterestRateMode,
    },
    Repay {
        reserve: Address,
        user: Address,
        amount: U256,
        use_a_tokens: bool,
    },
    CollateralEnabled {
        reserve: Address,
        user: Address,
    },
    CollateralDisabled {
        reserve: Address,
        user: Address,
    },
    LiquidationCall {
        collateral: Address,
        debt: Address,
        user: Address,
        debt_to_cover: U256,
        liquidated_collateral: U256,
        liquidator: Address,
    },
    ReserveDataUpdated {
        reserve: Address,
        liquidity_index: U256,
        variable_borrow_index: U256,
    },
    /// Aggregator answer; `aggregator` is the emitting contract.
    PriceUpdated {
        aggregator: Address,
        answer: I256,
        round_id: U256,
    },
}

impl ProtocolEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            ProtocolEvent::Supply { .. } => EventKind::Supply,
            ProtocolEvent::Withdraw { .. } => EventKind::Withdraw,
            ProtocolEvent::Borrow { .. } => EventKind::Borrow,
            ProtocolEvent::Repay { .. } => EventKind::Repay,
            ProtocolEvent::CollateralEnabled { .. } => EventKind::CollateralEnabled,
            ProtocolEvent::CollateralDisabled { .. } => EventKind::CollateralDisabled,
            ProtocolEvent::LiquidationCall { .. } => EventKind::LiquidationCall,
            ProtocolEvent::ReserveDataUpdated { .. } => EventKind::ReserveDataUpdated,
            ProtocolEvent::PriceUpdated { .. } => EventKind::AnswerUpdated,
        }
    }

    /// Accounts whose cached position this event touches.
    pub fn affected_users(&self) -> SmallVec<[Address; 2]> {
        match self {
            ProtocolEvent::Supply { user, .. }
            | ProtocolEvent::Withdraw { user, .. }
            | ProtocolEvent::Borrow { user, .. }
            | ProtocolEvent::Repay { user, .. }
            | ProtocolEvent::CollateralEnabled { user, .. }
            | ProtocolEvent::CollateralDisabled { user, .. }
            | ProtocolEvent::LiquidationCall { user, .. } => smallvec![*user],
            ProtocolEvent::ReserveDataUpdated { .. } | ProtocolEvent::PriceUpdated { .. } => {
                SmallVec::new()
            }
        }
    }
}

fn decode<E: SolEvent>(log: &EventLog) -> ChainResult<E> {
    E::decode_raw_log(log.topics.iter().copied(), &log.data, true)
        .map_err(|e| ChainError::decode(E::SIGNATURE, e))
}

/// Decode one raw log. Returns `Ok(None)` for signatures outside the table.
pub fn decode_log(log: &EventLog) -> ChainResult<Option<ProtocolEvent>> {
    let Some(kind) = log.signature().and_then(EventKind::from_signature) else {
        return Ok(None);
    };

    let event = match kind {
        EventKind::Supply => {
            let e: IPool::Supply = decode(log)?;
            ProtocolEvent::Supply {
                reserve: e.reserve,
                user: e.onBehalfOf,
                amount: e.amount,
            }
        }
        EventKind::Deposit => {
            let e: IPool::Deposit = decode(log)?;
            ProtocolEvent::Supply {
                reserve: e.reserve,
                user: e.onBehalfOf,
                amount: e.amount,
            }
        }
        EventKind::Withdraw => {
            let e: IPool::Withdraw = decode(log)?;
            ProtocolEvent::Withdraw {
                reserve: e.reserve,
                user: e.user,
                amount: e.amount,
            }
        }
        EventKind::Borrow => {
            let e: IPool::Borrow = decode(log)?;
            ProtocolEvent::Borrow {
                reserve: e.reserve,
                user: e.onBehalfOf,
                amount: e.amount,
                mode: InterestRateMode::try_from(e.interestRateMode)?,
            }
        }
        EventKind::Repay => {
            let e: IPool::Repay = decode(log)?;
            ProtocolEvent::Repay {
                reserve: e.reserve,
                user: e.user,
                amount: e.amount,
                use_a_tokens: e.useATokens,
            }
        }
        EventKind::LiquidationCall => {
            let e: IPool::LiquidationCall = decode(log)?;
            ProtocolEvent::LiquidationCall {
                collateral: e.collateralAsset,
                debt: e.debtAsset,
                user: e.user,
                debt_to_cover: e.debtToCover,
                liquidated_collateral: e.liquidatedCollateralAmount,
                liquidator: e.liquidator,
            }
        }
        EventKind::CollateralEnabled => {
            let e: IPool::ReserveUsedAsCollateralEnabled = decode(log)?;
            ProtocolEvent::CollateralEnabled {
                reserve: e.reserve,
                user: e.user,
            }
        }
        EventKind::CollateralDisabled => {
            let e: IPool::ReserveUsedAsCollateralDisabled = decode(log)?;
            ProtocolEvent::CollateralDisabled {
                reserve: e.reserve,
                user: e.user,
            }
        }
        EventKind::ReserveDataUpdated => {
            let e: IPool::ReserveDataUpdated = decode(log)?;
            ProtocolEvent::ReserveDataUpdated {
                reserve: e.reserve,
                liquidity_index: e.liquidityIndex,
                variable_borrow_index: e.variableBorrowIndex,
            }
        }
        EventKind::AnswerUpdated => {
            let e: IAggregator::AnswerUpdated = decode(log)?;
            ProtocolEvent::PriceUpdated {
                aggregator: log.emitter(),
                answer: e.current,
                round_id: e.roundId,
            }
        }
    };

    Ok(Some(event))
}

#[cfg(test)]
pub(crate) mod test_logs {
    //! Raw log builders for tests.

    use super::*;
    use alloy::sol_types::SolValue;

    fn topic(addr: Address) -> B256 {
        addr.into_word()
    }

    pub fn log(emitter: Address, topics: Vec<B256>, data: Vec<u8>) -> EventLog {
        EventLog {
            account: AccountRef { address: emitter },
            topics,
            data: data.into(),
            index: 0,
            transaction: None,
        }
    }

    pub fn supply(pool: Address, reserve: Address, user: Address, amount: u64) -> EventLog {
        log(
            pool,
            vec![
                EventKind::Supply.signature_hash(),
                topic(reserve),
                topic(user),
                B256::ZERO,
            ],
            (user, U256::from(amount)).abi_encode_params(),
        )
    }

    pub fn borrow(pool: Address, reserve: Address, user: Address, amount: u64) -> EventLog {
        log(
            pool,
            vec![
                EventKind::Borrow.signature_hash(),
                topic(reserve),
                topic(user),
                B256::ZERO,
            ],
            // uint8 interestRateMode occupies a full word
            (user, U256::from(amount), U256::from(2u8), U256::ZERO).abi_encode_params(),
        )
    }
}
