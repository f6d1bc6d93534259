//! Packed reserve and user configuration bitfields.
//!
//! Reserve layout (bit ranges inclusive):
//!
//! | bits    | field                     |
//! |---------|---------------------------|
//! | 0-15    | LTV (bps)                 |
//! | 16-31   | liquidation threshold     |
//! | 32-47   | liquidation bonus         |
//! | 48-55   | decimals                  |
//! | 56      | active                    |
//! | 57      | frozen                    |
//! | 58      | borrowing enabled         |
//! | 59      | stable borrowing enabled  |
//! | 60      | paused                    |
//! | 64-79   | reserve factor            |
//! | 80-115  | borrow cap (whole tokens) |
//! | 116-151 | supply cap (whole tokens) |
//! | 152-167 | liquidation protocol fee  |

use alloy::primitives::U256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReserveConfiguration {
    pub ltv: u16,
    pub liquidation_threshold: u16,
    /// Includes the 100% base, e.g. 10500 = 5% bonus.
    pub liquidation_bonus: u16,
    pub decimals: u8,
    pub is_active: bool,
    pub is_frozen: bool,
    pub is_borrowing_enabled: bool,
    pub is_stable_borrowing_enabled: bool,
    pub is_paused: bool,
    pub reserve_factor: u16,
    pub borrow_cap: u64,
    pub supply_cap: u64,
    pub liquidation_protocol_fee: u16,
}

fn bits(data: U256, offset: usize, width: usize) -> u64 {
    let mask = (U256::from(1u8) << width) - U256::from(1u8);
    ((data >> offset) & mask).to::<u64>()
}

fn flag(data: U256, bit: usize) -> bool {
    data.bit(bit)
}

impl ReserveConfiguration {
    pub fn decode(data: U256) -> Self {
        Self {
            ltv: bits(data, 0, 16) as u16,
            liquidation_threshold: bits(data, 16, 16) as u16,
            liquidation_bonus: bits(data, 32, 16) as u16,
            decimals: bits(data, 48, 8) as u8,
            is_active: flag(data, 56),
            is_frozen: flag(data, 57),
            is_borrowing_enabled: flag(data, 58),
            is_stable_borrowing_enabled: flag(data, 59),
            is_paused: flag(data, 60),
            reserve_factor: bits(data, 64, 16) as u16,
            borrow_cap: bits(data, 80, 36),
            supply_cap: bits(data, 116, 36),
            liquidation_protocol_fee: bits(data, 152, 16) as u16,
        }
    }
}

/// Per-user bitfield: bit `2i` = using reserve `i` as collateral, bit
/// `2i + 1` = borrowing reserve `i`, where `i` is the reserve's index in the
/// pool's reserves list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UserConfiguration(pub U256);

impl UserConfiguration {
    pub fn is_using_as_collateral(&self, reserve_index: usize) -> bool {
        reserve_index < 128 && self.0.bit(reserve_index * 2)
    }

    pub fn is_borrowing(&self, reserve_index: usize) -> bool {
        reserve_index < 128 && self.0.bit(reserve_index * 2 + 1)
    }

    pub fn is_using_as_collateral_or_borrowing(&self, reserve_index: usize) -> bool {
        self.is_borrowing(reserve_index) || self.is_using_as_collateral(reserve_index)
    }

    pub fn set_using_as_collateral(&mut self, reserve_index: usize, enabled: bool) {
        if reserve_index < 128 {
            self.0.set_bit(reserve_index * 2, enabled);
        }
    }

    pub fn set_borrowing(&mut self, reserve_index: usize, enabled: bool) {
        if reserve_index < 128 {
            self.0.set_bit(reserve_index * 2 + 1, enabled);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_zero()
    }

    /// Reserve indices with either flag set, ascending.
    pub fn active_indices(&self) -> impl Iterator<Item = usize> + '_ {
        (0..128).filter(move |&i| self.is_using_as_collateral_or_borrowing(i))
    }
}
