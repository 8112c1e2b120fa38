//! Fixed-point money and the platform fee schedule.
//!
//! All cash amounts are integer minor currency units. Percentage fees
//! are expressed in basis points and always rounded down, so the fee on
//! a set of partial fills never exceeds the fee on their sum.

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};

/// Cash amount in minor currency units.
pub type Money = u64;
/// Certificate count.
pub type Quantity = u64;
/// Unit price in minor currency units per certificate.
pub type Price = u64;

const BPS_DENOMINATOR: u128 = 10_000;

/// Fee schedule applied at reservation and settlement time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeeSchedule {
    /// Platform fee charged to each side, in basis points of gross.
    pub platform_fee_bps: u32,
    /// Flat network fee charged to the buyer on every trade.
    pub network_fee: Money,
}

impl Default for FeeSchedule {
    fn default() -> Self {
        FeeSchedule {
            platform_fee_bps: 100,
            network_fee: 25,
        }
    }
}

/// Cash components of one trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TradeAmounts {
    pub gross: Money,
    pub buyer_fee: Money,
    pub seller_fee: Money,
    pub network_fee: Money,
}

impl TradeAmounts {
    /// Total drawn from the buyer.
    pub fn buyer_debit(&self) -> Money {
        self.gross + self.buyer_fee + self.network_fee
    }

    /// Net credited to the seller.
    pub fn seller_credit(&self) -> Money {
        self.gross - self.seller_fee
    }
}

impl FeeSchedule {
    /// `quantity * price`, checked.
    pub fn gross(quantity: Quantity, price: Price) -> EngineResult<Money> {
        quantity
            .checked_mul(price)
            .ok_or_else(|| EngineError::overflow("gross amount"))
    }

    /// Platform fee on a gross amount, rounded down.
    pub fn platform_fee(&self, gross: Money) -> Money {
        let fee = gross as u128 * self.platform_fee_bps as u128 / BPS_DENOMINATOR;
        // bps is far below the denominator in any sane config; clamp anyway.
        fee.min(gross as u128) as Money
    }

    /// Cash a buy order must reserve up front.
    pub fn reservation_for(&self, quantity: Quantity, price: Price) -> EngineResult<Money> {
        let gross = Self::gross(quantity, price)?;
        gross
            .checked_add(self.platform_fee(gross))
            .and_then(|v| v.checked_add(self.network_fee))
            .ok_or_else(|| EngineError::overflow("reservation"))
    }

    /// Full cash breakdown of a trade.
    pub fn trade_amounts(&self, quantity: Quantity, price: Price) -> EngineResult<TradeAmounts> {
        let gross = Self::gross(quantity, price)?;
        let fee = self.platform_fee(gross);
        let amounts = TradeAmounts {
            gross,
            buyer_fee: fee,
            seller_fee: fee,
            network_fee: self.network_fee,
        };
        gross
            .checked_add(fee)
            .and_then(|v| v.checked_add(self.network_fee))
            .ok_or_else(|| EngineError::overflow("buyer debit"))?;
        Ok(amounts)
    }
}

/// Quantity-weighted average of two positions, rounded down.
pub fn weighted_average_price(
    held: Quantity,
    held_price: Price,
    added: Quantity,
    added_price: Price,
) -> Price {
    let total = held as u128 + added as u128;
    if total == 0 {
        return 0;
    }
    let cost = held as u128 * held_price as u128 + added as u128 * added_price as u128;
    (cost / total) as Price
}
