//! Trade records and the append-only trade store.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::audit::AuditReference;
use crate::fees::{Money, Price, Quantity, TradeAmounts};
use crate::ids::{AccountId, OrderId, TradeId};
use crate::lot::LotIdentity;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeStatus {
    Completed,
}

/// Immutable result of one settlement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeRecord {
    pub id: TradeId,
    pub buyer: AccountId,
    pub seller: AccountId,
    pub buy_order: OrderId,
    pub sell_order: OrderId,
    pub lot: LotIdentity,
    pub quantity: Quantity,
    pub price: Price,
    pub gross: Money,
    pub buyer_fee: Money,
    pub seller_fee: Money,
    pub network_fee: Money,
    pub status: TradeStatus,
    pub settled_at: DateTime<Utc>,
    /// Filled in once, after the audit recorder acknowledges the trade.
    pub audit_reference: Option<AuditReference>,
}

impl TradeRecord {
    pub fn amounts(&self) -> TradeAmounts {
        TradeAmounts {
            gross: self.gross,
            buyer_fee: self.buyer_fee,
            seller_fee: self.seller_fee,
            network_fee: self.network_fee,
        }
    }

}

/// Append-only store of settled trades.
#[derive(Debug, Default)]
pub struct TradeStore {
    trades: RwLock<BTreeMap<TradeId, TradeRecord>>,
}

impl TradeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn append(&self, trade: TradeRecord) {
        self.trades.write().insert(trade.id, trade);
    }

    /// Attach the audit reference. Write-once: returns `false` if the
    /// trade is unknown or already carries a reference.
    pub fn attach_audit_reference(&self, id: TradeId, reference: AuditReference) -> bool {
        let mut trades = self.trades.write();
        match trades.get_mut(&id) {
            Some(trade) if trade.audit_reference.is_none() => {
                trade.audit_reference = Some(reference);
                true
            }
            _ => false,
        }
    }

    pub fn trade(&self, id: TradeId) -> Option<TradeRecord> {
        self.trades.read().get(&id).cloned()
    }

    /// Every trade, in settlement order.
    pub fn all(&self) -> Vec<TradeRecord> {
        self.trades.read().values().cloned().collect()
    }

    pub fn for_order(&self, order: OrderId) -> Vec<TradeRecord> {
        self.trades
            .read()
            .values()
            .filter(|t| t.buy_order == order || t.sell_order == order)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.trades.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.trades.read().is_empty()
    }
}
