//! Transport-agnostic request and event types.
//!
//! - [`InputMessage`]: what a session asks the engine to do.
//! - [`OutputMessage`]: what the engine reports back.
//!
//! The CSV encoding lives in the `exchange-protocol` crate.

use crate::error::EngineError;
use crate::fees::{Money, Price, Quantity};
use crate::holding::Holding;
use crate::ids::OrderId;
use crate::ledger::Account;
use crate::lot::LotIdentity;
use crate::order::{NewOrderRequest, Order};
use crate::trade::TradeRecord;

/// A request made on behalf of an authenticated principal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputMessage {
    /// Create an order and match it immediately.
    NewOrder(NewOrderRequest),

    /// Cancel one of the caller's active orders.
    Cancel(OrderId),

    /// Credit cash to the caller's account.
    Deposit(Money),

    /// Credit certificates of a lot to the caller, acquired at `price`.
    Issue {
        lot: LotIdentity,
        quantity: Quantity,
        price: Price,
    },

    /// Look up one of the caller's orders.
    QueryOrder(OrderId),

    /// Cash position and holdings of the caller.
    QueryBalance,
}

/// An event emitted by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputMessage {
    /// Order accepted; `matched` is the quantity filled on arrival.
    Ack { order: Order, matched: Quantity },

    /// A settled trade.
    Trade(TradeRecord),

    /// Order cancelled at the owner's request.
    CancelAck(Order),

    /// Order expired by the sweeper.
    Expired(Order),

    /// Request refused.
    Reject { code: &'static str, message: String },

    /// Cash position snapshot.
    Balance(Account),

    /// One holding snapshot.
    Holding(Holding),

    /// One order snapshot.
    OrderState(Order),
}

impl OutputMessage {
    pub fn reject(err: &EngineError) -> Self {
        OutputMessage::Reject {
            code: err.code(),
            message: err.to_string(),
        }
    }

    /// Trades and expiries concern more than the requesting session.
    pub fn is_broadcast(&self) -> bool {
        matches!(self, OutputMessage::Trade(_) | OutputMessage::Expired(_))
    }
}

impl From<EngineError> for OutputMessage {
    fn from(err: EngineError) -> Self {
        OutputMessage::reject(&err)
    }
}
