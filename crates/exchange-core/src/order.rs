//! Order record and its state machine.
//!
//! ```text
//! pending --fill--> partial --fill--> completed
//!    |                 |
//!    +--cancel/expire--+--> cancelled | expired
//! ```
//!
//! Terminal states never change again.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};
use crate::fees::{Money, Price, Quantity};
use crate::ids::{AccountId, OrderId};
use crate::lot::LotIdentity;
use crate::side::Side;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Partial,
    Completed,
    Cancelled,
    Expired,
}

impl OrderStatus {
    /// `pending` or `partial`: still a match candidate.
    pub fn is_active(self) -> bool {
        matches!(self, OrderStatus::Pending | OrderStatus::Partial)
    }

    pub fn is_terminal(self) -> bool {
        !self.is_active()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Partial => "partial",
            OrderStatus::Completed => "completed",
            OrderStatus::Cancelled => "cancelled",
            OrderStatus::Expired => "expired",
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Partial-fill policy.
///
/// With `allow_partial == false` every fill must take the whole
/// remaining quantity, so such an order settles in exactly one trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FillPolicy {
    pub allow_partial: bool,
    pub min_fill_quantity: Quantity,
}

impl Default for FillPolicy {
    fn default() -> Self {
        FillPolicy {
            allow_partial: true,
            min_fill_quantity: 1,
        }
    }
}

impl FillPolicy {
    pub fn all_or_none() -> Self {
        FillPolicy {
            allow_partial: false,
            min_fill_quantity: 1,
        }
    }

    pub fn with_min_fill(min_fill_quantity: Quantity) -> Self {
        FillPolicy {
            allow_partial: true,
            min_fill_quantity,
        }
    }
}

/// Order creation request as received from the request layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewOrderRequest {
    pub side: Side,
    pub lot: LotIdentity,
    pub quantity: Quantity,
    pub price: Price,
    pub policy: FillPolicy,
    pub expires_at: Option<DateTime<Utc>>,
}

impl NewOrderRequest {
    /// Good-till-cancelled request with the default fill policy.
    pub fn limit(side: Side, lot: LotIdentity, quantity: Quantity, price: Price) -> Self {
        NewOrderRequest {
            side,
            lot,
            quantity,
            price,
            policy: FillPolicy::default(),
            expires_at: None,
        }
    }

    pub fn with_policy(mut self, policy: FillPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn expiring_at(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }
}

/// A standing instruction to buy or sell a certificate lot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub account: AccountId,
    pub side: Side,
    pub lot: LotIdentity,
    pub quantity: Quantity,
    pub remaining_quantity: Quantity,
    pub price: Price,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub policy: FillPolicy,
    /// Buy orders: reservation still earmarked for this order. Always 0 for sells.
    pub reserved_cash: Money,
}

impl Order {
    pub(crate) fn new(
        id: OrderId,
        account: AccountId,
        request: &NewOrderRequest,
        reserved_cash: Money,
        created_at: DateTime<Utc>,
    ) -> Self {
        Order {
            id,
            account,
            side: request.side,
            lot: request.lot.clone(),
            quantity: request.quantity,
            remaining_quantity: request.quantity,
            price: request.price,
            status: OrderStatus::Pending,
            created_at,
            expires_at: request.expires_at,
            policy: request.policy,
            reserved_cash,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    pub fn filled_quantity(&self) -> Quantity {
        self.quantity - self.remaining_quantity
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map_or(false, |t| t <= now)
    }

    /// Active and not past expiry.
    pub fn is_matchable_at(&self, now: DateTime<Utc>) -> bool {
        self.is_active() && !self.is_expired_at(now)
    }

    /// Smallest fill this order accepts right now.
    pub fn effective_min_fill(&self) -> Quantity {
        if self.policy.allow_partial {
            self.policy.min_fill_quantity.max(1).min(self.remaining_quantity)
        } else {
            self.remaining_quantity
        }
    }

    /// Price a fill between `self` and `other` executes at: the limit of
    /// the older order, by `(created_at, id)`.
    pub fn execution_price_with(&self, other: &Order) -> Price {
        if (self.created_at, self.id) <= (other.created_at, other.id) {
            self.price
        } else {
            other.price
        }
    }

    /// `InvalidState` unless the order is still a match candidate.
    pub fn ensure_matchable(&self, now: DateTime<Utc>) -> EngineResult<()> {
        if self.is_matchable_at(now) {
            Ok(())
        } else if self.is_active() {
            Err(EngineError::InvalidState {
                order_id: self.id,
                status: OrderStatus::Expired,
            })
        } else {
            Err(self.invalid_state())
        }
    }

    /// Decrease the remaining quantity by `quantity` and recompute status.
    ///
    /// Validates before mutating: on error the order is untouched.
    pub fn fill(&mut self, quantity: Quantity) -> EngineResult<OrderStatus> {
        if !self.is_active() {
            return Err(self.invalid_state());
        }
        if quantity == 0 || quantity > self.remaining_quantity {
            return Err(EngineError::Validation(format!(
                "fill of {} against order {} with {} remaining",
                quantity, self.id, self.remaining_quantity
            )));
        }
        self.remaining_quantity -= quantity;
        self.status = if self.remaining_quantity == 0 {
            OrderStatus::Completed
        } else {
            OrderStatus::Partial
        };
        Ok(self.status)
    }

    /// Move an active order into a terminal non-fill state.
    pub(crate) fn close(&mut self, status: OrderStatus) -> EngineResult<()> {
        debug_assert!(matches!(status, OrderStatus::Cancelled | OrderStatus::Expired));
        if !self.is_active() {
            return Err(self.invalid_state());
        }
        self.status = status;
        Ok(())
    }

    pub(crate) fn invalid_state(&self) -> EngineError {
        EngineError::InvalidState {
            order_id: self.id,
            status: self.status,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lot::EnergyType;

    fn order(quantity: Quantity, policy: FillPolicy) -> Order {
        let request = NewOrderRequest {
            side: Side::Sell,
            lot: LotIdentity::new("F", EnergyType::Solar, 2024, "US-CA", "I-REC"),
            quantity,
            price: 50,
            policy,
            expires_at: None,
        };
        Order::new(OrderId(1), AccountId(1), &request, 0, Utc::now())
    }

    #[test]
    fn fills_walk_pending_partial_completed() {
        let mut o = order(100, FillPolicy::default());
        assert_eq!(o.status, OrderStatus::Pending);
        assert_eq!(o.fill(40).unwrap(), OrderStatus::Partial);
        assert_eq!(o.remaining_quantity, 60);
        assert_eq!(o.fill(60).unwrap(), OrderStatus::Completed);
        assert_eq!(o.remaining_quantity, 0);
        assert_eq!(o.filled_quantity(), 100);
    }

    #[test]
    fn overfill_leaves_order_untouched() {
        let mut o = order(10, FillPolicy::default());
        assert!(o.fill(11).is_err());
        assert!(o.fill(0).is_err());
        assert_eq!(o.remaining_quantity, 10);
        assert_eq!(o.status, OrderStatus::Pending);
    }

    #[test]
    fn terminal_orders_reject_fills_and_closes() {
        let mut o = order(10, FillPolicy::default());
        o.close(OrderStatus::Cancelled).unwrap();
        assert!(matches!(o.fill(1), Err(EngineError::InvalidState { .. })));
        assert!(matches!(
            o.close(OrderStatus::Cancelled),
            Err(EngineError::InvalidState { status: OrderStatus::Cancelled, .. })
        ));
    }

    #[test]
    fn effective_min_fill_follows_policy() {
        let o = order(100, FillPolicy::with_min_fill(30));
        assert_eq!(o.effective_min_fill(), 30);

        let mut o = order(100, FillPolicy::with_min_fill(30));
        o.fill(80).unwrap();
        assert_eq!(o.effective_min_fill(), 20);

        let o = order(100, FillPolicy::all_or_none());
        assert_eq!(o.effective_min_fill(), 100);
    }

    #[test]
    fn expiry_is_inclusive() {
        let mut o = order(10, FillPolicy::default());
        let now = Utc::now();
        o.expires_at = Some(now);
        assert!(o.is_expired_at(now));
        assert!(!o.is_matchable_at(now));
        assert!(o.ensure_matchable(now).is_err());
    }

    #[test]
    fn execution_price_follows_the_older_order() {
        let at = Utc::now();
        let mut older = order(10, FillPolicy::default());
        older.created_at = at;
        let mut younger = order(10, FillPolicy::default());
        younger.id = OrderId(2);
        younger.side = Side::Buy;
        younger.price = 55;
        younger.created_at = at;

        assert_eq!(older.execution_price_with(&younger), 50);
        assert_eq!(younger.execution_price_with(&older), 50);

        younger.created_at = at - chrono::Duration::seconds(1);
        assert_eq!(older.execution_price_with(&younger), 55);
    }
}
