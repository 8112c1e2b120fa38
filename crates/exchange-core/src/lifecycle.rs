//! Order lifecycle manager: creation, fills, cancellation and expiry.
//!
//! Lock order, shared with the settlement coordinator:
//! order rows (ascending id) -> account rows (ascending id) -> lot
//! holdings -> order book. A path may skip levels but never acquires an
//! earlier level while holding a later one.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::fees::{Price, Quantity};
use crate::holding::{Holding, HoldingStore};
use crate::identity::Principal;
use crate::ids::{AccountId, IdSequence, OrderId};
use crate::ledger::{Account, AccountLedger};
use crate::lot::LotIdentity;
use crate::order::{NewOrderRequest, Order, OrderStatus};
use crate::order_book::{OrderBook, RestingEntry};
use crate::side::Side;

/// Owns order rows and the per-lot resting indexes.
#[derive(Debug)]
pub struct OrderManager {
    config: Arc<EngineConfig>,
    ledger: Arc<AccountLedger>,
    holdings: Arc<HoldingStore>,
    orders: DashMap<OrderId, Arc<Mutex<Order>>>,
    books: DashMap<LotIdentity, Arc<Mutex<OrderBook>>>,
    ids: IdSequence,
}

impl OrderManager {
    pub fn new(
        config: Arc<EngineConfig>,
        ledger: Arc<AccountLedger>,
        holdings: Arc<HoldingStore>,
    ) -> Self {
        OrderManager {
            config,
            ledger,
            holdings,
            orders: DashMap::new(),
            books: DashMap::new(),
            ids: IdSequence::new(),
        }
    }

    /// Validate, reserve cash or lock the backing holding, and rest the
    /// order in `pending`.
    pub fn create_order(
        &self,
        principal: &Principal,
        mut request: NewOrderRequest,
        now: DateTime<Utc>,
    ) -> EngineResult<Order> {
        principal.ensure_can_trade()?;
        self.validate_request(&request, now)?;
        request.policy.min_fill_quantity = request.policy.min_fill_quantity.max(1);

        let account_row = self.ledger.row(principal.account)?;
        let id = OrderId(self.ids.next());

        let order = match request.side {
            Side::Buy => {
                let required = self
                    .config
                    .fees
                    .reservation_for(request.quantity, request.price)?;
                let mut account = account_row.lock();
                account.reserve(required)?;
                let order = Order::new(id, principal.account, &request, required, now);
                self.index(&order);
                order
            }
            Side::Sell => {
                let rows = self.holdings.lot(&request.lot);
                let mut rows = rows.lock();
                let holding = rows.get_mut(principal.account).ok_or(
                    EngineError::InsufficientHoldings {
                        required: request.quantity,
                        held: 0,
                    },
                )?;
                if holding.is_locked_at(now) {
                    return Err(EngineError::Validation(format!(
                        "holding of lot {} is locked",
                        request.lot
                    )));
                }
                if holding.quantity < request.quantity {
                    return Err(EngineError::InsufficientHoldings {
                        required: request.quantity,
                        held: holding.quantity,
                    });
                }
                holding.lock_for(id);
                let order = Order::new(id, principal.account, &request, 0, now);
                self.index(&order);
                order
            }
        };

        info!(
            order_id = %order.id,
            account = %order.account,
            side = %order.side,
            lot = %order.lot,
            quantity = order.quantity,
            price = order.price,
            reserved = order.reserved_cash,
            "order accepted"
        );
        Ok(order)
    }

    /// Cancel an active order owned by the caller.
    pub fn cancel(&self, principal: &Principal, order_id: OrderId) -> EngineResult<Order> {
        principal.ensure_can_trade()?;
        let row = self.row(order_id)?;
        let mut order = row.lock();
        if order.account != principal.account {
            return Err(EngineError::PermissionDenied(format!(
                "order {} belongs to another account",
                order_id
            )));
        }
        if !order.is_active() {
            return Err(order.invalid_state());
        }
        self.close_locked(&mut order, OrderStatus::Cancelled)?;
        info!(order_id = %order.id, account = %order.account, "order cancelled");
        Ok(order.clone())
    }

    /// Record a fill on an order outside of settlement.
    ///
    /// Completing a buy order hands its residual reservation back;
    /// completing a sell order unlocks its holding.
    pub fn apply_fill(&self, order_id: OrderId, quantity: Quantity) -> EngineResult<Order> {
        let row = self.row(order_id)?;
        let mut order = row.lock();
        match order.side {
            Side::Buy => {
                let account_row = self.ledger.row(order.account)?;
                let mut account = account_row.lock();
                Self::apply_fill_to(&mut order, quantity, Some(&mut *account), None)?;
            }
            Side::Sell => {
                let rows = self.holdings.lot(&order.lot);
                let mut rows = rows.lock();
                let holding = rows.get_mut(order.account);
                Self::apply_fill_to(&mut order, quantity, None, holding)?;
            }
        }
        if order.status.is_terminal() {
            self.unindex(&order);
        }
        Ok(order.clone())
    }

    /// Fill `order` by `quantity` using already-locked rows.
    ///
    /// On error neither the order nor the rows are modified.
    pub(crate) fn apply_fill_to(
        order: &mut Order,
        quantity: Quantity,
        buyer: Option<&mut Account>,
        backing: Option<&mut Holding>,
    ) -> EngineResult<OrderStatus> {
        let mut next = order.clone();
        let status = next.fill(quantity)?;
        if status == OrderStatus::Completed {
            match next.side {
                Side::Buy if next.reserved_cash > 0 => {
                    let account = buyer.ok_or_else(|| {
                        EngineError::Internal(format!("order {} filled without its account row", next.id))
                    })?;
                    account.release(next.reserved_cash)?;
                    debug!(order_id = %next.id, released = next.reserved_cash, "residual reservation released");
                    next.reserved_cash = 0;
                }
                Side::Buy => {}
                Side::Sell => {
                    if let Some(holding) = backing {
                        holding.unlock_for(next.id);
                    }
                }
            }
        }
        *order = next;
        Ok(status)
    }

    /// Expire every active order whose expiry is at or before `now`.
    ///
    /// Idempotent: already-expired orders are skipped.
    pub fn sweep_expired(&self, now: DateTime<Utc>) -> Vec<Order> {
        let rows: Vec<_> = self.orders.iter().map(|r| Arc::clone(r.value())).collect();
        let mut expired = Vec::new();
        for row in rows {
            let mut order = row.lock();
            if !order.is_active() || !order.is_expired_at(now) {
                continue;
            }
            match self.close_locked(&mut order, OrderStatus::Expired) {
                Ok(()) => {
                    info!(order_id = %order.id, account = %order.account, "order expired");
                    expired.push(order.clone());
                }
                Err(err) => warn!(order_id = %order.id, error = %err, "failed to expire order"),
            }
        }
        expired.sort_by_key(|o| o.id);
        expired
    }

    pub fn order(&self, order_id: OrderId) -> EngineResult<Order> {
        let row = self.row(order_id)?;
        let order = row.lock();
        Ok(order.clone())
    }

    /// Every order placed by an account, oldest first.
    pub fn orders_of(&self, account: AccountId) -> Vec<Order> {
        let rows: Vec<_> = self.orders.iter().map(|r| Arc::clone(r.value())).collect();
        let mut out: Vec<Order> = rows
            .iter()
            .map(|r| r.lock().clone())
            .filter(|o| o.account == account)
            .collect();
        out.sort_by_key(|o| o.id);
        out
    }

    /// Best resting bid and ask for a lot.
    pub fn best_prices(&self, lot: &LotIdentity) -> (Option<Price>, Option<Price>) {
        match self.books.get(lot).map(|r| Arc::clone(r.value())) {
            Some(book) => {
                let book = book.lock();
                (book.best_bid_price(), book.best_ask_price())
            }
            None => (None, None),
        }
    }

    /// Matchable counter-orders for `aggressor`, in price-time priority.
    pub(crate) fn resting_candidates(&self, aggressor: &Order, now: DateTime<Utc>) -> Vec<Order> {
        let book = match self.books.get(&aggressor.lot).map(|r| Arc::clone(r.value())) {
            Some(book) => book,
            None => return Vec::new(),
        };
        let entries = book.lock().candidates_for(aggressor.side, aggressor.price);
        entries
            .into_iter()
            .filter(|e| e.account != aggressor.account && e.order_id != aggressor.id)
            .filter_map(|e| self.order(e.order_id).ok())
            .filter(|c| {
                c.is_matchable_at(now)
                    && c.side == aggressor.side.opposite()
                    && c.lot == aggressor.lot
            })
            .collect()
    }

    pub(crate) fn row(&self, order_id: OrderId) -> EngineResult<Arc<Mutex<Order>>> {
        self.orders
            .get(&order_id)
            .map(|r| Arc::clone(r.value()))
            .ok_or_else(|| EngineError::order_not_found(order_id))
    }

    /// Drop a no-longer-active order from its book.
    pub(crate) fn unindex(&self, order: &Order) {
        if let Some(book) = self.books.get(&order.lot).map(|r| Arc::clone(r.value())) {
            book.lock().remove(order.side, order.price, order.id);
        }
    }

    fn index(&self, order: &Order) {
        self.orders
            .insert(order.id, Arc::new(Mutex::new(order.clone())));
        let book = {
            let entry = self
                .books
                .entry(order.lot.clone())
                .or_insert_with(|| Arc::new(Mutex::new(OrderBook::new())));
            Arc::clone(entry.value())
        };
        book.lock().insert(RestingEntry {
            order_id: order.id,
            account: order.account,
            side: order.side,
            price: order.price,
            created_at: order.created_at,
        });
    }

    /// Cancel or expire a locked, active order: release its reservation
    /// or unlock its holding, then unindex it.
    fn close_locked(&self, order: &mut Order, status: OrderStatus) -> EngineResult<()> {
        match order.side {
            Side::Buy => {
                let row = self.ledger.row(order.account)?;
                let mut account = row.lock();
                account.release(order.reserved_cash)?;
                order.close(status)?;
                order.reserved_cash = 0;
            }
            Side::Sell => {
                let rows = self.holdings.lot(&order.lot);
                let mut rows = rows.lock();
                if let Some(holding) = rows.get_mut(order.account) {
                    holding.unlock_for(order.id);
                }
                order.close(status)?;
            }
        }
        self.unindex(order);
        Ok(())
    }

    fn validate_request(&self, request: &NewOrderRequest, now: DateTime<Utc>) -> EngineResult<()> {
        if request.quantity == 0 || request.quantity > self.config.max_order_quantity {
            return Err(EngineError::Validation(format!(
                "quantity {} outside 1..={}",
                request.quantity, self.config.max_order_quantity
            )));
        }
        if request.price < self.config.min_price || request.price > self.config.max_price {
            return Err(EngineError::Validation(format!(
                "price {} outside {}..={}",
                request.price, self.config.min_price, self.config.max_price
            )));
        }
        request.lot.validate()?;
        if request.policy.allow_partial && request.policy.min_fill_quantity > request.quantity {
            return Err(EngineError::Validation(format!(
                "minimum fill {} exceeds quantity {}",
                request.policy.min_fill_quantity, request.quantity
            )));
        }
        if let Some(expires_at) = request.expires_at {
            if expires_at <= now {
                return Err(EngineError::Validation("order is already expired".into()));
            }
        }
        Ok(())
    }
}
