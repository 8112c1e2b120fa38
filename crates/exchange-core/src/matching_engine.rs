//! Engine facade.
//!
//! Wires the account ledger, holding store, order lifecycle manager and
//! settlement coordinator together, and runs the arrival matching loop:
//! a new order is matched against resting counter-orders of the same lot
//! in price-time priority, each match settled on its own, and whatever
//! remains rests in the book.
//!
//! Every method takes `&self`; the engine is meant to be shared behind an
//! `Arc` by many concurrent request handlers.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::audit::{AuditOutbox, AuditRecorder, AuditWorker, TradeFacts};
use crate::config::EngineConfig;
use crate::error::{AuditError, EngineError, EngineResult};
use crate::fees::{Money, Price, Quantity};
use crate::holding::{Holding, HoldingStore};
use crate::identity::Principal;
use crate::ids::{AccountId, OrderId, TradeId};
use crate::ledger::{Account, AccountLedger};
use crate::lifecycle::OrderManager;
use crate::lot::LotIdentity;
use crate::messages::{InputMessage, OutputMessage};
use crate::order::{NewOrderRequest, Order};
use crate::settlement::SettlementCoordinator;
use crate::side::Side;
use crate::trade::{TradeRecord, TradeStore};

/// Result of submitting an order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderPlacement {
    /// The order as it stands after arrival matching.
    pub order: Order,
    /// Quantity filled while matching on arrival.
    pub matched_quantity: Quantity,
    /// Trades settled on arrival, in execution order.
    pub trades: Vec<TradeRecord>,
}

/// Certificate order matching and settlement engine.
pub struct MatchingEngine {
    config: Arc<EngineConfig>,
    ledger: Arc<AccountLedger>,
    holdings: Arc<HoldingStore>,
    orders: Arc<OrderManager>,
    trades: Arc<TradeStore>,
    settlement: SettlementCoordinator,
    recorder: Arc<dyn AuditRecorder>,
}

impl fmt::Debug for MatchingEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MatchingEngine")
            .field("config", &self.config)
            .field("trades", &self.trades.len())
            .finish_non_exhaustive()
    }
}

impl MatchingEngine {
    /// Build an engine around `recorder`.
    ///
    /// The returned [`AuditWorker`] must be driven (usually spawned on a
    /// tokio runtime) for trades to reach the recorder. It stops once the
    /// engine is dropped and its retry queue is empty.
    pub fn new(
        config: EngineConfig,
        recorder: Arc<dyn AuditRecorder>,
    ) -> EngineResult<(Self, AuditWorker)> {
        config.validate()?;
        let config = Arc::new(config);
        let ledger = Arc::new(AccountLedger::new(config.currency.clone()));
        let holdings = Arc::new(HoldingStore::new());
        let orders = Arc::new(OrderManager::new(
            Arc::clone(&config),
            Arc::clone(&ledger),
            Arc::clone(&holdings),
        ));
        let trades = Arc::new(TradeStore::new());

        let (outbox, rx): (AuditOutbox, mpsc::UnboundedReceiver<TradeRecord>) =
            AuditOutbox::channel();
        let settlement = SettlementCoordinator::new(
            Arc::clone(&config),
            Arc::clone(&ledger),
            Arc::clone(&holdings),
            Arc::clone(&orders),
            Arc::clone(&trades),
            outbox,
        );
        let worker = AuditWorker::new(
            rx,
            Arc::clone(&recorder),
            Arc::clone(&trades),
            config.audit.clone(),
        );

        let engine = MatchingEngine {
            config,
            ledger,
            holdings,
            orders,
            trades,
            settlement,
            recorder,
        };
        Ok((engine, worker))
    }

    pub fn submit_order(
        &self,
        principal: &Principal,
        request: NewOrderRequest,
    ) -> EngineResult<OrderPlacement> {
        self.submit_order_at(principal, request, Utc::now())
    }

    /// Create an order and match it against the book as of `now`.
    ///
    /// A failed settlement only skips that candidate; the call still
    /// succeeds with whatever was matched.
    pub fn submit_order_at(
        &self,
        principal: &Principal,
        request: NewOrderRequest,
        now: DateTime<Utc>,
    ) -> EngineResult<OrderPlacement> {
        let order = self.orders.create_order(principal, request, now)?;
        self.match_arrival(order, now)
    }

    /// Match a freshly indexed order against the resting counter-orders.
    ///
    /// Under concurrent submission a younger crossing order may already be
    /// indexed when this pass runs, so each fill executes at the limit of
    /// whichever side is older.
    fn match_arrival(&self, mut order: Order, now: DateTime<Utc>) -> EngineResult<OrderPlacement> {
        let mut trades = Vec::new();

        for candidate in self.orders.resting_candidates(&order, now) {
            if !order.is_active() {
                break;
            }
            let candidate = match self.orders.order(candidate.id) {
                Ok(c) if c.is_matchable_at(now) => c,
                _ => continue,
            };
            let fill = order.remaining_quantity.min(candidate.remaining_quantity);
            if fill < order.effective_min_fill() || fill < candidate.effective_min_fill() {
                debug!(
                    order_id = %order.id,
                    candidate = %candidate.id,
                    fill,
                    "fill below minimum; candidate skipped"
                );
                continue;
            }

            let (buy, sell) = match order.side {
                Side::Buy => (order.id, candidate.id),
                Side::Sell => (candidate.id, order.id),
            };
            let price = order.execution_price_with(&candidate);
            match self.settlement.settle(buy, sell, fill, price, now) {
                Ok(trade) => trades.push(trade),
                Err(err) => warn!(
                    order_id = %order.id,
                    candidate = %candidate.id,
                    code = err.code(),
                    error = %err,
                    "settlement aborted; candidate skipped"
                ),
            }
            order = self.orders.order(order.id)?;
        }

        let matched_quantity = trades.iter().map(|t| t.quantity).sum();
        Ok(OrderPlacement {
            order,
            matched_quantity,
            trades,
        })
    }

    pub fn cancel_order(&self, principal: &Principal, order_id: OrderId) -> EngineResult<Order> {
        self.orders.cancel(principal, order_id)
    }

    /// Expire every active order past its expiry. Safe to call repeatedly.
    pub fn sweep_expired(&self, now: DateTime<Utc>) -> Vec<Order> {
        self.orders.sweep_expired(now)
    }

    /// Settle one fill directly, bypassing the matching loop.
    pub fn settle(
        &self,
        buy_order: OrderId,
        sell_order: OrderId,
        quantity: Quantity,
        price: Price,
        now: DateTime<Utc>,
    ) -> EngineResult<TradeRecord> {
        self.settlement.settle(buy_order, sell_order, quantity, price, now)
    }

    pub fn open_account(&self, account: AccountId) -> Account {
        self.ledger.open_account(account)
    }

    pub fn deposit(&self, account: AccountId, amount: Money) -> EngineResult<Account> {
        self.ledger.deposit(account, amount)
    }

    /// Credit certificates of `lot` to an open account.
    pub fn issue_certificates(
        &self,
        account: AccountId,
        lot: &LotIdentity,
        quantity: Quantity,
        price: Price,
    ) -> EngineResult<Holding> {
        let row = self.ledger.row(account)?;
        let mut owner = row.lock();
        let holding = self.holdings.issue(account, lot, quantity, price)?;
        owner.portfolio.certificates_held = owner.portfolio.certificates_held.saturating_add(quantity);
        Ok(holding)
    }

    pub fn lock_holding_until(
        &self,
        account: AccountId,
        lot: &LotIdentity,
        until: DateTime<Utc>,
    ) -> EngineResult<Holding> {
        self.holdings.lock_until(account, lot, until)
    }

    /// Ask the recorder to confirm the audit entry of a trade.
    pub async fn verify_trade(&self, trade_id: TradeId) -> Result<TradeFacts, AuditError> {
        let reference = self
            .trades
            .trade(trade_id)
            .and_then(|t| t.audit_reference)
            .ok_or_else(|| AuditError::NotFound(format!("trade {}", trade_id)))?;
        self.recorder.verify(&reference).await
    }

    /// Handle one session request, turning failures into rejects.
    pub fn process_message(&self, principal: &Principal, msg: InputMessage) -> Vec<OutputMessage> {
        let result = match msg {
            InputMessage::NewOrder(request) => {
                self.submit_order(principal, request).map(|placement| {
                    let mut out = Vec::with_capacity(placement.trades.len() + 1);
                    out.push(OutputMessage::Ack {
                        order: placement.order,
                        matched: placement.matched_quantity,
                    });
                    out.extend(placement.trades.into_iter().map(OutputMessage::Trade));
                    out
                })
            }
            InputMessage::Cancel(order_id) => self
                .cancel_order(principal, order_id)
                .map(|order| vec![OutputMessage::CancelAck(order)]),
            InputMessage::Deposit(amount) => self
                .deposit(principal.account, amount)
                .map(|account| vec![OutputMessage::Balance(account)]),
            InputMessage::Issue {
                lot,
                quantity,
                price,
            } => self
                .issue_certificates(principal.account, &lot, quantity, price)
                .map(|holding| vec![OutputMessage::Holding(holding)]),
            InputMessage::QueryOrder(order_id) => self.query_order(principal, order_id),
            InputMessage::QueryBalance => self.query_balance(principal.account),
        };
        result.unwrap_or_else(|err| vec![OutputMessage::from(err)])
    }

    fn query_order(&self, principal: &Principal, order_id: OrderId) -> EngineResult<Vec<OutputMessage>> {
        let order = self.orders.order(order_id)?;
        if order.account != principal.account {
            return Err(EngineError::PermissionDenied(format!(
                "order {} belongs to another account",
                order_id
            )));
        }
        Ok(vec![OutputMessage::OrderState(order)])
    }

    fn query_balance(&self, account: AccountId) -> EngineResult<Vec<OutputMessage>> {
        let snapshot = self.ledger.account(account)?;
        let mut out = vec![OutputMessage::Balance(snapshot)];
        out.extend(
            self.holdings
                .holdings_of(account)
                .into_iter()
                .map(OutputMessage::Holding),
        );
        Ok(out)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn ledger(&self) -> &AccountLedger {
        &self.ledger
    }

    pub fn holdings(&self) -> &HoldingStore {
        &self.holdings
    }

    pub fn orders(&self) -> &OrderManager {
        &self.orders
    }

    pub fn trades(&self) -> &TradeStore {
        &self.trades
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::InMemoryAuditRecorder;
    use crate::lot::EnergyType;

    fn lot() -> LotIdentity {
        LotIdentity::new("SOLAR-9", EnergyType::Solar, 2024, "US-TX", "I-REC")
    }

    #[test]
    fn older_incoming_order_trades_at_its_own_limit() {
        let (engine, _worker) =
            MatchingEngine::new(EngineConfig::default(), Arc::new(InMemoryAuditRecorder::new())).unwrap();
        let (buyer, seller) = (AccountId(1), AccountId(2));
        engine.open_account(buyer);
        engine.open_account(seller);
        engine.deposit(buyer, 10_000).unwrap();
        engine.issue_certificates(seller, &lot(), 10, 40).unwrap();

        let now = Utc::now();
        // The buy is indexed first; the sell crosses it before the buy's
        // own matching pass runs.
        let bid = engine
            .orders
            .create_order(&Principal::trader(buyer), NewOrderRequest::limit(Side::Buy, lot(), 10, 55), now)
            .unwrap();
        engine
            .orders
            .create_order(&Principal::trader(seller), NewOrderRequest::limit(Side::Sell, lot(), 10, 50), now)
            .unwrap();

        let placement = engine.match_arrival(bid, now).unwrap();
        assert_eq!(placement.matched_quantity, 10);
        assert_eq!(placement.trades.len(), 1);
        assert_eq!(placement.trades[0].price, 55);
    }
}
