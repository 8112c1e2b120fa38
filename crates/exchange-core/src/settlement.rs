//! Atomic settlement of one fill between a buy and a sell order.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, MutexGuard};
use tracing::info;

use crate::audit::AuditOutbox;
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::fees::{Price, Quantity};
use crate::holding::HoldingStore;
use crate::ids::{IdSequence, OrderId, TradeId};
use crate::ledger::AccountLedger;
use crate::lifecycle::OrderManager;
use crate::side::Side;
use crate::trade::{TradeRecord, TradeStatus, TradeStore};

/// Moves certificates and cash for a matched pair of orders.
///
/// Every row touched by a settlement is locked for its whole duration,
/// changes are staged on copies, and nothing is written back unless all
/// of them succeed.
#[derive(Debug)]
pub struct SettlementCoordinator {
    config: Arc<EngineConfig>,
    ledger: Arc<AccountLedger>,
    holdings: Arc<HoldingStore>,
    orders: Arc<OrderManager>,
    trades: Arc<TradeStore>,
    outbox: AuditOutbox,
    trade_ids: IdSequence,
}

impl SettlementCoordinator {
    pub fn new(
        config: Arc<EngineConfig>,
        ledger: Arc<AccountLedger>,
        holdings: Arc<HoldingStore>,
        orders: Arc<OrderManager>,
        trades: Arc<TradeStore>,
        outbox: AuditOutbox,
    ) -> Self {
        SettlementCoordinator {
            config,
            ledger,
            holdings,
            orders,
            trades,
            outbox,
            trade_ids: IdSequence::new(),
        }
    }

    /// Settle `quantity` certificates at `price` between two orders.
    pub fn settle(
        &self,
        buy_id: OrderId,
        sell_id: OrderId,
        quantity: Quantity,
        price: Price,
        now: DateTime<Utc>,
    ) -> EngineResult<TradeRecord> {
        if buy_id == sell_id {
            return Err(EngineError::Validation(format!(
                "order {} cannot trade with itself",
                buy_id
            )));
        }
        if quantity == 0 {
            return Err(EngineError::Validation("settlement quantity must be positive".into()));
        }

        let buy_row = self.orders.row(buy_id)?;
        let sell_row = self.orders.row(sell_id)?;
        let (mut buy, mut sell) = lock_pair(&buy_row, &sell_row, buy_id < sell_id);

        if buy.side != Side::Buy || sell.side != Side::Sell {
            return Err(EngineError::Validation(format!(
                "orders {} and {} are not a buy/sell pair",
                buy_id, sell_id
            )));
        }
        if buy.lot != sell.lot {
            return Err(EngineError::Validation(format!(
                "orders {} and {} are for different lots",
                buy_id, sell_id
            )));
        }
        if buy.account == sell.account {
            return Err(EngineError::SelfTrade(buy.account));
        }
        buy.ensure_matchable(now)?;
        sell.ensure_matchable(now)?;
        if price < sell.price || price > buy.price {
            return Err(EngineError::Validation(format!(
                "price {} outside limits {}..={}",
                price, sell.price, buy.price
            )));
        }
        let amounts = self.config.fees.trade_amounts(quantity, price)?;
        let buyer_debit = amounts.buyer_debit();
        let seller_credit = amounts.seller_credit();

        let buyer_row = self.ledger.row(buy.account)?;
        let seller_row = self.ledger.row(sell.account)?;
        let (mut buyer, mut seller) =
            lock_pair(&buyer_row, &seller_row, buy.account < sell.account);
        let lot_rows = self.holdings.lot(&buy.lot);
        let mut lot = lot_rows.lock();

        let mut next_buy = buy.clone();
        let mut next_sell = sell.clone();
        let mut next_buyer = buyer.clone();
        let mut next_seller = seller.clone();
        let mut seller_holding = lot.get(sell.account).cloned().ok_or(
            EngineError::InsufficientHoldings {
                required: quantity,
                held: 0,
            },
        )?;
        let mut buyer_holding = lot.staged(buy.account);

        seller_holding.debit(quantity, sell.id, now)?;

        let from_reservation = buyer_debit.min(next_buy.reserved_cash);
        let top_up = buyer_debit - from_reservation;
        next_buyer.spend(from_reservation, top_up)?;
        next_buy.reserved_cash -= from_reservation;

        next_seller.credit(seller_credit)?;
        buyer_holding.credit(quantity, price)?;

        let bought = &mut next_buyer.portfolio;
        bought.certificates_held = bought.certificates_held.saturating_add(quantity);
        bought.certificates_bought = bought.certificates_bought.saturating_add(quantity);
        bought.cash_spent = bought.cash_spent.saturating_add(buyer_debit);
        bought.fees_paid = bought
            .fees_paid
            .saturating_add(amounts.buyer_fee + amounts.network_fee);
        bought.trade_count += 1;

        let sold = &mut next_seller.portfolio;
        sold.certificates_held = sold.certificates_held.saturating_sub(quantity);
        sold.certificates_sold = sold.certificates_sold.saturating_add(quantity);
        sold.cash_received = sold.cash_received.saturating_add(seller_credit);
        sold.fees_paid = sold.fees_paid.saturating_add(amounts.seller_fee);
        sold.trade_count += 1;

        OrderManager::apply_fill_to(&mut next_buy, quantity, Some(&mut next_buyer), None)?;
        OrderManager::apply_fill_to(&mut next_sell, quantity, None, Some(&mut seller_holding))?;

        // Everything staged; write back.
        *buyer = next_buyer;
        *seller = next_seller;
        lot.commit(seller_holding);
        lot.commit(buyer_holding);
        *buy = next_buy;
        *sell = next_sell;

        let trade = TradeRecord {
            id: TradeId(self.trade_ids.next()),
            buyer: buy.account,
            seller: sell.account,
            buy_order: buy.id,
            sell_order: sell.id,
            lot: buy.lot.clone(),
            quantity,
            price,
            gross: amounts.gross,
            buyer_fee: amounts.buyer_fee,
            seller_fee: amounts.seller_fee,
            network_fee: amounts.network_fee,
            status: TradeStatus::Completed,
            settled_at: now,
            audit_reference: None,
        };
        self.trades.append(trade.clone());
        if buy.status.is_terminal() {
            self.orders.unindex(&buy);
        }
        if sell.status.is_terminal() {
            self.orders.unindex(&sell);
        }
        drop(lot);
        drop((buyer, seller));
        drop((buy, sell));

        info!(
            trade_id = %trade.id,
            buy_order = %trade.buy_order,
            sell_order = %trade.sell_order,
            lot = %trade.lot,
            quantity,
            price,
            gross = trade.gross,
            "trade settled"
        );
        self.outbox.dispatch(&trade);
        Ok(trade)
    }
}

/// Lock two rows, `a` first when `a_first` holds. Guards come back as
/// `(a, b)` either way.
fn lock_pair<'a, T>(
    a: &'a Mutex<T>,
    b: &'a Mutex<T>,
    a_first: bool,
) -> (MutexGuard<'a, T>, MutexGuard<'a, T>) {
    if a_first {
        let ga = a.lock();
        let gb = b.lock();
        (ga, gb)
    } else {
        let gb = b.lock();
        let ga = a.lock();
        (ga, gb)
    }
}
