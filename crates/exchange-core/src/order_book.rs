//! Per-lot index of resting orders with price-time priority.
//!
//! - Bids: descending by price (best = highest).
//! - Asks: ascending by price (best = lowest).
//! - Within a price level: earliest creation time first, then order id.
//!
//! The book only indexes order ids; the order rows themselves live in
//! the lifecycle manager and are re-read (and locked) before any match
//! is settled, so an entry here is a hint, never the source of truth.

use std::collections::{BTreeMap, VecDeque};

use chrono::{DateTime, Utc};

use crate::fees::Price;
use crate::ids::{AccountId, OrderId};
use crate::side::Side;

/// Index entry for one resting order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestingEntry {
    pub order_id: OrderId,
    pub account: AccountId,
    pub side: Side,
    pub price: Price,
    pub created_at: DateTime<Utc>,
}

impl RestingEntry {
    fn priority_key(&self) -> (DateTime<Utc>, OrderId) {
        (self.created_at, self.order_id)
    }
}

/// Resting-order index for a single lot.
#[derive(Debug, Default)]
pub struct OrderBook {
    /// Bids: price -> queue in time priority. Highest key is best.
    bids: BTreeMap<Price, VecDeque<RestingEntry>>,

    /// Asks: price -> queue in time priority. Lowest key is best.
    asks: BTreeMap<Price, VecDeque<RestingEntry>>,
}

impl OrderBook {
    pub fn new() -> Self {
        OrderBook::default()
    }

    /// Add an order, keeping its level sorted by (created_at, id).
    pub fn insert(&mut self, entry: RestingEntry) {
        let level = self.side_mut(entry.side).entry(entry.price).or_default();
        let key = entry.priority_key();
        let pos = level.partition_point(|e| e.priority_key() <= key);
        level.insert(pos, entry);
    }

    /// Remove an order. Returns `true` if it was present.
    pub fn remove(&mut self, side: Side, price: Price, order_id: OrderId) -> bool {
        let levels = self.side_mut(side);
        let mut found = false;
        if let Some(level) = levels.get_mut(&price) {
            if let Some(idx) = level.iter().position(|e| e.order_id == order_id) {
                level.remove(idx);
                found = true;
            }
            if level.is_empty() {
                levels.remove(&price);
            }
        }
        found
    }

    /// Resting counter-orders an aggressor on `side` with limit `price`
    /// may trade against, best first.
    pub fn candidates_for(&self, side: Side, price: Price) -> Vec<RestingEntry> {
        match side {
            // Buy aggressor: asks priced at or below its limit, cheapest first.
            Side::Buy => self
                .asks
                .range(..=price)
                .flat_map(|(_, level)| level.iter().copied())
                .collect(),
            // Sell aggressor: bids priced at or above its limit, richest first.
            Side::Sell => self
                .bids
                .range(price..)
                .rev()
                .flat_map(|(_, level)| level.iter().copied())
                .collect(),
        }
    }

    /// Best bid price, if any.
    pub fn best_bid_price(&self) -> Option<Price> {
        self.bids.keys().next_back().copied()
    }

    /// Best ask price, if any.
    pub fn best_ask_price(&self) -> Option<Price> {
        self.asks.keys().next().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.bids.is_empty() && self.asks.is_empty()
    }

    fn side_mut(&mut self, side: Side) -> &mut BTreeMap<Price, VecDeque<RestingEntry>> {
        match side {
            Side::Buy => &mut self.bids,
            Side::Sell => &mut self.asks,
        }
    }
}
