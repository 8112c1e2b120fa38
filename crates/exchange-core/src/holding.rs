//! Certificate inventory per account per lot.
//!
//! Holdings are grouped by lot: one mutex guards every account's
//! holding of that lot. A settlement only ever touches holdings of a
//! single lot (the seller's and the buyer's), so one lock per lot is
//! enough to make the certificate leg atomic, and creating or deleting
//! a holding row never races with a reader of the same lot.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};
use crate::fees::{weighted_average_price, Price, Quantity};
use crate::ids::{AccountId, OrderId};
use crate::lot::LotIdentity;

/// One account's ownership of one lot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Holding {
    pub account: AccountId,
    pub lot: LotIdentity,
    pub quantity: Quantity,
    pub average_price: Price,
    pub locked: bool,
    /// Sell order currently backed by this holding, if any.
    pub locked_by: Option<OrderId>,
    /// For time locks: the lock lapses at this instant.
    pub unlock_at: Option<DateTime<Utc>>,
}

impl Holding {
    pub fn new(account: AccountId, lot: LotIdentity) -> Self {
        Holding {
            account,
            lot,
            quantity: 0,
            average_price: 0,
            locked: false,
            locked_by: None,
            unlock_at: None,
        }
    }

    pub fn is_locked_at(&self, now: DateTime<Utc>) -> bool {
        self.locked && self.unlock_at.map_or(true, |t| now < t)
    }

    /// Whether settlement of `order` may draw certificates from this holding.
    pub fn can_be_reduced_by(&self, order: OrderId, now: DateTime<Utc>) -> bool {
        !self.is_locked_at(now) || self.locked_by == Some(order)
    }

    pub(crate) fn lock_for(&mut self, order: OrderId) {
        self.locked = true;
        self.locked_by = Some(order);
        self.unlock_at = None;
    }

    /// Drop the lock if `order` holds it. Returns whether anything changed.
    pub(crate) fn unlock_for(&mut self, order: OrderId) -> bool {
        if self.locked_by == Some(order) {
            self.locked = false;
            self.locked_by = None;
            self.unlock_at = None;
            true
        } else {
            false
        }
    }

    /// Add certificates acquired at `price`, re-averaging the cost.
    pub(crate) fn credit(&mut self, quantity: Quantity, price: Price) -> EngineResult<()> {
        let total = self
            .quantity
            .checked_add(quantity)
            .ok_or_else(|| EngineError::overflow("holding quantity"))?;
        self.average_price = weighted_average_price(self.quantity, self.average_price, quantity, price);
        self.quantity = total;
        Ok(())
    }

    /// Remove certificates on behalf of `order`.
    pub(crate) fn debit(
        &mut self,
        quantity: Quantity,
        order: OrderId,
        now: DateTime<Utc>,
    ) -> EngineResult<()> {
        if self.quantity < quantity {
            return Err(EngineError::InsufficientHoldings {
                required: quantity,
                held: self.quantity,
            });
        }
        if !self.can_be_reduced_by(order, now) {
            return Err(EngineError::InsufficientHoldings {
                required: quantity,
                held: 0,
            });
        }
        self.quantity -= quantity;
        Ok(())
    }
}

/// Every account's holding of one lot.
#[derive(Debug)]
pub struct LotHoldings {
    lot: LotIdentity,
    by_account: BTreeMap<AccountId, Holding>,
}

impl LotHoldings {
    fn new(lot: LotIdentity) -> Self {
        LotHoldings {
            lot,
            by_account: BTreeMap::new(),
        }
    }

    pub fn get(&self, account: AccountId) -> Option<&Holding> {
        self.by_account.get(&account)
    }

    pub(crate) fn get_mut(&mut self, account: AccountId) -> Option<&mut Holding> {
        self.by_account.get_mut(&account)
    }

    /// Copy of the account's holding, or a fresh empty one.
    pub(crate) fn staged(&self, account: AccountId) -> Holding {
        self.by_account
            .get(&account)
            .cloned()
            .unwrap_or_else(|| Holding::new(account, self.lot.clone()))
    }

    /// Write a staged holding back. Zero-quantity rows are removed.
    pub(crate) fn commit(&mut self, holding: Holding) {
        if holding.quantity == 0 {
            self.by_account.remove(&holding.account);
        } else {
            self.by_account.insert(holding.account, holding);
        }
    }

    pub fn total_quantity(&self) -> Quantity {
        self.by_account.values().map(|h| h.quantity).sum()
    }
}

/// Holding rows, grouped by lot.
#[derive(Debug, Default)]
pub struct HoldingStore {
    lots: DashMap<LotIdentity, Arc<Mutex<LotHoldings>>>,
}

impl HoldingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Row group for a lot, created empty on first use.
    pub fn lot(&self, lot: &LotIdentity) -> Arc<Mutex<LotHoldings>> {
        if let Some(existing) = self.lots.get(lot) {
            return Arc::clone(existing.value());
        }
        let entry = self
            .lots
            .entry(lot.clone())
            .or_insert_with(|| Arc::new(Mutex::new(LotHoldings::new(lot.clone()))));
        Arc::clone(entry.value())
    }

    /// Credit certificates from outside the engine (issuance, transfer in).
    pub fn issue(
        &self,
        account: AccountId,
        lot: &LotIdentity,
        quantity: Quantity,
        price: Price,
    ) -> EngineResult<Holding> {
        if quantity == 0 {
            return Err(EngineError::Validation("issued quantity must be positive".into()));
        }
        lot.validate()?;
        let rows = self.lot(lot);
        let mut rows = rows.lock();
        let mut holding = rows.staged(account);
        holding.credit(quantity, price)?;
        rows.commit(holding.clone());
        Ok(holding)
    }

    /// Time-lock a holding so it cannot back sell orders until `until`.
    pub fn lock_until(
        &self,
        account: AccountId,
        lot: &LotIdentity,
        until: DateTime<Utc>,
    ) -> EngineResult<Holding> {
        let rows = self.lot(lot);
        let mut rows = rows.lock();
        let holding = rows.get_mut(account).ok_or_else(|| EngineError::NotFound {
            kind: "holding",
            id: format!("{}:{}", account, lot),
        })?;
        if holding.locked_by.is_some() {
            return Err(EngineError::Validation(
                "holding is backing an open sell order".into(),
            ));
        }
        holding.locked = true;
        holding.unlock_at = Some(until);
        Ok(holding.clone())
    }

    pub fn holding(&self, account: AccountId, lot: &LotIdentity) -> Option<Holding> {
        let rows = self.lots.get(lot).map(|r| Arc::clone(r.value()))?;
        let rows = rows.lock();
        rows.get(account).cloned()
    }

    /// All non-empty holdings of an account, ordered by lot.
    pub fn holdings_of(&self, account: AccountId) -> Vec<Holding> {
        let groups: Vec<_> = self.lots.iter().map(|r| Arc::clone(r.value())).collect();
        let mut out: Vec<Holding> = groups
            .iter()
            .filter_map(|g| g.lock().get(account).cloned())
            .collect();
        out.sort_by(|a, b| a.lot.cmp(&b.lot));
        out
    }

    /// Sum of every account's quantity of a lot.
    pub fn total_for_lot(&self, lot: &LotIdentity) -> Quantity {
        match self.lots.get(lot).map(|r| Arc::clone(r.value())) {
            Some(rows) => rows.lock().total_quantity(),
            None => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lot::EnergyType;

    fn lot() -> LotIdentity {
        LotIdentity::new("HYD-7", EnergyType::Hydro, 2022, "NO", "GO")
    }

    #[test]
    fn issue_averages_acquisition_price() {
        let store = HoldingStore::new();
        store.issue(AccountId(1), &lot(), 100, 40).unwrap();
        let h = store.issue(AccountId(1), &lot(), 100, 60).unwrap();
        assert_eq!(h.quantity, 200);
        assert_eq!(h.average_price, 50);
        assert_eq!(store.total_for_lot(&lot()), 200);
    }

    #[test]
    fn zero_rows_are_removed_on_commit() {
        let store = HoldingStore::new();
        store.issue(AccountId(1), &lot(), 10, 5).unwrap();
        let rows = store.lot(&lot());
        {
            let mut rows = rows.lock();
            let mut h = rows.staged(AccountId(1));
            h.debit(10, OrderId(1), Utc::now()).unwrap();
            rows.commit(h);
        }
        assert!(store.holding(AccountId(1), &lot()).is_none());
        assert!(store.holdings_of(AccountId(1)).is_empty());
    }

    #[test]
    fn locked_holding_only_yields_to_its_order() {
        let mut h = Holding::new(AccountId(1), lot());
        h.credit(50, 10).unwrap();
        h.lock_for(OrderId(9));
        let now = Utc::now();
        assert!(h.can_be_reduced_by(OrderId(9), now));
        assert!(!h.can_be_reduced_by(OrderId(8), now));
        assert!(h.debit(5, OrderId(8), now).is_err());
        assert_eq!(h.quantity, 50);
        assert!(!h.unlock_for(OrderId(8)));
        assert!(h.unlock_for(OrderId(9)));
        assert!(!h.is_locked_at(now));
    }

    #[test]
    fn time_lock_lapses() {
        let store = HoldingStore::new();
        store.issue(AccountId(2), &lot(), 10, 5).unwrap();
        let until = Utc::now() + chrono::Duration::minutes(5);
        let h = store.lock_until(AccountId(2), &lot(), until).unwrap();
        assert!(h.is_locked_at(Utc::now()));
        assert!(!h.is_locked_at(until));
    }

    #[test]
    fn debit_beyond_quantity_fails() {
        let mut h = Holding::new(AccountId(1), lot());
        h.credit(5, 10).unwrap();
        assert_eq!(
            h.debit(6, OrderId(1), Utc::now()),
            Err(EngineError::InsufficientHoldings { required: 6, held: 5 })
        );
    }
}
