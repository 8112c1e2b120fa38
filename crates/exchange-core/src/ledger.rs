//! Cash positions per account.
//!
//! `available` is the full cash balance and `reserved` is the part of
//! it earmarked for open buy orders; `reserved <= available` holds
//! after every operation and only `available - reserved` is spendable.

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};
use crate::fees::{Money, Quantity};
use crate::ids::AccountId;

/// Aggregate trading totals kept alongside the cash position.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortfolioTotals {
    pub certificates_held: Quantity,
    pub certificates_bought: Quantity,
    pub certificates_sold: Quantity,
    pub cash_spent: Money,
    pub cash_received: Money,
    pub fees_paid: Money,
    pub trade_count: u64,
}

/// Cash position of one account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub currency: String,
    pub available: Money,
    pub reserved: Money,
    pub portfolio: PortfolioTotals,
}

impl Account {
    pub fn new(id: AccountId, currency: impl Into<String>) -> Self {
        Account {
            id,
            currency: currency.into(),
            available: 0,
            reserved: 0,
            portfolio: PortfolioTotals::default(),
        }
    }

    /// Cash not earmarked for open buy orders.
    pub fn spendable(&self) -> Money {
        self.available - self.reserved
    }

    pub fn check_invariant(&self) -> bool {
        self.reserved <= self.available
    }

    /// Earmark `amount` of spendable cash.
    pub(crate) fn reserve(&mut self, amount: Money) -> EngineResult<()> {
        if amount > self.spendable() {
            return Err(EngineError::InsufficientFunds {
                required: amount,
                spendable: self.spendable(),
            });
        }
        self.reserved += amount;
        Ok(())
    }

    /// Return `amount` of reservation to spendable cash.
    pub(crate) fn release(&mut self, amount: Money) -> EngineResult<()> {
        if amount > self.reserved {
            return Err(EngineError::Internal(format!(
                "release of {} exceeds reservation {} on account {}",
                amount, self.reserved, self.id
            )));
        }
        self.reserved -= amount;
        Ok(())
    }

    /// Spend `from_reservation` reserved cash plus `top_up` spendable cash.
    pub(crate) fn spend(&mut self, from_reservation: Money, top_up: Money) -> EngineResult<()> {
        if from_reservation > self.reserved {
            return Err(EngineError::Internal(format!(
                "spend of {} exceeds reservation {} on account {}",
                from_reservation, self.reserved, self.id
            )));
        }
        if top_up > self.spendable() {
            return Err(EngineError::InsufficientFunds {
                required: top_up,
                spendable: self.spendable(),
            });
        }
        self.reserved -= from_reservation;
        self.available -= from_reservation + top_up;
        Ok(())
    }

    pub(crate) fn credit(&mut self, amount: Money) -> EngineResult<()> {
        self.available = self
            .available
            .checked_add(amount)
            .ok_or_else(|| EngineError::overflow("account balance"))?;
        Ok(())
    }
}

/// Account rows, each behind its own lock.
#[derive(Debug)]
pub struct AccountLedger {
    currency: String,
    accounts: DashMap<AccountId, Arc<Mutex<Account>>>,
}

impl AccountLedger {
    pub fn new(currency: impl Into<String>) -> Self {
        AccountLedger {
            currency: currency.into(),
            accounts: DashMap::new(),
        }
    }

    /// Open an account with a zero balance; a no-op if it already exists.
    pub fn open_account(&self, id: AccountId) -> Account {
        let row = {
            let entry = self
                .accounts
                .entry(id)
                .or_insert_with(|| Arc::new(Mutex::new(Account::new(id, self.currency.clone()))));
            Arc::clone(entry.value())
        };
        let account = row.lock();
        account.clone()
    }

    /// Credit cash from outside the engine (top-up settled elsewhere).
    pub fn deposit(&self, id: AccountId, amount: Money) -> EngineResult<Account> {
        if amount == 0 {
            return Err(EngineError::Validation("deposit must be positive".into()));
        }
        let row = self.row(id)?;
        let mut account = row.lock();
        account.credit(amount)?;
        Ok(account.clone())
    }

    pub fn account(&self, id: AccountId) -> EngineResult<Account> {
        let row = self.row(id)?;
        let account = row.lock();
        Ok(account.clone())
    }

    /// Snapshot of every account, ordered by id.
    pub fn accounts(&self) -> Vec<Account> {
        let rows: Vec<_> = self.accounts.iter().map(|r| Arc::clone(r.value())).collect();
        let mut out: Vec<Account> = rows.iter().map(|r| r.lock().clone()).collect();
        out.sort_by_key(|a| a.id);
        out
    }

    /// The lockable row for an account.
    pub(crate) fn row(&self, id: AccountId) -> EngineResult<Arc<Mutex<Account>>> {
        self.accounts
            .get(&id)
            .map(|r| Arc::clone(r.value()))
            .ok_or_else(|| EngineError::account_not_found(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserve_respects_spendable() {
        let mut a = Account::new(AccountId(1), "USD");
        a.credit(100).unwrap();
        a.reserve(60).unwrap();
        assert_eq!(a.spendable(), 40);
        assert_eq!(
            a.reserve(41),
            Err(EngineError::InsufficientFunds {
                required: 41,
                spendable: 40
            })
        );
        assert_eq!(a.reserved, 60);
        assert!(a.check_invariant());
    }

    #[test]
    fn spend_consumes_reservation_and_balance() {
        let mut a = Account::new(AccountId(1), "USD");
        a.credit(1_000).unwrap();
        a.reserve(600).unwrap();
        a.spend(500, 50).unwrap();
        assert_eq!(a.available, 450);
        assert_eq!(a.reserved, 100);
        assert!(a.check_invariant());
    }

    #[test]
    fn spend_top_up_is_bounded_by_spendable() {
        let mut a = Account::new(AccountId(1), "USD");
        a.credit(100).unwrap();
        a.reserve(90).unwrap();
        assert!(matches!(a.spend(90, 11), Err(EngineError::InsufficientFunds { .. })));
        assert_eq!(a.available, 100);
        assert_eq!(a.reserved, 90);
    }

    #[test]
    fn over_release_is_an_internal_error() {
        let mut a = Account::new(AccountId(1), "USD");
        a.credit(10).unwrap();
        a.reserve(5).unwrap();
        assert!(matches!(a.release(6), Err(EngineError::Internal(_))));
        a.release(5).unwrap();
        assert_eq!(a.reserved, 0);
    }

    #[test]
    fn ledger_deposit_requires_open_account() {
        let ledger = AccountLedger::new("USD");
        assert!(matches!(
            ledger.deposit(AccountId(4), 10),
            Err(EngineError::NotFound { .. })
        ));
        ledger.open_account(AccountId(4));
        assert_eq!(ledger.deposit(AccountId(4), 10).unwrap().available, 10);
        // Re-opening keeps the balance.
        assert_eq!(ledger.open_account(AccountId(4)).available, 10);
    }
}
