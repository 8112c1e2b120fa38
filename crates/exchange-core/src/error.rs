//! Error taxonomy for the engine.
//!
//! Validation and permission failures are raised before any state
//! change. Funds, holdings and state failures may also surface at
//! settlement time, where they abort only the current candidate.

use std::time::Duration;

use thiserror::Error;

use crate::fees::Money;
use crate::ids::{AccountId, OrderId};
use crate::order::OrderStatus;

pub type EngineResult<T> = Result<T, EngineError>;

/// Domain failure returned by every fallible engine operation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("insufficient funds: required {required}, spendable {spendable}")]
    InsufficientFunds { required: Money, spendable: Money },

    #[error("insufficient holdings: required {required}, held {held}")]
    InsufficientHoldings { required: u64, held: u64 },

    #[error("order {order_id} is {status}")]
    InvalidState { order_id: OrderId, status: OrderStatus },

    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: String },

    #[error("account {0} cannot trade against itself")]
    SelfTrade(AccountId),

    #[error("internal invariant violated: {0}")]
    Internal(String),
}

impl EngineError {
    /// Stable machine-readable code, used on the wire.
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::Validation(_) => "VALIDATION",
            EngineError::PermissionDenied(_) => "PERMISSION_DENIED",
            EngineError::InsufficientFunds { .. } => "INSUFFICIENT_FUNDS",
            EngineError::InsufficientHoldings { .. } => "INSUFFICIENT_HOLDINGS",
            EngineError::InvalidState { .. } => "INVALID_STATE",
            EngineError::NotFound { .. } => "NOT_FOUND",
            EngineError::SelfTrade(_) => "SELF_TRADE",
            EngineError::Internal(_) => "INTERNAL",
        }
    }

    pub(crate) fn order_not_found(id: OrderId) -> Self {
        EngineError::NotFound {
            kind: "order",
            id: id.to_string(),
        }
    }

    pub(crate) fn account_not_found(id: AccountId) -> Self {
        EngineError::NotFound {
            kind: "account",
            id: id.to_string(),
        }
    }

    pub(crate) fn overflow(what: &str) -> Self {
        EngineError::Validation(format!("{} overflows", what))
    }
}

/// Failure talking to the audit recorder. Never fails a trade.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuditError {
    #[error("audit recording failed: {0}")]
    RecordingFailed(String),

    #[error("audit reference {0} not found")]
    NotFound(String),

    #[error("audit recorder timed out after {0:?}")]
    Timeout(Duration),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        let err = EngineError::InsufficientFunds {
            required: 150,
            spendable: 100,
        };
        assert_eq!(err.code(), "INSUFFICIENT_FUNDS");
        assert_eq!(err.to_string(), "insufficient funds: required 150, spendable 100");
        assert_eq!(EngineError::order_not_found(OrderId(7)).to_string(), "order 7 not found");
    }

    #[test]
    fn invalid_state_names_the_status() {
        let err = EngineError::InvalidState {
            order_id: OrderId(3),
            status: OrderStatus::Completed,
        };
        assert_eq!(err.to_string(), "order 3 is completed");
        assert_eq!(err.code(), "INVALID_STATE");
    }
}
