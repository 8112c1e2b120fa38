//! Caller identity handed in by the authentication collaborator.

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};
use crate::ids::AccountId;

/// A verified account identity plus its trading capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub account: AccountId,
    pub can_trade: bool,
}

impl Principal {
    pub fn trader(account: AccountId) -> Self {
        Principal {
            account,
            can_trade: true,
        }
    }

    pub fn restricted(account: AccountId) -> Self {
        Principal {
            account,
            can_trade: false,
        }
    }

    pub fn ensure_can_trade(&self) -> EngineResult<()> {
        if self.can_trade {
            Ok(())
        } else {
            Err(EngineError::PermissionDenied(format!(
                "account {} is not permitted to trade",
                self.account
            )))
        }
    }
}
