//! Engine tunables: order bounds, fees and the audit retry policy.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};
use crate::fees::{FeeSchedule, Price, Quantity};

/// Engine configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Largest quantity a single order may ask for.
    pub max_order_quantity: Quantity,
    /// Lowest accepted unit price (minor units).
    pub min_price: Price,
    /// Highest accepted unit price (minor units).
    pub max_price: Price,
    /// Currency every account is denominated in.
    pub currency: String,
    pub fees: FeeSchedule,
    pub audit: AuditConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            max_order_quantity: 1_000_000,
            min_price: 1,
            max_price: 10_000_000,
            currency: "USD".to_string(),
            fees: FeeSchedule::default(),
            audit: AuditConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Reject configurations the engine cannot run with.
    pub fn validate(&self) -> EngineResult<()> {
        if self.max_order_quantity == 0 {
            return Err(EngineError::Validation("max_order_quantity must be positive".into()));
        }
        if self.min_price == 0 || self.min_price > self.max_price {
            return Err(EngineError::Validation(format!(
                "price range {}..={} is invalid",
                self.min_price, self.max_price
            )));
        }
        if self.fees.platform_fee_bps >= 10_000 {
            return Err(EngineError::Validation("platform fee must be below 100%".into()));
        }
        if self.audit.max_attempts == 0 {
            return Err(EngineError::Validation("audit max_attempts must be positive".into()));
        }
        Ok(())
    }
}

/// Retry policy for delivering trades to the audit recorder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub timeout_ms: u64,
}

impl Default for AuditConfig {
    fn default() -> Self {
        AuditConfig {
            max_attempts: 5,
            initial_backoff_ms: 200,
            max_backoff_ms: 10_000,
            timeout_ms: 2_000,
        }
    }
}

impl AuditConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Exponential backoff before retry number `attempt` (1-based), capped.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(20);
        let ms = self
            .initial_backoff_ms
            .saturating_mul(1u64 << shift)
            .min(self.max_backoff_ms);
        Duration::from_millis(ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn inverted_price_range_is_rejected() {
        let cfg = EngineConfig {
            min_price: 10,
            max_price: 5,
            ..EngineConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let audit = AuditConfig {
            max_attempts: 10,
            initial_backoff_ms: 100,
            max_backoff_ms: 1_000,
            timeout_ms: 50,
        };
        assert_eq!(audit.backoff(1), Duration::from_millis(100));
        assert_eq!(audit.backoff(2), Duration::from_millis(200));
        assert_eq!(audit.backoff(4), Duration::from_millis(800));
        assert_eq!(audit.backoff(5), Duration::from_millis(1_000));
    }

    #[test]
    fn partial_config_fills_defaults() {
        let cfg: EngineConfig = serde_json::from_str(r#"{"max_price": 500}"#).unwrap();
        assert_eq!(cfg.max_price, 500);
        assert_eq!(cfg.min_price, 1);
        assert_eq!(cfg.fees, FeeSchedule::default());
    }
}
