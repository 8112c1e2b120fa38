//! Audit recorder interface and the post-commit outbox that feeds it.
//!
//! Settlement never talks to the recorder directly. Each committed
//! trade is pushed onto an unbounded channel; an [`AuditWorker`] task
//! drains it, calls the recorder with a timeout and retries failures
//! with exponential backoff. A failed or abandoned delivery leaves the
//! trade's audit reference empty and nothing else changes.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::mpsc;
use tokio::time::{sleep_until, timeout, Instant};
use tracing::{debug, error, info, warn};

use crate::config::AuditConfig;
use crate::error::AuditError;
use crate::fees::{Money, Price, Quantity};
use crate::ids::{AccountId, OrderId, TradeId};
use crate::lot::LotIdentity;
use crate::trade::{TradeRecord, TradeStore};

/// Opaque reference returned by the recorder.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AuditReference(pub String);

impl fmt::Display for AuditReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The economic facts of a trade as handed to the recorder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeFacts {
    pub trade_id: TradeId,
    pub buyer: AccountId,
    pub seller: AccountId,
    pub buy_order: OrderId,
    pub sell_order: OrderId,
    pub lot: LotIdentity,
    pub quantity: Quantity,
    pub price: Price,
    pub gross: Money,
    pub buyer_fee: Money,
    pub seller_fee: Money,
    pub network_fee: Money,
    pub settled_at: DateTime<Utc>,
}

impl From<&TradeRecord> for TradeFacts {
    fn from(t: &TradeRecord) -> Self {
        TradeFacts {
            trade_id: t.id,
            buyer: t.buyer,
            seller: t.seller,
            buy_order: t.buy_order,
            sell_order: t.sell_order,
            lot: t.lot.clone(),
            quantity: t.quantity,
            price: t.price,
            gross: t.gross,
            buyer_fee: t.buyer_fee,
            seller_fee: t.seller_fee,
            network_fee: t.network_fee,
            settled_at: t.settled_at,
        }
    }
}

/// External append-only sink for settled trades.
#[async_trait]
pub trait AuditRecorder: Send + Sync {
    /// Record a trade and return its reference.
    async fn record(&self, facts: &TradeFacts) -> Result<AuditReference, AuditError>;

    /// Look up what was recorded under `reference`.
    async fn verify(&self, reference: &AuditReference) -> Result<TradeFacts, AuditError>;
}

/// Recorder keeping entries in memory, keyed by the hex SHA-256 of the
/// facts' JSON encoding. Used by the server's default wiring and tests.
#[derive(Debug, Default)]
pub struct InMemoryAuditRecorder {
    entries: RwLock<HashMap<AuditReference, TradeFacts>>,
}

impl InMemoryAuditRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Deterministic reference for a set of facts.
    pub fn reference_for(facts: &TradeFacts) -> Result<AuditReference, AuditError> {
        let encoded =
            serde_json::to_vec(facts).map_err(|e| AuditError::RecordingFailed(e.to_string()))?;
        let digest = Sha256::digest(&encoded);
        Ok(AuditReference(hex::encode(digest)))
    }
}

#[async_trait]
impl AuditRecorder for InMemoryAuditRecorder {
    async fn record(&self, facts: &TradeFacts) -> Result<AuditReference, AuditError> {
        let reference = Self::reference_for(facts)?;
        self.entries
            .write()
            .entry(reference.clone())
            .or_insert_with(|| facts.clone());
        Ok(reference)
    }

    async fn verify(&self, reference: &AuditReference) -> Result<TradeFacts, AuditError> {
        self.entries
            .read()
            .get(reference)
            .cloned()
            .ok_or_else(|| AuditError::NotFound(reference.to_string()))
    }
}

/// Sending half of the audit queue, held by the settlement coordinator.
#[derive(Debug, Clone)]
pub struct AuditOutbox {
    tx: mpsc::UnboundedSender<TradeRecord>,
}

impl AuditOutbox {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<TradeRecord>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (AuditOutbox { tx }, rx)
    }

    /// Queue a committed trade. Never blocks and never fails the caller.
    pub fn dispatch(&self, trade: &TradeRecord) {
        if self.tx.send(trade.clone()).is_err() {
            warn!(trade_id = %trade.id, "audit worker is gone; trade will not be recorded");
        }
    }
}

/// Counters reported when the worker stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AuditStats {
    pub recorded: u64,
    pub retried: u64,
    pub abandoned: u64,
}

#[derive(Debug)]
struct PendingDelivery {
    facts: TradeFacts,
    attempts: u32,
    due: Instant,
}

/// Drains the outbox into the recorder.
pub struct AuditWorker {
    rx: mpsc::UnboundedReceiver<TradeRecord>,
    recorder: Arc<dyn AuditRecorder>,
    trades: Arc<TradeStore>,
    config: AuditConfig,
    retries: Vec<PendingDelivery>,
    stats: AuditStats,
}

impl AuditWorker {
    pub fn new(
        rx: mpsc::UnboundedReceiver<TradeRecord>,
        recorder: Arc<dyn AuditRecorder>,
        trades: Arc<TradeStore>,
        config: AuditConfig,
    ) -> Self {
        AuditWorker {
            rx,
            recorder,
            trades,
            config,
            retries: Vec::new(),
            stats: AuditStats::default(),
        }
    }

    /// Run until every sender is dropped and no retry is outstanding.
    pub async fn run(mut self) -> AuditStats {
        let mut open = true;
        loop {
            if !open && self.retries.is_empty() {
                break;
            }
            let next_due = self.retries.iter().map(|p| p.due).min();
            let wake = next_due.unwrap_or_else(Instant::now);

            tokio::select! {
                received = self.rx.recv(), if open => match received {
                    Some(trade) => {
                        let pending = PendingDelivery {
                            facts: TradeFacts::from(&trade),
                            attempts: 0,
                            due: Instant::now(),
                        };
                        self.deliver(pending).await;
                    }
                    None => open = false,
                },
                _ = sleep_until(wake), if next_due.is_some() => {
                    self.retry_due().await;
                }
            }
        }
        debug!(
            recorded = self.stats.recorded,
            retried = self.stats.retried,
            abandoned = self.stats.abandoned,
            "audit worker stopped"
        );
        self.stats
    }

    async fn retry_due(&mut self) {
        let now = Instant::now();
        let (due, waiting): (Vec<_>, Vec<_>) = std::mem::take(&mut self.retries)
            .into_iter()
            .partition(|p| p.due <= now);
        self.retries = waiting;
        for pending in due {
            self.deliver(pending).await;
        }
    }

    async fn deliver(&mut self, mut pending: PendingDelivery) {
        pending.attempts += 1;
        let limit = self.config.timeout();
        let outcome = match timeout(limit, self.recorder.record(&pending.facts)).await {
            Ok(result) => result,
            Err(_) => Err(AuditError::Timeout(limit)),
        };

        let trade_id = pending.facts.trade_id;
        match outcome {
            Ok(reference) => {
                self.trades.attach_audit_reference(trade_id, reference.clone());
                self.stats.recorded += 1;
                info!(trade_id = %trade_id, reference = %reference, "trade recorded");
            }
            Err(err) if pending.attempts >= self.config.max_attempts => {
                self.stats.abandoned += 1;
                error!(
                    trade_id = %trade_id,
                    attempts = pending.attempts,
                    error = %err,
                    "giving up on audit recording"
                );
            }
            Err(err) => {
                let delay = self.config.backoff(pending.attempts);
                self.stats.retried += 1;
                warn!(
                    trade_id = %trade_id,
                    attempt = pending.attempts,
                    retry_in_ms = delay.as_millis() as u64,
                    error = %err,
                    "audit recording failed"
                );
                pending.due = Instant::now() + delay;
                self.retries.push(pending);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lot::EnergyType;
    use chrono::TimeZone;

    fn facts(quantity: Quantity) -> TradeFacts {
        TradeFacts {
            trade_id: TradeId(1),
            buyer: AccountId(2),
            seller: AccountId(1),
            buy_order: OrderId(2),
            sell_order: OrderId(1),
            lot: LotIdentity::new("F", EnergyType::Tidal, 2021, "UK", "REGO"),
            quantity,
            price: 30,
            gross: quantity * 30,
            buyer_fee: 0,
            seller_fee: 0,
            network_fee: 25,
            settled_at: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
        }
    }

    #[test]
    fn references_are_stable_hex_digests() {
        let a = InMemoryAuditRecorder::reference_for(&facts(3)).unwrap();
        let b = InMemoryAuditRecorder::reference_for(&facts(3)).unwrap();
        let c = InMemoryAuditRecorder::reference_for(&facts(4)).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.0.len(), 64);
        assert!(a.0.chars().all(|ch| ch.is_ascii_hexdigit()));
    }

    #[tokio::test]
    async fn verify_returns_what_was_recorded() {
        let recorder = InMemoryAuditRecorder::new();
        let reference = recorder.record(&facts(3)).await.unwrap();
        assert_eq!(recorder.verify(&reference).await.unwrap(), facts(3));
        assert_eq!(recorder.len(), 1);

        let unknown = AuditReference("00".repeat(32));
        assert!(matches!(
            recorder.verify(&unknown).await,
            Err(AuditError::NotFound(_))
        ));
    }
}
