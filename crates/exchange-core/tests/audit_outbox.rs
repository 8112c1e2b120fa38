// crates/exchange-core/tests/audit_outbox.rs
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use exchange_core::{
    AccountId, AuditConfig, AuditError, AuditRecorder, AuditReference, EngineConfig, EnergyType,
    InMemoryAuditRecorder, LotIdentity, MatchingEngine, NewOrderRequest, Principal, Side,
    TradeFacts, TradeId, TradeStatus,
};

/// Fails the first `failures` calls, then delegates to an in-memory recorder.
#[derive(Default)]
struct FlakyRecorder {
    failures: u32,
    calls: AtomicU32,
    inner: InMemoryAuditRecorder,
}

#[async_trait]
impl AuditRecorder for FlakyRecorder {
    async fn record(&self, facts: &TradeFacts) -> Result<AuditReference, AuditError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            return Err(AuditError::RecordingFailed(format!("outage #{}", call + 1)));
        }
        self.inner.record(facts).await
    }

    async fn verify(&self, reference: &AuditReference) -> Result<TradeFacts, AuditError> {
        self.inner.verify(reference).await
    }
}

/// Never answers within any reasonable timeout.
#[derive(Default)]
struct StalledRecorder {
    calls: AtomicU32,
}

#[async_trait]
impl AuditRecorder for StalledRecorder {
    async fn record(&self, _facts: &TradeFacts) -> Result<AuditReference, AuditError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(60)).await;
        Err(AuditError::RecordingFailed("unreachable".into()))
    }

    async fn verify(&self, reference: &AuditReference) -> Result<TradeFacts, AuditError> {
        Err(AuditError::NotFound(reference.to_string()))
    }
}

fn lot() -> LotIdentity {
    LotIdentity::new("GEO-1", EnergyType::Geothermal, 2020, "IS", "GO")
}

fn fast_audit(max_attempts: u32) -> EngineConfig {
    EngineConfig {
        audit: AuditConfig {
            max_attempts,
            initial_backoff_ms: 1,
            max_backoff_ms: 4,
            timeout_ms: 20,
        },
        ..EngineConfig::default()
    }
}

/// Settle one 10 @ 50 trade between accounts 1 and 2.
fn trade_once(engine: &MatchingEngine) -> TradeId {
    let (seller, buyer) = (AccountId(1), AccountId(2));
    engine.open_account(seller);
    engine.issue_certificates(seller, &lot(), 10, 10).unwrap();
    engine.open_account(buyer);
    engine.deposit(buyer, 10_000).unwrap();
    engine
        .submit_order(&Principal::trader(seller), NewOrderRequest::limit(Side::Sell, lot(), 10, 50))
        .unwrap();
    let placed = engine
        .submit_order(&Principal::trader(buyer), NewOrderRequest::limit(Side::Buy, lot(), 10, 50))
        .unwrap();
    placed.trades[0].id
}

async fn wait_for_reference(engine: &MatchingEngine, id: TradeId) -> Option<AuditReference> {
    for _ in 0..400 {
        if let Some(reference) = engine.trades().trade(id).and_then(|t| t.audit_reference) {
            return Some(reference);
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    None
}

#[tokio::test]
async fn recorded_trade_gets_its_reference_once() {
    let recorder = Arc::new(InMemoryAuditRecorder::new());
    let (engine, worker) = MatchingEngine::new(fast_audit(3), recorder.clone()).unwrap();
    let worker = tokio::spawn(worker.run());

    let id = trade_once(&engine);
    let reference = wait_for_reference(&engine, id).await.expect("reference attached");
    assert_eq!(recorder.len(), 1);

    let facts = engine.verify_trade(id).await.unwrap();
    assert_eq!(facts.trade_id, id);
    assert_eq!(facts.quantity, 10);

    // The reference is write-once.
    assert!(!engine
        .trades()
        .attach_audit_reference(id, AuditReference("other".into())));
    assert_eq!(engine.trades().trade(id).unwrap().audit_reference, Some(reference));

    drop(engine);
    let stats = worker.await.unwrap();
    assert_eq!((stats.recorded, stats.retried, stats.abandoned), (1, 0, 0));
}

#[tokio::test]
async fn transient_failures_are_retried() {
    let recorder = Arc::new(FlakyRecorder {
        failures: 2,
        ..FlakyRecorder::default()
    });
    let (engine, worker) = MatchingEngine::new(fast_audit(5), recorder.clone()).unwrap();
    let worker = tokio::spawn(worker.run());

    let id = trade_once(&engine);
    assert!(wait_for_reference(&engine, id).await.is_some());
    assert_eq!(recorder.calls.load(Ordering::SeqCst), 3);

    drop(engine);
    let stats = worker.await.unwrap();
    assert_eq!((stats.recorded, stats.retried, stats.abandoned), (1, 2, 0));
}

#[tokio::test]
async fn persistent_failure_never_touches_the_trade() {
    let recorder = Arc::new(FlakyRecorder {
        failures: u32::MAX,
        ..FlakyRecorder::default()
    });
    let (engine, worker) = MatchingEngine::new(fast_audit(3), recorder.clone()).unwrap();
    let worker = tokio::spawn(worker.run());

    let id = trade_once(&engine);
    let trade = engine.trades().trade(id).unwrap();
    assert_eq!(trade.status, TradeStatus::Completed);

    drop(engine);
    let stats = worker.await.unwrap();
    assert_eq!((stats.recorded, stats.retried, stats.abandoned), (0, 2, 1));
    assert_eq!(recorder.calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn stalled_recorder_times_out() {
    let recorder = Arc::new(StalledRecorder::default());
    let (engine, worker) = MatchingEngine::new(fast_audit(2), recorder.clone()).unwrap();
    let worker = tokio::spawn(worker.run());

    let id = trade_once(&engine);
    assert!(matches!(
        engine.verify_trade(id).await,
        Err(AuditError::NotFound(_))
    ));

    drop(engine);
    let stats = worker.await.unwrap();
    assert_eq!(stats.abandoned, 1);
    assert_eq!(recorder.calls.load(Ordering::SeqCst), 2);
}
