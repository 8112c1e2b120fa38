//! Output routing and the background expiry sweeper.
//!
//! Routing policy:
//! - `Trade`, `Expired`: broadcast to **all** connected clients.
//! - everything else: sent **only** to the originating client.

use std::collections::HashMap;
use std::time::Duration;

use chrono::Utc;
use exchange_core::OutputMessage;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};

use crate::types::{ClientId, ClientRegistry, OutboundTx, SharedEngine};

/// Route a single `OutputMessage` to the appropriate client(s).
pub(crate) fn route_output(
    origin_client: Option<ClientId>,
    msg: &OutputMessage,
    clients: &HashMap<ClientId, OutboundTx>,
) {
    if msg.is_broadcast() {
        for tx in clients.values() {
            let _ = tx.send(msg.clone());
        }
    } else if let Some(tx) = origin_client.and_then(|id| clients.get(&id)) {
        let _ = tx.send(msg.clone());
    }
}

/// Route a batch of outputs against one snapshot of the registry.
pub(crate) async fn dispatch(
    origin_client: Option<ClientId>,
    outputs: Vec<OutputMessage>,
    clients: &ClientRegistry,
) {
    if outputs.is_empty() {
        return;
    }
    // Snapshot of current clients to minimize lock hold time.
    let current_clients = {
        let guard = clients.read().await;
        guard.clone()
    };
    for out in &outputs {
        route_output(origin_client, out, &current_clients);
    }
}

/// Periodically expire orders and broadcast the expiries.
pub(crate) async fn run_expiry_sweeper(engine: SharedEngine, clients: ClientRegistry, every: Duration) {
    let mut ticker = interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        let expired = engine.sweep_expired(Utc::now());
        if expired.is_empty() {
            continue;
        }
        info!(count = expired.len(), "expired orders swept");
        let outputs = expired.into_iter().map(OutputMessage::Expired).collect();
        dispatch(None, outputs, &clients).await;
        debug!("expiry notifications sent");
    }
}
