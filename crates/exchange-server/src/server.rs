//! TCP listener and top-level server wiring.
//!
//! This module:
//! - builds the shared `MatchingEngine` and spawns its audit worker,
//! - spawns the expiry sweeper,
//! - accepts TCP connections, assigns each a `ClientId` and spawns a
//!   per-client session task.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::Result;
use exchange_core::{InMemoryAuditRecorder, MatchingEngine};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::client::{self, Session};
use crate::config::Config;
use crate::engine_task;
use crate::types::{ClientId, ClientRegistry, OutboundRx, OutboundTx, SessionPolicy, SharedEngine};

static NEXT_CLIENT_ID: AtomicU64 = AtomicU64::new(1);

fn next_client_id() -> ClientId {
    ClientId(NEXT_CLIENT_ID.fetch_add(1, Ordering::Relaxed))
}

/// Bind the configured address and serve until ctrl-c.
pub async fn run(config: Config) -> Result<()> {
    let addr = config.socket_addr_string();
    let listener = TcpListener::bind(&addr).await?;
    info!(%addr, max_clients = config.max_clients, "listening");

    tokio::select! {
        result = serve(listener, config) => result,
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown requested");
            Ok(())
        }
    }
}

/// Serve clients on an already-bound listener.
pub async fn serve(listener: TcpListener, config: Config) -> Result<()> {
    let recorder = Arc::new(InMemoryAuditRecorder::new());
    let (engine, audit_worker) = MatchingEngine::new(config.engine.clone(), recorder)?;
    let engine: SharedEngine = Arc::new(engine);

    tokio::spawn(async move {
        let stats = audit_worker.run().await;
        info!(recorded = stats.recorded, abandoned = stats.abandoned, "audit worker finished");
    });

    // Shared registry of clients -> outbound channels.
    let clients: ClientRegistry = Arc::new(tokio::sync::RwLock::new(Default::default()));

    tokio::spawn(engine_task::run_expiry_sweeper(
        Arc::clone(&engine),
        clients.clone(),
        config.sweep_interval(),
    ));

    let policy = SessionPolicy::from_config(&config);

    loop {
        let (stream, peer_addr) = listener.accept().await?;
        let current_clients = clients.read().await.len();

        if current_clients >= config.max_clients {
            warn!(%peer_addr, max_clients = config.max_clients, "rejecting connection");
            // Just drop the stream; client will see the connection closed.
            continue;
        }

        let client_id = next_client_id();
        info!(client = client_id.0, %peer_addr, "accepted connection");

        let (out_tx, out_rx): (OutboundTx, OutboundRx) = mpsc::unbounded_channel();
        clients.write().await.insert(client_id, out_tx.clone());

        let session = Session {
            client_id,
            engine: Arc::clone(&engine),
            clients: clients.clone(),
            policy: policy.clone(),
            out_tx,
        };
        tokio::spawn(async move {
            if let Err(e) = client::run_client(session, stream, out_rx).await {
                warn!(client = client_id.0, error = %e, "client error");
            }
        });
    }
}
