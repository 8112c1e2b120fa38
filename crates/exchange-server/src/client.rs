// crates/exchange-server/src/client.rs

//! Per-connection session: CSV lines in, CSV lines out.
//!
//! A session must log in (`L, account`) before anything else. Requests
//! are handled on the client task itself; the engine is safe to call
//! from many tasks at once.

use anyhow::Result;
use exchange_core::{EngineError, OutputMessage, Principal};
use exchange_protocol::csv_codec::{self, Request};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

use crate::engine_task::dispatch;
use crate::types::{ClientId, ClientRegistry, OutboundRx, OutboundTx, SessionPolicy, SharedEngine};

/// Everything a client task needs besides its socket.
pub(crate) struct Session {
    pub client_id: ClientId,
    pub engine: SharedEngine,
    pub clients: ClientRegistry,
    pub policy: SessionPolicy,
    pub out_tx: OutboundTx,
}

/// Run the client I/O loop for a single connection.
pub(crate) async fn run_client(session: Session, stream: TcpStream, mut out_rx: OutboundRx) -> Result<()> {
    let client_id = session.client_id;
    let (read_stream, write_stream) = stream.into_split();

    // Writer task: consume OutputMessages and write lines.
    let writer = tokio::spawn(async move {
        let mut write_stream = write_stream;
        while let Some(msg) = out_rx.recv().await {
            if let Err(e) = write_line(&mut write_stream, &msg).await {
                warn!(client = client_id.0, error = %e, "write failed");
                break;
            }
        }
    });

    let result = read_loop(&session, read_stream).await;

    // Remove client from registry; dropping the last sender ends the writer.
    session.clients.write().await.remove(&client_id);
    drop(session);
    let _ = writer.await;
    result
}

async fn read_loop(session: &Session, read_stream: tokio::net::tcp::OwnedReadHalf) -> Result<()> {
    let mut lines = BufReader::new(read_stream).lines();
    let mut principal: Option<Principal> = None;

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        debug!(client = session.client_id.0, line, "request");

        let outputs = match csv_codec::parse_request_line(line) {
            None => vec![OutputMessage::reject(&EngineError::Validation(
                "unrecognised request line".into(),
            ))],
            Some(Request::Login(account)) => {
                let snapshot = session.engine.open_account(account);
                let who = session.policy.principal_for(account);
                info!(client = session.client_id.0, account = %account, can_trade = who.can_trade, "login");
                principal = Some(who);
                vec![OutputMessage::Balance(snapshot)]
            }
            Some(Request::Engine(msg)) => match principal {
                None => vec![OutputMessage::reject(&EngineError::PermissionDenied(
                    "login required".into(),
                ))],
                Some(_) if !session.policy.permits(&msg) => {
                    vec![OutputMessage::reject(&EngineError::PermissionDenied(
                        "admin commands are disabled".into(),
                    ))]
                }
                Some(who) => session.engine.process_message(&who, msg),
            },
        };

        // Rejects and acks go straight to this client even if the
        // registry no longer lists it.
        let (broadcast, direct): (Vec<_>, Vec<_>) =
            outputs.into_iter().partition(OutputMessage::is_broadcast);
        for msg in direct {
            let _ = session.out_tx.send(msg);
        }
        dispatch(Some(session.client_id), broadcast, &session.clients).await;
    }

    info!(client = session.client_id.0, "disconnected");
    Ok(())
}

async fn write_line(stream: &mut OwnedWriteHalf, msg: &OutputMessage) -> Result<()> {
    let line = csv_codec::format_output(msg);
    stream.write_all(format!("{}\n", line).as_bytes()).await?;
    stream.flush().await?;
    Ok(())
}
