//! Shared types for the exchange TCP server.
//!
//! This module defines:
//! - `ClientId`: a lightweight handle for connected clients
//! - the outbound channel aliases and the client registry
//! - `SessionPolicy`: what a logged-in session may do

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use exchange_core::{AccountId, InputMessage, MatchingEngine, OutputMessage, Principal};
use tokio::sync::mpsc;
use tokio::sync::RwLock;

use crate::config::Config;

/// Identifier for a connected client.
///
/// Unique over the lifetime of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientId(pub u64);

/// Outbound messages from the engine to a given client.
pub type OutboundTx = mpsc::UnboundedSender<OutputMessage>;
pub type OutboundRx = mpsc::UnboundedReceiver<OutputMessage>;

/// Registry of connected clients and their outbound channels.
pub type ClientRegistry = Arc<RwLock<HashMap<ClientId, OutboundTx>>>;

/// The engine, shared by every client task.
pub type SharedEngine = Arc<MatchingEngine>;

/// Per-session permissions derived from the server configuration.
#[derive(Debug, Clone, Default)]
pub struct SessionPolicy {
    /// Whether sessions may deposit cash and issue certificates.
    pub allow_admin_commands: bool,
    /// Accounts that may log in and query but never trade.
    pub restricted_accounts: HashSet<AccountId>,
}

impl SessionPolicy {
    pub fn from_config(config: &Config) -> Self {
        SessionPolicy {
            allow_admin_commands: config.allow_admin_commands,
            restricted_accounts: config
                .restricted_accounts
                .iter()
                .copied()
                .map(AccountId)
                .collect(),
        }
    }

    pub fn principal_for(&self, account: AccountId) -> Principal {
        if self.restricted_accounts.contains(&account) {
            Principal::restricted(account)
        } else {
            Principal::trader(account)
        }
    }

    /// Deposits and issuance stand in for external systems.
    pub fn permits(&self, msg: &InputMessage) -> bool {
        match msg {
            InputMessage::Deposit(_) | InputMessage::Issue { .. } => self.allow_admin_commands,
            _ => true,
        }
    }
}
