//! exchange-core
//!
//! Pure engine logic for a renewable-energy-certificate marketplace:
//! - ids, lot identity, fees and configuration
//! - account ledger and holding store (row-locked)
//! - order lifecycle manager and per-lot order book index
//! - settlement coordinator and arrival matching loop
//! - audit outbox and recorder seam
//! - logical input/output messages

pub mod audit;
pub mod config;
pub mod error;
pub mod fees;
pub mod holding;
pub mod identity;
pub mod ids;
pub mod ledger;
pub mod lifecycle;
pub mod lot;
pub mod matching_engine;
pub mod messages;
pub mod order;
pub mod order_book;
pub mod settlement;
pub mod side;
pub mod trade;

pub use audit::{
    AuditOutbox, AuditRecorder, AuditReference, AuditStats, AuditWorker, InMemoryAuditRecorder,
    TradeFacts,
};
pub use config::{AuditConfig, EngineConfig};
pub use error::{AuditError, EngineError, EngineResult};
pub use fees::{FeeSchedule, Money, Price, Quantity, TradeAmounts};
pub use holding::{Holding, HoldingStore};
pub use identity::Principal;
pub use ids::{AccountId, OrderId, TradeId};
pub use ledger::{Account, AccountLedger, PortfolioTotals};
pub use lifecycle::OrderManager;
pub use lot::{EnergyType, LotIdentity};
pub use matching_engine::{MatchingEngine, OrderPlacement};
pub use messages::{InputMessage, OutputMessage};
pub use order::{FillPolicy, NewOrderRequest, Order, OrderStatus};
pub use order_book::{OrderBook, RestingEntry};
pub use settlement::SettlementCoordinator;
pub use side::Side;
pub use trade::{TradeRecord, TradeStatus, TradeStore};
