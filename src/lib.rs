//! Wallet ledger and transfer engine.
//!
//! Exactly-once balance mutation over a keyed wallet store, an append-only
//! journal with running balance snapshots, two-phase recoverable transfers
//! idempotent by external ref, and deposits/withdrawals layered on top.

pub mod api;
pub mod config;
pub mod core_types;
pub mod error;
pub mod ledger;
pub mod logging;
pub mod money;
pub mod payments;
pub mod recovery;
pub mod transfer;
pub mod wallet;

pub use error::EngineError;
