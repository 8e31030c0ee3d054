//! Wallet identity and creation policy.

pub mod manager;
pub mod types;

pub use manager::WalletManager;
pub use types::{Wallet, WalletKey, WalletStatus};
