//! Deposits and withdrawals.
//!
//! Both are thin records layered on the transfer engine: the money movement
//! itself is one transfer between a platform-side wallet and the user's
//! wallet, and the payment status follows the transfer's outcome.

pub mod deposit;
pub mod types;
pub mod withdraw;

pub use deposit::DepositService;
pub use types::{DepositRecord, PaymentStatus, WithdrawalRecord};
pub use withdraw::WithdrawService;
