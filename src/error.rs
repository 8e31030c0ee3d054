//! Engine error taxonomy.
//!
//! Every caller-visible failure maps to a stable string code plus an HTTP
//! status suggestion, so retrying clients can branch on `code` without
//! parsing messages.

use thiserror::Error;

use crate::money::MoneyError;

#[derive(Error, Debug, Clone)]
pub enum EngineError {
    // === Validation ===
    #[error("invalid input: {0}")]
    Validation(String),

    #[error("unknown currency: {0}")]
    UnknownCurrency(String),

    #[error("fee must satisfy 0 <= fee < amount")]
    InvalidFee,

    #[error("source and destination wallet cannot be the same")]
    SameWallet,

    // === Policy ===
    #[error("insufficient funds")]
    InsufficientFunds,

    #[error("wallet is suspended")]
    WalletSuspended,

    #[error("caller role lacks permission for this operation")]
    Unauthorized,

    // === Identity ===
    #[error("wallet already exists for this user/currency/category")]
    DuplicateWallet,

    #[error("wallet not found")]
    WalletNotFound,

    #[error("transfer not found: {0}")]
    TransferNotFound(String),

    #[error("deposit not found: {0}")]
    DepositNotFound(String),

    #[error("withdrawal not found: {0}")]
    WithdrawalNotFound(String),

    // === Lifecycle ===
    #[error("transfer is not in a cancelable state")]
    NotCancelable,

    // === System ===
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// Stable error code for API responses.
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::Validation(_) => "VALIDATION_ERROR",
            EngineError::UnknownCurrency(_) => "UNKNOWN_CURRENCY",
            EngineError::InvalidFee => "INVALID_FEE",
            EngineError::SameWallet => "SAME_WALLET",
            EngineError::InsufficientFunds => "INSUFFICIENT_FUNDS",
            EngineError::WalletSuspended => "WALLET_SUSPENDED",
            EngineError::Unauthorized => "UNAUTHORIZED",
            EngineError::DuplicateWallet => "DUPLICATE_WALLET",
            EngineError::WalletNotFound => "WALLET_NOT_FOUND",
            EngineError::TransferNotFound(_) => "TRANSFER_NOT_FOUND",
            EngineError::DepositNotFound(_) => "DEPOSIT_NOT_FOUND",
            EngineError::WithdrawalNotFound(_) => "WITHDRAWAL_NOT_FOUND",
            EngineError::NotCancelable => "NOT_CANCELABLE",
            EngineError::StoreUnavailable(_) => "STORE_UNAVAILABLE",
            EngineError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// HTTP status code suggestion.
    pub fn http_status(&self) -> u16 {
        match self {
            EngineError::Validation(_)
            | EngineError::UnknownCurrency(_)
            | EngineError::InvalidFee
            | EngineError::SameWallet => 400,
            EngineError::Unauthorized => 403,
            EngineError::WalletNotFound
            | EngineError::TransferNotFound(_)
            | EngineError::DepositNotFound(_)
            | EngineError::WithdrawalNotFound(_) => 404,
            EngineError::DuplicateWallet => 409,
            EngineError::InsufficientFunds
            | EngineError::WalletSuspended
            | EngineError::NotCancelable => 422,
            EngineError::StoreUnavailable(_) => 503,
            EngineError::Internal(_) => 500,
        }
    }

    /// Whether a caller may safely retry with the same idempotency key.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::StoreUnavailable(_))
    }
}

impl From<sqlx::Error> for EngineError {
    fn from(e: sqlx::Error) -> Self {
        EngineError::StoreUnavailable(e.to_string())
    }
}

impl From<MoneyError> for EngineError {
    fn from(e: MoneyError) -> Self {
        EngineError::Validation(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(EngineError::InsufficientFunds.code(), "INSUFFICIENT_FUNDS");
        assert_eq!(EngineError::DuplicateWallet.code(), "DUPLICATE_WALLET");
        assert_eq!(EngineError::Unauthorized.code(), "UNAUTHORIZED");
    }

    #[test]
    fn test_http_status() {
        assert_eq!(EngineError::Validation("x".into()).http_status(), 400);
        assert_eq!(EngineError::Unauthorized.http_status(), 403);
        assert_eq!(EngineError::WalletNotFound.http_status(), 404);
        assert_eq!(EngineError::InsufficientFunds.http_status(), 422);
        assert_eq!(
            EngineError::StoreUnavailable("down".into()).http_status(),
            503
        );
    }

    #[test]
    fn test_retryable() {
        assert!(EngineError::StoreUnavailable("x".into()).is_retryable());
        assert!(!EngineError::InsufficientFunds.is_retryable());
    }
}
