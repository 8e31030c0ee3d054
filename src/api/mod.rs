//! HTTP gateway.

pub mod auth;
pub mod handlers;
pub mod types;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;

use crate::ledger::LedgerStore;
use crate::payments::{DepositService, WithdrawService};
use crate::transfer::TransferEngine;
use crate::wallet::WalletManager;

use auth::AuthKeys;

pub struct AppState {
    pub store: Arc<dyn LedgerStore>,
    pub wallets: Arc<WalletManager>,
    pub engine: Arc<TransferEngine>,
    pub deposits: DepositService,
    pub withdrawals: WithdrawService,
    pub auth: AuthKeys,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route(
            "/api/v1/wallets",
            post(handlers::create_wallet).get(handlers::list_wallets),
        )
        .route("/api/v1/wallets/balances", post(handlers::bulk_balances))
        .route("/api/v1/wallets/{id}", get(handlers::get_wallet))
        .route(
            "/api/v1/wallets/{id}/suspend",
            post(handlers::suspend_wallet),
        )
        .route(
            "/api/v1/wallets/{id}/transactions",
            post(handlers::create_wallet_transaction),
        )
        .route("/api/v1/transactions", get(handlers::list_transactions))
        .route(
            "/api/v1/transfers",
            post(handlers::create_transfer).get(handlers::list_transfers),
        )
        .route("/api/v1/transfers/{id}", get(handlers::get_transfer))
        .route(
            "/api/v1/transfers/{id}/approve",
            post(handlers::approve_transfer),
        )
        .route(
            "/api/v1/transfers/{id}/cancel",
            post(handlers::cancel_transfer),
        )
        .route("/api/v1/deposits", post(handlers::create_deposit))
        .route("/api/v1/deposits/{id}", get(handlers::get_deposit))
        .route("/api/v1/withdrawals", post(handlers::create_withdrawal))
        .route("/api/v1/withdrawals/{id}", get(handlers::get_withdrawal))
        .with_state(state)
}
