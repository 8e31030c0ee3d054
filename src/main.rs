use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};

use wallet_engine::api::auth::AuthKeys;
use wallet_engine::api::{self, AppState};
use wallet_engine::config::AppConfig;
use wallet_engine::ledger::memory::MemoryLedgerStore;
use wallet_engine::ledger::postgres::PgLedgerStore;
use wallet_engine::ledger::LedgerStore;
use wallet_engine::logging::init_logging;
use wallet_engine::payments::{DepositService, WithdrawService};
use wallet_engine::recovery::{RecoveryCoordinator, RecoveryWorker, WorkerConfig};
use wallet_engine::transfer::{FeePolicy, TransferEngine, TransferEvents};
use wallet_engine::wallet::WalletManager;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env = std::env::args()
        .skip_while(|a| a != "--env")
        .nth(1)
        .unwrap_or_else(|| "dev".to_string());
    let config = AppConfig::load(&env);
    let _guard = init_logging(&config);
    info!(env = %env, "wallet-engine starting");

    let store: Arc<dyn LedgerStore> = match &config.postgres_url {
        Some(url) => {
            let pg = PgLedgerStore::connect(url)
                .await
                .context("connecting to postgres")?;
            pg.init_schema().await.context("initializing schema")?;
            Arc::new(pg)
        }
        None => {
            warn!("no postgres_url configured, running on the in-memory store");
            Arc::new(MemoryLedgerStore::new())
        }
    };

    let wallets = Arc::new(WalletManager::new(store.clone()));
    let engine = Arc::new(TransferEngine::new(
        store.clone(),
        wallets.clone(),
        FeePolicy {
            fee_user_id: config.payments.fee_user_id,
            platform_category: config.payments.platform_category.clone(),
        },
        TransferEvents::default(),
    ));
    let deposits = DepositService::new(store.clone(), engine.clone());
    let withdrawals = WithdrawService::new(store.clone(), engine.clone(), &config.payments);

    let coordinator = Arc::new(RecoveryCoordinator::new(
        store.clone(),
        wallets.clone(),
        engine.clone(),
    ));
    tokio::spawn(RecoveryWorker::new(coordinator, WorkerConfig::from(&config.recovery)).run());

    let state = Arc::new(AppState {
        store,
        wallets,
        engine,
        deposits,
        withdrawals,
        auth: AuthKeys::new(&config.auth.jwt_secret),
    });
    let app = api::router(state);

    let addr = format!("{}:{}", config.gateway.host, config.gateway.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {}", addr))?;
    info!(%addr, "gateway listening");
    axum::serve(listener, app).await.context("serving http")?;
    Ok(())
}
