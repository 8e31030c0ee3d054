//! End-to-end properties of the wallet engine, run against the in-memory
//! store. These are the invariants the whole design hangs on: no lost
//! updates, idempotent transfers, exact-once recovery, and a journal that
//! replays to the live balance.

use std::sync::Arc;

use wallet_engine::core_types::{BalanceKind, Caller, Currency, Role, UserId};
use wallet_engine::error::EngineError;
use wallet_engine::ledger::journal::{replay_balance, EntryCause, EntryType, Leg, RefType};
use wallet_engine::ledger::memory::MemoryLedgerStore;
use wallet_engine::ledger::LedgerStore;
use wallet_engine::payments::deposit::DepositRequest;
use wallet_engine::payments::{DepositService, PaymentStatus};
use wallet_engine::recovery::{RecoveryCoordinator, RecoveryOutcome};
use wallet_engine::transfer::{
    FeePolicy, TransferEngine, TransferEvents, TransferPhase, TransferRecord, TransferRequest,
    TransferStatus,
};
use wallet_engine::wallet::{WalletKey, WalletManager};

const FEE_USER: UserId = 999;

struct Harness {
    store: Arc<MemoryLedgerStore>,
    wallets: Arc<WalletManager>,
    engine: Arc<TransferEngine>,
    recovery: RecoveryCoordinator,
}

fn system() -> Caller {
    Caller {
        user_id: 0,
        tenant_id: "t".to_string(),
        role: Role::System,
    }
}

fn eur() -> Currency {
    Currency::parse("EUR").unwrap()
}

fn key(user_id: UserId) -> WalletKey {
    WalletKey::new(user_id, "t", eur(), "main")
}

fn harness() -> Harness {
    let store: Arc<MemoryLedgerStore> = Arc::new(MemoryLedgerStore::new());
    let wallets = Arc::new(WalletManager::new(store.clone()));
    let engine = Arc::new(TransferEngine::new(
        store.clone(),
        wallets.clone(),
        FeePolicy {
            fee_user_id: FEE_USER,
            platform_category: "main".to_string(),
        },
        TransferEvents::default(),
    ));
    let recovery = RecoveryCoordinator::new(store.clone(), wallets.clone(), engine.clone());
    Harness {
        store,
        wallets,
        engine,
        recovery,
    }
}

async fn funded_wallet(h: &Harness, user_id: UserId, amount: i64) {
    let w = h
        .wallets
        .create_wallet(&system(), key(user_id), false)
        .await
        .unwrap();
    if amount > 0 {
        h.wallets
            .apply_funding(&system(), w.id, BalanceKind::Real, amount, "seed", None)
            .await
            .unwrap();
    }
}

async fn balance(h: &Harness, user_id: UserId) -> i64 {
    h.wallets.resolve(&key(user_id)).await.unwrap().balance
}

#[tokio::test]
async fn concurrent_deltas_lose_no_updates() {
    let h = harness();
    funded_wallet(&h, 1, 0).await;
    let wallet_id = h.wallets.resolve(&key(1)).await.unwrap().id;

    let mut tasks = Vec::new();
    for i in 0..100 {
        let store = h.store.clone();
        tasks.push(tokio::spawn(async move {
            store
                .apply_balance_delta(
                    wallet_id,
                    BalanceKind::Real,
                    7,
                    EntryCause {
                        entry_type: EntryType::Adjustment,
                        ref_type: RefType::Manual,
                        ref_id: format!("inc-{}", i),
                        leg: None,
                        description: None,
                    },
                )
                .await
                .unwrap();
        }));
    }
    for t in tasks {
        t.await.unwrap();
    }

    assert_eq!(balance(&h, 1).await, 700);
    let entries = h.store.entries_for_wallet(wallet_id).await.unwrap();
    assert_eq!(entries.len(), 100);
}

#[tokio::test]
async fn concurrent_same_external_ref_creates_one_transfer() {
    let h = harness();
    funded_wallet(&h, 1, 10_000).await;
    funded_wallet(&h, 2, 0).await;

    let mut tasks = Vec::new();
    for _ in 0..20 {
        let engine = h.engine.clone();
        tasks.push(tokio::spawn(async move {
            engine
                .create_transfer(
                    TransferRequest::new("t", 1, 2, 1_000, Currency::parse("EUR").unwrap())
                        .with_external_ref("retry-storm"),
                )
                .await
                .unwrap()
        }));
    }
    let mut ids = Vec::new();
    for t in tasks {
        ids.push(t.await.unwrap().id);
    }
    ids.dedup();
    assert_eq!(ids.iter().collect::<std::collections::HashSet<_>>().len(), 1);

    // Funds moved exactly once.
    assert_eq!(balance(&h, 1).await, 9_000);
    assert_eq!(balance(&h, 2).await, 1_000);

    let from_id = h.wallets.resolve(&key(1)).await.unwrap().id;
    let debits = h
        .store
        .entries_for_wallet(from_id)
        .await
        .unwrap()
        .into_iter()
        .filter(|e| e.entry_type == EntryType::TransferOut)
        .count();
    assert_eq!(debits, 1);
}

#[tokio::test]
async fn negative_balance_policy_is_enforced() {
    let h = harness();
    funded_wallet(&h, 1, 100).await;
    funded_wallet(&h, 2, 0).await;

    let err = h
        .engine
        .create_transfer(TransferRequest::new("t", 1, 2, 500, eur()))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InsufficientFunds));
    assert_eq!(balance(&h, 1).await, 100);

    // A system treasury wallet may go negative.
    let treasury = h
        .wallets
        .create_wallet(&system(), key(50), true)
        .await
        .unwrap();
    funded_wallet(&h, 51, 0).await;
    let rec = h
        .engine
        .create_transfer(TransferRequest::new("t", 50, 51, 500, eur()))
        .await
        .unwrap();
    assert_eq!(rec.status(), TransferStatus::Approved);
    assert_eq!(
        h.wallets.wallet(treasury.id).await.unwrap().balance,
        -500
    );
    assert_eq!(balance(&h, 51).await, 500);
}

#[tokio::test]
async fn journal_replays_to_live_balance() {
    let h = harness();
    funded_wallet(&h, 1, 10_000).await;
    funded_wallet(&h, 2, 3_000).await;

    for i in 0..5 {
        h.engine
            .create_transfer(
                TransferRequest::new("t", 1, 2, 500 + i * 10, eur())
                    .with_fee(if i % 2 == 0 { 13 } else { 0 }),
            )
            .await
            .unwrap();
    }
    h.engine
        .create_transfer(TransferRequest::new("t", 2, 1, 700, eur()))
        .await
        .unwrap();

    for user in [1, 2, FEE_USER] {
        let wallet = h.wallets.resolve(&key(user)).await.unwrap();
        let entries = h.store.entries_for_wallet(wallet.id).await.unwrap();
        let replayed = replay_balance(&entries, BalanceKind::Real).unwrap();
        assert_eq!(replayed, wallet.balance, "user {} balance drifted", user);
    }
}

#[tokio::test]
async fn recovery_compensates_exactly_once_under_races() {
    let h = harness();
    funded_wallet(&h, 1, 1_000).await;
    funded_wallet(&h, 2, 0).await;

    // Crash after the debit leg: record stuck in DEBIT_PENDING with the
    // debit marker posted.
    let req = TransferRequest::new("t", 1, 2, 400, eur());
    let record = TransferRecord::new(&req);
    h.store.insert_transfer(&record).await.unwrap();
    h.store
        .update_phase_if(record.id, TransferPhase::Pending, TransferPhase::DebitPending)
        .await
        .unwrap();
    h.store.touch_heartbeat(record.id).await.unwrap();
    let from = h.wallets.resolve(&key(1)).await.unwrap();
    h.store
        .apply_balance_delta(
            from.id,
            BalanceKind::Real,
            -400,
            EntryCause {
                entry_type: EntryType::TransferOut,
                ref_type: RefType::Transfer,
                ref_id: record.id.to_string(),
                leg: Some(Leg::Debit),
                description: None,
            },
        )
        .await
        .unwrap();
    assert_eq!(balance(&h, 1).await, 600);

    // Racing recoveries: at most one does the refund work, the rest replay
    // or skip, and the refund lands exactly once.
    let recovery = Arc::new(RecoveryCoordinator::new(
        h.store.clone(),
        h.wallets.clone(),
        h.engine.clone(),
    ));
    let mut tasks = Vec::new();
    for _ in 0..8 {
        let recovery = recovery.clone();
        let id = record.id;
        tasks.push(tokio::spawn(async move { recovery.recover(id).await.unwrap() }));
    }
    let mut outcomes = Vec::new();
    for t in tasks {
        outcomes.push(t.await.unwrap());
    }
    assert!(outcomes
        .iter()
        .any(|o| *o == RecoveryOutcome::Compensated || *o == RecoveryOutcome::Skipped));

    assert_eq!(balance(&h, 1).await, 1_000);
    assert_eq!(balance(&h, 2).await, 0);
    let settled = h.engine.transfer(record.id).await.unwrap();
    assert_eq!(settled.status(), TransferStatus::Failed);
}

#[tokio::test]
async fn fee_splits_amount_exactly() {
    let h = harness();
    funded_wallet(&h, 1, 1_000).await;
    funded_wallet(&h, 2, 0).await;

    let rec = h
        .engine
        .create_transfer(TransferRequest::new("t", 1, 2, 1_000, eur()).with_fee(29))
        .await
        .unwrap();
    assert_eq!(rec.status(), TransferStatus::Approved);
    assert_eq!(rec.net_amount(), 971);
    assert_eq!(balance(&h, 1).await, 0);
    assert_eq!(balance(&h, 2).await, 971);
    assert_eq!(balance(&h, FEE_USER).await, 29);
}

#[tokio::test]
async fn deposit_status_follows_transfer_outcome() {
    let h = harness();
    // Provider float wallet, negative-capable.
    h.wallets
        .create_wallet(&system(), key(10), true)
        .await
        .unwrap();
    let deposits = DepositService::new(h.store.clone(), h.engine.clone());
    let provider = Caller {
        user_id: 10,
        tenant_id: "t".to_string(),
        role: Role::PaymentProvider,
    };

    let dep = deposits
        .create_deposit(
            &provider,
            DepositRequest {
                user_id: 7,
                from_user_id: None,
                amount: 10_000,
                fee_amount: 250,
                currency: eur(),
                method: "card".into(),
            },
        )
        .await
        .unwrap();
    assert_eq!(dep.status, PaymentStatus::Completed);
    assert_eq!(dep.net_amount, 9_750);

    let transfer = h.engine.transfer(dep.transfer_id.unwrap()).await.unwrap();
    assert_eq!(transfer.status(), TransferStatus::Approved);
    assert_eq!(balance(&h, 7).await, 9_750);
    assert_eq!(balance(&h, FEE_USER).await, 250);

    // Same deposit id retried at the transfer layer moves nothing more.
    let again = deposits.deposit(dep.id).await.unwrap();
    assert_eq!(again.status, PaymentStatus::Completed);
}

#[tokio::test]
async fn bonus_funds_stay_isolated() {
    let h = harness();
    let w = h
        .wallets
        .create_wallet(&system(), key(1), false)
        .await
        .unwrap();
    h.wallets
        .apply_funding(&system(), w.id, BalanceKind::Real, 1_000, "seed", None)
        .await
        .unwrap();
    h.wallets
        .apply_funding(&system(), w.id, BalanceKind::Bonus, 5_000, "promo", None)
        .await
        .unwrap();
    funded_wallet(&h, 2, 0).await;

    // A real-funds transfer larger than the real balance must fail even
    // though bonus could cover it.
    let err = h
        .engine
        .create_transfer(TransferRequest::new("t", 1, 2, 2_000, eur()))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InsufficientFunds));

    let wallet = h.wallets.wallet(w.id).await.unwrap();
    assert_eq!(wallet.balance, 1_000);
    assert_eq!(wallet.bonus_balance, 5_000);

    // Bonus moves only when addressed explicitly.
    let rec = h
        .engine
        .create_transfer(
            TransferRequest::new("t", 1, 2, 2_000, eur())
                .with_kinds(BalanceKind::Bonus, BalanceKind::Bonus),
        )
        .await
        .unwrap();
    assert_eq!(rec.status(), TransferStatus::Approved);
    let wallet = h.wallets.wallet(w.id).await.unwrap();
    assert_eq!(wallet.balance, 1_000);
    assert_eq!(wallet.bonus_balance, 3_000);
    let dest = h.wallets.resolve(&key(2)).await.unwrap();
    assert_eq!(dest.bonus_balance, 2_000);
    assert_eq!(dest.balance, 0);
}
