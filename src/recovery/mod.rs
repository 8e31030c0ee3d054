//! Recovery of stuck transfers.
//!
//! A transfer is stuck when its processing heartbeat is stale while the
//! phase is non-terminal. The leg markers in the journal decide the outcome
//! deterministically:
//!
//! - no debit marker: nothing moved, mark `failed`;
//! - debit and credit markers: post the missing fee leg (if any) and
//!   finalize `approved`;
//! - debit marker only: compensate with a tagged reversal entry and mark
//!   `failed`.
//!
//! Every step reuses the idempotent store primitives, so recovering the same
//! transfer twice (or racing another recovery worker) never double-posts.

pub mod worker;

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use crate::core_types::TransferId;
use crate::error::EngineError;
use crate::ledger::journal::{EntryCause, EntryType, Leg, RefType};
use crate::ledger::LedgerStore;
use crate::transfer::phase::TransferPhase;
use crate::transfer::types::TransferRecord;
use crate::transfer::TransferEngine;
use crate::wallet::{WalletKey, WalletManager};

pub use worker::{RecoveryWorker, WorkerConfig};

/// What recovery did with one transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryOutcome {
    /// All legs were present or completable; transfer finalized approved.
    Completed,
    /// Debit was reversed; transfer marked failed.
    Compensated,
    /// No leg was ever posted; transfer marked failed.
    FailedClean,
    /// Already terminal, or another worker moved it first.
    Skipped,
}

pub struct RecoveryCoordinator {
    store: Arc<dyn LedgerStore>,
    wallets: Arc<WalletManager>,
    engine: Arc<TransferEngine>,
}

impl RecoveryCoordinator {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        wallets: Arc<WalletManager>,
        engine: Arc<TransferEngine>,
    ) -> Self {
        Self {
            store,
            wallets,
            engine,
        }
    }

    /// Transfers whose heartbeat went stale. Transfers that never started
    /// leg execution (manual review) have no heartbeat and are not returned.
    pub async fn find_stuck(
        &self,
        older_than: Duration,
        limit: usize,
    ) -> Result<Vec<TransferRecord>, EngineError> {
        self.store.find_stuck(older_than, limit).await
    }

    /// Settle one transfer based on its leg markers.
    pub async fn recover(&self, id: TransferId) -> Result<RecoveryOutcome, EngineError> {
        let record = self
            .store
            .transfer(id)
            .await?
            .ok_or_else(|| EngineError::TransferNotFound(id.to_string()))?;
        if record.phase.is_terminal() {
            return Ok(RecoveryOutcome::Skipped);
        }
        if record.phase == TransferPhase::Pending {
            // Never started; held for manual review, not ours to settle.
            return Ok(RecoveryOutcome::Skipped);
        }

        let ref_id = id.to_string();
        let debit = self
            .store
            .leg_entry(RefType::Transfer, &ref_id, Leg::Debit)
            .await?;
        if debit.is_none() {
            return self.fail_clean(&record).await;
        }

        let credit = self
            .store
            .leg_entry(RefType::Transfer, &ref_id, Leg::Credit)
            .await?;
        match credit {
            Some(_) => self.complete(&record).await,
            None => self.compensate(&record).await,
        }
    }

    /// One recovery sweep: settle up to `limit` stuck transfers. Returns the
    /// number actually settled; per-transfer errors are logged and skipped
    /// so one bad record cannot stall the sweep.
    pub async fn recover_all(
        &self,
        older_than: Duration,
        limit: usize,
    ) -> Result<usize, EngineError> {
        let stuck = self.find_stuck(older_than, limit).await?;
        let mut settled = 0;
        for record in stuck {
            match self.recover(record.id).await {
                Ok(RecoveryOutcome::Skipped) => {}
                Ok(outcome) => {
                    info!(transfer_id = %record.id, ?outcome, "stuck transfer settled");
                    settled += 1;
                }
                Err(e) => {
                    error!(transfer_id = %record.id, error = %e, "recovery failed");
                }
            }
        }
        Ok(settled)
    }

    /// Both monetary legs posted: fill in the fee leg if missing, finalize.
    async fn complete(&self, record: &TransferRecord) -> Result<RecoveryOutcome, EngineError> {
        let id = record.id;
        // Walk the phase forward from wherever execution stalled.
        self.store
            .update_phase_if(id, TransferPhase::DebitPending, TransferPhase::DebitPosted)
            .await?;
        self.store
            .update_phase_if(id, TransferPhase::DebitPosted, TransferPhase::CreditPending)
            .await?;

        if record.fee_amount > 0 {
            let fee = self
                .store
                .leg_entry(RefType::Transfer, &id.to_string(), Leg::Fee)
                .await?;
            if fee.is_none() {
                self.engine.post_fee_leg(record).await?;
            }
        }
        self.engine.finalize_approved(id).await?;
        Ok(RecoveryOutcome::Completed)
    }

    /// Debit posted but credit never happened: refund the source with a
    /// reversal entry and mark the transfer failed. The reversal leg marker
    /// makes the refund exactly-once.
    async fn compensate(&self, record: &TransferRecord) -> Result<RecoveryOutcome, EngineError> {
        let id = record.id;
        if record.phase != TransferPhase::Compensating
            && !self
                .store
                .update_phase_with_error(
                    id,
                    record.phase,
                    TransferPhase::Compensating,
                    "credit leg never posted",
                )
                .await?
        {
            return Ok(RecoveryOutcome::Skipped);
        }

        let from_key = WalletKey::new(
            record.from_user_id,
            record.tenant_id.clone(),
            record.currency.clone(),
            record.from_category.clone(),
        );
        let from_wallet = self.wallets.resolve(&from_key).await?;
        let posting = self
            .store
            .apply_balance_delta(
                from_wallet.id,
                record.from_kind,
                record.amount,
                EntryCause {
                    entry_type: EntryType::Reversal,
                    ref_type: RefType::Transfer,
                    ref_id: id.to_string(),
                    leg: Some(Leg::Reversal),
                    description: Some("transfer compensation".to_string()),
                },
            )
            .await?;
        if posting.replayed {
            warn!(transfer_id = %id, "reversal already posted, finishing compensation");
        }

        self.store
            .update_phase_with_error(
                id,
                TransferPhase::Compensating,
                TransferPhase::Failed,
                "compensated: credit leg never posted",
            )
            .await?;
        Ok(RecoveryOutcome::Compensated)
    }

    /// No funds moved: just mark failed.
    async fn fail_clean(&self, record: &TransferRecord) -> Result<RecoveryOutcome, EngineError> {
        if self
            .store
            .update_phase_with_error(
                record.id,
                record.phase,
                TransferPhase::Failed,
                "debit leg never posted",
            )
            .await?
        {
            Ok(RecoveryOutcome::FailedClean)
        } else {
            Ok(RecoveryOutcome::Skipped)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_types::{BalanceKind, Caller, Currency, Role, TenantId, UserId};
    use crate::ledger::memory::MemoryLedgerStore;
    use crate::transfer::phase::TransferStatus;
    use crate::transfer::types::TransferRequest;
    use crate::transfer::{FeePolicy, TransferEvents};

    struct Fixture {
        store: Arc<MemoryLedgerStore>,
        wallets: Arc<WalletManager>,
        engine: Arc<TransferEngine>,
        recovery: RecoveryCoordinator,
    }

    fn system() -> Caller {
        Caller {
            user_id: 0,
            tenant_id: TenantId::from("t"),
            role: Role::System,
        }
    }

    fn eur() -> Currency {
        Currency::parse("EUR").unwrap()
    }

    fn key(user_id: UserId) -> WalletKey {
        WalletKey::new(user_id, "t", eur(), "main")
    }

    async fn fixture() -> Fixture {
        let store: Arc<MemoryLedgerStore> = Arc::new(MemoryLedgerStore::new());
        let wallets = Arc::new(WalletManager::new(store.clone()));
        let engine = Arc::new(TransferEngine::new(
            store.clone(),
            wallets.clone(),
            FeePolicy {
                fee_user_id: 999,
                platform_category: "main".to_string(),
            },
            TransferEvents::default(),
        ));
        let recovery = RecoveryCoordinator::new(store.clone(), wallets.clone(), engine.clone());
        Fixture {
            store,
            wallets,
            engine,
            recovery,
        }
    }

    async fn funded_wallet(fx: &Fixture, user_id: UserId, amount: i64) {
        let w = fx
            .wallets
            .create_wallet(&system(), key(user_id), false)
            .await
            .unwrap();
        if amount > 0 {
            fx.wallets
                .apply_funding(&system(), w.id, BalanceKind::Real, amount, "seed", None)
                .await
                .unwrap();
        }
    }

    async fn balance(fx: &Fixture, user_id: UserId) -> i64 {
        fx.wallets.resolve(&key(user_id)).await.unwrap().balance
    }

    /// Insert a transfer and simulate a crash right after the debit leg.
    async fn crash_after_debit(fx: &Fixture, req: &TransferRequest) -> TransferRecord {
        let record = TransferRecord::new(req);
        fx.store.insert_transfer(&record).await.unwrap();
        fx.store
            .update_phase_if(record.id, TransferPhase::Pending, TransferPhase::DebitPending)
            .await
            .unwrap();
        fx.store.touch_heartbeat(record.id).await.unwrap();

        let from = fx.wallets.resolve(&key(req.from_user_id)).await.unwrap();
        fx.store
            .apply_balance_delta(
                from.id,
                req.from_kind,
                -req.amount,
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
        record
    }

    #[tokio::test]
    async fn test_compensates_debit_only_exactly_once() {
        let fx = fixture().await;
        funded_wallet(&fx, 1, 1_000).await;
        funded_wallet(&fx, 2, 0).await;

        let req = TransferRequest::new("t", 1, 2, 400, eur());
        let rec = crash_after_debit(&fx, &req).await;
        assert_eq!(balance(&fx, 1).await, 600);

        let outcome = fx.recovery.recover(rec.id).await.unwrap();
        assert_eq!(outcome, RecoveryOutcome::Compensated);
        assert_eq!(balance(&fx, 1).await, 1_000);
        assert_eq!(balance(&fx, 2).await, 0);

        let settled = fx.engine.transfer(rec.id).await.unwrap();
        assert_eq!(settled.status(), TransferStatus::Failed);

        // Second recovery must not refund again.
        let again = fx.recovery.recover(rec.id).await.unwrap();
        assert_eq!(again, RecoveryOutcome::Skipped);
        assert_eq!(balance(&fx, 1).await, 1_000);

        let reversal = fx
            .store
            .leg_entry(RefType::Transfer, &rec.id.to_string(), Leg::Reversal)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reversal.entry_type, EntryType::Reversal);
        assert_eq!(reversal.amount, 400);
    }

    #[tokio::test]
    async fn test_completes_when_both_legs_posted() {
        let fx = fixture().await;
        funded_wallet(&fx, 1, 1_000).await;
        funded_wallet(&fx, 2, 0).await;

        let req = TransferRequest::new("t", 1, 2, 500, eur()).with_fee(30);
        let rec = crash_after_debit(&fx, &req).await;
        // Credit landed too; crash happened before the fee leg.
        fx.store
            .update_phase_if(rec.id, TransferPhase::DebitPending, TransferPhase::DebitPosted)
            .await
            .unwrap();
        fx.store
            .update_phase_if(rec.id, TransferPhase::DebitPosted, TransferPhase::CreditPending)
            .await
            .unwrap();
        let to = fx.wallets.resolve(&key(2)).await.unwrap();
        fx.store
            .apply_balance_delta(
                to.id,
                BalanceKind::Real,
                470,
                EntryCause {
                    entry_type: EntryType::TransferIn,
                    ref_type: RefType::Transfer,
                    ref_id: rec.id.to_string(),
                    leg: Some(Leg::Credit),
                    description: None,
                },
            )
            .await
            .unwrap();

        let outcome = fx.recovery.recover(rec.id).await.unwrap();
        assert_eq!(outcome, RecoveryOutcome::Completed);

        let settled = fx.engine.transfer(rec.id).await.unwrap();
        assert_eq!(settled.status(), TransferStatus::Approved);
        assert_eq!(balance(&fx, 1).await, 500);
        assert_eq!(balance(&fx, 2).await, 470);
        assert_eq!(balance(&fx, 999).await, 30);

        // Idempotent: nothing changes on a second pass.
        fx.recovery.recover(rec.id).await.unwrap();
        assert_eq!(balance(&fx, 999).await, 30);
    }

    #[tokio::test]
    async fn test_fails_clean_when_debit_never_posted() {
        let fx = fixture().await;
        funded_wallet(&fx, 1, 1_000).await;
        funded_wallet(&fx, 2, 0).await;

        let req = TransferRequest::new("t", 1, 2, 400, eur());
        let record = TransferRecord::new(&req);
        fx.store.insert_transfer(&record).await.unwrap();
        fx.store
            .update_phase_if(record.id, TransferPhase::Pending, TransferPhase::DebitPending)
            .await
            .unwrap();
        fx.store.touch_heartbeat(record.id).await.unwrap();

        let outcome = fx.recovery.recover(record.id).await.unwrap();
        assert_eq!(outcome, RecoveryOutcome::FailedClean);
        assert_eq!(balance(&fx, 1).await, 1_000);
        let settled = fx.engine.transfer(record.id).await.unwrap();
        assert_eq!(settled.status(), TransferStatus::Failed);
    }

    #[tokio::test]
    async fn test_pending_manual_review_is_skipped() {
        let fx = fixture().await;
        funded_wallet(&fx, 1, 1_000).await;
        funded_wallet(&fx, 2, 0).await;

        let req = TransferRequest::new("t", 1, 2, 400, eur());
        let record = TransferRecord::new(&req);
        fx.store.insert_transfer(&record).await.unwrap();

        let outcome = fx.recovery.recover(record.id).await.unwrap();
        assert_eq!(outcome, RecoveryOutcome::Skipped);
        let rec = fx.engine.transfer(record.id).await.unwrap();
        assert_eq!(rec.status(), TransferStatus::Pending);
    }

    #[tokio::test]
    async fn test_recover_all_sweeps_stale_heartbeats() {
        let fx = fixture().await;
        funded_wallet(&fx, 1, 1_000).await;
        funded_wallet(&fx, 2, 0).await;

        let req = TransferRequest::new("t", 1, 2, 400, eur());
        let rec = crash_after_debit(&fx, &req).await;

        tokio::time::sleep(Duration::from_millis(5)).await;
        let settled = fx
            .recovery
            .recover_all(Duration::from_millis(1), 100)
            .await
            .unwrap();
        assert_eq!(settled, 1);
        assert_eq!(balance(&fx, 1).await, 1_000);

        let after = fx.engine.transfer(rec.id).await.unwrap();
        assert_eq!(after.status(), TransferStatus::Failed);

        // A fresh sweep finds nothing.
        let settled = fx
            .recovery
            .recover_all(Duration::from_millis(1), 100)
            .await
            .unwrap();
        assert_eq!(settled, 0);
    }
}
