//! Transfer execution.
//!
//! Every phase transition is persisted *before* the leg it guards is posted,
//! as a CAS on the expected phase. A crash between any two steps leaves a
//! record whose phase plus leg markers tell recovery exactly what remains to
//! be done. No in-process lock is held across store calls.

use std::sync::Arc;

use tracing::{info, warn};

use crate::core_types::{now_millis, Caller, TransferId, UserId};
use crate::error::EngineError;
use crate::ledger::journal::{EntryCause, EntryType, Leg, RefType};
use crate::ledger::{InsertTransfer, LedgerStore, Page, PageRequest, TransferFilter};
use crate::wallet::{WalletKey, WalletManager};

use super::events::{TransferApproved, TransferEvents};
use super::phase::TransferPhase;
use super::types::{TransferRecord, TransferRequest};

/// Where fee legs land: the platform fee account of the tenant.
#[derive(Debug, Clone)]
pub struct FeePolicy {
    pub fee_user_id: UserId,
    pub platform_category: String,
}

impl Default for FeePolicy {
    fn default() -> Self {
        Self {
            fee_user_id: 1,
            platform_category: "main".to_string(),
        }
    }
}

pub struct TransferEngine {
    store: Arc<dyn LedgerStore>,
    wallets: Arc<WalletManager>,
    fees: FeePolicy,
    events: TransferEvents,
}

impl TransferEngine {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        wallets: Arc<WalletManager>,
        fees: FeePolicy,
        events: TransferEvents,
    ) -> Self {
        Self {
            store,
            wallets,
            fees,
            events,
        }
    }

    pub fn events(&self) -> &TransferEvents {
        &self.events
    }

    /// Create and (unless held for approval) execute a transfer.
    ///
    /// Retries with the same `external_ref` are answered with the stored
    /// record and move no funds. A debit failure yields a `failed` record
    /// and the error; a failure after the debit leg leaves the record
    /// mid-flight for recovery and still returns it as `pending`.
    pub async fn create_transfer(
        &self,
        req: TransferRequest,
    ) -> Result<TransferRecord, EngineError> {
        self.validate(&req)?;

        // Fast path for retries, before touching any wallet.
        if let Some(ext) = &req.external_ref {
            if let Some(existing) = self
                .store
                .transfer_by_external_ref(&req.tenant_id, ext)
                .await?
            {
                return Ok(existing);
            }
        }

        let from_key = WalletKey::new(
            req.from_user_id,
            req.tenant_id.clone(),
            req.currency.clone(),
            req.from_category.clone(),
        );
        let to_key = WalletKey::new(
            req.to_user_id,
            req.tenant_id.clone(),
            req.currency.clone(),
            req.to_category.clone(),
        );
        self.wallets.resolve(&from_key).await?;
        if req.auto_create_destination {
            self.wallets.get_or_create(&to_key).await?;
        } else {
            self.wallets.resolve(&to_key).await?;
        }

        let record = TransferRecord::new(&req);
        match self.store.insert_transfer(&record).await? {
            InsertTransfer::Created => {}
            // Raced another create with the same ref; no funds were moved
            // on this path.
            InsertTransfer::Duplicate(existing) => return Ok(existing),
        }
        info!(transfer_id = %record.id, %record, "transfer created");

        if req.requires_approval {
            return Ok(record);
        }
        self.execute_legs(record).await
    }

    /// Resume leg execution for a pending transfer (manual review flow).
    /// Terminal transfers are returned unchanged; in-flight transfers belong
    /// to recovery and are returned as-is.
    pub async fn approve_transfer(&self, id: TransferId) -> Result<TransferRecord, EngineError> {
        let record = self.transfer(id).await?;
        match record.phase {
            TransferPhase::Pending => self.execute_legs(record).await,
            _ => Ok(record),
        }
    }

    /// Cancel a pending transfer before any leg was posted. Canceling an
    /// already-canceled transfer is a no-op.
    pub async fn cancel_transfer(
        &self,
        caller: &Caller,
        id: TransferId,
    ) -> Result<TransferRecord, EngineError> {
        let record = self.transfer(id).await?;
        if record.tenant_id != caller.tenant_id {
            return Err(EngineError::TransferNotFound(id.to_string()));
        }
        match record.phase {
            TransferPhase::Canceled => return Ok(record),
            TransferPhase::Pending => {}
            _ => return Err(EngineError::NotCancelable),
        }
        let debited = self
            .store
            .leg_entry(RefType::Transfer, &id.to_string(), Leg::Debit)
            .await?;
        if debited.is_some() {
            return Err(EngineError::NotCancelable);
        }
        if !self
            .store
            .update_phase_if(id, TransferPhase::Pending, TransferPhase::Canceled)
            .await?
        {
            // Execution won the race.
            return Err(EngineError::NotCancelable);
        }
        info!(transfer_id = %id, "transfer canceled");
        self.transfer(id).await
    }

    pub async fn transfer(&self, id: TransferId) -> Result<TransferRecord, EngineError> {
        self.store
            .transfer(id)
            .await?
            .ok_or_else(|| EngineError::TransferNotFound(id.to_string()))
    }

    pub async fn transfer_by_external_ref(
        &self,
        tenant_id: &str,
        external_ref: &str,
    ) -> Result<Option<TransferRecord>, EngineError> {
        self.store
            .transfer_by_external_ref(tenant_id, external_ref)
            .await
    }

    pub async fn list(
        &self,
        filter: &TransferFilter,
        page: PageRequest,
    ) -> Result<Page<TransferRecord>, EngineError> {
        self.store.list_transfers(filter, page).await
    }

    fn validate(&self, req: &TransferRequest) -> Result<(), EngineError> {
        if req.amount <= 0 {
            return Err(EngineError::Validation("amount must be positive".into()));
        }
        if req.fee_amount < 0 || req.fee_amount >= req.amount {
            return Err(EngineError::InvalidFee);
        }
        if req.from_user_id == req.to_user_id
            && req.from_category == req.to_category
            && req.from_kind == req.to_kind
        {
            return Err(EngineError::SameWallet);
        }
        Ok(())
    }

    /// Drive the leg sequence debit → credit → fee → approved, persisting
    /// each phase before posting its leg.
    async fn execute_legs(&self, record: TransferRecord) -> Result<TransferRecord, EngineError> {
        let id = record.id;
        let ref_id = id.to_string();

        let from_key = WalletKey::new(
            record.from_user_id,
            record.tenant_id.clone(),
            record.currency.clone(),
            record.from_category.clone(),
        );
        let to_key = WalletKey::new(
            record.to_user_id,
            record.tenant_id.clone(),
            record.currency.clone(),
            record.to_category.clone(),
        );
        let from_wallet = self.wallets.resolve(&from_key).await?;
        let to_wallet = self.wallets.resolve(&to_key).await?;

        if !self
            .store
            .update_phase_if(id, TransferPhase::Pending, TransferPhase::DebitPending)
            .await?
        {
            // Another worker already picked it up.
            return self.transfer(id).await;
        }
        self.store.touch_heartbeat(id).await?;

        let debit = self
            .store
            .apply_balance_delta(
                from_wallet.id,
                record.from_kind,
                -record.amount,
                EntryCause {
                    entry_type: EntryType::TransferOut,
                    ref_type: RefType::Transfer,
                    ref_id: ref_id.clone(),
                    leg: Some(Leg::Debit),
                    description: record.method.clone(),
                },
            )
            .await;
        if let Err(e) = debit {
            if e.is_retryable() {
                // Debit outcome unknown; leave the phase for recovery to
                // settle off the leg marker.
                self.store.increment_retry(id).await?;
                return Err(e);
            }
            self.store
                .update_phase_with_error(
                    id,
                    TransferPhase::DebitPending,
                    TransferPhase::Failed,
                    &e.to_string(),
                )
                .await?;
            warn!(transfer_id = %id, error = %e, "debit leg rejected, transfer failed");
            return Err(e);
        }

        self.store
            .update_phase_if(id, TransferPhase::DebitPending, TransferPhase::DebitPosted)
            .await?;
        if !self
            .store
            .update_phase_if(id, TransferPhase::DebitPosted, TransferPhase::CreditPending)
            .await?
        {
            return self.transfer(id).await;
        }
        self.store.touch_heartbeat(id).await?;

        let credit = self
            .store
            .apply_balance_delta(
                to_wallet.id,
                record.to_kind,
                record.net_amount(),
                EntryCause {
                    entry_type: EntryType::TransferIn,
                    ref_type: RefType::Transfer,
                    ref_id: ref_id.clone(),
                    leg: Some(Leg::Credit),
                    description: record.method.clone(),
                },
            )
            .await;
        if let Err(e) = credit {
            // The debit is committed. Leave the record mid-flight; recovery
            // settles it deterministically.
            self.store.increment_retry(id).await?;
            warn!(transfer_id = %id, error = %e, "credit leg failed, left for recovery");
            return self.transfer(id).await;
        }

        if record.fee_amount > 0 {
            if let Err(e) = self.post_fee_leg(&record).await {
                self.store.increment_retry(id).await?;
                warn!(transfer_id = %id, error = %e, "fee leg failed, left for recovery");
                return self.transfer(id).await;
            }
        }

        self.finalize_approved(id).await?;
        self.transfer(id).await
    }

    /// Credit the fee to the tenant's platform fee wallet. Idempotent per
    /// `(transfer, fee)` leg marker.
    pub(crate) async fn post_fee_leg(&self, record: &TransferRecord) -> Result<(), EngineError> {
        let fee_key = WalletKey::new(
            self.fees.fee_user_id,
            record.tenant_id.clone(),
            record.currency.clone(),
            self.fees.platform_category.clone(),
        );
        let fee_wallet = self.wallets.get_or_create(&fee_key).await?;
        self.store
            .apply_balance_delta(
                fee_wallet.id,
                crate::core_types::BalanceKind::Real,
                record.fee_amount,
                EntryCause {
                    entry_type: EntryType::Fee,
                    ref_type: RefType::Transfer,
                    ref_id: record.id.to_string(),
                    leg: Some(Leg::Fee),
                    description: None,
                },
            )
            .await?;
        Ok(())
    }

    /// Mark approved and emit the event. Shared with recovery finalization.
    pub(crate) async fn finalize_approved(&self, id: TransferId) -> Result<(), EngineError> {
        if !self
            .store
            .update_phase_if(id, TransferPhase::CreditPending, TransferPhase::Approved)
            .await?
        {
            return Ok(());
        }
        let record = self.transfer(id).await?;
        info!(transfer_id = %id, "transfer approved");
        self.events.publish(TransferApproved {
            transfer_id: record.id,
            tenant_id: record.tenant_id.clone(),
            from_user_id: record.from_user_id,
            to_user_id: record.to_user_id,
            amount: record.amount,
            fee_amount: record.fee_amount,
            currency: record.currency.clone(),
            approved_at: now_millis(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_types::{BalanceKind, Currency, Role, TenantId};
    use crate::ledger::memory::MemoryLedgerStore;
    use crate::transfer::phase::TransferStatus;

    struct Fixture {
        store: Arc<MemoryLedgerStore>,
        wallets: Arc<WalletManager>,
        engine: TransferEngine,
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
        let engine = TransferEngine::new(
            store.clone(),
            wallets.clone(),
            FeePolicy {
                fee_user_id: 999,
                platform_category: "main".to_string(),
            },
            TransferEvents::default(),
        );
        Fixture {
            store,
            wallets,
            engine,
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

    #[tokio::test]
    async fn test_transfer_with_fee_approves_and_splits_amount() {
        let fx = fixture().await;
        funded_wallet(&fx, 1, 5_000).await;
        funded_wallet(&fx, 2, 0).await;

        let mut rx = fx.engine.events().subscribe();
        let rec = fx
            .engine
            .create_transfer(
                TransferRequest::new("t", 1, 2, 1000, eur())
                    .with_fee(29)
                    .with_external_ref("dep-1"),
            )
            .await
            .unwrap();

        assert_eq!(rec.status(), TransferStatus::Approved);
        assert_eq!(balance(&fx, 1).await, 4_000);
        assert_eq!(balance(&fx, 2).await, 971);
        assert_eq!(balance(&fx, 999).await, 29);

        let ev = rx.recv().await.unwrap();
        assert_eq!(ev.transfer_id, rec.id);
        assert_eq!(ev.fee_amount, 29);
    }

    #[tokio::test]
    async fn test_external_ref_retry_moves_no_funds() {
        let fx = fixture().await;
        funded_wallet(&fx, 1, 5_000).await;
        funded_wallet(&fx, 2, 0).await;

        let req = || TransferRequest::new("t", 1, 2, 1000, eur()).with_external_ref("once");
        let first = fx.engine.create_transfer(req()).await.unwrap();
        let second = fx.engine.create_transfer(req()).await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(balance(&fx, 1).await, 4_000);
        assert_eq!(balance(&fx, 2).await, 1_000);
    }

    #[tokio::test]
    async fn test_insufficient_funds_fails_transfer_cleanly() {
        let fx = fixture().await;
        funded_wallet(&fx, 1, 500).await;
        funded_wallet(&fx, 2, 0).await;

        let err = fx
            .engine
            .create_transfer(TransferRequest::new("t", 1, 2, 1000, eur()).with_external_ref("x"))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InsufficientFunds));

        let rec = fx
            .engine
            .transfer_by_external_ref("t", "x")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(rec.status(), TransferStatus::Failed);
        assert!(rec.error.is_some());
        assert_eq!(balance(&fx, 1).await, 500);
        assert_eq!(balance(&fx, 2).await, 0);
    }

    #[tokio::test]
    async fn test_validation_rejects_bad_requests() {
        let fx = fixture().await;
        let engine = &fx.engine;

        let err = engine
            .create_transfer(TransferRequest::new("t", 1, 2, 0, eur()))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));

        let err = engine
            .create_transfer(TransferRequest::new("t", 1, 2, 100, eur()).with_fee(100))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidFee));

        let err = engine
            .create_transfer(TransferRequest::new("t", 1, 1, 100, eur()))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::SameWallet));
    }

    #[tokio::test]
    async fn test_requires_approval_holds_funds_until_approved() {
        let fx = fixture().await;
        funded_wallet(&fx, 1, 2_000).await;
        funded_wallet(&fx, 2, 0).await;

        let mut req = TransferRequest::new("t", 1, 2, 1000, eur());
        req.requires_approval = true;
        let rec = fx.engine.create_transfer(req).await.unwrap();
        assert_eq!(rec.status(), TransferStatus::Pending);
        assert!(rec.heartbeat_at.is_none());
        assert_eq!(balance(&fx, 1).await, 2_000);

        let approved = fx.engine.approve_transfer(rec.id).await.unwrap();
        assert_eq!(approved.status(), TransferStatus::Approved);
        assert_eq!(balance(&fx, 1).await, 1_000);
        assert_eq!(balance(&fx, 2).await, 1_000);

        // Approving again is a no-op.
        let again = fx.engine.approve_transfer(rec.id).await.unwrap();
        assert_eq!(again.status(), TransferStatus::Approved);
        assert_eq!(balance(&fx, 2).await, 1_000);
    }

    #[tokio::test]
    async fn test_cancel_pending_transfer() {
        let fx = fixture().await;
        funded_wallet(&fx, 1, 2_000).await;
        funded_wallet(&fx, 2, 0).await;

        let mut req = TransferRequest::new("t", 1, 2, 1000, eur());
        req.requires_approval = true;
        let rec = fx.engine.create_transfer(req).await.unwrap();

        let canceled = fx.engine.cancel_transfer(&system(), rec.id).await.unwrap();
        assert_eq!(canceled.status(), TransferStatus::Canceled);
        // Idempotent.
        let again = fx.engine.cancel_transfer(&system(), rec.id).await.unwrap();
        assert_eq!(again.status(), TransferStatus::Canceled);

        // Canceled transfers cannot be approved into moving funds.
        let after = fx.engine.approve_transfer(rec.id).await.unwrap();
        assert_eq!(after.status(), TransferStatus::Canceled);
        assert_eq!(balance(&fx, 1).await, 2_000);
    }

    #[tokio::test]
    async fn test_cancel_refuses_terminal_transfer() {
        let fx = fixture().await;
        funded_wallet(&fx, 1, 2_000).await;
        funded_wallet(&fx, 2, 0).await;

        let rec = fx
            .engine
            .create_transfer(TransferRequest::new("t", 1, 2, 1000, eur()))
            .await
            .unwrap();
        assert_eq!(rec.status(), TransferStatus::Approved);

        let err = fx
            .engine
            .cancel_transfer(&system(), rec.id)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NotCancelable));
    }

    #[tokio::test]
    async fn test_auto_create_destination() {
        let fx = fixture().await;
        funded_wallet(&fx, 1, 2_000).await;

        let mut req = TransferRequest::new("t", 1, 5, 500, eur());
        req.auto_create_destination = true;
        let rec = fx.engine.create_transfer(req).await.unwrap();
        assert_eq!(rec.status(), TransferStatus::Approved);
        assert_eq!(balance(&fx, 5).await, 500);

        // Without the policy the missing wallet is an error.
        let err = fx
            .engine
            .create_transfer(TransferRequest::new("t", 1, 6, 500, eur()))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::WalletNotFound));
    }

    #[tokio::test]
    async fn test_bonus_to_real_transfer() {
        let fx = fixture().await;
        let w = fx
            .wallets
            .create_wallet(&system(), key(1), false)
            .await
            .unwrap();
        fx.wallets
            .apply_funding(&system(), w.id, BalanceKind::Bonus, 800, "promo", None)
            .await
            .unwrap();
        funded_wallet(&fx, 2, 0).await;

        let rec = fx
            .engine
            .create_transfer(
                TransferRequest::new("t", 1, 2, 300, eur())
                    .with_kinds(BalanceKind::Bonus, BalanceKind::Real),
            )
            .await
            .unwrap();
        assert_eq!(rec.status(), TransferStatus::Approved);

        let src = fx.wallets.resolve(&key(1)).await.unwrap();
        assert_eq!(src.bonus_balance, 500);
        assert_eq!(src.balance, 0);
        assert_eq!(balance(&fx, 2).await, 300);
    }

    #[tokio::test]
    async fn test_journal_carries_both_legs() {
        let fx = fixture().await;
        funded_wallet(&fx, 1, 2_000).await;
        funded_wallet(&fx, 2, 0).await;

        let rec = fx
            .engine
            .create_transfer(TransferRequest::new("t", 1, 2, 700, eur()))
            .await
            .unwrap();

        let ref_id = rec.id.to_string();
        let debit = fx
            .store
            .leg_entry(RefType::Transfer, &ref_id, Leg::Debit)
            .await
            .unwrap()
            .unwrap();
        let credit = fx
            .store
            .leg_entry(RefType::Transfer, &ref_id, Leg::Credit)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(debit.amount, -700);
        assert_eq!(debit.entry_type, EntryType::TransferOut);
        assert_eq!(credit.amount, 700);
        assert_eq!(credit.entry_type, EntryType::TransferIn);
    }
}
