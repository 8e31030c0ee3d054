//! Withdrawal processing.
//!
//! A withdrawal moves real funds from the user's wallet into the platform
//! payout wallet; settlement to the user's bank happens outside the engine.
//! Bonus funds are never withdrawable: the debit leg always targets the real
//! balance.

use std::sync::Arc;

use tracing::{info, warn};

use crate::config::PaymentsConfig;
use crate::core_types::{Amount, Caller, Currency, UserId, WithdrawalId};
use crate::error::EngineError;
use crate::ledger::LedgerStore;
use crate::transfer::{TransferEngine, TransferRequest, TransferStatus};

use super::types::{PaymentStatus, WithdrawalRecord};

#[derive(Debug, Clone)]
pub struct WithdrawalRequest {
    pub user_id: UserId,
    pub amount: Amount,
    pub fee_amount: Amount,
    pub currency: Currency,
    pub method: String,
    pub bank_account: Option<String>,
}

pub struct WithdrawService {
    store: Arc<dyn LedgerStore>,
    engine: Arc<TransferEngine>,
    payout_user_id: UserId,
    platform_category: String,
}

impl WithdrawService {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        engine: Arc<TransferEngine>,
        payments: &PaymentsConfig,
    ) -> Self {
        Self {
            store,
            engine,
            payout_user_id: payments.payout_user_id,
            platform_category: payments.platform_category.clone(),
        }
    }

    /// Record a withdrawal and move the funds. Users may withdraw from their
    /// own wallet; operator roles may withdraw on behalf of any user.
    pub async fn create_withdrawal(
        &self,
        caller: &Caller,
        req: WithdrawalRequest,
    ) -> Result<WithdrawalRecord, EngineError> {
        if !caller.role.is_operator() && caller.user_id != req.user_id {
            return Err(EngineError::Unauthorized);
        }
        if req.amount <= 0 {
            return Err(EngineError::Validation("amount must be positive".into()));
        }
        if req.fee_amount < 0 || req.fee_amount >= req.amount {
            return Err(EngineError::InvalidFee);
        }

        let record = WithdrawalRecord::new(
            caller.tenant_id.clone(),
            req.user_id,
            self.payout_user_id,
            req.amount,
            req.fee_amount,
            req.currency.clone(),
            req.method.clone(),
            req.bank_account.clone(),
        );
        self.store.insert_withdrawal(&record).await?;
        self.store
            .update_withdrawal(record.id, PaymentStatus::Processing, None)
            .await?;

        let mut transfer_req = TransferRequest::new(
            caller.tenant_id.clone(),
            req.user_id,
            self.payout_user_id,
            req.amount,
            req.currency,
        )
        .with_fee(req.fee_amount)
        .with_external_ref(format!("wd-{}", record.id));
        transfer_req.method = Some(req.method);
        transfer_req.to_category = self.platform_category.clone();
        transfer_req.auto_create_destination = true;

        match self.engine.create_transfer(transfer_req).await {
            Ok(transfer) => {
                let status = match transfer.status() {
                    TransferStatus::Approved => PaymentStatus::Completed,
                    TransferStatus::Failed | TransferStatus::Canceled => PaymentStatus::Failed,
                    TransferStatus::Pending => PaymentStatus::Processing,
                };
                self.store
                    .update_withdrawal(record.id, status, Some(transfer.id))
                    .await?;
                info!(withdrawal_id = %record.id, transfer_id = %transfer.id, %status, "withdrawal processed");
                self.withdrawal(record.id).await
            }
            Err(e) => {
                self.store
                    .update_withdrawal(record.id, PaymentStatus::Failed, None)
                    .await?;
                warn!(withdrawal_id = %record.id, error = %e, "withdrawal failed");
                Err(e)
            }
        }
    }

    pub async fn withdrawal(&self, id: WithdrawalId) -> Result<WithdrawalRecord, EngineError> {
        let record = self
            .store
            .withdrawal(id)
            .await?
            .ok_or_else(|| EngineError::WithdrawalNotFound(id.to_string()))?;
        self.settle_from_transfer(record).await
    }

    /// Mirror of the deposit read path: a withdrawal left `processing` is
    /// settled from its transfer's terminal state once recovery got there.
    async fn settle_from_transfer(
        &self,
        record: WithdrawalRecord,
    ) -> Result<WithdrawalRecord, EngineError> {
        if record.status.is_terminal() {
            return Ok(record);
        }
        let Some(transfer_id) = record.transfer_id else {
            return Ok(record);
        };
        let Some(transfer) = self.store.transfer(transfer_id).await? else {
            return Ok(record);
        };
        let status = match transfer.status() {
            TransferStatus::Approved => PaymentStatus::Completed,
            TransferStatus::Failed | TransferStatus::Canceled => PaymentStatus::Failed,
            TransferStatus::Pending => return Ok(record),
        };
        self.store.update_withdrawal(record.id, status, None).await?;
        info!(withdrawal_id = %record.id, transfer_id = %transfer_id, %status, "withdrawal settled from transfer outcome");
        Ok(WithdrawalRecord { status, ..record })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_types::{BalanceKind, Role, TenantId};
    use crate::ledger::memory::MemoryLedgerStore;
    use crate::transfer::{FeePolicy, TransferEvents};
    use crate::wallet::{WalletKey, WalletManager};

    fn user_caller(user_id: UserId) -> Caller {
        Caller {
            user_id,
            tenant_id: TenantId::from("t"),
            role: Role::User,
        }
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

    async fn service_with_user(
        balance: i64,
        bonus: i64,
    ) -> (WithdrawService, Arc<WalletManager>, Arc<MemoryLedgerStore>) {
        let store: Arc<MemoryLedgerStore> = Arc::new(MemoryLedgerStore::new());
        let wallets = Arc::new(WalletManager::new(store.clone()));
        let engine = Arc::new(TransferEngine::new(
            store.clone(),
            wallets.clone(),
            FeePolicy::default(),
            TransferEvents::default(),
        ));
        let w = wallets
            .create_wallet(&system(), WalletKey::new(7, "t", eur(), "main"), false)
            .await
            .unwrap();
        if balance > 0 {
            wallets
                .apply_funding(&system(), w.id, BalanceKind::Real, balance, "seed", None)
                .await
                .unwrap();
        }
        if bonus > 0 {
            wallets
                .apply_funding(&system(), w.id, BalanceKind::Bonus, bonus, "promo", None)
                .await
                .unwrap();
        }
        let svc = WithdrawService::new(store.clone(), engine, &PaymentsConfig::default());
        (svc, wallets, store)
    }

    fn request(amount: Amount, fee: Amount) -> WithdrawalRequest {
        WithdrawalRequest {
            user_id: 7,
            amount,
            fee_amount: fee,
            currency: eur(),
            method: "bank".into(),
            bank_account: Some("DE89370400440532013000".into()),
        }
    }

    #[tokio::test]
    async fn test_withdrawal_debits_user_and_completes() {
        let (svc, wallets, _) = service_with_user(5_000, 0).await;
        let wd = svc
            .create_withdrawal(&user_caller(7), request(2_000, 0))
            .await
            .unwrap();
        assert_eq!(wd.status, PaymentStatus::Completed);
        assert_eq!(wd.net_amount, 2_000);

        let user = wallets
            .resolve(&WalletKey::new(7, "t", eur(), "main"))
            .await
            .unwrap();
        assert_eq!(user.balance, 3_000);
    }

    #[tokio::test]
    async fn test_withdrawal_never_touches_bonus_funds() {
        let (svc, wallets, _) = service_with_user(500, 10_000).await;
        // Real balance alone cannot cover this.
        let err = svc
            .create_withdrawal(&user_caller(7), request(2_000, 0))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InsufficientFunds));

        let user = wallets
            .resolve(&WalletKey::new(7, "t", eur(), "main"))
            .await
            .unwrap();
        assert_eq!(user.balance, 500);
        assert_eq!(user.bonus_balance, 10_000);
    }

    #[tokio::test]
    async fn test_withdrawal_for_other_user_requires_operator() {
        let (svc, _, _) = service_with_user(5_000, 0).await;
        let err = svc
            .create_withdrawal(&user_caller(8), request(1_000, 0))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Unauthorized));

        let gateway = Caller {
            user_id: 99,
            tenant_id: TenantId::from("t"),
            role: Role::PaymentGateway,
        };
        let wd = svc
            .create_withdrawal(&gateway, request(1_000, 0))
            .await
            .unwrap();
        assert_eq!(wd.status, PaymentStatus::Completed);
    }

    #[tokio::test]
    async fn test_processing_withdrawal_settles_from_transfer_outcome() {
        use crate::transfer::phase::TransferPhase;
        use crate::transfer::types::TransferRecord;

        let (svc, _, store) = service_with_user(5_000, 0).await;

        // Withdrawal left processing while its transfer was mid-flight;
        // recovery later finalized the transfer approved.
        let record = WithdrawalRecord::new("t", 7, 1, 2_000, 0, eur(), "bank", None);
        store.insert_withdrawal(&record).await.unwrap();
        let transfer = TransferRecord::new(
            &TransferRequest::new("t", 7, 1, 2_000, eur())
                .with_external_ref(format!("wd-{}", record.id)),
        );
        store.insert_transfer(&transfer).await.unwrap();
        store
            .update_withdrawal(record.id, PaymentStatus::Processing, Some(transfer.id))
            .await
            .unwrap();
        store
            .update_phase_if(transfer.id, TransferPhase::Pending, TransferPhase::Approved)
            .await
            .unwrap();

        let wd = svc.withdrawal(record.id).await.unwrap();
        assert_eq!(wd.status, PaymentStatus::Completed);
        let stored = store.withdrawal(record.id).await.unwrap().unwrap();
        assert_eq!(stored.status, PaymentStatus::Completed);
    }

    #[tokio::test]
    async fn test_failed_withdrawal_record_is_kept() {
        let (svc, _, _) = service_with_user(100, 0).await;
        let err = svc
            .create_withdrawal(&user_caller(7), request(1_000, 0))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InsufficientFunds));
    }
}
