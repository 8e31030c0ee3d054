//! Deposit processing.
//!
//! A deposit moves funds from the calling provider's float wallet into the
//! user's wallet. The float wallet is a system-created `allow_negative`
//! wallet, so providers can front deposits before settlement. The deposit
//! record completes only once the underlying transfer is approved.

use std::sync::Arc;

use tracing::{info, warn};

use crate::core_types::{Amount, Caller, Currency, DepositId, UserId};
use crate::error::EngineError;
use crate::ledger::LedgerStore;
use crate::transfer::{TransferEngine, TransferRequest, TransferStatus};

use super::types::{DepositRecord, PaymentStatus};

#[derive(Debug, Clone)]
pub struct DepositRequest {
    pub user_id: UserId,
    /// Provider float wallet funding the deposit. Defaults to the calling
    /// operator's own user id; gateways acting for a named provider set it.
    pub from_user_id: Option<UserId>,
    pub amount: Amount,
    pub fee_amount: Amount,
    pub currency: Currency,
    pub method: String,
}

pub struct DepositService {
    store: Arc<dyn LedgerStore>,
    engine: Arc<TransferEngine>,
}

impl DepositService {
    pub fn new(store: Arc<dyn LedgerStore>, engine: Arc<TransferEngine>) -> Self {
        Self { store, engine }
    }

    /// Record a deposit and move the funds. The caller must be an operator
    /// role; the provider float wallet is the caller's own unless the request
    /// names another provider.
    pub async fn create_deposit(
        &self,
        caller: &Caller,
        req: DepositRequest,
    ) -> Result<DepositRecord, EngineError> {
        if !caller.role.is_operator() {
            return Err(EngineError::Unauthorized);
        }
        if req.amount <= 0 {
            return Err(EngineError::Validation("amount must be positive".into()));
        }
        if req.fee_amount < 0 || req.fee_amount >= req.amount {
            return Err(EngineError::InvalidFee);
        }

        let provider_user_id = req.from_user_id.unwrap_or(caller.user_id);
        let record = DepositRecord::new(
            caller.tenant_id.clone(),
            req.user_id,
            provider_user_id,
            req.amount,
            req.fee_amount,
            req.currency.clone(),
            req.method.clone(),
        );
        self.store.insert_deposit(&record).await?;
        self.store
            .update_deposit(record.id, PaymentStatus::Processing, None)
            .await?;

        let mut transfer_req = TransferRequest::new(
            caller.tenant_id.clone(),
            provider_user_id,
            req.user_id,
            req.amount,
            req.currency,
        )
        .with_fee(req.fee_amount)
        .with_external_ref(format!("dep-{}", record.id));
        transfer_req.method = Some(req.method);
        transfer_req.auto_create_destination = true;

        match self.engine.create_transfer(transfer_req).await {
            Ok(transfer) => {
                let status = match transfer.status() {
                    TransferStatus::Approved => PaymentStatus::Completed,
                    TransferStatus::Failed | TransferStatus::Canceled => PaymentStatus::Failed,
                    // Mid-flight: recovery owns the transfer, the deposit
                    // stays processing until it settles.
                    TransferStatus::Pending => PaymentStatus::Processing,
                };
                self.store
                    .update_deposit(record.id, status, Some(transfer.id))
                    .await?;
                info!(deposit_id = %record.id, transfer_id = %transfer.id, %status, "deposit processed");
                self.deposit(record.id).await
            }
            Err(e) => {
                self.store
                    .update_deposit(record.id, PaymentStatus::Failed, None)
                    .await?;
                warn!(deposit_id = %record.id, error = %e, "deposit failed");
                Err(e)
            }
        }
    }

    pub async fn deposit(&self, id: DepositId) -> Result<DepositRecord, EngineError> {
        let record = self
            .store
            .deposit(id)
            .await?
            .ok_or_else(|| EngineError::DepositNotFound(id.to_string()))?;
        self.settle_from_transfer(record).await
    }

    /// A deposit left `processing` because its transfer went mid-flight is
    /// settled later by recovery. Reads re-derive the status from the
    /// transfer's terminal state so the record cannot stay stale.
    async fn settle_from_transfer(
        &self,
        record: DepositRecord,
    ) -> Result<DepositRecord, EngineError> {
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
        self.store.update_deposit(record.id, status, None).await?;
        info!(deposit_id = %record.id, transfer_id = %transfer_id, %status, "deposit settled from transfer outcome");
        Ok(DepositRecord { status, ..record })
    }
}
