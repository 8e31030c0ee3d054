//! Transfer record and request types.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::phase::{TransferPhase, TransferStatus};
use crate::core_types::{now_millis, Amount, BalanceKind, Currency, TenantId, TransferId, UserId};

/// Request to move value between two users' wallets.
#[derive(Debug, Clone)]
pub struct TransferRequest {
    pub tenant_id: TenantId,
    pub from_user_id: UserId,
    pub to_user_id: UserId,
    pub amount: Amount,
    pub currency: Currency,
    pub from_category: String,
    pub to_category: String,
    pub from_kind: BalanceKind,
    pub to_kind: BalanceKind,
    pub fee_amount: Amount,
    /// Caller-supplied idempotency key, unique per tenant.
    pub external_ref: Option<String>,
    pub method: Option<String>,
    pub meta: Option<serde_json::Value>,
    /// When true the transfer is recorded `pending` and funds move only on
    /// an explicit `approve_transfer` (manual review workflows).
    pub requires_approval: bool,
    /// Create the destination wallet on first reference.
    pub auto_create_destination: bool,
}

impl TransferRequest {
    pub fn new(
        tenant_id: impl Into<TenantId>,
        from_user_id: UserId,
        to_user_id: UserId,
        amount: Amount,
        currency: Currency,
    ) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            from_user_id,
            to_user_id,
            amount,
            currency,
            from_category: "main".to_string(),
            to_category: "main".to_string(),
            from_kind: BalanceKind::Real,
            to_kind: BalanceKind::Real,
            fee_amount: 0,
            external_ref: None,
            method: None,
            meta: None,
            requires_approval: false,
            auto_create_destination: false,
        }
    }

    pub fn with_external_ref(mut self, external_ref: impl Into<String>) -> Self {
        self.external_ref = Some(external_ref.into());
        self
    }

    pub fn with_fee(mut self, fee_amount: Amount) -> Self {
        self.fee_amount = fee_amount;
        self
    }

    pub fn with_kinds(mut self, from: BalanceKind, to: BalanceKind) -> Self {
        self.from_kind = from;
        self.to_kind = to;
        self
    }
}

/// Persisted transfer state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferRecord {
    pub id: TransferId,
    pub tenant_id: TenantId,
    pub from_user_id: UserId,
    pub to_user_id: UserId,
    pub amount: Amount,
    pub fee_amount: Amount,
    pub currency: Currency,
    pub from_category: String,
    pub to_category: String,
    pub from_kind: BalanceKind,
    pub to_kind: BalanceKind,
    pub external_ref: Option<String>,
    pub method: Option<String>,
    pub meta: Option<serde_json::Value>,
    #[serde(with = "phase_serde")]
    pub phase: TransferPhase,
    pub error: Option<String>,
    pub retry_count: i32,
    /// Millis of the last processing heartbeat; `None` until leg execution
    /// first starts, which keeps manual-review transfers out of recovery.
    pub heartbeat_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl TransferRecord {
    pub fn new(req: &TransferRequest) -> Self {
        let now = now_millis();
        Self {
            id: TransferId::new(),
            tenant_id: req.tenant_id.clone(),
            from_user_id: req.from_user_id,
            to_user_id: req.to_user_id,
            amount: req.amount,
            fee_amount: req.fee_amount,
            currency: req.currency.clone(),
            from_category: req.from_category.clone(),
            to_category: req.to_category.clone(),
            from_kind: req.from_kind,
            to_kind: req.to_kind,
            external_ref: req.external_ref.clone(),
            method: req.method.clone(),
            meta: req.meta.clone(),
            phase: TransferPhase::Pending,
            error: None,
            retry_count: 0,
            heartbeat_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Caller-visible status derived from the phase.
    pub fn status(&self) -> TransferStatus {
        self.phase.status()
    }

    /// Amount credited to the destination (amount minus fee).
    pub fn net_amount(&self) -> Amount {
        self.amount - self.fee_amount
    }
}

impl fmt::Display for TransferRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Transfer[{}] {} -> {} {} {} fee={} phase={}",
            self.id,
            self.from_user_id,
            self.to_user_id,
            self.amount,
            self.currency,
            self.fee_amount,
            self.phase
        )
    }
}

mod phase_serde {
    use serde::{Deserialize, Deserializer, Serializer};

    use crate::transfer::phase::TransferPhase;

    pub fn serialize<S: Serializer>(phase: &TransferPhase, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_i16(phase.id())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<TransferPhase, D::Error> {
        let id = i16::deserialize(d)?;
        TransferPhase::from_id(id)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid phase id: {}", id)))
    }
}
