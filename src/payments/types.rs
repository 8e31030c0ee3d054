//! Deposit and withdrawal records.
//!
//! Thin user-facing intents that resolve into exactly one transfer between a
//! provider/payout wallet and the user's wallet.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::core_types::{
    now_millis, Amount, Currency, DepositId, TenantId, TransferId, UserId, WithdrawalId,
};

/// Lifecycle of a deposit or withdrawal intent. Completion requires the
/// underlying transfer to reach `approved`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Processing => "processing",
            PaymentStatus::Completed => "completed",
            PaymentStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(PaymentStatus::Pending),
            "processing" => Some(PaymentStatus::Processing),
            "completed" => Some(PaymentStatus::Completed),
            "failed" => Some(PaymentStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, PaymentStatus::Completed | PaymentStatus::Failed)
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DepositRecord {
    pub id: DepositId,
    pub tenant_id: TenantId,
    pub user_id: UserId,
    /// Provider/gateway account funding this deposit.
    pub from_user_id: UserId,
    pub amount: Amount,
    pub fee_amount: Amount,
    pub net_amount: Amount,
    pub currency: Currency,
    pub method: String,
    pub transfer_id: Option<TransferId>,
    pub status: PaymentStatus,
    pub created_at: i64,
    pub updated_at: i64,
}

impl DepositRecord {
    pub fn new(
        tenant_id: impl Into<TenantId>,
        user_id: UserId,
        from_user_id: UserId,
        amount: Amount,
        fee_amount: Amount,
        currency: Currency,
        method: impl Into<String>,
    ) -> Self {
        let now = now_millis();
        Self {
            id: DepositId::new(),
            tenant_id: tenant_id.into(),
            user_id,
            from_user_id,
            amount,
            fee_amount,
            net_amount: amount - fee_amount,
            currency,
            method: method.into(),
            transfer_id: None,
            status: PaymentStatus::Pending,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WithdrawalRecord {
    pub id: WithdrawalId,
    pub tenant_id: TenantId,
    pub user_id: UserId,
    /// Payout account receiving the withdrawn funds.
    pub to_user_id: UserId,
    pub amount: Amount,
    pub fee_amount: Amount,
    pub net_amount: Amount,
    pub currency: Currency,
    pub method: String,
    pub bank_account: Option<String>,
    pub transfer_id: Option<TransferId>,
    pub status: PaymentStatus,
    pub created_at: i64,
    pub updated_at: i64,
}

impl WithdrawalRecord {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        tenant_id: impl Into<TenantId>,
        user_id: UserId,
        to_user_id: UserId,
        amount: Amount,
        fee_amount: Amount,
        currency: Currency,
        method: impl Into<String>,
        bank_account: Option<String>,
    ) -> Self {
        let now = now_millis();
        Self {
            id: WithdrawalId::new(),
            tenant_id: tenant_id.into(),
            user_id,
            to_user_id,
            amount,
            fee_amount,
            net_amount: amount - fee_amount,
            currency,
            method: method.into(),
            bank_account,
            transfer_id: None,
            status: PaymentStatus::Pending,
            created_at: now,
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payment_status_roundtrip() {
        for s in [
            PaymentStatus::Pending,
            PaymentStatus::Processing,
            PaymentStatus::Completed,
            PaymentStatus::Failed,
        ] {
            assert_eq!(PaymentStatus::parse(s.as_str()), Some(s));
        }
        assert!(PaymentStatus::Completed.is_terminal());
        assert!(!PaymentStatus::Processing.is_terminal());
    }

    #[test]
    fn test_deposit_net_amount() {
        let dep = DepositRecord::new(
            "t",
            7,
            1,
            10_000,
            250,
            Currency::parse("EUR").unwrap(),
            "card",
        );
        assert_eq!(dep.net_amount, 9_750);
        assert_eq!(dep.status, PaymentStatus::Pending);
    }
}
