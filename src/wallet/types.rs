//! Wallet data types.

use serde::{Deserialize, Serialize};

use crate::core_types::{now_millis, Amount, BalanceKind, Currency, TenantId, UserId, WalletId};

/// Composite identity of a wallet. Exactly one wallet exists per key;
/// `category` ring-fences funds (e.g. "main", "sports", "bonus").
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WalletKey {
    pub user_id: UserId,
    pub tenant_id: TenantId,
    pub currency: Currency,
    pub category: String,
}

impl WalletKey {
    pub fn new(
        user_id: UserId,
        tenant_id: impl Into<TenantId>,
        currency: Currency,
        category: impl Into<String>,
    ) -> Self {
        Self {
            user_id,
            tenant_id: tenant_id.into(),
            currency,
            category: category.into(),
        }
    }
}

/// Wallet lifecycle status. Wallets are never deleted; suspension blocks
/// further balance mutations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WalletStatus {
    Active,
    Suspended,
}

impl WalletStatus {
    pub fn id(&self) -> i16 {
        match self {
            WalletStatus::Active => 1,
            WalletStatus::Suspended => 2,
        }
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            1 => Some(WalletStatus::Active),
            2 => Some(WalletStatus::Suspended),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WalletStatus::Active => "active",
            WalletStatus::Suspended => "suspended",
        }
    }
}

/// A balance container. `balance` and `bonus_balance` are tracked
/// independently; `locked_balance` is reserved-but-unspendable real funds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Wallet {
    pub id: WalletId,
    pub user_id: UserId,
    pub tenant_id: TenantId,
    pub currency: Currency,
    pub category: String,
    pub balance: Amount,
    pub bonus_balance: Amount,
    pub locked_balance: Amount,
    pub status: WalletStatus,
    /// True only for system/treasury wallets. Bonus funds may never go
    /// negative regardless of this flag.
    pub allow_negative: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Wallet {
    /// Create a fresh zero-balance wallet for a key.
    pub fn new(key: WalletKey, allow_negative: bool) -> Self {
        let now = now_millis();
        Self {
            id: WalletId::new(),
            user_id: key.user_id,
            tenant_id: key.tenant_id,
            currency: key.currency,
            category: key.category,
            balance: 0,
            bonus_balance: 0,
            locked_balance: 0,
            status: WalletStatus::Active,
            allow_negative,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn key(&self) -> WalletKey {
        WalletKey {
            user_id: self.user_id,
            tenant_id: self.tenant_id.clone(),
            currency: self.currency.clone(),
            category: self.category.clone(),
        }
    }

    pub fn balance_of(&self, kind: BalanceKind) -> Amount {
        match kind {
            BalanceKind::Real => self.balance,
            BalanceKind::Bonus => self.bonus_balance,
        }
    }

    /// Whether a resulting balance is acceptable for the given kind under
    /// this wallet's negative-balance policy.
    pub fn permits_balance(&self, kind: BalanceKind, new_balance: Amount) -> bool {
        if new_balance >= 0 {
            return true;
        }
        match kind {
            BalanceKind::Real => self.allow_negative,
            BalanceKind::Bonus => false,
        }
    }
}
