//! Wallet manager: identity, creation policy, and direct funding.
//!
//! Owns no balance state. Every mutation is delegated to the ledger store's
//! atomic primitive; the manager enforces who may create what and resolves
//! composite keys to wallets.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::info;

use crate::core_types::{Amount, BalanceKind, Caller, Currency, Role, UserId, WalletId};
use crate::error::EngineError;
use crate::ledger::journal::{EntryCause, EntryType, Posting, RefType};
use crate::ledger::{LedgerStore, Page, PageRequest, WalletFilter};

use super::types::{Wallet, WalletKey, WalletStatus};

pub struct WalletManager {
    store: Arc<dyn LedgerStore>,
}

impl WalletManager {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self { store }
    }

    /// Create a wallet for a composite key. Only the `system` role may set
    /// `allow_negative` (treasury and provider float wallets).
    pub async fn create_wallet(
        &self,
        caller: &Caller,
        key: WalletKey,
        allow_negative: bool,
    ) -> Result<Wallet, EngineError> {
        if allow_negative && caller.role != Role::System {
            return Err(EngineError::Unauthorized);
        }
        if key.tenant_id != caller.tenant_id {
            return Err(EngineError::Unauthorized);
        }
        if key.category.is_empty() {
            return Err(EngineError::Validation("category must not be empty".into()));
        }

        let wallet = Wallet::new(key, allow_negative);
        self.store.insert_wallet(&wallet).await?;
        info!(
            wallet_id = %wallet.id,
            user_id = wallet.user_id,
            tenant = %wallet.tenant_id,
            currency = %wallet.currency,
            category = %wallet.category,
            allow_negative,
            "wallet created"
        );
        Ok(wallet)
    }

    pub async fn wallet(&self, id: WalletId) -> Result<Wallet, EngineError> {
        self.store
            .wallet(id)
            .await?
            .ok_or(EngineError::WalletNotFound)
    }

    /// Resolve a composite key to its wallet.
    pub async fn resolve(&self, key: &WalletKey) -> Result<Wallet, EngineError> {
        self.store
            .wallet_by_key(key)
            .await?
            .ok_or(EngineError::WalletNotFound)
    }

    /// Resolve a key, creating a fresh standard wallet on first reference.
    /// Lazily created wallets never allow negative balances.
    pub async fn get_or_create(&self, key: &WalletKey) -> Result<Wallet, EngineError> {
        if let Some(wallet) = self.store.wallet_by_key(key).await? {
            return Ok(wallet);
        }
        let wallet = Wallet::new(key.clone(), false);
        match self.store.insert_wallet(&wallet).await {
            Ok(()) => {
                info!(wallet_id = %wallet.id, user_id = wallet.user_id, "wallet auto-created");
                Ok(wallet)
            }
            // Lost the creation race; the winner's wallet is the one.
            Err(EngineError::DuplicateWallet) => self.resolve(key).await,
            Err(e) => Err(e),
        }
    }

    pub async fn list(
        &self,
        filter: &WalletFilter,
        page: PageRequest,
    ) -> Result<Page<Wallet>, EngineError> {
        self.store.list_wallets(filter, page).await
    }

    /// Batch balance snapshot for many users of one tenant/currency/category.
    pub async fn bulk_balances(
        &self,
        tenant_id: &str,
        user_ids: &[UserId],
        currency: &Currency,
        category: &str,
    ) -> Result<HashMap<UserId, Amount>, EngineError> {
        if user_ids.is_empty() {
            return Ok(HashMap::new());
        }
        if user_ids.len() > 1000 {
            return Err(EngineError::Validation(
                "bulk balance query limited to 1000 users".into(),
            ));
        }
        self.store
            .bulk_balances(tenant_id, user_ids, currency, category)
            .await
    }

    pub async fn suspend(&self, caller: &Caller, id: WalletId) -> Result<(), EngineError> {
        if caller.role != Role::System {
            return Err(EngineError::Unauthorized);
        }
        self.store.set_wallet_status(id, WalletStatus::Suspended).await?;
        info!(wallet_id = %id, "wallet suspended");
        Ok(())
    }

    /// Direct funding mutation (operator adjustment). `system` role only;
    /// bypasses the transfer engine but still journals through the atomic
    /// primitive.
    pub async fn apply_funding(
        &self,
        caller: &Caller,
        wallet_id: WalletId,
        kind: BalanceKind,
        delta: Amount,
        reference: impl Into<String>,
        description: Option<String>,
    ) -> Result<Posting, EngineError> {
        if caller.role != Role::System {
            return Err(EngineError::Unauthorized);
        }
        if delta == 0 {
            return Err(EngineError::Validation("delta must be non-zero".into()));
        }
        let posting = self
            .store
            .apply_balance_delta(
                wallet_id,
                kind,
                delta,
                EntryCause {
                    entry_type: EntryType::Adjustment,
                    ref_type: RefType::Manual,
                    ref_id: reference.into(),
                    leg: None,
                    description,
                },
            )
            .await?;
        info!(
            wallet_id = %wallet_id,
            kind = %kind,
            delta,
            new_balance = posting.new_balance,
            "funding adjustment applied"
        );
        Ok(posting)
    }
}
