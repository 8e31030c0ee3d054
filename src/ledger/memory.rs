//! In-memory ledger store.
//!
//! DashMap-backed implementation of [`LedgerStore`]. Per-wallet atomicity
//! comes from the shard write lock held by `get_mut` for the duration of a
//! balance mutation: two concurrent deltas on the same wallet serialize, so
//! no update is lost. Used by the test suite and by service runs without a
//! configured Postgres URL.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;

use crate::core_types::{
    now_millis, Amount, BalanceKind, Currency, DepositId, EntryId, TransferId, UserId, WalletId,
    WithdrawalId,
};
use crate::error::EngineError;
use crate::money;
use crate::payments::types::{DepositRecord, PaymentStatus, WithdrawalRecord};
use crate::transfer::phase::TransferPhase;
use crate::transfer::types::TransferRecord;
use crate::wallet::{Wallet, WalletKey, WalletStatus};

use super::journal::{EntryCause, JournalEntry, Leg, Posting, RefType};
use super::{
    EntryFilter, InsertTransfer, LedgerStore, Page, PageRequest, TransferFilter, WalletFilter,
};

/// Wallet state plus its journal, kept together so one shard lock covers
/// both during a mutation.
struct WalletSlot {
    wallet: Wallet,
    entries: Vec<JournalEntry>,
}

type LegKey = (RefType, String, Leg);

#[derive(Default)]
pub struct MemoryLedgerStore {
    wallets: DashMap<WalletId, WalletSlot>,
    wallet_keys: DashMap<WalletKey, WalletId>,
    /// Leg markers: full entry clones keyed by `(ref_type, ref_id, leg)`.
    /// Lock order is always wallets → legs; never the reverse while a
    /// wallet guard is held elsewhere.
    legs: DashMap<LegKey, JournalEntry>,
    transfers: DashMap<TransferId, TransferRecord>,
    transfer_refs: DashMap<(String, String), TransferId>,
    deposits: DashMap<DepositId, DepositRecord>,
    withdrawals: DashMap<WithdrawalId, WithdrawalRecord>,
}

impl MemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LedgerStore for MemoryLedgerStore {
    async fn insert_wallet(&self, wallet: &Wallet) -> Result<(), EngineError> {
        match self.wallet_keys.entry(wallet.key()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(EngineError::DuplicateWallet),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                self.wallets.insert(
                    wallet.id,
                    WalletSlot {
                        wallet: wallet.clone(),
                        entries: Vec::new(),
                    },
                );
                slot.insert(wallet.id);
                Ok(())
            }
        }
    }

    async fn wallet(&self, id: WalletId) -> Result<Option<Wallet>, EngineError> {
        Ok(self.wallets.get(&id).map(|s| s.wallet.clone()))
    }

    async fn wallet_by_key(&self, key: &WalletKey) -> Result<Option<Wallet>, EngineError> {
        let id = match self.wallet_keys.get(key) {
            Some(id) => *id,
            None => return Ok(None),
        };
        Ok(self.wallets.get(&id).map(|s| s.wallet.clone()))
    }

    async fn set_wallet_status(
        &self,
        id: WalletId,
        status: WalletStatus,
    ) -> Result<(), EngineError> {
        let mut slot = self.wallets.get_mut(&id).ok_or(EngineError::WalletNotFound)?;
        slot.wallet.status = status;
        slot.wallet.updated_at = now_millis();
        Ok(())
    }

    async fn list_wallets(
        &self,
        filter: &WalletFilter,
        page: PageRequest,
    ) -> Result<Page<Wallet>, EngineError> {
        let mut all: Vec<Wallet> = self
            .wallets
            .iter()
            .map(|s| s.wallet.clone())
            .filter(|w| {
                w.tenant_id == filter.tenant_id
                    && filter.user_id.map_or(true, |u| w.user_id == u)
                    && filter.currency.as_ref().map_or(true, |c| &w.currency == c)
                    && filter.category.as_ref().map_or(true, |c| &w.category == c)
            })
            .collect();
        all.sort_by_key(|w| w.id);
        Ok(Page::from_full(all, page))
    }

    async fn bulk_balances(
        &self,
        tenant_id: &str,
        user_ids: &[UserId],
        currency: &Currency,
        category: &str,
    ) -> Result<HashMap<UserId, Amount>, EngineError> {
        let mut out = HashMap::with_capacity(user_ids.len());
        for &user_id in user_ids {
            let key = WalletKey::new(user_id, tenant_id, currency.clone(), category);
            if let Some(id) = self.wallet_keys.get(&key).map(|r| *r) {
                if let Some(slot) = self.wallets.get(&id) {
                    out.insert(user_id, slot.wallet.balance);
                }
            }
        }
        Ok(out)
    }

    async fn apply_balance_delta(
        &self,
        wallet_id: WalletId,
        kind: BalanceKind,
        delta: Amount,
        cause: EntryCause,
    ) -> Result<Posting, EngineError> {
        let mut slot = self
            .wallets
            .get_mut(&wallet_id)
            .ok_or(EngineError::WalletNotFound)?;

        // Replay check inside the wallet lock so racing duplicates serialize.
        if let Some(leg) = cause.leg {
            let key = (cause.ref_type, cause.ref_id.clone(), leg);
            if let Some(existing) = self.legs.get(&key) {
                return Ok(Posting {
                    entry_id: existing.id,
                    new_balance: existing.balance,
                    replayed: true,
                });
            }
        }

        if slot.wallet.status == WalletStatus::Suspended {
            return Err(EngineError::WalletSuspended);
        }

        let current = slot.wallet.balance_of(kind);
        let new_balance = money::checked_add(current, delta)?;
        if !slot.wallet.permits_balance(kind, new_balance) {
            return Err(EngineError::InsufficientFunds);
        }

        match kind {
            BalanceKind::Real => slot.wallet.balance = new_balance,
            BalanceKind::Bonus => slot.wallet.bonus_balance = new_balance,
        }
        slot.wallet.updated_at = now_millis();

        let entry = JournalEntry {
            id: EntryId::new(),
            wallet_id,
            user_id: slot.wallet.user_id,
            tenant_id: slot.wallet.tenant_id.clone(),
            entry_type: cause.entry_type,
            balance_kind: kind,
            amount: delta,
            balance: new_balance,
            currency: slot.wallet.currency.clone(),
            ref_type: cause.ref_type,
            ref_id: cause.ref_id.clone(),
            leg: cause.leg,
            description: cause.description,
            created_at: now_millis(),
        };

        if let Some(leg) = cause.leg {
            self.legs
                .insert((cause.ref_type, cause.ref_id, leg), entry.clone());
        }
        let posting = Posting {
            entry_id: entry.id,
            new_balance,
            replayed: false,
        };
        slot.entries.push(entry);
        Ok(posting)
    }

    async fn entries_for_wallet(
        &self,
        wallet_id: WalletId,
    ) -> Result<Vec<JournalEntry>, EngineError> {
        Ok(self
            .wallets
            .get(&wallet_id)
            .map(|s| s.entries.clone())
            .unwrap_or_default())
    }

    async fn list_entries(
        &self,
        filter: &EntryFilter,
        page: PageRequest,
    ) -> Result<Page<JournalEntry>, EngineError> {
        let mut all: Vec<JournalEntry> = self
            .wallets
            .iter()
            .flat_map(|s| s.entries.clone())
            .filter(|e| {
                e.tenant_id == filter.tenant_id
                    && filter.wallet_id.map_or(true, |w| e.wallet_id == w)
                    && filter.user_id.map_or(true, |u| e.user_id == u)
            })
            .collect();
        all.sort_by_key(|e| (e.created_at, e.id));
        Ok(Page::from_full(all, page))
    }

    async fn leg_entry(
        &self,
        ref_type: RefType,
        ref_id: &str,
        leg: Leg,
    ) -> Result<Option<JournalEntry>, EngineError> {
        Ok(self
            .legs
            .get(&(ref_type, ref_id.to_string(), leg))
            .map(|e| e.clone()))
    }

    async fn insert_transfer(
        &self,
        record: &TransferRecord,
    ) -> Result<InsertTransfer, EngineError> {
        if let Some(ext) = &record.external_ref {
            let key = (record.tenant_id.clone(), ext.clone());
            match self.transfer_refs.entry(key) {
                dashmap::mapref::entry::Entry::Occupied(existing) => {
                    let id = *existing.get();
                    let stored = self
                        .transfers
                        .get(&id)
                        .map(|r| r.clone())
                        .ok_or_else(|| {
                            EngineError::Internal(format!(
                                "transfer ref index points at missing record {}",
                                id
                            ))
                        })?;
                    return Ok(InsertTransfer::Duplicate(stored));
                }
                dashmap::mapref::entry::Entry::Vacant(slot) => {
                    self.transfers.insert(record.id, record.clone());
                    slot.insert(record.id);
                    return Ok(InsertTransfer::Created);
                }
            }
        }
        self.transfers.insert(record.id, record.clone());
        Ok(InsertTransfer::Created)
    }

    async fn transfer(&self, id: TransferId) -> Result<Option<TransferRecord>, EngineError> {
        Ok(self.transfers.get(&id).map(|r| r.clone()))
    }

    async fn transfer_by_external_ref(
        &self,
        tenant_id: &str,
        external_ref: &str,
    ) -> Result<Option<TransferRecord>, EngineError> {
        let key = (tenant_id.to_string(), external_ref.to_string());
        let id = match self.transfer_refs.get(&key) {
            Some(id) => *id,
            None => return Ok(None),
        };
        Ok(self.transfers.get(&id).map(|r| r.clone()))
    }

    async fn update_phase_if(
        &self,
        id: TransferId,
        expected: TransferPhase,
        new: TransferPhase,
    ) -> Result<bool, EngineError> {
        let mut rec = match self.transfers.get_mut(&id) {
            Some(r) => r,
            None => return Ok(false),
        };
        if rec.phase != expected {
            return Ok(false);
        }
        rec.phase = new;
        rec.updated_at = now_millis();
        Ok(true)
    }

    async fn update_phase_with_error(
        &self,
        id: TransferId,
        expected: TransferPhase,
        new: TransferPhase,
        error: &str,
    ) -> Result<bool, EngineError> {
        let mut rec = match self.transfers.get_mut(&id) {
            Some(r) => r,
            None => return Ok(false),
        };
        if rec.phase != expected {
            return Ok(false);
        }
        rec.phase = new;
        rec.error = Some(error.to_string());
        rec.updated_at = now_millis();
        Ok(true)
    }

    async fn touch_heartbeat(&self, id: TransferId) -> Result<(), EngineError> {
        if let Some(mut rec) = self.transfers.get_mut(&id) {
            rec.heartbeat_at = Some(now_millis());
            rec.updated_at = now_millis();
        }
        Ok(())
    }

    async fn increment_retry(&self, id: TransferId) -> Result<(), EngineError> {
        if let Some(mut rec) = self.transfers.get_mut(&id) {
            rec.retry_count += 1;
            rec.updated_at = now_millis();
        }
        Ok(())
    }

    async fn find_stuck(
        &self,
        older_than: Duration,
        limit: usize,
    ) -> Result<Vec<TransferRecord>, EngineError> {
        let cutoff = now_millis() - older_than.as_millis() as i64;
        let mut stuck: Vec<TransferRecord> = self
            .transfers
            .iter()
            .map(|r| r.clone())
            .filter(|r| {
                !r.phase.is_terminal() && r.heartbeat_at.map_or(false, |hb| hb < cutoff)
            })
            .collect();
        stuck.sort_by_key(|r| r.heartbeat_at);
        stuck.truncate(limit);
        Ok(stuck)
    }

    async fn list_transfers(
        &self,
        filter: &TransferFilter,
        page: PageRequest,
    ) -> Result<Page<TransferRecord>, EngineError> {
        let mut all: Vec<TransferRecord> = self
            .transfers
            .iter()
            .map(|r| r.clone())
            .filter(|t| {
                t.tenant_id == filter.tenant_id
                    && filter
                        .user_id
                        .map_or(true, |u| t.from_user_id == u || t.to_user_id == u)
                    && filter.status.map_or(true, |s| t.status() == s)
                    && filter.currency.as_ref().map_or(true, |c| &t.currency == c)
            })
            .collect();
        all.sort_by_key(|t| t.id);
        Ok(Page::from_full(all, page))
    }

    async fn insert_deposit(&self, record: &DepositRecord) -> Result<(), EngineError> {
        self.deposits.insert(record.id, record.clone());
        Ok(())
    }

    async fn deposit(&self, id: DepositId) -> Result<Option<DepositRecord>, EngineError> {
        Ok(self.deposits.get(&id).map(|r| r.clone()))
    }

    async fn update_deposit(
        &self,
        id: DepositId,
        status: PaymentStatus,
        transfer_id: Option<TransferId>,
    ) -> Result<(), EngineError> {
        let mut rec = self
            .deposits
            .get_mut(&id)
            .ok_or_else(|| EngineError::DepositNotFound(id.to_string()))?;
        rec.status = status;
        if transfer_id.is_some() {
            rec.transfer_id = transfer_id;
        }
        rec.updated_at = now_millis();
        Ok(())
    }

    async fn insert_withdrawal(&self, record: &WithdrawalRecord) -> Result<(), EngineError> {
        self.withdrawals.insert(record.id, record.clone());
        Ok(())
    }

    async fn withdrawal(
        &self,
        id: WithdrawalId,
    ) -> Result<Option<WithdrawalRecord>, EngineError> {
        Ok(self.withdrawals.get(&id).map(|r| r.clone()))
    }

    async fn update_withdrawal(
        &self,
        id: WithdrawalId,
        status: PaymentStatus,
        transfer_id: Option<TransferId>,
    ) -> Result<(), EngineError> {
        let mut rec = self
            .withdrawals
            .get_mut(&id)
            .ok_or_else(|| EngineError::WithdrawalNotFound(id.to_string()))?;
        rec.status = status;
        if transfer_id.is_some() {
            rec.transfer_id = transfer_id;
        }
        rec.updated_at = now_millis();
        Ok(())
    }
}
