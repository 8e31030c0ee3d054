//! Ledger Store: the single source of truth for balances.
//!
//! The store is the only component permitted to mutate wallet state. Its
//! core primitive, [`LedgerStore::apply_balance_delta`], commits the balance
//! update, the journal entry, and the leg marker as one atomic unit, and is
//! idempotent per `(ref_id, leg)`. Everything above it (wallet manager,
//! transfer engine, recovery) reads then delegates; no component holds an
//! in-process lock across a store call.

pub mod journal;
pub mod memory;
pub mod postgres;

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;

use crate::core_types::{Amount, BalanceKind, Currency, DepositId, TenantId, TransferId, UserId, WalletId, WithdrawalId};
use crate::error::EngineError;
use crate::payments::types::{DepositRecord, PaymentStatus, WithdrawalRecord};
use crate::transfer::phase::{TransferPhase, TransferStatus};
use crate::transfer::types::TransferRecord;
use crate::wallet::{Wallet, WalletKey, WalletStatus};

use journal::{EntryCause, JournalEntry, Leg, Posting, RefType};

/// Page request for listing operations.
#[derive(Debug, Clone, Copy)]
pub struct PageRequest {
    pub limit: usize,
    pub offset: usize,
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            limit: 50,
            offset: 0,
        }
    }
}

impl PageRequest {
    /// Clamp the limit to a sane ceiling; listing endpoints are not bulk
    /// export channels.
    pub fn clamped(self) -> Self {
        Self {
            limit: self.limit.clamp(1, 500),
            offset: self.offset,
        }
    }
}

/// One page of results plus the counters reporting callers need.
#[derive(Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total_count: usize,
    pub has_next_page: bool,
}

impl<T> Page<T> {
    pub fn from_full(mut all: Vec<T>, page: PageRequest) -> Self {
        let page = page.clamped();
        let total_count = all.len();
        let end = (page.offset + page.limit).min(total_count);
        let items: Vec<T> = if page.offset >= total_count {
            Vec::new()
        } else {
            all.drain(page.offset..end).collect()
        };
        Self {
            items,
            total_count,
            has_next_page: end < total_count,
        }
    }
}

/// Wallet listing filter. `tenant_id` is always required.
#[derive(Debug, Clone, Default)]
pub struct WalletFilter {
    pub tenant_id: TenantId,
    pub user_id: Option<UserId>,
    pub currency: Option<Currency>,
    pub category: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct TransferFilter {
    pub tenant_id: TenantId,
    pub user_id: Option<UserId>,
    pub status: Option<TransferStatus>,
    pub currency: Option<Currency>,
}

#[derive(Debug, Clone, Default)]
pub struct EntryFilter {
    pub tenant_id: TenantId,
    pub wallet_id: Option<WalletId>,
    pub user_id: Option<UserId>,
}

/// Outcome of inserting a transfer with an external ref.
#[derive(Debug, Clone)]
pub enum InsertTransfer {
    Created,
    /// A transfer with the same `(tenant, external_ref)` already exists; the
    /// stored record is returned so retries are answered without mutation.
    Duplicate(TransferRecord),
}

/// Durable keyed storage for wallets, transfers, payments, and the
/// append-only journal.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    // === Wallets ===

    /// Insert a new wallet. Fails with `DuplicateWallet` when the composite
    /// key already exists.
    async fn insert_wallet(&self, wallet: &Wallet) -> Result<(), EngineError>;

    async fn wallet(&self, id: WalletId) -> Result<Option<Wallet>, EngineError>;

    async fn wallet_by_key(&self, key: &WalletKey) -> Result<Option<Wallet>, EngineError>;

    async fn set_wallet_status(
        &self,
        id: WalletId,
        status: WalletStatus,
    ) -> Result<(), EngineError>;

    async fn list_wallets(
        &self,
        filter: &WalletFilter,
        page: PageRequest,
    ) -> Result<Page<Wallet>, EngineError>;

    /// Snapshot batch balance read. Takes no lock that blocks concurrent
    /// transfers; missing wallets are simply absent from the map.
    async fn bulk_balances(
        &self,
        tenant_id: &str,
        user_ids: &[UserId],
        currency: &Currency,
        category: &str,
    ) -> Result<HashMap<UserId, Amount>, EngineError>;

    // === Atomic balance primitive ===

    /// Atomically apply a signed delta to one balance of one wallet and
    /// append the journal entry (with running snapshot) in the same unit.
    ///
    /// Rejects with `InsufficientFunds` when the new balance would violate
    /// the wallet's negative-balance policy, with no partial state. When
    /// `cause.leg` is set and `(ref_id, leg)` was already posted, returns
    /// the recorded posting with `replayed = true` instead of mutating.
    async fn apply_balance_delta(
        &self,
        wallet_id: WalletId,
        kind: BalanceKind,
        delta: Amount,
        cause: EntryCause,
    ) -> Result<Posting, EngineError>;

    // === Journal ===

    /// All entries for a wallet in creation order. Used by reconciliation.
    async fn entries_for_wallet(
        &self,
        wallet_id: WalletId,
    ) -> Result<Vec<JournalEntry>, EngineError>;

    async fn list_entries(
        &self,
        filter: &EntryFilter,
        page: PageRequest,
    ) -> Result<Page<JournalEntry>, EngineError>;

    /// Leg-completion marker: the journal entry posted for `(ref_id, leg)`,
    /// if any.
    async fn leg_entry(
        &self,
        ref_type: RefType,
        ref_id: &str,
        leg: Leg,
    ) -> Result<Option<JournalEntry>, EngineError>;

    // === Transfers ===

    /// Insert a transfer. When `external_ref` collides within the tenant the
    /// existing record is returned instead (idempotent create).
    async fn insert_transfer(&self, record: &TransferRecord)
        -> Result<InsertTransfer, EngineError>;

    async fn transfer(&self, id: TransferId) -> Result<Option<TransferRecord>, EngineError>;

    async fn transfer_by_external_ref(
        &self,
        tenant_id: &str,
        external_ref: &str,
    ) -> Result<Option<TransferRecord>, EngineError>;

    /// CAS phase update: succeeds only when the stored phase equals
    /// `expected`. Returns false when another worker got there first.
    async fn update_phase_if(
        &self,
        id: TransferId,
        expected: TransferPhase,
        new: TransferPhase,
    ) -> Result<bool, EngineError>;

    /// CAS phase update recording an error message.
    async fn update_phase_with_error(
        &self,
        id: TransferId,
        expected: TransferPhase,
        new: TransferPhase,
        error: &str,
    ) -> Result<bool, EngineError>;

    /// Refresh the processing heartbeat.
    async fn touch_heartbeat(&self, id: TransferId) -> Result<(), EngineError>;

    async fn increment_retry(&self, id: TransferId) -> Result<(), EngineError>;

    /// Transfers in a non-terminal phase whose heartbeat is older than the
    /// threshold. Transfers that never started leg execution (no heartbeat)
    /// are not returned.
    async fn find_stuck(
        &self,
        older_than: Duration,
        limit: usize,
    ) -> Result<Vec<TransferRecord>, EngineError>;

    async fn list_transfers(
        &self,
        filter: &TransferFilter,
        page: PageRequest,
    ) -> Result<Page<TransferRecord>, EngineError>;

    // === Deposits / Withdrawals ===

    async fn insert_deposit(&self, record: &DepositRecord) -> Result<(), EngineError>;

    async fn deposit(&self, id: DepositId) -> Result<Option<DepositRecord>, EngineError>;

    async fn update_deposit(
        &self,
        id: DepositId,
        status: PaymentStatus,
        transfer_id: Option<TransferId>,
    ) -> Result<(), EngineError>;

    async fn insert_withdrawal(&self, record: &WithdrawalRecord) -> Result<(), EngineError>;

    async fn withdrawal(&self, id: WithdrawalId)
        -> Result<Option<WithdrawalRecord>, EngineError>;

    async fn update_withdrawal(
        &self,
        id: WithdrawalId,
        status: PaymentStatus,
        transfer_id: Option<TransferId>,
    ) -> Result<(), EngineError>;
}
