//! PostgreSQL ledger store.
//!
//! Per-wallet serialization comes from `SELECT ... FOR UPDATE` on the wallet
//! row; the balance update, journal insert, and leg marker commit in one
//! transaction. Phase transitions are CAS updates on the expected phase, so
//! concurrent workers never both win a transition.

use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use tracing::info;

use crate::core_types::{
    now_millis, Amount, BalanceKind, Currency, DepositId, EntryId, TransferId, UserId, WalletId,
    WithdrawalId,
};
use crate::error::EngineError;
use crate::money;
use crate::payments::types::{DepositRecord, PaymentStatus, WithdrawalRecord};
use crate::transfer::phase::{TransferPhase, TransferStatus};
use crate::transfer::types::TransferRecord;
use crate::wallet::{Wallet, WalletKey, WalletStatus};

use super::journal::{EntryCause, JournalEntry, Leg, Posting, RefType};
use super::{
    EntryFilter, InsertTransfer, LedgerStore, Page, PageRequest, TransferFilter, WalletFilter,
};

const SCHEMA: &str = include_str!("../../sql/schema.sql");

pub struct PgLedgerStore {
    pool: PgPool,
}

impl PgLedgerStore {
    pub async fn connect(url: &str) -> Result<Self, EngineError> {
        let pool = PgPoolOptions::new()
            .max_connections(16)
            .acquire_timeout(Duration::from_secs(5))
            .connect(url)
            .await?;
        Ok(Self { pool })
    }

    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Apply `sql/schema.sql`. Idempotent; run at every startup.
    pub async fn init_schema(&self) -> Result<(), EngineError> {
        sqlx::raw_sql(SCHEMA).execute(&self.pool).await?;
        info!("ledger schema initialized");
        Ok(())
    }
}

fn parse_stored<T: FromStr>(s: &str, what: &str) -> Result<T, EngineError> {
    s.parse()
        .map_err(|_| EngineError::Internal(format!("corrupt {} in store: {}", what, s)))
}

fn row_to_wallet(row: &PgRow) -> Result<Wallet, EngineError> {
    let id: String = row.try_get("id")?;
    let currency: String = row.try_get("currency")?;
    let status: i16 = row.try_get("status")?;
    Ok(Wallet {
        id: parse_stored(&id, "wallet id")?,
        user_id: row.try_get("user_id")?,
        tenant_id: row.try_get("tenant_id")?,
        currency: Currency::parse(&currency)
            .ok_or_else(|| EngineError::Internal(format!("corrupt currency: {}", currency)))?,
        category: row.try_get("category")?,
        balance: row.try_get("balance")?,
        bonus_balance: row.try_get("bonus_balance")?,
        locked_balance: row.try_get("locked_balance")?,
        status: WalletStatus::from_id(status)
            .ok_or_else(|| EngineError::Internal(format!("corrupt wallet status: {}", status)))?,
        allow_negative: row.try_get("allow_negative")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn row_to_entry(row: &PgRow) -> Result<JournalEntry, EngineError> {
    let id: String = row.try_get("id")?;
    let wallet_id: String = row.try_get("wallet_id")?;
    let entry_type: String = row.try_get("entry_type")?;
    let balance_kind: String = row.try_get("balance_kind")?;
    let currency: String = row.try_get("currency")?;
    let ref_type: String = row.try_get("ref_type")?;
    let leg: Option<String> = row.try_get("leg")?;
    Ok(JournalEntry {
        id: parse_stored(&id, "entry id")?,
        wallet_id: parse_stored(&wallet_id, "wallet id")?,
        user_id: row.try_get("user_id")?,
        tenant_id: row.try_get("tenant_id")?,
        entry_type: super::journal::EntryType::parse(&entry_type)
            .ok_or_else(|| EngineError::Internal(format!("corrupt entry type: {}", entry_type)))?,
        balance_kind: BalanceKind::from_str_loose(&balance_kind)
            .ok_or_else(|| EngineError::Internal(format!("corrupt balance kind: {}", balance_kind)))?,
        amount: row.try_get("amount")?,
        balance: row.try_get("balance")?,
        currency: Currency::parse(&currency)
            .ok_or_else(|| EngineError::Internal(format!("corrupt currency: {}", currency)))?,
        ref_type: RefType::parse(&ref_type)
            .ok_or_else(|| EngineError::Internal(format!("corrupt ref type: {}", ref_type)))?,
        ref_id: row.try_get("ref_id")?,
        leg: match leg {
            None => None,
            Some(l) => Some(
                Leg::parse(&l)
                    .ok_or_else(|| EngineError::Internal(format!("corrupt leg: {}", l)))?,
            ),
        },
        description: row.try_get("description")?,
        created_at: row.try_get("created_at")?,
    })
}

fn row_to_transfer(row: &PgRow) -> Result<TransferRecord, EngineError> {
    let id: String = row.try_get("id")?;
    let currency: String = row.try_get("currency")?;
    let from_kind: String = row.try_get("from_kind")?;
    let to_kind: String = row.try_get("to_kind")?;
    let phase: i16 = row.try_get("phase")?;
    let meta: Option<String> = row.try_get("meta")?;
    Ok(TransferRecord {
        id: parse_stored(&id, "transfer id")?,
        tenant_id: row.try_get("tenant_id")?,
        from_user_id: row.try_get("from_user_id")?,
        to_user_id: row.try_get("to_user_id")?,
        amount: row.try_get("amount")?,
        fee_amount: row.try_get("fee_amount")?,
        currency: Currency::parse(&currency)
            .ok_or_else(|| EngineError::Internal(format!("corrupt currency: {}", currency)))?,
        from_category: row.try_get("from_category")?,
        to_category: row.try_get("to_category")?,
        from_kind: BalanceKind::from_str_loose(&from_kind)
            .ok_or_else(|| EngineError::Internal(format!("corrupt balance kind: {}", from_kind)))?,
        to_kind: BalanceKind::from_str_loose(&to_kind)
            .ok_or_else(|| EngineError::Internal(format!("corrupt balance kind: {}", to_kind)))?,
        external_ref: row.try_get("external_ref")?,
        method: row.try_get("method")?,
        meta: match meta {
            None => None,
            Some(m) => Some(
                serde_json::from_str(&m)
                    .map_err(|e| EngineError::Internal(format!("corrupt meta: {}", e)))?,
            ),
        },
        phase: TransferPhase::from_id(phase)
            .ok_or_else(|| EngineError::Internal(format!("corrupt phase: {}", phase)))?,
        error: row.try_get("error")?,
        retry_count: row.try_get("retry_count")?,
        heartbeat_at: row.try_get("heartbeat_at")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn row_to_deposit(row: &PgRow) -> Result<DepositRecord, EngineError> {
    let id: String = row.try_get("id")?;
    let currency: String = row.try_get("currency")?;
    let status: String = row.try_get("status")?;
    let transfer_id: Option<String> = row.try_get("transfer_id")?;
    Ok(DepositRecord {
        id: parse_stored(&id, "deposit id")?,
        tenant_id: row.try_get("tenant_id")?,
        user_id: row.try_get("user_id")?,
        from_user_id: row.try_get("from_user_id")?,
        amount: row.try_get("amount")?,
        fee_amount: row.try_get("fee_amount")?,
        net_amount: row.try_get("net_amount")?,
        currency: Currency::parse(&currency)
            .ok_or_else(|| EngineError::Internal(format!("corrupt currency: {}", currency)))?,
        method: row.try_get("method")?,
        transfer_id: match transfer_id {
            None => None,
            Some(t) => Some(parse_stored(&t, "transfer id")?),
        },
        status: PaymentStatus::parse(&status)
            .ok_or_else(|| EngineError::Internal(format!("corrupt status: {}", status)))?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn row_to_withdrawal(row: &PgRow) -> Result<WithdrawalRecord, EngineError> {
    let id: String = row.try_get("id")?;
    let currency: String = row.try_get("currency")?;
    let status: String = row.try_get("status")?;
    let transfer_id: Option<String> = row.try_get("transfer_id")?;
    Ok(WithdrawalRecord {
        id: parse_stored(&id, "withdrawal id")?,
        tenant_id: row.try_get("tenant_id")?,
        user_id: row.try_get("user_id")?,
        to_user_id: row.try_get("to_user_id")?,
        amount: row.try_get("amount")?,
        fee_amount: row.try_get("fee_amount")?,
        net_amount: row.try_get("net_amount")?,
        currency: Currency::parse(&currency)
            .ok_or_else(|| EngineError::Internal(format!("corrupt currency: {}", currency)))?,
        method: row.try_get("method")?,
        bank_account: row.try_get("bank_account")?,
        transfer_id: match transfer_id {
            None => None,
            Some(t) => Some(parse_stored(&t, "transfer id")?),
        },
        status: PaymentStatus::parse(&status)
            .ok_or_else(|| EngineError::Internal(format!("corrupt status: {}", status)))?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

/// Internal phases matching a public status, for listing filters.
fn phases_for_status(status: TransferStatus) -> Vec<i16> {
    match status {
        TransferStatus::Approved => vec![TransferPhase::Approved.id()],
        TransferStatus::Failed => vec![TransferPhase::Failed.id()],
        TransferStatus::Canceled => vec![TransferPhase::Canceled.id()],
        TransferStatus::Pending => vec![
            TransferPhase::Pending.id(),
            TransferPhase::DebitPending.id(),
            TransferPhase::DebitPosted.id(),
            TransferPhase::CreditPending.id(),
            TransferPhase::Compensating.id(),
        ],
    }
}

const TRANSFER_COLS: &str = "id, tenant_id, from_user_id, to_user_id, amount, fee_amount, \
     currency, from_category, to_category, from_kind, to_kind, external_ref, method, meta, \
     phase, error, retry_count, heartbeat_at, created_at, updated_at";

const ENTRY_COLS: &str = "id, wallet_id, user_id, tenant_id, entry_type, balance_kind, amount, \
     balance, currency, ref_type, ref_id, leg, description, created_at";

#[async_trait]
impl LedgerStore for PgLedgerStore {
    async fn insert_wallet(&self, wallet: &Wallet) -> Result<(), EngineError> {
        let result = sqlx::query(
            r#"
            INSERT INTO wallets_tb
                (id, user_id, tenant_id, currency, category, balance, bonus_balance,
                 locked_balance, status, allow_negative, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(wallet.id.to_string())
        .bind(wallet.user_id)
        .bind(&wallet.tenant_id)
        .bind(wallet.currency.as_str())
        .bind(&wallet.category)
        .bind(wallet.balance)
        .bind(wallet.bonus_balance)
        .bind(wallet.locked_balance)
        .bind(wallet.status.id())
        .bind(wallet.allow_negative)
        .bind(wallet.created_at)
        .bind(wallet.updated_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) => {
                if e.as_database_error()
                    .map(|d| d.is_unique_violation())
                    .unwrap_or(false)
                {
                    Err(EngineError::DuplicateWallet)
                } else {
                    Err(e.into())
                }
            }
        }
    }

    async fn wallet(&self, id: WalletId) -> Result<Option<Wallet>, EngineError> {
        let row = sqlx::query("SELECT * FROM wallets_tb WHERE id = $1")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_wallet).transpose()
    }

    async fn wallet_by_key(&self, key: &WalletKey) -> Result<Option<Wallet>, EngineError> {
        let row = sqlx::query(
            r#"
            SELECT * FROM wallets_tb
            WHERE user_id = $1 AND tenant_id = $2 AND currency = $3 AND category = $4
            "#,
        )
        .bind(key.user_id)
        .bind(&key.tenant_id)
        .bind(key.currency.as_str())
        .bind(&key.category)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(row_to_wallet).transpose()
    }

    async fn set_wallet_status(
        &self,
        id: WalletId,
        status: WalletStatus,
    ) -> Result<(), EngineError> {
        let result =
            sqlx::query("UPDATE wallets_tb SET status = $2, updated_at = $3 WHERE id = $1")
                .bind(id.to_string())
                .bind(status.id())
                .bind(now_millis())
                .execute(&self.pool)
                .await?;
        if result.rows_affected() == 0 {
            return Err(EngineError::WalletNotFound);
        }
        Ok(())
    }

    async fn list_wallets(
        &self,
        filter: &WalletFilter,
        page: PageRequest,
    ) -> Result<Page<Wallet>, EngineError> {
        let page = page.clamped();
        let filter_sql = r#"
            FROM wallets_tb
            WHERE tenant_id = $1
              AND ($2::BIGINT IS NULL OR user_id = $2)
              AND ($3::TEXT IS NULL OR currency = $3)
              AND ($4::TEXT IS NULL OR category = $4)
        "#;
        let currency = filter.currency.as_ref().map(|c| c.as_str().to_string());

        let total: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) {}", filter_sql))
            .bind(&filter.tenant_id)
            .bind(filter.user_id)
            .bind(&currency)
            .bind(&filter.category)
            .fetch_one(&self.pool)
            .await?;

        let rows = sqlx::query(&format!(
            "SELECT * {} ORDER BY id LIMIT $5 OFFSET $6",
            filter_sql
        ))
        .bind(&filter.tenant_id)
        .bind(filter.user_id)
        .bind(&currency)
        .bind(&filter.category)
        .bind(page.limit as i64)
        .bind(page.offset as i64)
        .fetch_all(&self.pool)
        .await?;

        let items = rows
            .iter()
            .map(row_to_wallet)
            .collect::<Result<Vec<_>, _>>()?;
        let total_count = total as usize;
        Ok(Page {
            has_next_page: page.offset + items.len() < total_count,
            items,
            total_count,
        })
    }

    async fn bulk_balances(
        &self,
        tenant_id: &str,
        user_ids: &[UserId],
        currency: &Currency,
        category: &str,
    ) -> Result<HashMap<UserId, Amount>, EngineError> {
        let rows = sqlx::query(
            r#"
            SELECT user_id, balance FROM wallets_tb
            WHERE tenant_id = $1 AND user_id = ANY($2) AND currency = $3 AND category = $4
            "#,
        )
        .bind(tenant_id)
        .bind(user_ids.to_vec())
        .bind(currency.as_str())
        .bind(category)
        .fetch_all(&self.pool)
        .await?;

        let mut out = HashMap::with_capacity(rows.len());
        for row in rows {
            let user_id: i64 = row.try_get("user_id")?;
            let balance: i64 = row.try_get("balance")?;
            out.insert(user_id, balance);
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
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query("SELECT * FROM wallets_tb WHERE id = $1 FOR UPDATE")
            .bind(wallet_id.to_string())
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(EngineError::WalletNotFound)?;
        let wallet = row_to_wallet(&row)?;

        // Replay check under the row lock: a racing post of the same leg is
        // serialized behind the winner's commit and sees its marker here.
        if let Some(leg) = cause.leg {
            let existing = sqlx::query(
                "SELECT id, balance FROM journal_tb WHERE ref_type = $1 AND ref_id = $2 AND leg = $3",
            )
            .bind(cause.ref_type.as_str())
            .bind(&cause.ref_id)
            .bind(leg.as_str())
            .fetch_optional(&mut *tx)
            .await?;
            if let Some(row) = existing {
                let id: String = row.try_get("id")?;
                return Ok(Posting {
                    entry_id: parse_stored(&id, "entry id")?,
                    new_balance: row.try_get("balance")?,
                    replayed: true,
                });
            }
        }

        if wallet.status == WalletStatus::Suspended {
            return Err(EngineError::WalletSuspended);
        }
        let new_balance = money::checked_add(wallet.balance_of(kind), delta)?;
        if !wallet.permits_balance(kind, new_balance) {
            return Err(EngineError::InsufficientFunds);
        }

        let now = now_millis();
        let column = match kind {
            BalanceKind::Real => "balance",
            BalanceKind::Bonus => "bonus_balance",
        };
        sqlx::query(&format!(
            "UPDATE wallets_tb SET {} = $2, updated_at = $3 WHERE id = $1",
            column
        ))
        .bind(wallet_id.to_string())
        .bind(new_balance)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        let entry_id = EntryId::new();
        sqlx::query(
            r#"
            INSERT INTO journal_tb
                (id, wallet_id, user_id, tenant_id, entry_type, balance_kind, amount,
                 balance, currency, ref_type, ref_id, leg, description, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            "#,
        )
        .bind(entry_id.to_string())
        .bind(wallet_id.to_string())
        .bind(wallet.user_id)
        .bind(&wallet.tenant_id)
        .bind(cause.entry_type.as_str())
        .bind(kind.as_str())
        .bind(delta)
        .bind(new_balance)
        .bind(wallet.currency.as_str())
        .bind(cause.ref_type.as_str())
        .bind(&cause.ref_id)
        .bind(cause.leg.map(|l| l.as_str()))
        .bind(&cause.description)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(Posting {
            entry_id,
            new_balance,
            replayed: false,
        })
    }

    async fn entries_for_wallet(
        &self,
        wallet_id: WalletId,
    ) -> Result<Vec<JournalEntry>, EngineError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM journal_tb WHERE wallet_id = $1 ORDER BY id",
            ENTRY_COLS
        ))
        .bind(wallet_id.to_string())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_entry).collect()
    }

    async fn list_entries(
        &self,
        filter: &EntryFilter,
        page: PageRequest,
    ) -> Result<Page<JournalEntry>, EngineError> {
        let page = page.clamped();
        let filter_sql = r#"
            FROM journal_tb
            WHERE tenant_id = $1
              AND ($2::TEXT IS NULL OR wallet_id = $2)
              AND ($3::BIGINT IS NULL OR user_id = $3)
        "#;
        let wallet_id = filter.wallet_id.map(|w| w.to_string());

        let total: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) {}", filter_sql))
            .bind(&filter.tenant_id)
            .bind(&wallet_id)
            .bind(filter.user_id)
            .fetch_one(&self.pool)
            .await?;

        let rows = sqlx::query(&format!(
            "SELECT {} {} ORDER BY id LIMIT $4 OFFSET $5",
            ENTRY_COLS, filter_sql
        ))
        .bind(&filter.tenant_id)
        .bind(&wallet_id)
        .bind(filter.user_id)
        .bind(page.limit as i64)
        .bind(page.offset as i64)
        .fetch_all(&self.pool)
        .await?;

        let items = rows.iter().map(row_to_entry).collect::<Result<Vec<_>, _>>()?;
        let total_count = total as usize;
        Ok(Page {
            has_next_page: page.offset + items.len() < total_count,
            items,
            total_count,
        })
    }

    async fn leg_entry(
        &self,
        ref_type: RefType,
        ref_id: &str,
        leg: Leg,
    ) -> Result<Option<JournalEntry>, EngineError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM journal_tb WHERE ref_type = $1 AND ref_id = $2 AND leg = $3",
            ENTRY_COLS
        ))
        .bind(ref_type.as_str())
        .bind(ref_id)
        .bind(leg.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(row_to_entry).transpose()
    }

    async fn insert_transfer(
        &self,
        record: &TransferRecord,
    ) -> Result<InsertTransfer, EngineError> {
        let meta = record
            .meta
            .as_ref()
            .map(|m| serde_json::to_string(m).unwrap_or_default());
        let result = sqlx::query(
            r#"
            INSERT INTO transfers_tb
                (id, tenant_id, from_user_id, to_user_id, amount, fee_amount, currency,
                 from_category, to_category, from_kind, to_kind, external_ref, method, meta,
                 phase, error, retry_count, heartbeat_at, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14,
                    $15, $16, $17, $18, $19, $20)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(record.id.to_string())
        .bind(&record.tenant_id)
        .bind(record.from_user_id)
        .bind(record.to_user_id)
        .bind(record.amount)
        .bind(record.fee_amount)
        .bind(record.currency.as_str())
        .bind(&record.from_category)
        .bind(&record.to_category)
        .bind(record.from_kind.as_str())
        .bind(record.to_kind.as_str())
        .bind(&record.external_ref)
        .bind(&record.method)
        .bind(meta)
        .bind(record.phase.id())
        .bind(&record.error)
        .bind(record.retry_count)
        .bind(record.heartbeat_at)
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            return Ok(InsertTransfer::Created);
        }
        match &record.external_ref {
            Some(ext) => {
                let existing = self
                    .transfer_by_external_ref(&record.tenant_id, ext)
                    .await?
                    .ok_or_else(|| {
                        EngineError::Internal(format!(
                            "transfer insert conflicted but ref {} not found",
                            ext
                        ))
                    })?;
                Ok(InsertTransfer::Duplicate(existing))
            }
            None => Err(EngineError::Internal(format!(
                "transfer id collision: {}",
                record.id
            ))),
        }
    }

    async fn transfer(&self, id: TransferId) -> Result<Option<TransferRecord>, EngineError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM transfers_tb WHERE id = $1",
            TRANSFER_COLS
        ))
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(row_to_transfer).transpose()
    }

    async fn transfer_by_external_ref(
        &self,
        tenant_id: &str,
        external_ref: &str,
    ) -> Result<Option<TransferRecord>, EngineError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM transfers_tb WHERE tenant_id = $1 AND external_ref = $2",
            TRANSFER_COLS
        ))
        .bind(tenant_id)
        .bind(external_ref)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(row_to_transfer).transpose()
    }

    async fn update_phase_if(
        &self,
        id: TransferId,
        expected: TransferPhase,
        new: TransferPhase,
    ) -> Result<bool, EngineError> {
        let result = sqlx::query(
            "UPDATE transfers_tb SET phase = $2, updated_at = $3 WHERE id = $1 AND phase = $4",
        )
        .bind(id.to_string())
        .bind(new.id())
        .bind(now_millis())
        .bind(expected.id())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn update_phase_with_error(
        &self,
        id: TransferId,
        expected: TransferPhase,
        new: TransferPhase,
        error: &str,
    ) -> Result<bool, EngineError> {
        let result = sqlx::query(
            r#"
            UPDATE transfers_tb SET phase = $2, error = $3, updated_at = $4
            WHERE id = $1 AND phase = $5
            "#,
        )
        .bind(id.to_string())
        .bind(new.id())
        .bind(error)
        .bind(now_millis())
        .bind(expected.id())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn touch_heartbeat(&self, id: TransferId) -> Result<(), EngineError> {
        let now = now_millis();
        sqlx::query("UPDATE transfers_tb SET heartbeat_at = $2, updated_at = $2 WHERE id = $1")
            .bind(id.to_string())
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn increment_retry(&self, id: TransferId) -> Result<(), EngineError> {
        sqlx::query(
            "UPDATE transfers_tb SET retry_count = retry_count + 1, updated_at = $2 WHERE id = $1",
        )
        .bind(id.to_string())
        .bind(now_millis())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_stuck(
        &self,
        older_than: Duration,
        limit: usize,
    ) -> Result<Vec<TransferRecord>, EngineError> {
        let cutoff = now_millis() - older_than.as_millis() as i64;
        let rows = sqlx::query(&format!(
            r#"
            SELECT {} FROM transfers_tb
            WHERE phase NOT IN ($1, $2, $3)
              AND heartbeat_at IS NOT NULL
              AND heartbeat_at < $4
            ORDER BY heartbeat_at
            LIMIT $5
            "#,
            TRANSFER_COLS
        ))
        .bind(TransferPhase::Approved.id())
        .bind(TransferPhase::Failed.id())
        .bind(TransferPhase::Canceled.id())
        .bind(cutoff)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_transfer).collect()
    }

    async fn list_transfers(
        &self,
        filter: &TransferFilter,
        page: PageRequest,
    ) -> Result<Page<TransferRecord>, EngineError> {
        let page = page.clamped();
        let filter_sql = r#"
            FROM transfers_tb
            WHERE tenant_id = $1
              AND ($2::BIGINT IS NULL OR from_user_id = $2 OR to_user_id = $2)
              AND ($3::SMALLINT[] IS NULL OR phase = ANY($3))
              AND ($4::TEXT IS NULL OR currency = $4)
        "#;
        let phases = filter.status.map(phases_for_status);
        let currency = filter.currency.as_ref().map(|c| c.as_str().to_string());

        let total: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) {}", filter_sql))
            .bind(&filter.tenant_id)
            .bind(filter.user_id)
            .bind(&phases)
            .bind(&currency)
            .fetch_one(&self.pool)
            .await?;

        let rows = sqlx::query(&format!(
            "SELECT {} {} ORDER BY id LIMIT $5 OFFSET $6",
            TRANSFER_COLS, filter_sql
        ))
        .bind(&filter.tenant_id)
        .bind(filter.user_id)
        .bind(&phases)
        .bind(&currency)
        .bind(page.limit as i64)
        .bind(page.offset as i64)
        .fetch_all(&self.pool)
        .await?;

        let items = rows
            .iter()
            .map(row_to_transfer)
            .collect::<Result<Vec<_>, _>>()?;
        let total_count = total as usize;
        Ok(Page {
            has_next_page: page.offset + items.len() < total_count,
            items,
            total_count,
        })
    }

    async fn insert_deposit(&self, record: &DepositRecord) -> Result<(), EngineError> {
        sqlx::query(
            r#"
            INSERT INTO deposits_tb
                (id, tenant_id, user_id, from_user_id, amount, fee_amount, net_amount,
                 currency, method, transfer_id, status, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(record.id.to_string())
        .bind(&record.tenant_id)
        .bind(record.user_id)
        .bind(record.from_user_id)
        .bind(record.amount)
        .bind(record.fee_amount)
        .bind(record.net_amount)
        .bind(record.currency.as_str())
        .bind(&record.method)
        .bind(record.transfer_id.map(|t| t.to_string()))
        .bind(record.status.as_str())
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn deposit(&self, id: DepositId) -> Result<Option<DepositRecord>, EngineError> {
        let row = sqlx::query("SELECT * FROM deposits_tb WHERE id = $1")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_deposit).transpose()
    }

    async fn update_deposit(
        &self,
        id: DepositId,
        status: PaymentStatus,
        transfer_id: Option<TransferId>,
    ) -> Result<(), EngineError> {
        let result = sqlx::query(
            r#"
            UPDATE deposits_tb
            SET status = $2, transfer_id = COALESCE($3, transfer_id), updated_at = $4
            WHERE id = $1
            "#,
        )
        .bind(id.to_string())
        .bind(status.as_str())
        .bind(transfer_id.map(|t| t.to_string()))
        .bind(now_millis())
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(EngineError::DepositNotFound(id.to_string()));
        }
        Ok(())
    }

    async fn insert_withdrawal(&self, record: &WithdrawalRecord) -> Result<(), EngineError> {
        sqlx::query(
            r#"
            INSERT INTO withdrawals_tb
                (id, tenant_id, user_id, to_user_id, amount, fee_amount, net_amount,
                 currency, method, bank_account, transfer_id, status, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            "#,
        )
        .bind(record.id.to_string())
        .bind(&record.tenant_id)
        .bind(record.user_id)
        .bind(record.to_user_id)
        .bind(record.amount)
        .bind(record.fee_amount)
        .bind(record.net_amount)
        .bind(record.currency.as_str())
        .bind(&record.method)
        .bind(&record.bank_account)
        .bind(record.transfer_id.map(|t| t.to_string()))
        .bind(record.status.as_str())
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn withdrawal(
        &self,
        id: WithdrawalId,
    ) -> Result<Option<WithdrawalRecord>, EngineError> {
        let row = sqlx::query("SELECT * FROM withdrawals_tb WHERE id = $1")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_withdrawal).transpose()
    }

    async fn update_withdrawal(
        &self,
        id: WithdrawalId,
        status: PaymentStatus,
        transfer_id: Option<TransferId>,
    ) -> Result<(), EngineError> {
        let result = sqlx::query(
            r#"
            UPDATE withdrawals_tb
            SET status = $2, transfer_id = COALESCE($3, transfer_id), updated_at = $4
            WHERE id = $1
            "#,
        )
        .bind(id.to_string())
        .bind(status.as_str())
        .bind(transfer_id.map(|t| t.to_string()))
        .bind(now_millis())
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(EngineError::WithdrawalNotFound(id.to_string()));
        }
        Ok(())
    }
}

// Require a live database; run with `cargo test -- --ignored` against a
// scratch Postgres pointed at by TEST_DATABASE_URL.
#[cfg(test)]
mod tests {
    use super::*;

    async fn store() -> PgLedgerStore {
        let url = std::env::var("TEST_DATABASE_URL")
            .expect("TEST_DATABASE_URL must point at a scratch database");
        let store = PgLedgerStore::connect(&url).await.unwrap();
        store.init_schema().await.unwrap();
        store
    }

    #[tokio::test]
    #[ignore]
    async fn test_pg_wallet_roundtrip() {
        let store = store().await;
        let wallet = Wallet::new(
            WalletKey::new(
                now_millis(), // unique per run
                "pg-test",
                Currency::parse("EUR").unwrap(),
                "main",
            ),
            false,
        );
        store.insert_wallet(&wallet).await.unwrap();
        let loaded = store.wallet(wallet.id).await.unwrap().unwrap();
        assert_eq!(loaded.user_id, wallet.user_id);
        assert_eq!(loaded.balance, 0);

        assert!(matches!(
            store.insert_wallet(&Wallet::new(wallet.key(), false)).await,
            Err(EngineError::DuplicateWallet)
        ));
    }

    #[tokio::test]
    #[ignore]
    async fn test_pg_delta_and_leg_replay() {
        let store = store().await;
        let wallet = Wallet::new(
            WalletKey::new(
                now_millis(),
                "pg-test",
                Currency::parse("EUR").unwrap(),
                "main",
            ),
            false,
        );
        store.insert_wallet(&wallet).await.unwrap();

        let ref_id = TransferId::new().to_string();
        let cause = EntryCause {
            entry_type: super::super::journal::EntryType::TransferIn,
            ref_type: RefType::Transfer,
            ref_id: ref_id.clone(),
            leg: Some(Leg::Credit),
            description: None,
        };
        let first = store
            .apply_balance_delta(wallet.id, BalanceKind::Real, 500, cause.clone())
            .await
            .unwrap();
        let second = store
            .apply_balance_delta(wallet.id, BalanceKind::Real, 500, cause)
            .await
            .unwrap();
        assert!(!first.replayed);
        assert!(second.replayed);
        assert_eq!(second.new_balance, 500);

        let marker = store
            .leg_entry(RefType::Transfer, &ref_id, Leg::Credit)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(marker.ref_id, ref_id);
        assert_eq!(marker.amount, 500);
    }
}
