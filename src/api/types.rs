//! API request/response types.
//!
//! Amounts cross the wire as decimal strings to avoid float precision
//! issues; conversion to minor units happens only through `money`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::core_types::UserId;
use crate::error::EngineError;
use crate::ledger::journal::JournalEntry;
use crate::ledger::Page;
use crate::money::{currency_decimals, format_amount};
use crate::payments::types::{DepositRecord, WithdrawalRecord};
use crate::transfer::types::TransferRecord;
use crate::wallet::Wallet;

/// Standard response envelope.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub code: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub msg: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            code: "OK",
            data: Some(data),
            msg: None,
        }
    }
}

impl ApiResponse<()> {
    pub fn failure(err: &EngineError) -> Self {
        Self {
            code: err.code(),
            data: None,
            msg: Some(err.to_string()),
        }
    }
}

impl IntoResponse for EngineError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(ApiResponse::failure(&self))).into_response()
    }
}

// === Requests ===

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateWalletRequest {
    pub user_id: UserId,
    pub currency: String,
    #[serde(default = "default_category")]
    pub category: String,
    #[serde(default)]
    pub allow_negative: bool,
}

fn default_category() -> String {
    "main".to_string()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkBalancesRequest {
    pub user_ids: Vec<UserId>,
    pub currency: String,
    #[serde(default = "default_category")]
    pub category: String,
}

/// Direct funding mutation on one wallet (operator adjustment).
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTransactionRequest {
    /// "credit" or "debit".
    pub direction: String,
    /// "real" (default) or "bonus".
    #[serde(default)]
    pub kind: Option<String>,
    pub amount: String,
    /// Operator reference recorded on the journal entry.
    pub reference: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTransferRequest {
    pub from_user_id: UserId,
    pub to_user_id: UserId,
    pub amount: String,
    pub currency: String,
    #[serde(default)]
    pub fee_amount: Option<String>,
    #[serde(default = "default_category")]
    pub from_category: String,
    #[serde(default = "default_category")]
    pub to_category: String,
    #[serde(default)]
    pub from_kind: Option<String>,
    #[serde(default)]
    pub to_kind: Option<String>,
    #[serde(default)]
    pub external_ref: Option<String>,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub meta: Option<serde_json::Value>,
    #[serde(default)]
    pub requires_approval: bool,
    #[serde(default)]
    pub auto_create_destination: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateDepositRequest {
    pub user_id: UserId,
    /// Provider float wallet; defaults to the calling operator.
    #[serde(default)]
    pub from_user_id: Option<UserId>,
    pub amount: String,
    #[serde(default)]
    pub fee_amount: Option<String>,
    pub currency: String,
    pub method: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateWithdrawalRequest {
    pub user_id: UserId,
    pub amount: String,
    #[serde(default)]
    pub fee_amount: Option<String>,
    pub currency: String,
    pub method: String,
    #[serde(default)]
    pub bank_account: Option<String>,
}

/// Common listing query. Endpoints ignore the fields they have no use for.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListQuery {
    #[serde(default)]
    pub user_id: Option<UserId>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub wallet_id: Option<String>,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub offset: Option<usize>,
}

// === Responses ===

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PageInfo {
    pub has_next_page: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PageDto<T> {
    pub items: Vec<T>,
    pub total_count: usize,
    pub page_info: PageInfo,
}

impl<T> PageDto<T> {
    pub fn map<S>(page: Page<S>, f: impl Fn(&S) -> T) -> Self {
        Self {
            items: page.items.iter().map(f).collect(),
            total_count: page.total_count,
            page_info: PageInfo {
                has_next_page: page.has_next_page,
            },
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletDto {
    pub id: String,
    pub user_id: UserId,
    pub currency: String,
    pub category: String,
    pub balance: String,
    pub bonus_balance: String,
    pub locked_balance: String,
    pub status: String,
    pub allow_negative: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

impl WalletDto {
    pub fn from(w: &Wallet) -> Self {
        let d = currency_decimals(w.currency.as_str());
        Self {
            id: w.id.to_string(),
            user_id: w.user_id,
            currency: w.currency.to_string(),
            category: w.category.clone(),
            balance: format_amount(w.balance, d),
            bonus_balance: format_amount(w.bonus_balance, d),
            locked_balance: format_amount(w.locked_balance, d),
            status: w.status.as_str().to_string(),
            allow_negative: w.allow_negative,
            created_at: w.created_at,
            updated_at: w.updated_at,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserBalanceDto {
    pub user_id: UserId,
    pub balance: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkBalancesDto {
    pub currency: String,
    pub balances: Vec<UserBalanceDto>,
}

/// Result of a direct funding mutation.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionResultDto {
    pub id: String,
    pub balance: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferDto {
    pub id: String,
    pub status: String,
    pub from_user_id: UserId,
    pub to_user_id: UserId,
    pub amount: String,
    pub fee_amount: String,
    pub net_amount: String,
    pub currency: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_ref: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl TransferDto {
    pub fn from(t: &TransferRecord) -> Self {
        let d = currency_decimals(t.currency.as_str());
        Self {
            id: t.id.to_string(),
            status: t.status().as_str().to_string(),
            from_user_id: t.from_user_id,
            to_user_id: t.to_user_id,
            amount: format_amount(t.amount, d),
            fee_amount: format_amount(t.fee_amount, d),
            net_amount: format_amount(t.net_amount(), d),
            currency: t.currency.to_string(),
            external_ref: t.external_ref.clone(),
            method: t.method.clone(),
            error: t.error.clone(),
            created_at: t.created_at,
            updated_at: t.updated_at,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JournalEntryDto {
    pub id: String,
    pub wallet_id: String,
    pub user_id: UserId,
    pub entry_type: String,
    pub balance_kind: String,
    pub amount: String,
    pub balance: String,
    pub currency: String,
    pub ref_type: String,
    pub ref_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub leg: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub created_at: i64,
}

impl JournalEntryDto {
    pub fn from(e: &JournalEntry) -> Self {
        let d = currency_decimals(e.currency.as_str());
        Self {
            id: e.id.to_string(),
            wallet_id: e.wallet_id.to_string(),
            user_id: e.user_id,
            entry_type: e.entry_type.as_str().to_string(),
            balance_kind: e.balance_kind.as_str().to_string(),
            amount: format_amount(e.amount, d),
            balance: format_amount(e.balance, d),
            currency: e.currency.to_string(),
            ref_type: e.ref_type.as_str().to_string(),
            ref_id: e.ref_id.clone(),
            leg: e.leg.map(|l| l.as_str().to_string()),
            description: e.description.clone(),
            created_at: e.created_at,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DepositDto {
    pub id: String,
    pub user_id: UserId,
    pub amount: String,
    pub fee_amount: String,
    pub net_amount: String,
    pub currency: String,
    pub method: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transfer_id: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl DepositDto {
    pub fn from(r: &DepositRecord) -> Self {
        let d = currency_decimals(r.currency.as_str());
        Self {
            id: r.id.to_string(),
            user_id: r.user_id,
            amount: format_amount(r.amount, d),
            fee_amount: format_amount(r.fee_amount, d),
            net_amount: format_amount(r.net_amount, d),
            currency: r.currency.to_string(),
            method: r.method.clone(),
            status: r.status.as_str().to_string(),
            transfer_id: r.transfer_id.map(|id| id.to_string()),
            created_at: r.created_at,
            updated_at: r.updated_at,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WithdrawalDto {
    pub id: String,
    pub user_id: UserId,
    pub amount: String,
    pub fee_amount: String,
    pub net_amount: String,
    pub currency: String,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bank_account: Option<String>,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transfer_id: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl WithdrawalDto {
    pub fn from(r: &WithdrawalRecord) -> Self {
        let d = currency_decimals(r.currency.as_str());
        Self {
            id: r.id.to_string(),
            user_id: r.user_id,
            amount: format_amount(r.amount, d),
            fee_amount: format_amount(r.fee_amount, d),
            net_amount: format_amount(r.net_amount, d),
            currency: r.currency.to_string(),
            method: r.method.clone(),
            bank_account: r.bank_account.clone(),
            status: r.status.as_str().to_string(),
            transfer_id: r.transfer_id.map(|id| id.to_string()),
            created_at: r.created_at,
            updated_at: r.updated_at,
        }
    }
}
