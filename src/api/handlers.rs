//! HTTP handlers.
//!
//! Handlers parse and authorize, then delegate to the services. Visibility
//! rules: callers only ever see records of their own tenant, and the `user`
//! role only its own records.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Json;

use crate::core_types::{BalanceKind, Caller, Currency, Role, TransferId, WalletId};
use crate::error::EngineError;
use crate::ledger::{EntryFilter, PageRequest, TransferFilter, WalletFilter};
use crate::money;
use crate::payments::deposit::DepositRequest;
use crate::payments::withdraw::WithdrawalRequest;
use crate::transfer::{TransferRequest, TransferStatus};
use crate::wallet::WalletKey;

use super::types::*;
use super::AppState;

fn parse_currency(s: &str) -> Result<Currency, EngineError> {
    Currency::parse(s).ok_or_else(|| EngineError::UnknownCurrency(s.to_string()))
}

fn parse_money(s: &str, currency: &Currency) -> Result<i64, EngineError> {
    Ok(money::parse_amount(
        s,
        money::currency_decimals(currency.as_str()),
    )?)
}

fn parse_fee(s: &Option<String>, currency: &Currency) -> Result<i64, EngineError> {
    match s {
        Some(s) => parse_money(s, currency),
        None => Ok(0),
    }
}

fn parse_kind(s: &Option<String>) -> Result<BalanceKind, EngineError> {
    match s {
        None => Ok(BalanceKind::Real),
        Some(s) => BalanceKind::from_str_loose(s)
            .ok_or_else(|| EngineError::Validation(format!("unknown balance kind: {}", s))),
    }
}

fn parse_wallet_id(s: &str) -> Result<WalletId, EngineError> {
    s.parse()
        .map_err(|_| EngineError::Validation(format!("invalid wallet id: {}", s)))
}

fn parse_transfer_id(s: &str) -> Result<TransferId, EngineError> {
    s.parse()
        .map_err(|_| EngineError::TransferNotFound(s.to_string()))
}

fn page_of(q: &ListQuery) -> PageRequest {
    PageRequest {
        limit: q.limit.unwrap_or(50),
        offset: q.offset.unwrap_or(0),
    }
}

pub async fn health() -> &'static str {
    "ok"
}

// === Wallets ===

pub async fn create_wallet(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Json(req): Json<CreateWalletRequest>,
) -> Result<Json<ApiResponse<WalletDto>>, EngineError> {
    if caller.role == Role::User && req.user_id != caller.user_id {
        return Err(EngineError::Unauthorized);
    }
    let currency = parse_currency(&req.currency)?;
    let key = WalletKey::new(req.user_id, caller.tenant_id.clone(), currency, req.category);
    let wallet = state
        .wallets
        .create_wallet(&caller, key, req.allow_negative)
        .await?;
    Ok(Json(ApiResponse::success(WalletDto::from(&wallet))))
}

pub async fn get_wallet(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<WalletDto>>, EngineError> {
    let wallet = state.wallets.wallet(parse_wallet_id(&id)?).await?;
    if wallet.tenant_id != caller.tenant_id
        || (caller.role == Role::User && wallet.user_id != caller.user_id)
    {
        return Err(EngineError::WalletNotFound);
    }
    Ok(Json(ApiResponse::success(WalletDto::from(&wallet))))
}

pub async fn list_wallets(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Query(q): Query<ListQuery>,
) -> Result<Json<ApiResponse<PageDto<WalletDto>>>, EngineError> {
    let currency = q.currency.as_deref().map(parse_currency).transpose()?;
    let user_id = if caller.role == Role::User {
        Some(caller.user_id)
    } else {
        q.user_id
    };
    let filter = WalletFilter {
        tenant_id: caller.tenant_id.clone(),
        user_id,
        currency,
        category: q.category.clone(),
    };
    let page = state.wallets.list(&filter, page_of(&q)).await?;
    Ok(Json(ApiResponse::success(PageDto::map(page, WalletDto::from))))
}

pub async fn bulk_balances(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Json(req): Json<BulkBalancesRequest>,
) -> Result<Json<ApiResponse<BulkBalancesDto>>, EngineError> {
    if !caller.role.is_operator() {
        return Err(EngineError::Unauthorized);
    }
    let currency = parse_currency(&req.currency)?;
    let decimals = money::currency_decimals(currency.as_str());
    let balances = state
        .wallets
        .bulk_balances(&caller.tenant_id, &req.user_ids, &currency, &req.category)
        .await?;
    let mut items: Vec<UserBalanceDto> = balances
        .into_iter()
        .map(|(user_id, balance)| UserBalanceDto {
            user_id,
            balance: money::format_amount(balance, decimals),
        })
        .collect();
    items.sort_by_key(|b| b.user_id);
    Ok(Json(ApiResponse::success(BulkBalancesDto {
        currency: currency.to_string(),
        balances: items,
    })))
}

pub async fn suspend_wallet(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<WalletDto>>, EngineError> {
    let wallet_id = parse_wallet_id(&id)?;
    let wallet = state.wallets.wallet(wallet_id).await?;
    if wallet.tenant_id != caller.tenant_id {
        return Err(EngineError::WalletNotFound);
    }
    state.wallets.suspend(&caller, wallet_id).await?;
    let wallet = state.wallets.wallet(wallet_id).await?;
    Ok(Json(ApiResponse::success(WalletDto::from(&wallet))))
}

/// Direct funding mutation (`system` role, enforced by the manager).
pub async fn create_wallet_transaction(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Path(id): Path<String>,
    Json(req): Json<CreateTransactionRequest>,
) -> Result<Json<ApiResponse<TransactionResultDto>>, EngineError> {
    let wallet_id = parse_wallet_id(&id)?;
    let wallet = state.wallets.wallet(wallet_id).await?;
    if wallet.tenant_id != caller.tenant_id {
        return Err(EngineError::WalletNotFound);
    }
    let decimals = money::currency_decimals(wallet.currency.as_str());
    let magnitude = money::parse_amount(&req.amount, decimals)?;
    let delta = match req.direction.as_str() {
        "credit" => magnitude,
        "debit" => -magnitude,
        other => {
            return Err(EngineError::Validation(format!(
                "direction must be credit or debit, got {}",
                other
            )))
        }
    };
    let kind = parse_kind(&req.kind)?;
    let posting = state
        .wallets
        .apply_funding(&caller, wallet_id, kind, delta, req.reference, req.description)
        .await?;
    Ok(Json(ApiResponse::success(TransactionResultDto {
        id: posting.entry_id.to_string(),
        balance: money::format_amount(posting.new_balance, decimals),
    })))
}

pub async fn list_transactions(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Query(q): Query<ListQuery>,
) -> Result<Json<ApiResponse<PageDto<JournalEntryDto>>>, EngineError> {
    let user_id = if caller.role == Role::User {
        Some(caller.user_id)
    } else {
        q.user_id
    };
    let wallet_id = q.wallet_id.as_deref().map(parse_wallet_id).transpose()?;
    let filter = EntryFilter {
        tenant_id: caller.tenant_id.clone(),
        wallet_id,
        user_id,
    };
    let page = state.store.list_entries(&filter, page_of(&q)).await?;
    Ok(Json(ApiResponse::success(PageDto::map(
        page,
        JournalEntryDto::from,
    ))))
}

// === Transfers ===

pub async fn create_transfer(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Json(req): Json<CreateTransferRequest>,
) -> Result<Json<ApiResponse<TransferDto>>, EngineError> {
    if !caller.role.is_operator() && req.from_user_id != caller.user_id {
        return Err(EngineError::Unauthorized);
    }
    let currency = parse_currency(&req.currency)?;
    let amount = parse_money(&req.amount, &currency)?;
    let fee_amount = parse_fee(&req.fee_amount, &currency)?;

    let transfer_req = TransferRequest {
        tenant_id: caller.tenant_id.clone(),
        from_user_id: req.from_user_id,
        to_user_id: req.to_user_id,
        amount,
        currency,
        from_category: req.from_category,
        to_category: req.to_category,
        from_kind: parse_kind(&req.from_kind)?,
        to_kind: parse_kind(&req.to_kind)?,
        fee_amount,
        external_ref: req.external_ref,
        method: req.method,
        meta: req.meta,
        requires_approval: req.requires_approval,
        auto_create_destination: req.auto_create_destination,
    };
    let record = state.engine.create_transfer(transfer_req).await?;
    Ok(Json(ApiResponse::success(TransferDto::from(&record))))
}

pub async fn get_transfer(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<TransferDto>>, EngineError> {
    let record = state.engine.transfer(parse_transfer_id(&id)?).await?;
    if record.tenant_id != caller.tenant_id
        || (caller.role == Role::User
            && record.from_user_id != caller.user_id
            && record.to_user_id != caller.user_id)
    {
        return Err(EngineError::TransferNotFound(id));
    }
    Ok(Json(ApiResponse::success(TransferDto::from(&record))))
}

pub async fn list_transfers(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Query(q): Query<ListQuery>,
) -> Result<Json<ApiResponse<PageDto<TransferDto>>>, EngineError> {
    let status = q
        .status
        .as_deref()
        .map(|s| {
            TransferStatus::parse(s)
                .ok_or_else(|| EngineError::Validation(format!("unknown status: {}", s)))
        })
        .transpose()?;
    let currency = q.currency.as_deref().map(parse_currency).transpose()?;
    let user_id = if caller.role == Role::User {
        Some(caller.user_id)
    } else {
        q.user_id
    };
    let filter = TransferFilter {
        tenant_id: caller.tenant_id.clone(),
        user_id,
        status,
        currency,
    };
    let page = state.engine.list(&filter, page_of(&q)).await?;
    Ok(Json(ApiResponse::success(PageDto::map(page, TransferDto::from))))
}

pub async fn approve_transfer(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<TransferDto>>, EngineError> {
    if !caller.role.is_operator() {
        return Err(EngineError::Unauthorized);
    }
    let transfer_id = parse_transfer_id(&id)?;
    let record = state.engine.transfer(transfer_id).await?;
    if record.tenant_id != caller.tenant_id {
        return Err(EngineError::TransferNotFound(id));
    }
    let record = state.engine.approve_transfer(transfer_id).await?;
    Ok(Json(ApiResponse::success(TransferDto::from(&record))))
}

pub async fn cancel_transfer(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<TransferDto>>, EngineError> {
    if !caller.role.is_operator() {
        return Err(EngineError::Unauthorized);
    }
    let record = state
        .engine
        .cancel_transfer(&caller, parse_transfer_id(&id)?)
        .await?;
    Ok(Json(ApiResponse::success(TransferDto::from(&record))))
}

// === Deposits / Withdrawals ===

pub async fn create_deposit(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Json(req): Json<CreateDepositRequest>,
) -> Result<Json<ApiResponse<DepositDto>>, EngineError> {
    let currency = parse_currency(&req.currency)?;
    let amount = parse_money(&req.amount, &currency)?;
    let fee_amount = parse_fee(&req.fee_amount, &currency)?;
    let record = state
        .deposits
        .create_deposit(
            &caller,
            DepositRequest {
                user_id: req.user_id,
                from_user_id: req.from_user_id,
                amount,
                fee_amount,
                currency,
                method: req.method,
            },
        )
        .await?;
    Ok(Json(ApiResponse::success(DepositDto::from(&record))))
}

pub async fn get_deposit(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<DepositDto>>, EngineError> {
    let deposit_id = id
        .parse()
        .map_err(|_| EngineError::DepositNotFound(id.clone()))?;
    let record = state.deposits.deposit(deposit_id).await?;
    if record.tenant_id != caller.tenant_id
        || (caller.role == Role::User && record.user_id != caller.user_id)
    {
        return Err(EngineError::DepositNotFound(id));
    }
    Ok(Json(ApiResponse::success(DepositDto::from(&record))))
}

pub async fn create_withdrawal(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Json(req): Json<CreateWithdrawalRequest>,
) -> Result<Json<ApiResponse<WithdrawalDto>>, EngineError> {
    let currency = parse_currency(&req.currency)?;
    let amount = parse_money(&req.amount, &currency)?;
    let fee_amount = parse_fee(&req.fee_amount, &currency)?;
    let record = state
        .withdrawals
        .create_withdrawal(
            &caller,
            WithdrawalRequest {
                user_id: req.user_id,
                amount,
                fee_amount,
                currency,
                method: req.method,
                bank_account: req.bank_account,
            },
        )
        .await?;
    Ok(Json(ApiResponse::success(WithdrawalDto::from(&record))))
}

pub async fn get_withdrawal(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<WithdrawalDto>>, EngineError> {
    let withdrawal_id = id
        .parse()
        .map_err(|_| EngineError::WithdrawalNotFound(id.clone()))?;
    let record = state.withdrawals.withdrawal(withdrawal_id).await?;
    if record.tenant_id != caller.tenant_id
        || (caller.role == Role::User && record.user_id != caller.user_id)
    {
        return Err(EngineError::WithdrawalNotFound(id));
    }
    Ok(Json(ApiResponse::success(WithdrawalDto::from(&record))))
}
