//! Transaction journal types.
//!
//! Every balance mutation appends exactly one immutable entry carrying the
//! signed amount and the resulting balance snapshot. The snapshot chain is
//! what makes statements and reconciliation possible without re-summing the
//! whole history.

use serde::{Deserialize, Serialize};

use crate::core_types::{Amount, BalanceKind, Currency, EntryId, TenantId, UserId, WalletId};

/// Business meaning of a journal entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryType {
    Deposit,
    Withdrawal,
    TransferIn,
    TransferOut,
    Bet,
    Win,
    BonusCredit,
    Fee,
    /// Compensating entry posted by recovery; references the reversed
    /// transfer and never edits the original entry.
    Reversal,
    /// Operator adjustment via the direct funding mutation.
    Adjustment,
}

impl EntryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryType::Deposit => "deposit",
            EntryType::Withdrawal => "withdrawal",
            EntryType::TransferIn => "transfer_in",
            EntryType::TransferOut => "transfer_out",
            EntryType::Bet => "bet",
            EntryType::Win => "win",
            EntryType::BonusCredit => "bonus_credit",
            EntryType::Fee => "fee",
            EntryType::Reversal => "reversal",
            EntryType::Adjustment => "adjustment",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "deposit" => Some(EntryType::Deposit),
            "withdrawal" => Some(EntryType::Withdrawal),
            "transfer_in" => Some(EntryType::TransferIn),
            "transfer_out" => Some(EntryType::TransferOut),
            "bet" => Some(EntryType::Bet),
            "win" => Some(EntryType::Win),
            "bonus_credit" => Some(EntryType::BonusCredit),
            "fee" => Some(EntryType::Fee),
            "reversal" => Some(EntryType::Reversal),
            "adjustment" => Some(EntryType::Adjustment),
            _ => None,
        }
    }
}

/// Kind of record that caused a journal entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefType {
    Transfer,
    Deposit,
    Withdrawal,
    Manual,
}

impl RefType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RefType::Transfer => "transfer",
            RefType::Deposit => "deposit",
            RefType::Withdrawal => "withdrawal",
            RefType::Manual => "manual",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "transfer" => Some(RefType::Transfer),
            "deposit" => Some(RefType::Deposit),
            "withdrawal" => Some(RefType::Withdrawal),
            "manual" => Some(RefType::Manual),
            _ => None,
        }
    }
}

/// One side of a multi-leg operation. The `(ref_id, leg)` pair is unique in
/// the journal, which is what makes leg posting idempotent and lets recovery
/// see exactly how far a transfer got.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Leg {
    Debit,
    Credit,
    Fee,
    Reversal,
}

impl Leg {
    pub fn as_str(&self) -> &'static str {
        match self {
            Leg::Debit => "debit",
            Leg::Credit => "credit",
            Leg::Fee => "fee",
            Leg::Reversal => "reversal",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "debit" => Some(Leg::Debit),
            "credit" => Some(Leg::Credit),
            "fee" => Some(Leg::Fee),
            "reversal" => Some(Leg::Reversal),
            _ => None,
        }
    }
}

/// Why a balance delta is being applied. Passed into the atomic primitive so
/// the journal entry and the leg marker are committed in the same unit as
/// the balance update.
#[derive(Debug, Clone)]
pub struct EntryCause {
    pub entry_type: EntryType,
    pub ref_type: RefType,
    pub ref_id: String,
    /// Present for transfer legs; `(ref_id, leg)` dedupes replays.
    pub leg: Option<Leg>,
    pub description: Option<String>,
}

/// Immutable journal record, append-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalEntry {
    pub id: EntryId,
    pub wallet_id: WalletId,
    pub user_id: UserId,
    pub tenant_id: TenantId,
    pub entry_type: EntryType,
    pub balance_kind: BalanceKind,
    /// Signed from the wallet's perspective.
    pub amount: Amount,
    /// Resulting balance after this entry.
    pub balance: Amount,
    pub currency: Currency,
    pub ref_type: RefType,
    pub ref_id: String,
    pub leg: Option<Leg>,
    pub description: Option<String>,
    pub created_at: i64,
}

/// Result of an `apply_balance_delta` commit.
#[derive(Debug, Clone)]
pub struct Posting {
    pub entry_id: EntryId,
    pub new_balance: Amount,
    /// True when the `(ref_id, leg)` was already posted and the recorded
    /// result was returned instead of mutating again.
    pub replayed: bool,
}

/// Replay a wallet's entries (creation order) for one balance kind from
/// zero. Returns the reconstructed balance, or the first entry whose
/// snapshot does not match the chain.
pub fn replay_balance(
    entries: &[JournalEntry],
    kind: BalanceKind,
) -> Result<Amount, Box<JournalEntry>> {
    let mut balance: Amount = 0;
    for entry in entries.iter().filter(|e| e.balance_kind == kind) {
        balance += entry.amount;
        if balance != entry.balance {
            return Err(Box::new(entry.clone()));
        }
    }
    Ok(balance)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_types::{Currency, EntryId, WalletId};

    fn entry(amount: Amount, balance: Amount, kind: BalanceKind) -> JournalEntry {
        JournalEntry {
            id: EntryId::new(),
            wallet_id: WalletId::new(),
            user_id: 1,
            tenant_id: "t".into(),
            entry_type: EntryType::Adjustment,
            balance_kind: kind,
            amount,
            balance,
            currency: Currency::parse("EUR").unwrap(),
            ref_type: RefType::Manual,
            ref_id: "r".into(),
            leg: None,
            description: None,
            created_at: 0,
        }
    }

    #[test]
    fn test_replay_consistent_chain() {
        let entries = vec![
            entry(100, 100, BalanceKind::Real),
            entry(-30, 70, BalanceKind::Real),
            entry(50, 50, BalanceKind::Bonus),
            entry(5, 75, BalanceKind::Real),
        ];
        assert_eq!(replay_balance(&entries, BalanceKind::Real).unwrap(), 75);
        assert_eq!(replay_balance(&entries, BalanceKind::Bonus).unwrap(), 50);
    }

    #[test]
    fn test_replay_detects_broken_snapshot() {
        let entries = vec![
            entry(100, 100, BalanceKind::Real),
            entry(-30, 80, BalanceKind::Real), // snapshot lies
        ];
        let bad = replay_balance(&entries, BalanceKind::Real).unwrap_err();
        assert_eq!(bad.balance, 80);
    }

    #[test]
    fn test_entry_type_roundtrip() {
        for t in [
            EntryType::Deposit,
            EntryType::Withdrawal,
            EntryType::TransferIn,
            EntryType::TransferOut,
            EntryType::Bet,
            EntryType::Win,
            EntryType::BonusCredit,
            EntryType::Fee,
            EntryType::Reversal,
            EntryType::Adjustment,
        ] {
            assert_eq!(EntryType::parse(t.as_str()), Some(t));
        }
        assert_eq!(EntryType::parse("rollover"), None);
    }

    #[test]
    fn test_leg_roundtrip() {
        for l in [Leg::Debit, Leg::Credit, Leg::Fee, Leg::Reversal] {
            assert_eq!(Leg::parse(l.as_str()), Some(l));
        }
    }
}
