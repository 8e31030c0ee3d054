//! Core type definitions shared across the engine.
//!
//! Ids are ULID-backed newtypes: monotonic, sortable, and generated without
//! coordination, so journal entries can be ordered by id alone.

use std::fmt;
use std::str::FromStr;
use std::sync::{Mutex, OnceLock};

use serde::{Deserialize, Serialize};

/// Process-wide monotonic ULID source. `Ulid::new` alone only guarantees
/// ordering across milliseconds; the shared generator increments the random
/// component within one, so ids issued by this process strictly increase.
fn next_ulid() -> ulid::Ulid {
    static GEN: OnceLock<Mutex<ulid::Generator>> = OnceLock::new();
    let mut generator = GEN
        .get_or_init(|| Mutex::new(ulid::Generator::new()))
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner);
    // Overflow of the random component within a single millisecond; fall
    // back to a fresh (still unique) ULID.
    generator.generate().unwrap_or_else(|_| ulid::Ulid::new())
}

/// User identifier (owned by the external identity system).
pub type UserId = i64;

/// Tenant identifier. Wallets and external refs are scoped per tenant.
pub type TenantId = String;

/// Amount in integer minor units (cents, satoshi, ...). Signed so the same
/// type carries deltas; invariants live in the ledger, not the type.
pub type Amount = i64;

macro_rules! ulid_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(ulid::Ulid);

        impl $name {
            /// Generate a new unique id, monotonic within the process.
            pub fn new() -> Self {
                Self(next_ulid())
            }

            pub fn inner(&self) -> ulid::Ulid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = ulid::DecodeError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(ulid::Ulid::from_string(s)?))
            }
        }
    };
}

ulid_id!(
    /// Wallet identifier.
    WalletId
);
ulid_id!(
    /// Transfer identifier.
    TransferId
);
ulid_id!(
    /// Journal entry identifier.
    EntryId
);
ulid_id!(
    /// Deposit identifier.
    DepositId
);
ulid_id!(
    /// Withdrawal identifier.
    WithdrawalId
);

/// Which of the two parallel balances a mutation touches.
///
/// Real and bonus funds live in the same wallet but never mix: a delta is
/// applied to exactly one of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BalanceKind {
    Real,
    Bonus,
}

impl BalanceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BalanceKind::Real => "real",
            BalanceKind::Bonus => "bonus",
        }
    }

    pub fn from_str_loose(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "real" => Some(BalanceKind::Real),
            "bonus" => Some(BalanceKind::Bonus),
            _ => None,
        }
    }
}

impl fmt::Display for BalanceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// ISO-style currency code, normalized to uppercase.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Currency(String);

impl Currency {
    /// Parse and normalize a currency code. Accepts 3..=8 ASCII alphabetic
    /// characters (covers fiat codes and internal tokens like "POINTS").
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        if (3..=8).contains(&s.len()) && s.chars().all(|c| c.is_ascii_alphabetic()) {
            Some(Self(s.to_ascii_uppercase()))
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Caller role carried by the bearer credential.
///
/// Only `System` may create `allow_negative` wallets or invoke direct
/// wallet-funding mutations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Role {
    System,
    PaymentProvider,
    PaymentGateway,
    User,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::PaymentProvider => "payment-provider",
            Role::PaymentGateway => "payment-gateway",
            Role::User => "user",
        }
    }

    /// Roles trusted to move funds on behalf of the platform.
    pub fn is_operator(&self) -> bool {
        matches!(
            self,
            Role::System | Role::PaymentProvider | Role::PaymentGateway
        )
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Role {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "system" => Ok(Role::System),
            "payment-provider" => Ok(Role::PaymentProvider),
            "payment-gateway" => Ok(Role::PaymentGateway),
            "user" => Ok(Role::User),
            _ => Err(()),
        }
    }
}

/// Authenticated caller identity, resolved from the bearer token.
#[derive(Debug, Clone)]
pub struct Caller {
    pub user_id: UserId,
    pub tenant_id: TenantId,
    pub role: Role,
}

/// Current timestamp in UTC milliseconds.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
