//! Transfer lifecycle phases.
//!
//! Phase ids are persisted as SMALLINT. Callers only ever see the four
//! public statuses; the finer-grained phase records how far leg execution
//! got, which is what recovery keys off.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Internal transfer phase.
///
/// ```text
/// PENDING → DEBIT_PENDING → DEBIT_POSTED → CREDIT_PENDING → APPROVED
///                 ↓                              ↓
///              FAILED                     COMPENSATING → FAILED
/// PENDING → CANCELED
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i16)]
pub enum TransferPhase {
    /// Created and validated; no funds moved yet.
    Pending = 0,

    /// Debit leg initiated (persisted before posting).
    DebitPending = 10,

    /// Debit leg committed. Funds are in flight: must reach APPROVED or be
    /// compensated.
    DebitPosted = 20,

    /// Credit leg initiated (persisted before posting).
    CreditPending = 30,

    /// Terminal: both legs (and the fee leg, if any) durably applied.
    Approved = 40,

    /// Terminal: no net funds movement remains.
    Failed = -10,

    /// Compensation in progress (refunding the source).
    Compensating = -20,

    /// Terminal: canceled before any leg was posted.
    Canceled = -30,
}

impl TransferPhase {
    /// No more transitions possible.
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransferPhase::Approved | TransferPhase::Failed | TransferPhase::Canceled
        )
    }

    /// Debit committed but outcome not yet settled.
    #[inline]
    pub fn is_in_flight(&self) -> bool {
        matches!(
            self,
            TransferPhase::DebitPosted | TransferPhase::CreditPending | TransferPhase::Compensating
        )
    }

    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            0 => Some(TransferPhase::Pending),
            10 => Some(TransferPhase::DebitPending),
            20 => Some(TransferPhase::DebitPosted),
            30 => Some(TransferPhase::CreditPending),
            40 => Some(TransferPhase::Approved),
            -10 => Some(TransferPhase::Failed),
            -20 => Some(TransferPhase::Compensating),
            -30 => Some(TransferPhase::Canceled),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransferPhase::Pending => "PENDING",
            TransferPhase::DebitPending => "DEBIT_PENDING",
            TransferPhase::DebitPosted => "DEBIT_POSTED",
            TransferPhase::CreditPending => "CREDIT_PENDING",
            TransferPhase::Approved => "APPROVED",
            TransferPhase::Failed => "FAILED",
            TransferPhase::Compensating => "COMPENSATING",
            TransferPhase::Canceled => "CANCELED",
        }
    }

    /// Public lifecycle status for this phase.
    pub fn status(&self) -> TransferStatus {
        match self {
            TransferPhase::Approved => TransferStatus::Approved,
            TransferPhase::Failed => TransferStatus::Failed,
            TransferPhase::Canceled => TransferStatus::Canceled,
            _ => TransferStatus::Pending,
        }
    }
}

impl fmt::Display for TransferPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Caller-visible transfer status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferStatus {
    Pending,
    Approved,
    Failed,
    Canceled,
}

impl TransferStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferStatus::Pending => "pending",
            TransferStatus::Approved => "approved",
            TransferStatus::Failed => "failed",
            TransferStatus::Canceled => "canceled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(TransferStatus::Pending),
            "approved" => Some(TransferStatus::Approved),
            "failed" => Some(TransferStatus::Failed),
            "canceled" => Some(TransferStatus::Canceled),
            _ => None,
        }
    }
}

impl fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [TransferPhase; 8] = [
        TransferPhase::Pending,
        TransferPhase::DebitPending,
        TransferPhase::DebitPosted,
        TransferPhase::CreditPending,
        TransferPhase::Approved,
        TransferPhase::Failed,
        TransferPhase::Compensating,
        TransferPhase::Canceled,
    ];

    #[test]
    fn test_terminal_phases() {
        assert!(TransferPhase::Approved.is_terminal());
        assert!(TransferPhase::Failed.is_terminal());
        assert!(TransferPhase::Canceled.is_terminal());
        assert!(!TransferPhase::Pending.is_terminal());
        assert!(!TransferPhase::DebitPosted.is_terminal());
        assert!(!TransferPhase::Compensating.is_terminal());
    }

    #[test]
    fn test_in_flight_phases() {
        assert!(TransferPhase::DebitPosted.is_in_flight());
        assert!(TransferPhase::CreditPending.is_in_flight());
        assert!(TransferPhase::Compensating.is_in_flight());
        assert!(!TransferPhase::Pending.is_in_flight());
        assert!(!TransferPhase::DebitPending.is_in_flight());
        assert!(!TransferPhase::Approved.is_in_flight());
    }

    #[test]
    fn test_phase_id_roundtrip() {
        for phase in ALL {
            assert_eq!(TransferPhase::from_id(phase.id()), Some(phase));
        }
        assert!(TransferPhase::from_id(99).is_none());
    }

    #[test]
    fn test_public_status_mapping() {
        assert_eq!(TransferPhase::Pending.status(), TransferStatus::Pending);
        assert_eq!(TransferPhase::DebitPosted.status(), TransferStatus::Pending);
        assert_eq!(
            TransferPhase::Compensating.status(),
            TransferStatus::Pending
        );
        assert_eq!(TransferPhase::Approved.status(), TransferStatus::Approved);
        assert_eq!(TransferPhase::Failed.status(), TransferStatus::Failed);
        assert_eq!(TransferPhase::Canceled.status(), TransferStatus::Canceled);
    }
}
