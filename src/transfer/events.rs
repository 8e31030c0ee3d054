//! Approved-transfer event hook.
//!
//! In-process broadcast, best-effort: publishing never blocks or fails the
//! transfer, and a slow subscriber only loses its own backlog.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::core_types::{Amount, Currency, TenantId, TransferId, UserId};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferApproved {
    pub transfer_id: TransferId,
    pub tenant_id: TenantId,
    pub from_user_id: UserId,
    pub to_user_id: UserId,
    pub amount: Amount,
    pub fee_amount: Amount,
    pub currency: Currency,
    pub approved_at: i64,
}

#[derive(Clone)]
pub struct TransferEvents {
    tx: broadcast::Sender<TransferApproved>,
}

impl TransferEvents {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TransferApproved> {
        self.tx.subscribe()
    }

    /// Publish to current subscribers. A send error only means nobody is
    /// listening, which is fine.
    pub fn publish(&self, event: TransferApproved) {
        let _ = self.tx.send(event);
    }
}

impl Default for TransferEvents {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_without_subscribers_is_fine() {
        let events = TransferEvents::new(4);
        events.publish(sample());
    }

    #[tokio::test]
    async fn test_subscriber_receives_event() {
        let events = TransferEvents::new(4);
        let mut rx = events.subscribe();
        let ev = sample();
        events.publish(ev.clone());
        let got = rx.recv().await.unwrap();
        assert_eq!(got.transfer_id, ev.transfer_id);
        assert_eq!(got.amount, 1000);
    }

    fn sample() -> TransferApproved {
        TransferApproved {
            transfer_id: TransferId::new(),
            tenant_id: "t".into(),
            from_user_id: 1,
            to_user_id: 2,
            amount: 1000,
            fee_amount: 29,
            currency: Currency::parse("EUR").unwrap(),
            approved_at: 0,
        }
    }
}
