//! Transfer engine: two-sided value movement with a recoverable lifecycle.

pub mod engine;
pub mod events;
pub mod phase;
pub mod types;

pub use engine::{FeePolicy, TransferEngine};
pub use events::{TransferApproved, TransferEvents};
pub use phase::{TransferPhase, TransferStatus};
pub use types::{TransferRecord, TransferRequest};
