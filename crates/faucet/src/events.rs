//! Faucet notifications
//!
//! Every successful state change yields exactly one [`FaucetEvent`], which the
//! service fans out to subscribers over a broadcast channel.

use serde::{Deserialize, Serialize};
use spigot_common::types::amount_serde;
use spigot_common::Address;
use tokio::sync::broadcast;
use tracing::debug;

/// Event emitted by a successful faucet operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "PascalCase")]
pub enum FaucetEvent {
    /// `amount` wei sent to `recipient`.
    Dispensed {
        recipient: Address,
        #[serde(with = "amount_serde")]
        amount: u128,
    },
    /// Owner changed the rate limits.
    RateLimitsChanged {
        max_tx_per_hour: u32,
        time_limit_seconds: u64,
        actor: Address,
    },
    /// Owner withdrew the whole balance.
    FundsRetrieved {
        owner: Address,
        #[serde(with = "amount_serde")]
        amount: u128,
    },
    Paused { account: Address },
    Unpaused { account: Address },
    OwnershipTransferStarted {
        previous_owner: Address,
        new_owner: Address,
    },
    OwnershipTransferred {
        previous_owner: Address,
        new_owner: Address,
    },
    /// Funds sent to the faucet.
    Received {
        from: Address,
        #[serde(with = "amount_serde")]
        amount: u128,
    },
}

impl FaucetEvent {
    pub fn name(&self) -> &'static str {
        match self {
            FaucetEvent::Dispensed { .. } => "Dispensed",
            FaucetEvent::RateLimitsChanged { .. } => "RateLimitsChanged",
            FaucetEvent::FundsRetrieved { .. } => "FundsRetrieved",
            FaucetEvent::Paused { .. } => "Paused",
            FaucetEvent::Unpaused { .. } => "Unpaused",
            FaucetEvent::OwnershipTransferStarted { .. } => "OwnershipTransferStarted",
            FaucetEvent::OwnershipTransferred { .. } => "OwnershipTransferred",
            FaucetEvent::Received { .. } => "Received",
        }
    }
}

/// Event publisher for faucet events
pub struct EventPublisher {
    sender: broadcast::Sender<FaucetEvent>,
}

impl EventPublisher {
    /// Create new event publisher
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribe to all subsequent events
    pub fn subscribe(&self) -> broadcast::Receiver<FaucetEvent> {
        self.sender.subscribe()
    }

    /// Publish event to all subscribers
    pub fn publish(&self, event: FaucetEvent) {
        debug!("Publishing {} event", event.name());
        if let Err(e) = self.sender.send(event) {
            debug!("No subscribers to receive event: {:?}", e.0.name());
        }
    }
}

impl Default for EventPublisher {
    fn default() -> Self {
        Self::new(1024)
    }
}
