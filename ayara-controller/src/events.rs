//! Protocol events.
//!
//! Events are for observers and indexers. Nothing in the controller reads
//! them back to make decisions.

use ayara_gmp::{Address, Amount, ChainId, MessageId};
use serde::{Deserialize, Serialize};

/// Events emitted by a controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "PascalCase")]
pub enum Event {
    WalletCreated {
        owner: Address,
        wallet: Address,
    },
    WalletGasFunded {
        owner: Address,
        token: Address,
        amount: Amount,
    },
    WalletGasCharged {
        owner: Address,
        token: Address,
        max_fee: Amount,
        relayer_fee: Amount,
    },
    WalletGasLocked {
        owner: Address,
        token: Address,
        amount: Amount,
    },
    WalletGasUnlocked {
        owner: Address,
        token: Address,
        amount: Amount,
    },
    WalletGasSettled {
        owner: Address,
        token: Address,
        origin_chain_id: ChainId,
        allocated: Amount,
        used: Amount,
    },
    OperationExecuted {
        owner: Address,
        wallet: Address,
        target: Address,
        nonce: u64,
        success: bool,
    },
    OperationRejected {
        owner: Address,
        source_chain_id: ChainId,
        reason: String,
    },
    OperationExecutionSent {
        owner: Address,
        wallet: Address,
        destination_chain_id: ChainId,
        target: Address,
    },
    MessageSent {
        message_id: MessageId,
        destination_chain_id: ChainId,
    },
    MessageReceived {
        message_id: MessageId,
        source_chain_id: ChainId,
    },
    GasTokensModified {
        tokens: Vec<Address>,
        allowed: bool,
    },
}

impl Event {
    pub fn name(&self) -> &'static str {
        match self {
            Self::WalletCreated { .. } => "WalletCreated",
            Self::WalletGasFunded { .. } => "WalletGasFunded",
            Self::WalletGasCharged { .. } => "WalletGasCharged",
            Self::WalletGasLocked { .. } => "WalletGasLocked",
            Self::WalletGasUnlocked { .. } => "WalletGasUnlocked",
            Self::WalletGasSettled { .. } => "WalletGasSettled",
            Self::OperationExecuted { .. } => "OperationExecuted",
            Self::OperationRejected { .. } => "OperationRejected",
            Self::OperationExecutionSent { .. } => "OperationExecutionSent",
            Self::MessageSent { .. } => "MessageSent",
            Self::MessageReceived { .. } => "MessageReceived",
            Self::GasTokensModified { .. } => "GasTokensModified",
        }
    }
}

/// Event with its position in the controller's log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordedEvent {
    pub chain_id: ChainId,
    pub sequence: u64,
    #[serde(flatten)]
    pub event: Event,
}

/// Append-only event log of one controller.
#[derive(Debug, Clone)]
pub struct EventLog {
    chain_id: ChainId,
    events: Vec<RecordedEvent>,
}

impl EventLog {
    pub fn new(chain_id: ChainId) -> Self {
        Self {
            chain_id,
            events: Vec::new(),
        }
    }

    pub fn emit(&mut self, event: Event) {
        tracing::info!(chain_id = self.chain_id, event = event.name(), ?event, "ayara event");
        let sequence = self.events.len() as u64;
        self.events.push(RecordedEvent {
            chain_id: self.chain_id,
            sequence,
            event,
        });
    }

    pub fn all(&self) -> &[RecordedEvent] {
        &self.events
    }

    /// Events from `sequence` onwards.
    pub fn since(&self, sequence: u64) -> &[RecordedEvent] {
        let start = usize::try_from(sequence)
            .unwrap_or(usize::MAX)
            .min(self.events.len());
        &self.events[start..]
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.events.iter().map(|e| e.event.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}
