//! Cross-chain message transport between controllers.
//!
//! Each ordered (source, destination) pair of chain instances gets its own
//! lane. Messages on a lane arrive in the order they were sent; there is no
//! ordering across lanes. Delivery is a separate step so tests can deliver,
//! delay or drop messages one at a time, and the network can hand the lanes
//! to background relay tasks instead.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use ayara_gmp::{Address, ChainId, ControllerCall, CrossChainMessage};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::controller::{ControllerHandle, Receipt};
use crate::error::{ControllerError, Result};

/// Message handed to the transport by a controller.
#[derive(Debug, Clone)]
pub struct OutboundMessage {
    pub source_chain_id: ChainId,
    pub destination_chain_id: ChainId,
    pub source_controller: Address,
    pub transport_gas_limit: u64,
    pub call: ControllerCall,
}

/// Fire-and-forget transport. `send` only enqueues: a successful return
/// says nothing about delivery, and the sender never sees the outcome on
/// the destination.
pub trait CrossChainMessenger: Send + Sync {
    fn send(&self, message: OutboundMessage) -> Result<CrossChainMessage>;

    /// Whether a lane from `source` to `destination` exists.
    fn has_route(&self, source: ChainId, destination: ChainId) -> bool;
}

// ═══════════════════════════════════════════════════════════════════════════════
// CHANNEL MESSENGER
// ═══════════════════════════════════════════════════════════════════════════════

struct LaneSender {
    tx: mpsc::UnboundedSender<CrossChainMessage>,
    sequence: AtomicU64,
    pending: Arc<AtomicUsize>,
}

/// In-process messenger with one unbounded channel per ordered chain pair.
pub struct ChannelMessenger {
    lanes: HashMap<(ChainId, ChainId), LaneSender>,
}

impl ChannelMessenger {
    /// Messenger connecting every ordered pair of `chains`, with the
    /// receiving end of each lane.
    pub fn connect(chains: &[ChainId]) -> (Self, Vec<Lane>) {
        let mut lanes = HashMap::new();
        let mut receivers = Vec::new();
        for &source in chains {
            for &destination in chains {
                if source == destination {
                    continue;
                }
                let (tx, rx) = mpsc::unbounded_channel();
                let pending = Arc::new(AtomicUsize::new(0));
                lanes.insert(
                    (source, destination),
                    LaneSender {
                        tx,
                        sequence: AtomicU64::new(0),
                        pending: pending.clone(),
                    },
                );
                receivers.push(Lane {
                    source,
                    destination,
                    rx,
                    pending,
                });
            }
        }
        receivers.sort_by_key(|lane| (lane.source, lane.destination));
        (Self { lanes }, receivers)
    }
}

impl CrossChainMessenger for ChannelMessenger {
    fn send(&self, message: OutboundMessage) -> Result<CrossChainMessage> {
        let source = message.source_chain_id;
        let destination = message.destination_chain_id;
        let lane = self
            .lanes
            .get(&(source, destination))
            .ok_or(ControllerError::UnknownDestination(destination))?;

        let encoded_call = message.call.encode();
        let sequence = lane.sequence.fetch_add(1, Ordering::SeqCst);
        let envelope = CrossChainMessage {
            message_id: CrossChainMessage::compute_id(source, destination, sequence, &encoded_call),
            source_chain_id: source,
            destination_chain_id: destination,
            source_controller: message.source_controller,
            transport_gas_limit: message.transport_gas_limit,
            encoded_call,
        };

        lane.pending.fetch_add(1, Ordering::SeqCst);
        if lane.tx.send(envelope.clone()).is_err() {
            lane.pending.fetch_sub(1, Ordering::SeqCst);
            return Err(ControllerError::LaneClosed {
                source_chain_id: source,
                destination_chain_id: destination,
            });
        }

        debug!(
            message_id = %envelope.message_id,
            source,
            destination,
            sequence,
            "message enqueued"
        );
        Ok(envelope)
    }

    fn has_route(&self, source: ChainId, destination: ChainId) -> bool {
        self.lanes.contains_key(&(source, destination))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// LANES
// ═══════════════════════════════════════════════════════════════════════════════

/// Receiving end of one (source, destination) lane.
pub struct Lane {
    source: ChainId,
    destination: ChainId,
    rx: mpsc::UnboundedReceiver<CrossChainMessage>,
    pending: Arc<AtomicUsize>,
}

impl Lane {
    pub fn source(&self) -> ChainId {
        self.source
    }

    pub fn destination(&self) -> ChainId {
        self.destination
    }

    /// Messages sent but not yet taken off the lane
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// Take the next message without waiting.
    pub fn try_next(&mut self) -> Option<CrossChainMessage> {
        let message = self.rx.try_recv().ok()?;
        self.pending.fetch_sub(1, Ordering::SeqCst);
        Some(message)
    }

    /// Wait for the next message. `None` once every sender is gone.
    pub async fn recv(&mut self) -> Option<CrossChainMessage> {
        let message = self.rx.recv().await?;
        self.pending.fetch_sub(1, Ordering::SeqCst);
        Some(message)
    }

    /// Discard the next message as if the transport lost it.
    pub fn drop_next(&mut self) -> Option<CrossChainMessage> {
        let message = self.try_next()?;
        info!(message_id = %message.message_id, source = self.source, destination = self.destination, "message dropped");
        Some(message)
    }

    /// Deliver the next queued message to `destination`. `None` when the
    /// lane is empty.
    pub async fn deliver_next(&mut self, destination: &ControllerHandle) -> Option<Result<Receipt>> {
        let message = self.try_next()?;
        let mut controller = destination.lock().await;
        Some(controller.receive(message))
    }

    /// Deliver everything currently queued, in order.
    pub async fn deliver_all(&mut self, destination: &ControllerHandle) -> Vec<Result<Receipt>> {
        let mut results = Vec::new();
        while let Some(result) = self.deliver_next(destination).await {
            results.push(result);
        }
        results
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// RELAYS
// ═══════════════════════════════════════════════════════════════════════════════

/// Start one relay task per lane. Each task delivers its lane's messages in
/// order to the destination controller until the lane closes. Lanes whose
/// destination is not in `controllers` are skipped.
pub fn spawn_relays(
    lanes: Vec<Lane>,
    controllers: &HashMap<ChainId, ControllerHandle>,
) -> Vec<JoinHandle<()>> {
    let mut handles = Vec::with_capacity(lanes.len());
    for lane in lanes {
        let Some(destination) = controllers.get(&lane.destination).cloned() else {
            warn!(source = lane.source, destination = lane.destination, "no controller for lane, relay not started");
            continue;
        };
        handles.push(tokio::spawn(relay(lane, destination)));
    }
    handles
}

async fn relay(mut lane: Lane, destination: ControllerHandle) {
    info!(source = lane.source, destination = lane.destination, "relay started");
    while let Some(message) = lane.recv().await {
        let message_id = message.message_id;
        let result = destination.lock().await.receive(message);
        match result {
            Ok(receipt) => debug!(%message_id, ?receipt, "message delivered"),
            Err(e) => warn!(
                %message_id,
                source = lane.source,
                destination = lane.destination,
                code = e.code(),
                "delivery rejected: {}",
                e
            ),
        }
    }
    info!(source = lane.source, destination = lane.destination, "relay stopped");
}
