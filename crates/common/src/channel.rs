//! Event sink abstraction and the async channel bridge to the protocol writer
//!
//! The sync engine reports changes through an [`EventSink`]. Sinks are called
//! from background contexts (the hotplug worker thread, blocking scan tasks),
//! so the channel-backed sink never blocks: the bridge is unbounded and the
//! protocol writer drains it from the Tokio runtime.

use async_channel::{Receiver, Sender, unbounded};
use protocol::Port;

/// Receiver of port changes and asynchronous errors
pub trait EventSink: Send + Sync {
    /// A port appeared since the previous scan
    fn on_port_added(&self, port: &Port);

    /// A port disappeared since the previous scan
    fn on_port_removed(&self, port: &Port);

    /// A failure happened after synchronization started
    fn on_error(&self, message: &str);
}

/// Event carried over the bridge
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    Added(Port),
    Removed(Port),
    Error(String),
}

/// Sink half of the bridge, handed to the sync engine
#[derive(Clone)]
pub struct ChannelSink {
    event_tx: Sender<SyncEvent>,
}

impl ChannelSink {
    fn send(&self, event: SyncEvent) {
        if let Err(e) = self.event_tx.try_send(event) {
            tracing::debug!("Dropping sync event, receiver gone: {}", e);
        }
    }
}

impl EventSink for ChannelSink {
    fn on_port_added(&self, port: &Port) {
        self.send(SyncEvent::Added(port.clone()));
    }

    fn on_port_removed(&self, port: &Port) {
        self.send(SyncEvent::Removed(port.clone()));
    }

    fn on_error(&self, message: &str) {
        self.send(SyncEvent::Error(message.to_string()));
    }
}

/// Receiving half of the bridge, drained by the protocol writer
pub struct EventReceiver {
    event_rx: Receiver<SyncEvent>,
}

impl EventReceiver {
    /// Receive the next event
    pub async fn recv(&self) -> crate::Result<SyncEvent> {
        self.event_rx
            .recv()
            .await
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }

    /// Try to receive an event without waiting
    pub fn try_recv(&self) -> Option<SyncEvent> {
        self.event_rx.try_recv().ok()
    }
}

/// Create the channel bridge between the sync engine and the protocol writer
///
/// Returns (ChannelSink for the engine, EventReceiver for the writer)
pub fn create_event_bridge() -> (ChannelSink, EventReceiver) {
    let (event_tx, event_rx) = unbounded();
    (ChannelSink { event_tx }, EventReceiver { event_rx })
}
