//! Event-queue fabric
//!
//! Bounded FIFO queues decouple the network receivers from the packet
//! handler and the two sender tasks. `post` awaits when the queue is full -
//! that is the backpressure coupling ingress rate to handler progress.
//! Every event owns its packet payload and is consumed exactly once.

use tokio::sync::mpsc;

use crate::client::ClientHandle;
use crate::mqtt::MqttPacket;
use crate::protocol::SnPacket;

/// Timer expirations delivered through the event fabric
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutKind {
    /// 1.5 x keep-alive elapsed without traffic from the client
    KeepAlive,
    /// Grace period after Lost, or an ephemeral slot past its lifetime;
    /// the handler garbage-collects the registry slot
    Expire,
}

/// One unit of work flowing between tasks
#[derive(Debug)]
pub enum Event {
    /// Packet from a client, bound for the handler
    ClientRecv(ClientHandle, SnPacket),
    /// Packet from the handler, bound for a client
    ClientSend(ClientHandle, SnPacket),
    /// Packet from the broker, bound for the handler
    BrokerRecv(ClientHandle, MqttPacket),
    /// Packet from the handler, bound for the broker
    BrokerSend(ClientHandle, MqttPacket),
    /// Sensor-net broadcast (SEARCHGW in, ADVERTISE/GWINFO out)
    Broadcast(SnPacket),
    /// Timer expiry for a client
    Timeout(ClientHandle, TimeoutKind),
}

/// Posting half of a bounded event queue. Cloneable for multi-producer
/// queues (both recv tasks feed packet-events).
#[derive(Clone)]
pub struct EventQueue {
    tx: mpsc::Sender<Event>,
}

/// Consuming half; single consumer per queue
pub struct EventReceiver {
    rx: mpsc::Receiver<Event>,
}

impl EventQueue {
    /// Create a bounded queue pair
    pub fn bounded(capacity: usize) -> (EventQueue, EventReceiver) {
        let (tx, rx) = mpsc::channel(capacity);
        (EventQueue { tx }, EventReceiver { rx })
    }

    /// Post an event, awaiting while the queue is full. Returns `false`
    /// when the consumer is gone (shutdown in progress) and the event was
    /// dropped.
    pub async fn post(&self, event: Event) -> bool {
        self.tx.send(event).await.is_ok()
    }

    /// Post without blocking; used only for droppable broadcast traffic
    /// under overload. Unicast events always go through `post`.
    pub fn try_post(&self, event: Event) -> bool {
        self.tx.try_send(event).is_ok()
    }
}

impl EventReceiver {
    /// Take the next event; `None` once every producer is gone
    pub async fn take(&mut self) -> Option<Event> {
        self.rx.recv().await
    }
}
