//! Client model and registry
//!
//! The registry owns every `Client`; tasks refer to clients through
//! `ClientHandle`, a stable index + generation pair. A stale handle (the
//! client was forgotten while an event referencing it was in flight)
//! resolves to `None` instead of dangling.

mod roster;
mod topics;

#[cfg(test)]
mod tests;

pub use roster::{load_predefined_topics, load_roster, PredefinedTopicEntry, RosterEntry};
pub use topics::TopicTable;

use std::borrow::Cow;
use std::collections::VecDeque;
use std::fmt;
use std::time::{Duration, Instant};

use ahash::{AHashMap, AHashSet};
use bytes::Bytes;
use parking_lot::RwLock;

use crate::mqtt::MqttPublish;
use crate::protocol::{GatewayError, SnPublish, SnQoS, WirelessNodeId};
use crate::transport::SensorAddress;

/// Opaque client identifier, at most 256 octets
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(Bytes);

impl ClientId {
    pub fn new(bytes: Bytes) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Printable form for logs and the MQTT CONNECT client id field
    pub fn as_str_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.0)
    }
}

impl From<&str> for ClientId {
    fn from(s: &str) -> Self {
        Self(Bytes::copy_from_slice(s.as_bytes()))
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str_lossy())
    }
}

impl fmt::Debug for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ClientId({})", self.as_str_lossy())
    }
}

/// Connection lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClientStatus {
    #[default]
    Disconnected,
    /// CONNECT(will=1) seen, WILLTOPICREQ sent
    AwaitingWillTopic,
    /// WILLTOPIC stored, WILLMSGREQ sent
    AwaitingWillMsg,
    /// MQTT CONNECT forwarded, broker CONNACK pending
    AwaitingConnack,
    Active,
    /// DISCONNECT(duration > 0) accepted
    Asleep,
    /// PINGREQ while asleep; sleep-queue replay in progress
    Awake,
    /// Keep-alive expired; pending garbage collection
    Lost,
}

impl ClientStatus {
    pub fn is_disconnected(self) -> bool {
        self == ClientStatus::Disconnected
    }

    pub fn is_sleeping(self) -> bool {
        matches!(self, ClientStatus::Asleep | ClientStatus::Awake)
    }

    /// In a state where broker-bound traffic is legal
    pub fn is_established(self) -> bool {
        matches!(self, ClientStatus::Active | ClientStatus::Asleep | ClientStatus::Awake)
    }
}

/// How the client reaches the gateway and how the gateway reaches the broker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientKind {
    /// Own broker connection, direct sensor-net address
    Transparent,
    /// Shared broker connection, direct sensor-net address
    Aggregator,
    /// Own broker connection, behind a forwarder
    ForwardedTransparent,
    /// Shared broker connection, behind a forwarder
    ForwardedAggregator,
    /// Synthetic client of the QoS -1 proxy
    QoSm1,
}

impl ClientKind {
    pub fn is_forwarded(self) -> bool {
        matches!(
            self,
            ClientKind::ForwardedTransparent | ClientKind::ForwardedAggregator
        )
    }

    pub fn is_aggregated(self) -> bool {
        matches!(
            self,
            ClientKind::Aggregator | ClientKind::ForwardedAggregator | ClientKind::QoSm1
        )
    }
}

/// L2 location: direct address or forwarder + wireless node,
/// fixed for the lifetime of the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientLocation {
    Direct(SensorAddress),
    Forwarded {
        forwarder: SensorAddress,
        node_id: WirelessNodeId,
    },
    /// Pre-registered from the roster without an address yet
    Unbound,
}

/// Will topic captured during the three-phase will setup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingWill {
    pub topic: String,
    pub qos: SnQoS,
    pub retain: bool,
    pub message: Option<Bytes>,
}

/// MQTT CONNECT under assembly across CONNECT/WILLTOPIC/WILLMSG
#[derive(Debug, Clone, Default)]
pub struct PendingConnect {
    pub clean_session: bool,
    pub keep_alive: u16,
    pub will: Option<PendingWill>,
}

/// A downstream PUBLISH parked while its REGISTER is unacknowledged
#[derive(Debug, Clone)]
pub struct HeldPublish {
    pub topic_id: u16,
    pub publish: SnPublish,
}

/// Per-client state. Mutated only by the packet handler (and the recv
/// dispatch path that creates it); other tasks read through the registry.
#[derive(Debug)]
pub struct Client {
    pub id: ClientId,
    pub kind: ClientKind,
    pub location: ClientLocation,
    pub status: ClientStatus,
    /// Negotiated keep-alive in seconds
    pub keep_alive: u16,
    /// Sleep duration from DISCONNECT(d), seconds
    pub sleep_duration: u16,
    /// True when the current session started with cleanSession=1
    pub fresh_session: bool,
    pub pending_connect: PendingConnect,
    /// True between WILLTOPIC receipt and WILLMSG receipt
    pub waiting_will_msg: bool,
    /// PINGRESP deferred until the sleep-queue replay drains
    pub ping_held: bool,
    /// Replayed sleep-queue events still in packet-events
    pub sleep_replay_pending: u32,
    /// Broker-to-client PUBLISHes buffered while asleep
    pub sleep_queue: VecDeque<MqttPublish>,
    pub topics: TopicTable,
    /// MsgId -> TopicId for gateway-originated REGISTERs in flight
    pub waited_pub_msgids: AHashMap<u16, u16>,
    /// MsgId -> TopicId for SUBSCRIBEs awaiting SUBACK (0 for wildcards)
    pub waited_sub_msgids: AHashMap<u16, u16>,
    /// Downstream PUBLISHes parked until their REGACK
    pub held_publishes: Vec<HeldPublish>,
    /// Topic filters this client subscribed to (aggregator routing)
    pub subscriptions: Vec<String>,
    /// PINGREQ forwarded to the broker, PINGRESP owed to the client
    pub awaiting_pingresp: bool,
    /// Upstream PUBLISHes accepted before the broker CONNACK arrived
    pub uplink_backlog: Vec<MqttPublish>,
    /// MsgId -> topic id field of upstream QoS>0 PUBLISHes, so the
    /// broker's PUBACK can echo the id back in the SN PUBACK
    pub inflight_pub_topics: AHashMap<u16, u16>,
    next_msg_id: u16,
    /// Last inbound packet from this client
    pub last_activity: Instant,
    /// Set when status became Lost, for grace-period GC
    pub lost_at: Option<Instant>,
    /// One-shot slot for the courtesy DISCONNECT; never indexed
    pub ephemeral: bool,
    pub created_at: Instant,
}

impl Client {
    fn new(id: ClientId, location: ClientLocation, kind: ClientKind) -> Self {
        Self {
            id,
            kind,
            location,
            status: ClientStatus::Disconnected,
            keep_alive: 0,
            sleep_duration: 0,
            fresh_session: false,
            pending_connect: PendingConnect::default(),
            waiting_will_msg: false,
            ping_held: false,
            sleep_replay_pending: 0,
            sleep_queue: VecDeque::new(),
            topics: TopicTable::new(),
            waited_pub_msgids: AHashMap::new(),
            waited_sub_msgids: AHashMap::new(),
            held_publishes: Vec::new(),
            subscriptions: Vec::new(),
            awaiting_pingresp: false,
            uplink_backlog: Vec::new(),
            inflight_pub_topics: AHashMap::new(),
            next_msg_id: 1,
            last_activity: Instant::now(),
            lost_at: None,
            ephemeral: false,
            created_at: Instant::now(),
        }
    }

    /// Next gateway-originated message id (REGISTER, broker-side acks)
    pub fn next_msg_id(&mut self) -> u16 {
        let id = self.next_msg_id;
        self.next_msg_id = if self.next_msg_id == u16::MAX {
            1
        } else {
            self.next_msg_id + 1
        };
        id
    }

    /// Keep-alive deadline: 1.5 x the negotiated value. Sleeping clients
    /// are monitored against their sleep duration instead.
    pub fn keep_alive_deadline(&self) -> Option<Duration> {
        let base = match self.status {
            ClientStatus::Active => self.keep_alive,
            ClientStatus::Asleep | ClientStatus::Awake => self.sleep_duration,
            _ => return None,
        };
        if base == 0 {
            return None;
        }
        Some(Duration::from_millis(base as u64 * 1500))
    }

    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }
}

/// Stable, copyable reference to a registry slot. Survives the client it
/// names being forgotten; resolution then yields `None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientHandle {
    index: u32,
    generation: u32,
}

struct Slot {
    generation: u32,
    client: Option<Client>,
}

struct Inner {
    slots: Vec<Slot>,
    free: Vec<u32>,
    by_id: AHashMap<ClientId, ClientHandle>,
    by_addr: AHashMap<SensorAddress, ClientHandle>,
    /// Non-ephemeral capacity
    capacity: usize,
    live: usize,
    /// When present, only listed ids may connect
    roster: Option<AHashSet<ClientId>>,
    /// Pre-defined topics applying to every client
    global_predefined: Vec<(u16, String)>,
}

/// The client registry: both indexes are kept mutually consistent
/// (invariant: `get_by_client_id(c.id) == c` iff
/// `get_by_address(c.address) == c` for direct clients).
pub struct ClientRegistry {
    inner: RwLock<Inner>,
}

impl ClientRegistry {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: RwLock::new(Inner {
                slots: Vec::new(),
                free: Vec::new(),
                by_id: AHashMap::new(),
                by_addr: AHashMap::new(),
                capacity,
                live: 0,
                roster: None,
                global_predefined: Vec::new(),
            }),
        }
    }

    /// Install the authorization roster; `create` rejects unlisted ids
    /// from then on.
    pub fn set_roster(&self, ids: impl IntoIterator<Item = ClientId>) {
        self.inner.write().roster = Some(ids.into_iter().collect());
    }

    /// Pre-defined topic bindings applied to every client at creation
    pub fn set_global_predefined(&self, topics: Vec<(u16, String)>) {
        let mut inner = self.inner.write();
        inner.global_predefined = topics;
    }

    pub fn get_by_address(&self, addr: SensorAddress) -> Option<ClientHandle> {
        self.inner.read().by_addr.get(&addr).copied()
    }

    pub fn get_by_client_id(&self, id: &ClientId) -> Option<ClientHandle> {
        self.inner.read().by_id.get(id).copied()
    }

    /// Create a client. Fails with `AuthRejected` when a roster is present
    /// and the id is unlisted, `RegistryFull` when capacity is exhausted.
    pub fn create(
        &self,
        location: ClientLocation,
        id: ClientId,
        kind: ClientKind,
    ) -> Result<ClientHandle, GatewayError> {
        let mut inner = self.inner.write();
        if let Some(roster) = &inner.roster {
            if !roster.contains(&id) {
                return Err(GatewayError::AuthRejected);
            }
        }
        if inner.live >= inner.capacity {
            return Err(GatewayError::RegistryFull);
        }
        if inner.by_id.contains_key(&id) {
            // At most one client may exist per id
            return Err(GatewayError::ProtocolViolation("duplicate client id"));
        }

        let mut client = Client::new(id.clone(), location.clone(), kind);
        for (topic_id, name) in &inner.global_predefined {
            client.topics.add_predefined(*topic_id, name);
        }

        let handle = Self::insert(&mut inner, client);
        inner.live += 1;
        inner.by_id.insert(id, handle);
        if let ClientLocation::Direct(addr) = location {
            inner.by_addr.insert(addr, handle);
        }
        Ok(handle)
    }

    /// Allocate a one-shot slot bound to a sender address, used to answer
    /// unknown senders. Not indexed, not counted against capacity; reaped
    /// by the timer wheel after its grace period.
    pub fn create_ephemeral(&self, addr: SensorAddress) -> ClientHandle {
        let mut inner = self.inner.write();
        let mut client = Client::new(
            ClientId::from("?"),
            ClientLocation::Direct(addr),
            ClientKind::Transparent,
        );
        client.ephemeral = true;
        Self::insert(&mut inner, client)
    }

    fn insert(inner: &mut Inner, client: Client) -> ClientHandle {
        if let Some(index) = inner.free.pop() {
            let slot = &mut inner.slots[index as usize];
            slot.client = Some(client);
            ClientHandle {
                index,
                generation: slot.generation,
            }
        } else {
            let index = inner.slots.len() as u32;
            inner.slots.push(Slot {
                generation: 0,
                client: Some(client),
            });
            ClientHandle {
                index,
                generation: 0,
            }
        }
    }

    /// Remove a client from both indexes and invalidate its handle.
    /// Outstanding events referencing it resolve to `None` afterwards.
    pub fn forget(&self, handle: ClientHandle) {
        let mut inner = self.inner.write();
        let Some(slot) = inner.slots.get_mut(handle.index as usize) else {
            return;
        };
        if slot.generation != handle.generation {
            return;
        }
        let Some(client) = slot.client.take() else {
            return;
        };
        slot.generation = slot.generation.wrapping_add(1);

        if !client.ephemeral {
            inner.live -= 1;
            inner.by_id.remove(&client.id);
        }
        if let ClientLocation::Direct(addr) = client.location {
            if inner.by_addr.get(&addr) == Some(&handle) {
                inner.by_addr.remove(&addr);
            }
        }
        inner.free.push(handle.index);
    }

    /// Re-bind a direct client to a new sender address. Forwarded clients
    /// never rebind.
    pub fn rebind_address(&self, handle: ClientHandle, addr: SensorAddress) -> bool {
        let mut inner = self.inner.write();
        let Some(slot) = inner.slots.get_mut(handle.index as usize) else {
            return false;
        };
        if slot.generation != handle.generation {
            return false;
        }
        let Some(client) = slot.client.as_mut() else {
            return false;
        };
        let old = match &client.location {
            ClientLocation::Direct(a) => Some(*a),
            ClientLocation::Unbound => None,
            ClientLocation::Forwarded { .. } => return false,
        };
        client.location = ClientLocation::Direct(addr);
        if let Some(old) = old {
            if inner.by_addr.get(&old) == Some(&handle) {
                inner.by_addr.remove(&old);
            }
        }
        inner.by_addr.insert(addr, handle);
        true
    }

    /// Read access to a client; `None` for a stale handle
    pub fn with<R>(&self, handle: ClientHandle, f: impl FnOnce(&Client) -> R) -> Option<R> {
        let inner = self.inner.read();
        let slot = inner.slots.get(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        slot.client.as_ref().map(f)
    }

    /// Write access to a client; handler-side only
    pub fn with_mut<R>(&self, handle: ClientHandle, f: impl FnOnce(&mut Client) -> R) -> Option<R> {
        let mut inner = self.inner.write();
        let slot = inner.slots.get_mut(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        slot.client.as_mut().map(f)
    }

    /// Visit every live client (timer-wheel scan)
    pub fn for_each(&self, mut f: impl FnMut(ClientHandle, &Client)) {
        let inner = self.inner.read();
        for (index, slot) in inner.slots.iter().enumerate() {
            if let Some(client) = &slot.client {
                f(
                    ClientHandle {
                        index: index as u32,
                        generation: slot.generation,
                    },
                    client,
                );
            }
        }
    }

    /// Live non-ephemeral clients
    pub fn len(&self) -> usize {
        self.inner.read().live
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
