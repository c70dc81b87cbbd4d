//! Broker uplink
//!
//! One TCP MQTT connection per client in transparent mode, one shared
//! connection in aggregator mode. The writer half is driven by the
//! BrokerSend task through a command channel; the reader half is its own
//! task pushing `BrokerRecv` events into packet-events, which makes it the
//! BrokerRecv task of the pipeline (one per link).

use std::io;
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc};
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::client::ClientHandle;
use crate::event::{Event, EventQueue};
use crate::mqtt::{MqttDecoder, MqttEncoder, MqttPacket, MqttVersion};

/// Uplink failure modes
#[derive(Debug)]
pub enum LinkError {
    /// TCP connect failed or timed out
    Unavailable,
    /// Link was established once but its tasks have stopped
    Closed,
    /// Socket error mid-session
    Io(io::Error),
}

impl std::fmt::Display for LinkError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LinkError::Unavailable => write!(f, "broker unavailable"),
            LinkError::Closed => write!(f, "broker link closed"),
            LinkError::Io(e) => write!(f, "broker link IO error: {}", e),
        }
    }
}

impl std::error::Error for LinkError {}

impl From<io::Error> for LinkError {
    fn from(e: io::Error) -> Self {
        LinkError::Io(e)
    }
}

/// Writer handle to one broker connection
pub struct BrokerLink {
    tx: mpsc::Sender<MqttPacket>,
}

impl BrokerLink {
    /// Connect and spawn the reader/writer pair. `owner` tags every
    /// inbound event; in aggregator mode it anchors the shared session and
    /// the handler re-routes publishes by subscription.
    pub async fn connect(
        address: &str,
        connect_timeout: Duration,
        version: MqttVersion,
        owner: ClientHandle,
        packet_events: EventQueue,
        shutdown: broadcast::Sender<()>,
    ) -> Result<Self, LinkError> {
        let stream = timeout(connect_timeout, TcpStream::connect(address))
            .await
            .map_err(|_| LinkError::Unavailable)?
            .map_err(|_| LinkError::Unavailable)?;
        stream.set_nodelay(true).ok();
        debug!("broker link up for {:?} -> {}", owner, address);

        let (mut read_half, mut write_half) = stream.into_split();
        let (tx, mut rx) = mpsc::channel::<MqttPacket>(64);

        // Writer: serialize packets from the BrokerSend task. A DISCONNECT
        // closes the stream after the write (a disconnected
        // client holds no broker socket).
        let mut writer_shutdown = shutdown.subscribe();
        tokio::spawn(async move {
            let encoder = MqttEncoder::new(version);
            let mut buf = BytesMut::with_capacity(1024);
            loop {
                tokio::select! {
                    biased;

                    _ = writer_shutdown.recv() => break,
                    packet = rx.recv() => {
                        let Some(packet) = packet else { break };
                        let is_disconnect = matches!(packet, MqttPacket::Disconnect);
                        buf.clear();
                        if encoder.encode(&packet, &mut buf).is_err() {
                            warn!("uplink encode failed for {}", packet.name());
                            continue;
                        }
                        if let Err(e) = write_half.write_all(&buf).await {
                            debug!("uplink write failed: {}", e);
                            break;
                        }
                        if is_disconnect {
                            let _ = write_half.shutdown().await;
                            break;
                        }
                    }
                }
            }
        });

        // Reader: this is the BrokerRecv task for this link. EOF is
        // surfaced to the handler as a broker DISCONNECT so the state
        // machine sees broker-initiated teardown uniformly.
        let mut reader_shutdown = shutdown.subscribe();
        tokio::spawn(async move {
            let decoder = MqttDecoder::new(version);
            let mut buf = BytesMut::with_capacity(4096);
            'outer: loop {
                tokio::select! {
                    biased;

                    _ = reader_shutdown.recv() => break,
                    result = read_half.read_buf(&mut buf) => {
                        match result {
                            Ok(0) => {
                                debug!("broker closed the link for {:?}", owner);
                                let _ = packet_events
                                    .post(Event::BrokerRecv(owner, MqttPacket::Disconnect))
                                    .await;
                                break;
                            }
                            Ok(_) => loop {
                                match decoder.decode(&buf) {
                                    Ok(Some((packet, consumed))) => {
                                        let _ = buf.split_to(consumed);
                                        if !packet_events
                                            .post(Event::BrokerRecv(owner, packet))
                                            .await
                                        {
                                            break 'outer;
                                        }
                                    }
                                    Ok(None) => break,
                                    Err(e) => {
                                        warn!("uplink decode error: {}", e);
                                        break 'outer;
                                    }
                                }
                            },
                            Err(e) => {
                                debug!("uplink read failed: {}", e);
                                break;
                            }
                        }
                    }
                }
            }
        });

        Ok(Self { tx })
    }

    /// Queue a packet for the writer
    pub async fn send(&self, packet: MqttPacket) -> Result<(), LinkError> {
        self.tx.send(packet).await.map_err(|_| LinkError::Closed)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// The per-client (or shared) link table used by the BrokerSend task
pub struct LinkTable {
    address: String,
    connect_timeout: Duration,
    version: MqttVersion,
    aggregator: bool,
    links: DashMap<ClientHandle, Arc<BrokerLink>>,
    shared: Mutex<Option<Arc<BrokerLink>>>,
    packet_events: EventQueue,
    shutdown: broadcast::Sender<()>,
}

impl LinkTable {
    pub fn new(
        address: String,
        connect_timeout: Duration,
        version: MqttVersion,
        aggregator: bool,
        packet_events: EventQueue,
        shutdown: broadcast::Sender<()>,
    ) -> Self {
        Self {
            address,
            connect_timeout,
            version,
            aggregator,
            links: DashMap::new(),
            shared: Mutex::new(None),
            packet_events,
            shutdown,
        }
    }

    pub fn aggregator(&self) -> bool {
        self.aggregator
    }

    /// Resolve the link for a client, establishing it on first use
    pub async fn link_for(&self, client: ClientHandle) -> Result<Arc<BrokerLink>, LinkError> {
        if self.aggregator {
            {
                let shared = self.shared.lock();
                if let Some(link) = shared.as_ref() {
                    if !link.is_closed() {
                        return Ok(link.clone());
                    }
                }
            }
            let link = Arc::new(
                BrokerLink::connect(
                    &self.address,
                    self.connect_timeout,
                    self.version,
                    client,
                    self.packet_events.clone(),
                    self.shutdown.clone(),
                )
                .await?,
            );
            *self.shared.lock() = Some(link.clone());
            Ok(link)
        } else {
            if let Some(link) = self.links.get(&client) {
                if !link.is_closed() {
                    return Ok(link.clone());
                }
            }
            let link = Arc::new(
                BrokerLink::connect(
                    &self.address,
                    self.connect_timeout,
                    self.version,
                    client,
                    self.packet_events.clone(),
                    self.shutdown.clone(),
                )
                .await?,
            );
            self.links.insert(client, link.clone());
            Ok(link)
        }
    }

    /// Link for a client only if it already exists
    pub fn existing(&self, client: ClientHandle) -> Option<Arc<BrokerLink>> {
        if self.aggregator {
            self.shared.lock().clone()
        } else {
            self.links.get(&client).map(|l| l.clone())
        }
    }

    /// Drop a client's link (after MQTT DISCONNECT or keep-alive loss).
    /// The shared aggregator link outlives individual clients.
    pub fn drop_link(&self, client: ClientHandle) {
        if !self.aggregator {
            self.links.remove(&client);
        }
    }
}
