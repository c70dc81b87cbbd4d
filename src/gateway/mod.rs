//! Gateway core
//!
//! The composition root: builds the registries, the proxy, the uplink
//! table and the event queues, then spawns the long-running tasks
//! (ClientRecv, PacketHandler, ClientSend, BrokerSend, the keep-alive
//! timer and the ADVERTISE beacon). Everything is passed by handle; there
//! is no ambient global state.

mod broker_send;
mod client_recv;
mod client_send;
mod connection;
mod handler;
mod publish;
mod timer;

use std::fs::File;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{info, warn};

use crate::client::{
    load_predefined_topics, load_roster, ClientId, ClientKind, ClientLocation, ClientRegistry,
};
use crate::config::Config;
use crate::event::{EventQueue, EventReceiver};
use crate::forwarder::ForwarderTable;
use crate::mqtt::MqttVersion;
use crate::protocol::GatewayError;
use crate::qosm1::QoSm1Proxy;
use crate::transport::{SensorAddress, SensorNetwork};
use crate::uplink::LinkTable;

/// Runtime gateway parameters distilled from configuration
#[derive(Debug, Clone)]
pub struct GatewayParams {
    pub gateway_id: u8,
    /// Seconds between ADVERTISE broadcasts
    pub advertise_interval: u16,
    pub mqtt_version: MqttVersion,
    pub login_id: Option<String>,
    pub password: Option<Bytes>,
    pub client_authentication: bool,
    pub aggregator: bool,
    pub client_id_to_user_password: bool,
    pub imei_len: usize,
    pub pw_len: usize,
    pub shutdown_deadline: Duration,
}

impl GatewayParams {
    fn from_config(config: &Config) -> Result<Self, GatewayError> {
        let mqtt_version = MqttVersion::from_u8(config.gateway.mqtt_version)
            .ok_or(GatewayError::ProtocolViolation("unsupported mqtt version"))?;
        Ok(Self {
            gateway_id: config.gateway.gateway_id,
            advertise_interval: config.gateway.keep_alive,
            mqtt_version,
            login_id: config.gateway.login_id.clone(),
            password: config
                .gateway
                .password
                .as_ref()
                .map(|p| Bytes::copy_from_slice(p.as_bytes())),
            client_authentication: config.gateway.client_authentication,
            aggregator: config.gateway.aggregator,
            client_id_to_user_password: config.gateway.client_id_to_user_password,
            imei_len: config.gateway.imei_len,
            pw_len: config.gateway.pw_len,
            shutdown_deadline: config.gateway.shutdown_deadline,
        })
    }

    /// Client kind selected for new direct clients
    pub fn client_kind(&self) -> ClientKind {
        if self.aggregator {
            ClientKind::Aggregator
        } else {
            ClientKind::Transparent
        }
    }

    /// Client kind selected for new forwarded clients
    pub fn forwarded_client_kind(&self) -> ClientKind {
        if self.aggregator {
            ClientKind::ForwardedAggregator
        } else {
            ClientKind::ForwardedTransparent
        }
    }
}

/// Shared state handed to every task
pub struct GatewayContext {
    pub params: GatewayParams,
    pub registry: ClientRegistry,
    pub forwarders: ForwarderTable,
    pub proxy: QoSm1Proxy,
    pub links: LinkTable,
    /// Both recv tasks -> handler
    pub packet_events: EventQueue,
    /// Handler -> client sender
    pub client_send: EventQueue,
    /// Handler -> broker sender
    pub broker_send: EventQueue,
}

/// Handle for requesting shutdown from outside the gateway
#[derive(Clone)]
pub struct ShutdownHandle {
    tx: broadcast::Sender<()>,
}

impl ShutdownHandle {
    pub fn shutdown(&self) {
        let _ = self.tx.send(());
    }
}

/// The assembled gateway, ready to run
pub struct Gateway {
    ctx: Arc<GatewayContext>,
    shutdown: broadcast::Sender<()>,
    packet_events_rx: EventReceiver,
    client_send_rx: EventReceiver,
    broker_send_rx: EventReceiver,
}

impl Gateway {
    /// Build the gateway from configuration: registries, roster,
    /// pre-defined topics, forwarders and the QoS -1 proxy.
    pub fn new(config: &Config) -> Result<Self, GatewayError> {
        let params = GatewayParams::from_config(config)?;
        let (shutdown, _) = broadcast::channel(1);

        let (packet_events, packet_events_rx) = EventQueue::bounded(config.queues.packet_events);
        let (client_send, client_send_rx) = EventQueue::bounded(config.queues.client_send);
        let (broker_send, broker_send_rx) = EventQueue::bounded(config.queues.broker_send);

        let registry = ClientRegistry::new(config.gateway.max_clients);

        // Pre-defined topics load before the roster so pre-created clients
        // pick up the wildcard bindings.
        let mut per_client_topics = Vec::new();
        if let Some(path) = &config.gateway.predefined_topics_file {
            let entries = load_predefined_topics(File::open(path)?)?;
            let mut global = Vec::new();
            for entry in entries {
                match entry.client_id {
                    None => global.push((entry.topic_id, entry.topic_name)),
                    Some(id) => per_client_topics.push((id, entry.topic_id, entry.topic_name)),
                }
            }
            registry.set_global_predefined(global);
        }

        if let Some(path) = &config.gateway.roster_file {
            let entries = load_roster(File::open(path)?)?;
            if config.gateway.client_authentication {
                registry.set_roster(entries.iter().map(|e| e.id.clone()));
            }
            for entry in &entries {
                let location = match entry.address {
                    Some(addr) => ClientLocation::Direct(addr),
                    None => ClientLocation::Unbound,
                };
                if let Err(e) = registry.create(location, entry.id.clone(), entry.kind) {
                    warn!("roster client {} skipped: {}", entry.id, e);
                }
            }
            info!("roster loaded: {} clients", registry.len());
        } else if config.gateway.client_authentication {
            return Err(GatewayError::ProtocolViolation(
                "client_authentication requires a roster file",
            ));
        }

        for (client_id, topic_id, name) in per_client_topics {
            if let Some(handle) = registry.get_by_client_id(&client_id) {
                registry.with_mut(handle, |c| c.topics.add_predefined(topic_id, &name));
            } else {
                warn!("pre-defined topic for unknown client {}", client_id);
            }
        }

        let forwarders = ForwarderTable::new();
        for fwd in &config.forwarder {
            forwarders.declare(&fwd.name, SensorAddress::from(fwd.address));
        }

        // Synthetic QoS -1 clients are ordinary registry slots of kind
        // QoSm1; the proxy maps sender addresses onto them.
        let proxy = if config.gateway.qos_minus_one {
            let mut entries = Vec::new();
            for sender in &config.qos_minus_one_client {
                let handle = registry.create(
                    ClientLocation::Direct(SensorAddress::from(sender.address)),
                    ClientId::from(sender.name.as_str()),
                    ClientKind::QoSm1,
                )?;
                entries.push((SensorAddress::from(sender.address), sender.name.clone(), handle));
            }
            QoSm1Proxy::new(entries)
        } else {
            QoSm1Proxy::inactive()
        };

        let links = LinkTable::new(
            config.broker.address(),
            config.broker.connect_timeout,
            params.mqtt_version,
            params.aggregator,
            packet_events.clone(),
            shutdown.clone(),
        );

        let ctx = Arc::new(GatewayContext {
            params,
            registry,
            forwarders,
            proxy,
            links,
            packet_events,
            client_send,
            broker_send,
        });

        Ok(Self {
            ctx,
            shutdown,
            packet_events_rx,
            client_send_rx,
            broker_send_rx,
        })
    }

    pub fn context(&self) -> Arc<GatewayContext> {
        self.ctx.clone()
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            tx: self.shutdown.clone(),
        }
    }

    /// Spawn every task and run until shutdown is requested. Tasks are
    /// given the configured hard deadline to drain, then abandoned.
    pub async fn run(self, sensor: Arc<dyn SensorNetwork>) {
        let deadline = self.ctx.params.shutdown_deadline;
        let mut handles: Vec<JoinHandle<()>> = Vec::new();

        handles.push(tokio::spawn(client_recv::run(
            self.ctx.clone(),
            sensor.clone(),
            self.shutdown.subscribe(),
        )));
        handles.push(tokio::spawn(handler::run(
            self.ctx.clone(),
            self.packet_events_rx,
            self.shutdown.subscribe(),
        )));
        handles.push(tokio::spawn(client_send::run(
            self.ctx.clone(),
            sensor.clone(),
            self.client_send_rx,
            self.shutdown.subscribe(),
        )));
        handles.push(tokio::spawn(broker_send::run(
            self.ctx.clone(),
            self.broker_send_rx,
            self.shutdown.subscribe(),
        )));
        handles.push(tokio::spawn(timer::run(
            self.ctx.clone(),
            self.shutdown.subscribe(),
        )));
        handles.push(tokio::spawn(timer::advertise(
            self.ctx.clone(),
            self.shutdown.subscribe(),
        )));

        info!(
            "gateway {} running ({} mode)",
            self.ctx.params.gateway_id,
            if self.ctx.params.aggregator {
                "aggregator"
            } else {
                "transparent"
            }
        );

        // Park until shutdown is requested.
        let mut shutdown_rx = self.shutdown.subscribe();
        let _ = shutdown_rx.recv().await;
        info!("gateway stopping");

        for mut handle in handles {
            if timeout(deadline, &mut handle).await.is_err() {
                warn!("task did not stop within {:?}, abandoning", deadline);
                handle.abort();
            }
        }
    }
}
