//! sngate - MQTT-SN gateway to an MQTT broker
//!
//! Terminates MQTT-SN sensor-network clients on one side, speaks MQTT to
//! an upstream broker on the other, and translates between the two while
//! keeping per-client session state.

pub mod client;
pub mod codec;
pub mod config;
pub mod event;
pub mod forwarder;
pub mod gateway;
pub mod mqtt;
pub mod protocol;
pub mod qosm1;
pub mod transport;
pub mod uplink;

pub use client::{ClientHandle, ClientId, ClientRegistry};
pub use config::Config;
pub use event::{Event, EventQueue};
pub use forwarder::ForwarderTable;
pub use gateway::{Gateway, ShutdownHandle};
pub use mqtt::{MqttPacket, MqttVersion};
pub use protocol::{GatewayError, SnPacket};
pub use qosm1::QoSm1Proxy;
pub use transport::{SensorAddress, SensorNetwork, UdpSensorNetwork};
