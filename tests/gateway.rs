//! Integration tests for the gateway core
//!
//! Drive the composed gateway over an in-memory sensor network against a
//! real TCP mock broker, and verify the handshake, dispatch, sleep and
//! proxy flows end to end.

use std::io;
use std::net::{SocketAddr, SocketAddrV4};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use smallvec::SmallVec;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, Mutex};
use tokio::time::timeout;

use sngate::codec::{decode, encode};
use sngate::config::{Config, ForwarderConfig, QoSm1ClientConfig};
use sngate::gateway::{Gateway, GatewayContext, ShutdownHandle};
use sngate::mqtt::{MqttDecoder, MqttEncoder, MqttPacket, MqttSubAck, MqttVersion};
use sngate::mqtt::{MqttConnAck, MqttPublish, QoS};
use sngate::protocol::{
    Encapsulated, ReturnCode, SnConnect, SnDisconnect, SnPacket, SnPingReq, SnPublish, SnQoS,
    SnSubscribe, SnTopic, SnTopicFilter, SnUnsubscribe,
};
use sngate::transport::{SensorAddress, SensorNetwork};

const RECV_TIMEOUT: Duration = Duration::from_secs(5);

fn addr(n: u8) -> SensorAddress {
    let sock: SocketAddrV4 = format!("10.1.1.{}:2000", n).parse().unwrap();
    SensorAddress::from(sock)
}

// ============================================================================
// In-memory sensor network
// ============================================================================

struct MemorySensorNet {
    inbound: Mutex<mpsc::Receiver<(SensorAddress, Bytes)>>,
    outbound: mpsc::UnboundedSender<(Option<SensorAddress>, Bytes)>,
}

#[async_trait]
impl SensorNetwork for MemorySensorNet {
    async fn recv(&self) -> io::Result<(SensorAddress, Bytes)> {
        self.inbound
            .lock()
            .await
            .recv()
            .await
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "test net closed"))
    }

    async fn unicast(&self, addr: SensorAddress, data: &[u8]) -> io::Result<()> {
        let _ = self
            .outbound
            .send((Some(addr), Bytes::copy_from_slice(data)));
        Ok(())
    }

    async fn broadcast(&self, data: &[u8]) -> io::Result<()> {
        let _ = self.outbound.send((None, Bytes::copy_from_slice(data)));
        Ok(())
    }
}

// ============================================================================
// Mock MQTT broker
// ============================================================================

struct BrokerConn {
    rx: mpsc::Receiver<MqttPacket>,
    tx: mpsc::Sender<MqttPacket>,
}

impl BrokerConn {
    async fn expect(&mut self) -> MqttPacket {
        timeout(RECV_TIMEOUT, self.rx.recv())
            .await
            .expect("timed out waiting for a broker-bound packet")
            .expect("broker connection closed")
    }

    async fn send(&self, packet: MqttPacket) {
        self.tx.send(packet).await.expect("mock broker writer gone");
    }

    async fn connack(&self, code: u8) {
        self.send(MqttPacket::ConnAck(MqttConnAck {
            session_present: false,
            code,
        }))
        .await;
    }
}

struct MockBroker {
    addr: SocketAddr,
    conns: mpsc::Receiver<BrokerConn>,
}

impl MockBroker {
    async fn accept(&mut self) -> BrokerConn {
        timeout(RECV_TIMEOUT, self.conns.recv())
            .await
            .expect("timed out waiting for a broker connection")
            .expect("mock broker stopped")
    }

    async fn expect_no_connection(&mut self, wait: Duration) {
        assert!(
            timeout(wait, self.conns.recv()).await.is_err(),
            "unexpected broker connection"
        );
    }
}

async fn spawn_mock_broker() -> MockBroker {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (conn_tx, conn_rx) = mpsc::channel(8);

    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                break;
            };
            let (pkt_tx, pkt_rx) = mpsc::channel(64);
            let (out_tx, mut out_rx) = mpsc::channel::<MqttPacket>(64);
            let (mut read_half, mut write_half) = stream.into_split();

            tokio::spawn(async move {
                let decoder = MqttDecoder::new(MqttVersion::V311);
                let mut buf = BytesMut::with_capacity(4096);
                loop {
                    match read_half.read_buf(&mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(_) => {
                            while let Ok(Some((packet, consumed))) = decoder.decode(&buf) {
                                let _ = buf.split_to(consumed);
                                if pkt_tx.send(packet).await.is_err() {
                                    return;
                                }
                            }
                        }
                    }
                }
            });

            tokio::spawn(async move {
                let encoder = MqttEncoder::new(MqttVersion::V311);
                let mut buf = BytesMut::with_capacity(1024);
                while let Some(packet) = out_rx.recv().await {
                    buf.clear();
                    encoder.encode(&packet, &mut buf).unwrap();
                    if write_half.write_all(&buf).await.is_err() {
                        break;
                    }
                }
            });

            if conn_tx
                .send(BrokerConn {
                    rx: pkt_rx,
                    tx: out_tx,
                })
                .await
                .is_err()
            {
                break;
            }
        }
    });

    MockBroker { addr, conns: conn_rx }
}

// ============================================================================
// Test harness
// ============================================================================

struct Harness {
    to_net: mpsc::Sender<(SensorAddress, Bytes)>,
    from_net: mpsc::UnboundedReceiver<(Option<SensorAddress>, Bytes)>,
    ctx: Arc<GatewayContext>,
    #[allow(dead_code)]
    shutdown: ShutdownHandle,
    broker: MockBroker,
}

async fn start(mut config: Config) -> Harness {
    let broker = spawn_mock_broker().await;
    config.broker.host = "127.0.0.1".to_string();
    config.broker.port = broker.addr.port();
    start_with_broker(config, broker).await
}

async fn start_with_broker(config: Config, broker: MockBroker) -> Harness {
    let (in_tx, in_rx) = mpsc::channel(64);
    let (out_tx, out_rx) = mpsc::unbounded_channel();
    let net = Arc::new(MemorySensorNet {
        inbound: Mutex::new(in_rx),
        outbound: out_tx,
    });

    let gateway = Gateway::new(&config).expect("gateway build failed");
    let ctx = gateway.context();
    let shutdown = gateway.shutdown_handle();
    tokio::spawn(gateway.run(net));

    Harness {
        to_net: in_tx,
        from_net: out_rx,
        ctx,
        shutdown,
        broker,
    }
}

impl Harness {
    async fn send_sn(&self, from: SensorAddress, packet: &SnPacket) {
        let mut buf = BytesMut::new();
        encode(packet, &mut buf).unwrap();
        self.to_net
            .send((from, buf.freeze()))
            .await
            .expect("gateway recv task gone");
    }

    /// Next unicast to `to`, skipping broadcast beacons
    async fn expect_unicast(&mut self, to: SensorAddress) -> SnPacket {
        loop {
            let (dest, bytes) = timeout(RECV_TIMEOUT, self.from_net.recv())
                .await
                .expect("timed out waiting for a client-bound packet")
                .expect("gateway send task gone");
            match dest {
                None => continue, // ADVERTISE/GWINFO beacons
                Some(a) if a == to => {
                    let (packet, _) = decode(&bytes).unwrap();
                    return packet;
                }
                Some(other) => panic!("unexpected unicast to {}", other),
            }
        }
    }

    /// Next broadcast frame
    async fn expect_broadcast(&mut self) -> SnPacket {
        loop {
            let (dest, bytes) = timeout(RECV_TIMEOUT, self.from_net.recv())
                .await
                .expect("timed out waiting for a broadcast")
                .expect("gateway send task gone");
            if dest.is_none() {
                let (packet, _) = decode(&bytes).unwrap();
                return packet;
            }
        }
    }

    /// Assert no unicast arrives within `wait` (broadcasts ignored)
    async fn expect_unicast_silence(&mut self, wait: Duration) {
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            match timeout(remaining, self.from_net.recv()).await {
                Err(_) => return,
                Ok(Some((None, _))) => continue,
                Ok(Some((Some(to), bytes))) => {
                    let (packet, _) = decode(&bytes).unwrap();
                    panic!("unexpected {} to {}", packet.name(), to);
                }
                Ok(None) => panic!("gateway send task gone"),
            }
        }
    }

    /// Run the clean CONNECT handshake for one client and return its
    /// broker connection.
    async fn connect_client(&mut self, at: SensorAddress, id: &str, duration: u16) -> BrokerConn {
        self.send_sn(
            at,
            &SnPacket::Connect(SnConnect {
                will: false,
                clean_session: true,
                duration,
                client_id: Bytes::copy_from_slice(id.as_bytes()),
            }),
        )
        .await;

        let mut conn = self.broker.accept().await;
        match conn.expect().await {
            MqttPacket::Connect(c) => assert_eq!(c.client_id, id),
            other => panic!("expected broker CONNECT, got {:?}", other),
        }
        conn.connack(0).await;

        match self.expect_unicast(at).await {
            SnPacket::ConnAck(ack) => assert_eq!(ack.code, ReturnCode::Accepted),
            other => panic!("expected CONNACK, got {:?}", other),
        }
        conn
    }
}

fn sn_connect(id: &str, will: bool, duration: u16) -> SnPacket {
    SnPacket::Connect(SnConnect {
        will,
        clean_session: true,
        duration,
        client_id: Bytes::copy_from_slice(id.as_bytes()),
    })
}

// ============================================================================
// Scenario 1: clean CONNECT, no will
// ============================================================================

#[tokio::test(flavor = "multi_thread")]
async fn clean_connect_no_will() {
    let mut h = start(Config::default()).await;
    let a1 = addr(1);

    h.send_sn(a1, &sn_connect("s1", false, 60)).await;

    let mut conn = h.broker.accept().await;
    match conn.expect().await {
        MqttPacket::Connect(c) => {
            assert_eq!(c.client_id, "s1");
            assert!(c.clean_session);
            assert_eq!(c.keep_alive, 60);
            assert!(c.will.is_none());
        }
        other => panic!("expected CONNECT, got {:?}", other),
    }
    conn.connack(0).await;

    match h.expect_unicast(a1).await {
        SnPacket::ConnAck(ack) => assert_eq!(ack.code, ReturnCode::Accepted),
        other => panic!("expected CONNACK, got {:?}", other),
    }
}

// ============================================================================
// CONNECT with will: no broker CONNECT before WILLMSG
// ============================================================================

#[tokio::test(flavor = "multi_thread")]
async fn connect_with_will() {
    let mut h = start(Config::default()).await;
    let a2 = addr(2);

    h.send_sn(a2, &sn_connect("s2", true, 30)).await;
    assert!(matches!(
        h.expect_unicast(a2).await,
        SnPacket::WillTopicReq
    ));

    h.send_sn(
        a2,
        &SnPacket::WillTopic(sngate::protocol::WillTopic {
            qos: SnQoS::AtLeastOnce,
            retain: false,
            topic: "t/will".to_string(),
        }),
    )
    .await;
    assert!(matches!(h.expect_unicast(a2).await, SnPacket::WillMsgReq));

    // The broker must not have seen a CONNECT yet.
    h.broker
        .expect_no_connection(Duration::from_millis(300))
        .await;

    h.send_sn(
        a2,
        &SnPacket::WillMsg(sngate::protocol::WillMsg {
            message: Bytes::from_static(b"bye"),
        }),
    )
    .await;

    let mut conn = h.broker.accept().await;
    match conn.expect().await {
        MqttPacket::Connect(c) => {
            assert_eq!(c.client_id, "s2");
            let will = c.will.expect("CONNECT should carry the will");
            assert_eq!(will.topic, "t/will");
            assert_eq!(will.payload, Bytes::from_static(b"bye"));
            assert_eq!(will.qos, QoS::AtLeastOnce);
            assert!(!will.retain);
        }
        other => panic!("expected CONNECT, got {:?}", other),
    }
    conn.connack(0).await;

    match h.expect_unicast(a2).await {
        SnPacket::ConnAck(ack) => assert_eq!(ack.code, ReturnCode::Accepted),
        other => panic!("expected CONNACK, got {:?}", other),
    }
}

// ============================================================================
// Scenario 3: forwarded CONNECT
// ============================================================================

#[tokio::test(flavor = "multi_thread")]
async fn forwarded_connect() {
    let fwd_sock: SocketAddrV4 = "10.1.1.99:2000".parse().unwrap();
    let mut config = Config::default();
    config.forwarder.push(ForwarderConfig {
        name: "F".to_string(),
        address: fwd_sock,
    });
    let mut h = start(config).await;
    let a_f = SensorAddress::from(fwd_sock);

    // Wrap CONNECT(clientId=s3) for wireless node 0x0A0B.
    let mut inner = BytesMut::new();
    encode(&sn_connect("s3", false, 60), &mut inner).unwrap();
    h.send_sn(
        a_f,
        &SnPacket::Encapsulated(Encapsulated {
            ctrl: 0x00,
            node_id: SmallVec::from_slice(&[0x0A, 0x0B]),
            inner: inner.freeze(),
        }),
    )
    .await;

    let mut conn = h.broker.accept().await;
    match conn.expect().await {
        MqttPacket::Connect(c) => assert_eq!(c.client_id, "s3"),
        other => panic!("expected CONNECT, got {:?}", other),
    }
    conn.connack(0).await;

    // CONNACK routed back via encapsulation to the forwarder address.
    match h.expect_unicast(a_f).await {
        SnPacket::Encapsulated(encap) => {
            assert_eq!(&encap.node_id[..], &[0x0A, 0x0B]);
            let (inner, _) = decode(&encap.inner).unwrap();
            match inner {
                SnPacket::ConnAck(ack) => assert_eq!(ack.code, ReturnCode::Accepted),
                other => panic!("expected inner CONNACK, got {:?}", other),
            }
        }
        other => panic!("expected encapsulated reply, got {:?}", other),
    }

    // The wireless node is now mapped on the forwarder.
    let node = SmallVec::from_slice(&[0x0A, 0x0B]);
    assert!(h.ctx.forwarders.client_of(a_f, &node).is_some());
}

// ============================================================================
// Scenario 4: QoS -1 proxy publish; non-PUBLISH from the sender rejected
// ============================================================================

#[tokio::test(flavor = "multi_thread")]
async fn qos_minus_one_proxy() {
    let q_sock: SocketAddrV4 = "10.1.1.77:2000".parse().unwrap();
    let mut config = Config::default();
    config.gateway.qos_minus_one = true;
    config.qos_minus_one_client.push(QoSm1ClientConfig {
        name: "sensor7".to_string(),
        address: q_sock,
    });
    let mut h = start(config).await;
    let a_q = SensorAddress::from(q_sock);

    // QoS -1 PUBLISH on a short topic routes via the synthetic client;
    // the gateway brings the broker session up on first use.
    h.send_sn(
        a_q,
        &SnPacket::Publish(SnPublish {
            dup: false,
            qos: SnQoS::MinusOne,
            retain: false,
            topic: SnTopic::Short(*b"ab"),
            msg_id: 0,
            payload: Bytes::from_static(b"21.5"),
        }),
    )
    .await;

    let mut conn = h.broker.accept().await;
    match conn.expect().await {
        MqttPacket::Connect(c) => assert_eq!(c.client_id, "sensor7"),
        other => panic!("expected CONNECT, got {:?}", other),
    }
    conn.connack(0).await;

    match conn.expect().await {
        MqttPacket::Publish(p) => {
            assert_eq!(p.topic, "ab");
            assert_eq!(p.payload, Bytes::from_static(b"21.5"));
            assert_eq!(p.qos, QoS::AtMostOnce);
        }
        other => panic!("expected PUBLISH, got {:?}", other),
    }

    // A SUBSCRIBE from the same sender is logged and dropped.
    h.send_sn(
        a_q,
        &SnPacket::Subscribe(SnSubscribe {
            dup: false,
            qos: SnQoS::AtMostOnce,
            msg_id: 5,
            topic: SnTopicFilter::Name("t".to_string()),
        }),
    )
    .await;
    h.expect_unicast_silence(Duration::from_millis(300)).await;
}

// ============================================================================
// Late client after a gateway restart
// ============================================================================

#[tokio::test(flavor = "multi_thread")]
async fn late_publish_after_restart() {
    let mut h = start(Config::default()).await;
    let a_x = addr(40);

    h.send_sn(
        a_x,
        &SnPacket::Publish(SnPublish {
            dup: false,
            qos: SnQoS::AtMostOnce,
            retain: false,
            topic: SnTopic::Normal(7),
            msg_id: 0,
            payload: Bytes::from_static(b"stale"),
        }),
    )
    .await;

    match h.expect_unicast(a_x).await {
        SnPacket::Disconnect(d) => assert_eq!(d.duration, None),
        other => panic!("expected DISCONNECT, got {:?}", other),
    }

    // Registry unchanged (ephemeral slots are not counted), no broker
    // traffic.
    assert_eq!(h.ctx.registry.len(), 0);
    h.broker
        .expect_no_connection(Duration::from_millis(300))
        .await;
}

// ============================================================================
// After DISCONNECT(0) a non-CONNECT is bounced without broker traffic
// ============================================================================

#[tokio::test(flavor = "multi_thread")]
async fn disconnected_client_is_bounced() {
    let mut h = start(Config::default()).await;
    let a5 = addr(5);
    let mut conn = h.connect_client(a5, "s5", 60).await;

    h.send_sn(a5, &SnPacket::Disconnect(SnDisconnect { duration: None }))
        .await;
    match h.expect_unicast(a5).await {
        SnPacket::Disconnect(_) => {}
        other => panic!("expected DISCONNECT, got {:?}", other),
    }
    // The uplink gets the MQTT DISCONNECT and closes.
    match conn.expect().await {
        MqttPacket::Disconnect => {}
        other => panic!("expected broker DISCONNECT, got {:?}", other),
    }

    // Next non-CONNECT from the same address: courtesy DISCONNECT, no
    // broker connection.
    h.send_sn(a5, &SnPacket::PingReq(SnPingReq::default())).await;
    match h.expect_unicast(a5).await {
        SnPacket::Disconnect(_) => {}
        other => panic!("expected DISCONNECT, got {:?}", other),
    }
    h.broker
        .expect_no_connection(Duration::from_millis(300))
        .await;
}

// ============================================================================
// Sleep and wake: buffered publishes drain before the PINGRESP
// ============================================================================

#[tokio::test(flavor = "multi_thread")]
async fn sleep_and_wake() {
    let mut h = start(Config::default()).await;
    let a4 = addr(4);
    let mut conn = h.connect_client(a4, "s4", 60).await;

    // Subscribe to a concrete topic so the topic id is known before the
    // client sleeps.
    h.send_sn(
        a4,
        &SnPacket::Subscribe(SnSubscribe {
            dup: false,
            qos: SnQoS::AtMostOnce,
            msg_id: 2,
            topic: SnTopicFilter::Name("t/s4".to_string()),
        }),
    )
    .await;
    match conn.expect().await {
        MqttPacket::Subscribe(s) => assert_eq!(s.filter, "t/s4"),
        other => panic!("expected SUBSCRIBE, got {:?}", other),
    }
    conn.send(MqttPacket::SubAck(MqttSubAck {
        packet_id: 2,
        return_codes: vec![0],
    }))
    .await;
    let topic_id = match h.expect_unicast(a4).await {
        SnPacket::SubAck(ack) => {
            assert_eq!(ack.code, ReturnCode::Accepted);
            assert_ne!(ack.topic_id, 0);
            ack.topic_id
        }
        other => panic!("expected SUBACK, got {:?}", other),
    };

    // Go to sleep; broker session stays up.
    h.send_sn(
        a4,
        &SnPacket::Disconnect(SnDisconnect {
            duration: Some(120),
        }),
    )
    .await;
    match h.expect_unicast(a4).await {
        SnPacket::Disconnect(_) => {}
        other => panic!("expected DISCONNECT, got {:?}", other),
    }

    // Broker-originated publishes are buffered while asleep.
    for payload in [b"m1" as &[u8], b"m2"] {
        conn.send(MqttPacket::Publish(MqttPublish {
            dup: false,
            qos: QoS::AtMostOnce,
            retain: false,
            topic: "t/s4".to_string(),
            packet_id: None,
            payload: Bytes::copy_from_slice(payload),
        }))
        .await;
    }
    h.expect_unicast_silence(Duration::from_millis(300)).await;

    // PINGREQ wakes the client: both publishes, in order, then PINGRESP.
    h.send_sn(a4, &SnPacket::PingReq(SnPingReq::default())).await;
    for expected in [b"m1" as &[u8], b"m2"] {
        match h.expect_unicast(a4).await {
            SnPacket::Publish(p) => {
                assert_eq!(p.topic, SnTopic::Normal(topic_id));
                assert_eq!(p.payload, Bytes::copy_from_slice(expected));
            }
            other => panic!("expected buffered PUBLISH, got {:?}", other),
        }
    }
    match h.expect_unicast(a4).await {
        SnPacket::PingResp => {}
        other => panic!("expected PINGRESP after the flush, got {:?}", other),
    }
}

// ============================================================================
// Wire order is preserved per client
// ============================================================================

#[tokio::test(flavor = "multi_thread")]
async fn publish_order_is_preserved() {
    let mut h = start(Config::default()).await;
    let a6 = addr(6);
    let mut conn = h.connect_client(a6, "s6", 60).await;

    // Register a topic, then publish three times on it.
    h.send_sn(
        a6,
        &SnPacket::Register(sngate::protocol::Register {
            topic_id: 0,
            msg_id: 1,
            topic_name: "t/x".to_string(),
        }),
    )
    .await;
    let topic_id = match h.expect_unicast(a6).await {
        SnPacket::RegAck(ack) => {
            assert_eq!(ack.code, ReturnCode::Accepted);
            ack.topic_id
        }
        other => panic!("expected REGACK, got {:?}", other),
    };

    for payload in [b"p1" as &[u8], b"p2", b"p3"] {
        h.send_sn(
            a6,
            &SnPacket::Publish(SnPublish {
                dup: false,
                qos: SnQoS::AtMostOnce,
                retain: false,
                topic: SnTopic::Normal(topic_id),
                msg_id: 0,
                payload: Bytes::copy_from_slice(payload),
            }),
        )
        .await;
    }

    for expected in [b"p1" as &[u8], b"p2", b"p3"] {
        match conn.expect().await {
            MqttPacket::Publish(p) => {
                assert_eq!(p.topic, "t/x");
                assert_eq!(p.payload, Bytes::copy_from_slice(expected));
            }
            other => panic!("expected PUBLISH, got {:?}", other),
        }
    }
}

// ============================================================================
// Broker refusal paths
// ============================================================================

#[tokio::test(flavor = "multi_thread")]
async fn unreachable_broker_yields_congestion() {
    // Grab a port and close it again so the connect is refused.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let dead_port = listener.local_addr().unwrap().port();
    drop(listener);

    let mut config = Config::default();
    config.broker.host = "127.0.0.1".to_string();
    config.broker.port = dead_port;
    config.broker.connect_timeout = Duration::from_millis(500);

    let broker = MockBroker {
        addr: SocketAddr::new("127.0.0.1".parse().unwrap(), dead_port),
        conns: mpsc::channel(1).1,
    };
    let mut h = start_with_broker(config, broker).await;
    let a7 = addr(7);

    h.send_sn(a7, &sn_connect("s7", false, 60)).await;
    match h.expect_unicast(a7).await {
        SnPacket::ConnAck(ack) => assert_eq!(ack.code, ReturnCode::Congestion),
        other => panic!("expected CONNACK(congestion), got {:?}", other),
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn broker_reject_maps_to_not_supported() {
    let mut h = start(Config::default()).await;
    let a8 = addr(8);

    h.send_sn(a8, &sn_connect("s8", false, 60)).await;
    let mut conn = h.broker.accept().await;
    conn.expect().await; // CONNECT
    conn.connack(5).await; // not authorized

    match h.expect_unicast(a8).await {
        SnPacket::ConnAck(ack) => assert_eq!(ack.code, ReturnCode::NotSupported),
        other => panic!("expected CONNACK(rejected), got {:?}", other),
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn broker_close_disconnects_client() {
    let mut h = start(Config::default()).await;
    let a9 = addr(9);
    let conn = h.connect_client(a9, "s9", 60).await;

    // Dropping the mock connection closes the socket; the gateway turns
    // the EOF into an SN DISCONNECT.
    drop(conn);
    match h.expect_unicast(a9).await {
        SnPacket::Disconnect(_) => {}
        other => panic!("expected DISCONNECT, got {:?}", other),
    }
}

// ============================================================================
// SEARCHGW and UNSUBSCRIBE round trips
// ============================================================================

#[tokio::test(flavor = "multi_thread")]
async fn searchgw_is_answered_with_gwinfo() {
    let mut h = start(Config::default()).await;

    h.send_sn(addr(10), &SnPacket::SearchGw(sngate::protocol::SearchGw { radius: 1 }))
        .await;
    loop {
        match h.expect_broadcast().await {
            SnPacket::GwInfo(info) => {
                assert_eq!(info.gw_id, 1);
                break;
            }
            SnPacket::Advertise(_) => continue,
            other => panic!("expected GWINFO, got {:?}", other),
        }
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn unsubscribe_round_trip() {
    let mut h = start(Config::default()).await;
    let a11 = addr(11);
    let mut conn = h.connect_client(a11, "s11", 60).await;

    h.send_sn(
        a11,
        &SnPacket::Unsubscribe(SnUnsubscribe {
            msg_id: 9,
            topic: SnTopicFilter::Name("t/gone".to_string()),
        }),
    )
    .await;
    match conn.expect().await {
        MqttPacket::Unsubscribe(u) => {
            assert_eq!(u.filter, "t/gone");
            assert_eq!(u.packet_id, 9);
        }
        other => panic!("expected UNSUBSCRIBE, got {:?}", other),
    }
    conn.send(MqttPacket::UnsubAck { packet_id: 9 }).await;
    match h.expect_unicast(a11).await {
        SnPacket::UnsubAck { msg_id } => assert_eq!(msg_id, 9),
        other => panic!("expected UNSUBACK, got {:?}", other),
    }
}
