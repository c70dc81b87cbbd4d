//! MQTT uplink codec tests

use bytes::{Bytes, BytesMut};
use pretty_assertions::assert_eq;

use super::{
    MqttConnAck, MqttConnect, MqttDecoder, MqttEncoder, MqttPacket, MqttPublish, MqttSubscribe,
    MqttVersion, MqttWill, QoS,
};

fn roundtrip(packet: &MqttPacket, version: MqttVersion) -> MqttPacket {
    let encoder = MqttEncoder::new(version);
    let decoder = MqttDecoder::new(version);
    let mut buf = BytesMut::new();
    encoder.encode(packet, &mut buf).unwrap();
    let (decoded, consumed) = decoder.decode(&buf).unwrap().unwrap();
    assert_eq!(consumed, buf.len());
    decoded
}

#[test]
fn connect_with_will_and_credentials() {
    let packet = MqttPacket::Connect(Box::new(MqttConnect {
        version: MqttVersion::V311,
        client_id: "s2".to_string(),
        clean_session: true,
        keep_alive: 30,
        username: Some("user".to_string()),
        password: Some(Bytes::from_static(b"secret")),
        will: Some(MqttWill {
            topic: "t/will".to_string(),
            payload: Bytes::from_static(b"bye"),
            qos: QoS::AtLeastOnce,
            retain: false,
        }),
    }));
    assert_eq!(roundtrip(&packet, MqttVersion::V311), packet);
}

#[test]
fn connect_v5_roundtrip() {
    let packet = MqttPacket::Connect(Box::new(MqttConnect {
        version: MqttVersion::V5,
        client_id: "sensor".to_string(),
        clean_session: false,
        keep_alive: 60,
        username: None,
        password: None,
        will: None,
    }));
    assert_eq!(roundtrip(&packet, MqttVersion::V5), packet);
}

#[test]
fn connect_v31_protocol_name() {
    let encoder = MqttEncoder::new(MqttVersion::V31);
    let mut buf = BytesMut::new();
    encoder
        .encode(
            &MqttPacket::Connect(Box::new(MqttConnect {
                version: MqttVersion::V31,
                client_id: "c".to_string(),
                clean_session: true,
                keep_alive: 10,
                username: None,
                password: None,
                will: None,
            })),
            &mut buf,
        )
        .unwrap();
    // "MQIsdp" after the fixed header and name length
    assert_eq!(&buf[4..10], b"MQIsdp");
    assert_eq!(buf[10], 3);
}

#[test]
fn publish_qos1_carries_packet_id() {
    let packet = MqttPacket::Publish(MqttPublish {
        dup: false,
        qos: QoS::AtLeastOnce,
        retain: true,
        topic: "sensors/7".to_string(),
        packet_id: Some(42),
        payload: Bytes::from_static(b"21.5"),
    });
    assert_eq!(roundtrip(&packet, MqttVersion::V311), packet);
    assert_eq!(roundtrip(&packet, MqttVersion::V5), packet);
}

#[test]
fn connack_decode() {
    let decoder = MqttDecoder::new(MqttVersion::V311);
    let (packet, _) = decoder.decode(&[0x20, 0x02, 0x01, 0x00]).unwrap().unwrap();
    assert_eq!(
        packet,
        MqttPacket::ConnAck(MqttConnAck {
            session_present: true,
            code: 0,
        })
    );
}

#[test]
fn subscribe_roundtrip() {
    let packet = MqttPacket::Subscribe(MqttSubscribe {
        packet_id: 9,
        filter: "a/+/b".to_string(),
        qos: QoS::AtLeastOnce,
    });
    assert_eq!(roundtrip(&packet, MqttVersion::V311), packet);
}

#[test]
fn partial_frame_returns_none() {
    let encoder = MqttEncoder::new(MqttVersion::V311);
    let decoder = MqttDecoder::new(MqttVersion::V311);
    let mut buf = BytesMut::new();
    encoder
        .encode(
            &MqttPacket::Publish(MqttPublish {
                dup: false,
                qos: QoS::AtMostOnce,
                retain: false,
                topic: "t".to_string(),
                packet_id: None,
                payload: Bytes::from_static(b"payload"),
            }),
            &mut buf,
        )
        .unwrap();

    assert!(decoder.decode(&buf[..buf.len() - 3]).unwrap().is_none());
    assert!(decoder.decode(&buf[..1]).unwrap().is_none());
}

#[test]
fn two_frames_decode_in_sequence() {
    let encoder = MqttEncoder::new(MqttVersion::V311);
    let decoder = MqttDecoder::new(MqttVersion::V311);
    let mut buf = BytesMut::new();
    encoder.encode(&MqttPacket::PingReq, &mut buf).unwrap();
    encoder
        .encode(&MqttPacket::PubAck { packet_id: 3 }, &mut buf)
        .unwrap();

    let (first, consumed) = decoder.decode(&buf).unwrap().unwrap();
    assert_eq!(first, MqttPacket::PingReq);
    let (second, _) = decoder.decode(&buf[consumed..]).unwrap().unwrap();
    assert_eq!(second, MqttPacket::PubAck { packet_id: 3 });
}
