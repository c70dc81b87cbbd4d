//! Configuration tests

use std::io::Write;

use pretty_assertions::assert_eq;
use tempfile::NamedTempFile;

use super::Config;

fn write_config(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}

#[test]
fn defaults_are_sane() {
    let config = Config::default();
    assert_eq!(config.gateway.gateway_id, 1);
    assert_eq!(config.gateway.mqtt_version, 4);
    assert_eq!(config.gateway.imei_len, 15);
    assert_eq!(config.gateway.pw_len, 8);
    assert!(!config.gateway.aggregator);
    assert_eq!(config.broker.port, 1883);
    assert_eq!(config.queues.packet_events, 1024);
    assert!(config.validate().is_ok());
}

#[test]
fn full_file_parses() {
    let file = write_config(
        r#"
[log]
level = "debug"

[gateway]
gateway_id = 3
keep_alive = 300
mqtt_version = 5
login_id = "gw"
password = "secret"
client_authentication = true
aggregator = true
max_clients = 64

[sensor]
bind = "0.0.0.0:20000"
multicast_group = "225.1.1.1:1883"

[broker]
host = "broker.local"
port = 11883
connect_timeout = "3s"

[queues]
packet_events = 128
client_send = 64
broker_send = 64

[[forwarder]]
name = "F1"
address = "192.168.7.1:2001"
"#,
    );

    let config = Config::load(file.path()).unwrap();
    assert_eq!(config.log.level, "debug");
    assert_eq!(config.gateway.gateway_id, 3);
    assert_eq!(config.gateway.mqtt_version, 5);
    assert!(config.gateway.client_authentication);
    assert!(config.gateway.aggregator);
    assert_eq!(config.broker.address(), "broker.local:11883");
    assert_eq!(config.broker.connect_timeout.as_secs(), 3);
    assert_eq!(config.queues.packet_events, 128);
    assert_eq!(config.forwarder.len(), 1);
    assert_eq!(config.forwarder[0].name, "F1");
}

#[test]
fn env_substitution_applies() {
    std::env::set_var("SNGATE_TEST_BROKER_HOST", "from-env.local");
    let file = write_config(
        r#"
[broker]
host = "${SNGATE_TEST_BROKER_HOST}"
port = 1883
"#,
    );
    let config = Config::load(file.path()).unwrap();
    assert_eq!(config.broker.host, "from-env.local");
    std::env::remove_var("SNGATE_TEST_BROKER_HOST");
}

#[test]
fn env_substitution_default_applies() {
    let file = write_config(
        r#"
[broker]
host = "${SNGATE_TEST_UNSET_VAR:-fallback.local}"
"#,
    );
    let config = Config::load(file.path()).unwrap();
    assert_eq!(config.broker.host, "fallback.local");
}

#[test]
fn invalid_mqtt_version_rejected() {
    let file = write_config("[gateway]\nmqtt_version = 6\n");
    assert!(Config::load(file.path()).is_err());
}

#[test]
fn zero_queue_depth_rejected() {
    let file = write_config("[queues]\npacket_events = 0\n");
    assert!(Config::load(file.path()).is_err());
}

#[test]
fn non_multicast_group_rejected() {
    let file = write_config("[sensor]\nmulticast_group = \"192.168.1.1:1883\"\n");
    assert!(Config::load(file.path()).is_err());
}

#[test]
fn duplicate_forwarder_address_rejected() {
    let file = write_config(
        r#"
[[forwarder]]
name = "a"
address = "192.168.7.1:2001"

[[forwarder]]
name = "b"
address = "192.168.7.1:2001"
"#,
    );
    assert!(Config::load(file.path()).is_err());
}

#[test]
fn qos_minus_one_requires_senders() {
    let file = write_config("[gateway]\nqos_minus_one = true\n");
    assert!(Config::load(file.path()).is_err());
}
