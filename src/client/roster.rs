//! Persistent client roster and pre-defined topic files
//!
//! Both files are read once at startup. Formats:
//!
//! ```text
//! # roster: ClientId, address, kind
//! sensor-1, 192.168.1.10:2001, transparent
//! node-7,   -,                 forwarded-transparent
//!
//! # pre-defined topics: ClientId, TopicId, TopicName
//! sensor-1, 1, home/livingroom/temp
//! *,        9, gateway/broadcast
//! ```

use std::io::{self, BufRead, BufReader, Read};
use std::net::SocketAddrV4;

use crate::transport::SensorAddress;

use super::{ClientId, ClientKind};

/// One roster line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RosterEntry {
    pub id: ClientId,
    /// `None` for forwarded clients declared without a direct address
    pub address: Option<SensorAddress>,
    pub kind: ClientKind,
}

/// One pre-defined topic line; `client_id == None` is the `*` wildcard
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PredefinedTopicEntry {
    pub client_id: Option<ClientId>,
    pub topic_id: u16,
    pub topic_name: String,
}

fn parse_error(line_no: usize, msg: &str) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidData,
        format!("line {}: {}", line_no, msg),
    )
}

fn parse_kind(token: &str) -> Option<ClientKind> {
    match token {
        "transparent" => Some(ClientKind::Transparent),
        "aggregator" => Some(ClientKind::Aggregator),
        "forwarded-transparent" => Some(ClientKind::ForwardedTransparent),
        "forwarded-aggregator" => Some(ClientKind::ForwardedAggregator),
        "qosm1" => Some(ClientKind::QoSm1),
        _ => None,
    }
}

/// Parse a roster file. Blank lines and `#` comments are skipped.
pub fn load_roster(reader: impl Read) -> io::Result<Vec<RosterEntry>> {
    let mut entries = Vec::new();
    for (idx, line) in BufReader::new(reader).lines().enumerate() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let line_no = idx + 1;
        let fields: Vec<&str> = line.split(',').map(|f| f.trim()).collect();
        if fields.len() != 3 {
            return Err(parse_error(line_no, "expected ClientId, address, kind"));
        }
        let id = ClientId::from(fields[0]);
        if id.is_empty() {
            return Err(parse_error(line_no, "empty client id"));
        }
        let address = if fields[1] == "-" {
            None
        } else {
            let sock: SocketAddrV4 = fields[1]
                .parse()
                .map_err(|_| parse_error(line_no, "bad address"))?;
            Some(SensorAddress::from(sock))
        };
        let kind =
            parse_kind(fields[2]).ok_or_else(|| parse_error(line_no, "unknown client kind"))?;
        if kind.is_forwarded() && address.is_some() {
            return Err(parse_error(line_no, "forwarded clients take no address"));
        }
        entries.push(RosterEntry { id, address, kind });
    }
    Ok(entries)
}

/// Parse a pre-defined topics file
pub fn load_predefined_topics(reader: impl Read) -> io::Result<Vec<PredefinedTopicEntry>> {
    let mut entries = Vec::new();
    for (idx, line) in BufReader::new(reader).lines().enumerate() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let line_no = idx + 1;
        let fields: Vec<&str> = line.split(',').map(|f| f.trim()).collect();
        if fields.len() != 3 {
            return Err(parse_error(line_no, "expected ClientId, TopicId, TopicName"));
        }
        let client_id = if fields[0] == "*" {
            None
        } else {
            Some(ClientId::from(fields[0]))
        };
        let topic_id: u16 = fields[1]
            .parse()
            .map_err(|_| parse_error(line_no, "bad topic id"))?;
        if topic_id == 0 {
            return Err(parse_error(line_no, "topic id 0 is reserved"));
        }
        if fields[2].is_empty() {
            return Err(parse_error(line_no, "empty topic name"));
        }
        entries.push(PredefinedTopicEntry {
            client_id,
            topic_id,
            topic_name: fields[2].to_string(),
        });
    }
    Ok(entries)
}
