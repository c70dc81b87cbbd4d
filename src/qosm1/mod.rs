//! QoS -1 proxy
//!
//! Accepts fire-and-forget PUBLISHes from senders that never connect. Each
//! configured sender address maps to a name and a synthetic client created
//! at startup; the dispatcher binds inbound QoS -1 PUBLISHes to that
//! handle and rejects everything else from those addresses.

use ahash::AHashMap;

use crate::client::ClientHandle;
use crate::transport::SensorAddress;

/// One configured QoS -1 sender
#[derive(Debug, Clone)]
struct ProxyEntry {
    name: String,
    handle: ClientHandle,
}

/// The proxy mapping. Built once at startup, read-only afterwards.
pub struct QoSm1Proxy {
    entries: AHashMap<SensorAddress, ProxyEntry>,
}

impl QoSm1Proxy {
    /// An inactive proxy accepts nothing
    pub fn inactive() -> Self {
        Self {
            entries: AHashMap::new(),
        }
    }

    pub fn new(entries: impl IntoIterator<Item = (SensorAddress, String, ClientHandle)>) -> Self {
        Self {
            entries: entries
                .into_iter()
                .map(|(addr, name, handle)| (addr, ProxyEntry { name, handle }))
                .collect(),
        }
    }

    pub fn is_active(&self) -> bool {
        !self.entries.is_empty()
    }

    /// Name configured for a sender address, if it belongs to the proxy
    pub fn client_name(&self, addr: SensorAddress) -> Option<&str> {
        self.entries.get(&addr).map(|e| e.name.as_str())
    }

    /// Synthetic client handle for a sender address
    pub fn client(&self, addr: SensorAddress) -> Option<ClientHandle> {
        self.entries.get(&addr).map(|e| e.handle)
    }
}
