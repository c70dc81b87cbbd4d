//! Forwarder table
//!
//! A forwarder tunnels multiple wireless nodes over one sensor-net address
//! using frame-02 encapsulation. Forwarders are declared statically at
//! startup; wireless nodes behind them appear dynamically on their first
//! CONNECT.

#[cfg(test)]
mod tests;

use ahash::AHashMap;
use parking_lot::RwLock;

use crate::client::ClientHandle;
use crate::protocol::WirelessNodeId;
use crate::transport::SensorAddress;

/// One declared forwarder and its wireless-node mapping
#[derive(Debug)]
struct Forwarder {
    name: String,
    nodes: AHashMap<WirelessNodeId, ClientHandle>,
}

/// All declared forwarders, keyed by their gateway-facing address
pub struct ForwarderTable {
    inner: RwLock<AHashMap<SensorAddress, Forwarder>>,
}

impl ForwarderTable {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(AHashMap::new()),
        }
    }

    /// Declare a forwarder at startup. New wireless nodes may appear later
    /// but the forwarder itself must be pre-declared.
    pub fn declare(&self, name: &str, address: SensorAddress) {
        self.inner.write().insert(
            address,
            Forwarder {
                name: name.to_string(),
                nodes: AHashMap::new(),
            },
        );
    }

    /// Is this sender a declared forwarder?
    pub fn contains(&self, address: SensorAddress) -> bool {
        self.inner.read().contains_key(&address)
    }

    pub fn name_of(&self, address: SensorAddress) -> Option<String> {
        self.inner.read().get(&address).map(|f| f.name.clone())
    }

    /// Resolve a wireless node to its client, if it has connected before
    pub fn client_of(&self, address: SensorAddress, node_id: &WirelessNodeId) -> Option<ClientHandle> {
        self.inner
            .read()
            .get(&address)
            .and_then(|f| f.nodes.get(node_id).copied())
    }

    /// Bind a wireless node to a client (first CONNECT through this
    /// forwarder). Re-binding an existing node replaces the entry, which
    /// covers a node re-connecting with a fresh registry slot.
    pub fn add_client(
        &self,
        address: SensorAddress,
        node_id: WirelessNodeId,
        handle: ClientHandle,
    ) -> bool {
        let mut inner = self.inner.write();
        match inner.get_mut(&address) {
            Some(f) => {
                f.nodes.insert(node_id, handle);
                true
            }
            None => false,
        }
    }

    /// Drop a client from whichever forwarder maps it (registry GC)
    pub fn remove_client(&self, handle: ClientHandle) {
        let mut inner = self.inner.write();
        for f in inner.values_mut() {
            f.nodes.retain(|_, h| *h != handle);
        }
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ForwarderTable {
    fn default() -> Self {
        Self::new()
    }
}
