//! Per-client topic-id table
//!
//! Two sub-spaces: normal ids assigned at runtime by REGISTER/SUBSCRIBE,
//! and pre-defined ids configured out-of-band. Clean session erases only
//! the normal space.

use ahash::AHashMap;

use crate::protocol::{SnTopic, TopicIdKind};

/// Reserved id values that are never assigned
const TOPIC_ID_MIN: u16 = 1;
const TOPIC_ID_MAX: u16 = 0xFFFE;

/// Topic id to name mapping for one client
#[derive(Debug, Clone, Default)]
pub struct TopicTable {
    normal: AHashMap<u16, String>,
    predefined: AHashMap<u16, String>,
    next_id: u16,
}

impl TopicTable {
    pub fn new() -> Self {
        Self {
            normal: AHashMap::new(),
            predefined: AHashMap::new(),
            next_id: TOPIC_ID_MIN,
        }
    }

    /// Assign (or return the existing) normal id for a topic name.
    /// Returns `None` when the id space is exhausted.
    pub fn register(&mut self, name: &str) -> Option<u16> {
        if let Some(id) = self.id_of(name) {
            return Some(id.1);
        }
        // Linear probe past ids still in use after wrap-around.
        let start = self.next_id;
        loop {
            let id = self.next_id;
            self.next_id = if self.next_id >= TOPIC_ID_MAX {
                TOPIC_ID_MIN
            } else {
                self.next_id + 1
            };
            if !self.normal.contains_key(&id) && !self.predefined.contains_key(&id) {
                self.normal.insert(id, name.to_string());
                return Some(id);
            }
            if self.next_id == start {
                return None;
            }
        }
    }

    /// Install a pre-defined binding
    pub fn add_predefined(&mut self, id: u16, name: &str) {
        self.predefined.insert(id, name.to_string());
    }

    /// Resolve a PUBLISH topic reference to a topic name
    pub fn name_of(&self, topic: &SnTopic) -> Option<String> {
        match topic {
            SnTopic::Normal(id) => self.normal.get(id).cloned(),
            SnTopic::PreDefined(id) => self.predefined.get(id).cloned(),
            SnTopic::Short(s) => std::str::from_utf8(s).ok().map(|s| s.to_string()),
        }
    }

    /// Reverse lookup: kind and id for a topic name, normal space first
    pub fn id_of(&self, name: &str) -> Option<(TopicIdKind, u16)> {
        if let Some((id, _)) = self.normal.iter().find(|(_, n)| n.as_str() == name) {
            return Some((TopicIdKind::Normal, *id));
        }
        if let Some((id, _)) = self.predefined.iter().find(|(_, n)| n.as_str() == name) {
            return Some((TopicIdKind::PreDefined, *id));
        }
        None
    }

    /// Clean-session erase: normal entries only, pre-defined ids survive
    pub fn erase_normal(&mut self) {
        self.normal.clear();
        self.next_id = TOPIC_ID_MIN;
    }

    pub fn normal_len(&self) -> usize {
        self.normal.len()
    }

    pub fn predefined_len(&self) -> usize {
        self.predefined.len()
    }
}
