//! Registry of every legally producible event stream.
//!
//! Streams are created from the output declarations of sources and
//! processors. Consumers mark themselves as users while their wiring is
//! parsed; streams nobody uses are pruned before tree construction.

use crate::pipeline::error::{PipelineError, PipelineResult};
use crate::pipeline::id::{EventTypeId, ModuleId, StreamKey};
use std::collections::HashMap;

/// One (producer, event type) stream and the modules consuming it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventStream {
    pub key: StreamKey,
    /// Produced by a processor rather than a source.
    pub from_processor: bool,
    /// Consumers, in parse order until reordered by the global order.
    pub users: Vec<ModuleId>,
}

impl EventStream {
    pub fn new(key: StreamKey, from_processor: bool) -> Self {
        Self {
            key,
            from_processor,
            users: Vec::new(),
        }
    }
}

/// Sorted collection of event streams.
#[derive(Debug, Clone, Default)]
pub struct StreamRegistry {
    streams: Vec<EventStream>,
}

impl StreamRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a stream. Returns false if it already exists.
    pub fn register(&mut self, key: StreamKey, from_processor: bool) -> bool {
        match self.streams.binary_search_by(|s| s.key.cmp(&key)) {
            Ok(_) => false,
            Err(pos) => {
                self.streams.insert(pos, EventStream::new(key, from_processor));
                true
            }
        }
    }

    pub fn find(&self, key: StreamKey) -> Option<&EventStream> {
        self.streams
            .binary_search_by(|s| s.key.cmp(&key))
            .ok()
            .map(|i| &self.streams[i])
    }

    fn find_mut(&mut self, key: StreamKey) -> Option<&mut EventStream> {
        match self.streams.binary_search_by(|s| s.key.cmp(&key)) {
            Ok(i) => Some(&mut self.streams[i]),
            Err(_) => None,
        }
    }

    pub fn exists(&self, producer: ModuleId, event_type: EventTypeId) -> bool {
        self.find(StreamKey::new(producer, event_type)).is_some()
    }

    /// Record `user` as a consumer of `key`. Returns false for an unknown stream.
    pub fn mark_user(&mut self, key: StreamKey, user: ModuleId) -> bool {
        match self.find_mut(key) {
            Some(stream) => {
                stream.users.push(user);
                true
            }
            None => false,
        }
    }

    /// Drop streams without users and return their keys.
    pub fn prune_unused(&mut self) -> Vec<StreamKey> {
        let mut pruned = Vec::new();
        self.streams.retain(|s| {
            if s.users.is_empty() {
                pruned.push(s.key);
                false
            } else {
                true
            }
        });
        pruned
    }

    pub fn has_streams_from(&self, producer: ModuleId) -> bool {
        self.streams.iter().any(|s| s.key.producer == producer)
    }

    /// Reject streams whose users include their own producer or repeat a module.
    pub fn check_cycles(&self) -> PipelineResult<()> {
        for stream in &self.streams {
            if stream.users.contains(&stream.key.producer) {
                return Err(PipelineError::GraphCycle(format!(
                    "stream {} is consumed by its own producer {}",
                    stream.key, stream.key.producer
                )));
            }

            let mut sorted = stream.users.clone();
            sorted.sort_unstable();
            if let Some(w) = sorted.windows(2).find(|w| w[0] == w[1]) {
                return Err(PipelineError::GraphCycle(format!(
                    "module {} appears twice in the users of stream {}",
                    w[0], stream.key
                )));
            }
        }
        Ok(())
    }

    /// Sort every user list by position in the global execution order.
    pub fn reorder_users(&mut self, order: &[ModuleId]) {
        let rank: HashMap<ModuleId, usize> =
            order.iter().enumerate().map(|(i, &id)| (id, i)).collect();
        for stream in &mut self.streams {
            stream
                .users
                .sort_by_key(|id| rank.get(id).copied().unwrap_or(usize::MAX));
        }
    }

    /// Sorted, unique consumers of any stream produced by `producer`.
    pub fn rev_deps(&self, producer: ModuleId) -> Vec<ModuleId> {
        let mut deps: Vec<ModuleId> = self
            .streams
            .iter()
            .filter(|s| s.key.producer == producer)
            .flat_map(|s| s.users.iter().copied())
            .collect();
        deps.sort_unstable();
        deps.dedup();
        deps
    }

    pub fn iter(&self) -> impl Iterator<Item = &EventStream> {
        self.streams.iter()
    }

    pub fn len(&self) -> usize {
        self.streams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }
}
