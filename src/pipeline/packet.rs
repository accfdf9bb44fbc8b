//! Event packets moved through the slot table.
//!
//! A packet carries one event type from one source module. Events are never
//! removed from a packet in place; filters clear the `valid` flag instead, so
//! indices stay stable for every module that reads the same packet later.

use crate::pipeline::id::{EventTypeId, ModuleId};

/// A single sensor event.
///
/// The meaning of `value` depends on the packet's event type: polarity for
/// [`EventTypeId::POLARITY`], an accumulated count for [`EventTypeId::FRAME`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Event {
    pub timestamp_us: i64,
    pub x: u16,
    pub y: u16,
    pub value: i32,
    pub valid: bool,
}

impl Event {
    pub fn new(timestamp_us: i64, x: u16, y: u16, value: i32) -> Self {
        Self {
            timestamp_us,
            x,
            y,
            value,
            valid: true,
        }
    }

    pub fn polarity(&self) -> bool {
        self.value != 0
    }

    #[inline]
    pub fn invalidate(&mut self) {
        self.valid = false;
    }
}

/// A batch of events of one type from one source.
#[derive(Debug, Clone, PartialEq)]
pub struct EventPacket {
    source: ModuleId,
    event_type: EventTypeId,
    events: Vec<Event>,
}

impl EventPacket {
    pub fn new(source: ModuleId, event_type: EventTypeId) -> Self {
        Self {
            source,
            event_type,
            events: Vec::new(),
        }
    }

    pub fn with_capacity(source: ModuleId, event_type: EventTypeId, capacity: usize) -> Self {
        Self {
            source,
            event_type,
            events: Vec::with_capacity(capacity),
        }
    }

    pub fn from_events(source: ModuleId, event_type: EventTypeId, events: Vec<Event>) -> Self {
        Self {
            source,
            event_type,
            events,
        }
    }

    #[inline]
    pub fn source(&self) -> ModuleId {
        self.source
    }

    #[inline]
    pub fn event_type(&self) -> EventTypeId {
        self.event_type
    }

    #[inline]
    pub fn push(&mut self, event: Event) {
        self.events.push(event);
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn iter(&self) -> impl Iterator<Item = &Event> {
        self.events.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Event> {
        self.events.iter_mut()
    }

    /// Iterate over events that no filter has invalidated.
    pub fn valid(&self) -> impl Iterator<Item = &Event> {
        self.events.iter().filter(|e| e.valid)
    }

    pub fn valid_count(&self) -> usize {
        self.valid().count()
    }

    pub fn first_timestamp(&self) -> Option<i64> {
        self.events.first().map(|e| e.timestamp_us)
    }

    pub fn last_timestamp(&self) -> Option<i64> {
        self.events.last().map(|e| e.timestamp_us)
    }
}
