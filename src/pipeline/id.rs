//! Identity types for the pipeline system.
//!
//! `ModuleId` and `EventTypeId` are configuration-facing numbers. The arena
//! ids (`SlotIndex`, `TreeNodeId`, `LinkId`) are newtypes over `u32` that serve
//! as direct array indices into their respective storage vectors.

use std::fmt;

/// Largest id accepted for modules and event types.
pub const MAX_ID: u16 = i16::MAX as u16;

/// Configured module id. Unique within one pipeline.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct ModuleId(pub u16);

impl ModuleId {
    #[inline]
    pub fn get(self) -> u16 {
        self.0
    }
}

impl fmt::Debug for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ModuleId({})", self.0)
    }
}

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Event type carried by a stream.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct EventTypeId(pub u16);

impl EventTypeId {
    pub const SPECIAL: EventTypeId = EventTypeId(0);
    pub const POLARITY: EventTypeId = EventTypeId(1);
    pub const FRAME: EventTypeId = EventTypeId(2);
}

impl fmt::Debug for EventTypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EventTypeId({})", self.0)
    }
}

impl fmt::Display for EventTypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Key of one event stream: who produces it, and what type it carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StreamKey {
    pub producer: ModuleId,
    pub event_type: EventTypeId,
}

impl StreamKey {
    pub fn new(producer: ModuleId, event_type: EventTypeId) -> Self {
        Self {
            producer,
            event_type,
        }
    }
}

impl fmt::Display for StreamKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.producer.0, self.event_type.0)
    }
}

/// Where along a stream a consumer observes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TapPoint {
    /// Straight from the producer.
    Source,
    /// After the given processor has modified the stream.
    After(ModuleId),
}

impl TapPoint {
    /// The module this tap point refers to, resolving `Source` to the producer.
    pub fn module(self, producer: ModuleId) -> ModuleId {
        match self {
            TapPoint::Source => producer,
            TapPoint::After(id) => id,
        }
    }
}

macro_rules! arena_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
        pub struct $name(pub u32);

        impl $name {
            pub const INVALID: $name = $name(u32::MAX);

            #[inline]
            pub fn is_valid(self) -> bool {
                self != Self::INVALID
            }

            #[inline]
            pub fn index(self) -> usize {
                self.0 as usize
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                if *self == Self::INVALID {
                    write!(f, concat!(stringify!($name), "(INVALID)"))
                } else {
                    write!(f, concat!(stringify!($name), "({})"), self.0)
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Debug::fmt(self, f)
            }
        }
    };
}

arena_id!(
    /// Index into the per-run packet slot table.
    SlotIndex
);
arena_id!(
    /// Index into `DependencyTree::nodes`.
    TreeNodeId
);
arena_id!(
    /// Index into `DependencyTree::links`.
    LinkId
);
