use crate::pipeline::id::{EventTypeId, ModuleId, SlotIndex, StreamKey, TapPoint};
use crate::pipeline::stream::StreamRegistry;
use crate::pipeline::wiring::InputDefinition;
use std::collections::HashMap;

/// Where one consumed stream is read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputRoute {
    pub stream: StreamKey,
    pub tap: TapPoint,
    /// Slot handed to the module.
    pub slot: SlotIndex,
    /// When set, `slot` is filled with a copy of this slot first.
    pub copy_from: Option<SlotIndex>,
    /// The module may modify the packet.
    pub writable: bool,
}

/// Slot routing of one module.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModuleRoutes {
    pub inputs: Vec<InputRoute>,
    /// Output type to slot; `None` when nobody consumes that type.
    pub outputs: Vec<(EventTypeId, Option<SlotIndex>)>,
}

/// Placement of an emitted packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputPlacement {
    Slot(SlotIndex),
    /// Declared output type that nobody consumes.
    Unused,
    /// Not an output type of the module.
    Undeclared,
}

impl ModuleRoutes {
    pub fn output_placement(&self, event_type: EventTypeId) -> OutputPlacement {
        match self.outputs.iter().find(|(t, _)| *t == event_type) {
            Some((_, Some(slot))) => OutputPlacement::Slot(*slot),
            Some((_, None)) => OutputPlacement::Unused,
            None => OutputPlacement::Undeclared,
        }
    }
}

/// Compiled execution plan for a pipeline configuration.
///
/// Rebuilt on every (re)configuration and read-only while ticking.
#[derive(Debug, Clone, Default)]
pub struct CompiledPlan {
    /// Global execution order
    pub order: Vec<ModuleId>,

    /// Routing per module, parallel to `order`
    pub routes: Vec<ModuleRoutes>,

    /// Number of slots in the per-tick slot table
    pub slot_count: usize,

    /// Streams that survived pruning, users in execution order
    pub streams: StreamRegistry,

    /// Parsed input wiring of every consumer
    pub inputs: HashMap<ModuleId, InputDefinition>,

    /// Cache invalidation generation number
    pub generation: u64,

    /// Compilation statistics
    pub stats: PlanStats,
}

/// Statistics about the compiled plan
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlanStats {
    pub total_modules: usize,
    pub source_modules: usize,
    pub processor_modules: usize,
    pub sink_modules: usize,

    /// Streams with at least one consumer
    pub streams: usize,

    pub slots: usize,

    /// Inputs that receive a private copy each tick
    pub copies: usize,

    /// Filler levels inserted while merging stream trees
    pub fillers: usize,

    /// Compilation time in microseconds
    pub compile_time_us: u64,
}

impl CompiledPlan {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn position(&self, id: ModuleId) -> Option<usize> {
        self.order.iter().position(|&m| m == id)
    }

    pub fn routes_for(&self, id: ModuleId) -> Option<&ModuleRoutes> {
        self.position(id).map(|i| &self.routes[i])
    }

    pub fn stream_exists(&self, producer: ModuleId, event_type: EventTypeId) -> bool {
        self.streams.exists(producer, event_type)
    }

    /// Sorted producers feeding `id`.
    pub fn input_deps(&self, id: ModuleId) -> Vec<ModuleId> {
        self.inputs
            .get(&id)
            .map(|def| def.keys().copied().collect())
            .unwrap_or_default()
    }

    /// Sorted, unique consumers of any stream produced by `id`.
    pub fn output_rev_deps(&self, id: ModuleId) -> Vec<ModuleId> {
        self.streams.rev_deps(id)
    }
}
