//! Module graph compilation and execution.
//!
//! Packets flow from sources through processors to sinks along streams,
//! identified by `(producer, event type)`. A processor that modifies a
//! stream in place becomes a tap point other consumers may read after.
//!
//! # Architecture
//!
//! ```text
//! config ──► compiler ──► CompiledPlan ──► Pipeline (tick loop)
//!             │                               │
//!             ├ wiring       parse/validate   ├ Lifecycle    start/stop FSM
//!             ├ stream       registry         ├ slots        packet routing
//!             ├ dependency_tree per stream    └ bridge       commands/messages
//!             └ order        flatten/normalize
//! ```
//!
//! # Design
//!
//! - **Enum dispatch on hot path**: `BuiltinModule` enum for all built-in modules.
//! - **Compile once**: all wiring errors surface before any module runs.
//! - **Slot table**: one `Option<EventPacket>` per slot, released every tick.
//! - **Dedicated thread**: the pipeline wakes on commands, data or a
//!   housekeeping timeout.

pub mod bridge;
pub mod compiled_plan;
pub mod compiler;
pub mod dependency_tree;
pub mod descriptor;
pub mod error;
pub mod executor;
pub mod id;
pub mod lifecycle;
pub mod module;
pub mod module_type;
pub mod modules;
pub mod order;
pub mod packet;
pub mod stream;
pub mod wiring;

pub use bridge::{
    DataNotifier, ModuleSnapshot, PipelineBridge, PipelineCommand, PipelineMessage,
    PipelineStats, StatisticsSnapshot, TopologySnapshot,
};
pub use compiled_plan::{CompiledPlan, InputRoute, ModuleRoutes, PlanStats};
pub use compiler::{ModuleDecl, PipelineCompiler};
pub use descriptor::{
    InputCount, InputStreamSpec, InputType, ModuleInfo, ModuleKind, OutputStreamSpec, OutputType,
};
pub use error::{ErrorKind, ModuleError, ModuleResult, PipelineError, PipelineResult};
pub use executor::{ModuleFactory, Pipeline, PipelineBuilder, PipelineHandle};
pub use id::{EventTypeId, ModuleId, SlotIndex, StreamKey, TapPoint};
pub use lifecycle::{Lifecycle, ModuleStatus};
pub use module::{
    AnyModule, BuiltinModule, ModuleContext, ModuleEntry, ModulePlugin, PacketIo, Params,
    PipelineView,
};
pub use module_type::ModuleType;
pub use packet::{Event, EventPacket};
