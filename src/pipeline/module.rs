//! Module abstraction for the pipeline.
//!
//! Two-layer design, as for every pluggable piece of the pipeline:
//! - **`ModulePlugin` trait**: the lifecycle interface every module
//!   implements, and the extension point for custom modules.
//! - **`BuiltinModule` enum**: static dispatch over the modules shipped
//!   with the crate, so the per-tick path avoids a vtable call.
//!
//! `AnyModule` wraps either variant so the executor handles both uniformly.

use crate::config::ConfigValue;
use crate::pipeline::bridge::{DataNotifier, PipelineMessage};
use crate::pipeline::compiled_plan::CompiledPlan;
use crate::pipeline::descriptor::{ModuleInfo, ModuleKind};
use crate::pipeline::error::ModuleResult;
use crate::pipeline::id::{EventTypeId, ModuleId, SlotIndex};
use crate::pipeline::lifecycle::ModuleStatus;
use crate::pipeline::modules::{
    AccumulatorModule, ChannelSinkModule, NoiseFilterModule, ScriptFilterModule,
    StatisticsModule, SyntheticSourceModule,
};
use crate::pipeline::packet::EventPacket;
use crossbeam_channel::{Sender, TrySendError};
use std::collections::BTreeMap;
use std::time::Duration;

pub type Params = BTreeMap<String, ConfigValue>;

/// Static facts about a module instance, owned by the executor.
#[derive(Debug, Clone, PartialEq)]
pub struct ModuleEntry {
    pub id: ModuleId,
    pub name: String,
    pub library: String,
    pub version: u32,
    pub kind: ModuleKind,
    pub params: Params,
}

/// Read-only view of the running pipeline, for module queries.
#[derive(Clone, Copy)]
pub struct PipelineView<'a> {
    plan: &'a CompiledPlan,
    /// Parallel to `plan.order`.
    entries: &'a [ModuleEntry],
    /// Parallel to `plan.order`.
    statuses: &'a [ModuleStatus],
}

impl<'a> PipelineView<'a> {
    pub fn new(
        plan: &'a CompiledPlan,
        entries: &'a [ModuleEntry],
        statuses: &'a [ModuleStatus],
    ) -> Self {
        Self {
            plan,
            entries,
            statuses,
        }
    }

    pub fn stream_exists(&self, producer: ModuleId, event_type: EventTypeId) -> bool {
        self.plan.stream_exists(producer, event_type)
    }

    /// Producers feeding `id`, sorted.
    pub fn input_deps(&self, id: ModuleId) -> Vec<ModuleId> {
        self.plan.input_deps(id)
    }

    /// Consumers of any stream from `id`, sorted.
    pub fn output_rev_deps(&self, id: ModuleId) -> Vec<ModuleId> {
        self.plan.output_rev_deps(id)
    }

    pub fn module_status(&self, id: ModuleId) -> Option<ModuleStatus> {
        self.plan
            .position(id)
            .and_then(|i| self.statuses.get(i).copied())
    }

    pub fn module_version(&self, id: ModuleId) -> Option<u32> {
        self.entry(id).map(|e| e.version)
    }

    pub fn module_params(&self, id: ModuleId) -> Option<&'a Params> {
        self.entry(id).map(|e| &e.params)
    }

    fn entry(&self, id: ModuleId) -> Option<&'a ModuleEntry> {
        self.plan.position(id).and_then(|i| self.entries.get(i))
    }
}

/// Context passed to every module callback.
pub struct ModuleContext<'a> {
    pub id: ModuleId,
    pub name: &'a str,
    pub params: &'a Params,
    /// Monotonic tick counter.
    pub tick: u64,
    /// Time since the pipeline thread started.
    pub timestamp: Duration,
    /// Wakes the scheduler; sources hand clones to their worker threads.
    pub notifier: &'a DataNotifier,
    messages: &'a Sender<PipelineMessage>,
    view: PipelineView<'a>,
    reset_requested: bool,
}

impl<'a> ModuleContext<'a> {
    pub fn new(
        entry: &'a ModuleEntry,
        tick: u64,
        timestamp: Duration,
        notifier: &'a DataNotifier,
        messages: &'a Sender<PipelineMessage>,
        view: PipelineView<'a>,
    ) -> Self {
        Self {
            id: entry.id,
            name: &entry.name,
            params: &entry.params,
            tick,
            timestamp,
            notifier,
            messages,
            view,
            reset_requested: false,
        }
    }

    pub fn param(&self, key: &str) -> Option<&ConfigValue> {
        self.params.get(key)
    }

    pub fn param_int(&self, key: &str, default: i64) -> i64 {
        self.param(key).and_then(|v| v.as_int()).unwrap_or(default)
    }

    pub fn param_float(&self, key: &str, default: f64) -> f64 {
        self.param(key).and_then(|v| v.as_float()).unwrap_or(default)
    }

    pub fn param_bool(&self, key: &str, default: bool) -> bool {
        self.param(key).and_then(|v| v.as_bool()).unwrap_or(default)
    }

    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.param(key).and_then(|v| v.as_str())
    }

    pub fn view(&self) -> PipelineView<'a> {
        self.view
    }

    pub fn stream_exists(&self, producer: ModuleId, event_type: EventTypeId) -> bool {
        self.view.stream_exists(producer, event_type)
    }

    pub fn input_deps(&self) -> Vec<ModuleId> {
        self.view.input_deps(self.id)
    }

    pub fn output_rev_deps(&self) -> Vec<ModuleId> {
        self.view.output_rev_deps(self.id)
    }

    /// Ask every running consumer of this module to reset after this tick's step.
    pub fn request_downstream_reset(&mut self) {
        self.reset_requested = true;
    }

    pub(crate) fn reset_requested(&self) -> bool {
        self.reset_requested
    }

    /// Publish a message to the controller. Dropped when the channel is full.
    pub fn publish(&self, msg: PipelineMessage) -> bool {
        match self.messages.try_send(msg) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                tracing::trace!("Message channel full, dropping message from {}", self.id);
                false
            }
            Err(TrySendError::Disconnected(_)) => false,
        }
    }
}

struct InputPacket {
    slot: SlotIndex,
    packet: EventPacket,
    writable: bool,
}

/// Packets handed to a module for one `run` call.
///
/// Inputs are moved out of the slot table for the call and moved back
/// afterwards. Read-only inputs are never exposed mutably.
#[derive(Default)]
pub struct PacketIo {
    inputs: Vec<InputPacket>,
    outputs: Vec<EventPacket>,
}

impl PacketIo {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push_input(&mut self, slot: SlotIndex, packet: EventPacket, writable: bool) {
        self.inputs.push(InputPacket {
            slot,
            packet,
            writable,
        });
    }

    /// Build a standalone set of inputs, for driving a module outside a pipeline.
    pub fn with_inputs(packets: impl IntoIterator<Item = (EventPacket, bool)>) -> Self {
        let mut io = Self::new();
        for (i, (packet, writable)) in packets.into_iter().enumerate() {
            io.push_input(SlotIndex(i as u32), packet, writable);
        }
        io
    }

    /// No inputs were available this tick.
    pub fn is_empty(&self) -> bool {
        self.inputs.is_empty()
    }

    pub fn input_count(&self) -> usize {
        self.inputs.len()
    }

    pub fn input(&self, index: usize) -> Option<&EventPacket> {
        self.inputs.get(index).map(|i| &i.packet)
    }

    /// Mutable access, only for inputs the module declared as modified.
    pub fn input_mut(&mut self, index: usize) -> Option<&mut EventPacket> {
        self.inputs
            .get_mut(index)
            .filter(|i| i.writable)
            .map(|i| &mut i.packet)
    }

    pub fn inputs(&self) -> impl Iterator<Item = &EventPacket> {
        self.inputs.iter().map(|i| &i.packet)
    }

    pub fn inputs_mut(&mut self) -> impl Iterator<Item = &mut EventPacket> {
        self.inputs
            .iter_mut()
            .filter(|i| i.writable)
            .map(|i| &mut i.packet)
    }

    /// First input of `event_type` from `source`.
    pub fn find(&self, source: ModuleId, event_type: EventTypeId) -> Option<&EventPacket> {
        self.inputs()
            .find(|p| p.source() == source && p.event_type() == event_type)
    }

    pub fn emit(&mut self, packet: EventPacket) {
        self.outputs.push(packet);
    }

    pub fn outputs(&self) -> &[EventPacket] {
        &self.outputs
    }

    pub(crate) fn into_parts(self) -> (Vec<(SlotIndex, EventPacket)>, Vec<EventPacket>) {
        let inputs = self
            .inputs
            .into_iter()
            .map(|i| (i.slot, i.packet))
            .collect();
        (inputs, self.outputs)
    }
}

/// Lifecycle interface of a module.
pub trait ModulePlugin: Send {
    /// Static declaration: kind and stream specs.
    fn info(&self) -> &ModuleInfo;

    /// Insert default values for parameters missing from the configuration.
    fn config_init(&self, _params: &mut Params) {}

    /// Stopped to Running. Allocate state here.
    fn init(&mut self, ctx: &mut ModuleContext) -> ModuleResult<()>;

    /// Process one tick's inputs and emit outputs.
    fn run(&mut self, ctx: &mut ModuleContext, io: &mut PacketIo) -> ModuleResult<()>;

    /// Parameters changed while running.
    fn config(&mut self, _ctx: &mut ModuleContext) -> ModuleResult<()> {
        Ok(())
    }

    /// Running to Stopped. Release state here.
    fn exit(&mut self, _ctx: &mut ModuleContext) -> ModuleResult<()> {
        Ok(())
    }

    /// Discontinuity reported by module `source`.
    fn reset(&mut self, _ctx: &mut ModuleContext, _source: ModuleId) -> ModuleResult<()> {
        Ok(())
    }
}

/// Enum dispatch for built-in modules.
pub enum BuiltinModule {
    SyntheticSource(SyntheticSourceModule),
    NoiseFilter(NoiseFilterModule),
    ScriptFilter(ScriptFilterModule),
    Accumulator(AccumulatorModule),
    Statistics(StatisticsModule),
    ChannelSink(ChannelSinkModule),
}

macro_rules! dispatch_builtin {
    ($self:ident, $m:ident => $call:expr) => {
        match $self {
            BuiltinModule::SyntheticSource($m) => $call,
            BuiltinModule::NoiseFilter($m) => $call,
            BuiltinModule::ScriptFilter($m) => $call,
            BuiltinModule::Accumulator($m) => $call,
            BuiltinModule::Statistics($m) => $call,
            BuiltinModule::ChannelSink($m) => $call,
        }
    };
}

impl BuiltinModule {
    pub fn info(&self) -> &ModuleInfo {
        dispatch_builtin!(self, m => m.info())
    }

    pub fn config_init(&self, params: &mut Params) {
        dispatch_builtin!(self, m => m.config_init(params))
    }

    pub fn init(&mut self, ctx: &mut ModuleContext) -> ModuleResult<()> {
        dispatch_builtin!(self, m => m.init(ctx))
    }

    pub fn run(&mut self, ctx: &mut ModuleContext, io: &mut PacketIo) -> ModuleResult<()> {
        dispatch_builtin!(self, m => m.run(ctx, io))
    }

    pub fn config(&mut self, ctx: &mut ModuleContext) -> ModuleResult<()> {
        dispatch_builtin!(self, m => m.config(ctx))
    }

    pub fn exit(&mut self, ctx: &mut ModuleContext) -> ModuleResult<()> {
        dispatch_builtin!(self, m => m.exit(ctx))
    }

    pub fn reset(&mut self, ctx: &mut ModuleContext, source: ModuleId) -> ModuleResult<()> {
        dispatch_builtin!(self, m => m.reset(ctx, source))
    }
}

/// Wrapper that holds either a built-in module or a plugin trait object.
pub enum AnyModule {
    Builtin(BuiltinModule),
    Plugin(Box<dyn ModulePlugin>),
}

impl AnyModule {
    pub fn info(&self) -> &ModuleInfo {
        match self {
            AnyModule::Builtin(m) => m.info(),
            AnyModule::Plugin(m) => m.info(),
        }
    }

    pub fn config_init(&self, params: &mut Params) {
        match self {
            AnyModule::Builtin(m) => m.config_init(params),
            AnyModule::Plugin(m) => m.config_init(params),
        }
    }

    pub fn init(&mut self, ctx: &mut ModuleContext) -> ModuleResult<()> {
        match self {
            AnyModule::Builtin(m) => m.init(ctx),
            AnyModule::Plugin(m) => m.init(ctx),
        }
    }

    pub fn run(&mut self, ctx: &mut ModuleContext, io: &mut PacketIo) -> ModuleResult<()> {
        match self {
            AnyModule::Builtin(m) => m.run(ctx, io),
            AnyModule::Plugin(m) => m.run(ctx, io),
        }
    }

    pub fn config(&mut self, ctx: &mut ModuleContext) -> ModuleResult<()> {
        match self {
            AnyModule::Builtin(m) => m.config(ctx),
            AnyModule::Plugin(m) => m.config(ctx),
        }
    }

    pub fn exit(&mut self, ctx: &mut ModuleContext) -> ModuleResult<()> {
        match self {
            AnyModule::Builtin(m) => m.exit(ctx),
            AnyModule::Plugin(m) => m.exit(ctx),
        }
    }

    pub fn reset(&mut self, ctx: &mut ModuleContext, source: ModuleId) -> ModuleResult<()> {
        match self {
            AnyModule::Builtin(m) => m.reset(ctx, source),
            AnyModule::Plugin(m) => m.reset(ctx, source),
        }
    }
}

impl From<BuiltinModule> for AnyModule {
    fn from(m: BuiltinModule) -> Self {
        AnyModule::Builtin(m)
    }
}

impl From<Box<dyn ModulePlugin>> for AnyModule {
    fn from(m: Box<dyn ModulePlugin>) -> Self {
        AnyModule::Plugin(m)
    }
}
