//! Pipeline executor: module factory, tick loop and command handling.
//!
//! The pipeline runs on a dedicated thread. Each loop iteration:
//! 1. Wait for a command, a data notification or the housekeeping timeout.
//! 2. Drain pending commands.
//! 3. Walk the execution order once (one tick): copies, lifecycle step,
//!    run, output placement.
//! 4. Release every slot.

use crate::config::{ConfigValue, ModuleConfig, PipelineConfig, RuntimeConfig};
use crate::pipeline::bridge::{
    DataNotifier, ModuleSnapshot, PipelineBridge, PipelineCommand, PipelineMessage,
    PipelineStats, TopologySnapshot,
};
use crate::pipeline::compiled_plan::{CompiledPlan, OutputPlacement};
use crate::pipeline::compiler::{ModuleDecl, PipelineCompiler};
use crate::pipeline::descriptor::{ModuleInfo, ModuleKind};
use crate::pipeline::error::{PipelineError, PipelineResult};
use crate::pipeline::id::ModuleId;
use crate::pipeline::lifecycle::{invoke, Lifecycle, ModuleStatus, Step};
use crate::pipeline::module::{
    AnyModule, ModuleContext, ModuleEntry, ModulePlugin, PacketIo, PipelineView,
};
use crate::pipeline::module_type::ModuleType;
use crate::pipeline::packet::EventPacket;
use chrono::{DateTime, Utc};
use crossbeam_channel::{select, Receiver, Sender};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

type Constructor = Box<dyn Fn() -> Box<dyn ModulePlugin> + Send>;

/// Creates module instances from their `library` name.
///
/// Registered constructors take precedence over the built-in module types.
#[derive(Default)]
pub struct ModuleFactory {
    custom: HashMap<String, Constructor>,
}

impl ModuleFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an external module implementation under `library`.
    pub fn register<F>(&mut self, library: impl Into<String>, ctor: F)
    where
        F: Fn() -> Box<dyn ModulePlugin> + Send + 'static,
    {
        let library = library.into();
        if ModuleType::from_library(&library).is_some() {
            tracing::debug!("Library '{}' shadows a built-in module", library);
        }
        self.custom.insert(library, Box::new(ctor));
    }

    pub fn create(&self, library: &str, runtime: &RuntimeConfig) -> Option<AnyModule> {
        if let Some(ctor) = self.custom.get(library) {
            return Some(AnyModule::Plugin(ctor()));
        }
        ModuleType::from_library(library)
            .map(|ty| AnyModule::Builtin(ty.create(runtime.data_channel_capacity)))
    }

    /// Compiler declarations for every module of `config`, without keeping
    /// the instances.
    pub fn declarations(&self, config: &PipelineConfig) -> PipelineResult<Vec<ModuleDecl>> {
        config
            .modules
            .iter()
            .map(|module_config| {
                let (module, entry) = Runtime::instantiate(module_config, self, &config.runtime)?;
                Ok(ModuleDecl::new(&entry, module.info(), module_config))
            })
            .collect()
    }

    /// Every library name this factory can instantiate, sorted.
    pub fn libraries(&self) -> Vec<String> {
        let mut names: Vec<String> = ModuleType::all()
            .iter()
            .map(|ty| ty.library().to_string())
            .chain(self.custom.keys().cloned())
            .collect();
        names.sort();
        names.dedup();
        names
    }
}

impl ModuleDecl {
    fn new(entry: &ModuleEntry, info: &ModuleInfo, config: &ModuleConfig) -> Self {
        Self {
            id: entry.id,
            name: entry.name.clone(),
            info: info.clone(),
            input: config.input.clone(),
            output: config.output.clone(),
        }
    }
}

/// Per-tick values shared by every callback.
struct TickEnv<'a> {
    tick: u64,
    timestamp: Duration,
    notifier: &'a DataNotifier,
    msg_tx: &'a Sender<PipelineMessage>,
}

impl TickEnv<'_> {
    fn publish(&self, msg: PipelineMessage) {
        if self.msg_tx.try_send(msg).is_err() {
            tracing::trace!("Message channel full, dropping message");
        }
    }
}

fn context<'a>(
    plan: &'a CompiledPlan,
    entries: &'a [ModuleEntry],
    lifecycle: &'a Lifecycle,
    pos: usize,
    env: &TickEnv<'a>,
) -> ModuleContext<'a> {
    ModuleContext::new(
        &entries[pos],
        env.tick,
        env.timestamp,
        env.notifier,
        env.msg_tx,
        PipelineView::new(plan, entries, lifecycle.statuses()),
    )
}

/// Everything built from one configuration. All vectors are parallel to
/// `plan.order`.
struct Runtime {
    plan: CompiledPlan,
    modules: Vec<AnyModule>,
    entries: Vec<ModuleEntry>,
    lifecycle: Lifecycle,
    /// Set after a failed init; only the first failure in a row is reported.
    init_failed: Vec<bool>,
    slots: Vec<Option<EventPacket>>,
}

impl Runtime {
    fn build(
        config: &PipelineConfig,
        factory: &ModuleFactory,
        generation: u64,
    ) -> PipelineResult<Self> {
        config
            .validate()
            .map_err(|e| PipelineError::config("pipeline", e.to_string()))?;

        let mut created: HashMap<ModuleId, (AnyModule, ModuleEntry, bool)> = HashMap::new();
        let mut decls = Vec::with_capacity(config.modules.len());

        for module_config in &config.modules {
            let (module, entry) = Self::instantiate(module_config, factory, &config.runtime)?;
            decls.push(ModuleDecl::new(&entry, module.info(), module_config));
            created.insert(entry.id, (module, entry, module_config.run_at_startup));
        }

        let plan = PipelineCompiler::compile(&decls, generation)?;

        let mut modules = Vec::with_capacity(plan.order.len());
        let mut entries = Vec::with_capacity(plan.order.len());
        let mut run_flags = Vec::with_capacity(plan.order.len());
        for id in &plan.order {
            let (module, entry, run) = created
                .remove(id)
                .ok_or(PipelineError::UnknownModule(*id))?;
            modules.push(module);
            entries.push(entry);
            run_flags.push(run);
        }

        let mut slots = Vec::new();
        slots.try_reserve_exact(plan.slot_count).map_err(|e| {
            PipelineError::ResourceAllocation(format!(
                "slot table of {} entries: {}",
                plan.slot_count, e
            ))
        })?;
        slots.resize_with(plan.slot_count, || None);

        let lifecycle = Lifecycle::new(&plan, &run_flags);
        let init_failed = vec![false; plan.order.len()];

        Ok(Self {
            plan,
            modules,
            entries,
            lifecycle,
            init_failed,
            slots,
        })
    }

    fn instantiate(
        config: &ModuleConfig,
        factory: &ModuleFactory,
        runtime: &RuntimeConfig,
    ) -> PipelineResult<(AnyModule, ModuleEntry)> {
        let module = factory.create(&config.library, runtime).ok_or_else(|| {
            PipelineError::config(&config.name, format!("unknown library '{}'", config.library))
        })?;

        let mut params = config.params.clone();
        module.config_init(&mut params);

        let info = module.info();
        let entry = ModuleEntry {
            id: ModuleId(config.id),
            name: config.name.clone(),
            library: config.library.clone(),
            version: info.version,
            kind: info.kind,
            params,
        };
        Ok((module, entry))
    }

    fn position(&self, id: ModuleId) -> Option<usize> {
        self.lifecycle.position(id)
    }

    /// One pass over the execution order.
    fn tick(&mut self, env: &TickEnv) {
        for pos in 0..self.modules.len() {
            // copies happen even for stopped consumers
            self.fill_copies(pos);

            match self.lifecycle.next_step(pos) {
                Step::Idle => {}
                Step::Start => self.start(pos, env),
                Step::Stop => self.stop(pos, env),
                Step::Run => self.run(pos, env),
            }
        }

        for slot in &mut self.slots {
            *slot = None;
        }
    }

    fn fill_copies(&mut self, pos: usize) {
        for route in &self.plan.routes[pos].inputs {
            if let Some(from) = route.copy_from {
                self.slots[route.slot.index()] = self.slots[from.index()].clone();
            }
        }
    }

    fn start(&mut self, pos: usize, env: &TickEnv) {
        let id = self.entries[pos].id;
        let result = {
            let mut ctx = context(&self.plan, &self.entries, &self.lifecycle, pos, env);
            let module = &mut self.modules[pos];
            invoke(id, &self.entries[pos].name, "init", || module.init(&mut ctx))
        };

        match result {
            Ok(()) => {
                self.init_failed[pos] = false;
                self.lifecycle.mark_running(pos);
                tracing::info!("Module '{}' ({}) started", self.entries[pos].name, id);
                env.publish(PipelineMessage::ModuleStatus {
                    id,
                    status: ModuleStatus::Running,
                });
            }
            Err(e) if !self.init_failed[pos] => {
                // stays stopped and wanted; init is retried next tick
                self.init_failed[pos] = true;
                tracing::error!("{}", e);
                env.publish(PipelineMessage::ModuleError {
                    id,
                    message: e.to_string(),
                });
            }
            Err(e) => tracing::debug!("{}", e),
        }
    }

    fn stop(&mut self, pos: usize, env: &TickEnv) {
        let id = self.entries[pos].id;
        let result = {
            let mut ctx = context(&self.plan, &self.entries, &self.lifecycle, pos, env);
            let module = &mut self.modules[pos];
            invoke(id, &self.entries[pos].name, "exit", || module.exit(&mut ctx))
        };
        self.lifecycle.mark_stopped(pos);

        if let Err(e) = result {
            tracing::error!("{}", e);
            env.publish(PipelineMessage::ModuleError {
                id,
                message: e.to_string(),
            });
        }

        tracing::info!("Module '{}' ({}) stopped", self.entries[pos].name, id);
        env.publish(PipelineMessage::ModuleStatus {
            id,
            status: ModuleStatus::Stopped,
        });
    }

    fn run(&mut self, pos: usize, env: &TickEnv) {
        if let Err(e) = self.run_callbacks(pos, env) {
            self.fail(pos, e, env);
        }
    }

    /// config (if pending), run, reset (if pending).
    fn run_callbacks(&mut self, pos: usize, env: &TickEnv) -> PipelineResult<()> {
        let id = self.entries[pos].id;

        if self.lifecycle.take_config(pos) {
            let mut ctx = context(&self.plan, &self.entries, &self.lifecycle, pos, env);
            let module = &mut self.modules[pos];
            invoke(id, &self.entries[pos].name, "config", || module.config(&mut ctx))?;
        }

        let mut io = PacketIo::new();
        for route in &self.plan.routes[pos].inputs {
            if let Some(packet) = self.slots[route.slot.index()].take() {
                io.push_input(route.slot, packet, route.writable);
            }
        }

        let is_source = self.entries[pos].kind == ModuleKind::Source;
        let mut reset_requested = false;
        let result = if !is_source && io.is_empty() {
            Ok(())
        } else {
            let mut ctx = context(&self.plan, &self.entries, &self.lifecycle, pos, env);
            let module = &mut self.modules[pos];
            let result = invoke(id, &self.entries[pos].name, "run", || {
                module.run(&mut ctx, &mut io)
            });
            reset_requested = ctx.reset_requested();
            result
        };

        let (inputs, outputs) = io.into_parts();
        for (slot, packet) in inputs {
            self.slots[slot.index()] = Some(packet);
        }
        result?;
        self.place_outputs(pos, outputs)?;

        if reset_requested {
            let count = self.lifecycle.schedule_downstream_reset(pos, id);
            tracing::debug!("Module {} requested reset of {} consumer(s)", id, count);
        }

        if let Some(source) = self.lifecycle.take_reset(pos) {
            let mut ctx = context(&self.plan, &self.entries, &self.lifecycle, pos, env);
            let module = &mut self.modules[pos];
            invoke(id, &self.entries[pos].name, "reset", || {
                module.reset(&mut ctx, source)
            })?;
        }

        Ok(())
    }

    fn place_outputs(&mut self, pos: usize, outputs: Vec<EventPacket>) -> PipelineResult<()> {
        let entry = &self.entries[pos];
        let routes = &self.plan.routes[pos];

        for packet in outputs {
            if packet.source() != entry.id {
                return Err(PipelineError::Callback {
                    module: entry.name.clone(),
                    id: entry.id,
                    callback: "run",
                    reason: format!("emitted a packet with source id {}", packet.source()),
                });
            }

            match routes.output_placement(packet.event_type()) {
                OutputPlacement::Slot(slot) => self.slots[slot.index()] = Some(packet),
                OutputPlacement::Unused => {}
                OutputPlacement::Undeclared => {
                    if self.modules[pos].info().has_undefined_output() {
                        tracing::debug!(
                            "Module '{}' emitted type {} outside its 'output' attribute",
                            entry.name,
                            packet.event_type()
                        );
                    } else {
                        tracing::warn!(
                            "Module '{}' emitted undeclared type {}, dropped",
                            entry.name,
                            packet.event_type()
                        );
                    }
                }
            }
        }
        Ok(())
    }

    /// Report a callback failure and stop the module right away.
    fn fail(&mut self, pos: usize, err: PipelineError, env: &TickEnv) {
        tracing::error!("{}, stopping module", err);
        env.publish(PipelineMessage::ModuleError {
            id: self.entries[pos].id,
            message: err.to_string(),
        });
        self.stop(pos, env);
    }

    /// Run exit on every running module, in execution order.
    fn stop_all(&mut self, env: &TickEnv) {
        self.lifecycle.request_stop_all();
        for pos in 0..self.modules.len() {
            if self.lifecycle.next_step(pos) == Step::Stop {
                self.stop(pos, env);
            }
        }
    }

    fn set_param(&mut self, id: ModuleId, key: String, value: ConfigValue) -> bool {
        match self.position(id) {
            Some(pos) => {
                self.entries[pos].params.insert(key, value);
                self.lifecycle.schedule_config(id)
            }
            None => false,
        }
    }

    fn topology(&self) -> TopologySnapshot {
        let modules = self
            .entries
            .iter()
            .enumerate()
            .map(|(pos, entry)| ModuleSnapshot {
                id: entry.id,
                name: entry.name.clone(),
                library: entry.library.clone(),
                status: self.lifecycle.status_at(pos),
                input_deps: self.plan.input_deps(entry.id),
                output_rev_deps: self.plan.output_rev_deps(entry.id),
            })
            .collect();

        TopologySnapshot {
            modules,
            slot_count: self.plan.slot_count,
            copy_count: self.plan.stats.copies,
        }
    }
}

enum Wake {
    Command(Option<PipelineCommand>),
    Data,
    Housekeeping,
}

/// The pipeline: owns the configuration, the module instances and the
/// scheduler state.
pub struct Pipeline {
    runtime: Option<Runtime>,
    factory: ModuleFactory,
    config: PipelineConfig,
    generation: u64,
    tick: u64,
    running: Arc<AtomicBool>,
    cmd_rx: Receiver<PipelineCommand>,
    msg_tx: Sender<PipelineMessage>,
    notifier: DataNotifier,
    data_rx: Receiver<()>,
    start_time: Instant,
    built_at: Option<DateTime<Utc>>,
}

impl Pipeline {
    pub fn new(
        config: PipelineConfig,
        factory: ModuleFactory,
        cmd_rx: Receiver<PipelineCommand>,
        msg_tx: Sender<PipelineMessage>,
        running: Arc<AtomicBool>,
    ) -> Self {
        let (notifier, data_rx) = DataNotifier::new();
        Self {
            runtime: None,
            factory,
            config,
            generation: 0,
            tick: 0,
            running,
            cmd_rx,
            msg_tx,
            notifier,
            data_rx,
            start_time: Instant::now(),
            built_at: None,
        }
    }

    // ── Build ──

    /// Tear down the current modules and build from the stored configuration.
    pub fn build(&mut self) -> PipelineResult<()> {
        self.teardown();
        self.generation += 1;

        match Runtime::build(&self.config, &self.factory, self.generation) {
            Ok(runtime) => {
                let stats = &runtime.plan.stats;
                tracing::info!(
                    "Pipeline built: {} modules ({} sources, {} sinks), {} streams, {} slots, {} copies in {}us",
                    stats.total_modules,
                    stats.source_modules,
                    stats.sink_modules,
                    stats.streams,
                    stats.slots,
                    stats.copies,
                    stats.compile_time_us
                );
                self.runtime = Some(runtime);
                self.built_at = Some(Utc::now());
                Ok(())
            }
            Err(e) => {
                tracing::error!("Pipeline build failed: {}", e);
                Err(e)
            }
        }
    }

    fn teardown(&mut self) {
        let env = TickEnv {
            tick: self.tick,
            timestamp: self.start_time.elapsed(),
            notifier: &self.notifier,
            msg_tx: &self.msg_tx,
        };
        if let Some(runtime) = self.runtime.as_mut() {
            runtime.stop_all(&env);
        }
        self.runtime = None;
    }

    // ── Main run loop ──

    /// Run the pipeline until `running` is set to false or Shutdown is received.
    pub fn run(&mut self) {
        tracing::info!("Pipeline thread started");

        if self.runtime.is_none() {
            if let Err(e) = self.build() {
                self.publish(PipelineMessage::BuildFailed(e.to_string()));
            }
        }

        self.run_once();
        while self.running.load(Ordering::Relaxed) {
            let housekeeping = Duration::from_millis(self.config.runtime.housekeeping_interval_ms);
            let wake = select! {
                recv(self.cmd_rx) -> cmd => Wake::Command(cmd.ok()),
                recv(self.data_rx) -> _ => Wake::Data,
                default(housekeeping) => Wake::Housekeeping,
            };

            match wake {
                Wake::Command(Some(cmd)) => self.handle_command(cmd),
                Wake::Command(None) => {
                    tracing::warn!("Command channel closed, shutting down");
                    self.running.store(false, Ordering::Relaxed);
                }
                Wake::Data | Wake::Housekeeping => {}
            }

            self.process_commands();
            if !self.running.load(Ordering::Relaxed) {
                break;
            }
            self.run_once();
        }

        self.teardown();
        self.publish(PipelineMessage::Shutdown);
        tracing::info!("Pipeline thread exiting");
    }

    /// Execute one tick. Does nothing while no plan is built.
    pub fn run_once(&mut self) {
        let env = TickEnv {
            tick: self.tick,
            timestamp: self.start_time.elapsed(),
            notifier: &self.notifier,
            msg_tx: &self.msg_tx,
        };
        if let Some(runtime) = self.runtime.as_mut() {
            runtime.tick(&env);
            self.tick += 1;
        }
    }

    pub fn process_commands(&mut self) {
        while let Ok(cmd) = self.cmd_rx.try_recv() {
            self.handle_command(cmd);
        }
    }

    fn handle_command(&mut self, cmd: PipelineCommand) {
        match cmd {
            PipelineCommand::StartModule(id) => {
                let known = self
                    .runtime
                    .as_mut()
                    .is_some_and(|rt| rt.lifecycle.request_start(id));
                if !known {
                    self.report_unknown(id);
                }
            }
            PipelineCommand::StopModule(id) => {
                let known = self
                    .runtime
                    .as_mut()
                    .is_some_and(|rt| rt.lifecycle.request_stop(id));
                if !known {
                    self.report_unknown(id);
                }
            }
            PipelineCommand::SetParam { module, key, value } => {
                if let Some(config) = self.config.module_mut(module.get()) {
                    config.params.insert(key.clone(), value.clone());
                }
                let known = self
                    .runtime
                    .as_mut()
                    .is_some_and(|rt| rt.set_param(module, key, value));
                if !known {
                    self.report_unknown(module);
                }
            }
            PipelineCommand::ResetModule { module, source } => {
                let known = self
                    .runtime
                    .as_mut()
                    .is_some_and(|rt| rt.lifecycle.schedule_reset(module, source));
                if !known {
                    self.report_unknown(module);
                }
            }
            PipelineCommand::Reconfigure(config) => {
                self.config = *config;
                if let Err(e) = self.build() {
                    self.publish(PipelineMessage::BuildFailed(e.to_string()));
                }
            }
            PipelineCommand::RequestStats => {
                let stats = self.stats();
                self.publish(PipelineMessage::Stats(stats));
            }
            PipelineCommand::RequestTopology => {
                let topology = self.topology();
                self.publish(PipelineMessage::Topology(topology));
            }
            PipelineCommand::Shutdown => {
                tracing::info!("Shutdown requested");
                self.running.store(false, Ordering::Relaxed);
            }
        }
    }

    fn report_unknown(&self, id: ModuleId) {
        let err = PipelineError::UnknownModule(id);
        tracing::warn!("{}", err);
        self.publish(PipelineMessage::ModuleError {
            id,
            message: err.to_string(),
        });
    }

    fn publish(&self, msg: PipelineMessage) {
        if self.msg_tx.try_send(msg).is_err() {
            tracing::trace!("Message channel full, dropping message");
        }
    }

    // ── Queries ──

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// The current plan, if the last build succeeded.
    pub fn plan(&self) -> Option<&CompiledPlan> {
        self.runtime.as_ref().map(|rt| &rt.plan)
    }

    pub fn module_status(&self, id: ModuleId) -> Option<ModuleStatus> {
        self.runtime.as_ref()?.lifecycle.status(id)
    }

    pub fn tick_count(&self) -> u64 {
        self.tick
    }

    /// Handle that wakes the scheduler from another thread.
    pub fn notifier(&self) -> DataNotifier {
        self.notifier.clone()
    }

    pub fn stats(&self) -> PipelineStats {
        let (running, total, plan) = match &self.runtime {
            Some(rt) => (
                rt.lifecycle.running_count(),
                rt.lifecycle.len(),
                rt.plan.stats.clone(),
            ),
            None => (0, 0, Default::default()),
        };
        PipelineStats {
            ticks: self.tick,
            running_modules: running,
            stopped_modules: total - running,
            plan,
            generation: self.generation,
            built_at: self.built_at,
        }
    }

    pub fn topology(&self) -> TopologySnapshot {
        self.runtime
            .as_ref()
            .map(Runtime::topology)
            .unwrap_or_default()
    }
}

/// A pipeline running on its own thread.
pub struct PipelineHandle {
    pub bridge: PipelineBridge,
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl PipelineHandle {
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Request shutdown without waiting.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Relaxed);
        self.bridge.shutdown();
    }

    /// Request shutdown and wait for the thread to exit.
    pub fn join(mut self) {
        self.stop();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::error!("Pipeline thread panicked");
            }
        }
    }
}

/// Builder for a pipeline from a configuration and a module factory.
pub struct PipelineBuilder {
    config: PipelineConfig,
    factory: ModuleFactory,
}

impl PipelineBuilder {
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config,
            factory: ModuleFactory::new(),
        }
    }

    pub fn with_factory(mut self, factory: ModuleFactory) -> Self {
        self.factory = factory;
        self
    }

    pub fn register<F>(mut self, library: impl Into<String>, ctor: F) -> Self
    where
        F: Fn() -> Box<dyn ModulePlugin> + Send + 'static,
    {
        self.factory.register(library, ctor);
        self
    }

    /// Build the pipeline; configuration errors are reported before any
    /// module runs.
    pub fn build(
        self,
        cmd_rx: Receiver<PipelineCommand>,
        msg_tx: Sender<PipelineMessage>,
        running: Arc<AtomicBool>,
    ) -> PipelineResult<Pipeline> {
        let mut pipeline = Pipeline::new(self.config, self.factory, cmd_rx, msg_tx, running);
        pipeline.build()?;
        Ok(pipeline)
    }

    /// Build the pipeline and start it on a dedicated thread.
    pub fn spawn(self) -> PipelineResult<PipelineHandle> {
        let (bridge, cmd_rx, msg_tx) = PipelineBridge::with_capacity(
            self.config.runtime.command_channel_capacity,
            self.config.runtime.message_channel_capacity,
        );
        let running = Arc::new(AtomicBool::new(true));
        let mut pipeline = self.build(cmd_rx, msg_tx, running.clone())?;

        let thread = std::thread::Builder::new()
            .name("pipeline".into())
            .spawn(move || pipeline.run())
            .map_err(PipelineError::Io)?;

        Ok(PipelineHandle {
            bridge,
            running,
            thread: Some(thread),
        })
    }
}
