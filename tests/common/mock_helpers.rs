//! Mock construction helpers

use crossbeam_channel::{bounded, Receiver, Sender};
use sensorflow_rs::config::PipelineConfig;
use sensorflow_rs::pipeline::{
    Event, EventPacket, EventTypeId, InputCount, InputStreamSpec, InputType, ModuleContext,
    ModuleError, ModuleFactory, ModuleId, ModuleInfo, ModuleKind, ModulePlugin, ModuleResult,
    OutputStreamSpec, PacketIo, Pipeline, PipelineBuilder, PipelineCommand, PipelineMessage,
};
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};

/// Shared record of module callbacks, as `"<name>:<callback>"`.
pub type CallLog = Arc<Mutex<Vec<String>>>;

pub fn call_log() -> CallLog {
    Arc::new(Mutex::new(Vec::new()))
}

/// Calls recorded for module `name`, without the name prefix.
pub fn calls_of(log: &CallLog, name: &str) -> Vec<String> {
    let prefix = format!("{}:", name);
    log.lock()
        .unwrap()
        .iter()
        .filter_map(|entry| entry.strip_prefix(&prefix).map(str::to_string))
        .collect()
}

/// Create test channels with default size
pub fn create_test_channels<T, U>() -> (Sender<T>, Receiver<T>, Sender<U>, Receiver<U>) {
    let (tx1, rx1) = bounded(16);
    let (tx2, rx2) = bounded(256);
    (tx1, rx1, tx2, rx2)
}

/// A configurable module that records every callback.
///
/// Sources emit two polarity events per tick: an ON event at `(tick, 0)`
/// and an OFF event at `(tick, 1)`. Extra types get one event at `(tick, 2)`.
pub struct MockModule {
    info: ModuleInfo,
    log: CallLog,
    emit: bool,
    extra_types: Vec<EventTypeId>,
    source_override: Option<ModuleId>,
    init_failures: usize,
    fail_run_at: Option<u64>,
    reset_downstream_at: Option<u64>,
}

impl MockModule {
    pub fn source(log: CallLog) -> Self {
        Self::new(
            ModuleInfo::new("MockSource", ModuleKind::Source)
                .output(OutputStreamSpec::fixed(EventTypeId::POLARITY)),
            log,
        )
        .emitting()
    }

    pub fn processor(log: CallLog, mutates: bool) -> Self {
        Self::new(
            ModuleInfo::new("MockProcessor", ModuleKind::Processor).input(InputStreamSpec::new(
                InputType::Fixed(EventTypeId::POLARITY),
                InputCount::Any,
                mutates,
            )),
            log,
        )
    }

    pub fn sink(log: CallLog) -> Self {
        Self::new(
            ModuleInfo::new("MockSink", ModuleKind::Sink)
                .input(InputStreamSpec::read_only(InputType::Any, InputCount::Any)),
            log,
        )
    }

    fn new(info: ModuleInfo, log: CallLog) -> Self {
        Self {
            info,
            log,
            emit: false,
            extra_types: Vec::new(),
            source_override: None,
            init_failures: 0,
            fail_run_at: None,
            reset_downstream_at: None,
        }
    }

    /// Also produce polarity packets (declares the output).
    pub fn emitting(mut self) -> Self {
        if self.info.kind != ModuleKind::Source {
            self.info = self
                .info
                .output(OutputStreamSpec::fixed(EventTypeId::POLARITY));
        }
        self.emit = true;
        self
    }

    /// Take output types from the `output` attribute instead.
    pub fn with_undefined_output(mut self) -> Self {
        self.info.outputs = vec![OutputStreamSpec::UNDEFINED];
        self.emit = true;
        self
    }

    /// Emit one more packet of `event_type` per tick, declared or not.
    pub fn also_emitting(mut self, event_type: EventTypeId) -> Self {
        self.extra_types.push(event_type);
        self
    }

    /// Stamp emitted packets with `source` instead of the module's own id.
    pub fn emitting_as(mut self, source: ModuleId) -> Self {
        self.source_override = Some(source);
        self
    }

    /// Fail the first `count` init calls.
    pub fn failing_init(mut self, count: usize) -> Self {
        self.init_failures = count;
        self
    }

    pub fn failing_run_at(mut self, tick: u64) -> Self {
        self.fail_run_at = Some(tick);
        self
    }

    pub fn resetting_downstream_at(mut self, tick: u64) -> Self {
        self.reset_downstream_at = Some(tick);
        self
    }

    fn record(&self, ctx: &ModuleContext, call: String) {
        self.log
            .lock()
            .unwrap()
            .push(format!("{}:{}", ctx.name, call));
    }
}

impl ModulePlugin for MockModule {
    fn info(&self) -> &ModuleInfo {
        &self.info
    }

    fn init(&mut self, ctx: &mut ModuleContext) -> ModuleResult<()> {
        if self.init_failures > 0 {
            self.init_failures -= 1;
            self.record(ctx, "init-failed".into());
            return Err(ModuleError::failed("not ready"));
        }
        self.record(ctx, "init".into());
        Ok(())
    }

    fn run(&mut self, ctx: &mut ModuleContext, io: &mut PacketIo) -> ModuleResult<()> {
        let events: usize = io.inputs().map(|p| p.len()).sum();
        self.record(ctx, format!("run {} {}", ctx.tick, events));

        if self.fail_run_at == Some(ctx.tick) {
            return Err(ModuleError::failed("run failure"));
        }
        if self.reset_downstream_at == Some(ctx.tick) {
            ctx.request_downstream_reset();
        }
        if self.emit {
            let t = ctx.tick as i64;
            let source = self.source_override.unwrap_or(ctx.id);
            io.emit(EventPacket::from_events(
                source,
                EventTypeId::POLARITY,
                vec![
                    Event::new(t * 10, t as u16, 0, 1),
                    Event::new(t * 10 + 1, t as u16, 1, 0),
                ],
            ));
            for &event_type in &self.extra_types {
                io.emit(EventPacket::from_events(
                    source,
                    event_type,
                    vec![Event::new(t * 10 + 2, t as u16, 2, 1)],
                ));
            }
        }
        Ok(())
    }

    fn config(&mut self, ctx: &mut ModuleContext) -> ModuleResult<()> {
        self.record(ctx, "config".into());
        Ok(())
    }

    fn exit(&mut self, ctx: &mut ModuleContext) -> ModuleResult<()> {
        self.record(ctx, "exit".into());
        Ok(())
    }

    fn reset(&mut self, ctx: &mut ModuleContext, source: ModuleId) -> ModuleResult<()> {
        self.record(ctx, format!("reset {}", source.0));
        Ok(())
    }
}

/// A pipeline built synchronously, driven with `run_once` by the test.
pub struct TestPipeline {
    pub pipeline: Pipeline,
    pub commands: Sender<PipelineCommand>,
    pub messages: Receiver<PipelineMessage>,
}

impl TestPipeline {
    pub fn build(config: PipelineConfig, factory: ModuleFactory) -> Self {
        let (commands, cmd_rx, msg_tx, messages) = create_test_channels();
        let pipeline = PipelineBuilder::new(config)
            .with_factory(factory)
            .build(cmd_rx, msg_tx, Arc::new(AtomicBool::new(true)))
            .expect("pipeline should build");
        Self {
            pipeline,
            commands,
            messages,
        }
    }

    pub fn ticks(&mut self, count: usize) {
        for _ in 0..count {
            self.pipeline.run_once();
        }
    }

    pub fn command(&mut self, cmd: PipelineCommand) {
        self.commands.send(cmd).unwrap();
        self.pipeline.process_commands();
    }

    pub fn drain(&self) -> Vec<PipelineMessage> {
        self.messages.try_iter().collect()
    }
}
