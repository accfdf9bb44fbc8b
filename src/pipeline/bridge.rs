//! Thread boundary between the pipeline thread and its controller.
//!
//! The controller (launcher, tests, an embedding application) sends
//! `PipelineCommand`s and drains `PipelineMessage`s. Source modules wake the
//! scheduler through a `DataNotifier`.

use crate::config::{ConfigValue, PipelineConfig};
use crate::pipeline::compiled_plan::PlanStats;
use crate::pipeline::id::ModuleId;
use crate::pipeline::lifecycle::ModuleStatus;
use crate::pipeline::packet::EventPacket;
use chrono::{DateTime, Utc};
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use std::time::Duration;

/// Per-second event statistics published by the statistics sink.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatisticsSnapshot {
    pub total_events: u64,
    pub valid_events: u64,
    pub events_per_second: f64,
    pub valid_per_second: f64,
    /// Largest gap between consecutive packet timestamps, in microseconds.
    pub max_gap_us: i64,
}

/// Pipeline-wide counters.
#[derive(Debug, Clone, Default)]
pub struct PipelineStats {
    pub ticks: u64,
    pub running_modules: usize,
    pub stopped_modules: usize,
    pub plan: PlanStats,
    pub generation: u64,
    pub built_at: Option<DateTime<Utc>>,
}

/// Snapshot of one module for controllers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleSnapshot {
    pub id: ModuleId,
    pub name: String,
    pub library: String,
    pub status: ModuleStatus,
    pub input_deps: Vec<ModuleId>,
    pub output_rev_deps: Vec<ModuleId>,
}

/// Complete topology snapshot of the compiled pipeline.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TopologySnapshot {
    /// Modules in execution order.
    pub modules: Vec<ModuleSnapshot>,
    pub slot_count: usize,
    pub copy_count: usize,
}

/// Messages sent from the pipeline thread.
#[derive(Debug, Clone)]
pub enum PipelineMessage {
    /// A module entered a new lifecycle state.
    ModuleStatus { id: ModuleId, status: ModuleStatus },

    /// A module callback failed; the module was stopped.
    ModuleError { id: ModuleId, message: String },

    /// Packets forwarded by a channel sink.
    Packets {
        module: ModuleId,
        packets: Vec<EventPacket>,
    },

    /// Periodic statistics from a statistics sink.
    Statistics {
        module: ModuleId,
        snapshot: StatisticsSnapshot,
    },

    /// Response to `RequestStats`.
    Stats(PipelineStats),

    /// Response to `RequestTopology`.
    Topology(TopologySnapshot),

    /// A rebuild failed; the pipeline holds no plan until the next good one.
    BuildFailed(String),

    /// Pipeline is shutting down.
    Shutdown,
}

/// Commands sent to the pipeline thread.
#[derive(Debug, Clone)]
pub enum PipelineCommand {
    /// Request a module to run (honored once its inputs are running).
    StartModule(ModuleId),
    /// Stop a module and everything depending on it.
    StopModule(ModuleId),
    /// Change a module parameter and schedule its config callback.
    SetParam {
        module: ModuleId,
        key: String,
        value: ConfigValue,
    },
    /// Schedule a reset callback as if `source` reported a discontinuity.
    ResetModule { module: ModuleId, source: ModuleId },
    /// Tear everything down and rebuild from a new configuration.
    Reconfigure(Box<PipelineConfig>),
    /// Request current statistics.
    RequestStats,
    /// Request a topology snapshot.
    RequestTopology,
    /// Shut down the pipeline thread.
    Shutdown,
}

/// Default channel capacity for commands (controller → pipeline).
pub const CMD_CHANNEL_CAPACITY: usize = 256;
/// Default channel capacity for messages (pipeline → controller).
pub const MSG_CHANNEL_CAPACITY: usize = 10_000;

/// Controller-side handle for communicating with the pipeline thread.
pub struct PipelineBridge {
    pub cmd_tx: Sender<PipelineCommand>,
    pub msg_rx: Receiver<PipelineMessage>,
}

impl PipelineBridge {
    /// Create a new bridge pair: `(bridge, cmd_rx, msg_tx)`.
    ///
    /// The pipeline thread owns `cmd_rx` and `msg_tx`.
    pub fn new() -> (Self, Receiver<PipelineCommand>, Sender<PipelineMessage>) {
        Self::with_capacity(CMD_CHANNEL_CAPACITY, MSG_CHANNEL_CAPACITY)
    }

    pub fn with_capacity(
        commands: usize,
        messages: usize,
    ) -> (Self, Receiver<PipelineCommand>, Sender<PipelineMessage>) {
        let (cmd_tx, cmd_rx) = bounded(commands);
        let (msg_tx, msg_rx) = bounded(messages);
        (Self { cmd_tx, msg_rx }, cmd_rx, msg_tx)
    }

    /// Drain all pending messages.
    pub fn drain(&self) -> Vec<PipelineMessage> {
        let mut msgs = Vec::new();
        while let Ok(msg) = self.msg_rx.try_recv() {
            msgs.push(msg);
        }
        msgs
    }

    /// Try to receive a single message without blocking.
    pub fn try_recv(&self) -> Option<PipelineMessage> {
        self.msg_rx.try_recv().ok()
    }

    /// Wait up to `timeout` for a message.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<PipelineMessage> {
        self.msg_rx.recv_timeout(timeout).ok()
    }

    pub fn send_command(&self, cmd: PipelineCommand) -> bool {
        self.cmd_tx.send(cmd).is_ok()
    }

    pub fn start_module(&self, id: ModuleId) {
        let _ = self.cmd_tx.send(PipelineCommand::StartModule(id));
    }

    pub fn stop_module(&self, id: ModuleId) {
        let _ = self.cmd_tx.send(PipelineCommand::StopModule(id));
    }

    pub fn set_param(&self, module: ModuleId, key: impl Into<String>, value: ConfigValue) {
        let _ = self.cmd_tx.send(PipelineCommand::SetParam {
            module,
            key: key.into(),
            value,
        });
    }

    pub fn reset_module(&self, module: ModuleId, source: ModuleId) {
        let _ = self
            .cmd_tx
            .send(PipelineCommand::ResetModule { module, source });
    }

    pub fn reconfigure(&self, config: PipelineConfig) {
        let _ = self
            .cmd_tx
            .send(PipelineCommand::Reconfigure(Box::new(config)));
    }

    pub fn request_stats(&self) {
        let _ = self.cmd_tx.send(PipelineCommand::RequestStats);
    }

    pub fn request_topology(&self) {
        let _ = self.cmd_tx.send(PipelineCommand::RequestTopology);
    }

    pub fn shutdown(&self) {
        let _ = self.cmd_tx.send(PipelineCommand::Shutdown);
    }
}

/// Wakes the scheduler when a source has new data.
///
/// Backed by a one-slot channel, so any number of notifications between two
/// ticks collapse into one wake-up.
#[derive(Debug, Clone)]
pub struct DataNotifier {
    tx: Sender<()>,
}

impl DataNotifier {
    /// Create a notifier and the receiver the scheduler waits on.
    pub fn new() -> (Self, Receiver<()>) {
        let (tx, rx) = bounded(1);
        (Self { tx }, rx)
    }

    /// Signal that data is available. Never blocks.
    pub fn notify(&self) -> bool {
        match self.tx.try_send(()) {
            Ok(()) | Err(TrySendError::Full(())) => true,
            Err(TrySendError::Disconnected(())) => false,
        }
    }
}
