//! Per-module Stopped/Running state machine.
//!
//! Each tick the executor asks [`Lifecycle::next_step`] what to do with a
//! module. Start and stop requests cascade along the plan's dependency
//! edges: a successful start requests every auto-start consumer, a stop
//! forces every consumer down with it.

use crate::pipeline::compiled_plan::CompiledPlan;
use crate::pipeline::error::{ModuleResult, PipelineError, PipelineResult};
use crate::pipeline::id::ModuleId;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};

/// Lifecycle state of a module.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModuleStatus {
    #[default]
    Stopped,
    Running,
}

impl fmt::Display for ModuleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModuleStatus::Stopped => write!(f, "stopped"),
            ModuleStatus::Running => write!(f, "running"),
        }
    }
}

/// Requests pending for one module.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModuleControl {
    /// The module should be running.
    pub wanted: bool,
    /// Start automatically once the modules feeding it are running.
    pub run_at_startup: bool,
    /// Parameters changed since the last config callback.
    pub config_pending: bool,
    /// Reset requested by this module id.
    pub reset_source: Option<ModuleId>,
}

/// What the executor does with a module this tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Stopped and not wanted, or waiting on its inputs.
    Idle,
    /// Stopped, wanted, all inputs running: call init.
    Start,
    /// Running but no longer wanted: call exit.
    Stop,
    /// Running and wanted: config (if pending), run, reset (if pending).
    Run,
}

/// State of every module of a compiled plan, indexed by execution position.
#[derive(Debug, Clone, Default)]
pub struct Lifecycle {
    statuses: Vec<ModuleStatus>,
    controls: Vec<ModuleControl>,
    index: HashMap<ModuleId, usize>,
    /// Positions of the producers feeding each module.
    deps: Vec<Vec<usize>>,
    /// Positions of the consumers of each module's streams.
    rev_deps: Vec<Vec<usize>>,
}

impl Lifecycle {
    /// Build the state table for `plan`. `run_at_startup` is parallel to `plan.order`.
    pub fn new(plan: &CompiledPlan, run_at_startup: &[bool]) -> Self {
        let index: HashMap<ModuleId, usize> = plan
            .order
            .iter()
            .enumerate()
            .map(|(i, &id)| (id, i))
            .collect();

        let positions = |ids: Vec<ModuleId>| -> Vec<usize> {
            ids.iter().filter_map(|id| index.get(id).copied()).collect()
        };

        let deps = plan
            .order
            .iter()
            .map(|&id| positions(plan.input_deps(id)))
            .collect();
        let rev_deps = plan
            .order
            .iter()
            .map(|&id| positions(plan.output_rev_deps(id)))
            .collect();

        let controls = plan
            .order
            .iter()
            .enumerate()
            .map(|(i, _)| {
                let auto = run_at_startup.get(i).copied().unwrap_or(true);
                ModuleControl {
                    wanted: auto,
                    run_at_startup: auto,
                    ..Default::default()
                }
            })
            .collect();

        Self {
            statuses: vec![ModuleStatus::Stopped; plan.order.len()],
            controls,
            index,
            deps,
            rev_deps,
        }
    }

    pub fn len(&self) -> usize {
        self.statuses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.statuses.is_empty()
    }

    pub fn position(&self, id: ModuleId) -> Option<usize> {
        self.index.get(&id).copied()
    }

    pub fn status(&self, id: ModuleId) -> Option<ModuleStatus> {
        self.position(id).map(|i| self.statuses[i])
    }

    pub fn status_at(&self, pos: usize) -> ModuleStatus {
        self.statuses[pos]
    }

    /// Statuses parallel to the execution order.
    pub fn statuses(&self) -> &[ModuleStatus] {
        &self.statuses
    }

    pub fn control(&self, id: ModuleId) -> Option<&ModuleControl> {
        self.position(id).map(|i| &self.controls[i])
    }

    pub fn running_count(&self) -> usize {
        self.statuses
            .iter()
            .filter(|s| **s == ModuleStatus::Running)
            .count()
    }

    /// Decide what happens to the module at `pos` this tick.
    pub fn next_step(&self, pos: usize) -> Step {
        let wanted = self.controls[pos].wanted;
        match (self.statuses[pos], wanted) {
            (ModuleStatus::Running, true) => Step::Run,
            (ModuleStatus::Running, false) => Step::Stop,
            (ModuleStatus::Stopped, true) if self.inputs_running(pos) => Step::Start,
            (ModuleStatus::Stopped, _) => Step::Idle,
        }
    }

    fn inputs_running(&self, pos: usize) -> bool {
        self.deps[pos]
            .iter()
            .all(|&d| self.statuses[d] == ModuleStatus::Running)
    }

    pub fn request_start(&mut self, id: ModuleId) -> bool {
        match self.position(id) {
            Some(i) => {
                self.controls[i].wanted = true;
                true
            }
            None => false,
        }
    }

    pub fn request_stop(&mut self, id: ModuleId) -> bool {
        match self.position(id) {
            Some(i) => {
                self.controls[i].wanted = false;
                true
            }
            None => false,
        }
    }

    pub fn request_stop_all(&mut self) {
        for control in &mut self.controls {
            control.wanted = false;
        }
    }

    pub fn schedule_config(&mut self, id: ModuleId) -> bool {
        match self.position(id) {
            Some(i) => {
                self.controls[i].config_pending = true;
                true
            }
            None => false,
        }
    }

    pub fn schedule_reset(&mut self, id: ModuleId, source: ModuleId) -> bool {
        match self.position(id) {
            Some(i) => {
                self.controls[i].reset_source = Some(source);
                true
            }
            None => false,
        }
    }

    /// Schedule a reset on every running consumer of the module at `pos`.
    pub(crate) fn schedule_downstream_reset(&mut self, pos: usize, source: ModuleId) -> usize {
        let mut count = 0;
        for &r in &self.rev_deps[pos] {
            if self.statuses[r] == ModuleStatus::Running {
                self.controls[r].reset_source = Some(source);
                count += 1;
            }
        }
        count
    }

    pub(crate) fn take_config(&mut self, pos: usize) -> bool {
        std::mem::take(&mut self.controls[pos].config_pending)
    }

    pub(crate) fn take_reset(&mut self, pos: usize) -> Option<ModuleId> {
        self.controls[pos].reset_source.take()
    }

    /// Record a successful init and request every auto-start consumer.
    pub(crate) fn mark_running(&mut self, pos: usize) {
        self.statuses[pos] = ModuleStatus::Running;
        // init supersedes anything queued while stopped
        self.controls[pos].config_pending = false;
        self.controls[pos].reset_source = None;

        for &r in &self.rev_deps[pos] {
            if self.controls[r].run_at_startup {
                self.controls[r].wanted = true;
            }
        }
    }

    /// Record a stop and force every consumer to stop too.
    pub(crate) fn mark_stopped(&mut self, pos: usize) {
        self.statuses[pos] = ModuleStatus::Stopped;
        self.controls[pos].wanted = false;

        for &r in &self.rev_deps[pos] {
            self.controls[r].wanted = false;
        }
    }
}

/// Run one module callback, turning errors and panics into a callback failure.
pub(crate) fn invoke<F>(id: ModuleId, name: &str, callback: &'static str, f: F) -> PipelineResult<()>
where
    F: FnOnce() -> ModuleResult<()>,
{
    let span = tracing::debug_span!("module", id = id.get(), name);
    let _guard = span.enter();

    let reason = match catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(())) => return Ok(()),
        Ok(Err(e)) => e.to_string(),
        Err(payload) => format!("panicked: {}", panic_message(payload.as_ref())),
    };

    Err(PipelineError::Callback {
        module: name.to_string(),
        id,
        callback,
        reason,
    })
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
