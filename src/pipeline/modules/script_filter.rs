//! ScriptFilter: invalidates events rejected by a Rhai predicate.
//!
//! The predicate comes from the `predicate` parameter and sees `x`, `y`,
//! `polarity`, `value` and `timestamp` of each valid event. Events for which
//! it returns `false` are invalidated. A script error fails the run.

use crate::pipeline::descriptor::{InputCount, InputStreamSpec, InputType, ModuleInfo, ModuleKind};
use crate::pipeline::error::{ModuleError, ModuleResult};
use crate::pipeline::module::{ModuleContext, ModulePlugin, PacketIo, Params};
use crate::scripting::{CompiledPredicate, ScriptEngine};
use rhai::Scope;

pub const LIBRARY: &str = "script_filter";

/// A processor that applies a user predicate to every event of one stream.
pub struct ScriptFilterModule {
    info: ModuleInfo,
    engine: ScriptEngine,
    predicate: Option<CompiledPredicate>,
    scope: Scope<'static>,
    rejected: u64,
}

impl ScriptFilterModule {
    pub fn new() -> Self {
        Self {
            info: ModuleInfo::new("ScriptFilter", ModuleKind::Processor)
                .description("Invalidates events rejected by a Rhai predicate.")
                .input(InputStreamSpec::mutating(InputType::Any, InputCount::ONE)),
            engine: ScriptEngine::new(),
            predicate: None,
            scope: Scope::new(),
            rejected: 0,
        }
    }

    /// Source of the active predicate, if compiled.
    pub fn script_source(&self) -> Option<&str> {
        self.predicate.as_ref().map(|p| p.source())
    }

    pub fn rejected(&self) -> u64 {
        self.rejected
    }

    fn compile(&mut self, ctx: &ModuleContext) -> ModuleResult<()> {
        let source = ctx.param_str("predicate").unwrap_or("true");
        if self.script_source() == Some(source) {
            return Ok(());
        }

        let predicate = self
            .engine
            .compile(source)
            .map_err(|e| ModuleError::Script(e.to_string()))?;
        tracing::debug!("ScriptFilter: predicate compiled: {}", source);
        self.predicate = Some(predicate);
        Ok(())
    }
}

impl Default for ScriptFilterModule {
    fn default() -> Self {
        Self::new()
    }
}

impl ModulePlugin for ScriptFilterModule {
    fn info(&self) -> &ModuleInfo {
        &self.info
    }

    fn config_init(&self, params: &mut Params) {
        params
            .entry("predicate".into())
            .or_insert(crate::scripting::builtins::PASS_ALL.into());
    }

    fn init(&mut self, ctx: &mut ModuleContext) -> ModuleResult<()> {
        self.predicate = None;
        self.rejected = 0;
        self.compile(ctx)
    }

    fn run(&mut self, _ctx: &mut ModuleContext, io: &mut PacketIo) -> ModuleResult<()> {
        let Some(predicate) = &self.predicate else {
            return Ok(());
        };

        for packet in io.inputs_mut() {
            for event in packet.iter_mut() {
                if !event.valid {
                    continue;
                }
                let keep = self
                    .engine
                    .eval_event(predicate, &mut self.scope, event)
                    .map_err(|e| ModuleError::Script(e.to_string()))?;
                if !keep {
                    event.invalidate();
                    self.rejected += 1;
                }
            }
        }
        Ok(())
    }

    fn config(&mut self, ctx: &mut ModuleContext) -> ModuleResult<()> {
        self.compile(ctx)
    }

    fn exit(&mut self, _ctx: &mut ModuleContext) -> ModuleResult<()> {
        self.predicate = None;
        Ok(())
    }
}
