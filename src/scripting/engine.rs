//! Rhai engine configured for per-event predicates.
//!
//! ## Event variables
//!
//! - `x`, `y` - pixel address
//! - `polarity` - `true` for ON events
//! - `value` - raw event value
//! - `timestamp` - event timestamp in microseconds
//!
//! ## Helper functions
//!
//! - `in_rect(x, y, x0, y0, x1, y1)` - address inside an inclusive rectangle
//! - `between(v, lo, hi)` - inclusive range check
//! - `every(ts, period_us)` - true in the first half of each period

use crate::error::{Result, SensorFlowError};
use crate::pipeline::packet::Event;
use rhai::{Dynamic, Engine, Scope, AST};

/// A compiled predicate together with the source it came from.
#[derive(Clone)]
pub struct CompiledPredicate {
    ast: AST,
    source: String,
}

impl CompiledPredicate {
    pub fn source(&self) -> &str {
        &self.source
    }
}

impl std::fmt::Debug for CompiledPredicate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledPredicate")
            .field("source", &self.source)
            .finish()
    }
}

/// The script engine used by the scripted filter module.
pub struct ScriptEngine {
    engine: Engine,
}

impl ScriptEngine {
    pub fn new() -> Self {
        let mut engine = Engine::new();
        Self::configure_engine(&mut engine);
        Self { engine }
    }

    /// Safety limits and helper functions.
    fn configure_engine(engine: &mut Engine) {
        engine.set_max_expr_depths(64, 64);
        engine.set_max_call_levels(16);
        engine.set_max_operations(10_000);
        engine.set_max_string_size(1_000);
        engine.set_max_array_size(1_000);
        engine.set_max_map_size(100);

        engine.register_fn(
            "in_rect",
            |x: i64, y: i64, x0: i64, y0: i64, x1: i64, y1: i64| -> bool {
                x >= x0 && x <= x1 && y >= y0 && y <= y1
            },
        );
        engine.register_fn("between", |v: i64, lo: i64, hi: i64| -> bool {
            v >= lo && v <= hi
        });
        engine.register_fn("between", |v: f64, lo: f64, hi: f64| -> bool {
            v >= lo && v <= hi
        });
        engine.register_fn("every", |ts: i64, period_us: i64| -> bool {
            if period_us <= 0 {
                return true;
            }
            ts.rem_euclid(period_us) < period_us / 2
        });
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Compile a predicate. Empty sources are rejected.
    pub fn compile(&self, source: &str) -> Result<CompiledPredicate> {
        if source.trim().is_empty() {
            return Err(SensorFlowError::Script("empty predicate".to_string()));
        }
        let ast = self
            .engine
            .compile(source)
            .map_err(|e| SensorFlowError::Script(format!("Compilation error: {}", e)))?;
        Ok(CompiledPredicate {
            ast,
            source: source.to_string(),
        })
    }

    /// Check that a script compiles without keeping it.
    pub fn validate(&self, source: &str) -> Result<()> {
        self.compile(source).map(|_| ())
    }

    /// Evaluate `predicate` for one event.
    ///
    /// `scope` is reused between calls to avoid reallocating it per event.
    pub fn eval_event(
        &self,
        predicate: &CompiledPredicate,
        scope: &mut Scope<'static>,
        event: &Event,
    ) -> Result<bool> {
        scope.clear();
        scope.push("x", event.x as i64);
        scope.push("y", event.y as i64);
        scope.push("polarity", event.polarity());
        scope.push("value", event.value as i64);
        scope.push("timestamp", event.timestamp_us);

        let result: Dynamic = self
            .engine
            .eval_ast_with_scope(scope, &predicate.ast)
            .map_err(SensorFlowError::from_rhai_error)?;

        result.as_bool().map_err(|ty| {
            SensorFlowError::Script(format!("predicate returned {} instead of bool", ty))
        })
    }
}

impl Default for ScriptEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eval(source: &str, event: Event) -> Result<bool> {
        let engine = ScriptEngine::new();
        let predicate = engine.compile(source)?;
        let mut scope = Scope::new();
        engine.eval_event(&predicate, &mut scope, &event)
    }

    #[test]
    fn test_event_variables() {
        let ev = Event::new(1_500, 10, 20, 1);
        assert!(eval("x == 10 && y == 20", ev).unwrap());
        assert!(eval("polarity", ev).unwrap());
        assert!(eval("timestamp > 1000", ev).unwrap());
        assert!(!eval("value == 0", ev).unwrap());
    }

    #[test]
    fn test_helpers() {
        let ev = Event::new(250, 5, 5, 0);
        assert!(eval("in_rect(x, y, 0, 0, 10, 10)", ev).unwrap());
        assert!(!eval("in_rect(x, y, 6, 6, 10, 10)", ev).unwrap());
        assert!(eval("between(x, 5, 5)", ev).unwrap());
        assert!(eval("every(timestamp, 1000)", ev).unwrap());
        assert!(!eval("every(timestamp, 400)", ev).unwrap());
    }

    #[test]
    fn test_non_bool_result_is_error() {
        let err = eval("x + 1", Event::new(0, 1, 1, 1)).unwrap_err();
        assert!(err.to_string().contains("instead of bool"));
    }

    #[test]
    fn test_compile_errors() {
        let engine = ScriptEngine::new();
        assert!(engine.validate("x >").is_err());
        assert!(engine.validate("   ").is_err());
        assert!(engine.validate("!polarity").is_ok());
    }

    #[test]
    fn test_operation_limit() {
        let err = eval("let i = 0; loop { i += 1; }", Event::new(0, 0, 0, 0));
        assert!(err.is_err());
    }
}
