//! Rhai scripting for event predicates
//!
//! The scripted filter module evaluates one boolean expression per event.
//! Events for which the predicate returns `false` are invalidated.
//!
//! ## Example Scripts
//!
//! Keep only ON events:
//! ```rhai
//! polarity
//! ```
//!
//! Region of interest:
//! ```rhai
//! in_rect(x, y, 40, 30, 120, 90)
//! ```
//!
//! Drop the border rows:
//! ```rhai
//! between(y, 2, 177)
//! ```

mod engine;

pub use engine::{CompiledPredicate, ScriptEngine};

/// Ready-made predicates
pub mod builtins {
    /// Pass every event.
    pub const PASS_ALL: &str = "true";

    /// Keep ON events only.
    pub const ON_ONLY: &str = "polarity";

    /// Keep OFF events only.
    pub const OFF_ONLY: &str = "!polarity";

    /// Keep the central 128x128 window of a 240x180 sensor.
    pub const CENTER_WINDOW: &str = "in_rect(x, y, 56, 26, 183, 153)";

    /// Keep the first half of every 10 ms.
    pub const DUTY_CYCLE_10MS: &str = "every(timestamp, 10000)";

    pub fn all() -> Vec<(&'static str, &'static str)> {
        vec![
            ("Pass all", PASS_ALL),
            ("ON only", ON_ONLY),
            ("OFF only", OFF_ONLY),
            ("Center window", CENTER_WINDOW),
            ("Duty cycle 10 ms", DUTY_CYCLE_10MS),
        ]
    }
}
