//! Built-in module types, addressed by their `library` name in the config.

use crate::pipeline::descriptor::ModuleKind;
use crate::pipeline::module::BuiltinModule;
use crate::pipeline::modules::{
    accumulator, channel_sink, noise_filter, script_filter, statistics, synthetic_source,
    AccumulatorModule, ChannelSinkModule, NoiseFilterModule, ScriptFilterModule,
    StatisticsModule, SyntheticSourceModule,
};
use serde::{Deserialize, Serialize};

/// Types of modules shipped with the crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleType {
    // Sources
    /// Pseudo-random polarity events from a background thread.
    SyntheticSource,

    // Processors
    /// Background-activity filter.
    NoiseFilter,
    /// Rhai predicate filter.
    ScriptFilter,
    /// Polarity events to count frames.
    Accumulator,

    // Sinks
    /// Per-interval event rates.
    Statistics,
    /// Forwards packets to the controller.
    ChannelSink,
}

impl ModuleType {
    /// Name used in the `library` field of a module config.
    pub fn library(&self) -> &'static str {
        match self {
            ModuleType::SyntheticSource => synthetic_source::LIBRARY,
            ModuleType::NoiseFilter => noise_filter::LIBRARY,
            ModuleType::ScriptFilter => script_filter::LIBRARY,
            ModuleType::Accumulator => accumulator::LIBRARY,
            ModuleType::Statistics => statistics::LIBRARY,
            ModuleType::ChannelSink => channel_sink::LIBRARY,
        }
    }

    pub fn from_library(name: &str) -> Option<ModuleType> {
        Self::all().iter().copied().find(|t| t.library() == name)
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            ModuleType::SyntheticSource => "Synthetic Source",
            ModuleType::NoiseFilter => "Noise Filter",
            ModuleType::ScriptFilter => "Script Filter",
            ModuleType::Accumulator => "Accumulator",
            ModuleType::Statistics => "Statistics",
            ModuleType::ChannelSink => "Channel Sink",
        }
    }

    pub fn all() -> &'static [ModuleType] {
        &[
            ModuleType::SyntheticSource,
            ModuleType::NoiseFilter,
            ModuleType::ScriptFilter,
            ModuleType::Accumulator,
            ModuleType::Statistics,
            ModuleType::ChannelSink,
        ]
    }

    pub fn kind(&self) -> ModuleKind {
        match self {
            ModuleType::SyntheticSource => ModuleKind::Source,
            ModuleType::NoiseFilter | ModuleType::ScriptFilter | ModuleType::Accumulator => {
                ModuleKind::Processor
            }
            ModuleType::Statistics | ModuleType::ChannelSink => ModuleKind::Sink,
        }
    }

    /// Get a detailed description of what this module does.
    pub fn description(&self) -> &'static str {
        match self {
            ModuleType::SyntheticSource =>
                "Generates random polarity events (type 1).\n\
                 Params: rate_hz, batch_us, width, height, seed.",

            ModuleType::NoiseFilter =>
                "Invalidates events without recent neighbours.\n\
                 Modifies its polarity inputs in place.\n\
                 Params: window_us, support_min, refractory_us, check_polarity.",

            ModuleType::ScriptFilter =>
                "Invalidates events rejected by a Rhai predicate.\n\
                 Reads exactly one stream of any type and modifies it.\n\
                 Params: predicate.",

            ModuleType::Accumulator =>
                "Sums polarity events into count frames (type 2).\n\
                 Params: frame_us, width, height, signed.",

            ModuleType::Statistics =>
                "Publishes total/valid event rates and packet gaps.\n\
                 Params: interval_ms.",

            ModuleType::ChannelSink =>
                "Forwards copies of every input packet to the controller.\n\
                 Params: skip_empty.",
        }
    }

    /// Instantiate the module. `queue_capacity` bounds the packet queue of
    /// modules that produce data on their own thread.
    pub fn create(&self, queue_capacity: usize) -> BuiltinModule {
        match self {
            ModuleType::SyntheticSource => BuiltinModule::SyntheticSource(
                SyntheticSourceModule::with_queue_capacity(queue_capacity),
            ),
            ModuleType::NoiseFilter => BuiltinModule::NoiseFilter(NoiseFilterModule::new()),
            ModuleType::ScriptFilter => BuiltinModule::ScriptFilter(ScriptFilterModule::new()),
            ModuleType::Accumulator => BuiltinModule::Accumulator(AccumulatorModule::new()),
            ModuleType::Statistics => BuiltinModule::Statistics(StatisticsModule::new()),
            ModuleType::ChannelSink => BuiltinModule::ChannelSink(ChannelSinkModule::new()),
        }
    }
}

impl std::fmt::Display for ModuleType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}
