//! Built-in pipeline module implementations.

pub mod accumulator;
pub mod channel_sink;
pub mod noise_filter;
pub mod script_filter;
pub mod statistics;
pub mod synthetic_source;

pub use accumulator::AccumulatorModule;
pub use channel_sink::ChannelSinkModule;
pub use noise_filter::NoiseFilterModule;
pub use script_filter::ScriptFilterModule;
pub use statistics::StatisticsModule;
pub use synthetic_source::SyntheticSourceModule;
