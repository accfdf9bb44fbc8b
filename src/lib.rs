//! # SensorFlow-RS: configuration-wired dataflow for sensor events
//!
//! A pipeline is a set of module instances (sources, processors, sinks)
//! wired together by two text attributes in the configuration. From that
//! wiring the compiler derives a single global execution order, a slot
//! table for passing packets between modules and the places where a packet
//! must be copied so that in-place modification stays invisible to readers
//! of the unmodified stream.
//!
//! ## Architecture
//!
//! - **Config**: TOML/JSON pipeline description, see [`config`]
//! - **Compiler**: wiring validation, stream trees, ordering and slot
//!   assignment, see [`pipeline::PipelineCompiler`]
//! - **Executor**: a single thread ticking every module in order and driving
//!   the per-module lifecycle, see [`pipeline::Pipeline`]
//! - **Scripting**: Rhai predicates for the script filter module
//! - **Communication**: crossbeam channels between the pipeline thread and
//!   its controller
//!
//! ## Example
//!
//! ```ignore
//! use sensorflow_rs::config::{ModuleConfig, PipelineConfig};
//! use sensorflow_rs::pipeline::PipelineBuilder;
//!
//! let config = PipelineConfig {
//!     modules: vec![
//!         ModuleConfig::new(1, "camera", "synthetic_source"),
//!         ModuleConfig::new(2, "denoise", "noise_filter").with_input("1[1]"),
//!         ModuleConfig::new(3, "stats", "statistics").with_input("1[1a2]"),
//!     ],
//!     ..Default::default()
//! };
//!
//! let handle = PipelineBuilder::new(config).spawn()?;
//! while let Some(msg) = handle.bridge.recv_timeout(std::time::Duration::from_secs(1)) {
//!     println!("{:?}", msg);
//! }
//! handle.join();
//! ```

pub mod config;
pub mod error;
pub mod pipeline;
pub mod scripting;

// Re-export commonly used types
pub use config::{ConfigValue, ModuleConfig, PipelineConfig};
pub use error::{Result, SensorFlowError};
pub use pipeline::{Pipeline, PipelineBridge, PipelineBuilder, PipelineError};
pub use scripting::ScriptEngine;
