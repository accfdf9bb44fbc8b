//! Error handling for SensorFlow
//!
//! This module defines the top-level error type and a Result alias used by
//! the launcher and the configuration layer. The pipeline core has its own
//! [`PipelineError`](crate::pipeline::PipelineError) which converts into this one.

use crate::pipeline::error::PipelineError;
use thiserror::Error;

/// Main error type for SensorFlow operations
#[derive(Error, Debug)]
pub enum SensorFlowError {
    /// Errors raised while building or running the pipeline
    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    /// Errors related to Rhai script compilation or evaluation
    #[error("Script error: {0}")]
    Script(String),

    /// Errors related to configuration loading/saving
    #[error("Configuration error: {0}")]
    Config(String),

    /// Errors related to channel communication
    #[error("Channel error: {0}")]
    Channel(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Generic errors with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<SensorFlowError>,
    },
}

impl SensorFlowError {
    /// Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        SensorFlowError::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Create a script error from a Rhai error
    pub fn from_rhai_error(err: Box<rhai::EvalAltResult>) -> Self {
        SensorFlowError::Script(err.to_string())
    }
}

/// Result type alias for SensorFlow operations
pub type Result<T> = std::result::Result<T, SensorFlowError>;

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error result
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context lazily to an error result
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| e.with_context(f()))
    }
}

impl<T> ResultExt<T> for std::result::Result<T, PipelineError> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| SensorFlowError::from(e).with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| SensorFlowError::from(e).with_context(f()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::id::ModuleId;

    #[test]
    fn test_error_display() {
        let err = SensorFlowError::Config("duplicate module id 3".to_string());
        assert_eq!(err.to_string(), "Configuration error: duplicate module id 3");
    }

    #[test]
    fn test_error_with_context() {
        let err = SensorFlowError::Serialization("bad table".to_string());
        let with_ctx = err.with_context("Failed to load pipeline.toml");
        assert!(with_ctx.to_string().contains("Failed to load pipeline.toml"));
        assert!(with_ctx.to_string().contains("bad table"));
    }

    #[test]
    fn test_pipeline_error_converts_with_context() {
        let res: std::result::Result<(), PipelineError> = Err(PipelineError::DeadCode {
            module: "noise".to_string(),
            id: ModuleId(4),
        });
        let err = res.context("Build failed").unwrap_err();
        let text = err.to_string();
        assert!(text.starts_with("Build failed"));
        assert!(text.contains("noise"));
    }
}
