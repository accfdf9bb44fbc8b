//! Pipeline-specific error types.

use crate::pipeline::id::ModuleId;
use thiserror::Error;

/// Errors that can occur while building or driving the pipeline.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Malformed or inconsistent wiring. Fatal to start.
    #[error("Module '{module}': {reason}")]
    Configuration { module: String, reason: String },

    /// A stream or cross-stream ordering cycle.
    #[error("Cycle detected: {0}")]
    GraphCycle(String),

    /// A processor whose results nobody consumes.
    #[error(
        "Module '{module}' ({id}): none of the outputs or modified inputs of this processor are used anywhere as inputs"
    )]
    DeadCode { module: String, id: ModuleId },

    /// A module callback failed. Only the module and its dependents stop.
    #[error("Module '{module}' ({id}) {callback} failed: {reason}")]
    Callback {
        module: String,
        id: ModuleId,
        callback: &'static str,
        reason: String,
    },

    #[error("Resource allocation failed: {0}")]
    ResourceAllocation(String),

    #[error("Unknown module {0}")]
    UnknownModule(ModuleId),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Channel send error")]
    ChannelSend,

    #[error("Channel receive error")]
    ChannelRecv,
}

/// Coarse category of a [`PipelineError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Configuration,
    GraphCycle,
    DeadCode,
    RuntimeCallback,
    ResourceAllocation,
    Other,
}

impl PipelineError {
    pub fn config(module: impl Into<String>, reason: impl Into<String>) -> Self {
        PipelineError::Configuration {
            module: module.into(),
            reason: reason.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::Configuration { .. } | PipelineError::UnknownModule(_) => {
                ErrorKind::Configuration
            }
            PipelineError::GraphCycle(_) => ErrorKind::GraphCycle,
            PipelineError::DeadCode { .. } => ErrorKind::DeadCode,
            PipelineError::Callback { .. } => ErrorKind::RuntimeCallback,
            PipelineError::ResourceAllocation(_) => ErrorKind::ResourceAllocation,
            _ => ErrorKind::Other,
        }
    }

    /// True for errors that must stop a build before any module runs.
    pub fn is_fatal(&self) -> bool {
        !matches!(self.kind(), ErrorKind::RuntimeCallback)
    }
}

pub type PipelineResult<T> = std::result::Result<T, PipelineError>;

/// Errors returned by module callbacks.
#[derive(Error, Debug)]
pub enum ModuleError {
    #[error("{0}")]
    Failed(String),

    #[error("invalid parameter '{key}': {reason}")]
    InvalidParam { key: String, reason: String },

    #[error("script error: {0}")]
    Script(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ModuleError {
    pub fn failed(reason: impl Into<String>) -> Self {
        ModuleError::Failed(reason.into())
    }
}

pub type ModuleResult<T> = std::result::Result<T, ModuleError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configuration_error_names_module() {
        let err = PipelineError::config("noise", "Invalid 'input' attribute: missing ']'");
        assert_eq!(
            err.to_string(),
            "Module 'noise': Invalid 'input' attribute: missing ']'"
        );
        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert!(err.is_fatal());
    }

    #[test]
    fn test_callback_error_is_not_fatal() {
        let err = PipelineError::Callback {
            module: "stats".into(),
            id: ModuleId(7),
            callback: "run",
            reason: "boom".into(),
        };
        assert_eq!(err.kind(), ErrorKind::RuntimeCallback);
        assert!(!err.is_fatal());
        assert!(err.to_string().contains("run failed: boom"));
    }
}
