//! Test data builders for configurations and compiler declarations

use sensorflow_rs::config::{ModuleConfig, PipelineConfig};
use sensorflow_rs::pipeline::{
    EventTypeId, InputCount, InputStreamSpec, InputType, ModuleDecl, ModuleId, ModuleInfo,
    ModuleKind, OutputStreamSpec,
};

/// Builder for pipeline configurations
#[derive(Default)]
pub struct ConfigBuilder {
    modules: Vec<ModuleConfig>,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn module(mut self, id: u16, library: &str, input: Option<&str>) -> Self {
        let mut module = ModuleConfig::new(id, format!("{}{}", library, id), library);
        if let Some(input) = input {
            module = module.with_input(input);
        }
        self.modules.push(module);
        self
    }

    /// Modify the most recently added module.
    pub fn with(mut self, f: impl FnOnce(ModuleConfig) -> ModuleConfig) -> Self {
        if let Some(last) = self.modules.pop() {
            self.modules.push(f(last));
        }
        self
    }

    pub fn build(self) -> PipelineConfig {
        PipelineConfig {
            modules: self.modules,
            ..Default::default()
        }
    }
}

/// Builder for compiler declarations, one event type per stream
pub struct DeclBuilder {
    id: u16,
    info: ModuleInfo,
    input: Option<String>,
    output: Option<String>,
}

impl DeclBuilder {
    pub fn source(id: u16, event_type: u16) -> Self {
        Self {
            id,
            info: ModuleInfo::new("source", ModuleKind::Source)
                .output(OutputStreamSpec::fixed(EventTypeId(event_type))),
            input: None,
            output: None,
        }
    }

    pub fn processor(id: u16, input: &str) -> Self {
        Self {
            id,
            info: ModuleInfo::new("processor", ModuleKind::Processor),
            input: Some(input.to_string()),
            output: None,
        }
    }

    pub fn sink(id: u16, input: &str) -> Self {
        Self {
            id,
            info: ModuleInfo::new("sink", ModuleKind::Sink)
                .input(InputStreamSpec::read_only(InputType::Any, InputCount::Any)),
            input: Some(input.to_string()),
            output: None,
        }
    }

    pub fn reads(mut self, event_type: u16, count: InputCount, mutates: bool) -> Self {
        self.info = self.info.input(InputStreamSpec::new(
            InputType::Fixed(EventTypeId(event_type)),
            count,
            mutates,
        ));
        self
    }

    pub fn outputs(mut self, event_type: u16) -> Self {
        self.info = self
            .info
            .output(OutputStreamSpec::fixed(EventTypeId(event_type)));
        self
    }

    pub fn build(self) -> ModuleDecl {
        let name = format!("{}{}", self.info.name, self.id);
        ModuleDecl {
            id: ModuleId(self.id),
            name,
            info: self.info,
            input: self.input,
            output: self.output,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_builder() {
        let config = ConfigBuilder::new()
            .module(1, "synthetic_source", None)
            .module(2, "statistics", Some("1[1]"))
            .with(|m| m.with_run_at_startup(false))
            .build();

        assert_eq!(config.modules.len(), 2);
        assert_eq!(config.modules[1].name, "statistics2");
        assert!(!config.modules[1].run_at_startup);
        assert!(config.validate().is_ok());
    }
}
