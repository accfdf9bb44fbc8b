//! Static stream declarations of a module.
//!
//! Every module describes what it consumes and produces with `InputStreamSpec`
//! and `OutputStreamSpec` lists. The compiler checks the wiring against these.

use crate::pipeline::id::EventTypeId;
use std::fmt;

/// Role of a module in the dataflow graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModuleKind {
    /// Produces streams, consumes none.
    Source,
    /// Consumes streams and may modify them or produce new ones.
    Processor,
    /// Consumes streams, produces none.
    Sink,
}

impl fmt::Display for ModuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModuleKind::Source => write!(f, "SOURCE"),
            ModuleKind::Processor => write!(f, "PROCESSOR"),
            ModuleKind::Sink => write!(f, "SINK"),
        }
    }
}

/// Event type accepted by an input spec. `Any` orders before every fixed type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum InputType {
    Any,
    Fixed(EventTypeId),
}

/// How many streams an input spec accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InputCount {
    Any,
    Exactly(u16),
}

impl InputCount {
    pub const ONE: InputCount = InputCount::Exactly(1);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputStreamSpec {
    pub event_type: InputType,
    pub count: InputCount,
    /// The module changes packets of this input in place.
    pub mutates_data: bool,
}

impl InputStreamSpec {
    pub const fn new(event_type: InputType, count: InputCount, mutates_data: bool) -> Self {
        Self {
            event_type,
            count,
            mutates_data,
        }
    }

    pub const fn read_only(event_type: InputType, count: InputCount) -> Self {
        Self::new(event_type, count, false)
    }

    pub const fn mutating(event_type: InputType, count: InputCount) -> Self {
        Self::new(event_type, count, true)
    }

    pub fn accepts(&self, event_type: EventTypeId) -> bool {
        match self.event_type {
            InputType::Any => true,
            InputType::Fixed(t) => t == event_type,
        }
    }
}

/// Event type of an output. `Undefined` defers to the `output` attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputType {
    Undefined,
    Fixed(EventTypeId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputStreamSpec {
    pub event_type: OutputType,
}

impl OutputStreamSpec {
    pub const UNDEFINED: OutputStreamSpec = OutputStreamSpec {
        event_type: OutputType::Undefined,
    };

    pub const fn fixed(event_type: EventTypeId) -> Self {
        Self {
            event_type: OutputType::Fixed(event_type),
        }
    }
}

/// Metadata a module implementation reports about itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleInfo {
    pub name: String,
    pub description: String,
    pub version: u32,
    pub kind: ModuleKind,
    pub inputs: Vec<InputStreamSpec>,
    pub outputs: Vec<OutputStreamSpec>,
}

impl ModuleInfo {
    pub fn new(name: impl Into<String>, kind: ModuleKind) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            version: 1,
            kind,
            inputs: Vec::new(),
            outputs: Vec::new(),
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    pub fn input(mut self, spec: InputStreamSpec) -> Self {
        self.inputs.push(spec);
        self
    }

    pub fn output(mut self, spec: OutputStreamSpec) -> Self {
        self.outputs.push(spec);
        self
    }

    /// True when the outputs come from the `output` attribute.
    pub fn has_undefined_output(&self) -> bool {
        matches!(
            self.outputs.first(),
            Some(OutputStreamSpec {
                event_type: OutputType::Undefined
            })
        )
    }

    /// Fixed output types declared by the module.
    pub fn fixed_outputs(&self) -> impl Iterator<Item = EventTypeId> + '_ {
        self.outputs.iter().filter_map(|o| match o.event_type {
            OutputType::Fixed(t) => Some(t),
            OutputType::Undefined => None,
        })
    }

    /// Check the declaration for internal consistency.
    ///
    /// Returns the reason on failure; the caller attaches the module name.
    pub fn validate(&self) -> Result<(), String> {
        match self.kind {
            ModuleKind::Source => {
                if !self.inputs.is_empty() {
                    return Err("SOURCE module cannot declare inputs".into());
                }
                if self.outputs.is_empty() {
                    return Err("SOURCE module must declare at least one output".into());
                }
            }
            ModuleKind::Sink => {
                if self.inputs.is_empty() {
                    return Err("SINK module must declare at least one input".into());
                }
                if !self.outputs.is_empty() {
                    return Err("SINK module cannot declare outputs".into());
                }
                if self.inputs.iter().any(|i| i.mutates_data) {
                    return Err("SINK module inputs must all be read-only".into());
                }
            }
            ModuleKind::Processor => {
                if self.inputs.is_empty() {
                    return Err("PROCESSOR module must declare at least one input".into());
                }
                if self.outputs.is_empty() && !self.inputs.iter().any(|i| i.mutates_data) {
                    return Err(
                        "PROCESSOR module without outputs must modify at least one input".into(),
                    );
                }
            }
        }

        self.validate_inputs()?;
        self.validate_outputs()
    }

    fn validate_inputs(&self) -> Result<(), String> {
        for (i, spec) in self.inputs.iter().enumerate() {
            if spec.count == InputCount::Exactly(0) {
                return Err("input count cannot be zero".into());
            }
            if spec.event_type == InputType::Any {
                if self.inputs.len() != 1 {
                    return Err("an input of any type must be the only input".into());
                }
                if !matches!(spec.count, InputCount::Any | InputCount::Exactly(1)) {
                    return Err("an input of any type must accept any or exactly one stream".into());
                }
            }
            if i > 0 && self.inputs[i - 1].event_type >= spec.event_type {
                return Err("input types must be unique and in ascending order".into());
            }
        }
        Ok(())
    }

    fn validate_outputs(&self) -> Result<(), String> {
        if self
            .outputs
            .iter()
            .any(|o| o.event_type == OutputType::Undefined)
        {
            if self.outputs.len() != 1 {
                return Err("an undefined output must be the only output".into());
            }
            return Ok(());
        }

        let types: Vec<EventTypeId> = self.fixed_outputs().collect();
        if types.windows(2).any(|w| w[0] >= w[1]) {
            return Err("output types must be unique and in ascending order".into());
        }
        Ok(())
    }
}
