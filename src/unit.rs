//! Units: named, stateful processing nodes and the contract their DSP
//! implements.

#![forbid(unsafe_code)]

use crate::error::PatchError;
use crate::port::{Input, Output, Ports, Rate};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;

/// Identity of a mounted unit, assigned by the rack that mounts it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UnitId(pub u64);

impl UnitId {
    /// Reference one of this unit's ports by name.
    pub fn port(self, name: impl Into<String>) -> crate::control::PortRef {
        crate::control::PortRef::new(self, name)
    }
}

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A configuration value handed to a unit builder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConfigValue {
    /// Boolean flag.
    Bool(bool),
    /// Numeric setting.
    Number(f64),
    /// Free-form text.
    Text(String),
}

/// Opaque per-unit configuration, validated by each builder.
pub type UnitConfig = BTreeMap<String, ConfigValue>;

/// Read a numeric key, falling back to `default` when absent.
pub fn config_number(config: &UnitConfig, key: &str, default: f64) -> Result<f64, PatchError> {
    match config.get(key) {
        None => Ok(default),
        Some(ConfigValue::Number(n)) => Ok(*n),
        Some(other) => Err(PatchError::InvalidConfig {
            key: key.to_string(),
            message: format!("expected a number, got {:?}", other),
        }),
    }
}

/// The DSP side of a unit. Implement this for your processors.
///
/// Ports are read and written through `Ports`, indexed in the order they
/// were declared on the `Unit`.
pub trait Processor: Send {
    /// Called once at mount, after port buffers are sized.
    fn prepare(&mut self, _sample_rate: f32, _block_size: usize) {}

    /// Compute sample `index`.
    fn process_sample(&mut self, ports: &Ports, index: usize);

    /// Compute a whole block. Override when a block loop is cheaper.
    fn process_block(&mut self, ports: &Ports, len: usize) {
        for i in 0..len {
            self.process_sample(ports, i);
        }
    }

    /// Whether the unit is currently worth processing. `None` means the unit
    /// does not take part in conditional processing.
    fn is_active(&self, _ports: &Ports) -> Option<bool> {
        None
    }

    /// Release held resources; called when the unit is unmounted.
    fn release(&mut self) {}
}

/// A unit: type name, ports, rate and an optional processor.
pub struct Unit {
    type_name: Cow<'static, str>,
    rate: Option<Rate>,
    ports: Ports,
    processor: Option<Box<dyn Processor>>,
}

impl fmt::Debug for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Unit")
            .field("type_name", &self.type_name)
            .field("rate", &self.rate)
            .field("ports", &self.ports)
            .field("processor", &self.processor.is_some())
            .finish()
    }
}

impl Unit {
    /// A unit with no ports that does nothing until given a processor.
    pub fn new(type_name: impl Into<Cow<'static, str>>) -> Self {
        Self {
            type_name: type_name.into(),
            rate: None,
            ports: Ports::new(),
            processor: None,
        }
    }

    /// Attach the processor.
    pub fn with_processor(mut self, processor: impl Processor + 'static) -> Self {
        self.processor = Some(Box::new(processor));
        self
    }

    /// Declare an input reading `normal` while unpatched.
    pub fn input(mut self, name: impl Into<String>, normal: f32) -> Self {
        self.ports.push_input(Input::new(name, normal));
        self
    }

    /// Declare an output.
    pub fn output(mut self, name: impl Into<String>) -> Self {
        self.ports.push_output(Output::new(name));
        self
    }

    /// Declare the execution rate.
    pub fn with_rate(mut self, rate: Rate) -> Self {
        self.rate = Some(rate);
        self
    }

    /// Type name, used to decide whether two units can be swapped.
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// Declared rate, if any.
    pub fn rate(&self) -> Option<Rate> {
        self.rate
    }

    /// The unit's ports.
    pub fn ports(&self) -> &Ports {
        &self.ports
    }

    pub(crate) fn ports_mut(&mut self) -> &mut Ports {
        &mut self.ports
    }

    /// Whether the plan should schedule this unit.
    pub fn is_schedulable(&self) -> bool {
        match &self.processor {
            Some(processor) => processor.is_active(&self.ports) != Some(false),
            None => false,
        }
    }

    /// Reject port sets with duplicate names.
    pub(crate) fn validate(&self) -> Result<(), PatchError> {
        let inputs = self.ports.inputs().iter().map(Input::name);
        let outputs = self.ports.outputs().iter().map(Output::name);
        for names in [inputs.collect::<Vec<_>>(), outputs.collect::<Vec<_>>()] {
            for (i, name) in names.iter().enumerate() {
                if names[..i].contains(name) {
                    return Err(PatchError::DuplicatePort {
                        unit_type: self.type_name.to_string(),
                        port: name.to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Size buffers and let the processor allocate its state.
    pub(crate) fn prepare(&mut self, sample_rate: f32, block_size: usize) {
        self.ports
            .prepare(block_size, self.rate.unwrap_or(Rate::Audio));
        if let Some(processor) = &mut self.processor {
            processor.prepare(sample_rate, block_size);
        }
    }

    /// Run one block. Control-rate units only compute sample 0.
    #[inline]
    pub(crate) fn process_block(&mut self, len: usize) {
        let Self {
            processor,
            ports,
            rate,
            ..
        } = self;
        if let Some(processor) = processor {
            if *rate == Some(Rate::Control) {
                processor.process_sample(ports, 0);
            } else {
                processor.process_block(ports, len);
            }
        }
    }

    /// Run one sample of a feedback group.
    #[inline]
    pub(crate) fn process_sample(&mut self, index: usize) {
        if self.rate == Some(Rate::Control) && index != 0 {
            return;
        }
        let Self {
            processor, ports, ..
        } = self;
        if let Some(processor) = processor {
            processor.process_sample(ports, index);
        }
    }

    pub(crate) fn release(&mut self) {
        if let Some(processor) = &mut self.processor {
            processor.release();
        }
    }
}
