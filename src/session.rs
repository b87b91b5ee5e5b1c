//! Session module: name-based patching on top of an engine handle.
//!
//! A `Registry` turns type names and key/value configuration into units.
//! A `Session` binds user-chosen names to mounted units, so ports can be
//! addressed as `"name.port"`.

use crate::control::{PortRef, Signal, Snapshot};
use crate::engine::Handle;
use crate::error::{EngineError, PatchError};
use crate::unit::{Unit, UnitConfig, UnitId};
use crate::units;
use std::collections::HashMap;

/// Builds a unit from its configuration.
pub type Builder = fn(&UnitConfig) -> Result<Unit, PatchError>;

/// Unit builders by type name.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    builders: HashMap<String, Builder>,
}

impl Registry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding the reference units.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register("blank", units::build_blank);
        registry.register("gain", units::build_gain);
        registry.register("mix", units::build_mix);
        registry.register("sine", units::build_sine);
        registry.register("constant", units::build_constant);
        registry.register("impulse", units::build_impulse);
        registry
    }

    /// Register (or replace) the builder for `type_name`.
    pub fn register(&mut self, type_name: impl Into<String>, builder: Builder) {
        self.builders.insert(type_name.into(), builder);
    }

    /// Build a unit of `type_name`.
    pub fn build(&self, type_name: &str, config: &UnitConfig) -> Result<Unit, PatchError> {
        let builder = self
            .builders
            .get(type_name)
            .ok_or_else(|| PatchError::UnknownType(type_name.to_string()))?;
        builder(config)
    }

    /// Registered type names, sorted.
    pub fn types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.builders.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }
}

/// Named units over a running engine.
pub struct Session {
    handle: Handle,
    registry: Registry,
    names: HashMap<String, UnitId>,
}

impl Session {
    /// A session sending through `handle`.
    pub fn new(handle: Handle, registry: Registry) -> Self {
        Self {
            handle,
            registry,
            names: HashMap::new(),
        }
    }

    /// Build and mount a unit under `name`.
    ///
    /// If `name` is already bound, the new unit takes over the old one's
    /// patches through a swap.
    pub fn mount(
        &mut self,
        name: &str,
        type_name: &str,
        config: &UnitConfig,
    ) -> Result<UnitId, EngineError> {
        let unit = self.registry.build(type_name, config)?;
        let id = self.handle.mount(unit)?;
        if let Some(&old) = self.names.get(name) {
            if let Err(e) = self.handle.swap(old, id) {
                // Nothing would be bound to the replacement.
                let _ = self.handle.unmount(id);
                return Err(e);
            }
        }
        self.names.insert(name.to_string(), id);
        tracing::debug!(name, type_name, unit = %id, "unit bound");
        Ok(id)
    }

    /// Unmount the unit bound to `name` and forget the name.
    pub fn unmount(&mut self, name: &str) -> Result<(), EngineError> {
        let id = self.unit(name)?;
        self.handle.unmount(id)?;
        self.names.remove(name);
        tracing::debug!(name, unit = %id, "unit unbound");
        Ok(())
    }

    /// Patch output path `from` into input path `to`.
    pub fn patch(&self, from: &str, to: &str) -> Result<(), EngineError> {
        let source = self.resolve(from)?;
        let input = self.resolve(to)?;
        self.handle.patch(source, input)
    }

    /// Hold a literal on input path `to`.
    pub fn set(&self, to: &str, value: f32) -> Result<(), EngineError> {
        let input = self.resolve(to)?;
        self.handle.patch(value, input)
    }

    /// Unpatch input path `to`.
    pub fn unpatch(&self, to: &str) -> Result<(), EngineError> {
        let input = self.resolve(to)?;
        self.handle.unpatch(input)
    }

    /// Replace the unit named `old` with the one named `new`. `old` is
    /// forgotten.
    pub fn swap(&mut self, old: &str, new: &str) -> Result<UnitId, EngineError> {
        let old_id = self.unit(old)?;
        let new_id = self.unit(new)?;
        let kept = self.handle.swap(old_id, new_id)?;
        self.names.remove(old);
        Ok(kept)
    }

    /// Send output path `from` to one sink channel, or all of them.
    pub fn emit(&self, from: &str, channel: Option<usize>) -> Result<(), EngineError> {
        let source = self.resolve(from)?;
        self.handle.emit(Signal::Output(source), channel)
    }

    /// Graph and plan statistics.
    pub fn inspect(&self) -> Result<Snapshot, EngineError> {
        self.handle.inspect()
    }

    /// Reset the engine and forget every name.
    pub fn clear(&mut self) -> Result<(), EngineError> {
        self.handle.reset()?;
        self.names.clear();
        tracing::debug!("session cleared");
        Ok(())
    }

    /// The unit bound to `name`.
    pub fn unit(&self, name: &str) -> Result<UnitId, EngineError> {
        self.names
            .get(name)
            .copied()
            .ok_or_else(|| PatchError::UnknownName(name.to_string()).into())
    }

    /// Bound names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.names.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// The registry units are built from.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    fn resolve(&self, path: &str) -> Result<PortRef, EngineError> {
        let (name, port) = split_path(path)?;
        Ok(PortRef::new(self.unit(name)?, port))
    }
}

/// Split `"unit.port"` at its last dot.
pub fn split_path(path: &str) -> Result<(&str, &str), PatchError> {
    match path.rsplit_once('.') {
        Some((unit, port)) if !unit.is_empty() && !port.is_empty() => Ok((unit, port)),
        _ => Err(PatchError::MalformedPath(path.to_string())),
    }
}
