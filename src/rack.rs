//! Rack module: the audio-thread owned patch state and its mutations.
//!
//! The rack holds the graph (units and ports as nodes), the output sink and
//! the cached plan. Every mutation leaves the graph consistent: an input has
//! at most one source, and an input without a source reads a constant.

// IMPORTANT: Runs on the audio thread. No tracing in here.

use crate::config::EngineConfig;
use crate::control::{Command, PortRef, Signal, Snapshot, Value};
use crate::error::PatchError;
use crate::graph::{Graph, NodeKey};
use crate::invariant_ppt::{check_invariant, FAN_IN_SINGLE};
use crate::plan::{FeedbackPolicy, Plan};
use crate::port::{Input, Mode, Output};
use crate::unit::{Unit, UnitId};
use crate::units;
use std::collections::HashMap;

/// Payload of a graph node.
#[derive(Debug)]
pub enum Vertex {
    /// A mounted unit.
    Unit {
        /// Its id.
        id: UnitId,
        /// The unit itself.
        unit: Unit,
    },
    /// Input `index` of the unit at `owner`.
    Input {
        /// The owning unit's node.
        owner: NodeKey,
        /// Position among the owner's inputs.
        index: usize,
    },
    /// Output `index` of the unit at `owner`.
    Output {
        /// The owning unit's node.
        owner: NodeKey,
        /// Position among the owner's outputs.
        index: usize,
    },
}

impl Vertex {
    pub(crate) fn input(graph: &Graph<Vertex>, owner: NodeKey, index: usize) -> Option<&Input> {
        match graph.get(owner) {
            Some(Vertex::Unit { unit, .. }) => unit.ports().input(index),
            _ => None,
        }
    }

    pub(crate) fn input_mut(
        graph: &mut Graph<Vertex>,
        owner: NodeKey,
        index: usize,
    ) -> Option<&mut Input> {
        match graph.get_mut(owner) {
            Some(Vertex::Unit { unit, .. }) => unit.ports_mut().input_mut(index),
            _ => None,
        }
    }

    fn output_mut(graph: &mut Graph<Vertex>, owner: NodeKey, index: usize) -> Option<&mut Output> {
        match graph.get_mut(owner) {
            Some(Vertex::Unit { unit, .. }) => unit.ports_mut().output_mut(index),
            _ => None,
        }
    }
}

// Node keys of a mounted unit and its ports.
#[derive(Debug, Clone)]
struct Mounted {
    node: NodeKey,
    inputs: Vec<NodeKey>,
    outputs: Vec<NodeKey>,
}

// A resolved port: owning unit node, port position, port node.
#[derive(Debug, Clone, Copy)]
struct Resolved {
    owner: NodeKey,
    index: usize,
    node: NodeKey,
}

/// Patch state owned by the audio thread.
#[derive(Debug)]
pub struct Rack {
    graph: Graph<Vertex>,
    mounted: HashMap<UnitId, Mounted>,
    sink: UnitId,
    plan: Plan,
    next_id: u64,
    sample_rate: f32,
    block_size: usize,
    channels: usize,
    policy: FeedbackPolicy,
}

impl Rack {
    /// A rack holding only the output sink.
    pub fn new(config: &EngineConfig) -> Self {
        let mut rack = Self {
            graph: Graph::new(),
            mounted: HashMap::new(),
            sink: UnitId(0),
            plan: Plan::default(),
            next_id: 0,
            sample_rate: config.sample_rate,
            block_size: config.block_size,
            channels: config.channels,
            policy: config.feedback,
        };
        rack.install_sink();
        rack
    }

    /// Apply one command.
    pub fn apply(&mut self, command: Command) -> Result<Value, PatchError> {
        match command {
            Command::Mount(unit) => self.mount(*unit).map(Value::Unit),
            Command::Unmount(id) => self.unmount(id).map(|()| Value::None),
            Command::Patch { source, input } => self.patch(source, &input).map(|()| Value::None),
            Command::Unpatch(input) => self.unpatch(&input).map(|()| Value::None),
            Command::Swap { old, new } => self.swap(old, new).map(Value::Unit),
            Command::Reset => {
                self.reset();
                Ok(Value::None)
            }
            Command::Emit { source, channel } => self.emit(source, channel).map(|()| Value::None),
            Command::Inspect => Ok(Value::Snapshot(self.snapshot())),
        }
    }

    /// Render one block into `output`, one slice per channel.
    ///
    /// Rebuilds the plan first when the graph changed. Channels beyond the
    /// sink's inputs are silenced.
    pub fn process(&mut self, output: &mut [Vec<f32>]) -> bool {
        let rebuilt = self.refresh_plan();
        self.plan.execute(&mut self.graph, self.block_size);

        let sink = self.mounted.get(&self.sink).map(|m| m.node);
        let sink = sink.and_then(|node| match self.graph.get(node) {
            Some(Vertex::Unit { unit, .. }) => Some(unit),
            _ => None,
        });
        for (ch, buf) in output.iter_mut().enumerate() {
            match sink.and_then(|unit| unit.ports().input(ch)) {
                Some(input) => {
                    for (i, sample) in buf.iter_mut().take(self.block_size).enumerate() {
                        *sample = input.read(i);
                    }
                }
                None => buf.fill(0.0),
            }
        }
        rebuilt
    }

    /// Rebuild the plan if the graph changed. Returns whether it did.
    pub fn refresh_plan(&mut self) -> bool {
        if !self.graph.is_changed() {
            return false;
        }
        self.plan = Plan::build(&mut self.graph, self.policy);
        self.graph.mark_clean();
        true
    }

    /// Attach a unit and its ports.
    pub fn mount(&mut self, mut unit: Unit) -> Result<UnitId, PatchError> {
        unit.validate()?;
        unit.prepare(self.sample_rate, self.block_size);
        let id = UnitId(self.next_id);
        self.next_id += 1;

        let input_count = unit.ports().inputs().len();
        let output_count = unit.ports().outputs().len();
        let node = self.graph.add_node(Vertex::Unit { id, unit });
        let mut inputs = Vec::with_capacity(input_count);
        for index in 0..input_count {
            let port = self.graph.add_node(Vertex::Input { owner: node, index });
            self.graph.connect(port, node)?;
            inputs.push(port);
        }
        let mut outputs = Vec::with_capacity(output_count);
        for index in 0..output_count {
            let port = self.graph.add_node(Vertex::Output { owner: node, index });
            self.graph.connect(node, port)?;
            outputs.push(port);
        }
        self.mounted.insert(
            id,
            Mounted {
                node,
                inputs,
                outputs,
            },
        );
        Ok(id)
    }

    /// Detach a unit. Every input it fed is reset first.
    pub fn unmount(&mut self, id: UnitId) -> Result<(), PatchError> {
        if id == self.sink {
            return Err(PatchError::SinkProtected);
        }
        self.detach(id)
    }

    /// Patch a literal or an output into `input`.
    pub fn patch(&mut self, source: Signal, input: &PortRef) -> Result<(), PatchError> {
        match source {
            Signal::Constant(value) => self.patch_constant(value, input),
            Signal::Output(output) => self.patch_output(&output, input),
        }
    }

    /// Connect `output` to `input`, replacing the input's previous source.
    pub fn patch_output(&mut self, output: &PortRef, input: &PortRef) -> Result<(), PatchError> {
        let src = self.resolve_output(output)?;
        let dst = self.resolve_input(input)?;
        self.release_input(dst.node)?;
        self.graph.connect(src.node, dst.node)?;

        let tap = match Vertex::output_mut(&mut self.graph, src.owner, src.index) {
            Some(out) => {
                out.attach();
                out.tap()
            }
            None => return Err(self.unknown_output(output)),
        };
        if let Some(port) = Vertex::input_mut(&mut self.graph, dst.owner, dst.index) {
            port.couple(tap);
        }
        check_invariant(
            FAN_IN_SINGLE,
            self.graph.in_degree(dst.node) == 1,
            "Patched input has exactly one source",
        );
        Ok(())
    }

    /// Unpatch `input` and hold `value` on it.
    pub fn patch_constant(&mut self, value: f32, input: &PortRef) -> Result<(), PatchError> {
        let dst = self.resolve_input(input)?;
        self.unpatch_node(dst)?;
        if let Some(port) = Vertex::input_mut(&mut self.graph, dst.owner, dst.index) {
            port.fill(value);
        }
        Ok(())
    }

    /// Remove `input`'s connection and reset it to its normal.
    pub fn unpatch(&mut self, input: &PortRef) -> Result<(), PatchError> {
        let dst = self.resolve_input(input)?;
        self.unpatch_node(dst)
    }

    /// Move `old`'s patches onto `new` and unmount `old`.
    ///
    /// Units of different types are not interchangeable; `old` is simply
    /// unmounted. Returns the surviving unit.
    pub fn swap(&mut self, old: UnitId, new: UnitId) -> Result<UnitId, PatchError> {
        if old == self.sink || new == self.sink {
            return Err(PatchError::SinkProtected);
        }
        let old_mounted = self.mounted(old)?.clone();
        let new_node = self.mounted(new)?.node;
        if old == new {
            return Ok(new);
        }
        if self.unit_at(old_mounted.node).map(Unit::type_name)
            != self.unit_at(new_node).map(Unit::type_name)
        {
            self.unmount(old)?;
            return Ok(new);
        }

        for &input_node in &old_mounted.inputs {
            let (name, constant) = match self.input_at(input_node) {
                Some(port) => (port.name().to_string(), port.constant()),
                None => continue,
            };
            if !self.has_input(new_node, &name) {
                continue;
            }
            let target = PortRef::new(new, name);
            let source = self.graph.predecessors(input_node).next();
            match source.and_then(|src| self.port_ref(src)) {
                Some(src) if src.unit == old => {
                    if self.has_output(new_node, &src.port) {
                        self.patch_output(&PortRef::new(new, src.port), &target)?;
                    }
                }
                Some(src) => self.patch_output(&src, &target)?,
                None => {
                    if let Some(value) = constant {
                        self.patch_constant(value, &target)?;
                    }
                }
            }
        }

        for &output_node in &old_mounted.outputs {
            let name = match self.graph.get(output_node) {
                Some(&Vertex::Output { owner, index }) => self
                    .unit_at(owner)
                    .and_then(|u| u.ports().output(index))
                    .map(|o| o.name().to_string()),
                _ => None,
            };
            let Some(name) = name.filter(|n| self.has_output(new_node, n)) else {
                continue;
            };
            let source = PortRef::new(new, name);
            let destinations: Vec<NodeKey> = self.graph.successors(output_node).collect();
            for dst in destinations {
                let Some(target) = self.port_ref(dst) else {
                    continue;
                };
                if target.unit == old {
                    // Already carried over with the old unit's inputs.
                    continue;
                }
                self.patch_output(&source, &target)?;
            }
        }

        self.unmount(old)?;
        Ok(new)
    }

    /// Discard every unit and patch, leaving only a fresh sink.
    pub fn reset(&mut self) {
        let keys = self.graph.keys();
        for key in keys {
            if let Ok(Vertex::Unit { mut unit, .. }) = self.graph.remove_node(key) {
                unit.release();
            }
        }
        self.graph = Graph::new();
        self.mounted.clear();
        self.install_sink();
    }

    /// Patch into the sink: one channel, or every channel when `None`.
    pub fn emit(&mut self, source: Signal, channel: Option<usize>) -> Result<(), PatchError> {
        let channels = match channel {
            Some(ch) if ch < self.channels => ch..ch + 1,
            Some(ch) => return Err(PatchError::UnknownChannel(ch)),
            None => 0..self.channels,
        };
        for ch in channels {
            let input = PortRef::new(self.sink, units::channel_name(ch));
            self.patch(source.clone(), &input)?;
        }
        Ok(())
    }

    /// Graph and plan statistics. Rebuilds the plan if stale.
    pub fn snapshot(&mut self) -> Snapshot {
        self.refresh_plan();
        let sorted = self.graph.sort().to_vec();
        let groups: Vec<Vec<UnitId>> = sorted
            .iter()
            .map(|group| {
                group
                    .iter()
                    .filter_map(|&k| match self.graph.get(k) {
                        Some(Vertex::Unit { id, .. }) => Some(*id),
                        _ => None,
                    })
                    .collect::<Vec<_>>()
            })
            .filter(|ids| !ids.is_empty())
            .collect();
        let sample_inputs = self
            .graph
            .keys()
            .into_iter()
            .filter(|&k| self.input_at(k).map(Input::mode) == Some(Mode::Sample))
            .filter_map(|k| self.port_ref(k))
            .collect();
        Snapshot {
            size: self.graph.size(),
            connections: self.graph.connection_count(),
            units: self.mounted.len(),
            groups,
            sample_inputs,
        }
    }

    /// Read mode of an input, as decided by the latest plan.
    pub fn input_mode(&self, input: &PortRef) -> Result<Mode, PatchError> {
        let dst = self.resolve_input(input)?;
        self.input_at(dst.node)
            .map(Input::mode)
            .ok_or_else(|| self.unknown_input(input))
    }

    /// The output this input is patched to, if any.
    pub fn source_of(&self, input: &PortRef) -> Result<Option<PortRef>, PatchError> {
        let dst = self.resolve_input(input)?;
        Ok(self
            .graph
            .predecessors(dst.node)
            .next()
            .and_then(|src| self.port_ref(src)))
    }

    /// Borrow a mounted unit.
    pub fn unit(&self, id: UnitId) -> Option<&Unit> {
        self.mounted.get(&id).and_then(|m| self.unit_at(m.node))
    }

    /// Id of the output sink.
    pub fn sink(&self) -> UnitId {
        self.sink
    }

    /// The underlying graph.
    pub fn graph(&self) -> &Graph<Vertex> {
        &self.graph
    }

    pub(crate) fn graph_mut(&mut self) -> &mut Graph<Vertex> {
        &mut self.graph
    }

    /// Graph node count.
    pub fn size(&self) -> usize {
        self.graph.size()
    }

    /// The current plan.
    pub fn plan(&self) -> &Plan {
        &self.plan
    }

    /// Samples per block.
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    fn install_sink(&mut self) {
        // Sink port names are generated unique, so mounting cannot fail.
        if let Ok(id) = self.mount(units::sink(self.channels)) {
            self.sink = id;
        }
    }

    fn detach(&mut self, id: UnitId) -> Result<(), PatchError> {
        let mounted = self.mounted(id)?.clone();
        for &output in &mounted.outputs {
            let destinations: Vec<NodeKey> = self.graph.successors(output).collect();
            for dst in destinations {
                if let Some(&Vertex::Input { owner, index }) = self.graph.get(dst) {
                    self.unpatch_node(Resolved {
                        owner,
                        index,
                        node: dst,
                    })?;
                }
            }
        }
        for &input in &mounted.inputs {
            self.release_input(input)?;
        }
        for &port in mounted.inputs.iter().chain(&mounted.outputs) {
            self.graph.remove_node(port)?;
        }
        if let Vertex::Unit { mut unit, .. } = self.graph.remove_node(mounted.node)? {
            unit.release();
        }
        self.mounted.remove(&id);
        Ok(())
    }

    fn unpatch_node(&mut self, dst: Resolved) -> Result<(), PatchError> {
        self.release_input(dst.node)?;
        if let Some(port) = Vertex::input_mut(&mut self.graph, dst.owner, dst.index) {
            port.reset();
        }
        Ok(())
    }

    // Remove every connection into an input node without touching its buffer.
    fn release_input(&mut self, input: NodeKey) -> Result<(), PatchError> {
        let sources: Vec<NodeKey> = self.graph.predecessors(input).collect();
        for src in sources {
            self.graph.disconnect(src, input)?;
            if let Some(&Vertex::Output { owner, index }) = self.graph.get(src) {
                if let Some(out) = Vertex::output_mut(&mut self.graph, owner, index) {
                    out.detach();
                }
            }
        }
        Ok(())
    }

    fn mounted(&self, id: UnitId) -> Result<&Mounted, PatchError> {
        self.mounted.get(&id).ok_or(PatchError::UnknownUnit(id))
    }

    fn unit_at(&self, node: NodeKey) -> Option<&Unit> {
        match self.graph.get(node) {
            Some(Vertex::Unit { unit, .. }) => Some(unit),
            _ => None,
        }
    }

    fn input_at(&self, node: NodeKey) -> Option<&Input> {
        match self.graph.get(node) {
            Some(&Vertex::Input { owner, index }) => Vertex::input(&self.graph, owner, index),
            _ => None,
        }
    }

    fn has_input(&self, unit: NodeKey, name: &str) -> bool {
        self.unit_at(unit)
            .is_some_and(|u| u.ports().input_index(name).is_some())
    }

    fn has_output(&self, unit: NodeKey, name: &str) -> bool {
        self.unit_at(unit)
            .is_some_and(|u| u.ports().output_index(name).is_some())
    }

    // Map a port node back to its address.
    fn port_ref(&self, node: NodeKey) -> Option<PortRef> {
        let (owner, name) = match self.graph.get(node)? {
            &Vertex::Input { owner, index } => (
                owner,
                self.unit_at(owner)?.ports().input(index)?.name().to_string(),
            ),
            &Vertex::Output { owner, index } => (
                owner,
                self.unit_at(owner)?.ports().output(index)?.name().to_string(),
            ),
            Vertex::Unit { .. } => return None,
        };
        match self.graph.get(owner)? {
            Vertex::Unit { id, .. } => Some(PortRef::new(*id, name)),
            _ => None,
        }
    }

    fn resolve_input(&self, port: &PortRef) -> Result<Resolved, PatchError> {
        let mounted = self.mounted(port.unit)?;
        let index = self
            .unit_at(mounted.node)
            .and_then(|u| u.ports().input_index(&port.port))
            .ok_or_else(|| self.unknown_input(port))?;
        Ok(Resolved {
            owner: mounted.node,
            index,
            node: mounted.inputs[index],
        })
    }

    fn resolve_output(&self, port: &PortRef) -> Result<Resolved, PatchError> {
        let mounted = self.mounted(port.unit)?;
        let index = self
            .unit_at(mounted.node)
            .and_then(|u| u.ports().output_index(&port.port))
            .ok_or_else(|| self.unknown_output(port))?;
        Ok(Resolved {
            owner: mounted.node,
            index,
            node: mounted.outputs[index],
        })
    }

    fn unknown_input(&self, port: &PortRef) -> PatchError {
        PatchError::UnknownPort {
            unit: port.unit,
            port: port.port.clone(),
            direction: "input",
        }
    }

    fn unknown_output(&self, port: &PortRef) -> PatchError {
        PatchError::UnknownPort {
            unit: port.unit,
            port: port.port.clone(),
            direction: "output",
        }
    }
}
