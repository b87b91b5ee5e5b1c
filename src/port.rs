//! Ports: per-block sample buffers and their coupling rules.
//!
//! An `Output` owns its block. An `Input` either owns a private block filled
//! with a constant, or borrows the block of the output it is patched to, so
//! a signal travels from producer to consumer without copying. Samples are
//! stored as `f32` bit patterns in relaxed atomics, which lets a borrowed
//! block be shared across units without `unsafe` aliasing.

use crate::invariant_ppt::{check_invariant, RESET_RESTORES_NORMAL};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// The rate at which a unit executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rate {
    /// Every sample of the block is computed.
    Audio,
    /// Only sample 0 is computed; readers see it for the whole block.
    Control,
}

/// How an input indexes its buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    /// `read(i)` returns sample `i` of the current block.
    #[default]
    Block,
    /// `read(i)` returns sample `i - 1`, an implicit one-sample delay that
    /// lets members of a feedback loop be advanced one sample at a time.
    Sample,
}

/// A fixed-length block of samples.
#[derive(Debug)]
pub struct Block {
    samples: Box<[AtomicU32]>,
}

impl Block {
    /// Create a block of `len` samples, all set to `value`.
    pub fn new(len: usize, value: f32) -> Self {
        let bits = value.to_bits();
        Self {
            samples: (0..len).map(|_| AtomicU32::new(bits)).collect(),
        }
    }

    /// Number of samples.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Whether the block holds no samples.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Sample at `index`.
    #[inline]
    pub fn get(&self, index: usize) -> f32 {
        f32::from_bits(self.samples[index].load(Ordering::Relaxed))
    }

    /// Overwrite the sample at `index`.
    #[inline]
    pub fn set(&self, index: usize, value: f32) {
        self.samples[index].store(value.to_bits(), Ordering::Relaxed);
    }

    /// Overwrite every sample.
    pub fn fill(&self, value: f32) {
        let bits = value.to_bits();
        for s in self.samples.iter() {
            s.store(bits, Ordering::Relaxed);
        }
    }

    /// Copy the block into `dst`, truncating to the shorter length.
    pub fn copy_to(&self, dst: &mut [f32]) {
        for (d, s) in dst.iter_mut().zip(self.samples.iter()) {
            *d = f32::from_bits(s.load(Ordering::Relaxed));
        }
    }
}

/// A reading handle on an output's block, handed to an input when coupling.
#[derive(Debug, Clone)]
pub struct Tap {
    block: Arc<Block>,
    rate: Rate,
}

#[derive(Debug)]
enum Buffer {
    Owned(Block),
    Borrowed { block: Arc<Block>, rate: Rate },
}

/// A named signal sink owned by a unit.
#[derive(Debug)]
pub struct Input {
    name: String,
    normal: f32,
    constant: Option<f32>,
    mode: Mode,
    buffer: Buffer,
}

impl Input {
    /// Create an unpatched input that reads `normal` when nothing is patched.
    pub fn new(name: impl Into<String>, normal: f32) -> Self {
        Self {
            name: name.into(),
            normal,
            constant: None,
            mode: Mode::Block,
            buffer: Buffer::Owned(Block::new(0, normal)),
        }
    }

    /// Port name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The value read while unpatched and never set.
    pub fn normal(&self) -> f32 {
        self.normal
    }

    /// The literal last written by `fill`, if any since the last reset.
    pub fn constant(&self) -> Option<f32> {
        self.constant
    }

    /// Current read mode.
    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Set the read mode; decided by the plan after each sort.
    pub fn set_mode(&mut self, mode: Mode) {
        self.mode = mode;
    }

    /// Whether the input currently aliases an output's block.
    pub fn is_coupled(&self) -> bool {
        matches!(self.buffer, Buffer::Borrowed { .. })
    }

    /// Read the value for sample `index` of the current block.
    #[inline]
    pub fn read(&self, index: usize) -> f32 {
        match &self.buffer {
            Buffer::Owned(block) => block.get(index),
            Buffer::Borrowed {
                rate: Rate::Control,
                block,
            } => block.get(0),
            Buffer::Borrowed { block, .. } => match self.mode {
                Mode::Block => block.get(index),
                Mode::Sample => {
                    let len = block.len();
                    block.get((index + len - 1) % len)
                }
            },
        }
    }

    /// Alias the tapped output's block.
    pub fn couple(&mut self, tap: Tap) {
        self.constant = None;
        self.buffer = Buffer::Borrowed {
            block: tap.block,
            rate: tap.rate,
        };
    }

    /// Drop any alias and return to a private block filled with the normal.
    pub fn reset(&mut self) {
        let len = self.len();
        self.constant = None;
        self.buffer = Buffer::Owned(Block::new(len, self.normal));
        check_invariant(
            RESET_RESTORES_NORMAL,
            len == 0 || self.normal.is_nan() || self.read(0) == self.normal,
            "Reset input reads its normal",
        );
    }

    /// Overwrite every sample with `value`.
    ///
    /// A coupled input is reset first so a literal never writes through
    /// into the output it was reading.
    pub fn fill(&mut self, value: f32) {
        if self.is_coupled() {
            self.reset();
        }
        if let Buffer::Owned(block) = &self.buffer {
            block.fill(value);
        }
        self.constant = Some(value);
    }

    /// Size the private block; called once when the owning unit is mounted.
    pub(crate) fn prepare(&mut self, block_size: usize) {
        let value = self.constant.unwrap_or(self.normal);
        self.buffer = Buffer::Owned(Block::new(block_size, value));
    }

    fn len(&self) -> usize {
        match &self.buffer {
            Buffer::Owned(block) => block.len(),
            Buffer::Borrowed { block, .. } => block.len(),
        }
    }
}

/// A named signal source owned by a unit.
#[derive(Debug)]
pub struct Output {
    name: String,
    block: Arc<Block>,
    rate: Rate,
    destinations: usize,
}

impl Output {
    /// Create an output.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            block: Arc::new(Block::new(0, 0.0)),
            rate: Rate::Audio,
            destinations: 0,
        }
    }

    /// Port name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Write sample `index` of the current block.
    #[inline]
    pub fn write(&self, index: usize, value: f32) {
        self.block.set(index, value);
    }

    /// Read back sample `index` of the current block.
    #[inline]
    pub fn read(&self, index: usize) -> f32 {
        self.block.get(index)
    }

    /// The backing block.
    pub fn block(&self) -> &Block {
        &self.block
    }

    /// Number of inputs currently patched to this output.
    pub fn destinations(&self) -> usize {
        self.destinations
    }

    /// A handle an input can couple to.
    pub fn tap(&self) -> Tap {
        Tap {
            block: Arc::clone(&self.block),
            rate: self.rate,
        }
    }

    pub(crate) fn attach(&mut self) {
        self.destinations += 1;
    }

    pub(crate) fn detach(&mut self) {
        self.destinations = self.destinations.saturating_sub(1);
    }

    pub(crate) fn prepare(&mut self, block_size: usize, rate: Rate) {
        self.block = Arc::new(Block::new(block_size, 0.0));
        self.rate = rate;
    }
}

/// The ports of one unit, indexed in declaration order.
#[derive(Debug, Default)]
pub struct Ports {
    inputs: Vec<Input>,
    outputs: Vec<Output>,
}

impl Ports {
    /// An empty port set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Read input `port` at sample `index`.
    #[inline]
    pub fn read(&self, port: usize, index: usize) -> f32 {
        self.inputs[port].read(index)
    }

    /// Write output `port` at sample `index`.
    #[inline]
    pub fn write(&self, port: usize, index: usize, value: f32) {
        self.outputs[port].write(index, value);
    }

    /// All inputs.
    pub fn inputs(&self) -> &[Input] {
        &self.inputs
    }

    /// All outputs.
    pub fn outputs(&self) -> &[Output] {
        &self.outputs
    }

    /// Input by position.
    pub fn input(&self, port: usize) -> Option<&Input> {
        self.inputs.get(port)
    }

    /// Output by position.
    pub fn output(&self, port: usize) -> Option<&Output> {
        self.outputs.get(port)
    }

    /// Position of the input named `name`.
    pub fn input_index(&self, name: &str) -> Option<usize> {
        self.inputs.iter().position(|p| p.name == name)
    }

    /// Position of the output named `name`.
    pub fn output_index(&self, name: &str) -> Option<usize> {
        self.outputs.iter().position(|p| p.name == name)
    }

    pub(crate) fn input_mut(&mut self, port: usize) -> Option<&mut Input> {
        self.inputs.get_mut(port)
    }

    pub(crate) fn output_mut(&mut self, port: usize) -> Option<&mut Output> {
        self.outputs.get_mut(port)
    }

    pub(crate) fn push_input(&mut self, input: Input) {
        self.inputs.push(input);
    }

    pub(crate) fn push_output(&mut self, output: Output) {
        self.outputs.push(output);
    }

    pub(crate) fn prepare(&mut self, block_size: usize, rate: Rate) {
        for input in &mut self.inputs {
            input.prepare(block_size);
        }
        for output in &mut self.outputs {
            output.prepare(block_size, rate);
        }
    }
}
