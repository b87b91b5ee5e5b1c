//! Reference units used by the default registry, tests and benches.

use crate::error::PatchError;
use crate::port::{Ports, Rate};
use crate::unit::{config_number, Processor, Unit, UnitConfig};
use std::f32::consts::TAU;

/// Type name of the always-present output sink.
pub const SINK: &str = "sink";

/// The output sink: one input per channel, no outputs, no executor.
pub fn sink(channels: usize) -> Unit {
    (0..channels).fold(Unit::new(SINK), |unit, ch| unit.input(channel_name(ch), 0.0))
}

/// Name of sink input `channel`.
pub fn channel_name(channel: usize) -> String {
    format!("ch{}", channel)
}

/// A unit with no ports and nothing to do.
pub fn blank() -> Unit {
    Unit::new("blank")
}

struct Gain;

impl Processor for Gain {
    fn process_sample(&mut self, ports: &Ports, index: usize) {
        ports.write(0, index, ports.read(0, index) * ports.read(1, index));
    }

    fn is_active(&self, ports: &Ports) -> Option<bool> {
        Some(ports.outputs().iter().any(|o| o.destinations() > 0))
    }
}

/// `out = in * gain`. Skipped while nothing listens to `out`.
pub fn gain(level: f32) -> Unit {
    Unit::new("gain")
        .input("in", 0.0)
        .input("gain", level)
        .output("out")
        .with_processor(Gain)
}

struct Mix;

impl Processor for Mix {
    fn process_sample(&mut self, ports: &Ports, index: usize) {
        ports.write(0, index, ports.read(0, index) + ports.read(1, index));
    }
}

/// `out = a + b`.
pub fn mix() -> Unit {
    Unit::new("mix")
        .input("a", 0.0)
        .input("b", 0.0)
        .output("out")
        .with_processor(Mix)
}

struct Sine {
    phase: f32,
    sample_rate: f32,
}

impl Processor for Sine {
    fn prepare(&mut self, sample_rate: f32, _block_size: usize) {
        self.sample_rate = sample_rate;
    }

    fn process_sample(&mut self, ports: &Ports, index: usize) {
        ports.write(0, index, self.phase.sin());
        self.phase = (self.phase + TAU * ports.read(0, index) / self.sample_rate) % TAU;
    }
}

/// Sine oscillator; `freq` is in Hz.
pub fn sine(freq: f32) -> Unit {
    Unit::new("sine")
        .input("freq", freq)
        .output("out")
        .with_processor(Sine {
            phase: 0.0,
            sample_rate: 44100.0,
        })
}

struct Constant;

impl Processor for Constant {
    fn process_sample(&mut self, ports: &Ports, index: usize) {
        ports.write(0, index, ports.read(0, index));
    }
}

/// Control-rate value source.
pub fn constant(value: f32) -> Unit {
    Unit::new("constant")
        .input("value", value)
        .output("out")
        .with_rate(Rate::Control)
        .with_processor(Constant)
}

struct Impulse {
    fired: bool,
}

impl Processor for Impulse {
    fn process_sample(&mut self, ports: &Ports, index: usize) {
        let value = if self.fired { 0.0 } else { 1.0 };
        self.fired = true;
        ports.write(0, index, value * ports.read(0, index));
    }
}

/// Emits `level` at its first sample ever, silence afterwards.
pub fn impulse(level: f32) -> Unit {
    Unit::new("impulse")
        .input("level", level)
        .output("out")
        .with_processor(Impulse { fired: false })
}

pub(crate) fn build_blank(_config: &UnitConfig) -> Result<Unit, PatchError> {
    Ok(blank())
}

pub(crate) fn build_gain(config: &UnitConfig) -> Result<Unit, PatchError> {
    Ok(gain(config_number(config, "gain", 1.0)? as f32))
}

pub(crate) fn build_mix(_config: &UnitConfig) -> Result<Unit, PatchError> {
    Ok(mix())
}

pub(crate) fn build_sine(config: &UnitConfig) -> Result<Unit, PatchError> {
    let freq = config_number(config, "freq", 440.0)?;
    if !(freq.is_finite() && freq >= 0.0) {
        return Err(PatchError::InvalidConfig {
            key: "freq".into(),
            message: "must be a non-negative frequency".into(),
        });
    }
    Ok(sine(freq as f32))
}

pub(crate) fn build_constant(config: &UnitConfig) -> Result<Unit, PatchError> {
    Ok(constant(config_number(config, "value", 0.0)? as f32))
}

pub(crate) fn build_impulse(config: &UnitConfig) -> Result<Unit, PatchError> {
    Ok(impulse(config_number(config, "level", 1.0)? as f32))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::unit::ConfigValue;

    #[test]
    fn sink_has_one_input_per_channel() {
        let sink = sink(2);
        assert_eq!(sink.ports().inputs().len(), 2);
        assert_eq!(sink.ports().input_index("ch1"), Some(1));
        assert!(!sink.is_schedulable());
    }

    #[test]
    fn unpatched_gain_is_inactive() {
        assert!(!gain(1.0).is_schedulable());
        assert!(mix().is_schedulable());
    }

    #[test]
    fn sine_rejects_negative_frequency() {
        let mut config = UnitConfig::new();
        config.insert("freq".into(), ConfigValue::Number(-1.0));
        assert!(build_sine(&config).is_err());
    }

    #[test]
    fn impulse_fires_once() {
        let mut unit = impulse(1.0);
        unit.prepare(44100.0, 4);
        unit.process_block(4);
        let out = unit.ports().output(0).unwrap();
        assert_eq!((out.read(0), out.read(1)), (1.0, 0.0));
        unit.process_block(4);
        assert_eq!(unit.ports().output(0).unwrap().read(0), 0.0);
    }
}
