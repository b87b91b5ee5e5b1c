//! Engine: owns the backend and the message queue feeding the audio thread.
//!
//! Control threads talk to the running engine through a `Handle`. Each
//! request carries its own reply slot; the run loop applies at most one
//! request per block and never waits on the queue.

use crate::backend::{Backend, Callback, Flow};
use crate::config::EngineConfig;
use crate::control::{Command, Message, Pending, PortRef, Reply, Signal, Snapshot, Value};
use crate::error::{BackendError, ConfigError, EngineError, PatchError};
use crate::invariant_rt::{
    drain_invariant_signals, new_invariant_queue, signal_invariant, INV_BLOCK_RENDERED,
    INV_MESSAGE_APPLIED, INV_MESSAGE_REJECTED, INV_PLAN_REBUILT, INV_REPLY_ABANDONED,
    INV_STOP_ACKNOWLEDGED,
};
use crate::rack::Rack;
use crate::unit::{Unit, UnitId};
use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use rtrb::{Consumer, Producer};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Lifecycle of the run loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// No callback installed.
    Stopped,
    /// The backend is driving the run loop.
    Running,
    /// A stop was requested; no more messages are accepted.
    Stopping,
}

/// The engine: configuration, backend and the channels into the run loop.
pub struct Engine {
    config: EngineConfig,
    backend: Box<dyn Backend>,
    state: State,
    queue: Option<Sender<Message>>,
    open: Arc<AtomicBool>,
    errors_tx: Sender<BackendError>,
    errors_rx: Receiver<BackendError>,
    signals: Option<Consumer<u8>>,
}

impl Engine {
    /// An engine driving `backend`. The backend's shape must match `config`.
    pub fn new(config: EngineConfig, backend: Box<dyn Backend>) -> Result<Self, EngineError> {
        config.validate()?;
        if backend.block_size() != config.block_size {
            return Err(ConfigError::Invalid(format!(
                "backend block size {} does not match configured {}",
                backend.block_size(),
                config.block_size
            ))
            .into());
        }
        if backend.channels() != config.channels {
            return Err(ConfigError::Invalid(format!(
                "backend has {} channels, configured {}",
                backend.channels(),
                config.channels
            ))
            .into());
        }
        let (errors_tx, errors_rx) = unbounded();
        Ok(Self {
            config,
            backend,
            state: State::Stopped,
            queue: None,
            open: Arc::new(AtomicBool::new(false)),
            errors_tx,
            errors_rx,
            signals: None,
        })
    }

    /// Current lifecycle state.
    ///
    /// A run loop the backend dropped on its own, after a panic for
    /// instance, reads as `Stopped`.
    pub fn state(&self) -> State {
        if self.loop_died() {
            State::Stopped
        } else {
            self.state
        }
    }

    fn loop_died(&self) -> bool {
        self.state == State::Running && !self.open.load(Ordering::Acquire)
    }

    /// The configuration the engine was built with.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Build a fresh rack and hand the run loop to the backend.
    pub fn start(&mut self) -> Result<(), EngineError> {
        if self.loop_died() {
            let _ = self.reap();
        }
        if self.state != State::Stopped {
            return Err(EngineError::AlreadyRunning);
        }
        let (queue, inbox) = unbounded();
        let (signal_tx, signal_rx) = new_invariant_queue();
        let rack = Rack::new(&self.config);
        let open = Arc::new(AtomicBool::new(true));
        let callback = run_loop(rack, inbox, signal_tx, Liveness::new(Arc::clone(&open)));

        if let Err(e) = self.backend.start(callback, self.errors_tx.clone()) {
            tracing::error!(error = %e, "backend failed to start");
            let _ = self.errors_tx.send(e.clone());
            return Err(e.into());
        }

        self.open = open;
        self.queue = Some(queue);
        self.signals = Some(signal_rx);
        self.state = State::Running;
        tracing::info!(
            sample_rate = self.config.sample_rate,
            block_size = self.config.block_size,
            channels = self.config.channels,
            "engine started"
        );
        Ok(())
    }

    /// Stop the run loop.
    ///
    /// The stop request is queued behind any pending messages; requests
    /// still queued when the loop halts are dropped and their callers see
    /// `EngineError::Disconnected`. Returns the backend's stop outcome.
    ///
    /// If the loop already died on its own, the backend is collected and
    /// `BackendError::Halted` is returned; the cause is on the error channel.
    ///
    /// Stopping closes the message queue and every handle, but not the
    /// error channel: [`Engine::errors`] keeps reporting failures from
    /// earlier runs, including the stop itself.
    pub fn stop(&mut self) -> Result<(), EngineError> {
        if self.state != State::Running {
            return Err(EngineError::NotRunning);
        }
        if self.loop_died() {
            return self.reap();
        }
        self.state = State::Stopping;
        self.open.store(false, Ordering::Release);
        if let Some(queue) = self.queue.take() {
            let _ = queue.send(Message::Stop);
        }

        let result = self.backend.stop();
        self.state = State::Stopped;
        match result {
            Ok(()) => {
                tracing::info!("engine stopped");
                Ok(())
            }
            Err(e) => {
                tracing::warn!(error = %e, "backend failed to stop cleanly");
                let _ = self.errors_tx.send(e.clone());
                Err(e.into())
            }
        }
    }

    /// A handle for sending commands. Fails unless the engine is running.
    pub fn handle(&self) -> Result<Handle, EngineError> {
        match (&self.queue, self.state()) {
            (Some(queue), State::Running) => Ok(Handle {
                queue: queue.clone(),
                open: Arc::clone(&self.open),
            }),
            _ => Err(EngineError::NotRunning),
        }
    }

    // The backend dropped the run loop without a stop request. Collect it
    // and settle in `Stopped`.
    fn reap(&mut self) -> Result<(), EngineError> {
        self.queue = None;
        let collected = self.backend.stop();
        self.state = State::Stopped;
        tracing::warn!(collected = ?collected, "run loop halted without a stop request");
        Err(BackendError::Halted.into())
    }

    /// Backend failures reported since the last call.
    pub fn errors(&self) -> Vec<BackendError> {
        self.errors_rx.try_iter().collect()
    }

    /// Invariant signals emitted by the run loop since the last call.
    pub fn drain_signals(&mut self) -> Vec<u8> {
        self.signals
            .as_mut()
            .map(drain_invariant_signals)
            .unwrap_or_default()
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        if self.state == State::Running {
            let _ = self.stop();
        }
    }
}

// Travels with the run loop. Whenever the backend drops the loop, on stop
// or after giving up on a failed block, the engine's handles close.
struct Liveness {
    open: Arc<AtomicBool>,
    halted: bool,
}

impl Liveness {
    fn new(open: Arc<AtomicBool>) -> Self {
        Self {
            open,
            halted: false,
        }
    }

    fn is_halted(&self) -> bool {
        self.halted
    }

    fn halt(&mut self) {
        self.halted = true;
    }
}

impl Drop for Liveness {
    fn drop(&mut self) {
        self.open.store(false, Ordering::Release);
    }
}

// The audio-thread side. Owns the rack; nothing in here logs or blocks.
fn run_loop(
    mut rack: Rack,
    inbox: Receiver<Message>,
    mut signals: Producer<u8>,
    mut live: Liveness,
) -> Callback {
    let mut block: u64 = 0;
    Box::new(move |_input, output| {
        if live.is_halted() {
            silence(output);
            return Flow::Halt;
        }
        match inbox.try_recv() {
            Ok(Message::Request { command, reply }) => {
                let started = Instant::now();
                let result = rack.apply(command);
                signal_invariant(
                    &mut signals,
                    if result.is_ok() {
                        INV_MESSAGE_APPLIED
                    } else {
                        INV_MESSAGE_REJECTED
                    },
                );
                let reply_msg = Reply {
                    result,
                    elapsed: started.elapsed(),
                    block,
                };
                if reply.try_send(reply_msg).is_err() {
                    signal_invariant(&mut signals, INV_REPLY_ABANDONED);
                }
            }
            Ok(Message::Stop) => {
                signal_invariant(&mut signals, INV_STOP_ACKNOWLEDGED);
                live.halt();
                silence(output);
                return Flow::Halt;
            }
            Err(_) => {}
        }
        if rack.process(output) {
            signal_invariant(&mut signals, INV_PLAN_REBUILT);
        }
        signal_invariant(&mut signals, INV_BLOCK_RENDERED);
        block += 1;
        Flow::Continue
    })
}

fn silence(output: &mut [Vec<f32>]) {
    for ch in output {
        ch.fill(0.0);
    }
}

/// Cloneable sender of commands into a running engine.
#[derive(Debug, Clone)]
pub struct Handle {
    queue: Sender<Message>,
    open: Arc<AtomicBool>,
}

impl Handle {
    /// Queue a command without waiting for its reply.
    pub fn send(&self, command: Command) -> Result<Pending, EngineError> {
        if !self.open.load(Ordering::Acquire) {
            return Err(EngineError::NotRunning);
        }
        let (reply, rx) = bounded(1);
        self.queue
            .send(Message::Request { command, reply })
            .map_err(|_| EngineError::NotRunning)?;
        Ok(Pending::new(rx))
    }

    /// Queue a command and block until it has been applied.
    pub fn request(&self, command: Command) -> Result<Value, EngineError> {
        let name = command.description();
        let reply = self.send(command)?.wait()?;
        tracing::debug!(
            command = name,
            elapsed = ?reply.elapsed,
            block = reply.block,
            ok = reply.result.is_ok(),
            "request applied"
        );
        Ok(reply.result?)
    }

    /// Whether the engine still accepts commands.
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    /// Mount a unit and return its id.
    pub fn mount(&self, unit: Unit) -> Result<UnitId, EngineError> {
        expect_unit(self.request(Command::Mount(Box::new(unit)))?)
    }

    /// Unmount a unit.
    pub fn unmount(&self, unit: UnitId) -> Result<(), EngineError> {
        self.request(Command::Unmount(unit)).map(drop)
    }

    /// Patch a literal or an output into `input`.
    pub fn patch(&self, source: impl Into<Signal>, input: PortRef) -> Result<(), EngineError> {
        self.request(Command::Patch {
            source: source.into(),
            input,
        })
        .map(drop)
    }

    /// Unpatch `input`.
    pub fn unpatch(&self, input: PortRef) -> Result<(), EngineError> {
        self.request(Command::Unpatch(input)).map(drop)
    }

    /// Replace `old` with the already mounted `new`.
    pub fn swap(&self, old: UnitId, new: UnitId) -> Result<UnitId, EngineError> {
        expect_unit(self.request(Command::Swap { old, new })?)
    }

    /// Discard every user unit and patch.
    pub fn reset(&self) -> Result<(), EngineError> {
        self.request(Command::Reset).map(drop)
    }

    /// Patch into the output sink.
    pub fn emit(
        &self,
        source: impl Into<Signal>,
        channel: Option<usize>,
    ) -> Result<(), EngineError> {
        self.request(Command::Emit {
            source: source.into(),
            channel,
        })
        .map(drop)
    }

    /// Graph and plan statistics.
    pub fn inspect(&self) -> Result<Snapshot, EngineError> {
        match self.request(Command::Inspect)? {
            Value::Snapshot(snapshot) => Ok(snapshot),
            other => Err(unexpected(other)),
        }
    }
}

fn expect_unit(value: Value) -> Result<UnitId, EngineError> {
    match value {
        Value::Unit(id) => Ok(id),
        other => Err(unexpected(other)),
    }
}

fn unexpected(value: Value) -> EngineError {
    PatchError::Unit(format!("unexpected reply {:?}", value)).into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{Driver, OfflineBackend};
    use crate::units;

    fn offline() -> (Engine, Driver) {
        let config = EngineConfig {
            block_size: 8,
            drain_limit: 64,
            ..EngineConfig::default()
        };
        let (backend, driver) = OfflineBackend::new(&config);
        let engine = Engine::new(config, Box::new(backend)).unwrap();
        (engine, driver)
    }

    #[test]
    fn state_machine_round_trip() {
        let (mut engine, _driver) = offline();
        assert_eq!(engine.state(), State::Stopped);
        assert_eq!(engine.handle().unwrap_err(), EngineError::NotRunning);
        engine.start().unwrap();
        assert_eq!(engine.state(), State::Running);
        assert_eq!(engine.start(), Err(EngineError::AlreadyRunning));
        engine.stop().unwrap();
        assert_eq!(engine.state(), State::Stopped);
        assert_eq!(engine.stop(), Err(EngineError::NotRunning));
    }

    #[test]
    fn one_message_per_block() {
        let (mut engine, driver) = offline();
        engine.start().unwrap();
        let handle = engine.handle().unwrap();
        let first = handle.send(Command::Mount(Box::new(units::blank()))).unwrap();
        let second = handle.send(Command::Mount(Box::new(units::blank()))).unwrap();

        driver.run(1);
        assert!(first.try_reply().is_some());
        assert!(second.try_reply().is_none());
        driver.run(1);
        let reply = second.wait().unwrap();
        assert_eq!(reply.block, 1);
    }

    #[test]
    fn rejected_command_is_replied_not_raised() {
        let (mut engine, driver) = offline();
        engine.start().unwrap();
        let pending = engine
            .handle()
            .unwrap()
            .send(Command::Unmount(UnitId(99)))
            .unwrap();
        driver.run(1);
        assert_eq!(
            pending.wait().unwrap().result,
            Err(PatchError::UnknownUnit(UnitId(99)))
        );
        assert!(driver.is_running());
    }

    #[test]
    fn handle_is_closed_after_stop() {
        let (mut engine, _driver) = offline();
        engine.start().unwrap();
        let handle = engine.handle().unwrap();
        engine.stop().unwrap();
        assert!(!handle.is_open());
        assert_eq!(
            handle.send(Command::Reset).unwrap_err(),
            EngineError::NotRunning
        );
    }

    // Renders one block, then drops the loop like a backend giving up on a
    // failed block.
    struct OneShot;

    impl Backend for OneShot {
        fn block_size(&self) -> usize {
            8
        }

        fn channels(&self) -> usize {
            2
        }

        fn start(
            &mut self,
            mut callback: Callback,
            errors: Sender<BackendError>,
        ) -> Result<(), BackendError> {
            let mut output = vec![vec![0.0; 8]; 2];
            callback(&[0.0; 8], &mut output);
            let _ = errors.send(BackendError::Panicked);
            Ok(())
        }

        fn stop(&mut self) -> Result<(), BackendError> {
            Ok(())
        }
    }

    #[test]
    fn dropped_loop_leaves_running_state() {
        let config = EngineConfig {
            block_size: 8,
            ..EngineConfig::default()
        };
        let mut engine = Engine::new(config, Box::new(OneShot)).unwrap();
        engine.start().unwrap();
        assert_eq!(engine.state(), State::Stopped);
        assert_eq!(engine.handle().unwrap_err(), EngineError::NotRunning);
        assert_eq!(engine.errors(), vec![BackendError::Panicked]);
        assert_eq!(engine.stop(), Err(EngineError::Backend(BackendError::Halted)));
        assert_eq!(engine.stop(), Err(EngineError::NotRunning));
        // Restartable once collected.
        engine.start().unwrap();
        assert_eq!(engine.state(), State::Stopped);
    }

    #[test]
    fn mismatched_backend_is_rejected() {
        let (backend, _driver) = OfflineBackend::new(&EngineConfig::default());
        let config = EngineConfig {
            block_size: 32,
            ..EngineConfig::default()
        };
        assert!(matches!(
            Engine::new(config, Box::new(backend)),
            Err(EngineError::Config(ConfigError::Invalid(_)))
        ));
    }
}
