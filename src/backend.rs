//! Backends: whatever drives the audio callback.
//!
//! The engine is backend-agnostic. A backend calls the callback once per
//! block with its input samples and one buffer per output channel, and keeps
//! calling until the callback returns `Flow::Halt` or it is stopped.

use crate::config::EngineConfig;
use crate::error::BackendError;
use crossbeam_channel::{bounded, Sender};
use parking_lot::Mutex;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// Whether the backend should keep calling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// Call again next block.
    Continue,
    /// The run loop acknowledged a stop; no more blocks are wanted.
    Halt,
}

/// The per-block audio callback: input samples, output channels.
pub type Callback = Box<dyn FnMut(&[f32], &mut [Vec<f32>]) -> Flow + Send>;

/// Contract for audio drivers.
pub trait Backend: Send {
    /// Samples per block.
    fn block_size(&self) -> usize;

    /// Output channel count.
    fn channels(&self) -> usize;

    /// Begin invoking `callback`. Asynchronous failures go to `errors`.
    fn start(&mut self, callback: Callback, errors: Sender<BackendError>)
        -> Result<(), BackendError>;

    /// Stop invoking the callback and drop it.
    fn stop(&mut self) -> Result<(), BackendError>;
}

struct Runner {
    callback: Callback,
    input: Vec<f32>,
    output: Vec<Vec<f32>>,
    halted: bool,
}

impl Runner {
    fn new(callback: Callback, block_size: usize, channels: usize) -> Self {
        Self {
            callback,
            input: vec![0.0; block_size],
            output: vec![vec![0.0; block_size]; channels],
            halted: false,
        }
    }

    fn tick(&mut self) -> Flow {
        if self.halted {
            return Flow::Halt;
        }
        let flow = (self.callback)(&self.input, &mut self.output);
        self.halted = flow == Flow::Halt;
        flow
    }
}

/// Synchronous backend: blocks run only when a `Driver` asks for them.
pub struct OfflineBackend {
    block_size: usize,
    channels: usize,
    drain_limit: usize,
    runner: Arc<Mutex<Option<Runner>>>,
}

impl OfflineBackend {
    /// A backend shaped by `config`, and the driver that clocks it.
    pub fn new(config: &EngineConfig) -> (Self, Driver) {
        let runner = Arc::new(Mutex::new(None));
        let backend = Self {
            block_size: config.block_size,
            channels: config.channels,
            drain_limit: config.drain_limit,
            runner: Arc::clone(&runner),
        };
        let driver = Driver {
            runner,
            block_size: config.block_size,
        };
        (backend, driver)
    }
}

impl Backend for OfflineBackend {
    fn block_size(&self) -> usize {
        self.block_size
    }

    fn channels(&self) -> usize {
        self.channels
    }

    fn start(
        &mut self,
        callback: Callback,
        _errors: Sender<BackendError>,
    ) -> Result<(), BackendError> {
        let mut slot = self.runner.lock();
        if slot.is_some() {
            return Err(BackendError::AlreadyStarted);
        }
        *slot = Some(Runner::new(callback, self.block_size, self.channels));
        Ok(())
    }

    /// Keep ticking until the run loop halts, so a queued stop is honored in
    /// order; gives up after `drain_limit` blocks.
    fn stop(&mut self) -> Result<(), BackendError> {
        let mut slot = self.runner.lock();
        let Some(mut runner) = slot.take() else {
            return Err(BackendError::NotStarted);
        };
        for _ in 0..self.drain_limit {
            if runner.tick() == Flow::Halt {
                return Ok(());
            }
        }
        Err(BackendError::StopTimeout)
    }
}

/// Clocks an `OfflineBackend` from the calling thread.
#[derive(Clone)]
pub struct Driver {
    runner: Arc<Mutex<Option<Runner>>>,
    block_size: usize,
}

impl Driver {
    /// Invoke the callback up to `blocks` times. Returns how many blocks ran.
    pub fn run(&self, blocks: usize) -> usize {
        let mut slot = self.runner.lock();
        let Some(runner) = slot.as_mut() else {
            return 0;
        };
        for ran in 0..blocks {
            if runner.tick() == Flow::Halt {
                return ran;
            }
        }
        blocks
    }

    /// Run one block and copy out its channels.
    pub fn step(&self) -> Option<Vec<Vec<f32>>> {
        let mut slot = self.runner.lock();
        let runner = slot.as_mut()?;
        match runner.tick() {
            Flow::Continue => Some(runner.output.clone()),
            Flow::Halt => None,
        }
    }

    /// Render at least `frames` frames and return exactly `frames` per channel.
    pub fn render(&self, frames: usize) -> Vec<Vec<f32>> {
        let mut rendered: Vec<Vec<f32>> = Vec::new();
        let mut slot = self.runner.lock();
        let Some(runner) = slot.as_mut() else {
            return rendered;
        };
        rendered = vec![Vec::with_capacity(frames); runner.output.len()];
        let mut done = 0;
        while done < frames && runner.tick() == Flow::Continue {
            let take = (frames - done).min(self.block_size);
            for (dst, src) in rendered.iter_mut().zip(&runner.output) {
                dst.extend_from_slice(&src[..take]);
            }
            done += take;
        }
        rendered
    }

    /// Set the input samples seen by subsequent blocks.
    pub fn set_input(&self, samples: &[f32]) {
        if let Some(runner) = self.runner.lock().as_mut() {
            for (dst, &src) in runner.input.iter_mut().zip(samples) {
                *dst = src;
            }
        }
    }

    /// Whether a callback is installed and not halted.
    pub fn is_running(&self) -> bool {
        self.runner.lock().as_ref().is_some_and(|r| !r.halted)
    }
}

/// Backend running the callback on a dedicated thread.
pub struct ThreadBackend {
    block_size: usize,
    channels: usize,
    pace: Option<Duration>,
    stop_timeout: Duration,
    force: Arc<AtomicBool>,
    worker: Option<(JoinHandle<()>, crossbeam_channel::Receiver<()>)>,
}

impl ThreadBackend {
    /// A free-running thread backend shaped by `config`.
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            block_size: config.block_size,
            channels: config.channels,
            pace: None,
            stop_timeout: config.stop_timeout(),
            force: Arc::new(AtomicBool::new(false)),
            worker: None,
        }
    }

    /// Sleep one block duration between callbacks, like a hardware clock.
    pub fn paced(mut self, config: &EngineConfig) -> Self {
        self.pace = Some(config.block_duration());
        self
    }
}

impl Backend for ThreadBackend {
    fn block_size(&self) -> usize {
        self.block_size
    }

    fn channels(&self) -> usize {
        self.channels
    }

    fn start(
        &mut self,
        mut callback: Callback,
        errors: Sender<BackendError>,
    ) -> Result<(), BackendError> {
        if self.worker.is_some() {
            return Err(BackendError::AlreadyStarted);
        }
        self.force.store(false, Ordering::Release);
        let force = Arc::clone(&self.force);
        let pace = self.pace;
        let (block_size, channels) = (self.block_size, self.channels);
        let (done_tx, done_rx) = bounded(1);

        let handle = std::thread::Builder::new()
            .name("auxide-rack-audio".into())
            .spawn(move || {
                let input = vec![0.0; block_size];
                let mut output = vec![vec![0.0; block_size]; channels];
                while !force.load(Ordering::Acquire) {
                    // Fail closed: a panicking block is silenced and reported.
                    let flow = catch_unwind(AssertUnwindSafe(|| callback(&input, &mut output)));
                    match flow {
                        Ok(Flow::Continue) => {}
                        Ok(Flow::Halt) => break,
                        Err(_) => {
                            for ch in &mut output {
                                ch.fill(0.0);
                            }
                            let _ = errors.try_send(BackendError::Panicked);
                            break;
                        }
                    }
                    if let Some(pace) = pace {
                        std::thread::sleep(pace);
                    }
                }
                drop(callback);
                let _ = done_tx.send(());
            })
            .map_err(|e| BackendError::Start(e.to_string()))?;

        self.worker = Some((handle, done_rx));
        Ok(())
    }

    fn stop(&mut self) -> Result<(), BackendError> {
        let Some((handle, done)) = self.worker.take() else {
            return Err(BackendError::NotStarted);
        };
        let timed_out = done.recv_timeout(self.stop_timeout).is_err();
        if timed_out {
            self.force.store(true, Ordering::Release);
        }
        handle
            .join()
            .map_err(|_| BackendError::Stop("audio thread panicked".into()))?;
        if timed_out {
            Err(BackendError::StopTimeout)
        } else {
            Ok(())
        }
    }
}
