//! A pool of worker threads between two channels.
//!
//! Every worker of a [`Stage`] runs the same loop: take the next item from
//! the input channel, apply the transform, push the result to the output
//! channel. A worker only stops when it takes a close signal, and
//! [`Stage::shutdown`] queues exactly one signal per worker. Signals are
//! handed out after the item backlog, so the input is fully drained before
//! the pool goes away.

use crate::channel::{deadline_after, Channel, Work};
use crate::error::{BoxError, PipelineError, Result, TransformError};
use crate::metrics::StageMetrics;
use crate::sink::{ErrorSink, LogErrors};
use crate::transform::{infallible, Transform};
use crossbeam::channel::{bounded, Receiver, RecvTimeoutError, Sender};
use log::{debug, error, warn};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Everything needed to start a stage: its name, worker count, transform and
/// where its failures go.
pub struct StageConfig<In, Out> {
    name: String,
    workers: usize,
    transform: Arc<dyn Transform<In, Out>>,
    errors: Arc<dyn ErrorSink<In>>,
}

impl<In, Out> StageConfig<In, Out>
where
    In: Send + 'static,
    Out: Send + 'static,
{
    /// Configure a stage running `transform` on `workers` threads
    pub fn new(name: impl Into<String>, workers: usize, transform: impl Transform<In, Out>) -> Self {
        Self {
            name: name.into(),
            workers,
            transform: Arc::new(transform),
            errors: Arc::new(LogErrors),
        }
    }

    /// Configure a stage from a closure that cannot fail
    pub fn map<F>(name: impl Into<String>, workers: usize, f: F) -> Self
    where
        F: Fn(&In) -> Out + Send + Sync + 'static,
    {
        Self::new(name, workers, infallible(f))
    }

    /// Configure a stage from a closure that may fail on some items
    pub fn try_map<F, E>(name: impl Into<String>, workers: usize, f: F) -> Self
    where
        F: Fn(&In) -> std::result::Result<Out, E> + Send + Sync + 'static,
        E: Into<BoxError>,
    {
        Self::new(name, workers, f)
    }

    /// Send transform failures to `sink` instead of the log
    pub fn with_error_sink<S>(mut self, sink: Arc<S>) -> Self
    where
        S: ErrorSink<In> + 'static,
    {
        self.errors = sink;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn workers(&self) -> usize {
        self.workers
    }
}

/// A running pool of workers
pub struct Stage<In, Out> {
    name: String,
    input: Arc<Channel<In>>,
    output: Arc<Channel<Out>>,
    worker_count: usize,
    handles: Vec<JoinHandle<()>>,
    /// Workers report here as they terminate
    exits: Receiver<usize>,
    exited: usize,
    signaled: bool,
    released: bool,
    metrics: StageMetrics,
}

impl<In, Out> Stage<In, Out>
where
    In: Send + 'static,
    Out: Send + 'static,
{
    /// Start every worker of `config`, reading `input` and writing `output`.
    ///
    /// The stage registers itself as a writer of `output`; the channel is
    /// closed once every registered writer has shut down.
    pub fn spawn(config: StageConfig<In, Out>, input: Arc<Channel<In>>, output: Arc<Channel<Out>>) -> Result<Self> {
        let StageConfig {
            name,
            workers,
            transform,
            errors,
        } = config;
        if workers == 0 {
            return Err(PipelineError::InvalidWorkerCount { stage: name });
        }

        let (exit_tx, exits) = bounded(workers);
        output.register_writer();
        let mut stage = Stage {
            name,
            input,
            output,
            worker_count: workers,
            handles: Vec::with_capacity(workers),
            exits,
            exited: 0,
            signaled: false,
            released: false,
            metrics: StageMetrics::new(),
        };

        for index in 0..workers {
            let worker = Worker {
                stage: stage.name.clone(),
                index,
                input: Arc::clone(&stage.input),
                output: Arc::clone(&stage.output),
                transform: Arc::clone(&transform),
                errors: Arc::clone(&errors),
                metrics: stage.metrics.clone(),
                exit: exit_tx.clone(),
            };
            let spawned = thread::Builder::new()
                .name(format!("{}-{}", stage.name, index))
                .spawn(move || worker.run());
            match spawned {
                Ok(handle) => stage.handles.push(handle),
                Err(source) => {
                    // Started workers still get their signals through Drop
                    return Err(PipelineError::Spawn {
                        stage: stage.name.clone(),
                        source,
                    });
                }
            }
        }
        debug!("Stage `{}` started {} worker(s)", stage.name, workers);
        Ok(stage)
    }
}

impl<In, Out> Stage<In, Out> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    pub fn metrics(&self) -> &StageMetrics {
        &self.metrics
    }

    pub fn input(&self) -> &Arc<Channel<In>> {
        &self.input
    }

    pub fn output(&self) -> &Arc<Channel<Out>> {
        &self.output
    }

    /// Whether every worker has terminated and been joined
    pub fn is_finished(&self) -> bool {
        self.signaled && self.exited >= self.worker_count && self.handles.is_empty()
    }

    /// Signal every worker to stop and wait up to `timeout` for them.
    ///
    /// Workers finish the backlog of the input channel before they stop; a
    /// transform in progress is never interrupted. On timeout the stage keeps
    /// its state and `shutdown` may be called again to keep waiting, without
    /// sending more signals. Once all workers are gone the stage releases its
    /// writer registration on the output channel.
    pub fn shutdown(&mut self, timeout: Option<Duration>) -> Result<()> {
        self.shutdown_until(deadline_after(timeout))
    }

    pub(crate) fn shutdown_until(&mut self, deadline: Option<Instant>) -> Result<()> {
        self.signal();

        while self.exited < self.worker_count {
            let received = match deadline {
                Some(deadline) => match self.exits.recv_deadline(deadline) {
                    Ok(_) => true,
                    Err(RecvTimeoutError::Timeout) => {
                        let remaining = self.worker_count - self.exited;
                        warn!(
                            "Stage `{}` timed out waiting for {} worker(s) to stop",
                            self.name, remaining
                        );
                        return Err(PipelineError::ShutdownTimeout {
                            stage: self.name.clone(),
                            remaining,
                        });
                    }
                    Err(RecvTimeoutError::Disconnected) => false,
                },
                None => self.exits.recv().is_ok(),
            };
            if !received {
                // Every exit notice has been read and all senders are gone
                self.exited = self.worker_count;
                break;
            }
            self.exited += 1;
        }

        for handle in self.handles.drain(..) {
            if handle.join().is_err() {
                error!("A worker of stage `{}` panicked", self.name);
            }
        }

        if !self.released {
            self.released = true;
            if self.output.release_writer() {
                debug!("Stage `{}` closed its output channel", self.name);
            }
        }
        Ok(())
    }

    /// Queue one close signal per worker, once
    fn signal(&mut self) {
        if self.signaled {
            return;
        }
        self.signaled = true;
        self.input.signal_close(self.handles.len());
        debug!("Stage `{}` signalled {} worker(s)", self.name, self.handles.len());
    }
}

impl<In, Out> Drop for Stage<In, Out> {
    fn drop(&mut self) {
        if !self.signaled {
            debug!("Stage `{}` dropped while running, detaching its workers", self.name);
            self.signal();
        }
    }
}

/// Type-erased control over a stage, so a pipeline can hold stages with
/// different item types in one list.
pub(crate) trait StageControl: Send {
    fn worker_count(&self) -> usize;
    fn metrics(&self) -> &StageMetrics;
    fn is_finished(&self) -> bool;
    fn shutdown_until(&mut self, deadline: Option<Instant>) -> Result<()>;
}

impl<In: Send, Out: Send> StageControl for Stage<In, Out> {
    fn worker_count(&self) -> usize {
        Stage::worker_count(self)
    }

    fn metrics(&self) -> &StageMetrics {
        Stage::metrics(self)
    }

    fn is_finished(&self) -> bool {
        Stage::is_finished(self)
    }

    fn shutdown_until(&mut self, deadline: Option<Instant>) -> Result<()> {
        Stage::shutdown_until(self, deadline)
    }
}

/// State owned by one worker thread
struct Worker<In, Out> {
    stage: String,
    index: usize,
    input: Arc<Channel<In>>,
    output: Arc<Channel<Out>>,
    transform: Arc<dyn Transform<In, Out>>,
    errors: Arc<dyn ErrorSink<In>>,
    metrics: StageMetrics,
    exit: Sender<usize>,
}

impl<In: 'static, Out: 'static> Worker<In, Out> {
    fn run(self) {
        debug!("Worker {}-{} started", self.stage, self.index);
        while let Work::Item(item) = self.input.next_work() {
            self.process(item);
        }
        debug!("Worker {}-{} received its close signal", self.stage, self.index);
    }

    fn process(&self, item: In) {
        let start = Instant::now();
        let applied = panic::catch_unwind(AssertUnwindSafe(|| self.transform.apply(&item)))
            .unwrap_or_else(|payload| Err(panic_cause(payload)));
        match applied {
            Ok(output) => {
                self.metrics.record_latency(start.elapsed());
                drop(item);
                match self.output.produce(output, None) {
                    Ok(()) => self.metrics.record_processed(),
                    Err(_) => {
                        self.metrics.record_dropped();
                        warn!("Stage `{}`: output channel closed, dropping a transformed item", self.stage);
                    }
                }
            }
            Err(cause) => {
                self.metrics.record_failed();
                self.errors.report(TransformError::new(self.stage.clone(), item, cause));
            }
        }
    }
}

impl<In, Out> Drop for Worker<In, Out> {
    fn drop(&mut self) {
        let _ = self.exit.send(self.index);
    }
}

/// Turn a caught panic into a per-item failure, keeping its message
fn panic_cause(payload: Box<dyn Any + Send>) -> BoxError {
    let message = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic payload".to_string());
    format!("transform panicked: {message}").into()
}
