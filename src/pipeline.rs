use crate::channel::{deadline_after, Channel, ChannelHandle, ChannelStats};
use crate::error::{FeedError, PipelineError, Result};
use crate::metrics::StageMetrics;
use crate::stage::{Stage, StageConfig, StageControl};
use log::{debug, info};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Lifecycle of a pipeline. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    /// Channels and stages are being wired
    Created,
    /// Accepting items
    Running,
    /// Feeding is rejected, stages are stopping in order
    ShuttingDown,
    /// Every stage has stopped and the last channel is closed
    Closed,
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelineState::Created => "created",
            PipelineState::Running => "running",
            PipelineState::ShuttingDown => "shutting down",
            PipelineState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Channels and stages accumulated while the builder's wiring runs
struct Wiring {
    capacity: usize,
    total_stages: usize,
    channels: Vec<Arc<dyn ChannelHandle>>,
    stages: Vec<Box<dyn StageControl>>,
}

impl Wiring {
    /// Capacity of the channel written by the next stage.
    /// The last channel is the pipeline output and is unbounded so results
    /// can pile up until the caller drains them.
    fn next_capacity(&self) -> usize {
        if self.stages.len() + 1 == self.total_stages {
            0
        } else {
            self.capacity
        }
    }
}

type Wire<T> = Box<dyn FnOnce(&mut Wiring) -> Result<Arc<Channel<T>>>>;

/// Builder for constructing pipelines.
///
/// `In` is the type fed into the pipeline and `Out` the type produced by the
/// last stage added so far. Nothing runs until [`PipelineBuilder::build`].
pub struct PipelineBuilder<In, Out> {
    capacity: usize,
    input: Arc<Channel<In>>,
    plan: Vec<(String, usize)>,
    wire: Wire<Out>,
}

impl<In: Send + 'static> PipelineBuilder<In, In> {
    /// Start a pipeline whose input and inter-stage channels hold at most
    /// `channel_capacity` items each (`0` = unbounded)
    pub fn new(channel_capacity: usize) -> Self {
        let input = Arc::new(Channel::new(channel_capacity));
        let first = Arc::clone(&input);
        Self {
            capacity: channel_capacity,
            input,
            plan: Vec::new(),
            wire: Box::new(move |_| Ok(first)),
        }
    }
}

impl<In, Out> PipelineBuilder<In, Out>
where
    In: Send + 'static,
    Out: Send + 'static,
{
    /// Append a stage consuming what the previous stage produces
    pub fn stage<Next: Send + 'static>(self, config: StageConfig<Out, Next>) -> PipelineBuilder<In, Next> {
        let mut plan = self.plan;
        plan.push((config.name().to_string(), config.workers()));

        let previous = self.wire;
        let wire: Wire<Next> = Box::new(move |wiring: &mut Wiring| {
            let input = previous(wiring)?;
            let output = Arc::new(Channel::new(wiring.next_capacity()));
            wiring.channels.push(output.clone());
            let stage = Stage::spawn(config, input, Arc::clone(&output))?;
            wiring.stages.push(Box::new(stage));
            Ok(output)
        });

        PipelineBuilder {
            capacity: self.capacity,
            input: self.input,
            plan,
            wire,
        }
    }

    /// Validate the configuration, then allocate every channel and start
    /// every worker. Invalid configurations are rejected before any thread
    /// is spawned.
    pub fn build(self) -> Result<Pipeline<In, Out>> {
        if self.plan.is_empty() {
            return Err(PipelineError::NoStages);
        }
        if let Some((name, _)) = self.plan.iter().find(|(_, workers)| *workers == 0) {
            return Err(PipelineError::InvalidWorkerCount { stage: name.clone() });
        }

        let mut wiring = Wiring {
            capacity: self.capacity,
            total_stages: self.plan.len(),
            channels: vec![self.input.clone() as Arc<dyn ChannelHandle>],
            stages: Vec::with_capacity(self.plan.len()),
        };
        let output = match (self.wire)(&mut wiring) {
            Ok(output) => output,
            Err(err) => {
                // Unblock whatever did start; dropping the stages signals them
                for channel in &wiring.channels {
                    channel.close();
                }
                return Err(err);
            }
        };

        let pipeline = Pipeline {
            input: self.input,
            output,
            channels: wiring.channels,
            stage_names: self.plan.into_iter().map(|(name, _)| name).collect(),
            metrics: wiring.stages.iter().map(|s| s.metrics().clone()).collect(),
            worker_count: wiring.stages.iter().map(|s| s.worker_count()).sum(),
            stages: Mutex::new(wiring.stages),
            state: Mutex::new(PipelineState::Created),
        };
        pipeline.transition(PipelineState::Running);
        info!(
            "Pipeline running: {} stage(s), {} worker(s), channel capacity {}",
            pipeline.stage_names.len(),
            pipeline.worker_count(),
            self.capacity
        );
        Ok(pipeline)
    }
}

/// A running chain of stages.
///
/// All operations take `&self`, so a pipeline can be fed from several
/// threads while another drains it.
pub struct Pipeline<In, Out> {
    input: Arc<Channel<In>>,
    output: Arc<Channel<Out>>,
    channels: Vec<Arc<dyn ChannelHandle>>,
    stage_names: Vec<String>,
    metrics: Vec<StageMetrics>,
    worker_count: usize,
    stages: Mutex<Vec<Box<dyn StageControl>>>,
    state: Mutex<PipelineState>,
}

impl<T: Send + 'static> Pipeline<T, T> {
    /// Build a pipeline whose stages all map `T` to `T`
    pub fn from_stages(channel_capacity: usize, stages: Vec<StageConfig<T, T>>) -> Result<Self> {
        stages
            .into_iter()
            .fold(PipelineBuilder::new(channel_capacity), PipelineBuilder::stage)
            .build()
    }
}

impl<In, Out> Pipeline<In, Out> {
    /// Current lifecycle state
    pub fn state(&self) -> PipelineState {
        *self.state.lock()
    }

    /// Push an item into the first channel, waiting up to `timeout` for space.
    ///
    /// Fails with `NotRunning` once shutdown has begun. A full channel is
    /// reported, never retried.
    pub fn feed(&self, item: In, timeout: Option<Duration>) -> std::result::Result<(), FeedError<In>> {
        if self.state() != PipelineState::Running {
            return Err(FeedError::NotRunning(item));
        }
        self.input.produce(item, timeout).map_err(FeedError::from)
    }

    /// Take every item available on the last channel, waiting at most
    /// `timeout` for more to arrive.
    ///
    /// Items come back in the order they reached the last channel. With
    /// `None` this waits until the pipeline has shut down.
    pub fn drain(&self, timeout: Option<Duration>) -> Vec<Out> {
        let deadline = deadline_after(timeout);
        let mut items = Vec::new();
        loop {
            let remaining = deadline.map(|d| d.saturating_duration_since(Instant::now()));
            match self.output.consume(remaining) {
                Ok(item) => items.push(item),
                Err(_) => break,
            }
        }
        items
    }

    /// Stop accepting items and shut every stage down, first stage first.
    ///
    /// Each stage's workers finish the backlog of their input before they
    /// stop, so once this returns `Ok` every item fed earlier sits in the
    /// last channel. On `ShutdownTimeout` nothing is discarded and calling
    /// `shutdown` again continues where the previous call stopped.
    pub fn shutdown(&self, timeout: Option<Duration>) -> Result<()> {
        let deadline = deadline_after(timeout);
        match self.state() {
            PipelineState::Closed => return Ok(()),
            PipelineState::ShuttingDown => debug!("Resuming pipeline shutdown"),
            PipelineState::Created | PipelineState::Running => {
                self.transition(PipelineState::ShuttingDown);
                info!("Pipeline shutting down");
            }
        }
        self.input.close();

        let mut stages = self.stages.lock();
        for stage in stages.iter_mut() {
            stage.shutdown_until(deadline)?;
        }
        drop(stages);

        self.transition(PipelineState::Closed);
        info!("Pipeline shut down");
        Ok(())
    }

    fn transition(&self, next: PipelineState) {
        let mut state = self.state.lock();
        debug!("Pipeline state: {} -> {}", *state, next);
        *state = next;
    }

    pub fn stage_names(&self) -> &[String] {
        &self.stage_names
    }

    /// Total number of workers across all stages
    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    /// Metrics of the stage at `index`
    pub fn stage_metrics(&self, index: usize) -> Option<&StageMetrics> {
        self.metrics.get(index)
    }

    /// Snapshot of every channel, input first
    pub fn channel_stats(&self) -> Vec<ChannelStats> {
        self.channels.iter().map(|c| c.stats()).collect()
    }

    /// Whether every stage has stopped.
    ///
    /// Never waits: while a shutdown is joining workers this reports `false`.
    pub fn is_finished(&self) -> bool {
        match self.stages.try_lock() {
            Some(stages) => stages.iter().all(|s| s.is_finished()),
            None => false,
        }
    }

    /// Get a summary of all metrics
    pub fn metrics_summary(&self) -> String {
        let mut summary = String::from("Pipeline Metrics Summary:\n");
        for (name, metrics) in self.stage_names.iter().zip(&self.metrics) {
            summary.push_str(&format!("  {}: {}\n", name, metrics.snapshot().format()));
        }
        summary
    }
}

impl<In, Out> Drop for Pipeline<In, Out> {
    fn drop(&mut self) {
        if *self.state.get_mut() == PipelineState::Closed {
            return;
        }
        // Closing every channel unblocks workers stuck on a full output;
        // the stages themselves signal their workers when dropped.
        debug!("Pipeline dropped before shutdown completed, detaching workers");
        for channel in &self.channels {
            channel.close();
        }
    }
}
