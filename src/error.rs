use std::fmt;
use std::io;
use thiserror::Error;

/// Result type for pipeline operations
pub type Result<T, E = PipelineError> = std::result::Result<T, E>;

/// Boxed error returned by fallible transforms
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors raised while building or shutting down a pipeline
#[derive(Error, Debug)]
pub enum PipelineError {
    /// No stages in pipeline
    #[error("Cannot build a pipeline with no stages")]
    NoStages,

    /// A stage was configured without any worker
    #[error("Stage `{stage}` must have at least one worker")]
    InvalidWorkerCount { stage: String },

    /// The OS refused to start a worker thread
    #[error("Failed to spawn a worker for stage `{stage}`: {source}")]
    Spawn {
        stage: String,
        #[source]
        source: io::Error,
    },

    /// Workers did not terminate before the deadline
    #[error("Stage `{stage}` did not shut down in time ({remaining} worker(s) still running)")]
    ShutdownTimeout { stage: String, remaining: usize },
}

impl PipelineError {
    /// Whether this error was raised while constructing the pipeline
    pub fn is_construction(&self) -> bool {
        !matches!(self, PipelineError::ShutdownTimeout { .. })
    }
}

/// A rejected `produce`. The item is handed back to the caller.
#[derive(PartialEq, Eq, Clone, Copy)]
pub enum ProduceError<T> {
    /// The channel stayed at capacity until the timeout elapsed
    Full(T),
    /// The channel has been closed
    Closed(T),
}

impl<T> ProduceError<T> {
    /// Recover the item that could not be produced
    pub fn into_inner(self) -> T {
        match self {
            ProduceError::Full(item) | ProduceError::Closed(item) => item,
        }
    }

    pub fn is_full(&self) -> bool {
        matches!(self, ProduceError::Full(_))
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, ProduceError::Closed(_))
    }
}

impl<T> fmt::Debug for ProduceError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProduceError::Full(_) => f.write_str("Full(..)"),
            ProduceError::Closed(_) => f.write_str("Closed(..)"),
        }
    }
}

impl<T> fmt::Display for ProduceError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProduceError::Full(_) => f.write_str("channel is full"),
            ProduceError::Closed(_) => f.write_str("channel is closed"),
        }
    }
}

impl<T> std::error::Error for ProduceError<T> {}

/// A `consume` that returned no item
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumeError {
    /// Nothing arrived before the timeout elapsed
    #[error("channel is empty")]
    Empty,
    /// The channel is closed and fully drained
    #[error("channel is closed and drained")]
    Closed,
}

/// A rejected `Pipeline::feed`. The item is handed back to the caller.
#[derive(PartialEq, Eq, Clone, Copy)]
pub enum FeedError<T> {
    /// The first channel stayed full until the timeout elapsed
    Full(T),
    /// The first channel was closed while waiting for space
    Closed(T),
    /// The pipeline is not in the `Running` state
    NotRunning(T),
}

impl<T> FeedError<T> {
    /// Recover the item that could not be fed
    pub fn into_inner(self) -> T {
        match self {
            FeedError::Full(item) | FeedError::Closed(item) | FeedError::NotRunning(item) => item,
        }
    }
}

impl<T> From<ProduceError<T>> for FeedError<T> {
    fn from(err: ProduceError<T>) -> Self {
        match err {
            ProduceError::Full(item) => FeedError::Full(item),
            ProduceError::Closed(item) => FeedError::Closed(item),
        }
    }
}

impl<T> fmt::Debug for FeedError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeedError::Full(_) => f.write_str("Full(..)"),
            FeedError::Closed(_) => f.write_str("Closed(..)"),
            FeedError::NotRunning(_) => f.write_str("NotRunning(..)"),
        }
    }
}

impl<T> fmt::Display for FeedError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeedError::Full(_) => f.write_str("pipeline input is full"),
            FeedError::Closed(_) => f.write_str("pipeline input is closed"),
            FeedError::NotRunning(_) => f.write_str("pipeline is not running"),
        }
    }
}

impl<T> std::error::Error for FeedError<T> {}

/// A transform failed on one item.
///
/// Carries the offending item so that an error sink can inspect or retry it.
pub struct TransformError<T> {
    stage: String,
    item: T,
    source: BoxError,
}

impl<T> TransformError<T> {
    pub fn new(stage: impl Into<String>, item: T, source: impl Into<BoxError>) -> Self {
        Self {
            stage: stage.into(),
            item,
            source: source.into(),
        }
    }

    /// Name of the stage whose transform failed
    pub fn stage(&self) -> &str {
        &self.stage
    }

    /// The item the transform was applied to
    pub fn item(&self) -> &T {
        &self.item
    }

    /// The underlying failure
    pub fn cause(&self) -> &(dyn std::error::Error + Send + Sync + 'static) {
        self.source.as_ref()
    }

    /// Take back the offending item
    pub fn into_item(self) -> T {
        self.item
    }
}

impl<T: fmt::Debug> fmt::Debug for TransformError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransformError")
            .field("stage", &self.stage)
            .field("item", &self.item)
            .field("source", &self.source)
            .finish()
    }
}

impl<T> fmt::Display for TransformError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Stage `{}` failed to transform an item: {}", self.stage, self.source)
    }
}

impl<T: fmt::Debug> std::error::Error for TransformError<T> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.source.as_ref())
    }
}
