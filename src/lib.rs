//! A multi-stage producer-consumer pipeline for in-process data processing.
//!
//! Items flow through an ordered chain of stages. Each stage is a pool of
//! worker threads reading from one bounded channel, applying a transform and
//! writing to the next channel. Bounded channels are the only flow control:
//! when a downstream stage falls behind, upstream producers block.
//!
//! # Features
//!
//! - Blocking FIFO channels with timeouts and an explicit closed state
//! - Configurable worker count per stage
//! - Ordered shutdown: every item fed before shutdown reaches the output
//! - Per-item failure handling through error sinks, workers keep going
//! - Per-stage metrics: processed/failed counts, latency percentiles
//! - A mutex-guarded [`Counter`] for concurrent instrumentation
//!
//! # Example
//!
//! ```
//! use stage_pipeline::{PipelineBuilder, StageConfig};
//! use std::time::Duration;
//!
//! let pipeline = PipelineBuilder::new(5)
//!     .stage(StageConfig::map("double", 2, |x: &i64| x * 2))
//!     .stage(StageConfig::map("increment", 2, |x: &i64| x + 1))
//!     .stage(StageConfig::map("format", 1, |x: &i64| x.to_string()))
//!     .build()?;
//!
//! for i in 1..=20 {
//!     pipeline.feed(i, None).expect("pipeline is running");
//! }
//! pipeline.shutdown(Some(Duration::from_secs(5)))?;
//!
//! let results = pipeline.drain(Some(Duration::ZERO));
//! assert_eq!(results.len(), 20);
//! # Ok::<(), stage_pipeline::PipelineError>(())
//! ```

pub mod channel;
pub mod counter;
pub mod error;
pub mod metrics;
pub mod pipeline;
pub mod sink;
pub mod stage;
pub mod transform;

// Re-exports for convenience
pub use channel::{Channel, ChannelHandle, ChannelStats};
pub use counter::Counter;
pub use error::{BoxError, ConsumeError, FeedError, PipelineError, ProduceError, Result, TransformError};
pub use metrics::{MetricsSnapshot, PercentileTracker, StageMetrics};
pub use pipeline::{Pipeline, PipelineBuilder, PipelineState};
pub use sink::{CollectErrors, ErrorSink, LogErrors};
pub use stage::{Stage, StageConfig};
pub use transform::{Identity, Transform};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
