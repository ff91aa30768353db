//! Litter box agent - decides, per burst of camera photos, who used the litter box.
//!
//! A motion-triggered camera drops a handful of photos into a folder for
//! every visit. Each photo is classified by an image prediction service; the
//! agent groups the results into bursts and reports one decision per burst:
//! which cat it was (and which way it was going), or that the motion was a
//! false alarm.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        Litter Box Agent                         │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  ┌───────────┐   ┌───────────┐   ┌───────────┐   ┌──────────┐  │
//! │  │  Watcher  │──▶│  Ingest   │──▶│ Windowing │──▶│ Decision │  │
//! │  │ (notify)  │   │ (vision)  │   │ (5 / 15s) │   │ (select) │  │
//! │  └───────────┘   └───────────┘   └───────────┘   └──────────┘  │
//! │        │                                               │        │
//! │        ▼                                               ▼        │
//! │  ┌───────────┐                                   ┌──────────┐  │
//! │  │ Activity  │                                   │   Sink   │  │
//! │  │   stats   │                                   │ (jsonl)  │  │
//! │  └───────────┘                                   └──────────┘  │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use litterbox_agent::core::{select, ClassificationRecord, WindowAggregator};
//! use std::time::{Duration, Instant};
//!
//! let mut aggregator = WindowAggregator::new(2, Duration::from_secs(15));
//! let now = Instant::now();
//! aggregator.admit(ClassificationRecord::subject("Negative", 0.4, "/cam/1.jpg"), now);
//! let window = aggregator
//!     .admit(ClassificationRecord::subject("Whiskers", 0.9, "/cam/2.jpg"), now)
//!     .flushed
//!     .expect("second photo fills the window");
//!
//! let decision = select(&window.records).expect("window is not empty");
//! assert!(decision.is_positive);
//! ```

pub mod config;
pub mod core;
pub mod pipeline;
pub mod sink;
pub mod stats;
pub mod vision;
pub mod watcher;

// Re-export key types at crate root for convenience
pub use config::{Config, DirectionMode, SinkKind};
pub use self::core::{
    select, ClassificationRecord, Decision, Direction, FlushReason, Ingestor, WindowAggregator,
};
pub use pipeline::{DirectionSource, Pipeline, PipelineError, PipelineSettings};
pub use sink::{DecisionReport, HttpSink, JsonlSink, Reporter, ResultSink, RetryingSink};
pub use stats::{ActivityLog, SharedActivityLog};
pub use vision::{BlockingVisionClient, Classifier, ModelRef, TagPrediction, VisionEndpoint};
pub use watcher::{DirectoryWatcher, WatchEvent};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
