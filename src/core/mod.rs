//! Core functionality for the litter box agent.
//!
//! This module contains:
//! - Photo ingestion with a readiness retry for files still being written
//! - Reduction of tag predictions into one record per photo
//! - Window management for grouping records into bursts
//! - Best-of-burst decision selection

pub mod classify;
pub mod decision;
pub mod ingest;
pub mod windowing;

// Re-export commonly used types
pub use classify::{classify_record, ClassificationRecord, Direction, NEGATIVE_SUBJECT};
pub use decision::{select, Decision, DecisionError};
pub use ingest::{read_when_ready, read_with_retry, IngestError, Ingestor, ReadyBytes};
pub use windowing::{
    Admission, AggregatorState, Deadline, DeadlineQueue, FlushReason, FlushedWindow, Window,
    WindowAggregator, WindowClosed, WindowId, MAX_WINDOW_TIMEOUT,
};
