//! Activity statistics for the litter box agent.
//!
//! Counters cover every stage of the pipeline so a running agent can be
//! audited without reading its logs.

pub mod log;

// Re-export commonly used types
pub use log::{create_shared_log_with_persistence, ActivityLog, ActivityStats, SharedActivityLog};
