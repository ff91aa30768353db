//! Directory watching for the litter box agent.
//!
//! Only file creations are forwarded; modifications, removals and renames
//! are dropped at the source.

pub mod fs;
pub mod types;

// Re-export commonly used types
pub use fs::{translate, DirectoryWatcher, WatcherError};
pub use types::WatchEvent;
