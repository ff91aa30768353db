//! Signals produced by the directory watcher.

use std::path::PathBuf;

/// One notification from the watched folder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    /// A file was created at this absolute path
    Created(PathBuf),
    /// The notification backend reported a problem (e.g. queue overflow)
    Error(String),
}
