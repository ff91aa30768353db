//! Folder watcher backed by the platform's native notification API.

use crate::watcher::types::WatchEvent;
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::warn;

/// Capacity of the notification queue between the backend and the agent.
const EVENT_QUEUE_CAPACITY: usize = 10_000;

/// Errors that can occur while setting up the watcher.
#[derive(Debug, Error)]
pub enum WatcherError {
    #[error("Watcher is already running")]
    AlreadyRunning,
    #[error("Watch folder {0:?} does not exist or is not a directory")]
    MissingFolder(PathBuf),
    #[error("Failed to watch folder: {0}")]
    Backend(#[from] notify::Error),
}

/// Translate one backend notification into watch events.
pub fn translate(result: notify::Result<Event>) -> Vec<WatchEvent> {
    match result {
        Ok(event) => match event.kind {
            EventKind::Create(_) => event.paths.into_iter().map(WatchEvent::Created).collect(),
            _ => Vec::new(),
        },
        Err(e) => vec![WatchEvent::Error(e.to_string())],
    }
}

/// Watches one folder (non-recursively) for created files.
pub struct DirectoryWatcher {
    folder: PathBuf,
    sender: Sender<WatchEvent>,
    receiver: Receiver<WatchEvent>,
    watcher: Option<RecommendedWatcher>,
}

impl DirectoryWatcher {
    /// Create a new watcher for `folder`. Nothing is watched until [`start`](Self::start).
    pub fn new(folder: impl Into<PathBuf>) -> Self {
        let (sender, receiver) = bounded(EVENT_QUEUE_CAPACITY);
        Self {
            folder: folder.into(),
            sender,
            receiver,
            watcher: None,
        }
    }

    pub fn folder(&self) -> &Path {
        &self.folder
    }

    /// Start watching.
    pub fn start(&mut self) -> Result<(), WatcherError> {
        if self.watcher.is_some() {
            return Err(WatcherError::AlreadyRunning);
        }
        if !self.folder.is_dir() {
            return Err(WatcherError::MissingFolder(self.folder.clone()));
        }

        let sender = self.sender.clone();
        let mut watcher = notify::recommended_watcher(move |result: notify::Result<Event>| {
            for event in translate(result) {
                match sender.try_send(event) {
                    Ok(()) => {}
                    Err(TrySendError::Full(event)) => {
                        warn!(?event, "watch queue full, notification dropped");
                    }
                    Err(TrySendError::Disconnected(_)) => return,
                }
            }
        })?;
        watcher.watch(&self.folder, RecursiveMode::NonRecursive)?;
        self.watcher = Some(watcher);
        Ok(())
    }

    /// Stop watching. Events already queued stay available.
    pub fn stop(&mut self) {
        self.watcher = None;
    }

    /// Check if the watcher is currently running.
    pub fn is_running(&self) -> bool {
        self.watcher.is_some()
    }

    /// Get the receiver for watch events.
    pub fn receiver(&self) -> &Receiver<WatchEvent> {
        &self.receiver
    }
}
