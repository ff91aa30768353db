//! Window management for grouping photo classifications into bursts.
//!
//! A window opens when a record arrives and no window is open, and it is
//! flushed exactly once: either when it reaches the target size or when its
//! deadline passes, whichever happens first. A deadline that fires for a
//! window that is already gone is a no-op.
//!
//! The aggregator is a plain state machine driven by one caller; timers are
//! kept outside of it in a [`DeadlineQueue`] and fed back through
//! [`WindowAggregator::deadline_fired`].

use crate::core::classify::ClassificationRecord;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::debug;

/// Longest time a window may stay open; longer timeouts are clamped to it.
pub const MAX_WINDOW_TIMEOUT: Duration = Duration::from_secs(24 * 60 * 60);

/// Identifier of one window, unique for the lifetime of an aggregator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WindowId(u64);

impl std::fmt::Display for WindowId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "w{}", self.0)
    }
}

/// Why a window was flushed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlushReason {
    /// The window reached its target size
    Full,
    /// The deadline passed first
    TimedOut,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("window {0} is already closed")]
pub struct WindowClosed(pub WindowId);

/// A bounded, ordered batch of records belonging to one burst.
#[derive(Debug)]
pub struct Window {
    id: WindowId,
    records: Vec<ClassificationRecord>,
    target_size: usize,
    opened_at: Instant,
    deadline: Instant,
    closed: bool,
}

impl Window {
    /// Create a new empty window opened at `opened_at`.
    ///
    /// `timeout` is clamped to [`MAX_WINDOW_TIMEOUT`].
    pub fn new(id: WindowId, target_size: usize, opened_at: Instant, timeout: Duration) -> Self {
        Self {
            id,
            records: Vec::with_capacity(target_size),
            target_size,
            opened_at,
            deadline: opened_at + timeout.min(MAX_WINDOW_TIMEOUT),
            closed: false,
        }
    }

    pub fn id(&self) -> WindowId {
        self.id
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.records.len() >= self.target_size
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Append a record, returning the new length.
    pub fn push(&mut self, record: ClassificationRecord) -> Result<usize, WindowClosed> {
        if self.closed {
            return Err(WindowClosed(self.id));
        }
        self.records.push(record);
        Ok(self.records.len())
    }

    /// Close the window and hand out its records.
    ///
    /// Only the first call yields a [`FlushedWindow`].
    pub fn close(&mut self, reason: FlushReason, now: Instant) -> Option<FlushedWindow> {
        if self.closed {
            return None;
        }
        self.closed = true;
        Some(FlushedWindow {
            id: self.id,
            records: std::mem::take(&mut self.records),
            reason,
            open_for: now.saturating_duration_since(self.opened_at),
        })
    }
}

/// Immutable snapshot of a window handed to the decision stage.
#[derive(Debug, Clone)]
pub struct FlushedWindow {
    pub id: WindowId,
    pub records: Vec<ClassificationRecord>,
    pub reason: FlushReason,
    /// Time between the first record and the flush
    pub open_for: Duration,
}

/// A timer armed for one window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline {
    pub window: WindowId,
    pub at: Instant,
}

/// Effects of admitting one record.
#[derive(Debug, Default)]
pub struct Admission {
    /// Set when the record opened a window; the caller must arm this timer
    pub armed: Option<Deadline>,
    /// Set when the record filled the window
    pub flushed: Option<FlushedWindow>,
}

/// Observable state of the aggregator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregatorState {
    /// No open window
    Empty,
    /// A window is open and holds `len` records
    Collecting { window: WindowId, len: usize },
}

/// Owns the current window and decides when it is flushed.
pub struct WindowAggregator {
    target_size: usize,
    timeout: Duration,
    current: Option<Window>,
    next_id: u64,
}

impl WindowAggregator {
    /// Create a new window aggregator. A `target_size` of zero is treated as one.
    pub fn new(target_size: usize, timeout: Duration) -> Self {
        Self {
            target_size: target_size.max(1),
            timeout,
            current: None,
            next_id: 0,
        }
    }

    pub fn state(&self) -> AggregatorState {
        match &self.current {
            Some(window) => AggregatorState::Collecting {
                window: window.id(),
                len: window.len(),
            },
            None => AggregatorState::Empty,
        }
    }

    /// Process an incoming record.
    ///
    /// Opens a window if none is open, appends the record, and flushes the
    /// window in the same step when it reaches the target size.
    pub fn admit(&mut self, record: ClassificationRecord, now: Instant) -> Admission {
        let mut admission = Admission::default();

        if self.current.is_none() {
            let id = WindowId(self.next_id);
            self.next_id += 1;
            let window = Window::new(id, self.target_size, now, self.timeout);
            admission.armed = Some(Deadline {
                window: id,
                at: window.deadline(),
            });
            debug!(window = %id, "window opened");
            self.current = Some(window);
        }

        let Some(window) = self.current.as_mut() else {
            return admission;
        };
        match window.push(record) {
            Ok(len) => debug!(window = %window.id(), len, "record appended"),
            // Closed windows never stay current.
            Err(e) => debug!("{e}"),
        }

        if window.is_full() {
            admission.flushed = self.complete_current_window(FlushReason::Full, now);
        }
        admission
    }

    /// Handle the deadline of `window` passing.
    ///
    /// Returns the flushed window when `window` is still open; a deadline for
    /// a window that was already flushed (or never existed) does nothing.
    pub fn deadline_fired(&mut self, window: WindowId, now: Instant) -> Option<FlushedWindow> {
        let open = self.current.as_ref().map(Window::id);
        if open == Some(window) {
            self.complete_current_window(FlushReason::TimedOut, now)
        } else {
            debug!(window = %window, "stale deadline ignored");
            None
        }
    }

    /// Drop the open window without deciding it, returning how many records were lost.
    pub fn discard(&mut self) -> usize {
        self.current.take().map(|w| w.len()).unwrap_or(0)
    }

    /// Complete the current window and reset to empty.
    fn complete_current_window(&mut self, reason: FlushReason, now: Instant) -> Option<FlushedWindow> {
        let mut window = self.current.take()?;
        window.close(reason, now)
    }
}

/// Pending window deadlines, earliest first.
#[derive(Debug, Default)]
pub struct DeadlineQueue {
    pending: VecDeque<Deadline>,
}

impl DeadlineQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm a deadline. Deadlines cannot be cancelled; stale ones are ignored when they fire.
    pub fn arm(&mut self, deadline: Deadline) {
        let index = self.pending.partition_point(|d| d.at <= deadline.at);
        self.pending.insert(index, deadline);
    }

    /// When the next deadline fires, if any is armed.
    pub fn next_at(&self) -> Option<Instant> {
        self.pending.front().map(|d| d.at)
    }

    /// Remove and return the earliest deadline if it is due at `now`.
    pub fn pop_due(&mut self, now: Instant) -> Option<Deadline> {
        if self.pending.front()?.at <= now {
            self.pending.pop_front()
        } else {
            None
        }
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
