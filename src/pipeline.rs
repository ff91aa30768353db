//! The agent's event loop.
//!
//! One thread owns the window state and consumes three kinds of signals:
//! watch events from the folder, classification results from the ingestion
//! workers, and window deadlines. Each signal is handled to completion before
//! the next one is looked at, so a window can only be flushed once.
//!
//! ```text
//!  watcher ──Created(path)──▶ ingest workers ──record──▶ ┌──────────────┐
//!     │                                                   │  aggregator  │──flush──▶ select ──▶ sink
//!     └──────Error(msg)──── logged ──────────────────────▶│ (this loop)  │
//!                                      deadline queue ──▶ └──────────────┘
//! ```
//!
//! Records join a window in the order their classification completes. With a
//! single ingestion worker (the default) that is the order files were created.

use crate::config::{Config, DirectionMode};
use crate::core::{
    classify_record, select, AggregatorState, ClassificationRecord, DeadlineQueue, DecisionError,
    FlushedWindow, IngestError, Ingestor, WindowAggregator,
};
use crate::sink::{device_id, DecisionReport, Reporter};
use crate::stats::SharedActivityLog;
use crate::vision::ModelRef;
use crate::watcher::WatchEvent;
use crossbeam_channel::{at, never, select, unbounded, Receiver, Sender};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// How often the loop wakes up to check the shutdown flag.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Where the direction of a positive decision comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectionSource {
    /// Already present on each record
    Combined,
    /// Second classification of the winning photo against this model
    Separate(ModelRef),
}

/// Settings of the event loop.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub batch_size: usize,
    pub window_timeout: Duration,
    pub ingest_workers: usize,
    pub extensions: Vec<String>,
    pub direction: DirectionSource,
}

impl PipelineSettings {
    /// Derive settings from the agent configuration.
    pub fn from_config(config: &Config) -> Self {
        let direction = match (config.direction_mode, config.vision.direction_model()) {
            (DirectionMode::Separate, Some(model)) => DirectionSource::Separate(model),
            _ => DirectionSource::Combined,
        };
        Self {
            batch_size: config.batch_size,
            window_timeout: config.window_timeout,
            ingest_workers: config.ingest_workers,
            extensions: config.extensions.clone(),
            direction,
        }
    }

    /// Whether a created path should be classified.
    pub fn accepts(&self, path: &Path) -> bool {
        if self.extensions.is_empty() {
            return true;
        }
        path.extension()
            .and_then(|e| e.to_str())
            .map(|ext| self.extensions.iter().any(|x| x.eq_ignore_ascii_case(ext)))
            .unwrap_or(false)
    }
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            batch_size: 5,
            window_timeout: Duration::from_secs(15),
            ingest_workers: 1,
            extensions: Vec::new(),
            direction: DirectionSource::Combined,
        }
    }
}

/// Errors that stop the event loop.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Ingest(#[from] IngestError),
    #[error("decision invariant violated: {0}")]
    Decision(#[from] DecisionError),
    #[error("failed to spawn ingestion worker: {0}")]
    Spawn(#[source] std::io::Error),
    /// Every ingestion worker exited while photos were still expected
    #[error("ingestion workers stopped with {pending} photo(s) unprocessed")]
    WorkersGone { pending: usize },
}

/// Result of ingesting one photo on a worker thread.
struct Ingested {
    path: PathBuf,
    result: Result<ClassificationRecord, IngestError>,
}

/// Owns the aggregator and drives it from the incoming signals.
pub struct Pipeline {
    settings: PipelineSettings,
    aggregator: WindowAggregator,
    deadlines: DeadlineQueue,
    ingestor: Ingestor,
    reporter: Reporter,
    stats: SharedActivityLog,
    device_id: String,
    /// Photos handed to the workers whose result has not come back yet
    in_flight: usize,
}

impl Pipeline {
    pub fn new(
        settings: PipelineSettings,
        ingestor: Ingestor,
        reporter: Reporter,
        stats: SharedActivityLog,
    ) -> Self {
        Self {
            aggregator: WindowAggregator::new(settings.batch_size, settings.window_timeout),
            deadlines: DeadlineQueue::new(),
            settings,
            ingestor,
            reporter,
            stats,
            device_id: device_id(),
            in_flight: 0,
        }
    }

    pub fn with_device_id(mut self, device_id: impl Into<String>) -> Self {
        self.device_id = device_id.into();
        self
    }

    /// Run until `running` is cleared or the event source is exhausted.
    ///
    /// When `events` disconnects, photos already handed to the workers are
    /// still classified and any open window is decided at its deadline before
    /// this returns. Clearing `running` stops immediately and discards the
    /// open window.
    pub fn run(
        mut self,
        events: Receiver<WatchEvent>,
        running: Arc<AtomicBool>,
    ) -> Result<(), PipelineError> {
        let (jobs_tx, jobs_rx) = unbounded::<PathBuf>();
        let (results_tx, results_rx) = unbounded::<Ingested>();
        self.spawn_workers(jobs_rx, results_tx)?;

        let mut jobs_tx = Some(jobs_tx);
        let mut events_open = true;
        let mut results_open = true;

        while running.load(Ordering::SeqCst) {
            if !events_open && !results_open && self.aggregator.state() == AggregatorState::Empty {
                debug!("event source exhausted, stopping");
                return Ok(());
            }

            let event_rx = if events_open { events.clone() } else { never() };
            let result_rx = if results_open {
                results_rx.clone()
            } else {
                never()
            };
            let timer = self.deadlines.next_at().map(at).unwrap_or_else(never);

            select! {
                recv(event_rx) -> msg => match msg {
                    Ok(event) => self.on_watch_event(event, jobs_tx.as_ref())?,
                    Err(_) => {
                        events_open = false;
                        // Workers exit once the queued jobs are done.
                        jobs_tx = None;
                    }
                },
                recv(result_rx) -> msg => match msg {
                    Ok(ingested) => {
                        self.in_flight = self.in_flight.saturating_sub(1);
                        self.on_ingested(ingested)?;
                    }
                    Err(_) => {
                        // Workers only exit on their own once the job queue is closed and empty.
                        if events_open || self.in_flight > 0 {
                            return Err(self.workers_gone());
                        }
                        results_open = false;
                    }
                },
                recv(timer) -> _ => self.on_deadlines()?,
                default(POLL_INTERVAL) => {}
            }
        }

        let discarded = self.aggregator.discard();
        if discarded > 0 {
            warn!(records = discarded, "shutting down with an undecided burst");
        }
        Ok(())
    }

    fn spawn_workers(
        &self,
        jobs: Receiver<PathBuf>,
        results: Sender<Ingested>,
    ) -> Result<(), PipelineError> {
        for n in 0..self.settings.ingest_workers.max(1) {
            let jobs = jobs.clone();
            let results = results.clone();
            let ingestor = self.ingestor.clone();
            std::thread::Builder::new()
                .name(format!("ingest-{n}"))
                .spawn(move || {
                    for path in jobs.iter() {
                        let result = ingestor.ingest(&path);
                        if results.send(Ingested { path, result }).is_err() {
                            break;
                        }
                    }
                })
                .map_err(PipelineError::Spawn)?;
        }
        Ok(())
    }

    fn on_watch_event(
        &mut self,
        event: WatchEvent,
        jobs: Option<&Sender<PathBuf>>,
    ) -> Result<(), PipelineError> {
        match event {
            WatchEvent::Created(path) => {
                self.stats.record_photo_seen();
                if !self.settings.accepts(&path) {
                    debug!(path = %path.display(), "ignoring non-photo file");
                    self.stats.record_photo_skipped();
                    return Ok(());
                }
                info!(path = %path.display(), "photo created");
                if let Some(jobs) = jobs {
                    if jobs.send(path).is_err() {
                        self.stats.record_dropped();
                        return Err(self.workers_gone());
                    }
                    self.in_flight += 1;
                }
            }
            WatchEvent::Error(message) => {
                self.stats.record_watcher_error();
                warn!("watcher error: {message}");
            }
        }
        Ok(())
    }

    fn workers_gone(&self) -> PipelineError {
        let pending = self.in_flight;
        for _ in 0..pending {
            self.stats.record_dropped();
        }
        error!(pending, "ingestion workers stopped unexpectedly");
        PipelineError::WorkersGone { pending }
    }

    fn on_ingested(&mut self, ingested: Ingested) -> Result<(), PipelineError> {
        let record = match ingested.result {
            Ok(record) => record,
            Err(e) if e.is_fatal() => {
                error!(path = %ingested.path.display(), "{e}");
                return Err(e.into());
            }
            Err(e) => {
                self.stats.record_dropped();
                warn!(path = %ingested.path.display(), "photo dropped from burst: {e}");
                return Ok(());
            }
        };

        debug!(
            path = %record.photo_path.display(),
            subject = %record.subject_name,
            probability = record.subject_probability,
            "photo classified"
        );
        self.stats.record_admitted();

        let admission = self.aggregator.admit(record, Instant::now());
        if let Some(deadline) = admission.armed {
            self.deadlines.arm(deadline);
        }
        if let Some(window) = admission.flushed {
            self.decide(window)?;
        }
        Ok(())
    }

    fn on_deadlines(&mut self) -> Result<(), PipelineError> {
        let now = Instant::now();
        while let Some(deadline) = self.deadlines.pop_due(now) {
            if let Some(window) = self.aggregator.deadline_fired(deadline.window, now) {
                self.decide(window)?;
            }
        }
        Ok(())
    }

    /// Decide a flushed window and deliver the result.
    fn decide(&mut self, window: FlushedWindow) -> Result<(), PipelineError> {
        let mut decision = select(&window.records)?;

        if decision.is_positive {
            if let DirectionSource::Separate(model) = self.settings.direction {
                decision.winner = self.resolve_direction(decision.winner, &model);
            }
        }

        info!(
            window = %window.id,
            reason = ?window.reason,
            photos = window.records.len(),
            open_ms = window.open_for.as_millis() as u64,
            positive = decision.is_positive,
            "burst decided"
        );

        let report = DecisionReport::new(&decision, &window, &self.device_id);
        info!("{}", report.summary());

        let delivery = self.reporter.deliver(&report);
        self.stats.record_decision(window.reason, decision.is_positive);
        self.stats.record_delivery(delivery);
        Ok(())
    }

    /// Ask the direction model about the winning photo.
    ///
    /// A failed call leaves the direction unknown rather than losing the decision.
    fn resolve_direction(
        &self,
        winner: ClassificationRecord,
        model: &ModelRef,
    ) -> ClassificationRecord {
        match self.ingestor.predict(&winner.photo_path, model) {
            Ok(tags) => {
                let direction = classify_record(&tags, &winner.photo_path);
                winner.with_direction(direction.direction, direction.direction_probability)
            }
            Err(e) => {
                warn!(path = %winner.photo_path.display(), "direction unavailable: {e}");
                winner
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extension_filter() {
        let mut settings = PipelineSettings::from_config(&Config::default());
        assert!(settings.accepts(Path::new("/cam/01-20240101.JPG")));
        assert!(!settings.accepts(Path::new("/cam/01-20240101.avi")));
        assert!(!settings.accepts(Path::new("/cam/lastsnap")));

        settings.extensions.clear();
        assert!(settings.accepts(Path::new("/cam/01-20240101.avi")));
    }

    #[test]
    fn test_separate_mode_needs_direction_model() {
        let mut config = Config::default();
        assert_eq!(
            PipelineSettings::from_config(&config).direction,
            DirectionSource::Combined
        );

        config.vision.direction = Some(crate::config::ModelConfig {
            project_id: uuid::Uuid::new_v4(),
            iteration_id: uuid::Uuid::new_v4(),
        });
        assert!(matches!(
            PipelineSettings::from_config(&config).direction,
            DirectionSource::Separate(_)
        ));

        config.direction_mode = DirectionMode::Combined;
        assert_eq!(
            PipelineSettings::from_config(&config).direction,
            DirectionSource::Combined
        );
    }
}
