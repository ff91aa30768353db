//! Delivery of decisions.
//!
//! Every flushed window produces one [`DecisionReport`], handed to a
//! [`ResultSink`]. Delivery is retried with exponential backoff; a report that
//! still cannot be delivered is appended to a local spool file so it can be
//! replayed later instead of being lost.

use crate::core::{Decision, Direction, FlushReason, FlushedWindow};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{error, warn};
use uuid::Uuid;

/// The record written for one decided burst.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionReport {
    pub id: Uuid,
    pub device_id: String,
    /// Agent clock at decision time. A receiving server may replace it with its own timestamp.
    pub decided_at: DateTime<Utc>,
    pub subject_name: String,
    pub subject_probability: f64,
    pub direction: Direction,
    pub direction_probability: f64,
    pub photo_path: PathBuf,
    pub is_positive: bool,
    pub window_size: usize,
    pub flush_reason: FlushReason,
}

impl DecisionReport {
    /// Build the report for a decided window.
    pub fn new(decision: &Decision, window: &FlushedWindow, device_id: &str) -> Self {
        let winner = &decision.winner;
        Self {
            id: Uuid::new_v4(),
            device_id: device_id.to_string(),
            decided_at: Utc::now(),
            subject_name: winner.subject_name.clone(),
            subject_probability: winner.subject_probability,
            direction: winner.direction,
            direction_probability: winner.direction_probability,
            photo_path: winner.photo_path.clone(),
            is_positive: decision.is_positive,
            window_size: window.records.len(),
            flush_reason: window.reason,
        }
    }

    /// One-line human readable summary.
    pub fn summary(&self) -> String {
        if self.is_positive {
            format!(
                "{:.1}% sure that {} used the litter box (direction: {}, {:.1}%)",
                self.subject_probability * 100.0,
                self.subject_name,
                self.direction,
                self.direction_probability * 100.0
            )
        } else {
            format!(
                "{:.1}% sure that this was a false motion event",
                self.subject_probability * 100.0
            )
        }
    }
}

/// Sink error types.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("Sink IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Sink serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Sink config error: {0}")]
    Config(String),
    #[error("Sink network error: {0}")]
    Network(String),
    #[error("Sink server error ({status}): {message}")]
    Server { status: u16, message: String },
}

/// Destination for decision reports.
pub trait ResultSink: Send {
    fn report(&mut self, report: &DecisionReport) -> Result<(), SinkError>;
}

impl<S: ResultSink + ?Sized> ResultSink for Box<S> {
    fn report(&mut self, report: &DecisionReport) -> Result<(), SinkError> {
        (**self).report(report)
    }
}

/// Appends reports as JSON lines to a file.
#[derive(Debug, Clone)]
pub struct JsonlSink {
    path: PathBuf,
}

impl JsonlSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read back every report in the file, skipping lines that do not parse.
    pub fn read_all(path: &Path) -> Result<Vec<DecisionReport>, SinkError> {
        let content = std::fs::read_to_string(path)?;
        let mut reports = Vec::new();
        for (n, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(line) {
                Ok(report) => reports.push(report),
                Err(e) => warn!(
                    path = %path.display(),
                    line = n + 1,
                    "skipping unreadable report: {e}"
                ),
            }
        }
        Ok(reports)
    }
}

impl ResultSink for JsonlSink {
    fn report(&mut self, report: &DecisionReport) -> Result<(), SinkError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut line = serde_json::to_string(report)?;
        line.push('\n');
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(line.as_bytes())?;
        Ok(())
    }
}

/// POSTs each report as JSON to an HTTP endpoint.
pub struct HttpSink {
    url: String,
    token: Option<String>,
    client: reqwest::Client,
    runtime: tokio::runtime::Runtime,
}

impl HttpSink {
    /// Create a new HTTP sink.
    pub fn new(url: impl Into<String>, token: Option<String>) -> Result<Self, SinkError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| SinkError::Config(format!("Failed to create runtime: {e}")))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| SinkError::Config(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            url: url.into(),
            token,
            client,
            runtime,
        })
    }

    async fn post(&self, report: &DecisionReport) -> Result<(), SinkError> {
        let mut request = self.client.post(&self.url).json(report);
        if let Some(token) = &self.token {
            request = request.header("Authorization", format!("Bearer {token}"));
        }

        let response = request
            .send()
            .await
            .map_err(|e| SinkError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(SinkError::Server {
                status: status.as_u16(),
                message,
            });
        }
        Ok(())
    }
}

impl ResultSink for HttpSink {
    fn report(&mut self, report: &DecisionReport) -> Result<(), SinkError> {
        self.runtime.block_on(self.post(report))
    }
}

/// Retries a sink with exponential backoff.
pub struct RetryingSink<S> {
    inner: S,
    max_attempts: u32,
    initial_backoff: Duration,
    sleep: fn(Duration),
}

impl<S: ResultSink> RetryingSink<S> {
    pub fn new(inner: S, max_attempts: u32, initial_backoff: Duration) -> Self {
        Self {
            inner,
            max_attempts: max_attempts.max(1),
            initial_backoff,
            sleep: std::thread::sleep,
        }
    }

    /// Replace the function used to wait between attempts.
    pub fn with_sleep(mut self, sleep: fn(Duration)) -> Self {
        self.sleep = sleep;
        self
    }
}

impl<S: ResultSink> ResultSink for RetryingSink<S> {
    fn report(&mut self, report: &DecisionReport) -> Result<(), SinkError> {
        let mut backoff = self.initial_backoff;
        let mut attempt = 1;
        loop {
            match self.inner.report(report) {
                Ok(()) => return Ok(()),
                Err(e) if attempt >= self.max_attempts => return Err(e),
                Err(e) => {
                    warn!(
                        attempt,
                        max_attempts = self.max_attempts,
                        backoff_ms = backoff.as_millis() as u64,
                        "delivery failed, retrying: {e}"
                    );
                    (self.sleep)(backoff);
                    backoff = backoff.saturating_mul(2);
                    attempt += 1;
                }
            }
        }
    }
}

/// How a report ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Delivered,
    /// Written to the spool file for later delivery
    Spooled,
    Lost,
}

/// Delivers reports, spooling the ones the sink refuses.
pub struct Reporter {
    sink: Box<dyn ResultSink>,
    spool: Option<JsonlSink>,
}

impl Reporter {
    pub fn new(sink: Box<dyn ResultSink>, spool: Option<JsonlSink>) -> Self {
        Self { sink, spool }
    }

    pub fn deliver(&mut self, report: &DecisionReport) -> Delivery {
        let err = match self.sink.report(report) {
            Ok(()) => return Delivery::Delivered,
            Err(e) => e,
        };

        match self.spool.as_mut() {
            Some(spool) => match spool.report(report) {
                Ok(()) => {
                    warn!(
                        report = %report.id,
                        spool = %spool.path().display(),
                        "delivery failed, report spooled: {err}"
                    );
                    Delivery::Spooled
                }
                Err(spool_err) => {
                    error!(report = %report.id, "delivery failed ({err}) and spooling failed: {spool_err}");
                    Delivery::Lost
                }
            },
            None => {
                error!(report = %report.id, "delivery failed, report lost: {err}");
                Delivery::Lost
            }
        }
    }
}

/// Identifier of this agent installation, derived from the hostname.
pub fn device_id() -> String {
    let hostname = hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|_| "unknown".to_string());
    format!("litterbox-{hostname}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{select, ClassificationRecord, WindowAggregator, NEGATIVE_SUBJECT};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Instant;

    fn sample_report() -> DecisionReport {
        let mut aggregator = WindowAggregator::new(2, Duration::from_secs(15));
        let now = Instant::now();
        aggregator.admit(ClassificationRecord::subject(NEGATIVE_SUBJECT, 0.6, "/cam/1.jpg"), now);
        let window = aggregator
            .admit(ClassificationRecord::subject("Whiskers", 0.8, "/cam/2.jpg"), now)
            .flushed
            .unwrap();
        let decision = select(&window.records).unwrap();
        DecisionReport::new(&decision, &window, "litterbox-test")
    }

    struct FlakySink {
        failures_left: u32,
        calls: Arc<AtomicU32>,
    }

    impl ResultSink for FlakySink {
        fn report(&mut self, _report: &DecisionReport) -> Result<(), SinkError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.failures_left > 0 {
                self.failures_left -= 1;
                return Err(SinkError::Network("connection refused".to_string()));
            }
            Ok(())
        }
    }

    #[test]
    fn test_report_fields() {
        let report = sample_report();
        assert_eq!(report.subject_name, "Whiskers");
        assert!(report.is_positive);
        assert_eq!(report.window_size, 2);
        assert_eq!(report.flush_reason, FlushReason::Full);
        assert_eq!(report.photo_path, PathBuf::from("/cam/2.jpg"));
        assert!(report.summary().contains("Whiskers"));
    }

    #[test]
    fn test_jsonl_sink_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join("decisions.jsonl");
        let mut sink = JsonlSink::new(&path);

        let first = sample_report();
        let second = sample_report();
        sink.report(&first).unwrap();
        sink.report(&second).unwrap();

        let read = JsonlSink::read_all(&path).unwrap();
        assert_eq!(read, vec![first, second]);
    }

    #[test]
    fn test_read_all_skips_corrupt_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("undelivered.jsonl");
        let mut sink = JsonlSink::new(&path);

        let first = sample_report();
        sink.report(&first).unwrap();
        {
            let mut file = OpenOptions::new().append(true).open(&path).unwrap();
            writeln!(file, "{{\"id\": truncated").unwrap();
        }
        let second = sample_report();
        sink.report(&second).unwrap();

        let read = JsonlSink::read_all(&path).unwrap();
        assert_eq!(read, vec![first, second]);
    }

    #[test]
    fn test_retry_recovers_from_transient_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let mut sink = RetryingSink::new(
            FlakySink {
                failures_left: 2,
                calls: calls.clone(),
            },
            5,
            Duration::from_secs(1),
        )
        .with_sleep(|_| {});

        sink.report(&sample_report()).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_retry_gives_up_after_max_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let mut sink = RetryingSink::new(
            FlakySink {
                failures_left: u32::MAX,
                calls: calls.clone(),
            },
            3,
            Duration::from_secs(1),
        )
        .with_sleep(|_| {});

        assert!(sink.report(&sample_report()).is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_reporter_spools_undeliverable_reports() {
        let dir = tempfile::tempdir().unwrap();
        let spool_path = dir.path().join("undelivered.jsonl");
        let calls = Arc::new(AtomicU32::new(0));
        let mut reporter = Reporter::new(
            Box::new(FlakySink {
                failures_left: u32::MAX,
                calls,
            }),
            Some(JsonlSink::new(&spool_path)),
        );

        let report = sample_report();
        assert_eq!(reporter.deliver(&report), Delivery::Spooled);
        assert_eq!(JsonlSink::read_all(&spool_path).unwrap(), vec![report]);
    }

    #[test]
    fn test_reporter_without_spool_loses_report() {
        let calls = Arc::new(AtomicU32::new(0));
        let mut reporter = Reporter::new(
            Box::new(FlakySink {
                failures_left: 1,
                calls,
            }),
            None,
        );
        assert_eq!(reporter.deliver(&sample_report()), Delivery::Lost);
        assert_eq!(reporter.deliver(&sample_report()), Delivery::Delivered);
    }
}
