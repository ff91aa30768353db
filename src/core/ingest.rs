//! Reading freshly created photos and handing them to the classifier.
//!
//! A file-creation notification can arrive before the camera has written any
//! bytes. An empty read is therefore treated as "still being written": the
//! ingestor sleeps for the configured delay and reads again, for as long as
//! it takes. Any real I/O error is returned immediately.

use crate::core::classify::{classify_record, ClassificationRecord};
use crate::vision::{Classifier, ModelRef, TagPrediction, VisionError};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

/// Errors raised while ingesting one photo.
#[derive(Debug, Error)]
pub enum IngestError {
    /// The photo could not be read (missing, permissions, ...)
    #[error("failed to read {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    /// The prediction service rejected or failed the request
    #[error("failed to classify {path:?}: {source}")]
    Classifier {
        path: PathBuf,
        #[source]
        source: VisionError,
    },
}

impl IngestError {
    /// Photo the error belongs to.
    pub fn path(&self) -> &Path {
        match self {
            IngestError::Io { path, .. } | IngestError::Classifier { path, .. } => path,
        }
    }

    /// Whether processing as a whole must stop.
    ///
    /// Read failures are fatal; a failed classification only costs the one photo.
    pub fn is_fatal(&self) -> bool {
        matches!(self, IngestError::Io { .. })
    }
}

/// Bytes of a photo plus the number of empty reads it took to get them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadyBytes {
    pub bytes: Vec<u8>,
    pub retries: u32,
}

/// Read until a non-empty result comes back.
///
/// `read` performs one read attempt and `pause` is invoked once per empty
/// read, before the next attempt.
pub fn read_with_retry<R, P>(path: &Path, mut read: R, mut pause: P) -> io::Result<ReadyBytes>
where
    R: FnMut() -> io::Result<Vec<u8>>,
    P: FnMut(),
{
    let mut retries = 0u32;
    loop {
        let bytes = read()?;
        if !bytes.is_empty() {
            if retries > 0 {
                debug!(path = %path.display(), retries, "photo became readable");
            }
            return Ok(ReadyBytes { bytes, retries });
        }
        retries += 1;
        info!(path = %path.display(), retry = retries, "photo still empty, waiting");
        pause();
    }
}

/// Read a photo from disk, sleeping `read_delay` between empty reads.
pub fn read_when_ready(path: &Path, read_delay: Duration) -> io::Result<ReadyBytes> {
    read_with_retry(path, || std::fs::read(path), || std::thread::sleep(read_delay))
}

/// Turns photo paths into classification records.
#[derive(Clone)]
pub struct Ingestor {
    classifier: Arc<dyn Classifier>,
    model: ModelRef,
    read_delay: Duration,
}

impl Ingestor {
    /// Create an ingestor classifying against `model`.
    pub fn new(classifier: Arc<dyn Classifier>, model: ModelRef, read_delay: Duration) -> Self {
        Self {
            classifier,
            model,
            read_delay,
        }
    }

    /// Read and classify one photo against an arbitrary model.
    pub fn predict(&self, path: &Path, model: &ModelRef) -> Result<Vec<TagPrediction>, IngestError> {
        let ready = read_when_ready(path, self.read_delay).map_err(|source| IngestError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let tags = self
            .classifier
            .classify(&ready.bytes, model)
            .map_err(|source| IngestError::Classifier {
                path: path.to_path_buf(),
                source,
            })?;

        for tag in &tags {
            debug!(
                path = %path.display(),
                tag = %tag.tag_name,
                probability = tag.probability,
                "prediction"
            );
        }
        Ok(tags)
    }

    /// Read, classify and reduce one photo against the identity model.
    pub fn ingest(&self, path: &Path) -> Result<ClassificationRecord, IngestError> {
        let tags = self.predict(path, &self.model)?;
        Ok(classify_record(&tags, path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::sync::Mutex;

    struct FixedClassifier {
        result: Mutex<Option<Result<Vec<TagPrediction>, VisionError>>>,
    }

    impl Classifier for FixedClassifier {
        fn classify(&self, image: &[u8], _model: &ModelRef) -> Result<Vec<TagPrediction>, VisionError> {
            assert!(!image.is_empty());
            self.result.lock().unwrap().take().expect("classified twice")
        }
    }

    fn ingestor(result: Result<Vec<TagPrediction>, VisionError>) -> Ingestor {
        let classifier = Arc::new(FixedClassifier {
            result: Mutex::new(Some(result)),
        });
        Ingestor::new(
            classifier,
            ModelRef::new(uuid::Uuid::nil(), uuid::Uuid::nil()),
            Duration::from_millis(1),
        )
    }

    #[test]
    fn test_retries_until_content_appears() {
        let reads = Cell::new(0);
        let pauses = Cell::new(0);

        let ready = read_with_retry(
            Path::new("/cam/a.jpg"),
            || {
                reads.set(reads.get() + 1);
                Ok(if reads.get() < 3 {
                    Vec::new()
                } else {
                    b"jpeg".to_vec()
                })
            },
            || pauses.set(pauses.get() + 1),
        )
        .unwrap();

        assert_eq!(ready.bytes, b"jpeg".to_vec());
        assert_eq!(ready.retries, 2);
        assert_eq!(reads.get(), 3);
        assert_eq!(pauses.get(), 2);
    }

    #[test]
    fn test_hard_error_is_not_retried() {
        let pauses = Cell::new(0);
        let result = read_with_retry(
            Path::new("/cam/a.jpg"),
            || Err(io::Error::new(io::ErrorKind::NotFound, "gone")),
            || pauses.set(pauses.get() + 1),
        );
        assert_eq!(result.unwrap_err().kind(), io::ErrorKind::NotFound);
        assert_eq!(pauses.get(), 0);
    }

    #[test]
    fn test_read_when_ready_waits_for_writer() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snap.jpg");
        std::fs::write(&path, b"").unwrap();

        let writer_path = path.clone();
        let writer = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(30));
            std::fs::write(writer_path, b"\xff\xd8\xff").unwrap();
        });

        let ready = read_when_ready(&path, Duration::from_millis(10)).unwrap();
        writer.join().unwrap();
        assert_eq!(ready.bytes, b"\xff\xd8\xff".to_vec());
        assert!(ready.retries >= 1);
    }

    #[test]
    fn test_ingest_builds_record() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snap.jpg");
        std::fs::write(&path, b"\xff\xd8\xff").unwrap();

        let record = ingestor(Ok(vec![
            TagPrediction::new("Whiskers", 0.7),
            TagPrediction::new("Negative", 0.2),
        ]))
        .ingest(&path)
        .unwrap();

        assert_eq!(record.subject_name, "Whiskers");
        assert_eq!(record.photo_path, path);
    }

    #[test]
    fn test_missing_file_is_fatal() {
        let err = ingestor(Ok(Vec::new()))
            .ingest(Path::new("/definitely/not/here.jpg"))
            .unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(err.path(), Path::new("/definitely/not/here.jpg"));
    }

    #[test]
    fn test_classifier_failure_is_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snap.jpg");
        std::fs::write(&path, b"\xff\xd8\xff").unwrap();

        let err = ingestor(Err(VisionError::Service {
            status: 401,
            message: "bad key".to_string(),
        }))
        .ingest(&path)
        .unwrap_err();
        assert!(matches!(err, IngestError::Classifier { .. }));
        assert!(!err.is_fatal());
    }
}
