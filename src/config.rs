//! Configuration for the litter box agent.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

use crate::core::MAX_WINDOW_TIMEOUT;
use crate::vision::ModelRef;

/// Main configuration for the agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Folder the camera drops photos into
    pub watch_folder: PathBuf,

    /// Number of photos that completes a burst
    pub batch_size: usize,

    /// How long a burst may stay open before it is decided anyway
    #[serde(with = "duration_serde")]
    pub window_timeout: Duration,

    /// Pause between reads of a file that is still empty
    #[serde(with = "duration_serde")]
    pub read_delay: Duration,

    /// Number of threads reading and classifying photos
    pub ingest_workers: usize,

    /// Accepted photo extensions (empty accepts every file)
    pub extensions: Vec<String>,

    /// How the in/out direction of a visit is obtained
    pub direction_mode: DirectionMode,

    /// Prediction service settings
    pub vision: VisionConfig,

    /// Where decisions are delivered
    pub sink: SinkConfig,

    /// Path for activity statistics and spooled reports
    pub data_path: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("litterbox-agent");

        Self {
            watch_folder: PathBuf::new(),
            batch_size: 5,
            window_timeout: Duration::from_secs(15),
            read_delay: Duration::from_secs(1),
            ingest_workers: 1,
            extensions: vec!["jpg".to_string(), "jpeg".to_string(), "png".to_string()],
            direction_mode: DirectionMode::default(),
            vision: VisionConfig::default(),
            sink: SinkConfig {
                path: data_dir.join("decisions.jsonl"),
                ..SinkConfig::default()
            },
            data_path: data_dir,
        }
    }
}

impl Config {
    /// Load configuration from an explicit file, falling back to defaults when it is absent.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to the given location.
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get the path to the configuration file.
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("litterbox-agent")
            .join("config.json")
    }

    /// Apply `WATCH_FOLDER` and `PREDICTION_KEY` from the environment.
    pub fn apply_env(&mut self) {
        if let Ok(folder) = std::env::var("WATCH_FOLDER") {
            if !folder.trim().is_empty() {
                self.watch_folder = PathBuf::from(folder.trim());
            }
        }
        if let Ok(key) = std::env::var("PREDICTION_KEY") {
            if !key.trim().is_empty() {
                self.vision.prediction_key = key.trim().to_string();
            }
        }
    }

    /// Check that the configuration can drive a running agent.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.watch_folder.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("watch_folder must be set".to_string()));
        }
        if self.batch_size == 0 {
            return Err(ConfigError::Invalid("batch_size must be at least 1".to_string()));
        }
        if self.window_timeout.is_zero() {
            return Err(ConfigError::Invalid(
                "window_timeout must be at least one second".to_string(),
            ));
        }
        if self.window_timeout > MAX_WINDOW_TIMEOUT {
            return Err(ConfigError::Invalid(format!(
                "window_timeout must not exceed {}s",
                MAX_WINDOW_TIMEOUT.as_secs()
            )));
        }
        self.vision.validate()?;
        if self.direction_mode == DirectionMode::Separate && self.vision.direction.is_none() {
            return Err(ConfigError::Invalid(
                "direction_mode \"separate\" requires vision.direction".to_string(),
            ));
        }
        if self.sink.kind == SinkKind::Http && self.sink.url.is_none() {
            return Err(ConfigError::Invalid("http sink requires sink.url".to_string()));
        }
        Ok(())
    }

    /// Ensure all required directories exist.
    pub fn ensure_directories(&self) -> Result<(), ConfigError> {
        std::fs::create_dir_all(&self.data_path)?;
        if let Some(parent) = self.sink.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(())
    }

    /// File holding persisted activity statistics.
    pub fn activity_path(&self) -> PathBuf {
        self.data_path.join("activity.json")
    }

    /// File receiving reports the sink could not deliver.
    pub fn spool_path(&self) -> PathBuf {
        self.data_path.join("undelivered.jsonl")
    }
}

/// How the direction of a visit is obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DirectionMode {
    /// Direction tags come back from the identity model alongside identity tags.
    Combined,
    /// A second call against the direction model, only for the winner of a positive burst.
    #[default]
    Separate,
}

/// Prediction service settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VisionConfig {
    /// Service endpoint, e.g. `https://westus2.api.cognitive.microsoft.com`
    pub endpoint: String,
    /// Prediction key sent with every request
    pub prediction_key: String,
    /// Identity model project
    pub project_id: Uuid,
    /// Identity model iteration
    pub iteration_id: Uuid,
    /// Direction model, used when `direction_mode` is `separate`
    pub direction: Option<ModelConfig>,
    /// Per-request timeout
    #[serde(with = "duration_serde")]
    pub timeout: Duration,
}

impl Default for VisionConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            prediction_key: String::new(),
            project_id: Uuid::nil(),
            iteration_id: Uuid::nil(),
            direction: None,
            timeout: Duration::from_secs(30),
        }
    }
}

impl VisionConfig {
    /// The identity model reference.
    pub fn subject_model(&self) -> ModelRef {
        ModelRef::new(self.project_id, self.iteration_id)
    }

    /// The direction model reference, if one is configured.
    pub fn direction_model(&self) -> Option<ModelRef> {
        self.direction
            .as_ref()
            .map(|m| ModelRef::new(m.project_id, m.iteration_id))
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.endpoint.trim().is_empty() {
            return Err(ConfigError::Invalid("vision.endpoint must be set".to_string()));
        }
        if self.prediction_key.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "vision.prediction_key must be set".to_string(),
            ));
        }
        if self.project_id.is_nil() || self.iteration_id.is_nil() {
            return Err(ConfigError::Invalid(
                "vision.project_id and vision.iteration_id must be set".to_string(),
            ));
        }
        Ok(())
    }
}

/// A project/iteration pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    pub project_id: Uuid,
    pub iteration_id: Uuid,
}

/// Destination kind for decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SinkKind {
    /// Append JSON lines to a local file
    #[default]
    Jsonl,
    /// POST each decision to an HTTP endpoint
    Http,
}

/// Result sink settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SinkConfig {
    pub kind: SinkKind,
    /// Output file for the `jsonl` sink
    pub path: PathBuf,
    /// Endpoint for the `http` sink
    pub url: Option<String>,
    /// Optional bearer token for the `http` sink
    pub token: Option<String>,
    /// Delivery attempts before a report is spooled
    pub max_attempts: u32,
    /// Delay before the first retry, doubled on each further retry
    #[serde(with = "duration_serde")]
    pub initial_backoff: Duration,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            kind: SinkKind::default(),
            path: PathBuf::from("decisions.jsonl"),
            url: None,
            token: None,
            max_attempts: 5,
            initial_backoff: Duration::from_secs(1),
        }
    }
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Parse error: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Serde support for Duration.
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn runnable() -> Config {
        let mut config = Config::default();
        config.watch_folder = PathBuf::from("/tmp/motion");
        config.vision.endpoint = "https://example.invalid".to_string();
        config.vision.prediction_key = "key".to_string();
        config.vision.project_id = Uuid::new_v4();
        config.vision.iteration_id = Uuid::new_v4();
        config.vision.direction = Some(ModelConfig {
            project_id: Uuid::new_v4(),
            iteration_id: Uuid::new_v4(),
        });
        config
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.batch_size, 5);
        assert_eq!(config.window_timeout, Duration::from_secs(15));
        assert_eq!(config.read_delay, Duration::from_secs(1));
        assert_eq!(config.direction_mode, DirectionMode::Separate);
        assert_eq!(config.sink.kind, SinkKind::Jsonl);
    }

    #[test]
    fn test_validate() {
        assert!(runnable().validate().is_ok());

        let mut config = runnable();
        config.batch_size = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = runnable();
        config.vision.direction = None;
        assert!(config.validate().is_err());
        config.direction_mode = DirectionMode::Combined;
        assert!(config.validate().is_ok());

        let mut config = runnable();
        config.sink.kind = SinkKind::Http;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_oversized_timeout() {
        let mut config = runnable();
        config.window_timeout = MAX_WINDOW_TIMEOUT;
        assert!(config.validate().is_ok());

        config.window_timeout = MAX_WINDOW_TIMEOUT + Duration::from_secs(1);
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        config.window_timeout = Duration::from_secs(u64::MAX);
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"watch_folder": "/cam", "window_timeout": 20}"#).unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.watch_folder, PathBuf::from("/cam"));
        assert_eq!(config.window_timeout, Duration::from_secs(20));
        assert_eq!(config.batch_size, 5);
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");
        let config = runnable();
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.watch_folder, config.watch_folder);
        assert_eq!(loaded.vision.project_id, config.vision.project_id);
    }
}
