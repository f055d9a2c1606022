use crate::defaults;
use crate::error::{Result, VoxscribeError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub audio: AudioConfig,
    pub session: SessionConfig,
    pub output: OutputConfig,
}

/// Chunking and silence-detection configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AudioConfig {
    /// Target chunk duration in milliseconds.
    pub chunk_duration_ms: u32,
    /// Minimum accumulated audio before a silence gap may flush, in milliseconds.
    pub min_chunk_ms: u32,
    /// Silence gap that closes an utterance early, in milliseconds.
    pub silence_flush_ms: u32,
}

/// Session lifecycle configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SessionConfig {
    /// Seconds of inactivity before a speaker stream is evicted.
    pub idle_stream_timeout_secs: u64,
    /// Seconds between idle-stream reaper scans.
    pub reaper_interval_secs: u64,
    /// Capacity of each per-speaker frame channel.
    pub worker_queue_capacity: usize,
}

/// Transcript output configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OutputConfig {
    /// Capacity of the outgoing line queue.
    pub queue_capacity: usize,
    /// Minimum interval between sink posts, in milliseconds.
    pub min_post_interval_ms: u64,
    /// Surface partial hypotheses as live-updating lines.
    pub emit_partials: bool,
    /// Minimum partial length in characters before it is surfaced.
    pub min_partial_chars: usize,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            chunk_duration_ms: defaults::CHUNK_DURATION_MS,
            min_chunk_ms: defaults::MIN_CHUNK_MS,
            silence_flush_ms: defaults::SILENCE_FLUSH_MS,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            idle_stream_timeout_secs: defaults::IDLE_STREAM_TIMEOUT.as_secs(),
            reaper_interval_secs: defaults::REAPER_INTERVAL.as_secs(),
            worker_queue_capacity: defaults::WORKER_QUEUE_CAPACITY,
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            queue_capacity: defaults::OUTPUT_QUEUE_CAPACITY,
            min_post_interval_ms: defaults::MIN_POST_INTERVAL.as_millis() as u64,
            emit_partials: false,
            min_partial_chars: defaults::MIN_PARTIAL_CHARS,
        }
    }
}

impl SessionConfig {
    /// Idle-stream timeout as a duration.
    pub fn idle_stream_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_stream_timeout_secs)
    }

    /// Reaper interval as a duration.
    pub fn reaper_interval(&self) -> Duration {
        Duration::from_secs(self.reaper_interval_secs)
    }
}

impl OutputConfig {
    /// Minimum post interval as a duration.
    pub fn min_post_interval(&self) -> Duration {
        Duration::from_millis(self.min_post_interval_ms)
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Returns an error if the file contains invalid TOML.
    /// Missing fields will use default values.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration from a file or return defaults if file doesn't exist
    ///
    /// Only returns defaults if the file is missing.
    /// Returns errors for invalid TOML.
    pub fn load_or_default(path: &Path) -> anyhow::Result<Self> {
        match Self::load(path) {
            Ok(config) => Ok(config),
            Err(e) => {
                if e.downcast_ref::<std::io::Error>()
                    .map(|io_err| io_err.kind() == std::io::ErrorKind::NotFound)
                    .unwrap_or(false)
                {
                    Ok(Self::default())
                } else {
                    Err(e)
                }
            }
        }
    }

    /// Apply environment variable overrides
    ///
    /// Supported environment variables:
    /// - VOXSCRIBE_CHUNK_DURATION_MS → audio.chunk_duration_ms
    /// - VOXSCRIBE_SILENCE_FLUSH_MS → audio.silence_flush_ms
    /// - VOXSCRIBE_EMIT_PARTIALS → output.emit_partials ("true"/"false")
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(value) = std::env::var("VOXSCRIBE_CHUNK_DURATION_MS")
            && let Ok(ms) = value.parse()
        {
            self.audio.chunk_duration_ms = ms;
        }

        if let Ok(value) = std::env::var("VOXSCRIBE_SILENCE_FLUSH_MS")
            && let Ok(ms) = value.parse()
        {
            self.audio.silence_flush_ms = ms;
        }

        if let Ok(value) = std::env::var("VOXSCRIBE_EMIT_PARTIALS")
            && let Ok(flag) = value.parse()
        {
            self.output.emit_partials = flag;
        }

        self
    }

    /// Check cross-field constraints the pipeline relies on.
    pub fn validate(&self) -> Result<()> {
        if self.audio.chunk_duration_ms == 0 {
            return Err(VoxscribeError::ConfigInvalidValue {
                key: "audio.chunk_duration_ms".to_string(),
                message: "must be positive".to_string(),
            });
        }
        if self.audio.min_chunk_ms > self.audio.chunk_duration_ms {
            return Err(VoxscribeError::ConfigInvalidValue {
                key: "audio.min_chunk_ms".to_string(),
                message: "must not exceed chunk_duration_ms".to_string(),
            });
        }
        if self.output.queue_capacity == 0 {
            return Err(VoxscribeError::ConfigInvalidValue {
                key: "output.queue_capacity".to_string(),
                message: "must be positive".to_string(),
            });
        }
        if self.session.worker_queue_capacity == 0 {
            return Err(VoxscribeError::ConfigInvalidValue {
                key: "session.worker_queue_capacity".to_string(),
                message: "must be positive".to_string(),
            });
        }
        Ok(())
    }

    /// Get the default configuration file path
    ///
    /// Returns ~/.config/voxscribe/config.toml on Linux
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("voxscribe").join("config.toml"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::Mutex;
    use tempfile::NamedTempFile;

    // Mutex to serialize tests that modify environment variables
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    // SAFETY: These helpers are only used in tests with ENV_LOCK held,
    // ensuring no concurrent access to environment variables.
    fn set_env(key: &str, value: &str) {
        unsafe { std::env::set_var(key, value) }
    }

    fn remove_env(key: &str) {
        unsafe { std::env::remove_var(key) }
    }

    fn clear_voxscribe_env() {
        remove_env("VOXSCRIBE_CHUNK_DURATION_MS");
        remove_env("VOXSCRIBE_SILENCE_FLUSH_MS");
        remove_env("VOXSCRIBE_EMIT_PARTIALS");
    }

    #[test]
    fn test_default_config_has_correct_values() {
        let config = Config::default();

        assert_eq!(config.audio.chunk_duration_ms, 300);
        assert_eq!(config.audio.min_chunk_ms, 100);
        assert_eq!(config.audio.silence_flush_ms, 700);

        assert_eq!(config.session.idle_stream_timeout_secs, 30);
        assert_eq!(config.session.reaper_interval_secs, 5);
        assert_eq!(config.session.worker_queue_capacity, 100);

        assert_eq!(config.output.queue_capacity, 64);
        assert_eq!(config.output.min_post_interval_ms, 1000);
        assert!(!config.output.emit_partials);
        assert_eq!(config.output.min_partial_chars, 10);
    }

    #[test]
    fn test_load_from_toml_file() {
        let toml_content = r#"
            [audio]
            chunk_duration_ms = 500
            min_chunk_ms = 150
            silence_flush_ms = 900

            [session]
            idle_stream_timeout_secs = 60
            reaper_interval_secs = 10
            worker_queue_capacity = 50

            [output]
            queue_capacity = 32
            min_post_interval_ms = 2000
            emit_partials = true
            min_partial_chars = 5
        "#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(toml_content.as_bytes()).unwrap();

        let config = Config::load(temp_file.path()).unwrap();

        assert_eq!(config.audio.chunk_duration_ms, 500);
        assert_eq!(config.audio.min_chunk_ms, 150);
        assert_eq!(config.audio.silence_flush_ms, 900);
        assert_eq!(config.session.idle_stream_timeout_secs, 60);
        assert_eq!(config.session.worker_queue_capacity, 50);
        assert_eq!(config.output.queue_capacity, 32);
        assert!(config.output.emit_partials);
        assert_eq!(config.output.min_partial_chars, 5);
    }

    #[test]
    fn test_load_partial_config_uses_defaults() {
        let toml_content = r#"
            [audio]
            silence_flush_ms = 500
        "#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(toml_content.as_bytes()).unwrap();

        let config = Config::load(temp_file.path()).unwrap();

        assert_eq!(config.audio.silence_flush_ms, 500);

        // Everything else should be defaults
        assert_eq!(config.audio.chunk_duration_ms, 300);
        assert_eq!(config.audio.min_chunk_ms, 100);
        assert_eq!(config.output.queue_capacity, 64);
        assert_eq!(config.session.idle_stream_timeout_secs, 30);
    }

    #[test]
    fn test_env_overrides() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_voxscribe_env();

        set_env("VOXSCRIBE_CHUNK_DURATION_MS", "450");
        set_env("VOXSCRIBE_EMIT_PARTIALS", "true");

        let config = Config::default().with_env_overrides();

        assert_eq!(config.audio.chunk_duration_ms, 450);
        assert!(config.output.emit_partials);
        assert_eq!(config.audio.silence_flush_ms, 700); // Not overridden

        clear_voxscribe_env();
    }

    #[test]
    fn test_env_override_unparseable_ignored() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_voxscribe_env();

        set_env("VOXSCRIBE_CHUNK_DURATION_MS", "not-a-number");
        let config = Config::default().with_env_overrides();
        assert_eq!(config.audio.chunk_duration_ms, 300);

        clear_voxscribe_env();
    }

    #[test]
    fn test_invalid_toml_returns_error() {
        let invalid_toml = r#"
            [audio
            chunk_duration_ms = "broken
        "#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(invalid_toml.as_bytes()).unwrap();

        assert!(Config::load(temp_file.path()).is_err());
    }

    #[test]
    fn test_load_or_default_returns_default_for_missing_file() {
        let missing_path = Path::new("/tmp/nonexistent_voxscribe_config_12345.toml");
        let config = Config::load_or_default(missing_path).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_validate_rejects_min_chunk_above_chunk_duration() {
        let mut config = Config::default();
        config.audio.min_chunk_ms = 400;

        match config.validate() {
            Err(VoxscribeError::ConfigInvalidValue { key, .. }) => {
                assert_eq!(key, "audio.min_chunk_ms");
            }
            other => panic!("Expected invalid value error, got {:?}", other),
        }
    }

    #[test]
    fn test_validate_rejects_zero_queue_capacity() {
        let mut config = Config::default();
        config.output.queue_capacity = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_accepts_defaults() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_duration_helpers() {
        let config = Config::default();
        assert_eq!(config.session.idle_stream_timeout(), Duration::from_secs(30));
        assert_eq!(config.session.reaper_interval(), Duration::from_secs(5));
        assert_eq!(config.output.min_post_interval(), Duration::from_millis(1000));
    }
}
