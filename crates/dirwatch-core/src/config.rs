/// Watcher configuration.
///
/// Every field has a default, so an empty JSON object (or no file at all)
/// gives the stock behaviour: a 64 KiB read buffer, recursive watching, and
/// unbounded retries five seconds apart.
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default size of the buffer handed to the OS for each read.
pub const DEFAULT_BUFFER_SIZE: usize = 65_536;

/// Smallest buffer we will hand to the OS. inotify needs room for at least
/// one event with a `NAME_MAX` name.
pub const MIN_BUFFER_SIZE: usize = 4_096;

/// Default pause between retries after an unexpected read failure.
pub const DEFAULT_RETRY_DELAY_MS: u64 = 5_000;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// How the watch loop reacts to read failures other than a deliberate stop.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffPolicy {
    /// Pause before re-issuing the wait.
    pub retry_delay_ms: u64,
    /// Consecutive failures tolerated before the loop gives up.
    /// `None` retries forever.
    pub max_attempts: Option<u32>,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            retry_delay_ms: DEFAULT_RETRY_DELAY_MS,
            max_attempts: None,
        }
    }
}

impl BackoffPolicy {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    /// Whether `failures` consecutive failures exhaust the policy.
    pub fn is_exhausted(&self, failures: u32) -> bool {
        matches!(self.max_attempts, Some(max) if failures >= max)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    pub buffer_size: usize,
    pub recursive: bool,
    pub backoff: BackoffPolicy,
    /// File extensions whose changes are never delivered.
    pub excluded_extensions: Vec<String>,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
            recursive: true,
            backoff: BackoffPolicy::default(),
            excluded_extensions: Vec::new(),
        }
    }
}

impl WatchConfig {
    /// Load a JSON config file. Missing fields take their defaults.
    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: WatchConfig =
            serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        Ok(config.validated())
    }

    /// Clamp values the OS would reject.
    pub fn validated(mut self) -> Self {
        if self.buffer_size < MIN_BUFFER_SIZE {
            tracing::debug!(
                "buffer_size {} below minimum, using {}",
                self.buffer_size,
                MIN_BUFFER_SIZE
            );
            self.buffer_size = MIN_BUFFER_SIZE;
        }
        // The Win32 read takes a DWORD-aligned length.
        self.buffer_size -= self.buffer_size % 4;
        self
    }
}
