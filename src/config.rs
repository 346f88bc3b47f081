use crate::defaults;
use crate::error::{LongformError, Result};
use crate::pipeline::{MergeConfig, PipelineConfig, RateLimitConfig, RetryPolicy};
use crate::segment::SilenceSplitterConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub api: ApiConfig,
    pub segment: SegmentConfig,
    pub scheduler: SchedulerConfig,
    pub retry: RetryConfig,
    pub rate_limit: RateLimitSettings,
    pub merge: MergeSettings,
}

/// Inference endpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ApiConfig {
    pub endpoint: Option<String>,
    pub model: String,
    /// Environment variable holding the API credential.
    pub credential_env: String,
    pub request_timeout_secs: u64,
}

/// Chunk size limits
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SegmentConfig {
    pub max_chars: usize,
    pub max_audio_secs: u32,
    pub search_window_secs: u32,
    pub silence_frame_ms: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SchedulerConfig {
    pub concurrency: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
}

/// Shared pause after rate-limit responses
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RateLimitSettings {
    pub retry_after_buffer_ms: u64,
    pub backoff_base_ms: u64,
    pub backoff_cap_ms: u64,
    pub max_retry_after_ms: u64,
}

/// Output reassembly
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MergeSettings {
    pub overlap_window: usize,
    pub min_overlap: usize,
    pub gap_markers: bool,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            model: defaults::DEFAULT_MODEL.to_string(),
            credential_env: defaults::CREDENTIAL_ENV.to_string(),
            request_timeout_secs: defaults::REQUEST_TIMEOUT_SECS,
        }
    }
}

impl Default for SegmentConfig {
    fn default() -> Self {
        Self {
            max_chars: defaults::MAX_CHUNK_CHARS,
            max_audio_secs: defaults::MAX_AUDIO_SECS,
            search_window_secs: defaults::SEARCH_WINDOW_SECS,
            silence_frame_ms: defaults::SILENCE_FRAME_MS,
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            concurrency: defaults::CONCURRENCY,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: defaults::MAX_ATTEMPTS,
            base_delay_ms: defaults::BASE_DELAY_MS,
        }
    }
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            retry_after_buffer_ms: defaults::RETRY_AFTER_BUFFER_MS,
            backoff_base_ms: defaults::RATE_LIMIT_BACKOFF_BASE_MS,
            backoff_cap_ms: defaults::RATE_LIMIT_BACKOFF_CAP_MS,
            max_retry_after_ms: defaults::MAX_RETRY_AFTER_MS,
        }
    }
}

impl Default for MergeSettings {
    fn default() -> Self {
        Self {
            overlap_window: defaults::OVERLAP_WINDOW_WORDS,
            min_overlap: defaults::MIN_OVERLAP_WORDS,
            gap_markers: false,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Returns an error if the file is missing or contains invalid TOML.
    /// Missing fields will use default values.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                LongformError::ConfigFileNotFound {
                    path: path.display().to_string(),
                }
            } else {
                LongformError::Io(e)
            }
        })?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration from a file or return defaults if file doesn't exist
    ///
    /// Only returns defaults if the file is missing.
    /// Returns errors for invalid TOML.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        match Self::load(path) {
            Err(LongformError::ConfigFileNotFound { .. }) => Ok(Self::default()),
            other => other,
        }
    }

    /// Write the configuration as TOML, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, toml::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Apply environment variable overrides
    ///
    /// Supported environment variables:
    /// - LONGFORM_ENDPOINT → api.endpoint
    /// - LONGFORM_MODEL → api.model
    /// - LONGFORM_CONCURRENCY → scheduler.concurrency (ignored unless a
    ///   positive integer)
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(endpoint) = std::env::var("LONGFORM_ENDPOINT")
            && !endpoint.is_empty()
        {
            self.api.endpoint = Some(endpoint);
        }

        if let Ok(model) = std::env::var("LONGFORM_MODEL")
            && !model.is_empty()
        {
            self.api.model = model;
        }

        if let Ok(concurrency) = std::env::var("LONGFORM_CONCURRENCY")
            && let Ok(concurrency) = concurrency.trim().parse::<usize>()
            && concurrency > 0
        {
            self.scheduler.concurrency = concurrency;
        }

        self
    }

    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        let invalid = |key: &str, message: &str| {
            Err(LongformError::ConfigInvalidValue {
                key: key.to_string(),
                message: message.to_string(),
            })
        };

        if self.segment.max_chars == 0 {
            return invalid("segment.max_chars", "must be at least 1");
        }
        if self.segment.max_audio_secs == 0 {
            return invalid("segment.max_audio_secs", "must be at least 1");
        }
        if self.segment.silence_frame_ms == 0 {
            return invalid("segment.silence_frame_ms", "must be at least 1");
        }
        if self.scheduler.concurrency == 0 {
            return invalid("scheduler.concurrency", "must be at least 1");
        }
        if self.retry.max_attempts == 0 {
            return invalid("retry.max_attempts", "must be at least 1");
        }
        if self.rate_limit.backoff_cap_ms < self.rate_limit.backoff_base_ms {
            return invalid(
                "rate_limit.backoff_cap_ms",
                "must not be smaller than rate_limit.backoff_base_ms",
            );
        }
        if self.merge.min_overlap == 0 {
            return invalid("merge.min_overlap", "must be at least 1");
        }
        if self.merge.min_overlap > self.merge.overlap_window {
            return invalid(
                "merge.min_overlap",
                "must not exceed merge.overlap_window",
            );
        }
        if self.api.model.trim().is_empty() {
            return invalid("api.model", "must not be empty");
        }
        Ok(())
    }

    /// Pipeline settings derived from this configuration.
    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            max_chunk_chars: self.segment.max_chars,
            audio: SilenceSplitterConfig {
                max_chunk_secs: self.segment.max_audio_secs,
                search_window_secs: self.segment.search_window_secs,
                frame_ms: self.segment.silence_frame_ms,
            },
            concurrency: self.scheduler.concurrency,
            retry: RetryPolicy {
                max_attempts: self.retry.max_attempts,
                base_delay: defaults::millis(self.retry.base_delay_ms),
            },
            rate_limit: RateLimitConfig {
                retry_after_buffer: defaults::millis(self.rate_limit.retry_after_buffer_ms),
                backoff_base: defaults::millis(self.rate_limit.backoff_base_ms),
                backoff_cap: defaults::millis(self.rate_limit.backoff_cap_ms),
                max_retry_after: defaults::millis(self.rate_limit.max_retry_after_ms),
            },
            merge: MergeConfig {
                overlap_window: self.merge.overlap_window,
                min_overlap: self.merge.min_overlap,
                gap_markers: self.merge.gap_markers,
            },
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.api.request_timeout_secs)
    }

    /// Read a value by dotted key, e.g. `scheduler.concurrency`.
    pub fn get(&self, key: &str) -> Result<String> {
        let root = toml::Value::try_from(self)?;
        let value = lookup(&root, key).ok_or_else(|| unknown_key(key))?;
        Ok(display_value(value))
    }

    /// Set a value by dotted key. `raw` is parsed as a TOML value, falling
    /// back to a plain string.
    pub fn set(&mut self, key: &str, raw: &str) -> Result<()> {
        let mut root = toml::Value::try_from(&*self)?;

        let (section, field) = key.split_once('.').ok_or_else(|| unknown_key(key))?;
        let table = root
            .get_mut(section)
            .and_then(toml::Value::as_table_mut)
            .ok_or_else(|| unknown_key(key))?;
        // Unset optional fields are absent from the serialized table.
        let known = table.contains_key(field) || Self::optional_keys().contains(&key);
        if !known {
            return Err(unknown_key(key));
        }
        table.insert(field.to_string(), parse_value(raw));

        let updated: Config = root
            .try_into()
            .map_err(|e: toml::de::Error| LongformError::ConfigInvalidValue {
                key: key.to_string(),
                message: e.message().to_string(),
            })?;
        updated.validate()?;
        *self = updated;
        Ok(())
    }

    /// Every set key with its value, sorted by section then field.
    pub fn list(&self) -> Result<Vec<(String, String)>> {
        let root = toml::Value::try_from(self)?;
        let mut entries = Vec::new();
        if let toml::Value::Table(sections) = root {
            for (section, values) in sections {
                if let toml::Value::Table(values) = values {
                    for (field, value) in values {
                        entries.push((format!("{section}.{field}"), display_value(&value)));
                    }
                }
            }
        }
        Ok(entries)
    }

    /// Default configuration as a TOML document.
    pub fn dump_default() -> Result<String> {
        Ok(toml::to_string_pretty(&Config::default())?)
    }

    fn optional_keys() -> &'static [&'static str] {
        &["api.endpoint"]
    }

    /// Get the default configuration file path
    ///
    /// Returns ~/.config/longform/config.toml on Linux
    pub fn default_path() -> Result<PathBuf> {
        dirs::config_dir()
            .map(|dir| dir.join("longform").join("config.toml"))
            .ok_or_else(|| LongformError::Other("could not determine config directory".into()))
    }
}

fn unknown_key(key: &str) -> LongformError {
    LongformError::ConfigUnknownKey {
        key: key.to_string(),
    }
}

fn lookup<'a>(root: &'a toml::Value, key: &str) -> Option<&'a toml::Value> {
    key.split('.').try_fold(root, |value, part| value.get(part))
}

fn display_value(value: &toml::Value) -> String {
    match value {
        toml::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn parse_value(raw: &str) -> toml::Value {
    toml::from_str::<toml::Table>(&format!("v = {raw}"))
        .ok()
        .and_then(|mut table| table.remove("v"))
        .unwrap_or_else(|| toml::Value::String(raw.to_string()))
}
