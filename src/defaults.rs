//! Default configuration constants for longform.
//!
//! Shared between the config types and the pipeline so both agree on the
//! same tuning values.

use std::time::Duration;

/// Maximum characters per text chunk.
pub const MAX_CHUNK_CHARS: usize = 5000;

/// Maximum audio chunk duration in seconds.
///
/// Most hosted transcription endpoints cap uploads around 25MB; ten minutes
/// of 16kHz mono PCM stays well under that.
pub const MAX_AUDIO_SECS: u32 = 600;

/// How far back from an audio window's end to search for a quiet cut point.
pub const SEARCH_WINDOW_SECS: u32 = 10;

/// Frame length used when measuring energy for audio cut points.
pub const SILENCE_FRAME_MS: u32 = 30;

/// Number of chunk requests allowed in flight at once.
pub const CONCURRENCY: usize = 4;

/// Attempts per chunk before giving up.
pub const MAX_ATTEMPTS: u32 = 5;

/// Base delay for transient-error backoff (doubled per attempt).
pub const BASE_DELAY_MS: u64 = 1500;

/// Added on top of a server-provided retry-after hint.
pub const RETRY_AFTER_BUFFER_MS: u64 = 2000;

/// First rate-limit pause when the server gives no hint.
pub const RATE_LIMIT_BACKOFF_BASE_MS: u64 = 30_000;

/// Upper bound on a hint-less rate-limit pause.
pub const RATE_LIMIT_BACKOFF_CAP_MS: u64 = 120_000;

/// Longest pause honored for a server retry hint.
pub const MAX_RETRY_AFTER_MS: u64 = 3_600_000;

/// Largest word overlap searched for when merging adjacent transcripts.
pub const OVERLAP_WINDOW_WORDS: usize = 15;

/// Smallest word overlap treated as a duplicate.
pub const MIN_OVERLAP_WORDS: usize = 3;

/// Default model selector sent to the inference API.
pub const DEFAULT_MODEL: &str = "whisper-1";

/// Environment variable holding the API credential.
pub const CREDENTIAL_ENV: &str = "LONGFORM_API_KEY";

/// Per-request deadline in seconds.
pub const REQUEST_TIMEOUT_SECS: u64 = 120;

/// Convenience for the millisecond constants above.
pub const fn millis(ms: u64) -> Duration {
    Duration::from_millis(ms)
}
