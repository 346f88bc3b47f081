//! Shared rate-limit pause for all chunk workers.
//!
//! When any worker is told to slow down, every worker waits out the same
//! pause before its next call instead of each hammering the API on its own
//! schedule.

use crate::defaults;
use crate::pipeline::error::ChunkError;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, trace, warn};

const EVENT_CAPACITY: usize = 64;

/// Timing parameters for [`RateLimitCoordinator`].
#[derive(Debug, Clone, PartialEq)]
pub struct RateLimitConfig {
    /// Added to a server-provided retry hint.
    pub retry_after_buffer: Duration,
    /// Pause after the first hit without a hint; doubles per consecutive hit.
    pub backoff_base: Duration,
    /// Upper bound for the hint-less pause.
    pub backoff_cap: Duration,
    /// Server retry hints longer than this are clamped.
    pub max_retry_after: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            retry_after_buffer: defaults::millis(defaults::RETRY_AFTER_BUFFER_MS),
            backoff_base: defaults::millis(defaults::RATE_LIMIT_BACKOFF_BASE_MS),
            backoff_cap: defaults::millis(defaults::RATE_LIMIT_BACKOFF_CAP_MS),
            max_retry_after: defaults::millis(defaults::MAX_RETRY_AFTER_MS),
        }
    }
}

/// Notice published when callers start or stop waiting on a pause.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitEvent {
    Waiting { remaining: Duration },
    Resolved,
}

#[derive(Debug, Default)]
struct State {
    pause_until: Option<Instant>,
    consecutive_hits: u32,
    /// A waiting notice went out since the last reported hit.
    waiting_notified: bool,
    /// A pause was announced and its resolution has not been published yet.
    pause_announced: bool,
}

/// Process-wide pause shared by every worker of every request.
#[derive(Debug)]
pub struct RateLimitCoordinator {
    config: RateLimitConfig,
    state: Mutex<State>,
    events: broadcast::Sender<RateLimitEvent>,
}

impl Default for RateLimitCoordinator {
    fn default() -> Self {
        Self::new(RateLimitConfig::default())
    }
}

impl RateLimitCoordinator {
    pub fn new(config: RateLimitConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            config,
            state: Mutex::new(State::default()),
            events,
        }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Receive waiting/resolved notices.
    pub fn subscribe(&self) -> broadcast::Receiver<RateLimitEvent> {
        self.events.subscribe()
    }

    /// End of the current pause, if one was ever set.
    pub fn pause_until(&self) -> Option<Instant> {
        self.lock().pause_until
    }

    pub fn consecutive_hits(&self) -> u32 {
        self.lock().consecutive_hits
    }

    pub fn is_paused(&self) -> bool {
        self.lock()
            .pause_until
            .is_some_and(|until| until > Instant::now())
    }

    /// Pause length for the `hits`-th consecutive hit.
    pub fn delay_for(&self, hits: u32, retry_after: Option<Duration>) -> Duration {
        match retry_after {
            Some(hint) => hint
                .min(self.config.max_retry_after)
                .saturating_add(self.config.retry_after_buffer),
            None => {
                let factor = 2u32.saturating_pow(hits.saturating_sub(1));
                self.config
                    .backoff_base
                    .saturating_mul(factor)
                    .min(self.config.backoff_cap)
            }
        }
    }

    /// Record a rate-limit signal and extend the pause. Returns the delay
    /// computed for this hit.
    pub fn report_rate_limited(&self, retry_after: Option<Duration>) -> Duration {
        let mut state = self.lock();
        state.consecutive_hits = state.consecutive_hits.saturating_add(1);
        let delay = self.delay_for(state.consecutive_hits, retry_after);

        let now = Instant::now();
        let candidate = now.checked_add(delay).unwrap_or_else(|| far_future(now));
        if state.pause_until.is_none_or(|until| candidate > until) {
            state.pause_until = Some(candidate);
        }
        state.waiting_notified = false;

        warn!(
            "Rate limited (hit {}), pausing all requests for {}",
            state.consecutive_hits,
            humantime::format_duration(delay)
        );
        delay
    }

    /// Reset the consecutive-hit counter. The pause deadline is left alone.
    pub fn report_success(&self) {
        self.lock().consecutive_hits = 0;
    }

    /// Suspend until any active pause has passed.
    ///
    /// Returns [`ChunkError::Cancelled`] if `cancel` fires first.
    pub async fn wait_if_needed(&self, cancel: &CancellationToken) -> Result<(), ChunkError> {
        loop {
            let deadline = {
                let mut state = self.lock();
                let now = Instant::now();
                match state.pause_until {
                    Some(until) if until > now => {
                        if !state.waiting_notified {
                            state.waiting_notified = true;
                            state.pause_announced = true;
                            let remaining = until - now;
                            info!(
                                "Waiting {} for rate limit to clear",
                                humantime::format_duration(remaining)
                            );
                            self.publish(RateLimitEvent::Waiting { remaining });
                        }
                        until
                    }
                    _ => {
                        if state.pause_announced {
                            state.pause_announced = false;
                            info!("Rate limit pause over, resuming");
                            self.publish(RateLimitEvent::Resolved);
                        }
                        return Ok(());
                    }
                }
            };

            // The pause may be extended while sleeping, so re-check after.
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(ChunkError::Cancelled),
                _ = tokio::time::sleep_until(deadline) => {}
            }
        }
    }

    fn publish(&self, event: RateLimitEvent) {
        if let Err(unheard) = self.events.send(event) {
            trace!("No subscribers for {:?}", unheard.0);
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Deadline used when `now + delay` does not fit in an `Instant`.
fn far_future(now: Instant) -> Instant {
    const THIRTY_YEARS: Duration = Duration::from_secs(86_400 * 365 * 30);
    now.checked_add(THIRTY_YEARS).unwrap_or(now)
}
