//! Progress reporting.
//!
//! Workers push [`ProgressEvent`]s into an unbounded channel; a single
//! dispatcher task drains it and calls the [`ProgressObserver`], so the
//! observer sees every callback from one task, in send order, regardless of
//! how many workers are running.

use crate::pipeline::error::ChunkError;
use crate::pipeline::rate_limit::RateLimitEvent;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::debug;

/// Receives pipeline progress. Every method defaults to a no-op.
pub trait ProgressObserver: Send + Sync {
    fn chunking_started(&self, _total_chunks: usize) {}
    fn chunk_started(&self, _index: usize) {}
    fn chunk_completed(&self, _index: usize, _summary: &str) {}
    fn chunk_failed(&self, _index: usize, _error: &ChunkError, _will_retry: bool) {}
    fn progress_updated(&self, _completed: usize, _total: usize) {}
    fn merging_started(&self) {}
    fn rate_limit_waiting(&self, _remaining: Duration) {}
    fn rate_limit_resolved(&self) {}
}

/// Observer that ignores everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl ProgressObserver for NoopObserver {}

/// A progress notification.
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    ChunkingStarted { total: usize },
    ChunkStarted { index: usize },
    ChunkCompleted { index: usize, summary: String },
    ChunkFailed {
        index: usize,
        error: ChunkError,
        will_retry: bool,
    },
    ProgressUpdated { completed: usize, total: usize },
    MergingStarted,
    RateLimitWaiting { remaining: Duration },
    RateLimitResolved,
}

impl ProgressEvent {
    fn deliver(&self, observer: &dyn ProgressObserver) {
        match self {
            ProgressEvent::ChunkingStarted { total } => observer.chunking_started(*total),
            ProgressEvent::ChunkStarted { index } => observer.chunk_started(*index),
            ProgressEvent::ChunkCompleted { index, summary } => {
                observer.chunk_completed(*index, summary)
            }
            ProgressEvent::ChunkFailed {
                index,
                error,
                will_retry,
            } => observer.chunk_failed(*index, error, *will_retry),
            ProgressEvent::ProgressUpdated { completed, total } => {
                observer.progress_updated(*completed, *total)
            }
            ProgressEvent::MergingStarted => observer.merging_started(),
            ProgressEvent::RateLimitWaiting { remaining } => observer.rate_limit_waiting(*remaining),
            ProgressEvent::RateLimitResolved => observer.rate_limit_resolved(),
        }
    }
}

impl From<RateLimitEvent> for ProgressEvent {
    fn from(event: RateLimitEvent) -> Self {
        match event {
            RateLimitEvent::Waiting { remaining } => ProgressEvent::RateLimitWaiting { remaining },
            RateLimitEvent::Resolved => ProgressEvent::RateLimitResolved,
        }
    }
}

/// Cheap, cloneable handle used by workers to emit events.
#[derive(Debug, Clone)]
pub struct ProgressSender {
    tx: Option<mpsc::UnboundedSender<ProgressEvent>>,
}

impl ProgressSender {
    /// Sender that drops every event.
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    pub fn send(&self, event: ProgressEvent) {
        if let Some(tx) = &self.tx
            && tx.send(event).is_err()
        {
            debug!("Progress dispatcher gone, dropping event");
        }
    }
}

/// Task that delivers events to an observer.
pub struct ProgressDispatcher {
    handle: JoinHandle<()>,
}

impl ProgressDispatcher {
    /// Spawn a dispatcher for `observer`, also forwarding rate-limit notices
    /// from `rate_limit_events` when given.
    pub fn spawn(
        observer: Arc<dyn ProgressObserver>,
        rate_limit_events: Option<broadcast::Receiver<RateLimitEvent>>,
    ) -> (ProgressSender, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(run_dispatcher(observer, rx, rate_limit_events));
        (ProgressSender { tx: Some(tx) }, Self { handle })
    }

    /// Wait until every event sent before all senders were dropped has been
    /// delivered.
    pub async fn finish(self) {
        if let Err(e) = self.handle.await {
            debug!("Progress dispatcher ended abnormally: {}", e);
        }
    }
}

async fn run_dispatcher(
    observer: Arc<dyn ProgressObserver>,
    mut events: mpsc::UnboundedReceiver<ProgressEvent>,
    mut rate_limit_events: Option<broadcast::Receiver<RateLimitEvent>>,
) {
    loop {
        tokio::select! {
            biased;
            event = events.recv() => match event {
                Some(event) => event.deliver(observer.as_ref()),
                None => {
                    drain_rate_limit(&mut rate_limit_events, observer.as_ref());
                    break;
                }
            },
            notice = recv_rate_limit(&mut rate_limit_events) => match notice {
                Ok(notice) => ProgressEvent::from(notice).deliver(observer.as_ref()),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!("Dropped {} rate limit notices", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => rate_limit_events = None,
            },
        }
    }
}

fn drain_rate_limit(
    rx: &mut Option<broadcast::Receiver<RateLimitEvent>>,
    observer: &dyn ProgressObserver,
) {
    let Some(rx) = rx else {
        return;
    };
    loop {
        match rx.try_recv() {
            Ok(notice) => ProgressEvent::from(notice).deliver(observer),
            Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
            Err(_) => break,
        }
    }
}

async fn recv_rate_limit(
    rx: &mut Option<broadcast::Receiver<RateLimitEvent>>,
) -> Result<RateLimitEvent, broadcast::error::RecvError> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

/// Observer that records every event, for tests and polling callers.
#[derive(Debug, Default)]
pub struct CollectingObserver {
    events: Mutex<Vec<ProgressEvent>>,
}

impl CollectingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    fn push(&self, event: ProgressEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

impl ProgressObserver for CollectingObserver {
    fn chunking_started(&self, total: usize) {
        self.push(ProgressEvent::ChunkingStarted { total });
    }

    fn chunk_started(&self, index: usize) {
        self.push(ProgressEvent::ChunkStarted { index });
    }

    fn chunk_completed(&self, index: usize, summary: &str) {
        self.push(ProgressEvent::ChunkCompleted {
            index,
            summary: summary.to_string(),
        });
    }

    fn chunk_failed(&self, index: usize, error: &ChunkError, will_retry: bool) {
        self.push(ProgressEvent::ChunkFailed {
            index,
            error: error.clone(),
            will_retry,
        });
    }

    fn progress_updated(&self, completed: usize, total: usize) {
        self.push(ProgressEvent::ProgressUpdated { completed, total });
    }

    fn merging_started(&self) {
        self.push(ProgressEvent::MergingStarted);
    }

    fn rate_limit_waiting(&self, remaining: Duration) {
        self.push(ProgressEvent::RateLimitWaiting { remaining });
    }

    fn rate_limit_resolved(&self) {
        self.push(ProgressEvent::RateLimitResolved);
    }
}
