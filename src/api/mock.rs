//! Scripted inference client for tests and dry runs.

use crate::api::{ApiError, Credential, InferenceClient, ModelSelector};
use crate::pipeline::types::{ChunkOutput, OutputKind, Payload};
use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::time::Instant;

/// One scripted reply.
#[derive(Debug, Clone)]
pub enum ScriptedResponse {
    /// Return the payload converted to the client's output kind.
    Echo,
    /// Return a fixed output.
    Output(ChunkOutput),
    /// Fail with the given error.
    Fail(ApiError),
    /// Never complete (until the caller gives up).
    Hang,
}

struct Script {
    needle: String,
    responses: VecDeque<ScriptedResponse>,
}

/// Mock client whose replies are scripted per payload.
///
/// Text payloads containing a script's needle consume that script's
/// responses in order; once exhausted (or with no matching script) the
/// client echoes. Call counts, timestamps and peak concurrency are tracked.
pub struct ScriptedClient {
    kind: OutputKind,
    latency: Duration,
    scripts: Mutex<Vec<Script>>,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    call_log: Mutex<Vec<(Instant, String)>>,
}

impl ScriptedClient {
    pub fn new(kind: OutputKind) -> Self {
        Self {
            kind,
            latency: Duration::ZERO,
            scripts: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
            call_log: Mutex::new(Vec::new()),
        }
    }

    /// Sleep this long inside every call.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Script replies for text payloads containing `needle`.
    pub fn with_script(self, needle: &str, responses: Vec<ScriptedResponse>) -> Self {
        if let Ok(mut scripts) = self.scripts.lock() {
            scripts.push(Script {
                needle: needle.to_string(),
                responses: responses.into(),
            });
        }
        self
    }

    /// Total number of `invoke` calls.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneous `invoke` calls observed.
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    /// When each call started, with the payload label.
    pub fn call_log(&self) -> Vec<(Instant, String)> {
        self.call_log
            .lock()
            .map(|log| log.clone())
            .unwrap_or_default()
    }

    fn next_response(&self, label: &str) -> ScriptedResponse {
        let Ok(mut scripts) = self.scripts.lock() else {
            return ScriptedResponse::Echo;
        };
        scripts
            .iter_mut()
            .find(|s| label.contains(&s.needle) && !s.responses.is_empty())
            .and_then(|s| s.responses.pop_front())
            .unwrap_or(ScriptedResponse::Echo)
    }

    fn echo(&self, payload: &Payload) -> ChunkOutput {
        match (payload, self.kind) {
            (Payload::Text(text), OutputKind::Text) => ChunkOutput::Text(text.clone()),
            (Payload::Text(text), OutputKind::Audio) => ChunkOutput::Audio(text.as_bytes().to_vec()),
            (Payload::Audio(bytes), OutputKind::Text) => {
                ChunkOutput::Text(format!("transcript of {} bytes", bytes.len()))
            }
            (Payload::Audio(bytes), OutputKind::Audio) => ChunkOutput::Audio(bytes.clone()),
        }
    }
}

fn label(payload: &Payload) -> String {
    match payload {
        Payload::Text(text) => text.clone(),
        Payload::Audio(bytes) => format!("<{} bytes>", bytes.len()),
    }
}

struct InFlightGuard<'a>(&'a AtomicUsize);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait::async_trait]
impl InferenceClient for ScriptedClient {
    async fn invoke(
        &self,
        payload: &Payload,
        _model: &ModelSelector,
        _credential: &Credential,
    ) -> Result<ChunkOutput, ApiError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(current, Ordering::SeqCst);
        let _guard = InFlightGuard(&self.in_flight);

        let label = label(payload);
        if let Ok(mut log) = self.call_log.lock() {
            log.push((Instant::now(), label.clone()));
        }

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        match self.next_response(&label) {
            ScriptedResponse::Echo => Ok(self.echo(payload)),
            ScriptedResponse::Output(output) => Ok(output),
            ScriptedResponse::Fail(error) => Err(error),
            ScriptedResponse::Hang => std::future::pending().await,
        }
    }
}
