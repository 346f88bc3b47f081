//! Terminal rendering for the `longform` binary: live progress and final
//! reports.

use crate::pipeline::{
    Chunk, ChunkError, ChunkFailure, OutputKind, Payload, PipelineReport, ProgressObserver, Span,
};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use owo_colors::OwoColorize;
use serde::Serialize;
use std::time::Duration;

const BAR_TEMPLATE: &str = "{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} chunks {msg}";

/// Progress bar on stderr driven by pipeline events.
pub struct TerminalProgress {
    bar: ProgressBar,
}

impl TerminalProgress {
    pub fn new() -> Self {
        let bar = ProgressBar::with_draw_target(Some(0), ProgressDrawTarget::stderr());
        let style = ProgressStyle::with_template(BAR_TEMPLATE)
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-");
        bar.set_style(style);
        bar.enable_steady_tick(Duration::from_millis(120));
        Self { bar }
    }

    /// Remove the bar once the run is over.
    pub fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl Default for TerminalProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressObserver for TerminalProgress {
    fn chunking_started(&self, total_chunks: usize) {
        self.bar.set_length(total_chunks as u64);
        self.bar.set_message("");
    }

    fn chunk_completed(&self, index: usize, summary: &str) {
        self.bar
            .println(format!("{} chunk {}: {}", "✓".green(), index, summary.dimmed()));
    }

    fn chunk_failed(&self, index: usize, error: &ChunkError, will_retry: bool) {
        if error.is_cancelled() {
            return;
        }
        if will_retry {
            self.bar.println(format!(
                "{} chunk {} failed, retrying: {}",
                "↻".yellow(),
                index,
                error
            ));
        } else {
            self.bar
                .println(format!("{} chunk {} failed: {}", "✗".red(), index, error));
        }
    }

    fn progress_updated(&self, completed: usize, _total: usize) {
        self.bar.set_position(completed as u64);
    }

    fn merging_started(&self) {
        self.bar.set_message("merging");
    }

    fn rate_limit_waiting(&self, remaining: Duration) {
        let secs = Duration::from_secs(remaining.as_secs().max(1));
        self.bar.set_message(format!(
            "{}",
            format!("rate limited, waiting {}", humantime::format_duration(secs)).yellow()
        ));
    }

    fn rate_limit_resolved(&self) {
        self.bar.set_message("");
    }
}

/// One failed chunk in a JSON report.
#[derive(Debug, Serialize, PartialEq)]
pub struct FailureJson {
    pub index: usize,
    pub attempts: u32,
    pub error: String,
}

impl From<&ChunkFailure> for FailureJson {
    fn from(failure: &ChunkFailure) -> Self {
        Self {
            index: failure.index,
            attempts: failure.attempts,
            error: failure.error.to_string(),
        }
    }
}

/// Machine-readable summary of a pipeline run.
#[derive(Debug, Serialize, PartialEq)]
pub struct ReportJson {
    pub kind: OutputKind,
    pub total_chunks: usize,
    pub partial: bool,
    pub failed_chunks: Vec<usize>,
    pub failures: Vec<FailureJson>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_bytes: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_path: Option<String>,
}

impl ReportJson {
    pub fn new(report: &PipelineReport, output_path: Option<String>) -> Self {
        Self {
            kind: report.output.kind(),
            total_chunks: report.total_chunks,
            partial: report.is_partial(),
            failed_chunks: report.failed_indices(),
            failures: report.failures.iter().map(FailureJson::from).collect(),
            text: report.text().map(str::to_string),
            audio_bytes: report.audio().map(<[u8]>::len),
            output_path,
        }
    }
}

/// One chunk in `split` output.
#[derive(Debug, Serialize, PartialEq)]
pub struct ChunkJson {
    pub index: usize,
    pub span: Span,
    pub chars: usize,
    pub text: String,
}

impl From<&Chunk> for ChunkJson {
    fn from(chunk: &Chunk) -> Self {
        let text = match &chunk.payload {
            Payload::Text(text) => text.clone(),
            Payload::Audio(bytes) => format!("<{} bytes of audio>", bytes.len()),
        };
        Self {
            index: chunk.index,
            span: chunk.span,
            chars: chunk.payload.size(),
            text,
        }
    }
}

/// Warn on stderr about chunks missing from a partial result.
pub fn print_partial_warning(report: &PipelineReport) {
    if !report.is_partial() {
        return;
    }
    eprintln!(
        "{}",
        format!(
            "Warning: {} of {} chunks failed {:?}; output covers the rest",
            report.failures.len(),
            report.total_chunks,
            report.failed_indices()
        )
        .yellow()
    );
    for failure in &report.failures {
        eprintln!("  {} {}", "✗".red(), failure);
    }
}

/// Human-readable listing of chunks for `split`.
pub fn format_chunk_listing(chunks: &[Chunk]) -> String {
    let mut out = String::new();
    for chunk in chunks {
        let preview: String = match &chunk.payload {
            Payload::Text(text) => text.chars().take(60).collect(),
            Payload::Audio(bytes) => format!("<{} bytes>", bytes.len()),
        };
        out.push_str(&format!(
            "#{:<3} {:>7}..{:<7} {:>6} chars  {}\n",
            chunk.index,
            chunk.span.start,
            chunk.span.end,
            chunk.payload.size(),
            preview.replace('\n', " ")
        ));
    }
    out
}
