//! Composition root for the `longform` binary.
//!
//! Wires configuration, the inference client and terminal output around a
//! [`Pipeline`]: read input → segment → dispatch → merge → write.

use crate::api::{Credential, InferenceClient, ModelSelector, ScriptedClient};
use crate::cli::RunOptions;
use crate::config::Config;
use crate::error::{LongformError, Result};
use crate::output::{
    ChunkJson, ReportJson, TerminalProgress, format_chunk_listing, print_partial_warning,
};
use crate::pipeline::{OutputKind, Pipeline, PipelineReport, ProgressObserver};
use crate::segment::{AudioClip, TextSegmenter};
use owo_colors::OwoColorize;
use std::io::Read;
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Load configuration from `custom_path` or the default location, then apply
/// environment overrides.
///
/// A missing file at the default location means defaults; a missing file at
/// an explicit path is an error.
pub fn load_config(custom_path: Option<&Path>) -> Result<Config> {
    let config = match custom_path {
        Some(path) => Config::load(path)?,
        None => Config::load_or_default(&Config::default_path()?)?,
    }
    .with_env_overrides();
    config.validate()?;
    Ok(config)
}

/// Fold command-line overrides into the loaded configuration and validate
/// the result, including any overrides already applied by the caller.
pub fn apply_run_options(config: &mut Config, run: &RunOptions) -> Result<()> {
    if let Some(model) = &run.model {
        config.api.model = model.clone();
    }
    if let Some(concurrency) = run.concurrency {
        config.scheduler.concurrency = concurrency;
    }
    if run.gap_markers {
        config.merge.gap_markers = true;
    }
    config.validate()
}

/// Build a pipeline whose client produces `expected` output.
///
/// With `dry_run` the built-in echo client stands in for the API and no
/// credential is needed.
pub fn build_pipeline(config: &Config, expected: OutputKind, dry_run: bool) -> Result<Pipeline> {
    let model = ModelSelector::new(config.api.model.clone());

    let (client, credential): (Arc<dyn InferenceClient>, Credential) = if dry_run {
        info!("Dry run: echoing chunks instead of calling the API");
        (
            Arc::new(ScriptedClient::new(expected)),
            Credential::new("dry-run"),
        )
    } else {
        let credential = Credential::from_env(&config.api.credential_env).ok_or_else(|| {
            LongformError::CredentialMissing {
                var: config.api.credential_env.clone(),
            }
        })?;
        (http_client(config, expected)?, credential)
    };

    Ok(Pipeline::new(
        client,
        model,
        credential,
        config.pipeline_config(),
    ))
}

fn http_client(config: &Config, expected: OutputKind) -> Result<Arc<dyn InferenceClient>> {
    let endpoint = config.api.endpoint.as_deref().ok_or_else(|| {
        LongformError::Other(
            "no API endpoint configured; set api.endpoint or LONGFORM_ENDPOINT".to_string(),
        )
    })?;
    let client = crate::api::http::HttpClient::new(endpoint, expected, config.request_timeout())?;
    Ok(Arc::new(client))
}

/// Read an input file, or stdin for `-`.
pub fn read_input(input: &str) -> Result<Vec<u8>> {
    if input == "-" {
        let mut bytes = Vec::new();
        std::io::stdin().read_to_end(&mut bytes)?;
        return Ok(bytes);
    }
    Ok(std::fs::read(input)?)
}

fn read_text(input: &str) -> Result<String> {
    String::from_utf8(read_input(input)?)
        .map_err(|e| LongformError::Other(format!("{input} is not valid UTF-8: {e}")))
}

/// Token cancelled on the first Ctrl-C.
fn cancel_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\n{}", "Interrupted, stopping…".yellow());
            trigger.cancel();
        }
    });
    token
}

fn progress_for(quiet: bool) -> Option<Arc<TerminalProgress>> {
    (!quiet).then(|| Arc::new(TerminalProgress::new()))
}

fn as_observer(progress: &Option<Arc<TerminalProgress>>) -> Option<Arc<dyn ProgressObserver>> {
    progress
        .as_ref()
        .map(|p| p.clone() as Arc<dyn ProgressObserver>)
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String> {
    serde_json::to_string_pretty(value)
        .map_err(|e| LongformError::Other(format!("failed to encode JSON: {e}")))
}

fn print_text_report(report: &PipelineReport, json: bool, quiet: bool) -> Result<()> {
    if json {
        println!("{}", to_json(&ReportJson::new(report, None))?);
    } else {
        println!("{}", report.text().unwrap_or_default());
    }
    if !quiet {
        print_partial_warning(report);
    }
    Ok(())
}

/// Transcribe a WAV file.
pub async fn run_transcribe(
    mut config: Config,
    input: &str,
    max_chunk_secs: Option<u32>,
    run: &RunOptions,
    quiet: bool,
) -> Result<()> {
    if let Some(secs) = max_chunk_secs {
        config.segment.max_audio_secs = secs;
    }
    apply_run_options(&mut config, run)?;

    let clip = AudioClip::from_wav_bytes(&read_input(input)?)?;
    debug!(
        "Loaded {:.1}s of audio at {} Hz",
        clip.duration_secs(),
        clip.sample_rate
    );

    let pipeline = build_pipeline(&config, OutputKind::Text, run.dry_run)?;
    let progress = progress_for(quiet);
    let result = pipeline
        .transcribe_audio(&clip, cancel_on_ctrl_c(), as_observer(&progress))
        .await;
    if let Some(progress) = &progress {
        progress.finish();
    }

    print_text_report(&result?, run.json, quiet)
}

/// Run text through a text-to-text model.
pub async fn run_process(
    mut config: Config,
    input: &str,
    max_chars: Option<usize>,
    run: &RunOptions,
    quiet: bool,
) -> Result<()> {
    if let Some(max_chars) = max_chars {
        config.segment.max_chars = max_chars;
    }
    apply_run_options(&mut config, run)?;

    let text = read_text(input)?;
    let pipeline = build_pipeline(&config, OutputKind::Text, run.dry_run)?;
    let progress = progress_for(quiet);
    let result = pipeline
        .process_text(&text, cancel_on_ctrl_c(), as_observer(&progress))
        .await;
    if let Some(progress) = &progress {
        progress.finish();
    }

    print_text_report(&result?, run.json, quiet)
}

/// Synthesize speech for a text file and write the audio to `output`.
pub async fn run_synthesize(
    mut config: Config,
    input: &str,
    output: &Path,
    max_chars: Option<usize>,
    run: &RunOptions,
    quiet: bool,
) -> Result<()> {
    if let Some(max_chars) = max_chars {
        config.segment.max_chars = max_chars;
    }
    apply_run_options(&mut config, run)?;

    let text = read_text(input)?;
    let pipeline = build_pipeline(&config, OutputKind::Audio, run.dry_run)?;
    let progress = progress_for(quiet);
    let result = pipeline
        .synthesize_text(&text, cancel_on_ctrl_c(), as_observer(&progress))
        .await;
    if let Some(progress) = &progress {
        progress.finish();
    }
    let report = result?;

    let audio = report.audio().unwrap_or_default();
    std::fs::write(output, audio)?;

    if run.json {
        let path = output.display().to_string();
        println!("{}", to_json(&ReportJson::new(&report, Some(path)))?);
    } else if !quiet {
        eprintln!(
            "{} Wrote {} bytes to {}",
            "✓".green(),
            audio.len(),
            output.display()
        );
    }
    if !quiet {
        print_partial_warning(&report);
    }
    Ok(())
}

/// Print how a text would be split, without calling the API.
pub fn run_split(mut config: Config, input: &str, max_chars: Option<usize>, json: bool) -> Result<()> {
    if let Some(max_chars) = max_chars {
        config.segment.max_chars = max_chars;
    }
    let text = read_text(input)?;
    let chunks = TextSegmenter::new(config.segment.max_chars)?.segment(&text)?;

    if json {
        let listing: Vec<ChunkJson> = chunks.iter().map(ChunkJson::from).collect();
        println!("{}", to_json(&listing)?);
    } else {
        print!("{}", format_chunk_listing(&chunks));
        eprintln!(
            "{}",
            format!(
                "{} chunk(s), at most {} chars each",
                chunks.len(),
                config.segment.max_chars
            )
            .dimmed()
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn run_options_override_config() {
        let mut config = Config::default();
        let run = RunOptions {
            model: Some("large".to_string()),
            concurrency: Some(9),
            gap_markers: true,
            ..RunOptions::default()
        };

        apply_run_options(&mut config, &run).unwrap();

        assert_eq!(config.api.model, "large");
        assert_eq!(config.scheduler.concurrency, 9);
        assert!(config.merge.gap_markers);
    }

    #[test]
    fn zero_concurrency_override_is_rejected() {
        let mut config = Config::default();
        let run = RunOptions {
            concurrency: Some(0),
            ..RunOptions::default()
        };
        assert!(matches!(
            apply_run_options(&mut config, &run),
            Err(LongformError::ConfigInvalidValue { .. })
        ));
    }

    #[tokio::test]
    async fn zero_max_chunk_is_rejected_before_reading_input() {
        let run = RunOptions {
            dry_run: true,
            ..RunOptions::default()
        };
        let result =
            run_transcribe(Config::default(), "/nonexistent/talk.wav", Some(0), &run, true).await;
        assert!(matches!(
            result,
            Err(LongformError::ConfigInvalidValue { key, .. }) if key == "segment.max_audio_secs"
        ));
    }

    #[tokio::test]
    async fn zero_max_chars_is_rejected_before_reading_input() {
        let run = RunOptions {
            dry_run: true,
            ..RunOptions::default()
        };
        let result =
            run_process(Config::default(), "/nonexistent/notes.txt", Some(0), &run, true).await;
        assert!(matches!(
            result,
            Err(LongformError::ConfigInvalidValue { key, .. }) if key == "segment.max_chars"
        ));
    }

    #[test]
    fn dry_run_pipeline_needs_no_credential() {
        let mut config = Config::default();
        config.api.credential_env = "LONGFORM_TEST_CREDENTIAL_THAT_IS_NEVER_SET".to_string();
        assert!(build_pipeline(&config, OutputKind::Text, true).is_ok());
    }

    #[test]
    fn missing_credential_is_reported() {
        let mut config = Config::default();
        config.api.credential_env = "LONGFORM_TEST_CREDENTIAL_THAT_IS_NEVER_SET".to_string();
        let result = build_pipeline(&config, OutputKind::Text, false);
        assert!(matches!(
            result,
            Err(LongformError::CredentialMissing { var }) if var == "LONGFORM_TEST_CREDENTIAL_THAT_IS_NEVER_SET"
        ));
    }

    #[test]
    fn read_input_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"hello file").unwrap();
        let bytes = read_input(file.path().to_str().unwrap()).unwrap();
        assert_eq!(bytes, b"hello file");
    }

    #[test]
    fn read_text_rejects_invalid_utf8() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(&[0xff, 0xfe, 0x00]).unwrap();
        let result = read_text(file.path().to_str().unwrap());
        assert!(matches!(result, Err(LongformError::Other(_))));
    }

    #[test]
    fn explicit_missing_config_is_an_error() {
        let result = load_config(Some(Path::new("/nonexistent/longform/config.toml")));
        assert!(matches!(
            result,
            Err(LongformError::ConfigFileNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn synthesize_dry_run_writes_audio() {
        let mut input = NamedTempFile::new().unwrap();
        input
            .write_all(b"First sentence here. Second sentence here.")
            .unwrap();
        let output = NamedTempFile::new().unwrap();
        let run = RunOptions {
            dry_run: true,
            ..RunOptions::default()
        };

        run_synthesize(
            Config::default(),
            input.path().to_str().unwrap(),
            output.path(),
            Some(25),
            &run,
            true,
        )
        .await
        .unwrap();

        // Echoed chunks are trimmed, so only whitespace can differ.
        let written = String::from_utf8(std::fs::read(output.path()).unwrap()).unwrap();
        let squash = |s: &str| s.split_whitespace().collect::<String>();
        assert_eq!(
            squash(&written),
            squash("First sentence here. Second sentence here.")
        );
    }
}
