//! Command-line interface for longform
//!
//! Provides argument parsing using clap derive macros.

use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

/// Run long text and audio through size-limited inference APIs
#[derive(Parser, Debug)]
#[command(
    name = "longform",
    version,
    about = "Run long text and audio through size-limited inference APIs"
)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Path to configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Suppress progress output (quiet mode)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Verbose logging (-v: info, -vv: debug, -vvv: trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

/// Settings shared by every command that calls the API.
#[derive(Args, Debug, Clone, Default, PartialEq)]
pub struct RunOptions {
    /// Model name passed to the API (overrides api.model)
    #[arg(long, value_name = "MODEL")]
    pub model: Option<String>,

    /// Chunks processed at once (overrides scheduler.concurrency)
    #[arg(long, short = 'j', value_name = "N")]
    pub concurrency: Option<usize>,

    /// Insert "[chunk K failed]" where a chunk could not be processed
    #[arg(long)]
    pub gap_markers: bool,

    /// Print a JSON report instead of plain output
    #[arg(long)]
    pub json: bool,

    /// Use the built-in echo client instead of calling the API
    #[arg(long)]
    pub dry_run: bool,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Transcribe a WAV file
    Transcribe {
        /// WAV file to transcribe ("-" reads stdin)
        #[arg(value_name = "WAV")]
        input: String,

        /// Longest audio chunk, e.g. 600, 10m (overrides segment.max_audio_secs)
        #[arg(long, value_name = "DURATION", value_parser = parse_secs)]
        max_chunk: Option<u32>,

        #[command(flatten)]
        run: RunOptions,
    },

    /// Run text through a text-to-text model chunk by chunk
    Process {
        /// Text file ("-" reads stdin)
        #[arg(value_name = "TEXT")]
        input: String,

        /// Longest text chunk in characters (overrides segment.max_chars)
        #[arg(long, value_name = "CHARS")]
        max_chars: Option<usize>,

        #[command(flatten)]
        run: RunOptions,
    },

    /// Synthesize speech for a text file
    Synthesize {
        /// Text file ("-" reads stdin)
        #[arg(value_name = "TEXT")]
        input: String,

        /// Where to write the audio
        #[arg(long, short = 'o', value_name = "PATH")]
        output: PathBuf,

        /// Longest text chunk in characters (overrides segment.max_chars)
        #[arg(long, value_name = "CHARS")]
        max_chars: Option<usize>,

        #[command(flatten)]
        run: RunOptions,
    },

    /// Show how text would be split, without calling the API
    Split {
        /// Text file ("-" reads stdin)
        #[arg(value_name = "TEXT")]
        input: String,

        /// Longest text chunk in characters (overrides segment.max_chars)
        #[arg(long, value_name = "CHARS")]
        max_chars: Option<usize>,

        /// Print chunks as JSON
        #[arg(long)]
        json: bool,
    },

    /// View and modify configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: Shell,
    },
}

/// Configuration management actions
#[derive(Subcommand, Debug, PartialEq)]
pub enum ConfigAction {
    /// Get a configuration value by key (e.g., scheduler.concurrency)
    Get {
        /// Dotted key path (e.g., api.model, merge.gap_markers)
        key: String,
    },
    /// Set a configuration value by key
    Set {
        /// Dotted key path (e.g., api.model, merge.gap_markers)
        key: String,
        /// Value to set
        value: String,
    },
    /// List current configuration values (optionally one section)
    List {
        /// Config section to show (e.g., api, retry)
        section: Option<String>,
    },
    /// Print the default configuration
    Dump,
}

/// Parse a duration string into whole seconds.
///
/// Accepts bare numbers (seconds) and anything `humantime` understands
/// (`90s`, `10m`, `1h`).
fn parse_secs(s: &str) -> Result<u32, String> {
    let s = s.trim();
    let secs = match s.parse::<u64>() {
        Ok(secs) => secs,
        Err(_) => humantime::parse_duration(s)
            .map(|d| d.as_secs())
            .map_err(|e| e.to_string())?,
    };
    if secs == 0 {
        return Err("duration must be at least one second".to_string());
    }
    u32::try_from(secs).map_err(|_| format!("{secs}s is too long"))
}
