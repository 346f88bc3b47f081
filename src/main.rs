use anyhow::{Context, Result};
use clap::{CommandFactory, Parser};
use longform::app::{load_config, run_process, run_split, run_synthesize, run_transcribe};
use longform::cli::{Cli, Commands, ConfigAction};
use longform::config::Config;
use owo_colors::OwoColorize;
use std::path::{Path, PathBuf};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    longform::logging::init(cli.verbose, cli.quiet);

    match cli.command {
        Commands::Transcribe {
            input,
            max_chunk,
            run,
        } => {
            let config = load_config(cli.config.as_deref())?;
            run_transcribe(config, &input, max_chunk, &run, cli.quiet)
                .await
                .with_context(|| format!("transcribing {input}"))?;
        }
        Commands::Process {
            input,
            max_chars,
            run,
        } => {
            let config = load_config(cli.config.as_deref())?;
            run_process(config, &input, max_chars, &run, cli.quiet)
                .await
                .with_context(|| format!("processing {input}"))?;
        }
        Commands::Synthesize {
            input,
            output,
            max_chars,
            run,
        } => {
            let config = load_config(cli.config.as_deref())?;
            run_synthesize(config, &input, &output, max_chars, &run, cli.quiet)
                .await
                .with_context(|| format!("synthesizing {input}"))?;
        }
        Commands::Split {
            input,
            max_chars,
            json,
        } => {
            let config = load_config(cli.config.as_deref())?;
            run_split(config, &input, max_chars, json)?;
        }
        Commands::Config { action } => {
            handle_config_command(action, cli.config.as_deref())?;
        }
        Commands::Completions { shell } => {
            clap_complete::generate(
                shell,
                &mut Cli::command(),
                "longform",
                &mut std::io::stdout(),
            );
        }
    }

    Ok(())
}

fn handle_config_command(action: ConfigAction, custom_path: Option<&Path>) -> Result<()> {
    let config_path = match custom_path {
        Some(path) => PathBuf::from(path),
        None => Config::default_path()?,
    };

    match action {
        ConfigAction::Get { key } => {
            let config = Config::load_or_default(&config_path)?.with_env_overrides();
            println!("{}", config.get(&key)?);
        }
        ConfigAction::Set { key, value } => {
            let mut config = Config::load_or_default(&config_path)?;
            config.set(&key, &value)?;
            config
                .save(&config_path)
                .with_context(|| format!("writing {}", config_path.display()))?;
            println!("Set {} = {}", key, value);
        }
        ConfigAction::List { section } => {
            let config = Config::load_or_default(&config_path)?.with_env_overrides();
            let prefix = section.map(|s| format!("{s}."));
            let mut shown = 0;
            for (key, value) in config.list()? {
                if prefix.as_ref().is_some_and(|p| !key.starts_with(p.as_str())) {
                    continue;
                }
                println!("{} = {}", key.green(), value);
                shown += 1;
            }
            if shown == 0 {
                eprintln!("{}", "No matching configuration keys".yellow());
            }
        }
        ConfigAction::Dump => {
            print!("{}", Config::dump_default()?);
        }
    }

    Ok(())
}
