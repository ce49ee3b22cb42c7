use anyhow::{Context, Result, bail};
use callvox::app::{SimulationOptions, run_simulation};
use callvox::cli::{Cli, Commands, ConfigAction};
use callvox::config::Config;
use clap::{CommandFactory, Parser};
use owo_colors::OwoColorize;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.quiet, cli.verbose);

    match cli.command {
        Commands::Simulate {
            scenario,
            language,
            quiet_period,
        } => {
            let config = load_config(cli.config.as_deref())?;
            let latency = run_simulation(
                config,
                SimulationOptions {
                    scenario,
                    language,
                    quiet_period,
                    quiet: cli.quiet,
                },
            )
            .await?;
            if !cli.quiet
                && let Some(summary) = latency.format_summary()
            {
                println!();
                print!("{}", summary);
            }
        }
        Commands::Config { action } => {
            handle_config_command(action, cli.config.as_deref())?;
        }
        Commands::Completions { shell } => {
            clap_complete::generate(
                shell,
                &mut Cli::command(),
                "callvox",
                &mut std::io::stdout(),
            );
        }
    }

    Ok(())
}

/// Install the tracing subscriber. `RUST_LOG` wins over the verbosity flags.
fn init_logging(quiet: bool, verbose: u8) {
    let default_level = match (quiet, verbose) {
        (true, _) => "callvox=error",
        (false, 0) => "callvox=info",
        (false, 1) => "callvox=debug",
        (false, _) => "callvox=trace",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Load configuration from file or use defaults.
///
/// Priority order:
/// 1. Custom config path from CLI (--config)
/// 2. Default config path (~/.config/callvox/config.toml)
/// 3. Built-in defaults with environment variable overrides
fn load_config(custom_path: Option<&Path>) -> Result<Config> {
    let config = match custom_path {
        Some(path) => Config::load(path)?,
        None => match Config::default_path() {
            Some(path) => Config::load_or_default(&path)?,
            None => Config::default(),
        },
    };

    let config = config.with_env_overrides();
    config.validate()?;
    Ok(config)
}

fn config_path(custom_path: Option<&Path>) -> Result<PathBuf> {
    custom_path
        .map(Path::to_path_buf)
        .or_else(Config::default_path)
        .context("Could not determine a configuration directory")
}

/// Handle configuration commands.
fn handle_config_command(action: ConfigAction, custom_path: Option<&Path>) -> Result<()> {
    match action {
        ConfigAction::Show => {
            let config = load_config(custom_path)?;
            print!("{}", config.to_toml()?);
        }
        ConfigAction::Path => {
            println!("{}", config_path(custom_path)?.display());
        }
        ConfigAction::Init { force } => {
            let path = config_path(custom_path)?;
            if path.exists() && !force {
                bail!(
                    "Config file already exists at {} (use --force to overwrite)",
                    path.display()
                );
            }
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
            std::fs::write(&path, Config::default().to_toml()?)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            println!("{}", format!("Wrote {}", path.display()).green());
        }
    }
    Ok(())
}
