use std::fs::OpenOptions;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

use motionwatch::config::{default_config_path, AppConfig};
use motionwatch::{Collaborators, Orchestrator, StopSignal};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file (defaults to $HOME/motionwatch.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Append log output to this file instead of stderr
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,

    /// Validate the configuration, print the resolved cameras as JSON and exit
    #[arg(long)]
    check: bool,
}

fn init_logging(args: &Args) -> Result<()> {
    let default_level = if args.verbose { "debug" } else { "info" };
    let mut builder = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level));

    if let Some(path) = &args.log_file {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("Failed to open log file {:?}", path))?;
        builder.target(env_logger::Target::Pipe(Box::new(file)));
    }

    builder.init();
    Ok(())
}

fn resolve_config_path(requested: Option<PathBuf>) -> PathBuf {
    match requested {
        Some(path) if path.is_file() => path,
        Some(path) => {
            let fallback = default_config_path();
            log::warn!("Config file {:?} not found, falling back to {:?}", path, fallback);
            fallback
        }
        None => default_config_path(),
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args)?;

    let config_path = resolve_config_path(args.config.clone());
    log::info!("Loading configuration from {:?}", config_path);
    let config = AppConfig::load(&config_path)
        .with_context(|| format!("Failed to load configuration from {:?}", config_path))?;

    if args.check {
        for err in &config.rejected {
            log::error!("{}", err);
        }
        println!("{}", serde_json::to_string_pretty(&config.cameras)?);
        return Ok(());
    }

    let stop = StopSignal::new();
    {
        let stop = stop.clone();
        if let Err(err) = ctrlc::set_handler(move || {
            log::info!("Interrupt received, stopping");
            stop.trigger();
        }) {
            log::warn!("Failed to install Ctrl+C handler: {}", err);
        }
    }

    let collaborators = Collaborators::ffmpeg(&config.defaults.event_path);
    let orchestrator = Orchestrator::from_config(&config, collaborators);
    log::info!(
        "MotionWatch starting with {} cameras ({} disabled, {} rejected)",
        orchestrator.pipelines_created(),
        orchestrator.skipped().len(),
        config.rejected.len()
    );

    orchestrator.run_until(&stop);
    drop(orchestrator);

    log::info!("MotionWatch stopped");
    Ok(())
}
