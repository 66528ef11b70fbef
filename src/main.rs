mod cli;

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use cli::{Cli, Commands, CommonArgs};
use inbox_relay::config::RelayConfig;
use inbox_relay::output::print_message;
use inbox_relay::processor::{CommandProcessor, DirectorySink};
use inbox_relay::watcher::pacer::{EventPacer, Pacer, SleepPacer};
use inbox_relay::watcher::{FileOutcome, Pipeline, WatchLoop};
use inbox_relay::FifoChannel;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.command.common().verbose);

    match cli.command {
        Commands::Watch {
            common,
            dir,
            poll_ms,
            events,
        } => {
            let mut config = load_config(&common)?;
            if let Some(dir) = dir {
                config.paths.watch_dir = dir;
            }
            if let Some(ms) = poll_ms {
                config.watch.poll_interval_ms = ms;
            }
            if events {
                config.watch.fs_events = true;
            }
            watch(config).await
        }
        Commands::Process { file, common } => {
            let config = load_config(&common)?;
            process_one(config, file).await
        }
        Commands::Listen { common, json } => {
            let config = load_config(&common)?;
            listen(config, json).await
        }
    }
}

/// Logs go to stderr; stdout is reserved for `listen` output.
fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn load_config(common: &CommonArgs) -> Result<RelayConfig> {
    let cwd = std::env::current_dir().context("cannot determine working directory")?;
    let mut config = RelayConfig::load(common.config.as_deref(), &cwd)?;
    if let Some(channel) = &common.channel {
        config.paths.channel = channel.clone();
    }
    Ok(config)
}

fn open_channel(config: &RelayConfig) -> Result<FifoChannel> {
    FifoChannel::ensure(&config.paths.channel).context("cannot set up the notification pipe")
}

fn build_processor(config: &RelayConfig) -> Result<CommandProcessor> {
    let prompt = config.read_prompt()?;
    let transcripts = DirectorySink::new(config.paths.transcripts_dir.clone(), ".txt");
    let artifacts = DirectorySink::new(
        config.paths.artifacts_dir.clone(),
        config.processor.artifact_suffix.clone(),
    );

    let processor = CommandProcessor::new(config.processor.command.clone(), transcripts, artifacts);
    match &config.processor.followup {
        Some(followup) => Ok(processor.with_followup(followup.clone(), prompt)),
        None => {
            if prompt.is_some() {
                warn!("prompt_file is set but no followup command is configured; ignoring it");
            }
            Ok(processor)
        }
    }
}

async fn watch(config: RelayConfig) -> Result<()> {
    let channel = open_channel(&config)?;
    let processor = build_processor(&config)?;
    let settings = config.watch_settings();

    let watch_loop = WatchLoop::start(&config.paths.watch_dir, &settings, processor, channel)
        .with_context(|| {
            format!(
                "monitored folder not found: {}",
                config.paths.watch_dir.display()
            )
        })?;

    let mut pacer: Box<dyn Pacer + Send> = if config.watch.fs_events {
        Box::new(EventPacer::new(watch_loop.dir()))
    } else {
        Box::new(SleepPacer)
    };

    info!("press Ctrl+C to stop");
    let task = tokio::task::spawn_blocking(move || watch_loop.run(pacer.as_mut()));

    tokio::select! {
        joined = task => match joined {
            Ok(never) => match never {},
            Err(err) => Err(err).context("watch loop crashed"),
        },
        signal = tokio::signal::ctrl_c() => {
            // The loop may be parked in a blocking call (stability wait,
            // processor, pipe open); leave without waiting for it. The pipe
            // stays in place for the next run.
            match signal {
                Ok(()) => {
                    info!("stopped by user. Bye!");
                    std::process::exit(0)
                }
                Err(err) => {
                    error!(error = %err, "failed to listen for Ctrl+C");
                    std::process::exit(1)
                }
            }
        }
    }
}

async fn process_one(config: RelayConfig, file: PathBuf) -> Result<()> {
    if !file.is_file() {
        bail!("{} is not a file", file.display());
    }
    let channel = open_channel(&config)?;
    let processor = build_processor(&config)?;
    let mut pipeline = Pipeline::new(&config.watch_settings(), processor, channel);

    let outcome = tokio::task::spawn_blocking(move || pipeline.handle(&file))
        .await
        .context("processing task crashed")?;

    match outcome {
        FileOutcome::Notified(_) => Ok(()),
        FileOutcome::NotifyFailed => bail!("file was processed but the consumer could not be notified"),
        FileOutcome::ProcessFailed => bail!("processing failed"),
    }
}

async fn listen(config: RelayConfig, json: bool) -> Result<()> {
    let channel = open_channel(&config)?;
    info!(pipe = %channel.path().display(), "listening for notifications");

    tokio::task::spawn_blocking(move || -> Result<()> {
        let stdout = std::io::stdout();
        loop {
            // Each writer opens, sends one line and closes; reopen for the next.
            // A closed stdout means nobody is consuming; stop listening.
            channel.receive(|message| print_message(&mut stdout.lock(), &message, json))?;
        }
    })
    .await
    .context("listener crashed")?
}
