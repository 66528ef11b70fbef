use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// Watch a drop folder, process each new file once it has finished syncing,
/// and wake a waiting consumer through a named pipe.
///
/// inbox-relay polls a directory, waits until a new file's size stops
/// changing, runs the configured processor on it, and writes one
/// `<event> <artifact-path>` line to a FIFO for the consumer process.
#[derive(Parser, Debug)]
#[command(
    name = "inbox-relay",
    version,
    about,
    long_about = None,
    propagate_version = true,
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

/// Options shared by every subcommand.
#[derive(Args, Debug, Clone)]
pub struct CommonArgs {
    /// Configuration file (default: ./inbox-relay.toml if present).
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Named pipe used to signal the consumer.
    #[arg(long)]
    pub channel: Option<PathBuf>,

    /// Enable debug logging (RUST_LOG takes precedence).
    #[arg(short, long)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Watch the monitored folder and relay every new file until interrupted.
    Watch {
        #[command(flatten)]
        common: CommonArgs,

        /// Folder to watch (non-recursive).
        #[arg(short, long)]
        dir: Option<PathBuf>,

        /// Poll cadence in milliseconds.
        #[arg(long)]
        poll_ms: Option<u64>,

        /// Also wake up on filesystem events between polls.
        #[arg(long)]
        events: bool,
    },

    /// Process a single file now and notify the consumer.
    ///
    /// Meant for manually retrying a file that failed while watching; the
    /// watcher itself never retries.
    Process {
        /// File to process.
        file: PathBuf,

        #[command(flatten)]
        common: CommonArgs,
    },

    /// Act as the consumer: print every notification written to the pipe.
    Listen {
        #[command(flatten)]
        common: CommonArgs,

        /// Print each notification as a JSON object.
        #[arg(long)]
        json: bool,
    },
}

impl Commands {
    pub fn common(&self) -> &CommonArgs {
        match self {
            Commands::Watch { common, .. }
            | Commands::Process { common, .. }
            | Commands::Listen { common, .. } => common,
        }
    }
}
