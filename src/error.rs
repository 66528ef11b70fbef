use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Failures of the directory side of the watcher.
#[derive(Debug, Error)]
pub enum WatchError {
    /// The monitored directory could not be listed (missing, permission denied,
    /// or removed while it was being read).
    #[error("directory {path} is unavailable: {source}")]
    DirectoryUnavailable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Failures of the FIFO notification channel.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// Something other than a FIFO already lives at the channel path.
    #[error("{0} exists and is not a FIFO; remove it and restart")]
    NotAFifo(PathBuf),

    #[error("could not create pipe {path}: {source}")]
    Create {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to write to pipe {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The consumer side could not take a received message.
    #[error("could not deliver received notification: {0}")]
    Deliver(#[source] io::Error),

    #[error("failed to read from pipe {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Failures reported by a [`crate::processor::Processor`].
#[derive(Debug, Error)]
pub enum ProcessorError {
    #[error("could not start `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    /// The external command exited non-zero. `stderr` is already trimmed.
    #[error("`{program}` failed ({status}): {stderr}")]
    Failed {
        program: String,
        status: String,
        stderr: String,
    },

    /// The command succeeded but printed nothing.
    #[error("`{program}` produced no output")]
    EmptyOutput { program: String },

    #[error("processor command is empty")]
    EmptyCommand,

    #[error("{0} has no usable file name")]
    NoFileStem(PathBuf),

    #[error("could not write {path}: {source}")]
    Persist {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}
