//! One-way handoff to a consumer process through a named pipe.
//!
//! The producer writes one line per notification:
//!
//! ```text
//! <event-name> <absolute-path>\n
//! ```
//!
//! Opening a FIFO for writing blocks until some process holds the read end, so
//! [`FifoChannel::send`] blocks indefinitely while no consumer is listening.
//! That is the backpressure contract between the two sides. The pipe itself is
//! never removed by either side.

use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::os::unix::fs::FileTypeExt;
use std::path::{Path, PathBuf};

use nix::sys::stat::Mode;
use serde::Serialize;
use tracing::{debug, info};

use crate::error::ChannelError;

/// A single `<event> <path>` line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotificationMessage {
    pub event: String,
    pub path: PathBuf,
}

impl NotificationMessage {
    pub fn new(event: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            event: event.into(),
            path: path.into(),
        }
    }

    /// The exact bytes written to the pipe, trailing newline included.
    pub fn to_line(&self) -> String {
        format!("{self}\n")
    }

    /// Parse one received line. The event name ends at the first space; the
    /// rest of the line (which may itself contain spaces) is the path.
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.strip_suffix('\n').unwrap_or(line);
        let line = line.strip_suffix('\r').unwrap_or(line);
        let (event, path) = line.split_once(' ')?;
        if event.is_empty() || path.is_empty() {
            return None;
        }
        Some(Self::new(event, path))
    }
}

impl fmt::Display for NotificationMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.event, self.path.display())
    }
}

/// Anything that can deliver a notification to the consumer.
pub trait Notifier {
    /// Deliver `message`. May block; must not retry.
    fn notify(&self, message: &NotificationMessage) -> Result<(), ChannelError>;
}

/// A named pipe on the local filesystem.
#[derive(Debug, Clone)]
pub struct FifoChannel {
    path: PathBuf,
}

impl FifoChannel {
    /// Make sure a FIFO exists at `path`.
    ///
    /// An existing FIFO is reused as-is. A missing path is created with mode
    /// 0o600. Anything else at that path is an error.
    pub fn ensure(path: &Path) -> Result<Self, ChannelError> {
        match fs::symlink_metadata(path) {
            Ok(meta) if meta.file_type().is_fifo() => {
                debug!(pipe = %path.display(), "reusing existing pipe");
            }
            Ok(_) => return Err(ChannelError::NotAFifo(path.to_path_buf())),
            Err(err) if err.kind() == io::ErrorKind::NotFound => match mkfifo(path) {
                Ok(()) => info!(pipe = %path.display(), "created pipe for the consumer"),
                // The other side won the race to create it.
                Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                    return Self::ensure(path);
                }
                Err(source) => {
                    return Err(ChannelError::Create {
                        path: path.to_path_buf(),
                        source,
                    });
                }
            },
            Err(source) => {
                return Err(ChannelError::Create {
                    path: path.to_path_buf(),
                    source,
                });
            }
        }

        Ok(Self {
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Open, write one line, flush, close. Blocks until a reader is attached.
    pub fn send(&self, message: &NotificationMessage) -> Result<(), ChannelError> {
        let write_err = |source| ChannelError::Write {
            path: self.path.clone(),
            source,
        };

        debug!(pipe = %self.path.display(), "opening pipe for writing");
        let mut fifo = OpenOptions::new()
            .write(true)
            .open(&self.path)
            .map_err(write_err)?;
        fifo.write_all(message.to_line().as_bytes())
            .map_err(write_err)?;
        fifo.flush().map_err(write_err)?;
        Ok(())
    }

    /// Block until a writer connects, then hand every complete message to
    /// `on_message` until that writer closes. Lines that do not parse are
    /// skipped. Returns how many messages were delivered; an error from
    /// `on_message` stops reading at once.
    pub fn receive<F>(&self, mut on_message: F) -> Result<usize, ChannelError>
    where
        F: FnMut(NotificationMessage) -> io::Result<()>,
    {
        let read_err = |source| ChannelError::Read {
            path: self.path.clone(),
            source,
        };

        let fifo = OpenOptions::new()
            .read(true)
            .open(&self.path)
            .map_err(read_err)?;
        let mut delivered = 0;
        for line in BufReader::new(fifo).lines() {
            let line = line.map_err(read_err)?;
            match NotificationMessage::parse(&line) {
                Some(message) => {
                    on_message(message).map_err(ChannelError::Deliver)?;
                    delivered += 1;
                }
                None => debug!(line = %line, "ignoring malformed line"),
            }
        }
        Ok(delivered)
    }
}

impl Notifier for FifoChannel {
    fn notify(&self, message: &NotificationMessage) -> Result<(), ChannelError> {
        self.send(message)
    }
}

fn mkfifo(path: &Path) -> io::Result<()> {
    nix::unistd::mkfifo(path, Mode::S_IRUSR | Mode::S_IWUSR).map_err(io::Error::from)
}
