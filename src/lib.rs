//! Drop-folder relay: detect new files by polling, wait for them to finish
//! syncing, run a processor on each, and signal a consumer process through a
//! named pipe.

pub mod channel;
pub mod config;
pub mod error;
pub mod output;
pub mod processor;
pub mod watcher;

pub use channel::{FifoChannel, NotificationMessage, Notifier};
pub use config::RelayConfig;
pub use error::{ChannelError, ProcessorError, WatchError};
pub use processor::{CommandProcessor, DirectorySink, OutputSink, Processed, Processor};
pub use watcher::{FileOutcome, Pipeline, WatchLoop, WatchSettings};
