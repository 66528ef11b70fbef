use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{info, warn};

use crate::error::WatchError;

/// Reachability of the monitored directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Availability {
    Available,
    Unavailable,
}

/// What a listing result did to the tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Same state as before; nothing reported.
    Unchanged,
    /// The directory just went away. A warning was emitted.
    Lost,
    /// The directory just came back. A recovery notice was emitted and the
    /// caller must rebase its snapshot on the current contents.
    Recovered,
}

/// Two-state machine that reports each availability change exactly once and
/// stretches the poll interval while the directory is gone.
#[derive(Debug, Clone)]
pub struct AvailabilityTracker {
    dir: PathBuf,
    state: Availability,
    backoff_multiplier: u32,
}

impl AvailabilityTracker {
    /// Starts `Available`: the initial listing has already succeeded by the time
    /// a tracker is built.
    pub fn new(dir: &Path, backoff_multiplier: u32) -> Self {
        Self {
            dir: dir.to_path_buf(),
            state: Availability::Available,
            backoff_multiplier: backoff_multiplier.max(1),
        }
    }

    pub fn state(&self) -> Availability {
        self.state
    }

    pub fn is_available(&self) -> bool {
        self.state == Availability::Available
    }

    /// Record a failed listing.
    pub fn listing_failed(&mut self, err: &WatchError) -> Transition {
        match self.state {
            Availability::Available => {
                warn!(
                    dir = %self.dir.display(),
                    error = %err,
                    "monitored folder is no longer available; will keep retrying"
                );
                self.state = Availability::Unavailable;
                Transition::Lost
            }
            Availability::Unavailable => Transition::Unchanged,
        }
    }

    /// Record a successful listing.
    pub fn listing_succeeded(&mut self) -> Transition {
        match self.state {
            Availability::Unavailable => {
                info!(dir = %self.dir.display(), "monitored folder is available again");
                self.state = Availability::Available;
                Transition::Recovered
            }
            Availability::Available => Transition::Unchanged,
        }
    }

    /// Sleep to use before the next tick given the current state.
    pub fn poll_interval(&self, base: Duration) -> Duration {
        match self.state {
            Availability::Available => base,
            Availability::Unavailable => base.saturating_mul(self.backoff_multiplier),
        }
    }
}
