use std::path::Path;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread;
use std::time::Duration;

use notify::RecursiveMode;
use notify_debouncer_mini::{new_debouncer, DebounceEventResult, Debouncer};
use tracing::{debug, warn};

/// Decides how the loop waits between ticks.
///
/// A pacer may return early but never changes what a tick does: the directory
/// diff stays the only source of new work.
pub trait Pacer {
    /// Wait for at most `interval`.
    fn pause(&mut self, interval: Duration);

    /// Called after the monitored directory comes back so event sources can
    /// re-attach to the new inode.
    fn rearm(&mut self, _dir: &Path) {}
}

/// Plain sleep on the fixed cadence.
#[derive(Debug, Default, Clone, Copy)]
pub struct SleepPacer;

impl Pacer for SleepPacer {
    fn pause(&mut self, interval: Duration) {
        thread::sleep(interval);
    }
}

/// Debounce window for filesystem events used as wake-up hints.
const EVENT_DEBOUNCE: Duration = Duration::from_millis(250);

/// Sleeps on the cadence but wakes as soon as the OS reports activity in the
/// monitored directory.
pub struct EventPacer {
    /// Keep alive: dropping the debouncer stops the OS watcher.
    debouncer: Option<Debouncer<notify::RecommendedWatcher>>,
    tx: Sender<DebounceEventResult>,
    rx: Receiver<DebounceEventResult>,
}

impl EventPacer {
    /// Watch `dir` non-recursively. If the OS watcher cannot be set up the
    /// pacer degrades to a plain sleep and says so once.
    pub fn new(dir: &Path) -> Self {
        let (tx, rx) = mpsc::channel();
        let mut pacer = Self {
            debouncer: None,
            tx,
            rx,
        };
        pacer.attach(dir);
        pacer
    }

    pub fn is_attached(&self) -> bool {
        self.debouncer.is_some()
    }

    fn attach(&mut self, dir: &Path) {
        self.debouncer = None;
        let tx = self.tx.clone();
        let debouncer = new_debouncer(EVENT_DEBOUNCE, move |res| {
            let _ = tx.send(res);
        })
        .and_then(|mut debouncer| {
            debouncer
                .watcher()
                .watch(dir, RecursiveMode::NonRecursive)
                .map(|()| debouncer)
        });

        match debouncer {
            Ok(d) => self.debouncer = Some(d),
            Err(err) => warn!(
                dir = %dir.display(),
                error = %err,
                "filesystem events unavailable; falling back to polling only"
            ),
        }
    }
}

impl Pacer for EventPacer {
    fn pause(&mut self, interval: Duration) {
        // `tx` is held by the pacer itself, so the channel never disconnects
        // and a detached pacer simply times out.
        match self.rx.recv_timeout(interval) {
            Ok(Ok(events)) => debug!(count = events.len(), "woken by filesystem events"),
            Ok(Err(err)) => debug!(error = %err, "filesystem watcher error"),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => {}
        }
        // One tick handles everything that piled up.
        while self.rx.try_recv().is_ok() {}
    }

    fn rearm(&mut self, dir: &Path) {
        self.attach(dir);
    }
}
