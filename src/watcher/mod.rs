pub mod availability;
pub mod pacer;
pub mod snapshot;
pub mod stability;

use std::convert::Infallible;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, error, info};

use crate::channel::{NotificationMessage, Notifier};
use crate::error::WatchError;
use crate::processor::Processor;

use availability::{AvailabilityTracker, Transition};
use pacer::Pacer;
use snapshot::{diff, Snapshot};
use stability::StabilityDetector;

/// Tunables for the polling loop.
#[derive(Debug, Clone)]
pub struct WatchSettings {
    /// Cadence between ticks while the directory is reachable.
    pub poll_interval: Duration,
    /// Factor applied to `poll_interval` while the directory is unreachable.
    pub backoff_multiplier: u32,
    pub stability_interval: Duration,
    pub stability_samples: u32,
    /// First word of every notification line.
    pub event_name: String,
}

impl Default for WatchSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            backoff_multiplier: 5,
            stability_interval: Duration::from_secs(1),
            stability_samples: 5,
            event_name: "created".to_string(),
        }
    }
}

/// What happened to one newly-detected file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileOutcome {
    /// Processed and announced with this message.
    Notified(NotificationMessage),
    /// Processed, but the announcement could not be delivered.
    NotifyFailed,
    /// The processor failed; the file is dropped for this run.
    ProcessFailed,
}

/// Stabilise, process, announce. Shared by the loop and one-shot runs.
pub struct Pipeline<P, N> {
    detector: StabilityDetector,
    processor: P,
    notifier: N,
    event_name: String,
}

impl<P: Processor, N: Notifier> Pipeline<P, N> {
    pub fn new(settings: &WatchSettings, processor: P, notifier: N) -> Self {
        Self {
            detector: StabilityDetector::new(
                settings.stability_interval,
                settings.stability_samples,
            ),
            processor,
            notifier,
            event_name: settings.event_name.clone(),
        }
    }

    pub fn processor(&self) -> &P {
        &self.processor
    }

    pub fn notifier(&self) -> &N {
        &self.notifier
    }

    /// Handle one newly-detected file. Blocks for as long as the file keeps
    /// changing, the processor runs, and no reader holds the channel.
    pub fn handle(&mut self, file: &Path) -> FileOutcome {
        info!(file = %file.display(), "processing new file; waiting for it to finish syncing");
        let settled = self.detector.wait(file);
        debug!(
            file = %file.display(),
            size = settled.size,
            samples = settled.samples,
            "file is stable"
        );

        let processed = match self.processor.process(file) {
            Ok(p) => p,
            Err(err) => {
                error!(file = %file.display(), error = %err, "processing failed; file will not be retried");
                return FileOutcome::ProcessFailed;
            }
        };

        // The consumer may run elsewhere; always announce an absolute path.
        let artifact = std::path::absolute(&processed.artifact).unwrap_or(processed.artifact);
        if artifact.as_os_str().as_encoded_bytes().contains(&b'\n') {
            // One notification is exactly one line on the wire.
            error!(artifact = ?artifact, "artifact path contains a newline; not notifying");
            return FileOutcome::NotifyFailed;
        }
        let message = NotificationMessage::new(self.event_name.as_str(), artifact);

        info!(notification = %message, "notifying consumer");
        match self.notifier.notify(&message) {
            Ok(()) => {
                info!("notification sent");
                FileOutcome::Notified(message)
            }
            Err(err) => {
                error!(error = %err, "notification failed");
                FileOutcome::NotifyFailed
            }
        }
    }
}

/// State carried from one tick to the next. Owned by [`WatchLoop`] only.
#[derive(Debug, Clone)]
pub struct WatchState {
    pub last_snapshot: Snapshot,
    pub availability: AvailabilityTracker,
}

/// Result of a single tick.
#[derive(Debug, Clone)]
pub struct TickReport {
    pub transition: Transition,
    /// Newly-detected files in the order they were handled.
    pub dispatched: Vec<(PathBuf, FileOutcome)>,
    /// How long the loop should wait before the next tick.
    pub next_pause: Duration,
}

/// Polling scheduler for one directory.
pub struct WatchLoop<P, N> {
    dir: PathBuf,
    poll_interval: Duration,
    state: WatchState,
    pipeline: Pipeline<P, N>,
}

impl<P: Processor, N: Notifier> WatchLoop<P, N> {
    /// Take the baseline snapshot of `dir`. Files already present are never
    /// dispatched. Fails if the directory cannot be listed right now.
    pub fn start(
        dir: &Path,
        settings: &WatchSettings,
        processor: P,
        notifier: N,
    ) -> Result<Self, WatchError> {
        let dir = std::path::absolute(dir).map_err(|source| WatchError::DirectoryUnavailable {
            path: dir.to_path_buf(),
            source,
        })?;
        let baseline = Snapshot::take(&dir)?;
        debug!(dir = %dir.display(), existing = baseline.len(), "baseline snapshot taken");

        Ok(Self {
            poll_interval: settings.poll_interval,
            state: WatchState {
                last_snapshot: baseline,
                availability: AvailabilityTracker::new(&dir, settings.backoff_multiplier),
            },
            pipeline: Pipeline::new(settings, processor, notifier),
            dir,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn state(&self) -> &WatchState {
        &self.state
    }

    pub fn pipeline(&self) -> &Pipeline<P, N> {
        &self.pipeline
    }

    /// One poll: list, diff, handle every added file, then advance the
    /// snapshot whatever the per-file outcomes were.
    pub fn tick(&mut self) -> TickReport {
        let current = match Snapshot::take(&self.dir) {
            Ok(snapshot) => snapshot,
            Err(err) => {
                let transition = self.state.availability.listing_failed(&err);
                if transition == Transition::Unchanged {
                    debug!(error = %err, "monitored folder still unavailable");
                }
                return self.report(transition, Vec::new());
            }
        };

        if self.state.availability.listing_succeeded() == Transition::Recovered {
            // Whatever is there now counts as already seen.
            debug!(existing = current.len(), "rebasing snapshot after recovery");
            self.state.last_snapshot = current;
            return self.report(Transition::Recovered, Vec::new());
        }

        let added: Vec<PathBuf> = diff(&self.state.last_snapshot, &current)
            .into_iter()
            .map(|entry| entry.path.clone())
            .collect();

        let mut dispatched = Vec::with_capacity(added.len());
        for path in added {
            let outcome = self.pipeline.handle(&path);
            dispatched.push((path, outcome));
        }

        self.state.last_snapshot = current;
        if !dispatched.is_empty() {
            info!("idle, awaiting next file");
        }
        self.report(Transition::Unchanged, dispatched)
    }

    /// Tick once, re-arm the pacer after a recovery, then wait.
    pub fn step(&mut self, pacer: &mut dyn Pacer) -> TickReport {
        let report = self.tick();
        if report.transition == Transition::Recovered {
            pacer.rearm(&self.dir);
        }
        pacer.pause(report.next_pause);
        report
    }

    /// Tick forever. Only process termination stops this.
    pub fn run(mut self, pacer: &mut dyn Pacer) -> Infallible {
        info!(dir = %self.dir.display(), "watching for new files");
        loop {
            self.step(pacer);
        }
    }

    fn report(&self, transition: Transition, dispatched: Vec<(PathBuf, FileOutcome)>) -> TickReport {
        TickReport {
            transition,
            dispatched,
            next_pause: self.state.availability.poll_interval(self.poll_interval),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::fs;
    use std::io::Read;
    use std::thread;

    use crate::channel::FifoChannel;
    use crate::error::{ChannelError, ProcessorError};
    use crate::processor::Processed;

    /// Records every call; fails for file names starting with `bad`.
    #[derive(Default)]
    struct FakeProcessor {
        out: PathBuf,
        calls: RefCell<Vec<(PathBuf, u64)>>,
    }

    impl Processor for FakeProcessor {
        fn process(&self, file: &Path) -> Result<Processed, ProcessorError> {
            let size = fs::metadata(file).map(|m| m.len()).unwrap_or(0);
            self.calls.borrow_mut().push((file.to_path_buf(), size));
            let stem = file.file_stem().unwrap().to_str().unwrap();
            if stem.starts_with("bad") {
                return Err(ProcessorError::Failed {
                    program: "fake".into(),
                    status: "exit status: 1".into(),
                    stderr: "unknown error".into(),
                });
            }
            Ok(Processed {
                transcript: format!("transcript of {stem}"),
                artifact: self.out.join(format!("{stem}_output")),
            })
        }
    }

    #[derive(Default)]
    struct RecordingNotifier {
        sent: RefCell<Vec<NotificationMessage>>,
        fail: bool,
    }

    impl Notifier for RecordingNotifier {
        fn notify(&self, message: &NotificationMessage) -> Result<(), ChannelError> {
            if self.fail {
                return Err(ChannelError::Write {
                    path: PathBuf::from("/tmp/pipe"),
                    source: std::io::Error::from(std::io::ErrorKind::BrokenPipe),
                });
            }
            self.sent.borrow_mut().push(message.clone());
            Ok(())
        }
    }

    fn fast_settings() -> WatchSettings {
        WatchSettings {
            poll_interval: Duration::from_millis(10),
            backoff_multiplier: 5,
            stability_interval: Duration::ZERO,
            stability_samples: 2,
            event_name: "created".to_string(),
        }
    }

    fn start(dir: &Path) -> WatchLoop<FakeProcessor, RecordingNotifier> {
        let processor = FakeProcessor {
            out: PathBuf::from("/out"),
            ..Default::default()
        };
        WatchLoop::start(dir, &fast_settings(), processor, RecordingNotifier::default()).unwrap()
    }

    fn dispatched_names(report: &TickReport) -> Vec<String> {
        let mut names: Vec<String> = report
            .dispatched
            .iter()
            .map(|(p, _)| p.file_name().unwrap().to_str().unwrap().to_string())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn test_start_fails_on_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let result = WatchLoop::start(
            &dir.path().join("missing"),
            &fast_settings(),
            FakeProcessor::default(),
            RecordingNotifier::default(),
        );
        assert!(matches!(result, Err(WatchError::DirectoryUnavailable { .. })));
    }

    #[test]
    fn test_existing_files_are_not_dispatched() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("old.raw"), b"x").unwrap();

        let mut watch = start(dir.path());
        let report = watch.tick();
        assert!(report.dispatched.is_empty());
        assert!(watch.pipeline().processor().calls.borrow().is_empty());
    }

    #[test]
    fn test_each_new_file_is_dispatched_exactly_once() {
        let dir = tempfile::tempdir().unwrap();
        let mut watch = start(dir.path());

        fs::write(dir.path().join("a.raw"), b"aa").unwrap();
        fs::write(dir.path().join("b.raw"), b"bb").unwrap();
        let first = watch.tick();
        assert_eq!(dispatched_names(&first), vec!["a.raw", "b.raw"]);
        assert_eq!(first.next_pause, Duration::from_millis(10));

        fs::write(dir.path().join("c.raw"), b"cc").unwrap();
        let second = watch.tick();
        assert_eq!(dispatched_names(&second), vec!["c.raw"]);

        for _ in 0..3 {
            assert!(watch.tick().dispatched.is_empty());
        }

        let calls = watch.pipeline().processor().calls.borrow();
        assert_eq!(calls.len(), 3);
        let sent = watch.pipeline().notifier().sent.borrow();
        assert_eq!(sent.len(), 3);
        assert!(sent.contains(&NotificationMessage::new("created", "/out/c_output")));
    }

    #[test]
    fn test_hidden_files_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let mut watch = start(dir.path());

        fs::write(dir.path().join(".note.raw.icloud"), b"placeholder").unwrap();
        assert!(watch.tick().dispatched.is_empty());
    }

    #[test]
    fn test_failed_file_is_dropped_not_retried() {
        let dir = tempfile::tempdir().unwrap();
        let mut watch = start(dir.path());

        fs::write(dir.path().join("bad.raw"), b"x").unwrap();
        let report = watch.tick();
        assert_eq!(report.dispatched.len(), 1);
        assert_eq!(report.dispatched[0].1, FileOutcome::ProcessFailed);
        assert!(watch.pipeline().notifier().sent.borrow().is_empty());

        // Still in the directory, never handed out again.
        assert!(watch.tick().dispatched.is_empty());
        assert_eq!(watch.pipeline().processor().calls.borrow().len(), 1);
    }

    #[test]
    fn test_notify_failure_does_not_stop_the_loop() {
        let dir = tempfile::tempdir().unwrap();
        let notifier = RecordingNotifier {
            fail: true,
            ..Default::default()
        };
        let mut watch =
            WatchLoop::start(dir.path(), &fast_settings(), FakeProcessor::default(), notifier)
                .unwrap();

        fs::write(dir.path().join("a.raw"), b"x").unwrap();
        let report = watch.tick();
        assert_eq!(report.dispatched[0].1, FileOutcome::NotifyFailed);

        fs::write(dir.path().join("b.raw"), b"x").unwrap();
        assert_eq!(watch.tick().dispatched.len(), 1);
    }

    #[test]
    fn test_outage_backs_off_and_recovery_does_not_replay() {
        let dir = tempfile::tempdir().unwrap();
        let inbox = dir.path().join("inbox");
        fs::create_dir(&inbox).unwrap();
        fs::write(inbox.join("a.raw"), b"a").unwrap();
        fs::write(inbox.join("b.raw"), b"b").unwrap();
        let mut watch = start(&inbox);

        fs::remove_dir_all(&inbox).unwrap();
        let lost = watch.tick();
        assert_eq!(lost.transition, Transition::Lost);
        assert_eq!(lost.next_pause, Duration::from_millis(50));
        let still = watch.tick();
        assert_eq!(still.transition, Transition::Unchanged);
        assert_eq!(still.next_pause, Duration::from_millis(50));

        fs::create_dir(&inbox).unwrap();
        fs::write(inbox.join("a.raw"), b"a").unwrap();
        fs::write(inbox.join("b.raw"), b"b").unwrap();
        let recovered = watch.tick();
        assert_eq!(recovered.transition, Transition::Recovered);
        assert!(recovered.dispatched.is_empty());
        assert_eq!(recovered.next_pause, Duration::from_millis(10));

        fs::write(inbox.join("c.raw"), b"c").unwrap();
        let report = watch.tick();
        assert_eq!(dispatched_names(&report), vec!["c.raw"]);
        assert_eq!(watch.pipeline().processor().calls.borrow().len(), 1);
    }

    #[test]
    fn test_files_arriving_during_outage_are_treated_as_present() {
        let dir = tempfile::tempdir().unwrap();
        let inbox = dir.path().join("inbox");
        fs::create_dir(&inbox).unwrap();
        let mut watch = start(&inbox);

        fs::remove_dir(&inbox).unwrap();
        watch.tick();
        fs::create_dir(&inbox).unwrap();
        fs::write(inbox.join("during.raw"), b"x").unwrap();

        assert!(watch.tick().dispatched.is_empty());
        assert!(watch.tick().dispatched.is_empty());
        assert!(watch.pipeline().processor().calls.borrow().is_empty());
    }

    #[derive(Default)]
    struct RecordingPacer {
        pauses: Vec<Duration>,
        rearmed: Vec<PathBuf>,
    }

    impl Pacer for RecordingPacer {
        fn pause(&mut self, interval: Duration) {
            self.pauses.push(interval);
        }

        fn rearm(&mut self, dir: &Path) {
            self.rearmed.push(dir.to_path_buf());
        }
    }

    #[test]
    fn test_step_rearms_pacer_only_on_recovery() {
        let dir = tempfile::tempdir().unwrap();
        let inbox = dir.path().join("inbox");
        fs::create_dir(&inbox).unwrap();
        let mut watch = start(&inbox);
        let mut pacer = RecordingPacer::default();

        watch.step(&mut pacer);
        fs::remove_dir(&inbox).unwrap();
        assert_eq!(watch.step(&mut pacer).transition, Transition::Lost);
        watch.step(&mut pacer);
        assert!(pacer.rearmed.is_empty(), "no re-arm while the folder is gone");

        fs::create_dir(&inbox).unwrap();
        assert_eq!(watch.step(&mut pacer).transition, Transition::Recovered);
        watch.step(&mut pacer);

        assert_eq!(pacer.rearmed, vec![inbox.clone()]);
        assert_eq!(
            pacer.pauses,
            vec![
                Duration::from_millis(10),
                Duration::from_millis(50),
                Duration::from_millis(50),
                Duration::from_millis(10),
                Duration::from_millis(10),
            ]
        );
    }

    #[test]
    fn test_artifact_path_with_newline_is_not_announced() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a\nb.raw");
        fs::write(&file, b"x").unwrap();
        let processor = FakeProcessor {
            out: PathBuf::from("/out"),
            ..Default::default()
        };
        let mut pipeline = Pipeline::new(&fast_settings(), processor, RecordingNotifier::default());

        assert_eq!(pipeline.handle(&file), FileOutcome::NotifyFailed);
        assert_eq!(pipeline.processor().calls.borrow().len(), 1);
        assert!(pipeline.notifier().sent.borrow().is_empty());
    }

    #[test]
    fn test_end_to_end_growing_file_is_processed_once_and_announced() {
        let dir = tempfile::tempdir().unwrap();
        let inbox = dir.path().join("inbox");
        let out = dir.path().join("out");
        fs::create_dir(&inbox).unwrap();
        let channel = FifoChannel::ensure(&dir.path().join("relay_pipe")).unwrap();

        let settings = WatchSettings {
            poll_interval: Duration::from_millis(20),
            stability_interval: Duration::from_millis(60),
            stability_samples: 5,
            ..fast_settings()
        };
        let processor = FakeProcessor {
            out: out.clone(),
            ..Default::default()
        };
        let mut watch = WatchLoop::start(&inbox, &settings, processor, channel.clone()).unwrap();

        // Consumer: attaches and reads until the producer closes its end.
        let pipe = channel.path().to_path_buf();
        let consumer = thread::spawn(move || {
            let mut buf = String::new();
            fs::File::open(pipe).unwrap().read_to_string(&mut buf).unwrap();
            buf
        });

        let file = inbox.join("note1.raw");
        fs::write(&file, vec![0u8; 16]).unwrap();
        let grow_path = file.clone();
        let grower = thread::spawn(move || {
            use std::io::Write;
            let mut f = fs::OpenOptions::new().append(true).open(grow_path).unwrap();
            for _ in 0..15 {
                thread::sleep(Duration::from_millis(30));
                f.write_all(&[1u8; 64]).unwrap();
            }
        });

        let report = watch.tick();
        grower.join().unwrap();
        assert_eq!(report.dispatched.len(), 1);

        let calls = watch.pipeline().processor().calls.borrow().clone();
        assert_eq!(calls.len(), 1, "processor must run exactly once");
        assert_eq!(calls[0].0, file);
        assert_eq!(calls[0].1, 16 + 15 * 64, "processed before the file settled");

        let received = consumer.join().unwrap();
        let lines: Vec<&str> = received.lines().collect();
        assert_eq!(lines.len(), 1);
        let expected = format!(
            "^created {}$",
            regex::escape(out.join("note1_output").to_str().unwrap())
        );
        assert!(
            regex::Regex::new(&expected).unwrap().is_match(lines[0]),
            "unexpected line {:?}",
            lines[0]
        );

        assert!(watch.tick().dispatched.is_empty());
        assert_eq!(watch.pipeline().processor().calls.borrow().len(), 1);
    }
}
