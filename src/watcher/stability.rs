use std::fs;
use std::path::Path;
use std::thread;
use std::time::Duration;

use tracing::debug;

/// Source of size samples for the stability check.
pub trait SizeSampler {
    /// Current byte size of `path`, or `None` if it does not exist right now.
    fn size(&mut self, path: &Path) -> Option<u64>;
}

/// Reads sizes from the filesystem, following symlinks.
#[derive(Debug, Default, Clone, Copy)]
pub struct FsSampler;

impl SizeSampler for FsSampler {
    fn size(&mut self, path: &Path) -> Option<u64> {
        fs::metadata(path).ok().map(|m| m.len())
    }
}

/// Outcome of a finished stability wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Settled {
    /// Size reported by the final run of matching samples.
    pub size: u64,
    /// Total samples taken, including the ones discarded by resets.
    pub samples: usize,
}

/// Blocks until a file stops changing size.
///
/// A file is considered settled once `required` consecutive samples report it
/// present with the same size. A missing sample resets the run. There is no
/// timeout: a file that keeps changing (or never appears) blocks forever.
#[derive(Debug, Clone)]
pub struct StabilityDetector<P = FsSampler> {
    sampler: P,
    interval: Duration,
    required: u32,
}

impl StabilityDetector<FsSampler> {
    pub fn new(interval: Duration, required: u32) -> Self {
        Self::with_sampler(FsSampler, interval, required)
    }
}

impl<P: SizeSampler> StabilityDetector<P> {
    pub fn with_sampler(sampler: P, interval: Duration, required: u32) -> Self {
        Self {
            sampler,
            interval,
            required: required.max(1),
        }
    }

    pub fn required(&self) -> u32 {
        self.required
    }

    /// Returns `true` once `path` is settled. Never returns `false`; the call
    /// simply keeps blocking while the file is unstable.
    pub fn is_stable(&mut self, path: &Path) -> bool {
        self.wait(path);
        true
    }

    /// Sample `path` every `interval` until it has settled.
    pub fn wait(&mut self, path: &Path) -> Settled {
        let mut last: Option<u64> = None;
        let mut run: u32 = 0;
        let mut samples = 0usize;

        loop {
            if samples > 0 {
                thread::sleep(self.interval);
            }
            let current = self.sampler.size(path);
            samples += 1;

            match current {
                None => {
                    // Not synced yet (or briefly replaced); start over.
                    run = 0;
                    last = None;
                }
                Some(size) if last == Some(size) => run += 1,
                Some(size) => {
                    run = 1;
                    last = Some(size);
                }
            }

            debug!(path = %path.display(), ?current, run, "stability sample");

            if run >= self.required {
                if let Some(size) = last {
                    return Settled { size, samples };
                }
            }
        }
    }
}
