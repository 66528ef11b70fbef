use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;
use tracing::warn;

use crate::watcher::WatchSettings;

/// Name of the configuration file picked up from the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "inbox-relay.toml";

/// Configuration loaded from `inbox-relay.toml` (or `--config`).
///
/// Every field has a default, so an empty file (or no file) is valid.
#[derive(Debug, Clone, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct RelayConfig {
    pub paths: PathsConfig,
    pub watch: WatchConfig,
    pub processor: ProcessorConfig,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct PathsConfig {
    /// Folder scanned for new files (non-recursive).
    pub watch_dir: PathBuf,
    /// Named pipe the consumer listens on.
    pub channel: PathBuf,
    pub transcripts_dir: PathBuf,
    pub artifacts_dir: PathBuf,
    /// Text prepended to the transcript before it is handed to `followup`.
    pub prompt_file: Option<PathBuf>,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            watch_dir: PathBuf::from("data/inbox"),
            channel: PathBuf::from("/tmp/inbox_relay_pipe"),
            transcripts_dir: PathBuf::from("data/transcripts"),
            artifacts_dir: PathBuf::from("data/artifacts"),
            prompt_file: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct WatchConfig {
    pub poll_interval_ms: u64,
    pub backoff_multiplier: u32,
    pub stability_interval_ms: u64,
    pub stability_samples: u32,
    /// Wake up early on filesystem events instead of sleeping the full cadence.
    pub fs_events: bool,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 2000,
            backoff_multiplier: 5,
            stability_interval_ms: 1000,
            stability_samples: 5,
            fs_events: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct ProcessorConfig {
    /// argv for the transcription step; `{file}` is replaced by the ready file.
    pub command: Vec<String>,
    /// Optional argv for the second step; `{input}` is replaced by the prompt
    /// file contents followed by the transcript.
    pub followup: Option<Vec<String>>,
    pub event_name: String,
    pub artifact_suffix: String,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            command: vec![
                "llm".to_string(),
                "Transcribe this audio file verbatim.".to_string(),
                "-a".to_string(),
                "{file}".to_string(),
            ],
            followup: None,
            event_name: "created".to_string(),
            artifact_suffix: "_output".to_string(),
        }
    }
}

impl RelayConfig {
    /// Load configuration.
    ///
    /// With an explicit `path` the file must exist and parse. Without one,
    /// `inbox-relay.toml` in `cwd` is used if present; a broken implicit file
    /// produces a warning and the defaults.
    pub fn load(path: Option<&Path>, cwd: &Path) -> anyhow::Result<Self> {
        if let Some(path) = path {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read config {}", path.display()))?;
            return toml::from_str(&contents)
                .with_context(|| format!("failed to parse config {}", path.display()));
        }

        let config_path = cwd.join(DEFAULT_CONFIG_FILE);
        if !config_path.exists() {
            return Ok(Self::default());
        }

        match std::fs::read_to_string(&config_path) {
            Ok(contents) => match toml::from_str::<Self>(&contents) {
                Ok(config) => Ok(config),
                Err(err) => {
                    warn!("failed to parse {DEFAULT_CONFIG_FILE}: {err}. Using defaults.");
                    Ok(Self::default())
                }
            },
            Err(err) => {
                warn!("failed to read {DEFAULT_CONFIG_FILE}: {err}. Using defaults.");
                Ok(Self::default())
            }
        }
    }

    pub fn watch_settings(&self) -> WatchSettings {
        WatchSettings {
            poll_interval: Duration::from_millis(self.watch.poll_interval_ms),
            backoff_multiplier: self.watch.backoff_multiplier,
            stability_interval: Duration::from_millis(self.watch.stability_interval_ms),
            stability_samples: self.watch.stability_samples,
            event_name: self.processor.event_name.clone(),
        }
    }

    /// Contents of the prompt file, if one is configured. A configured but
    /// unreadable prompt file is an error.
    pub fn read_prompt(&self) -> anyhow::Result<Option<String>> {
        self.paths
            .prompt_file
            .as_deref()
            .map(|path| {
                std::fs::read_to_string(path)
                    .with_context(|| format!("prompt file missing: {}", path.display()))
            })
            .transpose()
    }
}
