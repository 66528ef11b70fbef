use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::{debug, info};

use crate::error::ProcessorError;

/// Placeholder replaced by the ready file's path in `command`.
pub const FILE_PLACEHOLDER: &str = "{file}";
/// Placeholder replaced by prompt + transcript in `followup`.
pub const INPUT_PLACEHOLDER: &str = "{input}";

/// Result of processing one ready file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Processed {
    pub transcript: String,
    /// Where the artifact was written; this path is what gets announced.
    pub artifact: PathBuf,
}

/// Turns a ready file into an artifact. Synchronous and run to completion.
pub trait Processor {
    fn process(&self, file: &Path) -> Result<Processed, ProcessorError>;
}

/// Persists `(identifier, content)` pairs at a location derived only from the
/// identifier.
pub trait OutputSink {
    fn location(&self, identifier: &str) -> PathBuf;

    fn persist(&self, identifier: &str, content: &str) -> Result<PathBuf, ProcessorError>;
}

/// Writes `<root>/<identifier><suffix>`, creating `root` on demand.
#[derive(Debug, Clone)]
pub struct DirectorySink {
    root: PathBuf,
    suffix: String,
}

impl DirectorySink {
    pub fn new(root: impl Into<PathBuf>, suffix: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            suffix: suffix.into(),
        }
    }
}

impl OutputSink for DirectorySink {
    fn location(&self, identifier: &str) -> PathBuf {
        self.root.join(format!("{identifier}{}", self.suffix))
    }

    fn persist(&self, identifier: &str, content: &str) -> Result<PathBuf, ProcessorError> {
        let path = self.location(identifier);
        let persist_err = |source| ProcessorError::Persist {
            path: path.clone(),
            source,
        };
        fs::create_dir_all(&self.root).map_err(persist_err)?;
        fs::write(&path, content).map_err(persist_err)?;
        Ok(path)
    }
}

/// Runs external commands: one producing the transcript, then optionally a
/// follow-up turning (prompt + transcript) into the final artifact.
#[derive(Debug, Clone)]
pub struct CommandProcessor<T = DirectorySink, A = DirectorySink> {
    command: Vec<String>,
    followup: Option<Vec<String>>,
    prompt: Option<String>,
    transcripts: T,
    artifacts: A,
}

impl<T: OutputSink, A: OutputSink> CommandProcessor<T, A> {
    pub fn new(command: Vec<String>, transcripts: T, artifacts: A) -> Self {
        Self {
            command,
            followup: None,
            prompt: None,
            transcripts,
            artifacts,
        }
    }

    pub fn with_followup(mut self, followup: Vec<String>, prompt: Option<String>) -> Self {
        self.followup = Some(followup);
        self.prompt = prompt;
        self
    }

    fn followup_input(&self, transcript: &str) -> String {
        match &self.prompt {
            Some(prompt) => format!("{prompt}\n\n{transcript}"),
            None => transcript.to_string(),
        }
    }
}

impl<T: OutputSink, A: OutputSink> Processor for CommandProcessor<T, A> {
    fn process(&self, file: &Path) -> Result<Processed, ProcessorError> {
        let stem = file
            .file_stem()
            .and_then(|s| s.to_str())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ProcessorError::NoFileStem(file.to_path_buf()))?;

        info!(file = %file.display(), "transcribing");
        let file_arg = file.to_string_lossy();
        let transcript = run_command(&self.command, FILE_PLACEHOLDER, &file_arg)?;
        let t_path = self.transcripts.persist(stem, &transcript)?;
        info!(transcript = %t_path.display(), "transcript saved");

        let artifact_body = match &self.followup {
            Some(followup) => {
                info!("generating follow-up artifact");
                run_command(followup, INPUT_PLACEHOLDER, &self.followup_input(&transcript))?
            }
            None => transcript.clone(),
        };
        let artifact = self.artifacts.persist(stem, &artifact_body)?;
        info!(artifact = %artifact.display(), "artifact saved");

        Ok(Processed {
            transcript,
            artifact,
        })
    }
}

/// Run `argv` with every occurrence of `placeholder` substituted, returning
/// trimmed stdout on success. Blank stdout counts as a failure.
fn run_command(argv: &[String], placeholder: &str, value: &str) -> Result<String, ProcessorError> {
    let (program, args) = argv.split_first().ok_or(ProcessorError::EmptyCommand)?;
    let args: Vec<String> = args.iter().map(|a| a.replace(placeholder, value)).collect();
    debug!(program = %program, ?args, "running processor command");

    let output = Command::new(program)
        .args(&args)
        .output()
        .map_err(|source| ProcessorError::Spawn {
            program: program.clone(),
            source,
        })?;

    if output.status.success() {
        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if stdout.is_empty() {
            return Err(ProcessorError::EmptyOutput {
                program: program.clone(),
            });
        }
        Ok(stdout)
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        Err(ProcessorError::Failed {
            program: program.clone(),
            status: output.status.to_string(),
            stderr: if stderr.is_empty() {
                "unknown error".to_string()
            } else {
                stderr
            },
        })
    }
}
