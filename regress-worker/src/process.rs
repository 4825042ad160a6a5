//! External process execution
//!
//! Every external tool (git, the HOL build, Holmake) is started through
//! [`CommandRunner`] from an argument vector. Nothing goes through a
//! shell, so directory names and commit ids are never interpolated into a
//! command string.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tracing::debug;

/// Where a command's stdout and stderr go
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Output {
    /// Collected and returned in [`CommandOutcome`]
    Capture,
    /// Both streams written to a file, truncating it first
    Truncate(PathBuf),
    /// Both streams appended to a file
    Append(PathBuf),
}

/// A command to run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub env: Vec<(String, String)>,
    /// File fed to stdin; stdin is closed otherwise
    pub stdin: Option<PathBuf>,
    pub output: Output,
    /// File receiving elapsed time and peak memory
    pub timing: Option<PathBuf>,
}

impl CommandSpec {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            env: Vec::new(),
            stdin: None,
            output: Output::Capture,
            timing: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn stdin_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.stdin = Some(path.into());
        self
    }

    pub fn output(mut self, output: Output) -> Self {
        self.output = output;
        self
    }

    pub fn timing(mut self, path: impl Into<PathBuf>) -> Self {
        self.timing = Some(path.into());
        self
    }

    /// Program file name, for logging
    pub fn name(&self) -> String {
        self.program
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| self.program.display().to_string())
    }
}

/// Result of a finished command
#[derive(Debug, Clone, Default)]
pub struct CommandOutcome {
    pub success: bool,
    pub exit_code: Option<i32>,
    /// Captured stdout, empty unless [`Output::Capture`] was used
    pub stdout: String,
    /// Captured stderr, empty unless [`Output::Capture`] was used
    pub stderr: String,
}

/// Runs external commands to completion
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Runs a command and waits for it to exit
    ///
    /// A command that starts and exits non-zero is an `Ok` outcome with
    /// `success == false`. Only failing to start it at all is an error.
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutcome>;
}

/// Runs commands on the host with `tokio::process`
pub struct SystemRunner {
    time_program: PathBuf,
}

impl SystemRunner {
    /// Creates a runner that measures timed commands with `time_program`
    pub fn new(time_program: impl Into<PathBuf>) -> Self {
        Self {
            time_program: time_program.into(),
        }
    }

    fn build(&self, spec: &CommandSpec) -> Result<tokio::process::Command> {
        let mut command = match &spec.timing {
            Some(timing) => {
                let mut command = tokio::process::Command::new(&self.time_program);
                command
                    .arg("--format")
                    .arg("%es %MKB")
                    .arg("--output")
                    .arg(timing)
                    .arg(&spec.program);
                command
            }
            None => tokio::process::Command::new(&spec.program),
        };

        command.args(&spec.args);

        if let Some(cwd) = &spec.cwd {
            command.current_dir(cwd);
        }
        for (key, value) in &spec.env {
            command.env(key, value);
        }

        match &spec.stdin {
            Some(path) => {
                let file = File::open(path)
                    .with_context(|| format!("Failed to open {} for stdin", path.display()))?;
                command.stdin(Stdio::from(file));
            }
            None => {
                command.stdin(Stdio::null());
            }
        }

        match &spec.output {
            Output::Capture => {
                command.stdout(Stdio::piped()).stderr(Stdio::piped());
            }
            Output::Truncate(path) => {
                let file = File::create(path)
                    .with_context(|| format!("Failed to create {}", path.display()))?;
                redirect(&mut command, file, path)?;
            }
            Output::Append(path) => {
                let file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .with_context(|| format!("Failed to open {}", path.display()))?;
                redirect(&mut command, file, path)?;
            }
        }

        Ok(command)
    }
}

fn redirect(command: &mut tokio::process::Command, file: File, path: &Path) -> Result<()> {
    let stderr = file
        .try_clone()
        .with_context(|| format!("Failed to share {} with stderr", path.display()))?;
    command.stdout(Stdio::from(file)).stderr(Stdio::from(stderr));
    Ok(())
}

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutcome> {
        debug!("Running {} {:?} in {:?}", spec.name(), spec.args, spec.cwd);

        let output = self
            .build(spec)?
            .output()
            .await
            .with_context(|| format!("Failed to execute {}", spec.program.display()))?;

        let outcome = CommandOutcome {
            success: output.status.success(),
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        };

        if !outcome.success {
            debug!(
                "{} exited with {:?}: stderr='{}'",
                spec.name(),
                outcome.exit_code,
                outcome.stderr.trim()
            );
        }

        Ok(outcome)
    }
}
