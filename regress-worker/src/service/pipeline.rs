//! Build pipeline
//!
//! Builds HOL, then walks the CakeML build sequence one directory at a
//! time, reporting progress to the queue as it goes. The step about to run
//! is written to the resume file first, so a worker that dies mid-step
//! redoes that step in full when the job is resumed.

use anyhow::{Context, Result, bail};
use regress_client::QueueApi;
use regress_core::domain::JobId;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::Config;
use crate::process::{CommandRunner, CommandSpec, Output};

/// Column at which the timing summary of a finished step starts
const FINISHED_COLUMN: usize = 60;

/// Runs the HOL build and the CakeML build sequence for a job
pub struct BuildPipeline {
    config: Config,
    runner: Arc<dyn CommandRunner>,
    api: Arc<dyn QueueApi>,
}

impl BuildPipeline {
    pub fn new(config: Config, runner: Arc<dyn CommandRunner>, api: Arc<dyn QueueApi>) -> Self {
        Self {
            config,
            runner,
            api,
        }
    }

    /// Builds HOL, configuring it first unless the previous build is reused
    ///
    /// On failure the job is reported, its log uploaded and the job
    /// stopped, and `false` is returned.
    pub async fn build_core(&self, id: JobId, reuse: bool) -> Result<bool> {
        let hol = self.config.hol_dir();
        let capture = self.config.capture_file();

        self.report(id, "Building HOL").await?;

        let configured = if reuse {
            true
        } else {
            let configure = CommandSpec::new("poly")
                .stdin_file(hol.join("tools").join("smart-configure.sml"))
                .current_dir(&hol)
                .output(Output::Truncate(capture.clone()));
            self.runner.run(&configure).await?.success
        };

        let built = configured && {
            // A reused build has no configure output to append to
            let output = if reuse {
                Output::Truncate(capture.clone())
            } else {
                Output::Append(capture.clone())
            };
            let build = CommandSpec::new(hol.join("bin").join("build"))
                .arg("--nograph")
                .current_dir(&hol)
                .output(output);
            self.runner.run(&build).await?.success
        };

        if !built {
            self.fail(id, "FAILED: building HOL").await?;
        }
        Ok(built)
    }

    /// Runs the build sequence
    ///
    /// When `resumed`, every step before the one named in the resume file
    /// is skipped. All steps passing reports `SUCCESS`, uploads artifacts
    /// for primary-branch builds and stops the job.
    pub async fn run_sequence(&self, id: JobId, resumed: bool, primary: bool) -> Result<bool> {
        let steps = self.read_steps()?;

        let marker = if resumed { self.read_marker()? } else { None };
        if let Some(marker) = &marker {
            if !steps.contains(marker) {
                bail!("Resume marker {:?} is not in the build sequence", marker);
            }
        } else if resumed {
            warn!("No resume marker for job {}, starting from the first step", id);
        }

        let mut resuming = marker.as_deref();
        for step in &steps {
            let verb = match resuming {
                Some(marker) if marker != step => continue,
                Some(_) => "Resuming",
                None => "Starting",
            };

            self.write_marker(step)?;
            self.report(id, &format!("{} {}", verb, step)).await?;

            if !self.run_step(step).await? {
                self.fail(id, &format!("FAILED: {}", step)).await?;
                self.clear_marker()?;
                return Ok(false);
            }

            let summary = self.timing_summary();
            self.report(id, &finished_line(step, &summary)).await?;
            resuming = None;
        }

        self.report(id, "SUCCESS").await?;
        if primary {
            self.upload_artifacts(id).await?;
        }
        self.api.stop(id).await?;
        self.clear_marker()?;

        Ok(true)
    }

    /// Uploads every artifact that exists, warning about the rest
    pub async fn upload_artifacts(&self, id: JobId) -> Result<()> {
        let cakeml = self.config.cakeml_dir();
        for artifact in &self.config.artifacts {
            let path = cakeml.join(artifact);
            if path.is_file() {
                info!("Uploading {}", path.display());
                self.api.upload(id, &path).await?;
            } else {
                warn!("Artifact {} not found, skipping upload", path.display());
            }
        }
        Ok(())
    }

    /// Runs Holmake in one build-sequence directory
    async fn run_step(&self, step: &str) -> Result<bool> {
        let dir = self.config.cakeml_dir().join(step);
        let capture = self.config.capture_file();

        if !dir.is_dir() {
            std::fs::write(&capture, format!("Cannot enter directory {}\n", dir.display()))
                .with_context(|| format!("Failed to write {}", capture.display()))?;
            return Ok(false);
        }

        let hol = self.config.hol_dir();
        let holmake = CommandSpec::new(hol.join("bin").join("Holmake"))
            .arg("--qof")
            .current_dir(&dir)
            .env("HOLDIR", hol.display().to_string())
            .env("CAKEMLDIR", self.config.cakeml_dir().display().to_string())
            .output(Output::Truncate(capture))
            .timing(self.config.timing_file());

        Ok(self.runner.run(&holmake).await?.success)
    }

    fn read_steps(&self) -> Result<Vec<String>> {
        let path = self.config.build_sequence();
        let contents = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read build sequence {}", path.display()))?;
        Ok(parse_build_sequence(&contents))
    }

    fn read_marker(&self) -> Result<Option<String>> {
        let path = self.config.resume_file();
        match std::fs::read_to_string(&path) {
            // Empty when a crash cut the write short
            Ok(contents) => {
                let marker = contents.trim();
                Ok((!marker.is_empty()).then(|| marker.to_string()))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("Failed to read {}", path.display())),
        }
    }

    fn write_marker(&self, step: &str) -> Result<()> {
        let path = self.config.resume_file();
        std::fs::write(&path, format!("{}\n", step))
            .with_context(|| format!("Failed to write {}", path.display()))
    }

    fn clear_marker(&self) -> Result<()> {
        remove_if_present(&self.config.resume_file())
    }

    /// Last line of the timing file, empty when there is none
    fn timing_summary(&self) -> String {
        std::fs::read_to_string(self.config.timing_file())
            .ok()
            .and_then(|t| t.lines().rev().find(|l| !l.trim().is_empty()).map(|l| l.trim().to_string()))
            .unwrap_or_default()
    }

    async fn report(&self, id: JobId, line: &str) -> Result<()> {
        info!("Job {}: {}", id, line);
        self.api
            .append(id, line)
            .await
            .with_context(|| format!("Failed to report {:?} for job {}", line, id))
    }

    /// Reports a failed build, uploads its output and stops the job
    async fn fail(&self, id: JobId, line: &str) -> Result<()> {
        self.report(id, line).await?;
        self.api.log(id, &self.config.capture_file()).await?;
        self.api.stop(id).await?;
        Ok(())
    }
}

/// Build-sequence entries: every line that is neither blank nor a comment
pub fn parse_build_sequence(contents: &str) -> Vec<String> {
    contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}

fn finished_line(step: &str, summary: &str) -> String {
    let label = format!("Finished {}", step);
    format!("{:<width$} {}", label, summary, width = FINISHED_COLUMN)
        .trim_end()
        .to_string()
}

fn remove_if_present(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).with_context(|| format!("Failed to remove {}", path.display())),
    }
}
