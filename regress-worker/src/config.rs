//! Worker configuration
//!
//! Defines every configurable parameter of the worker: the queue endpoint
//! and credentials, where the working directories live, the remotes they
//! are cloned from, and the polling interval.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Worker configuration
///
/// Built once at startup and handed to every component.
#[derive(Debug, Clone)]
pub struct Config {
    /// Queue API base URL
    pub api_url: String,

    /// Name this worker claims jobs under
    pub worker_name: String,

    /// Bearer token for the queue API
    pub token: String,

    /// Directory holding both checkouts and the worker's scratch files
    pub workdir: PathBuf,

    /// How long to sleep when no job is waiting
    pub poll_interval: Duration,

    /// Remote the proof-assistant checkout is cloned from
    pub hol_remote: String,

    /// Remote the compiler checkout is cloned from
    pub cakeml_remote: String,

    /// Extra `git clone` options for both checkouts
    pub clone_options: Vec<String>,

    /// GNU time binary used to measure build steps
    pub time_program: PathBuf,

    /// Files uploaded after a successful primary-branch build,
    /// relative to the compiler checkout
    pub artifacts: Vec<PathBuf>,
}

impl Config {
    /// Creates a new configuration with defaults
    pub fn new(api_url: String, workdir: PathBuf) -> Self {
        Self {
            api_url,
            worker_name: String::new(),
            token: String::new(),
            workdir,
            poll_interval: Duration::from_secs(30 * 60),
            hol_remote: "https://github.com/HOL-Theorem-Prover/HOL.git".to_string(),
            cakeml_remote: "https://github.com/CakeML/cakeml.git".to_string(),
            clone_options: vec!["--quiet".to_string()],
            time_program: PathBuf::from("/usr/bin/time"),
            artifacts: vec![
                PathBuf::from("compiler/bootstrap/compilation/x64/64/cake-x64-64.tar.gz"),
                PathBuf::from("compiler/bootstrap/compilation/x64/32/cake-x64-32.tar.gz"),
            ],
        }
    }

    /// Creates configuration from environment variables
    ///
    /// Expected environment variables (all optional):
    /// - REGRESS_API_URL (default: https://cakeml.org/regression.cgi/api)
    /// - REGRESS_WORKDIR (default: current directory)
    /// - REGRESS_NAME_FILE (default: `name` in the workdir)
    /// - REGRESS_TOKEN_FILE (default: `token` in the workdir)
    /// - REGRESS_POLL_INTERVAL (seconds, default: 1800)
    /// - REGRESS_HOL_REMOTE, REGRESS_CAKEML_REMOTE
    /// - REGRESS_TIME_PROGRAM (default: /usr/bin/time)
    ///
    /// The worker name and token are read from their files here, so a
    /// worker with missing credentials fails before touching the queue.
    pub fn from_env() -> Result<Self> {
        let api_url = std::env::var("REGRESS_API_URL")
            .unwrap_or_else(|_| "https://cakeml.org/regression.cgi/api".to_string());

        let workdir = match std::env::var("REGRESS_WORKDIR") {
            Ok(dir) => PathBuf::from(dir),
            Err(_) => std::env::current_dir().context("Failed to read current directory")?,
        };
        let workdir = std::path::absolute(&workdir)
            .with_context(|| format!("Failed to resolve {}", workdir.display()))?;

        let mut config = Self::new(api_url, workdir);

        if let Some(secs) = std::env::var("REGRESS_POLL_INTERVAL")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
        {
            config.poll_interval = Duration::from_secs(secs);
        }
        if let Ok(remote) = std::env::var("REGRESS_HOL_REMOTE") {
            config.hol_remote = remote;
        }
        if let Ok(remote) = std::env::var("REGRESS_CAKEML_REMOTE") {
            config.cakeml_remote = remote;
        }
        if let Ok(program) = std::env::var("REGRESS_TIME_PROGRAM") {
            config.time_program = PathBuf::from(program);
        }

        let name_file = std::env::var("REGRESS_NAME_FILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config.workdir.join("name"));
        let token_file = std::env::var("REGRESS_TOKEN_FILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config.workdir.join("token"));

        config.worker_name = read_worker_name(&name_file)?;
        config.token = read_token(&token_file)?;

        Ok(config)
    }

    /// Validates the configuration
    pub fn validate(&self) -> Result<()> {
        if !self.api_url.starts_with("http://") && !self.api_url.starts_with("https://") {
            anyhow::bail!("api_url must start with http:// or https://");
        }

        validate_worker_name(&self.worker_name)?;

        if self.token.is_empty() {
            anyhow::bail!("token cannot be empty");
        }

        if self.poll_interval.as_secs() == 0 {
            anyhow::bail!("poll_interval must be greater than 0");
        }

        if self.artifacts.iter().any(|a| a.is_absolute()) {
            anyhow::bail!("artifact paths must be relative to the CakeML checkout");
        }

        Ok(())
    }

    /// Proof-assistant checkout
    pub fn hol_dir(&self) -> PathBuf {
        self.workdir.join("HOL")
    }

    /// Compiler checkout
    pub fn cakeml_dir(&self) -> PathBuf {
        self.workdir.join("cakeml")
    }

    /// Ordered list of compiler subdirectories to build
    pub fn build_sequence(&self) -> PathBuf {
        self.cakeml_dir().join("developers").join("build-sequence")
    }

    /// Last build step started, kept across worker restarts
    pub fn resume_file(&self) -> PathBuf {
        self.workdir.join("resume")
    }

    /// Combined output of the build step being run
    pub fn capture_file(&self) -> PathBuf {
        self.workdir.join("regression.log")
    }

    /// Time and memory summary of the build step being run
    pub fn timing_file(&self) -> PathBuf {
        self.workdir.join("timing.log")
    }

    /// Local Poly/ML customization linked into fresh HOL checkouts
    pub fn poly_includes(&self) -> PathBuf {
        self.workdir.join("poly-includes.ML")
    }
}

/// Reads the worker name from the first line of `path`
pub fn read_worker_name(path: &Path) -> Result<String> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read worker name from {}", path.display()))?;
    let name = contents.lines().next().unwrap_or_default().trim_end().to_string();
    validate_worker_name(&name).with_context(|| format!("Bad worker name in {}", path.display()))?;
    Ok(name)
}

/// Reads the API token from `path`
pub fn read_token(path: &Path) -> Result<String> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read token from {}", path.display()))?;
    let token = contents.trim().to_string();
    if token.is_empty() {
        anyhow::bail!("token file {} is empty", path.display());
    }
    Ok(token)
}

fn validate_worker_name(name: &str) -> Result<()> {
    if name.is_empty() {
        anyhow::bail!("worker name cannot be empty");
    }
    if name.starts_with(char::is_whitespace) {
        anyhow::bail!("worker name cannot start with whitespace");
    }
    if name.contains('"') {
        anyhow::bail!("worker name cannot contain quotes");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> Config {
        let mut config = Config::new(
            "http://localhost:8080/api".to_string(),
            PathBuf::from("/srv/regress"),
        );
        config.worker_name = "worker-1".to_string();
        config.token = "secret".to_string();
        config
    }

    #[test]
    fn test_default_config() {
        let config = valid_config();
        assert_eq!(config.poll_interval, Duration::from_secs(1800));
        assert_eq!(config.artifacts.len(), 2);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = valid_config();

        config.api_url = "not-a-url".to_string();
        assert!(config.validate().is_err());
        config.api_url = "https://cakeml.org/regression.cgi/api".to_string();

        config.token = String::new();
        assert!(config.validate().is_err());
        config.token = "secret".to_string();

        config.worker_name = " padded".to_string();
        assert!(config.validate().is_err());
        config.worker_name = "say \"hi\"".to_string();
        assert!(config.validate().is_err());
        config.worker_name = "worker-1".to_string();

        config.poll_interval = Duration::ZERO;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_paths() {
        let config = valid_config();
        assert_eq!(config.hol_dir(), PathBuf::from("/srv/regress/HOL"));
        assert_eq!(
            config.build_sequence(),
            PathBuf::from("/srv/regress/cakeml/developers/build-sequence")
        );
        assert_eq!(config.resume_file(), PathBuf::from("/srv/regress/resume"));
    }

    #[test]
    fn test_read_identity_files() {
        let dir = tempfile::tempdir().unwrap();
        let name = dir.path().join("name");
        let token = dir.path().join("token");

        std::fs::write(&name, "box-7 (8 cores)\nignored\n").unwrap();
        std::fs::write(&token, "  abc123\n").unwrap();
        assert_eq!(read_worker_name(&name).unwrap(), "box-7 (8 cores)");
        assert_eq!(read_token(&token).unwrap(), "abc123");

        std::fs::write(&name, "\tbox\n").unwrap();
        assert!(read_worker_name(&name).is_err());
        std::fs::write(&token, "\n").unwrap();
        assert!(read_token(&token).is_err());
        assert!(read_token(&dir.path().join("missing")).is_err());
    }
}
