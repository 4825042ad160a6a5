//! Test doubles shared by the service and scheduler tests

use anyhow::Result;
use async_trait::async_trait;
use regress_client::MemoryQueue;
use std::collections::{HashMap, HashSet};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

use crate::config::Config;
use crate::process::{CommandOutcome, CommandRunner, CommandSpec, Output};

#[derive(Default)]
struct RunnerState {
    heads: HashMap<PathBuf, String>,
    merge_heads: HashMap<PathBuf, String>,
    remotes: HashMap<PathBuf, String>,
    failing_steps: HashSet<String>,
    fail_core: bool,
    fail_merge: bool,
    commands: Vec<(Option<PathBuf>, String)>,
}

/// Stands in for git and the build tools
///
/// Tracks HEAD per checkout so resets and merges are visible to later
/// `rev-parse` calls, and writes placeholder output to redirect files.
#[derive(Default)]
pub struct ScriptedRunner {
    state: Mutex<RunnerState>,
}

impl ScriptedRunner {
    pub fn set_head(&self, dir: &Path, commit: &str) {
        let mut state = self.state.lock().unwrap();
        state.heads.insert(dir.to_path_buf(), commit.to_string());
    }

    pub fn set_merge_head(&self, dir: &Path, commit: &str) {
        let mut state = self.state.lock().unwrap();
        state.merge_heads.insert(dir.to_path_buf(), commit.to_string());
    }

    pub fn set_remote(&self, dir: &Path, remote: &str) {
        let mut state = self.state.lock().unwrap();
        state.remotes.insert(dir.to_path_buf(), remote.to_string());
    }

    pub fn fail_step(&self, step: &str) {
        self.state.lock().unwrap().failing_steps.insert(step.to_string());
    }

    pub fn fail_core_build(&self) {
        self.state.lock().unwrap().fail_core = true;
    }

    pub fn fail_merge(&self) {
        self.state.lock().unwrap().fail_merge = true;
    }

    /// Every command run, as `program arg...`
    pub fn commands(&self) -> Vec<String> {
        let state = self.state.lock().unwrap();
        state.commands.iter().map(|(_, c)| c.clone()).collect()
    }

    /// Commands run with `dir` as working directory
    pub fn commands_in(&self, dir: &Path) -> Vec<String> {
        let state = self.state.lock().unwrap();
        state
            .commands
            .iter()
            .filter(|(cwd, _)| cwd.as_deref() == Some(dir))
            .map(|(_, c)| c.clone())
            .collect()
    }

    fn git(state: &mut RunnerState, cwd: &Path, args: &[String]) -> CommandOutcome {
        let ok = |stdout: String| CommandOutcome {
            success: true,
            exit_code: Some(0),
            stdout,
            stderr: String::new(),
        };
        let failed = || CommandOutcome {
            success: false,
            exit_code: Some(1),
            stdout: String::new(),
            stderr: "fatal: scripted failure".to_string(),
        };

        match args.first().map(String::as_str) {
            Some("clone") => {
                let dir = PathBuf::from(&args[args.len() - 1]);
                let remote = args[args.len() - 2].clone();
                std::fs::create_dir_all(&dir).unwrap();
                state.remotes.insert(dir.clone(), remote);
                state.heads.insert(dir, "cloned".to_string());
                ok(String::new())
            }
            Some("config") => match state.remotes.get(cwd) {
                Some(remote) => ok(format!("{}\n", remote)),
                None => failed(),
            },
            Some("rev-parse") => {
                let table = if args.get(1).map(String::as_str) == Some("MERGE_HEAD") {
                    &state.merge_heads
                } else {
                    &state.heads
                };
                match table.get(cwd) {
                    Some(commit) => ok(format!("{}\n", commit)),
                    None => failed(),
                }
            }
            Some("reset") => {
                let commit = args[args.len() - 1].clone();
                state.heads.insert(cwd.to_path_buf(), commit);
                state.merge_heads.remove(cwd);
                ok(String::new())
            }
            Some("merge") if state.fail_merge => failed(),
            Some("merge") => {
                let commit = args[args.len() - 1].clone();
                state.merge_heads.insert(cwd.to_path_buf(), commit);
                ok(String::new())
            }
            _ => ok(String::new()),
        }
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutcome> {
        let mut state = self.state.lock().unwrap();
        let line = std::iter::once(spec.name())
            .chain(spec.args.iter().cloned())
            .collect::<Vec<_>>()
            .join(" ");
        state.commands.push((spec.cwd.clone(), line));

        let cwd = spec.cwd.clone().unwrap_or_default();
        let outcome = match spec.name().as_str() {
            "git" => Self::git(&mut state, &cwd, &spec.args),
            name => {
                let failed = match name {
                    "Holmake" => state.failing_steps.iter().any(|s| cwd.ends_with(s)),
                    _ => state.fail_core,
                };
                CommandOutcome {
                    success: !failed,
                    exit_code: Some(if failed { 1 } else { 0 }),
                    ..Default::default()
                }
            }
        };

        let text = format!("{} output\n", spec.name());
        match &spec.output {
            Output::Capture => {}
            Output::Truncate(path) => std::fs::write(path, text)?,
            Output::Append(path) => std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)?
                .write_all(text.as_bytes())?,
        }
        if let Some(timing) = &spec.timing {
            std::fs::write(timing, "1.00s 2048KB\n")?;
        }

        Ok(outcome)
    }
}

/// A worker directory with both checkouts already cloned
pub struct Fixture {
    pub dir: TempDir,
    pub config: Config,
    pub runner: Arc<ScriptedRunner>,
    pub queue: Arc<MemoryQueue>,
}

impl Fixture {
    /// Sets up checkouts whose build sequence lists `steps`
    pub fn new(steps: &[&str]) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::new(
            "http://localhost:8080/api".to_string(),
            dir.path().to_path_buf(),
        );
        config.worker_name = "test-worker".to_string();
        config.token = "secret".to_string();

        let runner = Arc::new(ScriptedRunner::default());

        std::fs::create_dir_all(config.hol_dir()).unwrap();
        std::fs::create_dir_all(config.cakeml_dir().join("developers")).unwrap();
        runner.set_remote(&config.hol_dir(), &config.hol_remote);
        runner.set_remote(&config.cakeml_dir(), &config.cakeml_remote);
        runner.set_head(&config.hol_dir(), "0000");
        runner.set_head(&config.cakeml_dir(), "0000");

        let mut sequence = String::from("# Build order\n\n");
        for step in steps {
            std::fs::create_dir_all(config.cakeml_dir().join(step)).unwrap();
            sequence.push_str(step);
            sequence.push('\n');
        }
        std::fs::write(config.build_sequence(), sequence).unwrap();

        Self {
            dir,
            config,
            runner,
            queue: Arc::new(MemoryQueue::new()),
        }
    }

    /// Pretends HOL was built earlier
    pub fn mark_hol_built(&self) {
        let bin = self.config.hol_dir().join("bin");
        std::fs::create_dir_all(&bin).unwrap();
        std::fs::write(bin.join("hol"), "").unwrap();
    }

    /// Creates every artifact file a primary build uploads
    pub fn create_artifacts(&self) {
        for artifact in &self.config.artifacts {
            let path = self.config.cakeml_dir().join(artifact);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(path, "tarball").unwrap();
        }
    }
}
