//! Repository manager
//!
//! Owns the two long-lived checkouts: HOL (the proof assistant) and CakeML
//! (the compiler). HOL is reused between jobs when it is already at the
//! right commit and has been built; CakeML is always reset and cleaned.

use anyhow::{Context, Result, bail};
use regress_core::domain::Integration;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::process::{CommandOutcome, CommandRunner, CommandSpec};

/// Manages the HOL and CakeML working directories
pub struct RepositoryManager {
    config: Config,
    runner: Arc<dyn CommandRunner>,
}

impl RepositoryManager {
    pub fn new(config: Config, runner: Arc<dyn CommandRunner>) -> Self {
        Self { config, runner }
    }

    /// Makes sure `dir` is a checkout of `remote`, cloning it if absent
    ///
    /// An existing directory whose origin does not start with `remote` is
    /// an error: the worker will not build from a checkout it cannot vouch
    /// for.
    pub async fn ensure_cloned(&self, remote: &str, options: &[String], dir: &Path) -> Result<()> {
        if dir.is_dir() {
            let url = self
                .git_output(dir, &["config", "--get", "remote.origin.url"])
                .await?;
            if !url.starts_with(remote) {
                bail!(
                    "{} is a checkout of {}, expected {}",
                    dir.display(),
                    url,
                    remote
                );
            }
            return Ok(());
        }

        if dir.exists() {
            bail!("{} exists but is not a directory", dir.display());
        }

        info!("Cloning {} into {}", remote, dir.display());
        let spec = CommandSpec::new("git")
            .arg("clone")
            .args(options.iter().cloned())
            .arg(remote)
            .arg(dir.display().to_string());
        let outcome = self.runner.run(&spec).await?;
        check(&outcome, &format!("git clone {}", remote))
    }

    /// Brings the HOL checkout to `target`
    ///
    /// Returns `true` when the existing build can be reused: HEAD already
    /// starts with `target` and `bin/hol` exists. Otherwise the checkout is
    /// reset to `target` and scrubbed of untracked and ignored files.
    pub async fn prepare_core(&self, target: &str) -> Result<bool> {
        let dir = self.config.hol_dir();
        self.ensure_cloned(&self.config.hol_remote, &self.config.clone_options, &dir)
            .await?;
        self.git(&dir, &["fetch", "origin"]).await?;

        let head = self.head(&dir).await?;
        let built = dir.join("bin").join("hol").exists();
        let reuse = head.starts_with(target) && built;

        if reuse {
            info!("Reusing HOL build at {}", head);
            return Ok(true);
        }

        debug!("HOL at {} (built: {}), resetting to {}", head, built, target);
        self.git(&dir, &["reset", "--hard", target]).await?;
        self.git(&dir, &["clean", "-xdf"]).await?;
        self.link_poly_includes(&dir)?;

        Ok(false)
    }

    /// Brings the CakeML checkout to the job's integration
    ///
    /// A failed pull-request merge is left in place: it shows up as a
    /// build failure later.
    pub async fn prepare_compiler(&self, integration: &Integration) -> Result<()> {
        let dir = self.config.cakeml_dir();
        self.ensure_cloned(&self.config.cakeml_remote, &self.config.clone_options, &dir)
            .await?;
        self.git(&dir, &["fetch", "origin"]).await?;

        match integration {
            Integration::Branch { commit } => {
                self.git(&dir, &["reset", "--hard", commit.as_str()]).await?;
            }
            Integration::PullRequest { head, base } => {
                self.git(&dir, &["reset", "--hard", base.as_str()]).await?;
                let outcome = self
                    .runner
                    .run(&git_spec(&dir, &["merge", "--no-ff", "--no-commit", "--quiet", head.as_str()]))
                    .await?;
                if !outcome.success {
                    warn!("Merging {} into {} failed: {}", head, base, outcome.stderr.trim());
                }
            }
        }

        self.git(&dir, &["clean", "-xdf"]).await
    }

    /// Checks that both checkouts are where an interrupted job left them
    ///
    /// Read-only. A mismatch means the resumed job cannot trust what is on
    /// disk, which is an error.
    pub async fn validate_resume(&self, core: &str, integration: &Integration) -> Result<()> {
        let hol = self.head(&self.config.hol_dir()).await?;
        if !hol.starts_with(core) {
            bail!("HOL checkout is at {}, resumed job needs {}", hol, core);
        }

        let cakeml_dir = self.config.cakeml_dir();
        let cakeml = self.head(&cakeml_dir).await?;
        match integration {
            Integration::Branch { commit } => {
                if !cakeml.starts_with(commit.as_str()) {
                    bail!("CakeML checkout is at {}, resumed job needs {}", cakeml, commit);
                }
            }
            Integration::PullRequest { head, base } => {
                if !cakeml.starts_with(base.as_str()) {
                    bail!("CakeML checkout is at {}, resumed job needs {}", cakeml, base);
                }
                let merging = self
                    .git_output(&cakeml_dir, &["rev-parse", "MERGE_HEAD"])
                    .await
                    .context("CakeML checkout has no merge in progress")?;
                if !merging.starts_with(head.as_str()) {
                    bail!("CakeML checkout is merging {}, resumed job needs {}", merging, head);
                }
            }
        }

        Ok(())
    }

    async fn head(&self, dir: &Path) -> Result<String> {
        self.git_output(dir, &["rev-parse", "HEAD"]).await
    }

    async fn git(&self, dir: &Path, args: &[&str]) -> Result<()> {
        let outcome = self.runner.run(&git_spec(dir, args)).await?;
        check(&outcome, &format!("git {} in {}", args.join(" "), dir.display()))
    }

    async fn git_output(&self, dir: &Path, args: &[&str]) -> Result<String> {
        let outcome = self.runner.run(&git_spec(dir, args)).await?;
        check(&outcome, &format!("git {} in {}", args.join(" "), dir.display()))?;
        Ok(outcome.stdout.trim().to_string())
    }

    fn link_poly_includes(&self, hol_dir: &Path) -> Result<()> {
        let source = self.config.poly_includes();
        if !source.exists() {
            return Ok(());
        }

        let target = hol_dir.join("tools-poly").join("poly-includes.ML");
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        if target.symlink_metadata().is_ok() {
            std::fs::remove_file(&target)
                .with_context(|| format!("Failed to remove {}", target.display()))?;
        }
        std::os::unix::fs::symlink(&source, &target)
            .with_context(|| format!("Failed to link {}", target.display()))?;

        debug!("Linked {} into HOL", source.display());
        Ok(())
    }
}

fn git_spec(dir: &Path, args: &[&str]) -> CommandSpec {
    CommandSpec::new("git")
        .args(args.iter().copied())
        .current_dir(dir)
}

fn check(outcome: &CommandOutcome, what: &str) -> Result<()> {
    if !outcome.success {
        bail!(
            "{} failed (exit code {:?}): {}",
            what,
            outcome.exit_code,
            outcome.stderr.trim()
        );
    }
    Ok(())
}
