//! Workflow controller
//!
//! Drives one job from claim to finish. A fresh job goes
//! `Claiming -> Claimed -> Preparing -> BuildingCore -> RunningSequence ->
//! Finished`; a resumed job is already ours, so it skips the claim and the
//! preparation and validates the checkouts instead.

use anyhow::{Context, Result};
use regress_client::QueueApi;
use regress_core::domain::{JobId, JobStatus, Snapshot};
use regress_core::protocol::parse_snapshot;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::process::CommandRunner;
use crate::service::pipeline::BuildPipeline;
use crate::service::repository::RepositoryManager;

/// Where a job is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Claiming,
    Claimed,
    Preparing,
    BuildingCore,
    ValidatingResume,
    RunningSequence,
    Finished(bool),
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Claiming => write!(f, "claiming"),
            Stage::Claimed => write!(f, "claimed"),
            Stage::Preparing => write!(f, "preparing checkouts"),
            Stage::BuildingCore => write!(f, "building HOL"),
            Stage::ValidatingResume => write!(f, "validating resumed checkouts"),
            Stage::RunningSequence => write!(f, "running build sequence"),
            Stage::Finished(true) => write!(f, "finished (success)"),
            Stage::Finished(false) => write!(f, "finished (failure)"),
        }
    }
}

/// How a call to [`Workflow::run_job`] ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    /// Another worker got the job first
    NotClaimed,
    /// The queue would not hand out the job description
    Abandoned,
    /// The job ran; `true` when every build passed
    Finished(bool),
}

pub struct Workflow {
    config: Config,
    api: Arc<dyn QueueApi>,
    repositories: RepositoryManager,
    pipeline: BuildPipeline,
}

impl Workflow {
    pub fn new(config: Config, api: Arc<dyn QueueApi>, runner: Arc<dyn CommandRunner>) -> Self {
        let repositories = RepositoryManager::new(config.clone(), Arc::clone(&runner));
        let pipeline = BuildPipeline::new(config.clone(), runner, Arc::clone(&api));
        Self {
            config,
            api,
            repositories,
            pipeline,
        }
    }

    /// Claims, prepares and builds one job
    pub async fn run_job(&self, id: JobId, resumed: bool) -> Result<JobOutcome> {
        if !self.claim(id, resumed).await? {
            return Ok(JobOutcome::NotClaimed);
        }
        enter(id, Stage::Claimed);

        let Some(snapshot) = self.fetch_snapshot(id).await? else {
            return Ok(JobOutcome::Abandoned);
        };
        info!("Job {}: CakeML {} on HOL {}", id, snapshot.integration, snapshot.core);

        let success = self.execute(id, &snapshot, resumed).await?;
        enter(id, Stage::Finished(success));

        Ok(JobOutcome::Finished(success))
    }

    /// Claims a job under this worker's name
    ///
    /// Resumed jobs were claimed by an earlier run and are not claimed
    /// again. Losing the claim to another worker is `Ok(false)`.
    pub async fn claim(&self, id: JobId, resumed: bool) -> Result<bool> {
        if resumed {
            debug!("Job {} resumed, not claiming again", id);
            return Ok(true);
        }

        enter(id, Stage::Claiming);
        let claimed = self
            .api
            .claim(id, &self.config.worker_name)
            .await
            .with_context(|| format!("Failed to claim job {}", id))?;

        if !claimed {
            info!("Job {} was claimed by another worker", id);
        }
        Ok(claimed)
    }

    /// Fetches and parses the job description
    ///
    /// A queue that refuses the request is logged and yields `None`; a
    /// description that does not parse is an error.
    pub async fn fetch_snapshot(&self, id: JobId) -> Result<Option<Snapshot>> {
        let text = match self.api.job(id).await {
            Ok(text) => text,
            Err(e) if e.is_rejected() => {
                warn!("Abandoning job {}: {}", id, e);
                return Ok(None);
            }
            Err(e) => return Err(e).with_context(|| format!("Failed to fetch job {}", id)),
        };

        let snapshot = parse_snapshot(&text)
            .with_context(|| format!("Malformed description for job {}", id))?;
        Ok(Some(snapshot))
    }

    /// Builds a claimed job, returning whether every build passed
    pub async fn execute(&self, id: JobId, snapshot: &Snapshot, resumed: bool) -> Result<bool> {
        let primary = snapshot.integration.is_primary();

        if resumed {
            enter(id, Stage::ValidatingResume);
            self.repositories
                .validate_resume(&snapshot.core, &snapshot.integration)
                .await?;

            enter(id, Stage::RunningSequence);
            return self.pipeline.run_sequence(id, true, primary).await;
        }

        enter(id, Stage::Preparing);
        let reuse = self.repositories.prepare_core(&snapshot.core).await?;
        self.repositories
            .prepare_compiler(&snapshot.integration)
            .await?;

        enter(id, Stage::BuildingCore);
        if !self.pipeline.build_core(id, reuse).await? {
            return Ok(false);
        }

        enter(id, Stage::RunningSequence);
        self.pipeline.run_sequence(id, false, primary).await
    }

    /// Uploads artifacts for a job that already finished
    ///
    /// Only a job whose output says it succeeded gets artifacts. Returns
    /// whether anything was attempted.
    pub async fn upload_finished(&self, id: JobId) -> Result<bool> {
        let text = self
            .api
            .job(id)
            .await
            .with_context(|| format!("Failed to fetch job {}", id))?;

        match JobStatus::infer(&text) {
            JobStatus::Success => {
                self.pipeline.upload_artifacts(id).await?;
                Ok(true)
            }
            status => {
                warn!("Job {} finished with status {}, not uploading", id, status);
                Ok(false)
            }
        }
    }
}

fn enter(id: JobId, stage: Stage) {
    debug!("Job {}: {}", id, stage);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::Fixture;
    use regress_core::domain::JobState;

    const ID: JobId = JobId::new(42);
    const BRANCH: &str = "CakeML: abc123\nFix the parser\nHOL: def456\n";

    fn workflow(fixture: &Fixture) -> Workflow {
        Workflow::new(
            fixture.config.clone(),
            fixture.queue.clone(),
            fixture.runner.clone(),
        )
    }

    #[tokio::test]
    async fn test_end_to_end_success() {
        let fixture = Fixture::new(&["compiler", "basis"]);
        fixture.create_artifacts();
        fixture.queue.insert_job(ID, BRANCH);

        let outcome = workflow(&fixture).run_job(ID, false).await.unwrap();
        assert_eq!(outcome, JobOutcome::Finished(true));

        let calls = fixture.queue.calls();
        let expected_prefixes = [
            "Claim(42)",
            "Append(Building HOL)",
            "Append(Starting compiler)",
            "Append(Finished compiler",
            "Append(Starting basis)",
            "Append(Finished basis",
            "Append(SUCCESS)",
            "Upload(cake-x64-64.tar.gz)",
            "Upload(cake-x64-32.tar.gz)",
            "Stop(42)",
        ];
        assert_eq!(calls.len(), expected_prefixes.len());
        for (call, prefix) in calls.iter().zip(expected_prefixes) {
            assert!(call.starts_with(prefix), "{} does not start with {}", call, prefix);
        }

        let job = fixture.queue.get_job(ID).unwrap();
        assert_eq!(job.state, JobState::Stopped);
        assert_eq!(job.worker.as_deref(), Some("test-worker"));
        assert_eq!(job.uploads.len(), 2);

        let hol = fixture.runner.commands_in(&fixture.config.hol_dir());
        assert!(hol.contains(&"git reset --hard def456".to_string()));
        let cakeml = fixture.runner.commands_in(&fixture.config.cakeml_dir());
        assert!(cakeml.contains(&"git reset --hard abc123".to_string()));
    }

    #[tokio::test]
    async fn test_end_to_end_failure() {
        let fixture = Fixture::new(&["compiler", "basis"]);
        fixture.create_artifacts();
        fixture.queue.insert_job(ID, BRANCH);
        fixture.runner.fail_step("basis");

        let outcome = workflow(&fixture).run_job(ID, false).await.unwrap();
        assert_eq!(outcome, JobOutcome::Finished(false));

        let calls = fixture.queue.calls();
        assert_eq!(
            calls[calls.len() - 3..],
            ["Append(FAILED: basis)", "Log(42)", "Stop(42)"]
        );
        assert!(!calls.iter().any(|c| c.starts_with("Upload")));
    }

    #[tokio::test]
    async fn test_core_failure_skips_sequence() {
        let fixture = Fixture::new(&["compiler"]);
        fixture.queue.insert_job(ID, BRANCH);
        fixture.runner.fail_core_build();

        let outcome = workflow(&fixture).run_job(ID, false).await.unwrap();
        assert_eq!(outcome, JobOutcome::Finished(false));
        assert!(
            fixture
                .runner
                .commands()
                .iter()
                .all(|c| !c.starts_with("Holmake"))
        );
    }

    #[tokio::test]
    async fn test_lost_claim_is_not_an_error() {
        let fixture = Fixture::new(&["compiler"]);
        fixture.queue.insert_job(ID, BRANCH);
        fixture.queue.set_state(ID, JobState::Running);

        let outcome = workflow(&fixture).run_job(ID, false).await.unwrap();
        assert_eq!(outcome, JobOutcome::NotClaimed);
        assert_eq!(fixture.queue.calls(), vec!["Claim(42)"]);
        assert!(fixture.runner.commands().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_job_is_abandoned() {
        let fixture = Fixture::new(&["compiler"]);
        let workflow = workflow(&fixture);

        assert!(workflow.fetch_snapshot(ID).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_malformed_description_is_fatal() {
        let fixture = Fixture::new(&["compiler"]);
        fixture.queue.insert_job(ID, "Nonsense\n");
        fixture.queue.set_state(ID, JobState::Running);

        assert!(workflow(&fixture).fetch_snapshot(ID).await.is_err());
    }

    #[tokio::test]
    async fn test_resumed_job_skips_claim_and_preparation() {
        let fixture = Fixture::new(&["compiler", "basis"]);
        fixture.queue.insert_job(ID, BRANCH);
        fixture.queue.set_state(ID, JobState::Running);
        fixture.runner.set_head(&fixture.config.hol_dir(), "def456aa");
        fixture.runner.set_head(&fixture.config.cakeml_dir(), "abc123bb");
        std::fs::write(fixture.config.resume_file(), "basis\n").unwrap();

        let outcome = workflow(&fixture).run_job(ID, true).await.unwrap();
        assert_eq!(outcome, JobOutcome::Finished(true));

        let calls = fixture.queue.calls();
        assert_eq!(calls[0], "Append(Resuming basis)");
        assert!(!calls.iter().any(|c| c.starts_with("Claim")));
        assert!(
            fixture
                .runner
                .commands()
                .iter()
                .all(|c| !c.starts_with("git reset") && !c.starts_with("build"))
        );
    }

    #[tokio::test]
    async fn test_resumed_job_with_moved_checkout_is_fatal() {
        let fixture = Fixture::new(&["compiler"]);
        fixture.queue.insert_job(ID, BRANCH);
        fixture.queue.set_state(ID, JobState::Running);
        fixture.runner.set_head(&fixture.config.hol_dir(), "def456aa");
        fixture.runner.set_head(&fixture.config.cakeml_dir(), "ffff00");

        assert!(workflow(&fixture).run_job(ID, true).await.is_err());
        assert!(fixture.queue.calls().is_empty());
    }

    #[tokio::test]
    async fn test_pull_request_does_not_upload() {
        let fixture = Fixture::new(&["compiler"]);
        fixture.create_artifacts();
        fixture.queue.insert_job(
            ID,
            "CakeML: abc123\nAdd a feature\n#17 Add a feature\nalice\nfeature\nMerging into: base999\nHOL: def456\n",
        );

        let outcome = workflow(&fixture).run_job(ID, false).await.unwrap();
        assert_eq!(outcome, JobOutcome::Finished(true));
        assert!(!fixture.queue.calls().iter().any(|c| c.starts_with("Upload")));
        assert!(
            fixture
                .runner
                .commands_in(&fixture.config.cakeml_dir())
                .contains(&"git merge --no-ff --no-commit --quiet abc123".to_string())
        );
    }

    #[tokio::test]
    async fn test_upload_finished_only_for_success() {
        let fixture = Fixture::new(&["compiler"]);
        fixture.create_artifacts();
        fixture.queue.insert_job(ID, format!("{}Starting compiler\nSUCCESS\n", BRANCH));
        fixture.queue.set_state(ID, JobState::Stopped);
        let workflow = workflow(&fixture);

        assert!(workflow.upload_finished(ID).await.unwrap());
        assert_eq!(
            fixture.queue.calls(),
            vec!["Upload(cake-x64-64.tar.gz)", "Upload(cake-x64-32.tar.gz)"]
        );
        assert_eq!(fixture.queue.get_job(ID).unwrap().uploads.len(), 2);

        let other = JobId::new(7);
        fixture.queue.insert_job(other, format!("{}FAILED: compiler\n", BRANCH));
        fixture.queue.set_state(other, JobState::Stopped);
        assert!(!workflow.upload_finished(other).await.unwrap());
        assert_eq!(fixture.queue.get_job(other).unwrap().uploads.len(), 0);
    }
}
