//! Job poller
//!
//! Picks the next job, runs it to completion, and repeats. Jobs run one at
//! a time: a job is fully built and reported before the waiting list is
//! looked at again.

use anyhow::{Context, Result};
use regress_client::QueueApi;
use regress_core::domain::JobId;
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::Config;
use crate::process::CommandRunner;
use crate::service::{JobOutcome, Workflow};

/// Command-line controls over the polling loop
#[derive(Debug, Clone, Default)]
pub struct PollOptions {
    /// Exit instead of sleeping when nothing is waiting
    pub no_poll: bool,
    /// Exit after the first job that was claimed
    pub no_loop: bool,
    /// Job to try before consulting the waiting list
    pub select: Option<JobId>,
    /// Interrupted job to continue before anything else
    pub resume: Option<JobId>,
}

/// Why the polling loop stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollExit {
    /// Nothing was waiting and polling was disabled
    Idle,
    /// One job was handled and looping was disabled
    Done,
    /// A resumed job failed again
    ResumeFailed,
}

/// Job poller that runs waiting jobs one after another
pub struct JobPoller {
    config: Config,
    api: Arc<dyn QueueApi>,
    workflow: Workflow,
}

impl JobPoller {
    pub fn new(config: Config, api: Arc<dyn QueueApi>, runner: Arc<dyn CommandRunner>) -> Self {
        let workflow = Workflow::new(config.clone(), Arc::clone(&api), runner);
        Self {
            config,
            api,
            workflow,
        }
    }

    /// Runs the polling loop until one of the exit conditions is met
    ///
    /// Overrides are used once; every later iteration reads the live
    /// waiting list.
    pub async fn run(&self, mut options: PollOptions) -> Result<PollExit> {
        info!(
            "Starting job poller as {:?} (interval: {:?})",
            self.config.worker_name, self.config.poll_interval
        );

        loop {
            let Some((id, resumed)) = self.next_job(&mut options).await? else {
                if options.no_poll {
                    info!("No jobs waiting, exiting");
                    return Ok(PollExit::Idle);
                }
                info!("No jobs waiting, sleeping for {:?}", self.config.poll_interval);
                tokio::time::sleep(self.config.poll_interval).await;
                continue;
            };

            info!("{} job {}", if resumed { "Resuming" } else { "Trying" }, id);
            let outcome = self.workflow.run_job(id, resumed).await?;

            match outcome {
                JobOutcome::NotClaimed => continue,
                JobOutcome::Abandoned => {}
                JobOutcome::Finished(success) => {
                    info!("Job {} {}", id, if success { "succeeded" } else { "failed" });
                    if resumed && !success {
                        return Ok(PollExit::ResumeFailed);
                    }
                }
            }

            if options.no_loop {
                return Ok(PollExit::Done);
            }
        }
    }

    /// Next job to run and whether it is being resumed
    async fn next_job(&self, options: &mut PollOptions) -> Result<Option<(JobId, bool)>> {
        if let Some(id) = options.select.take() {
            return Ok(Some((id, false)));
        }
        if let Some(id) = options.resume.take() {
            return Ok(Some((id, true)));
        }

        let waiting = self
            .api
            .waiting()
            .await
            .context("Failed to fetch waiting jobs")?;
        debug!("Waiting jobs: {:?}", waiting);

        Ok(waiting.first().map(|&id| (id, false)))
    }
}
