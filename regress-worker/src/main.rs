//! Regression Worker
//!
//! Builds CakeML regression-test jobs handed out by the queue server.
//!
//! Architecture:
//! - Configuration: worker identity, credentials and paths from the environment
//! - Process: argv-based spawning of git and the build tools
//! - Services: checkout management, the build pipeline, the job workflow
//! - Scheduler: polling the waiting list and running jobs one at a time
//!
//! Besides the polling loop, the worker offers a few one-shot queue
//! actions for operators (`--upload`, `--abort`, `--refresh`).

mod config;
mod process;
mod scheduler;
mod service;

#[cfg(test)]
mod test_support;

use anyhow::{Context, Result};
use clap::{ArgGroup, Parser};
use regress_client::{QueueApi, QueueClient};
use regress_core::domain::JobId;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::process::{CommandRunner, SystemRunner};
use crate::scheduler::{JobPoller, PollExit, PollOptions};
use crate::service::Workflow;

#[derive(Parser)]
#[command(name = "regress-worker")]
#[command(about = "CakeML regression test worker", long_about = None)]
#[command(group(ArgGroup::new("action").args(["upload", "abort", "refresh"])))]
struct Cli {
    /// Queue API base URL
    #[arg(long, env = "REGRESS_API_URL")]
    api_url: Option<String>,

    /// Exit when no jobs are waiting instead of sleeping
    #[arg(long)]
    no_poll: bool,

    /// Exit after handling one job
    #[arg(long)]
    no_loop: bool,

    /// Try this job before the waiting list
    #[arg(long, value_name = "ID", conflicts_with = "resume")]
    select: Option<JobId>,

    /// Continue an interrupted job from its resume marker
    #[arg(long, value_name = "ID")]
    resume: Option<JobId>,

    /// Upload artifacts for a finished successful job, then exit
    #[arg(long, value_name = "ID")]
    upload: Option<JobId>,

    /// Mark a stopped job as aborted, then exit
    #[arg(long, value_name = "ID")]
    abort: Option<JobId>,

    /// Ask the queue to refresh its job list, then exit
    #[arg(long)]
    refresh: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "regress_worker=info,regress_client=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let config = load_config(cli.api_url.clone())?;
    info!(
        "Loaded configuration: worker={:?}, api_url={}, workdir={}",
        config.worker_name,
        config.api_url,
        config.workdir.display()
    );

    let api: Arc<dyn QueueApi> = Arc::new(QueueClient::new(
        config.api_url.clone(),
        config.token.clone(),
    ));
    let runner: Arc<dyn CommandRunner> = Arc::new(SystemRunner::new(config.time_program.clone()));

    if cli.refresh {
        api.refresh().await.context("Failed to refresh the queue")?;
        info!("Queue refreshed");
        return Ok(ExitCode::SUCCESS);
    }

    if let Some(id) = cli.abort {
        api.abort(id)
            .await
            .with_context(|| format!("Failed to abort job {}", id))?;
        info!("Job {} aborted", id);
        return Ok(ExitCode::SUCCESS);
    }

    if let Some(id) = cli.upload {
        let workflow = Workflow::new(config, api, runner);
        let uploaded = workflow.upload_finished(id).await?;
        return Ok(if uploaded {
            ExitCode::SUCCESS
        } else {
            ExitCode::FAILURE
        });
    }

    let options = PollOptions {
        no_poll: cli.no_poll,
        no_loop: cli.no_loop,
        select: cli.select,
        resume: cli.resume,
    };

    let poller = JobPoller::new(config, api, runner);
    match poller.run(options).await? {
        PollExit::Idle | PollExit::Done => Ok(ExitCode::SUCCESS),
        PollExit::ResumeFailed => {
            error!("Resumed job failed again, not retrying");
            Ok(ExitCode::FAILURE)
        }
    }
}

/// Loads and validates configuration, preferring the command-line URL
fn load_config(api_url: Option<String>) -> Result<Config> {
    let mut config = Config::from_env().context("Failed to load configuration")?;
    if let Some(url) = api_url {
        config.api_url = url;
    }
    config.validate()?;
    Ok(config)
}
