//! Queue API operations
//!
//! `QueueApi` has a single required method that moves one request over
//! the wire. Everything else is built on top of it, so the HTTP client and
//! the in-memory queue share the same response handling.

use async_trait::async_trait;
use regress_core::domain::JobId;
use regress_core::protocol::{ERROR_PREFIX, Request, parse_waiting};
use std::path::Path;
use tracing::debug;

use crate::error::{ClientError, Result};

#[async_trait]
pub trait QueueApi: Send + Sync {
    /// Sends a request and returns the raw response body
    async fn transmit(&self, request: &Request) -> Result<String>;

    /// Sends a request, turning `Error:` bodies into [`ClientError::Rejected`]
    async fn send(&self, request: &Request) -> Result<String> {
        let body = self.transmit(request).await?;
        if body.starts_with(ERROR_PREFIX) {
            return Err(ClientError::Rejected {
                request: request.to_string(),
                message: body.trim_end().to_string(),
            });
        }
        Ok(body)
    }

    /// Sends a POST and requires its exact success literal back
    async fn post(&self, request: Request) -> Result<()> {
        let body = self.send(&request).await?;
        if request.accepts(&body) {
            Ok(())
        } else {
            Err(ClientError::UnexpectedResponse {
                request: request.to_string(),
                body,
            })
        }
    }

    /// Lists the ids of waiting jobs, oldest first
    async fn waiting(&self) -> Result<Vec<JobId>> {
        let body = self.send(&Request::Waiting).await?;
        Ok(parse_waiting(&body)?)
    }

    /// Fetches a job description
    async fn job(&self, id: JobId) -> Result<String> {
        self.send(&Request::Job(id)).await
    }

    /// Tries to claim a waiting job
    ///
    /// Returns `Ok(false)` when the queue answers with anything other than
    /// the claim literal: another worker got there first.
    async fn claim(&self, id: JobId, name: &str) -> Result<bool> {
        let request = Request::Claim(id, name.to_string());
        match self.send(&request).await {
            Ok(body) if request.accepts(&body) => Ok(true),
            Ok(body) => {
                debug!("Claim of job {} answered with {:?}", id, body);
                Ok(false)
            }
            Err(ClientError::Rejected { message, .. }) => {
                debug!("Claim of job {} rejected: {}", id, message);
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    async fn refresh(&self) -> Result<()> {
        self.post(Request::Refresh).await
    }

    /// Appends a progress line to a running job
    async fn append(&self, id: JobId, line: &str) -> Result<()> {
        self.post(Request::Append(id, line.to_string())).await
    }

    /// Attaches a file's contents to a running job's log
    async fn log(&self, id: JobId, file: &Path) -> Result<()> {
        self.post(Request::Log(id, file.to_path_buf())).await
    }

    /// Uploads an artifact for a running job
    async fn upload(&self, id: JobId, file: &Path) -> Result<()> {
        self.post(Request::Upload(id, file.to_path_buf())).await
    }

    async fn stop(&self, id: JobId) -> Result<()> {
        self.post(Request::Stop(id)).await
    }

    async fn abort(&self, id: JobId) -> Result<()> {
        self.post(Request::Abort(id)).await
    }
}
