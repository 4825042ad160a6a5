//! Regress HTTP Client
//!
//! A small client for the regression-test queue API.
//!
//! The queue speaks plain text: GETs return a list of ids or a job
//! description, and every POST answers with one fixed success literal or a
//! body starting with `Error:`.
//!
//! # Example
//!
//! ```no_run
//! use regress_client::{QueueApi, QueueClient};
//!
//! #[tokio::main]
//! async fn main() -> regress_client::Result<()> {
//!     let client = QueueClient::new("https://cakeml.org/regression.cgi/api", "token");
//!
//!     for id in client.waiting().await? {
//!         println!("waiting: {}", id);
//!     }
//!     Ok(())
//! }
//! ```

mod api;
pub mod error;
pub mod memory;

// Re-export commonly used types
pub use api::QueueApi;
pub use error::{ClientError, Result};
pub use memory::MemoryQueue;

use async_trait::async_trait;
use regress_core::protocol::{ERROR_PREFIX, Method, Request};
use reqwest::Client;
use reqwest::header::CONTENT_TYPE;
use tracing::debug;

/// HTTP client for the queue API
#[derive(Debug, Clone)]
pub struct QueueClient {
    /// Base URL of the API (e.g., "https://cakeml.org/regression.cgi/api")
    base_url: String,
    /// Bearer token sent with every request
    token: String,
    /// HTTP client instance
    client: Client,
}

impl QueueClient {
    /// Create a new queue client
    ///
    /// # Arguments
    /// * `base_url` - The base URL of the queue API
    /// * `token` - Bearer token for the `Authorization` header
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self::with_client(base_url, token, Client::new())
    }

    /// Create a new queue client with a custom HTTP client
    ///
    /// This allows you to configure proxies, TLS settings, etc.
    pub fn with_client(
        base_url: impl Into<String>,
        token: impl Into<String>,
        client: Client,
    ) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.into(),
            client,
        }
    }

    /// Get the base URL of the queue API
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    // =============================================================================
    // Response Handlers
    // =============================================================================

    /// Reads the response body
    ///
    /// `Error:` bodies are passed through whatever the status code, so the
    /// caller sees the queue's own message. Other non-success statuses
    /// become [`ClientError::ApiError`].
    async fn handle_response(&self, response: reqwest::Response) -> Result<String> {
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() && !body.starts_with(ERROR_PREFIX) {
            return Err(ClientError::api_error(status.as_u16(), body));
        }

        Ok(body)
    }
}

#[async_trait]
impl QueueApi for QueueClient {
    async fn transmit(&self, request: &Request) -> Result<String> {
        let encoded = request.encode()?;
        let url = format!("{}{}", self.base_url, encoded.path);

        debug!("{:?} {}", encoded.method, url);

        let mut builder = match encoded.method {
            Method::Get => self.client.get(&url),
            Method::Post => self.client.post(&url),
        }
        .bearer_auth(&self.token);

        if let Some(content_type) = encoded.content_type {
            builder = builder.header(CONTENT_TYPE, content_type);
        }

        let response = builder.body(encoded.body).send().await?;

        self.handle_response(response).await
    }
}
