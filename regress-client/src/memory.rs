//! In-memory queue
//!
//! Serves the queue API contract from process memory: requests are encoded
//! exactly as they would be for HTTP and then decoded again, and every job
//! moves through the same forward-only states the real queue enforces.
//! Used to drive the worker in tests and dry runs.

use async_trait::async_trait;
use regress_core::domain::{JobId, JobState};
use regress_core::protocol::{Encoded, Method, Request, parse_form, split_upload};
use std::collections::BTreeMap;
use std::sync::Mutex;

use crate::api::QueueApi;
use crate::error::Result;

/// A job held by [`MemoryQueue`]
#[derive(Debug, Clone)]
pub struct MemoryJob {
    pub state: JobState,
    /// Snapshot text served ahead of the job's output
    pub description: String,
    /// Lines added through `append`
    pub output: Vec<String>,
    /// Name of the worker that claimed the job
    pub worker: Option<String>,
    /// Contents received through `log`
    pub logs: Vec<Vec<u8>>,
    /// File names and contents received through `upload`
    pub uploads: Vec<(String, Vec<u8>)>,
}

#[derive(Default)]
struct QueueState {
    jobs: BTreeMap<JobId, MemoryJob>,
    calls: Vec<String>,
}

/// Queue API served from memory
#[derive(Default)]
pub struct MemoryQueue {
    state: Mutex<QueueState>,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a waiting job
    pub fn insert_job(&self, id: JobId, description: impl Into<String>) {
        let mut state = self.state.lock().unwrap();
        state.jobs.insert(
            id,
            MemoryJob {
                state: JobState::Waiting,
                description: description.into(),
                output: Vec::new(),
                worker: None,
                logs: Vec::new(),
                uploads: Vec::new(),
            },
        );
    }

    /// Forces a job into a state, e.g. one left running by a crashed worker
    pub fn set_state(&self, id: JobId, job_state: JobState) {
        let mut state = self.state.lock().unwrap();
        if let Some(job) = state.jobs.get_mut(&id) {
            job.state = job_state;
        }
    }

    /// Copy of a job
    pub fn get_job(&self, id: JobId) -> Option<MemoryJob> {
        self.state.lock().unwrap().jobs.get(&id).cloned()
    }

    /// Every POST received so far, in order, e.g. `Append(Starting basis)`
    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    fn handle(&self, encoded: Encoded) -> String {
        let mut segments = encoded.path.trim_start_matches('/').splitn(2, '/');
        let verb = segments.next().unwrap_or_default();
        let id = match segments.next().map(str::parse::<JobId>).transpose() {
            Ok(id) => id,
            Err(e) => return format!("Error: {}\n", e),
        };

        let mut state = self.state.lock().unwrap();

        match (encoded.method, verb, id) {
            (Method::Get, "waiting", None) => {
                let ids: Vec<String> = state
                    .jobs
                    .iter()
                    .filter(|(_, job)| job.state == JobState::Waiting)
                    .map(|(id, _)| id.to_string())
                    .collect();
                format!("{}\n", ids.join(" "))
            }
            (Method::Get, "job", Some(id)) => match state.jobs.get(&id) {
                Some(job) => {
                    let mut text = job.description.clone();
                    for line in &job.output {
                        text.push_str(line);
                        text.push('\n');
                    }
                    text
                }
                None => format!("Error: no job {}\n", id),
            },
            (Method::Post, "refresh", None) => {
                state.calls.push("Refresh".to_string());
                "Refreshed\n".to_string()
            }
            (Method::Post, verb, Some(id)) => state.post(verb, id, &encoded.body),
            _ => format!("Error: unknown request {}\n", encoded.path),
        }
    }
}

impl QueueState {
    fn post(&mut self, verb: &str, id: JobId, body: &[u8]) -> String {
        let field = |key: &str| -> std::result::Result<String, String> {
            let body = std::str::from_utf8(body).map_err(|e| e.to_string())?;
            parse_form(body)
                .map_err(|e| e.to_string())?
                .into_iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v)
                .ok_or_else(|| format!("missing {} field", key))
        };

        let (call, required): (&str, &[JobState]) = match verb {
            "claim" => ("Claim", &[JobState::Waiting]),
            "append" => ("Append", &[JobState::Running]),
            "log" => ("Log", &[JobState::Running]),
            // Artifacts may follow a finished build
            "upload" => ("Upload", &[JobState::Running, JobState::Stopped]),
            "stop" => ("Stop", &[JobState::Running]),
            // Abort is only accepted for stopped jobs
            "abort" => ("Abort", &[JobState::Stopped]),
            _ => return format!("Error: unknown verb {}\n", verb),
        };

        let detail = match verb {
            "append" => field("line").unwrap_or_default(),
            "upload" => split_upload(body).map(|(name, _)| name).unwrap_or_default(),
            _ => id.to_string(),
        };
        self.calls.push(format!("{}({})", call, detail));

        let Some(job) = self.jobs.get_mut(&id) else {
            return format!("Error: no job {}\n", id);
        };
        if !required.contains(&job.state) {
            return format!("Error: job {} is {:?}\n", id, job.state);
        }

        match verb {
            "claim" => match field("name") {
                Ok(name) => {
                    job.worker = Some(name);
                    job.state = JobState::Running;
                    "Claimed\n".to_string()
                }
                Err(e) => format!("Error: {}\n", e),
            },
            "append" => match field("line") {
                Ok(line) => {
                    job.output.push(line);
                    "Appended\n".to_string()
                }
                Err(e) => format!("Error: {}\n", e),
            },
            "log" => {
                job.logs.push(body.to_vec());
                "Logged\n".to_string()
            }
            "upload" => match split_upload(body) {
                Some((name, contents)) => {
                    job.uploads.push((name, contents.to_vec()));
                    "Uploaded\n".to_string()
                }
                None => "Error: malformed upload\n".to_string(),
            },
            "stop" => {
                job.state = JobState::Stopped;
                "Stopped\n".to_string()
            }
            _ => {
                job.state = JobState::Aborted;
                "Aborted\n".to_string()
            }
        }
    }
}

#[async_trait]
impl QueueApi for MemoryQueue {
    async fn transmit(&self, request: &Request) -> Result<String> {
        Ok(self.handle(request.encode()?))
    }
}
