//! Queue API requests
//!
//! Every request the worker can make, how it is laid out on the wire, and
//! the exact body the queue answers with when a POST succeeds.

use std::fmt;
use std::path::{Path, PathBuf};

use super::error::{CodecError, Result};
use super::percent::percent_encode;
use crate::domain::JobId;

/// HTTP method of a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

/// A queue API request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Waiting,
    Job(JobId),
    Refresh,
    Claim(JobId, String),
    Append(JobId, String),
    Log(JobId, PathBuf),
    Upload(JobId, PathBuf),
    Stop(JobId),
    Abort(JobId),
}

/// Wire form of a request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Encoded {
    pub method: Method,
    pub path: String,
    pub content_type: Option<&'static str>,
    pub body: Vec<u8>,
}

const FORM: &str = "application/x-www-form-urlencoded";
const OCTETS: &str = "application/octet-stream";

impl Request {
    pub fn method(&self) -> Method {
        match self {
            Request::Waiting | Request::Job(_) => Method::Get,
            _ => Method::Post,
        }
    }

    /// First path segment
    pub fn verb(&self) -> &'static str {
        match self {
            Request::Waiting => "waiting",
            Request::Job(_) => "job",
            Request::Refresh => "refresh",
            Request::Claim(..) => "claim",
            Request::Append(..) => "append",
            Request::Log(..) => "log",
            Request::Upload(..) => "upload",
            Request::Stop(_) => "stop",
            Request::Abort(_) => "abort",
        }
    }

    pub fn job_id(&self) -> Option<JobId> {
        match self {
            Request::Waiting | Request::Refresh => None,
            Request::Job(id)
            | Request::Claim(id, _)
            | Request::Append(id, _)
            | Request::Log(id, _)
            | Request::Upload(id, _)
            | Request::Stop(id)
            | Request::Abort(id) => Some(*id),
        }
    }

    /// Request path, `/<verb>[/<id>]`
    pub fn path(&self) -> String {
        match self.job_id() {
            Some(id) => format!("/{}/{}", self.verb(), id),
            None => format!("/{}", self.verb()),
        }
    }

    /// The only response body that counts as success for a POST
    pub fn success_literal(&self) -> Option<&'static str> {
        match self {
            Request::Waiting | Request::Job(_) => None,
            Request::Refresh => Some("Refreshed\n"),
            Request::Claim(..) => Some("Claimed\n"),
            Request::Append(..) => Some("Appended\n"),
            Request::Log(..) => Some("Logged\n"),
            Request::Upload(..) => Some("Uploaded\n"),
            Request::Stop(_) => Some("Stopped\n"),
            Request::Abort(_) => Some("Aborted\n"),
        }
    }

    /// Whether `body` is exactly this request's success literal
    pub fn accepts(&self, body: &str) -> bool {
        self.success_literal() == Some(body)
    }

    /// Lays the request out for the wire, reading attached files
    pub fn encode(&self) -> Result<Encoded> {
        let (content_type, body) = match self {
            Request::Claim(_, name) => (Some(FORM), form_field("name", name)),
            Request::Append(_, line) => (Some(FORM), form_field("line", line)),
            Request::Log(_, file) => (Some(OCTETS), read_file(file)?),
            Request::Upload(_, file) => {
                let name = upload_name(file)?;
                let mut body = format!("name={}&", name).into_bytes();
                body.extend(read_file(file)?);
                (Some(OCTETS), body)
            }
            _ => (None, Vec::new()),
        };

        Ok(Encoded {
            method: self.method(),
            path: self.path(),
            content_type,
            body,
        })
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Request::Waiting => write!(f, "Waiting"),
            Request::Refresh => write!(f, "Refresh"),
            Request::Job(id) => write!(f, "Job({})", id),
            Request::Claim(id, name) => write!(f, "Claim({}, {})", id, name),
            Request::Append(id, line) => write!(f, "Append({}, {:?})", id, line),
            Request::Log(id, file) => write!(f, "Log({}, {})", id, file.display()),
            Request::Upload(id, file) => write!(f, "Upload({}, {})", id, file.display()),
            Request::Stop(id) => write!(f, "Stop({})", id),
            Request::Abort(id) => write!(f, "Abort({})", id),
        }
    }
}

fn form_field(key: &str, value: &str) -> Vec<u8> {
    format!("{}={}", key, percent_encode(value.as_bytes())).into_bytes()
}

fn read_file(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).map_err(|source| CodecError::Io {
        path: path.display().to_string(),
        source,
    })
}

fn upload_name(path: &Path) -> Result<String> {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| CodecError::InvalidFileName(path.display().to_string()))?;

    if name.contains('&') {
        return Err(CodecError::InvalidFileName(name.to_string()));
    }

    Ok(name.to_string())
}

/// Splits an encoded upload body into file name and contents
pub fn split_upload(body: &[u8]) -> Option<(String, &[u8])> {
    let rest = body.strip_prefix(b"name=")?;
    let amp = rest.iter().position(|&b| b == b'&')?;
    let name = std::str::from_utf8(&rest[..amp]).ok()?;
    Some((name.to_string(), &rest[amp + 1..]))
}
