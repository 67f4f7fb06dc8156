//! Error types for the messaging fabric.
//!
//! Two layers:
//!
//! - [`CommError`]: returned synchronously to the immediate caller
//!   (construction, registration, send, bind).
//! - [`TaskError`]: the structured error carried inside a
//!   [`Response`](crate::Response). Task failures and synthesized timeouts
//!   travel this way and are never raised across the async boundary.

use crate::domain::correlation::RequestId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Classification of a [`TaskError`] on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The request was malformed.
    InvalidArgument,
    /// An envelope or payload could not be encoded or decoded.
    Serialization,
    /// A destination could not be reached.
    TransportUnavailable,
    /// No response arrived before the deadline.
    Timeout,
    /// The provider has no task registered under the requested name.
    TaskNotFound,
    /// Failure raised by the task implementation itself.
    Task,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::InvalidArgument => "invalid argument",
            ErrorKind::Serialization => "serialization error",
            ErrorKind::TransportUnavailable => "transport unavailable",
            ErrorKind::Timeout => "timeout",
            ErrorKind::TaskNotFound => "task not found",
            ErrorKind::Task => "task error",
        };
        f.write_str(s)
    }
}

/// Structured error carried inside a response.
///
/// `context` holds free-form key/value detail (offending args, expected vs
/// actual values) and round-trips across process boundaries.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[error("{kind}: {message}")]
pub struct TaskError {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub context: BTreeMap<String, serde_json::Value>,
}

impl TaskError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            context: BTreeMap::new(),
        }
    }

    /// Error raised by a task implementation.
    pub fn task(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Task, message)
    }

    /// Synthesized error for a request whose deadline passed.
    pub fn timeout(request_id: RequestId, after: Duration) -> Self {
        CommError::Timeout {
            operation: format!("request {request_id}"),
            after,
        }
        .to_task_error()
        .with_context("request_id", request_id.to_string())
    }

    /// Attach a context entry. Values that fail to serialize are stored as null.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        let value = serde_json::to_value(value).unwrap_or(serde_json::Value::Null);
        self.context.insert(key.into(), value);
        self
    }

    pub fn is_timeout(&self) -> bool {
        self.kind == ErrorKind::Timeout
    }
}

/// Errors returned synchronously by fabric operations.
#[derive(Debug, Error)]
pub enum CommError {
    /// Malformed request at construction time.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Encode/decode failure.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Destination could not be reached.
    #[error("transport unavailable: {address}: {reason}")]
    TransportUnavailable { address: String, reason: String },

    /// A write or delivery acknowledgement exceeded its time limit.
    #[error("{operation} timed out after {after:?}")]
    Timeout { operation: String, after: Duration },

    /// An address string could not be parsed.
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    /// The request ID is already registered with this tracker.
    #[error("request {0} is already tracked")]
    AlreadyTracked(RequestId),

    /// The name is already used within the multi-request group.
    #[error("duplicate request name: {0}")]
    DuplicateName(String),

    /// Tracking timeouts must be strictly positive.
    #[error("timeout must be greater than zero")]
    InvalidTimeout,

    /// The tracker is not listening, so no response could ever arrive.
    #[error("tracker is not running")]
    NotRunning,

    /// The listening endpoint could not be bound.
    #[error("failed to bind {address}: {reason}")]
    Bind { address: String, reason: String },

    /// The receiver negatively acknowledged a delivered envelope.
    #[error("delivery rejected: {0}")]
    Rejected(TaskError),

    /// The tracked entry was removed before it resolved.
    #[error("request {0} was removed before resolving")]
    Cancelled(RequestId),

    /// Task-level failure surfaced from a response.
    #[error(transparent)]
    Task(#[from] TaskError),
}

impl CommError {
    /// Wire-level equivalent, used when a failure must travel inside a response.
    pub fn to_task_error(&self) -> TaskError {
        match self {
            CommError::Task(e) | CommError::Rejected(e) => e.clone(),
            CommError::InvalidArgument(_) | CommError::InvalidAddress(_) => {
                TaskError::new(ErrorKind::InvalidArgument, self.to_string())
            }
            CommError::Serialization(_) => TaskError::new(ErrorKind::Serialization, self.to_string()),
            CommError::TransportUnavailable { address, .. } => {
                TaskError::new(ErrorKind::TransportUnavailable, self.to_string())
                    .with_context("address", address)
            }
            CommError::Timeout { after, .. } => TaskError::new(ErrorKind::Timeout, self.to_string())
                .with_context("timeout_ms", after.as_millis() as u64),
            _ => TaskError::task(self.to_string()),
        }
    }
}

/// Lets task implementations use `?` on fabric calls such as
/// [`Request::decode_args`](crate::Request::decode_args).
impl From<CommError> for TaskError {
    fn from(e: CommError) -> Self {
        e.to_task_error()
    }
}

impl From<serde_json::Error> for CommError {
    fn from(e: serde_json::Error) -> Self {
        CommError::Serialization(e.to_string())
    }
}

pub type CommResult<T> = Result<T, CommError>;
