//! Request and response envelopes.
//!
//! Both serialize to field-named JSON so independently written providers can
//! decode args and results without sharing Rust types:
//!
//! ```text
//! {"id":"…","task":"zfs-list","taskUrl":"unix:///…","args":{…},"responseHook":"tcp://…"}
//! {"id":"…","result":{…}}
//! {"id":"…","error":{"kind":"task","message":"…","context":{…}}}
//! ```
//!
//! Handlers attached to a [`Request`] are local only and never serialized.

use crate::domain::address::Address;
use crate::domain::correlation::RequestId;
use crate::domain::error::{CommError, TaskError};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Callback invoked with the originating request and its final response.
pub type ResponseHandler = Arc<dyn Fn(&Request, &Response) + Send + Sync>;

#[derive(Clone, Default)]
pub(crate) struct Handlers {
    pub(crate) success: Option<ResponseHandler>,
    pub(crate) error: Option<ResponseHandler>,
}

impl fmt::Debug for Handlers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handlers")
            .field("success", &self.success.is_some())
            .field("error", &self.error.is_some())
            .finish()
    }
}

/// A task invocation.
///
/// The ID is generated at construction and never changes. The response hook
/// is stamped by the [`Tracker`](crate::Tracker) that tracks the request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Request {
    id: RequestId,
    task: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    task_url: Option<Address>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    args: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    response_hook: Option<Address>,
    #[serde(skip)]
    handlers: Handlers,
}

impl Request {
    pub fn builder(task: impl Into<String>) -> RequestBuilder {
        RequestBuilder::new(task)
    }

    /// Request with no target, args or handlers.
    pub fn new(task: impl Into<String>) -> Result<Self, CommError> {
        Self::builder(task).build()
    }

    pub fn id(&self) -> RequestId {
        self.id
    }

    pub fn task(&self) -> &str {
        &self.task
    }

    /// Process that should execute the task. `None` routes to the coordinator.
    pub fn task_url(&self) -> Option<&Address> {
        self.task_url.as_ref()
    }

    pub fn args(&self) -> &Value {
        &self.args
    }

    pub fn response_hook(&self) -> Option<&Address> {
        self.response_hook.as_ref()
    }

    /// Decode args into the task's own argument type.
    pub fn decode_args<T: DeserializeOwned>(&self) -> Result<T, CommError> {
        T::deserialize(&self.args).map_err(|e| {
            CommError::Serialization(format!("task {} args: {e}", self.task))
        })
    }

    pub fn has_handlers(&self) -> bool {
        self.handlers.success.is_some() || self.handlers.error.is_some()
    }

    pub(crate) fn set_response_hook(&mut self, hook: Address) {
        self.response_hook = Some(hook);
    }

    pub(crate) fn handlers(&self) -> &Handlers {
        &self.handlers
    }
}

/// Builder for [`Request`]. Performs no I/O.
pub struct RequestBuilder {
    task: String,
    task_url: Option<Address>,
    args: Result<Value, String>,
    handlers: Handlers,
}

impl RequestBuilder {
    fn new(task: impl Into<String>) -> Self {
        Self {
            task: task.into(),
            task_url: None,
            args: Ok(Value::Null),
            handlers: Handlers::default(),
        }
    }

    pub fn target(mut self, address: Address) -> Self {
        self.task_url = Some(address);
        self
    }

    pub fn args<T: Serialize>(mut self, args: &T) -> Self {
        self.args = serde_json::to_value(args).map_err(|e| e.to_string());
        self
    }

    pub fn on_success<F>(mut self, handler: F) -> Self
    where
        F: Fn(&Request, &Response) + Send + Sync + 'static,
    {
        self.handlers.success = Some(Arc::new(handler));
        self
    }

    pub fn on_error<F>(mut self, handler: F) -> Self
    where
        F: Fn(&Request, &Response) + Send + Sync + 'static,
    {
        self.handlers.error = Some(Arc::new(handler));
        self
    }

    pub fn build(self) -> Result<Request, CommError> {
        if self.task.trim().is_empty() {
            return Err(CommError::InvalidArgument("task name is empty".into()));
        }
        let args = self.args.map_err(|e| {
            CommError::InvalidArgument(format!("task {} args not serializable: {e}", self.task))
        })?;

        Ok(Request {
            id: RequestId::new(),
            task: self.task,
            task_url: self.task_url,
            args,
            response_hook: None,
            handlers: self.handlers,
        })
    }
}

/// Outcome of a request. At most one of `result`/`error` is present; the
/// presence of `error` alone decides success.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "RawResponse")]
pub struct Response {
    id: RequestId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<TaskError>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct RawResponse {
    id: RequestId,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<TaskError>,
}

impl TryFrom<RawResponse> for Response {
    type Error = String;

    fn try_from(raw: RawResponse) -> Result<Self, Self::Error> {
        if raw.error.is_some() && raw.result.as_ref().is_some_and(|r| !r.is_null()) {
            return Err(format!("response {} carries both result and error", raw.id));
        }
        Ok(Response {
            id: raw.id,
            result: if raw.error.is_some() { None } else { raw.result },
            error: raw.error,
        })
    }
}

impl Response {
    /// Successful response with a serializable result.
    pub fn success<T: Serialize>(request_id: RequestId, result: &T) -> Result<Self, CommError> {
        let value = serde_json::to_value(result)?;
        Ok(Self::ok(request_id, value))
    }

    pub fn ok(request_id: RequestId, result: Value) -> Self {
        Self {
            id: request_id,
            result: (!result.is_null()).then_some(result),
            error: None,
        }
    }

    pub fn failure(request_id: RequestId, error: TaskError) -> Self {
        Self {
            id: request_id,
            result: None,
            error: Some(error),
        }
    }

    pub(crate) fn timeout(request_id: RequestId, after: Duration) -> Self {
        Self::failure(request_id, TaskError::timeout(request_id, after))
    }

    pub fn from_outcome(request_id: RequestId, outcome: Result<Value, TaskError>) -> Self {
        match outcome {
            Ok(value) => Self::ok(request_id, value),
            Err(error) => Self::failure(request_id, error),
        }
    }

    pub fn id(&self) -> RequestId {
        self.id
    }

    pub fn result(&self) -> Option<&Value> {
        self.result.as_ref()
    }

    pub fn error(&self) -> Option<&TaskError> {
        self.error.as_ref()
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    pub fn is_timeout(&self) -> bool {
        self.error.as_ref().is_some_and(TaskError::is_timeout)
    }

    /// Decode the result into a task-specific type. An error response
    /// yields [`CommError::Task`].
    pub fn decode_result<T: DeserializeOwned>(&self) -> Result<T, CommError> {
        if let Some(error) = &self.error {
            return Err(CommError::Task(error.clone()));
        }
        let value = self.result.as_ref().unwrap_or(&Value::Null);
        T::deserialize(value).map_err(|e| CommError::Serialization(format!("response {}: {e}", self.id)))
    }

    pub fn into_result(self) -> Result<Option<Value>, TaskError> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(self.result),
        }
    }
}
