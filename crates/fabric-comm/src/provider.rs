//! Provider side of the fabric: serve named tasks on an address.
//!
//! A provider decodes inbound [`Request`]s, runs the registered
//! [`TaskHandler`] and sends the [`Response`] to the request's response hook.
//! Requests without a hook run fire-and-forget.

use crate::domain::address::Address;
use crate::domain::config::TransportConfig;
use crate::domain::envelope::{Request, Response};
use crate::domain::error::{CommError, CommResult, ErrorKind, TaskError};
use crate::transport::{EnvelopeListener, Sender};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Implementation of one named task.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn run(&self, request: &Request) -> Result<Value, TaskError>;
}

/// Adapter running a synchronous closure as a task.
pub struct FnTask<F>(pub F);

#[async_trait]
impl<F> TaskHandler for FnTask<F>
where
    F: Fn(&Request) -> Result<Value, TaskError> + Send + Sync,
{
    async fn run(&self, request: &Request) -> Result<Value, TaskError> {
        (self.0)(request)
    }
}

type TaskTable = Arc<RwLock<HashMap<String, Arc<dyn TaskHandler>>>>;

struct Running {
    address: Address,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

pub struct Provider {
    listen: Address,
    sender: Sender,
    tasks: TaskTable,
    running: Mutex<Option<Running>>,
}

impl Provider {
    pub fn new(listen: Address, transport: TransportConfig) -> Self {
        Self {
            listen,
            sender: Sender::new(transport),
            tasks: Arc::new(RwLock::new(HashMap::new())),
            running: Mutex::new(None),
        }
    }

    /// Register `handler` under `task`. Tasks may be added while running.
    pub fn register<H>(&self, task: impl Into<String>, handler: H) -> CommResult<()>
    where
        H: TaskHandler + 'static,
    {
        let task = task.into();
        if task.trim().is_empty() {
            return Err(CommError::InvalidArgument("task name must not be empty".into()));
        }

        let mut tasks = self.tasks.write();
        if tasks.contains_key(&task) {
            return Err(CommError::DuplicateName(task));
        }
        tasks.insert(task, Arc::new(handler));
        Ok(())
    }

    pub fn register_fn<F>(&self, task: impl Into<String>, handler: F) -> CommResult<()>
    where
        F: Fn(&Request) -> Result<Value, TaskError> + Send + Sync + 'static,
    {
        self.register(task, FnTask(handler))
    }

    pub fn task_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tasks.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn url(&self) -> Option<Address> {
        self.running.lock().as_ref().map(|running| running.address.clone())
    }

    /// Bind and start serving. Idempotent; returns the bound address.
    pub async fn start(&self) -> CommResult<Address> {
        if let Some(address) = self.url() {
            return Ok(address);
        }

        let listener = EnvelopeListener::bind(&self.listen).await?;
        let address = listener.local_address().clone();
        let (shutdown, shutdown_rx) = watch::channel(false);

        let tasks = self.tasks.clone();
        let sender = self.sender.clone();
        let task = tokio::spawn(listener.serve(
            move |request: Request| {
                tokio::spawn(dispatch(tasks.clone(), sender.clone(), request));
            },
            shutdown_rx,
        ));

        let mut running = self.running.lock();
        if let Some(existing) = running.as_ref() {
            let _ = shutdown.send(true);
            return Ok(existing.address.clone());
        }
        *running = Some(Running {
            address: address.clone(),
            shutdown,
            task,
        });
        drop(running);

        info!(address = %address, tasks = ?self.task_names(), "Provider started");
        Ok(address)
    }

    /// Stop accepting requests. Tasks already dispatched run to completion.
    pub async fn stop(&self) {
        let Some(running) = self.running.lock().take() else {
            return;
        };
        let _ = running.shutdown.send(true);
        if let Err(e) = running.task.await {
            error!(error = %e, "Provider listener failed during shutdown");
        }
        info!(address = %running.address, "Provider stopped");
    }
}

impl Drop for Provider {
    fn drop(&mut self) {
        if let Some(running) = self.running.lock().as_ref() {
            let _ = running.shutdown.send(true);
        }
    }
}

async fn dispatch(tasks: TaskTable, sender: Sender, request: Request) {
    let started = Instant::now();
    let handler = tasks.read().get(request.task()).cloned();

    let outcome = match handler {
        Some(handler) => handler.run(&request).await,
        None => Err(TaskError::new(
            ErrorKind::TaskNotFound,
            format!("no task named {:?}", request.task()),
        )
        .with_context("task", request.task())),
    };
    let response = Response::from_outcome(request.id(), outcome);

    debug!(
        request_id = %request.id(),
        task = request.task(),
        success = response.is_success(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Task finished"
    );

    let Some(hook) = request.response_hook() else {
        if let Some(error) = response.error() {
            warn!(request_id = %request.id(), task = request.task(), error = %error, "Fire-and-forget task failed");
        }
        return;
    };

    if let Err(e) = sender.respond(hook, &response).await {
        warn!(
            request_id = %request.id(),
            hook = %hook,
            error = %e,
            "Failed to deliver response"
        );
    }
}
