//! # Workers
//!
//! A [`Worker`] repeatedly leases the earliest eligible job, dispatches it to
//! the handler registered for its type, and records the outcome on the
//! [`JobQueue`]. A [`WorkerPool`] runs several workers against the same
//! store; the per-job lease keeps retries of one job strictly sequential.
//!
//! Claimed jobs always run to an outcome. Shutdown is only observed between
//! jobs, so [`WorkerPool::shutdown`] drains in-flight work before returning.

use super::queue::JobQueue;
use crate::error::GuardResult;
use crate::models::{Job, JobStatus, JobType};
use async_trait::async_trait;
use futures::FutureExt;
use std::any::Any;
use std::collections::HashMap;
use std::fmt::Debug;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Outcome reported by a [`JobHandler`]
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JobError {
    /// Counted against the job's attempts; retried with backoff while attempts remain
    #[error("retryable: {0}")]
    Retryable(String),

    /// Moves the job straight to `failed_terminal`
    #[error("permanent: {0}")]
    Permanent(String),
}

impl JobError {
    pub fn retryable(message: impl Into<String>) -> Self {
        JobError::Retryable(message.into())
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        JobError::Permanent(message.into())
    }

    pub fn message(&self) -> &str {
        match self {
            JobError::Retryable(message) | JobError::Permanent(message) => message,
        }
    }
}

/// Type-specific job execution
#[async_trait]
pub trait JobHandler: Send + Sync + Debug {
    fn job_type(&self) -> JobType;

    async fn handle(&self, job: &Job) -> Result<(), JobError>;
}

/// Handlers keyed by the job type they execute
#[derive(Debug, Default, Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<JobType, Arc<dyn JobHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler, replacing any previous one for the same type
    pub fn register(&mut self, handler: Arc<dyn JobHandler>) {
        let job_type = handler.job_type();
        if self.handlers.insert(job_type, handler).is_some() {
            warn!(job_type = %job_type, "Replacing previously registered job handler");
        }
    }

    pub fn with_handler(mut self, handler: Arc<dyn JobHandler>) -> Self {
        self.register(handler);
        self
    }

    pub fn get(&self, job_type: JobType) -> Option<&Arc<dyn JobHandler>> {
        self.handlers.get(&job_type)
    }

    pub fn job_types(&self) -> Vec<JobType> {
        let mut types: Vec<JobType> = self.handlers.keys().copied().collect();
        types.sort_by_key(|t| t.as_str());
        types
    }
}

/// What one `run_once` did
#[derive(Debug, Clone, PartialEq)]
pub struct JobRunReport {
    pub job_id: Uuid,
    pub job_type: JobType,
    pub attempts: i32,
    pub status: JobStatus,
}

#[derive(Debug, Clone)]
pub struct Worker {
    id: String,
    queue: Arc<JobQueue>,
    handlers: Arc<HandlerRegistry>,
    poll_interval: Duration,
}

impl Worker {
    pub fn new(
        id: impl Into<String>,
        queue: Arc<JobQueue>,
        handlers: Arc<HandlerRegistry>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            id: id.into(),
            queue,
            handlers,
            poll_interval,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Claim and execute at most one job
    pub async fn run_once(&self) -> GuardResult<Option<JobRunReport>> {
        let Some(job) = self.queue.claim(&self.id).await? else {
            return Ok(None);
        };

        let outcome = match self.handlers.get(job.job_type) {
            Some(handler) => match AssertUnwindSafe(handler.handle(&job)).catch_unwind().await {
                Ok(outcome) => outcome,
                Err(panic) => {
                    let message = panic_message(panic.as_ref());
                    error!(
                        worker_id = %self.id,
                        job_id = %job.id,
                        job_type = %job.job_type,
                        panic = %message,
                        "Job handler panicked"
                    );
                    Err(JobError::retryable(format!("handler panicked: {message}")))
                }
            },
            None => Err(JobError::permanent(format!(
                "no handler registered for job type '{}'",
                job.job_type
            ))),
        };

        let updated = match outcome {
            Ok(()) => self.queue.complete(&job, &self.id).await?,
            Err(JobError::Retryable(message)) => self.queue.fail(&job, &self.id, &message).await?,
            Err(JobError::Permanent(message)) => {
                self.queue.fail_terminal(&job, &self.id, &message).await?
            }
        };

        Ok(Some(JobRunReport {
            job_id: updated.id,
            job_type: updated.job_type,
            attempts: updated.attempts,
            status: updated.status,
        }))
    }

    /// Poll until `shutdown` flips to true. The flag is checked between jobs only.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(worker_id = %self.id, "🚀 Worker started");

        loop {
            if *shutdown.borrow() {
                break;
            }

            match self.run_once().await {
                Ok(Some(report)) => {
                    debug!(
                        worker_id = %self.id,
                        job_id = %report.job_id,
                        status = %report.status,
                        "Job attempt finished"
                    );
                    continue;
                }
                Ok(None) => {}
                Err(e) => {
                    // Lease loss or store failure; the job is left for lease expiry
                    error!(worker_id = %self.id, code = e.code(), error = %e, "Worker iteration failed");
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!(worker_id = %self.id, "🛑 Worker stopped");
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Handle to a set of running workers
#[derive(Debug)]
pub struct WorkerPool {
    shutdown_sender: Option<watch::Sender<bool>>,
    handles: Vec<JoinHandle<()>>,
    worker_ids: Vec<String>,
}

impl WorkerPool {
    /// Spawn `worker_count` workers sharing `queue` and `handlers`
    pub fn start(
        name: &str,
        worker_count: usize,
        queue: Arc<JobQueue>,
        handlers: Arc<HandlerRegistry>,
        poll_interval: Duration,
    ) -> Self {
        let (shutdown_sender, shutdown_receiver) = watch::channel(false);
        let mut handles = Vec::with_capacity(worker_count);
        let mut worker_ids = Vec::with_capacity(worker_count);

        for index in 0..worker_count {
            let worker = Worker::new(
                format!("{name}-{index}-{}", Uuid::new_v4().simple()),
                queue.clone(),
                handlers.clone(),
                poll_interval,
            );
            worker_ids.push(worker.id().to_string());
            handles.push(tokio::spawn(worker.run(shutdown_receiver.clone())));
        }

        info!(
            pool = %name,
            worker_count = worker_count,
            job_types = ?handlers.job_types(),
            "✅ Worker pool started"
        );

        Self {
            shutdown_sender: Some(shutdown_sender),
            handles,
            worker_ids,
        }
    }

    pub fn is_running(&self) -> bool {
        self.shutdown_sender.is_some() && self.handles.iter().any(|h| !h.is_finished())
    }

    pub fn worker_ids(&self) -> &[String] {
        &self.worker_ids
    }

    /// Stop claiming new jobs and wait for in-flight jobs to finish
    pub async fn drain(&mut self) {
        if let Some(sender) = self.shutdown_sender.take() {
            info!(workers = self.handles.len(), "🛑 Worker pool shutdown requested");
            let _ = sender.send(true);
        }

        for handle in self.handles.drain(..) {
            if let Err(e) = handle.await {
                error!(error = %e, "Worker task ended abnormally");
            }
        }
    }

    pub async fn shutdown(mut self) {
        self.drain().await;
    }
}
