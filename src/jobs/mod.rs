//! # Background Jobs
//!
//! Durable, retryable background work: scrape, enrich, match and webhook
//! delivery jobs share one queue and one retry policy.
//!
//! - [`JobQueue`] - enqueue, lease, outcome recording, dead-letter replay
//! - [`Worker`] / [`WorkerPool`] - claim loop and graceful drain
//! - [`JobHandler`] / [`HandlerRegistry`] - type-specific execution
//!
//! ## Usage
//!
//! ```rust
//! use enrichment_core::clock::system_clock;
//! use enrichment_core::jobs::{JobQueue, JobQueueConfig};
//! use enrichment_core::models::JobType;
//! use enrichment_core::store::InMemoryJobStore;
//! use std::sync::Arc;
//!
//! # tokio_test::block_on(async {
//! let queue = JobQueue::new(
//!     Arc::new(InMemoryJobStore::new()),
//!     JobQueueConfig::default(),
//!     system_clock(),
//! );
//! let job_id = queue
//!     .enqueue(JobType::Scrape, serde_json::json!({ "county": "montgomery" }))
//!     .await
//!     .unwrap();
//! assert!(queue.get(job_id).await.unwrap().is_some());
//! # });
//! ```

pub mod queue;
pub mod worker;

pub use queue::{JobQueue, JobQueueConfig};
pub use worker::{HandlerRegistry, JobError, JobHandler, JobRunReport, Worker, WorkerPool};
