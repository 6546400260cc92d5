//! Background asset jobs with timeout, retry, backoff, and dead-letter handling.
//!
//! ## Design
//!
//! - Every upload/removal runs as a tracked tokio task
//! - Each attempt is bounded by a timeout; failures retry per `RetryPolicy`
//! - Exhausted jobs are dead-lettered and logged at `error`
//! - Callers get a `JobHandle` they may await, cancel, or drop (fire-and-forget)
//!
//! ## Components
//!
//! - `AssetJob`: what to do (upload bytes / remove a key)
//! - `Job`: lifecycle state and attempt count
//! - `AssetJobRunner`: spawns and drives jobs, caps concurrency
//! - `DeadLetterEntry`: failed jobs kept for inspection

pub mod runner;
pub mod types;

pub use runner::{AssetJobRunner, JobHandle, JobRunnerConfig, RunnerStats};
pub use types::{AssetJob, Backoff, DeadLetterEntry, Job, JobId, JobStatus, RetryPolicy};
