//! Async runner for asset jobs.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{oneshot, Semaphore};
use tokio::task::{AbortHandle, JoinSet};
use tracing::{debug, error, info, warn};

use crate::files::{FileStore, FileStoreError};

use super::types::{AssetJob, DeadLetterEntry, Job, JobId, JobStatus, RetryPolicy};

/// Runner configuration.
#[derive(Debug, Clone)]
pub struct JobRunnerConfig {
    /// Retry policy applied to every job
    pub retry: RetryPolicy,
    /// Upper bound for a single attempt
    pub attempt_timeout: Duration,
    /// Maximum jobs touching the file store at once
    pub max_concurrent: usize,
}

impl Default for JobRunnerConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            attempt_timeout: Duration::from_secs(30),
            max_concurrent: 4,
        }
    }
}

impl JobRunnerConfig {
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    pub fn with_max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent = max.max(1);
        self
    }
}

/// Runner statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunnerStats {
    pub jobs_submitted: u64,
    pub jobs_completed: u64,
    pub jobs_key_taken: u64,
    pub jobs_dead_lettered: u64,
}

/// Handle to one submitted job.
///
/// Dropping it leaves the job running.
#[derive(Debug)]
pub struct JobHandle {
    id: JobId,
    kind: &'static str,
    storage_key: String,
    result: oneshot::Receiver<Job>,
    abort: AbortHandle,
}

impl JobHandle {
    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn storage_key(&self) -> &str {
        &self.storage_key
    }

    /// Wait for a terminal status. A cancelled (aborted) job reports `Cancelled`.
    pub async fn wait(self) -> JobStatus {
        match self.result.await {
            Ok(job) => job.status,
            Err(_) => JobStatus::Cancelled,
        }
    }

    /// Abort the job at its next await point.
    pub fn cancel(&self) {
        info!(job_id = %self.id, kind = self.kind, storage_key = %self.storage_key, "asset job cancelled");
        self.abort.abort();
    }
}

struct Shared {
    files: Arc<dyn FileStore>,
    config: JobRunnerConfig,
    permits: Semaphore,
    dead_letters: Mutex<Vec<DeadLetterEntry>>,
    stats: Mutex<RunnerStats>,
}

impl Shared {
    fn record(&self, update: impl FnOnce(&mut RunnerStats)) {
        update(&mut self.stats.lock().unwrap_or_else(PoisonError::into_inner));
    }
}

/// Runs uploads and removals against the file store in the background.
///
/// Every job is tracked; [`AssetJobRunner::drain`] waits for all of them.
pub struct AssetJobRunner {
    shared: Arc<Shared>,
    tasks: Mutex<JoinSet<()>>,
}

impl AssetJobRunner {
    pub fn new(files: Arc<dyn FileStore>, config: JobRunnerConfig) -> Self {
        let permits = Semaphore::new(config.max_concurrent.max(1));
        Self {
            shared: Arc::new(Shared {
                files,
                config,
                permits,
                dead_letters: Mutex::new(Vec::new()),
                stats: Mutex::new(RunnerStats::default()),
            }),
            tasks: Mutex::new(JoinSet::new()),
        }
    }

    /// Spawn a job. Must be called from within a tokio runtime.
    pub fn submit(&self, work: AssetJob) -> JobHandle {
        let job = Job::new(work, self.shared.config.retry.clone());
        let id = job.id;
        let kind = job.work.type_name();
        let storage_key = job.work.storage_key().to_owned();
        let (tx, rx) = oneshot::channel();

        let shared = self.shared.clone();
        let abort = {
            let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
            // Reap finished tasks so a long-lived runner does not accumulate them.
            while tasks.try_join_next().is_some() {}
            tasks.spawn(async move {
                let job = run(shared, job).await;
                let _ = tx.send(job);
            })
        };

        self.shared.record(|s| s.jobs_submitted += 1);
        debug!(job_id = %id, kind, storage_key = %storage_key, "asset job submitted");

        JobHandle {
            id,
            kind,
            storage_key,
            result: rx,
            abort,
        }
    }

    /// Wait until every job submitted so far has finished or been cancelled.
    pub async fn drain(&self) {
        let mut tasks = {
            let mut guard = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
            std::mem::take(&mut *guard)
        };
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                if e.is_panic() {
                    error!(error = %e, "asset job panicked");
                }
            }
        }
    }

    pub fn dead_letters(&self) -> Vec<DeadLetterEntry> {
        self.shared
            .dead_letters
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn stats(&self) -> RunnerStats {
        self.shared
            .stats
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

async fn run(shared: Arc<Shared>, mut job: Job) -> Job {
    let Ok(_permit) = shared.permits.acquire().await else {
        job.cancel();
        return job;
    };
    let timeout = shared.config.attempt_timeout;

    loop {
        job.begin_attempt();

        let failure = match tokio::time::timeout(timeout, execute(shared.files.as_ref(), &job.work)).await {
            Ok(Ok(())) => None,
            Ok(Err(FileStoreError::AlreadyExists(_))) => {
                job.key_taken();
                shared.record(|s| s.jobs_key_taken += 1);
                info!(
                    job_id = %job.id,
                    kind = job.work.type_name(),
                    storage_key = %job.work.storage_key(),
                    attempt = job.attempt,
                    "asset job refused: storage key already taken"
                );
                return job;
            }
            Ok(Err(e)) => Some((e.to_string(), e.is_transient())),
            Err(_) => Some((format!("attempt timed out after {} ms", timeout.as_millis()), true)),
        };

        let Some((error, retriable)) = failure else {
            job.complete();
            shared.record(|s| s.jobs_completed += 1);
            info!(
                job_id = %job.id,
                kind = job.work.type_name(),
                storage_key = %job.work.storage_key(),
                attempt = job.attempt,
                "asset job completed"
            );
            return job;
        };

        match job.fail(error.clone(), retriable) {
            Some(delay) => {
                warn!(
                    job_id = %job.id,
                    kind = job.work.type_name(),
                    storage_key = %job.work.storage_key(),
                    attempt = job.attempt,
                    error = %error,
                    delay_ms = delay.as_millis() as u64,
                    "asset job attempt failed; retrying"
                );
                tokio::time::sleep(delay).await;
            }
            None => {
                error!(
                    job_id = %job.id,
                    kind = job.work.type_name(),
                    storage_key = %job.work.storage_key(),
                    attempts = job.attempt,
                    error = %error,
                    "asset job dead-lettered"
                );
                shared
                    .dead_letters
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push(DeadLetterEntry::new(&job, error));
                shared.record(|s| s.jobs_dead_lettered += 1);
                return job;
            }
        }
    }
}

async fn execute(files: &dyn FileStore, work: &AssetJob) -> Result<(), FileStoreError> {
    match work {
        AssetJob::Upload { storage_key, bytes } => files.write(storage_key, bytes).await,
        AssetJob::Remove { storage_key } => match files.delete(storage_key).await {
            Err(FileStoreError::NotFound(_)) => Ok(()),
            other => other,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;

    use crate::files::InMemoryFileStore;

    /// Fails the first `failures` writes, optionally hanging instead of erroring.
    struct Flaky {
        inner: InMemoryFileStore,
        failures: u32,
        hang: bool,
        writes: AtomicU32,
    }

    #[async_trait]
    impl FileStore for Flaky {
        async fn exists(&self, key: &str) -> Result<bool, FileStoreError> {
            self.inner.exists(key).await
        }

        async fn write(&self, key: &str, bytes: &[u8]) -> Result<(), FileStoreError> {
            let n = self.writes.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                if self.hang {
                    std::future::pending::<()>().await;
                }
                return Err(FileStoreError::Io("disk on fire".into()));
            }
            self.inner.write(key, bytes).await
        }

        async fn delete(&self, key: &str) -> Result<(), FileStoreError> {
            self.inner.delete(key).await
        }

        async fn read(&self, key: &str) -> Result<Vec<u8>, FileStoreError> {
            self.inner.read(key).await
        }
    }

    fn flaky(failures: u32, hang: bool) -> Arc<Flaky> {
        Arc::new(Flaky {
            inner: InMemoryFileStore::new(),
            failures,
            hang,
            writes: AtomicU32::new(0),
        })
    }

    fn fast_config(max_attempts: u32) -> JobRunnerConfig {
        JobRunnerConfig::default()
            .with_retry(RetryPolicy::fixed(max_attempts, Duration::from_millis(1)))
            .with_attempt_timeout(Duration::from_millis(50))
    }

    #[tokio::test]
    async fn transient_failures_are_retried() {
        let files = flaky(2, false);
        let runner = AssetJobRunner::new(files.clone(), fast_config(3));

        let status = runner.submit(AssetJob::upload("avatars/a.png", vec![1u8])).wait().await;

        assert_eq!(status, JobStatus::Completed);
        assert_eq!(files.writes.load(Ordering::SeqCst), 3);
        assert!(files.inner.exists("avatars/a.png").await.unwrap());
        assert!(runner.dead_letters().is_empty());
    }

    #[tokio::test]
    async fn exhausted_jobs_are_dead_lettered() {
        let files = flaky(10, false);
        let runner = AssetJobRunner::new(files, fast_config(2));

        let status = runner.submit(AssetJob::upload("avatars/a.png", vec![1u8])).wait().await;

        assert!(matches!(status, JobStatus::DeadLettered { attempts: 2, .. }));
        let dead = runner.dead_letters();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].storage_key, "avatars/a.png");
        assert_eq!(dead[0].kind, "upload");
        assert_eq!(runner.stats().jobs_dead_lettered, 1);
    }

    #[tokio::test]
    async fn hung_attempts_time_out_and_retry() {
        let files = flaky(1, true);
        let runner = AssetJobRunner::new(files.clone(), fast_config(2));

        let status = runner.submit(AssetJob::upload("avatars/slow.png", vec![1u8])).wait().await;

        assert_eq!(status, JobStatus::Completed);
        assert_eq!(files.writes.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn removing_a_missing_file_succeeds() {
        let runner = AssetJobRunner::new(Arc::new(InMemoryFileStore::new()), fast_config(1));
        let status = runner.submit(AssetJob::remove("avatars/gone.png")).wait().await;
        assert_eq!(status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn invalid_keys_are_not_retried() {
        let runner = AssetJobRunner::new(Arc::new(InMemoryFileStore::new()), fast_config(5));
        let status = runner.submit(AssetJob::upload("../escape", vec![1u8])).wait().await;
        assert!(matches!(status, JobStatus::DeadLettered { attempts: 1, .. }));
    }

    #[tokio::test]
    async fn taken_key_is_neither_retried_nor_dead_lettered() {
        let files = Arc::new(InMemoryFileStore::new());
        files.write("avatars/a.png", b"first").await.unwrap();
        let runner = AssetJobRunner::new(files.clone(), fast_config(3));

        let status = runner.submit(AssetJob::upload("avatars/a.png", vec![2u8])).wait().await;

        assert_eq!(status, JobStatus::KeyTaken { storage_key: "avatars/a.png".into() });
        assert!(runner.dead_letters().is_empty());
        assert_eq!(runner.stats().jobs_key_taken, 1);
        assert_eq!(files.read("avatars/a.png").await.unwrap(), b"first");
    }

    #[tokio::test]
    async fn cancelled_jobs_report_cancelled() {
        let files = flaky(u32::MAX, true);
        let runner = AssetJobRunner::new(
            files,
            fast_config(1).with_attempt_timeout(Duration::from_secs(60)),
        );

        let handle = runner.submit(AssetJob::upload("avatars/stuck.png", vec![1u8]));
        handle.cancel();
        assert_eq!(handle.wait().await, JobStatus::Cancelled);
        runner.drain().await;
    }

    #[tokio::test]
    async fn drain_waits_for_detached_jobs() {
        let files = Arc::new(InMemoryFileStore::new());
        let runner = AssetJobRunner::new(files.clone(), fast_config(1));

        for i in 0..5 {
            drop(runner.submit(AssetJob::upload(format!("avatars/{i}.png"), vec![i as u8])));
        }
        runner.drain().await;

        assert_eq!(files.keys().len(), 5);
        assert_eq!(runner.stats().jobs_completed, 5);
        assert_eq!(runner.stats().jobs_submitted, 5);
    }
}
