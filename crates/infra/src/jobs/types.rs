//! Asset job values: the work itself, its retry policy and its lifecycle.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// The random tail of the v7 uuid; stable for the life of the job.
    pub fn seed(&self) -> u64 {
        self.0.as_u128() as u64
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Work against the file store.
#[derive(Clone)]
pub enum AssetJob {
    /// Write `bytes` at `storage_key`.
    Upload {
        storage_key: String,
        bytes: Arc<[u8]>,
    },
    /// Delete `storage_key`; an already missing file counts as done.
    Remove { storage_key: String },
}

impl AssetJob {
    pub fn upload(storage_key: impl Into<String>, bytes: impl Into<Arc<[u8]>>) -> Self {
        Self::Upload {
            storage_key: storage_key.into(),
            bytes: bytes.into(),
        }
    }

    pub fn remove(storage_key: impl Into<String>) -> Self {
        Self::Remove {
            storage_key: storage_key.into(),
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            AssetJob::Upload { .. } => "upload",
            AssetJob::Remove { .. } => "remove",
        }
    }

    pub fn storage_key(&self) -> &str {
        match self {
            AssetJob::Upload { storage_key, .. } | AssetJob::Remove { storage_key } => storage_key,
        }
    }
}

// Payloads can be megabytes; print the size only.
impl fmt::Debug for AssetJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = f.debug_struct(self.type_name());
        out.field("storage_key", &self.storage_key());
        if let AssetJob::Upload { bytes, .. } = self {
            out.field("len", &bytes.len());
        }
        out.finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum JobStatus {
    Pending,
    Running,
    /// Last attempt failed; another one is scheduled.
    Retrying { error: String, attempt: u32 },
    Completed,
    /// Upload target was already taken. Not a failure of the job itself, so
    /// it is neither retried nor dead-lettered.
    KeyTaken { storage_key: String },
    /// Out of attempts, or the failure was not worth retrying.
    DeadLettered { error: String, attempts: u32 },
    /// Aborted through its handle before reaching another terminal state.
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed
                | JobStatus::KeyTaken { .. }
                | JobStatus::DeadLettered { .. }
                | JobStatus::Cancelled
        )
    }
}

/// Delay between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum Backoff {
    Fixed { delay: Duration },
    /// `step * attempt`, never above `cap`.
    Linear { step: Duration, cap: Duration },
    /// `base * 2^(attempt - 1)`, never above `cap`.
    Exponential { base: Duration, cap: Duration },
}

impl Backoff {
    /// Delay after the given failed attempt (1-indexed).
    pub fn after(&self, attempt: u32) -> Duration {
        match *self {
            Backoff::Fixed { delay } => delay,
            Backoff::Linear { step, cap } => step.checked_mul(attempt).map_or(cap, |d| d.min(cap)),
            Backoff::Exponential { base, cap } => {
                let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
                base.checked_mul(factor).map_or(cap, |d| d.min(cap))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Attempts in total, the first one included.
    pub max_attempts: u32,
    pub backoff: Backoff,
    /// Spread each delay by up to this percentage either way, so jobs that
    /// failed together do not retry together. 0 disables it.
    pub jitter_percent: u8,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::exponential(3, Duration::from_millis(200), Duration::from_secs(10))
    }
}

impl RetryPolicy {
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self::with_backoff(max_attempts, Backoff::Fixed { delay })
    }

    pub fn linear(max_attempts: u32, step: Duration, cap: Duration) -> Self {
        Self::with_backoff(max_attempts, Backoff::Linear { step, cap })
    }

    /// Exponential backoff with 10% jitter.
    pub fn exponential(max_attempts: u32, base: Duration, cap: Duration) -> Self {
        Self::with_backoff(max_attempts, Backoff::Exponential { base, cap }).with_jitter(10)
    }

    fn with_backoff(max_attempts: u32, backoff: Backoff) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
            jitter_percent: 0,
        }
    }

    pub fn with_jitter(mut self, percent: u8) -> Self {
        self.jitter_percent = percent.min(100);
        self
    }

    /// Delay after the given failed attempt. The jitter is a pure function of
    /// `(seed, attempt)`, so replaying a job replays its schedule.
    pub fn delay_for(&self, attempt: u32, seed: u64) -> Duration {
        let delay = self.backoff.after(attempt);
        if self.jitter_percent == 0 {
            return delay;
        }
        let spread = delay.as_millis() as f64 * f64::from(self.jitter_percent) / 100.0;
        // Uniform in [-1, 1].
        let unit = (mix(seed ^ u64::from(attempt)) >> 11) as f64 / (1u64 << 53) as f64 * 2.0 - 1.0;
        let millis = (delay.as_millis() as f64 + spread * unit).max(0.0);
        Duration::from_millis(millis.round() as u64)
    }

    pub fn allows_another(&self, attempts_made: u32) -> bool {
        attempts_made < self.max_attempts
    }
}

/// One asset job and where it is in its lifecycle.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: JobId,
    pub work: AssetJob,
    pub status: JobStatus,
    pub policy: RetryPolicy,
    /// Attempts started so far.
    pub attempt: u32,
    pub created_at: DateTime<Utc>,
}

impl Job {
    pub fn new(work: AssetJob, policy: RetryPolicy) -> Self {
        Self {
            id: JobId::new(),
            work,
            status: JobStatus::Pending,
            policy,
            attempt: 0,
            created_at: Utc::now(),
        }
    }

    pub fn begin_attempt(&mut self) {
        self.attempt += 1;
        self.status = JobStatus::Running;
    }

    pub fn complete(&mut self) {
        self.status = JobStatus::Completed;
    }

    pub fn key_taken(&mut self) {
        self.status = JobStatus::KeyTaken {
            storage_key: self.work.storage_key().to_owned(),
        };
    }

    /// Record a failed attempt. Returns the delay before the next one, or
    /// `None` once the job is dead-lettered.
    pub fn fail(&mut self, error: String, retriable: bool) -> Option<Duration> {
        if retriable && self.policy.allows_another(self.attempt) {
            let delay = self.policy.delay_for(self.attempt, self.id.seed());
            self.status = JobStatus::Retrying {
                error,
                attempt: self.attempt,
            };
            Some(delay)
        } else {
            self.status = JobStatus::DeadLettered {
                error,
                attempts: self.attempt,
            };
            None
        }
    }

    pub fn cancel(&mut self) {
        self.status = JobStatus::Cancelled;
    }
}

// splitmix64 finaliser
fn mix(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9e37_79b9_7f4a_7c15);
    x = (x ^ (x >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    x = (x ^ (x >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    x ^ (x >> 31)
}

/// A job that gave up, kept for inspection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetterEntry {
    pub job_id: JobId,
    pub kind: String,
    pub storage_key: String,
    pub attempts: u32,
    pub reason: String,
    pub dead_lettered_at: DateTime<Utc>,
}

impl DeadLetterEntry {
    pub fn new(job: &Job, reason: String) -> Self {
        Self {
            job_id: job.id,
            kind: job.work.type_name().to_owned(),
            storage_key: job.work.storage_key().to_owned(),
            attempts: job.attempt,
            reason,
            dead_lettered_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn exponential_doubles_until_capped() {
        let backoff = Backoff::Exponential { base: ms(100), cap: ms(500) };
        let delays: Vec<_> = (1..=5).map(|n| backoff.after(n)).collect();
        assert_eq!(delays, [ms(100), ms(200), ms(400), ms(500), ms(500)]);
    }

    #[test]
    fn linear_grows_by_one_step_until_capped() {
        let backoff = Backoff::Linear { step: ms(100), cap: ms(250) };
        let delays: Vec<_> = (1..=4).map(|n| backoff.after(n)).collect();
        assert_eq!(delays, [ms(100), ms(200), ms(250), ms(250)]);
    }

    #[test]
    fn jitter_is_deterministic_and_bounded() {
        let policy = RetryPolicy::fixed(5, ms(1_000)).with_jitter(20);

        assert_eq!(policy.delay_for(2, 42), policy.delay_for(2, 42));
        let spread: Vec<_> = (0..64u64).map(|seed| policy.delay_for(1, seed)).collect();
        assert!(spread.iter().all(|d| (ms(800)..=ms(1_200)).contains(d)));
        assert!(spread.iter().any(|d| *d != spread[0]), "seeds should spread the delay");

        assert_eq!(RetryPolicy::fixed(5, ms(1_000)).delay_for(1, 42), ms(1_000));
        assert_eq!(RetryPolicy::fixed(5, ms(1)).with_jitter(250).jitter_percent, 100);
    }

    #[test]
    fn upload_retries_then_dead_letters() {
        let mut job = Job::new(AssetJob::upload("avatars/a.png", vec![1u8, 2, 3]), RetryPolicy::fixed(2, ms(5)));

        job.begin_attempt();
        assert_eq!(job.fail("disk full".into(), true), Some(ms(5)));
        assert_eq!(job.status, JobStatus::Retrying { error: "disk full".into(), attempt: 1 });
        assert!(!job.status.is_terminal());

        job.begin_attempt();
        assert_eq!(job.fail("disk full".into(), true), None);
        assert_eq!(job.status, JobStatus::DeadLettered { error: "disk full".into(), attempts: 2 });

        let entry = DeadLetterEntry::new(&job, "disk full".into());
        assert_eq!(
            (entry.kind.as_str(), entry.storage_key.as_str(), entry.attempts),
            ("upload", "avatars/a.png", 2)
        );
    }

    #[test]
    fn permanent_failure_dead_letters_on_first_attempt() {
        let mut job = Job::new(AssetJob::remove("../etc/passwd"), RetryPolicy::default());
        job.begin_attempt();
        assert_eq!(job.fail("invalid key".into(), false), None);
        assert!(job.status.is_terminal());
    }

    #[test]
    fn zero_attempt_policy_still_tries_once() {
        let policy = RetryPolicy::fixed(0, ms(1));
        assert_eq!(policy.max_attempts, 1);

        let mut job = Job::new(AssetJob::remove("avatars/old.png"), policy);
        job.begin_attempt();
        assert_eq!(job.fail("io".into(), true), None);
    }

    #[test]
    fn debug_prints_size_not_payload() {
        let text = format!("{:?}", AssetJob::upload("avatars/a.png", vec![7u8; 1024]));
        assert_eq!(text, r#"upload { storage_key: "avatars/a.png", len: 1024 }"#);
    }

    proptest! {
        #[test]
        fn delay_never_exceeds_cap(attempt in 1u32..200, base_ms in 1u64..5_000, cap_ms in 1u64..60_000) {
            let backoff = Backoff::Exponential { base: ms(base_ms), cap: ms(cap_ms) };
            prop_assert!(backoff.after(attempt) <= ms(cap_ms));
            let linear = Backoff::Linear { step: ms(base_ms), cap: ms(cap_ms) };
            prop_assert!(linear.after(attempt) <= ms(cap_ms));
        }

        #[test]
        fn jittered_delay_stays_within_its_band(attempt in 1u32..50, seed in any::<u64>(), pct in 0u8..=100) {
            let policy = RetryPolicy::exponential(10, ms(100), ms(5_000)).with_jitter(pct);
            let plain = policy.backoff.after(attempt).as_millis() as f64;
            let band = plain * f64::from(pct) / 100.0;
            let got = policy.delay_for(attempt, seed).as_millis() as f64;
            prop_assert!(got >= (plain - band).floor() && got <= (plain + band).ceil());
        }
    }
}
