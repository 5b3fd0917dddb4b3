//! Durable enrichment job queue with retry and exponential backoff.
//!
//! Jobs live in the `enrichment_jobs` table, so they survive restarts and
//! can be shared by several worker processes. Delivery is at-least-once:
//! a job whose worker disappears is handed out again once its lease expires.
//!
//! Status flow: `waiting → active → {completed | waiting (retry) | failed}`.

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeDelta, Utc};
use sha2::{Digest, Sha256};
use tokio::sync::Notify;
use tracing::{debug, error, info, instrument, warn};

use leadscout_shared::{
    EnrichmentError, EnrichmentJob, JobId, JobStatus, QueueConfig, Result, SnippetId,
};
use leadscout_storage::Storage;

// ---------------------------------------------------------------------------
// Retry policy
// ---------------------------------------------------------------------------

/// Exponential backoff with deterministic per-job jitter.
///
/// Attempt `n` (1-based) waits `base * 2^(n-1)` plus up to 50% jitter, so
/// each delay is strictly longer than the previous one.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base: Duration,
}

impl RetryPolicy {
    /// Delay before the attempt following failed attempt `attempt`.
    pub fn delay(&self, job_id: &JobId, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let backoff = self.base.saturating_mul(1u32 << exponent);
        backoff + backoff.mul_f64(jitter_fraction(job_id, attempt))
    }

    /// Whether a job that has made `attempts_made` attempts may run again.
    pub fn should_retry(&self, attempts_made: u32) -> bool {
        attempts_made < self.max_attempts
    }
}

impl From<&QueueConfig> for RetryPolicy {
    fn from(config: &QueueConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            base: config.backoff_base,
        }
    }
}

/// Value in `[0, 0.5)` derived from the job id and attempt.
fn jitter_fraction(job_id: &JobId, attempt: u32) -> f64 {
    let mut hasher = Sha256::new();
    hasher.update(job_id.0.as_bytes());
    hasher.update(attempt.to_be_bytes());
    let digest = hasher.finalize();

    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    let unit = (u64::from_be_bytes(bytes) >> 11) as f64 / (1u64 << 53) as f64;
    unit * 0.5
}

// ---------------------------------------------------------------------------
// Queue
// ---------------------------------------------------------------------------

/// What happened to a job after its processor failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureOutcome {
    /// Rescheduled; `attempt` is the attempt that just failed.
    Retrying { attempt: u32, delay: Duration },
    /// Attempts exhausted. The job stays inspectable with its last error.
    Failed,
    /// The claim is outdated (re-delivered or recovered since); nothing changed.
    Superseded,
}

/// Result of [`JobQueue::claim`].
#[derive(Debug, Clone)]
pub enum Claim {
    /// The job is active under this claim and should be processed.
    Ready(EnrichmentJob),
    /// A re-delivered job that had used up its attempts; it is now failed.
    Exhausted(EnrichmentJob),
}

impl Claim {
    pub fn into_ready(self) -> Option<EnrichmentJob> {
        match self {
            Self::Ready(job) => Some(job),
            Self::Exhausted(_) => None,
        }
    }
}

/// Durable job queue backed by [`Storage`].
pub struct JobQueue {
    storage: Arc<Storage>,
    config: QueueConfig,
    policy: RetryPolicy,
    notify: Notify,
}

impl JobQueue {
    pub fn new(storage: Arc<Storage>, config: QueueConfig) -> Self {
        let policy = RetryPolicy::from(&config);
        Self {
            storage,
            config,
            policy,
            notify: Notify::new(),
        }
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Add a job for `subject_id`, ready immediately.
    #[instrument(skip(self))]
    pub async fn enqueue(&self, subject_id: &str) -> Result<JobId> {
        let now = Utc::now();
        let job = EnrichmentJob {
            id: JobId::new(),
            subject_id: subject_id.to_string(),
            status: JobStatus::Waiting,
            attempts_made: 0,
            max_attempts: self.policy.max_attempts,
            payload: serde_json::json!({ "personId": subject_id }),
            last_error: None,
            snippet_id: None,
            run_at: now,
            created_at: now,
            updated_at: now,
            finished_at: None,
        };
        self.storage.insert_job(&job).await.map_err(unavailable)?;
        self.notify.notify_waiters();

        info!(job_id = %job.id, "job enqueued");
        Ok(job.id)
    }

    /// Enqueue only if the subject exists.
    pub async fn enqueue_subject(&self, subject_id: &str) -> Result<JobId> {
        let exists = self
            .storage
            .resolve_subject(subject_id)
            .await
            .map_err(unavailable)?
            .is_some();
        if !exists {
            return Err(EnrichmentError::precondition(format!(
                "Person '{subject_id}' not found."
            )));
        }
        self.enqueue(subject_id).await
    }

    /// Claim the next ready job, if any.
    ///
    /// A re-delivered job that has already used up its attempts is failed
    /// here and returned as [`Claim::Exhausted`] instead of being processed.
    pub async fn claim(&self) -> Result<Option<Claim>> {
        let now_ms = Utc::now().timestamp_millis();
        let lease_ms = self.config.lease.as_millis() as i64;
        let Some(mut job) = self
            .storage
            .claim_job(now_ms, lease_ms)
            .await
            .map_err(unavailable)?
        else {
            return Ok(None);
        };

        if job.attempts_made > job.max_attempts {
            let reason = job
                .last_error
                .clone()
                .unwrap_or_else(|| "lease expired too many times".into());
            self.storage
                .fail_job(&job.id, job.attempts_made, &reason, now_ms)
                .await
                .map_err(unavailable)?;
            error!(job_id = %job.id, attempts = job.attempts_made, %reason, "job failed permanently");
            job.status = JobStatus::Failed;
            job.last_error = Some(reason);
            return Ok(Some(Claim::Exhausted(job)));
        }

        debug!(job_id = %job.id, attempt = job.attempts_made, "job claimed");
        Ok(Some(Claim::Ready(job)))
    }

    /// Record success for a claimed job.
    ///
    /// Returns `false` when the claim is outdated: the job was re-delivered
    /// or recovered since, and its current owner settles it instead.
    pub async fn complete(&self, job: &EnrichmentJob, snippet_id: &SnippetId) -> Result<bool> {
        let now_ms = Utc::now().timestamp_millis();
        let done = self
            .storage
            .complete_job(&job.id, job.attempts_made, snippet_id, now_ms)
            .await
            .map_err(unavailable)?;
        if done {
            info!(job_id = %job.id, %snippet_id, "job completed");
        } else {
            warn!(job_id = %job.id, attempt = job.attempts_made, "completion ignored, claim is outdated");
        }
        Ok(done)
    }

    /// Record a processor failure: schedule a retry or fail permanently.
    #[instrument(skip_all, fields(job_id = %job.id, attempt = job.attempts_made))]
    pub async fn fail(&self, job: &EnrichmentJob, cause: &EnrichmentError) -> Result<FailureOutcome> {
        let now = Utc::now();
        let now_ms = now.timestamp_millis();
        let reason = cause.to_string();

        if self.policy.should_retry(job.attempts_made) {
            let delay = self.policy.delay(&job.id, job.attempts_made);
            let run_at_ms = now_ms + delay.as_millis() as i64;
            let rescheduled = self
                .storage
                .retry_job(&job.id, job.attempts_made, &reason, run_at_ms, now_ms)
                .await
                .map_err(unavailable)?;
            if !rescheduled {
                warn!("failure ignored, claim is outdated");
                return Ok(FailureOutcome::Superseded);
            }
            warn!(
                delay_ms = delay.as_millis() as u64,
                retryable = cause.is_retryable(),
                %reason,
                "job failed, retry scheduled"
            );
            return Ok(FailureOutcome::Retrying {
                attempt: job.attempts_made,
                delay,
            });
        }

        let failed = self
            .storage
            .fail_job(&job.id, job.attempts_made, &reason, now_ms)
            .await
            .map_err(unavailable)?;
        if !failed {
            warn!("failure ignored, claim is outdated");
            return Ok(FailureOutcome::Superseded);
        }
        error!(
            subject_id = %job.subject_id,
            max_attempts = job.max_attempts,
            %reason,
            "job failed permanently"
        );
        Ok(FailureOutcome::Failed)
    }

    pub async fn get(&self, id: &JobId) -> Result<Option<EnrichmentJob>> {
        self.storage.get_job(id).await.map_err(unavailable)
    }

    /// Permanently failed jobs still within the retention window.
    pub async fn failed_jobs(&self) -> Result<Vec<EnrichmentJob>> {
        self.storage
            .list_jobs_by_status(JobStatus::Failed)
            .await
            .map_err(unavailable)
    }

    /// Make jobs left `active` by a dead process claimable again.
    ///
    /// Every active row is requeued, including jobs another live process is
    /// running. Their outdated claims can no longer settle the job, but the
    /// research runs twice.
    pub async fn recover_in_flight(&self) -> Result<u64> {
        let now_ms = Utc::now().timestamp_millis();
        let recovered = self
            .storage
            .requeue_active_jobs(now_ms)
            .await
            .map_err(unavailable)?;
        if recovered > 0 {
            warn!(recovered, "requeued jobs left active by a previous run");
            self.notify.notify_waiters();
        }
        Ok(recovered)
    }

    /// Delete finished jobs older than the retention window.
    pub async fn reap(&self) -> Result<u64> {
        let retention = TimeDelta::from_std(self.config.retention).unwrap_or(TimeDelta::MAX);
        let cutoff = Utc::now()
            .checked_sub_signed(retention)
            .map(|t| t.timestamp_millis())
            .unwrap_or(i64::MIN);
        let removed = self
            .storage
            .delete_finished_jobs(cutoff)
            .await
            .map_err(unavailable)?;
        if removed > 0 {
            debug!(removed, "reaped finished jobs");
        }
        Ok(removed)
    }

    /// Sleep until something is enqueued or the poll interval elapses.
    pub async fn wait_for_work(&self) {
        let _ = tokio::time::timeout(self.config.poll_interval, self.notify.notified()).await;
    }
}

fn unavailable(e: EnrichmentError) -> EnrichmentError {
    match e {
        EnrichmentError::QueueUnavailable(_) => e,
        other => EnrichmentError::QueueUnavailable(other.to_string()),
    }
}
