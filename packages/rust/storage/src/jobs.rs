//! Durable enrichment job table.
//!
//! Timestamps that drive scheduling (`run_at_ms`, `lease_expires_ms`,
//! `finished_at_ms`) are stored as Unix milliseconds so comparisons stay in
//! SQL. Callers pass "now" explicitly.

use chrono::{DateTime, Utc};
use leadscout_shared::{EnrichmentError, EnrichmentJob, JobId, JobStatus, Result, SnippetId};
use libsql::params;

use crate::{Storage, format_ts, parse_ts, storage_err};

const JOB_COLUMNS: &str = "id, subject_id, status, attempts_made, max_attempts, payload_json, \
     last_error, snippet_id, run_at_ms, created_at, updated_at, finished_at_ms";

impl Storage {
    /// Insert a new job row.
    pub async fn insert_job(&self, job: &EnrichmentJob) -> Result<()> {
        self.check_writable()?;
        self.conn
            .execute(
                "INSERT INTO enrichment_jobs
                   (id, subject_id, status, attempts_made, max_attempts, payload_json,
                    run_at_ms, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    job.id.to_string(),
                    job.subject_id.as_str(),
                    job.status.as_str(),
                    i64::from(job.attempts_made),
                    i64::from(job.max_attempts),
                    serde_json::to_string(&job.payload)?,
                    job.run_at.timestamp_millis(),
                    format_ts(&job.created_at),
                    format_ts(&job.updated_at),
                ],
            )
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    /// Atomically claim the next ready job.
    ///
    /// Ready means `waiting` with `run_at_ms <= now_ms`, or `active` with an
    /// expired lease (its worker vanished). The claimed job becomes `active`,
    /// its attempt counter is incremented and its lease runs until
    /// `now_ms + lease_ms`.
    pub async fn claim_job(&self, now_ms: i64, lease_ms: i64) -> Result<Option<EnrichmentJob>> {
        self.check_writable()?;
        let sql = format!(
            "UPDATE enrichment_jobs
             SET status = 'active',
                 attempts_made = attempts_made + 1,
                 lease_expires_ms = ?2,
                 updated_at = ?3
             WHERE id = (
                 SELECT id FROM enrichment_jobs
                 WHERE (status = 'waiting' AND run_at_ms <= ?1)
                    OR (status = 'active' AND lease_expires_ms <= ?1)
                 ORDER BY run_at_ms, id
                 LIMIT 1
             )
             RETURNING {JOB_COLUMNS}"
        );
        let mut rows = self
            .conn
            .query(
                &sql,
                params![now_ms, now_ms + lease_ms, format_ts(&ms_to_datetime(now_ms)?)],
            )
            .await
            .map_err(storage_err)?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_job(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(storage_err(e)),
        }
    }

    /// Mark an active job completed.
    ///
    /// `attempt` is the `attempts_made` value of the claim being reported.
    /// Returns `false` if the job is no longer active under that claim.
    pub async fn complete_job(
        &self,
        id: &JobId,
        attempt: u32,
        snippet_id: &SnippetId,
        now_ms: i64,
    ) -> Result<bool> {
        self.check_writable()?;
        let changed = self
            .conn
            .execute(
                "UPDATE enrichment_jobs
                 SET status = 'completed', snippet_id = ?2, last_error = NULL,
                     lease_expires_ms = NULL, finished_at_ms = ?3, updated_at = ?4
                 WHERE id = ?1 AND status = 'active' AND attempts_made = ?5",
                params![
                    id.to_string(),
                    snippet_id.to_string(),
                    now_ms,
                    format_ts(&ms_to_datetime(now_ms)?),
                    i64::from(attempt),
                ],
            )
            .await
            .map_err(storage_err)?;
        Ok(changed > 0)
    }

    /// Put an active job back to `waiting` until `run_at_ms`, recording the error.
    pub async fn retry_job(
        &self,
        id: &JobId,
        attempt: u32,
        error: &str,
        run_at_ms: i64,
        now_ms: i64,
    ) -> Result<bool> {
        self.check_writable()?;
        let changed = self
            .conn
            .execute(
                "UPDATE enrichment_jobs
                 SET status = 'waiting', last_error = ?2, run_at_ms = ?3,
                     lease_expires_ms = NULL, updated_at = ?4
                 WHERE id = ?1 AND status = 'active' AND attempts_made = ?5",
                params![
                    id.to_string(),
                    error,
                    run_at_ms,
                    format_ts(&ms_to_datetime(now_ms)?),
                    i64::from(attempt),
                ],
            )
            .await
            .map_err(storage_err)?;
        Ok(changed > 0)
    }

    /// Fail an active job permanently, recording the error.
    pub async fn fail_job(&self, id: &JobId, attempt: u32, error: &str, now_ms: i64) -> Result<bool> {
        self.check_writable()?;
        let changed = self
            .conn
            .execute(
                "UPDATE enrichment_jobs
                 SET status = 'failed', last_error = ?2, lease_expires_ms = NULL,
                     finished_at_ms = ?3, updated_at = ?4
                 WHERE id = ?1 AND status = 'active' AND attempts_made = ?5",
                params![
                    id.to_string(),
                    error,
                    now_ms,
                    format_ts(&ms_to_datetime(now_ms)?),
                    i64::from(attempt),
                ],
            )
            .await
            .map_err(storage_err)?;
        Ok(changed > 0)
    }

    /// Get a job by ID.
    pub async fn get_job(&self, id: &JobId) -> Result<Option<EnrichmentJob>> {
        let sql = format!("SELECT {JOB_COLUMNS} FROM enrichment_jobs WHERE id = ?1");
        let mut rows = self
            .conn
            .query(&sql, params![id.to_string()])
            .await
            .map_err(storage_err)?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_job(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(storage_err(e)),
        }
    }

    /// List jobs in a given status, most recently updated first.
    pub async fn list_jobs_by_status(&self, status: JobStatus) -> Result<Vec<EnrichmentJob>> {
        let sql = format!(
            "SELECT {JOB_COLUMNS} FROM enrichment_jobs
             WHERE status = ?1 ORDER BY updated_at DESC, id DESC"
        );
        let mut rows = self
            .conn
            .query(&sql, params![status.as_str()])
            .await
            .map_err(storage_err)?;

        let mut results = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            results.push(row_to_job(&row)?);
        }
        Ok(results)
    }

    /// Move every `active` job back to `waiting`, ready immediately.
    ///
    /// Only safe when no worker is running against this database.
    pub async fn requeue_active_jobs(&self, now_ms: i64) -> Result<u64> {
        self.check_writable()?;
        self.conn
            .execute(
                "UPDATE enrichment_jobs
                 SET status = 'waiting', run_at_ms = ?1, lease_expires_ms = NULL, updated_at = ?2
                 WHERE status = 'active'",
                params![now_ms, format_ts(&ms_to_datetime(now_ms)?)],
            )
            .await
            .map_err(storage_err)
    }

    /// Delete completed/failed jobs that finished before `cutoff_ms`.
    pub async fn delete_finished_jobs(&self, cutoff_ms: i64) -> Result<u64> {
        self.check_writable()?;
        self.conn
            .execute(
                "DELETE FROM enrichment_jobs
                 WHERE status IN ('completed', 'failed') AND finished_at_ms < ?1",
                params![cutoff_ms],
            )
            .await
            .map_err(storage_err)
    }
}

fn ms_to_datetime(ms: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| EnrichmentError::Storage(format!("timestamp out of range: {ms}")))
}

fn row_to_job(row: &libsql::Row) -> Result<EnrichmentJob> {
    let id: String = row.get(0).map_err(storage_err)?;
    let status: String = row.get(2).map_err(storage_err)?;
    let payload: String = row.get(5).map_err(storage_err)?;
    let created_at: String = row.get(9).map_err(storage_err)?;
    let updated_at: String = row.get(10).map_err(storage_err)?;

    let snippet_id = match row.get::<String>(7) {
        Ok(s) => Some(
            s.parse()
                .map_err(|e| EnrichmentError::Storage(format!("invalid snippet id: {e}")))?,
        ),
        Err(_) => None,
    };
    let finished_at = match row.get::<i64>(11) {
        Ok(ms) => Some(ms_to_datetime(ms)?),
        Err(_) => None,
    };

    Ok(EnrichmentJob {
        id: id
            .parse()
            .map_err(|e| EnrichmentError::Storage(format!("invalid job id: {e}")))?,
        subject_id: row.get(1).map_err(storage_err)?,
        status: status.parse().map_err(EnrichmentError::Storage)?,
        attempts_made: row.get::<i64>(3).map_err(storage_err)? as u32,
        max_attempts: row.get::<i64>(4).map_err(storage_err)? as u32,
        payload: serde_json::from_str(&payload)?,
        last_error: row.get::<String>(6).ok(),
        snippet_id,
        run_at: ms_to_datetime(row.get::<i64>(8).map_err(storage_err)?)?,
        created_at: parse_ts(&created_at)?,
        updated_at: parse_ts(&updated_at)?,
        finished_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::test_storage;

    fn waiting_job(subject_id: &str, run_at_ms: i64) -> EnrichmentJob {
        let now = Utc::now();
        EnrichmentJob {
            id: JobId::new(),
            subject_id: subject_id.into(),
            status: JobStatus::Waiting,
            attempts_made: 0,
            max_attempts: 3,
            payload: serde_json::json!({ "personId": subject_id }),
            last_error: None,
            snippet_id: None,
            run_at: DateTime::from_timestamp_millis(run_at_ms).unwrap(),
            created_at: now,
            updated_at: now,
            finished_at: None,
        }
    }

    #[tokio::test]
    async fn insert_and_get_job() {
        let storage = test_storage().await;
        let job = waiting_job("person-1", 1_000);
        storage.insert_job(&job).await.expect("insert job");

        let stored = storage.get_job(&job.id).await.unwrap().expect("job exists");
        assert_eq!(stored.subject_id, "person-1");
        assert_eq!(stored.status, JobStatus::Waiting);
        assert_eq!(stored.payload["personId"], "person-1");
        assert_eq!(stored.run_at.timestamp_millis(), 1_000);
        assert!(stored.finished_at.is_none());
    }

    #[tokio::test]
    async fn claim_respects_run_at_and_marks_active() {
        let storage = test_storage().await;
        let job = waiting_job("person-1", 5_000);
        storage.insert_job(&job).await.unwrap();

        assert!(storage.claim_job(4_999, 60_000).await.unwrap().is_none());

        let claimed = storage.claim_job(5_000, 60_000).await.unwrap().expect("claimed");
        assert_eq!(claimed.id, job.id);
        assert_eq!(claimed.status, JobStatus::Active);
        assert_eq!(claimed.attempts_made, 1);

        // Active with a live lease is not handed out twice.
        assert!(storage.claim_job(6_000, 60_000).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn expired_lease_is_redelivered() {
        let storage = test_storage().await;
        let job = waiting_job("person-1", 0);
        storage.insert_job(&job).await.unwrap();

        storage.claim_job(1_000, 10_000).await.unwrap().expect("first claim");
        let again = storage
            .claim_job(11_000, 10_000)
            .await
            .unwrap()
            .expect("lease expired");
        assert_eq!(again.id, job.id);
        assert_eq!(again.attempts_made, 2);
    }

    #[tokio::test]
    async fn outdated_claim_cannot_settle_redelivered_job() {
        let storage = test_storage().await;
        let job = waiting_job("person-1", 0);
        storage.insert_job(&job).await.unwrap();

        let first = storage.claim_job(1_000, 10_000).await.unwrap().unwrap();
        let second = storage.claim_job(11_000, 10_000).await.unwrap().unwrap();
        assert_eq!(second.attempts_made, first.attempts_made + 1);

        let first_attempt = first.attempts_made;
        assert!(!storage.retry_job(&job.id, first_attempt, "late", 12_000, 11_500).await.unwrap());
        assert!(!storage.fail_job(&job.id, first_attempt, "late", 11_500).await.unwrap());
        assert!(
            !storage
                .complete_job(&job.id, first_attempt, &SnippetId::new(), 11_500)
                .await
                .unwrap()
        );
        let stored = storage.get_job(&job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Active);
        assert!(stored.last_error.is_none());

        let snippet_id = SnippetId::new();
        assert!(
            storage
                .complete_job(&job.id, second.attempts_made, &snippet_id, 12_000)
                .await
                .unwrap()
        );
        let stored = storage.get_job(&job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Completed);
        assert_eq!(stored.snippet_id, Some(snippet_id));
    }

    #[tokio::test]
    async fn retry_complete_and_fail_transitions() {
        let storage = test_storage().await;
        let job = waiting_job("person-1", 0);
        storage.insert_job(&job).await.unwrap();
        storage.claim_job(1_000, 10_000).await.unwrap().unwrap();

        assert!(storage.retry_job(&job.id, 1, "search down", 3_000, 1_500).await.unwrap());
        let stored = storage.get_job(&job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Waiting);
        assert_eq!(stored.last_error.as_deref(), Some("search down"));
        assert_eq!(stored.run_at.timestamp_millis(), 3_000);

        // Not active any more: terminal transitions are refused.
        assert!(!storage.fail_job(&job.id, 1, "nope", 2_000).await.unwrap());

        storage.claim_job(3_000, 10_000).await.unwrap().unwrap();
        let snippet_id = SnippetId::new();
        assert!(storage.complete_job(&job.id, 2, &snippet_id, 4_000).await.unwrap());
        let stored = storage.get_job(&job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Completed);
        assert_eq!(stored.snippet_id, Some(snippet_id));
        assert!(stored.last_error.is_none());
        assert_eq!(stored.finished_at.map(|t| t.timestamp_millis()), Some(4_000));

        let other = waiting_job("person-2", 0);
        storage.insert_job(&other).await.unwrap();
        storage.claim_job(5_000, 10_000).await.unwrap().unwrap();
        assert!(storage.fail_job(&other.id, 1, "validation failed", 6_000).await.unwrap());
        let failed = storage.list_jobs_by_status(JobStatus::Failed).await.unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].last_error.as_deref(), Some("validation failed"));
    }

    #[tokio::test]
    async fn requeue_and_reap() {
        let storage = test_storage().await;
        let stuck = waiting_job("person-1", 0);
        let done = waiting_job("person-2", 0);
        storage.insert_job(&stuck).await.unwrap();
        storage.insert_job(&done).await.unwrap();

        let first = storage.claim_job(1_000, 600_000).await.unwrap().unwrap();
        let second = storage.claim_job(1_000, 600_000).await.unwrap().unwrap();
        let (stuck_id, done_id) = if first.id == stuck.id {
            (first.id, second.id)
        } else {
            (second.id, first.id)
        };
        storage.complete_job(&done_id, 1, &SnippetId::new(), 2_000).await.unwrap();

        assert_eq!(storage.requeue_active_jobs(3_000).await.unwrap(), 1);
        let requeued = storage.get_job(&stuck_id).await.unwrap().unwrap();
        assert_eq!(requeued.status, JobStatus::Waiting);

        assert_eq!(storage.delete_finished_jobs(2_000).await.unwrap(), 0);
        assert_eq!(storage.delete_finished_jobs(2_001).await.unwrap(), 1);
        assert!(storage.get_job(&done_id).await.unwrap().is_none());
        assert!(storage.get_job(&stuck_id).await.unwrap().is_some());
    }
}
