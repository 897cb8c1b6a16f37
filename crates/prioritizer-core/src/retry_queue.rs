//! Retry Queue (§4.3): single-owner, per-task retry state for strategic
//! scoring jobs with exponential backoff.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tokio::time::sleep;
use tracing::{info, warn};
use uuid::Uuid;

use crate::clock::Clock;
use crate::error::Error;
use crate::store::{PersistentStore, ProcessingLogEntry};

pub const MAX_ATTEMPTS: u32 = 3;

/// Backoff delays outside test mode: 1s, 2s, 4s (§4.3, §8).
const BACKOFF_SCHEDULE: [Duration; 3] = [
    Duration::from_secs(1),
    Duration::from_secs(2),
    Duration::from_secs(4),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Queued,
    Retrying,
    Failed,
    Succeeded,
}

#[derive(Debug, Clone)]
pub struct JobState {
    pub task_id: String,
    pub session_id: Uuid,
    pub attempts: u32,
    pub status: JobStatus,
    pub last_error: Option<String>,
    pub next_attempt_at: Option<DateTime<Utc>>,
}

/// Single-owner, in-process retry queue (§4.3, §5, §9: constructed once at
/// startup and passed in via dependency injection, never implicit
/// module-level mutable state).
pub struct RetryQueue {
    jobs: Mutex<HashMap<(Uuid, String), JobState>>,
    clock: Arc<dyn Clock>,
    store: Arc<dyn PersistentStore>,
    test_mode: bool,
}

impl RetryQueue {
    pub fn new(clock: Arc<dyn Clock>, store: Arc<dyn PersistentStore>, test_mode: bool) -> Self {
        Self {
            jobs: Mutex::new(HashMap::new()),
            clock,
            store,
            test_mode,
        }
    }

    fn backoff_delay(&self, attempt_index: usize) -> Duration {
        if self.test_mode {
            Duration::ZERO
        } else {
            BACKOFF_SCHEDULE
                .get(attempt_index)
                .copied()
                .unwrap_or(Duration::from_secs(4))
        }
    }

    /// `Enqueue(estimateFn, onSuccess, onFailure)` (§4.3). Runs up to
    /// `MAX_ATTEMPTS` attempts of `estimate_fn`, sleeping the backoff
    /// schedule between attempts (zeroed in test mode), logging a
    /// structured `processing_log` entry per attempt.
    pub async fn enqueue<F, Fut, T>(
        &self,
        session_id: Uuid,
        task_id: &str,
        mut estimate_fn: F,
    ) -> Result<T, Error>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, Error>>,
    {
        let key = (session_id, task_id.to_string());
        {
            let mut jobs = self.jobs.lock().await;
            jobs.insert(
                key.clone(),
                JobState {
                    task_id: task_id.to_string(),
                    session_id,
                    attempts: 0,
                    status: JobStatus::Queued,
                    last_error: None,
                    next_attempt_at: None,
                },
            );
        }

        let mut last_err = None;
        for attempt in 1..=MAX_ATTEMPTS {
            if attempt > 1 {
                sleep(self.backoff_delay((attempt - 2) as usize)).await;
            }

            match estimate_fn().await {
                Ok(value) => {
                    let mut jobs = self.jobs.lock().await;
                    if let Some(job) = jobs.get_mut(&key) {
                        job.attempts = attempt;
                        job.status = JobStatus::Succeeded;
                    }
                    return Ok(value);
                }
                Err(err) => {
                    self.log_attempt(session_id, task_id, attempt, "retry", &err)
                        .await;
                    if attempt == MAX_ATTEMPTS {
                        self.log_attempt(session_id, task_id, attempt, "retry_exhausted", &err)
                            .await;
                    }

                    let mut jobs = self.jobs.lock().await;
                    if let Some(job) = jobs.get_mut(&key) {
                        job.attempts = attempt;
                        job.last_error = Some(err.to_string());
                        job.status = if attempt < MAX_ATTEMPTS {
                            JobStatus::Retrying
                        } else {
                            JobStatus::Failed
                        };
                        job.next_attempt_at = if attempt < MAX_ATTEMPTS {
                            Some(self.clock.now() + chrono::Duration::from_std(
                                self.backoff_delay((attempt - 1) as usize),
                            )
                            .unwrap_or_default())
                        } else {
                            None
                        };
                    }
                    last_err = Some(err);
                }
            }
        }

        Err(last_err.unwrap_or_else(|| Error::internal("retry queue exhausted with no error recorded".to_string())))
    }

    async fn log_attempt(
        &self,
        session_id: Uuid,
        task_id: &str,
        attempts: u32,
        status: &str,
        err: &Error,
    ) {
        let entry = ProcessingLogEntry {
            session_id,
            operation: "strategic_score_retry".to_string(),
            status: status.to_string(),
            task_id: Some(task_id.to_string()),
            attempts: Some(attempts),
            last_error: Some(err.to_string()),
            metadata: serde_json::json!({ "session_id": session_id, "task_id": task_id }),
            created_at: self.clock.now(),
        };

        if status == "retry_exhausted" {
            warn!(session_id = %session_id, task_id, attempts, error = %err, "strategic_score_retry exhausted");
        } else {
            info!(session_id = %session_id, task_id, attempts, error = %err, "strategic_score_retry");
        }

        if let Err(store_err) = self.store.append_processing_log(&entry).await {
            warn!(error = %store_err, "failed to persist processing_log entry");
        }
    }

    /// `GetStatusSnapshot(session_id) -> map<task_id, {...}>` (§4.3).
    pub async fn status_snapshot(&self, session_id: Uuid) -> HashMap<String, JobState> {
        let jobs = self.jobs.lock().await;
        jobs.iter()
            .filter(|((sid, _), _)| *sid == session_id)
            .map(|((_, task_id), job)| (task_id.clone(), job.clone()))
            .collect()
    }

    /// `Diagnostics() -> {queue_depth, in_flight}` (§4.3).
    pub async fn diagnostics(&self) -> (usize, usize) {
        let jobs = self.jobs.lock().await;
        let queue_depth = jobs.len();
        let in_flight = jobs
            .values()
            .filter(|job| matches!(job.status, JobStatus::Queued | JobStatus::Retrying))
            .count();
        (queue_depth, in_flight)
    }

    /// `Reset()` for tests (§4.3).
    pub async fn reset(&self) {
        self.jobs.lock().await.clear();
    }

    /// `WaitIdle()` for tests (§4.3): since `enqueue` runs its attempts to
    /// completion before returning, there is nothing async left in-flight
    /// once all `enqueue` calls have resolved; this exists as the documented
    /// seam tests call for.
    pub async fn wait_idle(&self) {
        let (_, in_flight) = self.diagnostics().await;
        debug_assert_eq!(in_flight, 0, "wait_idle called while jobs are still in-flight");
    }
}
