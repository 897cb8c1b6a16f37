//! Progress Stream (§4.7): server-initiated event feed over a session.

use std::sync::Arc;
use std::time::Duration;

use async_stream::stream;
use futures::Stream;
use tracing::warn;
use uuid::Uuid;

use crate::model::{AgentSession, StrategicScore};
use crate::retry_queue::{JobState, RetryQueue};
use crate::store::PersistentStore;

const POLL_INTERVAL: Duration = Duration::from_millis(1500);
const MAX_CONSECUTIVE_FAILURES: u32 = 5;

#[derive(Debug, Clone)]
pub enum ProgressEvent {
    Session {
        status: String,
        progress_pct: f64,
    },
    Scores {
        scores: Vec<StrategicScore>,
        retry_status: std::collections::HashMap<String, JobState>,
    },
    Warning {
        message: String,
    },
    Heartbeat,
    Error {
        message: String,
    },
    Close,
}

/// Polls `session` and `retry_queue` state every 1.5s and emits progress
/// events, closing after `MAX_CONSECUTIVE_FAILURES` consecutive read
/// failures (§4.7).
pub struct ProgressStreamer {
    store: Arc<dyn PersistentStore>,
    retry_queue: Arc<RetryQueue>,
}

impl ProgressStreamer {
    pub fn new(store: Arc<dyn PersistentStore>, retry_queue: Arc<RetryQueue>) -> Self {
        Self { store, retry_queue }
    }

    /// Builds the event stream for `session_id`. Ends when the session
    /// reaches a terminal status, on repeated read failure, or when the
    /// caller drops/cancels the returned stream (cancellation-safe: nothing
    /// survives past the last yielded item).
    pub fn stream(&self, session_id: Uuid) -> impl Stream<Item = ProgressEvent> + '_ {
        stream! {
            let mut consecutive_failures = 0_u32;

            loop {
                match self.store.get_session(session_id).await {
                    Ok(session) => {
                        consecutive_failures = 0;
                        let progress_pct = Self::progress_pct(&session);
                        yield ProgressEvent::Session {
                            status: format!("{:?}", session.status).to_lowercase(),
                            progress_pct,
                        };

                        let scores: Vec<StrategicScore> = session.strategic_scores.values().cloned().collect();
                        let retry_status = self.retry_queue.status_snapshot(session_id).await;
                        yield ProgressEvent::Scores { scores, retry_status };

                        if matches!(
                            session.status,
                            crate::model::SessionStatus::Completed | crate::model::SessionStatus::Failed
                        ) {
                            yield ProgressEvent::Close;
                            return;
                        }
                    }
                    Err(err) => {
                        consecutive_failures += 1;
                        warn!(session_id = %session_id, error = %err, consecutive_failures, "progress stream read failure");
                        yield ProgressEvent::Warning { message: err.to_string() };

                        if consecutive_failures >= MAX_CONSECUTIVE_FAILURES {
                            yield ProgressEvent::Error {
                                message: format!("session {session_id} unreadable after {consecutive_failures} attempts"),
                            };
                            yield ProgressEvent::Close;
                            return;
                        }
                    }
                }

                tokio::time::sleep(POLL_INTERVAL).await;
                yield ProgressEvent::Heartbeat;
            }
        }
    }

    fn progress_pct(session: &AgentSession) -> f64 {
        match session.status {
            crate::model::SessionStatus::Running => {
                session
                    .evaluation_metadata
                    .as_ref()
                    .map_or(10.0, |metadata| (metadata.iterations as f64 / 3.0 * 90.0).min(90.0))
            }
            crate::model::SessionStatus::Completed => 100.0,
            crate::model::SessionStatus::Failed => 100.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use futures::StreamExt;
    use prioritizer_testing::{FixedClock, InMemoryStore};

    #[tokio::test]
    async fn emits_session_then_scores_then_close_for_completed_session() {
        let store = Arc::new(InMemoryStore::new());
        let mut session = AgentSession::new_running("u1", Uuid::new_v4(), Utc::now());
        session.status = crate::model::SessionStatus::Completed;
        let session_id = session.id;
        store.seed_session(session).await;

        let clock = Arc::new(FixedClock::new(Utc::now()));
        let retry_queue = Arc::new(RetryQueue::new(clock, store.clone(), true));
        let streamer = ProgressStreamer::new(store, retry_queue);

        let events: Vec<ProgressEvent> = streamer.stream(session_id).take(3).collect().await;
        assert!(matches!(events[0], ProgressEvent::Session { .. }));
        assert!(matches!(events[1], ProgressEvent::Scores { .. }));
        assert!(matches!(events[2], ProgressEvent::Close));
    }

    #[tokio::test]
    async fn errors_after_missing_session_threshold() {
        let store = Arc::new(InMemoryStore::new());
        let clock = Arc::new(FixedClock::new(Utc::now()));
        let retry_queue = Arc::new(RetryQueue::new(clock, store.clone(), true));
        let streamer = ProgressStreamer::new(store, retry_queue);

        let events: Vec<ProgressEvent> = streamer
            .stream(Uuid::new_v4())
            .take((MAX_CONSECUTIVE_FAILURES as usize) * 2 + 1)
            .collect()
            .await;

        assert!(events.iter().any(|e| matches!(e, ProgressEvent::Error { .. })));
        assert!(matches!(events.last().unwrap(), ProgressEvent::Close));
    }
}
