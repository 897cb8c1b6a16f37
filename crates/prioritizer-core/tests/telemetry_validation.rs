//! Telemetry validation: verifies the structured-log event names spec.md §6
//! requires (`strategic_score_retry`, `retry_exhausted`) actually fire
//! during retry-queue execution, the way the teacher validates its own
//! span/event instrumentation in `telemetry_validation.rs`.

use std::sync::{Arc, Mutex};

use chrono::Utc;
use prioritizer_core::error::Error;
use prioritizer_core::retry_queue::{JobStatus, RetryQueue, MAX_ATTEMPTS};
use prioritizer_testing::{FixedClock, InMemoryStore};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use uuid::Uuid;

/// Collects the `message` field of every event observed while installed.
struct EventCollector {
    messages: Arc<Mutex<Vec<String>>>,
}

struct MessageVisitor<'a>(&'a mut Option<String>);

impl tracing::field::Visit for MessageVisitor<'_> {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            *self.0 = Some(format!("{value:?}").trim_matches('"').to_string());
        }
    }
}

impl<S: Subscriber> tracing_subscriber::Layer<S> for EventCollector {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut message = None;
        event.record(&mut MessageVisitor(&mut message));
        if let Some(message) = message {
            if let Ok(mut messages) = self.messages.lock() {
                messages.push(message);
            }
        }
    }
}

#[tokio::test]
async fn retry_exhaustion_emits_retry_then_retry_exhausted_events() {
    let messages: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let collector = EventCollector {
        messages: Arc::clone(&messages),
    };
    let subscriber = tracing_subscriber::registry().with(collector);
    let _guard = subscriber.set_default();

    let queue = RetryQueue::new(
        Arc::new(FixedClock::new(Utc::now())),
        Arc::new(InMemoryStore::new()),
        true,
    );
    let session_id = Uuid::new_v4();

    let result = queue
        .enqueue(session_id, "refactor-legacy-auth", || async {
            Err::<(), _>(Error::upstream_unavailable("forced rejection"))
        })
        .await;
    assert!(result.is_err());

    let captured = messages.lock().unwrap();
    let retry_count = captured
        .iter()
        .filter(|m| m.contains("strategic_score_retry") && !m.contains("exhausted"))
        .count();
    let exhausted_count = captured
        .iter()
        .filter(|m| m.contains("strategic_score_retry") && m.contains("exhausted"))
        .count();

    // One plain "strategic_score_retry" info event per attempt (1..=MAX_ATTEMPTS),
    // plus a distinct "strategic_score_retry exhausted" warn after the last.
    assert_eq!(retry_count, MAX_ATTEMPTS as usize);
    assert_eq!(exhausted_count, 1);

    let snapshot = queue.status_snapshot(session_id).await;
    let job = snapshot.get("refactor-legacy-auth").unwrap();
    assert_eq!(job.attempts, MAX_ATTEMPTS);
    assert_eq!(job.status, JobStatus::Failed);
}
