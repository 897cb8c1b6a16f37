//! Session Controller (§4.1): owns the state machine of a prioritization
//! run for one `(user_id, outcome_id)`.

use std::sync::Arc;

use chrono::Duration as ChronoDuration;
use tracing::{info, warn};
use uuid::Uuid;

use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::model::{AgentSession, PrioritizedPlan, SessionStatus};
use crate::store::PersistentStore;

pub struct SessionController {
    store: Arc<dyn PersistentStore>,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
}

impl SessionController {
    pub fn new(store: Arc<dyn PersistentStore>, clock: Arc<dyn Clock>, config: EngineConfig) -> Self {
        Self {
            store,
            clock,
            config,
        }
    }

    /// `StartSession(outcome_id, user_id) -> session_id` (§4.1).
    ///
    /// Verifies the outcome is active and belongs to the user, deletes any
    /// prior session for the user, inserts a new `running` session with
    /// zeroed `execution_metadata`, and returns immediately. Orchestration
    /// (the hybrid loop, scoring) is driven by the caller (`engine`) after
    /// this returns, matching §4.1's "enqueues orchestration work; returns
    /// immediately".
    pub async fn start_session(&self, user_id: &str, outcome_id: Uuid) -> Result<Uuid> {
        let outcome = self.store.get_outcome(outcome_id).await?;
        if outcome.user_id != user_id {
            return Err(Error::permission(format!(
                "outcome {outcome_id} does not belong to user {user_id}"
            )));
        }
        if !outcome.is_active {
            return Err(Error::validation(format!(
                "outcome {outcome_id} is not active"
            )));
        }

        self.store
            .delete_sessions_for_outcome(user_id, outcome_id)
            .await?;

        let now = self.clock.now();
        let session = AgentSession::new_running(user_id, outcome_id, now);
        let session_id = session.id;
        self.store.insert_session(&session).await?;

        info!(
            session_id = %session_id,
            user_id,
            %outcome_id,
            "prioritization session started"
        );

        Ok(session_id)
    }

    /// `GetSession(session_id) -> session_record` (§4.1). Performs
    /// opportunistic expiry cleanup before returning.
    pub async fn get_session(&self, session_id: Uuid) -> Result<AgentSession> {
        self.cleanup_expired_sessions().await;
        let mut session = self.store.get_session(session_id).await?;
        self.force_fail_if_overrun(&mut session).await?;
        Ok(session)
    }

    /// `GetLatestCompleted(user_id, outcome_id)` (§4.1).
    pub async fn get_latest_completed(
        &self,
        user_id: &str,
        outcome_id: Uuid,
    ) -> Result<Option<AgentSession>> {
        self.cleanup_expired_sessions().await;
        self.store
            .get_latest_completed_session(user_id, outcome_id)
            .await
    }

    /// Marks a `running` session that has exceeded the configured wall-time
    /// budget as `failed` (§4.1: "running sessions beyond a max wall-time
    /// ... are forcibly marked failed").
    async fn force_fail_if_overrun(&self, session: &mut AgentSession) -> Result<()> {
        if session.status != SessionStatus::Running {
            return Ok(());
        }
        let now = self.clock.now();
        let max_runtime = ChronoDuration::from_std(self.config.session_max_runtime)
            .unwrap_or_else(|_| ChronoDuration::minutes(20));
        if session.has_exceeded_runtime(now, max_runtime) {
            session.status = SessionStatus::Failed;
            session.execution_metadata.error_count += 1;
            session.updated_at = now;
            self.store.update_session(session).await?;
            warn!(session_id = %session.id, "session force-failed after exceeding wall-time budget");
        }
        Ok(())
    }

    /// Opportunistic cleanup (§4.1, §9): never blocks or fails the read
    /// that triggered it.
    async fn cleanup_expired_sessions(&self) {
        let cutoff = self.clock.now() - ChronoDuration::from_std(self.config.session_expiry)
            .unwrap_or_else(|_| ChronoDuration::days(30));
        if let Err(err) = self.store.delete_expired_sessions(cutoff).await {
            warn!(error = %err, "expired-session cleanup failed; continuing with the read");
        }
    }

    /// Completes a session by writing its final plan, baseline (if this is
    /// the session's first completion), and evaluation metadata
    /// atomically (§4.2: "writes it ... atomically").
    pub async fn complete_session(
        &self,
        mut session: AgentSession,
        plan: PrioritizedPlan,
        evaluation_metadata: crate::model::EvaluationMetadata,
    ) -> Result<AgentSession> {
        plan.validate()?;
        if session.baseline_plan.is_none() {
            session.baseline_plan = Some(plan.clone());
        }
        session.prioritized_plan = Some(plan);
        session.evaluation_metadata = Some(evaluation_metadata);
        session.status = SessionStatus::Completed;
        session.updated_at = self.clock.now();
        self.store.update_session(&session).await?;
        info!(session_id = %session.id, "prioritization session completed");
        Ok(session)
    }

    /// Marks a session `failed`, optionally due to cancellation (§5:
    /// "Cancellation never raises; it marks the session failed with
    /// reason=\"cancelled\"").
    pub async fn fail_session(&self, mut session: AgentSession, reason: &str) -> Result<AgentSession> {
        session.status = SessionStatus::Failed;
        session.execution_metadata.error_count += 1;
        session.updated_at = self.clock.now();
        self.store.update_session(&session).await?;
        warn!(session_id = %session.id, reason, "prioritization session failed");
        Ok(session)
    }

    /// `AdjustPriorities(session_id, active_reflection_ids[]) -> adjusted_plan` validation gate
    /// (§4.1): requires a non-null `baseline_plan` less than 7 days old.
    /// The actual recomputation is §4.5's responsibility; this validates
    /// the precondition and hands back the baseline to adjust.
    pub async fn baseline_for_adjustment(&self, session_id: Uuid) -> Result<(AgentSession, PrioritizedPlan)> {
        let session = self.get_session(session_id).await?;
        let Some(baseline) = session.baseline_plan.clone() else {
            return Err(Error::validation(format!(
                "session {session_id} has no baseline plan to adjust"
            )));
        };
        let age = session
            .baseline_age(self.clock.now())
            .unwrap_or_else(ChronoDuration::zero);
        if age > ChronoDuration::days(7) {
            return Err(Error::validation(format!(
                "baseline plan for session {session_id} is older than 7 days and cannot be adjusted"
            )));
        }
        if age > ChronoDuration::hours(24) {
            warn!(session_id = %session_id, age_hours = age.num_hours(), "adjusting a baseline plan older than 24h");
        }
        Ok((session, baseline))
    }
}
