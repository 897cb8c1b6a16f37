//! Data model types (§3).

mod dependency;
mod gap;
mod manual_task;
mod outcome;
mod plan;
mod reflection;
mod score;
mod session;
mod task;

pub use dependency::{RelationshipType, TaskDependency};
pub use gap::{
    BridgingTask, Gap, GapAnalysisSession, GapIndicators, InsertionResult, PerformanceMetrics,
    PlanSnapshotEntry, UserAcceptance,
};
pub use manual_task::{ManualTask, ManualTaskStatus};
pub use outcome::Outcome;
pub use plan::{
    build_execution_waves, dependencies_from_scores, ExecutionWave, PlanDependency,
    PlanDependencyKind, PlanPayload, PrioritizedPlan, RemovedTask, TaskAnnotation,
};
pub use reflection::{Reflection, ReflectionIntent, ReflectionIntentType};
pub use score::StrategicScore;
pub use session::{
    AgentSession, ChainOfThoughtEntry, EvaluationMetadata, ExecutionMetadata, SessionResult,
    SessionStatus,
};
pub use task::{ManualOverride, QualityMetadata, TaskEmbedding, TaskStatus};
