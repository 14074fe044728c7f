use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum EventType {
    RunStarted,
    StepStarted,
    StepSucceeded,
    StepFailed,
    RunSucceeded,
    RunFailed,
}

/// One immutable journal record. The event sequence of a run, in creation
/// order, reconstructs its full causal history.
#[derive(Debug, FromRow, Serialize, Deserialize, Clone)]
pub struct RunEvent {
    pub id: Uuid,
    pub workflow_run_id: Uuid,
    pub step_run_id: Option<Uuid>,
    pub event_type: EventType,
    pub message: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}
