use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::models::workflow_run::RunStatus;

/// Execution state of one step within a run. Created PENDING alongside the
/// run; `workflow_step_id` and `position` are snapshots taken at run
/// creation, so later edits to the workflow definition do not move them.
#[derive(Debug, FromRow, Serialize, Deserialize, Clone)]
pub struct StepRun {
    pub id: Uuid,
    pub workflow_run_id: Uuid,
    pub workflow_step_id: Uuid,
    pub position: i64,
    pub status: RunStatus,
    #[serde(with = "time::serde::rfc3339::option")]
    pub started_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub finished_at: Option<OffsetDateTime>,
}
