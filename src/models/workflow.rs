use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum StepKind {
    Http,
    Delay,
    Manual,
}

#[derive(Debug, FromRow, Serialize, Deserialize, Clone)]
pub struct Workflow {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, FromRow, Serialize, Deserialize, Clone)]
pub struct WorkflowStep {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub name: String,
    pub kind: StepKind,
    pub config: serde_json::Value,
    pub position: i64,
}

/// A workflow together with its ordered step sequence.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct WorkflowDetail {
    #[serde(flatten)]
    pub workflow: Workflow,
    pub steps: Vec<WorkflowStep>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct CreateWorkflow {
    pub name: String,
    pub description: Option<String>,
    #[serde(default)]
    pub steps: Vec<WorkflowStepInput>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct UpdateWorkflow {
    pub name: Option<String>,
    pub description: Option<String>,
    #[serde(default)]
    pub steps: Vec<WorkflowStepInput>,
}

/// A step as submitted by the editor. Steps carrying an `id` keep their
/// identity across an update; fresh steps get a new one.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct WorkflowStepInput {
    pub id: Option<Uuid>,
    pub name: String,
    pub kind: StepKind,
    #[serde(default)]
    pub config: serde_json::Value,
    pub position: Option<i64>,
}
