use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use uuid::Uuid;

use crate::models::run_event::{EventType, RunEvent};
use crate::models::step_run::StepRun;
use crate::models::workflow::{WorkflowDetail, WorkflowStepInput};
use crate::models::workflow_run::{RunStatus, WorkflowRun};

/// Durable persistence seam for the engine. Every read and write of
/// workflows, runs, step runs, and journal events goes through here; the
/// implementation provides transactional isolation and crash safety (the
/// visible state after a restart is the last committed transaction).
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Store: Send + Sync {
    /// All workflows with their steps, newest first.
    async fn list_workflows(&self) -> Result<Vec<WorkflowDetail>, sqlx::Error>;

    /// A workflow with its steps ordered by position.
    async fn find_workflow(
        &self,
        workflow_id: Uuid,
    ) -> Result<Option<WorkflowDetail>, sqlx::Error>;

    /// Persists a workflow and its step sequence atomically.
    async fn create_workflow<'a>(
        &self,
        name: &'a str,
        description: Option<&'a str>,
        steps: Vec<WorkflowStepInput>,
    ) -> Result<WorkflowDetail, sqlx::Error>;

    /// Replaces the step sequence atomically: existing steps are deleted
    /// and the provided list reinserted. Steps carrying an id keep it.
    /// Returns `None` when the workflow does not exist.
    async fn update_workflow<'a>(
        &self,
        workflow_id: Uuid,
        name: Option<&'a str>,
        description: Option<&'a str>,
        steps: Vec<WorkflowStepInput>,
    ) -> Result<Option<WorkflowDetail>, sqlx::Error>;

    /// Creates a PENDING run plus a PENDING step run for every step of the
    /// workflow, in a single transaction. Returns `None` when the workflow
    /// does not exist.
    async fn create_run(&self, workflow_id: Uuid) -> Result<Option<WorkflowRun>, sqlx::Error>;

    async fn find_run(&self, run_id: Uuid) -> Result<Option<WorkflowRun>, sqlx::Error>;

    /// Runs of a workflow, newest first.
    async fn list_runs(&self, workflow_id: Uuid) -> Result<Vec<WorkflowRun>, sqlx::Error>;

    /// Runs that have not reached a terminal status, oldest first.
    async fn list_unfinished_runs(&self) -> Result<Vec<WorkflowRun>, sqlx::Error>;

    async fn find_step_run(&self, step_run_id: Uuid) -> Result<Option<StepRun>, sqlx::Error>;

    /// Step runs of a run, in step order.
    async fn list_step_runs(&self, run_id: Uuid) -> Result<Vec<StepRun>, sqlx::Error>;

    /// Journal of a run, in creation order (stable across equal timestamps).
    async fn list_events(&self, run_id: Uuid) -> Result<Vec<RunEvent>, sqlx::Error>;

    /// Conditional status transition. Sets `started_at` on the first move
    /// to RUNNING and `finished_at` on the move to a terminal status;
    /// existing timestamps are never overwritten. Returns `None` when the
    /// run is missing or already terminal (terminal statuses absorb).
    async fn set_run_status(
        &self,
        run_id: Uuid,
        status: RunStatus,
    ) -> Result<Option<WorkflowRun>, sqlx::Error>;

    /// Same transition rules as [`Store::set_run_status`], for a step run.
    async fn set_step_run_status(
        &self,
        step_run_id: Uuid,
        status: RunStatus,
    ) -> Result<Option<StepRun>, sqlx::Error>;

    /// Appends one immutable journal record with a fresh id and the
    /// current timestamp.
    async fn append_event(
        &self,
        run_id: Uuid,
        step_run_id: Option<Uuid>,
        event_type: EventType,
        message: &str,
    ) -> Result<RunEvent, sqlx::Error>;
}
