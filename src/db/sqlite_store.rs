use std::collections::HashMap;
use std::str::FromStr;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::db::store::Store;
use crate::models::run_event::{EventType, RunEvent};
use crate::models::step_run::StepRun;
use crate::models::workflow::{Workflow, WorkflowDetail, WorkflowStep, WorkflowStepInput};
use crate::models::workflow_run::{RunStatus, WorkflowRun};

const WORKFLOW_COLUMNS: &str = "id, name, description, created_at, updated_at";
const STEP_COLUMNS: &str = "id, workflow_id, name, kind, config, position";
const RUN_COLUMNS: &str = "id, workflow_id, status, created_at, started_at, finished_at";
const STEP_RUN_COLUMNS: &str =
    "id, workflow_run_id, workflow_step_id, position, status, started_at, finished_at";
const EVENT_COLUMNS: &str = "id, workflow_run_id, step_run_id, event_type, message, created_at";

pub struct SqliteStore {
    pub pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Opens (creating if missing) the database behind `database_url` with
    /// foreign keys enforced, which the cascade rules of the schema rely on.
    pub async fn connect(database_url: &str) -> Result<SqlitePool, sqlx::Error> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .foreign_keys(true);
        SqlitePoolOptions::new().connect_with(options).await
    }

    async fn steps_for_workflow(
        &self,
        workflow_id: Uuid,
    ) -> Result<Vec<WorkflowStep>, sqlx::Error> {
        sqlx::query_as::<_, WorkflowStep>(&format!(
            "SELECT {STEP_COLUMNS} FROM workflow_steps WHERE workflow_id = $1 ORDER BY position ASC"
        ))
        .bind(workflow_id)
        .fetch_all(&self.pool)
        .await
    }
}

/// Orders the submitted steps by their requested position (list order wins
/// ties and fills in for absent positions) and reindexes them contiguously
/// from 0, which is the only layout the schema accepts.
fn normalize_step_order(steps: Vec<WorkflowStepInput>) -> Vec<WorkflowStepInput> {
    let mut keyed: Vec<(i64, usize, WorkflowStepInput)> = steps
        .into_iter()
        .enumerate()
        .map(|(index, step)| (step.position.unwrap_or(index as i64), index, step))
        .collect();
    keyed.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.cmp(&b.1)));
    keyed
        .into_iter()
        .enumerate()
        .map(|(index, (_, _, mut step))| {
            step.position = Some(index as i64);
            step
        })
        .collect()
}

async fn insert_steps(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    workflow_id: Uuid,
    steps: Vec<WorkflowStepInput>,
) -> Result<Vec<WorkflowStep>, sqlx::Error> {
    let mut inserted = Vec::with_capacity(steps.len());
    for step in normalize_step_order(steps) {
        let row = sqlx::query_as::<_, WorkflowStep>(&format!(
            r#"
            INSERT INTO workflow_steps (id, workflow_id, name, kind, config, position)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING {STEP_COLUMNS}
            "#
        ))
        .bind(step.id.unwrap_or_else(Uuid::new_v4))
        .bind(workflow_id)
        .bind(&step.name)
        .bind(step.kind)
        .bind(&step.config)
        .bind(step.position)
        .fetch_one(&mut **tx)
        .await?;
        inserted.push(row);
    }
    Ok(inserted)
}

#[async_trait]
impl Store for SqliteStore {
    async fn list_workflows(&self) -> Result<Vec<WorkflowDetail>, sqlx::Error> {
        let workflows = sqlx::query_as::<_, Workflow>(&format!(
            "SELECT {WORKFLOW_COLUMNS} FROM workflows ORDER BY created_at DESC, rowid DESC"
        ))
        .fetch_all(&self.pool)
        .await?;

        let steps = sqlx::query_as::<_, WorkflowStep>(&format!(
            "SELECT {STEP_COLUMNS} FROM workflow_steps ORDER BY workflow_id, position ASC"
        ))
        .fetch_all(&self.pool)
        .await?;

        let mut by_workflow: HashMap<Uuid, Vec<WorkflowStep>> = HashMap::new();
        for step in steps {
            by_workflow.entry(step.workflow_id).or_default().push(step);
        }

        Ok(workflows
            .into_iter()
            .map(|workflow| {
                let steps = by_workflow.remove(&workflow.id).unwrap_or_default();
                WorkflowDetail { workflow, steps }
            })
            .collect())
    }

    async fn find_workflow(
        &self,
        workflow_id: Uuid,
    ) -> Result<Option<WorkflowDetail>, sqlx::Error> {
        let workflow = sqlx::query_as::<_, Workflow>(&format!(
            "SELECT {WORKFLOW_COLUMNS} FROM workflows WHERE id = $1"
        ))
        .bind(workflow_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(workflow) = workflow else {
            return Ok(None);
        };
        let steps = self.steps_for_workflow(workflow_id).await?;
        Ok(Some(WorkflowDetail { workflow, steps }))
    }

    async fn create_workflow<'a>(
        &self,
        name: &'a str,
        description: Option<&'a str>,
        steps: Vec<WorkflowStepInput>,
    ) -> Result<WorkflowDetail, sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        let now = OffsetDateTime::now_utc();

        let workflow = sqlx::query_as::<_, Workflow>(&format!(
            r#"
            INSERT INTO workflows (id, name, description, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $4)
            RETURNING {WORKFLOW_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(name)
        .bind(description)
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;

        let steps = insert_steps(&mut tx, workflow.id, steps).await?;
        tx.commit().await?;

        Ok(WorkflowDetail { workflow, steps })
    }

    async fn update_workflow<'a>(
        &self,
        workflow_id: Uuid,
        name: Option<&'a str>,
        description: Option<&'a str>,
        steps: Vec<WorkflowStepInput>,
    ) -> Result<Option<WorkflowDetail>, sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        let workflow = sqlx::query_as::<_, Workflow>(&format!(
            r#"
            UPDATE workflows
            SET name = COALESCE($2, name),
                description = COALESCE($3, description),
                updated_at = $4
            WHERE id = $1
            RETURNING {WORKFLOW_COLUMNS}
            "#
        ))
        .bind(workflow_id)
        .bind(name)
        .bind(description)
        .bind(OffsetDateTime::now_utc())
        .fetch_optional(&mut *tx)
        .await?;

        let Some(workflow) = workflow else {
            return Ok(None);
        };

        sqlx::query("DELETE FROM workflow_steps WHERE workflow_id = $1")
            .bind(workflow_id)
            .execute(&mut *tx)
            .await?;
        let steps = insert_steps(&mut tx, workflow_id, steps).await?;
        tx.commit().await?;

        Ok(Some(WorkflowDetail { workflow, steps }))
    }

    async fn create_run(&self, workflow_id: Uuid) -> Result<Option<WorkflowRun>, sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        let exists = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM workflows WHERE id = $1")
            .bind(workflow_id)
            .fetch_one(&mut *tx)
            .await?;
        if exists == 0 {
            return Ok(None);
        }

        let steps = sqlx::query_as::<_, WorkflowStep>(&format!(
            "SELECT {STEP_COLUMNS} FROM workflow_steps WHERE workflow_id = $1 ORDER BY position ASC"
        ))
        .bind(workflow_id)
        .fetch_all(&mut *tx)
        .await?;

        let run = sqlx::query_as::<_, WorkflowRun>(&format!(
            r#"
            INSERT INTO workflow_runs (id, workflow_id, status, created_at)
            VALUES ($1, $2, $3, $4)
            RETURNING {RUN_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(workflow_id)
        .bind(RunStatus::Pending)
        .bind(OffsetDateTime::now_utc())
        .fetch_one(&mut *tx)
        .await?;

        for step in &steps {
            sqlx::query(
                r#"
                INSERT INTO step_runs (id, workflow_run_id, workflow_step_id, position, status)
                VALUES ($1, $2, $3, $4, $5)
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(run.id)
            .bind(step.id)
            .bind(step.position)
            .bind(RunStatus::Pending)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(Some(run))
    }

    async fn find_run(&self, run_id: Uuid) -> Result<Option<WorkflowRun>, sqlx::Error> {
        sqlx::query_as::<_, WorkflowRun>(&format!(
            "SELECT {RUN_COLUMNS} FROM workflow_runs WHERE id = $1"
        ))
        .bind(run_id)
        .fetch_optional(&self.pool)
        .await
    }

    async fn list_runs(&self, workflow_id: Uuid) -> Result<Vec<WorkflowRun>, sqlx::Error> {
        sqlx::query_as::<_, WorkflowRun>(&format!(
            r#"
            SELECT {RUN_COLUMNS} FROM workflow_runs
            WHERE workflow_id = $1
            ORDER BY created_at DESC, rowid DESC
            "#
        ))
        .bind(workflow_id)
        .fetch_all(&self.pool)
        .await
    }

    async fn list_unfinished_runs(&self) -> Result<Vec<WorkflowRun>, sqlx::Error> {
        sqlx::query_as::<_, WorkflowRun>(&format!(
            r#"
            SELECT {RUN_COLUMNS} FROM workflow_runs
            WHERE status IN ('pending', 'running')
            ORDER BY created_at ASC, rowid ASC
            "#
        ))
        .fetch_all(&self.pool)
        .await
    }

    async fn find_step_run(&self, step_run_id: Uuid) -> Result<Option<StepRun>, sqlx::Error> {
        sqlx::query_as::<_, StepRun>(&format!(
            "SELECT {STEP_RUN_COLUMNS} FROM step_runs WHERE id = $1"
        ))
        .bind(step_run_id)
        .fetch_optional(&self.pool)
        .await
    }

    async fn list_step_runs(&self, run_id: Uuid) -> Result<Vec<StepRun>, sqlx::Error> {
        sqlx::query_as::<_, StepRun>(&format!(
            r#"
            SELECT {STEP_RUN_COLUMNS} FROM step_runs
            WHERE workflow_run_id = $1
            ORDER BY position ASC
            "#
        ))
        .bind(run_id)
        .fetch_all(&self.pool)
        .await
    }

    async fn list_events(&self, run_id: Uuid) -> Result<Vec<RunEvent>, sqlx::Error> {
        sqlx::query_as::<_, RunEvent>(&format!(
            r#"
            SELECT {EVENT_COLUMNS} FROM events
            WHERE workflow_run_id = $1
            ORDER BY created_at ASC, rowid ASC
            "#
        ))
        .bind(run_id)
        .fetch_all(&self.pool)
        .await
    }

    async fn set_run_status(
        &self,
        run_id: Uuid,
        status: RunStatus,
    ) -> Result<Option<WorkflowRun>, sqlx::Error> {
        sqlx::query_as::<_, WorkflowRun>(&format!(
            r#"
            UPDATE workflow_runs
            SET status = $2,
                started_at = CASE
                    WHEN $2 = 'running' AND started_at IS NULL THEN $3
                    ELSE started_at
                END,
                finished_at = CASE
                    WHEN $2 IN ('succeeded', 'failed') AND finished_at IS NULL THEN $3
                    ELSE finished_at
                END
            WHERE id = $1 AND status NOT IN ('succeeded', 'failed')
            RETURNING {RUN_COLUMNS}
            "#
        ))
        .bind(run_id)
        .bind(status)
        .bind(OffsetDateTime::now_utc())
        .fetch_optional(&self.pool)
        .await
    }

    async fn set_step_run_status(
        &self,
        step_run_id: Uuid,
        status: RunStatus,
    ) -> Result<Option<StepRun>, sqlx::Error> {
        sqlx::query_as::<_, StepRun>(&format!(
            r#"
            UPDATE step_runs
            SET status = $2,
                started_at = CASE
                    WHEN $2 = 'running' AND started_at IS NULL THEN $3
                    ELSE started_at
                END,
                finished_at = CASE
                    WHEN $2 IN ('succeeded', 'failed') AND finished_at IS NULL THEN $3
                    ELSE finished_at
                END
            WHERE id = $1 AND status NOT IN ('succeeded', 'failed')
            RETURNING {STEP_RUN_COLUMNS}
            "#
        ))
        .bind(step_run_id)
        .bind(status)
        .bind(OffsetDateTime::now_utc())
        .fetch_optional(&self.pool)
        .await
    }

    async fn append_event(
        &self,
        run_id: Uuid,
        step_run_id: Option<Uuid>,
        event_type: EventType,
        message: &str,
    ) -> Result<RunEvent, sqlx::Error> {
        sqlx::query_as::<_, RunEvent>(&format!(
            r#"
            INSERT INTO events (id, workflow_run_id, step_run_id, event_type, message, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING {EVENT_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(run_id)
        .bind(step_run_id)
        .bind(event_type)
        .bind(message)
        .bind(OffsetDateTime::now_utc())
        .fetch_one(&self.pool)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::migrations;
    use crate::models::workflow::StepKind;
    use serde_json::json;

    async fn test_store() -> SqliteStore {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("in-memory database should open");
        migrations::run(&pool).await.expect("schema should apply");
        SqliteStore::new(pool)
    }

    fn step(name: &str, kind: StepKind, config: serde_json::Value) -> WorkflowStepInput {
        WorkflowStepInput {
            id: None,
            name: name.into(),
            kind,
            config,
            position: None,
        }
    }

    #[test]
    fn step_order_is_honored_and_reindexed() {
        let mut a = step("a", StepKind::Delay, json!({}));
        let mut b = step("b", StepKind::Delay, json!({}));
        let c = step("c", StepKind::Delay, json!({}));
        a.position = Some(7);
        b.position = Some(2);

        let normalized = normalize_step_order(vec![a, b, c]);

        let names: Vec<&str> = normalized.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["b", "c", "a"]);
        let positions: Vec<i64> = normalized.iter().filter_map(|s| s.position).collect();
        assert_eq!(positions, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn create_and_fetch_workflow_round_trips_steps() {
        let store = test_store().await;
        let created = store
            .create_workflow(
                "deploy",
                Some("ship it"),
                vec![
                    step("wait", StepKind::Delay, json!({"seconds": 0})),
                    step("ping", StepKind::Http, json!({"url": "http://example.test"})),
                    step("sign-off", StepKind::Manual, json!(null)),
                ],
            )
            .await
            .expect("workflow should persist");

        let fetched = store
            .find_workflow(created.workflow.id)
            .await
            .expect("fetch should succeed")
            .expect("workflow should exist");

        assert_eq!(fetched.workflow.name, "deploy");
        assert_eq!(fetched.steps.len(), 3);
        assert_eq!(
            fetched.steps.iter().map(|s| s.position).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
        assert_eq!(fetched.steps[1].kind, StepKind::Http);
    }

    #[tokio::test]
    async fn update_workflow_replaces_steps_and_keeps_ids() {
        let store = test_store().await;
        let created = store
            .create_workflow(
                "pipeline",
                None,
                vec![
                    step("first", StepKind::Delay, json!({})),
                    step("second", StepKind::Manual, json!(null)),
                ],
            )
            .await
            .expect("workflow should persist");

        let kept_id = created.steps[1].id;
        let mut kept = step("second renamed", StepKind::Manual, json!(null));
        kept.id = Some(kept_id);

        let updated = store
            .update_workflow(
                created.workflow.id,
                Some("pipeline v2"),
                None,
                vec![kept, step("third", StepKind::Delay, json!({"seconds": 1}))],
            )
            .await
            .expect("update should succeed")
            .expect("workflow should exist");

        assert_eq!(updated.workflow.name, "pipeline v2");
        assert_eq!(updated.steps.len(), 2);
        assert_eq!(updated.steps[0].id, kept_id);
        assert_eq!(updated.steps[0].name, "second renamed");
        assert_eq!(updated.steps[1].position, 1);
    }

    #[tokio::test]
    async fn update_unknown_workflow_is_none() {
        let store = test_store().await;
        let result = store
            .update_workflow(Uuid::new_v4(), Some("ghost"), None, vec![])
            .await
            .expect("update should not error");
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn create_run_snapshots_a_pending_step_run_per_step() {
        let store = test_store().await;
        let workflow = store
            .create_workflow(
                "w",
                None,
                vec![
                    step("a", StepKind::Delay, json!({})),
                    step("b", StepKind::Http, json!({"url": "http://example.test"})),
                ],
            )
            .await
            .expect("workflow should persist");

        let run = store
            .create_run(workflow.workflow.id)
            .await
            .expect("run creation should succeed")
            .expect("workflow exists");
        assert_eq!(run.status, RunStatus::Pending);
        assert!(run.started_at.is_none());

        let step_runs = store
            .list_step_runs(run.id)
            .await
            .expect("step runs should list");
        assert_eq!(step_runs.len(), 2);
        assert!(step_runs.iter().all(|s| s.status == RunStatus::Pending));
        assert_eq!(step_runs[0].workflow_step_id, workflow.steps[0].id);
        assert_eq!(step_runs[1].workflow_step_id, workflow.steps[1].id);
    }

    #[tokio::test]
    async fn create_run_for_unknown_workflow_is_none() {
        let store = test_store().await;
        let run = store
            .create_run(Uuid::new_v4())
            .await
            .expect("create_run should not error");
        assert!(run.is_none());
    }

    #[tokio::test]
    async fn run_status_transitions_set_timestamps_once() {
        let store = test_store().await;
        let workflow = store
            .create_workflow("w", None, vec![])
            .await
            .expect("workflow should persist");
        let run = store
            .create_run(workflow.workflow.id)
            .await
            .expect("run creation should succeed")
            .expect("workflow exists");

        let running = store
            .set_run_status(run.id, RunStatus::Running)
            .await
            .expect("transition should apply")
            .expect("run is not terminal");
        let started_at = running.started_at.expect("started_at set on first RUNNING");

        // a second RUNNING transition must not move started_at
        let still_running = store
            .set_run_status(run.id, RunStatus::Running)
            .await
            .expect("transition should apply")
            .expect("run is not terminal");
        assert_eq!(still_running.started_at, Some(started_at));

        let failed = store
            .set_run_status(run.id, RunStatus::Failed)
            .await
            .expect("transition should apply")
            .expect("run is not terminal");
        assert!(failed.finished_at.is_some());

        // terminal statuses absorb every later transition
        let after = store
            .set_run_status(run.id, RunStatus::Succeeded)
            .await
            .expect("no-op transition should not error");
        assert!(after.is_none());
        let reloaded = store
            .find_run(run.id)
            .await
            .expect("fetch should succeed")
            .expect("run exists");
        assert_eq!(reloaded.status, RunStatus::Failed);
        assert_eq!(reloaded.finished_at, failed.finished_at);
    }

    #[tokio::test]
    async fn step_run_terminal_status_absorbs() {
        let store = test_store().await;
        let workflow = store
            .create_workflow("w", None, vec![step("m", StepKind::Manual, json!(null))])
            .await
            .expect("workflow should persist");
        let run = store
            .create_run(workflow.workflow.id)
            .await
            .expect("run creation should succeed")
            .expect("workflow exists");
        let step_run = store.list_step_runs(run.id).await.expect("step runs")[0].clone();

        let done = store
            .set_step_run_status(step_run.id, RunStatus::Succeeded)
            .await
            .expect("transition should apply")
            .expect("step run is not terminal");
        assert!(done.finished_at.is_some());

        let racing = store
            .set_step_run_status(step_run.id, RunStatus::Failed)
            .await
            .expect("no-op transition should not error");
        assert!(racing.is_none());
    }

    #[tokio::test]
    async fn events_list_in_insertion_order() {
        let store = test_store().await;
        let workflow = store
            .create_workflow("w", None, vec![])
            .await
            .expect("workflow should persist");
        let run = store
            .create_run(workflow.workflow.id)
            .await
            .expect("run creation should succeed")
            .expect("workflow exists");

        for i in 0..5 {
            store
                .append_event(run.id, None, EventType::RunStarted, &format!("event {i}"))
                .await
                .expect("append should succeed");
        }

        let events = store.list_events(run.id).await.expect("events should list");
        let messages: Vec<&str> = events.iter().map(|e| e.message.as_str()).collect();
        assert_eq!(
            messages,
            vec!["event 0", "event 1", "event 2", "event 3", "event 4"]
        );
    }

    #[tokio::test]
    async fn unfinished_runs_exclude_terminal() {
        let store = test_store().await;
        let workflow = store
            .create_workflow("w", None, vec![])
            .await
            .expect("workflow should persist");
        let open = store
            .create_run(workflow.workflow.id)
            .await
            .expect("run creation should succeed")
            .expect("workflow exists");
        let closed = store
            .create_run(workflow.workflow.id)
            .await
            .expect("run creation should succeed")
            .expect("workflow exists");
        store
            .set_run_status(closed.id, RunStatus::Succeeded)
            .await
            .expect("transition should apply");

        let unfinished = store
            .list_unfinished_runs()
            .await
            .expect("listing should succeed");
        let ids: Vec<Uuid> = unfinished.iter().map(|r| r.id).collect();
        assert!(ids.contains(&open.id));
        assert!(!ids.contains(&closed.id));
    }
}
