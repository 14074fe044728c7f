use sqlx::SqlitePool;

/// Applies the schema idempotently at startup. Every statement is a
/// `CREATE ... IF NOT EXISTS`, so re-running on an existing database is a
/// no-op and the pool can be pointed at a fresh file or `:memory:` alike.
pub async fn run(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    for statement in SCHEMA {
        sqlx::query(statement).execute(pool).await?;
    }
    Ok(())
}

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS workflows (
        id          TEXT PRIMARY KEY,
        name        TEXT NOT NULL,
        description TEXT,
        created_at  TEXT NOT NULL,
        updated_at  TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS workflow_steps (
        id          TEXT PRIMARY KEY,
        workflow_id TEXT NOT NULL REFERENCES workflows(id) ON DELETE CASCADE,
        name        TEXT NOT NULL,
        kind        TEXT NOT NULL,
        config      TEXT NOT NULL,
        position    INTEGER NOT NULL,
        UNIQUE (workflow_id, position)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS workflow_runs (
        id          TEXT PRIMARY KEY,
        workflow_id TEXT NOT NULL REFERENCES workflows(id) ON DELETE CASCADE,
        status      TEXT NOT NULL DEFAULT 'pending',
        created_at  TEXT NOT NULL,
        started_at  TEXT,
        finished_at TEXT
    )
    "#,
    // step runs snapshot the step id and position at run creation; the
    // column carries no foreign key into workflow_steps so that definition
    // edits cannot cascade into live runs
    r#"
    CREATE TABLE IF NOT EXISTS step_runs (
        id               TEXT PRIMARY KEY,
        workflow_run_id  TEXT NOT NULL REFERENCES workflow_runs(id) ON DELETE CASCADE,
        workflow_step_id TEXT NOT NULL,
        position         INTEGER NOT NULL,
        status           TEXT NOT NULL DEFAULT 'pending',
        started_at       TEXT,
        finished_at      TEXT,
        UNIQUE (workflow_run_id, workflow_step_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS events (
        id              TEXT PRIMARY KEY,
        workflow_run_id TEXT NOT NULL REFERENCES workflow_runs(id) ON DELETE CASCADE,
        step_run_id     TEXT REFERENCES step_runs(id) ON DELETE CASCADE,
        event_type      TEXT NOT NULL,
        message         TEXT NOT NULL,
        created_at      TEXT NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_workflow_steps_workflow ON workflow_steps(workflow_id, position)",
    "CREATE INDEX IF NOT EXISTS idx_workflow_runs_workflow ON workflow_runs(workflow_id)",
    "CREATE INDEX IF NOT EXISTS idx_step_runs_run ON step_runs(workflow_run_id, position)",
    "CREATE INDEX IF NOT EXISTS idx_events_run ON events(workflow_run_id, created_at)",
];
