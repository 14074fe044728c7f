use std::sync::Arc;

use uuid::Uuid;

use crate::db::store::Store;
use crate::models::run_event::{EventType, RunEvent};

/// The single gate through which state transitions reach the journal.
/// Every status change appends exactly one record here, which keeps the
/// causal ordering of a run's history auditable from a handful of call
/// sites.
#[derive(Clone)]
pub struct RunJournal {
    store: Arc<dyn Store>,
}

impl RunJournal {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub async fn run_started(&self, run_id: Uuid, message: &str) -> Result<RunEvent, sqlx::Error> {
        self.store
            .append_event(run_id, None, EventType::RunStarted, message)
            .await
    }

    pub async fn run_succeeded(
        &self,
        run_id: Uuid,
        message: &str,
    ) -> Result<RunEvent, sqlx::Error> {
        self.store
            .append_event(run_id, None, EventType::RunSucceeded, message)
            .await
    }

    pub async fn run_failed(&self, run_id: Uuid, message: &str) -> Result<RunEvent, sqlx::Error> {
        self.store
            .append_event(run_id, None, EventType::RunFailed, message)
            .await
    }

    pub async fn step_started(
        &self,
        run_id: Uuid,
        step_run_id: Uuid,
        message: &str,
    ) -> Result<RunEvent, sqlx::Error> {
        self.store
            .append_event(run_id, Some(step_run_id), EventType::StepStarted, message)
            .await
    }

    pub async fn step_succeeded(
        &self,
        run_id: Uuid,
        step_run_id: Uuid,
        message: &str,
    ) -> Result<RunEvent, sqlx::Error> {
        self.store
            .append_event(run_id, Some(step_run_id), EventType::StepSucceeded, message)
            .await
    }

    pub async fn step_failed(
        &self,
        run_id: Uuid,
        step_run_id: Uuid,
        message: &str,
    ) -> Result<RunEvent, sqlx::Error> {
        self.store
            .append_event(run_id, Some(step_run_id), EventType::StepFailed, message)
            .await
    }
}
