use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use thiserror::Error;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::broker::Broker;
use crate::db::store::Store;
use crate::engine::handlers;
use crate::engine::journal::RunJournal;
use crate::models::run_event::EventType;
use crate::models::step_run::StepRun;
use crate::models::workflow::{StepKind, WorkflowStep};
use crate::models::workflow_run::{RunStatus, WorkflowRun};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("workflow {0} not found")]
    WorkflowNotFound(Uuid),
    #[error("step run {0} not found")]
    StepRunNotFound(Uuid),
    #[error("store operation failed: {0}")]
    Store(#[from] sqlx::Error),
}

/// How a scheduling pass ended: the run needs no further driving, or it
/// is parked on a manual gate whose resolution will re-enqueue it.
enum PassOutcome {
    Finished,
    Suspended(Uuid),
}

/// Drives runs forward one step at a time. Cheap to clone; all clones
/// share the active set, so `enqueue` stays idempotent across the whole
/// process.
#[derive(Clone)]
pub struct Executor {
    inner: Arc<Inner>,
}

struct Inner {
    store: Arc<dyn Store>,
    journal: RunJournal,
    broker: Arc<Broker>,
    http_client: Arc<reqwest::Client>,
    active: Mutex<HashSet<Uuid>>,
}

impl Executor {
    pub fn new(
        store: Arc<dyn Store>,
        broker: Arc<Broker>,
        http_client: Arc<reqwest::Client>,
    ) -> Self {
        let journal = RunJournal::new(store.clone());
        Self {
            inner: Arc::new(Inner {
                store,
                journal,
                broker,
                http_client,
                active: Mutex::new(HashSet::new()),
            }),
        }
    }

    /// Creates a run for the workflow, journals its RUN_STARTED entry, and
    /// hands it to the scheduler. The returned run may still be PENDING;
    /// execution proceeds asynchronously.
    pub async fn start_run(&self, workflow_id: Uuid) -> Result<WorkflowRun, EngineError> {
        let Some(run) = self.inner.store.create_run(workflow_id).await? else {
            return Err(EngineError::WorkflowNotFound(workflow_id));
        };
        self.inner.journal.run_started(run.id, "Run enqueued").await?;
        self.inner.broker.publish_run_updated(run.id);
        info!(run_id = %run.id, %workflow_id, "run enqueued");
        self.enqueue(run.id);
        Ok(run)
    }

    /// Re-enqueues every run that was in flight when the process last
    /// stopped. Runs parked at a manual gate stay suspended; everything
    /// else resumes from its first not-yet-succeeded step.
    pub async fn resume_unfinished(&self) -> Result<usize, EngineError> {
        let runs = self.inner.store.list_unfinished_runs().await?;
        let count = runs.len();
        for run in runs {
            self.enqueue(run.id);
        }
        if count > 0 {
            info!(count, "resumed unfinished runs");
        }
        Ok(count)
    }

    /// Idempotent: at most one scheduling task is in flight per run. A
    /// second enqueue while the run is active returns immediately without
    /// progressing anything twice.
    pub fn enqueue(&self, run_id: Uuid) {
        {
            let mut active = self.inner.active.lock().expect("active set poisoned");
            if !active.insert(run_id) {
                debug!(%run_id, "run already active, enqueue ignored");
                return;
            }
        }

        let executor = self.clone();
        tokio::spawn(async move {
            let outcome = executor.run_pass(run_id).await;
            executor
                .inner
                .active
                .lock()
                .expect("active set poisoned")
                .remove(&run_id);

            match outcome {
                Ok(PassOutcome::Finished) => {}
                Ok(PassOutcome::Suspended(step_run_id)) => {
                    // a completion landing between the suspension check and
                    // the active-set removal finds its own enqueue still
                    // occupied; re-arm if the gate settled in that window
                    match executor.inner.store.find_step_run(step_run_id).await {
                        Ok(Some(step_run)) if step_run.status.is_terminal() => {
                            executor.enqueue(run_id);
                        }
                        Ok(_) => {}
                        Err(err) => {
                            warn!(%run_id, %step_run_id, ?err, "failed to re-check gate after suspension");
                        }
                    }
                }
                Err(err) => {
                    error!(%run_id, ?err, "scheduling pass aborted");
                }
            }
        });
    }

    #[cfg(test)]
    fn is_active(&self, run_id: Uuid) -> bool {
        self.inner
            .active
            .lock()
            .expect("active set poisoned")
            .contains(&run_id)
    }

    /// One re-entrant scheduling pass. The pass scans the step runs in
    /// step order and resumes wherever work remains, so a run can be
    /// driven by any number of passes across process restarts.
    async fn run_pass(&self, run_id: Uuid) -> Result<PassOutcome, EngineError> {
        let store = &self.inner.store;

        let Some(run) = store.find_run(run_id).await? else {
            warn!(%run_id, "enqueued run no longer exists");
            return Ok(PassOutcome::Finished);
        };
        if run.status.is_terminal() {
            return Ok(PassOutcome::Finished);
        }
        let Some(workflow) = store.find_workflow(run.workflow_id).await? else {
            warn!(%run_id, workflow_id = %run.workflow_id, "workflow for run no longer exists");
            return Ok(PassOutcome::Finished);
        };

        if run.status == RunStatus::Pending {
            // RUN_STARTED was journaled when the run was enqueued; a
            // refused transition means the run settled before this pass
            // got to it
            if store.set_run_status(run_id, RunStatus::Running).await?.is_none() {
                return Ok(PassOutcome::Finished);
            }
            self.inner.broker.publish_run_updated(run_id);
        }

        // step ids and positions are immutable snapshots; statuses move
        // underneath the pass (manual completions race ahead of the scan),
        // so the map only resolves ids and every status is re-read live
        let step_runs: HashMap<Uuid, StepRun> = store
            .list_step_runs(run_id)
            .await?
            .into_iter()
            .map(|step_run| (step_run.workflow_step_id, step_run))
            .collect();

        for step in &workflow.steps {
            let Some(snapshot) = step_runs.get(&step.id) else {
                warn!(%run_id, step_id = %step.id, "step has no step run, skipping");
                continue;
            };
            let Some(step_run) = store.find_step_run(snapshot.id).await? else {
                warn!(%run_id, step_run_id = %snapshot.id, "step run disappeared, skipping");
                continue;
            };

            match step_run.status {
                RunStatus::Succeeded => continue,
                RunStatus::Failed => {
                    // normally the pass that failed the step already failed
                    // the run; journal only when this transition is the one
                    // that applies
                    if store.set_run_status(run_id, RunStatus::Failed).await?.is_some() {
                        self.inner.journal.run_failed(run_id, "Run already failed").await?;
                        self.inner.broker.publish_run_updated(run_id);
                    }
                    return Ok(PassOutcome::Finished);
                }
                RunStatus::Pending | RunStatus::Running => {}
            }

            if step.kind == StepKind::Manual {
                if step_run.status == RunStatus::Pending
                    && !self.manual_gate_announced(run_id, step_run.id).await?
                {
                    self.inner
                        .journal
                        .step_started(
                            run_id,
                            step_run.id,
                            &format!("Manual step '{}' awaiting completion", step.name),
                        )
                        .await?;
                    self.inner.broker.publish_run_updated(run_id);
                }
                debug!(%run_id, step_run_id = %step_run.id, "run suspended at manual gate");
                return Ok(PassOutcome::Suspended(step_run.id));
            }

            self.run_automated_step(run_id, step, &step_run).await?;

            let Some(current) = store.find_run(run_id).await? else {
                return Ok(PassOutcome::Finished);
            };
            if current.status.is_terminal() {
                return Ok(PassOutcome::Finished);
            }
        }

        // the run may have been failed concurrently; a refused transition
        // must not journal a success onto a settled run
        if store.set_run_status(run_id, RunStatus::Succeeded).await?.is_some() {
            self.inner.journal.run_succeeded(run_id, "Run succeeded").await?;
            self.inner.broker.publish_run_updated(run_id);
            info!(%run_id, "run succeeded");
        }
        Ok(PassOutcome::Finished)
    }

    /// A gate is announced at most once, whether the scan reaches it first
    /// or a completion resolves it first (and whether or not the engine
    /// restarted in between).
    async fn manual_gate_announced(
        &self,
        run_id: Uuid,
        step_run_id: Uuid,
    ) -> Result<bool, EngineError> {
        let events = self.inner.store.list_events(run_id).await?;
        Ok(events.iter().any(|event| {
            event.step_run_id == Some(step_run_id) && event.event_type == EventType::StepStarted
        }))
    }

    async fn manual_step_name(
        &self,
        run_id: Uuid,
        workflow_step_id: Uuid,
    ) -> Result<Option<String>, EngineError> {
        let Some(run) = self.inner.store.find_run(run_id).await? else {
            return Ok(None);
        };
        let Some(workflow) = self.inner.store.find_workflow(run.workflow_id).await? else {
            return Ok(None);
        };
        Ok(workflow
            .steps
            .iter()
            .find(|step| step.id == workflow_step_id)
            .map(|step| step.name.clone()))
    }

    async fn run_automated_step(
        &self,
        run_id: Uuid,
        step: &WorkflowStep,
        step_run: &StepRun,
    ) -> Result<(), EngineError> {
        let store = &self.inner.store;
        let journal = &self.inner.journal;

        if store
            .set_step_run_status(step_run.id, RunStatus::Running)
            .await?
            .is_none()
        {
            // the step settled concurrently; nothing left to execute
            return Ok(());
        }
        journal
            .step_started(run_id, step_run.id, &format!("Step '{}' started", step.name))
            .await?;
        self.inner.broker.publish_run_updated(run_id);

        let result = handlers::execute_step(step, &self.inner.http_client).await;

        // a run that went terminal while the handler was in flight absorbs
        // no further journal entries; the step's status still settles
        let run_is_terminal = match store.find_run(run_id).await? {
            Some(current) => current.status.is_terminal(),
            None => return Ok(()),
        };

        match result {
            Ok(()) => {
                let applied = store
                    .set_step_run_status(step_run.id, RunStatus::Succeeded)
                    .await?;
                if applied.is_some() && !run_is_terminal {
                    journal
                        .step_succeeded(
                            run_id,
                            step_run.id,
                            &format!("Step '{}' succeeded", step.name),
                        )
                        .await?;
                } else if applied.is_some() {
                    debug!(%run_id, step_run_id = %step_run.id, "run settled mid-step, step settled without journaling");
                }
                self.inner.broker.publish_run_updated(run_id);
            }
            Err(step_err) => {
                let message = format!("Step '{}' failed: {step_err}", step.name);
                warn!(%run_id, step_run_id = %step_run.id, %message, "automated step failed");
                let applied = store
                    .set_step_run_status(step_run.id, RunStatus::Failed)
                    .await?;
                if applied.is_some() && !run_is_terminal {
                    journal.step_failed(run_id, step_run.id, &message).await?;
                }
                if store.set_run_status(run_id, RunStatus::Failed).await?.is_some() {
                    journal.run_failed(run_id, &message).await?;
                }
                self.inner.broker.publish_run_updated(run_id);
            }
        }
        Ok(())
    }

    /// Resolves a manual gate. Idempotent: a gate that is already settled
    /// is returned unchanged, with no new journal entries, no matter how
    /// many callers race. A gate may be resolved before the scan has
    /// reached it; the journal still records its STEP_STARTED ahead of the
    /// terminal entry.
    pub async fn complete_manual_step(
        &self,
        step_run_id: Uuid,
        success: bool,
    ) -> Result<StepRun, EngineError> {
        let store = &self.inner.store;

        let Some(step_run) = store.find_step_run(step_run_id).await? else {
            return Err(EngineError::StepRunNotFound(step_run_id));
        };
        if step_run.status.is_terminal() {
            return Ok(step_run);
        }

        let run_id = step_run.workflow_run_id;
        let target = if success {
            RunStatus::Succeeded
        } else {
            RunStatus::Failed
        };

        let Some(updated) = store.set_step_run_status(step_run_id, target).await? else {
            // lost the race against a concurrent completion; the settled row wins
            return match store.find_step_run(step_run_id).await? {
                Some(settled) => Ok(settled),
                None => Err(EngineError::StepRunNotFound(step_run_id)),
            };
        };

        let run_is_terminal = match store.find_run(run_id).await? {
            Some(run) => run.status.is_terminal(),
            None => false,
        };

        if !run_is_terminal && !self.manual_gate_announced(run_id, step_run_id).await? {
            let message = match self.manual_step_name(run_id, step_run.workflow_step_id).await? {
                Some(name) => format!("Manual step '{name}' awaiting completion"),
                None => "Manual step awaiting completion".to_string(),
            };
            self.inner
                .journal
                .step_started(run_id, step_run_id, &message)
                .await?;
        }

        if success {
            if !run_is_terminal {
                self.inner
                    .journal
                    .step_succeeded(run_id, step_run_id, "Manual step completed")
                    .await?;
            }
            self.inner.broker.publish_run_updated(run_id);
            if !run_is_terminal {
                self.enqueue(run_id);
            }
        } else {
            if !run_is_terminal {
                self.inner
                    .journal
                    .step_failed(run_id, step_run_id, "Manual step failed")
                    .await?;
            }
            if store.set_run_status(run_id, RunStatus::Failed).await?.is_some() {
                self.inner
                    .journal
                    .run_failed(run_id, "Run failed by manual step")
                    .await?;
            }
            self.inner.broker.publish_run_updated(run_id);
        }

        Ok(updated)
    }
}
