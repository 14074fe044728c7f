mod delay;
mod http;

use thiserror::Error;

use crate::models::workflow::{StepKind, WorkflowStep};

/// Why an automated step could not complete. The executor reifies this
/// into STEP_FAILED / RUN_FAILED journal entries; handlers themselves
/// touch no persistent state.
#[derive(Debug, Error)]
pub enum StepError {
    #[error("{0}")]
    InvalidConfig(String),
    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("request to {url} returned status {status}")]
    Status { url: String, status: u16 },
}

/// Runs one automated step to completion. MANUAL steps have no handler;
/// they are driven entirely by the manual-completion boundary and reaching
/// this function with one is a scheduling bug surfaced as a failure.
pub(crate) async fn execute_step(
    step: &WorkflowStep,
    http_client: &reqwest::Client,
) -> Result<(), StepError> {
    match step.kind {
        StepKind::Delay => delay::execute(&step.config).await,
        StepKind::Http => http::execute(&step.config, http_client).await,
        StepKind::Manual => Err(StepError::InvalidConfig(
            "manual steps are completed by a human, not a handler".to_string(),
        )),
    }
}
