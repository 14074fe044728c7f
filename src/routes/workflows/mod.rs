mod crud;
mod prelude;
mod runs;
mod sse;

pub use crud::{create_workflow, get_workflow, list_workflows, update_workflow};
pub use runs::{complete_manual_step, get_run, list_runs, start_run};
pub use sse::sse_run_updates;
