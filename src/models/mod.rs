pub mod run_event;
pub mod step_run;
pub mod workflow;
pub mod workflow_run;
