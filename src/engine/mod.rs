mod executor;
pub mod handlers;
mod journal;

pub use executor::{EngineError, Executor};
pub use journal::RunJournal;
