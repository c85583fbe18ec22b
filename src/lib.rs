pub mod api;
pub mod config;
pub mod error;
pub mod events;
pub mod orchestrator;
pub mod poll;
pub mod resource;
pub mod shutdown;
pub mod submit;
pub mod tunnel;

pub use error::{Result, SubmitError};
pub use orchestrator::{SubmissionOrchestrator, SubmitOutcome, SubmitState};
