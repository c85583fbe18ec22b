//! Everything about the `ray job submit` side of a submission.
//!
//! - [`options`]: CLI-level inputs and their validation
//! - [`command`]: deterministic argument vector construction
//! - [`process`]: launching the executable and streaming its output
//! - [`correlator`]: picking the submission id out of stdout

pub mod command;
pub mod correlator;
pub mod options;
pub mod process;

pub use command::{join_entrypoint, CommandSpec, SubmitCommand};
pub use correlator::{JobIdCorrelator, JobIdWait};
pub use options::{SubmitOptions, ValidatedSubmission};
pub use process::SubmitProcess;
