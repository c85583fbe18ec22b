use std::path::PathBuf;
use std::process::ExitStatus;
use std::time::Duration;

use thiserror::Error;

use crate::api::ApiError;

#[derive(Error, Debug)]
pub enum SubmitError {
    #[error("{0}")]
    Config(String),

    #[error("RayJob does not have `submissionMode` field set")]
    MissingSubmissionMode,

    #[error("Submission mode must be set to 'InteractiveMode'")]
    NullSubmissionMode,

    #[error("Submission mode of the Ray Job is not supported: {0}")]
    UnsupportedSubmissionMode(String),

    #[error("Failed to parse entrypoint {entrypoint:?}: unbalanced quotes or trailing escape")]
    EntrypointParse { entrypoint: String },

    #[error("{what} file {path} is not usable: {reason}")]
    InputFile {
        what: &'static str,
        path: PathBuf,
        reason: String,
    },

    #[error("Failed to decode {path}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("Failed to convert runtime env to json: {0}")]
    RuntimeEnvJson(String),

    #[error("Error when trying to {action}: {source}")]
    Api {
        action: &'static str,
        #[source]
        source: ApiError,
    },

    #[error("No cluster name available for RayJob {job}: {detail}")]
    NoClusterName { job: String, detail: String },

    #[error("Timed out waiting for cluster {cluster} after {waited:?}: {last}")]
    ClusterTimeout {
        cluster: String,
        waited: Duration,
        last: String,
    },

    #[error("Failed to clean up RayJob {job} after time out: {source}")]
    Cleanup {
        job: String,
        #[source]
        source: ApiError,
    },

    #[error("Timed out waiting for port forwarding on {endpoint} after {waited:?}")]
    TunnelTimeout { endpoint: String, waited: Duration },

    #[error("Port forwarding stopped unexpectedly: {0}")]
    TunnelExited(String),

    #[error("Failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Error while setting up `ray job submit` {0}")]
    PipeSetup(&'static str),

    #[error("Error while waiting for `ray job submit`: {0}")]
    Wait(#[source] std::io::Error),

    #[error("Error occurred with ray job submit: {0}")]
    SubmitFailed(ExitStatus),

    #[error("`ray job submit` output ended without a job id containing {marker:?}")]
    JobIdNotFound { marker: String },

    #[error("No job id seen in `ray job submit` output within {0:?}")]
    JobIdTimeout(Duration),

    #[error("Interrupted")]
    Interrupted,
}

impl SubmitError {
    pub(crate) fn api(action: &'static str, source: ApiError) -> Self {
        SubmitError::Api { action, source }
    }
}

pub type Result<T> = std::result::Result<T, SubmitError>;
