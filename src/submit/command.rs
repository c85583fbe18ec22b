use std::fmt;
use std::path::PathBuf;

use crate::error::{Result, SubmitError};

/// Inputs of `ray job submit` after validation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommandSpec {
    /// Runtime env YAML file passed through as is
    pub runtime_env: Option<PathBuf>,
    pub runtime_env_json: Option<String>,
    pub submission_id: Option<String>,
    pub entrypoint_num_cpus: Option<f32>,
    pub entrypoint_num_gpus: Option<f32>,
    pub entrypoint_memory: Option<u64>,
    /// JSON map of resource name to quantity
    pub entrypoint_resources: Option<String>,
    pub metadata_json: Option<String>,
    pub no_wait: bool,
    pub headers: Option<String>,
    /// `true`/`false` or a CA bundle path
    pub verify: Option<String>,
    pub log_style: Option<String>,
    pub log_color: Option<String>,
    pub working_dir: String,
    /// Entrypoint command line, tokenized with shell quoting rules at build time
    pub entrypoint: String,
}

/// Immutable argument vector for the submission executable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitCommand {
    argv: Vec<String>,
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

fn positive(value: Option<f32>) -> Option<f32> {
    value.filter(|v| *v > 0.0)
}

fn push_flag(argv: &mut Vec<String>, name: &str, value: impl Into<String>) {
    argv.push(name.to_string());
    argv.push(value.into());
}

/// Split an entrypoint the way a POSIX shell would.
pub fn tokenize_entrypoint(entrypoint: &str) -> Result<Vec<String>> {
    shlex::split(entrypoint).ok_or_else(|| SubmitError::EntrypointParse {
        entrypoint: entrypoint.to_string(),
    })
}

/// Quote already-split entrypoint arguments into one command line, so
/// [`tokenize_entrypoint`] gives back the same tokens.
pub fn join_entrypoint<S: AsRef<str>>(tokens: &[S]) -> Result<String> {
    shlex::try_join(tokens.iter().map(AsRef::as_ref)).map_err(|_| SubmitError::EntrypointParse {
        entrypoint: tokens
            .iter()
            .map(AsRef::as_ref)
            .collect::<Vec<_>>()
            .join(" "),
    })
}

impl SubmitCommand {
    /// Build `<program> job submit --address <address> [flags] --working-dir <dir> -- <entrypoint>`.
    ///
    /// Optional flags are emitted in a fixed order and only when set (strings
    /// non-empty, numbers positive).
    pub fn build(program: &str, address: &str, spec: &CommandSpec) -> Result<Self> {
        let mut argv: Vec<String> = vec![
            program.to_string(),
            "job".to_string(),
            "submit".to_string(),
            "--address".to_string(),
            address.to_string(),
        ];

        if let Some(ref path) = spec.runtime_env {
            push_flag(&mut argv, "--runtime-env", path.display().to_string());
        }
        if let Some(json) = non_empty(&spec.runtime_env_json) {
            push_flag(&mut argv, "--runtime-env-json", json);
        }
        if let Some(id) = non_empty(&spec.submission_id) {
            push_flag(&mut argv, "--submission-id", id);
        }
        if let Some(cpus) = positive(spec.entrypoint_num_cpus) {
            push_flag(&mut argv, "--entrypoint-num-cpus", format!("{:.6}", cpus));
        }
        if let Some(gpus) = positive(spec.entrypoint_num_gpus) {
            push_flag(&mut argv, "--entrypoint-num-gpus", format!("{:.6}", gpus));
        }
        if let Some(memory) = spec.entrypoint_memory.filter(|m| *m > 0) {
            push_flag(&mut argv, "--entrypoint-memory", memory.to_string());
        }
        if let Some(resources) = non_empty(&spec.entrypoint_resources) {
            push_flag(&mut argv, "--entrypoint-resources", resources);
        }
        if let Some(metadata) = non_empty(&spec.metadata_json) {
            push_flag(&mut argv, "--metadata-json", metadata);
        }
        if spec.no_wait {
            argv.push("--no-wait".to_string());
        }
        if let Some(headers) = non_empty(&spec.headers) {
            push_flag(&mut argv, "--headers", headers);
        }
        if let Some(verify) = non_empty(&spec.verify) {
            push_flag(&mut argv, "--verify", verify);
        }
        if let Some(style) = non_empty(&spec.log_style) {
            push_flag(&mut argv, "--log-style", style);
        }
        if let Some(color) = non_empty(&spec.log_color) {
            push_flag(&mut argv, "--log-color", color);
        }
        push_flag(&mut argv, "--working-dir", spec.working_dir.as_str());

        argv.push("--".to_string());
        argv.extend(tokenize_entrypoint(&spec.entrypoint)?);

        Ok(Self { argv })
    }

    /// Wrap an argument vector built elsewhere. `argv[0]` is the program.
    pub fn from_argv(argv: Vec<String>) -> Self {
        Self { argv }
    }

    pub fn program(&self) -> &str {
        self.argv.first().map(String::as_str).unwrap_or_default()
    }

    pub fn args(&self) -> &[String] {
        self.argv.get(1..).unwrap_or_default()
    }

    pub fn argv(&self) -> &[String] {
        &self.argv
    }
}

impl fmt::Display for SubmitCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let joined = shlex::try_join(self.argv.iter().map(String::as_str))
            .unwrap_or_else(|_| self.argv.join(" "));
        write!(f, "{}", joined)
    }
}
