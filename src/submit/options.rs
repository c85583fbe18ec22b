use std::path::{Component, Path, PathBuf};

use crate::config::INTERACTIVE_MODE;
use crate::error::{Result, SubmitError};
use crate::resource::{JobResource, SubmissionMode};

use super::command::{tokenize_entrypoint, CommandSpec};

/// Inputs as given on the command line, before any file is read.
#[derive(Debug, Clone, Default)]
pub struct SubmitOptions {
    /// Falls back to `default`
    pub namespace: Option<String>,
    /// RayJob YAML file
    pub job_file: PathBuf,
    pub submission_id: Option<String>,
    pub working_dir: Option<String>,
    /// Runtime env YAML file
    pub runtime_env: Option<PathBuf>,
    pub runtime_env_json: Option<String>,
    pub headers: Option<String>,
    pub verify: Option<String>,
    pub entrypoint_resources: Option<String>,
    pub metadata_json: Option<String>,
    pub log_style: Option<String>,
    pub log_color: Option<String>,
    pub entrypoint_num_cpus: Option<f32>,
    pub entrypoint_num_gpus: Option<f32>,
    pub entrypoint_memory: Option<u64>,
    pub no_wait: bool,
    /// Entrypoint tokens joined with spaces
    pub entrypoint: String,
}

/// Everything the orchestrator needs; produced only by [`SubmitOptions::validate`].
#[derive(Debug, Clone)]
pub struct ValidatedSubmission {
    pub namespace: String,
    pub job: JobResource,
    pub spec: CommandSpec,
}

/// Lexically normalise a path: drop `.` segments and resolve `..` where possible.
pub fn clean_path(path: &Path) -> PathBuf {
    let mut cleaned = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                let ends_in_normal = matches!(cleaned.components().next_back(), Some(Component::Normal(_)));
                if ends_in_normal {
                    cleaned.pop();
                } else if !cleaned.has_root() {
                    cleaned.push("..");
                }
            }
            other => cleaned.push(other.as_os_str()),
        }
    }
    if cleaned.as_os_str().is_empty() {
        PathBuf::from(".")
    } else {
        cleaned
    }
}

/// Working dirs may be remote URIs (`s3://...`), which must not be touched.
fn clean_working_dir(dir: &str) -> String {
    if dir.contains("://") {
        dir.to_string()
    } else {
        clean_path(Path::new(dir)).display().to_string()
    }
}

fn ensure_regular_file(what: &'static str, path: &Path) -> Result<()> {
    let input_error = |reason: String| SubmitError::InputFile {
        what,
        path: path.to_path_buf(),
        reason,
    };

    let metadata = std::fs::metadata(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            input_error("file does not exist".to_string())
        } else {
            input_error(e.to_string())
        }
    })?;

    if metadata.is_file() {
        Ok(())
    } else {
        Err(input_error("not a regular file".to_string()))
    }
}

fn read_file(what: &'static str, path: &Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|e| SubmitError::InputFile {
        what,
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

/// `working_dir` of a runtime env YAML file, if set and non-empty.
pub fn runtime_env_working_dir(path: &Path) -> Result<Option<String>> {
    let content = read_file("Runtime Env", path)?;
    let runtime_env: serde_yaml::Value =
        serde_yaml::from_str(&content).map_err(|source| SubmitError::Decode {
            path: path.to_path_buf(),
            source,
        })?;

    match runtime_env.get("working_dir") {
        None | Some(serde_yaml::Value::Null) => Ok(None),
        Some(serde_yaml::Value::String(dir)) if dir.is_empty() => Ok(None),
        Some(serde_yaml::Value::String(dir)) => Ok(Some(dir.clone())),
        Some(_) => Err(SubmitError::Config(format!(
            "working_dir in runtime env {} must be a string",
            path.display()
        ))),
    }
}

/// Convert an inline runtime env YAML document to compact JSON.
pub fn runtime_env_yaml_to_json(yaml: &str) -> Result<String> {
    let value: serde_json::Value =
        serde_yaml::from_str(yaml).map_err(|e| SubmitError::RuntimeEnvJson(e.to_string()))?;
    serde_json::to_string(&value).map_err(|e| SubmitError::RuntimeEnvJson(e.to_string()))
}

fn check_submission_mode(job: &JobResource) -> Result<()> {
    if !job.has_spec() {
        return Err(SubmitError::Config(format!(
            "RayJob {} has no `spec` section",
            job.display_name()
        )));
    }
    match job.submission_mode() {
        SubmissionMode::Missing => Err(SubmitError::MissingSubmissionMode),
        SubmissionMode::Null => Err(SubmitError::NullSubmissionMode),
        SubmissionMode::Value(mode) if mode == INTERACTIVE_MODE => Ok(()),
        SubmissionMode::Value(mode) => Err(SubmitError::UnsupportedSubmissionMode(mode)),
    }
}

impl SubmitOptions {
    /// Check every input and read the files. Nothing here touches the cluster,
    /// so a failure leaves no side effect behind.
    pub fn validate(self) -> Result<ValidatedSubmission> {
        let namespace = self
            .namespace
            .filter(|ns| !ns.is_empty())
            .unwrap_or_else(|| "default".to_string());

        let runtime_env = self.runtime_env.map(|p| clean_path(&p));
        let mut working_dir = self.working_dir.filter(|d| !d.is_empty());

        if let Some(ref path) = runtime_env {
            ensure_regular_file("Runtime Env", path)?;
            if let Some(dir) = runtime_env_working_dir(path)? {
                if working_dir.is_none() {
                    tracing::debug!(working_dir = %dir, "Using working_dir from runtime env");
                    working_dir = Some(dir);
                }
            }
        }

        let job_file = clean_path(&self.job_file);
        ensure_regular_file("Ray Job", &job_file)?;
        let content = read_file("Ray Job", &job_file)?;
        let job = JobResource::from_yaml_str(&content).map_err(|source| SubmitError::Decode {
            path: job_file.clone(),
            source,
        })?;

        check_submission_mode(&job)?;

        let mut runtime_env_json = self.runtime_env_json.filter(|j| !j.is_empty());
        if runtime_env.is_none() && runtime_env_json.is_none() {
            if let Some(yaml) = job.runtime_env_yaml() {
                runtime_env_json = Some(runtime_env_yaml_to_json(yaml)?);
            }
        }

        let working_dir = working_dir.ok_or_else(|| {
            SubmitError::Config(
                "working directory is required, use --working-dir or set with runtime env"
                    .to_string(),
            )
        })?;

        if self.entrypoint.trim().is_empty() {
            return Err(SubmitError::Config(
                "entrypoint is required, pass it after `--`".to_string(),
            ));
        }
        tokenize_entrypoint(&self.entrypoint)?;

        let spec = CommandSpec {
            runtime_env,
            runtime_env_json,
            submission_id: self.submission_id.filter(|id| !id.is_empty()),
            entrypoint_num_cpus: self.entrypoint_num_cpus,
            entrypoint_num_gpus: self.entrypoint_num_gpus,
            entrypoint_memory: self.entrypoint_memory,
            entrypoint_resources: self.entrypoint_resources,
            metadata_json: self.metadata_json,
            no_wait: self.no_wait,
            headers: self.headers,
            verify: self.verify,
            log_style: self.log_style,
            log_color: self.log_color,
            working_dir: clean_working_dir(&working_dir),
            entrypoint: self.entrypoint,
        };

        Ok(ValidatedSubmission {
            namespace,
            job,
            spec,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_path_normalises() {
        assert_eq!(clean_path(Path::new("./a/b/../c/")), PathBuf::from("a/c"));
        assert_eq!(clean_path(Path::new("/a//b/./c")), PathBuf::from("/a/b/c"));
        assert_eq!(clean_path(Path::new("../x")), PathBuf::from("../x"));
        assert_eq!(clean_path(Path::new("/..")), PathBuf::from("/"));
        assert_eq!(clean_path(Path::new(".")), PathBuf::from("."));
    }

    #[test]
    fn remote_working_dir_untouched() {
        assert_eq!(clean_working_dir("s3://bucket/pkg.zip"), "s3://bucket/pkg.zip");
        assert_eq!(clean_working_dir("./work/"), "work");
    }

    #[test]
    fn runtime_env_yaml_becomes_json() {
        let json = runtime_env_yaml_to_json("pip:\n  - requests\nenv_vars:\n  A: \"1\"\n").unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["pip"][0], "requests");
        assert_eq!(value["env_vars"]["A"], "1");
    }
}
