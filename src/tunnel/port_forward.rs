use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use super::{Forwarder, TunnelError, TunnelTarget};

/// Forwards through `kubectl port-forward service/<svc> L:R`.
#[derive(Debug, Clone)]
pub struct KubectlPortForward {
    kubectl: String,
    context: Option<String>,
    kubeconfig: Option<PathBuf>,
}

impl KubectlPortForward {
    pub fn new(kubectl: impl Into<String>) -> Self {
        Self {
            kubectl: kubectl.into(),
            context: None,
            kubeconfig: None,
        }
    }

    pub fn with_context(mut self, context: Option<String>) -> Self {
        self.context = context;
        self
    }

    pub fn with_kubeconfig(mut self, kubeconfig: Option<PathBuf>) -> Self {
        self.kubeconfig = kubeconfig;
        self
    }

    fn args(&self, target: &TunnelTarget) -> Vec<String> {
        let mut args = vec!["port-forward".to_string()];

        if let Some(ref kubeconfig) = self.kubeconfig {
            args.push(format!("--kubeconfig={}", kubeconfig.display()));
        }
        if let Some(ref context) = self.context {
            args.push(format!("--context={}", context));
        }

        args.push(format!("--namespace={}", target.namespace));
        args.push(format!("service/{}", target.service));
        args.push(target.port_pair());
        args
    }
}

#[async_trait]
impl Forwarder for KubectlPortForward {
    async fn forward(&self, target: &TunnelTarget, cancel: CancellationToken) -> Result<(), TunnelError> {
        let args = self.args(target);
        tracing::debug!(kubectl = %self.kubectl, ?args, "Spawning port forward");

        let mut child = Command::new(&self.kubectl)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(TunnelError::Start)?;

        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stdout).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::debug!(line = %line, "port-forward");
                }
            });
        }
        let stderr_task = child.stderr.take().map(|stderr| {
            tokio::spawn(async move {
                let mut collected = Vec::new();
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::warn!(line = %line, "port-forward");
                    collected.push(line);
                }
                collected.join("\n")
            })
        });

        let exited = tokio::select! {
            _ = cancel.cancelled() => None,
            status = child.wait() => Some(status),
        };

        match exited {
            None => {
                if let Err(e) = child.kill().await {
                    tracing::warn!(error = %e, "Failed to kill port forward");
                }
                Ok(())
            }
            Some(status) => {
                let detail = match stderr_task {
                    Some(task) => task.await.unwrap_or_default(),
                    None => String::new(),
                };
                let status = match status {
                    Ok(status) => status.to_string(),
                    Err(e) => e.to_string(),
                };
                Err(TunnelError::Exited { status, detail })
            }
        }
    }
}
