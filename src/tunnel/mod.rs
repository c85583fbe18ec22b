//! Local tunnel to the Ray dashboard.
//!
//! - [`TunnelSupervisor::start`] spawns a [`Forwarder`] as a background task
//!   and hands back a [`TunnelHandle`]
//! - [`probe::wait_until_ready`] probes the local end until it answers
//! - [`port_forward::KubectlPortForward`] is the forwarder the CLI uses
//!
//! The handle owns the cancellation token. Cancelling is idempotent and also
//! happens on drop, so every exit path of the caller stops the forwarder.

pub mod port_forward;
pub mod probe;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub use port_forward::KubectlPortForward;
pub use probe::{wait_until_ready, HttpProbe, ProbeError, ReadinessProbe};

/// How long [`TunnelHandle::shutdown`] waits for the forwarder to wind down.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// What to forward: `localhost:<local_port>` -> `service/<service>:<remote_port>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelTarget {
    pub namespace: String,
    pub service: String,
    pub local_port: u16,
    pub remote_port: u16,
}

impl TunnelTarget {
    pub fn port_pair(&self) -> String {
        format!("{}:{}", self.local_port, self.remote_port)
    }
}

#[derive(Error, Debug)]
pub enum TunnelError {
    #[error("failed to start port forward: {0}")]
    Start(#[source] std::io::Error),

    #[error("port forward exited with {status}: {detail}")]
    Exited { status: String, detail: String },

    #[error("port forward task panicked: {0}")]
    Panicked(String),

    #[error("{0}")]
    Other(String),
}

/// Something that forwards a local port to a service until cancelled.
///
/// Implementations must return `Ok(())` only after `cancel` fired. Returning
/// early, with or without an error, is treated as the tunnel dying.
#[async_trait]
pub trait Forwarder: Send + Sync {
    async fn forward(&self, target: &TunnelTarget, cancel: CancellationToken) -> Result<(), TunnelError>;
}

pub struct TunnelSupervisor;

impl TunnelSupervisor {
    /// Spawn the forwarder for `target` as an independent task.
    pub fn start(forwarder: Arc<dyn Forwarder>, target: TunnelTarget) -> TunnelHandle {
        let cancel = CancellationToken::new();
        let task_cancel = cancel.clone();

        tracing::info!(service = %target.service, ports = %target.port_pair(), "Starting port forward");
        let task = tokio::spawn(async move { forwarder.forward(&target, task_cancel).await });

        TunnelHandle {
            task: Some(task),
            cancel: Some(cancel),
        }
    }
}

/// Ownership of a running tunnel: the task and its cancel trigger.
pub struct TunnelHandle {
    task: Option<JoinHandle<Result<(), TunnelError>>>,
    cancel: Option<CancellationToken>,
}

impl TunnelHandle {
    /// Fire the cancel trigger. Returns false if it already fired.
    pub fn cancel(&mut self) -> bool {
        match self.cancel.take() {
            Some(token) => {
                tracing::debug!("Cancelling port forward");
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_none()
    }

    /// Resolve once the forwarder task ended on its own. Pending forever once
    /// the task has already been observed or joined.
    pub async fn exited(&mut self) -> TunnelError {
        let Some(task) = self.task.as_mut() else {
            return std::future::pending().await;
        };
        let result = task.await;
        self.task = None;

        match result {
            Ok(Ok(())) => TunnelError::Other("forwarder returned without being cancelled".to_string()),
            Ok(Err(e)) => e,
            Err(join) => TunnelError::Panicked(join.to_string()),
        }
    }

    /// Cancel and wait (bounded) for the forwarder to finish.
    pub async fn shutdown(mut self) {
        self.cancel();
        if let Some(task) = self.task.take() {
            match tokio::time::timeout(SHUTDOWN_GRACE, task).await {
                Ok(Ok(Ok(()))) => tracing::debug!("Port forward stopped"),
                Ok(Ok(Err(e))) => tracing::warn!(error = %e, "Port forward stopped with error"),
                Ok(Err(e)) => tracing::warn!(error = %e, "Port forward task failed"),
                Err(_) => tracing::warn!("Port forward did not stop within grace period"),
            }
        }
    }
}

impl Drop for TunnelHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}
