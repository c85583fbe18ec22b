//! The submission state machine.
//!
//! [`SubmissionOrchestrator::run`] drives one submission from RayJob creation
//! to `ray job submit` exit:
//!
//! 1. Create the RayJob
//! 2. Poll the RayJob until its status names a RayCluster
//! 3. Poll the RayCluster until it is ready; on timeout delete the RayJob
//! 4. Start the port forward to the head service and probe it
//! 5. Build and launch `ray job submit` against the tunnel
//! 6. Wait for the submission id (given or read from stdout) and annotate
//!    the freshly re-read RayJob with it
//! 7. Wait for `ray job submit` to exit
//!
//! The tunnel handle lives in [`SubmissionOrchestrator::run`], outside the
//! cancellable part of the run. It is cancelled exactly once and its forwarder
//! joined before `run` returns on every exit path, including an interrupt
//! through the shutdown token.

pub mod state;

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::api::{ApiError, RayApi};
use crate::config::SubmitConfig;
use crate::error::{Result, SubmitError};
use crate::events::{EventSink, SubmitEvent};
use crate::poll::{poll_until, Condition, FetchErrorPolicy, PollError, PollSpec};
use crate::resource::{ClusterReadiness, ClusterRef, JobResource};
use crate::submit::{JobIdCorrelator, JobIdWait, SubmitCommand, SubmitProcess, ValidatedSubmission};
use crate::tunnel::{
    wait_until_ready, Forwarder, ReadinessProbe, TunnelHandle, TunnelSupervisor, TunnelTarget,
};

pub use state::SubmitState;

/// Result of a successful run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitOutcome {
    /// Name the control plane gave the RayJob
    pub job_name: String,
    /// Ray submission id recorded on the RayJob
    pub job_id: String,
}

/// Tracks the current state so a failure can report where it happened.
struct Progress {
    state: SubmitState,
    events: EventSink,
}

impl Progress {
    fn new(events: EventSink) -> Self {
        Self {
            state: SubmitState::Created,
            events,
        }
    }

    fn enter(&mut self, state: SubmitState) {
        tracing::debug!(from = %self.state, to = %state, "Submission state change");
        self.state = state;
        self.events.emit(SubmitEvent::State(state));
    }
}

pub struct SubmissionOrchestrator {
    api: Arc<dyn RayApi>,
    forwarder: Arc<dyn Forwarder>,
    probe: Arc<dyn ReadinessProbe>,
    config: SubmitConfig,
    events: EventSink,
}

impl SubmissionOrchestrator {
    pub fn new(
        api: Arc<dyn RayApi>,
        forwarder: Arc<dyn Forwarder>,
        probe: Arc<dyn ReadinessProbe>,
        config: SubmitConfig,
    ) -> Self {
        Self {
            api,
            forwarder,
            probe,
            config,
            events: EventSink::disabled(),
        }
    }

    pub fn with_events(mut self, events: EventSink) -> Self {
        self.events = events;
        self
    }

    /// Run one submission. Cancelling `shutdown` aborts the run with
    /// [`SubmitError::Interrupted`], stopping the tunnel and killing the
    /// submission process.
    pub async fn run(
        &self,
        submission: ValidatedSubmission,
        shutdown: CancellationToken,
    ) -> Result<SubmitOutcome> {
        let mut progress = Progress::new(self.events.clone());
        let mut tunnel: Option<TunnelHandle> = None;

        let result = tokio::select! {
            result = self.drive(&mut progress, &mut tunnel, submission) => result,
            _ = shutdown.cancelled() => Err(SubmitError::Interrupted),
        };

        // The forwarder's child must be gone before the caller sees the result.
        if let Some(tunnel) = tunnel.take() {
            tunnel.shutdown().await;
        }

        if let Err(ref e) = result {
            tracing::error!(state = %progress.state, error = %e, "Submission failed");
            self.events.emit(SubmitEvent::Failed {
                from: progress.state,
                error: e.to_string(),
            });
            progress.enter(SubmitState::Failed);
        }
        result
    }

    async fn drive(
        &self,
        progress: &mut Progress,
        tunnel_slot: &mut Option<TunnelHandle>,
        submission: ValidatedSubmission,
    ) -> Result<SubmitOutcome> {
        let ValidatedSubmission {
            namespace,
            job,
            spec,
        } = submission;

        progress.enter(SubmitState::Created);
        let created = self
            .api
            .create_job(&namespace, &job)
            .await
            .map_err(|e| SubmitError::api("create RayJob", e))?;
        let job_name = match created.name() {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => {
                return Err(SubmitError::api(
                    "create RayJob",
                    ApiError::Unnamed {
                        kind: "RayJob",
                        name: created.display_name(),
                    },
                ))
            }
        };
        tracing::info!(job = %job_name, namespace = %namespace, "Submitted RayJob");
        self.events.emit(SubmitEvent::JobCreated {
            name: job_name.clone(),
        });

        progress.enter(SubmitState::AwaitingClusterRef);
        let cluster = self
            .await_cluster_ref(&namespace, &job_name, &created)
            .await?;

        progress.enter(SubmitState::AwaitingClusterReady);
        self.await_cluster_ready(&namespace, &job_name, &cluster)
            .await?;

        progress.enter(SubmitState::TunnelStarting);
        let service = self
            .api
            .head_service_name(&namespace, &cluster)
            .await
            .map_err(|e| SubmitError::api("find head service", e))?;
        self.events.emit(SubmitEvent::PortForwarding {
            service: service.clone(),
        });

        let target = TunnelTarget {
            namespace: namespace.clone(),
            service,
            local_port: self.config.local_port,
            remote_port: self.config.remote_port,
        };
        let tunnel = tunnel_slot.insert(TunnelSupervisor::start(self.forwarder.clone(), target));
        let endpoint = self.config.dashboard_address();

        // On failure the RayJob stays; only the cluster timeout deletes it.
        wait_until_ready(
            tunnel,
            self.probe.as_ref(),
            &endpoint,
            self.config.tunnel_probe_interval,
            self.config.tunnel_timeout,
        )
        .await?;
        progress.enter(SubmitState::TunnelReady);
        self.events.emit(SubmitEvent::TunnelReady {
            endpoint: endpoint.clone(),
        });

        progress.enter(SubmitState::Submitting);
        let command = SubmitCommand::build(&self.config.ray_executable, &endpoint, &spec)?;
        self.events.emit(SubmitEvent::Command {
            argv: command.argv().to_vec(),
        });

        let (correlator, pending_id) = match spec.submission_id {
            Some(ref id) => (None, JobIdWait::supplied(id.clone())),
            None => {
                let (correlator, wait) = JobIdCorrelator::new(&self.config.job_id_marker);
                (Some(correlator), wait)
            }
        };
        let mut process = SubmitProcess::launch(&command, self.events.clone(), correlator)?;

        progress.enter(SubmitState::AwaitingJobId);
        let resolved = tokio::select! {
            id = pending_id.resolve(self.config.job_id_timeout) => id,
            err = tunnel.exited() => Err(SubmitError::TunnelExited(err.to_string())),
        };
        let job_id = match resolved {
            Ok(id) => id,
            Err(e @ SubmitError::JobIdNotFound { .. }) => {
                // A failing executable explains the missing id better.
                process.wait().await?;
                return Err(e);
            }
            Err(e) => return Err(e),
        };
        tracing::info!(job = %job_name, job_id = %job_id, "Ray job id known");
        self.events.emit(SubmitEvent::JobIdentified { id: job_id.clone() });

        self.annotate(&namespace, &job_name, &job_id).await?;

        progress.enter(SubmitState::AwaitingCompletion);
        tokio::select! {
            exit = process.wait() => exit?,
            err = tunnel.exited() => return Err(SubmitError::TunnelExited(err.to_string())),
        }

        if let Some(tunnel) = tunnel_slot.take() {
            tunnel.shutdown().await;
        }
        progress.enter(SubmitState::Done);

        Ok(SubmitOutcome { job_name, job_id })
    }

    /// Wait until the RayJob status names its RayCluster.
    ///
    /// Read errors are fatal here, and so is a populated status without a
    /// cluster name.
    async fn await_cluster_ref(
        &self,
        namespace: &str,
        job_name: &str,
        created: &JobResource,
    ) -> Result<String> {
        let no_cluster = |detail: String| SubmitError::NoClusterName {
            job: job_name.to_string(),
            detail,
        };
        let missing = "status is set but has no rayClusterName";

        let job = match created.cluster_ref() {
            ClusterRef::Named(name) => return Ok(name),
            ClusterRef::Missing => return Err(no_cluster(missing.to_string())),
            ClusterRef::Unpopulated => {
                let spec = PollSpec::new(
                    self.config.cluster_ref_interval,
                    self.config.cluster_ref_timeout,
                    FetchErrorPolicy::Fatal,
                );
                poll_until(
                    &spec,
                    || self.api.get_job(namespace, job_name),
                    |job| match job.cluster_ref() {
                        ClusterRef::Named(_) => Condition::Met,
                        ClusterRef::Missing => Condition::Violated(missing.to_string()),
                        ClusterRef::Unpopulated => {
                            Condition::Unmet("RayJob status not populated yet".to_string())
                        }
                    },
                )
                .await
                .map_err(|e| match e {
                    PollError::Fetch(e) => SubmitError::api("get RayJob status", e),
                    PollError::Violated(detail) => no_cluster(detail),
                    PollError::TimedOut { elapsed, .. } => {
                        no_cluster(format!("status not populated after {:?}", elapsed))
                    }
                })?
            }
        };

        match job.cluster_ref() {
            ClusterRef::Named(name) => Ok(name),
            _ => Err(no_cluster(missing.to_string())),
        }
    }

    /// Wait until the RayCluster is ready. Read errors are retried. On timeout
    /// the RayJob created by this run is deleted before reporting.
    async fn await_cluster_ready(&self, namespace: &str, job_name: &str, cluster: &str) -> Result<()> {
        tracing::info!(cluster, "Waiting for RayCluster");
        self.events.emit(SubmitEvent::WaitingForCluster {
            cluster: cluster.to_string(),
        });

        let spec = PollSpec::new(
            self.config.cluster_ready_interval,
            self.config.cluster_ready_timeout,
            FetchErrorPolicy::Retry,
        );
        let events = &self.events;
        let outcome = poll_until(
            &spec,
            || self.api.get_cluster(namespace, cluster),
            |raycluster| match raycluster.readiness() {
                ClusterReadiness::Ready => Condition::Met,
                other => {
                    let reason = other.to_string();
                    events.emit(SubmitEvent::ClusterNotReady {
                        cluster: cluster.to_string(),
                        reason: reason.clone(),
                    });
                    Condition::Unmet(reason)
                }
            },
        )
        .await;

        let (waited, last) = match outcome {
            Ok(_) => {
                tracing::info!(cluster, "RayCluster ready");
                return Ok(());
            }
            Err(PollError::TimedOut { elapsed, last }) => (elapsed, last),
            // Unreachable with the retry policy and a check that never violates.
            Err(PollError::Fetch(e)) => return Err(SubmitError::api("get RayCluster", e)),
            Err(PollError::Violated(reason)) => (spec.max_elapsed.unwrap_or_default(), Some(reason)),
        };

        tracing::warn!(job = %job_name, cluster, "RayCluster not ready in time, deleting RayJob");
        self.events.emit(SubmitEvent::DeletingJob {
            name: job_name.to_string(),
        });
        self.api
            .delete_job(namespace, job_name)
            .await
            .map_err(|source| SubmitError::Cleanup {
                job: job_name.to_string(),
                source,
            })?;
        self.events.emit(SubmitEvent::JobDeleted {
            name: job_name.to_string(),
        });

        Err(SubmitError::ClusterTimeout {
            cluster: cluster.to_string(),
            waited,
            last: last.unwrap_or_else(|| ClusterReadiness::Undetermined.to_string()),
        })
    }

    /// Re-read the RayJob and record the submission id on it.
    async fn annotate(&self, namespace: &str, job_name: &str, job_id: &str) -> Result<()> {
        let mut latest = self
            .api
            .get_job(namespace, job_name)
            .await
            .map_err(|e| SubmitError::api("get latest version of RayJob", e))?;
        latest.set_submission_id(job_id);

        self.api
            .update_job(namespace, &latest)
            .await
            .map_err(|e| SubmitError::api("add job id to RayJob", e))?;

        tracing::info!(job = %job_name, job_id, "Annotated RayJob with submission id");
        self.events.emit(SubmitEvent::Annotated {
            job: job_name.to_string(),
            id: job_id.to_string(),
        });
        Ok(())
    }
}
