use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::time::Instant;

use super::TunnelHandle;
use crate::error::{Result, SubmitError};

#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("request to {endpoint} failed: {source}")]
    Request {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{endpoint} answered {status}")]
    Status { endpoint: String, status: u16 },

    #[error("{0}")]
    Other(String),
}

/// A single reachability check of the tunnel endpoint.
#[async_trait]
pub trait ReadinessProbe: Send + Sync {
    async fn probe(&self, endpoint: &str) -> std::result::Result<(), ProbeError>;
}

/// HTTP GET probe; any 2xx answer means the dashboard is reachable.
#[derive(Debug, Clone)]
pub struct HttpProbe {
    client: reqwest::Client,
}

impl HttpProbe {
    pub fn new(request_timeout: Duration) -> std::result::Result<Self, ProbeError> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| ProbeError::Other(format!("failed to build http client: {}", e)))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ReadinessProbe for HttpProbe {
    async fn probe(&self, endpoint: &str) -> std::result::Result<(), ProbeError> {
        let response = self
            .client
            .get(endpoint)
            .send()
            .await
            .map_err(|source| ProbeError::Request {
                endpoint: endpoint.to_string(),
                source,
            })?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(ProbeError::Status {
                endpoint: endpoint.to_string(),
                status: status.as_u16(),
            })
        }
    }
}

/// Probe `endpoint` every `interval` until it answers or `max_elapsed` passes.
///
/// Failed probes are logged and retried. The forwarder task exiting before
/// the endpoint becomes reachable fails the wait immediately. Cancelling the
/// handle on timeout is left to the caller.
pub async fn wait_until_ready(
    handle: &mut TunnelHandle,
    probe: &dyn ReadinessProbe,
    endpoint: &str,
    interval: Duration,
    max_elapsed: Duration,
) -> Result<()> {
    let start = Instant::now();

    let probing = async {
        while start.elapsed() <= max_elapsed {
            tokio::time::sleep(interval).await;
            match probe.probe(endpoint).await {
                Ok(()) => return true,
                Err(e) => {
                    tracing::info!(error = %e, "Port forward not ready yet");
                }
            }
        }
        false
    };

    tokio::select! {
        ready = probing => {
            if ready {
                tracing::info!(endpoint, "Port forward ready");
                Ok(())
            } else {
                Err(SubmitError::TunnelTimeout {
                    endpoint: endpoint.to_string(),
                    waited: start.elapsed(),
                })
            }
        }
        err = handle.exited() => Err(SubmitError::TunnelExited(err.to_string())),
    }
}
