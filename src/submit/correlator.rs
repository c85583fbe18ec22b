use std::time::Duration;

use regex::Regex;
use tokio::sync::oneshot;

use crate::error::{Result, SubmitError};

/// Scans `ray job submit` stdout for the submission id.
///
/// `ray job submit` prints lines such as `Job 'raysubmit_abc123' submitted
/// successfully`. The first single-quoted token containing the marker is
/// delivered once; later matches are ignored.
#[derive(Debug)]
pub struct JobIdCorrelator {
    marker: String,
    pattern: Regex,
    slot: Option<oneshot::Sender<String>>,
}

/// The other end of a [`JobIdCorrelator`], or an id known up front.
#[derive(Debug)]
pub enum JobIdWait {
    Supplied(String),
    Scanning {
        marker: String,
        rx: oneshot::Receiver<String>,
    },
}

fn quoted_token_pattern(marker: &str) -> Regex {
    // Marker is escaped; the pattern always compiles.
    Regex::new(&format!("'([^']*{}[^']*)'", regex::escape(marker)))
        .expect("escaped job id pattern is valid")
}

fn first_capture(pattern: &Regex, line: &str) -> Option<String> {
    pattern
        .captures(line)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

impl JobIdCorrelator {
    pub fn new(marker: &str) -> (Self, JobIdWait) {
        let (tx, rx) = oneshot::channel();
        let correlator = Self {
            marker: marker.to_string(),
            pattern: quoted_token_pattern(marker),
            slot: Some(tx),
        };
        let wait = JobIdWait::Scanning {
            marker: marker.to_string(),
            rx,
        };
        (correlator, wait)
    }

    /// Feed one stdout line. Returns true if this line delivered the id.
    pub fn observe(&mut self, line: &str) -> bool {
        if self.slot.is_none() || line.is_empty() || !line.contains(&self.marker) {
            return false;
        }

        let Some(id) = first_capture(&self.pattern, line) else {
            return false;
        };

        match self.slot.take() {
            Some(tx) => {
                tracing::debug!(job_id = %id, "Found job id in output");
                // The waiter may have given up already; nothing to do then.
                let _ = tx.send(id);
                true
            }
            None => false,
        }
    }

    pub fn is_delivered(&self) -> bool {
        self.slot.is_none()
    }
}

impl JobIdWait {
    pub fn supplied(id: impl Into<String>) -> Self {
        JobIdWait::Supplied(id.into())
    }

    /// Wait for the id.
    ///
    /// Fails with [`SubmitError::JobIdNotFound`] once the correlator is dropped
    /// without a match (stdout closed), or with [`SubmitError::JobIdTimeout`]
    /// when `timeout` elapses first.
    pub async fn resolve(self, timeout: Option<Duration>) -> Result<String> {
        let (marker, rx) = match self {
            JobIdWait::Supplied(id) => return Ok(id),
            JobIdWait::Scanning { marker, rx } => (marker, rx),
        };

        let received = match timeout {
            Some(limit) => tokio::time::timeout(limit, rx)
                .await
                .map_err(|_| SubmitError::JobIdTimeout(limit))?,
            None => rx.await,
        };

        received.map_err(|_| SubmitError::JobIdNotFound { marker })
    }
}
