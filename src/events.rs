//! Progress events emitted while a submission runs.
//!
//! The orchestrator and the process readers push [`SubmitEvent`]s into an
//! [`EventSink`]; the CLI renders them, tests assert on them. A sink without a
//! receiver drops events silently.

use tokio::sync::mpsc;

use crate::orchestrator::SubmitState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SubmitEvent {
    /// The orchestrator entered a new state
    State(SubmitState),
    /// The run failed while in `from`
    Failed { from: SubmitState, error: String },
    JobCreated { name: String },
    WaitingForCluster { cluster: String },
    ClusterNotReady { cluster: String, reason: String },
    /// Cleanup of the RayJob is about to start
    DeletingJob { name: String },
    JobDeleted { name: String },
    PortForwarding { service: String },
    TunnelReady { endpoint: String },
    Command { argv: Vec<String> },
    /// One non-empty line of `ray job submit` output
    Output { stream: OutputStream, line: String },
    JobIdentified { id: String },
    Annotated { job: String, id: String },
}

#[derive(Debug, Clone, Default)]
pub struct EventSink {
    tx: Option<mpsc::UnboundedSender<SubmitEvent>>,
}

impl EventSink {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<SubmitEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn emit(&self, event: SubmitEvent) {
        if let Some(ref tx) = self.tx {
            // Receiver gone means nobody is rendering; keep going.
            let _ = tx.send(event);
        }
    }
}
