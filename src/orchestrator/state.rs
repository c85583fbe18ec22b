/// Stages of one submission run, in order. `Failed` is reachable from any
/// non-terminal stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitState {
    Created,
    AwaitingClusterRef,
    AwaitingClusterReady,
    TunnelStarting,
    TunnelReady,
    Submitting,
    AwaitingJobId,
    AwaitingCompletion,
    Done,
    Failed,
}

impl SubmitState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SubmitState::Done | SubmitState::Failed)
    }
}

impl std::fmt::Display for SubmitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SubmitState::Created => write!(f, "created"),
            SubmitState::AwaitingClusterRef => write!(f, "awaiting_cluster_ref"),
            SubmitState::AwaitingClusterReady => write!(f, "awaiting_cluster_ready"),
            SubmitState::TunnelStarting => write!(f, "tunnel_starting"),
            SubmitState::TunnelReady => write!(f, "tunnel_ready"),
            SubmitState::Submitting => write!(f, "submitting"),
            SubmitState::AwaitingJobId => write!(f, "awaiting_job_id"),
            SubmitState::AwaitingCompletion => write!(f, "awaiting_completion"),
            SubmitState::Done => write!(f, "done"),
            SubmitState::Failed => write!(f, "failed"),
        }
    }
}
