use std::time::Duration;

/// Annotation written on the RayJob once the Ray submission id is known.
pub const SUBMISSION_ID_ANNOTATION: &str = "ray.io/ray-job-submission-id";

/// The only submission mode this tool can drive.
pub const INTERACTIVE_MODE: &str = "InteractiveMode";

/// Timing, port and executable settings for one submission run.
///
/// Defaults follow what the Ray dashboard and `ray job submit` expect:
/// the dashboard listens on 8265 and submission ids contain `raysubmit`.
#[derive(Debug, Clone)]
pub struct SubmitConfig {
    /// Interval between RayJob status reads while waiting for a cluster name
    pub cluster_ref_interval: Duration,
    /// Give up waiting for the RayJob status after this long
    pub cluster_ref_timeout: Duration,
    /// Interval between RayCluster readiness reads
    pub cluster_ready_interval: Duration,
    /// Give up (and delete the RayJob) if the cluster is not ready after this long
    pub cluster_ready_timeout: Duration,
    /// Interval between dashboard reachability probes
    pub tunnel_probe_interval: Duration,
    /// Give up waiting for the port forward after this long
    pub tunnel_timeout: Duration,
    /// Per-request timeout of a single reachability probe
    pub probe_request_timeout: Duration,
    /// Local end of the port forward
    pub local_port: u16,
    /// Dashboard port on the head service
    pub remote_port: u16,
    /// Executable invoked as `<ray> job submit ...`
    pub ray_executable: String,
    /// Executable used for `port-forward`
    pub kubectl_executable: String,
    /// Substring identifying a submission id in `ray job submit` output
    pub job_id_marker: String,
    /// Optional bound on the job id wait. `None` waits until stdout closes.
    pub job_id_timeout: Option<Duration>,
}

impl Default for SubmitConfig {
    fn default() -> Self {
        Self {
            cluster_ref_interval: Duration::from_secs(2),
            cluster_ref_timeout: Duration::from_secs(300),
            cluster_ready_interval: Duration::from_secs(2),
            cluster_ready_timeout: Duration::from_secs(120),
            tunnel_probe_interval: Duration::from_secs(2),
            tunnel_timeout: Duration::from_secs(60),
            probe_request_timeout: Duration::from_secs(5),
            local_port: 8265,
            remote_port: 8265,
            ray_executable: "ray".to_string(),
            kubectl_executable: "kubectl".to_string(),
            job_id_marker: "raysubmit".to_string(),
            job_id_timeout: None,
        }
    }
}

impl SubmitConfig {
    /// Address `ray job submit --address` is pointed at (the local tunnel end).
    pub fn dashboard_address(&self) -> String {
        format!("http://localhost:{}", self.local_port)
    }

    pub fn with_ray_executable(mut self, executable: impl Into<String>) -> Self {
        self.ray_executable = executable.into();
        self
    }

    pub fn with_cluster_ready_timeout(mut self, timeout: Duration) -> Self {
        self.cluster_ready_timeout = timeout;
        self
    }

    pub fn with_tunnel_timeout(mut self, timeout: Duration) -> Self {
        self.tunnel_timeout = timeout;
        self
    }

    /// Use the same poll interval for every wait. Mostly useful in tests.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.cluster_ref_interval = interval;
        self.cluster_ready_interval = interval;
        self.tunnel_probe_interval = interval;
        self
    }
}
