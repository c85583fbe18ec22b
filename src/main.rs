use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use kube::config::{KubeConfigOptions, Kubeconfig};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use kuberay_submit::api::KubeRayApi;
use kuberay_submit::config::SubmitConfig;
use kuberay_submit::events::{EventSink, OutputStream, SubmitEvent};
use kuberay_submit::shutdown::install_shutdown_handler;
use kuberay_submit::submit::{join_entrypoint, SubmitOptions};
use kuberay_submit::tunnel::{HttpProbe, KubectlPortForward};
use kuberay_submit::{SubmissionOrchestrator, SubmitOutcome};

const LONG_ABOUT: &str = "\
Submit a ray job to a ray cluster as one would with 'ray job submit ENTRYPOINT'.
Supports the options of 'ray job submit' except '--address'.

Applies the RayJob resource (which must use submissionMode: InteractiveMode),
waits for its RayCluster, port-forwards the Ray dashboard and runs
'ray job submit' against it. The Ray submission id is recorded on the RayJob
under the ray.io/ray-job-submission-id annotation.

Examples:
  kubectl ray job submit -f rayjob.yaml --working-dir /path/to/working-dir/ -- python my_script.py
  kubectl ray job submit -f rayjob.yaml --runtime-env path/to/runtimeEnv.yaml -- python my_script.py";

#[derive(Parser, Debug)]
#[command(name = "kubectl-ray-job-submit")]
#[command(version)]
#[command(about = "Submit a ray job to a ray cluster through a RayJob resource")]
#[command(long_about = LONG_ABOUT)]
struct Args {
    /// Path and name of the Ray Job YAML file
    #[arg(short = 'f', long = "filename")]
    filename: PathBuf,

    /// ID to specify for the ray job. If not provided, one will be generated
    #[arg(long)]
    submission_id: Option<String>,

    /// Path and name to the runtime env YAML file
    #[arg(long)]
    runtime_env: Option<PathBuf>,

    /// Directory containing files that your job will run in
    #[arg(long)]
    working_dir: Option<String>,

    /// Headers passed through http/s to the Ray cluster, JSON formatted
    #[arg(long)]
    headers: Option<String>,

    /// JSON-serialized runtime_env dictionary. Takes precedence over the RayJob
    #[arg(long)]
    runtime_env_json: Option<String>,

    /// Verify the server's TLS certificate (true/false) or a path to trusted certificates
    #[arg(long)]
    verify: Option<String>,

    /// JSON-serialized dictionary mapping resource name to resource quantity
    #[arg(long)]
    entrypoint_resources: Option<String>,

    /// JSON-serialized dictionary of metadata to attach to the job
    #[arg(long)]
    metadata_json: Option<String>,

    /// Log style of 'ray job submit': auto | record | pretty
    #[arg(long)]
    log_style: Option<String>,

    /// Log color of 'ray job submit': auto | false | true
    #[arg(long)]
    log_color: Option<String>,

    /// Number of CPUs reserved for the entrypoint command
    #[arg(long)]
    entrypoint_num_cpus: Option<f32>,

    /// Number of GPUs reserved for the entrypoint command
    #[arg(long)]
    entrypoint_num_gpus: Option<f32>,

    /// Amount of memory reserved for the entrypoint command
    #[arg(long)]
    entrypoint_memory: Option<u64>,

    /// Do not stream logs and wait for the job to finish
    #[arg(long)]
    no_wait: bool,

    /// Seconds to wait for the RayCluster to become ready
    #[arg(long, default_value = "120")]
    cluster_timeout: u64,

    /// Seconds to wait for the dashboard port forward to answer
    #[arg(long, default_value = "60")]
    port_forward_timeout: u64,

    /// Output format of the final summary
    #[arg(long, short = 'o', default_value = "table")]
    output: OutputFormat,

    #[command(flatten)]
    kube: KubeArgs,

    /// Entrypoint command, after `--`
    #[arg(last = true, required = true)]
    entrypoint: Vec<String>,
}

#[derive(Debug, Clone, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

// =============================================================================
// Kubernetes Arguments
// =============================================================================

#[derive(Parser, Debug)]
struct KubeArgs {
    /// Namespace of the RayJob (defaults to the context namespace)
    #[arg(long, short = 'n')]
    namespace: Option<String>,

    /// Kubeconfig context to use
    #[arg(long)]
    context: Option<String>,

    /// Path to the kubeconfig file
    #[arg(long)]
    kubeconfig: Option<PathBuf>,
}

// =============================================================================
// JSON Output Types
// =============================================================================

#[derive(Serialize)]
struct SubmitSummaryOutput {
    namespace: String,
    ray_job: String,
    submission_id: String,
}

// =============================================================================
// Helper Functions
// =============================================================================

async fn load_kube_config(args: &KubeArgs) -> Result<kube::Config, Box<dyn std::error::Error>> {
    let options = KubeConfigOptions {
        context: args.context.clone(),
        cluster: None,
        user: None,
    };

    let config = match args.kubeconfig {
        Some(ref path) => {
            let kubeconfig = Kubeconfig::read_from(path)?;
            kube::Config::from_custom_kubeconfig(kubeconfig, &options).await?
        }
        None => kube::Config::from_kubeconfig(&options).await.map_err(|e| {
            format!(
                "Error retrieving kube config ({}), use \"kubectl config use-context <context>\" to select one",
                e
            )
        })?,
    };
    Ok(config)
}

fn print_summary(
    outcome: SubmitOutcome,
    namespace: String,
    format: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    match format {
        OutputFormat::Json => {
            let output = SubmitSummaryOutput {
                namespace,
                ray_job: outcome.job_name,
                submission_id: outcome.job_id,
            };
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Table => {
            println!("Ray job {} finished", outcome.job_id);
            println!("RayJob: {}/{}", namespace, outcome.job_name);
        }
    }
    Ok(())
}

fn render(event: SubmitEvent) {
    match event {
        SubmitEvent::JobCreated { name } => println!("Submitted RayJob {}.", name),
        SubmitEvent::WaitingForCluster { cluster } => {
            println!("Waiting for RayCluster");
            println!("Checking Cluster Status for cluster {}...", cluster);
        }
        SubmitEvent::ClusterNotReady { reason, .. } => println!("Cluster is not ready: {}", reason),
        SubmitEvent::DeletingJob { .. } => println!("Deleting RayJob..."),
        SubmitEvent::JobDeleted { name } => println!("Cleaned Up RayJob: {}", name),
        SubmitEvent::PortForwarding { service } => println!("Port Forwarding service {}", service),
        SubmitEvent::TunnelReady { endpoint } => println!("Portforwarding started on {}", endpoint),
        SubmitEvent::Command { argv } => println!("Ray command: {:?}", argv),
        SubmitEvent::Output {
            stream: OutputStream::Stdout,
            line,
        } => println!("{}", line),
        SubmitEvent::Output {
            stream: OutputStream::Stderr,
            line,
        } => eprintln!("{}", line),
        SubmitEvent::Annotated { job, id } => {
            println!("Recorded submission id {} on RayJob {}", id, job)
        }
        SubmitEvent::State(_) | SubmitEvent::Failed { .. } | SubmitEvent::JobIdentified { .. } => {}
    }
}

// =============================================================================
// Main Entry Point
// =============================================================================

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let kube_config = load_kube_config(&args.kube).await?;
    let namespace = args
        .kube
        .namespace
        .clone()
        .unwrap_or_else(|| kube_config.default_namespace.clone());

    let entrypoint = match join_entrypoint(&args.entrypoint) {
        Ok(entrypoint) => entrypoint,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    let options = SubmitOptions {
        namespace: Some(namespace.clone()),
        job_file: args.filename,
        submission_id: args.submission_id,
        working_dir: args.working_dir,
        runtime_env: args.runtime_env,
        runtime_env_json: args.runtime_env_json,
        headers: args.headers,
        verify: args.verify,
        entrypoint_resources: args.entrypoint_resources,
        metadata_json: args.metadata_json,
        log_style: args.log_style,
        log_color: args.log_color,
        entrypoint_num_cpus: args.entrypoint_num_cpus,
        entrypoint_num_gpus: args.entrypoint_num_gpus,
        entrypoint_memory: args.entrypoint_memory,
        no_wait: args.no_wait,
        entrypoint,
    };
    let submission = match options.validate() {
        Ok(submission) => submission,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    let config = SubmitConfig::default()
        .with_cluster_ready_timeout(Duration::from_secs(args.cluster_timeout))
        .with_tunnel_timeout(Duration::from_secs(args.port_forward_timeout));

    let client = kube::Client::try_from(kube_config)?;
    let forwarder = KubectlPortForward::new(config.kubectl_executable.clone())
        .with_context(args.kube.context.clone())
        .with_kubeconfig(args.kube.kubeconfig.clone());
    let probe = HttpProbe::new(config.probe_request_timeout)?;

    let (events, mut event_rx) = EventSink::channel();
    let printer = tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            render(event);
        }
    });

    let orchestrator = SubmissionOrchestrator::new(
        Arc::new(KubeRayApi::new(client)),
        Arc::new(forwarder),
        Arc::new(probe),
        config,
    )
    .with_events(events);

    let shutdown = install_shutdown_handler();
    let result = orchestrator.run(submission, shutdown).await;

    // Closing the sink lets the printer drain and stop.
    drop(orchestrator);
    if tokio::time::timeout(Duration::from_secs(2), printer).await.is_err() {
        tracing::warn!("Output printer did not finish");
    }

    match result {
        Ok(outcome) => print_summary(outcome, namespace, &args.output),
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}
