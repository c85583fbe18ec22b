//! Tunnel lifecycle, readiness probing and the kubectl forwarder.


use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use tokio_util::sync::CancellationToken;

use kuberay_submit::tunnel::{
    wait_until_ready, Forwarder, HttpProbe, KubectlPortForward, ProbeError, ReadinessProbe,
    TunnelError, TunnelSupervisor, TunnelTarget,
};
use kuberay_submit::SubmitError;
use test_harness::*;

const INTERVAL: Duration = Duration::from_millis(10);

fn target() -> TunnelTarget {
    TunnelTarget {
        namespace: "ml".to_string(),
        service: "demo-head-svc".to_string(),
        local_port: 18265,
        remote_port: 8265,
    }
}

/// Serve a fake dashboard on an ephemeral port and return its base URL.
async fn spawn_dashboard() -> String {
    let app = Router::new()
        .route("/", get(|| async { "Ray Dashboard" }))
        .route("/broken", get(|| async { StatusCode::INTERNAL_SERVER_ERROR }));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

#[tokio::test]
async fn test_http_probe_accepts_success_only() {
    let base = spawn_dashboard().await;
    let probe = HttpProbe::new(Duration::from_secs(2)).unwrap();

    probe.probe(&base).await.unwrap();

    match probe.probe(&format!("{}/broken", base)).await.unwrap_err() {
        ProbeError::Status { status, .. } => assert_eq!(status, 500),
        other => panic!("expected status error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_http_probe_reports_refused_connection() {
    // Bind then drop to get a port nothing listens on
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let probe = HttpProbe::new(Duration::from_secs(2)).unwrap();
    let err = probe.probe(&format!("http://{}", addr)).await.unwrap_err();
    assert!(matches!(err, ProbeError::Request { .. }));
}

#[tokio::test]
async fn test_wait_until_ready_against_dashboard() {
    let base = spawn_dashboard().await;
    let forwarder = Arc::new(FakeForwarder::new(ForwardBehavior::RunUntilCancelled));
    let probe = HttpProbe::new(Duration::from_secs(2)).unwrap();

    let mut handle = TunnelSupervisor::start(forwarder.clone(), target());
    wait_until_ready(&mut handle, &probe, &base, INTERVAL, Duration::from_secs(2))
        .await
        .unwrap();

    handle.shutdown().await;
    assert_eq!(forwarder.starts(), 1);
    assert_eq!(forwarder.cancellations(), 1);
}

#[tokio::test]
async fn test_wait_until_ready_retries_failed_probes() {
    let forwarder = Arc::new(FakeForwarder::new(ForwardBehavior::RunUntilCancelled));
    let probe = FakeProbe::ready_after(4);

    let mut handle = TunnelSupervisor::start(forwarder, target());
    wait_until_ready(&mut handle, &probe, "http://localhost:18265", INTERVAL, Duration::from_secs(2))
        .await
        .unwrap();

    assert_eq!(probe.calls.load(std::sync::atomic::Ordering::SeqCst), 4);
}

#[tokio::test]
async fn test_wait_until_ready_times_out() {
    let forwarder = Arc::new(FakeForwarder::new(ForwardBehavior::RunUntilCancelled));
    let probe = FakeProbe::never();

    let mut handle = TunnelSupervisor::start(forwarder.clone(), target());
    let err = wait_until_ready(
        &mut handle,
        &probe,
        "http://localhost:18265",
        INTERVAL,
        Duration::from_millis(100),
    )
    .await
    .unwrap_err();

    match err {
        SubmitError::TunnelTimeout { endpoint, waited } => {
            assert_eq!(endpoint, "http://localhost:18265");
            assert!(waited >= Duration::from_millis(100));
        }
        other => panic!("expected TunnelTimeout, got {:?}", other),
    }
    // Still running until the caller cancels
    assert_eq!(forwarder.cancellations(), 0);
    assert!(handle.cancel());
    assert!(eventually(|| forwarder.cancellations() == 1).await);
}

#[tokio::test]
async fn test_forwarder_death_ends_wait() {
    let forwarder = Arc::new(FakeForwarder::new(ForwardBehavior::FailAfter(
        Duration::from_millis(20),
    )));
    let probe = FakeProbe::never();

    let mut handle = TunnelSupervisor::start(forwarder, target());
    let err = wait_until_ready(
        &mut handle,
        &probe,
        "http://localhost:18265",
        INTERVAL,
        Duration::from_secs(5),
    )
    .await
    .unwrap_err();

    assert!(matches!(err, SubmitError::TunnelExited(_)), "got {:?}", err);
}

#[tokio::test]
async fn test_cancel_fires_once() {
    let forwarder = Arc::new(FakeForwarder::new(ForwardBehavior::RunUntilCancelled));
    let mut handle = TunnelSupervisor::start(forwarder.clone(), target());
    assert!(eventually(|| forwarder.starts() == 1).await);

    assert!(!handle.is_cancelled());
    assert!(handle.cancel());
    assert!(handle.is_cancelled());
    assert!(!handle.cancel());

    handle.shutdown().await;
    assert_eq!(forwarder.cancellations(), 1);
}

#[tokio::test]
async fn test_drop_cancels_forwarder() {
    let forwarder = Arc::new(FakeForwarder::new(ForwardBehavior::RunUntilCancelled));
    let handle = TunnelSupervisor::start(forwarder.clone(), target());
    assert!(eventually(|| forwarder.starts() == 1).await);

    drop(handle);
    assert!(eventually(|| forwarder.cancellations() == 1).await);
}

#[tokio::test]
async fn test_exited_reports_forwarder_error() {
    let forwarder = Arc::new(FakeForwarder::new(ForwardBehavior::FailAfter(
        Duration::from_millis(5),
    )));
    let mut handle = TunnelSupervisor::start(forwarder, target());

    let err = handle.exited().await;
    assert!(err.to_string().contains("connection refused"));
}

// =============================================================================
// kubectl port-forward
// =============================================================================

#[tokio::test]
async fn test_kubectl_forwarder_stops_on_cancel() {
    let dir = tempfile::tempdir().unwrap();
    let args_file = dir.path().join("args");
    let kubectl = write_executable(
        dir.path(),
        "kubectl",
        &format!(
            "printf '%s\\n' \"$@\" > {}\necho 'Forwarding from 127.0.0.1:18265 -> 8265'\nexec sleep 30",
            args_file.display()
        ),
    );

    let forwarder = KubectlPortForward::new(kubectl.display().to_string())
        .with_context(Some("staging".to_string()));
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        trigger.cancel();
    });

    tokio::time::timeout(Duration::from_secs(5), forwarder.forward(&target(), cancel))
        .await
        .expect("forwarder stopped after cancel")
        .unwrap();

    let args = std::fs::read_to_string(&args_file).unwrap();
    assert_eq!(
        args.lines().collect::<Vec<_>>(),
        vec![
            "port-forward",
            "--context=staging",
            "--namespace=ml",
            "service/demo-head-svc",
            "18265:8265",
        ]
    );
}

#[tokio::test]
async fn test_kubectl_forwarder_exit_carries_stderr() {
    let dir = tempfile::tempdir().unwrap();
    let kubectl = write_executable(
        dir.path(),
        "kubectl",
        "echo 'error: services \"demo-head-svc\" not found' >&2\nexit 1",
    );

    let forwarder = KubectlPortForward::new(kubectl.display().to_string());
    let err = forwarder
        .forward(&target(), CancellationToken::new())
        .await
        .unwrap_err();

    match err {
        TunnelError::Exited { detail, .. } => assert!(detail.contains("not found"), "{}", detail),
        other => panic!("expected Exited, got {:?}", other),
    }
}

#[tokio::test]
async fn test_kubectl_forwarder_missing_binary() {
    let forwarder = KubectlPortForward::new("/nonexistent/kubectl");
    let err = forwarder
        .forward(&target(), CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, TunnelError::Start(_)));
}
