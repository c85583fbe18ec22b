//! Running the submission executable and correlating its output.

use std::time::Duration;

use kuberay_submit::events::{EventSink, OutputStream, SubmitEvent};
use kuberay_submit::submit::{JobIdCorrelator, JobIdWait, SubmitCommand, SubmitProcess};
use kuberay_submit::SubmitError;

fn sh(script: &str) -> SubmitCommand {
    SubmitCommand::from_argv(vec!["sh".to_string(), "-c".to_string(), script.to_string()])
}

fn output_lines(rx: &mut tokio::sync::mpsc::UnboundedReceiver<SubmitEvent>) -> Vec<(OutputStream, String)> {
    let mut lines = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if let SubmitEvent::Output { stream, line } = event {
            lines.push((stream, line));
        }
    }
    lines
}

#[tokio::test]
async fn test_streams_both_outputs_and_skips_empty_lines() {
    let (events, mut rx) = EventSink::channel();
    let mut process = SubmitProcess::launch(
        &sh("echo one; echo; echo warn >&2; printf 'two\\r\\n'; printf 'tail'"),
        events,
        None,
    )
    .unwrap();

    process.wait().await.unwrap();

    let lines = output_lines(&mut rx);
    let stdout: Vec<&str> = lines
        .iter()
        .filter(|(s, _)| *s == OutputStream::Stdout)
        .map(|(_, l)| l.as_str())
        .collect();
    assert_eq!(stdout, vec!["one", "two", "tail"]);
    assert!(lines.contains(&(OutputStream::Stderr, "warn".to_string())));
}

#[tokio::test]
async fn test_nonzero_exit_is_an_error() {
    let mut process = SubmitProcess::launch(&sh("exit 4"), EventSink::disabled(), None).unwrap();

    match process.wait().await.unwrap_err() {
        SubmitError::SubmitFailed(status) => assert_eq!(status.code(), Some(4)),
        other => panic!("expected SubmitFailed, got {:?}", other),
    }
}

#[tokio::test]
async fn test_missing_executable_fails_to_spawn() {
    let command = SubmitCommand::from_argv(vec!["/nonexistent/ray".to_string(), "job".to_string()]);

    let err = SubmitProcess::launch(&command, EventSink::disabled(), None)
        .err()
        .expect("spawn should fail");
    assert!(matches!(err, SubmitError::Spawn { ref program, .. } if program == "/nonexistent/ray"));
}

#[tokio::test]
async fn test_first_job_id_wins() {
    let (correlator, wait) = JobIdCorrelator::new("raysubmit");
    let mut process = SubmitProcess::launch(
        &sh("echo \"Job 'raysubmit_first' submitted\"; echo \"Job 'raysubmit_second' submitted\""),
        EventSink::disabled(),
        Some(correlator),
    )
    .unwrap();

    let id = wait.resolve(None).await.unwrap();
    process.wait().await.unwrap();

    assert_eq!(id, "raysubmit_first");
}

#[tokio::test]
async fn test_stdout_closing_without_id_is_not_found() {
    let (correlator, wait) = JobIdCorrelator::new("raysubmit");
    let mut process = SubmitProcess::launch(
        &sh("echo 'raysubmit_unquoted'; echo \"'raysubmit_on_stderr'\" >&2"),
        EventSink::disabled(),
        Some(correlator),
    )
    .unwrap();

    let err = wait.resolve(None).await.unwrap_err();
    process.wait().await.unwrap();

    assert!(matches!(err, SubmitError::JobIdNotFound { .. }));
}

#[tokio::test]
async fn test_job_id_wait_times_out() {
    let (correlator, wait) = JobIdCorrelator::new("raysubmit");
    let mut process = SubmitProcess::launch(
        &sh("sleep 2"),
        EventSink::disabled(),
        Some(correlator),
    )
    .unwrap();

    let err = wait
        .resolve(Some(Duration::from_millis(100)))
        .await
        .unwrap_err();
    assert!(matches!(err, SubmitError::JobIdTimeout(_)));

    process.wait().await.unwrap();
}

#[tokio::test]
async fn test_supplied_id_resolves_immediately() {
    let id = JobIdWait::supplied("given-id").resolve(None).await.unwrap();
    assert_eq!(id, "given-id");
}

#[test]
fn test_correlator_delivers_once() {
    let (mut correlator, _wait) = JobIdCorrelator::new("raysubmit");

    assert!(!correlator.observe("Job submission server address: http://localhost:8265"));
    assert!(!correlator.is_delivered());
    assert!(correlator.observe("Job 'raysubmit_a1' submitted successfully"));
    assert!(correlator.is_delivered());
    assert!(!correlator.observe("Job 'raysubmit_b2' submitted successfully"));
}
