//! Polling bounds under a paused clock.

use std::time::Duration;

use tokio::time::Instant;

use kuberay_submit::poll::{poll_until, Condition, FetchErrorPolicy, PollError, PollSpec};

const SECOND: Duration = Duration::from_secs(1);

#[tokio::test(start_paused = true)]
async fn test_returns_first_met_value() {
    let spec = PollSpec::new(SECOND, Duration::from_secs(10), FetchErrorPolicy::Fatal);
    let start = Instant::now();
    let mut calls = 0;

    let value = poll_until(
        &spec,
        || {
            calls += 1;
            let n = calls;
            async move { Ok::<_, String>(n) }
        },
        |n| {
            if *n >= 3 {
                Condition::Met
            } else {
                Condition::Unmet(format!("only {}", n))
            }
        },
    )
    .await
    .unwrap();

    assert_eq!(value, 3);
    assert_eq!(calls, 3);
    // Every fetch is preceded by one interval
    assert_eq!(start.elapsed(), Duration::from_secs(3));
}

#[tokio::test(start_paused = true)]
async fn test_timeout_is_never_reported_early() {
    let max = Duration::from_secs(5);
    let spec = PollSpec::new(SECOND, max, FetchErrorPolicy::Fatal);
    let mut calls = 0;

    let err = poll_until(
        &spec,
        || {
            calls += 1;
            async { Ok::<_, String>(()) }
        },
        |_| Condition::Unmet("cluster state is \"pending\"".to_string()),
    )
    .await
    .unwrap_err();

    match err {
        PollError::TimedOut { elapsed, last } => {
            assert!(elapsed >= max);
            assert!(elapsed <= max + 2 * SECOND);
            assert_eq!(last.as_deref(), Some("cluster state is \"pending\""));
        }
        other => panic!("expected timeout, got {:?}", other),
    }
    // 0s..=5s checks before sleeping, so ticks land at 1..=6
    assert_eq!(calls, 6);
}

#[tokio::test(start_paused = true)]
async fn test_hung_fetch_is_cut_off_at_deadline() {
    let max = Duration::from_secs(10);
    let spec = PollSpec::new(Duration::from_secs(2), max, FetchErrorPolicy::Retry);
    let start = Instant::now();

    let err = poll_until(
        &spec,
        || async {
            tokio::time::sleep(Duration::from_secs(300)).await;
            Ok::<_, String>(())
        },
        |_| Condition::Met,
    )
    .await
    .unwrap_err();

    assert!(matches!(err, PollError::TimedOut { .. }), "got {:?}", err);
    assert_eq!(start.elapsed(), max);
}

#[tokio::test(start_paused = true)]
async fn test_slow_fetch_keeps_last_reason() {
    let spec = PollSpec::new(SECOND, Duration::from_secs(5), FetchErrorPolicy::Fatal);
    let mut calls = 0;

    let err = poll_until(
        &spec,
        || {
            calls += 1;
            let n = calls;
            async move {
                if n > 1 {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                }
                Ok::<_, String>(())
            }
        },
        |_| Condition::Unmet("cluster state is \"pending\"".to_string()),
    )
    .await
    .unwrap_err();

    match err {
        PollError::TimedOut { elapsed, last } => {
            assert_eq!(elapsed, Duration::from_secs(5));
            assert_eq!(last.as_deref(), Some("cluster state is \"pending\""));
        }
        other => panic!("expected timeout, got {:?}", other),
    }
}

#[tokio::test(start_paused = true)]
async fn test_fatal_policy_surfaces_first_error() {
    let spec = PollSpec::new(SECOND, Duration::from_secs(10), FetchErrorPolicy::Fatal);
    let mut calls = 0;

    let err = poll_until(
        &spec,
        || {
            calls += 1;
            async { Err::<(), _>("rayjobs \"demo\" not found".to_string()) }
        },
        |_| Condition::Met,
    )
    .await
    .unwrap_err();

    assert!(matches!(err, PollError::Fetch(ref e) if e.contains("not found")));
    assert_eq!(calls, 1);
}

#[tokio::test(start_paused = true)]
async fn test_retry_policy_rides_out_errors() {
    let spec = PollSpec::new(SECOND, Duration::from_secs(10), FetchErrorPolicy::Retry);
    let mut calls = 0;

    let value = poll_until(
        &spec,
        || {
            calls += 1;
            let n = calls;
            async move {
                if n < 3 {
                    Err("connection reset".to_string())
                } else {
                    Ok(n)
                }
            }
        },
        |_| Condition::Met,
    )
    .await
    .unwrap();

    assert_eq!(value, 3);
}

#[tokio::test(start_paused = true)]
async fn test_retry_policy_reports_last_error_on_timeout() {
    let spec = PollSpec::new(SECOND, Duration::from_secs(3), FetchErrorPolicy::Retry);

    let err = poll_until(
        &spec,
        || async { Err::<(), _>("connection reset".to_string()) },
        |_| Condition::Met,
    )
    .await
    .unwrap_err();

    assert!(err.to_string().contains("connection reset"), "{}", err);
}

#[tokio::test(start_paused = true)]
async fn test_violated_condition_stops_polling() {
    let spec = PollSpec::new(SECOND, Duration::from_secs(10), FetchErrorPolicy::Fatal);
    let mut calls = 0;

    let err = poll_until(
        &spec,
        || {
            calls += 1;
            async { Ok::<_, String>(()) }
        },
        |_| Condition::Violated("status has no rayClusterName".to_string()),
    )
    .await
    .unwrap_err();

    assert!(matches!(err, PollError::Violated(_)));
    assert_eq!(calls, 1);
}

#[tokio::test(start_paused = true)]
async fn test_unbounded_polls_past_any_deadline() {
    let spec = PollSpec::unbounded(SECOND, FetchErrorPolicy::Fatal);
    let start = Instant::now();
    let mut calls = 0;

    poll_until(
        &spec,
        || {
            calls += 1;
            let n = calls;
            async move { Ok::<_, String>(n) }
        },
        |n| {
            if *n == 600 {
                Condition::Met
            } else {
                Condition::Unmet("waiting".to_string())
            }
        },
    )
    .await
    .unwrap();

    assert_eq!(start.elapsed(), Duration::from_secs(600));
}
