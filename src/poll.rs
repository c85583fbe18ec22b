//! Bounded-retry polling.
//!
//! [`poll_until`] sleeps one interval, fetches, and evaluates a check, until the
//! check is met or the elapsed time exceeds the deadline. The deadline is
//! compared once per iteration and each fetch is cut off at the deadline, so a
//! run overruns it by at most one interval.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;

/// What to do when a fetch fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchErrorPolicy {
    /// Surface the error immediately
    Fatal,
    /// Log and try again on the next tick
    Retry,
}

/// Result of evaluating a fetched resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Condition {
    Met,
    /// Not there yet; the reason is kept for the timeout report
    Unmet(String),
    /// The resource is in a state that will never satisfy the check
    Violated(String),
}

#[derive(Debug, Clone)]
pub struct PollSpec {
    pub interval: Duration,
    /// `None` polls until the check is met or violated
    pub max_elapsed: Option<Duration>,
    pub on_fetch_error: FetchErrorPolicy,
}

impl PollSpec {
    pub fn new(interval: Duration, max_elapsed: Duration, on_fetch_error: FetchErrorPolicy) -> Self {
        Self {
            interval,
            max_elapsed: Some(max_elapsed),
            on_fetch_error,
        }
    }

    pub fn unbounded(interval: Duration, on_fetch_error: FetchErrorPolicy) -> Self {
        Self {
            interval,
            max_elapsed: None,
            on_fetch_error,
        }
    }
}

#[derive(Error, Debug)]
pub enum PollError<E> {
    #[error("fetch failed: {0}")]
    Fetch(E),

    #[error("{0}")]
    Violated(String),

    #[error("timed out after {elapsed:?}: {}", .last.as_deref().unwrap_or("no successful check"))]
    TimedOut {
        elapsed: Duration,
        last: Option<String>,
    },
}

/// Poll `fetch` until `check` reports [`Condition::Met`], returning the last
/// fetched value.
pub async fn poll_until<T, E, F, Fut, C>(
    spec: &PollSpec,
    mut fetch: F,
    mut check: C,
) -> Result<T, PollError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    C: FnMut(&T) -> Condition,
    E: Display,
{
    let start = Instant::now();
    let deadline = spec.max_elapsed.map(|max| start + max);
    let mut last: Option<String> = None;

    while deadline.map_or(true, |deadline| Instant::now() <= deadline) {
        tokio::time::sleep(spec.interval).await;

        let fetched = match deadline {
            Some(deadline) => match tokio::time::timeout_at(deadline, fetch()).await {
                Ok(fetched) => fetched,
                Err(_) => {
                    tracing::warn!("Fetch still pending at the polling deadline");
                    break;
                }
            },
            None => fetch().await,
        };

        let value = match fetched {
            Ok(value) => value,
            Err(e) => match spec.on_fetch_error {
                FetchErrorPolicy::Fatal => return Err(PollError::Fetch(e)),
                FetchErrorPolicy::Retry => {
                    tracing::warn!(error = %e, "Fetch failed while polling, retrying");
                    last = Some(e.to_string());
                    continue;
                }
            },
        };

        match check(&value) {
            Condition::Met => return Ok(value),
            Condition::Unmet(reason) => {
                tracing::debug!(reason = %reason, "Condition not met yet");
                last = Some(reason);
            }
            Condition::Violated(reason) => return Err(PollError::Violated(reason)),
        }
    }

    Err(PollError::TimedOut {
        elapsed: start.elapsed(),
        last,
    })
}
