//! Bounded exponential-backoff polling of an observable condition.

use crate::core::domain::{
    error::{DevbaoError, DevbaoResult},
    model::settings::BackoffSettings,
};
use std::future::Future;
use tokio::time::{Instant, sleep};
use tracing::debug;

/// Outcome of a single probe.
#[derive(Debug)]
pub enum Probe<T> {
    Ready(T),
    /// The condition does not hold yet; `reason` is reported on timeout.
    Pending(String),
}

/// Repeats `probe` until it reports [`Probe::Ready`] or the budget is spent.
///
/// Probe errors are treated as transient and retried; the last one is
/// attached to the timeout error.
pub async fn poll_until<T, F, Fut>(
    settings: &BackoffSettings,
    what: &str,
    mut probe: F,
) -> DevbaoResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = DevbaoResult<Probe<T>>>,
{
    let start = Instant::now();
    let deadline = start + settings.budget;
    let mut backoff = settings.initial;

    loop {
        let last_error = match probe().await {
            Ok(Probe::Ready(value)) => return Ok(value),
            Ok(Probe::Pending(reason)) => reason,
            Err(e) => e.to_string(),
        };

        let now = Instant::now();
        let remaining = deadline.saturating_duration_since(now);
        if remaining.is_zero() {
            return Err(DevbaoError::Timeout {
                what: what.to_string(),
                elapsed_ms: now.duration_since(start).as_millis(),
                last_error: Some(last_error),
            });
        }

        debug!(target: "devbao::poll", what, backoff_ms = backoff.as_millis() as u64, %last_error, "condition not met, backing off");
        sleep(backoff.min(remaining)).await;
        backoff = (backoff * 2).min(settings.max);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn fast() -> BackoffSettings {
        BackoffSettings {
            initial: Duration::from_millis(1),
            max: Duration::from_millis(4),
            budget: Duration::from_millis(200),
        }
    }

    #[tokio::test]
    async fn test_poll_returns_once_ready() {
        let mut calls = 0;
        let value = poll_until(&fast(), "counter", || {
            calls += 1;
            let current = calls;
            async move {
                if current < 3 {
                    Ok(Probe::Pending(format!("only {current}")))
                } else {
                    Ok(Probe::Ready(current))
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(value, 3);
    }

    #[tokio::test]
    async fn test_poll_times_out_with_last_reason() {
        let settings = BackoffSettings {
            budget: Duration::from_millis(20),
            ..fast()
        };
        let err = poll_until::<(), _, _>(&settings, "never", || async {
            Err(DevbaoError::Connection("refused".into()))
        })
        .await
        .unwrap_err();

        match err {
            DevbaoError::Timeout { what, last_error, .. } => {
                assert_eq!(what, "never");
                assert!(last_error.unwrap().contains("refused"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
