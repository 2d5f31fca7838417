//! In-process retry supervisor.
//!
//! The whole transfer phase of an operation is re-run up to `count` more times with a constant `interval`
//! between attempts. Credentials are resolved once before the first attempt and stay resolved in
//! [`crate::config::Config`], so a retry never contacts the ticket service again. Each attempt re-plans from
//! scratch; files that already made it are skipped by the planners' unchanged-file check.

use std::future::Future;
use std::time::Duration;

use anyhow::{Context, Result};
use backoff::backoff::Constant;
use backoff::future::retry_notify;
use futures::TryFutureExt;

use crate::config::RetryConfig;

/// Runs `attempt(1)`, `attempt(2)`, ... until one succeeds or `retry.count + 1` attempts have failed.
pub async fn run_with_retry<T, F, Fut>(retry: &RetryConfig, mut attempt: F) -> Result<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let attempts = retry.count.saturating_add(1);
    let mut started = 0;
    let mut failed = 0;
    let res = retry_notify(
        Constant::new(retry.interval),
        || {
            started += 1;
            let last = started >= attempts;
            attempt(started).map_err(move |err| {
                if last {
                    backoff::Error::permanent(err)
                } else {
                    backoff::Error::transient(err)
                }
            })
        },
        |err: anyhow::Error, wait: Duration| {
            failed += 1;
            tracing::warn!("attempt {}/{} failed: {:#}, retrying in {:?}", failed, attempts, err, wait);
        },
    )
    .await;
    match res {
        Err(err) if attempts > 1 => Err(err).with_context(|| format!("giving up after {attempts} attempts")),
        res => res,
    }
}
