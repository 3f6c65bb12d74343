use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio::time::sleep;
use tokio::time::timeout;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::BackoffPolicy;
use crate::Error;
use crate::Result;

/// Capped exponential backoff with a little jitter.
///
/// The n-th delay is `base * 2^n`, capped at `max`, plus up to 25% jitter
/// (the jitter itself never pushes the delay past `max`).
#[derive(Debug, Clone)]
pub(crate) struct Backoff {
    base: Duration,
    max: Duration,
    attempt: u32,
}

impl Backoff {
    pub(crate) fn new(policy: &BackoffPolicy) -> Self {
        Self {
            base: policy.base_delay(),
            max: policy.max_delay(),
            attempt: 0,
        }
    }

    pub(crate) fn next_delay(&mut self) -> Duration {
        let factor = 1u32.checked_shl(self.attempt.min(16)).unwrap_or(u32::MAX);
        let raw = self.base.saturating_mul(factor).min(self.max);
        self.attempt = self.attempt.saturating_add(1);

        let jitter_cap = raw.as_millis() as u64 / 4;
        let jitter = if jitter_cap == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=jitter_cap)
        };
        (raw + Duration::from_millis(jitter)).min(self.max)
    }

    pub(crate) fn reset(&mut self) {
        self.attempt = 0;
    }

    pub(crate) fn attempts(&self) -> u32 {
        self.attempt
    }
}

/// Retries `task` until it succeeds or `deadline` passes.
///
/// Every attempt is bounded by `policy.timeout_ms`; between attempts the task
/// backs off per `policy`. `policy.max_retries == 0` means unlimited attempts
/// within the deadline. Passing the deadline yields `Error::DeadlineExceeded`.
pub(crate) async fn retry_until_deadline<F, T, P>(
    name: &str,
    task: F,
    policy: &BackoffPolicy,
    deadline: Duration,
) -> Result<P>
where
    F: Fn() -> T,
    T: Future<Output = Result<P>>,
{
    let started = Instant::now();
    let expires_at = started + deadline;
    let mut backoff = Backoff::new(policy);
    let mut last_error: Option<Error> = None;

    loop {
        let remaining = expires_at.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }
        let attempt_timeout = policy.timeout().min(remaining);

        match timeout(attempt_timeout, task()).await {
            Ok(Ok(r)) => return Ok(r),
            Ok(Err(e)) => {
                warn!(task = name, attempt = backoff.attempts(), "failed with error: {:?}", e);
                last_error = Some(e);
            }
            Err(_) => {
                warn!(task = name, "attempt timed out after {:?}", attempt_timeout);
                last_error = Some(Error::DeadlineExceeded(attempt_timeout));
            }
        }

        if policy.max_retries != 0 && backoff.attempts() as usize + 1 >= policy.max_retries {
            warn!(task = name, "giving up after {} attempts", backoff.attempts() + 1);
            if let Some(e) = last_error.take() {
                return Err(e);
            }
            break;
        }

        let delay = backoff.next_delay();
        let remaining = expires_at.saturating_duration_since(Instant::now());
        if delay >= remaining {
            break;
        }
        sleep(delay).await;
    }

    warn!(
        task = name,
        "deadline of {:?} exceeded, last error: {:?}", deadline, last_error
    );
    Err(Error::DeadlineExceeded(deadline))
}

/// Sleeps for `delay`; `false` if cancelled first.
pub(crate) async fn pause(
    cancel: &CancellationToken,
    delay: Duration,
) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = sleep(delay) => true,
    }
}
