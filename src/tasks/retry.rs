use std::{future::Future, time::Duration};

use tokio_retry::{
    strategy::{jitter, ExponentialBackoff},
    RetryIf,
};

use crate::domain::RelayError;

const MAX_BACKOFF: Duration = Duration::from_secs(8);

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub retries: usize,
    pub base_delay: Duration,
}

pub async fn retry_transient<F, Fut, T>(policy: RetryPolicy, operation: F) -> Result<T, RelayError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, RelayError>>,
{
    // Delays run base, 2*base, 4*base, ... before jitter.
    let factor = (policy.base_delay.as_millis() as u64 / 2).max(1);
    let strategy = ExponentialBackoff::from_millis(2)
        .factor(factor)
        .max_delay(MAX_BACKOFF)
        .map(jitter)
        .take(policy.retries);

    RetryIf::spawn(strategy, operation, |err: &RelayError| {
        let retry = err.is_transient();
        if retry {
            tracing::warn!(target: "pixiv", error = %err, "transient failure; retrying");
        }
        retry
    })
    .await
}
