//! # Request Retries
//!
//! Every remote store request is idempotent: a GET, a PUT of the whole
//! value, or a DELETE. Transport failures and 5xx answers are therefore
//! retried with exponential backoff. Other status codes go straight back
//! to the caller.

use std::future::Future;
use std::time::Duration;

/// How many times a request is repeated and how long to wait in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RetryPolicy {
    /// Attempts after the first one.
    pub(crate) retries: u32,
    /// Delay before the first retry; doubled for each later one.
    pub(crate) backoff: Duration,
}

impl RetryPolicy {
    pub(crate) fn delay(&self, attempt: u32) -> Duration {
        self.backoff.saturating_mul(2u32.saturating_pow(attempt))
    }

    /// Run `f` until it yields something other than a transport error or a
    /// 5xx answer, or the retries are used up. The last outcome is returned
    /// either way.
    pub(crate) async fn send<F, Fut>(&self, endpoint: &str, f: F) -> Result<reqwest::Response, reqwest::Error>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<reqwest::Response, reqwest::Error>>,
    {
        let mut attempt = 0;
        loop {
            let outcome = f().await;
            let retryable = match &outcome {
                Ok(resp) => resp.status().is_server_error(),
                Err(_) => true,
            };
            if !retryable || attempt >= self.retries {
                return outcome;
            }
            let delay = self.delay(attempt);
            attempt += 1;
            match &outcome {
                Ok(resp) => tracing::warn!(
                    endpoint,
                    attempt,
                    retries = self.retries,
                    status = resp.status().as_u16(),
                    ?delay,
                    "remote store answered with a server error, retrying"
                ),
                Err(e) => tracing::warn!(
                    endpoint,
                    attempt,
                    retries = self.retries,
                    error = %e,
                    ?delay,
                    "remote store request failed, retrying"
                ),
            }
            metrics::counter!("depot_remote_retries_total").increment(1);
            tokio::time::sleep(delay).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn delay_doubles() {
        let policy = RetryPolicy {
            retries: 3,
            backoff: Duration::from_millis(200),
        };
        assert_eq!(policy.delay(0), Duration::from_millis(200));
        assert_eq!(policy.delay(2), Duration::from_millis(800));
        assert_eq!(policy.delay(40), Duration::MAX);
    }

    #[tokio::test]
    async fn transport_failures_use_every_attempt() {
        let calls = Arc::new(AtomicU32::new(0));
        let policy = RetryPolicy {
            retries: 2,
            backoff: Duration::from_millis(1),
        };
        let cc = calls.clone();
        let result = policy
            .send("GET http://127.0.0.1:1/", || {
                let cc = cc.clone();
                async move {
                    cc.fetch_add(1, Ordering::SeqCst);
                    // Nothing listens on port 1.
                    reqwest::Client::builder()
                        .timeout(Duration::from_millis(50))
                        .build()
                        .unwrap()
                        .get("http://127.0.0.1:1/")
                        .send()
                        .await
                }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn zero_retries_means_one_attempt() {
        let calls = Arc::new(AtomicU32::new(0));
        let policy = RetryPolicy {
            retries: 0,
            backoff: Duration::from_millis(1),
        };
        let cc = calls.clone();
        let _ = policy
            .send("GET http://127.0.0.1:1/", || {
                let cc = cc.clone();
                async move {
                    cc.fetch_add(1, Ordering::SeqCst);
                    reqwest::Client::new().get("http://127.0.0.1:1/").send().await
                }
            })
            .await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
