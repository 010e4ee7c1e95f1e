//! Listing page fetching with bounded retries and identity rotation.
//!
//! # Architecture
//!
//! - [`Transport`]: the raw `GET` capability, one identity per call
//! - [`ReqwestTransport`]: production transport built on `reqwest`
//! - [`RetryPolicy`]: attempt bound and exponential backoff with jitter
//! - [`PageFetcher`]: drives the bounded retry loop, rotating identities
//!
//! # Retry Strategy
//!
//! - At most 3 attempts per page
//! - A different identity for each attempt while untried ones remain
//! - Exponential backoff starting at 1 second, capped at 30 seconds
//! - Random jitter (0-250ms) added to each delay
//!
//! Exhausting the attempts is not fatal: the caller marks the page skipped.

use crate::error::{FetchError, FetchExhausted};
use crate::identity::IdentityPool;
use crate::models::{FetchAttempt, Identity};
use rand::{Rng, rng};
use std::time::{Duration as StdDuration, Instant};
use tokio::time::sleep;
use tracing::{debug, error, info, instrument, warn};

/// Raw HTTP `GET` through a given identity.
///
/// Returns the status code and body bytes; non-success statuses are *not*
/// errors at this level.
pub trait Transport {
    async fn get(&self, url: &str, identity: &Identity) -> Result<(u16, Vec<u8>), FetchError>;
}

/// `reqwest`-backed [`Transport`].
///
/// A client is built per attempt because the proxy is a client-level setting
/// and every attempt may use a different one.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    timeout: StdDuration,
    /// Accept invalid certificates, but only when routing through a proxy.
    insecure_proxies: bool,
}

impl ReqwestTransport {
    pub fn new(timeout: StdDuration, insecure_proxies: bool) -> Self {
        Self {
            timeout,
            insecure_proxies,
        }
    }

    fn client_for(&self, identity: &Identity) -> Result<reqwest::Client, FetchError> {
        let mut builder = reqwest::Client::builder()
            .timeout(self.timeout)
            .user_agent(identity.user_agent.as_str());

        if let Some(proxy) = identity.proxy.as_deref() {
            let proxy = reqwest::Proxy::all(proxy).map_err(|e| FetchError::Client(e.to_string()))?;
            builder = builder
                .proxy(proxy)
                .danger_accept_invalid_certs(self.insecure_proxies);
        }

        builder.build().map_err(|e| FetchError::Client(e.to_string()))
    }
}

impl Transport for ReqwestTransport {
    #[instrument(level = "debug", skip_all, fields(%url, via = %identity))]
    async fn get(&self, url: &str, identity: &Identity) -> Result<(u16, Vec<u8>), FetchError> {
        let client = self.client_for(identity)?;
        let response = client.get(url).send().await?;
        let status = response.status().as_u16();
        let body = response.bytes().await?;
        Ok((status, body.to_vec()))
    }
}

/// Attempt bound and backoff schedule.
///
/// The delay before retry `n` (1-based count of failures so far) is:
/// ```text
/// delay = min(base_delay * 2^(n-1), max_delay) + random_jitter(0..=max_jitter)
/// ```
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub base_delay: StdDuration,
    pub max_delay: StdDuration,
    pub max_jitter: StdDuration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: StdDuration::from_secs(1),
            max_delay: StdDuration::from_secs(30),
            max_jitter: StdDuration::from_millis(250),
        }
    }
}

impl RetryPolicy {
    /// Backoff before the next attempt, after `failures` failed attempts.
    pub fn delay_after(&self, failures: usize) -> StdDuration {
        let shift = failures.saturating_sub(1).min(31) as u32;
        let delay = self
            .base_delay
            .saturating_mul(1u32 << shift)
            .min(self.max_delay);

        let jitter_ms = self.max_jitter.as_millis() as u64;
        if jitter_ms == 0 {
            return delay;
        }
        delay + StdDuration::from_millis(rng().random_range(0..=jitter_ms))
    }
}

/// Fetches one listing page with bounded retries.
#[derive(Debug)]
pub struct PageFetcher<T> {
    transport: T,
    pool: IdentityPool,
    policy: RetryPolicy,
}

impl<T> PageFetcher<T>
where
    T: Transport,
{
    pub fn new(transport: T, pool: IdentityPool, policy: RetryPolicy) -> Self {
        Self {
            transport,
            pool,
            policy,
        }
    }

    /// Fetch `url`, returning the page markup.
    ///
    /// Each attempt uses an identity not yet tried for this URL (while any
    /// remain). Only `2xx` responses count as success.
    ///
    /// # Errors
    ///
    /// [`FetchExhausted`] with the full attempt log once `max_attempts` fail.
    #[instrument(level = "info", skip_all, fields(%url))]
    pub async fn fetch(&self, url: &str) -> Result<String, FetchExhausted> {
        let total_t0 = Instant::now();
        let mut attempts: Vec<FetchAttempt> = Vec::with_capacity(self.policy.max_attempts);
        let mut tried: Vec<Identity> = Vec::with_capacity(self.policy.max_attempts);

        // An explicit bounded loop; never recursion.
        while attempts.len() < self.policy.max_attempts {
            let ordinal = attempts.len() + 1;
            let identity = self.pool.select_excluding(&tried).clone();
            let attempt_t0 = Instant::now();

            let outcome = match self.transport.get(url, &identity).await {
                Ok((status, body)) if (200..300).contains(&status) => {
                    attempts.push(FetchAttempt {
                        url: url.to_string(),
                        identity,
                        ordinal,
                        outcome: Ok(status),
                    });
                    info!(
                        attempt = ordinal,
                        via = %attempts[ordinal - 1].identity,
                        status,
                        failed_before = ordinal - 1,
                        bytes = body.len(),
                        elapsed_ms = attempt_t0.elapsed().as_millis() as u64,
                        "Fetched listing page"
                    );
                    return Ok(String::from_utf8_lossy(&body).into_owned());
                }
                Ok((status, _)) => FetchError::Status(status).to_string(),
                Err(e) => e.to_string(),
            };

            warn!(
                attempt = ordinal,
                max = self.policy.max_attempts,
                via = %identity,
                elapsed_ms_attempt = attempt_t0.elapsed().as_millis() as u64,
                error = %outcome,
                "Fetch attempt failed"
            );

            attempts.push(FetchAttempt {
                url: url.to_string(),
                identity: identity.clone(),
                ordinal,
                outcome: Err(outcome),
            });
            tried.push(identity);

            if attempts.len() < self.policy.max_attempts {
                let delay = self.policy.delay_after(attempts.len());
                debug!(?delay, "Backing off before next attempt");
                sleep(delay).await;
            }
        }

        error!(
            attempts = attempts.len(),
            elapsed_ms_total = total_t0.elapsed().as_millis() as u64,
            "Fetch exhausted retries"
        );
        Err(FetchExhausted {
            url: url.to_string(),
            attempts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::HashSet;

    /// Replays a script of results and records the identities it was called with.
    struct ScriptedTransport {
        script: RefCell<Vec<Result<(u16, Vec<u8>), FetchError>>>,
        seen: RefCell<Vec<Identity>>,
    }

    impl ScriptedTransport {
        fn new(mut script: Vec<Result<(u16, Vec<u8>), FetchError>>) -> Self {
            script.reverse();
            Self {
                script: RefCell::new(script),
                seen: RefCell::new(Vec::new()),
            }
        }

        fn always_failing() -> Self {
            Self::new(Vec::new())
        }
    }

    impl Transport for ScriptedTransport {
        async fn get(&self, _url: &str, identity: &Identity) -> Result<(u16, Vec<u8>), FetchError> {
            self.seen.borrow_mut().push(identity.clone());
            self.script
                .borrow_mut()
                .pop()
                .unwrap_or(Err(FetchError::Client("connection refused".to_string())))
        }
    }

    fn pool(n: usize) -> IdentityPool {
        let proxies: Vec<String> = (0..n).map(|i| format!("http://u:p@10.0.0.{i}:8000")).collect();
        IdentityPool::from_parts(&proxies, &["UA".to_string()]).unwrap()
    }

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay: StdDuration::ZERO,
            max_delay: StdDuration::ZERO,
            max_jitter: StdDuration::ZERO,
        }
    }

    #[tokio::test]
    async fn test_always_failing_transport_makes_exactly_three_attempts() {
        let fetcher = PageFetcher::new(ScriptedTransport::always_failing(), pool(5), fast_policy());

        let err = fetcher.fetch("https://example.com/?pageNo=1").await.unwrap_err();
        assert_eq!(err.attempts.len(), 3);
        assert_eq!(
            err.attempts.iter().map(|a| a.ordinal).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );

        let seen = fetcher.transport.seen.borrow();
        assert_eq!(seen.len(), 3);
        let distinct: HashSet<_> = seen.iter().collect();
        assert_eq!(distinct.len(), 3, "each attempt must use a different identity");
    }

    #[tokio::test]
    async fn test_non_success_status_counts_as_failure() {
        let transport = ScriptedTransport::new(vec![
            Ok((503, b"busy".to_vec())),
            Ok((200, b"<table></table>".to_vec())),
        ]);
        let fetcher = PageFetcher::new(transport, pool(3), fast_policy());

        let body = fetcher.fetch("https://example.com/?pageNo=2").await.unwrap();
        assert_eq!(body, "<table></table>");
        assert_eq!(fetcher.transport.seen.borrow().len(), 2);
    }

    #[tokio::test]
    async fn test_first_success_stops_retrying() {
        let transport = ScriptedTransport::new(vec![Ok((200, b"ok".to_vec()))]);
        let fetcher = PageFetcher::new(transport, pool(2), fast_policy());

        assert_eq!(fetcher.fetch("https://example.com").await.unwrap(), "ok");
        assert_eq!(fetcher.transport.seen.borrow().len(), 1);
    }

    #[tokio::test]
    async fn test_exhausted_error_records_status_reason() {
        let transport = ScriptedTransport::new(vec![
            Ok((500, Vec::new())),
            Ok((502, Vec::new())),
            Ok((404, Vec::new())),
        ]);
        let fetcher = PageFetcher::new(transport, pool(3), fast_policy());

        let err = fetcher.fetch("https://example.com").await.unwrap_err();
        assert!(err.to_string().contains("unexpected HTTP status 404"));
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 10,
            base_delay: StdDuration::from_secs(1),
            max_delay: StdDuration::from_secs(30),
            max_jitter: StdDuration::ZERO,
        };
        assert_eq!(policy.delay_after(1), StdDuration::from_secs(1));
        assert_eq!(policy.delay_after(2), StdDuration::from_secs(2));
        assert_eq!(policy.delay_after(3), StdDuration::from_secs(4));
        assert_eq!(policy.delay_after(6), StdDuration::from_secs(30));
        assert_eq!(policy.delay_after(64), StdDuration::from_secs(30));
    }

    #[test]
    fn test_backoff_jitter_is_bounded() {
        let policy = RetryPolicy::default();
        for _ in 0..100 {
            let d = policy.delay_after(1);
            assert!(d >= StdDuration::from_secs(1));
            assert!(d <= StdDuration::from_millis(1250));
        }
    }
}
