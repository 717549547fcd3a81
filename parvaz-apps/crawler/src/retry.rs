//!  Parvaz Flight Crawler
//!
//!  Copyright (C) 2026  Mamy Ratsimbazafy
//!
//!  This program is free software: you can redistribute it and/or modify
//!  it under the terms of the GNU Affero General Public License as published by
//!  the Free Software Foundation, either version 3 of the License, or
//!  (at your option) any later version.
//!
//!  This program is distributed in the hope that it will be useful,
//!  but WITHOUT ANY WARRANTY; without even the implied warranty of
//!  MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
//!  GNU Affero General Public License for more details.
//!
//!  You should have received a copy of the GNU Affero General Public License
//!  along with this program.  If not, see <http://www.gnu.org/licenses/>.

//! # Retry Policy
//!
//! The one place outcomes are classified and retried. Policies are plain
//! values from the site config; the loop re-checks the breaker and rate
//! limiter before every attempt, reports each outcome to the host gate, and
//! surfaces a progress callback per recovery so nothing fails silently.

use std::future::Future;
use std::time::Duration;

use parvaz_host_gate::{Admission, HostGate, apply_jitter};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::errors::{CrawlError, ErrorClass, ErrorKind};
use crate::site_config::RetrySpec;

/// Jitter applied to every backoff sleep.
const BACKOFF_JITTER: f64 = 0.25;
/// Backoff never grows past this.
const MAX_BACKOFF: Duration = Duration::from_secs(30);

#[derive(Clone, Debug)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub cooldown: Duration,
}

impl RetryPolicy {
    pub fn from_spec(spec: &RetrySpec, cooldown: Duration) -> Self {
        Self {
            max_attempts: spec.max_attempts.max(1),
            base_delay: Duration::from_millis(spec.base_delay_ms),
            cooldown,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            cooldown: Duration::from_secs(30),
        }
    }
}

/// Run `op` under the policy against one host.
///
/// Per attempt: consult the breaker, run, report the outcome to the gate.
/// Transient errors back off exponentially with jitter; a rate-limit push
/// widens the host cooldown and earns exactly one extra try; permanent and
/// fatal errors surface immediately; cancellation never counts against the
/// host.
pub async fn run_with_policy<T, F, Fut>(
    policy: &RetryPolicy,
    gate: &HostGate,
    cancel: &CancellationToken,
    site_id: &str,
    mut on_retry: impl FnMut(u32, &CrawlError),
    mut op: F,
) -> Result<T, CrawlError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, CrawlError>>,
{
    let mut delay = policy.base_delay;
    let mut rate_limit_retry_spent = false;
    let mut attempt = 0u32;

    loop {
        attempt += 1;

        let admission = gate.check_breaker();
        if let Admission::Reject { retry_after } = admission {
            return Err(CrawlError::new(
                ErrorKind::BreakerOpen,
                site_id,
                format!("circuit breaker open, retry after {retry_after:?}"),
            )
            .with_host(gate.host().to_string())
            .with_attempt(attempt));
        }

        let started = Instant::now();
        match op(attempt).await {
            Ok(value) => {
                gate.record_success(started.elapsed());
                return Ok(value);
            }
            Err(error) => {
                let error = error.with_attempt(attempt);
                match error.class() {
                    ErrorClass::Cancelled => {
                        // Not a host failure; the probe slot (if we held one)
                        // is returned without counting.
                        if admission == Admission::Probe {
                            gate.abandon_probe();
                        }
                        return Err(error);
                    }
                    ErrorClass::Fatal | ErrorClass::PermanentClient => {
                        gate.record_failure();
                        return Err(error);
                    }
                    ErrorClass::RateLimited => {
                        gate.record_rate_limited(policy.cooldown);
                        if rate_limit_retry_spent {
                            return Err(error);
                        }
                        rate_limit_retry_spent = true;
                        tracing::warn!(
                            "[{site_id}] rate limited, retrying once after {:?} cooldown",
                            policy.cooldown
                        );
                        on_retry(attempt, &error);
                        // The widened cooldown itself gates the next attempt
                        // through token acquisition inside `op`.
                    }
                    ErrorClass::Transient => {
                        gate.record_failure();
                        if attempt >= policy.max_attempts {
                            return Err(error);
                        }
                        on_retry(attempt, &error);
                        let backoff = apply_jitter(delay, BACKOFF_JITTER);
                        tracing::debug!(
                            "[{site_id}] attempt {attempt} failed ({}), backing off {backoff:?}",
                            error.kind
                        );
                        tokio::select! {
                            _ = cancel.cancelled() => return Err(CrawlError::cancelled(site_id)),
                            _ = tokio::time::sleep(backoff) => {}
                        }
                        delay = (delay * 2).min(MAX_BACKOFF);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parvaz_host_gate::{BreakerSpec, RateSpec};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn gate() -> HostGate {
        HostGate::new(
            "retry.example.ir",
            RateSpec {
                requests_per_second: 1000.0,
                burst: 1000,
                cooldown: Duration::from_secs(1),
            },
            BreakerSpec {
                failure_threshold: 10,
                failure_window: Duration::from_secs(60),
                reset: Duration::from_secs(60),
            },
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_errors_retry_then_succeed() {
        let gate = gate();
        let cancel = CancellationToken::new();
        let calls = Arc::new(AtomicU32::new(0));
        let retries = Arc::new(AtomicU32::new(0));

        let calls_inner = Arc::clone(&calls);
        let retries_inner = Arc::clone(&retries);
        let result = run_with_policy(
            &RetryPolicy::default(),
            &gate,
            &cancel,
            "test_site",
            move |_, _| {
                retries_inner.fetch_add(1, Ordering::SeqCst);
            },
            move |_attempt| {
                let calls = Arc::clone(&calls_inner);
                async move {
                    if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(CrawlError::new(ErrorKind::Network, "test_site", "reset"))
                    } else {
                        Ok(42)
                    }
                }
            },
        )
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(retries.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_errors_do_not_retry() {
        let gate = gate();
        let cancel = CancellationToken::new();
        let calls = Arc::new(AtomicU32::new(0));

        let calls_inner = Arc::clone(&calls);
        let result: Result<u32, _> = run_with_policy(
            &RetryPolicy::default(),
            &gate,
            &cancel,
            "test_site",
            |_, _| {},
            move |_attempt| {
                let calls = Arc::clone(&calls_inner);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(CrawlError::new(ErrorKind::Protocol, "test_site", "404"))
                }
            },
        )
        .await;

        assert_eq!(result.unwrap_err().kind, ErrorKind::Protocol);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_retries_surface_last_error() {
        let gate = gate();
        let cancel = CancellationToken::new();
        let calls = Arc::new(AtomicU32::new(0));

        let calls_inner = Arc::clone(&calls);
        let result: Result<u32, _> = run_with_policy(
            &RetryPolicy::default(),
            &gate,
            &cancel,
            "test_site",
            |_, _| {},
            move |_attempt| {
                let calls = Arc::clone(&calls_inner);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(CrawlError::new(ErrorKind::Timeout, "test_site", "slow"))
                }
            },
        )
        .await;

        let error = result.unwrap_err();
        assert_eq!(error.kind, ErrorKind::Timeout);
        assert_eq!(error.attempt, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limited_gets_exactly_one_extra_try() {
        let gate = gate();
        let cancel = CancellationToken::new();
        let calls = Arc::new(AtomicU32::new(0));

        let calls_inner = Arc::clone(&calls);
        let result: Result<u32, _> = run_with_policy(
            &RetryPolicy::default(),
            &gate,
            &cancel,
            "test_site",
            |_, _| {},
            move |_attempt| {
                let calls = Arc::clone(&calls_inner);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(CrawlError::new(ErrorKind::RateLimit, "test_site", "429"))
                }
            },
        )
        .await;

        assert_eq!(result.unwrap_err().kind, ErrorKind::RateLimit);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_breaker_open_surfaces_without_calling_op() {
        let gate = HostGate::new(
            "retry.example.ir",
            RateSpec::default(),
            BreakerSpec {
                failure_threshold: 1,
                failure_window: Duration::from_secs(60),
                reset: Duration::from_secs(300),
            },
        );
        gate.record_failure();
        let cancel = CancellationToken::new();
        let calls = Arc::new(AtomicU32::new(0));

        let calls_inner = Arc::clone(&calls);
        let result: Result<u32, _> = run_with_policy(
            &RetryPolicy::default(),
            &gate,
            &cancel,
            "test_site",
            |_, _| {},
            move |_attempt| {
                let calls = Arc::clone(&calls_inner);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(1)
                }
            },
        )
        .await;

        assert_eq!(result.unwrap_err().kind, ErrorKind::BreakerOpen);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
