//! Parvaz Host Gate
//! Copyright (c) 2026 Mamy Ratsimbazafy
//! Licensed and distributed under either of
//!   * MIT license (license terms at the root of the package or at http://opensource.org/licenses/MIT).
//!   * Apache v2 license (license terms at the root of the package or at http://www.apache.org/licenses/LICENSE-2.0).
//! at your option. This file may not be copied, modified, or distributed except according to those terms.

//! parvaz-internals/host-gate
//! Per-host coordination for crawl workers: a token-bucket rate limiter with
//! FIFO fairness, a circuit breaker with an exclusive half-open probe, and a
//! registry guaranteeing exactly one shared gate per host key.

mod breaker;
mod bucket;

pub use breaker::{Admission, BreakerSpec, CircuitBreaker};
pub use bucket::{RateSpec, TokenBucket};

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Latency samples kept per host for probes.
const LATENCY_SAMPLES: usize = 32;

/// Apply symmetric jitter to a backoff delay: uniform in
/// `[delay * (1 - factor), delay * (1 + factor)]`.
pub fn apply_jitter(delay: Duration, factor: f64) -> Duration {
    if factor <= 0.0 || delay.is_zero() {
        return delay;
    }
    use rand::Rng;
    let ms = delay.as_millis() as f64;
    let spread = ms * factor;
    let jittered = rand::thread_rng().gen_range((ms - spread).max(0.0)..=(ms + spread));
    Duration::from_millis(jittered as u64)
}

#[derive(Debug, Error)]
pub enum GateError {
    #[error("acquisition cancelled")]
    Cancelled,
    #[error("circuit breaker open, retry after {retry_after:?}")]
    BreakerOpen { retry_after: Duration },
}

#[derive(Debug, Default)]
struct HostStats {
    recent_latencies: VecDeque<Duration>,
    last_error_at: Option<Instant>,
    requests: u64,
    failures: u64,
}

/// Point-in-time view of one host's shared state.
#[derive(Clone, Debug)]
pub struct HostSnapshot {
    pub host: String,
    pub breaker_state: &'static str,
    pub current_rate: f64,
    pub requests: u64,
    pub failures: u64,
    pub mean_latency: Option<Duration>,
    pub seconds_since_last_error: Option<u64>,
}

/// All shared mutable state for one network host.
///
/// Adapters never touch this directly; the crawl runner acquires the serial
/// permit and a token, consults the breaker, and reports the outcome.
#[derive(Debug)]
pub struct HostGate {
    host: String,
    bucket: TokenBucket,
    breaker: CircuitBreaker,
    serial: Arc<Semaphore>,
    stats: StdMutex<HostStats>,
}

impl HostGate {
    pub fn new(host: impl Into<String>, rate: RateSpec, breaker: BreakerSpec) -> Self {
        Self {
            host: host.into(),
            bucket: TokenBucket::new(rate),
            breaker: CircuitBreaker::new(breaker),
            serial: Arc::new(Semaphore::new(1)),
            stats: StdMutex::new(HostStats::default()),
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// One request in flight per host. The permit is released on drop, on
    /// every exit path.
    pub async fn acquire_slot(&self, cancel: &CancellationToken) -> Result<OwnedSemaphorePermit, GateError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(GateError::Cancelled),
            permit = Arc::clone(&self.serial).acquire_owned() => {
                permit.map_err(|_| GateError::Cancelled)
            }
        }
    }

    /// Take a rate-limit token, waiting FIFO behind earlier callers.
    pub async fn acquire_token(&self, cancel: &CancellationToken) -> Result<(), GateError> {
        self.bucket.acquire(cancel).await
    }

    /// Ask the breaker whether a request may be issued.
    pub fn check_breaker(&self) -> Admission {
        self.breaker.check()
    }

    /// Non-consuming view of the breaker decision, for pre-flight checks
    /// that must not claim the probe slot.
    pub fn peek_breaker(&self) -> Admission {
        self.breaker.peek()
    }

    /// Report a request that reached the host and succeeded.
    pub fn record_success(&self, latency: Duration) {
        self.bucket.record_success();
        self.breaker.record_success();
        let mut stats = self.stats.lock().expect("host stats poisoned");
        stats.requests += 1;
        stats.recent_latencies.push_back(latency);
        while stats.recent_latencies.len() > LATENCY_SAMPLES {
            stats.recent_latencies.pop_front();
        }
    }

    /// Report a request that reached the host and failed. Opening the breaker
    /// also starts the host cooldown.
    pub fn record_failure(&self) {
        self.bucket.record_failure();
        let opened = self.breaker.record_failure();
        if opened {
            self.bucket.start_cooldown();
        }
        let mut stats = self.stats.lock().expect("host stats poisoned");
        stats.requests += 1;
        stats.failures += 1;
        stats.last_error_at = Some(Instant::now());
    }

    /// Report an explicit rate-limit response from the host (HTTP 429 or
    /// anti-bot wall): widen the cooldown without poisoning the breaker.
    pub fn record_rate_limited(&self, cooldown: Duration) {
        self.bucket.extend_cooldown(cooldown);
        let mut stats = self.stats.lock().expect("host stats poisoned");
        stats.last_error_at = Some(Instant::now());
    }

    /// Return an unused half-open probe slot; cancelled probes do not count.
    pub fn abandon_probe(&self) {
        self.breaker.abandon_probe();
    }

    pub fn breaker_state(&self) -> &'static str {
        self.breaker.state_name()
    }

    pub fn snapshot(&self) -> HostSnapshot {
        let stats = self.stats.lock().expect("host stats poisoned");
        let mean_latency = if stats.recent_latencies.is_empty() {
            None
        } else {
            let total: Duration = stats.recent_latencies.iter().sum();
            Some(total / stats.recent_latencies.len() as u32)
        };
        HostSnapshot {
            host: self.host.clone(),
            breaker_state: self.breaker.state_name(),
            current_rate: self.bucket.current_rate(),
            requests: stats.requests,
            failures: stats.failures,
            mean_latency,
            seconds_since_last_error: stats.last_error_at.map(|at| at.elapsed().as_secs()),
        }
    }
}

/// Process-wide registry: exactly one `HostGate` per host key.
#[derive(Debug, Default)]
pub struct HostRegistry {
    gates: StdMutex<HashMap<String, Arc<HostGate>>>,
}

impl HostRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the gate for `host`, creating it with the given specs on first
    /// sight. Later callers share the same gate regardless of their specs;
    /// the first-loaded site config for a host wins.
    pub fn gate(&self, host: &str, rate: RateSpec, breaker: BreakerSpec) -> Arc<HostGate> {
        let mut gates = self.gates.lock().expect("host registry poisoned");
        Arc::clone(
            gates
                .entry(host.to_string())
                .or_insert_with(|| Arc::new(HostGate::new(host, rate, breaker))),
        )
    }

    /// Gate lookup without creation.
    pub fn get(&self, host: &str) -> Option<Arc<HostGate>> {
        self.gates
            .lock()
            .expect("host registry poisoned")
            .get(host)
            .cloned()
    }

    pub fn snapshot(&self) -> Vec<HostSnapshot> {
        let gates = self.gates.lock().expect("host registry poisoned");
        let mut snapshots: Vec<_> = gates.values().map(|gate| gate.snapshot()).collect();
        snapshots.sort_by(|a, b| a.host.cmp(&b.host));
        snapshots
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn registry_returns_one_gate_per_host() {
        let registry = HostRegistry::new();
        let a = registry.gate("example.ir", RateSpec::default(), BreakerSpec::default());
        let b = registry.gate("example.ir", RateSpec::default(), BreakerSpec::default());
        assert!(Arc::ptr_eq(&a, &b));

        let c = registry.gate("other.ir", RateSpec::default(), BreakerSpec::default());
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(registry.snapshot().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn serial_slot_allows_one_request_at_a_time() {
        let gate = HostGate::new("example.ir", RateSpec::default(), BreakerSpec::default());
        let cancel = CancellationToken::new();

        let first = gate.acquire_slot(&cancel).await.unwrap();
        let second = gate.acquire_slot(&cancel);
        tokio::pin!(second);
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_millis(50)) => {}
            _ = &mut second => panic!("second slot acquired while first held"),
        }
        drop(first);
        second.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn breaker_open_starts_cooldown() {
        let gate = HostGate::new(
            "example.ir",
            RateSpec {
                requests_per_second: 100.0,
                burst: 10,
                cooldown: Duration::from_secs(4),
            },
            BreakerSpec {
                failure_threshold: 2,
                failure_window: Duration::from_secs(60),
                reset: Duration::from_secs(300),
            },
        );
        let cancel = CancellationToken::new();

        gate.record_failure();
        gate.record_failure();
        assert_eq!(gate.breaker_state(), "open");

        let start = Instant::now();
        gate.acquire_token(&cancel).await.unwrap();
        assert!(
            start.elapsed() >= Duration::from_secs(4),
            "cooldown from breaker open must gate tokens, waited {:?}",
            start.elapsed()
        );
    }

    #[tokio::test(start_paused = true)]
    async fn snapshot_reports_latency_and_counts() {
        let gate = HostGate::new("example.ir", RateSpec::default(), BreakerSpec::default());
        gate.record_success(Duration::from_millis(100));
        gate.record_success(Duration::from_millis(300));
        gate.record_failure();

        let snap = gate.snapshot();
        assert_eq!(snap.requests, 3);
        assert_eq!(snap.failures, 1);
        assert_eq!(snap.mean_latency, Some(Duration::from_millis(200)));
        assert_eq!(snap.seconds_since_last_error, Some(0));
    }
}
