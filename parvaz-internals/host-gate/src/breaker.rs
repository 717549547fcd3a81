//! Parvaz Host Gate
//! Copyright (c) 2026 Mamy Ratsimbazafy
//! Licensed and distributed under either of
//!   * MIT license (license terms at the root of the package or at http://opensource.org/licenses/MIT).
//!   * Apache v2 license (license terms at the root of the package or at http://www.apache.org/licenses/LICENSE-2.0).
//! at your option. This file may not be copied, modified, or distributed except according to those terms.

//! Per-host circuit breaker: closed/open/half-open with an exclusive probe.

use std::sync::Mutex as StdMutex;
use std::time::Duration;

use tokio::time::Instant;

/// Reset interval doubling is capped here.
const MAX_RESET: Duration = Duration::from_secs(3600);

#[derive(Clone, Debug, PartialEq)]
pub struct BreakerSpec {
    /// Consecutive failures within the window that open the breaker.
    pub failure_threshold: u32,
    /// Failures older than this no longer count as consecutive.
    pub failure_window: Duration,
    /// Open duration before a half-open probe is admitted.
    pub reset: Duration,
}

impl Default for BreakerSpec {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            failure_window: Duration::from_secs(60),
            reset: Duration::from_secs(300),
        }
    }
}

/// Outcome of asking the breaker whether a request may go out.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Admission {
    /// Breaker closed, pass through.
    Proceed,
    /// Breaker half-open and this caller holds the single probe slot.
    Probe,
    /// Breaker open (or a probe is already in flight); do not call the host.
    Reject { retry_after: Duration },
}

#[derive(Clone, Copy, Debug, PartialEq)]
enum State {
    Closed,
    Open { until: Instant },
    HalfOpen { probe_in_flight: bool },
}

#[derive(Debug)]
struct BreakerState {
    state: State,
    failures: u32,
    last_failure_at: Option<Instant>,
    current_reset: Duration,
}

/// Circuit breaker for one host. All transitions happen under a brief lock;
/// no await points.
#[derive(Debug)]
pub struct CircuitBreaker {
    spec: BreakerSpec,
    inner: StdMutex<BreakerState>,
}

impl CircuitBreaker {
    pub fn new(spec: BreakerSpec) -> Self {
        Self {
            inner: StdMutex::new(BreakerState {
                state: State::Closed,
                failures: 0,
                last_failure_at: None,
                current_reset: spec.reset,
            }),
            spec,
        }
    }

    /// Decide whether a request may be issued right now. A `Probe` admission
    /// is exclusive until the holder reports its outcome.
    pub fn check(&self) -> Admission {
        let mut inner = self.inner.lock().expect("breaker poisoned");
        let now = Instant::now();
        match inner.state {
            State::Closed => Admission::Proceed,
            State::Open { until } => {
                if now >= until {
                    inner.state = State::HalfOpen {
                        probe_in_flight: true,
                    };
                    Admission::Probe
                } else {
                    Admission::Reject {
                        retry_after: until.duration_since(now),
                    }
                }
            }
            State::HalfOpen { probe_in_flight } => {
                if probe_in_flight {
                    // Another worker owns the probe; come back once it reports.
                    Admission::Reject {
                        retry_after: Duration::ZERO,
                    }
                } else {
                    inner.state = State::HalfOpen {
                        probe_in_flight: true,
                    };
                    Admission::Probe
                }
            }
        }
    }

    /// What `check()` would answer right now, with no state transition and
    /// no probe claim. Used for cheap pre-flight checks.
    pub fn peek(&self) -> Admission {
        let inner = self.inner.lock().expect("breaker poisoned");
        let now = Instant::now();
        match inner.state {
            State::Closed => Admission::Proceed,
            State::Open { until } => {
                if now >= until {
                    Admission::Probe
                } else {
                    Admission::Reject {
                        retry_after: until.duration_since(now),
                    }
                }
            }
            State::HalfOpen { probe_in_flight } => {
                if probe_in_flight {
                    Admission::Reject {
                        retry_after: Duration::ZERO,
                    }
                } else {
                    Admission::Probe
                }
            }
        }
    }

    /// Report a request that reached the host and succeeded.
    pub fn record_success(&self) {
        let mut inner = self.inner.lock().expect("breaker poisoned");
        match inner.state {
            State::HalfOpen { .. } => {
                inner.state = State::Closed;
                inner.failures = 0;
                inner.last_failure_at = None;
                inner.current_reset = self.spec.reset;
            }
            State::Closed => {
                inner.failures = inner.failures.saturating_sub(1);
            }
            State::Open { .. } => {}
        }
    }

    /// Report a request that reached the host and failed. Returns `true` when
    /// this report opened the breaker, so the caller can start a host
    /// cooldown in the same breath.
    pub fn record_failure(&self) -> bool {
        let mut inner = self.inner.lock().expect("breaker poisoned");
        let now = Instant::now();
        match inner.state {
            State::Closed => {
                let stale = inner
                    .last_failure_at
                    .is_some_and(|at| now.duration_since(at) > self.spec.failure_window);
                if stale {
                    inner.failures = 0;
                }
                inner.failures += 1;
                inner.last_failure_at = Some(now);
                if inner.failures >= self.spec.failure_threshold {
                    inner.state = State::Open {
                        until: now + inner.current_reset,
                    };
                    true
                } else {
                    false
                }
            }
            State::HalfOpen { .. } => {
                // Failed probe: reopen and double the reset interval.
                inner.current_reset = (inner.current_reset * 2).min(MAX_RESET);
                inner.state = State::Open {
                    until: now + inner.current_reset,
                };
                true
            }
            State::Open { .. } => false,
        }
    }

    /// Return an unused probe slot without counting an outcome, e.g. when
    /// the probing request was cancelled before it reached the host.
    pub fn abandon_probe(&self) {
        let mut inner = self.inner.lock().expect("breaker poisoned");
        if let State::HalfOpen { probe_in_flight: true } = inner.state {
            inner.state = State::HalfOpen {
                probe_in_flight: false,
            };
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(
            self.inner.lock().expect("breaker poisoned").state,
            State::Open { .. }
        )
    }

    /// Human-readable state, for probes and logs.
    pub fn state_name(&self) -> &'static str {
        match self.inner.lock().expect("breaker poisoned").state {
            State::Closed => "closed",
            State::Open { .. } => "open",
            State::HalfOpen { .. } => "half-open",
        }
    }

    pub fn spec(&self) -> &BreakerSpec {
        &self.spec
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(threshold: u32, reset_secs: u64) -> BreakerSpec {
        BreakerSpec {
            failure_threshold: threshold,
            failure_window: Duration::from_secs(60),
            reset: Duration::from_secs(reset_secs),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn opens_after_threshold_and_rejects() {
        let breaker = CircuitBreaker::new(spec(3, 2));

        for _ in 0..2 {
            assert_eq!(breaker.check(), Admission::Proceed);
            assert!(!breaker.record_failure());
        }
        assert_eq!(breaker.check(), Admission::Proceed);
        assert!(breaker.record_failure(), "third failure opens");

        match breaker.check() {
            Admission::Reject { retry_after } => {
                assert!(retry_after <= Duration::from_secs(2));
            }
            other => panic!("expected reject, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn probe_is_exclusive_and_success_closes() {
        let breaker = CircuitBreaker::new(spec(1, 2));
        assert!(breaker.record_failure());

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(breaker.check(), Admission::Probe);
        // Second caller must not get a concurrent probe.
        assert!(matches!(breaker.check(), Admission::Reject { .. }));

        breaker.record_success();
        assert_eq!(breaker.check(), Admission::Proceed);
        assert_eq!(breaker.state_name(), "closed");
    }

    #[tokio::test(start_paused = true)]
    async fn failed_probe_doubles_reset() {
        let breaker = CircuitBreaker::new(spec(1, 2));
        assert!(breaker.record_failure());

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(breaker.check(), Admission::Probe);
        assert!(breaker.record_failure());

        // Old reset (2s) is not enough any more.
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(matches!(breaker.check(), Admission::Reject { .. }));
        // Doubled reset (4s total) admits the next probe.
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(breaker.check(), Admission::Probe);
    }

    #[tokio::test(start_paused = true)]
    async fn success_decrements_failure_count_in_closed() {
        let breaker = CircuitBreaker::new(spec(2, 60));
        assert!(!breaker.record_failure());
        breaker.record_success();
        // The earlier failure was cancelled out, so one more does not open.
        assert!(!breaker.record_failure());
        assert!(breaker.record_failure());
    }

    #[tokio::test(start_paused = true)]
    async fn failures_outside_window_are_not_consecutive() {
        let breaker = CircuitBreaker::new(BreakerSpec {
            failure_threshold: 2,
            failure_window: Duration::from_secs(10),
            reset: Duration::from_secs(5),
        });
        assert!(!breaker.record_failure());
        tokio::time::sleep(Duration::from_secs(11)).await;
        assert!(!breaker.record_failure(), "stale failure must not count");
    }

    #[tokio::test(start_paused = true)]
    async fn reset_doubling_caps_at_one_hour() {
        let breaker = CircuitBreaker::new(spec(1, 3000));
        assert!(breaker.record_failure());
        for _ in 0..4 {
            tokio::time::sleep(Duration::from_secs(3700)).await;
            match breaker.check() {
                Admission::Probe => {
                    assert!(breaker.record_failure());
                }
                other => panic!("expected probe after cap-length wait, got {:?}", other),
            }
        }
    }
}
