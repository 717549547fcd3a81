//! Parvaz Host Gate
//! Copyright (c) 2026 Mamy Ratsimbazafy
//! Licensed and distributed under either of
//!   * MIT license (license terms at the root of the package or at http://opensource.org/licenses/MIT).
//!   * Apache v2 license (license terms at the root of the package or at http://www.apache.org/licenses/LICENSE-2.0).
//! at your option. This file may not be copied, modified, or distributed except according to those terms.

//! Per-host token bucket with burst, cooldown, and adaptive slowdown.

use std::sync::Mutex as StdMutex;
use std::time::Duration;

use tokio::sync::Mutex as FairMutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::GateError;

/// Slowdown applied after repeated failures lasts this long.
const SLOWDOWN_WINDOW: Duration = Duration::from_secs(60);
/// Refill rate never drops below this, no matter how many failures pile up.
const MIN_REFILL_RPS: f64 = 0.1;
/// Consecutive failures before the refill rate is halved.
const SLOWDOWN_AFTER_FAILURES: u32 = 3;
/// Consecutive successes before the original refill rate is restored.
const RESTORE_AFTER_SUCCESSES: u32 = 10;

/// Requests-per-second budget for one host.
#[derive(Clone, Debug, PartialEq)]
pub struct RateSpec {
    pub requests_per_second: f64,
    pub burst: u32,
    pub cooldown: Duration,
}

impl Default for RateSpec {
    fn default() -> Self {
        Self {
            requests_per_second: 1.0,
            burst: 3,
            cooldown: Duration::from_secs(30),
        }
    }
}

/// Token state advanced on every acquisition. Guarded by the fair queue mutex.
#[derive(Debug)]
struct BucketCore {
    tokens: f64,
    last_refill: Instant,
}

/// Adaptive state mutated by outcome reports. Held only for brief
/// decision/update windows, never across an await.
#[derive(Debug)]
struct ControlState {
    refill_rate: f64,
    cooldown_until: Option<Instant>,
    slowdown_until: Option<Instant>,
    consecutive_failures: u32,
    consecutive_successes: u32,
}

/// Token bucket for one host.
///
/// Waiters queue on a fair async mutex that is deliberately held across the
/// wait: tokio's `Mutex` releases in arrival order, which is what gives the
/// per-host FIFO guarantee without a hand-rolled waiter list.
#[derive(Debug)]
pub struct TokenBucket {
    spec: RateSpec,
    queue: FairMutex<BucketCore>,
    control: StdMutex<ControlState>,
}

impl TokenBucket {
    pub fn new(spec: RateSpec) -> Self {
        let now = Instant::now();
        Self {
            queue: FairMutex::new(BucketCore {
                tokens: spec.burst as f64,
                last_refill: now,
            }),
            control: StdMutex::new(ControlState {
                refill_rate: spec.requests_per_second,
                cooldown_until: None,
                slowdown_until: None,
                consecutive_failures: 0,
                consecutive_successes: 0,
            }),
            spec,
        }
    }

    /// Take one token, suspending until one is available, the configured
    /// cooldown has elapsed, or `cancel` fires.
    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<(), GateError> {
        let mut core = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(GateError::Cancelled),
            guard = self.queue.lock() => guard,
        };

        loop {
            let now = Instant::now();
            let (refill_rate, cooldown_until) = {
                let mut control = self.control.lock().expect("bucket control poisoned");
                if control
                    .slowdown_until
                    .is_some_and(|until| now >= until)
                {
                    control.slowdown_until = None;
                    control.refill_rate = self.spec.requests_per_second;
                }
                (control.refill_rate, control.cooldown_until)
            };

            if let Some(until) = cooldown_until {
                if now < until {
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(GateError::Cancelled),
                        _ = tokio::time::sleep_until(until) => {}
                    }
                    continue;
                }
            }

            let elapsed = now.duration_since(core.last_refill).as_secs_f64();
            core.tokens = (core.tokens + elapsed * refill_rate).min(self.spec.burst as f64);
            core.last_refill = now;

            if core.tokens >= 1.0 {
                core.tokens -= 1.0;
                return Ok(());
            }

            let wait = Duration::from_secs_f64((1.0 - core.tokens) / refill_rate);
            tokio::select! {
                _ = cancel.cancelled() => return Err(GateError::Cancelled),
                _ = tokio::time::sleep(wait) => {}
            }
        }
    }

    /// Record a successful request. Ten in a row restore the configured
    /// refill rate after an adaptive slowdown.
    pub fn record_success(&self) {
        let mut control = self.control.lock().expect("bucket control poisoned");
        control.consecutive_failures = 0;
        control.consecutive_successes += 1;
        if control.consecutive_successes >= RESTORE_AFTER_SUCCESSES {
            control.refill_rate = self.spec.requests_per_second;
            control.slowdown_until = None;
        }
    }

    /// Record a failed request. Every third consecutive failure halves the
    /// refill rate (floored) for the slowdown window.
    pub fn record_failure(&self) {
        let mut control = self.control.lock().expect("bucket control poisoned");
        control.consecutive_successes = 0;
        control.consecutive_failures += 1;
        if control.consecutive_failures % SLOWDOWN_AFTER_FAILURES == 0 {
            control.refill_rate = (control.refill_rate * 0.5).max(MIN_REFILL_RPS);
            control.slowdown_until = Some(Instant::now() + SLOWDOWN_WINDOW);
        }
    }

    /// Push the cooldown horizon out by `extra`, keeping the later deadline
    /// if one is already pending.
    pub fn extend_cooldown(&self, extra: Duration) {
        let deadline = Instant::now() + extra;
        let mut control = self.control.lock().expect("bucket control poisoned");
        control.cooldown_until = Some(match control.cooldown_until {
            Some(existing) if existing > deadline => existing,
            _ => deadline,
        });
    }

    /// Trigger the configured per-host cooldown.
    pub fn start_cooldown(&self) {
        self.extend_cooldown(self.spec.cooldown);
    }

    /// Current refill rate, after any adaptive slowdown.
    pub fn current_rate(&self) -> f64 {
        self.control
            .lock()
            .expect("bucket control poisoned")
            .refill_rate
    }

    pub fn spec(&self) -> &RateSpec {
        &self.spec
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(rps: f64, burst: u32) -> RateSpec {
        RateSpec {
            requests_per_second: rps,
            burst,
            cooldown: Duration::from_secs(5),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn burst_then_throttle() {
        let bucket = TokenBucket::new(spec(1.0, 3));
        let cancel = CancellationToken::new();

        let start = Instant::now();
        for _ in 0..3 {
            bucket.acquire(&cancel).await.unwrap();
        }
        assert_eq!(start.elapsed(), Duration::ZERO, "burst should not wait");

        bucket.acquire(&cancel).await.unwrap();
        assert!(
            start.elapsed() >= Duration::from_millis(900),
            "fourth token must wait for refill, waited {:?}",
            start.elapsed()
        );
    }

    #[tokio::test(start_paused = true)]
    async fn ten_acquisitions_at_one_rps_take_nine_seconds() {
        let bucket = TokenBucket::new(spec(1.0, 1));
        let cancel = CancellationToken::new();

        let start = Instant::now();
        for _ in 0..10 {
            bucket.acquire(&cancel).await.unwrap();
        }
        let elapsed = start.elapsed();
        assert!(
            elapsed >= Duration::from_secs(9),
            "expected >= 9s for 10 tokens at 1 rps, got {:?}",
            elapsed
        );
    }

    #[tokio::test(start_paused = true)]
    async fn fifo_order_across_contending_waiters() {
        use std::sync::Arc;

        let bucket = Arc::new(TokenBucket::new(spec(1.0, 1)));
        let cancel = CancellationToken::new();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

        // Drain the burst so every spawned waiter has to queue.
        bucket.acquire(&cancel).await.unwrap();

        let mut handles = Vec::new();
        for id in 0..5u32 {
            let bucket = Arc::clone(&bucket);
            let cancel = cancel.clone();
            let tx = tx.clone();
            handles.push(tokio::spawn(async move {
                bucket.acquire(&cancel).await.unwrap();
                tx.send(id).unwrap();
            }));
            // Let the spawned task reach the queue before the next one starts.
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        drop(tx);

        for handle in handles {
            handle.await.unwrap();
        }
        let mut order = Vec::new();
        while let Some(id) = rx.recv().await {
            order.push(id);
        }
        assert_eq!(order, vec![0, 1, 2, 3, 4], "waiters must release in FIFO order");
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts_wait() {
        let bucket = TokenBucket::new(spec(0.2, 1));
        let cancel = CancellationToken::new();
        bucket.acquire(&cancel).await.unwrap();

        let waiter = {
            let cancel = cancel.clone();
            async move { bucket.acquire(&cancel).await }
        };
        tokio::pin!(waiter);

        tokio::select! {
            _ = tokio::time::sleep(Duration::from_millis(100)) => {}
            _ = &mut waiter => panic!("no token should be available yet"),
        }
        cancel.cancel();
        assert!(matches!(waiter.await, Err(GateError::Cancelled)));
    }

    #[tokio::test(start_paused = true)]
    async fn three_failures_halve_refill_and_successes_restore() {
        let bucket = TokenBucket::new(spec(2.0, 1));
        assert_eq!(bucket.current_rate(), 2.0);

        bucket.record_failure();
        bucket.record_failure();
        assert_eq!(bucket.current_rate(), 2.0);
        bucket.record_failure();
        assert_eq!(bucket.current_rate(), 1.0);

        for _ in 0..10 {
            bucket.record_success();
        }
        assert_eq!(bucket.current_rate(), 2.0);
    }

    #[tokio::test(start_paused = true)]
    async fn refill_floor_holds() {
        let bucket = TokenBucket::new(spec(0.3, 1));
        for _ in 0..12 {
            bucket.record_failure();
        }
        assert!(bucket.current_rate() >= MIN_REFILL_RPS);
    }

    #[tokio::test(start_paused = true)]
    async fn cooldown_blocks_until_deadline() {
        let bucket = TokenBucket::new(spec(10.0, 5));
        let cancel = CancellationToken::new();

        bucket.extend_cooldown(Duration::from_secs(3));
        let start = Instant::now();
        bucket.acquire(&cancel).await.unwrap();
        assert!(
            start.elapsed() >= Duration::from_secs(3),
            "cooldown must be honoured, waited {:?}",
            start.elapsed()
        );
    }
}
