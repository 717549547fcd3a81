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

//! # Session Manager
//!
//! Scoped acquisition of the network resources adapters fetch with: one
//! pooled HTTP client per host with browser emulation, and (behind the
//! `browser` feature) a bounded pool of headless-browser contexts. Every
//! lease releases on drop, whatever the exit path.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use wreq::redirect::Policy;
use wreq_util::Emulation;

use crate::errors::{CrawlError, ErrorKind};
use crate::site_config::SiteConfig;

/// Idle keep-alive on pooled connections.
const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(60);
/// Idle connections kept per host.
const POOL_MAX_IDLE_PER_HOST: usize = 20;
/// Concurrent HTTP leases across the whole process.
const MAX_TOTAL_SESSIONS: usize = 50;

#[derive(Clone, Debug)]
pub struct SessionLimits {
    pub max_total_sessions: usize,
    /// Headless browser contexts kept alive at once.
    pub max_browser_contexts: usize,
    /// Above this, new browser acquisitions are refused until leases drop.
    pub memory_watermark_bytes: u64,
}

impl Default for SessionLimits {
    fn default() -> Self {
        Self {
            max_total_sessions: MAX_TOTAL_SESSIONS,
            max_browser_contexts: 4,
            memory_watermark_bytes: 2 * 1024 * 1024 * 1024,
        }
    }
}

/// Exclusive use of a pooled per-host HTTP client. Connection reuse lives in
/// the client; the lease only bounds process-wide concurrency.
pub struct HttpLease {
    client: Arc<wreq::Client>,
    host: String,
    _permit: OwnedSemaphorePermit,
}

impl HttpLease {
    pub fn client(&self) -> &wreq::Client {
        &self.client
    }

    pub fn host(&self) -> &str {
        &self.host
    }
}

/// RAII reservation against the process-wide memory watermark. Created when
/// a browser page is leased, released on drop, on every exit path.
#[cfg(feature = "browser")]
pub(crate) struct MemoryCharge {
    counter: Arc<AtomicU64>,
    bytes: u64,
}

#[cfg(feature = "browser")]
impl MemoryCharge {
    pub(crate) fn new(counter: Arc<AtomicU64>, bytes: u64) -> Self {
        counter.fetch_add(bytes, Ordering::Relaxed);
        Self { counter, bytes }
    }
}

#[cfg(feature = "browser")]
impl Drop for MemoryCharge {
    fn drop(&mut self) {
        let mut current = self.counter.load(Ordering::Relaxed);
        loop {
            let next = current.saturating_sub(self.bytes);
            match self.counter.compare_exchange_weak(
                current,
                next,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return,
                Err(actual) => current = actual,
            }
        }
    }
}

pub struct SessionManager {
    limits: SessionLimits,
    clients: StdMutex<HashMap<String, Arc<wreq::Client>>>,
    session_permits: Arc<Semaphore>,
    memory_in_use: Arc<AtomicU64>,
    #[cfg(feature = "browser")]
    browser: browser_pool::BrowserPool,
}

impl SessionManager {
    pub fn new(limits: SessionLimits) -> Self {
        Self {
            session_permits: Arc::new(Semaphore::new(limits.max_total_sessions)),
            clients: StdMutex::new(HashMap::new()),
            memory_in_use: Arc::new(AtomicU64::new(0)),
            #[cfg(feature = "browser")]
            browser: browser_pool::BrowserPool::new(limits.max_browser_contexts),
            limits,
        }
    }

    /// Acquire the pooled client for this site's host. Blocks when all
    /// process-wide session slots are leased out.
    pub async fn http_lease(
        &self,
        config: &SiteConfig,
        cancel: &CancellationToken,
    ) -> Result<HttpLease, CrawlError> {
        let permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(CrawlError::cancelled(&config.site_id)),
            permit = Arc::clone(&self.session_permits).acquire_owned() => permit
                .map_err(|_| CrawlError::new(ErrorKind::Internal, &config.site_id, "session pool closed"))?,
        };

        let host = config.host();
        let client = {
            let clients = self.clients.lock().expect("session clients poisoned");
            clients.get(&host).cloned()
        };
        let client = match client {
            Some(client) => client,
            None => {
                let built = Arc::new(build_client(config)?);
                let mut clients = self.clients.lock().expect("session clients poisoned");
                // Another worker may have built one while we did; first in wins.
                Arc::clone(clients.entry(host.clone()).or_insert(built))
            }
        };

        Ok(HttpLease {
            client,
            host,
            _permit: permit,
        })
    }

    pub fn limits(&self) -> &SessionLimits {
        &self.limits
    }

    /// Reserved memory across all live browser leases. Each lease charges
    /// its page budget at acquisition and releases it on drop.
    pub fn memory_in_use(&self) -> u64 {
        self.memory_in_use.load(Ordering::Relaxed)
    }

    #[cfg(feature = "browser")]
    fn above_watermark(&self) -> bool {
        self.memory_in_use() > self.limits.memory_watermark_bytes
    }

    /// Acquire a headless browser page for a `javascript-heavy` site.
    /// Refused outright while the process is above the memory watermark;
    /// the watermark falls again as outstanding leases drop.
    #[cfg(feature = "browser")]
    pub async fn browser_lease(
        &self,
        config: &SiteConfig,
        cancel: &CancellationToken,
    ) -> Result<browser_pool::BrowserLease, CrawlError> {
        if self.above_watermark() {
            return Err(CrawlError::new(
                ErrorKind::Internal,
                &config.site_id,
                format!(
                    "memory watermark exceeded ({} bytes reserved), refusing browser acquisition",
                    self.memory_in_use()
                ),
            ));
        }
        self.browser
            .lease(config, cancel, Arc::clone(&self.memory_in_use))
            .await
    }

    /// Hand a browser context back for reuse. Contexts marked for recycling
    /// are dropped, which closes the underlying Chrome process.
    #[cfg(feature = "browser")]
    pub fn return_browser(&self, lease: browser_pool::BrowserLease) {
        self.browser.hand_back(lease);
    }
}

/// Build the per-host client the way every adapter expects it: browser
/// emulation, pooled keep-alive connections, decompression, optional proxy.
fn build_client(config: &SiteConfig) -> Result<wreq::Client, CrawlError> {
    let mut builder = wreq::Client::builder()
        .emulation(Emulation::Safari18_5)
        .redirect(Policy::default())
        .timeout(config.request_timeout())
        .connect_timeout(config.request_timeout())
        .pool_idle_timeout(POOL_IDLE_TIMEOUT)
        .pool_max_idle_per_host(POOL_MAX_IDLE_PER_HOST);

    if let Some(proxy) = &config.proxy_config {
        let proxy = wreq::Proxy::all(&proxy.url).map_err(|e| {
            CrawlError::new(
                ErrorKind::Config,
                &config.site_id,
                format!("invalid proxy url '{}'", proxy.url),
            )
            .with_cause(e)
        })?;
        builder = builder.proxy(proxy);
    }

    builder.build().map_err(|e| {
        CrawlError::new(ErrorKind::Internal, &config.site_id, "failed to build HTTP client")
            .with_cause(e)
    })
}

#[cfg(feature = "browser")]
pub use browser_pool::BrowserLease;

#[cfg(feature = "browser")]
mod browser_pool {
    //! Bounded pool of headless Chrome contexts for sites that only render
    //! flights client-side. The browser API is blocking; callers run page
    //! operations inside `spawn_blocking`.

    use std::sync::Arc;
    use std::sync::atomic::AtomicU64;
    use std::sync::Mutex as StdMutex;

    use headless_chrome::{Browser, LaunchOptions};
    use tokio::sync::{OwnedSemaphorePermit, Semaphore};
    use tokio_util::sync::CancellationToken;

    use super::MemoryCharge;
    use crate::errors::{CrawlError, ErrorKind};
    use crate::site_config::SiteConfig;

    /// Pages one context may serve before it is relaunched regardless of
    /// health.
    const PAGES_PER_CONTEXT: u32 = 16;

    struct PooledContext {
        browser: Arc<Browser>,
        pages_served: u32,
    }

    pub struct BrowserPool {
        contexts: StdMutex<Vec<PooledContext>>,
        permits: Arc<Semaphore>,
        max_contexts: usize,
    }

    /// One tab on a pooled browser. The lease reserves the page's memory
    /// budget against the process-wide watermark for its lifetime. Pages
    /// above their budget are not returned to the pool; the whole context is
    /// torn down and rebuilt on next use.
    pub struct BrowserLease {
        browser: Arc<Browser>,
        pages_served: u32,
        page_budget_bytes: u64,
        recycle: bool,
        _memory: MemoryCharge,
        _permit: OwnedSemaphorePermit,
    }

    impl BrowserLease {
        /// Shared handle for moving page work onto the blocking pool.
        pub fn shared(&self) -> Arc<Browser> {
            Arc::clone(&self.browser)
        }

        pub fn page_budget_bytes(&self) -> u64 {
            self.page_budget_bytes
        }

        /// Mark this context as spent; it will be relaunched instead of
        /// reused.
        pub fn mark_for_recycle(&mut self) {
            self.recycle = true;
        }

        pub fn needs_recycle(&self) -> bool {
            self.recycle
        }
    }

    impl BrowserPool {
        pub fn new(max_contexts: usize) -> Self {
            Self {
                contexts: StdMutex::new(Vec::new()),
                permits: Arc::new(Semaphore::new(max_contexts)),
                max_contexts,
            }
        }

        pub async fn lease(
            &self,
            config: &SiteConfig,
            cancel: &CancellationToken,
            memory: Arc<AtomicU64>,
        ) -> Result<BrowserLease, CrawlError> {
            let permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(CrawlError::cancelled(&config.site_id)),
                permit = Arc::clone(&self.permits).acquire_owned() => permit
                    .map_err(|_| CrawlError::new(ErrorKind::Internal, &config.site_id, "browser pool closed"))?,
            };

            let pooled = self.contexts.lock().expect("browser pool poisoned").pop();
            let (browser, pages_served) = match pooled {
                Some(context) => (context.browser, context.pages_served + 1),
                None => {
                    let site_id = config.site_id.clone();
                    let launched = tokio::task::spawn_blocking(move || {
                        let options = LaunchOptions::default_builder()
                            .headless(true)
                            .build()
                            .map_err(|e| (site_id.clone(), e.to_string()))?;
                        Browser::new(options).map_err(|e| (site_id, e.to_string()))
                    })
                    .await
                    .map_err(|e| {
                        CrawlError::new(ErrorKind::Internal, &config.site_id, "browser launch task died")
                            .with_cause(e)
                    })?;
                    match launched {
                        Ok(browser) => (Arc::new(browser), 1),
                        Err((site_id, message)) => {
                            return Err(CrawlError::new(
                                ErrorKind::Internal,
                                site_id,
                                format!("failed to launch browser: {message}"),
                            ));
                        }
                    }
                }
            };

            let page_budget_bytes = config
                .browser_config
                .as_ref()
                .map(|b| b.page_memory_budget_mb * 1024 * 1024)
                .unwrap_or(256 * 1024 * 1024);

            Ok(BrowserLease {
                browser,
                pages_served,
                page_budget_bytes,
                recycle: false,
                _memory: MemoryCharge::new(memory, page_budget_bytes),
                _permit: permit,
            })
        }

        /// Return a healthy context to the pool. Spent contexts and contexts
        /// at their page cap are dropped instead, which closes the
        /// underlying Chrome process. Dropping the lease also releases its
        /// memory reservation.
        pub fn hand_back(&self, lease: BrowserLease) {
            if !lease.needs_recycle() && lease.pages_served < PAGES_PER_CONTEXT {
                let mut contexts = self.contexts.lock().expect("browser pool poisoned");
                if contexts.len() < self.max_contexts {
                    contexts.push(PooledContext {
                        browser: Arc::clone(&lease.browser),
                        pages_served: lease.pages_served,
                    });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(feature = "browser")]
    #[tokio::test]
    async fn test_memory_charges_gate_the_watermark() {
        let manager = SessionManager::new(SessionLimits {
            memory_watermark_bytes: 1000,
            ..Default::default()
        });
        assert!(!manager.above_watermark());

        let first = MemoryCharge::new(Arc::clone(&manager.memory_in_use), 600);
        assert_eq!(manager.memory_in_use(), 600);
        assert!(!manager.above_watermark());

        let second = MemoryCharge::new(Arc::clone(&manager.memory_in_use), 600);
        assert_eq!(manager.memory_in_use(), 1200);
        assert!(manager.above_watermark(), "two leases exceed the watermark");

        drop(first);
        assert_eq!(manager.memory_in_use(), 600);
        assert!(!manager.above_watermark(), "watermark falls as leases drop");
        drop(second);
        assert_eq!(manager.memory_in_use(), 0);
    }

    #[tokio::test]
    async fn test_session_slots_bound_concurrency() {
        let manager = Arc::new(SessionManager::new(SessionLimits {
            max_total_sessions: 1,
            ..Default::default()
        }));
        let config = crate::site_config::parse_site_config(
            r#"{
                "site_id": "slot_site",
                "name": "Slot Site",
                "search_url": "https://slot.example.ir/search",
                "crawler_type": "persian-airline",
                "language": "fa",
                "rate_limit": {"requests_per_second": 1.0, "burst": 1, "cooldown_seconds": 1},
                "extraction_config": {
                    "container": "div.row",
                    "fields": {"price": "span.price"}
                },
                "data_validation": {"price_min": 1, "price_max": 100}
            }"#,
            "test",
        )
        .unwrap();
        let cancel = CancellationToken::new();

        let first = manager.http_lease(&config, &cancel).await.unwrap();
        assert_eq!(first.host(), "slot.example.ir");

        let second = manager.http_lease(&config, &cancel);
        tokio::pin!(second);
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_millis(50)) => {}
            _ = &mut second => panic!("second lease granted while pool exhausted"),
        }
        drop(first);
        let second = second.await.unwrap();
        assert_eq!(second.host(), "slot.example.ir");
    }
}
