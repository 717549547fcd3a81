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

//! # Crawl Scheduler
//!
//! Drives one crawl across many sites: fan-out under a global worker cap
//! with per-host serialisation, the cross-cutting run of breaker, rate
//! limiter, retry, session, parse, and validation per worker, then fan-in
//! with dedup and deterministic ordering. A crawl always yields a structured
//! result; one misbehaving site cannot take the fleet down with it.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Days, Utc};
use parvaz_host_gate::Admission;
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::adapter::{GateThrottle, SearchContext, SiteAdapter};
use crate::errors::{CrawlError, ErrorKind};
use crate::events::CrawlEvent;
use crate::flight::Flight;
use crate::query::{SearchQuery, TripType};
use crate::retry::{RetryPolicy, run_with_policy};
use crate::runtime::CoreRuntime;
use crate::site_config::SiteConfig;
use crate::validator::{FlightValidator, dedup_by_identity};

#[derive(Clone, Debug)]
pub struct CrawlOptions {
    /// Expand the query over ±N days around the departure date.
    pub date_range_days: Option<u32>,
    pub max_workers: usize,
    pub site_timeout: Duration,
    pub crawl_timeout: Duration,
    /// How long cancelled workers get to wind down before abandonment.
    pub shutdown_window: Duration,
}

impl Default for CrawlOptions {
    fn default() -> Self {
        Self {
            date_range_days: None,
            max_workers: 16,
            site_timeout: Duration::from_secs(120),
            crawl_timeout: Duration::from_secs(300),
            shutdown_window: Duration::from_secs(5),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CrawlStatus {
    Complete,
    Partial,
    Failed,
    Cancelled,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SiteState {
    Completed {
        count: usize,
        latency_ms: u64,
        bytes: u64,
    },
    Failed {
        kind: ErrorKind,
        message: String,
    },
    Skipped {
        reason: String,
    },
    Cancelled,
}

#[derive(Clone, Debug, Serialize)]
pub struct SiteOutcome {
    pub site_id: String,
    #[serde(flatten)]
    pub state: SiteState,
    pub validation_rejects: usize,
    pub parse_warnings: usize,
}

impl SiteOutcome {
    fn succeeded(&self) -> bool {
        matches!(self.state, SiteState::Completed { .. })
    }
}

#[derive(Debug, Serialize)]
pub struct CrawlResult {
    pub job_id: String,
    pub status: CrawlStatus,
    pub flights: Vec<Flight>,
    pub sites: Vec<SiteOutcome>,
    pub warnings: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// Runtime state of one crawl. Owned by the scheduler; workers report back
/// through their join handles, never by mutating the job.
struct CrawlJob {
    id: String,
    site_ids: Vec<String>,
    created_at: DateTime<Utc>,
    outcomes: Vec<SiteOutcome>,
    warnings: Vec<String>,
}

pub struct Scheduler {
    runtime: Arc<CoreRuntime>,
}

impl Scheduler {
    pub fn new(runtime: Arc<CoreRuntime>) -> Self {
        Self { runtime }
    }

    pub fn runtime(&self) -> &Arc<CoreRuntime> {
        &self.runtime
    }

    /// Run one crawl. Returns a structured result unless the query itself is
    /// invalid; site failures land inside the result, not in `Err`.
    pub async fn crawl(
        &self,
        query: SearchQuery,
        site_filter: Option<&[String]>,
        options: &CrawlOptions,
        cancel: CancellationToken,
    ) -> Result<CrawlResult, CrawlError> {
        let started_at = Utc::now();
        query
            .validate(started_at.date_naive())
            .map_err(|e| CrawlError::new(ErrorKind::Validation, "", e.to_string()))?;

        let (sites, mut warnings) = self.resolve_sites(site_filter);
        let queries = expand_queries(&query, options, started_at);

        let mut job = CrawlJob {
            id: format!(
                "{}-{}-{}",
                query.origin.to_lowercase(),
                query.destination.to_lowercase(),
                started_at.timestamp_millis()
            ),
            site_ids: sites.iter().map(|s| s.site_id.clone()).collect(),
            created_at: started_at,
            outcomes: Vec::new(),
            warnings: Vec::new(),
        };
        job.warnings.append(&mut warnings);

        self.runtime
            .events
            .publish(
                &job.id,
                CrawlEvent::JobStarted {
                    origin: query.origin.clone(),
                    destination: query.destination.clone(),
                    sites: job.site_ids.clone(),
                },
            )
            .await;

        let child_cancel = cancel.child_token();
        let worker_permits = Arc::new(Semaphore::new(options.max_workers.max(1)));
        let mut workers: JoinSet<(String, SiteOutcome, Vec<Flight>)> = JoinSet::new();

        for site in &sites {
            for sub_query in &queries {
                let runtime = Arc::clone(&self.runtime);
                let site = Arc::clone(site);
                let sub_query = sub_query.clone();
                let job_id = job.id.clone();
                let permits = Arc::clone(&worker_permits);
                let cancel = child_cancel.clone();
                let options = options.clone();
                workers.spawn(async move {
                    let site_id = site.site_id.clone();
                    let outcome =
                        site_worker(runtime, site, sub_query, job_id, permits, cancel, options)
                            .await;
                    (site_id, outcome.0, outcome.1)
                });
            }
        }

        let (mut per_site, flights, cancelled) = self
            .collect_workers(&mut workers, &job, options, &cancel, &child_cancel)
            .await;

        // Sites whose workers never reported (abandoned or never started)
        // are carried as cancelled.
        for site_id in &job.site_ids {
            per_site.entry(site_id.clone()).or_insert_with(|| SiteOutcome {
                site_id: site_id.clone(),
                state: SiteState::Cancelled,
                validation_rejects: 0,
                parse_warnings: 0,
            });
        }
        job.outcomes = job
            .site_ids
            .iter()
            .filter_map(|site_id| per_site.remove(site_id))
            .collect();

        let mut flights = dedup_by_identity(flights);
        flights.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));

        let succeeded = job.outcomes.iter().filter(|o| o.succeeded()).count();
        let failed = job.outcomes.len() - succeeded;
        let status = if cancelled {
            CrawlStatus::Cancelled
        } else if failed == 0 {
            CrawlStatus::Complete
        } else if succeeded > 0 {
            CrawlStatus::Partial
        } else {
            CrawlStatus::Failed
        };

        if job.outcomes.is_empty() {
            job.warnings
                .push("no enabled sites matched the request".to_string());
        }

        if !flights.is_empty() {
            if let Err(e) = self.runtime.store.upsert_batch(&flights).await {
                tracing::warn!("flight store upsert failed: {e:?}");
                job.warnings.push(format!("store upsert failed: {e}"));
            }
        }

        self.runtime
            .events
            .publish(
                &job.id,
                CrawlEvent::JobCompleted {
                    status,
                    total_flights: flights.len(),
                    sites_succeeded: succeeded,
                    sites_failed: failed,
                },
            )
            .await;

        Ok(CrawlResult {
            job_id: job.id,
            status,
            flights,
            sites: job.outcomes,
            warnings: job.warnings,
            started_at: job.created_at,
            finished_at: Utc::now(),
        })
    }

    /// Enabled sites matching the filter; unknown or disabled names are
    /// warnings, never failures.
    fn resolve_sites(
        &self,
        site_filter: Option<&[String]>,
    ) -> (Vec<Arc<SiteConfig>>, Vec<String>) {
        let enabled = self.runtime.configs.enabled();
        match site_filter {
            None => (enabled, Vec::new()),
            Some(filter) => {
                let wanted: HashSet<&str> = filter.iter().map(|s| s.as_str()).collect();
                let sites: Vec<Arc<SiteConfig>> = enabled
                    .into_iter()
                    .filter(|site| wanted.contains(site.site_id.as_str()))
                    .collect();
                let found: HashSet<&str> =
                    sites.iter().map(|s| s.site_id.as_str()).collect();
                let warnings = filter
                    .iter()
                    .filter(|name| !found.contains(name.as_str()))
                    .map(|name| format!("site '{name}' is unknown or disabled"))
                    .collect();
                (sites, warnings)
            }
        }
    }

    /// Fan-in: gather worker results under the crawl timeout, handling
    /// cancellation with a bounded shutdown window.
    async fn collect_workers(
        &self,
        workers: &mut JoinSet<(String, SiteOutcome, Vec<Flight>)>,
        job: &CrawlJob,
        options: &CrawlOptions,
        cancel: &CancellationToken,
        child_cancel: &CancellationToken,
    ) -> (HashMap<String, SiteOutcome>, Vec<Flight>, bool) {
        let mut per_site: HashMap<String, SiteOutcome> = HashMap::new();
        let mut flights = Vec::new();
        let mut cancelled = false;

        let deadline = tokio::time::sleep(options.crawl_timeout);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled(), if !cancelled => {
                    tracing::info!("[{}] crawl cancelled, shutting workers down", job.id);
                    cancelled = true;
                    child_cancel.cancel();
                }
                _ = &mut deadline, if !cancelled => {
                    tracing::warn!("[{}] crawl timeout reached, cancelling stragglers", job.id);
                    cancelled = true;
                    child_cancel.cancel();
                }
                joined = workers.join_next() => match joined {
                    None => break,
                    Some(Ok((site_id, outcome, site_flights))) => {
                        flights.extend(site_flights);
                        merge_outcome(&mut per_site, site_id, outcome);
                    }
                    Some(Err(join_error)) => {
                        tracing::error!("[{}] worker panicked: {join_error:?}", job.id);
                    }
                },
            }

            if cancelled {
                // Grant the shutdown window, then abandon whoever is left;
                // their sessions close when the leases drop.
                let drain = async {
                    while let Some(joined) = workers.join_next().await {
                        if let Ok((site_id, outcome, site_flights)) = joined {
                            flights.extend(site_flights);
                            merge_outcome(&mut per_site, site_id, outcome);
                        }
                    }
                };
                if tokio::time::timeout(options.shutdown_window, drain)
                    .await
                    .is_err()
                {
                    tracing::warn!(
                        "[{}] {} workers did not exit within the shutdown window, abandoning",
                        job.id,
                        workers.len()
                    );
                    workers.abort_all();
                }
                break;
            }
        }

        (per_site, flights, cancelled)
    }
}

/// Merge outcomes when date-range expansion runs a site several times: one
/// success makes the site successful, counts accumulate.
fn merge_outcome(
    per_site: &mut HashMap<String, SiteOutcome>,
    site_id: String,
    outcome: SiteOutcome,
) {
    match per_site.get_mut(&site_id) {
        None => {
            per_site.insert(site_id, outcome);
        }
        Some(existing) => {
            existing.validation_rejects += outcome.validation_rejects;
            existing.parse_warnings += outcome.parse_warnings;
            match (&mut existing.state, outcome.state) {
                (
                    SiteState::Completed { count, latency_ms, bytes },
                    SiteState::Completed {
                        count: more,
                        latency_ms: more_latency,
                        bytes: more_bytes,
                    },
                ) => {
                    *count += more;
                    *latency_ms = (*latency_ms).max(more_latency);
                    *bytes += more_bytes;
                }
                (SiteState::Completed { .. }, _) => {}
                (_, new_state @ SiteState::Completed { .. }) => {
                    existing.state = new_state;
                }
                _ => {}
            }
        }
    }
}

/// Date-range expansion: the base query plus ±N days, dates in the past
/// dropped. Multi-city trips decompose into their legs first.
fn expand_queries(
    query: &SearchQuery,
    options: &CrawlOptions,
    now: DateTime<Utc>,
) -> Vec<SearchQuery> {
    let base = if query.trip_type == TripType::MultiCity {
        query.multi_city_legs()
    } else {
        vec![query.clone()]
    };

    let Some(range) = options.date_range_days.filter(|n| *n > 0) else {
        return base;
    };

    let today = now.date_naive();
    let mut expanded = Vec::new();
    for sub_query in &base {
        for offset in -(range as i64)..=(range as i64) {
            let date = if offset >= 0 {
                sub_query
                    .departure_date
                    .checked_add_days(Days::new(offset as u64))
            } else {
                sub_query
                    .departure_date
                    .checked_sub_days(Days::new(offset.unsigned_abs()))
            };
            let Some(date) = date else { continue };
            if date < today {
                continue;
            }
            expanded.push(sub_query.with_departure(date));
        }
    }
    expanded
}

/// One site, one sub-query: the whole cross-cutting pipeline.
async fn site_worker(
    runtime: Arc<CoreRuntime>,
    site: Arc<SiteConfig>,
    query: SearchQuery,
    job_id: String,
    permits: Arc<Semaphore>,
    cancel: CancellationToken,
    options: CrawlOptions,
) -> (SiteOutcome, Vec<Flight>) {
    let site_id = site.site_id.clone();
    let outcome = |state: SiteState, rejects: usize, warnings: usize| SiteOutcome {
        site_id: site_id.clone(),
        state,
        validation_rejects: rejects,
        parse_warnings: warnings,
    };

    // Wait for a worker slot; a crawl cancelled while we queue emits nothing
    // for this site.
    let _worker_permit = tokio::select! {
        biased;
        _ = cancel.cancelled() => return (outcome(SiteState::Cancelled, 0, 0), Vec::new()),
        permit = permits.acquire_owned() => match permit {
            Ok(permit) => permit,
            Err(_) => return (outcome(SiteState::Cancelled, 0, 0), Vec::new()),
        },
    };

    let gate = runtime.hosts.gate(
        &site.host(),
        site.rate_limit.to_rate_spec(),
        site.breaker.to_breaker_spec(),
    );

    runtime
        .events
        .publish(
            &job_id,
            CrawlEvent::SiteStarted {
                site_id: site_id.clone(),
            },
        )
        .await;

    // Pre-flight breaker check: a known-open breaker skips the site without
    // claiming the probe slot.
    if let Admission::Reject { retry_after } = gate.peek_breaker() {
        runtime
            .events
            .publish(
                &job_id,
                CrawlEvent::SiteFailed {
                    site_id: site_id.clone(),
                    kind: ErrorKind::BreakerOpen,
                    message: format!("breaker open, retry after {retry_after:?}"),
                },
            )
            .await;
        return (
            outcome(
                SiteState::Skipped {
                    reason: "breaker-open".to_string(),
                },
                0,
                0,
            ),
            Vec::new(),
        );
    }

    let adapter = match runtime.factory.build(Arc::clone(&site)) {
        Ok(adapter) => adapter,
        Err(error) => {
            runtime
                .events
                .publish(
                    &job_id,
                    CrawlEvent::SiteFailed {
                        site_id: site_id.clone(),
                        kind: error.kind,
                        message: error.message.clone(),
                    },
                )
                .await;
            return (
                outcome(
                    SiteState::Failed {
                        kind: error.kind,
                        message: error.message,
                    },
                    0,
                    0,
                ),
                Vec::new(),
            );
        }
    };

    // Serialise per host for the whole search, backoffs included.
    let host_slot = match gate.acquire_slot(&cancel).await {
        Ok(slot) => slot,
        Err(_) => return (outcome(SiteState::Cancelled, 0, 0), Vec::new()),
    };

    let policy = RetryPolicy::from_spec(
        &site.error_handling,
        Duration::from_secs(site.rate_limit.cooldown_seconds),
    );
    let started = tokio::time::Instant::now();

    let adapter_ref = adapter.as_ref();
    let query_ref = &query;
    let sessions = &runtime.sessions;
    let events = &runtime.events;
    let gate_for_ops = Arc::clone(&gate);
    let cancel_for_ops = cancel.clone();
    let job_for_retry = job_id.clone();
    let site_for_retry = site_id.clone();

    let search = run_with_policy(
        &policy,
        &gate,
        &cancel,
        &site_id,
        move |attempt, error| {
            events.publish_now(
                &job_for_retry,
                CrawlEvent::SiteProgress {
                    site_id: site_for_retry.clone(),
                    attempt,
                    reason: format!("{}: {}", error.kind, error.message),
                },
            );
        },
        move |attempt| {
            let throttle = GateThrottle::new(Arc::clone(&gate_for_ops), cancel_for_ops.clone());
            let cancel = cancel_for_ops.clone();
            async move {
                let ctx = SearchContext {
                    sessions,
                    cancel: &cancel,
                    throttle,
                    attempt,
                };
                adapter_ref.search(query_ref, &ctx).await
            }
        },
    );

    let pages = match tokio::time::timeout(options.site_timeout, search).await {
        Ok(Ok(pages)) => pages,
        Ok(Err(error)) => {
            drop(host_slot);
            adapter.close().await;
            if error.kind == ErrorKind::Cancelled {
                return (outcome(SiteState::Cancelled, 0, 0), Vec::new());
            }
            runtime
                .events
                .publish(
                    &job_id,
                    CrawlEvent::SiteFailed {
                        site_id: site_id.clone(),
                        kind: error.kind,
                        message: error.message.clone(),
                    },
                )
                .await;
            return (
                outcome(
                    SiteState::Failed {
                        kind: error.kind,
                        message: error.message,
                    },
                    0,
                    0,
                ),
                Vec::new(),
            );
        }
        Err(_) => {
            drop(host_slot);
            adapter.close().await;
            gate.record_failure();
            let message = format!("site exceeded {:?}", options.site_timeout);
            runtime
                .events
                .publish(
                    &job_id,
                    CrawlEvent::SiteFailed {
                        site_id: site_id.clone(),
                        kind: ErrorKind::Timeout,
                        message: message.clone(),
                    },
                )
                .await;
            return (
                outcome(
                    SiteState::Failed {
                        kind: ErrorKind::Timeout,
                        message,
                    },
                    0,
                    0,
                ),
                Vec::new(),
            );
        }
    };
    drop(host_slot);

    let latency = started.elapsed();
    let bytes: u64 = pages.iter().map(|page| page.bytes).sum();

    let (drafts, diagnostics) = adapter.parse_list(&pages, &query);
    let validator = FlightValidator::for_site(&site);
    let now = Utc::now();
    let mut flights = Vec::new();
    let mut rejects = 0usize;
    for draft in drafts {
        match validator.validate(draft, now) {
            Ok(flight) => flights.push(flight),
            Err(reject) => {
                rejects += 1;
                tracing::debug!("[{site_id}] dropped record: {}", reject.reason);
            }
        }
    }

    if !flights.is_empty() {
        runtime.events.publish_now(
            &job_id,
            CrawlEvent::FlightsFound {
                site_id: site_id.clone(),
                delta: flights.len(),
            },
        );
    }

    adapter.close().await;
    runtime
        .events
        .publish(
            &job_id,
            CrawlEvent::SiteCompleted {
                site_id: site_id.clone(),
                count: flights.len(),
                latency_ms: latency.as_millis() as u64,
                bytes,
            },
        )
        .await;

    tracing::info!(
        "[{site_id}] completed: {} flights, {} rejects, {} parse warnings in {latency:?}",
        flights.len(),
        rejects,
        diagnostics.warnings.len()
    );

    (
        outcome(
            SiteState::Completed {
                count: flights.len(),
                latency_ms: latency.as_millis() as u64,
                bytes,
            },
            rejects,
            diagnostics.warnings.len() + diagnostics.rows_dropped,
        ),
        flights,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn query() -> SearchQuery {
        SearchQuery::builder(
            "THR",
            "IST",
            NaiveDate::from_ymd_opt(2099, 6, 15).unwrap(),
        )
        .build(NaiveDate::from_ymd_opt(2099, 6, 1).unwrap())
        .unwrap()
    }

    #[test]
    fn test_date_range_expansion() {
        let options = CrawlOptions {
            date_range_days: Some(2),
            ..Default::default()
        };
        let now = Utc::now();
        let expanded = expand_queries(&query(), &options, now);
        assert_eq!(expanded.len(), 5);
        assert_eq!(
            expanded[0].departure_date,
            NaiveDate::from_ymd_opt(2099, 6, 13).unwrap()
        );
        assert_eq!(
            expanded[4].departure_date,
            NaiveDate::from_ymd_opt(2099, 6, 17).unwrap()
        );
    }

    #[test]
    fn test_date_range_skips_past_dates() {
        let mut base = query();
        base.departure_date = Utc::now().date_naive();
        let options = CrawlOptions {
            date_range_days: Some(3),
            ..Default::default()
        };
        let expanded = expand_queries(&base, &options, Utc::now());
        assert_eq!(expanded.len(), 4, "past days are dropped from the range");
    }

    #[test]
    fn test_no_expansion_without_option() {
        let expanded = expand_queries(&query(), &CrawlOptions::default(), Utc::now());
        assert_eq!(expanded.len(), 1);
    }
}
