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

//! # Site Adapter Contract
//!
//! An adapter knows one thing: how to ask its site for flights and read the
//! answer. Everything cross-cutting (tokens, breaker, retry, sessions,
//! validation, events) lives in the crawl runner, so adapter kinds stay
//! small and there is no inheritance tower.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use parvaz_host_gate::HostGate;
use tokio_util::sync::CancellationToken;

use crate::errors::{CrawlError, ErrorKind, detect_anti_bot, kind_for_status};
use crate::flight::FlightDraft;
use crate::parser::{DocumentKind, ParseDiagnostics, ParsePhase, ParseStrategy, RawDocument};
use crate::persian_text::gregorian_to_jalali;
use crate::query::SearchQuery;
use crate::session::{HttpLease, SessionManager};
use crate::site_config::SiteConfig;

/// Rate-limit handle the runner threads into `search`. Adapters call
/// `acquire` before every network request; the gate itself stays hidden.
#[derive(Clone)]
pub struct GateThrottle {
    gate: Arc<HostGate>,
    cancel: CancellationToken,
}

impl GateThrottle {
    pub fn new(gate: Arc<HostGate>, cancel: CancellationToken) -> Self {
        Self { gate, cancel }
    }

    pub async fn acquire(&self, site_id: &str) -> Result<(), CrawlError> {
        self.gate
            .acquire_token(&self.cancel)
            .await
            .map_err(|_| CrawlError::cancelled(site_id))
    }
}

/// Everything a `search` call may touch, owned by the runner.
pub struct SearchContext<'a> {
    pub sessions: &'a SessionManager,
    pub cancel: &'a CancellationToken,
    pub throttle: GateThrottle,
    /// Which attempt of the retry loop this search runs under.
    pub attempt: u32,
}

/// The per-site capability set. `search` must honour cancellation at every
/// suspension point; `parse_list` is pure; `close` releases anything the
/// adapter itself holds.
#[async_trait]
pub trait SiteAdapter: Send + Sync {
    fn config(&self) -> &SiteConfig;

    async fn search(
        &self,
        query: &SearchQuery,
        ctx: &SearchContext<'_>,
    ) -> Result<Vec<RawDocument>, CrawlError>;

    fn parse_list(
        &self,
        pages: &[RawDocument],
        query: &SearchQuery,
    ) -> (Vec<FlightDraft>, ParseDiagnostics);

    async fn close(&self) {}
}

/// State every adapter kind shares: its immutable config and the parsing
/// strategy the factory chose for it.
#[derive(Clone, Debug)]
pub struct AdapterCore {
    pub config: Arc<SiteConfig>,
    pub strategy: ParseStrategy,
}

impl AdapterCore {
    pub fn new(config: Arc<SiteConfig>) -> Result<Self, CrawlError> {
        let strategy = ParseStrategy::for_config(&config)?;
        Ok(Self { config, strategy })
    }

    pub fn site_id(&self) -> &str {
        &self.config.site_id
    }

    /// Default `parse_list` shared by every adapter kind: run the strategy
    /// over each page and merge diagnostics.
    pub fn parse_pages(
        &self,
        pages: &[RawDocument],
        query: &SearchQuery,
    ) -> (Vec<FlightDraft>, ParseDiagnostics) {
        let mut drafts = Vec::new();
        let mut diagnostics = ParseDiagnostics::default();
        for page in pages {
            let (mut page_drafts, page_diagnostics) =
                self.strategy
                    .parse_list(page, ParsePhase::SearchResults, query);
            drafts.append(&mut page_drafts);
            diagnostics.merge(page_diagnostics);
        }
        (drafts, diagnostics)
    }

    /// Issue a GET and classify the outcome. One rate-limit token per call.
    pub async fn fetch(
        &self,
        lease: &HttpLease,
        ctx: &SearchContext<'_>,
        url: &str,
        kind: DocumentKind,
        headers: &[(String, String)],
    ) -> Result<RawDocument, CrawlError> {
        ctx.throttle.acquire(self.site_id()).await?;
        let mut request = lease.client().get(url);
        for (name, value) in headers {
            request = request.header(name.as_str(), value.as_str());
        }
        if kind == DocumentKind::Json {
            request = request.header("Accept", "application/json");
        }
        self.send(ctx, url, kind, request).await
    }

    /// Issue a form POST and classify the outcome.
    pub async fn fetch_form(
        &self,
        lease: &HttpLease,
        ctx: &SearchContext<'_>,
        url: &str,
        form: &[(String, String)],
        kind: DocumentKind,
    ) -> Result<RawDocument, CrawlError> {
        ctx.throttle.acquire(self.site_id()).await?;
        let body: String = form
            .iter()
            .map(|(name, value)| {
                format!(
                    "{}={}",
                    urlencoding::encode(name),
                    urlencoding::encode(value)
                )
            })
            .collect::<Vec<_>>()
            .join("&");
        let request = lease
            .client()
            .post(url)
            .header("Content-Type", "application/x-www-form-urlencoded")
            .body(body);
        self.send(ctx, url, kind, request).await
    }

    /// Issue a JSON POST and classify the outcome.
    pub async fn fetch_json_post(
        &self,
        lease: &HttpLease,
        ctx: &SearchContext<'_>,
        url: &str,
        body: &serde_json::Value,
        headers: &[(String, String)],
    ) -> Result<RawDocument, CrawlError> {
        ctx.throttle.acquire(self.site_id()).await?;
        let mut request = lease
            .client()
            .post(url)
            .header("Content-Type", "application/json")
            .header("Accept", "application/json")
            .body(body.to_string());
        for (name, value) in headers {
            request = request.header(name.as_str(), value.as_str());
        }
        self.send(ctx, url, DocumentKind::Json, request).await
    }

    async fn send(
        &self,
        ctx: &SearchContext<'_>,
        url: &str,
        kind: DocumentKind,
        request: wreq::RequestBuilder,
    ) -> Result<RawDocument, CrawlError> {
        let site_id = self.site_id().to_string();
        let host = self.config.host();
        let timeout = self.config.request_timeout();

        let started = std::time::Instant::now();
        tracing::trace!("[{site_id}] requesting {url}");

        let response = tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => return Err(CrawlError::cancelled(&site_id)),
            _ = tokio::time::sleep(timeout) => {
                return Err(CrawlError::new(ErrorKind::Timeout, &site_id,
                    format!("request to {url} exceeded {timeout:?}"))
                    .with_host(host)
                    .with_attempt(ctx.attempt));
            }
            result = request.send() => result.map_err(|e| {
                CrawlError::new(ErrorKind::Network, &site_id, format!("request to {url} failed"))
                    .with_host(self.config.host())
                    .with_attempt(ctx.attempt)
                    .with_cause(e)
            })?,
        };

        let status = response.status().as_u16();
        let body = response.text().await.map_err(|e| {
            CrawlError::new(ErrorKind::Network, &site_id, "failed to read response body")
                .with_host(self.config.host())
                .with_attempt(ctx.attempt)
                .with_cause(e)
        })?;
        let elapsed = started.elapsed();
        tracing::debug!(
            "[{site_id}] HTTP {status} from {url} in {elapsed:?}, {} KB",
            body.len() / 1024
        );
        if elapsed.as_millis() as u64 > self.config.monitoring.slow_request_warn_ms {
            tracing::warn!("[{site_id}] slow response from {url}: {elapsed:?}");
        }

        if !(200..300).contains(&status) {
            let preview: String = body.chars().take(300).collect();
            return Err(CrawlError::new(
                kind_for_status(status),
                &site_id,
                format!("HTTP {status} from {url}: {preview}"),
            )
            .with_host(self.config.host())
            .with_attempt(ctx.attempt));
        }

        if detect_anti_bot(&body) {
            return Err(CrawlError::new(
                ErrorKind::RateLimit,
                &site_id,
                format!("anti-bot wall detected on {url}"),
            )
            .with_host(self.config.host())
            .with_attempt(ctx.attempt));
        }

        Ok(RawDocument {
            url: url.to_string(),
            bytes: body.len() as u64,
            body,
            kind,
            fetched_at: Utc::now(),
        })
    }
}

/// Fill the `{origin}`-style placeholders of a request template value.
pub fn fill_template(template: &str, query: &SearchQuery, page: u32) -> String {
    let jalali = gregorian_to_jalali(query.departure_date)
        .map(|(jy, jm, jd)| format!("{jy:04}/{jm:02}/{jd:02}"))
        .unwrap_or_default();
    template
        .replace("{origin}", &query.origin)
        .replace("{destination}", &query.destination)
        .replace("{date}", &query.departure_date.format("%Y-%m-%d").to_string())
        .replace("{date_jalali}", &jalali)
        .replace(
            "{return_date}",
            &query
                .return_date
                .map(|d| d.format("%Y-%m-%d").to_string())
                .unwrap_or_default(),
        )
        .replace("{adults}", &query.passengers.adults.to_string())
        .replace("{children}", &query.passengers.children.to_string())
        .replace("{infants}", &query.passengers.infants.to_string())
        .replace("{cabin}", query.cabin.as_str_name())
        .replace("{page}", &page.to_string())
}

/// Append query parameters to a base URL.
pub fn url_with_params(base: &str, params: &[(String, String)]) -> String {
    if params.is_empty() {
        return base.to_string();
    }
    let joined: String = params
        .iter()
        .map(|(name, value)| {
            format!(
                "{}={}",
                urlencoding::encode(name),
                urlencoding::encode(value)
            )
        })
        .collect::<Vec<_>>()
        .join("&");
    let separator = if base.contains('?') { '&' } else { '?' };
    format!("{base}{separator}{joined}")
}

/// Filled request parameters for one page of one query.
pub fn fill_params(
    params: &std::collections::BTreeMap<String, String>,
    query: &SearchQuery,
    page: u32,
) -> Vec<(String, String)> {
    params
        .iter()
        .map(|(name, value)| (name.clone(), fill_template(value, query, page)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn query() -> SearchQuery {
        SearchQuery::builder(
            "THR",
            "IST",
            NaiveDate::from_ymd_opt(2024, 7, 5).unwrap(),
        )
        .build(NaiveDate::from_ymd_opt(2024, 7, 1).unwrap())
        .unwrap()
    }

    #[test]
    fn test_template_fill() {
        let filled = fill_template("{origin}-{destination} on {date} p{page}", &query(), 2);
        assert_eq!(filled, "THR-IST on 2024-07-05 p2");
    }

    #[test]
    fn test_template_jalali_date() {
        let filled = fill_template("{date_jalali}", &query(), 1);
        assert_eq!(filled, "1403/04/15");
    }

    #[test]
    fn test_url_with_params() {
        let url = url_with_params(
            "https://example.ir/search",
            &[("from".into(), "THR".into()), ("to".into(), "IST".into())],
        );
        assert_eq!(url, "https://example.ir/search?from=THR&to=IST");

        let url = url_with_params("https://example.ir/search?v=2", &[("from".into(), "THR".into())]);
        assert_eq!(url, "https://example.ir/search?v=2&from=THR");
    }
}
