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

//! Sites that only render flights client-side. A pooled headless-browser
//! context loads the search URL, waits for the configured selector, and the
//! rendered DOM goes through the normal HTML parsing strategy. The browser
//! API is blocking, so page work runs on the blocking pool.

use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;

use crate::adapter::{AdapterCore, SearchContext, SiteAdapter, fill_params, url_with_params};
use crate::errors::{CrawlError, ErrorKind, detect_anti_bot};
use crate::flight::FlightDraft;
use crate::parser::{DocumentKind, ParseDiagnostics, RawDocument};
use crate::query::SearchQuery;
use crate::site_config::SiteConfig;

pub struct JavaScriptHeavyAdapter {
    core: AdapterCore,
}

impl JavaScriptHeavyAdapter {
    pub fn new(config: Arc<SiteConfig>) -> Result<Self, CrawlError> {
        Ok(Self {
            core: AdapterCore::new(config)?,
        })
    }
}

#[async_trait]
impl SiteAdapter for JavaScriptHeavyAdapter {
    fn config(&self) -> &SiteConfig {
        &self.core.config
    }

    async fn search(
        &self,
        query: &SearchQuery,
        ctx: &SearchContext<'_>,
    ) -> Result<Vec<RawDocument>, CrawlError> {
        let config = Arc::clone(&self.core.config);
        let site_id = config.site_id.clone();

        ctx.throttle.acquire(&site_id).await?;
        let mut lease = ctx.sessions.browser_lease(&config, ctx.cancel).await?;

        let params = config
            .extraction_config
            .request
            .as_ref()
            .map(|spec| fill_params(&spec.params, query, 1))
            .unwrap_or_default();
        let url = url_with_params(&config.search_url, &params);

        let wait_selector = config
            .browser_config
            .as_ref()
            .and_then(|b| b.wait_selector.clone());
        let wait_ms = config
            .browser_config
            .as_ref()
            .map(|b| b.wait_ms)
            .unwrap_or(2000);

        let fetched_at = Utc::now();
        let started = std::time::Instant::now();
        let timeout = config.request_timeout();

        let page_url = url.clone();
        let browser = lease.shared();
        let render = tokio::task::spawn_blocking(move || -> Result<String, String> {
            let tab = browser.new_tab().map_err(|e| e.to_string())?;
            tab.navigate_to(&page_url).map_err(|e| e.to_string())?;
            tab.wait_until_navigated().map_err(|e| e.to_string())?;
            if let Some(selector) = wait_selector {
                tab.wait_for_element(&selector).map_err(|e| e.to_string())?;
            } else {
                std::thread::sleep(Duration::from_millis(wait_ms));
            }
            let content = tab.get_content().map_err(|e| e.to_string())?;
            let _ = tab.close(false);
            Ok(content)
        });

        let body = tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => {
                lease.mark_for_recycle();
                return Err(CrawlError::cancelled(&site_id));
            }
            _ = tokio::time::sleep(timeout) => {
                lease.mark_for_recycle();
                return Err(CrawlError::new(ErrorKind::Timeout, &site_id,
                    format!("page render exceeded {timeout:?}"))
                    .with_host(config.host())
                    .with_attempt(ctx.attempt));
            }
            joined = render => match joined {
                Ok(Ok(content)) => content,
                Ok(Err(message)) => {
                    lease.mark_for_recycle();
                    return Err(CrawlError::new(ErrorKind::Network, &site_id,
                        format!("browser navigation failed: {message}"))
                        .with_host(config.host())
                        .with_attempt(ctx.attempt));
                }
                Err(e) => {
                    lease.mark_for_recycle();
                    return Err(CrawlError::new(ErrorKind::Internal, &site_id, "render task died")
                        .with_cause(e));
                }
            },
        };

        tracing::debug!(
            "[{site_id}] rendered {url} in {:?}, {} KB",
            started.elapsed(),
            body.len() / 1024
        );

        if detect_anti_bot(&body) {
            lease.mark_for_recycle();
            return Err(CrawlError::new(
                ErrorKind::RateLimit,
                &site_id,
                format!("anti-bot wall detected on {url}"),
            )
            .with_host(config.host())
            .with_attempt(ctx.attempt));
        }

        // Oversized pages are a sign the site leaked state into the DOM;
        // retire the context rather than reuse it.
        if body.len() as u64 > lease.page_budget_bytes() {
            lease.mark_for_recycle();
        }
        ctx.sessions.return_browser(lease);

        Ok(vec![RawDocument {
            url,
            bytes: body.len() as u64,
            body,
            kind: DocumentKind::Html,
            fetched_at,
        }])
    }

    fn parse_list(
        &self,
        pages: &[RawDocument],
        query: &SearchQuery,
    ) -> (Vec<FlightDraft>, ParseDiagnostics) {
        self.core.parse_pages(pages, query)
    }
}
