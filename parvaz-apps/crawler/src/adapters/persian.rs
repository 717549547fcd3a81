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

//! Iranian carrier sites: server-rendered result pages addressed by query
//! parameters, Jalali dates in the URL, Persian digits everywhere in the
//! body. The Persian parsing strategy handles the text; this adapter only
//! shapes the request.

use async_trait::async_trait;
use std::sync::Arc;

use crate::adapter::{AdapterCore, SearchContext, SiteAdapter, fill_params, url_with_params};
use crate::errors::CrawlError;
use crate::flight::FlightDraft;
use crate::parser::{DocumentKind, ParseDiagnostics, RawDocument};
use crate::persian_text::gregorian_to_jalali;
use crate::query::SearchQuery;
use crate::site_config::SiteConfig;

pub struct PersianAirlineAdapter {
    core: AdapterCore,
}

impl PersianAirlineAdapter {
    pub fn new(config: Arc<SiteConfig>) -> Result<Self, CrawlError> {
        Ok(Self {
            core: AdapterCore::new(config)?,
        })
    }

    /// Query parameters used when the config does not spell a request out:
    /// the de-facto convention across Iranian carrier sites.
    fn default_params(&self, query: &SearchQuery) -> Vec<(String, String)> {
        let date = gregorian_to_jalali(query.departure_date)
            .map(|(jy, jm, jd)| format!("{jy:04}/{jm:02}/{jd:02}"))
            .unwrap_or_else(|_| query.departure_date.format("%Y-%m-%d").to_string());
        vec![
            ("origin".to_string(), query.origin.clone()),
            ("destination".to_string(), query.destination.clone()),
            ("departing".to_string(), date),
            (
                "adultCount".to_string(),
                query.passengers.adults.to_string(),
            ),
            (
                "childCount".to_string(),
                query.passengers.children.to_string(),
            ),
            (
                "infantCount".to_string(),
                query.passengers.infants.to_string(),
            ),
        ]
    }
}

#[async_trait]
impl SiteAdapter for PersianAirlineAdapter {
    fn config(&self) -> &SiteConfig {
        &self.core.config
    }

    async fn search(
        &self,
        query: &SearchQuery,
        ctx: &SearchContext<'_>,
    ) -> Result<Vec<RawDocument>, CrawlError> {
        let config = &self.core.config;
        let lease = ctx.sessions.http_lease(config, ctx.cancel).await?;

        let params = match config.extraction_config.request.as_ref() {
            Some(spec) => fill_params(&spec.params, query, 1),
            None => self.default_params(query),
        };
        let url = url_with_params(&config.search_url, &params);
        let page = self
            .core
            .fetch(&lease, ctx, &url, DocumentKind::Html, &[])
            .await?;
        Ok(vec![page])
    }

    fn parse_list(
        &self,
        pages: &[RawDocument],
        query: &SearchQuery,
    ) -> (Vec<FlightDraft>, ParseDiagnostics) {
        self.core.parse_pages(pages, query)
    }
}
