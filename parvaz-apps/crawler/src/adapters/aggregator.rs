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

//! Regional aggregators reselling several carriers' inventory. Results are
//! paged; each page costs its own rate-limit token, and parsed records come
//! back tagged `is_aggregated` with their `booking_source`.

use async_trait::async_trait;
use std::sync::Arc;

use crate::adapter::{AdapterCore, SearchContext, SiteAdapter, fill_params, url_with_params};
use crate::errors::CrawlError;
use crate::flight::FlightDraft;
use crate::parser::{DocumentKind, ParseDiagnostics, RawDocument};
use crate::query::SearchQuery;
use crate::site_config::SiteConfig;

pub struct AggregatorAdapter {
    core: AdapterCore,
}

impl AggregatorAdapter {
    pub fn new(config: Arc<SiteConfig>) -> Result<Self, CrawlError> {
        Ok(Self {
            core: AdapterCore::new(config)?,
        })
    }
}

#[async_trait]
impl SiteAdapter for AggregatorAdapter {
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

        let extraction = &config.extraction_config;
        let request = extraction.request.as_ref();
        // The container locator dialect decides the document shape.
        let kind = if extraction.container.starts_with('/') {
            DocumentKind::Json
        } else {
            DocumentKind::Html
        };

        let mut pages = Vec::new();
        for page_number in 1..=extraction.max_pages.max(1) {
            let mut params = request
                .map(|spec| fill_params(&spec.params, query, page_number))
                .unwrap_or_default();
            if let Some(page_param) = &extraction.page_param {
                params.push((page_param.clone(), page_number.to_string()));
            }
            let url = url_with_params(&config.search_url, &params);
            let page = self.core.fetch(&lease, ctx, &url, kind, &[]).await?;
            let empty = page.body.trim().is_empty();
            pages.push(page);
            // Sites answer an out-of-range page with an empty body; stop
            // paging instead of burning tokens.
            if empty {
                break;
            }
        }
        Ok(pages)
    }

    fn parse_list(
        &self,
        pages: &[RawDocument],
        query: &SearchQuery,
    ) -> (Vec<FlightDraft>, ParseDiagnostics) {
        self.core.parse_pages(pages, query)
    }
}
