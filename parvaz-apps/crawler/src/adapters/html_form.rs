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

//! Classic server-rendered search forms: fill the form, submit, read the
//! results page.

use async_trait::async_trait;
use std::sync::Arc;

use crate::adapter::{AdapterCore, SearchContext, SiteAdapter, fill_params, url_with_params};
use crate::errors::CrawlError;
use crate::flight::FlightDraft;
use crate::parser::{DocumentKind, ParseDiagnostics, RawDocument};
use crate::query::SearchQuery;
use crate::site_config::{RequestMethod, SiteConfig};

pub struct HtmlFormAdapter {
    core: AdapterCore,
}

impl HtmlFormAdapter {
    pub fn new(config: Arc<SiteConfig>) -> Result<Self, CrawlError> {
        Ok(Self {
            core: AdapterCore::new(config)?,
        })
    }
}

#[async_trait]
impl SiteAdapter for HtmlFormAdapter {
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

        let request = config.extraction_config.request.as_ref();
        let params = request
            .map(|spec| fill_params(&spec.params, query, 1))
            .unwrap_or_default();
        let method = request
            .map(|spec| spec.method)
            .unwrap_or(RequestMethod::PostForm);

        let page = match method {
            RequestMethod::PostForm => {
                self.core
                    .fetch_form(&lease, ctx, &config.search_url, &params, DocumentKind::Html)
                    .await?
            }
            RequestMethod::Get => {
                let url = url_with_params(&config.search_url, &params);
                self.core
                    .fetch(&lease, ctx, &url, DocumentKind::Html, &[])
                    .await?
            }
            RequestMethod::PostJson => {
                return Err(CrawlError::config(format!(
                    "{}: html-form sites cannot post JSON",
                    config.site_id
                )));
            }
        };
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
