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

//! Sites exposing a JSON search endpoint, usually a B2B feed. Credential
//! entries from `b2b_credentials` are sent verbatim as request headers.

use async_trait::async_trait;
use std::sync::Arc;

use crate::adapter::{AdapterCore, SearchContext, SiteAdapter, fill_params, url_with_params};
use crate::errors::CrawlError;
use crate::flight::FlightDraft;
use crate::parser::{DocumentKind, ParseDiagnostics, RawDocument};
use crate::query::SearchQuery;
use crate::site_config::{RequestMethod, SiteConfig};

pub struct ApiJsonAdapter {
    core: AdapterCore,
    credential_headers: Vec<(String, String)>,
}

impl ApiJsonAdapter {
    pub fn new(config: Arc<SiteConfig>) -> Result<Self, CrawlError> {
        let credential_headers = config
            .b2b_credentials
            .as_ref()
            .map(|credentials| {
                credentials
                    .iter()
                    .map(|(name, value)| (name.clone(), value.clone()))
                    .collect()
            })
            .unwrap_or_default();
        Ok(Self {
            core: AdapterCore::new(config)?,
            credential_headers,
        })
    }
}

#[async_trait]
impl SiteAdapter for ApiJsonAdapter {
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
            .unwrap_or(RequestMethod::Get);

        let page = match method {
            RequestMethod::Get => {
                let url = url_with_params(&config.search_url, &params);
                self.core
                    .fetch(&lease, ctx, &url, DocumentKind::Json, &self.credential_headers)
                    .await?
            }
            RequestMethod::PostJson => {
                let body = serde_json::Value::Object(
                    params
                        .into_iter()
                        .map(|(name, value)| (name, serde_json::Value::String(value)))
                        .collect(),
                );
                self.core
                    .fetch_json_post(
                        &lease,
                        ctx,
                        &config.search_url,
                        &body,
                        &self.credential_headers,
                    )
                    .await?
            }
            RequestMethod::PostForm => {
                return Err(CrawlError::config(format!(
                    "{}: api-json sites cannot post form bodies",
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
