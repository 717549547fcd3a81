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

//! # Adapter Factory
//!
//! Builds a fully wired adapter from a site config. Registration is open
//! during startup and closes before the scheduler runs; after `seal()` the
//! registry is immutable, so workers can read it without coordination.

use std::collections::HashMap;
use std::sync::Arc;

use crate::adapter::SiteAdapter;
use crate::adapters::{AggregatorAdapter, ApiJsonAdapter, HtmlFormAdapter, PersianAirlineAdapter};
use crate::errors::{CrawlError, ErrorKind};
use crate::site_config::{CrawlerKind, SiteConfig};

pub type AdapterBuilder = fn(Arc<SiteConfig>) -> Result<Box<dyn SiteAdapter>, CrawlError>;

pub struct AdapterFactory {
    registry: HashMap<CrawlerKind, AdapterBuilder>,
    sealed: bool,
}

impl AdapterFactory {
    pub fn new() -> Self {
        Self {
            registry: HashMap::new(),
            sealed: false,
        }
    }

    /// Factory with every built-in kind registered and the registry sealed.
    pub fn with_default_kinds() -> Self {
        let mut factory = Self::new();
        factory
            .register(CrawlerKind::HtmlForm, |config| {
                Ok(Box::new(HtmlFormAdapter::new(config)?))
            })
            .expect("registering into a fresh factory");
        factory
            .register(CrawlerKind::ApiJson, |config| {
                Ok(Box::new(ApiJsonAdapter::new(config)?))
            })
            .expect("registering into a fresh factory");
        factory
            .register(CrawlerKind::PersianAirline, |config| {
                Ok(Box::new(PersianAirlineAdapter::new(config)?))
            })
            .expect("registering into a fresh factory");
        factory
            .register(CrawlerKind::InternationalAggregator, |config| {
                Ok(Box::new(AggregatorAdapter::new(config)?))
            })
            .expect("registering into a fresh factory");
        #[cfg(feature = "browser")]
        factory
            .register(CrawlerKind::JavascriptHeavy, |config| {
                Ok(Box::new(crate::adapters::JavaScriptHeavyAdapter::new(
                    config,
                )?))
            })
            .expect("registering into a fresh factory");
        factory.seal();
        factory
    }

    /// Register a builder for a crawler kind. Fails once the registry is
    /// sealed; kinds cannot be re-registered mid-run.
    pub fn register(
        &mut self,
        kind: CrawlerKind,
        builder: AdapterBuilder,
    ) -> Result<(), CrawlError> {
        if self.sealed {
            return Err(CrawlError::config(format!(
                "adapter registry is sealed; cannot register '{}'",
                kind.as_str()
            )));
        }
        self.registry.insert(kind, builder);
        Ok(())
    }

    pub fn seal(&mut self) {
        self.sealed = true;
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    /// Materialise the adapter for one site.
    pub fn build(&self, config: Arc<SiteConfig>) -> Result<Box<dyn SiteAdapter>, CrawlError> {
        let builder = self.registry.get(&config.crawler_type).ok_or_else(|| {
            CrawlError::new(
                ErrorKind::Config,
                &config.site_id,
                format!(
                    "no adapter registered for crawler type '{}'",
                    config.crawler_type.as_str()
                ),
            )
        })?;
        builder(config)
    }
}

impl Default for AdapterFactory {
    fn default() -> Self {
        Self::with_default_kinds()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::site_config::parse_site_config;

    fn config(crawler_type: &str) -> Arc<SiteConfig> {
        Arc::new(
            parse_site_config(
                &format!(
                    r#"{{
                        "site_id": "factory_site",
                        "name": "Factory Site",
                        "search_url": "https://factory.example.ir/search",
                        "crawler_type": "{crawler_type}",
                        "language": "fa",
                        "rate_limit": {{"requests_per_second": 1.0, "burst": 2, "cooldown_seconds": 10}},
                        "extraction_config": {{
                            "container": "div.row",
                            "fields": {{"price": "span.price", "airline": "div.airline"}}
                        }},
                        "data_validation": {{"price_min": 1, "price_max": 1000000000}}
                    }}"#
                ),
                "test",
            )
            .unwrap(),
        )
    }

    #[test]
    fn test_builds_every_default_kind() {
        let factory = AdapterFactory::with_default_kinds();
        for kind in ["html-form", "api-json", "persian-airline", "international-aggregator"] {
            let adapter = factory.build(config(kind)).unwrap();
            assert_eq!(adapter.config().site_id, "factory_site");
        }
    }

    #[test]
    fn test_sealed_registry_rejects_registration() {
        let mut factory = AdapterFactory::with_default_kinds();
        assert!(factory.is_sealed());
        let err = factory
            .register(CrawlerKind::HtmlForm, |config| {
                Ok(Box::new(HtmlFormAdapter::new(config)?))
            })
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Config);
    }

    #[cfg(not(feature = "browser"))]
    #[test]
    fn test_javascript_kind_requires_browser_feature() {
        let factory = AdapterFactory::with_default_kinds();
        assert!(factory.build(config("javascript-heavy")).is_err());
    }
}
