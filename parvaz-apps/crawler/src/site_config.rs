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

//! # Site Configuration
//!
//! One JSON document per site. Loaded once at startup into an immutable
//! `ConfigStore`; a hot reload builds a whole new store and swaps it, so
//! in-flight crawls keep the configs they started with.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use once_cell::sync::Lazy;
use parvaz_host_gate::{BreakerSpec, RateSpec};
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;

use crate::errors::{CrawlError, ErrorKind};

static SITE_ID_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-z0-9_]+$").unwrap());
static PLACEHOLDER_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\$\{([A-Z0-9_]+)\}").unwrap());

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize, serde::Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CrawlerKind {
    HtmlForm,
    ApiJson,
    JavascriptHeavy,
    PersianAirline,
    InternationalAggregator,
}

impl CrawlerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CrawlerKind::HtmlForm => "html-form",
            CrawlerKind::ApiJson => "api-json",
            CrawlerKind::JavascriptHeavy => "javascript-heavy",
            CrawlerKind::PersianAirline => "persian-airline",
            CrawlerKind::InternationalAggregator => "international-aggregator",
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RateLimitSpec {
    pub requests_per_second: f64,
    pub burst: u32,
    pub cooldown_seconds: u64,
}

impl RateLimitSpec {
    pub fn to_rate_spec(&self) -> RateSpec {
        RateSpec {
            requests_per_second: self.requests_per_second,
            burst: self.burst,
            cooldown: Duration::from_secs(self.cooldown_seconds),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetrySpec {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_request_timeout_seconds")]
    pub request_timeout_seconds: u64,
}

impl Default for RetrySpec {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            request_timeout_seconds: default_request_timeout_seconds(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BreakerConfig {
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_failure_window_seconds")]
    pub failure_window_seconds: u64,
    #[serde(default = "default_reset_seconds")]
    pub reset_seconds: u64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            failure_window_seconds: default_failure_window_seconds(),
            reset_seconds: default_reset_seconds(),
        }
    }
}

impl BreakerConfig {
    pub fn to_breaker_spec(&self) -> BreakerSpec {
        BreakerSpec {
            failure_threshold: self.failure_threshold,
            failure_window: Duration::from_secs(self.failure_window_seconds),
            reset: Duration::from_secs(self.reset_seconds),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestMethod {
    Get,
    PostForm,
    PostJson,
}

/// How a search request is assembled for this site. Parameter values may use
/// the `{origin}`, `{destination}`, `{date}`, `{date_jalali}`,
/// `{return_date}`, `{adults}`, `{children}`, `{infants}`, `{cabin}` and
/// `{page}` placeholders.
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RequestSpec {
    pub method: RequestMethod,
    #[serde(default)]
    pub params: BTreeMap<String, String>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExtractionConfig {
    /// Locator selecting one result row per flight.
    pub container: String,
    /// Field name to locator, applied inside each container.
    pub fields: BTreeMap<String, String>,
    #[serde(default)]
    pub required: Vec<String>,
    #[serde(default)]
    pub default_currency: Option<String>,
    #[serde(default)]
    pub request: Option<RequestSpec>,
    /// Aggregators page through results; plain sites leave this at 1.
    #[serde(default = "default_one")]
    pub max_pages: u32,
    #[serde(default)]
    pub page_param: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DataValidation {
    pub price_min: u64,
    pub price_max: u64,
    #[serde(default = "default_duration_min")]
    pub duration_min: u32,
    #[serde(default = "default_duration_max")]
    pub duration_max: u32,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Monitoring {
    #[serde(default = "default_slow_request_ms")]
    pub slow_request_warn_ms: u64,
}

impl Default for Monitoring {
    fn default() -> Self {
        Self {
            slow_request_warn_ms: default_slow_request_ms(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AirlineEntry {
    pub name: String,
    pub iata: String,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PersianProcessing {
    #[serde(default)]
    pub persian_digits: bool,
    #[serde(default)]
    pub jalali_calendar: bool,
    #[serde(default)]
    pub airline_names: BTreeMap<String, AirlineEntry>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProxyConfig {
    pub url: String,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BrowserConfig {
    #[serde(default)]
    pub wait_selector: Option<String>,
    #[serde(default = "default_browser_wait_ms")]
    pub wait_ms: u64,
    #[serde(default = "default_page_memory_mb")]
    pub page_memory_budget_mb: u64,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SiteConfig {
    pub site_id: String,
    pub name: String,
    pub search_url: String,
    pub crawler_type: CrawlerKind,
    pub language: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub rate_limit: RateLimitSpec,
    pub extraction_config: ExtractionConfig,
    pub data_validation: DataValidation,
    #[serde(default)]
    pub error_handling: RetrySpec,
    #[serde(default)]
    pub breaker: BreakerConfig,
    #[serde(default)]
    pub monitoring: Monitoring,
    #[serde(default)]
    pub persian_processing: Option<PersianProcessing>,
    #[serde(default)]
    pub proxy_config: Option<ProxyConfig>,
    #[serde(default)]
    pub browser_config: Option<BrowserConfig>,
    #[serde(default)]
    pub b2b_credentials: Option<BTreeMap<String, String>>,
}

impl SiteConfig {
    /// Network authority (host[:port]) behind this site's search URL.
    pub fn host(&self) -> String {
        host_of(&self.search_url)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.error_handling.request_timeout_seconds)
    }

    /// Checks that serde cannot express: identifier shape, positive rates,
    /// sane extraction config.
    fn check(&self) -> Result<(), CrawlError> {
        if !SITE_ID_RE.is_match(&self.site_id) {
            return Err(CrawlError::new(
                ErrorKind::Config,
                &self.site_id,
                format!("site_id '{}' must match [a-z0-9_]+", self.site_id),
            ));
        }
        if self.rate_limit.requests_per_second <= 0.0 {
            return Err(CrawlError::new(
                ErrorKind::Config,
                &self.site_id,
                "rate_limit.requests_per_second must be positive",
            ));
        }
        if self.rate_limit.burst == 0 {
            return Err(CrawlError::new(
                ErrorKind::Config,
                &self.site_id,
                "rate_limit.burst must be at least 1",
            ));
        }
        if self.extraction_config.fields.is_empty() {
            return Err(CrawlError::new(
                ErrorKind::Config,
                &self.site_id,
                "extraction_config.fields is empty",
            ));
        }
        for required in &self.extraction_config.required {
            if !self.extraction_config.fields.contains_key(required) {
                return Err(CrawlError::new(
                    ErrorKind::Config,
                    &self.site_id,
                    format!("required field '{required}' has no locator"),
                ));
            }
        }
        if self.data_validation.price_min > self.data_validation.price_max {
            return Err(CrawlError::new(
                ErrorKind::Config,
                &self.site_id,
                "data_validation price_min exceeds price_max",
            ));
        }
        if host_of(&self.search_url).is_empty() {
            return Err(CrawlError::new(
                ErrorKind::Config,
                &self.site_id,
                format!("search_url '{}' has no host", self.search_url),
            ));
        }
        Ok(())
    }
}

/// Extract `host[:port]` from a URL without pulling in a URL crate.
pub fn host_of(url: &str) -> String {
    let rest = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))
        .unwrap_or(url);
    rest.split(['/', '?', '#'])
        .next()
        .unwrap_or("")
        .to_string()
}

/// Replace every `${NAME}` in the document's strings from the process
/// environment. Unresolved names fail the whole document.
fn resolve_placeholders(value: &mut Value, missing: &mut Vec<String>) {
    match value {
        Value::String(s) => {
            if PLACEHOLDER_RE.is_match(s) {
                let resolved = PLACEHOLDER_RE.replace_all(s, |caps: &regex::Captures| {
                    match std::env::var(&caps[1]) {
                        Ok(v) => v,
                        Err(_) => {
                            missing.push(caps[1].to_string());
                            String::new()
                        }
                    }
                });
                *s = resolved.into_owned();
            }
        }
        Value::Array(items) => {
            for item in items {
                resolve_placeholders(item, missing);
            }
        }
        Value::Object(map) => {
            for item in map.values_mut() {
                resolve_placeholders(item, missing);
            }
        }
        _ => {}
    }
}

/// Parse one site-config document from raw JSON text.
pub fn parse_site_config(raw: &str, origin: &str) -> Result<SiteConfig, CrawlError> {
    let mut doc: Value = serde_json::from_str(raw).map_err(|e| {
        CrawlError::new(ErrorKind::Config, "", format!("{origin}: invalid JSON"))
            .with_cause(e)
    })?;

    let mut missing = Vec::new();
    resolve_placeholders(&mut doc, &mut missing);
    if !missing.is_empty() {
        missing.sort();
        missing.dedup();
        return Err(CrawlError::new(
            ErrorKind::Config,
            "",
            format!(
                "{origin}: unresolved environment placeholders: {}",
                missing.join(", ")
            ),
        ));
    }

    let config: SiteConfig = serde_json::from_value(doc).map_err(|e| {
        CrawlError::new(ErrorKind::Config, "", format!("{origin}: schema violation"))
            .with_cause(e)
    })?;
    config.check()?;
    Ok(config)
}

/// Immutable set of site configs, keyed by site id.
#[derive(Clone, Debug, Default)]
pub struct ConfigStore {
    sites: BTreeMap<String, Arc<SiteConfig>>,
}

impl ConfigStore {
    /// Load every `*.json` document under `dir`.
    pub fn load_dir(dir: impl AsRef<Path>) -> Result<Self, CrawlError> {
        let dir = dir.as_ref();
        let entries = std::fs::read_dir(dir).map_err(|e| {
            CrawlError::new(
                ErrorKind::Config,
                "",
                format!("cannot read config directory {}", dir.display()),
            )
            .with_cause(e)
        })?;

        let mut store = Self::default();
        for entry in entries {
            let entry = entry.map_err(|e| {
                CrawlError::new(ErrorKind::Config, "", "cannot enumerate config directory")
                    .with_cause(e)
            })?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let raw = std::fs::read_to_string(&path).map_err(|e| {
                CrawlError::new(
                    ErrorKind::Config,
                    "",
                    format!("cannot read {}", path.display()),
                )
                .with_cause(e)
            })?;
            let config = parse_site_config(&raw, &path.display().to_string())?;
            store.insert(config)?;
        }
        tracing::info!("Loaded {} site configs from {}", store.len(), dir.display());
        Ok(store)
    }

    /// Build a store from in-memory documents, mainly for tests.
    pub fn from_documents(raws: &[&str]) -> Result<Self, CrawlError> {
        let mut store = Self::default();
        for (idx, raw) in raws.iter().enumerate() {
            let config = parse_site_config(raw, &format!("document #{idx}"))?;
            store.insert(config)?;
        }
        Ok(store)
    }

    fn insert(&mut self, config: SiteConfig) -> Result<(), CrawlError> {
        let id = config.site_id.clone();
        if self.sites.insert(id.clone(), Arc::new(config)).is_some() {
            return Err(CrawlError::new(
                ErrorKind::Config,
                &id,
                format!("duplicate site_id '{id}'"),
            ));
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.sites.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sites.is_empty()
    }

    pub fn get(&self, site_id: &str) -> Option<Arc<SiteConfig>> {
        self.sites.get(site_id).cloned()
    }

    pub fn all(&self) -> impl Iterator<Item = &Arc<SiteConfig>> {
        self.sites.values()
    }

    /// Sites the scheduler may dispatch. Disabled sites stay visible through
    /// `all()` but never run.
    pub fn enabled(&self) -> Vec<Arc<SiteConfig>> {
        self.sites
            .values()
            .filter(|c| c.enabled)
            .cloned()
            .collect()
    }
}

fn default_true() -> bool {
    true
}
fn default_one() -> u32 {
    1
}
fn default_max_attempts() -> u32 {
    3
}
fn default_base_delay_ms() -> u64 {
    1000
}
fn default_request_timeout_seconds() -> u64 {
    30
}
fn default_failure_threshold() -> u32 {
    5
}
fn default_failure_window_seconds() -> u64 {
    60
}
fn default_reset_seconds() -> u64 {
    300
}
fn default_duration_min() -> u32 {
    30
}
fn default_duration_max() -> u32 {
    1440
}
fn default_slow_request_ms() -> u64 {
    5000
}
fn default_browser_wait_ms() -> u64 {
    2000
}
fn default_page_memory_mb() -> u64 {
    256
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_doc(site_id: &str) -> String {
        format!(
            r#"{{
                "site_id": "{site_id}",
                "name": "Test Site",
                "search_url": "https://{site_id}.example.ir/search",
                "crawler_type": "persian-airline",
                "language": "fa",
                "rate_limit": {{"requests_per_second": 2.0, "burst": 5, "cooldown_seconds": 30}},
                "extraction_config": {{
                    "container": "div.flight-row",
                    "fields": {{
                        "airline": "div.airline",
                        "price": "span.price",
                        "departure_time": "span.dep"
                    }},
                    "required": ["airline", "price"]
                }},
                "data_validation": {{"price_min": 100000, "price_max": 100000000}}
            }}"#
        )
    }

    #[test]
    fn test_minimal_document_parses() {
        let config = parse_site_config(&minimal_doc("mahan_air"), "test").unwrap();
        assert_eq!(config.site_id, "mahan_air");
        assert_eq!(config.crawler_type, CrawlerKind::PersianAirline);
        assert!(config.enabled);
        assert_eq!(config.host(), "mahan_air.example.ir");
        assert_eq!(config.error_handling.max_attempts, 3);
        assert_eq!(config.breaker.failure_threshold, 5);
    }

    #[test]
    fn test_legacy_rate_limiting_key_rejected() {
        let doc = minimal_doc("legacy_site").replace("\"rate_limit\"", "\"rate_limiting\"");
        let err = parse_site_config(&doc, "test").unwrap_err();
        assert_eq!(err.kind, ErrorKind::Config);
    }

    #[test]
    fn test_bad_site_id_rejected() {
        let doc = minimal_doc("badid").replace("\"badid\"", "\"Bad-Id\"");
        assert!(parse_site_config(&doc, "test").is_err());
    }

    #[test]
    fn test_required_field_without_locator_rejected() {
        let doc = minimal_doc("some_site").replace(
            r#""required": ["airline", "price"]"#,
            r#""required": ["airline", "price", "cabin"]"#,
        );
        assert!(parse_site_config(&doc, "test").is_err());
    }

    #[test]
    fn test_placeholder_resolution() {
        // SAFETY: test-only process environment mutation.
        unsafe { std::env::set_var("PARVAZ_TEST_API_KEY", "k-123") };
        let doc = minimal_doc("api_site").replace(
            r#""data_validation""#,
            r#""b2b_credentials": {"api_key": "${PARVAZ_TEST_API_KEY}"},
               "data_validation""#,
        );
        let config = parse_site_config(&doc, "test").unwrap();
        assert_eq!(
            config.b2b_credentials.unwrap().get("api_key").unwrap(),
            "k-123"
        );

        let doc = minimal_doc("api_site2").replace(
            r#""data_validation""#,
            r#""b2b_credentials": {"api_key": "${PARVAZ_TEST_MISSING_VAR}"},
               "data_validation""#,
        );
        let err = parse_site_config(&doc, "test").unwrap_err();
        assert!(err.message.contains("PARVAZ_TEST_MISSING_VAR"));
    }

    #[test]
    fn test_host_of() {
        assert_eq!(host_of("https://www.alibaba.ir/flights?x=1"), "www.alibaba.ir");
        assert_eq!(host_of("http://api.example.ir:8443/v2"), "api.example.ir:8443");
        assert_eq!(host_of("https://mahan.aero"), "mahan.aero");
    }

    #[test]
    fn test_disabled_sites_visible_but_not_enabled() {
        let enabled = minimal_doc("site_a");
        let disabled = minimal_doc("site_b").replace(
            r#""language": "fa","#,
            r#""language": "fa", "enabled": false,"#,
        );
        let store = ConfigStore::from_documents(&[&enabled, &disabled]).unwrap();
        assert_eq!(store.len(), 2);
        let enabled_ids: Vec<_> = store
            .enabled()
            .iter()
            .map(|c| c.site_id.clone())
            .collect();
        assert_eq!(enabled_ids, vec!["site_a"]);
    }
}
