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

//! # Field Locators
//!
//! One locator dialect for both document shapes the adapters fetch:
//! CSS selectors (optionally `selector@attribute`) for HTML, JSON pointers
//! (leading `/`) for API payloads. Configs stay plain strings; locators are
//! compiled once per site at adapter construction.

use scraper::{ElementRef, Selector};
use serde_json::Value;

use crate::errors::{CrawlError, ErrorKind};

#[derive(Clone, Debug)]
pub enum Locator {
    Css {
        selector: Selector,
        attr: Option<String>,
    },
    Json {
        pointer: String,
    },
}

impl Locator {
    /// Compile a locator string. `span.price@data-value` reads an attribute,
    /// `/price/amount` is a JSON pointer, anything else is a CSS selector
    /// whose text content is taken.
    pub fn parse(raw: &str, site_id: &str) -> Result<Self, CrawlError> {
        if raw.starts_with('/') {
            return Ok(Locator::Json {
                pointer: raw.to_string(),
            });
        }
        let (css, attr) = match raw.rsplit_once('@') {
            Some((css, attr)) if !attr.contains([' ', '.', '#']) => {
                (css, Some(attr.to_string()))
            }
            _ => (raw, None),
        };
        let selector = Selector::parse(css).map_err(|e| {
            CrawlError::new(
                ErrorKind::Config,
                site_id,
                format!("invalid CSS selector '{css}': {e}"),
            )
        })?;
        Ok(Locator::Css { selector, attr })
    }

    /// First match inside an HTML element, as trimmed text or attribute.
    pub fn extract_html(&self, element: ElementRef<'_>) -> Option<String> {
        match self {
            Locator::Css { selector, attr } => {
                let found = element.select(selector).next()?;
                let value = match attr {
                    Some(attr) => found.value().attr(attr)?.to_string(),
                    None => found.text().collect::<String>(),
                };
                let trimmed = value.trim().to_string();
                (!trimmed.is_empty()).then_some(trimmed)
            }
            Locator::Json { .. } => None,
        }
    }

    /// Pointer lookup inside one JSON record; scalars are stringified.
    pub fn extract_json(&self, record: &Value) -> Option<String> {
        match self {
            Locator::Json { pointer } => match record.pointer(pointer)? {
                Value::String(s) => {
                    let trimmed = s.trim().to_string();
                    (!trimmed.is_empty()).then_some(trimmed)
                }
                Value::Number(n) => Some(n.to_string()),
                Value::Bool(b) => Some(b.to_string()),
                _ => None,
            },
            Locator::Css { .. } => None,
        }
    }

    /// Whether this locator can run against a JSON document.
    pub fn is_json(&self) -> bool {
        matches!(self, Locator::Json { .. })
    }
}

/// A container locator: rows in an HTML result list, or the array holding
/// records in a JSON payload.
#[derive(Clone, Debug)]
pub enum ContainerLocator {
    Css(Selector),
    Json(String),
}

impl ContainerLocator {
    pub fn parse(raw: &str, site_id: &str) -> Result<Self, CrawlError> {
        if raw.starts_with('/') {
            return Ok(ContainerLocator::Json(raw.to_string()));
        }
        let selector = Selector::parse(raw).map_err(|e| {
            CrawlError::new(
                ErrorKind::Config,
                site_id,
                format!("invalid container selector '{raw}': {e}"),
            )
        })?;
        Ok(ContainerLocator::Css(selector))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scraper::Html;

    #[test]
    fn test_css_text_and_attr() {
        let html = Html::parse_fragment(
            r#"<div class="row"><span class="price" data-value="950000">۹۵۰,۰۰۰ ریال</span></div>"#,
        );
        let root = html.root_element();

        let text = Locator::parse("span.price", "test").unwrap();
        assert_eq!(text.extract_html(root).unwrap(), "۹۵۰,۰۰۰ ریال");

        let attr = Locator::parse("span.price@data-value", "test").unwrap();
        assert_eq!(attr.extract_html(root).unwrap(), "950000");
    }

    #[test]
    fn test_json_pointer() {
        let record: Value = serde_json::json!({
            "fare": {"amount": 1200000, "currency": "IRR"},
            "flightNo": "W5-1186"
        });
        let amount = Locator::parse("/fare/amount", "test").unwrap();
        assert_eq!(amount.extract_json(&record).unwrap(), "1200000");
        let number = Locator::parse("/flightNo", "test").unwrap();
        assert_eq!(number.extract_json(&record).unwrap(), "W5-1186");
        let missing = Locator::parse("/fare/tax", "test").unwrap();
        assert!(missing.extract_json(&record).is_none());
    }

    #[test]
    fn test_invalid_selector_is_config_error() {
        let err = Locator::parse("div..bad[", "some_site").unwrap_err();
        assert_eq!(err.kind, ErrorKind::Config);
        assert_eq!(err.site_id, "some_site");
    }
}
