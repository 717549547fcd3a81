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

//! # Parsing Strategies
//!
//! Turn a raw fetched document plus a site's extraction map into flight
//! drafts. Three strategies share one extraction engine and differ in the
//! normalisation flags they run with: `PersianParser` folds digits and reads
//! Jalali dates, `InternationalParser` expects ASCII/Gregorian input, and
//! `AggregatorParser` additionally tags records with their booking source.
//!
//! A malformed row never fails the parse; it is dropped and counted.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Duration as ChronoDuration, NaiveDate, NaiveTime, TimeZone, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::Html;
use serde_json::Value;

use crate::errors::CrawlError;
use crate::flight::FlightDraft;
use crate::locator::{ContainerLocator, Locator};
use crate::persian_text::{
    AirlineNames, extract_integer, normalize_digits, parse_clock, parse_jalali_date,
};
use crate::query::{CabinClass, SearchQuery};
use crate::site_config::{CrawlerKind, SiteConfig};

/// What the fetched document claims to be.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DocumentKind {
    Html,
    Json,
}

/// One fetched response bundle handed from `search` to `parse_list`.
#[derive(Clone, Debug)]
pub struct RawDocument {
    pub url: String,
    pub body: String,
    pub kind: DocumentKind,
    pub fetched_at: DateTime<Utc>,
    pub bytes: u64,
}

impl RawDocument {
    pub fn new(url: impl Into<String>, body: impl Into<String>, kind: DocumentKind) -> Self {
        let body = body.into();
        let bytes = body.len() as u64;
        Self {
            url: url.into(),
            body,
            kind,
            fetched_at: Utc::now(),
            bytes,
        }
    }
}

/// Which page of the site flow a document came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParsePhase {
    SearchResults,
    DetailPage,
    ErrorPage,
}

#[derive(Clone, Debug, Default)]
pub struct ParseDiagnostics {
    pub rows_seen: usize,
    pub rows_dropped: usize,
    pub zero_price_dropped: usize,
    pub duplicates_collapsed: usize,
    pub warnings: Vec<String>,
}

impl ParseDiagnostics {
    pub fn merge(&mut self, other: ParseDiagnostics) {
        self.rows_seen += other.rows_seen;
        self.rows_dropped += other.rows_dropped;
        self.zero_price_dropped += other.zero_price_dropped;
        self.duplicates_collapsed += other.duplicates_collapsed;
        self.warnings.extend(other.warnings);
    }
}

static DURATION_H_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d+)\s*(?:h|hr|ساعت)").unwrap());
static DURATION_M_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d+)\s*(?:m|min|دقیقه)").unwrap());
static BARE_MINUTES_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d+$").unwrap());

/// Parse `"2h 30m"`, `"۲ ساعت و ۳۰ دقیقه"`, or a bare minute count.
pub fn parse_duration_minutes(raw: &str) -> Option<u32> {
    let folded = normalize_digits(raw.trim());
    if BARE_MINUTES_RE.is_match(&folded) {
        return folded.parse().ok();
    }
    let hours: u32 = DURATION_H_RE
        .captures(&folded)
        .and_then(|caps| caps[1].parse().ok())
        .unwrap_or(0);
    let minutes: u32 = DURATION_M_RE
        .captures(&folded)
        .and_then(|caps| caps[1].parse().ok())
        .unwrap_or(0);
    (hours != 0 || minutes != 0).then_some(hours * 60 + minutes)
}

/// Cabin names as Iranian sites print them, on top of the English spellings.
fn parse_cabin(raw: &str) -> Option<CabinClass> {
    if let Some(cabin) = CabinClass::from_str_name(raw) {
        return Some(cabin);
    }
    match normalize_digits(raw.trim()).as_str() {
        "اکونومی" => Some(CabinClass::Economy),
        "بیزینس" | "بیزنس" => Some(CabinClass::Business),
        "فرست" => Some(CabinClass::First),
        _ => None,
    }
}

/// Compiled extraction map for one site.
#[derive(Clone, Debug)]
struct FieldMap {
    container: ContainerLocator,
    fields: BTreeMap<String, Locator>,
}

impl FieldMap {
    fn compile(config: &SiteConfig) -> Result<Self, CrawlError> {
        let container = ContainerLocator::parse(&config.extraction_config.container, &config.site_id)?;
        let mut fields = BTreeMap::new();
        for (name, raw) in &config.extraction_config.fields {
            fields.insert(name.clone(), Locator::parse(raw, &config.site_id)?);
        }
        Ok(Self { container, fields })
    }

    /// Raw string per configured field, for every row of the document.
    fn extract_rows(&self, doc: &RawDocument) -> Result<Vec<HashMap<String, String>>, String> {
        match (doc.kind, &self.container) {
            (DocumentKind::Html, ContainerLocator::Css(selector)) => {
                let html = Html::parse_document(&doc.body);
                let mut rows = Vec::new();
                for element in html.select(selector) {
                    let mut row = HashMap::new();
                    for (name, locator) in &self.fields {
                        if let Some(value) = locator.extract_html(element) {
                            row.insert(name.clone(), value);
                        }
                    }
                    rows.push(row);
                }
                Ok(rows)
            }
            (DocumentKind::Json, ContainerLocator::Json(pointer)) => {
                let value: Value = serde_json::from_str(&doc.body)
                    .map_err(|e| format!("response is not JSON: {e}"))?;
                let records = value
                    .pointer(pointer)
                    .and_then(Value::as_array)
                    .ok_or_else(|| format!("no record array at '{pointer}'"))?;
                let mut rows = Vec::new();
                for record in records {
                    let mut row = HashMap::new();
                    for (name, locator) in &self.fields {
                        if let Some(value) = locator.extract_json(record) {
                            row.insert(name.clone(), value);
                        }
                    }
                    rows.push(row);
                }
                Ok(rows)
            }
            (DocumentKind::Html, ContainerLocator::Json(_)) => {
                Err("JSON container locator against an HTML document".to_string())
            }
            (DocumentKind::Json, ContainerLocator::Css(_)) => {
                Err("CSS container locator against a JSON document".to_string())
            }
        }
    }
}

/// Normalisation settings shared by the three strategies.
#[derive(Clone, Debug)]
struct Composer {
    site_id: String,
    default_currency: Option<String>,
    jalali_dates: bool,
    airline_names: AirlineNames,
    aggregated: bool,
    /// Booking source when an aggregator row does not name its seller.
    fallback_source: Option<String>,
}

impl Composer {
    fn compose(
        &self,
        row: &HashMap<String, String>,
        query: &SearchQuery,
        extracted_at: DateTime<Utc>,
    ) -> Result<FlightDraft, String> {
        let mut draft = FlightDraft::new(&self.site_id, extracted_at);

        if let Some(raw) = row.get("airline") {
            let resolved = self.airline_names.resolve(raw);
            draft.airline_known = resolved.known;
            draft.airline_name = Some(resolved.canonical_name);
            draft.airline_code = (!resolved.iata_code.is_empty()).then_some(resolved.iata_code);
        }
        if let Some(code) = row.get("airline_code") {
            draft.airline_code = Some(normalize_digits(code).to_uppercase());
        }
        if let Some(number) = row.get("flight_number") {
            draft.flight_number = Some(normalize_digits(number));
        }

        draft.origin = Some(
            row.get("origin")
                .map(|s| s.to_uppercase())
                .unwrap_or_else(|| query.origin.clone()),
        );
        draft.destination = Some(
            row.get("destination")
                .map(|s| s.to_uppercase())
                .unwrap_or_else(|| query.destination.clone()),
        );

        let base_date = match row.get("date") {
            Some(raw) if self.jalali_dates => {
                parse_jalali_date(raw).map_err(|e| format!("bad date '{raw}': {e}"))?
            }
            Some(raw) => {
                let folded = normalize_digits(raw);
                NaiveDate::parse_from_str(folded.trim(), "%Y-%m-%d")
                    .map_err(|e| format!("bad date '{raw}': {e}"))?
            }
            None => query.departure_date,
        };

        if let Some(raw) = row.get("departure_time") {
            let (hour, minute) = parse_clock(raw).map_err(|e| e.to_string())?;
            let time = NaiveTime::from_hms_opt(hour, minute, 0).unwrap();
            draft.departure = Some(Utc.from_utc_datetime(&base_date.and_time(time)));
        }
        if let Some(raw) = row.get("arrival_time") {
            let (hour, minute) = parse_clock(raw).map_err(|e| e.to_string())?;
            let time = NaiveTime::from_hms_opt(hour, minute, 0).unwrap();
            let mut arrival = Utc.from_utc_datetime(&base_date.and_time(time));
            // An arrival clock before departure means the flight lands the
            // next day.
            if let Some(departure) = draft.departure {
                if arrival <= departure {
                    arrival += ChronoDuration::days(1);
                }
            }
            draft.arrival = Some(arrival);
        }

        if let Some(raw) = row.get("duration") {
            draft.duration_minutes = parse_duration_minutes(raw);
        }

        if let Some(raw) = row.get("price") {
            let price = extract_integer(raw).map_err(|e| e.to_string())?;
            draft.price = Some(price);
        }
        draft.currency = row
            .get("currency")
            .map(|c| c.trim().to_uppercase())
            .or_else(|| self.default_currency.clone());

        draft.cabin = row
            .get("cabin_class")
            .and_then(|raw| parse_cabin(raw))
            .or(Some(query.cabin));

        draft.baggage_allowance = row.get("baggage").cloned();
        draft.fare_rules = row.get("fare_rules").cloned();
        draft.refund_policy = row.get("refund_policy").cloned();
        draft.booking_class = row.get("booking_class").cloned();
        draft.fare_basis = row.get("fare_basis").cloned();
        draft.aircraft = row.get("aircraft").cloned();
        draft.promotion_code = row.get("promotion_code").cloned();
        draft.available_seats = row
            .get("seats")
            .and_then(|raw| extract_integer(raw).ok())
            .map(|n| n as u32);
        draft.loyalty_miles = row
            .get("loyalty_miles")
            .and_then(|raw| extract_integer(raw).ok())
            .map(|n| n as u32);

        if self.aggregated {
            draft.is_aggregated = true;
            draft.booking_source = row
                .get("booking_source")
                .cloned()
                .or_else(|| self.fallback_source.clone());
        }

        Ok(draft)
    }
}

#[derive(Clone, Debug)]
struct RecordEngine {
    fields: FieldMap,
    composer: Composer,
}

impl RecordEngine {
    fn parse_list(
        &self,
        doc: &RawDocument,
        phase: ParsePhase,
        query: &SearchQuery,
    ) -> (Vec<FlightDraft>, ParseDiagnostics) {
        let mut diagnostics = ParseDiagnostics::default();

        if phase == ParsePhase::ErrorPage {
            diagnostics
                .warnings
                .push(format!("error page from {}", doc.url));
            return (Vec::new(), diagnostics);
        }

        let rows = match self.fields.extract_rows(doc) {
            Ok(rows) => rows,
            Err(message) => {
                diagnostics.warnings.push(message);
                return (Vec::new(), diagnostics);
            }
        };

        // Insertion-ordered dedup: a later row with the same draft key
        // replaces the earlier one (later extraction wins).
        let mut drafts: Vec<FlightDraft> = Vec::new();
        let mut seen: HashMap<_, usize> = HashMap::new();

        for row in &rows {
            diagnostics.rows_seen += 1;
            let draft = match self.composer.compose(row, query, doc.fetched_at) {
                Ok(draft) => draft,
                Err(warning) => {
                    diagnostics.rows_dropped += 1;
                    diagnostics.warnings.push(warning);
                    continue;
                }
            };
            if draft.price == Some(0) {
                // Zero price means "call us" / not bookable online.
                diagnostics.zero_price_dropped += 1;
                continue;
            }
            if !draft.airline_known {
                if let Some(name) = &draft.airline_name {
                    diagnostics
                        .warnings
                        .push(format!("unknown airline name '{name}'"));
                }
            }
            match draft.draft_key() {
                Some(key) => match seen.get(&key) {
                    Some(&idx) => {
                        diagnostics.duplicates_collapsed += 1;
                        drafts[idx] = draft;
                    }
                    None => {
                        seen.insert(key, drafts.len());
                        drafts.push(draft);
                    }
                },
                None => drafts.push(draft),
            }
        }

        (drafts, diagnostics)
    }
}

/// Strategy dispatch, selected by the factory from the site's crawler kind
/// and language tag.
#[derive(Clone, Debug)]
pub enum ParseStrategy {
    Persian(Box<RecordEngineHandle>),
    International(Box<RecordEngineHandle>),
    Aggregator(Box<RecordEngineHandle>),
}

/// Opaque wrapper so the engine stays private to this module.
#[derive(Clone, Debug)]
pub struct RecordEngineHandle {
    engine: RecordEngine,
}

impl ParseStrategy {
    pub fn for_config(config: &SiteConfig) -> Result<Self, CrawlError> {
        let fields = FieldMap::compile(config)?;

        let mut airline_names = AirlineNames::builtin();
        let persian = config.persian_processing.as_ref();
        if let Some(processing) = persian {
            for (variant, entry) in &processing.airline_names {
                airline_names.insert(variant, &entry.name, &entry.iata);
            }
        }

        let persian_site = matches!(config.crawler_type, CrawlerKind::PersianAirline)
            || config.language.starts_with("fa");
        let aggregated = matches!(config.crawler_type, CrawlerKind::InternationalAggregator);

        let composer = Composer {
            site_id: config.site_id.clone(),
            default_currency: config
                .extraction_config
                .default_currency
                .as_ref()
                .map(|c| c.to_uppercase()),
            jalali_dates: persian
                .map(|p| p.jalali_calendar)
                .unwrap_or(persian_site),
            airline_names,
            aggregated,
            fallback_source: aggregated.then(|| config.name.clone()),
        };

        let handle = Box::new(RecordEngineHandle {
            engine: RecordEngine { fields, composer },
        });
        Ok(if aggregated {
            ParseStrategy::Aggregator(handle)
        } else if persian_site {
            ParseStrategy::Persian(handle)
        } else {
            ParseStrategy::International(handle)
        })
    }

    pub fn parse_list(
        &self,
        doc: &RawDocument,
        phase: ParsePhase,
        query: &SearchQuery,
    ) -> (Vec<FlightDraft>, ParseDiagnostics) {
        let handle = match self {
            ParseStrategy::Persian(h)
            | ParseStrategy::International(h)
            | ParseStrategy::Aggregator(h) => h,
        };
        handle.engine.parse_list(doc, phase, query)
    }

    pub fn name(&self) -> &'static str {
        match self {
            ParseStrategy::Persian(_) => "persian",
            ParseStrategy::International(_) => "international",
            ParseStrategy::Aggregator(_) => "aggregator",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duration_forms() {
        assert_eq!(parse_duration_minutes("2h 30m"), Some(150));
        assert_eq!(parse_duration_minutes("195"), Some(195));
        assert_eq!(parse_duration_minutes("۳ ساعت و ۱۵ دقیقه"), Some(195));
        assert_eq!(parse_duration_minutes("45 min"), Some(45));
        assert_eq!(parse_duration_minutes("soon"), None);
    }

    #[test]
    fn test_cabin_forms() {
        assert_eq!(parse_cabin("Economy"), Some(CabinClass::Economy));
        assert_eq!(parse_cabin("بیزینس"), Some(CabinClass::Business));
        assert_eq!(parse_cabin("lie-flat pod"), None);
    }
}
