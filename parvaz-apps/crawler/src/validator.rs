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

//! # Flight Validation
//!
//! Finishes a draft into a canonical `Flight` or rejects it with a typed
//! reason the scheduler can count per site. Rejection is data hygiene, not
//! an error path: a site returning garbage rows still completes.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use once_cell::sync::Lazy;
use thiserror::Error;

use crate::flight::{Flight, FlightDraft, FlightIdentity};
use crate::query::is_iata;
use crate::site_config::SiteConfig;

/// Clock skew allowed between the site's departure time and our wall clock,
/// in minutes.
const DEPARTURE_SKEW_MINUTES: i64 = 15;
/// Declared duration may differ from (arrival - departure) by this much.
const DURATION_TOLERANCE_MINUTES: i64 = 2;

/// Currencies the validator accepts as-is.
static KNOWN_CURRENCIES: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "IRR", "USD", "EUR", "GBP", "AED", "TRY", "IQD", "OMR", "QAR", "SAR", "KWD", "BHD",
        "AFN", "AMD", "AZN", "PKR", "RUB", "CNY", "INR",
    ]
    .into_iter()
    .collect()
});

/// Site-side spellings folded onto ISO-4217 codes.
static CURRENCY_ALIASES: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    [
        ("RIAL", "IRR"),
        ("RIALS", "IRR"),
        ("TOMAN", "IRR"),
        ("ریال", "IRR"),
        ("تومان", "IRR"),
        ("درهم", "AED"),
        ("لیر", "TRY"),
    ]
    .into_iter()
    .collect()
});

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum RejectReason {
    #[error("required field '{0}' is missing")]
    MissingField(&'static str),
    #[error("'{0}' is not a three-letter IATA code")]
    BadAirportCode(String),
    #[error("price {price} outside site range {min}..={max}")]
    PriceOutOfRange { price: u64, min: u64, max: u64 },
    #[error("duration {minutes} outside range {min}..={max}")]
    DurationOutOfRange { minutes: u32, min: u32, max: u32 },
    #[error("departure is in the past")]
    DepartureInPast,
    #[error("arrival is not after departure")]
    ArrivalNotAfterDeparture,
    #[error("declared duration {declared} disagrees with computed {computed}")]
    DurationMismatch { declared: u32, computed: i64 },
    #[error("unknown currency '{0}'")]
    UnknownCurrency(String),
}

/// One dropped record, attributed to the site that produced it.
#[derive(Clone, Debug)]
pub struct ValidationReject {
    pub site_id: String,
    pub reason: RejectReason,
}

/// Per-site validator holding the value ranges its config declared.
#[derive(Clone, Debug)]
pub struct FlightValidator {
    site_id: String,
    price_min: u64,
    price_max: u64,
    duration_min: u32,
    duration_max: u32,
}

impl FlightValidator {
    pub fn for_site(config: &SiteConfig) -> Self {
        Self {
            site_id: config.site_id.clone(),
            price_min: config.data_validation.price_min,
            price_max: config.data_validation.price_max,
            duration_min: config.data_validation.duration_min,
            duration_max: config.data_validation.duration_max,
        }
    }

    fn reject(&self, reason: RejectReason) -> ValidationReject {
        ValidationReject {
            site_id: self.site_id.clone(),
            reason,
        }
    }

    /// Promote a draft into a canonical flight, or reject it.
    pub fn validate(
        &self,
        draft: FlightDraft,
        now: DateTime<Utc>,
    ) -> Result<Flight, ValidationReject> {
        let airline_name = draft
            .airline_name
            .filter(|name| !name.is_empty())
            .ok_or_else(|| self.reject(RejectReason::MissingField("airline")))?;
        let flight_number = draft
            .flight_number
            .filter(|number| !number.is_empty())
            .ok_or_else(|| self.reject(RejectReason::MissingField("flight_number")))?;
        let origin = draft
            .origin
            .ok_or_else(|| self.reject(RejectReason::MissingField("origin")))?;
        let destination = draft
            .destination
            .ok_or_else(|| self.reject(RejectReason::MissingField("destination")))?;
        let departure = draft
            .departure
            .ok_or_else(|| self.reject(RejectReason::MissingField("departure_time")))?;
        let arrival = draft
            .arrival
            .ok_or_else(|| self.reject(RejectReason::MissingField("arrival_time")))?;
        let price = draft
            .price
            .ok_or_else(|| self.reject(RejectReason::MissingField("price")))?;
        let raw_currency = draft
            .currency
            .ok_or_else(|| self.reject(RejectReason::MissingField("currency")))?;
        let cabin = draft
            .cabin
            .ok_or_else(|| self.reject(RejectReason::MissingField("cabin_class")))?;

        if !is_iata(&origin) {
            return Err(self.reject(RejectReason::BadAirportCode(origin)));
        }
        if !is_iata(&destination) {
            return Err(self.reject(RejectReason::BadAirportCode(destination)));
        }

        let currency = normalize_currency(&raw_currency)
            .ok_or_else(|| self.reject(RejectReason::UnknownCurrency(raw_currency)))?;

        if price < self.price_min || price > self.price_max {
            return Err(self.reject(RejectReason::PriceOutOfRange {
                price,
                min: self.price_min,
                max: self.price_max,
            }));
        }

        if departure < now - ChronoDuration::minutes(DEPARTURE_SKEW_MINUTES) {
            return Err(self.reject(RejectReason::DepartureInPast));
        }
        if arrival <= departure {
            return Err(self.reject(RejectReason::ArrivalNotAfterDeparture));
        }

        let computed = (arrival - departure).num_minutes();
        let duration_minutes = match draft.duration_minutes {
            Some(declared) => {
                if (computed - declared as i64).abs() > DURATION_TOLERANCE_MINUTES {
                    return Err(self.reject(RejectReason::DurationMismatch {
                        declared,
                        computed,
                    }));
                }
                declared
            }
            None => computed as u32,
        };
        if duration_minutes < self.duration_min || duration_minutes > self.duration_max {
            return Err(self.reject(RejectReason::DurationOutOfRange {
                minutes: duration_minutes,
                min: self.duration_min,
                max: self.duration_max,
            }));
        }

        // A resolved code is preferred; unknown airlines keep an empty code
        // and were already flagged in parse diagnostics.
        let airline_code = draft.airline_code.unwrap_or_default();

        Ok(Flight {
            airline_name,
            airline_code,
            flight_number,
            origin,
            destination,
            departure,
            arrival,
            duration_minutes,
            price,
            currency,
            cabin,
            site_id: draft.site_id,
            extracted_at: draft.extracted_at,
            baggage_allowance: draft.baggage_allowance,
            fare_rules: draft.fare_rules,
            refund_policy: draft.refund_policy,
            booking_class: draft.booking_class,
            fare_basis: draft.fare_basis,
            available_seats: draft.available_seats,
            aircraft: draft.aircraft,
            loyalty_miles: draft.loyalty_miles,
            promotion_code: draft.promotion_code,
            booking_source: draft.booking_source,
            is_aggregated: draft.is_aggregated,
        })
    }
}

/// Fold a raw currency token onto a known ISO-4217 code.
pub fn normalize_currency(raw: &str) -> Option<String> {
    let token = raw.trim().to_uppercase();
    if KNOWN_CURRENCIES.contains(token.as_str()) {
        return Some(token);
    }
    CURRENCY_ALIASES
        .get(raw.trim())
        .or_else(|| CURRENCY_ALIASES.get(token.as_str()))
        .map(|code| code.to_string())
}

/// Cross-site dedup by flight identity, keeping the cheapest offer for each.
/// Input order is irrelevant; output is unsorted.
pub fn dedup_by_identity(flights: Vec<Flight>) -> Vec<Flight> {
    let mut best: HashMap<FlightIdentity, Flight> = HashMap::new();
    for flight in flights {
        let identity = flight.identity();
        match best.get(&identity) {
            Some(existing) if existing.price <= flight.price => {}
            _ => {
                best.insert(identity, flight);
            }
        }
    }
    best.into_values().collect()
}
