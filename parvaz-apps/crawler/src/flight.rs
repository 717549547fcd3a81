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

//! # Canonical Flight Record
//!
//! The single schema every site's output is normalised into, plus the
//! content-hash identity used for dedup and store upserts.

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, DurationRound, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::query::CabinClass;

/// Stable content-hash identity of a flight. Two records with the same
/// airline, flight number, route, minute-truncated departure, and cabin are
/// the same flight regardless of which site produced them.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FlightIdentity(String);

impl FlightIdentity {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for FlightIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Flight {
    pub airline_name: String,
    pub airline_code: String,
    pub flight_number: String,
    pub origin: String,
    pub destination: String,
    pub departure: DateTime<Utc>,
    pub arrival: DateTime<Utc>,
    pub duration_minutes: u32,
    /// Integer price in the site's native currency units.
    pub price: u64,
    pub currency: String,
    pub cabin: CabinClass,
    pub site_id: String,
    pub extracted_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub baggage_allowance: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fare_rules: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refund_policy: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub booking_class: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fare_basis: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub available_seats: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aircraft: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loyalty_miles: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub promotion_code: Option<String>,
    /// Which seller an aggregator sourced this record from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub booking_source: Option<String>,
    #[serde(default)]
    pub is_aggregated: bool,
}

impl Flight {
    pub fn identity(&self) -> FlightIdentity {
        let departure_minute = self
            .departure
            .duration_trunc(TimeDelta::minutes(1))
            .unwrap_or(self.departure);
        let mut hasher = Sha256::new();
        for part in [
            self.airline_code.as_str(),
            self.flight_number.as_str(),
            self.origin.as_str(),
            self.destination.as_str(),
            &departure_minute.to_rfc3339(),
            self.cabin.as_str_name(),
        ] {
            hasher.update(part.as_bytes());
            hasher.update([0u8]);
        }
        FlightIdentity(URL_SAFE_NO_PAD.encode(hasher.finalize()))
    }

    /// Deterministic result ordering: price ascending, then departure.
    pub fn sort_key(&self) -> (u64, DateTime<Utc>, String) {
        (self.price, self.departure, self.flight_number.clone())
    }
}

/// A partially extracted record, produced by a parsing strategy and finished
/// by the validator. Missing required fields are left `None` and reported as
/// typed rejects rather than panics.
#[derive(Clone, Debug)]
pub struct FlightDraft {
    pub airline_name: Option<String>,
    pub airline_code: Option<String>,
    /// False when airline canonicalisation found no mapping for the raw name.
    pub airline_known: bool,
    pub flight_number: Option<String>,
    pub origin: Option<String>,
    pub destination: Option<String>,
    pub departure: Option<DateTime<Utc>>,
    pub arrival: Option<DateTime<Utc>>,
    pub duration_minutes: Option<u32>,
    pub price: Option<u64>,
    pub currency: Option<String>,
    pub cabin: Option<CabinClass>,
    pub site_id: String,
    pub extracted_at: DateTime<Utc>,

    pub baggage_allowance: Option<String>,
    pub fare_rules: Option<String>,
    pub refund_policy: Option<String>,
    pub booking_class: Option<String>,
    pub fare_basis: Option<String>,
    pub available_seats: Option<u32>,
    pub aircraft: Option<String>,
    pub loyalty_miles: Option<u32>,
    pub promotion_code: Option<String>,
    pub booking_source: Option<String>,
    pub is_aggregated: bool,
}

impl FlightDraft {
    pub fn new(site_id: impl Into<String>, extracted_at: DateTime<Utc>) -> Self {
        Self {
            airline_name: None,
            airline_code: None,
            airline_known: true,
            flight_number: None,
            origin: None,
            destination: None,
            departure: None,
            arrival: None,
            duration_minutes: None,
            price: None,
            currency: None,
            cabin: None,
            site_id: site_id.into(),
            extracted_at,
            baggage_allowance: None,
            fare_rules: None,
            refund_policy: None,
            booking_class: None,
            fare_basis: None,
            available_seats: None,
            aircraft: None,
            loyalty_miles: None,
            promotion_code: None,
            booking_source: None,
            is_aggregated: false,
        }
    }

    /// Key used for in-parse dedup before the full identity exists.
    pub fn draft_key(&self) -> Option<(String, String, DateTime<Utc>, CabinClass)> {
        Some((
            self.airline_code.clone().or_else(|| self.airline_name.clone())?,
            self.flight_number.clone()?,
            self.departure?,
            self.cabin.unwrap_or_default(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample() -> Flight {
        Flight {
            airline_name: "Mahan Air".into(),
            airline_code: "W5".into(),
            flight_number: "W5-1186".into(),
            origin: "THR".into(),
            destination: "IST".into(),
            departure: Utc.with_ymd_and_hms(2026, 8, 2, 6, 30, 0).unwrap(),
            arrival: Utc.with_ymd_and_hms(2026, 8, 2, 9, 45, 0).unwrap(),
            duration_minutes: 195,
            price: 1_200_000,
            currency: "IRR".into(),
            cabin: CabinClass::Economy,
            site_id: "mahan_air".into(),
            extracted_at: Utc.with_ymd_and_hms(2026, 8, 1, 12, 0, 0).unwrap(),
            baggage_allowance: None,
            fare_rules: None,
            refund_policy: None,
            booking_class: None,
            fare_basis: None,
            available_seats: None,
            aircraft: None,
            loyalty_miles: None,
            promotion_code: None,
            booking_source: None,
            is_aggregated: false,
        }
    }

    #[test]
    fn test_identity_ignores_site_and_price() {
        let a = sample();
        let mut b = sample();
        b.site_id = "alibaba".into();
        b.price = 1_150_000;
        b.extracted_at = Utc.with_ymd_and_hms(2026, 8, 1, 13, 0, 0).unwrap();
        assert_eq!(a.identity(), b.identity());
    }

    #[test]
    fn test_identity_truncates_departure_to_minute() {
        let a = sample();
        let mut b = sample();
        b.departure = a.departure + chrono::Duration::seconds(42);
        assert_eq!(a.identity(), b.identity());

        let mut c = sample();
        c.departure = a.departure + chrono::Duration::minutes(1);
        assert_ne!(a.identity(), c.identity());
    }

    #[test]
    fn test_identity_changes_with_cabin() {
        let a = sample();
        let mut b = sample();
        b.cabin = CabinClass::Business;
        assert_ne!(a.identity(), b.identity());
    }
}
