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

//! # Search Query
//!
//! The crawl request: route, dates, passengers, cabin. Validated once at the
//! scheduler boundary, then shared read-only with every site worker.

use anyhow::{Result, ensure};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CabinClass {
    #[serde(alias = "Economy")]
    Economy,
    #[serde(alias = "PremiumEconomy")]
    PremiumEconomy,
    #[serde(alias = "Business")]
    Business,
    #[serde(alias = "First")]
    First,
}

impl Default for CabinClass {
    fn default() -> Self {
        CabinClass::Economy
    }
}

impl CabinClass {
    pub fn from_str_name(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "economy" | "eco" => Some(CabinClass::Economy),
            "premium_economy" | "premium" => Some(CabinClass::PremiumEconomy),
            "business" => Some(CabinClass::Business),
            "first" => Some(CabinClass::First),
            _ => None,
        }
    }

    pub fn as_str_name(&self) -> &'static str {
        match self {
            CabinClass::Economy => "economy",
            CabinClass::PremiumEconomy => "premium_economy",
            CabinClass::Business => "business",
            CabinClass::First => "first",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TripType {
    #[serde(alias = "one-way")]
    OneWay,
    #[serde(alias = "round-trip")]
    RoundTrip,
    #[serde(alias = "multi-city")]
    MultiCity,
}

impl Default for TripType {
    fn default() -> Self {
        TripType::OneWay
    }
}

impl TripType {
    pub fn from_str_name(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "one_way" | "oneway" | "one" => Some(TripType::OneWay),
            "round_trip" | "roundtrip" | "round" => Some(TripType::RoundTrip),
            "multi_city" | "multicity" | "multi" => Some(TripType::MultiCity),
            _ => None,
        }
    }

    pub fn as_str_name(&self) -> &'static str {
        match self {
            TripType::OneWay => "one_way",
            TripType::RoundTrip => "round_trip",
            TripType::MultiCity => "multi_city",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PassengerCounts {
    pub adults: u32,
    #[serde(default)]
    pub children: u32,
    #[serde(default)]
    pub infants: u32,
}

impl Default for PassengerCounts {
    fn default() -> Self {
        Self {
            adults: 1,
            children: 0,
            infants: 0,
        }
    }
}

impl PassengerCounts {
    pub fn total(&self) -> u32 {
        self.adults + self.children + self.infants
    }
}

/// One leg of a multi-city trip; executed as an independent one-way crawl.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteLeg {
    pub origin: String,
    pub destination: String,
    pub date: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchQuery {
    pub origin: String,
    pub destination: String,
    pub departure_date: NaiveDate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub return_date: Option<NaiveDate>,
    #[serde(default)]
    pub passengers: PassengerCounts,
    #[serde(default)]
    pub cabin: CabinClass,
    #[serde(default)]
    pub trip_type: TripType,
    /// Legs for multi-city trips; empty otherwise.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub legs: Vec<RouteLeg>,
}

/// Three uppercase ASCII letters.
pub fn is_iata(code: &str) -> bool {
    code.len() == 3 && code.bytes().all(|b| b.is_ascii_uppercase())
}

impl SearchQuery {
    pub fn builder(
        origin: impl Into<String>,
        destination: impl Into<String>,
        departure_date: NaiveDate,
    ) -> SearchQueryBuilder {
        SearchQueryBuilder {
            query: SearchQuery {
                origin: origin.into(),
                destination: destination.into(),
                departure_date,
                return_date: None,
                passengers: PassengerCounts::default(),
                cabin: CabinClass::Economy,
                trip_type: TripType::OneWay,
                legs: Vec::new(),
            },
        }
    }

    /// Check the query invariants against `today` (query-receipt time).
    pub fn validate(&self, today: NaiveDate) -> Result<()> {
        ensure!(is_iata(&self.origin), "origin '{}' is not an IATA code", self.origin);
        ensure!(
            is_iata(&self.destination),
            "destination '{}' is not an IATA code",
            self.destination
        );
        ensure!(
            self.origin != self.destination,
            "origin and destination are both {}",
            self.origin
        );
        ensure!(
            self.departure_date >= today,
            "departure date {} is in the past",
            self.departure_date
        );
        ensure!(self.passengers.adults >= 1, "at least one adult is required");
        ensure!(
            self.passengers.infants <= self.passengers.adults,
            "cannot have more infants ({}) than adults ({})",
            self.passengers.infants,
            self.passengers.adults
        );

        if let Some(return_date) = self.return_date {
            ensure!(
                return_date >= self.departure_date,
                "return date {} is before departure {}",
                return_date,
                self.departure_date
            );
        }
        if self.trip_type == TripType::RoundTrip {
            ensure!(
                self.return_date.is_some(),
                "round trip requires a return date"
            );
        }
        if self.trip_type == TripType::MultiCity {
            ensure!(!self.legs.is_empty(), "multi-city trip has no legs");
            for leg in &self.legs {
                ensure!(
                    is_iata(&leg.origin) && is_iata(&leg.destination),
                    "leg {} -> {} has a malformed airport code",
                    leg.origin,
                    leg.destination
                );
                ensure!(leg.date >= today, "leg date {} is in the past", leg.date);
            }
        }
        Ok(())
    }

    /// A copy of this query moved to a different departure date, used by the
    /// date-range expansion.
    pub fn with_departure(&self, date: NaiveDate) -> SearchQuery {
        SearchQuery {
            departure_date: date,
            ..self.clone()
        }
    }

    /// Multi-city trips decompose into independent one-way queries.
    pub fn multi_city_legs(&self) -> Vec<SearchQuery> {
        self.legs
            .iter()
            .map(|leg| SearchQuery {
                origin: leg.origin.clone(),
                destination: leg.destination.clone(),
                departure_date: leg.date,
                return_date: None,
                passengers: self.passengers,
                cabin: self.cabin,
                trip_type: TripType::OneWay,
                legs: Vec::new(),
            })
            .collect()
    }

    pub fn route_label(&self) -> String {
        format!("{}->{}", self.origin, self.destination)
    }
}

#[derive(Clone)]
pub struct SearchQueryBuilder {
    query: SearchQuery,
}

impl SearchQueryBuilder {
    pub fn return_date(mut self, date: NaiveDate) -> Self {
        self.query.return_date = Some(date);
        self.query.trip_type = TripType::RoundTrip;
        self
    }

    pub fn passengers(mut self, passengers: PassengerCounts) -> Self {
        self.query.passengers = passengers;
        self
    }

    pub fn cabin(mut self, cabin: CabinClass) -> Self {
        self.query.cabin = cabin;
        self
    }

    pub fn trip_type(mut self, trip_type: TripType) -> Self {
        self.query.trip_type = trip_type;
        self
    }

    pub fn legs(mut self, legs: Vec<RouteLeg>) -> Self {
        self.query.legs = legs;
        self.query.trip_type = TripType::MultiCity;
        self
    }

    pub fn build(self, today: NaiveDate) -> Result<SearchQuery> {
        self.query.validate(today)?;
        Ok(self.query)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 8, 1).unwrap()
    }

    #[test]
    fn test_valid_one_way() {
        let query = SearchQuery::builder("THR", "IST", today())
            .cabin(CabinClass::Business)
            .build(today())
            .unwrap();
        assert_eq!(query.trip_type, TripType::OneWay);
        assert_eq!(query.route_label(), "THR->IST");
    }

    #[test]
    fn test_same_airports_rejected() {
        let result = SearchQuery::builder("THR", "THR", today()).build(today());
        assert!(result.is_err());
    }

    #[test]
    fn test_past_departure_rejected() {
        let yesterday = today().pred_opt().unwrap();
        let result = SearchQuery::builder("THR", "IST", yesterday).build(today());
        assert!(result.is_err());
    }

    #[test]
    fn test_infants_capped_by_adults() {
        let result = SearchQuery::builder("THR", "DXB", today())
            .passengers(PassengerCounts {
                adults: 1,
                children: 0,
                infants: 2,
            })
            .build(today());
        assert!(result.is_err());
    }

    #[test]
    fn test_round_trip_needs_return_date() {
        let result = SearchQuery::builder("THR", "IST", today())
            .trip_type(TripType::RoundTrip)
            .build(today());
        assert!(result.is_err());

        let ok = SearchQuery::builder("THR", "IST", today())
            .return_date(today() + chrono::Days::new(7))
            .build(today())
            .unwrap();
        assert_eq!(ok.trip_type, TripType::RoundTrip);
    }

    #[test]
    fn test_multi_city_decomposes_to_one_ways() {
        let query = SearchQuery::builder("THR", "IST", today())
            .legs(vec![
                RouteLeg {
                    origin: "THR".into(),
                    destination: "IST".into(),
                    date: today(),
                },
                RouteLeg {
                    origin: "IST".into(),
                    destination: "DXB".into(),
                    date: today() + chrono::Days::new(3),
                },
            ])
            .build(today())
            .unwrap();
        let legs = query.multi_city_legs();
        assert_eq!(legs.len(), 2);
        assert!(legs.iter().all(|leg| leg.trip_type == TripType::OneWay));
        assert_eq!(legs[1].origin, "IST");
    }
}
