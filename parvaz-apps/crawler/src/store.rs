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

//! # Flight Store Interface
//!
//! The persistence seam the engine writes through. The engine never issues
//! queries of its own; it hands validated batches to whatever implements
//! `FlightStore`. The in-memory implementation backs tests and the probe
//! binary.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;

use crate::flight::{Flight, FlightIdentity};

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PricePoint {
    pub at: DateTime<Utc>,
    pub price: u64,
    pub currency: String,
    pub site_id: String,
}

#[async_trait]
pub trait FlightStore: Send + Sync {
    /// Store a batch, idempotent by flight identity: re-upserting the same
    /// flight replaces it and appends to its price history.
    async fn upsert_batch(&self, flights: &[Flight]) -> anyhow::Result<usize>;

    /// Most recent flights for a route, newest extraction first.
    async fn recent_by_route(
        &self,
        origin: &str,
        destination: &str,
        limit: usize,
    ) -> anyhow::Result<Vec<Flight>>;

    /// Observed prices for one flight identity since `since`, oldest first.
    async fn price_history(
        &self,
        identity: &FlightIdentity,
        since: DateTime<Utc>,
    ) -> anyhow::Result<Vec<PricePoint>>;
}

#[derive(Default)]
pub struct MemoryFlightStore {
    inner: RwLock<HashMap<FlightIdentity, (Flight, Vec<PricePoint>)>>,
}

impl MemoryFlightStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl FlightStore for MemoryFlightStore {
    async fn upsert_batch(&self, flights: &[Flight]) -> anyhow::Result<usize> {
        let mut inner = self.inner.write().await;
        for flight in flights {
            let identity = flight.identity();
            let point = PricePoint {
                at: flight.extracted_at,
                price: flight.price,
                currency: flight.currency.clone(),
                site_id: flight.site_id.clone(),
            };
            match inner.get_mut(&identity) {
                Some((stored, history)) => {
                    *stored = flight.clone();
                    history.push(point);
                }
                None => {
                    inner.insert(identity, (flight.clone(), vec![point]));
                }
            }
        }
        Ok(flights.len())
    }

    async fn recent_by_route(
        &self,
        origin: &str,
        destination: &str,
        limit: usize,
    ) -> anyhow::Result<Vec<Flight>> {
        let inner = self.inner.read().await;
        let mut matches: Vec<Flight> = inner
            .values()
            .filter(|(flight, _)| flight.origin == origin && flight.destination == destination)
            .map(|(flight, _)| flight.clone())
            .collect();
        matches.sort_by(|a, b| b.extracted_at.cmp(&a.extracted_at));
        matches.truncate(limit);
        Ok(matches)
    }

    async fn price_history(
        &self,
        identity: &FlightIdentity,
        since: DateTime<Utc>,
    ) -> anyhow::Result<Vec<PricePoint>> {
        let inner = self.inner.read().await;
        Ok(inner
            .get(identity)
            .map(|(_, history)| {
                history
                    .iter()
                    .filter(|point| point.at >= since)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::CabinClass;
    use chrono::TimeZone;

    fn flight(price: u64, extracted_minute: u32) -> Flight {
        Flight {
            airline_name: "Mahan Air".into(),
            airline_code: "W5".into(),
            flight_number: "W5-1186".into(),
            origin: "THR".into(),
            destination: "IST".into(),
            departure: Utc.with_ymd_and_hms(2026, 8, 2, 6, 30, 0).unwrap(),
            arrival: Utc.with_ymd_and_hms(2026, 8, 2, 9, 45, 0).unwrap(),
            duration_minutes: 195,
            price,
            currency: "IRR".into(),
            cabin: CabinClass::Economy,
            site_id: "mahan_air".into(),
            extracted_at: Utc
                .with_ymd_and_hms(2026, 8, 1, 12, extracted_minute, 0)
                .unwrap(),
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

    #[tokio::test]
    async fn test_upsert_is_idempotent_by_identity() {
        let store = MemoryFlightStore::new();
        store.upsert_batch(&[flight(1_200_000, 0)]).await.unwrap();
        store.upsert_batch(&[flight(1_100_000, 5)]).await.unwrap();

        let recent = store.recent_by_route("THR", "IST", 10).await.unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].price, 1_100_000);

        let history = store
            .price_history(
                &recent[0].identity(),
                Utc.with_ymd_and_hms(2026, 8, 1, 0, 0, 0).unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].price, 1_200_000);
    }

    #[tokio::test]
    async fn test_recent_by_route_filters_and_limits() {
        let store = MemoryFlightStore::new();
        let mut other_route = flight(900_000, 1);
        other_route.destination = "DXB".into();
        store
            .upsert_batch(&[flight(1_200_000, 0), other_route])
            .await
            .unwrap();

        let recent = store.recent_by_route("THR", "IST", 10).await.unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].destination, "IST");
    }
}
