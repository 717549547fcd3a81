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

// Crawl orchestration engine for Iranian carrier and regional aggregator
// flight data: per-site adapters behind one contract, shared host gating,
// and a concurrent scheduler that survives partial failure.

pub mod adapter;
pub mod adapters;
pub mod errors;
pub mod events;
pub mod factory;
pub mod flight;
pub mod locator;
pub mod parser;
pub mod persian_text;
pub mod query;
pub mod retry;
pub mod runtime;
pub mod scheduler;
pub mod session;
pub mod site_config;
pub mod store;
pub mod validator;

pub use adapter::{AdapterCore, GateThrottle, SearchContext, SiteAdapter};
pub use errors::{CrawlError, ErrorClass, ErrorKind};
pub use events::{CrawlEvent, EventBus, EventEnvelope, EventStream};
pub use factory::AdapterFactory;
pub use flight::{Flight, FlightDraft, FlightIdentity};
pub use parser::{DocumentKind, ParseDiagnostics, ParsePhase, ParseStrategy, RawDocument};
pub use query::{CabinClass, PassengerCounts, RouteLeg, SearchQuery, TripType};
pub use runtime::CoreRuntime;
pub use scheduler::{CrawlOptions, CrawlResult, CrawlStatus, Scheduler, SiteOutcome, SiteState};
pub use site_config::{ConfigStore, CrawlerKind, SiteConfig};
pub use store::{FlightStore, MemoryFlightStore, PricePoint};
pub use validator::{FlightValidator, RejectReason, ValidationReject, dedup_by_identity};
