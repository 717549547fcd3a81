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

//! Concrete adapter kinds, one per `crawler_type`.

pub mod aggregator;
pub mod api_json;
pub mod html_form;
#[cfg(feature = "browser")]
pub mod javascript;
pub mod persian;

pub use aggregator::AggregatorAdapter;
pub use api_json::ApiJsonAdapter;
pub use html_form::HtmlFormAdapter;
#[cfg(feature = "browser")]
pub use javascript::JavaScriptHeavyAdapter;
pub use persian::PersianAirlineAdapter;
