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

//! # Core Runtime
//!
//! The one wiring point: every shared component is constructed here at
//! startup and passed around by reference. There are no globals and no
//! singletons; tests build as many runtimes as they like.

use std::sync::Arc;

use parvaz_host_gate::HostRegistry;

use crate::events::EventBus;
use crate::factory::AdapterFactory;
use crate::session::{SessionLimits, SessionManager};
use crate::site_config::ConfigStore;
use crate::store::{FlightStore, MemoryFlightStore};

/// Event buffer depth per subscriber.
const EVENT_BUFFER_DEPTH: usize = 256;

pub struct CoreRuntime {
    pub configs: ConfigStore,
    pub hosts: HostRegistry,
    pub sessions: SessionManager,
    pub factory: AdapterFactory,
    pub events: EventBus,
    pub store: Arc<dyn FlightStore>,
}

impl CoreRuntime {
    pub fn new(
        configs: ConfigStore,
        factory: AdapterFactory,
        session_limits: SessionLimits,
        store: Arc<dyn FlightStore>,
    ) -> Self {
        Self {
            configs,
            hosts: HostRegistry::new(),
            sessions: SessionManager::new(session_limits),
            factory,
            events: EventBus::new(EVENT_BUFFER_DEPTH),
            store,
        }
    }

    /// Runtime with the default adapter kinds and an in-memory store.
    pub fn with_defaults(configs: ConfigStore) -> Self {
        Self::new(
            configs,
            AdapterFactory::with_default_kinds(),
            SessionLimits::default(),
            Arc::new(MemoryFlightStore::new()),
        )
    }
}
