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

//! Config loading against on-disk fixture documents: environment
//! placeholder resolution, the legacy `rate_limiting` key rejection, and
//! factory wiring from loaded configs.
//!
//! Run with:
//!     cargo test --test t_config_loading

use std::path::{Path, PathBuf};

use parvaz_crawler::{AdapterFactory, ConfigStore, CrawlerKind, ErrorKind, SiteAdapter};

fn fixtures_dir(which: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures-site-configs")
        .join(which)
}

#[test]
fn test_valid_fixture_directory_loads() {
    // SAFETY: test-only process environment mutation.
    unsafe { std::env::set_var("ALIBABA_API_KEY", "key-from-env") };

    let store = ConfigStore::load_dir(fixtures_dir("valid")).unwrap();
    assert_eq!(store.len(), 2);

    let mahan = store.get("mahan_air").unwrap();
    assert_eq!(mahan.crawler_type, CrawlerKind::PersianAirline);
    assert_eq!(mahan.host(), "www.mahan.aero");
    assert_eq!(mahan.rate_limit.burst, 5);
    assert_eq!(mahan.breaker.reset_seconds, 300);
    let persian = mahan.persian_processing.as_ref().unwrap();
    assert!(persian.jalali_calendar);
    assert_eq!(
        persian.airline_names.get("هواپیمایی ماهان").unwrap().iata,
        "W5"
    );

    let alibaba = store.get("alibaba").unwrap();
    assert_eq!(
        alibaba.b2b_credentials.as_ref().unwrap().get("x-api-key").unwrap(),
        "key-from-env"
    );
    assert_eq!(alibaba.extraction_config.max_pages, 3);
}

#[test]
fn test_legacy_rate_limiting_key_fails_load() {
    let error = ConfigStore::load_dir(fixtures_dir("invalid")).unwrap_err();
    assert_eq!(error.kind, ErrorKind::Config);
}

#[test]
fn test_unresolved_placeholder_fails_load() {
    let doc = r#"{
        "site_id": "needs_secret",
        "name": "Needs Secret",
        "search_url": "https://secret.example.ir/search",
        "crawler_type": "api-json",
        "language": "fa",
        "rate_limit": {"requests_per_second": 1.0, "burst": 2, "cooldown_seconds": 30},
        "extraction_config": {
            "container": "/flights",
            "fields": {"price": "/price", "airline": "/airline"}
        },
        "data_validation": {"price_min": 100000, "price_max": 100000000},
        "b2b_credentials": {"token": "${PARVAZ_NEVER_SET_THIS_VAR}"}
    }"#;
    let error = ConfigStore::from_documents(&[doc]).unwrap_err();
    assert_eq!(error.kind, ErrorKind::Config);
    assert!(
        error.message.contains("PARVAZ_NEVER_SET_THIS_VAR"),
        "the missing variable is named: {}",
        error.message
    );
}

#[test]
fn test_loaded_configs_build_adapters() {
    // SAFETY: test-only process environment mutation.
    unsafe { std::env::set_var("ALIBABA_API_KEY", "key-from-env") };

    let store = ConfigStore::load_dir(fixtures_dir("valid")).unwrap();
    let factory = AdapterFactory::with_default_kinds();
    for config in store.enabled() {
        let adapter = factory.build(config.clone()).unwrap();
        assert_eq!(adapter.config().site_id, config.site_id);
    }
}
