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

//! Normalisation laws the whole pipeline leans on: digit folding is
//! idempotent, and the Jalali conversion round-trips exactly over the full
//! calendar range Iranian sites emit.
//!
//! Run with:
//!     cargo test --test t_persian_text

use chrono::NaiveDate;
use parvaz_crawler::persian_text::{
    extract_integer, gregorian_to_jalali, is_jalali_leap, jalali_month_length,
    jalali_to_gregorian, normalize_digits, parse_clock,
};

/// Every Jalali date from 1300-01-01 to 1500-12-29 must survive the
/// Jalali -> Gregorian -> Jalali round trip unchanged.
#[test]
fn test_jalali_round_trip_full_range() {
    let mut checked = 0u32;
    for year in 1300..=1500 {
        for month in 1..=12u32 {
            let days = jalali_month_length(year, month).expect("valid month");
            for day in 1..=days {
                let gregorian = jalali_to_gregorian(year, month, day)
                    .unwrap_or_else(|e| panic!("{year}/{month}/{day} failed: {e}"));
                let back = gregorian_to_jalali(gregorian).expect("round trip back");
                assert_eq!(
                    back,
                    (year, month, day),
                    "round trip mismatch for {year}/{month}/{day} via {gregorian}"
                );
                checked += 1;
            }
        }
    }
    // 201 years of ~365 days each.
    assert!(checked > 73_000, "only {checked} dates checked");
}

/// Gregorian dates map back onto the Jalali dates they came from.
#[test]
fn test_gregorian_round_trip_sampled() {
    let mut date = NaiveDate::from_ymd_opt(1925, 3, 25).unwrap();
    let end = NaiveDate::from_ymd_opt(2120, 1, 1).unwrap();
    while date < end {
        let (jy, jm, jd) = gregorian_to_jalali(date).expect("in range");
        let forward = jalali_to_gregorian(jy, jm, jd).expect("in range");
        assert_eq!(forward, date, "mismatch via {jy}/{jm}/{jd}");
        date = date + chrono::Days::new(97);
    }
}

/// Known anchors, including the Nowruz boundary on both sides.
#[test]
fn test_jalali_known_anchors() {
    let cases = [
        ((1403, 4, 15), (2024, 7, 5)),
        ((1403, 1, 1), (2024, 3, 20)),
        ((1402, 12, 29), (2024, 3, 19)),
        ((1400, 1, 1), (2021, 3, 21)),
        ((1398, 10, 11), (2020, 1, 1)),
        ((1300, 1, 1), (1921, 3, 21)),
        ((1500, 12, 29), (2122, 3, 20)),
    ];
    for ((jy, jm, jd), (gy, gm, gd)) in cases {
        assert_eq!(
            jalali_to_gregorian(jy, jm, jd).unwrap(),
            NaiveDate::from_ymd_opt(gy, gm, gd).unwrap(),
            "anchor {jy}/{jm}/{jd}"
        );
    }
}

/// Leap structure: Esfand has 30 days only in leap years.
#[test]
fn test_jalali_leap_years() {
    for year in [1399, 1403, 1408] {
        assert!(is_jalali_leap(year).unwrap(), "{year} should be leap");
    }
    for year in [1400, 1401, 1402, 1404] {
        assert!(!is_jalali_leap(year).unwrap(), "{year} should not be leap");
    }
    assert!(jalali_to_gregorian(1403, 12, 30).is_ok());
    assert!(jalali_to_gregorian(1402, 12, 30).is_err());
}

/// Digit folding equals the ASCII spelling and is idempotent, for every
/// Persian and Arabic-Indic digit.
#[test]
fn test_digit_folding_equivalence() {
    let persian = "۰۱۲۳۴۵۶۷۸۹";
    let arabic = "٠١٢٣٤٥٦٧٨٩";
    assert_eq!(normalize_digits(persian), "0123456789");
    assert_eq!(normalize_digits(arabic), "0123456789");

    for input in [persian, arabic, "W5-1186 at ۱۴:۳۰", "plain ascii 42"] {
        let once = normalize_digits(input);
        assert_eq!(normalize_digits(&once), once, "not idempotent on {input}");
    }
}

/// The concrete normalisation scenario every Persian site exercises:
/// a Rial price, a Persian clock, a Jalali date.
#[test]
fn test_persian_site_scenario() {
    assert_eq!(extract_integer("۱,۲۰۰,۰۰۰ ریال").unwrap(), 1_200_000);
    assert_eq!(parse_clock("۱۴:۳۰").unwrap(), (14, 30));
    assert_eq!(
        jalali_to_gregorian(1403, 4, 15).unwrap(),
        NaiveDate::from_ymd_opt(2024, 7, 5).unwrap()
    );
}

/// Mixed currency spellings still yield the amount.
#[test]
fn test_price_extraction_variants() {
    let cases = [
        ("۱,۲۰۰,۰۰۰ ریال", 1_200_000),
        ("2,500,000 تومان", 2_500_000),
        ("IRR 950,000", 950_000),
        ("۸۵۰٬۰۰۰", 850_000),
        ("price: 75", 75),
    ];
    for (input, expected) in cases {
        assert_eq!(extract_integer(input).unwrap(), expected, "input {input}");
    }
    assert!(extract_integer("تماس بگیرید").is_err());
    assert!(extract_integer("").is_err());
}
