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

//! # Persian Text Normalisation
//!
//! Side-effect free helpers for the text forms Iranian travel sites emit:
//! Persian/Arabic-Indic digits, prices wrapped in currency words, `HH:MM`
//! clock strings, and Jalali (Solar Hijri) dates. Every function is pure and
//! keeps no state between calls.

use std::collections::HashMap;

use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum TextError {
    #[error("no digit sequence found in '{0}'")]
    NoDigits(String),
    #[error("invalid clock time '{0}'")]
    InvalidClock(String),
    #[error("invalid Jalali date {year}/{month}/{day}")]
    InvalidJalali { year: i32, month: u32, day: u32 },
    #[error("Jalali year {0} outside supported range")]
    JalaliOutOfRange(i32),
}

static DIGIT_RUN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+").unwrap());
static CLOCK_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(\d{1,2}):(\d{2})$").unwrap());
static JALALI_DATE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d{4})\s*/\s*(\d{1,2})\s*/\s*(\d{1,2})").unwrap());

/// Fold Persian (U+06F0–U+06F9) and Arabic-Indic (U+0660–U+0669) digits to
/// ASCII. Idempotent: ASCII input passes through untouched.
pub fn normalize_digits(input: &str) -> String {
    input
        .chars()
        .map(|c| match c {
            '\u{06F0}'..='\u{06F9}' => {
                char::from_u32('0' as u32 + (c as u32 - 0x06F0)).unwrap_or(c)
            }
            '\u{0660}'..='\u{0669}' => {
                char::from_u32('0' as u32 + (c as u32 - 0x0660)).unwrap_or(c)
            }
            _ => c,
        })
        .collect()
}

/// Pull the integer out of a free-form price string such as
/// `"۱,۲۰۰,۰۰۰ ریال"` or `"IRR 1,200,000"`. Thousands separators (ASCII
/// comma, Arabic comma U+060C, Arabic thousands mark U+066C) are stripped
/// before the first digit run is taken.
pub fn extract_integer(input: &str) -> Result<u64, TextError> {
    let folded = normalize_digits(input);
    let cleaned: String = folded
        .chars()
        .filter(|c| !matches!(c, ',' | '\u{060C}' | '\u{066C}'))
        .collect();
    let run = DIGIT_RUN_RE
        .find(&cleaned)
        .ok_or_else(|| TextError::NoDigits(input.to_string()))?;
    run.as_str()
        .parse::<u64>()
        .map_err(|_| TextError::NoDigits(input.to_string()))
}

/// Parse a 24-hour `HH:MM` clock with Persian or ASCII digits.
pub fn parse_clock(input: &str) -> Result<(u32, u32), TextError> {
    let folded = normalize_digits(input.trim());
    let caps = CLOCK_RE
        .captures(&folded)
        .ok_or_else(|| TextError::InvalidClock(input.to_string()))?;
    let hour: u32 = caps[1].parse().unwrap();
    let minute: u32 = caps[2].parse().unwrap();
    if hour >= 24 || minute >= 60 {
        return Err(TextError::InvalidClock(input.to_string()));
    }
    Ok((hour, minute))
}

// Jalali calendar arithmetic, ported from the classic Khayyam 33-year cycle
// formulation (Birashk break years). Dates are exact over 1178..3177; the
// crawler only ever sees 1300..1500.
const JALALI_BREAKS: [i64; 20] = [
    -61, 9, 38, 199, 426, 686, 756, 818, 1111, 1181, 1210, 1635, 2060, 2097, 2192, 2262, 2324,
    2394, 2456, 3178,
];

/// Leap info and the Gregorian March day of 1 Farvardin for year `jy`.
fn jal_cal(jy: i64) -> Result<(i64, i64, i64), TextError> {
    let last = JALALI_BREAKS[JALALI_BREAKS.len() - 1];
    if jy < JALALI_BREAKS[0] || jy >= last {
        return Err(TextError::JalaliOutOfRange(jy as i32));
    }

    let gy = jy + 621;
    let mut leap_j: i64 = -14;
    let mut jp = JALALI_BREAKS[0];
    let mut jump = 0;
    for &jm in &JALALI_BREAKS[1..] {
        jump = jm - jp;
        if jy < jm {
            break;
        }
        leap_j += jump / 33 * 8 + jump % 33 / 4;
        jp = jm;
    }
    let mut n = jy - jp;
    leap_j += n / 33 * 8 + (n % 33 + 3) / 4;
    if jump % 33 == 4 && jump - n == 4 {
        leap_j += 1;
    }

    let leap_g = gy / 4 - (gy / 100 + 1) * 3 / 4 - 150;
    let march = 20 + leap_j - leap_g;

    if jump - n < 6 {
        n = n - jump + (jump + 4) / 33 * 33;
    }
    let mut leap = ((n + 1) % 33 - 1) % 4;
    if leap == -1 {
        leap = 4;
    }
    Ok((leap, gy, march))
}

/// Gregorian date to Julian day number.
fn g2d(gy: i64, gm: i64, gd: i64) -> i64 {
    let d = (gy + (gm - 8) / 6 + 100100) * 1461 / 4 + (153 * ((gm + 9) % 12) + 2) / 5 + gd
        - 34840408;
    d - (gy + 100100 + (gm - 8) / 6) / 100 * 3 / 4 + 752
}

/// Julian day number to Gregorian date.
fn d2g(jdn: i64) -> (i64, i64, i64) {
    let mut j = 4 * jdn + 139361631;
    j += (4 * jdn + 183187720) / 146097 * 3 / 4 * 4 - 3908;
    let i = j % 1461 / 4 * 5 + 308;
    let gd = i % 153 / 5 + 1;
    let gm = i / 153 % 12 + 1;
    let gy = j / 1461 - 100100 + (8 - gm) / 6;
    (gy, gm, gd)
}

/// Jalali date to Julian day number.
fn j2d(jy: i64, jm: i64, jd: i64) -> Result<i64, TextError> {
    let (_, gy, march) = jal_cal(jy)?;
    Ok(g2d(gy, 3, march) + (jm - 1) * 31 - jm / 7 * (jm - 7) + jd - 1)
}

/// Julian day number to Jalali date.
fn d2j(jdn: i64) -> Result<(i64, i64, i64), TextError> {
    let (gy, _, _) = d2g(jdn);
    let mut jy = gy - 621;
    let (leap, _, _) = jal_cal(jy)?;
    let first_of_year = j2d(jy, 1, 1)?;
    let mut k = jdn - first_of_year;
    if k >= 0 {
        if k <= 185 {
            return Ok((jy, 1 + k / 31, k % 31 + 1));
        }
        k -= 186;
    } else {
        jy -= 1;
        k += 179;
        if leap == 1 {
            k += 1;
        }
    }
    Ok((jy, 7 + k / 30, k % 30 + 1))
}

/// Whether `jy` is a Jalali leap year (Esfand has 30 days).
pub fn is_jalali_leap(jy: i32) -> Result<bool, TextError> {
    Ok(jal_cal(jy as i64)?.0 == 0)
}

/// Number of days in Jalali month `jm` of year `jy`.
pub fn jalali_month_length(jy: i32, jm: u32) -> Result<u32, TextError> {
    match jm {
        1..=6 => Ok(31),
        7..=11 => Ok(30),
        12 => Ok(if is_jalali_leap(jy)? { 30 } else { 29 }),
        _ => Err(TextError::InvalidJalali {
            year: jy,
            month: jm,
            day: 0,
        }),
    }
}

/// Convert a Jalali calendar date to Gregorian.
pub fn jalali_to_gregorian(jy: i32, jm: u32, jd: u32) -> Result<NaiveDate, TextError> {
    let invalid = TextError::InvalidJalali {
        year: jy,
        month: jm,
        day: jd,
    };
    if !(1..=12).contains(&jm) || jd == 0 || jd > jalali_month_length(jy, jm)? {
        return Err(invalid);
    }
    let jdn = j2d(jy as i64, jm as i64, jd as i64)?;
    let (gy, gm, gd) = d2g(jdn);
    NaiveDate::from_ymd_opt(gy as i32, gm as u32, gd as u32).ok_or(invalid)
}

/// Convert a Gregorian date to Jalali.
pub fn gregorian_to_jalali(date: NaiveDate) -> Result<(i32, u32, u32), TextError> {
    use chrono::Datelike;
    let jdn = g2d(date.year() as i64, date.month() as i64, date.day() as i64);
    let (jy, jm, jd) = d2j(jdn)?;
    Ok((jy as i32, jm as u32, jd as u32))
}

/// Parse a `YYYY/MM/DD` Jalali date, Persian digits allowed, into Gregorian.
pub fn parse_jalali_date(input: &str) -> Result<NaiveDate, TextError> {
    let folded = normalize_digits(input);
    let caps = JALALI_DATE_RE
        .captures(&folded)
        .ok_or_else(|| TextError::InvalidJalali {
            year: 0,
            month: 0,
            day: 0,
        })?;
    let jy: i32 = caps[1].parse().unwrap();
    let jm: u32 = caps[2].parse().unwrap();
    let jd: u32 = caps[3].parse().unwrap();
    jalali_to_gregorian(jy, jm, jd)
}

/// Result of looking a raw airline name up in the canonical map.
#[derive(Clone, Debug, PartialEq)]
pub struct AirlineResolution {
    pub canonical_name: String,
    pub iata_code: String,
    /// False when the raw name had no mapping; the name passes through
    /// unchanged with an empty code so the record survives with a warning.
    pub known: bool,
}

/// Canonical airline names for the carriers the crawler meets most often.
/// Per-site configs layer their own variants on top.
static DEFAULT_AIRLINES: Lazy<Vec<(&'static str, &'static str, &'static str)>> = Lazy::new(|| {
    vec![
        ("ماهان", "Mahan Air", "W5"),
        ("mahan air", "Mahan Air", "W5"),
        ("mahan", "Mahan Air", "W5"),
        ("ایران ایر", "Iran Air", "IR"),
        ("هما", "Iran Air", "IR"),
        ("iran air", "Iran Air", "IR"),
        ("آسمان", "Iran Aseman Airlines", "EP"),
        ("aseman", "Iran Aseman Airlines", "EP"),
        ("کاسپین", "Caspian Airlines", "RV"),
        ("caspian", "Caspian Airlines", "RV"),
        ("زاگرس", "Zagros Airlines", "IZG"),
        ("zagros", "Zagros Airlines", "IZG"),
        ("وارش", "Varesh Airlines", "VR"),
        ("varesh", "Varesh Airlines", "VR"),
        ("قشم ایر", "Qeshm Air", "QB"),
        ("qeshm air", "Qeshm Air", "QB"),
        ("کیش ایر", "Kish Air", "Y9"),
        ("kish air", "Kish Air", "Y9"),
        ("آتا", "ATA Airlines", "I3"),
        ("ata", "ATA Airlines", "I3"),
        ("سپهران", "Sepehran Airlines", "IS"),
        ("sepehran", "Sepehran Airlines", "IS"),
        ("تابان", "Taban Air", "HH"),
        ("taban", "Taban Air", "HH"),
        ("کارون", "Karun Airlines", "NV"),
        ("karun", "Karun Airlines", "NV"),
    ]
});

/// Case- and whitespace-insensitive airline name canonicalisation.
#[derive(Clone, Debug, Default)]
pub struct AirlineNames {
    map: HashMap<String, (String, String)>,
}

impl AirlineNames {
    /// Built-in map of common Iranian carriers.
    pub fn builtin() -> Self {
        let mut names = Self::default();
        for (variant, canonical, iata) in DEFAULT_AIRLINES.iter() {
            names.insert(variant, canonical, iata);
        }
        names
    }

    pub fn insert(&mut self, variant: &str, canonical: &str, iata: &str) {
        self.map.insert(
            Self::key(variant),
            (canonical.to_string(), iata.to_string()),
        );
    }

    pub fn resolve(&self, raw: &str) -> AirlineResolution {
        match self.map.get(&Self::key(raw)) {
            Some((canonical, iata)) => AirlineResolution {
                canonical_name: canonical.clone(),
                iata_code: iata.clone(),
                known: true,
            },
            None => AirlineResolution {
                canonical_name: raw.trim().to_string(),
                iata_code: String::new(),
                known: false,
            },
        }
    }

    fn key(raw: &str) -> String {
        raw.trim().to_lowercase()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digit_folding_is_idempotent() {
        assert_eq!(normalize_digits("۱۲۳۴۵۶۷۸۹۰"), "1234567890");
        assert_eq!(normalize_digits("٠١٢٣٤٥٦٧٨٩"), "0123456789");
        assert_eq!(normalize_digits("already 123"), "already 123");
        let once = normalize_digits("۱۴:۳۰ تهران");
        assert_eq!(normalize_digits(&once), once);
    }

    #[test]
    fn test_price_extraction() {
        assert_eq!(extract_integer("۱,۲۰۰,۰۰۰ ریال").unwrap(), 1_200_000);
        assert_eq!(extract_integer("IRR 950٬000").unwrap(), 950_000);
        assert_eq!(extract_integer("2,500,000 تومان").unwrap(), 2_500_000);
        assert!(matches!(
            extract_integer("تماس بگیرید"),
            Err(TextError::NoDigits(_))
        ));
    }

    #[test]
    fn test_clock_parsing() {
        assert_eq!(parse_clock("۱۴:۳۰").unwrap(), (14, 30));
        assert_eq!(parse_clock("07:05").unwrap(), (7, 5));
        assert_eq!(parse_clock(" 9:15 ").unwrap(), (9, 15));
        assert!(parse_clock("24:00").is_err());
        assert!(parse_clock("12:60").is_err());
        assert!(parse_clock("noon").is_err());
    }

    #[test]
    fn test_known_jalali_dates() {
        assert_eq!(
            jalali_to_gregorian(1403, 4, 15).unwrap(),
            NaiveDate::from_ymd_opt(2024, 7, 5).unwrap()
        );
        assert_eq!(
            jalali_to_gregorian(1400, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2021, 3, 21).unwrap()
        );
        // 1403 is a leap year, Esfand runs to the 30th.
        assert!(is_jalali_leap(1403).unwrap());
        assert_eq!(jalali_month_length(1403, 12).unwrap(), 30);
        assert_eq!(jalali_month_length(1402, 12).unwrap(), 29);
    }

    #[test]
    fn test_jalali_date_string() {
        assert_eq!(
            parse_jalali_date("1403/04/15").unwrap(),
            NaiveDate::from_ymd_opt(2024, 7, 5).unwrap()
        );
        assert_eq!(
            parse_jalali_date("۱۴۰۳/۰۴/۱۵").unwrap(),
            NaiveDate::from_ymd_opt(2024, 7, 5).unwrap()
        );
        assert!(parse_jalali_date("tomorrow").is_err());
        assert!(parse_jalali_date("1403/13/01").is_err());
    }

    #[test]
    fn test_airline_resolution() {
        let names = AirlineNames::builtin();
        let mahan = names.resolve("ماهان");
        assert_eq!(mahan.canonical_name, "Mahan Air");
        assert_eq!(mahan.iata_code, "W5");
        assert!(mahan.known);

        let unknown = names.resolve("Fictional Skyways");
        assert_eq!(unknown.canonical_name, "Fictional Skyways");
        assert!(unknown.iata_code.is_empty());
        assert!(!unknown.known);
    }
}
