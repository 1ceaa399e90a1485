//! Field decoders for raw source tokens.
//!
//! Dates are strict: a token that does not name a real calendar day is an error. Durations
//! and ticket codes are lenient and fall back to zero values; reports read a zero as unknown.

use chrono::{Duration, NaiveDate, NaiveDateTime};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::DateDecodeError;

static TICKET_CODE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([A-Z]+)([0-9]+)$").expect("ticket code pattern"));
static ALPHA_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"[A-Z]+").expect("alpha run pattern"));
static DIGIT_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"[0-9]+").expect("digit run pattern"));

pub const FALLBACK_TICKET_LETTER: &str = "X";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TicketCode {
    pub letter: String,
    pub number: i64,
}

/// Decodes `DD/MM/YYYY`, or `D/M/YY` where two-digit years below 50 land in the 2000s.
pub fn decode_date(raw: &str) -> Result<NaiveDate, DateDecodeError> {
    let err = || DateDecodeError(raw.to_string());
    let mut parts = raw.trim().split('/');
    let (Some(day), Some(month), Some(year), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(err());
    };

    let day: u32 = parse_component(day).ok_or_else(err)?;
    let month: u32 = parse_component(month).ok_or_else(err)?;
    let year_token = year.trim();
    let year: i32 = parse_component(year_token).ok_or_else(err)?;
    let year = if year_token.len() <= 2 {
        pivot_two_digit_year(year)
    } else {
        year
    };

    NaiveDate::from_ymd_opt(year, month, day).ok_or_else(err)
}

fn pivot_two_digit_year(year: i32) -> i32 {
    if year < 50 {
        2000 + year
    } else {
        1900 + year
    }
}

/// Accepts either the source `D/M/YY`-style date or ISO `YYYY-MM-DD`.
pub fn decode_flexible_date(raw: &str) -> Result<NaiveDate, DateDecodeError> {
    let trimmed = raw.trim();
    if trimmed.contains('-') {
        NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
            .map_err(|_| DateDecodeError(raw.to_string()))
    } else {
        decode_date(trimmed)
    }
}

/// Composes `HH:MM:SS` onto `base`, shifting the hour by `offset_hours`. Hours that run past
/// midnight roll into the next day. Blank or malformed input yields `None`.
pub fn decode_time_of_day(
    raw: &str,
    base: NaiveDate,
    offset_hours: i64,
) -> Option<NaiveDateTime> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    let mut parts = trimmed.split(':');
    let (Some(h), Some(m), Some(s), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return None;
    };
    let hours: u32 = parse_component(h)?;
    let minutes: u32 = parse_component(m)?;
    let seconds: u32 = parse_component(s)?;
    if minutes >= 60 || seconds >= 60 {
        return None;
    }

    let shift = Duration::try_hours(i64::from(hours).checked_add(offset_hours)?)?
        .checked_add(&Duration::try_minutes(i64::from(minutes))?)?
        .checked_add(&Duration::try_seconds(i64::from(seconds))?)?;
    base.and_hms_opt(0, 0, 0)?.checked_add_signed(shift)
}

/// `H:MM:SS` or `MM:SS` to seconds. Anything else is 0.
pub fn decode_duration(raw: &str) -> i64 {
    let parts: Vec<&str> = raw.trim().split(':').collect();
    let values: Option<Vec<i64>> = parts.iter().map(|part| parse_component(part)).collect();
    let total = match values.as_deref() {
        Some([hours, minutes, seconds]) => hours
            .checked_mul(3600)
            .zip(minutes.checked_mul(60))
            .and_then(|(h, m)| h.checked_add(m))
            .and_then(|hm| hm.checked_add(*seconds)),
        Some([minutes, seconds]) => minutes
            .checked_mul(60)
            .and_then(|m| m.checked_add(*seconds)),
        _ => None,
    };
    total.unwrap_or(0)
}

/// Splits a ticket code such as `RR607` into letter prefix and number.
pub fn decode_ticket_code(raw: &str) -> TicketCode {
    if let Some(caps) = TICKET_CODE.captures(raw) {
        return TicketCode {
            letter: caps[1].to_string(),
            number: caps[2].parse().unwrap_or(0),
        };
    }

    TicketCode {
        letter: ALPHA_RUN
            .find(raw)
            .map(|m| m.as_str().to_string())
            .unwrap_or_else(|| FALLBACK_TICKET_LETTER.to_string()),
        number: first_number(raw).unwrap_or(0),
    }
}

/// First digit run in free text, e.g. `Puesto 14` is module 14.
pub fn decode_module(raw: &str) -> i64 {
    first_number(raw).unwrap_or(0)
}

pub fn first_number(raw: &str) -> Option<i64> {
    DIGIT_RUN.find(raw).and_then(|m| m.as_str().parse().ok())
}

fn parse_component<T: std::str::FromStr>(raw: &str) -> Option<T> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || !trimmed.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    trimmed.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn durations_accept_both_layouts() {
        assert_eq!(decode_duration("1:02:03"), 3723);
        assert_eq!(decode_duration("02:03"), 123);
        assert_eq!(decode_duration("0:00:45"), 45);
    }

    #[test]
    fn malformed_durations_are_zero() {
        assert_eq!(decode_duration(""), 0);
        assert_eq!(decode_duration("garbage"), 0);
        assert_eq!(decode_duration("1:xx:03"), 0);
        assert_eq!(decode_duration("1:2:3:4"), 0);
        assert_eq!(decode_duration("-1:00"), 0);
    }

    #[test]
    fn oversized_durations_are_zero() {
        assert_eq!(decode_duration("9999999999999999:00:00"), 0);
        assert_eq!(decode_duration("99999999999999999999:00"), 0);
        assert_eq!(decode_duration("9999999999999999999:00"), 0);
    }

    #[test]
    fn ticket_codes_split_prefix_and_number() {
        assert_eq!(
            decode_ticket_code("RR607"),
            TicketCode {
                letter: "RR".into(),
                number: 607
            }
        );
        assert_eq!(
            decode_ticket_code("M191"),
            TicketCode {
                letter: "M".into(),
                number: 191
            }
        );
    }

    #[test]
    fn ticket_codes_fall_back_to_first_runs() {
        assert_eq!(
            decode_ticket_code("???"),
            TicketCode {
                letter: "X".into(),
                number: 0
            }
        );
        assert_eq!(
            decode_ticket_code("V-12 b7"),
            TicketCode {
                letter: "V".into(),
                number: 12
            }
        );
        assert_eq!(
            decode_ticket_code("44"),
            TicketCode {
                letter: "X".into(),
                number: 44
            }
        );
        assert_eq!(
            decode_ticket_code("rr AB"),
            TicketCode {
                letter: "AB".into(),
                number: 0
            }
        );
    }

    #[test]
    fn modules_take_first_digit_run() {
        assert_eq!(decode_module("Puesto 14"), 14);
        assert_eq!(decode_module("Station 8 / 2"), 8);
        assert_eq!(decode_module("Recepcion"), 0);
        assert_eq!(decode_module(""), 0);
    }

    #[test]
    fn two_digit_years_pivot_at_fifty() {
        assert_eq!(decode_date("05/03/49").unwrap().year(), 2049);
        assert_eq!(decode_date("05/03/50").unwrap().year(), 1950);
        assert_eq!(decode_date("5/3/24").unwrap(), date(2024, 3, 5));
    }

    #[test]
    fn four_digit_dates_decode_day_first() {
        assert_eq!(decode_date("14/02/2025").unwrap(), date(2025, 2, 14));
        assert_eq!(decode_date(" 01/12/2024 ").unwrap(), date(2024, 12, 1));
    }

    #[test]
    fn impossible_dates_are_errors() {
        assert!(decode_date("31/04/2025").is_err());
        assert!(decode_date("29/02/2025").is_err());
        assert!(decode_date("aa/02/2025").is_err());
        assert!(decode_date("12/2025").is_err());
        assert!(decode_date("").is_err());
        assert_eq!(
            decode_date("1/13/2025"),
            Err(DateDecodeError("1/13/2025".to_string()))
        );
    }

    #[test]
    fn flexible_dates_accept_iso() {
        assert_eq!(decode_flexible_date("2025-02-14").unwrap(), date(2025, 2, 14));
        assert_eq!(decode_flexible_date("14/2/25").unwrap(), date(2025, 2, 14));
        assert!(decode_flexible_date("2025-02-30").is_err());
    }

    #[test]
    fn time_of_day_applies_clock_offset() {
        let base = date(2025, 2, 14);
        let ts = decode_time_of_day("09:15:30", base, 8).unwrap();
        assert_eq!(ts.date(), base);
        assert_eq!((ts.hour(), ts.minute(), ts.second()), (17, 15, 30));
    }

    #[test]
    fn time_of_day_rolls_past_midnight() {
        let base = date(2025, 2, 14);
        let ts = decode_time_of_day("18:00:00", base, 8).unwrap();
        assert_eq!(ts.date(), date(2025, 2, 15));
        assert_eq!(ts.hour(), 2);
    }

    #[test]
    fn blank_or_malformed_times_are_absent() {
        let base = date(2025, 2, 14);
        assert_eq!(decode_time_of_day("", base, 8), None);
        assert_eq!(decode_time_of_day("  ", base, 8), None);
        assert_eq!(decode_time_of_day("10:30", base, 8), None);
        assert_eq!(decode_time_of_day("ab:cd:ef", base, 8), None);
    }

    #[test]
    fn out_of_range_times_are_absent() {
        let base = date(2025, 2, 14);
        assert_eq!(decode_time_of_day("99999999999999:00:00", base, 8), None);
        assert_eq!(decode_time_of_day("4000000000:00:00", base, 8), None);
        assert_eq!(decode_time_of_day("10:60:00", base, 8), None);
        assert_eq!(decode_time_of_day("10:00:75", base, 8), None);
        assert_eq!(decode_time_of_day("10:00:00", base, i64::MAX), None);
    }
}
