//! Date/time extraction from heterogeneous cell representations.
//!
//! Exports mix native date cells, date-time cells and free text (`"7:30"`, `"05/03/2024"`).
//! Every helper here returns `None` for input it cannot interpret; nothing errors.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime, Timelike};

use crate::CellValue;

/// Text date formats, tried in order; first successful parse wins.
const DATE_FORMATS: [&str; 3] = ["%d/%m/%Y", "%Y-%m-%d", "%d-%m-%Y"];

/// Literal strings that denote an unset end time.
const MIDNIGHT_LITERALS: [&str; 3] = ["00:00", "0:00", "00:00:00"];

/// Extract a clock time.
///
/// Accepts structured times and date-times, numeric day fractions in `[0, 1)`, and text that
/// starts with `H:MM` or `HH:MM`.
pub fn extract_time(value: &CellValue) -> Option<NaiveTime> {
    match value {
        CellValue::Time(t) => Some(*t),
        CellValue::DateTime(dt) => Some(dt.time()),
        CellValue::Number(n) if (0.0..1.0).contains(n) => {
            let secs = (n * 86_400.0).round() as u32;
            NaiveTime::from_num_seconds_from_midnight_opt(secs.min(86_399), 0)
        }
        CellValue::String(s) => parse_time_prefix(s.trim()),
        _ => None,
    }
}

/// Extract a calendar date from a structured value or text (`dd/mm/yyyy`, `yyyy-mm-dd`,
/// `dd-mm-yyyy`). Text with a trailing time component is accepted.
pub fn extract_date(value: &CellValue) -> Option<NaiveDate> {
    match value {
        CellValue::Date(d) => Some(*d),
        CellValue::DateTime(dt) => Some(dt.date()),
        CellValue::String(s) => {
            let s = s.trim();
            parse_date_text(s).or_else(|| {
                let first = s.split_whitespace().next()?;
                (first != s).then(|| parse_date_text(first)).flatten()
            })
        }
        _ => None,
    }
}

/// Combine a date and a time; `None` unless both are present.
pub fn combine(date: Option<NaiveDate>, time: Option<NaiveTime>) -> Option<NaiveDateTime> {
    Some(NaiveDateTime::new(date?, time?))
}

/// Whether an end-time value should be treated as "not supplied".
///
/// Missing means: no cell, an empty/blank cell, a structured time (or date-time) at exactly
/// midnight, or one of the literals `"00:00"`, `"0:00"`, `"00:00:00"`.
pub fn is_missing_end_time(value: Option<&CellValue>) -> bool {
    let Some(value) = value else {
        return true;
    };
    match value {
        CellValue::Empty => true,
        CellValue::String(s) => {
            let s = s.trim();
            s.is_empty() || MIDNIGHT_LITERALS.contains(&s)
        }
        CellValue::Time(t) => is_midnight(*t),
        CellValue::DateTime(dt) => is_midnight(dt.time()),
        _ => false,
    }
}

fn is_midnight(t: NaiveTime) -> bool {
    t.num_seconds_from_midnight() == 0 && t.nanosecond() == 0
}

fn parse_date_text(s: &str) -> Option<NaiveDate> {
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(s, fmt).ok())
}

/// Parse an `H:MM` / `HH:MM` prefix; trailing text (seconds, suffixes) is ignored.
fn parse_time_prefix(s: &str) -> Option<NaiveTime> {
    let bytes = s.as_bytes();
    let hour_len = bytes.iter().take_while(|b| b.is_ascii_digit()).count();
    if !(1..=2).contains(&hour_len) || bytes.get(hour_len) != Some(&b':') {
        return None;
    }
    let minutes = bytes.get(hour_len + 1..hour_len + 3)?;
    if !minutes.iter().all(u8::is_ascii_digit) {
        return None;
    }
    let hour: u32 = s[..hour_len].parse().ok()?;
    let minute: u32 = s[hour_len + 1..hour_len + 3].parse().ok()?;
    NaiveTime::from_hms_opt(hour, minute, 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hm(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn time_from_text_prefixes() {
        assert_eq!(extract_time(&CellValue::from("7:30")), Some(hm(7, 30)));
        assert_eq!(extract_time(&CellValue::from(" 17:05:59 ")), Some(hm(17, 5)));
        assert_eq!(extract_time(&CellValue::from("25:00")), None);
        assert_eq!(extract_time(&CellValue::from("7.30")), None);
        assert_eq!(extract_time(&CellValue::from("730")), None);
        assert_eq!(extract_time(&CellValue::Empty), None);
    }

    #[test]
    fn time_from_structured_values() {
        let dt = NaiveDate::from_ymd_opt(2024, 3, 5).unwrap().and_time(hm(9, 15));
        assert_eq!(extract_time(&CellValue::DateTime(dt)), Some(hm(9, 15)));
        assert_eq!(extract_time(&CellValue::Number(0.25)), Some(hm(6, 0)));
    }

    #[test]
    fn date_formats_are_tried_in_order() {
        let expected = NaiveDate::from_ymd_opt(2024, 3, 5);
        assert_eq!(extract_date(&CellValue::from("05/03/2024")), expected);
        assert_eq!(extract_date(&CellValue::from("2024-03-05")), expected);
        assert_eq!(extract_date(&CellValue::from("05-03-2024")), expected);
        assert_eq!(extract_date(&CellValue::from("05/03/2024 08:00")), expected);
        assert_eq!(extract_date(&CellValue::from("March 5")), None);
    }

    #[test]
    fn combine_requires_both_sides() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 5);
        assert!(combine(date, Some(hm(8, 0))).is_some());
        assert!(combine(date, None).is_none());
        assert!(combine(None, Some(hm(8, 0))).is_none());
    }

    #[test]
    fn missing_end_time_predicate() {
        assert!(is_missing_end_time(None));
        assert!(is_missing_end_time(Some(&CellValue::Empty)));
        assert!(is_missing_end_time(Some(&CellValue::from(""))));
        assert!(is_missing_end_time(Some(&CellValue::from("00:00"))));
        assert!(is_missing_end_time(Some(&CellValue::from("0:00"))));
        assert!(is_missing_end_time(Some(&CellValue::from("00:00:00"))));
        assert!(is_missing_end_time(Some(&CellValue::Time(hm(0, 0)))));

        assert!(!is_missing_end_time(Some(&CellValue::Time(hm(17, 0)))));
        assert!(!is_missing_end_time(Some(&CellValue::from("17:00"))));
        assert!(!is_missing_end_time(Some(&CellValue::Time(
            NaiveTime::from_hms_opt(0, 0, 1).unwrap()
        ))));
    }
}
