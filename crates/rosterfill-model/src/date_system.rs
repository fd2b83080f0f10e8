use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use serde::{Deserialize, Serialize};

use crate::{CellValue, TemporalFormat};

const SECONDS_PER_DAY: f64 = 86_400.0;

/// Excel workbook date system used to interpret serial date values.
///
/// - `Excel1900` (default; includes the Lotus 1-2-3 leap year bug)
/// - `Excel1904` (`<workbookPr date1904="1"/>`)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DateSystem {
    #[default]
    #[serde(rename = "excel1900")]
    Excel1900,
    #[serde(rename = "excel1904")]
    Excel1904,
}

impl DateSystem {
    /// Convert a serial number to a date-time. Returns `None` for negative or absurd serials.
    pub fn serial_to_datetime(self, serial: f64) -> Option<NaiveDateTime> {
        if !serial.is_finite() || serial < 0.0 || serial > 2_958_466.0 {
            return None;
        }
        let days = serial.trunc() as i64;
        let mut secs = ((serial - serial.trunc()) * SECONDS_PER_DAY).round() as i64;
        let mut days = days;
        if secs >= SECONDS_PER_DAY as i64 {
            days += 1;
            secs -= SECONDS_PER_DAY as i64;
        }

        let date = match self {
            DateSystem::Excel1900 => {
                // Serial 60 is the fictitious 1900-02-29; map it onto 1900-02-28.
                if days < 60 {
                    NaiveDate::from_ymd_opt(1899, 12, 31)? + Duration::days(days)
                } else if days == 60 {
                    NaiveDate::from_ymd_opt(1900, 2, 28)?
                } else {
                    NaiveDate::from_ymd_opt(1899, 12, 30)? + Duration::days(days)
                }
            }
            DateSystem::Excel1904 => NaiveDate::from_ymd_opt(1904, 1, 1)? + Duration::days(days),
        };
        let time = NaiveTime::from_num_seconds_from_midnight_opt(secs as u32, 0)?;
        Some(NaiveDateTime::new(date, time))
    }

    pub fn date_to_serial(self, date: NaiveDate) -> f64 {
        let days = match self {
            DateSystem::Excel1900 => {
                let cutoff = NaiveDate::from_ymd_opt(1900, 3, 1).unwrap_or_default();
                let epoch = if date < cutoff {
                    NaiveDate::from_ymd_opt(1899, 12, 31)
                } else {
                    NaiveDate::from_ymd_opt(1899, 12, 30)
                };
                (date - epoch.unwrap_or_default()).num_days()
            }
            DateSystem::Excel1904 => {
                (date - NaiveDate::from_ymd_opt(1904, 1, 1).unwrap_or_default()).num_days()
            }
        };
        days as f64
    }

    pub fn datetime_to_serial(self, value: NaiveDateTime) -> f64 {
        self.date_to_serial(value.date()) + time_to_fraction(value.time())
    }
}

/// Fraction of a day represented by `time` (`12:00 -> 0.5`).
pub fn time_to_fraction(time: NaiveTime) -> f64 {
    time.num_seconds_from_midnight() as f64 / SECONDS_PER_DAY
}

/// Interpret a numeric cell according to its number format.
pub fn serial_to_value(serial: f64, format: TemporalFormat, system: DateSystem) -> CellValue {
    let Some(datetime) = system.serial_to_datetime(serial) else {
        return CellValue::Number(serial);
    };
    match format {
        TemporalFormat::Date => CellValue::Date(datetime.date()),
        // Time formats on serials >= 1 still show only the clock part.
        TemporalFormat::Time => CellValue::Time(datetime.time()),
        TemporalFormat::DateTime => CellValue::DateTime(datetime),
    }
}

/// Serial representation of a temporal value, or `None` for non-temporal values.
pub fn value_to_serial(value: &CellValue, system: DateSystem) -> Option<f64> {
    match value {
        CellValue::Date(d) => Some(system.date_to_serial(*d)),
        CellValue::Time(t) => Some(time_to_fraction(*t)),
        CellValue::DateTime(dt) => Some(system.datetime_to_serial(*dt)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn known_serials_1900() {
        let sys = DateSystem::Excel1900;
        assert_eq!(sys.serial_to_datetime(1.0).unwrap().date(), ymd(1900, 1, 1));
        assert_eq!(sys.serial_to_datetime(59.0).unwrap().date(), ymd(1900, 2, 28));
        assert_eq!(sys.serial_to_datetime(61.0).unwrap().date(), ymd(1900, 3, 1));
        assert_eq!(sys.serial_to_datetime(45292.0).unwrap().date(), ymd(2024, 1, 1));
        assert_eq!(sys.date_to_serial(ymd(2024, 1, 1)), 45292.0);
        assert_eq!(sys.date_to_serial(ymd(1900, 1, 1)), 1.0);
    }

    #[test]
    fn fractional_serials_carry_time() {
        let dt = DateSystem::Excel1900.serial_to_datetime(45292.75).unwrap();
        assert_eq!(dt.time(), NaiveTime::from_hms_opt(18, 0, 0).unwrap());

        let value = serial_to_value(0.5, TemporalFormat::Time, DateSystem::Excel1900);
        assert_eq!(value, CellValue::Time(NaiveTime::from_hms_opt(12, 0, 0).unwrap()));
    }

    #[test]
    fn system_1904_offsets() {
        let sys = DateSystem::Excel1904;
        assert_eq!(sys.serial_to_datetime(0.0).unwrap().date(), ymd(1904, 1, 1));
        assert_eq!(sys.date_to_serial(ymd(1904, 1, 2)), 1.0);
    }
}
