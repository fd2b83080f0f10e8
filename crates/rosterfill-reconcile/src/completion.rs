//! End-time completion.
//!
//! Exports frequently leave the end of an open segment blank or at `00:00`. Such records are
//! held back from reconciliation until an end time is supplied for them.

use chrono::NaiveTime;
use indexmap::IndexMap;
use rosterfill_model::{is_missing_end_time, normalize_name, CellValue};
use serde::Serialize;

use crate::columns::FieldKey;
use crate::records::{ExtractedRecords, Record};

/// A record whose end time is missing.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PendingEndTime {
    /// Position in [`ExtractedRecords::records`].
    pub index: usize,
    /// 0-indexed source row.
    pub row: u32,
    pub match_value: String,
}

/// Records lacking an end time. Empty when the records carry no end column.
pub fn pending_end_times(records: &ExtractedRecords) -> Vec<PendingEndTime> {
    if !records.columns.contains(FieldKey::End) {
        return Vec::new();
    }
    records
        .records
        .iter()
        .enumerate()
        .filter(|(_, record)| needs_end_time(record))
        .map(|(index, record)| PendingEndTime {
            index,
            row: record.row,
            match_value: record.match_value.clone(),
        })
        .collect()
}

fn needs_end_time(record: &Record) -> bool {
    is_missing_end_time(record.fields.get(&FieldKey::End))
}

/// End times supplied for pending records.
#[derive(Clone, Debug, PartialEq)]
pub enum EndTimeFill {
    /// One time for every pending record.
    Bulk(NaiveTime),
    /// Times keyed by normalized match value.
    PerIdentifier(IndexMap<String, NaiveTime>),
}

impl EndTimeFill {
    pub fn per_identifier<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = (S, NaiveTime)>,
        S: AsRef<str>,
    {
        EndTimeFill::PerIdentifier(
            entries
                .into_iter()
                .map(|(name, time)| (normalize_name(name.as_ref()), time))
                .collect(),
        )
    }

    fn time_for(&self, record: &Record) -> Option<NaiveTime> {
        match self {
            EndTimeFill::Bulk(time) => Some(*time),
            EndTimeFill::PerIdentifier(times) => {
                times.get(&normalize_name(&record.match_value)).copied()
            }
        }
    }

    /// Fill pending records. Returns how many were filled.
    pub fn apply(&self, records: &mut ExtractedRecords) -> usize {
        let mut filled = 0;
        for record in records.records.iter_mut().filter(|r| needs_end_time(r)) {
            if let Some(time) = self.time_for(record) {
                record.set(FieldKey::End, CellValue::Time(time));
                filled += 1;
            }
        }
        filled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::columns::ColumnMap;
    use pretty_assertions::assert_eq;
    use std::collections::BTreeMap;

    fn hm(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn records(ends: &[(&str, Option<CellValue>)]) -> ExtractedRecords {
        ExtractedRecords {
            match_key: FieldKey::Name,
            columns: [(FieldKey::Name, 0), (FieldKey::End, 1)].into_iter().collect::<ColumnMap>(),
            records: ends
                .iter()
                .enumerate()
                .map(|(i, (name, end))| Record {
                    row: i as u32 + 1,
                    match_value: name.to_string(),
                    fields: end
                        .clone()
                        .map(|v| BTreeMap::from([(FieldKey::End, v)]))
                        .unwrap_or_default(),
                })
                .collect(),
        }
    }

    #[test]
    fn lists_missing_and_midnight_end_times() {
        let records = records(&[
            ("Ana", Some(CellValue::from("17:00"))),
            ("Luis", Some(CellValue::from("00:00"))),
            ("Marta", None),
            ("Pablo", Some(CellValue::Time(hm(0, 0)))),
        ]);
        let pending: Vec<_> = pending_end_times(&records)
            .into_iter()
            .map(|p| p.match_value)
            .collect();
        assert_eq!(pending, vec!["Luis", "Marta", "Pablo"]);
    }

    #[test]
    fn no_end_column_means_nothing_pending() {
        let mut records = records(&[("Ana", None)]);
        records.columns = [(FieldKey::Name, 0)].into_iter().collect();
        assert!(pending_end_times(&records).is_empty());
    }

    #[test]
    fn per_identifier_then_bulk() {
        let mut records = records(&[
            ("José", Some(CellValue::from("0:00"))),
            ("Luis", None),
            ("Ana", Some(CellValue::from("16:00"))),
        ]);

        let filled = EndTimeFill::per_identifier([("jose", hm(15, 30))]).apply(&mut records);
        assert_eq!(filled, 1);
        assert_eq!(pending_end_times(&records).len(), 1);

        assert_eq!(EndTimeFill::Bulk(hm(18, 0)).apply(&mut records), 1);
        assert!(pending_end_times(&records).is_empty());
        assert_eq!(
            records.records[0].get(FieldKey::End),
            Some(&CellValue::Time(hm(15, 30)))
        );
        assert_eq!(
            records.records[2].get(FieldKey::End),
            Some(&CellValue::from("16:00"))
        );
    }
}
