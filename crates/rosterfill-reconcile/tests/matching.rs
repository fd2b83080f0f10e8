use chrono::NaiveTime;
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use rosterfill_model::{CellRef, CellValue, StyleTable, Worksheet};
use rosterfill_reconcile::{
    detect_columns, extract_records, pending_end_times, reconcile, EndTimeFill, FieldKey,
    ReconcileOptions, Strategy,
};
use std::collections::BTreeMap;

fn sheet(name: &str, rows: &[Vec<String>]) -> Worksheet {
    let mut sheet = Worksheet::new(name);
    for (r, cells) in rows.iter().enumerate() {
        for (c, text) in cells.iter().enumerate() {
            if !text.is_empty() {
                sheet.set_value(CellRef::new(r as u32, c as u32), CellValue::from(text.as_str()));
            }
        }
    }
    sheet
}

fn rows(rows: &[&[&str]]) -> Vec<Vec<String>> {
    rows.iter()
        .map(|r| r.iter().map(|s| s.to_string()).collect())
        .collect()
}

fn roster() -> Worksheet {
    sheet(
        "Timesheet Entries",
        &rows(&[
            &["Employee ID", "Employee Name", "Date", "Start", "End"],
            &["111", "Ana López", "", "", ""],
            &["222", "Jose Garcia", "", "", ""],
            &["333", "Marta Ruiz", "", "", ""],
        ]),
    )
}

fn styles() -> StyleTable {
    StyleTable::new(vec![0], BTreeMap::new())
}

fn written_with(priority: &[FieldKey], export: &Worksheet) -> usize {
    let columns = detect_columns(export, 0);
    let records = extract_records(export, &columns, 0, priority).unwrap();
    let mut roster = roster();
    reconcile(&mut roster, &mut styles(), &records, &ReconcileOptions::default())
        .unwrap()
        .written
}

#[test]
fn written_count_does_not_depend_on_the_match_key() {
    let export = sheet(
        "Export",
        &rows(&[
            &["Employee ID", "Employee Name", "Date", "Start", "End"],
            &["111", "ANA LOPEZ", "05/03/2024", "08:00", "16:00"],
            &["222", "jose  garcía", "05/03/2024", "09:00", "17:00"],
        ]),
    );
    let by_id = written_with(&[FieldKey::Identifier], &export);
    let by_name = written_with(&[FieldKey::Name], &export);
    assert_eq!(by_id, 2);
    assert_eq!(by_id, by_name);
}

#[test]
fn abbreviated_first_name_still_matches() {
    let export = sheet(
        "Export",
        &rows(&[
            &["Employee Name", "Date", "Start", "End"],
            &["J. Garcia", "05/03/2024", "09:00", "17:00"],
            &["Nobody", "05/03/2024", "09:00", "17:00"],
            &["nobody ", "06/03/2024", "09:00", "17:00"],
        ]),
    );
    let columns = detect_columns(&export, 0);
    let records = extract_records(&export, &columns, 0, &[FieldKey::Name]).unwrap();
    let mut roster = roster();
    let outcome =
        reconcile(&mut roster, &mut styles(), &records, &ReconcileOptions::default()).unwrap();

    assert_eq!(outcome.written, 1);
    assert_eq!(outcome.unmatched, vec!["Nobody".to_string(), "nobody".to_string()]);
    assert!(!roster.value(CellRef::new(2, 3)).is_empty());
}

#[test]
fn filled_end_time_replaces_midnight() {
    let export = sheet(
        "Export",
        &rows(&[
            &["Employee ID", "Date", "Start", "End"],
            &["111", "05/03/2024", "08:00", "00:00"],
        ]),
    );
    let columns = detect_columns(&export, 0);
    let mut records = extract_records(&export, &columns, 0, &[FieldKey::Identifier]).unwrap();
    assert_eq!(pending_end_times(&records).len(), 1);

    let mut roster = roster();
    let mut styles = styles();
    assert!(reconcile(&mut roster, &mut styles, &records, &ReconcileOptions::default()).is_err());

    let end = NaiveTime::from_hms_opt(14, 30, 0).unwrap();
    EndTimeFill::Bulk(end).apply(&mut records);
    let outcome = reconcile(
        &mut roster,
        &mut styles,
        &records,
        &ReconcileOptions {
            strategy: Strategy::InPlace,
            ..ReconcileOptions::default()
        },
    )
    .unwrap();
    assert_eq!(outcome.written, 1);

    let CellValue::DateTime(written) = roster.value(CellRef::new(1, 4)) else {
        panic!("expected a date-time end cell");
    };
    assert_eq!(written.time(), end);
}

proptest! {
    #[test]
    fn rebuild_writes_exactly_one_row_per_matched_record(counts in prop::collection::vec(0usize..4, 3)) {
        let names = ["111", "222", "333"];
        let mut export_rows = vec![vec!["Employee ID".to_string(), "Start".to_string(), "End".to_string()]];
        for (name, count) in names.iter().zip(&counts) {
            for i in 0..*count {
                export_rows.push(vec![name.to_string(), format!("0{}:00", i + 6), "18:00".to_string()]);
            }
        }
        let export = sheet("Export", &export_rows);
        let columns = detect_columns(&export, 0);
        let records = extract_records(&export, &columns, 0, &[FieldKey::Identifier]).unwrap();

        let mut roster = roster();
        let outcome = reconcile(
            &mut roster,
            &mut styles(),
            &records,
            &ReconcileOptions { strategy: Strategy::Rebuild, ..ReconcileOptions::default() },
        )
        .unwrap();

        let total: usize = counts.iter().sum();
        prop_assert_eq!(outcome.written, total);
        prop_assert_eq!(outcome.removed, counts.iter().filter(|c| **c == 0).count());
        prop_assert_eq!(roster.last_populated_row().unwrap_or(0) as usize, total);
    }
}
