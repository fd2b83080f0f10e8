use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use indexmap::{IndexMap, IndexSet};
use rosterfill_model::{
    combine, extract_date, extract_time, normalize_name, CellRef, CellValue, StyleTable,
    Worksheet, DATE_FORMAT, DATE_TIME_FORMAT, TIME_FORMAT,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::columns::{detect_columns, ColumnMap, FieldKey};
use crate::completion::{pending_end_times, PendingEndTime};
use crate::entities::{read_entities, EntityIndex, TemplateEntity};
use crate::records::{ExtractedRecords, Record};

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("{sheet}: no identifying column (identifier, code or name) in the header row")]
    NoIdentifyingColumn { sheet: String },

    #[error("{sheet}: no {field} column to match records against")]
    MissingMatchColumn { sheet: String, field: FieldKey },

    #[error("{} record(s) have no end time", .0.len())]
    MissingEndTimes(Vec<PendingEndTime>),
}

/// How matched records are written into the roster.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
    /// Update each matched roster row from the first of its records.
    #[default]
    InPlace,
    /// Replace the data rows with one row per matched record.
    Rebuild,
}

impl Strategy {
    pub fn as_str(self) -> &'static str {
        match self {
            Strategy::InPlace => "in-place",
            Strategy::Rebuild => "rebuild",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Strategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "in-place" | "inplace" | "in_place" => Ok(Strategy::InPlace),
            "rebuild" => Ok(Strategy::Rebuild),
            other => Err(format!("unknown strategy {other:?} (expected in-place or rebuild)")),
        }
    }
}

/// Values written when the roster has the column and a record leaves it blank.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcileDefaults {
    pub timezone: Option<String>,
    pub override_flag: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcileOptions {
    pub strategy: Strategy,
    /// 1-based header row of the roster sheet.
    pub header_row: u32,
    pub defaults: ReconcileDefaults,
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        Self {
            strategy: Strategy::default(),
            header_row: 1,
            defaults: ReconcileDefaults::default(),
        }
    }
}

impl ReconcileOptions {
    /// 0-indexed header row.
    pub fn header_index(&self) -> u32 {
        self.header_row.saturating_sub(1)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileOutcome {
    /// Rows updated (in place) or written (rebuild).
    pub written: usize,
    /// Roster entities dropped by a rebuild because no record matched them.
    pub removed: usize,
    /// Raw match values of records with no roster counterpart, first-seen order.
    pub unmatched: Vec<String>,
}

/// Write `records` into the roster `sheet`.
///
/// Roster entities are re-read from the sheet on every call. Dates and times are written with
/// explicit display formats registered in `styles`.
pub fn reconcile(
    sheet: &mut Worksheet,
    styles: &mut StyleTable,
    records: &ExtractedRecords,
    options: &ReconcileOptions,
) -> Result<ReconcileOutcome, ReconcileError> {
    let pending = pending_end_times(records);
    if !pending.is_empty() {
        return Err(ReconcileError::MissingEndTimes(pending));
    }

    let header = options.header_index();
    let columns = detect_columns(sheet, header);
    if !columns.contains(records.match_key) {
        return Err(ReconcileError::MissingMatchColumn {
            sheet: sheet.name.clone(),
            field: records.match_key,
        });
    }

    let entities = read_entities(sheet, &columns, header, records.match_key);
    let index = EntityIndex::build(&entities);

    let mut groups: IndexMap<String, Vec<&Record>> = IndexMap::new();
    for record in &records.records {
        groups
            .entry(normalize_name(&record.match_value))
            .or_default()
            .push(record);
    }

    // Entity position -> its records, in roster order.
    let mut matched: BTreeMap<usize, Vec<&Record>> = BTreeMap::new();
    let mut unmatched: IndexSet<String> = IndexSet::new();
    for (key, group) in groups {
        match index.lookup(&key) {
            Some(idx) => matched.entry(idx).or_default().extend(group),
            None => unmatched.extend(group.iter().map(|r| r.match_value.clone())),
        }
    }
    if !unmatched.is_empty() {
        log::warn!(
            "{}: {} identifier(s) not found in the roster",
            sheet.name,
            unmatched.len()
        );
    }

    let mut writer = RowWriter {
        sheet,
        styles,
        columns: &columns,
        defaults: &options.defaults,
    };
    let (written, removed) = match options.strategy {
        Strategy::InPlace => (writer.update_in_place(&entities, &matched), 0),
        Strategy::Rebuild => writer.rebuild(header, &entities, &matched),
    };

    log::debug!(
        "{}: {} strategy wrote {written} row(s), removed {removed}",
        writer.sheet.name,
        options.strategy
    );
    Ok(ReconcileOutcome {
        written,
        removed,
        unmatched: unmatched.into_iter().collect(),
    })
}

/// Style source for a written cell.
#[derive(Clone, Copy)]
enum CellStyle {
    /// Keep whatever the target cell has.
    Existing,
    /// Use this xf.
    Fixed(u32),
}

struct RowWriter<'a> {
    sheet: &'a mut Worksheet,
    styles: &'a mut StyleTable,
    columns: &'a ColumnMap,
    defaults: &'a ReconcileDefaults,
}

impl RowWriter<'_> {
    fn update_in_place(
        &mut self,
        entities: &[TemplateEntity],
        matched: &BTreeMap<usize, Vec<&Record>>,
    ) -> usize {
        let mut written = 0;
        for (idx, records) in matched {
            let (Some(entity), Some(record)) = (entities.get(*idx), records.first()) else {
                continue;
            };
            if records.len() > 1 {
                log::debug!(
                    "row {}: {} records matched, updating from the first",
                    entity.row + 1,
                    records.len()
                );
            }
            if self.write_transactional(entity.row, record, |_| CellStyle::Existing) {
                written += 1;
            }
        }
        written
    }

    fn rebuild(
        &mut self,
        header: u32,
        entities: &[TemplateEntity],
        matched: &BTreeMap<usize, Vec<&Record>>,
    ) -> (usize, usize) {
        let first_data_row = header.saturating_add(1);
        let row_styles: BTreeMap<u32, u32> = self
            .sheet
            .row(first_data_row)
            .map(|(col, cell)| (col, cell.style_id))
            .collect();
        let style_of = |col: u32| CellStyle::Fixed(row_styles.get(&col).copied().unwrap_or(0));

        let data_cells: Vec<CellRef> = self
            .sheet
            .iter()
            .map(|(at, _)| at)
            .filter(|at| at.row >= first_data_row)
            .collect();
        for at in data_cells {
            self.sheet.clear_value(at);
        }

        let mut row = first_data_row;
        for (idx, records) in matched {
            let Some(entity) = entities.get(*idx) else {
                continue;
            };
            for record in records {
                for (&col, &xf) in &row_styles {
                    self.sheet
                        .set_value_with_style(CellRef::new(row, col), CellValue::Empty, xf);
                }
                for (field, value) in &entity.identity {
                    if let Some(col) = self.columns.get(*field) {
                        self.write_cell(CellRef::new(row, col), value.clone(), None, style_of(col));
                    }
                }
                self.write_transactional(row, record, style_of);
                row += 1;
            }
        }

        let removed = entities.len() - matched.len();
        (matched.values().map(Vec::len).sum(), removed)
    }

    /// Write the record's date/time/segment/override/timezone values into `row`.
    fn write_transactional(
        &mut self,
        row: u32,
        record: &Record,
        style_of: impl Fn(u32) -> CellStyle,
    ) -> bool {
        let mut changed = false;
        for field in FieldKey::TRANSACTIONAL {
            let Some(col) = self.columns.get(field) else {
                continue;
            };
            let Some((value, format)) = self.output_value(field, record) else {
                continue;
            };
            changed |= self.write_cell(CellRef::new(row, col), value, format, style_of(col));
        }
        changed
    }

    fn output_value(&self, field: FieldKey, record: &Record) -> Option<(CellValue, Option<&'static str>)> {
        let raw = record.get(field);
        match field {
            FieldKey::Date => raw.map(|value| match extract_date(value) {
                Some(date) => (CellValue::Date(date), Some(DATE_FORMAT)),
                None => (value.clone(), None),
            }),
            FieldKey::Start | FieldKey::End => raw.map(|value| {
                let time = extract_time(value);
                let date = record
                    .get(FieldKey::Date)
                    .and_then(extract_date)
                    .or_else(|| match value {
                        CellValue::DateTime(dt) => Some(dt.date()),
                        _ => None,
                    });
                match (combine(date, time), time) {
                    (Some(dt), _) => (CellValue::DateTime(dt), Some(DATE_TIME_FORMAT)),
                    (None, Some(time)) => (CellValue::Time(time), Some(TIME_FORMAT)),
                    (None, None) => (value.clone(), None),
                }
            }),
            FieldKey::Override => raw
                .cloned()
                .or_else(|| self.defaults.override_flag.clone().map(CellValue::from))
                .map(|value| (value, None)),
            FieldKey::Timezone => raw
                .cloned()
                .or_else(|| self.defaults.timezone.clone().map(CellValue::from))
                .map(|value| (value, None)),
            _ => raw.map(|value| (value.clone(), None)),
        }
    }

    fn write_cell(
        &mut self,
        at: CellRef,
        value: CellValue,
        format: Option<&str>,
        style: CellStyle,
    ) -> bool {
        let base = match style {
            CellStyle::Existing => self.sheet.style_id(at),
            CellStyle::Fixed(xf) => xf,
        };
        let xf = match format {
            Some(code) => self.styles.ensure_number_format(base, code),
            None => base,
        };
        self.sheet.set_value_with_style(at, value, xf)
    }
}
