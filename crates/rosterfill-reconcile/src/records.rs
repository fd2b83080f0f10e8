use std::collections::BTreeMap;

use rosterfill_model::{CellRef, CellValue, Worksheet};
use serde::Serialize;

use crate::columns::{ColumnMap, FieldKey};
use crate::engine::ReconcileError;

/// Identity fields tried, in order, when choosing the match key.
pub const DEFAULT_MATCH_PRIORITY: [FieldKey; 3] =
    [FieldKey::Identifier, FieldKey::Code, FieldKey::Name];

/// One data row of the records sheet.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Record {
    /// 0-indexed source row.
    pub row: u32,
    /// Trimmed text of the match-key cell.
    pub match_value: String,
    /// Raw values of every other mapped field present in the row.
    pub fields: BTreeMap<FieldKey, CellValue>,
}

impl Record {
    pub fn get(&self, field: FieldKey) -> Option<&CellValue> {
        self.fields.get(&field).filter(|v| !v.is_empty())
    }

    pub fn set(&mut self, field: FieldKey, value: CellValue) {
        self.fields.insert(field, value);
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ExtractedRecords {
    pub match_key: FieldKey,
    /// Columns detected in the records sheet.
    pub columns: ColumnMap,
    /// Records in sheet row order.
    pub records: Vec<Record>,
}

impl ExtractedRecords {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Read one [`Record`] per data row below `header_row` (0-indexed).
///
/// The match key is the first of `priority` present in `columns`. Rows whose match-key cell
/// is blank are skipped.
pub fn extract_records(
    sheet: &Worksheet,
    columns: &ColumnMap,
    header_row: u32,
    priority: &[FieldKey],
) -> Result<ExtractedRecords, ReconcileError> {
    let (match_key, key_col) = priority
        .iter()
        .find_map(|field| columns.get(*field).map(|col| (*field, col)))
        .ok_or_else(|| ReconcileError::NoIdentifyingColumn {
            sheet: sheet.name.clone(),
        })?;

    let mut records = Vec::new();
    let last_row = sheet.max_row().unwrap_or(header_row);
    for row in header_row.saturating_add(1)..=last_row {
        let key = sheet.value(CellRef::new(row, key_col));
        if key.is_empty() {
            continue;
        }
        let fields = columns
            .iter()
            .filter(|(field, _)| *field != match_key)
            .map(|(field, col)| (field, sheet.value(CellRef::new(row, col))))
            .filter(|(_, value)| !value.is_empty())
            .map(|(field, value)| (field, value.clone()))
            .collect();
        records.push(Record {
            row,
            match_value: key.to_text().trim().to_string(),
            fields,
        });
    }

    log::debug!(
        "{}: {} records keyed by {match_key}",
        sheet.name,
        records.len()
    );
    Ok(ExtractedRecords {
        match_key,
        columns: columns.clone(),
        records,
    })
}
