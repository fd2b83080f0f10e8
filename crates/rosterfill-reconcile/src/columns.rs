use std::collections::BTreeMap;
use std::fmt;

use rosterfill_model::Worksheet;
use serde::{Deserialize, Serialize};

/// Semantic columns recognized in roster and timesheet headers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKey {
    Identifier,
    Code,
    Name,
    Date,
    Start,
    End,
    SegmentType,
    Override,
    Timezone,
}

impl FieldKey {
    /// Fields naming who a row is about.
    pub const IDENTITY: [FieldKey; 3] = [FieldKey::Identifier, FieldKey::Code, FieldKey::Name];

    /// Fields copied from records into the template.
    pub const TRANSACTIONAL: [FieldKey; 6] = [
        FieldKey::Date,
        FieldKey::Start,
        FieldKey::End,
        FieldKey::SegmentType,
        FieldKey::Override,
        FieldKey::Timezone,
    ];

    pub fn is_identity(self) -> bool {
        Self::IDENTITY.contains(&self)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FieldKey::Identifier => "identifier",
            FieldKey::Code => "code",
            FieldKey::Name => "name",
            FieldKey::Date => "date",
            FieldKey::Start => "start",
            FieldKey::End => "end",
            FieldKey::SegmentType => "segment_type",
            FieldKey::Override => "override",
            FieldKey::Timezone => "timezone",
        }
    }
}

impl fmt::Display for FieldKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Header keywords per field, in precedence order. Matching is by substring of the
/// lower-cased, trimmed header text.
pub const FIELD_KEYWORDS: &[(FieldKey, &[&str])] = &[
    (
        FieldKey::Identifier,
        &[
            "id number",
            "employee id",
            "document id",
            "national id",
            "dni",
            "nie",
            "nif",
            "documento",
            "identificador",
        ],
    ),
    (
        FieldKey::Code,
        &["employee code", "code", "código", "codigo", "cod."],
    ),
    (
        FieldKey::Name,
        &["employee name", "full name", "name", "nombre", "empleado", "employee", "trabajador"],
    ),
    (FieldKey::Date, &["date", "fecha", "día"]),
    (
        FieldKey::Start,
        &["start", "from", "clock in", "inicio", "entrada", "desde"],
    ),
    (
        FieldKey::End,
        &["end", "until", "clock out", "fin", "salida", "hasta"],
    ),
    (
        FieldKey::SegmentType,
        &["segment", "type", "tipo", "tramo", "concepto"],
    ),
    (
        FieldKey::Override,
        &["override", "overwrite", "sobrescribir", "forzar"],
    ),
    (
        FieldKey::Timezone,
        &["timezone", "time zone", "zona horaria", "huso"],
    ),
];

/// Field -> 0-indexed column. Absent fields have no entry.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ColumnMap(BTreeMap<FieldKey, u32>);

impl ColumnMap {
    pub fn get(&self, field: FieldKey) -> Option<u32> {
        self.0.get(&field).copied()
    }

    pub fn contains(&self, field: FieldKey) -> bool {
        self.0.contains_key(&field)
    }

    /// Map `field` to `col` unless it is already mapped. Returns whether it was inserted.
    pub fn insert(&mut self, field: FieldKey, col: u32) -> bool {
        if self.0.contains_key(&field) {
            return false;
        }
        self.0.insert(field, col);
        true
    }

    pub fn iter(&self) -> impl Iterator<Item = (FieldKey, u32)> + '_ {
        self.0.iter().map(|(field, col)| (*field, *col))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(FieldKey, u32)> for ColumnMap {
    fn from_iter<T: IntoIterator<Item = (FieldKey, u32)>>(iter: T) -> Self {
        let mut map = ColumnMap::default();
        for (field, col) in iter {
            map.insert(field, col);
        }
        map
    }
}

/// First field whose keywords occur in `header`, in table order.
pub fn classify_header(header: &str) -> Option<FieldKey> {
    let header = header.trim().to_lowercase();
    if header.is_empty() {
        return None;
    }
    FIELD_KEYWORDS
        .iter()
        .find(|(_, keywords)| keywords.iter().any(|kw| header.contains(kw)))
        .map(|(field, _)| *field)
}

/// Map header cells of `header_row` (0-indexed) to fields.
///
/// A header satisfies at most the first field it matches; when two columns match the same
/// field the leftmost wins and the other is ignored.
pub fn detect_columns(sheet: &Worksheet, header_row: u32) -> ColumnMap {
    let mut map = ColumnMap::default();
    for (col, cell) in sheet.row(header_row) {
        let Some(field) = classify_header(&cell.value.to_text()) else {
            continue;
        };
        if !map.insert(field, col) {
            log::debug!(
                "{}: ignoring column {col} for {field}, already mapped",
                sheet.name
            );
        }
    }
    map
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rosterfill_model::{CellRef, CellValue};

    fn header(cells: &[&str]) -> Worksheet {
        let mut sheet = Worksheet::new("S");
        for (col, text) in cells.iter().enumerate() {
            sheet.set_value(CellRef::new(0, col as u32), CellValue::from(*text));
        }
        sheet
    }

    #[test]
    fn english_and_spanish_headers() {
        let map = detect_columns(
            &header(&["Employee ID", "Employee Name", "Date", "Start", "End", "Segment Type"]),
            0,
        );
        assert_eq!(
            map.iter().collect::<Vec<_>>(),
            vec![
                (FieldKey::Identifier, 0),
                (FieldKey::Name, 1),
                (FieldKey::Date, 2),
                (FieldKey::Start, 3),
                (FieldKey::End, 4),
                (FieldKey::SegmentType, 5),
            ]
        );

        let map = detect_columns(
            &header(&["DNI", "Nombre", "Fecha", "Hora inicio", "Hora fin", "Zona horaria"]),
            0,
        );
        assert_eq!(map.get(FieldKey::Identifier), Some(0));
        assert_eq!(map.get(FieldKey::Name), Some(1));
        assert_eq!(map.get(FieldKey::Start), Some(3));
        assert_eq!(map.get(FieldKey::End), Some(4));
        assert_eq!(map.get(FieldKey::Timezone), Some(5));
    }

    #[test]
    fn first_column_wins_for_a_field() {
        let map = detect_columns(&header(&["Name", "Full name", "Start"]), 0);
        assert_eq!(map.get(FieldKey::Name), Some(0));
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn header_matches_only_its_first_field() {
        // "employee code" would also match Name's "employee".
        assert_eq!(classify_header("  Employee Code "), Some(FieldKey::Code));
        let map = detect_columns(&header(&["Employee code", "Employee"]), 0);
        assert_eq!(map.get(FieldKey::Code), Some(0));
        assert_eq!(map.get(FieldKey::Name), Some(1));
    }

    #[test]
    fn unknown_and_blank_headers_are_absent() {
        let map = detect_columns(&header(&["Notes", "", "Comments"]), 0);
        assert!(map.is_empty());
        assert!(!map.contains(FieldKey::Identifier));
    }
}
