use serde::{Deserialize, Serialize};

use crate::Range;

/// `type` attribute of a `<dataValidation>` rule.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ValidationKind {
    Whole,
    Decimal,
    List,
    Date,
    Time,
    TextLength,
    Custom,
}

impl ValidationKind {
    pub fn from_xml(val: &str) -> Option<Self> {
        match val {
            "whole" => Some(Self::Whole),
            "decimal" => Some(Self::Decimal),
            "list" => Some(Self::List),
            "date" => Some(Self::Date),
            "time" => Some(Self::Time),
            "textLength" => Some(Self::TextLength),
            "custom" => Some(Self::Custom),
            _ => None,
        }
    }
}

/// A data-validation rule and the ranges it applies to.
///
/// `formula1`/`formula2` are stored without a leading `=`, as SpreadsheetML writes them.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ValidationRule {
    pub kind: ValidationKind,
    pub operator: Option<String>,
    pub formula1: String,
    pub formula2: Option<String>,
    pub ranges: Vec<Range>,
}

impl ValidationRule {
    /// Returns true when any of the rule's ranges covers column `col` (0-indexed).
    pub fn covers_column(&self, col: u32) -> bool {
        self.ranges
            .iter()
            .any(|r| r.start.col <= col && col <= r.end.col)
    }
}

/// Extend every range whose last row ends above `last_row` (0-indexed) down to `last_row`.
///
/// Ranges that already reach or pass `last_row` are returned unchanged, as are column bounds.
/// Returns the adjusted ranges and whether anything changed.
pub fn widen_ranges_to_row(ranges: &[Range], last_row: u32) -> (Vec<Range>, bool) {
    let mut changed = false;
    let out = ranges
        .iter()
        .map(|range| {
            if range.end.row < last_row {
                changed = true;
                range.with_end_row(last_row)
            } else {
                *range
            }
        })
        .collect();
    (out, changed)
}
