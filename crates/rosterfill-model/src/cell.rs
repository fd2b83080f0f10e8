use serde::{Deserialize, Serialize};

use crate::CellValue;

/// A single cell record.
///
/// Cells are stored sparsely: when a cell is "truly empty" (no value, default style), it is
/// removed from the worksheet map.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Cell {
    #[serde(default)]
    pub value: CellValue,

    /// Index into the workbook `cellXfs` table (`s` attribute).
    #[serde(default)]
    pub style_id: u32,
}

impl Cell {
    pub fn new(value: CellValue) -> Self {
        Self {
            value,
            ..Self::default()
        }
    }

    pub fn with_style(value: CellValue, style_id: u32) -> Self {
        Self { value, style_id }
    }

    /// Returns true if this cell has no observable content or formatting.
    pub fn is_truly_empty(&self) -> bool {
        self.value == CellValue::Empty && self.style_id == 0
    }
}
