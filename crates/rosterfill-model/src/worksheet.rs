use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{Cell, CellRef, CellValue, ValidationRule};

static EMPTY_VALUE: CellValue = CellValue::Empty;

/// A named sparse grid of cells.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Worksheet {
    pub name: String,
    // Row-major ordering keeps iteration and serialization deterministic.
    cells: BTreeMap<(u32, u32), Cell>,
    /// Validation rules read from the worksheet part. Informational: the patch engine
    /// restores the original XML, not this list.
    #[serde(default)]
    pub validations: Vec<ValidationRule>,
}

impl Worksheet {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn cell(&self, cell: CellRef) -> Option<&Cell> {
        self.cells.get(&(cell.row, cell.col))
    }

    pub fn value(&self, cell: CellRef) -> &CellValue {
        self.cell(cell).map(|c| &c.value).unwrap_or(&EMPTY_VALUE)
    }

    pub fn style_id(&self, cell: CellRef) -> u32 {
        self.cell(cell).map(|c| c.style_id).unwrap_or(0)
    }

    /// Insert a fully-formed cell (used by readers).
    pub fn insert_cell(&mut self, cell: CellRef, record: Cell) {
        if record.is_truly_empty() {
            self.cells.remove(&(cell.row, cell.col));
        } else {
            self.cells.insert((cell.row, cell.col), record);
        }
    }

    /// Write a value while keeping the cell's existing style reference.
    ///
    /// Returns `true` when the stored value changed.
    pub fn set_value(&mut self, cell: CellRef, value: CellValue) -> bool {
        let style_id = self.style_id(cell);
        self.write(cell, value, style_id)
    }

    /// Write a value and replace the style reference.
    ///
    /// Returns `true` when either the value or the style changed.
    pub fn set_value_with_style(&mut self, cell: CellRef, value: CellValue, style_id: u32) -> bool {
        self.write(cell, value, style_id)
    }

    /// Remove the cell's value, keeping its style.
    pub fn clear_value(&mut self, cell: CellRef) {
        let style_id = self.style_id(cell);
        self.write(cell, CellValue::Empty, style_id);
    }

    fn write(&mut self, cell: CellRef, value: CellValue, style_id: u32) -> bool {
        let key = (cell.row, cell.col);
        let record = Cell::with_style(value, style_id);
        let changed = self.cells.get(&key) != Some(&record);
        if record.is_truly_empty() {
            self.cells.remove(&key);
        } else {
            self.cells.insert(key, record);
        }
        changed
    }

    /// Highest row (0-indexed) holding any stored cell, including styled blanks.
    pub fn max_row(&self) -> Option<u32> {
        self.cells.keys().next_back().map(|(row, _)| *row)
    }

    /// Highest row (0-indexed) holding a non-empty value.
    pub fn last_populated_row(&self) -> Option<u32> {
        self.cells
            .iter()
            .rev()
            .find(|(_, cell)| !cell.value.is_empty())
            .map(|((row, _), _)| *row)
    }

    /// Cells of a single row, ordered by column.
    pub fn row(&self, row: u32) -> impl Iterator<Item = (u32, &Cell)> {
        self.cells
            .range((row, 0)..=(row, u32::MAX))
            .map(|((_, col), cell)| (*col, cell))
    }

    /// All stored cells in row-major order.
    pub fn iter(&self) -> impl Iterator<Item = (CellRef, &Cell)> {
        self.cells
            .iter()
            .map(|((row, col), cell)| (CellRef::new(*row, *col), cell))
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
}
