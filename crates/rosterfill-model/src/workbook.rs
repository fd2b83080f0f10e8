use serde::{Deserialize, Serialize};

use crate::{DateSystem, StyleTable, Worksheet};

/// An ordered collection of worksheets sharing one style table.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Workbook {
    pub sheets: Vec<Worksheet>,
    #[serde(default)]
    pub styles: StyleTable,
    #[serde(default)]
    pub date_system: DateSystem,
}

impl Workbook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a sheet and return its index.
    pub fn add_sheet(&mut self, sheet: Worksheet) -> usize {
        self.sheets.push(sheet);
        self.sheets.len() - 1
    }

    /// Exact (case- and diacritic-sensitive) lookup by name.
    pub fn sheet(&self, name: &str) -> Option<&Worksheet> {
        self.sheets.iter().find(|s| s.name == name)
    }

    pub fn sheet_mut(&mut self, name: &str) -> Option<&mut Worksheet> {
        self.sheets.iter_mut().find(|s| s.name == name)
    }

    /// Borrow a sheet mutably together with the style table.
    pub fn sheet_and_styles_mut(&mut self, name: &str) -> Option<(&mut Worksheet, &mut StyleTable)> {
        let sheet = self.sheets.iter_mut().find(|s| s.name == name)?;
        Some((sheet, &mut self.styles))
    }

    pub fn first_sheet(&self) -> Option<&Worksheet> {
        self.sheets.first()
    }

    pub fn sheet_names(&self) -> impl Iterator<Item = &str> {
        self.sheets.iter().map(|s| s.name.as_str())
    }
}
