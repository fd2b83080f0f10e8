//! XLSX reading and writing for rosterfill.
//!
//! - [`XlsxPackage`]: the OPC ZIP container inflated into memory (part name -> bytes).
//! - [`XlsxDocument`]: a [`rosterfill_model::Workbook`] paired with the package it was
//!   read from. Saving rewrites only the worksheet cells that changed and leaves every
//!   other part untouched.
//! - [`validations`]: captures worksheet data-validation markup and patches it back into
//!   a re-saved archive.

mod openxml;
mod package;
mod read;
pub mod shared_strings;
mod sheet_metadata;
pub mod styles;
pub mod validations;
mod write;
mod zip_util;

use rosterfill_model::{Workbook, Worksheet};

pub use package::{WorksheetPartInfo, XlsxError, XlsxPackage, XlsxPackageLimits};
pub use read::{load_from_bytes, load_from_package};
pub use shared_strings::SharedStringTable;
pub use sheet_metadata::{parse_date_system, parse_workbook_sheets, WorkbookSheetInfo};
pub use validations::{
    extract_validations, patch_zip_with_snapshot, patch_zip_with_validations, verify,
    NamespaceTable, PatchOutcome, PatchReport, PatchWarning, SheetValidations,
};
pub use zip_util::{DEFAULT_MAX_ZIP_PART_BYTES, DEFAULT_MAX_ZIP_TOTAL_BYTES};

/// A workbook loaded from an XLSX package, saved back by patching the original parts.
#[derive(Debug, Clone)]
pub struct XlsxDocument {
    pub workbook: Workbook,
    package: XlsxPackage,
    /// Worksheet part of each sheet, parallel to `workbook.sheets`.
    sheet_parts: Vec<String>,
    shared_strings: Option<SharedStringTable>,
    /// Sheets as read, to diff against on save.
    original_sheets: Vec<Worksheet>,
}

impl XlsxDocument {
    pub(crate) fn from_parts(
        workbook: Workbook,
        package: XlsxPackage,
        sheet_parts: Vec<String>,
        shared_strings: Option<SharedStringTable>,
    ) -> Self {
        let original_sheets = workbook.sheets.clone();
        Self {
            workbook,
            package,
            sheet_parts,
            shared_strings,
            original_sheets,
        }
    }

    pub fn package(&self) -> &XlsxPackage {
        &self.package
    }

    pub fn shared_strings(&self) -> Option<&SharedStringTable> {
        self.shared_strings.as_ref()
    }

    /// Worksheet part backing sheet `idx`.
    pub fn sheet_part(&self, idx: usize) -> Option<&str> {
        self.sheet_parts.get(idx).map(String::as_str)
    }

    pub(crate) fn original_sheet(&self, idx: usize) -> Option<&Worksheet> {
        self.original_sheets.get(idx)
    }

    /// Serialize the workbook, rewriting only sheets whose cells changed.
    pub fn save_to_vec(&self) -> Result<Vec<u8>, XlsxError> {
        write::write_to_vec(self)
    }
}
