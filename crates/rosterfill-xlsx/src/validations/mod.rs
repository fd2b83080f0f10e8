//! Data-validation preservation.
//!
//! Capture the `<dataValidations>` and `<extLst>` markup of every worksheet in an
//! original workbook, then restore it into an archive written by a tool that drops
//! or rewrites it.

mod extract;
mod namespaces;
mod patch;

pub use extract::{extract_validations, read_validation_rules, verify, SheetValidations};
pub use namespaces::NamespaceTable;
pub use patch::{
    patch_zip_with_snapshot, patch_zip_with_validations, PatchOutcome, PatchReport, PatchWarning,
};
