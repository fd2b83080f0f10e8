//! Roster reconciliation.
//!
//! Detect the semantic columns of a roster and of a timesheet export, read the export's rows as
//! [`Record`]s, then write them into the matching roster rows with [`reconcile`].

mod columns;
mod completion;
mod engine;
mod entities;
mod records;

pub use crate::columns::{classify_header, detect_columns, ColumnMap, FieldKey, FIELD_KEYWORDS};
pub use crate::completion::{pending_end_times, EndTimeFill, PendingEndTime};
pub use crate::engine::{
    reconcile, ReconcileDefaults, ReconcileError, ReconcileOptions, ReconcileOutcome, Strategy,
};
pub use crate::entities::{loosely_matches, read_entities, EntityIndex, TemplateEntity};
pub use crate::records::{extract_records, ExtractedRecords, Record, DEFAULT_MATCH_PRIORITY};
