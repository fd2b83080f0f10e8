//! `rosterfill` fills a roster workbook from a timesheet export while keeping the roster's data
//! validations intact.
//!
//! [`run_sync`] is the whole pipeline over in-memory bytes; [`cli`] wraps it, together with the
//! validation snapshot/patch/verify tools, in the `rosterfill` command.

pub mod cli;
mod sync;

pub use sync::{
    parse_end_time, pending_records, run_sync, Diagnostics, EndTimeOptions, SyncError,
    SyncOptions, SyncOutput, DEFAULT_SHEET,
};
