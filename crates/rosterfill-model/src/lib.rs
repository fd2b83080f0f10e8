//! `rosterfill-model` defines the in-memory workbook used by the roster reconciler.
//!
//! The model is deliberately small: a sparse cell grid per sheet, the number-format slice of
//! the style table, validation rules for reporting, and the text/time helpers shared by the
//! record extractor and the reconciliation engine.

mod address;
mod cell;
mod date_system;
pub mod import;
pub mod normalize;
mod style;
pub mod temporal;
mod validation;
mod value;
mod workbook;
mod worksheet;

pub use address::{
    col_to_name, format_sqref, parse_sqref, A1ParseError, CellRef, Range, EXCEL_MAX_COLS,
    EXCEL_MAX_ROWS,
};
pub use cell::Cell;
pub use date_system::{serial_to_value, time_to_fraction, value_to_serial, DateSystem};
pub use import::{import_csv_to_worksheet, CsvImportError, CsvOptions, CsvTextEncoding};
pub use normalize::{normalize_name, normalize_value};
pub use style::{
    builtin_format_code, classify_format_code, DerivedXf, StyleTable, TemporalFormat,
    DATE_FORMAT, DATE_TIME_FORMAT, FIRST_CUSTOM_NUM_FMT_ID, TIME_FORMAT,
};
pub use temporal::{combine, extract_date, extract_time, is_missing_end_time};
pub use validation::{widen_ranges_to_row, ValidationKind, ValidationRule};
pub use value::CellValue;
pub use workbook::Workbook;
pub use worksheet::Worksheet;
