use std::borrow::Cow;

use csv::ByteRecord;
use encoding_rs::WINDOWS_1252;
use thiserror::Error;

use crate::{CellRef, CellValue, Worksheet};

const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];

#[derive(Clone, Debug, Default)]
pub struct CsvOptions {
    /// `None` picks `;` or `,` from the header line.
    pub delimiter: Option<u8>,
    pub encoding: CsvTextEncoding,
}

/// How field bytes become text. Time-clock exports from Windows tools are often CP-1252.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CsvTextEncoding {
    /// UTF-8 per field, CP-1252 for any field that is not valid UTF-8.
    #[default]
    Auto,
    Utf8,
    Windows1252,
}

impl CsvTextEncoding {
    fn decode<'a>(self, field: &'a [u8]) -> Result<Cow<'a, str>, std::str::Utf8Error> {
        let cp1252 = |bytes: &'a [u8]| WINDOWS_1252.decode(bytes).0;
        match self {
            CsvTextEncoding::Utf8 => std::str::from_utf8(field).map(Cow::Borrowed),
            CsvTextEncoding::Windows1252 => Ok(cp1252(field)),
            CsvTextEncoding::Auto => Ok(std::str::from_utf8(field)
                .map(Cow::Borrowed)
                .unwrap_or_else(|_| cp1252(field))),
        }
    }
}

#[derive(Debug, Error)]
pub enum CsvImportError {
    #[error("csv input was empty")]
    EmptyInput,
    #[error("csv row {row}, column {column}: {reason}")]
    Parse { row: u64, column: u64, reason: String },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Load delimited text into a sheet named `name`, file row 1 on sheet row 0.
///
/// Non-blank fields are stored as [`CellValue::String`]; blank ones are skipped.
pub fn import_csv_to_worksheet(
    name: impl Into<String>,
    bytes: &[u8],
    options: &CsvOptions,
) -> Result<Worksheet, CsvImportError> {
    let bytes = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);
    let delimiter = options.delimiter.unwrap_or_else(|| sniff_delimiter(bytes));
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(false)
        .flexible(true)
        .from_reader(bytes);

    let mut sheet = Worksheet::new(name);
    let mut record = ByteRecord::new();
    let mut rows: u64 = 0;
    while reader
        .read_byte_record(&mut record)
        .map_err(|err| csv_error(err, rows + 1))?
    {
        rows += 1;
        for (idx, field) in record.iter().enumerate() {
            let text = options
                .encoding
                .decode(field)
                .map_err(|err| CsvImportError::Parse {
                    row: rows,
                    column: idx as u64 + 1,
                    reason: format!("invalid UTF-8: {err}"),
                })?;
            if !text.trim().is_empty() {
                let cell = CellRef::new((rows - 1) as u32, idx as u32);
                sheet.set_value(cell, CellValue::String(text.into_owned()));
            }
        }
    }

    if rows == 0 {
        return Err(CsvImportError::EmptyInput);
    }
    Ok(sheet)
}

/// `;` wins when the first line has more unquoted semicolons than commas.
fn sniff_delimiter(bytes: &[u8]) -> u8 {
    let header = bytes.split(|b| *b == b'\n').next().unwrap_or_default();
    let mut quoted = false;
    let mut balance = 0i64;
    for b in header {
        match b {
            b'"' => quoted = !quoted,
            b',' if !quoted => balance -= 1,
            b';' if !quoted => balance += 1,
            _ => {}
        }
    }
    if balance > 0 {
        b';'
    } else {
        b','
    }
}

fn csv_error(err: csv::Error, current_row: u64) -> CsvImportError {
    let reason = err.to_string();
    let row = err
        .position()
        .map(csv::Position::record)
        .filter(|r| *r > 0)
        .unwrap_or(current_row);
    match err.into_kind() {
        csv::ErrorKind::Io(io) => CsvImportError::Io(io),
        _ => CsvImportError::Parse {
            row,
            column: 0,
            reason,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn imports_semicolon_exports_with_bom() {
        let bytes = "\u{feff}Nombre;Inicio;Fin\nAna;08:00;17:00\n;;\nLuis;09:00;\n".as_bytes();
        let sheet = import_csv_to_worksheet("Export", bytes, &CsvOptions::default()).unwrap();

        assert_eq!(sheet.value(CellRef::new(0, 0)), &CellValue::from("Nombre"));
        assert_eq!(sheet.value(CellRef::new(1, 2)), &CellValue::from("17:00"));
        assert_eq!(sheet.value(CellRef::new(3, 0)), &CellValue::from("Luis"));
        assert!(sheet.value(CellRef::new(3, 2)).is_empty());
        assert!(sheet.row(2).next().is_none());
    }

    #[test]
    fn falls_back_to_windows_1252() {
        // "José" with a CP-1252 encoded é.
        let bytes = b"name,start\nJos\xe9,08:00\n";
        let sheet = import_csv_to_worksheet("Export", bytes, &CsvOptions::default()).unwrap();
        assert_eq!(sheet.value(CellRef::new(1, 0)), &CellValue::from("José"));

        let strict = CsvOptions {
            encoding: CsvTextEncoding::Utf8,
            ..CsvOptions::default()
        };
        let err = import_csv_to_worksheet("Export", bytes, &strict).unwrap_err();
        assert!(matches!(err, CsvImportError::Parse { row: 2, column: 1, .. }));
    }

    #[test]
    fn empty_input_is_an_error() {
        let err = import_csv_to_worksheet("Export", b"", &CsvOptions::default()).unwrap_err();
        assert!(matches!(err, CsvImportError::EmptyInput));
    }
}
