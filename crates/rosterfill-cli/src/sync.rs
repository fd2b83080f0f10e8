//! One reconciliation run over a (template, records) pair.
//!
//! The template's validation markup is captured before anything else touches the archive, the
//! workbook is loaded, filled and saved, and the captured markup is then patched back into the
//! saved bytes.

use chrono::NaiveTime;
use indexmap::IndexMap;
use rosterfill_model::{
    extract_time, import_csv_to_worksheet, CellValue, CsvImportError, CsvOptions, Worksheet,
};
use rosterfill_reconcile::{
    detect_columns, extract_records, pending_end_times, reconcile, EndTimeFill, ExtractedRecords,
    FieldKey, PendingEndTime, ReconcileError, ReconcileOptions, DEFAULT_MATCH_PRIORITY,
};
use rosterfill_xlsx::{
    extract_validations, load_from_bytes, patch_zip_with_snapshot, verify, XlsxError,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_SHEET: &str = "Timesheet Entries";

/// Sheet name given to records read from CSV.
const CSV_SHEET: &str = "records";

#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Xlsx(#[from] XlsxError),
    #[error(transparent)]
    Reconcile(#[from] ReconcileError),
    #[error("records csv: {0}")]
    Csv(#[from] CsvImportError),
    #[error("sheet {0:?} not found")]
    SheetNotFound(String),
    #[error("{0}")]
    Input(String),
}

/// End times supplied for records exported without one.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EndTimeOptions {
    /// `HH:MM` used for every pending record not covered by `per_identifier`.
    pub all: Option<String>,
    /// Match value -> `HH:MM`.
    pub per_identifier: IndexMap<String, String>,
}

impl EndTimeOptions {
    pub fn is_empty(&self) -> bool {
        self.all.is_none() && self.per_identifier.is_empty()
    }

    /// Apply per-identifier times first, then the bulk time. Returns how many were filled.
    fn apply(&self, records: &mut ExtractedRecords) -> Result<usize, SyncError> {
        let mut filled = 0;
        if !self.per_identifier.is_empty() {
            let times = self
                .per_identifier
                .iter()
                .map(|(name, time)| Ok((name.as_str(), parse_end_time(time)?)))
                .collect::<Result<Vec<_>, SyncError>>()?;
            filled += EndTimeFill::per_identifier(times).apply(records);
        }
        if let Some(time) = &self.all {
            filled += EndTimeFill::Bulk(parse_end_time(time)?).apply(records);
        }
        Ok(filled)
    }
}

/// Parse a user-supplied end time. Midnight is rejected since it is what marks a time missing.
pub fn parse_end_time(text: &str) -> Result<NaiveTime, SyncError> {
    let time = extract_time(&CellValue::from(text))
        .ok_or_else(|| SyncError::Input(format!("invalid end time {text:?} (expected HH:MM)")))?;
    if time == NaiveTime::MIN {
        return Err(SyncError::Input(format!(
            "end time {text:?} is midnight, which reads as missing"
        )));
    }
    Ok(time)
}

/// Options of a sync run. Loadable from JSON; every field is optional there.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncOptions {
    /// Roster sheet in the template.
    pub sheet: String,
    /// Sheet of the records workbook to read. `None` reads the first sheet.
    pub records_sheet: Option<String>,
    /// 1-based header row of the records sheet.
    pub records_header_row: u32,
    /// Identity fields tried, in order, as the match key.
    pub match_priority: Vec<FieldKey>,
    pub end_times: EndTimeOptions,
    #[serde(flatten)]
    pub reconcile: ReconcileOptions,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            sheet: DEFAULT_SHEET.to_string(),
            records_sheet: None,
            records_header_row: 1,
            match_priority: DEFAULT_MATCH_PRIORITY.to_vec(),
            end_times: EndTimeOptions::default(),
            reconcile: ReconcileOptions::default(),
        }
    }
}

impl SyncOptions {
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

/// What a sync run did.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Diagnostics {
    pub written: usize,
    pub removed: usize,
    /// Record identifiers with no roster row, as they appear in the records.
    pub unmatched: Vec<String>,
    /// End times filled from the supplied options.
    pub end_times_filled: usize,
    /// Worksheets of the output that still carry validations.
    pub sheets_with_validations: usize,
    pub warnings: Vec<String>,
}

#[derive(Debug)]
pub struct SyncOutput {
    pub bytes: Vec<u8>,
    pub diagnostics: Diagnostics,
}

/// Records of `records_bytes` still lacking an end time once `options.end_times` is applied.
///
/// This is the list a caller has to resolve before [`run_sync`] will proceed.
pub fn pending_records(
    records_bytes: &[u8],
    options: &SyncOptions,
) -> Result<Vec<PendingEndTime>, SyncError> {
    let mut records = read_records(records_bytes, options)?;
    options.end_times.apply(&mut records)?;
    Ok(pending_end_times(&records))
}

/// Fill the roster of `template` from `records_bytes` and return the saved template with its
/// original validations restored.
pub fn run_sync(
    template: &[u8],
    records_bytes: &[u8],
    options: &SyncOptions,
) -> Result<SyncOutput, SyncError> {
    let snapshot = extract_validations(template)?;
    let expected = snapshot.values().filter(|s| s.has_validations()).count();

    let mut records = read_records(records_bytes, options)?;
    let end_times_filled = options.end_times.apply(&mut records)?;

    let mut document = load_from_bytes(template)?;
    let (sheet, styles) = document
        .workbook
        .sheet_and_styles_mut(&options.sheet)
        .ok_or_else(|| SyncError::SheetNotFound(options.sheet.clone()))?;
    let outcome = reconcile(sheet, styles, &records, &options.reconcile)?;

    let saved = document.save_to_vec()?;
    let patched = patch_zip_with_snapshot(&saved, template, &snapshot)?;
    let sheets_with_validations = verify(&patched.bytes)?;

    let mut warnings: Vec<String> = patched
        .report
        .warnings
        .iter()
        .map(|w| format!("{}: {}", w.part, w.message))
        .collect();
    if sheets_with_validations < expected {
        log::warn!("validations survive on {sheets_with_validations} of {expected} sheet(s)");
        warnings.push(format!(
            "validations survive on {sheets_with_validations} of {expected} sheet(s)"
        ));
    }

    Ok(SyncOutput {
        bytes: patched.bytes,
        diagnostics: Diagnostics {
            written: outcome.written,
            removed: outcome.removed,
            unmatched: outcome.unmatched,
            end_times_filled,
            sheets_with_validations,
            warnings,
        },
    })
}

fn read_records(bytes: &[u8], options: &SyncOptions) -> Result<ExtractedRecords, SyncError> {
    let sheet = records_sheet(bytes, options)?;
    let header = options.records_header_row.saturating_sub(1);
    let columns = detect_columns(&sheet, header);
    Ok(extract_records(
        &sheet,
        &columns,
        header,
        &options.match_priority,
    )?)
}

fn records_sheet(bytes: &[u8], options: &SyncOptions) -> Result<Worksheet, SyncError> {
    if bytes.is_empty() {
        return Err(SyncError::Input("records input is empty".to_string()));
    }
    if !bytes.starts_with(b"PK") {
        if options.records_sheet.is_some() {
            log::debug!("records are CSV; ignoring the records sheet name");
        }
        return Ok(import_csv_to_worksheet(
            CSV_SHEET,
            bytes,
            &CsvOptions::default(),
        )?);
    }

    let workbook = load_from_bytes(bytes)?.workbook;
    let found = match &options.records_sheet {
        Some(name) => workbook.sheet(name),
        None => workbook.first_sheet(),
    };
    found
        .cloned()
        .ok_or_else(|| {
            SyncError::SheetNotFound(
                options
                    .records_sheet
                    .clone()
                    .unwrap_or_else(|| "(first sheet)".to_string()),
            )
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rosterfill_reconcile::Strategy;

    #[test]
    fn json_options_fill_in_defaults() {
        let options = SyncOptions::from_json(
            r#"{
                "sheet": "Plantilla",
                "strategy": "rebuild",
                "defaults": { "timezone": "Europe/Madrid" },
                "end_times": { "per_identifier": { "Ana": "17:30" } }
            }"#,
        )
        .unwrap();
        assert_eq!(options.sheet, "Plantilla");
        assert_eq!(options.reconcile.strategy, Strategy::Rebuild);
        assert_eq!(options.reconcile.header_row, 1);
        assert_eq!(
            options.reconcile.defaults.timezone.as_deref(),
            Some("Europe/Madrid")
        );
        assert_eq!(options.match_priority, DEFAULT_MATCH_PRIORITY.to_vec());
        assert_eq!(options.end_times.per_identifier["Ana"], "17:30");
    }

    #[test]
    fn empty_json_is_the_default() {
        assert_eq!(SyncOptions::from_json("{}").unwrap(), SyncOptions::default());
    }

    #[test]
    fn end_time_input_is_checked() {
        assert_eq!(
            parse_end_time("14:30").unwrap(),
            NaiveTime::from_hms_opt(14, 30, 0).unwrap()
        );
        assert!(matches!(parse_end_time("00:00"), Err(SyncError::Input(_))));
        assert!(matches!(parse_end_time("soon"), Err(SyncError::Input(_))));
    }

    #[test]
    fn csv_records_report_pending_end_times() {
        let csv = "Employee ID;Start;End\n111;08:00;16:00\n222;09:00;00:00\n333;10:00;\n";
        let mut options = SyncOptions::default();
        let pending = pending_records(csv.as_bytes(), &options).unwrap();
        assert_eq!(
            pending.iter().map(|p| p.match_value.as_str()).collect::<Vec<_>>(),
            vec!["222", "333"]
        );

        options
            .end_times
            .per_identifier
            .insert("222".to_string(), "18:00".to_string());
        let pending = pending_records(csv.as_bytes(), &options).unwrap();
        assert_eq!(pending.len(), 1);

        options.end_times.all = Some("19:00".to_string());
        assert!(pending_records(csv.as_bytes(), &options).unwrap().is_empty());
    }

    #[test]
    fn empty_records_are_rejected() {
        let err = pending_records(b"", &SyncOptions::default()).unwrap_err();
        assert!(matches!(err, SyncError::Input(_)));
    }
}
