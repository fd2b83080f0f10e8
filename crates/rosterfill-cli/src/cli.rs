use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use rosterfill_model::{format_sqref, ValidationRule};
use rosterfill_reconcile::{ReconcileError, Strategy};
use rosterfill_xlsx::{extract_validations, patch_zip_with_validations, verify, PatchReport};
use serde::Serialize;

use crate::{run_sync, Diagnostics, SyncError, SyncOptions};

#[derive(Clone, Copy, Debug, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Parser)]
#[command(
    name = "rosterfill",
    about = "Fill an XLSX roster from a timesheet export without losing its data validations."
)]
pub struct Args {
    /// Log debug output (overrides RUST_LOG).
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write timesheet records into the roster sheet of a template.
    Sync(SyncArgs),
    /// List the data-validation blocks of every worksheet.
    Snapshot {
        workbook: PathBuf,
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },
    /// Restore the validations of `original` into `saved`.
    Patch {
        /// Workbook re-saved by another tool.
        saved: PathBuf,
        /// Workbook the validations are taken from.
        original: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },
    /// Count worksheets that carry validations. Exits non-zero when there are none.
    Verify {
        workbook: PathBuf,
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },
}

#[derive(clap::Args)]
struct SyncArgs {
    /// Roster workbook with the validations to keep.
    template: PathBuf,

    /// Timesheet export (XLSX or CSV).
    records: PathBuf,

    /// Where to write the filled workbook.
    #[arg(short, long)]
    output: PathBuf,

    /// JSON options file. Flags given on the command line take precedence.
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Roster sheet name (default: "Timesheet Entries").
    #[arg(long)]
    sheet: Option<String>,

    /// Sheet of the records workbook (default: first sheet).
    #[arg(long)]
    records_sheet: Option<String>,

    /// 1-based header row of the roster sheet.
    #[arg(long)]
    header_row: Option<u32>,

    /// 1-based header row of the records sheet.
    #[arg(long)]
    records_header_row: Option<u32>,

    /// `in-place` updates matched rows; `rebuild` rewrites one row per record.
    #[arg(long)]
    strategy: Option<Strategy>,

    /// Timezone label written where a record has none.
    #[arg(long)]
    timezone: Option<String>,

    /// Override flag written where a record has none.
    #[arg(long = "override", value_name = "VALUE")]
    override_flag: Option<String>,

    /// End time (HH:MM) for every record exported without one.
    #[arg(long, value_name = "HH:MM")]
    end_time: Option<String>,

    /// End time for one identifier. Format: `<name>=<HH:MM>`. Repeatable.
    #[arg(long = "end-time-for", value_name = "NAME=HH:MM")]
    end_time_for: Vec<String>,

    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,
}

impl SyncArgs {
    fn options(&self) -> Result<SyncOptions> {
        let mut options = match &self.config {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .with_context(|| format!("read config {}", path.display()))?;
                SyncOptions::from_json(&text)
                    .with_context(|| format!("parse config {}", path.display()))?
            }
            None => SyncOptions::default(),
        };

        if let Some(sheet) = &self.sheet {
            options.sheet = sheet.clone();
        }
        if let Some(sheet) = &self.records_sheet {
            options.records_sheet = Some(sheet.clone());
        }
        if let Some(row) = self.header_row {
            options.reconcile.header_row = row;
        }
        if let Some(row) = self.records_header_row {
            options.records_header_row = row;
        }
        if let Some(strategy) = self.strategy {
            options.reconcile.strategy = strategy;
        }
        if let Some(tz) = &self.timezone {
            options.reconcile.defaults.timezone = Some(tz.clone());
        }
        if let Some(flag) = &self.override_flag {
            options.reconcile.defaults.override_flag = Some(flag.clone());
        }
        if let Some(time) = &self.end_time {
            options.end_times.all = Some(time.clone());
        }
        for entry in &self.end_time_for {
            let (name, time) = parse_end_time_for(entry)?;
            options.end_times.per_identifier.insert(name, time);
        }
        Ok(options)
    }
}

fn parse_end_time_for(input: &str) -> Result<(String, String)> {
    let Some((name, time)) = input.rsplit_once('=') else {
        anyhow::bail!("invalid --end-time-for '{input}' (expected NAME=HH:MM)");
    };
    let name = name.trim();
    if name.is_empty() {
        anyhow::bail!("invalid --end-time-for '{input}' (name is empty)");
    }
    Ok((name.to_string(), time.trim().to_string()))
}

#[derive(Debug, Serialize)]
struct JsonSyncReport<'a> {
    output: &'a str,
    #[serde(flatten)]
    diagnostics: &'a Diagnostics,
}

#[derive(Debug, Serialize)]
struct JsonSheetValidations<'a> {
    part: &'a str,
    has_data_validations: bool,
    has_ext_lst: bool,
    ext_validation_count: usize,
    rules: &'a [ValidationRule],
}

#[derive(Debug, Serialize)]
struct JsonPatchReport<'a> {
    output: &'a str,
    #[serde(flatten)]
    report: &'a PatchReport,
    sheets_with_validations: usize,
}

#[derive(Debug, Serialize)]
struct JsonVerifyReport {
    sheets_with_validations: usize,
}

pub fn run_with_args(args: Args) -> Result<()> {
    match args.command {
        Command::Sync(sync) => run_sync_command(&sync),
        Command::Snapshot { workbook, format } => run_snapshot(&workbook, format),
        Command::Patch {
            saved,
            original,
            output,
            format,
        } => run_patch(&saved, &original, &output, format),
        Command::Verify { workbook, format } => run_verify(&workbook, format),
    }
}

fn read_input(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("read {}", path.display()))
}

fn write_output(path: &Path, bytes: &[u8]) -> Result<()> {
    std::fs::write(path, bytes).with_context(|| format!("write {}", path.display()))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let stdout = std::io::stdout();
    let mut handle = stdout.lock();
    serde_json::to_writer(&mut handle, value)?;
    handle.write_all(b"\n")?;
    Ok(())
}

fn run_sync_command(args: &SyncArgs) -> Result<()> {
    let options = args.options()?;
    let template = read_input(&args.template)?;
    let records = read_input(&args.records)?;

    let output = match run_sync(&template, &records, &options) {
        Ok(output) => output,
        Err(SyncError::Reconcile(ReconcileError::MissingEndTimes(pending))) => {
            for entry in &pending {
                eprintln!("  row {}: {}", entry.row + 1, entry.match_value);
            }
            anyhow::bail!(
                "{} record(s) have no end time; supply --end-time or --end-time-for",
                pending.len()
            );
        }
        Err(err) => {
            return Err(err).with_context(|| {
                format!(
                    "sync {} with {}",
                    args.template.display(),
                    args.records.display()
                )
            })
        }
    };
    write_output(&args.output, &output.bytes)?;

    let diagnostics = &output.diagnostics;
    match args.format {
        OutputFormat::Text => {
            println!("wrote {}", args.output.display());
            println!("rows written: {}", diagnostics.written);
            println!("rows removed: {}", diagnostics.removed);
            if diagnostics.end_times_filled > 0 {
                println!("end times filled: {}", diagnostics.end_times_filled);
            }
            println!(
                "sheets with validations: {}",
                diagnostics.sheets_with_validations
            );
            if !diagnostics.unmatched.is_empty() {
                println!("unmatched ({}):", diagnostics.unmatched.len());
                for name in &diagnostics.unmatched {
                    println!("  {name}");
                }
            }
            for warning in &diagnostics.warnings {
                println!("warning: {warning}");
            }
        }
        OutputFormat::Json => {
            let output = args.output.to_string_lossy();
            print_json(&JsonSyncReport {
                output: &output,
                diagnostics,
            })?;
        }
    }
    Ok(())
}

fn run_snapshot(path: &Path, format: OutputFormat) -> Result<()> {
    let bytes = read_input(path)?;
    let snapshot = extract_validations(&bytes)
        .with_context(|| format!("read validations of {}", path.display()))?;

    match format {
        OutputFormat::Text => {
            for (part, sheet) in &snapshot {
                if !sheet.has_validations() {
                    println!("{part}: no validations");
                    continue;
                }
                println!(
                    "{part}: {} rule(s){}",
                    sheet.rules.len(),
                    if sheet.ext_lst.is_some() {
                        format!(", extLst with {} x14 rule(s)", sheet.ext_validation_count)
                    } else {
                        String::new()
                    }
                );
                for rule in &sheet.rules {
                    println!(
                        "  {:?} {} {}",
                        rule.kind,
                        format_sqref(&rule.ranges),
                        rule.formula1
                    );
                }
            }
        }
        OutputFormat::Json => {
            let sheets: Vec<_> = snapshot
                .iter()
                .map(|(part, sheet)| JsonSheetValidations {
                    part,
                    has_data_validations: sheet.data_validations.is_some(),
                    has_ext_lst: sheet.ext_lst.is_some(),
                    ext_validation_count: sheet.ext_validation_count,
                    rules: &sheet.rules,
                })
                .collect();
            print_json(&sheets)?;
        }
    }
    Ok(())
}

fn run_patch(saved: &Path, original: &Path, output: &Path, format: OutputFormat) -> Result<()> {
    let saved_bytes = read_input(saved)?;
    let original_bytes = read_input(original)?;
    let outcome = patch_zip_with_validations(&saved_bytes, &original_bytes).with_context(|| {
        format!(
            "patch {} from {}",
            saved.display(),
            original.display()
        )
    })?;
    write_output(output, &outcome.bytes)?;
    let sheets_with_validations = verify(&outcome.bytes)?;

    let report = &outcome.report;
    match format {
        OutputFormat::Text => {
            println!("wrote {}", output.display());
            for part in &report.patched {
                println!("patched: {part}");
            }
            for part in &report.copied_forward {
                println!("copied forward: {part}");
            }
            for warning in &report.warnings {
                println!("warning: {}: {}", warning.part, warning.message);
            }
            println!("sheets with validations: {sheets_with_validations}");
        }
        OutputFormat::Json => {
            let output = output.to_string_lossy();
            print_json(&JsonPatchReport {
                output: &output,
                report,
                sheets_with_validations,
            })?;
        }
    }
    Ok(())
}

fn run_verify(path: &Path, format: OutputFormat) -> Result<()> {
    let bytes = read_input(path)?;
    let sheets_with_validations =
        verify(&bytes).with_context(|| format!("verify {}", path.display()))?;

    match format {
        OutputFormat::Text => println!("sheets with validations: {sheets_with_validations}"),
        OutputFormat::Json => print_json(&JsonVerifyReport {
            sheets_with_validations,
        })?,
    }

    if sheets_with_validations == 0 {
        std::process::exit(1);
    }
    Ok(())
}
