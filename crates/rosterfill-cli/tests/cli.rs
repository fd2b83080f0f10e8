use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use pretty_assertions::assert_eq;

mod common;

use common::{build_zip_bytes, standard_template, LISTS, WORKBOOK, WORKBOOK_RELS};

fn rosterfill(args: &[&dyn AsRef<OsStr>]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_rosterfill"))
        .args(args)
        .output()
        .expect("run rosterfill")
}

fn write(dir: &Path, name: &str, bytes: &[u8]) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, bytes).expect("write input");
    path
}

#[test]
fn sync_writes_output_and_json_diagnostics() {
    let dir = tempfile::tempdir().expect("temp dir");
    let template = write(dir.path(), "template.xlsx", &standard_template());
    let records = write(
        dir.path(),
        "export.csv",
        b"Employee ID;Date;Start;End\n111;05/03/2024;08:00;\n999;05/03/2024;08:00;16:00\n",
    );
    let out = dir.path().join("filled.xlsx");

    let missing = rosterfill(&[&"sync", &template, &records, &"-o", &out]);
    assert!(!missing.status.success());
    assert!(String::from_utf8_lossy(&missing.stderr).contains("row 2: 111"));
    assert!(!out.exists());

    let done = rosterfill(&[
        &"sync",
        &template,
        &records,
        &"-o",
        &out,
        &"--end-time-for",
        &"111=15:00",
        &"--format",
        &"json",
    ]);
    assert!(
        done.status.success(),
        "stderr:\n{}",
        String::from_utf8_lossy(&done.stderr)
    );
    let report: serde_json::Value = serde_json::from_slice(&done.stdout).expect("json report");
    assert_eq!(report["written"], 1);
    assert_eq!(report["unmatched"], serde_json::json!(["999"]));
    assert_eq!(report["end_times_filled"], 1);
    assert_eq!(report["sheets_with_validations"], 1);

    let verify = rosterfill(&[&"verify", &out]);
    assert!(verify.status.success());
    assert_eq!(
        String::from_utf8_lossy(&verify.stdout).trim(),
        "sheets with validations: 1"
    );
}

#[test]
fn verify_fails_without_validations() {
    let dir = tempfile::tempdir().expect("temp dir");
    let plain = build_zip_bytes(&[
        ("xl/workbook.xml", WORKBOOK),
        ("xl/_rels/workbook.xml.rels", WORKBOOK_RELS),
        ("xl/worksheets/sheet1.xml", LISTS),
        ("xl/worksheets/sheet2.xml", LISTS),
    ]);
    let path = write(dir.path(), "plain.xlsx", &plain);

    let output = rosterfill(&[&"verify", &path, &"--format", &"json"]);
    assert!(!output.status.success());
    let report: serde_json::Value = serde_json::from_slice(&output.stdout).expect("json report");
    assert_eq!(report["sheets_with_validations"], 0);
}

#[test]
fn patch_restores_validations_into_a_resaved_file() {
    let dir = tempfile::tempdir().expect("temp dir");
    let original = write(dir.path(), "original.xlsx", &standard_template());
    let resaved = write(
        dir.path(),
        "resaved.xlsx",
        &build_zip_bytes(&[
            ("xl/workbook.xml", WORKBOOK),
            ("xl/_rels/workbook.xml.rels", WORKBOOK_RELS),
            ("xl/worksheets/sheet1.xml", LISTS),
            ("xl/worksheets/sheet2.xml", LISTS),
        ]),
    );
    let out = dir.path().join("patched.xlsx");

    let output = rosterfill(&[&"patch", &resaved, &original, &"-o", &out]);
    assert!(
        output.status.success(),
        "stderr:\n{}",
        String::from_utf8_lossy(&output.stderr)
    );
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("patched: xl/worksheets/sheet1.xml"), "{stdout}");
    assert!(stdout.contains("copied forward: xl/styles.xml"), "{stdout}");

    let snapshot = rosterfill(&[&"snapshot", &out]);
    let stdout = String::from_utf8_lossy(&snapshot.stdout);
    assert!(stdout.contains("xl/worksheets/sheet1.xml: 1 rule(s)"), "{stdout}");
    assert!(stdout.contains("List H2:H500"), "{stdout}");
}
