#![allow(dead_code)]

use std::io::{Cursor, Write};

use rosterfill_model::col_to_name;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

pub const HEADERS: [&str; 8] = [
    "Employee ID",
    "Employee Name",
    "Date",
    "Start",
    "End",
    "Timezone",
    "Override",
    "Segment Type",
];

pub const WORKBOOK: &[u8] = br#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<workbook xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships"><sheets><sheet name="Timesheet Entries" sheetId="1" r:id="rId1"/><sheet name="Lists" sheetId="2" r:id="rId2"/></sheets></workbook>"#;

pub const WORKBOOK_RELS: &[u8] = br#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet" Target="worksheets/sheet1.xml"/><Relationship Id="rId2" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet" Target="worksheets/sheet2.xml"/><Relationship Id="rId3" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/styles" Target="styles.xml"/></Relationships>"#;

pub const STYLES: &[u8] = br#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<styleSheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><cellXfs count="1"><xf numFmtId="0" fontId="0" fillId="0" borderId="0"/></cellXfs></styleSheet>"#;

pub const LISTS: &[u8] = br#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><sheetData><row r="1"><c r="A1" t="inlineStr"><is><t>Work</t></is></c></row><row r="2"><c r="A2" t="inlineStr"><is><t>Break</t></is></c></row></sheetData></worksheet>"#;

pub fn build_zip_bytes(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let cursor = Cursor::new(Vec::new());
    let mut zip = ZipWriter::new(cursor);
    let options = FileOptions::<()>::default().compression_method(CompressionMethod::Deflated);

    for (name, bytes) in entries {
        zip.start_file(*name, options).expect("start_file");
        zip.write_all(bytes).expect("write entry bytes");
    }

    zip.finish().expect("finish").into_inner()
}

pub fn sheet_data(rows: &[Vec<&str>]) -> String {
    let mut xml = String::from("<sheetData>");
    for (r, cells) in rows.iter().enumerate() {
        xml.push_str(&format!(r#"<row r="{}">"#, r + 1));
        for (c, text) in cells.iter().enumerate().filter(|(_, t)| !t.is_empty()) {
            xml.push_str(&format!(
                r#"<c r="{}{}" t="inlineStr"><is><t>{text}</t></is></c>"#,
                col_to_name(c as u32),
                r + 1
            ));
        }
        xml.push_str("</row>");
    }
    xml.push_str("</sheetData>");
    xml
}

/// Roster with one row per `(id, name)` and a segment-type dropdown on H2:H500.
pub fn template(employees: &[(&str, &str)]) -> Vec<u8> {
    let mut rows = vec![HEADERS.to_vec()];
    rows.extend(employees.iter().map(|(id, name)| vec![*id, *name]));
    let sheet = format!(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main">{}<dataValidations count="1"><dataValidation type="list" allowBlank="1" showErrorMessage="1" sqref="H2:H500"><formula1>Lists!$A$1:$A$2</formula1></dataValidation></dataValidations><pageMargins left="0.7" right="0.7" top="0.75" bottom="0.75" header="0.3" footer="0.3"/></worksheet>"#,
        sheet_data(&rows)
    );
    build_zip_bytes(&[
        ("xl/workbook.xml", WORKBOOK),
        ("xl/_rels/workbook.xml.rels", WORKBOOK_RELS),
        ("xl/styles.xml", STYLES),
        ("xl/worksheets/sheet1.xml", sheet.as_bytes()),
        ("xl/worksheets/sheet2.xml", LISTS),
    ])
}

pub fn standard_template() -> Vec<u8> {
    template(&[("111", "Ana López"), ("222", "Luis Pérez"), ("333", "Marta Ruiz")])
}
