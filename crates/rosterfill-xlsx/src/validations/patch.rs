use std::collections::BTreeMap;
use std::io::{Cursor, Write};

use quick_xml::events::{BytesEnd, BytesStart, Event};
use quick_xml::{Reader, Writer};
use rosterfill_model::{format_sqref, parse_sqref, widen_ranges_to_row};
use serde::Serialize;
use zip::ZipArchive;

use super::extract::{extract_validations, SheetValidations};
use super::namespaces::{requalify, used_prefixes, NamespaceTable};
use crate::zip_util::{
    is_worksheet_part, read_zip_entry, zip_part_names_equivalent, ZipInflateBudget,
    DEFAULT_MAX_ZIP_PART_BYTES, DEFAULT_MAX_ZIP_TOTAL_BYTES,
};
use crate::XlsxError;

const XML_DECLARATION: &[u8] =
    b"<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>\r\n";

/// Worksheet children that must follow `dataValidations`, in schema order.
const DATA_VALIDATIONS_SUCCESSORS: &[&[u8]] = &[
    b"hyperlinks",
    b"printOptions",
    b"pageMargins",
    b"pageSetup",
    b"headerFooter",
    b"rowBreaks",
    b"colBreaks",
    b"customProperties",
    b"cellWatches",
    b"ignoredErrors",
    b"smartTags",
    b"drawing",
    b"legacyDrawing",
    b"legacyDrawingHF",
    b"drawingHF",
    b"picture",
    b"oleObjects",
    b"controls",
    b"webPublishItems",
    b"tableParts",
    b"extLst",
];

/// A worksheet that could not be patched and was passed through unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PatchWarning {
    pub part: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PatchReport {
    /// Worksheet parts rewritten with the original validation markup.
    pub patched: Vec<String>,
    /// Entries present only in the original archive.
    pub copied_forward: Vec<String>,
    pub warnings: Vec<PatchWarning>,
}

#[derive(Debug, Clone)]
pub struct PatchOutcome {
    pub bytes: Vec<u8>,
    pub report: PatchReport,
}

/// Restore the validation markup of `original` into `saved`, an archive produced by
/// re-saving the same workbook.
pub fn patch_zip_with_validations(saved: &[u8], original: &[u8]) -> Result<PatchOutcome, XlsxError> {
    let snapshot = extract_validations(original)?;
    patch_zip_with_snapshot(saved, original, &snapshot)
}

/// Like [`patch_zip_with_validations`], with validations captured up front.
pub fn patch_zip_with_snapshot(
    saved: &[u8],
    original: &[u8],
    snapshot: &BTreeMap<String, SheetValidations>,
) -> Result<PatchOutcome, XlsxError> {
    let mut saved_zip = ZipArchive::new(Cursor::new(saved))?;
    let mut original_zip = ZipArchive::new(Cursor::new(original))?;

    let mut zip = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let options = zip::write::FileOptions::<()>::default()
        .compression_method(zip::CompressionMethod::Deflated);
    let mut report = PatchReport::default();

    let mut budget = ZipInflateBudget::new(DEFAULT_MAX_ZIP_TOTAL_BYTES);
    let mut saved_names = Vec::with_capacity(saved_zip.len());
    for idx in 0..saved_zip.len() {
        let (name, bytes) =
            read_zip_entry(&mut saved_zip, idx, DEFAULT_MAX_ZIP_PART_BYTES, &mut budget)?;
        saved_names.push(name.clone());
        let Some(bytes) = bytes else {
            zip.add_directory(name.as_str(), options)?;
            continue;
        };

        let original_sheet = is_worksheet_part(&name)
            .then(|| {
                snapshot
                    .iter()
                    .find(|(part, _)| zip_part_names_equivalent(part, &name))
                    .map(|(_, sheet)| sheet)
            })
            .flatten();
        let bytes = match original_sheet {
            Some(original_sheet) => match patch_sheet(&bytes, original_sheet) {
                Ok(patched) => {
                    report.patched.push(name.clone());
                    patched
                }
                Err(err) => {
                    log::warn!("leaving {name} unpatched: {err}");
                    report.warnings.push(PatchWarning {
                        part: name.clone(),
                        message: err.to_string(),
                    });
                    bytes
                }
            },
            None => bytes,
        };

        zip.start_file(name.as_str(), options)?;
        zip.write_all(&bytes)?;
    }

    let mut budget = ZipInflateBudget::new(DEFAULT_MAX_ZIP_TOTAL_BYTES);
    for idx in 0..original_zip.len() {
        let name = original_zip.by_index_raw(idx)?.name().to_string();
        if saved_names
            .iter()
            .any(|saved| zip_part_names_equivalent(saved, &name))
        {
            continue;
        }
        let (name, bytes) =
            read_zip_entry(&mut original_zip, idx, DEFAULT_MAX_ZIP_PART_BYTES, &mut budget)?;
        log::debug!("copying forward {name}, dropped by the saved archive");
        match bytes {
            Some(bytes) => {
                zip.start_file(name.as_str(), options)?;
                zip.write_all(&bytes)?;
            }
            None => zip.add_directory(name.as_str(), options)?,
        }
        report.copied_forward.push(name);
    }

    let bytes = zip.finish()?.into_inner();
    Ok(PatchOutcome { bytes, report })
}

/// Replace the validation markup of one saved worksheet with the original's.
pub(crate) fn patch_sheet(saved: &[u8], original: &SheetValidations) -> Result<Vec<u8>, XlsxError> {
    let xml = std::str::from_utf8(saved)?;
    let doc = roxmltree::Document::parse(xml)?;
    let root = doc.root_element();
    let saved_ns = NamespaceTable::from_roxml(root);
    let target_prefix = saved_ns.spreadsheetml_prefix().ok_or_else(|| {
        XlsxError::Invalid("worksheet does not bind the SpreadsheetML namespace".to_string())
    })?;

    let mut data_validations = original
        .data_validations
        .as_deref()
        .map(|fragment| widen_sqrefs(fragment, highest_populated_row(root)))
        .transpose()?;
    let mut ext_lst = original.ext_lst.clone();

    if let Some(original_prefix) = original.namespaces.spreadsheetml_prefix() {
        if original_prefix != target_prefix {
            data_validations = data_validations
                .map(|f| requalify(&f, &original.namespaces, target_prefix))
                .transpose()?;
            ext_lst = ext_lst
                .map(|f| requalify(&f, &original.namespaces, target_prefix))
                .transpose()?;
        }
    }

    let mut declarations: Vec<(String, String)> = Vec::new();
    for fragment in data_validations.iter().chain(ext_lst.iter()) {
        for prefix in used_prefixes(fragment)? {
            if saved_ns.uri(Some(prefix.as_str())).is_some()
                || declarations.iter().any(|(p, _)| *p == prefix)
            {
                continue;
            }
            // Prefixes unknown to the original root are declared inside the fragment.
            if let Some(uri) = original.namespaces.uri(Some(prefix.as_str())) {
                declarations.push((prefix, uri.to_string()));
            }
        }
    }

    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(false);
    let extra = data_validations.as_ref().map_or(0, String::len) + ext_lst.as_ref().map_or(0, String::len);
    let mut writer = Writer::new(Vec::with_capacity(XML_DECLARATION.len() + xml.len() + extra));
    writer.get_mut().extend_from_slice(XML_DECLARATION);

    let mut buf = Vec::new();
    let mut depth = 0usize;
    let mut pending_dv = data_validations.as_deref();
    loop {
        let event = reader.read_event_into(&mut buf)?;
        match &event {
            Event::Eof => break,
            // Replaced by XML_DECLARATION.
            Event::Decl(_) => {}
            Event::Text(_) if depth == 0 => {}
            Event::Start(e) if depth == 0 => {
                writer.write_event(Event::Start(with_declarations(e, &declarations)))?;
                depth = 1;
            }
            Event::Empty(e) if depth == 0 => {
                let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                writer.write_event(Event::Start(with_declarations(e, &declarations)))?;
                write_tail(&mut writer, pending_dv.take(), ext_lst.as_deref());
                writer.write_event(Event::End(BytesEnd::new(name.as_str())))?;
            }
            Event::Start(e) | Event::Empty(e) if depth == 1 => {
                let local = e.local_name();
                let is_start = matches!(event, Event::Start(_));
                let replaced = local.as_ref() == b"dataValidations"
                    || (local.as_ref() == b"extLst" && ext_lst.is_some());
                if replaced {
                    if is_start {
                        reader.read_to_end_into(e.name(), &mut Vec::new())?;
                    }
                } else {
                    if DATA_VALIDATIONS_SUCCESSORS.contains(&local.as_ref()) {
                        if let Some(fragment) = pending_dv.take() {
                            writer.get_mut().extend_from_slice(fragment.as_bytes());
                        }
                    }
                    writer.write_event(event.to_owned())?;
                    if is_start {
                        depth += 1;
                    }
                }
            }
            Event::Start(_) => {
                writer.write_event(event.to_owned())?;
                depth += 1;
            }
            Event::End(_) if depth == 1 => {
                write_tail(&mut writer, pending_dv.take(), ext_lst.as_deref());
                writer.write_event(event.to_owned())?;
                depth = 0;
            }
            Event::End(_) => {
                writer.write_event(event.to_owned())?;
                depth = depth.saturating_sub(1);
            }
            _ => writer.write_event(event.to_owned())?,
        }
        buf.clear();
    }

    Ok(writer.into_inner())
}

fn write_tail(writer: &mut Writer<Vec<u8>>, data_validations: Option<&str>, ext_lst: Option<&str>) {
    for fragment in [data_validations, ext_lst].into_iter().flatten() {
        writer.get_mut().extend_from_slice(fragment.as_bytes());
    }
}

fn with_declarations(root: &BytesStart<'_>, declarations: &[(String, String)]) -> BytesStart<'static> {
    let mut start = root.clone().into_owned();
    for (prefix, uri) in declarations {
        let key = format!("xmlns:{prefix}");
        start.push_attribute((key.as_str(), uri.as_str()));
    }
    start
}

/// Highest 0-indexed row of `sheetData` holding a cell with a value, inline string or formula.
fn highest_populated_row(root: roxmltree::Node<'_, '_>) -> Option<u32> {
    let sheet_data = root
        .children()
        .find(|n| n.is_element() && n.tag_name().name() == "sheetData")?;

    let mut next_row = 0u32;
    let mut highest = None;
    for row in sheet_data
        .children()
        .filter(|n| n.is_element() && n.tag_name().name() == "row")
    {
        let row_idx = row
            .attribute("r")
            .and_then(|r| r.trim().parse::<u32>().ok())
            .filter(|r| *r > 0)
            .map(|r| r - 1)
            .unwrap_or(next_row);
        next_row = row_idx + 1;

        let populated = row
            .children()
            .filter(|c| c.is_element() && c.tag_name().name() == "c")
            .any(|c| {
                c.children()
                    .any(|n| n.is_element() && matches!(n.tag_name().name(), "v" | "is" | "f"))
            });
        if populated {
            highest = Some(highest.map_or(row_idx, |h: u32| h.max(row_idx)));
        }
    }
    highest
}

/// Extend every `dataValidation/@sqref` range that ends above `last_row` down to it.
fn widen_sqrefs(fragment: &str, last_row: Option<u32>) -> Result<String, XlsxError> {
    let Some(last_row) = last_row else {
        return Ok(fragment.to_string());
    };

    let mut reader = Reader::from_str(fragment);
    reader.config_mut().trim_text(false);
    let mut writer = Writer::new(Vec::with_capacity(fragment.len()));
    let mut buf = Vec::new();
    loop {
        let event = reader.read_event_into(&mut buf)?;
        match &event {
            Event::Eof => break,
            Event::Start(e) if e.local_name().as_ref() == b"dataValidation" => {
                writer.write_event(Event::Start(with_widened_sqref(e, last_row)?))?;
            }
            Event::Empty(e) if e.local_name().as_ref() == b"dataValidation" => {
                writer.write_event(Event::Empty(with_widened_sqref(e, last_row)?))?;
            }
            _ => writer.write_event(event.to_owned())?,
        }
        buf.clear();
    }
    Ok(String::from_utf8(writer.into_inner())?)
}

fn with_widened_sqref(e: &BytesStart<'_>, last_row: u32) -> Result<BytesStart<'static>, XlsxError> {
    let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
    let mut out = BytesStart::new(name);
    for attr in e.attributes() {
        let attr = attr?;
        if attr.key.as_ref() != b"sqref" {
            out.push_attribute(attr);
            continue;
        }
        let value = attr.unescape_value()?;
        match parse_sqref(&value) {
            Ok(ranges) => {
                let (widened, changed) = widen_ranges_to_row(&ranges, last_row);
                if changed {
                    log::debug!("widening sqref {value} to row {}", last_row + 1);
                }
                out.push_attribute(("sqref", format_sqref(&widened).as_str()));
            }
            Err(err) => {
                log::warn!("keeping unparsable sqref {value:?}: {err}");
                out.push_attribute(attr);
            }
        }
    }
    Ok(out.into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;
    use rosterfill_model::{CellRef, Range};

    const MAIN: &str = "http://schemas.openxmlformats.org/spreadsheetml/2006/main";

    fn original() -> SheetValidations {
        SheetValidations::from_worksheet_xml(&format!(
            r#"<worksheet xmlns="{MAIN}" xmlns:xr="http://schemas.microsoft.com/office/spreadsheetml/2014/revision"><sheetData><row r="2"><c r="A2"><v>1</v></c></row></sheetData><dataValidations count="1"><dataValidation type="list" sqref="H2:H3 J2:J900" xr:uid="{{00000000-0002-0000-0000-000000000000}}"><formula1>"a,b"</formula1></dataValidation></dataValidations><pageMargins left="0.7"/><extLst><ext uri="{{X}}"><x/></ext></extLst></worksheet>"#
        ))
        .unwrap()
    }

    #[test]
    fn reinserts_before_successor_and_widens() {
        let saved = format!(
            r#"<?xml version="1.0"?>
<worksheet xmlns="{MAIN}"><sheetData><row r="2"><c r="A2"><v>1</v></c></row><row r="6"><c r="A6" t="inlineStr"><is><t>x</t></is></c></row><row r="7"><c r="A7" s="1"/></row></sheetData><dataValidations count="0"/><pageMargins left="0.7"/><extLst><ext uri="{{Y}}"/></extLst></worksheet>"#
        );
        let out = patch_sheet(saved.as_bytes(), &original()).unwrap();
        let out = String::from_utf8(out).unwrap();

        assert!(out.starts_with(
            "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>\r\n<worksheet "
        ));
        assert!(out.contains(
            r#"xmlns:xr="http://schemas.microsoft.com/office/spreadsheetml/2014/revision">"#
        ));
        assert!(out.contains(
            r#"</sheetData><dataValidations count="1"><dataValidation type="list" sqref="H2:H6 J2:J900" xr:uid="{00000000-0002-0000-0000-000000000000}"><formula1>"a,b"</formula1></dataValidation></dataValidations><pageMargins left="0.7"/><extLst><ext uri="{X}"><x/></ext></extLst></worksheet>"#
        ), "{out}");
        assert!(!out.contains("{Y}"));

        let reparsed = SheetValidations::from_worksheet_xml(&out).unwrap();
        assert_eq!(reparsed.rules[0].ranges[0].end.row, 5);
    }

    #[test]
    fn appends_at_end_without_successors() {
        let saved = format!(r#"<worksheet xmlns="{MAIN}"><sheetData/></worksheet>"#);
        let out = patch_sheet(saved.as_bytes(), &original()).unwrap();
        let out = String::from_utf8(out).unwrap();
        assert!(out.ends_with(
            r#"<sheetData/><dataValidations count="1"><dataValidation type="list" sqref="H2:H3 J2:J900" xr:uid="{00000000-0002-0000-0000-000000000000}"><formula1>"a,b"</formula1></dataValidation></dataValidations><extLst><ext uri="{X}"><x/></ext></extLst></worksheet>"#
        ), "{out}");
    }

    #[test]
    fn requalifies_for_prefixed_saved_sheets() {
        let saved = format!(
            r#"<x:worksheet xmlns:x="{MAIN}"><x:sheetData/><x:pageMargins left="0.7"/></x:worksheet>"#
        );
        let out = patch_sheet(saved.as_bytes(), &original()).unwrap();
        let out = String::from_utf8(out).unwrap();
        roxmltree::Document::parse(&out).expect("valid xml");
        assert!(out.contains(r#"<x:dataValidations count="1"><x:dataValidation type="list""#), "{out}");
        assert!(out.contains("<x:formula1>"));
        assert!(out.ends_with(r#"<x:extLst><x:ext uri="{X}"><x:x/></x:ext></x:extLst></x:worksheet>"#), "{out}");

        let reparsed = SheetValidations::from_worksheet_xml(&out).unwrap();
        assert_eq!(reparsed.rules.len(), 1);
    }

    #[test]
    fn malformed_saved_sheet_is_an_error() {
        let err = patch_sheet(b"<worksheet><sheetData></worksheet>", &original()).unwrap_err();
        assert!(matches!(err, XlsxError::RoXml(_)));
    }

    #[test]
    fn highest_row_ignores_styled_blanks() {
        let xml = r#"<worksheet><sheetData><row><c><v>1</v></c></row><row r="4"><c><f>A1</f></c></row><row><c s="2"/></row></sheetData></worksheet>"#;
        let doc = roxmltree::Document::parse(xml).unwrap();
        assert_eq!(highest_populated_row(doc.root_element()), Some(3));
    }

    fn arb_column_range() -> impl Strategy<Value = Range> {
        (0u32..300, 0u32..20, 0u32..300)
            .prop_map(|(r1, col, r2)| Range::new(CellRef::new(r1, col), CellRef::new(r2, col + 1)))
    }

    proptest! {
        #[test]
        fn patched_sqrefs_reach_the_last_row_without_shrinking(
            ranges in prop::collection::vec(arb_column_range(), 1..5),
            rows in prop::collection::btree_set(0u32..400, 0..8),
        ) {
            let original = SheetValidations::from_worksheet_xml(&format!(
                r#"<worksheet xmlns="{MAIN}"><sheetData/><dataValidations count="1"><dataValidation type="list" sqref="{}"><formula1>"a,b"</formula1></dataValidation></dataValidations></worksheet>"#,
                format_sqref(&ranges)
            ))
            .unwrap();
            let sheet_data: String = rows
                .iter()
                .map(|r| format!(r#"<row r="{n}"><c r="A{n}"><v>1</v></c></row>"#, n = r + 1))
                .collect();
            let saved = format!(r#"<worksheet xmlns="{MAIN}"><sheetData>{sheet_data}</sheetData></worksheet>"#);

            let out = patch_sheet(saved.as_bytes(), &original).unwrap();
            let patched = SheetValidations::from_worksheet_xml(&String::from_utf8(out).unwrap()).unwrap();
            let widened = &patched.rules[0].ranges;
            prop_assert_eq!(widened.len(), ranges.len());

            let last_row = rows.iter().next_back().copied();
            for (before, after) in ranges.iter().zip(widened) {
                prop_assert_eq!(before.start, after.start);
                prop_assert_eq!(before.end.col, after.end.col);
                prop_assert!(after.end.row >= before.end.row);
                match last_row {
                    Some(last) if before.end.row < last => {
                        prop_assert_eq!(after.end.row, last);
                    }
                    _ => {
                        prop_assert_eq!(before, after);
                    }
                }
            }
        }
    }
}
