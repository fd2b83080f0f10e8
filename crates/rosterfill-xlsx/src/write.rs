//! Part-preserving save.
//!
//! Only cells that differ from the loaded snapshot are rewritten. Every other byte of the
//! worksheet part (row attributes, untouched cells, sheet views, validations, extension lists)
//! is streamed through, and unrelated package parts are written back unchanged.

use std::collections::BTreeMap;

use quick_xml::escape::escape;
use quick_xml::events::{BytesEnd, BytesStart, Event};
use quick_xml::{Reader, Writer};
use rosterfill_model::{
    value_to_serial, CellRef, CellValue, DateSystem, Range, Worksheet,
};

use crate::openxml::{element_prefix, prefixed_tag, relationship_targets, resolve_target};
use crate::read::{parse_row_r, SHARED_STRINGS_PART, STYLES_PART};
use crate::shared_strings::{needs_space_preserve, SharedStringTable};
use crate::styles::{write_styles, MINIMAL_STYLES_XML};
use crate::{XlsxDocument, XlsxError, XlsxPackage};

const WORKBOOK_RELS_PART: &str = "xl/_rels/workbook.xml.rels";
const CONTENT_TYPES_PART: &str = "[Content_Types].xml";
const STYLES_REL_TYPE: &str =
    "http://schemas.openxmlformats.org/officeDocument/2006/relationships/styles";
const STYLES_CONTENT_TYPE: &str =
    "application/vnd.openxmlformats-officedocument.spreadsheetml.styles+xml";

/// New content for one cell.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct CellEdit {
    pub value: CellValue,
    pub style_id: u32,
}

/// Row-major edits keyed by 0-indexed `(row, col)`.
pub(crate) type SheetEdits = BTreeMap<(u32, u32), CellEdit>;

/// Cells of `current` that differ from `original`. Cells removed from the model become
/// unstyled blanks.
pub(crate) fn diff_sheet(original: &Worksheet, current: &Worksheet) -> SheetEdits {
    let mut edits = SheetEdits::new();
    for (at, cell) in current.iter() {
        if original.cell(at) != Some(cell) {
            edits.insert(
                (at.row, at.col),
                CellEdit {
                    value: cell.value.clone(),
                    style_id: cell.style_id,
                },
            );
        }
    }
    for (at, _) in original.iter() {
        if current.cell(at).is_none() {
            edits.insert(
                (at.row, at.col),
                CellEdit {
                    value: CellValue::Empty,
                    style_id: 0,
                },
            );
        }
    }
    edits
}

pub(crate) fn write_to_vec(doc: &XlsxDocument) -> Result<Vec<u8>, XlsxError> {
    let mut package = doc.package().clone();
    let mut shared_strings = doc.shared_strings().cloned();
    let date_system = doc.workbook.date_system;

    for (idx, sheet) in doc.workbook.sheets.iter().enumerate() {
        let (Some(part), Some(original)) = (doc.sheet_part(idx), doc.original_sheet(idx)) else {
            return Err(XlsxError::Invalid(format!(
                "sheet {:?} has no worksheet part",
                sheet.name
            )));
        };
        let edits = diff_sheet(original, sheet);
        if edits.is_empty() {
            continue;
        }
        log::debug!("rewriting {} cells in {part}", edits.len());

        let xml = package
            .part(part)
            .ok_or_else(|| XlsxError::MissingPart(part.to_string()))?;
        let ctx = PatchContext {
            date_system,
            dimension: used_range(sheet),
        };
        let updated = patch_worksheet_xml(xml, &edits, &ctx, shared_strings.as_mut())?;
        package.set_part(part.to_string(), updated);
    }

    if doc.workbook.styles.is_dirty() {
        if package.part(STYLES_PART).is_none() {
            register_styles_part(&mut package)?;
        }
        let original = match package.part(STYLES_PART) {
            Some(bytes) => std::str::from_utf8(bytes)?,
            None => MINIMAL_STYLES_XML,
        };
        let updated = write_styles(original, &doc.workbook.styles)?;
        package.set_part(STYLES_PART, updated);
    }

    if let Some(sst) = shared_strings.as_ref().filter(|sst| sst.is_dirty()) {
        let original = package
            .part(SHARED_STRINGS_PART)
            .ok_or_else(|| XlsxError::MissingPart(SHARED_STRINGS_PART.to_string()))?;
        let updated = sst.write_into(std::str::from_utf8(original)?)?;
        package.set_part(SHARED_STRINGS_PART, updated);
    }

    package.write_to_bytes()
}

/// Declare a new `xl/styles.xml` in the workbook relationships and the content types.
fn register_styles_part(package: &mut XlsxPackage) -> Result<(), XlsxError> {
    log::debug!("package has no {STYLES_PART}; creating one");

    if let Some(rels) = package.part(WORKBOOK_RELS_PART) {
        let targets = relationship_targets(rels)?;
        let declared = targets
            .iter()
            .any(|(_, target)| resolve_target("xl/workbook.xml", target) == STYLES_PART);
        if !declared {
            let next_id = targets
                .iter()
                .filter_map(|(id, _)| id.strip_prefix("rId")?.parse::<u32>().ok())
                .max()
                .unwrap_or(0)
                + 1;
            let entry = format!(
                r#"<Relationship Id="rId{next_id}" Type="{STYLES_REL_TYPE}" Target="styles.xml"/>"#
            );
            let updated = insert_before_root_end(rels, &entry)?;
            package.set_part(WORKBOOK_RELS_PART, updated);
        }
    }

    if let Some(types) = package.part(CONTENT_TYPES_PART) {
        if !std::str::from_utf8(types)?.contains(r#"PartName="/xl/styles.xml""#) {
            let entry = format!(
                r#"<Override PartName="/xl/styles.xml" ContentType="{STYLES_CONTENT_TYPE}"/>"#
            );
            let updated = insert_before_root_end(types, &entry)?;
            package.set_part(CONTENT_TYPES_PART, updated);
        }
    }
    Ok(())
}

fn insert_before_root_end(xml: &[u8], entry: &str) -> Result<Vec<u8>, XlsxError> {
    let text = std::str::from_utf8(xml)?;
    let pos = text
        .rfind("</")
        .ok_or_else(|| XlsxError::Invalid("part has no closing root tag".to_string()))?;
    Ok([&text[..pos], entry, &text[pos..]].concat().into_bytes())
}

/// Bounding box of every stored cell, used for `<dimension ref>`.
fn used_range(sheet: &Worksheet) -> Option<Range> {
    let mut cells = sheet.iter().map(|(at, _)| at);
    let first = cells.next()?;
    let (mut min, mut max) = (first, first);
    for at in cells {
        min = CellRef::new(min.row.min(at.row), min.col.min(at.col));
        max = CellRef::new(max.row.max(at.row), max.col.max(at.col));
    }
    Some(Range::new(min, max))
}

struct PatchContext {
    date_system: DateSystem,
    dimension: Option<Range>,
}

/// Group edits by 1-based row number, columns ascending.
fn by_row(edits: &SheetEdits) -> BTreeMap<u32, Vec<(u32, &CellEdit)>> {
    let mut out: BTreeMap<u32, Vec<(u32, &CellEdit)>> = BTreeMap::new();
    for (&(row0, col0), edit) in edits {
        out.entry(row0 + 1).or_default().push((col0, edit));
    }
    out
}

/// Streaming state shared by the sheetData/row/cell writers.
struct SheetWriter<'a> {
    writer: Writer<Vec<u8>>,
    prefix: Option<String>,
    rows: BTreeMap<u32, Vec<(u32, &'a CellEdit)>>,
    pending_rows: Vec<u32>,
    next_pending: usize,
    date_system: DateSystem,
    shared_strings: Option<&'a mut SharedStringTable>,
}

fn patch_worksheet_xml(
    original: &[u8],
    edits: &SheetEdits,
    ctx: &PatchContext,
    shared_strings: Option<&mut SharedStringTable>,
) -> Result<Vec<u8>, XlsxError> {
    let rows = by_row(edits);
    let pending_rows = rows.keys().copied().collect();

    let mut reader = Reader::from_reader(original);
    reader.config_mut().trim_text(false);
    let mut out = SheetWriter {
        writer: Writer::new(Vec::with_capacity(original.len() + edits.len() * 64)),
        prefix: None,
        rows,
        pending_rows,
        next_pending: 0,
        date_system: ctx.date_system,
        shared_strings,
    };

    let mut buf = Vec::new();
    let mut saw_sheet_data = false;
    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) if e.local_name().as_ref() == b"worksheet" => {
                out.prefix = element_prefix(e.name().as_ref())
                    .map(|p| String::from_utf8_lossy(p).into_owned());
                out.writer.write_event(Event::Start(e.into_owned()))?;
            }
            Event::Empty(e) if e.local_name().as_ref() == b"dimension" => {
                let updated = with_dimension(&e, ctx.dimension)?;
                out.writer.write_event(Event::Empty(updated))?;
            }
            Event::Start(e) if e.local_name().as_ref() == b"sheetData" => {
                saw_sheet_data = true;
                out.writer.write_event(Event::Start(e.into_owned()))?;
                out.patch_sheet_data(&mut reader)?;
            }
            Event::Empty(e) if e.local_name().as_ref() == b"sheetData" => {
                saw_sheet_data = true;
                // `<sheetData/>` becomes `<sheetData>...</sheetData>`.
                let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                out.writer.write_event(Event::Start(e.into_owned()))?;
                out.flush_rows_before(u32::MAX)?;
                out.writer
                    .write_event(Event::End(BytesEnd::new(name.as_str())))?;
            }
            Event::End(e) if e.local_name().as_ref() == b"worksheet" => {
                if !saw_sheet_data {
                    let tag = prefixed_tag(out.prefix.as_deref(), "sheetData");
                    out.writer
                        .write_event(Event::Start(BytesStart::new(tag.as_str())))?;
                    out.flush_rows_before(u32::MAX)?;
                    out.writer.write_event(Event::End(BytesEnd::new(tag.as_str())))?;
                }
                out.writer.write_event(Event::End(e.into_owned()))?;
            }
            Event::Eof => break,
            ev => out.writer.write_event(ev.into_owned())?,
        }
        buf.clear();
    }

    Ok(out.writer.into_inner())
}

fn with_dimension(e: &BytesStart<'_>, range: Option<Range>) -> Result<BytesStart<'static>, XlsxError> {
    let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
    let reference = range.map(|r| r.to_string()).unwrap_or_else(|| "A1".to_string());
    let mut out = BytesStart::new(name);
    for attr in e.attributes() {
        let attr = attr?;
        if attr.key.as_ref() == b"ref" {
            out.push_attribute(("ref", reference.as_str()));
        } else {
            out.push_attribute(attr);
        }
    }
    Ok(out.into_owned())
}

impl<'a> SheetWriter<'a> {
    fn tag(&self, local: &str) -> String {
        prefixed_tag(self.prefix.as_deref(), local)
    }

    /// Write every pending edited row numbered below `row_num` as a new `<row>`.
    fn flush_rows_before(&mut self, row_num: u32) -> Result<(), XlsxError> {
        while self.next_pending < self.pending_rows.len()
            && self.pending_rows[self.next_pending] < row_num
        {
            let row = self.pending_rows[self.next_pending];
            self.next_pending += 1;
            let cells = self.rows.get(&row).cloned().unwrap_or_default();

            let tag = self.tag("row");
            let mut start = BytesStart::new(tag.as_str());
            start.push_attribute(("r", row.to_string().as_str()));
            self.writer.write_event(Event::Start(start))?;
            for (col, edit) in cells {
                self.write_cell(row, col, edit, None)?;
            }
            self.writer.write_event(Event::End(BytesEnd::new(tag.as_str())))?;
        }
        Ok(())
    }

    /// Claim the edits of `row_num`, if it is the next pending row.
    fn take_row(&mut self, row_num: u32) -> Option<Vec<(u32, &'a CellEdit)>> {
        if self.pending_rows.get(self.next_pending) == Some(&row_num) {
            self.next_pending += 1;
            self.rows.get(&row_num).cloned()
        } else {
            None
        }
    }

    fn patch_sheet_data(&mut self, reader: &mut Reader<&[u8]>) -> Result<(), XlsxError> {
        let mut buf = Vec::new();
        let mut next_row = 1u32;
        loop {
            match reader.read_event_into(&mut buf)? {
                Event::Start(e) if e.local_name().as_ref() == b"row" => {
                    let row_num = parse_row_r(&e)?.map(|r| r + 1).unwrap_or(next_row);
                    next_row = row_num + 1;
                    self.flush_rows_before(row_num)?;
                    match self.take_row(row_num) {
                        Some(cells) => {
                            self.writer.write_event(Event::Start(without_spans(&e)?))?;
                            self.patch_row(reader, row_num, &cells)?;
                        }
                        None => self.writer.write_event(Event::Start(e.into_owned()))?,
                    }
                }
                Event::Empty(e) if e.local_name().as_ref() == b"row" => {
                    let row_num = parse_row_r(&e)?.map(|r| r + 1).unwrap_or(next_row);
                    next_row = row_num + 1;
                    self.flush_rows_before(row_num)?;
                    match self.take_row(row_num) {
                        Some(cells) => {
                            // `<row/>` becomes `<row>...</row>`.
                            let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                            self.writer.write_event(Event::Start(without_spans(&e)?))?;
                            for (col, edit) in cells {
                                self.write_cell(row_num, col, edit, None)?;
                            }
                            self.writer
                                .write_event(Event::End(BytesEnd::new(name.as_str())))?;
                        }
                        None => self.writer.write_event(Event::Empty(e.into_owned()))?,
                    }
                }
                Event::End(e) if e.local_name().as_ref() == b"sheetData" => {
                    self.flush_rows_before(u32::MAX)?;
                    self.writer.write_event(Event::End(e.into_owned()))?;
                    break;
                }
                Event::Eof => {
                    return Err(XlsxError::Invalid(
                        "unexpected eof while patching sheetData".to_string(),
                    ))
                }
                ev => self.writer.write_event(ev.into_owned())?,
            }
            buf.clear();
        }
        Ok(())
    }

    fn patch_row(
        &mut self,
        reader: &mut Reader<&[u8]>,
        row_num: u32,
        edits: &[(u32, &CellEdit)],
    ) -> Result<(), XlsxError> {
        let mut buf = Vec::new();
        let mut edit_idx = 0usize;
        let mut next_col = 0u32;

        loop {
            let event = reader.read_event_into(&mut buf)?;
            let (e, is_empty) = match &event {
                Event::Start(e) if e.local_name().as_ref() == b"c" => (e, false),
                Event::Empty(e) if e.local_name().as_ref() == b"c" => (e, true),
                Event::End(e) if e.local_name().as_ref() == b"row" => {
                    for (col, edit) in &edits[edit_idx..] {
                        self.write_cell(row_num, *col, edit, None)?;
                    }
                    self.writer.write_event(event.to_owned())?;
                    break;
                }
                Event::Eof => {
                    return Err(XlsxError::Invalid(
                        "unexpected eof while patching row".to_string(),
                    ))
                }
                _ => {
                    self.writer.write_event(event.to_owned())?;
                    buf.clear();
                    continue;
                }
            };

            let (col, existing_t) = cell_col_and_type(e, next_col)?;
            next_col = col + 1;
            while edit_idx < edits.len() && edits[edit_idx].0 < col {
                let (edit_col, edit) = edits[edit_idx];
                self.write_cell(row_num, edit_col, edit, None)?;
                edit_idx += 1;
            }

            if edit_idx < edits.len() && edits[edit_idx].0 == col {
                let edit = edits[edit_idx].1;
                edit_idx += 1;
                if !is_empty {
                    reader.read_to_end_into(e.name(), &mut Vec::new())?;
                }
                self.write_cell(row_num, col, edit, existing_t.as_deref())?;
            } else {
                self.writer.write_event(event.to_owned())?;
            }
            buf.clear();
        }
        Ok(())
    }

    fn write_cell(
        &mut self,
        row_num: u32,
        col: u32,
        edit: &CellEdit,
        existing_t: Option<&str>,
    ) -> Result<(), XlsxError> {
        let a1 = CellRef::new(row_num - 1, col).to_a1();
        let c = self.tag("c");
        let v = self.tag("v");
        let is = self.tag("is");
        let t = self.tag("t");

        let mut cell = format!(r#"<{c} r="{a1}""#);
        if edit.style_id != 0 {
            cell.push_str(&format!(r#" s="{}""#, edit.style_id));
        }

        let mut ty: Option<&'static str> = None;
        let mut body = String::new();
        match &edit.value {
            CellValue::Empty => {}
            CellValue::Number(n) => body = format!("<{v}>{n}</{v}>"),
            CellValue::Boolean(b) => {
                ty = Some("b");
                body = format!("<{v}>{}</{v}>", if *b { "1" } else { "0" });
            }
            value @ (CellValue::Date(_) | CellValue::Time(_) | CellValue::DateTime(_)) => {
                if let Some(serial) = value_to_serial(value, self.date_system) {
                    body = format!("<{v}>{serial}</{v}>");
                }
            }
            CellValue::String(s) => {
                let shared = self
                    .shared_strings
                    .as_deref_mut()
                    .filter(|_| existing_t != Some("inlineStr"));
                match shared {
                    Some(sst) => {
                        ty = Some("s");
                        body = format!("<{v}>{}</{v}>", sst.intern(s));
                    }
                    None => {
                        ty = Some("inlineStr");
                        let space = if needs_space_preserve(s) {
                            r#" xml:space="preserve""#
                        } else {
                            ""
                        };
                        body = format!("<{is}><{t}{space}>{}</{t}></{is}>", escape(s.as_str()));
                    }
                }
            }
        }

        if let Some(ty) = ty {
            cell.push_str(&format!(r#" t="{ty}""#));
        }
        if body.is_empty() {
            cell.push_str("/>");
        } else {
            cell.push('>');
            cell.push_str(&body);
            cell.push_str(&format!("</{c}>"));
        }

        self.writer.get_mut().extend_from_slice(cell.as_bytes());
        Ok(())
    }
}

/// Row start with `spans` dropped; the hint may no longer cover the row's cells.
fn without_spans(e: &BytesStart<'_>) -> Result<BytesStart<'static>, XlsxError> {
    let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
    let mut out = BytesStart::new(name);
    for attr in e.attributes() {
        let attr = attr?;
        if attr.key.as_ref() != b"spans" {
            out.push_attribute(attr);
        }
    }
    Ok(out.into_owned())
}

fn cell_col_and_type(
    e: &BytesStart<'_>,
    implicit_col: u32,
) -> Result<(u32, Option<String>), XlsxError> {
    let mut col = implicit_col;
    let mut t = None;
    for attr in e.attributes() {
        let attr = attr?;
        match attr.key.as_ref() {
            b"r" => {
                let a1 = attr.unescape_value()?;
                col = CellRef::from_a1(&a1)
                    .map_err(|err| XlsxError::Invalid(format!("invalid cell ref {a1:?}: {err}")))?
                    .col;
            }
            b"t" => t = Some(attr.unescape_value()?.into_owned()),
            _ => {}
        }
    }
    Ok((col, t))
}
