use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use rosterfill_model::{
    serial_to_value, Cell, CellRef, CellValue, DateSystem, StyleTable, Workbook, Worksheet,
};

use crate::package::XlsxPackage;
use crate::shared_strings::{read_string_item, read_text, SharedStringTable};
use crate::sheet_metadata::parse_date_system;
use crate::styles::{parse_styles, MINIMAL_STYLES_XML};
use crate::validations::read_validation_rules;
use crate::zip_util::is_worksheet_part;
use crate::{XlsxDocument, XlsxError};

pub(crate) const STYLES_PART: &str = "xl/styles.xml";
pub(crate) const SHARED_STRINGS_PART: &str = "xl/sharedStrings.xml";

/// Load a workbook from XLSX bytes, keeping the package for a part-preserving save.
pub fn load_from_bytes(bytes: &[u8]) -> Result<XlsxDocument, XlsxError> {
    load_from_package(XlsxPackage::from_bytes(bytes)?)
}

pub fn load_from_package(package: XlsxPackage) -> Result<XlsxDocument, XlsxError> {
    let workbook_xml = package
        .part("xl/workbook.xml")
        .ok_or_else(|| XlsxError::MissingPart("xl/workbook.xml".to_string()))?;
    let date_system = parse_date_system(std::str::from_utf8(workbook_xml)?)?;

    let styles = match package.part(STYLES_PART) {
        Some(bytes) => parse_styles(std::str::from_utf8(bytes)?)?,
        None => parse_styles(MINIMAL_STYLES_XML)?,
    };
    let shared_strings = package
        .part(SHARED_STRINGS_PART)
        .map(|bytes| SharedStringTable::parse(std::str::from_utf8(bytes)?))
        .transpose()?;

    let mut workbook = Workbook::new();
    workbook.date_system = date_system;
    let mut sheet_parts = Vec::new();

    for info in package.worksheet_parts()? {
        if !is_worksheet_part(&info.worksheet_part) {
            log::debug!(
                "skipping sheet {:?}: {} is not a worksheet part",
                info.name,
                info.worksheet_part
            );
            continue;
        }
        let xml = package
            .part(&info.worksheet_part)
            .ok_or_else(|| XlsxError::MissingPart(info.worksheet_part.clone()))?;
        let sheet = parse_worksheet(
            &info.name,
            xml,
            shared_strings.as_ref(),
            &styles,
            date_system,
        )?;
        workbook.add_sheet(sheet);
        sheet_parts.push(info.worksheet_part);
    }
    workbook.styles = styles;

    Ok(XlsxDocument::from_parts(
        workbook,
        package,
        sheet_parts,
        shared_strings,
    ))
}

#[derive(Debug, Default)]
struct PendingCell {
    at: CellRef,
    t: Option<String>,
    style_id: u32,
    v: Option<String>,
    inline: Option<String>,
}

/// Parse one worksheet part into the model: `sheetData` cells plus validation rules.
pub(crate) fn parse_worksheet(
    name: &str,
    xml: &[u8],
    shared_strings: Option<&SharedStringTable>,
    styles: &StyleTable,
    date_system: DateSystem,
) -> Result<Worksheet, XlsxError> {
    let mut sheet = Worksheet::new(name);

    let mut reader = Reader::from_reader(xml);
    reader.config_mut().trim_text(false);
    let mut buf = Vec::new();

    let mut in_sheet_data = false;
    // Rows and cells may omit `r`; they then follow the previous one.
    let mut current_row = 0u32;
    let mut next_row = 0u32;
    let mut next_col = 0u32;
    let mut current: Option<PendingCell> = None;

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) if e.local_name().as_ref() == b"sheetData" => in_sheet_data = true,
            Event::End(e) if e.local_name().as_ref() == b"sheetData" => in_sheet_data = false,
            Event::Start(e) | Event::Empty(e)
                if in_sheet_data && e.local_name().as_ref() == b"row" =>
            {
                current_row = parse_row_r(&e)?.unwrap_or(next_row);
                next_row = current_row + 1;
                next_col = 0;
            }
            Event::Start(e) if in_sheet_data && e.local_name().as_ref() == b"c" => {
                let cell = pending_cell(&e, current_row, next_col)?;
                next_col = cell.at.col + 1;
                current = Some(cell);
            }
            Event::Empty(e) if in_sheet_data && e.local_name().as_ref() == b"c" => {
                let cell = pending_cell(&e, current_row, next_col)?;
                next_col = cell.at.col + 1;
                sheet.insert_cell(cell.at, Cell::with_style(CellValue::Empty, cell.style_id));
            }
            Event::Start(e) if current.is_some() && e.local_name().as_ref() == b"v" => {
                let text = read_text(&mut reader, e.name())?;
                if let Some(cell) = current.as_mut() {
                    cell.v = Some(text);
                }
            }
            Event::Start(e) if current.is_some() && e.local_name().as_ref() == b"is" => {
                let (text, _) = read_string_item(&mut reader, b"is")?;
                if let Some(cell) = current.as_mut() {
                    cell.inline = Some(text);
                }
            }
            Event::Start(e) if current.is_some() => {
                // `<f>`, `<extLst>`: formulas are not evaluated, the cached `<v>` is used.
                reader.read_to_end_into(e.name(), &mut Vec::new())?;
            }
            Event::End(e) if e.local_name().as_ref() == b"c" => {
                if let Some(cell) = current.take() {
                    let value =
                        interpret_cell_value(&cell, shared_strings, styles, date_system);
                    sheet.insert_cell(cell.at, Cell::with_style(value, cell.style_id));
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    let text = std::str::from_utf8(xml)?;
    sheet.validations = read_validation_rules(text)?;
    Ok(sheet)
}

/// 0-indexed row from `row/@r`; missing or zero values read as `None`.
pub(crate) fn parse_row_r(row: &BytesStart<'_>) -> Result<Option<u32>, XlsxError> {
    for attr in row.attributes() {
        let attr = attr?;
        if attr.key.as_ref() == b"r" {
            let value = attr.unescape_value()?;
            return Ok(value
                .trim()
                .parse::<u32>()
                .ok()
                .filter(|r| *r > 0)
                .map(|r| r - 1));
        }
    }
    Ok(None)
}

fn pending_cell(e: &BytesStart<'_>, row: u32, col: u32) -> Result<PendingCell, XlsxError> {
    let mut cell = PendingCell {
        at: CellRef::new(row, col),
        ..PendingCell::default()
    };
    for attr in e.attributes() {
        let attr = attr?;
        match attr.key.as_ref() {
            b"r" => {
                let a1 = attr.unescape_value()?;
                cell.at = CellRef::from_a1(&a1)
                    .map_err(|err| XlsxError::Invalid(format!("invalid cell ref {a1:?}: {err}")))?;
            }
            b"t" => cell.t = Some(attr.unescape_value()?.into_owned()),
            b"s" => cell.style_id = attr.unescape_value()?.trim().parse().unwrap_or(0),
            _ => {}
        }
    }
    Ok(cell)
}

fn interpret_cell_value(
    cell: &PendingCell,
    shared_strings: Option<&SharedStringTable>,
    styles: &StyleTable,
    date_system: DateSystem,
) -> CellValue {
    let v = cell.v.as_deref();
    match cell.t.as_deref() {
        Some("s") => v
            .and_then(|raw| raw.trim().parse::<u32>().ok())
            .and_then(|idx| shared_strings.and_then(|sst| sst.get(idx)))
            .map(CellValue::from)
            .unwrap_or(CellValue::Empty),
        Some("b") => match v {
            Some(raw) => CellValue::Boolean(raw.trim() == "1"),
            None => CellValue::Empty,
        },
        Some("inlineStr") => cell
            .inline
            .clone()
            .map(CellValue::String)
            .unwrap_or(CellValue::Empty),
        Some("n") | None => match v {
            Some(raw) => match raw.trim().parse::<f64>() {
                Ok(n) => match styles.temporal_format(cell.style_id) {
                    Some(format) => serial_to_value(n, format, date_system),
                    None => CellValue::Number(n),
                },
                // Invalid SpreadsheetML; keep the payload rather than dropping it.
                Err(_) => CellValue::String(raw.to_string()),
            },
            None => CellValue::Empty,
        },
        // `str`, `e`, `d`: keep the raw payload as text.
        Some(_) => v
            .map(|raw| CellValue::String(raw.to_string()))
            .unwrap_or(CellValue::Empty),
    }
}
