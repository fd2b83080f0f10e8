//! Number-format slice of `xl/styles.xml`.
//!
//! Reading only extracts what [`StyleTable`] models. Writing streams the original part and
//! splices in the formats/xfs registered through [`StyleTable::ensure_number_format`], leaving
//! fonts, fills, borders and named styles untouched.

use std::collections::BTreeMap;

use quick_xml::events::{BytesEnd, BytesStart, Event};
use quick_xml::{Reader, Writer};
use rosterfill_model::StyleTable;

use crate::openxml::{element_prefix, prefixed_tag};
use crate::XlsxError;

/// Stylesheet assumed for packages that ship without `xl/styles.xml`: one default xf.
pub(crate) const MINIMAL_STYLES_XML: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<styleSheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><fonts count="1"><font><sz val="11"/><name val="Calibri"/><family val="2"/></font></fonts><fills count="2"><fill><patternFill patternType="none"/></fill><fill><patternFill patternType="gray125"/></fill></fills><borders count="1"><border><left/><right/><top/><bottom/><diagonal/></border></borders><cellStyleXfs count="1"><xf numFmtId="0" fontId="0" fillId="0" borderId="0"/></cellStyleXfs><cellXfs count="1"><xf numFmtId="0" fontId="0" fillId="0" borderId="0" xfId="0"/></cellXfs><cellStyles count="1"><cellStyle name="Normal" xfId="0" builtinId="0"/></cellStyles></styleSheet>"#;

#[derive(Clone, Copy, PartialEq, Eq)]
enum Section {
    NumFmts,
    CellXfs,
}

pub fn parse_styles(xml: &str) -> Result<StyleTable, XlsxError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();

    let mut custom = BTreeMap::new();
    let mut xf_num_fmts = Vec::new();
    // Only direct children of `styleSheet/numFmts` and `styleSheet/cellXfs` count; `dxfs`
    // carries its own `numFmt` elements.
    let mut depth = 0usize;
    let mut section = None::<Section>;

    loop {
        let event = reader.read_event_into(&mut buf)?;
        let (e, is_start) = match &event {
            Event::Eof => break,
            Event::Start(e) => (e, true),
            Event::Empty(e) => (e, false),
            Event::End(_) => {
                depth = depth.saturating_sub(1);
                if depth <= 1 {
                    section = None;
                }
                buf.clear();
                continue;
            }
            _ => {
                buf.clear();
                continue;
            }
        };

        match (depth, e.local_name().as_ref()) {
            (1, b"numFmts") if is_start => section = Some(Section::NumFmts),
            (1, b"cellXfs") if is_start => section = Some(Section::CellXfs),
            (2, b"numFmt") if section == Some(Section::NumFmts) => {
                let mut id = None;
                let mut code = None;
                for attr in e.attributes() {
                    let attr = attr?;
                    match attr.key.as_ref() {
                        b"numFmtId" => id = attr.unescape_value()?.trim().parse::<u32>().ok(),
                        b"formatCode" => code = Some(attr.unescape_value()?.into_owned()),
                        _ => {}
                    }
                }
                if let (Some(id), Some(code)) = (id, code) {
                    custom.insert(id, code);
                }
            }
            (2, b"xf") if section == Some(Section::CellXfs) => xf_num_fmts.push(xf_num_fmt_id(e)?),
            _ => {}
        }
        if is_start {
            depth += 1;
        }
        buf.clear();
    }

    Ok(StyleTable::new(xf_num_fmts, custom))
}

fn xf_num_fmt_id(e: &BytesStart<'_>) -> Result<u32, XlsxError> {
    for attr in e.attributes() {
        let attr = attr?;
        if attr.key.as_ref() == b"numFmtId" {
            return Ok(attr.unescape_value()?.trim().parse().unwrap_or(0));
        }
    }
    Ok(0)
}

/// Rewrite `styles.xml` so it contains every format and xf registered on `styles`.
pub fn write_styles(original_xml: &str, styles: &StyleTable) -> Result<Vec<u8>, XlsxError> {
    let mut reader = Reader::from_str(original_xml);
    reader.config_mut().trim_text(false);
    let mut writer = Writer::new(Vec::new());
    let mut buf = Vec::new();

    let added: Vec<(u32, &str)> = styles.added_formats().collect();
    let total_xfs = styles.base_xf_count() as usize + styles.derived_xfs().len();
    let mut prefix: Option<String> = None;
    let mut depth = 0usize;
    let mut num_fmts_done = added.is_empty();

    let mut in_cell_xfs = false;
    // Events of every `cellXfs/xf`, used as templates for derived xfs.
    let mut xfs: Vec<Vec<Event<'static>>> = Vec::new();

    loop {
        let event = reader.read_event_into(&mut buf)?;
        if matches!(event, Event::Eof) {
            break;
        }

        // `numFmts` is the first child of `styleSheet`; create it when missing.
        if depth == 1 && !num_fmts_done {
            if let Event::Start(e) | Event::Empty(e) = &event {
                if e.local_name().as_ref() != b"numFmts" {
                    write_num_fmts(&mut writer, prefix.as_deref(), &added, None)?;
                    num_fmts_done = true;
                }
            }
        }

        match &event {
            Event::Start(e) => {
                let local = e.local_name();
                if depth == 0 {
                    prefix = element_prefix(e.name().as_ref())
                        .map(|p| String::from_utf8_lossy(p).into_owned());
                    writer.write_event(event.to_owned())?;
                } else if depth == 1 && local.as_ref() == b"numFmts" {
                    writer.write_event(Event::Start(with_count(e, |c| c + added.len())?))?;
                } else if depth == 1 && local.as_ref() == b"cellXfs" {
                    in_cell_xfs = true;
                    writer.write_event(Event::Start(with_count(e, |_| total_xfs)?))?;
                } else {
                    if in_cell_xfs {
                        capture_xf_event(&mut xfs, &event, depth == 2);
                    }
                    writer.write_event(event.to_owned())?;
                }
                depth += 1;
            }
            Event::Empty(e) => {
                let local = e.local_name();
                if depth == 1 && local.as_ref() == b"numFmts" {
                    write_num_fmts(&mut writer, prefix.as_deref(), &added, Some(e))?;
                    num_fmts_done = true;
                } else if depth == 1
                    && local.as_ref() == b"cellXfs"
                    && !styles.derived_xfs().is_empty()
                {
                    return Err(XlsxError::Invalid("cellXfs has no xf to derive from".into()));
                } else {
                    if in_cell_xfs {
                        capture_xf_event(&mut xfs, &event, depth == 2);
                    }
                    writer.write_event(event.to_owned())?;
                }
            }
            Event::End(e) => {
                depth = depth.saturating_sub(1);
                let local = e.local_name();
                if depth == 1 && local.as_ref() == b"numFmts" {
                    if !num_fmts_done {
                        write_num_fmt_entries(&mut writer, prefix.as_deref(), &added)?;
                        num_fmts_done = true;
                    }
                } else if depth == 1 && local.as_ref() == b"cellXfs" {
                    in_cell_xfs = false;
                    write_derived_xfs(&mut writer, styles, &xfs)?;
                } else if in_cell_xfs {
                    capture_xf_event(&mut xfs, &event, false);
                }
                writer.write_event(event.to_owned())?;
            }
            _ => {
                if in_cell_xfs && depth > 2 {
                    capture_xf_event(&mut xfs, &event, false);
                }
                writer.write_event(event.to_owned())?;
            }
        }
        buf.clear();
    }

    Ok(writer.into_inner())
}

fn capture_xf_event(xfs: &mut Vec<Vec<Event<'static>>>, event: &Event<'_>, opens_xf: bool) {
    let owned = event.clone().into_owned();
    if opens_xf {
        xfs.push(vec![owned]);
    } else if let Some(current) = xfs.last_mut() {
        current.push(owned);
    }
}

fn write_derived_xfs<W: std::io::Write>(
    writer: &mut Writer<W>,
    styles: &StyleTable,
    xfs: &[Vec<Event<'static>>],
) -> Result<(), XlsxError> {
    for derived in styles.derived_xfs() {
        let template = xfs
            .get(derived.base as usize)
            .ok_or_else(|| XlsxError::Invalid(format!("cellXfs has no xf {}", derived.base)))?;
        for (idx, ev) in template.iter().enumerate() {
            if idx == 0 {
                writer.write_event(with_num_fmt(ev, derived.num_fmt_id)?)?;
            } else {
                writer.write_event(ev.clone())?;
            }
        }
    }
    Ok(())
}

fn with_count(
    e: &BytesStart<'_>,
    f: impl FnOnce(usize) -> usize,
) -> Result<BytesStart<'static>, XlsxError> {
    let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
    let mut out = BytesStart::new(name);
    let mut count = 0usize;
    for attr in e.attributes() {
        let attr = attr?;
        if attr.key.as_ref() == b"count" {
            count = attr.unescape_value()?.trim().parse().unwrap_or(0);
        } else {
            out.push_attribute(attr);
        }
    }
    out.push_attribute(("count", f(count).to_string().as_str()));
    Ok(out.into_owned())
}

fn with_num_fmt(event: &Event<'static>, num_fmt_id: u32) -> Result<Event<'static>, XlsxError> {
    let (e, empty) = match event {
        Event::Start(e) => (e, false),
        Event::Empty(e) => (e, true),
        other => return Ok(other.clone()),
    };
    let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
    let mut out = BytesStart::new(name);
    for attr in e.attributes() {
        let attr = attr?;
        if !matches!(attr.key.as_ref(), b"numFmtId" | b"applyNumberFormat") {
            out.push_attribute(attr);
        }
    }
    out.push_attribute(("numFmtId", num_fmt_id.to_string().as_str()));
    out.push_attribute(("applyNumberFormat", "1"));
    let out = out.into_owned();
    Ok(if empty {
        Event::Empty(out)
    } else {
        Event::Start(out)
    })
}

fn write_num_fmts<W: std::io::Write>(
    writer: &mut Writer<W>,
    prefix: Option<&str>,
    added: &[(u32, &str)],
    existing: Option<&BytesStart<'_>>,
) -> Result<(), XlsxError> {
    let tag = prefixed_tag(prefix, "numFmts");
    let start = match existing {
        Some(e) => with_count(e, |c| c + added.len())?,
        None => {
            let mut start = BytesStart::new(tag.clone());
            start.push_attribute(("count", added.len().to_string().as_str()));
            start
        }
    };
    writer.write_event(Event::Start(start))?;
    write_num_fmt_entries(writer, prefix, added)?;
    writer.write_event(Event::End(BytesEnd::new(tag.as_str())))?;
    Ok(())
}

fn write_num_fmt_entries<W: std::io::Write>(
    writer: &mut Writer<W>,
    prefix: Option<&str>,
    added: &[(u32, &str)],
) -> Result<(), XlsxError> {
    let tag = prefixed_tag(prefix, "numFmt");
    for (id, code) in added {
        let mut e = BytesStart::new(tag.as_str());
        e.push_attribute(("numFmtId", id.to_string().as_str()));
        e.push_attribute(("formatCode", *code));
        writer.write_event(Event::Empty(e))?;
    }
    Ok(())
}
