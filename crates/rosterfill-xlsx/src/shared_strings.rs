use std::collections::HashMap;

use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::name::QName;
use quick_xml::{Reader, Writer};

use crate::openxml::{element_prefix, prefixed_tag};
use crate::XlsxError;

/// Shared string table of a workbook, with append-only interning for new text.
///
/// Existing `<si>` items (including rich text) are never rewritten; new strings are appended
/// to the end of `<sst>` on save.
#[derive(Debug, Clone, Default)]
pub struct SharedStringTable {
    items: Vec<String>,
    plain_index: HashMap<String, u32>,
    loaded_len: usize,
    added_refs: u64,
}

impl SharedStringTable {
    pub fn parse(xml: &str) -> Result<Self, XlsxError> {
        let mut reader = Reader::from_str(xml);
        reader.config_mut().trim_text(false);

        let mut buf = Vec::new();
        let mut table = Self::default();
        loop {
            match reader.read_event_into(&mut buf)? {
                Event::Start(e) if e.local_name().as_ref() == b"si" => {
                    let (text, plain) = read_string_item(&mut reader, b"si")?;
                    let idx = table.items.len() as u32;
                    if plain {
                        table.plain_index.entry(text.clone()).or_insert(idx);
                    }
                    table.items.push(text);
                }
                Event::Empty(e) if e.local_name().as_ref() == b"si" => {
                    table.items.push(String::new());
                }
                Event::Eof => break,
                _ => {}
            }
            buf.clear();
        }
        table.loaded_len = table.items.len();
        Ok(table)
    }

    pub fn get(&self, idx: u32) -> Option<&str> {
        self.items.get(idx as usize).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Index of `text`, appending a new item when needed.
    pub fn intern(&mut self, text: &str) -> u32 {
        self.added_refs += 1;
        if let Some(idx) = self.plain_index.get(text) {
            return *idx;
        }
        let idx = self.items.len() as u32;
        self.items.push(text.to_string());
        self.plain_index.insert(text.to_string(), idx);
        idx
    }

    pub fn is_dirty(&self) -> bool {
        self.items.len() > self.loaded_len
    }

    /// Rewrite `sharedStrings.xml` with the appended items and refreshed counts.
    pub fn write_into(&self, original_xml: &str) -> Result<Vec<u8>, XlsxError> {
        let mut reader = Reader::from_str(original_xml);
        reader.config_mut().trim_text(false);
        let mut writer = Writer::new(Vec::new());
        let mut buf = Vec::new();

        loop {
            let event = reader.read_event_into(&mut buf)?;
            match event {
                Event::Eof => break,
                Event::Start(ref e) if e.local_name().as_ref() == b"sst" => {
                    writer.write_event(Event::Start(self.sst_start(e)?))?;
                }
                Event::Empty(ref e) if e.local_name().as_ref() == b"sst" => {
                    let start = self.sst_start(e)?;
                    let prefix = sst_prefix(e);
                    writer.write_event(Event::Start(start))?;
                    self.write_added(&mut writer, prefix.as_deref())?;
                    let tag = prefixed_tag(prefix.as_deref(), "sst");
                    writer.write_event(Event::End(BytesEnd::new(tag.as_str())))?;
                }
                Event::End(ref e) if e.local_name().as_ref() == b"sst" => {
                    let prefix = element_prefix(e.name().as_ref())
                        .map(|p| String::from_utf8_lossy(p).into_owned());
                    self.write_added(&mut writer, prefix.as_deref())?;
                    writer.write_event(Event::End(e.to_owned()))?;
                }
                _ => writer.write_event(event.to_owned())?,
            }
            buf.clear();
        }
        Ok(writer.into_inner())
    }

    fn sst_start(&self, e: &BytesStart<'_>) -> Result<BytesStart<'static>, XlsxError> {
        let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
        let mut count = None::<u64>;
        let mut start = BytesStart::new(name);
        for attr in e.attributes() {
            let attr = attr?;
            match attr.key.as_ref() {
                b"count" => count = attr.unescape_value()?.parse().ok(),
                b"uniqueCount" => {}
                _ => start.push_attribute(attr),
            }
        }
        let count = count.unwrap_or(self.loaded_len as u64) + self.added_refs;
        start.push_attribute(("count", count.to_string().as_str()));
        start.push_attribute(("uniqueCount", self.items.len().to_string().as_str()));
        Ok(start.into_owned())
    }

    fn write_added<W: std::io::Write>(
        &self,
        writer: &mut Writer<W>,
        prefix: Option<&str>,
    ) -> Result<(), XlsxError> {
        let si = prefixed_tag(prefix, "si");
        let t = prefixed_tag(prefix, "t");
        for text in &self.items[self.loaded_len..] {
            writer.write_event(Event::Start(BytesStart::new(si.as_str())))?;
            let mut t_start = BytesStart::new(t.as_str());
            if needs_space_preserve(text) {
                t_start.push_attribute(("xml:space", "preserve"));
            }
            writer.write_event(Event::Start(t_start))?;
            writer.write_event(Event::Text(BytesText::new(text)))?;
            writer.write_event(Event::End(BytesEnd::new(t.as_str())))?;
            writer.write_event(Event::End(BytesEnd::new(si.as_str())))?;
        }
        Ok(())
    }
}

fn sst_prefix(e: &BytesStart<'_>) -> Option<String> {
    element_prefix(e.name().as_ref()).map(|p| String::from_utf8_lossy(p).into_owned())
}

pub(crate) fn needs_space_preserve(s: &str) -> bool {
    s.starts_with(char::is_whitespace) || s.ends_with(char::is_whitespace) || s.contains('\n')
}

/// Visible text of a string item (`<si>` or inline `<is>`) and whether it is plain (no rich
/// runs). Consumes events up to the closing `end_local` tag.
pub(crate) fn read_string_item(
    reader: &mut Reader<&[u8]>,
    end_local: &[u8],
) -> Result<(String, bool), XlsxError> {
    let mut buf = Vec::new();
    let mut text = String::new();
    let mut plain = true;

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) if e.local_name().as_ref() == b"t" => {
                text.push_str(&read_text(reader, e.name())?);
            }
            Event::Start(e) if e.local_name().as_ref() == b"r" => {
                plain = false;
                text.push_str(&parse_r(reader)?);
            }
            Event::Start(e) => {
                // Phonetic runs and extensions carry `<t>` nodes that are not displayed.
                reader.read_to_end_into(e.name(), &mut Vec::new())?;
            }
            Event::End(e) if e.local_name().as_ref() == end_local => break,
            Event::Eof => return Err(XlsxError::Invalid("unexpected eof in string item".to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok((text, plain))
}

fn parse_r(reader: &mut Reader<&[u8]>) -> Result<String, XlsxError> {
    let mut buf = Vec::new();
    let mut text = String::new();
    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) if e.local_name().as_ref() == b"t" => {
                text.push_str(&read_text(reader, e.name())?);
            }
            Event::Start(e) => {
                reader.read_to_end_into(e.name(), &mut Vec::new())?;
            }
            Event::End(e) if e.local_name().as_ref() == b"r" => break,
            Event::Eof => return Err(XlsxError::Invalid("unexpected eof in <r>".to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(text)
}

/// Collect text content up to the matching end tag.
pub(crate) fn read_text(reader: &mut Reader<&[u8]>, end: QName<'_>) -> Result<String, XlsxError> {
    let end = end.as_ref().to_vec();
    let mut buf = Vec::new();
    let mut text = String::new();
    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Text(t) => text.push_str(&t.unescape()?),
            Event::CData(t) => text.push_str(std::str::from_utf8(&t)?),
            Event::End(e) if e.name().as_ref() == end.as_slice() => break,
            Event::Eof => return Err(XlsxError::Invalid("unexpected eof in text".to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(text)
}
