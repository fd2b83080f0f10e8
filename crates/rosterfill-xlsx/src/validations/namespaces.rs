use std::collections::{BTreeMap, BTreeSet};

use quick_xml::events::{BytesEnd, BytesStart, Event};
use quick_xml::{Reader, Writer};
use serde::Serialize;

use crate::openxml::{element_prefix, local_name, prefixed_tag, SPREADSHEETML_NS};
use crate::XlsxError;

/// Namespace declarations in scope at a worksheet root.
///
/// Built per worksheet and passed explicitly into the patcher; there is no global prefix
/// registry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct NamespaceTable {
    /// `xmlns="..."`
    pub default: Option<String>,
    /// `xmlns:prefix="..."`, keyed by prefix.
    pub prefixed: BTreeMap<String, String>,
}

impl NamespaceTable {
    /// Read the `xmlns` declarations made on one element.
    pub fn from_element(e: &BytesStart<'_>) -> Result<Self, XlsxError> {
        let mut table = Self::default();
        for attr in e.attributes() {
            let attr = attr?;
            let key = attr.key.as_ref();
            if key == b"xmlns" {
                table.default = Some(attr.unescape_value()?.into_owned());
            } else if let Some(prefix) = key.strip_prefix(b"xmlns:") {
                table.prefixed.insert(
                    String::from_utf8_lossy(prefix).into_owned(),
                    attr.unescape_value()?.into_owned(),
                );
            }
        }
        Ok(table)
    }

    pub fn from_roxml(root: roxmltree::Node<'_, '_>) -> Self {
        let mut table = Self::default();
        for ns in root.namespaces() {
            match ns.name() {
                None => table.default = Some(ns.uri().to_string()),
                Some("xml") => {}
                Some(prefix) => {
                    table
                        .prefixed
                        .insert(prefix.to_string(), ns.uri().to_string());
                }
            }
        }
        table
    }

    pub fn uri(&self, prefix: Option<&str>) -> Option<&str> {
        match prefix {
            None => self.default.as_deref(),
            Some(prefix) => self.prefixed.get(prefix).map(String::as_str),
        }
    }

    /// Prefix bound to SpreadsheetML: `Some(None)` when it is the default namespace.
    pub fn spreadsheetml_prefix(&self) -> Option<Option<&str>> {
        if self.default.as_deref() == Some(SPREADSHEETML_NS) {
            return Some(None);
        }
        self.prefixed
            .iter()
            .find(|(_, uri)| uri.as_str() == SPREADSHEETML_NS)
            .map(|(prefix, _)| Some(prefix.as_str()))
    }
}

/// Element and attribute prefixes used in an XML fragment, excluding `xml`/`xmlns`.
pub(crate) fn used_prefixes(fragment: &str) -> Result<BTreeSet<String>, XlsxError> {
    let mut reader = Reader::from_str(fragment);
    let mut buf = Vec::new();
    let mut out = BTreeSet::new();
    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) | Event::Empty(e) => {
                if let Some(prefix) = element_prefix(e.name().as_ref()) {
                    out.insert(String::from_utf8_lossy(prefix).into_owned());
                }
                for attr in e.attributes() {
                    let attr = attr?;
                    if let Some(prefix) = element_prefix(attr.key.as_ref()) {
                        if !matches!(prefix, b"xml" | b"xmlns") {
                            out.insert(String::from_utf8_lossy(prefix).into_owned());
                        }
                    }
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    Ok(out)
}

/// Rename SpreadsheetML elements of `fragment` (resolved against `original`) to `target_prefix`.
///
/// Declarations made inside the fragment are honoured while resolving names.
pub(crate) fn requalify(
    fragment: &str,
    original: &NamespaceTable,
    target_prefix: Option<&str>,
) -> Result<String, XlsxError> {
    let mut reader = Reader::from_str(fragment);
    let mut writer = Writer::new(Vec::with_capacity(fragment.len()));
    let mut buf = Vec::new();
    // One entry per open element: its local declarations and the name written for it.
    let mut scopes: Vec<(NamespaceTable, String)> = Vec::new();

    loop {
        let event = reader.read_event_into(&mut buf)?;
        match &event {
            Event::Start(e) | Event::Empty(e) => {
                let local_decls = NamespaceTable::from_element(e)?;
                let name = e.name();
                let prefix = element_prefix(name.as_ref())
                    .map(|p| String::from_utf8_lossy(p).into_owned());
                let uri = local_decls
                    .uri(prefix.as_deref())
                    .or_else(|| {
                        scopes
                            .iter()
                            .rev()
                            .find_map(|(decls, _)| decls.uri(prefix.as_deref()))
                    })
                    .or_else(|| original.uri(prefix.as_deref()));

                let written = if uri == Some(SPREADSHEETML_NS) {
                    let local = String::from_utf8_lossy(local_name(name.as_ref())).into_owned();
                    prefixed_tag(target_prefix, &local)
                } else {
                    String::from_utf8_lossy(name.as_ref()).into_owned()
                };

                let mut start = BytesStart::new(written.as_str());
                for attr in e.attributes() {
                    start.push_attribute(attr?);
                }
                if matches!(event, Event::Start(_)) {
                    writer.write_event(Event::Start(start))?;
                    scopes.push((local_decls, written));
                } else {
                    writer.write_event(Event::Empty(start))?;
                }
            }
            Event::End(_) => {
                let (_, written) = scopes
                    .pop()
                    .ok_or_else(|| XlsxError::Invalid("unbalanced fragment".to_string()))?;
                writer.write_event(Event::End(BytesEnd::new(written.as_str())))?;
            }
            Event::Eof => break,
            _ => writer.write_event(event.to_owned())?,
        }
        buf.clear();
    }

    Ok(String::from_utf8(writer.into_inner())?)
}
