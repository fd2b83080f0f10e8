use std::io::{Cursor, Write};

use thiserror::Error;
use zip::ZipArchive;

use crate::openxml::{relationship_targets, resolve_target};
use crate::sheet_metadata::{parse_workbook_sheets, WorkbookSheetInfo};
use crate::zip_util::{
    read_zip_entry, zip_part_names_equivalent, ZipInflateBudget, DEFAULT_MAX_ZIP_PART_BYTES,
    DEFAULT_MAX_ZIP_TOTAL_BYTES,
};

#[derive(Debug, Error)]
pub enum XlsxError {
    #[error(transparent)]
    Zip(#[from] zip::result::ZipError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("malformed XML: {0}")]
    Xml(#[from] quick_xml::Error),
    #[error("malformed XML: {0}")]
    RoXml(#[from] roxmltree::Error),
    #[error("part is not UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
    #[error("part is not UTF-8: {0}")]
    Utf8Str(#[from] std::str::Utf8Error),
    #[error("malformed XML attribute: {0}")]
    Attr(#[from] quick_xml::events::attributes::AttrError),
    #[error("element is missing its `{0}` attribute")]
    MissingAttr(&'static str),
    #[error("package has no `{0}` part")]
    MissingPart(String),
    #[error("{0}")]
    Invalid(String),
    #[error("part {part} inflates to {size} bytes, over the {max}-byte limit")]
    PartTooLarge { part: String, size: u64, max: u64 },
    #[error("package inflates to at least {total} bytes, over the {max}-byte limit")]
    PackageTooLarge { total: u64, max: u64 },
    #[error("sheetId is not a positive integer")]
    InvalidSheetId,
}

/// Inflation caps applied by [`XlsxPackage::from_bytes_limited`].
#[derive(Debug, Clone, Copy)]
pub struct XlsxPackageLimits {
    /// Per part.
    pub max_part_bytes: u64,
    /// Summed over every part.
    pub max_total_bytes: u64,
}

impl Default for XlsxPackageLimits {
    fn default() -> Self {
        Self {
            max_part_bytes: DEFAULT_MAX_ZIP_PART_BYTES,
            max_total_bytes: DEFAULT_MAX_ZIP_TOTAL_BYTES,
        }
    }
}

/// A workbook sheet joined with the worksheet part its relationship points at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorksheetPartInfo {
    pub name: String,
    pub sheet_id: u32,
    pub rel_id: String,
    /// e.g. `xl/worksheets/sheet1.xml`
    pub worksheet_part: String,
}

/// In-memory XLSX package: part name -> bytes, kept in archive order.
///
/// Parts are stored under their original entry names so a rewrite reproduces the source
/// layout; lookups tolerate non-canonical names.
#[derive(Debug, Clone, Default)]
pub struct XlsxPackage {
    parts: Vec<(String, Vec<u8>)>,
}

impl XlsxPackage {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, XlsxError> {
        Self::from_bytes_limited(bytes, XlsxPackageLimits::default())
    }

    pub fn from_bytes_limited(bytes: &[u8], limits: XlsxPackageLimits) -> Result<Self, XlsxError> {
        let mut zip = ZipArchive::new(Cursor::new(bytes))?;
        let mut budget = ZipInflateBudget::new(limits.max_total_bytes);

        let mut parts = Vec::with_capacity(zip.len());
        for idx in 0..zip.len() {
            let (name, bytes) = read_zip_entry(&mut zip, idx, limits.max_part_bytes, &mut budget)?;
            if let Some(bytes) = bytes {
                parts.push((name, bytes));
            }
        }
        Ok(Self { parts })
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.parts
            .iter()
            .position(|(key, _)| key == name)
            .or_else(|| {
                self.parts
                    .iter()
                    .position(|(key, _)| zip_part_names_equivalent(key, name))
            })
    }

    pub fn part(&self, name: &str) -> Option<&[u8]> {
        self.position(name).map(|idx| self.parts[idx].1.as_slice())
    }

    pub fn parts(&self) -> impl Iterator<Item = (&str, &[u8])> {
        self.parts
            .iter()
            .map(|(name, bytes)| (name.as_str(), bytes.as_slice()))
    }

    pub fn part_names(&self) -> impl Iterator<Item = &str> {
        self.parts.iter().map(|(name, _)| name.as_str())
    }

    /// Replace a part (matched tolerantly) or append a new one.
    pub fn set_part(&mut self, name: impl Into<String>, bytes: Vec<u8>) {
        let name = name.into();
        match self.position(&name) {
            Some(idx) => self.parts[idx].1 = bytes,
            None => self.parts.push((name, bytes)),
        }
    }

    pub fn write_to_bytes(&self) -> Result<Vec<u8>, XlsxError> {
        let mut buf = Vec::new();
        self.write_to(&mut buf)?;
        Ok(buf)
    }

    pub fn write_to<W: Write>(&self, mut w: W) -> Result<(), XlsxError> {
        let cursor = Cursor::new(Vec::new());
        let mut zip = zip::ZipWriter::new(cursor);
        let options = zip::write::FileOptions::<()>::default()
            .compression_method(zip::CompressionMethod::Deflated);

        for (name, bytes) in &self.parts {
            zip.start_file(name.as_str(), options)?;
            zip.write_all(bytes)?;
        }

        let cursor = zip.finish()?;
        w.write_all(&cursor.into_inner())?;
        Ok(())
    }

    /// Ordered `<sheet>` entries of `xl/workbook.xml`.
    pub fn workbook_sheets(&self) -> Result<Vec<WorkbookSheetInfo>, XlsxError> {
        let workbook_xml = self
            .part("xl/workbook.xml")
            .ok_or_else(|| XlsxError::MissingPart("xl/workbook.xml".to_string()))?;
        parse_workbook_sheets(std::str::from_utf8(workbook_xml)?)
    }

    /// [`Self::workbook_sheets`] with each `r:id` followed through `xl/_rels/workbook.xml.rels`.
    pub fn worksheet_parts(&self) -> Result<Vec<WorksheetPartInfo>, XlsxError> {
        let sheets = self.workbook_sheets()?;

        let rels_bytes = self
            .part("xl/_rels/workbook.xml.rels")
            .ok_or_else(|| XlsxError::MissingPart("xl/_rels/workbook.xml.rels".to_string()))?;
        let targets = relationship_targets(rels_bytes)?;

        let mut out = Vec::with_capacity(sheets.len());
        for sheet in sheets {
            let (_, target) = targets
                .iter()
                .find(|(id, _)| *id == sheet.rel_id)
                .ok_or_else(|| {
                    XlsxError::Invalid(format!(
                        "sheet {:?} points at unknown relationship {}",
                        sheet.name, sheet.rel_id
                    ))
                })?;
            out.push(WorksheetPartInfo {
                name: sheet.name,
                sheet_id: sheet.sheet_id,
                rel_id: sheet.rel_id,
                worksheet_part: resolve_target("xl/workbook.xml", target),
            });
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::zip_util::tests::build_zip;

    const WORKBOOK_XML: &[u8] = br#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<workbook xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships">
  <sheets>
    <sheet name="Jornada" sheetId="1" r:id="rId2"/>
    <sheet name="Timesheet Entries" sheetId="2" r:id="rId1"/>
  </sheets>
</workbook>"#;

    const WORKBOOK_RELS: &[u8] = br#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">
  <Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet" Target="worksheets/sheet1.xml"/>
  <Relationship Id="rId2" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet" Target="/xl/worksheets/sheet2.xml"/>
</Relationships>"#;

    #[test]
    fn resolves_worksheet_parts_through_relationships() {
        let bytes = build_zip(&[
            ("xl/workbook.xml", WORKBOOK_XML),
            ("xl/_rels/workbook.xml.rels", WORKBOOK_RELS),
        ]);
        let pkg = XlsxPackage::from_bytes(&bytes).unwrap();
        let parts = pkg.worksheet_parts().unwrap();

        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].name, "Jornada");
        assert_eq!(parts[0].worksheet_part, "xl/worksheets/sheet2.xml");
        assert_eq!(parts[1].worksheet_part, "xl/worksheets/sheet1.xml");
    }

    #[test]
    fn rewrite_keeps_entry_order() {
        let bytes = build_zip(&[("b.xml", b"b"), ("a.xml", b"a"), ("XL/Odd.xml", b"odd")]);
        let mut pkg = XlsxPackage::from_bytes(&bytes).unwrap();
        pkg.set_part("xl/odd.xml", b"patched".to_vec());
        pkg.set_part("c.xml", b"c".to_vec());

        let round = XlsxPackage::from_bytes(&pkg.write_to_bytes().unwrap()).unwrap();
        let names: Vec<&str> = round.part_names().collect();
        assert_eq!(names, vec!["b.xml", "a.xml", "XL/Odd.xml", "c.xml"]);
        assert_eq!(round.part("xl/odd.xml"), Some(&b"patched"[..]));
    }

    #[test]
    fn from_bytes_limited_rejects_packages_exceeding_total_limit() {
        let bytes = build_zip(&[("a.xml", b"0123456789"), ("b.xml", b"0123456789")]);
        let err = XlsxPackage::from_bytes_limited(
            &bytes,
            XlsxPackageLimits {
                max_part_bytes: 100,
                max_total_bytes: 15,
            },
        )
        .unwrap_err();
        assert!(matches!(err, XlsxError::PackageTooLarge { max: 15, .. }));
    }

    #[test]
    fn not_a_zip_is_an_error() {
        assert!(matches!(
            XlsxPackage::from_bytes(b"name,start\n"),
            Err(XlsxError::Zip(_))
        ));
    }
}
