use std::io::{Read, Seek};

use zip::ZipArchive;

use crate::XlsxError;

/// Largest single part inflated into memory (256 MiB).
pub const DEFAULT_MAX_ZIP_PART_BYTES: u64 = 256 * 1024 * 1024;

/// Largest total inflated across one package (512 MiB).
pub const DEFAULT_MAX_ZIP_TOTAL_BYTES: u64 = 512 * 1024 * 1024;

/// Lower-case, `/`-separated, percent-decoded form of a part name without leading separators.
fn canonical_part_name(name: &str) -> Vec<u8> {
    let raw = name.as_bytes();
    let mut out = Vec::with_capacity(raw.len());
    let mut i = 0;
    while i < raw.len() {
        let mut byte = raw[i];
        i += 1;
        if byte == b'%' {
            let hex = raw
                .get(i..i + 2)
                .filter(|pair| pair.iter().all(u8::is_ascii_hexdigit))
                .and_then(|pair| std::str::from_utf8(pair).ok())
                .and_then(|pair| u8::from_str_radix(pair, 16).ok());
            if let Some(decoded) = hex {
                byte = decoded;
                i += 2;
            }
        }
        let byte = match byte {
            b'\\' => b'/',
            other => other.to_ascii_lowercase(),
        };
        if byte == b'/' && out.is_empty() {
            continue;
        }
        out.push(byte);
    }
    out
}

/// Producers disagree on case, separators, leading slashes and percent-encoding.
pub(crate) fn zip_part_names_equivalent(a: &str, b: &str) -> bool {
    a == b || canonical_part_name(a) == canonical_part_name(b)
}

/// `xl/worksheets/<name>.xml`, excluding the `_rels` sub-folder.
pub(crate) fn is_worksheet_part(name: &str) -> bool {
    let canonical = canonical_part_name(name);
    canonical
        .strip_prefix(b"xl/worksheets/".as_slice())
        .is_some_and(|file| file.len() > 4 && !file.contains(&b'/') && file.ends_with(b".xml"))
}

/// Running total of inflated bytes shared by every read from one archive.
#[derive(Debug, Clone)]
pub(crate) struct ZipInflateBudget {
    max_total_bytes: u64,
    used_bytes: u64,
}

impl ZipInflateBudget {
    pub(crate) fn new(max_total_bytes: u64) -> Self {
        Self {
            max_total_bytes,
            used_bytes: 0,
        }
    }

    fn too_large(&self, extra: u64) -> XlsxError {
        XlsxError::PackageTooLarge {
            total: self.used_bytes.saturating_add(extra),
            max: self.max_total_bytes,
        }
    }

    /// Inflate one entry. The declared size is checked first, then the read itself is
    /// capped, so a lying central directory cannot exceed either limit.
    fn inflate<F: Read>(
        &mut self,
        file: F,
        declared: u64,
        part: &str,
        max_part_bytes: u64,
    ) -> Result<Vec<u8>, XlsxError> {
        let part_too_large = |size| XlsxError::PartTooLarge {
            part: part.to_string(),
            size,
            max: max_part_bytes,
        };
        if declared > max_part_bytes {
            return Err(part_too_large(declared));
        }
        let remaining = self.max_total_bytes.saturating_sub(self.used_bytes);
        if declared > remaining {
            return Err(self.too_large(declared));
        }

        let mut bytes = Vec::new();
        file.take(max_part_bytes.min(remaining).saturating_add(1))
            .read_to_end(&mut bytes)?;
        let observed = bytes.len() as u64;
        if observed > max_part_bytes {
            return Err(part_too_large(observed));
        }
        if observed > remaining {
            return Err(self.too_large(observed));
        }
        self.used_bytes += observed;
        Ok(bytes)
    }
}

/// Entry `idx` as `(name, bytes)`; directories come back with `None`.
pub(crate) fn read_zip_entry<R: Read + Seek>(
    archive: &mut ZipArchive<R>,
    idx: usize,
    max_part_bytes: u64,
    budget: &mut ZipInflateBudget,
) -> Result<(String, Option<Vec<u8>>), XlsxError> {
    let mut file = archive.by_index(idx)?;
    let name = file.name().to_string();
    if file.is_dir() {
        return Ok((name, None));
    }
    let declared = file.size();
    let bytes = budget.inflate(&mut file, declared, &name, max_part_bytes)?;
    Ok((name, Some(bytes)))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    use std::io::{Cursor, Write};

    use zip::write::FileOptions;
    use zip::ZipWriter;

    pub(crate) fn build_zip(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
        let options =
            FileOptions::<()>::default().compression_method(zip::CompressionMethod::Deflated);
        for (name, bytes) in entries {
            zip.start_file(*name, options).unwrap();
            zip.write_all(bytes).unwrap();
        }
        zip.finish().unwrap().into_inner()
    }

    #[test]
    fn part_names_compare_loosely() {
        assert!(zip_part_names_equivalent("XL\\Workbook.xml", "xl/workbook.xml"));
        assert!(zip_part_names_equivalent("/xl/workbook.xml", "xl/workbook.xml"));
        assert!(zip_part_names_equivalent(
            "xl/worksheets/sheet 1.xml",
            "xl/worksheets/sheet%201.xml"
        ));
        assert!(zip_part_names_equivalent(
            "%2Fxl%2Fworksheets%2Fsheet1.xml",
            "xl/worksheets/sheet1.xml"
        ));
        assert!(!zip_part_names_equivalent("xl/workbook.xml", "xl/workbook.xml.rels"));
    }

    #[test]
    fn worksheet_parts_are_recognized() {
        assert!(is_worksheet_part("xl/worksheets/sheet1.xml"));
        assert!(is_worksheet_part("/XL/Worksheets/Sheet2.xml"));
        assert!(!is_worksheet_part("xl/worksheets/_rels/sheet1.xml.rels"));
        assert!(!is_worksheet_part("xl/workbook.xml"));
        assert!(!is_worksheet_part("xl/worksheets/"));
    }

    #[test]
    fn oversized_part_is_rejected() {
        let bytes = build_zip(&[("a.txt", b"hello world")]);
        let mut archive = ZipArchive::new(Cursor::new(bytes)).unwrap();

        let mut budget = ZipInflateBudget::new(u64::MAX);
        let (_, part) = read_zip_entry(&mut archive, 0, 11, &mut budget).unwrap();
        assert_eq!(part.as_deref(), Some(&b"hello world"[..]));

        let mut budget = ZipInflateBudget::new(u64::MAX);
        match read_zip_entry(&mut archive, 0, 10, &mut budget).unwrap_err() {
            XlsxError::PartTooLarge { part, size, .. } => {
                assert_eq!(part, "a.txt");
                assert_eq!(size, 11);
            }
            other => panic!("expected PartTooLarge, got {other:?}"),
        }
    }

    #[test]
    fn budget_spans_entries() {
        let bytes = build_zip(&[("a.txt", b"12345"), ("b.txt", b"67890")]);
        let mut archive = ZipArchive::new(Cursor::new(bytes)).unwrap();
        let mut budget = ZipInflateBudget::new(8);

        read_zip_entry(&mut archive, 0, 100, &mut budget).unwrap();
        let err = read_zip_entry(&mut archive, 1, 100, &mut budget).unwrap_err();
        assert!(matches!(err, XlsxError::PackageTooLarge { max: 8, .. }));
    }
}
