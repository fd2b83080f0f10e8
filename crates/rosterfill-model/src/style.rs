use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// First `numFmtId` available for workbook-defined formats.
pub const FIRST_CUSTOM_NUM_FMT_ID: u32 = 164;

/// Display format applied to date-only output cells.
pub const DATE_FORMAT: &str = "dd/mm/yyyy";
/// Display format applied to combined date + time output cells.
pub const DATE_TIME_FORMAT: &str = "dd/mm/yyyy hh:mm";
/// Display format applied to time-only output cells.
pub const TIME_FORMAT: &str = "hh:mm";

/// Temporal flavour of a number format.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TemporalFormat {
    Date,
    Time,
    DateTime,
}

/// An xf appended to `cellXfs`: a clone of `base` with a different `numFmtId`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DerivedXf {
    pub base: u32,
    pub num_fmt_id: u32,
}

/// The number-format view of a workbook's `styles.xml`.
///
/// Only what is needed to recognize date cells and to derive date-formatted variants of an
/// existing xf is modeled. Everything else in the styles part is preserved by the writer.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct StyleTable {
    /// `numFmtId` of each `<xf>` in `cellXfs`, by index.
    cell_xf_num_fmts: Vec<u32>,
    /// Workbook-defined `<numFmt>` entries.
    custom_formats: BTreeMap<u32, String>,
    /// Formats registered by [`StyleTable::ensure_number_format`] not present in the source.
    added_formats: BTreeMap<u32, String>,
    derived: Vec<DerivedXf>,
}

impl StyleTable {
    pub fn new(cell_xf_num_fmts: Vec<u32>, custom_formats: BTreeMap<u32, String>) -> Self {
        Self {
            cell_xf_num_fmts,
            custom_formats,
            ..Self::default()
        }
    }

    /// Number of xfs in the source `cellXfs` table.
    pub fn base_xf_count(&self) -> u32 {
        self.cell_xf_num_fmts.len() as u32
    }

    pub fn num_fmt_id(&self, xf: u32) -> u32 {
        if let Some(id) = self.cell_xf_num_fmts.get(xf as usize) {
            return *id;
        }
        let derived_idx = xf.checked_sub(self.base_xf_count());
        derived_idx
            .and_then(|idx| self.derived.get(idx as usize))
            .map(|d| d.num_fmt_id)
            .unwrap_or(0)
    }

    pub fn format_code(&self, num_fmt_id: u32) -> Option<&str> {
        self.custom_formats
            .get(&num_fmt_id)
            .or_else(|| self.added_formats.get(&num_fmt_id))
            .map(String::as_str)
            .or_else(|| builtin_format_code(num_fmt_id))
    }

    /// Classify the number format attached to `xf`.
    pub fn temporal_format(&self, xf: u32) -> Option<TemporalFormat> {
        let id = self.num_fmt_id(xf);
        if id == 0 {
            return None;
        }
        match self.format_code(id) {
            Some(code) => classify_format_code(code),
            // Excel reserves 50-58 for locale-specific date formats that are often not written.
            None if (50..=58).contains(&id) => Some(TemporalFormat::Date),
            None => None,
        }
    }

    /// Return an xf index that looks like `base_xf` but displays values with `code`.
    ///
    /// Registers a custom `numFmt` and a derived xf when no suitable one exists yet.
    pub fn ensure_number_format(&mut self, base_xf: u32, code: &str) -> u32 {
        let num_fmt_id = self.ensure_format_code(code);
        if self.num_fmt_id(base_xf) == num_fmt_id {
            return base_xf;
        }

        // Derived xfs are always cloned from a source xf.
        let root = self.root_xf(base_xf);
        if let Some(pos) = self
            .derived
            .iter()
            .position(|d| d.base == root && d.num_fmt_id == num_fmt_id)
        {
            return self.base_xf_count() + pos as u32;
        }
        self.derived.push(DerivedXf {
            base: root,
            num_fmt_id,
        });
        self.base_xf_count() + self.derived.len() as u32 - 1
    }

    fn root_xf(&self, xf: u32) -> u32 {
        match xf.checked_sub(self.base_xf_count()) {
            Some(idx) => self
                .derived
                .get(idx as usize)
                .map(|d| d.base)
                .unwrap_or(0),
            None => xf,
        }
    }

    fn ensure_format_code(&mut self, code: &str) -> u32 {
        if let Some((id, _)) = self
            .custom_formats
            .iter()
            .chain(self.added_formats.iter())
            .find(|(_, existing)| existing.as_str() == code)
        {
            return *id;
        }
        let next = self
            .custom_formats
            .keys()
            .chain(self.added_formats.keys())
            .max()
            .map(|max| (max + 1).max(FIRST_CUSTOM_NUM_FMT_ID))
            .unwrap_or(FIRST_CUSTOM_NUM_FMT_ID);
        self.added_formats.insert(next, code.to_string());
        next
    }

    /// Formats registered since load, to be appended to `<numFmts>`.
    pub fn added_formats(&self) -> impl Iterator<Item = (u32, &str)> {
        self.added_formats
            .iter()
            .map(|(id, code)| (*id, code.as_str()))
    }

    /// Xfs registered since load, to be appended to `<cellXfs>` in order.
    pub fn derived_xfs(&self) -> &[DerivedXf] {
        &self.derived
    }

    pub fn is_dirty(&self) -> bool {
        !self.derived.is_empty() || !self.added_formats.is_empty()
    }
}

/// Format codes of the built-in date/time `numFmtId`s.
pub fn builtin_format_code(id: u32) -> Option<&'static str> {
    match id {
        14 => Some("m/d/yyyy"),
        15 => Some("d-mmm-yy"),
        16 => Some("d-mmm"),
        17 => Some("mmm-yy"),
        18 => Some("h:mm AM/PM"),
        19 => Some("h:mm:ss AM/PM"),
        20 => Some("h:mm"),
        21 => Some("h:mm:ss"),
        22 => Some("m/d/yyyy h:mm"),
        45 => Some("mm:ss"),
        46 => Some("[h]:mm:ss"),
        47 => Some("mm:ss.0"),
        _ => None,
    }
}

/// Decide whether a format code renders dates, times, or both.
///
/// Quoted literals, escaped characters and bracketed sections other than elapsed-time markers
/// are skipped. A bare `m` counts as minutes when it follows an hour token or precedes seconds.
pub fn classify_format_code(code: &str) -> Option<TemporalFormat> {
    // Only the first section (positive numbers) decides.
    let section = first_section(code);

    let mut has_date = false;
    let mut has_time = false;
    let mut saw_hour = false;
    let mut pending_month = false;

    let mut chars = section.chars().peekable();
    while let Some(ch) = chars.next() {
        match ch {
            '"' => {
                for c in chars.by_ref() {
                    if c == '"' {
                        break;
                    }
                }
            }
            '\\' | '_' | '*' => {
                chars.next();
            }
            '[' => {
                let mut content = String::new();
                for c in chars.by_ref() {
                    if c == ']' {
                        break;
                    }
                    content.push(c);
                }
                let lower = content.to_ascii_lowercase();
                if !lower.is_empty()
                    && (lower.chars().all(|c| c == 'h')
                        || lower.chars().all(|c| c == 'm')
                        || lower.chars().all(|c| c == 's'))
                {
                    has_time = true;
                    saw_hour = true;
                }
            }
            'y' | 'Y' | 'd' | 'D' => has_date = true,
            'h' | 'H' => {
                has_time = true;
                saw_hour = true;
                if pending_month {
                    has_date = true;
                    pending_month = false;
                }
            }
            's' | 'S' => {
                has_time = true;
                pending_month = false;
            }
            'm' | 'M' => {
                while matches!(chars.peek(), Some('m' | 'M')) {
                    chars.next();
                }
                if saw_hour {
                    has_time = true;
                    saw_hour = false;
                } else {
                    if pending_month {
                        has_date = true;
                    }
                    pending_month = true;
                }
            }
            'a' | 'A' => {
                let rest: String = std::iter::once(ch).chain(chars.clone().take(4)).collect();
                let rest = rest.to_ascii_lowercase();
                let marker_len = if rest.starts_with("am/pm") {
                    4
                } else if rest.starts_with("a/p") {
                    2
                } else {
                    0
                };
                if marker_len > 0 {
                    has_time = true;
                    for _ in 0..marker_len {
                        chars.next();
                    }
                }
            }
            _ => {}
        }
    }
    if pending_month {
        has_date = true;
    }

    match (has_date, has_time) {
        (true, true) => Some(TemporalFormat::DateTime),
        (true, false) => Some(TemporalFormat::Date),
        (false, true) => Some(TemporalFormat::Time),
        (false, false) => None,
    }
}

fn first_section(code: &str) -> &str {
    let mut in_quotes = false;
    for (idx, ch) in code.char_indices() {
        match ch {
            '"' => in_quotes = !in_quotes,
            ';' if !in_quotes => return &code[..idx],
            _ => {}
        }
    }
    code
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_common_codes() {
        assert_eq!(classify_format_code("dd/mm/yyyy"), Some(TemporalFormat::Date));
        assert_eq!(classify_format_code("hh:mm"), Some(TemporalFormat::Time));
        assert_eq!(classify_format_code("mm:ss"), Some(TemporalFormat::Time));
        assert_eq!(
            classify_format_code("dd/mm/yyyy hh:mm"),
            Some(TemporalFormat::DateTime)
        );
        assert_eq!(classify_format_code("mmm-yy"), Some(TemporalFormat::Date));
        assert_eq!(classify_format_code("0.00"), None);
        assert_eq!(classify_format_code("\"day\" 0"), None);
        assert_eq!(classify_format_code("[h]:mm:ss"), Some(TemporalFormat::Time));
        assert_eq!(classify_format_code("General"), None);
        assert_eq!(classify_format_code("h:mm AM/PM"), Some(TemporalFormat::Time));
        assert_eq!(
            classify_format_code("m/d/yyyy h:mm"),
            Some(TemporalFormat::DateTime)
        );
    }

    #[test]
    fn ensure_number_format_reuses_entries() {
        let mut styles = StyleTable::new(vec![0, 14], BTreeMap::new());

        let a = styles.ensure_number_format(0, DATE_TIME_FORMAT);
        let b = styles.ensure_number_format(0, DATE_TIME_FORMAT);
        assert_eq!(a, 2);
        assert_eq!(a, b);
        assert_eq!(styles.num_fmt_id(a), FIRST_CUSTOM_NUM_FMT_ID);
        assert_eq!(styles.temporal_format(a), Some(TemporalFormat::DateTime));

        // Deriving from a derived xf goes back to the source xf.
        let c = styles.ensure_number_format(a, DATE_FORMAT);
        assert_eq!(styles.derived_xfs()[1].base, 0);
        assert_eq!(c, 3);
        assert_eq!(styles.added_formats().count(), 2);
    }

    #[test]
    fn existing_custom_formats_are_reused() {
        let mut custom = BTreeMap::new();
        custom.insert(170, DATE_FORMAT.to_string());
        let mut styles = StyleTable::new(vec![0, 170], custom);

        assert_eq!(styles.ensure_number_format(1, DATE_FORMAT), 1);
        assert!(!styles.is_dirty());
        assert_eq!(styles.temporal_format(1), Some(TemporalFormat::Date));
    }
}
