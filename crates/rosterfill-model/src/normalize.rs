use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

use crate::CellValue;

/// Canonicalize a free-text identifier for fuzzy matching.
///
/// Lower-cases, strips diacritics (NFD, combining marks dropped), trims and collapses internal
/// whitespace runs to a single space. The result is stable under re-application.
pub fn normalize_name(raw: &str) -> String {
    // Lower-case first: some lower-case mappings introduce combining marks (`İ` -> `i̇`).
    let lowered = raw.to_lowercase();
    let stripped: String = lowered.nfd().filter(|c| !is_combining_mark(*c)).collect();

    let mut out = String::with_capacity(stripped.len());
    for word in stripped.split_whitespace() {
        if !out.is_empty() {
            out.push(' ');
        }
        out.push_str(word);
    }
    out
}

/// [`normalize_name`] over a cell value; empty cells normalize to `""`.
pub fn normalize_value(value: &CellValue) -> String {
    if value.is_empty() {
        return String::new();
    }
    normalize_name(&value.to_text())
}
