use std::collections::BTreeMap;
use std::io::Cursor;

use rosterfill_model::{parse_sqref, ValidationKind, ValidationRule};
use serde::Serialize;
use zip::ZipArchive;

use super::namespaces::NamespaceTable;
use crate::zip_util::{
    is_worksheet_part, read_zip_entry, ZipInflateBudget, DEFAULT_MAX_ZIP_PART_BYTES,
    DEFAULT_MAX_ZIP_TOTAL_BYTES,
};
use crate::XlsxError;

/// Validation markup captured from one worksheet part.
///
/// Fragments are the exact source text of the root's `<dataValidations>` and `<extLst>`
/// children; `namespaces` holds the root declarations they were written against.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SheetValidations {
    pub data_validations: Option<String>,
    pub ext_lst: Option<String>,
    /// Number of `dataValidation` rules inside `extLst` (x14 validations).
    pub ext_validation_count: usize,
    /// Rules parsed from both blocks.
    pub rules: Vec<ValidationRule>,
    pub namespaces: NamespaceTable,
}

impl SheetValidations {
    pub fn has_validations(&self) -> bool {
        self.data_validations.is_some() || self.ext_validation_count > 0
    }

    pub fn from_worksheet_xml(xml: &str) -> Result<Self, XlsxError> {
        let doc = roxmltree::Document::parse(xml)?;
        let root = doc.root_element();
        let mut out = SheetValidations {
            namespaces: NamespaceTable::from_roxml(root),
            ..Self::default()
        };

        for child in root.children().filter(roxmltree::Node::is_element) {
            match child.tag_name().name() {
                "dataValidations" => {
                    if out.data_validations.is_some() {
                        log::warn!("worksheet has more than one dataValidations block; keeping the first");
                        continue;
                    }
                    out.data_validations = Some(xml[child.range()].to_string());
                    out.rules.extend(
                        child
                            .children()
                            .filter(|n| n.is_element() && n.tag_name().name() == "dataValidation")
                            .filter_map(data_validation_rule),
                    );
                }
                "extLst" => {
                    if out.ext_lst.is_some() {
                        continue;
                    }
                    out.ext_lst = Some(xml[child.range()].to_string());
                    for dv in child
                        .descendants()
                        .filter(|n| n.is_element() && n.tag_name().name() == "dataValidation")
                    {
                        out.ext_validation_count += 1;
                        out.rules.extend(ext_validation_rule(dv));
                    }
                }
                _ => {}
            }
        }
        Ok(out)
    }
}

/// Rules declared in a worksheet part.
pub fn read_validation_rules(xml: &str) -> Result<Vec<ValidationRule>, XlsxError> {
    Ok(SheetValidations::from_worksheet_xml(xml)?.rules)
}

/// Capture the validation markup of every worksheet part (`xl/worksheets/*.xml`).
///
/// Sheets that are not well-formed are logged and left out of the map.
pub fn extract_validations(bytes: &[u8]) -> Result<BTreeMap<String, SheetValidations>, XlsxError> {
    let mut archive = ZipArchive::new(Cursor::new(bytes))?;
    let mut budget = ZipInflateBudget::new(DEFAULT_MAX_ZIP_TOTAL_BYTES);
    let mut out = BTreeMap::new();

    for idx in 0..archive.len() {
        let name = archive.by_index_raw(idx)?.name().to_string();
        if !is_worksheet_part(&name) {
            continue;
        }
        let (name, bytes) =
            read_zip_entry(&mut archive, idx, DEFAULT_MAX_ZIP_PART_BYTES, &mut budget)?;
        let Some(bytes) = bytes else { continue };

        let parsed = std::str::from_utf8(&bytes)
            .map_err(XlsxError::from)
            .and_then(SheetValidations::from_worksheet_xml);
        match parsed {
            Ok(sheet) => {
                out.insert(name, sheet);
            }
            Err(err) => log::warn!("skipping validations of {name}: {err}"),
        }
    }
    Ok(out)
}

/// Number of worksheets that still carry a validation block.
pub fn verify(bytes: &[u8]) -> Result<usize, XlsxError> {
    let count = extract_validations(bytes)?
        .values()
        .filter(|sheet| sheet.has_validations())
        .count();
    if count == 0 {
        log::warn!("no worksheet carries data validations");
    }
    Ok(count)
}

fn child_text<'a>(node: roxmltree::Node<'a, '_>, local: &str) -> Option<&'a str> {
    node.children()
        .find(|n| n.is_element() && n.tag_name().name() == local)
        .and_then(|n| n.text())
}

fn strip_leading_equals(formula: &str) -> String {
    let trimmed = formula.trim();
    trimmed.strip_prefix('=').unwrap_or(trimmed).to_string()
}

fn data_validation_rule(node: roxmltree::Node<'_, '_>) -> Option<ValidationRule> {
    // A missing `type` is `none`: the rule does not restrict input.
    let kind = ValidationKind::from_xml(node.attribute("type")?)?;
    let sqref = node.attribute("sqref").unwrap_or_default();
    let ranges = match parse_sqref(sqref) {
        Ok(ranges) => ranges,
        Err(err) => {
            log::warn!("ignoring dataValidation with sqref {sqref:?}: {err}");
            return None;
        }
    };
    Some(ValidationRule {
        kind,
        operator: node.attribute("operator").map(str::to_string),
        formula1: child_text(node, "formula1")
            .map(strip_leading_equals)
            .unwrap_or_default(),
        formula2: child_text(node, "formula2").map(strip_leading_equals),
        ranges,
    })
}

/// x14 rules keep formulas in `x14:formula1/xm:f` and ranges in `xm:sqref`.
fn ext_validation_rule(node: roxmltree::Node<'_, '_>) -> Option<ValidationRule> {
    let kind = ValidationKind::from_xml(node.attribute("type")?)?;
    let formula = |local: &str| {
        node.children()
            .find(|n| n.is_element() && n.tag_name().name() == local)
            .and_then(|n| child_text(n, "f"))
            .map(strip_leading_equals)
    };
    let ranges = parse_sqref(child_text(node, "sqref")?).ok()?;
    Some(ValidationRule {
        kind,
        operator: node.attribute("operator").map(str::to_string),
        formula1: formula("formula1").unwrap_or_default(),
        formula2: formula("formula2"),
        ranges,
    })
}
