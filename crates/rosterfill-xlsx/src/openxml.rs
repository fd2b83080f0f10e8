//! Small OPC/SpreadsheetML helpers shared by the reader, the writer and the validation patcher.

use crate::XlsxError;

pub(crate) const SPREADSHEETML_NS: &str =
    "http://schemas.openxmlformats.org/spreadsheetml/2006/main";

/// `Id -> Target` of one `.rels` part, in document order.
pub(crate) fn relationship_targets(xml: &[u8]) -> Result<Vec<(String, String)>, XlsxError> {
    let xml = std::str::from_utf8(xml)?;
    let doc = roxmltree::Document::parse(xml)?;
    Ok(doc
        .root_element()
        .children()
        .filter(|n| n.is_element() && n.tag_name().name() == "Relationship")
        .filter(|n| n.attribute("TargetMode") != Some("External"))
        .filter_map(|n| Some((n.attribute("Id")?.to_string(), n.attribute("Target")?.to_string())))
        .collect())
}

/// Part name of `target` as seen from `source_part` (`xl/workbook.xml` + `worksheets/a.xml`
/// -> `xl/worksheets/a.xml`). Leading `/` makes the target package-absolute.
pub(crate) fn resolve_target(source_part: &str, target: &str) -> String {
    let target = target.split('#').next().unwrap_or_default();
    let mut parts: Vec<&str> = match target.strip_prefix('/') {
        Some(_) => Vec::new(),
        None => source_part.split('/').collect(),
    };
    // Drop the source file name, keep its folder.
    parts.pop();

    for segment in target.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            other => parts.push(other),
        }
    }
    parts.join("/")
}

pub(crate) fn local_name(name: &[u8]) -> &[u8] {
    name.rsplit(|b| *b == b':').next().unwrap_or(name)
}

pub(crate) fn element_prefix(name: &[u8]) -> Option<&[u8]> {
    let idx = name.iter().rposition(|b| *b == b':')?;
    Some(&name[..idx])
}

pub(crate) fn prefixed_tag(prefix: Option<&str>, local: &str) -> String {
    match prefix {
        Some(prefix) => format!("{prefix}:{local}"),
        None => local.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn worksheet_targets_resolve_from_the_workbook_folder() {
        assert_eq!(
            resolve_target("xl/workbook.xml", "worksheets/sheet1.xml"),
            "xl/worksheets/sheet1.xml"
        );
        assert_eq!(
            resolve_target("xl/workbook.xml", "/xl/worksheets/sheet2.xml"),
            "xl/worksheets/sheet2.xml"
        );
        assert_eq!(
            resolve_target("xl/workbook.xml", "./worksheets/../worksheets/sheet3.xml#x"),
            "xl/worksheets/sheet3.xml"
        );
    }

    #[test]
    fn external_relationships_are_skipped() {
        let rels = br#"<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="t" Target="worksheets/sheet1.xml"/><Relationship Id="rId2" Type="t" Target="https://example.com/roster" TargetMode="External"/></Relationships>"#;
        assert_eq!(
            relationship_targets(rels).unwrap(),
            vec![("rId1".to_string(), "worksheets/sheet1.xml".to_string())]
        );
    }

    #[test]
    fn names_split_on_the_last_colon() {
        assert_eq!(local_name(b"x:dataValidations"), b"dataValidations");
        assert_eq!(local_name(b"row"), b"row");
        assert_eq!(element_prefix(b"x14:dataValidation"), Some(&b"x14"[..]));
        assert_eq!(element_prefix(b"c"), None);
        assert_eq!(prefixed_tag(Some("x"), "extLst"), "x:extLst");
    }
}
