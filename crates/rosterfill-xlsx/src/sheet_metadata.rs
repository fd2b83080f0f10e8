use rosterfill_model::DateSystem;
use roxmltree::{Document, Node};

use crate::XlsxError;

/// A `<sheet>` entry of `xl/workbook.xml`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkbookSheetInfo {
    pub name: String,
    pub sheet_id: u32,
    pub rel_id: String,
}

fn elements<'a, 'input>(
    doc: &'a Document<'input>,
    local: &'a str,
) -> impl Iterator<Item = Node<'a, 'input>> + 'a {
    doc.descendants()
        .filter(move |n| n.is_element() && n.tag_name().name() == local)
}

/// Sheets in tab order. Any namespace prefix is accepted on both elements and `r:id`.
pub fn parse_workbook_sheets(workbook_xml: &str) -> Result<Vec<WorkbookSheetInfo>, XlsxError> {
    let doc = Document::parse(workbook_xml)?;
    elements(&doc, "sheet")
        .map(|sheet| -> Result<WorkbookSheetInfo, XlsxError> {
            let name = sheet
                .attribute("name")
                .ok_or(XlsxError::MissingAttr("name"))?;
            let sheet_id = sheet
                .attribute("sheetId")
                .ok_or(XlsxError::MissingAttr("sheetId"))?
                .trim()
                .parse()
                .map_err(|_| XlsxError::InvalidSheetId)?;
            let rel_id = sheet
                .attributes()
                .find(|attr| attr.name() == "id" && attr.namespace().is_some())
                .ok_or(XlsxError::MissingAttr("r:id"))?;
            Ok(WorkbookSheetInfo {
                name: name.to_string(),
                sheet_id,
                rel_id: rel_id.value().to_string(),
            })
        })
        .collect()
}

/// `workbookPr/@date1904` selects the 1904 epoch; anything else is 1900.
pub fn parse_date_system(workbook_xml: &str) -> Result<DateSystem, XlsxError> {
    let doc = Document::parse(workbook_xml)?;
    let date1904 = elements(&doc, "workbookPr")
        .next()
        .and_then(|pr| pr.attribute("date1904"))
        .is_some_and(|v| v == "1" || v.eq_ignore_ascii_case("true"));
    Ok(if date1904 {
        DateSystem::Excel1904
    } else {
        DateSystem::Excel1900
    })
}
