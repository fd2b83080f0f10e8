use std::collections::BTreeMap;

use indexmap::IndexMap;
use rosterfill_model::{normalize_value, CellRef, CellValue, Worksheet};

use crate::columns::{ColumnMap, FieldKey};

/// A roster row, identified by its identity columns.
#[derive(Clone, Debug, PartialEq)]
pub struct TemplateEntity {
    /// 0-indexed template row.
    pub row: u32,
    /// Raw identity values (identifier, code, name) present in the row.
    pub identity: BTreeMap<FieldKey, CellValue>,
    /// Normalized value of the match-key column.
    pub key: String,
}

/// Read every data row below `header_row` that carries a match-key value.
pub fn read_entities(
    sheet: &Worksheet,
    columns: &ColumnMap,
    header_row: u32,
    match_key: FieldKey,
) -> Vec<TemplateEntity> {
    let Some(key_col) = columns.get(match_key) else {
        return Vec::new();
    };
    let last_row = sheet.max_row().unwrap_or(header_row);

    let mut out = Vec::new();
    for row in header_row.saturating_add(1)..=last_row {
        let key = normalize_value(sheet.value(CellRef::new(row, key_col)));
        if key.is_empty() {
            continue;
        }
        let identity = FieldKey::IDENTITY
            .iter()
            .filter_map(|field| Some((*field, columns.get(*field)?)))
            .map(|(field, col)| (field, sheet.value(CellRef::new(row, col)).clone()))
            .filter(|(_, value)| !value.is_empty())
            .collect();
        out.push(TemplateEntity { row, identity, key });
    }
    out
}

/// Normalized key -> entity position, in first-insertion order.
///
/// A key seen twice keeps its first position but points at the later entity.
#[derive(Debug, Default)]
pub struct EntityIndex {
    by_key: IndexMap<String, usize>,
}

impl EntityIndex {
    pub fn build(entities: &[TemplateEntity]) -> Self {
        let mut by_key = IndexMap::with_capacity(entities.len());
        for (idx, entity) in entities.iter().enumerate() {
            if let Some(previous) = by_key.insert(entity.key.clone(), idx) {
                log::debug!(
                    "duplicate roster key {:?} at rows {} and {}; keeping the later",
                    entity.key,
                    entities[previous].row + 1,
                    entity.row + 1
                );
            }
        }
        Self { by_key }
    }

    /// Exact match, else the first key that contains `key` or is contained in it.
    pub fn lookup(&self, key: &str) -> Option<usize> {
        if let Some(idx) = self.by_key.get(key) {
            return Some(*idx);
        }
        self.by_key
            .iter()
            .find(|(candidate, _)| loosely_matches(candidate, key))
            .map(|(_, idx)| *idx)
    }

    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }
}

/// Substring containment in either direction, or the same words with initials standing in
/// for some of them (`"j. garcia"` ~ `"jose garcia"`).
pub fn loosely_matches(a: &str, b: &str) -> bool {
    if a.is_empty() || b.is_empty() {
        return false;
    }
    a.contains(b) || b.contains(a) || initials_match(a, b)
}

fn initials_match(a: &str, b: &str) -> bool {
    let (a, b): (Vec<&str>, Vec<&str>) = (a.split(' ').collect(), b.split(' ').collect());
    a.len() == b.len()
        && a.iter()
            .zip(&b)
            .all(|(x, y)| x == y || is_initial_of(x, y) || is_initial_of(y, x))
}

/// `"j."` or `"j"` abbreviating `"jose"`.
fn is_initial_of(initial: &str, word: &str) -> bool {
    let initial = initial.strip_suffix('.').unwrap_or(initial);
    let mut chars = initial.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) => word.len() > 1 && word.starts_with(c),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn entity(row: u32, key: &str) -> TemplateEntity {
        TemplateEntity {
            row,
            identity: BTreeMap::new(),
            key: key.to_string(),
        }
    }

    #[test]
    fn exact_then_containment_in_insertion_order() {
        let entities = vec![
            entity(1, "ana lopez"),
            entity(2, "ana maria lopez"),
            entity(3, "luis"),
        ];
        let index = EntityIndex::build(&entities);
        assert_eq!(index.lookup("luis"), Some(2));
        assert_eq!(index.lookup("ana"), Some(0));
        assert_eq!(index.lookup("luis perez"), Some(2));
        assert_eq!(index.lookup("marta"), None);
    }

    #[test]
    fn later_duplicate_wins_but_keeps_position() {
        let entities = vec![entity(1, "ana"), entity(2, "luis"), entity(3, "ana")];
        let index = EntityIndex::build(&entities);
        assert_eq!(index.len(), 2);
        assert_eq!(index.lookup("ana"), Some(2));
        assert_eq!(index.lookup("an"), Some(2));
    }

    #[test]
    fn initials_stand_in_for_words() {
        assert!(loosely_matches("jose garcia", "j. garcia"));
        assert!(loosely_matches("j garcia", "jose garcia"));
        assert!(!loosely_matches("jose garcia", "j. perez"));
        assert!(!loosely_matches("jose garcia", "m. garcia"));
        assert!(!loosely_matches("", "garcia"));
    }

    #[test]
    fn entities_skip_rows_without_key() {
        let mut sheet = Worksheet::new("Roster");
        sheet.set_value(CellRef::new(0, 0), CellValue::from("Name"));
        sheet.set_value(CellRef::new(1, 0), CellValue::from("Ana"));
        sheet.set_value(CellRef::new(2, 1), CellValue::from("orphan"));
        sheet.set_value(CellRef::new(3, 0), CellValue::from("  LUIS "));
        let columns: ColumnMap = [(FieldKey::Name, 0)].into_iter().collect();

        let entities = read_entities(&sheet, &columns, 0, FieldKey::Name);
        assert_eq!(
            entities.iter().map(|e| (e.row, e.key.as_str())).collect::<Vec<_>>(),
            vec![(1, "ana"), (3, "luis")]
        );
        assert_eq!(entities[1].identity[&FieldKey::Name], CellValue::from("  LUIS "));
    }
}
