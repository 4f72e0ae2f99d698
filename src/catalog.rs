use std::collections::HashMap;

use crate::error::{Result, RowSetError};

/// Ordered column names of a command and their declared types, with reverse
/// lookup by name.
///
/// Names are matched after ASCII uppercasing, as SQL catalogs usually do.
#[derive(Debug, Clone, Default)]
pub struct ColumnCatalog {
    names: Vec<String>,
    types: Vec<Option<String>>,
    by_name: HashMap<String, usize>,
}

impl ColumnCatalog {
    pub fn new(names: Vec<String>) -> Self {
        let types = vec![None; names.len()];
        Self::with_types(names, types)
    }

    pub fn with_types(names: Vec<String>, mut types: Vec<Option<String>>) -> Self {
        types.resize(names.len(), None);
        let mut by_name = HashMap::with_capacity(names.len());
        for (i, name) in names.iter().enumerate() {
            // First occurrence wins when a projection repeats a name.
            by_name.entry(name.to_ascii_uppercase()).or_insert(i + 1);
        }
        Self {
            names,
            types,
            by_name,
        }
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// 1-based index of `label`.
    pub fn find(&self, label: &str) -> Result<usize> {
        self.by_name
            .get(&label.to_ascii_uppercase())
            .copied()
            .ok_or_else(|| RowSetError::ColumnNotFound(label.to_string()))
    }

    pub fn contains(&self, label: &str) -> bool {
        self.by_name.contains_key(&label.to_ascii_uppercase())
    }

    pub fn name(&self, index: usize) -> Result<&str> {
        index
            .checked_sub(1)
            .and_then(|i| self.names.get(i))
            .map(String::as_str)
            .ok_or(RowSetError::ColumnOutOfBounds {
                index,
                count: self.names.len(),
            })
    }

    /// Declared type of the 1-based `index`, as written in the table schema.
    pub fn type_name(&self, index: usize) -> Result<Option<&str>> {
        self.name(index)?;
        Ok(self.types[index - 1].as_deref())
    }

    /// Number of leading columns batch rows carry before the projected ones:
    /// 1 when the key is queried but not part of the projection.
    pub fn key_offset(&self, key: Option<&str>) -> usize {
        match key {
            Some(key) if !self.contains(key) => 1,
            _ => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> ColumnCatalog {
        ColumnCatalog::new(vec!["id".into(), "Name".into(), "the_geom".into()])
    }

    #[test]
    fn lookup_is_case_normalized() {
        let c = catalog();
        assert_eq!(c.find("NAME").expect("name"), 2);
        assert_eq!(c.find("name").expect("name"), 2);
        assert_eq!(c.name(2).expect("index 2"), "Name");
    }

    #[test]
    fn unknown_column_is_reported() {
        let err = catalog().find("area").expect_err("missing column");
        assert_eq!(err.to_string(), "column area does not exist");
    }

    #[test]
    fn name_out_of_bounds() {
        let c = catalog();
        assert!(matches!(
            c.name(0),
            Err(RowSetError::ColumnOutOfBounds { index: 0, count: 3 })
        ));
        assert!(c.name(4).is_err());
    }

    #[test]
    fn declared_types_follow_names() {
        let c = ColumnCatalog::with_types(
            vec!["id".into(), "pop".into()],
            vec![Some("INTEGER".into())],
        );
        assert_eq!(c.type_name(1).expect("id"), Some("INTEGER"));
        assert_eq!(c.type_name(2).expect("pop"), None);
        assert!(matches!(
            c.type_name(3),
            Err(RowSetError::ColumnOutOfBounds { index: 3, count: 2 })
        ));
    }

    #[test]
    fn key_offset_depends_on_projection() {
        let c = catalog();
        assert_eq!(c.key_offset(Some("ID")), 0);
        assert_eq!(c.key_offset(Some("_rowid_")), 1);
        assert_eq!(c.key_offset(None), 0);
    }
}
