//! Row mutations and row snapshots exchanged with table handles.

use std::collections::{BTreeMap, BTreeSet};

use crate::ColumnAddress;

/// Cells to write to one row. Applied atomically by the table handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Put {
    pub row: Vec<u8>,
    pub cells: BTreeMap<ColumnAddress, Vec<u8>>,
}

impl Put {
    pub fn new(row: Vec<u8>) -> Self {
        Self {
            row,
            cells: BTreeMap::new(),
        }
    }

    pub fn add(mut self, column: ColumnAddress, value: Vec<u8>) -> Self {
        self.cells.insert(column, value);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn has(&self, column: &ColumnAddress) -> bool {
        self.cells.contains_key(column)
    }
}

/// Columns to remove from one row.
///
/// A delete with no columns removes the whole row, which is why
/// [`MutationIntent`] never produces one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delete {
    pub row: Vec<u8>,
    pub columns: BTreeSet<ColumnAddress>,
}

impl Delete {
    pub fn row(row: Vec<u8>) -> Self {
        Self {
            row,
            columns: BTreeSet::new(),
        }
    }

    pub fn columns(row: Vec<u8>, columns: BTreeSet<ColumnAddress>) -> Self {
        Self { row, columns }
    }

    pub fn is_whole_row(&self) -> bool {
        self.columns.is_empty()
    }
}

/// Additive and subtractive changesets for one write.
///
/// A column lives in at most one of the two sets: adding it to one removes it
/// from the other.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MutationIntent {
    additive: BTreeMap<ColumnAddress, Vec<u8>>,
    subtractive: BTreeSet<ColumnAddress>,
}

impl MutationIntent {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, column: ColumnAddress, value: Vec<u8>) {
        self.subtractive.remove(&column);
        self.additive.insert(column, value);
    }

    pub fn delete(&mut self, column: ColumnAddress) {
        self.additive.remove(&column);
        self.subtractive.insert(column);
    }

    pub fn additive(&self) -> &BTreeMap<ColumnAddress, Vec<u8>> {
        &self.additive
    }

    pub fn subtractive(&self) -> &BTreeSet<ColumnAddress> {
        &self.subtractive
    }

    pub fn is_empty(&self) -> bool {
        self.additive.is_empty() && self.subtractive.is_empty()
    }

    /// Split into the requests to send. Either half is `None` when empty; an
    /// empty column delete would remove the entire row.
    pub fn into_requests(self, row: &[u8]) -> (Option<Put>, Option<Delete>) {
        let put = (!self.additive.is_empty()).then(|| Put {
            row: row.to_vec(),
            cells: self.additive,
        });
        let delete = (!self.subtractive.is_empty())
            .then(|| Delete::columns(row.to_vec(), self.subtractive));
        (put, delete)
    }
}

/// Cells read back for one row. Empty when the row does not exist.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RowSnapshot {
    pub row: Vec<u8>,
    pub cells: BTreeMap<ColumnAddress, Vec<u8>>,
}

impl RowSnapshot {
    pub fn empty(row: Vec<u8>) -> Self {
        Self {
            row,
            cells: BTreeMap::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn value(&self, column: &ColumnAddress) -> Option<&[u8]> {
        self.cells.get(column).map(Vec::as_slice)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn col(q: &str) -> ColumnAddress {
        ColumnAddress::new("t", q)
    }

    #[test]
    fn column_moves_between_changesets() {
        let mut intent = MutationIntent::new();
        intent.put(col("name"), b"Harold".to_vec());
        intent.delete(col("name"));
        assert!(intent.additive().is_empty());
        assert!(intent.subtractive().contains(&col("name")));

        intent.put(col("name"), b"Bob".to_vec());
        assert!(intent.subtractive().is_empty());
        assert_eq!(intent.additive().get(&col("name")), Some(&b"Bob".to_vec()));
    }

    #[test]
    fn empty_changesets_produce_no_requests() {
        let (put, delete) = MutationIntent::new().into_requests(b"k1");
        assert!(put.is_none());
        assert!(delete.is_none());

        let mut intent = MutationIntent::new();
        intent.put(col("you"), vec![0, 0, 0, 4]);
        let (put, delete) = intent.into_requests(b"k1");
        assert!(put.is_some_and(|p| p.has(&col("you"))));
        assert!(delete.is_none());
    }

    #[test]
    fn column_delete_is_never_whole_row() {
        let mut intent = MutationIntent::new();
        intent.delete(col("name"));
        let (_, delete) = intent.into_requests(b"k1");
        assert!(delete.is_some_and(|d| !d.is_whole_row()));
    }
}
