//! Composite key layout.
//!
//! Cell key: `u32 row length | row | u16 family length | family | qualifier`,
//! all lengths big-endian. The length prefix keeps one row's cells apart from
//! any row whose key merely starts with the same bytes. Family names are
//! therefore limited to `MAX_FAMILY_LEN` bytes.
//!
//! Schema key: `table | 0x00 | family`.

use wide_row_storage::ColumnAddress;

pub(crate) const MAX_FAMILY_LEN: usize = u16::MAX as usize;

pub(crate) fn row_prefix(row: &[u8]) -> Vec<u8> {
    let mut key = Vec::with_capacity(4 + row.len());
    key.extend_from_slice(&(row.len() as u32).to_be_bytes());
    key.extend_from_slice(row);
    key
}

pub(crate) fn cell_key(row: &[u8], column: &ColumnAddress) -> Vec<u8> {
    let mut key = row_prefix(row);
    key.extend_from_slice(&(column.family.len() as u16).to_be_bytes());
    key.extend_from_slice(column.family.as_bytes());
    key.extend_from_slice(column.qualifier.as_bytes());
    key
}

/// Column of a cell key read back from a row scan.
pub(crate) fn cell_column(row: &[u8], key: &[u8]) -> Option<ColumnAddress> {
    let rest = key.get(4 + row.len()..)?;
    let family_len = u16::from_be_bytes(rest.get(..2)?.try_into().ok()?) as usize;
    let family = std::str::from_utf8(rest.get(2..2 + family_len)?).ok()?;
    let qualifier = std::str::from_utf8(rest.get(2 + family_len..)?).ok()?;
    Some(ColumnAddress::new(family, qualifier))
}

/// Row and column of a cell key found by a full-table scan.
pub(crate) fn split_cell_key(key: &[u8]) -> Option<(&[u8], ColumnAddress)> {
    let row_len = u32::from_be_bytes(key.get(..4)?.try_into().ok()?) as usize;
    let row = key.get(4..4 + row_len)?;
    Some((row, cell_column(row, key)?))
}

pub(crate) fn schema_prefix(table: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(table.len() + 1);
    key.extend_from_slice(table.as_bytes());
    key.push(0);
    key
}

pub(crate) fn schema_key(table: &str, family: &str) -> Vec<u8> {
    let mut key = schema_prefix(table);
    key.extend_from_slice(family.as_bytes());
    key
}

pub(crate) fn schema_family(table: &str, key: &[u8]) -> Option<String> {
    let family = key.get(table.len() + 1..)?;
    std::str::from_utf8(family).ok().map(str::to_string)
}
