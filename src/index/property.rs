//! Property Index
//!
//! One sorted index over a single property of a group: the open index file
//! plus its in-memory copy, kept in the same order.

use std::ops::Range;
use std::path::Path;

use crate::error::{Result, UnbloatError};

use super::file::{IndexEntry, IndexFile, IndexFileOptions};
use super::value::{IndexValue, ValueType};

/// Sorted (value, key) index for one property
///
/// Entries are ascending by value. Equal values keep insertion order: a new
/// entry is placed after every existing entry with the same value.
pub struct PropertyIndex {
    name: String,
    file: IndexFile,
    entries: Vec<IndexEntry>,
}

impl PropertyIndex {
    /// Open the index file at `path`, loading every entry into memory
    pub fn open(
        name: impl Into<String>,
        path: &Path,
        value_type: ValueType,
        options: IndexFileOptions,
    ) -> Result<Self> {
        let (file, entries) = IndexFile::open(path, value_type, options)?;

        if let Some(i) = entries.windows(2).position(|w| w[0].value > w[1].value) {
            return Err(UnbloatError::corruption(
                path,
                format!("entries {} and {} are out of order", i, i + 1),
            ));
        }

        Ok(Self {
            name: name.into(),
            file,
            entries,
        })
    }

    /// Insert `key` with `value`, returning the position it landed at
    pub fn insert(&mut self, value: IndexValue, key: &str) -> Result<usize> {
        self.check_type(&value)?;

        let position = self.upper_bound(&value);
        let entry = IndexEntry {
            value,
            key: key.to_string(),
        };

        self.file.insert(position, &entry)?;
        self.entries.insert(position, entry);

        Ok(position)
    }

    /// Remove the entry owned by `key`
    ///
    /// Returns false if the key has no entry in this index.
    pub fn remove(&mut self, key: &str) -> Result<bool> {
        let Some(position) = self.entries.iter().position(|e| e.key == key) else {
            return Ok(false);
        };

        self.file.remove(position)?;
        self.entries.remove(position);

        Ok(true)
    }

    /// Keys whose value equals `value`, in storage order
    pub fn find(&self, value: &IndexValue) -> Result<Vec<String>> {
        self.check_type(value)?;
        Ok(self.keys_in(self.equal_range(value)))
    }

    /// Keys whose value is greater than `value`, ascending
    pub fn above(&self, value: &IndexValue) -> Result<Vec<String>> {
        self.check_type(value)?;
        let start = self.upper_bound(value);
        Ok(self.keys_in(start..self.entries.len()))
    }

    /// Keys whose value is less than `value`, descending
    pub fn below(&self, value: &IndexValue) -> Result<Vec<String>> {
        self.check_type(value)?;
        let end = self.lower_bound(value);
        let mut keys = self.keys_in(0..end);
        keys.reverse();
        Ok(keys)
    }

    /// Keys whose value lies in `low..=high`, ascending
    pub fn between(&self, low: &IndexValue, high: &IndexValue) -> Result<Vec<String>> {
        self.check_type(low)?;
        self.check_type(high)?;

        let start = self.lower_bound(low);
        let end = self.upper_bound(high).max(start);
        Ok(self.keys_in(start..end))
    }

    /// Replace every entry, sorting stably by value
    pub fn rebuild(&mut self, mut entries: Vec<IndexEntry>) -> Result<()> {
        for entry in &entries {
            self.check_type(&entry.value)?;
        }
        entries.sort_by(|a, b| a.value.cmp(&b.value));

        self.file.replace_all(&entries)?;
        self.entries = entries;
        Ok(())
    }

    /// Re-read the file from disk (ignores the in-memory copy)
    pub fn read_file(&mut self) -> Result<Vec<IndexEntry>> {
        self.file.read_entries()
    }

    pub fn sync(&mut self) -> Result<()> {
        self.file.sync()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value_type(&self) -> ValueType {
        self.file.value_type()
    }

    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    fn check_type(&self, value: &IndexValue) -> Result<()> {
        if value.value_type() != self.value_type() {
            return Err(UnbloatError::SchemaMismatch(format!(
                "property {:?} is indexed as {}, got a {} value",
                self.name,
                self.value_type(),
                value.value_type()
            )));
        }
        Ok(())
    }

    /// First position whose value is not less than `value`
    fn lower_bound(&self, value: &IndexValue) -> usize {
        self.entries.partition_point(|e| e.value < *value)
    }

    /// First position whose value is greater than `value`
    fn upper_bound(&self, value: &IndexValue) -> usize {
        self.entries.partition_point(|e| e.value <= *value)
    }

    /// Binary search for one match, then walk outwards across equal values
    fn equal_range(&self, value: &IndexValue) -> Range<usize> {
        let Ok(hit) = self.entries.binary_search_by(|e| e.value.cmp(value)) else {
            return 0..0;
        };

        let mut start = hit;
        while start > 0 && self.entries[start - 1].value == *value {
            start -= 1;
        }

        let mut end = hit + 1;
        while end < self.entries.len() && self.entries[end].value == *value {
            end += 1;
        }

        start..end
    }

    fn keys_in(&self, range: Range<usize>) -> Vec<String> {
        self.entries[range].iter().map(|e| e.key.clone()).collect()
    }
}
