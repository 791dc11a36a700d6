//! Index Manager
//!
//! Owns every open property index of one database instance.
//!
//! ## Responsibilities
//! - Open a group's full index set on first use (creating empty files)
//! - Route inserts, removals and lookups to the right property index
//! - Keep handles open for the instance lifetime, sync and close on shutdown

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::{Result, UnbloatError};
use crate::schema::GroupSchema;

use super::file::{IndexEntry, IndexFileOptions};
use super::property::PropertyIndex;
use super::value::IndexValue;

/// Shared handle to one property index
///
/// The lock covers the whole locate → mutate file → update memory cycle.
pub type IndexHandle = Arc<RwLock<PropertyIndex>>;

/// Property indexes of one group, ordered by property name
type GroupIndexes = BTreeMap<String, IndexHandle>;

/// Manages the index handle table
///
/// ## Concurrency:
/// - `groups`: RwLock over the table (opening a group takes the write lock)
/// - each `PropertyIndex`: its own RwLock (lookups share, mutations exclude)
/// - All methods use `&self`
pub struct IndexManager {
    options: IndexFileOptions,
    groups: RwLock<HashMap<String, GroupIndexes>>,
}

impl IndexManager {
    pub fn new(options: IndexFileOptions) -> Self {
        Self {
            options,
            groups: RwLock::new(HashMap::new()),
        }
    }

    /// Open every index declared by `schema` from `dir`
    ///
    /// Missing index files are created empty and their property names
    /// returned. Opening an already open group is a no-op.
    pub fn open_group(&self, schema: &GroupSchema, dir: &Path) -> Result<Vec<&'static str>> {
        self.open_group_with(schema, dir, |_| Ok(Vec::new()))
    }

    /// Open a group, filling newly created index files before the group
    /// becomes visible to other callers
    ///
    /// `backfill` receives the created property names and returns the
    /// entries for any of them that should not start empty.
    pub fn open_group_with<F>(
        &self,
        schema: &GroupSchema,
        dir: &Path,
        backfill: F,
    ) -> Result<Vec<&'static str>>
    where
        F: FnOnce(&[&'static str]) -> Result<Vec<(&'static str, Vec<IndexEntry>)>>,
    {
        if self.is_open(schema.group) {
            return Ok(Vec::new());
        }

        let mut groups = self.groups.write();
        if groups.contains_key(schema.group) {
            return Ok(Vec::new());
        }

        std::fs::create_dir_all(dir)?;

        let mut indexes = GroupIndexes::new();
        let mut created = Vec::new();
        for (property, value_type) in schema.indexed_fields() {
            let path = dir.join(property);
            if !path.exists() {
                created.push(property);
            }

            let index = PropertyIndex::open(property, &path, value_type, self.options)?;
            indexes.insert(property.to_string(), Arc::new(RwLock::new(index)));
        }

        if !created.is_empty() {
            for (property, entries) in backfill(&created)? {
                if let Some(handle) = indexes.get(property) {
                    handle.write().rebuild(entries)?;
                }
            }
        }

        tracing::debug!(
            group = schema.group,
            indexes = indexes.len(),
            created = created.len(),
            "opened group indexes"
        );
        groups.insert(schema.group.to_string(), indexes);

        Ok(created)
    }

    /// Close a group's indexes and delete their files, then reopen them empty
    ///
    /// Used by index rebuilds; works even when a file is too corrupt to open.
    pub fn reset_group(&self, schema: &GroupSchema, dir: &Path) -> Result<()> {
        {
            let mut groups = self.groups.write();
            if let Some(indexes) = groups.remove(schema.group) {
                for handle in indexes.values() {
                    handle.write().sync()?;
                }
            }
        }

        for (property, _) in schema.indexed_fields() {
            match std::fs::remove_file(dir.join(property)) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }

        self.open_group(schema, dir)?;
        Ok(())
    }

    pub fn is_open(&self, group: &str) -> bool {
        self.groups.read().contains_key(group)
    }

    /// Handle to one property index
    ///
    /// Errors with `SchemaMismatch` if the group is open but has no index
    /// for `property`, and `Storage` if the group is not open.
    pub fn index(&self, group: &str, property: &str) -> Result<IndexHandle> {
        let groups = self.groups.read();
        let indexes = groups.get(group).ok_or_else(|| {
            UnbloatError::Storage(format!("indexes of group {:?} are not open", group))
        })?;

        indexes.get(property).cloned().ok_or_else(|| {
            UnbloatError::SchemaMismatch(format!(
                "{}.{} is not an indexed property",
                group, property
            ))
        })
    }

    /// Every index handle of a group, ordered by property name
    pub fn group_indexes(&self, group: &str) -> Vec<(String, IndexHandle)> {
        self.groups
            .read()
            .get(group)
            .map(|indexes| {
                indexes
                    .iter()
                    .map(|(name, handle)| (name.clone(), Arc::clone(handle)))
                    .collect()
            })
            .unwrap_or_default()
    }

    // =========================================================================
    // Mutations
    // =========================================================================

    /// Insert `key` into one property index, returning its position
    pub fn insert(&self, group: &str, property: &str, value: IndexValue, key: &str) -> Result<usize> {
        let handle = self.index(group, property)?;
        let mut index = handle.write();
        index.insert(value, key)
    }

    /// Remove `key` from one property index
    pub fn remove(&self, group: &str, property: &str, key: &str) -> Result<bool> {
        let handle = self.index(group, property)?;
        let mut index = handle.write();
        index.remove(key)
    }

    /// Remove `key` from every index of a group, returning how many entries
    /// were removed
    pub fn remove_key(&self, group: &str, key: &str) -> Result<usize> {
        let mut removed = 0;
        for (_, handle) in self.group_indexes(group) {
            if handle.write().remove(key)? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Replace the contents of one property index
    pub fn rebuild(&self, group: &str, property: &str, entries: Vec<IndexEntry>) -> Result<()> {
        let handle = self.index(group, property)?;
        let mut index = handle.write();
        index.rebuild(entries)
    }

    // =========================================================================
    // Lookups
    // =========================================================================

    /// Keys whose `property` equals `value`
    pub fn find(&self, group: &str, property: &str, value: &IndexValue) -> Result<Vec<String>> {
        self.index(group, property)?.read().find(value)
    }

    /// Keys whose `property` is greater than `value`, ascending
    pub fn above(&self, group: &str, property: &str, value: &IndexValue) -> Result<Vec<String>> {
        self.index(group, property)?.read().above(value)
    }

    /// Keys whose `property` is less than `value`, descending
    pub fn below(&self, group: &str, property: &str, value: &IndexValue) -> Result<Vec<String>> {
        self.index(group, property)?.read().below(value)
    }

    /// Keys whose `property` lies in `low..=high`, ascending
    pub fn between(
        &self,
        group: &str,
        property: &str,
        low: &IndexValue,
        high: &IndexValue,
    ) -> Result<Vec<String>> {
        self.index(group, property)?.read().between(low, high)
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Flush and fsync every open index file
    pub fn sync_all(&self) -> Result<()> {
        let groups = self.groups.read();
        for indexes in groups.values() {
            for handle in indexes.values() {
                handle.write().sync()?;
            }
        }
        Ok(())
    }

    /// Sync and drop every handle
    pub fn close(&self) -> Result<()> {
        self.sync_all()?;

        let mut groups = self.groups.write();
        let count: usize = groups.values().map(|g| g.len()).sum();
        groups.clear();

        tracing::debug!(indexes = count, "closed index files");
        Ok(())
    }

    /// Number of open property indexes
    pub fn open_count(&self) -> usize {
        self.groups.read().values().map(|g| g.len()).sum()
    }
}
