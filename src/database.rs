//! Database Module
//!
//! The record store that coordinates all components.
//!
//! ## Responsibilities
//! - Map (group, master key) to a serialized record blob
//! - Keep every property index in step with record mutations
//! - Hand reference changes to the reference tracker
//! - Point, equality, range and full-scan lookups

use std::fs;
use std::marker::PhantomData;
use std::path::Path;
use std::sync::Arc;
use std::vec;

use crate::config::{Config, DanglingReferencePolicy, SyncStrategy};
use crate::error::{Result, UnbloatError};
use crate::index::{IndexEntry, IndexFileOptions, IndexHandle, IndexManager, IndexValue};
use crate::record::{BackReference, Record};
use crate::references::{diff_references, outbound_references, BackReferenceUpdate, ReferenceTracker};
use crate::schema::{Document, FieldKind, GroupSchema};
use crate::storage::{new_master_key, BlobStore, KeyLocks};

/// Walk direction for range lookups
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeDirection {
    /// Values greater than the bound, ascending
    Ascending,
    /// Values less than the bound, descending
    Descending,
}

/// An embedded record database
///
/// ## Concurrency Model
///
/// - **Records**: each read-modify-write of a record blob and its index
///   entries holds that record's lock from `locks`.
/// - **Indexes**: each property index has its own RwLock, held for the
///   locate → mutate file → update memory cycle.
/// - **Writers**: create/update/delete hold the source's writer lock from
///   the first read until its back-reference updates are applied, so two
///   mutations of one source reach its targets in order.
/// - **References**: each back-reference update takes its target's record
///   lock only while the source's record lock is not held, so record locks
///   never nest. Writer locks are never taken while any record lock is held.
///
/// A mutation that fails partway (one index updated, a later one failing)
/// can leave a record and its indexes out of step; `rebuild_indexes`
/// restores them.
pub struct Database {
    /// Database configuration
    config: Config,

    /// Record blob files
    blobs: Arc<BlobStore>,

    /// Per-record lock table
    locks: Arc<KeyLocks>,

    /// Per-source writer locks, held for a whole mutation
    writers: KeyLocks,

    /// Open property indexes
    indexes: IndexManager,

    /// Back-reference maintenance
    tracker: ReferenceTracker,
}

impl Database {
    /// Open or create a database with the given config
    pub fn open(config: Config) -> Result<Self> {
        config.validate()?;
        fs::create_dir_all(&config.data_dir)?;

        let sync_writes = config.sync_strategy == SyncStrategy::EveryWrite;
        let blobs = Arc::new(BlobStore::new(
            &config.data_dir,
            config.index_dir.clone(),
            sync_writes,
        ));
        let locks = Arc::new(KeyLocks::new());
        let indexes = IndexManager::new(IndexFileOptions {
            write_mode: config.index_write_mode,
            sync_writes,
        });
        let tracker = ReferenceTracker::new(
            Arc::clone(&blobs),
            Arc::clone(&locks),
            config.format,
            config.dangling_references,
        );

        tracing::info!(
            data_dir = %config.data_dir.display(),
            format = config.format.name(),
            "opened database"
        );

        Ok(Self {
            config,
            blobs,
            locks,
            writers: KeyLocks::new(),
            indexes,
            tracker,
        })
    }

    /// Open with a path (convenience method)
    ///
    /// Uses default config with the specified data directory
    pub fn open_path(path: &Path) -> Result<Self> {
        let mut config = Config::default();
        config.data_dir = path.to_path_buf();
        Self::open(config)
    }

    /// Create the group directory and index files for `T` ahead of use
    pub fn register<T: Document>(&self) -> Result<()> {
        self.group_schema::<T>(true)?;
        Ok(())
    }

    // =========================================================================
    // Create / Read / Update / Delete
    // =========================================================================

    /// Store a new record and return its master key
    ///
    /// Steps:
    /// 1. Validate index values
    /// 2. Add a back-reference to every referenced record (under `Fail`, a
    ///    missing target stops here with nothing written)
    /// 3. Write the record blob
    /// 4. Insert into every property index
    pub fn create<T: Document>(&self, data: T) -> Result<String> {
        let schema = self.require_schema::<T>()?;
        let group = schema.group;

        let values = index_values(&schema, &data)?;
        let references = outbound_references(&schema, &data)?;

        let key = new_master_key();
        let _writer = self.writers.lock(group, &key);

        let additions = diff_references(group, &key, &[], &references);
        self.tracker.attach(&additions)?;

        let persisted = {
            let _guard = self.locks.lock(group, &key);
            self.persist_new(group, &key, data, values)
        };
        if let Err(e) = persisted {
            self.abandon(&additions);
            return Err(e);
        }

        tracing::debug!(group, key = %key, references = additions.len(), "created record");
        Ok(key)
    }

    /// Get a record by master key
    ///
    /// Returns `Ok(None)` if the record does not exist.
    pub fn get<T: Document>(&self, key: &str) -> Result<Option<Record<T>>> {
        match self.blobs.read(T::GROUP, key)? {
            Some(bytes) => Ok(Some(self.config.format.decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Replace the data of an existing record
    ///
    /// The stored `referencers` are kept; the caller's copy is ignored.
    /// Returns false if the record does not exist.
    pub fn update<T: Document>(&self, record: &Record<T>) -> Result<bool> {
        let Some(schema) = self.group_schema::<T>(false)? else {
            return Ok(false);
        };
        let group = schema.group;
        let key = record.master_key.as_str();

        let values = index_values(&schema, &record.data)?;
        let references = outbound_references(&schema, &record.data)?;

        let _writer = self.writers.lock(group, key);

        // Data only changes under the writer lock, so the references read
        // here stay current until it is released
        let previous = {
            let _guard = self.locks.lock(group, key);
            let Some(bytes) = self.blobs.read(group, key)? else {
                return Ok(false);
            };
            let stored: Record<T> = self.config.format.decode(&bytes)?;
            outbound_references(&schema, &stored.data)?
        };

        let (additions, removals): (Vec<_>, Vec<_>) =
            diff_references(group, key, &previous, &references)
                .into_iter()
                .partition(BackReferenceUpdate::is_add);
        self.tracker.attach(&additions)?;

        let persisted = {
            let _guard = self.locks.lock(group, key);
            self.persist_update::<T>(group, key, &record.data, values)
        };
        match persisted {
            Ok(true) => {}
            Ok(false) => {
                self.abandon(&additions);
                return Ok(false);
            }
            Err(e) => {
                self.abandon(&additions);
                return Err(e);
            }
        }

        self.tracker.apply_all(&removals)?;

        tracing::debug!(
            group,
            key,
            references = additions.len() + removals.len(),
            "updated record"
        );
        Ok(true)
    }

    /// Delete a record and every index entry and back-reference it owns
    ///
    /// Under the `Fail` policy a record still referenced by another record
    /// is not deleted. Returns false if the record does not exist.
    pub fn delete<T: Document>(&self, key: &str) -> Result<bool> {
        let Some(schema) = self.group_schema::<T>(false)? else {
            return Ok(false);
        };
        let group = schema.group;

        let _writer = self.writers.lock(group, key);

        let removals = {
            let _guard = self.locks.lock(group, key);

            let Some(bytes) = self.blobs.read(group, key)? else {
                return Ok(false);
            };
            let stored: Record<T> = self.config.format.decode(&bytes)?;

            let external = stored
                .referencers
                .iter()
                .filter(|r| !(r.referencing_group == group && r.referencing_key == key))
                .count();
            if external > 0 {
                match self.tracker.policy() {
                    DanglingReferencePolicy::Fail => {
                        return Err(UnbloatError::StillReferenced {
                            group: group.to_string(),
                            key: key.to_string(),
                            count: external,
                        });
                    }
                    DanglingReferencePolicy::Skip => {
                        tracing::warn!(
                            group,
                            key,
                            referencers = external,
                            "deleting a record that is still referenced"
                        );
                    }
                }
            }

            let previous = outbound_references(&schema, &stored.data)?;

            self.blobs.remove(group, key)?;
            self.indexes.remove_key(group, key)?;

            diff_references(group, key, &previous, &[])
        };

        self.tracker.apply_all(&removals)?;

        tracing::debug!(group, key, "deleted record");
        Ok(true)
    }

    // =========================================================================
    // Lookups
    // =========================================================================

    /// Records whose indexed `property` equals `value`
    ///
    /// The index is searched once; records are fetched lazily as the
    /// iterator advances. Calling again re-runs the search.
    pub fn find_by_property<T: Document>(
        &self,
        property: &str,
        value: impl Into<IndexValue>,
    ) -> Result<RecordIter<'_, T>> {
        let value = value.into();
        let Some(schema) = self.queryable_schema::<T>(property)? else {
            return Ok(RecordIter::new(self, Vec::new()));
        };

        let keys = self.indexes.find(schema.group, property, &value)?;
        Ok(RecordIter::new(self, keys))
    }

    /// Records whose indexed `property` is strictly beyond `value`
    ///
    /// `Ascending` yields values greater than `value` in index order;
    /// `Descending` yields values less than `value` in reverse index order.
    pub fn find_range<T: Document>(
        &self,
        property: &str,
        value: impl Into<IndexValue>,
        direction: RangeDirection,
    ) -> Result<RecordIter<'_, T>> {
        let value = value.into();
        let Some(schema) = self.queryable_schema::<T>(property)? else {
            return Ok(RecordIter::new(self, Vec::new()));
        };

        let keys = match direction {
            RangeDirection::Ascending => self.indexes.above(schema.group, property, &value)?,
            RangeDirection::Descending => self.indexes.below(schema.group, property, &value)?,
        };
        Ok(RecordIter::new(self, keys))
    }

    /// Records whose indexed `property` lies in `low..=high`, ascending
    pub fn find_between<T: Document>(
        &self,
        property: &str,
        low: impl Into<IndexValue>,
        high: impl Into<IndexValue>,
    ) -> Result<RecordIter<'_, T>> {
        let (low, high) = (low.into(), high.into());
        let Some(schema) = self.queryable_schema::<T>(property)? else {
            return Ok(RecordIter::new(self, Vec::new()));
        };

        let keys = self.indexes.between(schema.group, property, &low, &high)?;
        Ok(RecordIter::new(self, keys))
    }

    /// Every record of a group, without using an index
    ///
    /// The fallback when no index applies to a query. Records are returned
    /// in master key order.
    pub fn scan_all<T: Document>(&self) -> Result<RecordIter<'_, T>> {
        let keys = self.blobs.keys(T::GROUP)?;
        Ok(RecordIter::new(self, keys))
    }

    /// Number of records in a group
    pub fn count<T: Document>(&self) -> Result<usize> {
        Ok(self.blobs.keys(T::GROUP)?.len())
    }

    // =========================================================================
    // References
    // =========================================================================

    /// Back-references stored on any record, without knowing its type
    ///
    /// Returns `Ok(None)` if the record does not exist.
    pub fn referencers_of(&self, group: &str, key: &str) -> Result<Option<Vec<BackReference>>> {
        match self.blobs.read(group, key)? {
            Some(bytes) => Ok(Some(self.config.format.decode_header(&bytes)?.referencers)),
            None => Ok(None),
        }
    }

    /// Records of type `S` that reference `target`
    pub fn referencing<S: Document, T>(&self, target: &Record<T>) -> Result<Vec<Record<S>>> {
        let mut records = Vec::new();
        for back_reference in target.referencers_from(S::GROUP) {
            if let Some(record) = self.get::<S>(&back_reference.referencing_key)? {
                records.push(record);
            }
        }
        Ok(records)
    }

    /// Follow a reference field of `source` to its target record
    ///
    /// Returns `Ok(None)` if the field is unset or the target is missing.
    pub fn resolve<S: Document, U: Document>(
        &self,
        source: &Record<S>,
        property: &str,
    ) -> Result<Option<Record<U>>> {
        let schema = GroupSchema::of::<S>()?;
        let target_group = schema
            .field(property)
            .and_then(|f| f.reference_target())
            .ok_or_else(|| {
                UnbloatError::SchemaMismatch(format!(
                    "{}.{} is not a reference field",
                    S::GROUP,
                    property
                ))
            })?;

        if target_group != U::GROUP {
            return Err(UnbloatError::SchemaMismatch(format!(
                "{}.{} references {}, not {}",
                S::GROUP,
                property,
                target_group,
                U::GROUP
            )));
        }

        match source.data.field_value(property) {
            Some(IndexValue::String(key)) if !key.is_empty() => self.get::<U>(&key),
            _ => Ok(None),
        }
    }

    // =========================================================================
    // Maintenance
    // =========================================================================

    /// Rebuild every index of a group from its records
    ///
    /// The manual recovery path after an interrupted mutation or a damaged
    /// index file. Not safe to run alongside writes to the same group.
    /// Returns the number of records indexed.
    pub fn rebuild_indexes<T: Document>(&self) -> Result<usize> {
        let schema = GroupSchema::of::<T>()?;
        if !self.blobs.group_exists(schema.group) {
            return Ok(0);
        }

        self.indexes
            .reset_group(&schema, &self.blobs.index_dir(schema.group))?;

        let properties: Vec<&'static str> = schema.indexed_fields().map(|(name, _)| name).collect();
        let (count, entries) = self.collect_entries::<T>(&schema, &properties)?;
        for (property, entries) in entries {
            self.indexes.rebuild(schema.group, property, entries)?;
        }

        tracing::warn!(group = schema.group, records = count, "rebuilt group indexes");
        Ok(count)
    }

    /// Flush and fsync every open index file
    pub fn sync(&self) -> Result<()> {
        self.indexes.sync_all()
    }

    /// Close the database gracefully
    ///
    /// Syncs and closes every index file handle.
    pub fn close(self) -> Result<()> {
        self.indexes.close()?;
        tracing::info!(data_dir = %self.config.data_dir.display(), "closed database");
        Ok(())
    }

    // =========================================================================
    // Accessors (for testing and debugging)
    // =========================================================================

    /// Get the data directory path
    pub fn data_dir(&self) -> &Path {
        &self.config.data_dir
    }

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Handle to an open property index
    pub fn index(&self, group: &str, property: &str) -> Result<IndexHandle> {
        self.indexes.index(group, property)
    }

    /// Number of open property indexes
    pub fn open_index_count(&self) -> usize {
        self.indexes.open_count()
    }

    /// Number of record and writer locks currently held or awaited
    pub fn held_lock_count(&self) -> usize {
        self.locks.len() + self.writers.len()
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    /// Validated schema of `T`, opening its indexes on first use
    ///
    /// With `create` false, returns `Ok(None)` for a group that does not
    /// exist yet instead of creating it. Index files missing from a group
    /// that already holds records are backfilled from a scan.
    fn group_schema<T: Document>(&self, create: bool) -> Result<Option<GroupSchema>> {
        let schema = GroupSchema::of::<T>()?;
        if self.indexes.is_open(schema.group) {
            return Ok(Some(schema));
        }

        if !create && !self.blobs.group_exists(schema.group) {
            return Ok(None);
        }

        let existed = !self.blobs.ensure_group(schema.group)?;
        if !existed {
            tracing::info!(group = schema.group, "created group");
        }

        let dir = self.blobs.index_dir(schema.group);
        self.indexes.open_group_with(&schema, &dir, |created| {
            if !existed {
                return Ok(Vec::new());
            }

            let (count, entries) = self.collect_entries::<T>(&schema, created)?;
            if count > 0 {
                tracing::warn!(
                    group = schema.group,
                    properties = ?created,
                    records = count,
                    "backfilling new indexes"
                );
            }
            Ok(entries)
        })?;

        Ok(Some(schema))
    }

    fn require_schema<T: Document>(&self) -> Result<GroupSchema> {
        self.group_schema::<T>(true)?.ok_or_else(|| {
            UnbloatError::Storage(format!("group {:?} could not be opened", T::GROUP))
        })
    }

    /// Schema for a lookup on `property`, or `None` if the group is empty
    fn queryable_schema<T: Document>(&self, property: &str) -> Result<Option<GroupSchema>> {
        let schema = GroupSchema::of::<T>()?;
        let Some(field) = schema.field(property) else {
            return Err(UnbloatError::SchemaMismatch(format!(
                "{} has no property {:?}",
                schema.group, property
            )));
        };
        if field.index_type().is_none() {
            return Err(UnbloatError::SchemaMismatch(format!(
                "{}.{} is not indexed",
                schema.group, property
            )));
        }

        self.group_schema::<T>(false)
    }

    /// Write a new record blob and its index entries; the record lock is held
    fn persist_new<T: Document>(
        &self,
        group: &'static str,
        key: &str,
        data: T,
        values: Vec<(&'static str, IndexValue)>,
    ) -> Result<()> {
        let record = Record::new(key.to_string(), data);
        let bytes = self.config.format.encode(&record)?;
        self.blobs.write(group, key, &bytes)?;

        for (property, value) in values {
            self.indexes.insert(group, property, value, key)?;
        }
        Ok(())
    }

    /// Rewrite a stored record with new data; the record lock is held
    ///
    /// The referencers are re-read here since back-references may have been
    /// attached since the record was last read.
    fn persist_update<T: Document>(
        &self,
        group: &'static str,
        key: &str,
        data: &T,
        values: Vec<(&'static str, IndexValue)>,
    ) -> Result<bool> {
        let Some(bytes) = self.blobs.read(group, key)? else {
            return Ok(false);
        };
        let header = self.config.format.decode_header(&bytes)?;

        // Entries are located by key; the old values are not needed
        self.indexes.remove_key(group, key)?;

        let replacement = Record {
            master_key: key.to_string(),
            referencers: header.referencers,
            data,
        };
        let bytes = self.config.format.encode(&replacement)?;
        self.blobs.write(group, key, &bytes)?;

        for (property, value) in values {
            self.indexes.insert(group, property, value, key)?;
        }
        Ok(true)
    }

    /// Roll back back-references attached for a write that did not happen
    fn abandon(&self, additions: &[BackReferenceUpdate]) {
        let applied: Vec<&BackReferenceUpdate> = additions.iter().collect();
        self.tracker.detach(&applied);
    }

    /// Index entries for the given properties from a full scan of the group
    ///
    /// Returns the number of records scanned alongside the entries.
    fn collect_entries<T: Document>(
        &self,
        schema: &GroupSchema,
        properties: &[&'static str],
    ) -> Result<(usize, Vec<(&'static str, Vec<IndexEntry>)>)> {
        let mut entries: Vec<(&'static str, Vec<IndexEntry>)> =
            properties.iter().map(|p| (*p, Vec::new())).collect();
        let mut count = 0;

        for key in self.blobs.keys(schema.group)? {
            let Some(record) = self.get::<T>(&key)? else {
                continue;
            };

            for (property, value) in index_values(schema, &record.data)? {
                if let Some((_, slot)) = entries.iter_mut().find(|(p, _)| *p == property) {
                    slot.push(IndexEntry {
                        value,
                        key: record.master_key.clone(),
                    });
                }
            }
            count += 1;
        }

        Ok((count, entries))
    }
}

/// Index values of every indexed field of `data`
///
/// Unset reference fields index as an empty key; any other missing value or
/// a value of the wrong type is a schema mismatch.
fn index_values<T: Document>(
    schema: &GroupSchema,
    data: &T,
) -> Result<Vec<(&'static str, IndexValue)>> {
    let mut values = Vec::new();

    for field in &schema.fields {
        let Some(value_type) = field.index_type() else {
            continue;
        };

        let value = match (data.field_value(field.name), &field.kind) {
            (Some(value), _) => value,
            (None, FieldKind::Reference { .. }) => IndexValue::String(String::new()),
            (None, _) => {
                return Err(UnbloatError::SchemaMismatch(format!(
                    "indexed property {}.{} has no value",
                    schema.group, field.name
                )))
            }
        };

        if value.value_type() != value_type {
            return Err(UnbloatError::SchemaMismatch(format!(
                "{}.{} is indexed as {}, got a {} value",
                schema.group,
                field.name,
                value_type,
                value.value_type()
            )));
        }

        values.push((field.name, value));
    }

    Ok(values)
}

// =============================================================================
// Record Iterator
// =============================================================================

/// Lazily fetches records for a list of master keys
///
/// Records deleted after the key list was taken are skipped.
pub struct RecordIter<'db, T> {
    db: &'db Database,
    keys: vec::IntoIter<String>,
    _marker: PhantomData<fn() -> T>,
}

impl<'db, T: Document> RecordIter<'db, T> {
    fn new(db: &'db Database, keys: Vec<String>) -> Self {
        Self {
            db,
            keys: keys.into_iter(),
            _marker: PhantomData,
        }
    }

    /// Keys not yet fetched
    pub fn remaining_keys(&self) -> &[String] {
        self.keys.as_slice()
    }
}

impl<T: Document> Iterator for RecordIter<'_, T> {
    type Item = Result<Record<T>>;

    fn next(&mut self) -> Option<Self::Item> {
        for key in self.keys.by_ref() {
            match self.db.get::<T>(&key) {
                Ok(Some(record)) => return Some(Ok(record)),
                Ok(None) => continue,
                Err(e) => return Some(Err(e)),
            }
        }
        None
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.keys.len()))
    }
}
