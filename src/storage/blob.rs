//! Record Blob Store
//!
//! One file per record at `{data_dir}/{group}/{master_key}`. Every read and
//! write opens a short-lived handle that is closed before returning.

use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use uuid::Uuid;

use crate::error::Result;
use crate::index::KEY_LENGTH;

/// Suffix of in-flight blob writes; such files are never records
const TEMP_SUFFIX: &str = ".tmp";

/// Filesystem layout and blob I/O for record files
pub struct BlobStore {
    /// Root directory holding one subdirectory per group
    root: PathBuf,

    /// Name of the index subdirectory inside each group
    index_dir: String,

    /// fsync blobs after writing
    sync_writes: bool,
}

/// Whether `key` has the shape of a master key (hyphenated UUID)
pub fn is_master_key(key: &str) -> bool {
    key.len() == KEY_LENGTH && Uuid::parse_str(key).is_ok()
}

/// Generate a fresh master key
pub fn new_master_key() -> String {
    Uuid::new_v4().hyphenated().to_string()
}

impl BlobStore {
    pub fn new(root: impl Into<PathBuf>, index_dir: impl Into<String>, sync_writes: bool) -> Self {
        Self {
            root: root.into(),
            index_dir: index_dir.into(),
            sync_writes,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn group_dir(&self, group: &str) -> PathBuf {
        self.root.join(group)
    }

    pub fn index_dir(&self, group: &str) -> PathBuf {
        self.group_dir(group).join(&self.index_dir)
    }

    pub fn record_path(&self, group: &str, key: &str) -> PathBuf {
        self.group_dir(group).join(key)
    }

    pub fn group_exists(&self, group: &str) -> bool {
        self.group_dir(group).is_dir()
    }

    /// Create the group and index directories
    ///
    /// Returns true if the group did not exist before.
    pub fn ensure_group(&self, group: &str) -> Result<bool> {
        let created = !self.group_exists(group);
        fs::create_dir_all(self.index_dir(group))?;
        Ok(created)
    }

    /// Write a record blob, replacing any previous version
    ///
    /// The bytes go to a temporary sibling first and are renamed into place,
    /// so readers never see a half-written record.
    pub fn write(&self, group: &str, key: &str, bytes: &[u8]) -> Result<()> {
        let path = self.record_path(group, key);
        let temp = self.group_dir(group).join(format!("{}{}", key, TEMP_SUFFIX));

        {
            let mut file = File::create(&temp)?;
            file.write_all(bytes)?;
            if self.sync_writes {
                file.sync_all()?;
            }
        }
        fs::rename(&temp, &path)?;

        Ok(())
    }

    /// Read a record blob
    ///
    /// Returns `Ok(None)` when the record does not exist.
    pub fn read(&self, group: &str, key: &str) -> Result<Option<Vec<u8>>> {
        if !is_master_key(key) {
            return Ok(None);
        }

        match fs::read(self.record_path(group, key)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Remove a record blob
    ///
    /// Returns false if it did not exist.
    pub fn remove(&self, group: &str, key: &str) -> Result<bool> {
        if !is_master_key(key) {
            return Ok(false);
        }

        match fs::remove_file(self.record_path(group, key)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    pub fn exists(&self, group: &str, key: &str) -> bool {
        is_master_key(key) && self.record_path(group, key).is_file()
    }

    /// Master keys of every record in a group, sorted
    pub fn keys(&self, group: &str) -> Result<Vec<String>> {
        let dir = self.group_dir(group);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut keys = Vec::new();
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }

            // Skip in-flight writes and anything else that is not a record
            let name = entry.file_name();
            match name.to_str() {
                Some(name) if is_master_key(name) => keys.push(name.to_string()),
                _ => continue,
            }
        }

        keys.sort();
        Ok(keys)
    }
}
