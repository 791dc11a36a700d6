//! Configuration for UnbloatDB
//!
//! Centralized configuration with sensible defaults.

use std::path::PathBuf;

use crate::error::{Result, UnbloatError};
use crate::format::RecordFormat;

/// Main configuration for a database instance
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Storage Configuration
    // -------------------------------------------------------------------------
    /// Root directory for all data files
    /// Internal structure:
    ///   {data_dir}/
    ///     └── {group}/
    ///           ├── {master_key}      (one serialized record)
    ///           └── {index_dir}/
    ///                 └── {property}  (one binary index file)
    pub data_dir: PathBuf,

    /// Name of the per-group index subdirectory
    pub index_dir: String,

    /// Serialization format for record blobs
    pub format: RecordFormat,

    /// When to fsync record blobs and index files
    pub sync_strategy: SyncStrategy,

    // -------------------------------------------------------------------------
    // Index Configuration
    // -------------------------------------------------------------------------
    /// How index files are physically mutated
    pub index_write_mode: IndexWriteMode,

    // -------------------------------------------------------------------------
    // Reference Configuration
    // -------------------------------------------------------------------------
    /// What happens when a reference points at a record that does not exist
    pub dangling_references: DanglingReferencePolicy,
}

/// Sync strategy: how often to fsync data files
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStrategy {
    /// fsync after every mutation (safest, slowest)
    EveryWrite,

    /// Leave flushing to the OS until `Database::close`
    OnClose,
}

/// Physical mutation strategy for index files
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexWriteMode {
    /// Shift bytes inside the open file. A crash mid-mutation can leave the
    /// header and body disagreeing; `rebuild_indexes` recovers.
    InPlace,

    /// Write the whole new image to a sibling file and rename it over the
    /// index. A crash leaves either the old or the new image.
    ShadowSwap,
}

/// Policy for references whose target record is missing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DanglingReferencePolicy {
    /// Refuse to create a reference to a missing record, and refuse to delete
    /// a record other live records still reference.
    Fail,

    /// Log and carry on; references may be left dangling.
    Skip,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./unbloatdb_data"),
            index_dir: "index".to_string(),
            format: RecordFormat::Json,
            sync_strategy: SyncStrategy::OnClose,
            index_write_mode: IndexWriteMode::InPlace,
            dangling_references: DanglingReferencePolicy::Fail,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Check the settings that would otherwise break the on-disk layout
    pub fn validate(&self) -> Result<()> {
        if self.index_dir.is_empty() {
            return Err(UnbloatError::Config(
                "index directory name must not be empty".to_string(),
            ));
        }

        if self.index_dir.contains(['/', '\\']) || self.index_dir == "." || self.index_dir == ".." {
            return Err(UnbloatError::Config(format!(
                "index directory name must be a single path component, got {:?}",
                self.index_dir
            )));
        }

        Ok(())
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the data directory (root for all storage)
    pub fn data_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.data_dir = path.into();
        self
    }

    /// Set the per-group index subdirectory name
    pub fn index_dir(mut self, name: impl Into<String>) -> Self {
        self.config.index_dir = name.into();
        self
    }

    /// Set the record serialization format
    pub fn format(mut self, format: RecordFormat) -> Self {
        self.config.format = format;
        self
    }

    /// Set the sync strategy
    pub fn sync_strategy(mut self, strategy: SyncStrategy) -> Self {
        self.config.sync_strategy = strategy;
        self
    }

    /// Set the index write mode
    pub fn index_write_mode(mut self, mode: IndexWriteMode) -> Self {
        self.config.index_write_mode = mode;
        self
    }

    /// Set the dangling reference policy
    pub fn dangling_references(mut self, policy: DanglingReferencePolicy) -> Self {
        self.config.dangling_references = policy;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
