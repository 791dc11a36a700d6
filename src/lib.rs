//! # UnbloatDB
//!
//! An embedded, file-backed record store with:
//! - One serialized file per record, grouped by record type
//! - Sorted binary index files per indexed property
//! - Equality, range and full-scan lookups
//! - Automatic back-reference tracking between records
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Database                              │
//! │        (create / get / update / delete / find_*)             │
//! └──────────┬──────────────────┬──────────────────┬────────────┘
//!            │                  │                  │
//!            ▼                  ▼                  ▼
//!   ┌─────────────┐    ┌──────────────┐   ┌────────────────┐
//!   │  BlobStore  │    │ IndexManager │   │   Reference    │
//!   │ (one file / │    │ (one sorted  │   │    Tracker     │
//!   │   record)   │    │ file / prop) │   │ (back-refs on  │
//!   └─────────────┘    └──────────────┘   │   targets)     │
//!                                         └────────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod format;
pub mod index;
pub mod record;
pub mod references;
pub mod schema;
pub mod storage;
pub mod database;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{Result, UnbloatError};
pub use config::{Config, ConfigBuilder, DanglingReferencePolicy, IndexWriteMode, SyncStrategy};
pub use database::{Database, RangeDirection, RecordIter};
pub use format::RecordFormat;
pub use index::{Decimal, IndexValue, ValueType};
pub use record::{BackReference, Record, RecordHeader, ReferenceKind};
pub use schema::{Document, FieldKind, FieldSpec, GroupSchema};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of UnbloatDB
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
