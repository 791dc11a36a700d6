//! Index Module
//!
//! Per-property sorted indexes persisted as one binary file each.
//!
//! ## Responsibilities
//! - Encode typed scalars with a fixed ordering (`value`)
//! - Read and positionally mutate index files (`file`)
//! - Keep one sorted in-memory copy per file and search it (`property`)
//! - Own the table of open indexes for a database (`manager`)
//!
//! ## File Format
//! ```text
//! ┌────────────────────────────────────────┐
//! │ Header                                 │
//! │ ┌──────────────┬──────────┬─────────┐  │
//! │ │HeaderLen (4) │ Len0 (4) │ Len1 .. │  │
//! │ └──────────────┴──────────┴─────────┘  │
//! ├────────────────────────────────────────┤
//! │ Body                                   │
//! │ ┌──────────┬──────────┬──────────┐     │
//! │ │ Key (36) │ Value    │ Key ...  │     │
//! │ └──────────┴──────────┴──────────┘     │
//! └────────────────────────────────────────┘
//! ```

mod file;
mod manager;
mod property;
mod value;

pub use file::{
    decode_image, encode_image, IndexEntry, IndexFile, IndexFileOptions, KEY_LENGTH,
    LENGTH_FIELD_SIZE,
};
pub use manager::{IndexHandle, IndexManager};
pub use property::PropertyIndex;
pub use value::{Decimal, IndexValue, ValueType, TICKS_PER_SECOND};
