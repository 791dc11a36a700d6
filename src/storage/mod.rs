//! Storage Module
//!
//! Record blob persistence and the keyed lock table that serializes
//! read-modify-write cycles on individual records.
//!
//! ## Directory Layout
//! ```text
//! {data_dir}/
//!   ├── Artist/                        (one directory per group)
//!   │     ├── 1b4e28ba-2fa1-...-9c9b   (one serialized record per file)
//!   │     ├── 6ecd8c99-4036-...-7bd4
//!   │     └── index/
//!   │           ├── age                (one index file per property)
//!   │           └── location
//!   └── Song/
//!         └── ...
//! ```

mod blob;
mod lock;

pub use blob::{is_master_key, new_master_key, BlobStore};
pub use lock::{KeyLockGuard, KeyLocks};
