//! Index File
//!
//! Reads and mutates one binary index file: a sorted sequence of
//! (value, master key) entries for a single (group, property).
//!
//! ## File Format
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │ Header (4 + 4n bytes)                                   │
//! │   HeaderLen: u32 (total header bytes, incl. itself)     │
//! │   EntryLen: u32 ... one per entry, storage order        │
//! ├─────────────────────────────────────────────────────────┤
//! │ Body (variable)                                         │
//! │   [Key: 36 bytes][Value: EntryLen - 36 bytes]           │
//! │   ... repeated for each entry, same order ...           │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! Inserting or removing entry `i` shifts the body bytes after it, shifts
//! the header lengths after slot `i`, and rewrites `HeaderLen`. The byte
//! offset of entry `i` is the sum of the lengths before it, which is kept
//! in memory as a mirror of the header.

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use bytes::{Buf, BufMut};

use crate::config::IndexWriteMode;
use crate::error::{Result, UnbloatError};

use super::value::{IndexValue, ValueType};

/// Length of a master key in bytes (hyphenated UUID)
pub const KEY_LENGTH: usize = 36;

/// Size of one header length field
pub const LENGTH_FIELD_SIZE: usize = 4;

/// Suffix of the sibling file used by shadow-swap writes
const SWAP_SUFFIX: &str = "swap";

// =============================================================================
// Entries
// =============================================================================

/// One (value, owner key) pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    pub value: IndexValue,
    pub key: String,
}

impl IndexEntry {
    pub fn new(value: impl Into<IndexValue>, key: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            key: key.into(),
        }
    }

    /// Encoded body length: key bytes plus value bytes
    pub fn encoded_len(&self) -> usize {
        KEY_LENGTH + self.value.encoded_len()
    }

    fn encode(&self, buf: &mut impl BufMut) {
        buf.put_slice(self.key.as_bytes());
        self.value.encode(buf);
    }
}

/// Options controlling how an index file is written
#[derive(Debug, Clone, Copy)]
pub struct IndexFileOptions {
    pub write_mode: IndexWriteMode,
    /// fsync after every mutation
    pub sync_writes: bool,
}

impl Default for IndexFileOptions {
    fn default() -> Self {
        Self {
            write_mode: IndexWriteMode::InPlace,
            sync_writes: false,
        }
    }
}

// =============================================================================
// Whole-image Encoding
// =============================================================================

/// Encode a complete index file image from entries in storage order
pub fn encode_image(entries: &[IndexEntry]) -> Vec<u8> {
    let header_len = LENGTH_FIELD_SIZE + entries.len() * LENGTH_FIELD_SIZE;
    let body_len: usize = entries.iter().map(IndexEntry::encoded_len).sum();

    let mut buf = Vec::with_capacity(header_len + body_len);
    buf.put_u32_le(header_len as u32);
    for entry in entries {
        buf.put_u32_le(entry.encoded_len() as u32);
    }
    for entry in entries {
        entry.encode(&mut buf);
    }
    buf
}

/// Decode a complete index file image
///
/// Returns the header lengths and the entries in storage order. Any
/// disagreement between header and body is reported as corruption of `path`.
pub fn decode_image(
    path: &Path,
    bytes: &[u8],
    value_type: ValueType,
) -> Result<(Vec<u32>, Vec<IndexEntry>)> {
    if bytes.len() < LENGTH_FIELD_SIZE {
        return Err(UnbloatError::corruption(
            path,
            format!("file is {} bytes, shorter than the header length field", bytes.len()),
        ));
    }

    let mut header = bytes;
    let header_len = header.get_u32_le() as usize;

    if header_len < LENGTH_FIELD_SIZE || header_len % LENGTH_FIELD_SIZE != 0 {
        return Err(UnbloatError::corruption(
            path,
            format!("header length {} is not a whole number of length fields", header_len),
        ));
    }
    if header_len > bytes.len() {
        return Err(UnbloatError::corruption(
            path,
            format!("header length {} exceeds file size {}", header_len, bytes.len()),
        ));
    }

    let count = (header_len - LENGTH_FIELD_SIZE) / LENGTH_FIELD_SIZE;
    let mut lengths = Vec::with_capacity(count);
    for _ in 0..count {
        lengths.push(header.get_u32_le());
    }

    let described: usize = lengths.iter().map(|&len| len as usize).sum();
    let actual = bytes.len() - header_len;
    if described != actual {
        return Err(UnbloatError::corruption(
            path,
            format!("header describes {} body bytes, body has {}", described, actual),
        ));
    }

    let mut entries = Vec::with_capacity(count);
    let mut offset = header_len;
    for (i, &len) in lengths.iter().enumerate() {
        let len = len as usize;
        if len < KEY_LENGTH {
            return Err(UnbloatError::corruption(
                path,
                format!("entry {} is {} bytes, shorter than a key", i, len),
            ));
        }

        let raw = &bytes[offset..offset + len];
        let key = std::str::from_utf8(&raw[..KEY_LENGTH]).map_err(|_| {
            UnbloatError::corruption(path, format!("entry {} key is not UTF-8", i))
        })?;
        let value = IndexValue::decode(value_type, &raw[KEY_LENGTH..]).map_err(|e| {
            UnbloatError::corruption(path, format!("entry {} value: {}", i, e))
        })?;

        entries.push(IndexEntry {
            value,
            key: key.to_string(),
        });
        offset += len;
    }

    Ok((lengths, entries))
}

// =============================================================================
// Splices
// =============================================================================

/// A positional change expressed in absolute file offsets
enum Splice {
    Insert {
        header_at: u64,
        body_at: u64,
        length: u32,
        bytes: Vec<u8>,
    },
    Remove {
        header_at: u64,
        body_at: u64,
        length: u32,
    },
}

impl Splice {
    fn header_at(&self) -> u64 {
        match self {
            Splice::Insert { header_at, .. } | Splice::Remove { header_at, .. } => *header_at,
        }
    }

    /// Apply to a buffer holding the file contents from `base` onward.
    ///
    /// The body change goes first: it sits after the header slot, so the
    /// header offset is still valid afterwards.
    fn apply(self, buf: &mut Vec<u8>, base: u64) {
        match self {
            Splice::Insert {
                header_at,
                body_at,
                length,
                bytes,
            } => {
                let body = (body_at - base) as usize;
                buf.splice(body..body, bytes);
                let header = (header_at - base) as usize;
                buf.splice(header..header, length.to_le_bytes());
            }
            Splice::Remove {
                header_at,
                body_at,
                length,
            } => {
                let body = (body_at - base) as usize;
                buf.drain(body..body + length as usize);
                let header = (header_at - base) as usize;
                buf.drain(header..header + LENGTH_FIELD_SIZE);
            }
        }
    }
}

// =============================================================================
// Index File
// =============================================================================

/// An open index file
///
/// Holds the file handle for the life of the owning index and a mirror of
/// the header lengths. Entries themselves live with the caller.
pub struct IndexFile {
    path: PathBuf,
    file: File,
    value_type: ValueType,
    lengths: Vec<u32>,
    options: IndexFileOptions,
}

impl IndexFile {
    /// Open or create an index file and decode every entry
    ///
    /// An empty or missing file is initialised with an empty header.
    pub fn open(
        path: &Path,
        value_type: ValueType,
        options: IndexFileOptions,
    ) -> Result<(Self, Vec<IndexEntry>)> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        if file.metadata()?.len() == 0 {
            file.write_all(&encode_image(&[]))?;
            file.flush()?;
        }

        let mut bytes = Vec::new();
        file.seek(SeekFrom::Start(0))?;
        file.read_to_end(&mut bytes)?;

        let (lengths, entries) = decode_image(path, &bytes, value_type)?;

        tracing::debug!(
            path = %path.display(),
            entries = entries.len(),
            "opened index file"
        );

        Ok((
            Self {
                path: path.to_path_buf(),
                file,
                value_type,
                lengths,
                options,
            },
            entries,
        ))
    }

    /// Insert an entry at logical position `position`
    pub fn insert(&mut self, position: usize, entry: &IndexEntry) -> Result<()> {
        if position > self.lengths.len() {
            return Err(UnbloatError::Storage(format!(
                "insert position {} beyond {} entries in {}",
                position,
                self.lengths.len(),
                self.path.display()
            )));
        }
        if entry.key.len() != KEY_LENGTH {
            return Err(UnbloatError::Storage(format!(
                "master key {:?} is {} bytes, expected {}",
                entry.key,
                entry.key.len(),
                KEY_LENGTH
            )));
        }
        if entry.value.value_type() != self.value_type {
            return Err(UnbloatError::SchemaMismatch(format!(
                "{} value inserted into {} index {}",
                entry.value.value_type(),
                self.value_type,
                self.path.display()
            )));
        }

        self.check_size()?;

        let mut bytes = Vec::with_capacity(entry.encoded_len());
        entry.encode(&mut bytes);
        let length = bytes.len() as u32;

        let splice = Splice::Insert {
            header_at: Self::header_slot(position),
            body_at: self.body_offset(position),
            length,
            bytes,
        };
        self.lengths.insert(position, length);
        if let Err(e) = self.apply(splice) {
            self.lengths.remove(position);
            return Err(e);
        }

        Ok(())
    }

    /// Remove the entry at logical position `position`
    pub fn remove(&mut self, position: usize) -> Result<()> {
        if position >= self.lengths.len() {
            return Err(UnbloatError::Storage(format!(
                "remove position {} beyond {} entries in {}",
                position,
                self.lengths.len(),
                self.path.display()
            )));
        }

        self.check_size()?;

        let splice = Splice::Remove {
            header_at: Self::header_slot(position),
            body_at: self.body_offset(position),
            length: self.lengths[position],
        };
        let length = self.lengths.remove(position);
        if let Err(e) = self.apply(splice) {
            self.lengths.insert(position, length);
            return Err(e);
        }

        Ok(())
    }

    /// Replace the whole file with `entries` (already in storage order)
    pub fn replace_all(&mut self, entries: &[IndexEntry]) -> Result<()> {
        let image = encode_image(entries);

        match self.options.write_mode {
            IndexWriteMode::InPlace => {
                self.file.set_len(0)?;
                self.file.seek(SeekFrom::Start(0))?;
                self.file.write_all(&image)?;
                self.file.flush()?;
            }
            IndexWriteMode::ShadowSwap => self.swap_in(&image)?,
        }

        self.lengths = entries.iter().map(|e| e.encoded_len() as u32).collect();
        if self.options.sync_writes {
            self.file.sync_data()?;
        }
        Ok(())
    }

    /// Decode the file from disk again (linear scan, ignores cached state)
    pub fn read_entries(&mut self) -> Result<Vec<IndexEntry>> {
        let bytes = self.read_from(0)?;
        let (_, entries) = decode_image(&self.path, &bytes, self.value_type)?;
        Ok(entries)
    }

    /// Flush buffered writes and fsync
    pub fn sync(&mut self) -> Result<()> {
        self.file.flush()?;
        self.file.sync_all()?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn value_type(&self) -> ValueType {
        self.value_type
    }

    pub fn entry_count(&self) -> usize {
        self.lengths.len()
    }

    /// Total header bytes for the current entry count
    pub fn header_len(&self) -> u32 {
        (LENGTH_FIELD_SIZE + self.lengths.len() * LENGTH_FIELD_SIZE) as u32
    }

    /// Expected file size from the cached header
    pub fn expected_size(&self) -> u64 {
        self.header_len() as u64 + self.lengths.iter().map(|&l| l as u64).sum::<u64>()
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    fn header_slot(position: usize) -> u64 {
        (LENGTH_FIELD_SIZE + position * LENGTH_FIELD_SIZE) as u64
    }

    /// Byte offset of entry `position` in the current (pre-mutation) file
    fn body_offset(&self, position: usize) -> u64 {
        self.header_len() as u64 + self.lengths[..position].iter().map(|&l| l as u64).sum::<u64>()
    }

    fn check_size(&self) -> Result<()> {
        let actual = self.file.metadata()?.len();
        let expected = self.expected_size();
        if actual != expected {
            return Err(UnbloatError::corruption(
                &self.path,
                format!("file is {} bytes, header describes {}", actual, expected),
            ));
        }
        Ok(())
    }

    fn apply(&mut self, splice: Splice) -> Result<()> {
        // self.lengths already reflects the change
        let header_len = self.header_len();

        match self.options.write_mode {
            IndexWriteMode::InPlace => {
                let from = splice.header_at();
                let mut tail = self.read_from(from)?;
                splice.apply(&mut tail, from);

                self.file.seek(SeekFrom::Start(from))?;
                self.file.write_all(&tail)?;
                self.file.set_len(from + tail.len() as u64)?;

                self.file.seek(SeekFrom::Start(0))?;
                self.file.write_all(&header_len.to_le_bytes())?;
                self.file.flush()?;
            }
            IndexWriteMode::ShadowSwap => {
                let mut image = self.read_from(0)?;
                splice.apply(&mut image, 0);
                image[..LENGTH_FIELD_SIZE].copy_from_slice(&header_len.to_le_bytes());
                self.swap_in(&image)?;
            }
        }

        if self.options.sync_writes {
            self.file.sync_data()?;
        }
        Ok(())
    }

    fn read_from(&mut self, offset: u64) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.read_to_end(&mut buf)?;
        Ok(buf)
    }

    /// Write `image` to a sibling file, fsync it, rename it over the index
    /// and reopen the handle.
    fn swap_in(&mut self, image: &[u8]) -> Result<()> {
        let mut swap_name = self.path.file_name().unwrap_or_default().to_os_string();
        swap_name.push(".");
        swap_name.push(SWAP_SUFFIX);
        let swap_path = self.path.with_file_name(swap_name);

        {
            let mut swap = File::create(&swap_path)?;
            swap.write_all(image)?;
            swap.sync_all()?;
        }
        fs::rename(&swap_path, &self.path)?;

        self.file = OpenOptions::new().read(true).write(true).open(&self.path)?;
        Ok(())
    }
}
