//! Record Formats
//!
//! Serialization strategies for record blobs. The engine only ever sees
//! bytes; every format can also decode and rewrite the record header
//! (`master_key`, `referencers`) while carrying the payload bytes over
//! untouched, which lets back-references be maintained on records whose
//! Rust type is not known at the call site.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

use crate::error::{Result, UnbloatError};
use crate::record::{BackReference, Record, RecordHeader};

/// Serialization format for record blobs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RecordFormat {
    /// Compact JSON
    #[default]
    Json,

    /// Indented JSON, convenient for inspecting the data directory
    JsonPretty,

    /// bincode (fixed-width little-endian integers)
    Bincode,
}

/// JSON record with the payload kept as raw text
#[derive(Serialize, Deserialize)]
struct RawJsonRecord<'a> {
    master_key: String,
    #[serde(default)]
    referencers: Vec<BackReference>,
    #[serde(borrow)]
    data: &'a RawValue,
}

impl RecordFormat {
    /// Serialize a full record
    pub fn encode<T: Serialize>(&self, record: &Record<T>) -> Result<Vec<u8>> {
        let bytes = match self {
            RecordFormat::Json => serde_json::to_vec(record)?,
            RecordFormat::JsonPretty => serde_json::to_vec_pretty(record)?,
            RecordFormat::Bincode => bincode::serialize(record)?,
        };
        Ok(bytes)
    }

    /// Deserialize a full record
    pub fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<Record<T>> {
        let record = match self {
            RecordFormat::Json | RecordFormat::JsonPretty => serde_json::from_slice(bytes)?,
            RecordFormat::Bincode => bincode::deserialize(bytes)?,
        };
        Ok(record)
    }

    /// Deserialize only the record header
    pub fn decode_header(&self, bytes: &[u8]) -> Result<RecordHeader> {
        let header = match self {
            RecordFormat::Json | RecordFormat::JsonPretty => serde_json::from_slice(bytes)?,
            // Header fields are serialized first; trailing payload bytes are ignored
            RecordFormat::Bincode => bincode::deserialize(bytes)?,
        };
        Ok(header)
    }

    /// Replace the header of an encoded record, keeping its payload bytes
    pub fn rewrite_header(&self, bytes: &[u8], header: &RecordHeader) -> Result<Vec<u8>> {
        match self {
            RecordFormat::Json | RecordFormat::JsonPretty => {
                let raw: RawJsonRecord<'_> = serde_json::from_slice(bytes)?;
                let rewritten = RawJsonRecord {
                    master_key: header.master_key.clone(),
                    referencers: header.referencers.clone(),
                    data: raw.data,
                };

                let out = if *self == RecordFormat::JsonPretty {
                    serde_json::to_vec_pretty(&rewritten)?
                } else {
                    serde_json::to_vec(&rewritten)?
                };
                Ok(out)
            }
            RecordFormat::Bincode => {
                let old: RecordHeader = bincode::deserialize(bytes)?;
                let old_len = bincode::serialized_size(&old)? as usize;
                if old_len > bytes.len() {
                    return Err(UnbloatError::Serialization(format!(
                        "record header is {} bytes but the record is {}",
                        old_len,
                        bytes.len()
                    )));
                }

                let mut out = bincode::serialize(header)?;
                out.extend_from_slice(&bytes[old_len..]);
                Ok(out)
            }
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            RecordFormat::Json => "json",
            RecordFormat::JsonPretty => "json-pretty",
            RecordFormat::Bincode => "bincode",
        }
    }
}
