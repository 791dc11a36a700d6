//! Record envelope and back-references

use serde::{Deserialize, Serialize};

/// A stored record: the typed payload plus its envelope
///
/// Field order matters for positional formats: `master_key` and
/// `referencers` come first so the header can be decoded and rewritten
/// without knowing the payload type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record<T> {
    /// Unique, immutable key assigned at creation
    pub master_key: String,

    /// Live references to this record held by other records
    #[serde(default)]
    pub referencers: Vec<BackReference>,

    /// Typed payload
    pub data: T,
}

impl<T> Record<T> {
    pub fn new(master_key: impl Into<String>, data: T) -> Self {
        Self {
            master_key: master_key.into(),
            referencers: Vec::new(),
            data,
        }
    }

    /// Back-references held by records of `group`
    pub fn referencers_from<'a>(&'a self, group: &'a str) -> impl Iterator<Item = &'a BackReference> {
        self.referencers
            .iter()
            .filter(move |r| r.referencing_group == group)
    }
}

/// The part of a record the reference tracker reads and rewrites
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordHeader {
    pub master_key: String,
    #[serde(default)]
    pub referencers: Vec<BackReference>,
}

/// Whether a reference stays inside its group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReferenceKind {
    /// Target is in the same group as the referencing record
    Intra,
    /// Target is in a different group
    Inter,
}

impl ReferenceKind {
    pub fn between(referencing_group: &str, target_group: &str) -> Self {
        if referencing_group == target_group {
            ReferenceKind::Intra
        } else {
            ReferenceKind::Inter
        }
    }
}

/// One live reference to a record, stored on the target
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BackReference {
    pub referencing_group: String,
    pub referencing_property: String,
    pub referencing_key: String,
    pub kind: ReferenceKind,
}

impl BackReference {
    pub fn new(
        referencing_group: impl Into<String>,
        referencing_property: impl Into<String>,
        referencing_key: impl Into<String>,
        kind: ReferenceKind,
    ) -> Self {
        Self {
            referencing_group: referencing_group.into(),
            referencing_property: referencing_property.into(),
            referencing_key: referencing_key.into(),
            kind,
        }
    }

    /// Same source record and property, regardless of kind
    pub fn same_source(&self, other: &BackReference) -> bool {
        self.referencing_group == other.referencing_group
            && self.referencing_property == other.referencing_property
            && self.referencing_key == other.referencing_key
    }
}
