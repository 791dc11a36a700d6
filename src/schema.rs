//! Group Schemas
//!
//! Record types declare their group name, which fields are indexed, and
//! which fields hold key references, as plain data. The database consults
//! the declaration instead of inspecting types at runtime.
//!
//! ```
//! use serde::{Deserialize, Serialize};
//! use unbloatdb::{Document, FieldSpec, IndexValue, ValueType};
//!
//! #[derive(Debug, Clone, Serialize, Deserialize)]
//! struct Song {
//!     file: String,
//!     year: u16,
//!     artist: String,
//! }
//!
//! impl Document for Song {
//!     const GROUP: &'static str = "Song";
//!
//!     fn schema() -> Vec<FieldSpec> {
//!         vec![
//!             FieldSpec::unindexed("file"),
//!             FieldSpec::indexed("year", ValueType::U16),
//!             FieldSpec::reference("artist", "Artist"),
//!         ]
//!     }
//!
//!     fn field_value(&self, field: &str) -> Option<IndexValue> {
//!         match field {
//!             "year" => Some(self.year.into()),
//!             "artist" => Some(self.artist.as_str().into()),
//!             _ => None,
//!         }
//!     }
//! }
//! ```

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{Result, UnbloatError};
use crate::index::{IndexValue, ValueType};

/// A record type stored in the database
pub trait Document: Serialize + DeserializeOwned {
    /// Group name: storage namespace and schema boundary
    const GROUP: &'static str;

    /// Declared fields of this type
    fn schema() -> Vec<FieldSpec>;

    /// Current value of an indexed or reference field
    ///
    /// Reference fields return the target's master key as a string value,
    /// or `None` when the reference is unset.
    fn field_value(&self, field: &str) -> Option<IndexValue>;
}

/// Declaration of one field
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: &'static str,
    pub kind: FieldKind,
    /// Whether the field gets a property index
    pub indexed: bool,
}

/// What a declared field holds
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldKind {
    /// A scalar of the given type
    Scalar(ValueType),

    /// Master key of a record in `target_group`
    Reference { target_group: &'static str },

    /// Collections, nested structures and anything else never indexed
    Opaque,
}

impl FieldSpec {
    /// An indexed scalar field
    pub fn indexed(name: &'static str, value_type: ValueType) -> Self {
        Self {
            name,
            kind: FieldKind::Scalar(value_type),
            indexed: true,
        }
    }

    /// A field that is never indexed
    pub fn unindexed(name: &'static str) -> Self {
        Self {
            name,
            kind: FieldKind::Opaque,
            indexed: false,
        }
    }

    /// A key reference to a record in `target_group`, indexed by key
    pub fn reference(name: &'static str, target_group: &'static str) -> Self {
        Self {
            name,
            kind: FieldKind::Reference { target_group },
            indexed: true,
        }
    }

    /// Keep the declaration but drop its property index
    pub fn not_indexed(mut self) -> Self {
        self.indexed = false;
        self
    }

    /// Type stored in this field's index, if it has one
    pub fn index_type(&self) -> Option<ValueType> {
        if !self.indexed {
            return None;
        }
        match self.kind {
            FieldKind::Scalar(value_type) => Some(value_type),
            FieldKind::Reference { .. } => Some(ValueType::String),
            FieldKind::Opaque => None,
        }
    }

    /// Target group if this is a reference field
    pub fn reference_target(&self) -> Option<&'static str> {
        match self.kind {
            FieldKind::Reference { target_group } => Some(target_group),
            _ => None,
        }
    }
}

/// Validated schema of one group
#[derive(Debug, Clone)]
pub struct GroupSchema {
    pub group: &'static str,
    pub fields: Vec<FieldSpec>,
}

impl GroupSchema {
    /// Build and validate the schema declared by `T`
    pub fn of<T: Document>() -> Result<Self> {
        Self::new(T::GROUP, T::schema())
    }

    pub fn new(group: &'static str, fields: Vec<FieldSpec>) -> Result<Self> {
        if !is_path_safe(group) {
            return Err(UnbloatError::SchemaMismatch(format!(
                "group name {:?} is not a valid directory name",
                group
            )));
        }

        for (i, field) in fields.iter().enumerate() {
            if !is_path_safe(field.name) {
                return Err(UnbloatError::SchemaMismatch(format!(
                    "{}.{} is not a valid index file name",
                    group, field.name
                )));
            }
            if fields[..i].iter().any(|f| f.name == field.name) {
                return Err(UnbloatError::SchemaMismatch(format!(
                    "{}.{} is declared twice",
                    group, field.name
                )));
            }
        }

        Ok(Self { group, fields })
    }

    /// Fields that own a property index, with their index type
    pub fn indexed_fields(&self) -> impl Iterator<Item = (&'static str, ValueType)> + '_ {
        self.fields
            .iter()
            .filter_map(|f| f.index_type().map(|ty| (f.name, ty)))
    }

    /// Reference fields with their target group
    pub fn reference_fields(&self) -> impl Iterator<Item = (&'static str, &'static str)> + '_ {
        self.fields
            .iter()
            .filter_map(|f| f.reference_target().map(|target| (f.name, target)))
    }

    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }
}

fn is_path_safe(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\', '\0'])
}
