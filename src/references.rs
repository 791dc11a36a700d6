//! Reference Tracker
//!
//! Keeps the `referencers` list of every record in step with the key
//! reference fields that point at it.
//!
//! Tracking is a two-step protocol run while the record store holds the
//! source's writer lock, so one source's changes reach its targets in the
//! order they were made:
//!
//! ```text
//! attach(additions)      each target: lock, check it exists, add, unlock
//! persist source         source record lock only
//! apply_all(removals)    each target: lock, remove, unlock
//! ```
//!
//! Each [`BackReferenceUpdate`] takes the target's own record lock, rewrites
//! the target's header and releases it, so record locks are never nested.
//! A target delete that checks its referencers under the same lock either
//! sees the new back-reference or makes `attach` fail.

use std::sync::Arc;

use crate::config::DanglingReferencePolicy;
use crate::error::{Result, UnbloatError};
use crate::format::RecordFormat;
use crate::index::IndexValue;
use crate::record::{BackReference, ReferenceKind};
use crate::schema::{Document, GroupSchema};
use crate::storage::{BlobStore, KeyLocks};

/// A reference held by a source record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundReference {
    pub property: &'static str,
    pub target_group: &'static str,
    pub target_key: String,
}

/// A change to apply to one target record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackReferenceUpdate {
    Add {
        target_group: String,
        target_key: String,
        back_reference: BackReference,
    },
    Remove {
        target_group: String,
        target_key: String,
        back_reference: BackReference,
    },
}

impl BackReferenceUpdate {
    pub fn is_add(&self) -> bool {
        matches!(self, BackReferenceUpdate::Add { .. })
    }

    /// The update that undoes this one
    pub fn inverse(&self) -> Self {
        match self.clone() {
            BackReferenceUpdate::Add {
                target_group,
                target_key,
                back_reference,
            } => BackReferenceUpdate::Remove {
                target_group,
                target_key,
                back_reference,
            },
            BackReferenceUpdate::Remove {
                target_group,
                target_key,
                back_reference,
            } => BackReferenceUpdate::Add {
                target_group,
                target_key,
                back_reference,
            },
        }
    }

    pub fn target(&self) -> (&str, &str) {
        match self {
            BackReferenceUpdate::Add {
                target_group,
                target_key,
                ..
            }
            | BackReferenceUpdate::Remove {
                target_group,
                target_key,
                ..
            } => (target_group, target_key),
        }
    }
}

/// Collect the references held by `data` under `schema`
///
/// Unset references (`None` or an empty key) are skipped.
pub fn outbound_references<T: Document>(
    schema: &GroupSchema,
    data: &T,
) -> Result<Vec<OutboundReference>> {
    let mut references = Vec::new();

    for (property, target_group) in schema.reference_fields() {
        match data.field_value(property) {
            Some(IndexValue::String(key)) if !key.is_empty() => {
                references.push(OutboundReference {
                    property,
                    target_group,
                    target_key: key,
                });
            }
            Some(IndexValue::String(_)) | None => {}
            Some(other) => {
                return Err(UnbloatError::SchemaMismatch(format!(
                    "reference field {}.{} returned a {} value, expected a key string",
                    schema.group,
                    property,
                    other.value_type()
                )))
            }
        }
    }

    Ok(references)
}

/// Back-reference changes for a source record moving from `old` to `new`
/// references
///
/// References present in both (same property and target) are untouched.
pub fn diff_references(
    group: &str,
    key: &str,
    old: &[OutboundReference],
    new: &[OutboundReference],
) -> Vec<BackReferenceUpdate> {
    let back_reference = |reference: &OutboundReference| {
        BackReference::new(
            group,
            reference.property,
            key,
            ReferenceKind::between(group, reference.target_group),
        )
    };

    let removals = old.iter().filter(|r| !new.contains(r)).map(|r| BackReferenceUpdate::Remove {
        target_group: r.target_group.to_string(),
        target_key: r.target_key.clone(),
        back_reference: back_reference(r),
    });

    let additions = new.iter().filter(|r| !old.contains(r)).map(|r| BackReferenceUpdate::Add {
        target_group: r.target_group.to_string(),
        target_key: r.target_key.clone(),
        back_reference: back_reference(r),
    });

    removals.chain(additions).collect()
}

/// Applies back-reference updates to target records
pub struct ReferenceTracker {
    blobs: Arc<BlobStore>,
    locks: Arc<KeyLocks>,
    format: RecordFormat,
    policy: DanglingReferencePolicy,
}

impl ReferenceTracker {
    pub fn new(
        blobs: Arc<BlobStore>,
        locks: Arc<KeyLocks>,
        format: RecordFormat,
        policy: DanglingReferencePolicy,
    ) -> Self {
        Self {
            blobs,
            locks,
            format,
            policy,
        }
    }

    pub fn policy(&self) -> DanglingReferencePolicy {
        self.policy
    }

    /// Apply additions, undoing the ones already applied if any fails
    ///
    /// Under the `Fail` policy a missing target fails here, before the
    /// source has been written.
    pub fn attach(&self, additions: &[BackReferenceUpdate]) -> Result<()> {
        let mut applied = Vec::new();

        for update in additions {
            match self.apply(update) {
                Ok(true) => applied.push(update),
                Ok(false) => {}
                Err(e) => {
                    self.detach(&applied);
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    /// Undo updates applied by `attach`; failures are logged, not returned
    pub fn detach(&self, applied: &[&BackReferenceUpdate]) {
        for update in applied.iter().rev() {
            if let Err(e) = self.apply(&update.inverse()) {
                let (group, key) = update.target();
                tracing::warn!(group, key, error = %e, "failed to undo back-reference");
            }
        }
    }

    /// Apply every update in order, stopping at the first error
    pub fn apply_all(&self, updates: &[BackReferenceUpdate]) -> Result<()> {
        for update in updates {
            self.apply(update)?;
        }
        Ok(())
    }

    /// Apply one update under the target's record lock
    ///
    /// Returns true if the target record was rewritten.
    pub fn apply(&self, update: &BackReferenceUpdate) -> Result<bool> {
        let (group, key) = update.target();
        let _guard = self.locks.lock(group, key);

        let Some(bytes) = self.blobs.read(group, key)? else {
            return self.missing_target(update);
        };

        let mut header = self.format.decode_header(&bytes)?;
        let changed = match update {
            BackReferenceUpdate::Add { back_reference, .. } => {
                if header.referencers.iter().any(|r| r.same_source(back_reference)) {
                    false
                } else {
                    header.referencers.push(back_reference.clone());
                    true
                }
            }
            BackReferenceUpdate::Remove { back_reference, .. } => {
                match header.referencers.iter().position(|r| r.same_source(back_reference)) {
                    Some(position) => {
                        header.referencers.remove(position);
                        true
                    }
                    None => false,
                }
            }
        };

        if changed {
            let rewritten = self.format.rewrite_header(&bytes, &header)?;
            self.blobs.write(group, key, &rewritten)?;
            tracing::debug!(group, key, ?update, "updated back-references");
        }

        Ok(changed)
    }

    fn missing_target(&self, update: &BackReferenceUpdate) -> Result<bool> {
        let (group, key) = update.target();

        match update {
            // Nothing left to detach from
            BackReferenceUpdate::Remove { .. } => Ok(false),
            BackReferenceUpdate::Add { back_reference, .. } => match self.policy {
                DanglingReferencePolicy::Fail => Err(UnbloatError::DanglingReference {
                    group: group.to_string(),
                    key: key.to_string(),
                }),
                DanglingReferencePolicy::Skip => {
                    tracing::warn!(
                        group,
                        key,
                        from_group = %back_reference.referencing_group,
                        from_key = %back_reference.referencing_key,
                        "skipping reference to missing record"
                    );
                    Ok(false)
                }
            },
        }
    }
}
