//! Dataset reconciliation
//!
//! Partitions one subject's freshly fetched records of one dataset into
//! inserts and field-level patches against what the store already holds.
//! Records are matched by merge key; existing records that were not fetched
//! again are left alone.

use eden_common::{EntityRecord, FieldSchema, SchemaError, Value};
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use thiserror::Error;
use tracing::{debug, trace, warn};

use crate::compare::is_changed;

/// Reconciliation errors are fatal to the subject's cycle
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ReconcileError {
    #[error("{side} record #{index} has no value for merge key field '{column}'")]
    MissingMergeKeyField {
        side: RecordSide,
        index: usize,
        column: String,
    },

    #[error("existing records share the merge key ({key})")]
    DuplicateMergeKey { key: String },

    #[error("merge key must name at least one column")]
    EmptyMergeKey,

    #[error("merge key column '{0}' is not in the schema")]
    UnknownMergeKeyColumn(String),

    #[error(transparent)]
    Schema(#[from] SchemaError),
}

/// Which input a record came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordSide {
    Fetched,
    Existing,
}

impl fmt::Display for RecordSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordSide::Fetched => f.write_str("fetched"),
            RecordSide::Existing => f.write_str("existing"),
        }
    }
}

/// Schema, merge key and excluded columns of one dataset kind
#[derive(Debug, Clone)]
pub struct ReconcileSpec {
    schema: FieldSchema,
    merge_key: Vec<String>,
    excluded: Vec<String>,
}

impl ReconcileSpec {
    /// Every merge key column must be part of the schema
    pub fn new(
        schema: FieldSchema,
        merge_key: &[&str],
        excluded: &[&str],
    ) -> Result<Self, ReconcileError> {
        if merge_key.is_empty() {
            return Err(ReconcileError::EmptyMergeKey);
        }
        if let Some(missing) = merge_key.iter().find(|c| schema.get(c).is_none()) {
            return Err(ReconcileError::UnknownMergeKeyColumn(missing.to_string()));
        }
        Ok(Self {
            schema,
            merge_key: merge_key.iter().map(|c| c.to_string()).collect(),
            excluded: excluded.iter().map(|c| c.to_string()).collect(),
        })
    }

    pub fn schema(&self) -> &FieldSchema {
        &self.schema
    }

    pub fn merge_key(&self) -> &[String] {
        &self.merge_key
    }

    pub fn excluded(&self) -> &[String] {
        &self.excluded
    }

    /// Columns eligible for patching, in schema order
    pub fn compared_columns(&self) -> impl Iterator<Item = &eden_common::FieldDef> {
        self.schema.iter().filter(move |f| {
            !self.merge_key.iter().any(|k| k == f.column())
                && !self.excluded.iter().any(|e| e == f.column())
        })
    }

    /// Merge key value of a record
    pub fn key_of(
        &self,
        record: &EntityRecord,
        side: RecordSide,
        index: usize,
    ) -> Result<MergeKeyValue, ReconcileError> {
        let mut parts = Vec::with_capacity(self.merge_key.len());
        for column in &self.merge_key {
            let value = record.get(column);
            if value.is_absent() {
                return Err(ReconcileError::MissingMergeKeyField {
                    side,
                    index,
                    column: column.clone(),
                });
            }
            parts.push((column.clone(), value.clone()));
        }
        Ok(MergeKeyValue { parts })
    }
}

/// The merge key columns of one record, with their values
///
/// Identity is the canonical text of each value, so `2023` read from a
/// `smallint` column matches `2023.0` coerced from the payload.
#[derive(Debug, Clone)]
pub struct MergeKeyValue {
    parts: Vec<(String, Value)>,
}

impl MergeKeyValue {
    pub fn new(parts: Vec<(String, Value)>) -> Self {
        Self { parts }
    }

    pub fn parts(&self) -> &[(String, Value)] {
        &self.parts
    }

    fn identity(&self) -> impl Iterator<Item = String> + '_ {
        self.parts.iter().map(|(_, v)| v.canonical())
    }
}

impl PartialEq for MergeKeyValue {
    fn eq(&self, other: &Self) -> bool {
        self.parts.len() == other.parts.len() && self.identity().eq(other.identity())
    }
}

impl Eq for MergeKeyValue {}

impl Hash for MergeKeyValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for part in self.identity() {
            part.hash(state);
        }
    }
}

impl fmt::Display for MergeKeyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (column, value)) in self.parts.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}={}", column, value)?;
        }
        Ok(())
    }
}

/// Changed columns of one existing record
#[derive(Debug, Clone, PartialEq)]
pub struct Patch {
    pub key: MergeKeyValue,
    pub changes: Vec<(String, Value)>,
}

/// The minimal write set for one dataset of one subject
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconciliationOutcome {
    /// Records with an unknown merge key, in fetched order
    pub to_insert: Vec<EntityRecord>,
    /// Patches for known records with at least one changed column
    pub to_update: Vec<Patch>,
    /// Known records with nothing to change
    pub unchanged: usize,
    /// Merge keys fetched more than once; only the first occurrence was used
    pub conflicts: Vec<MergeKeyValue>,
}

impl ReconciliationOutcome {
    /// Whether applying this outcome would write anything
    pub fn is_noop(&self) -> bool {
        self.to_insert.is_empty() && self.to_update.is_empty()
    }
}

/// Reconcile fetched records against existing ones
pub fn reconcile(
    fetched: &[EntityRecord],
    existing: &[EntityRecord],
    spec: &ReconcileSpec,
) -> Result<ReconciliationOutcome, ReconcileError> {
    let mut outcome = ReconciliationOutcome::default();
    if fetched.is_empty() {
        return Ok(outcome);
    }

    let mut index: HashMap<MergeKeyValue, &EntityRecord> = HashMap::with_capacity(existing.len());
    for (i, record) in existing.iter().enumerate() {
        let key = spec.key_of(record, RecordSide::Existing, i)?;
        if index.contains_key(&key) {
            return Err(ReconcileError::DuplicateMergeKey { key: key.to_string() });
        }
        index.insert(key, record);
    }

    let mut seen: HashMap<MergeKeyValue, usize> = HashMap::with_capacity(fetched.len());
    for (i, record) in fetched.iter().enumerate() {
        let key = spec.key_of(record, RecordSide::Fetched, i)?;

        if let Some(first) = seen.get(&key) {
            warn!(
                key = %key,
                first = *first,
                duplicate = i,
                "Fetched records share a merge key, keeping the first"
            );
            outcome.conflicts.push(key);
            continue;
        }
        seen.insert(key.clone(), i);

        let Some(old) = index.get(&key) else {
            outcome.to_insert.push(record.clone());
            continue;
        };

        let changes: Vec<(String, Value)> = spec
            .compared_columns()
            .filter(|field| {
                is_changed(record.get(field.column()), old.get(field.column()), field.ty())
            })
            .map(|field| (field.column().to_string(), record.get(field.column()).clone()))
            .collect();

        if changes.is_empty() {
            trace!(key = %key, "Record unchanged");
            outcome.unchanged += 1;
        } else {
            trace!(key = %key, fields = changes.len(), "Record changed");
            outcome.to_update.push(Patch { key, changes });
        }
    }

    debug!(
        fetched = fetched.len(),
        existing = existing.len(),
        inserts = outcome.to_insert.len(),
        updates = outcome.to_update.len(),
        unchanged = outcome.unchanged,
        conflicts = outcome.conflicts.len(),
        "Reconciled dataset"
    );

    Ok(outcome)
}
