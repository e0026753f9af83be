//! Diff engine for comparing resolved properties against state records.
//!
//! A node is classified from its resolved property snapshot and the record
//! that was last applied for it. Orphaned records (present in state, absent
//! from the declarations) are classified as deletes. Lookups are always
//! reads.

use serde_json::Value;
use std::collections::BTreeSet;
use tracing::debug;

use crate::config::{ConfigHasher, ResourceKind};
use crate::provider::Properties;
use crate::state::StateRecord;

/// Engine for computing diffs between resolved properties and state.
#[derive(Debug, Default)]
pub struct DiffEngine {
    hasher: ConfigHasher,
}

/// Difference for a single resource.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceDiff {
    /// Logical name.
    pub name: String,
    /// Resource kind.
    pub kind: ResourceKind,
    /// Type of difference.
    pub diff_type: DiffType,
    /// Field-level changes.
    pub details: Vec<DiffDetail>,
    /// Hash recorded in state, if any.
    pub old_hash: Option<String>,
    /// Hash of the resolved properties, if the resource is still declared.
    pub new_hash: Option<String>,
}

/// Type of difference detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DiffType {
    /// No record exists.
    Create,
    /// The record differs in fields that can change in place.
    Update,
    /// A field that cannot change in place differs; delete then create.
    Replace,
    /// The record matches.
    NoChange,
    /// The declaration is gone.
    Delete,
    /// A lookup, answered by the provider on every run.
    Read,
}

/// Detail about a specific field difference.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct DiffDetail {
    /// Property that differs.
    pub field: String,
    /// Value recorded in state.
    pub old_value: Option<Value>,
    /// Resolved value.
    pub new_value: Option<Value>,
    /// Whether this change forces a replace.
    pub forces_replace: bool,
}

impl DiffEngine {
    /// Creates a new diff engine.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            hasher: ConfigHasher::new(),
        }
    }

    /// Hashes a resolved property snapshot.
    #[must_use]
    pub fn hash_properties(&self, properties: &Properties) -> String {
        let object: serde_json::Map<String, Value> = properties
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        self.hasher.hash_value(&Value::Object(object))
    }

    /// Classifies a declared node.
    ///
    /// `unknown` names properties whose values are only known after apply.
    /// They are treated as changed, and never compared for equality.
    #[must_use]
    pub fn diff_node(
        &self,
        name: &str,
        kind: ResourceKind,
        properties: &Properties,
        unknown: &BTreeSet<String>,
        record: Option<&StateRecord>,
    ) -> ResourceDiff {
        let new_hash = self.hash_properties(properties);

        if kind.is_lookup() {
            return ResourceDiff {
                name: name.to_string(),
                kind,
                diff_type: DiffType::Read,
                details: vec![],
                old_hash: record.map(|r| r.hash.clone()),
                new_hash: Some(new_hash),
            };
        }

        let Some(record) = record else {
            debug!("{name} needs to be created");
            return ResourceDiff {
                name: name.to_string(),
                kind,
                diff_type: DiffType::Create,
                details: properties
                    .iter()
                    .map(|(field, value)| DiffDetail {
                        field: field.clone(),
                        old_value: None,
                        new_value: Some(value.clone()),
                        forces_replace: false,
                    })
                    .collect(),
                old_hash: None,
                new_hash: Some(new_hash),
            };
        };

        if record.kind != kind {
            debug!("{name} changed kind from {} to {kind}", record.kind);
            return ResourceDiff {
                name: name.to_string(),
                kind,
                diff_type: DiffType::Replace,
                details: vec![DiffDetail {
                    field: String::from("type"),
                    old_value: Some(Value::String(record.kind.to_string())),
                    new_value: Some(Value::String(kind.to_string())),
                    forces_replace: true,
                }],
                old_hash: Some(record.hash.clone()),
                new_hash: Some(new_hash),
            };
        }

        if unknown.is_empty() && ConfigHasher::hashes_match(&record.hash, &new_hash) {
            return ResourceDiff {
                name: name.to_string(),
                kind,
                diff_type: DiffType::NoChange,
                details: vec![],
                old_hash: Some(record.hash.clone()),
                new_hash: Some(new_hash),
            };
        }

        let details = Self::property_details(kind, &record.properties, properties, unknown);
        let diff_type = if details.iter().any(|d| d.forces_replace) {
            DiffType::Replace
        } else if details.is_empty() && unknown.is_empty() {
            // Hash formats can drift between versions while the values agree.
            DiffType::NoChange
        } else {
            DiffType::Update
        };

        debug!("{name} classified as {diff_type} ({} fields)", details.len());
        ResourceDiff {
            name: name.to_string(),
            kind,
            diff_type,
            details,
            old_hash: Some(record.hash.clone()),
            new_hash: Some(new_hash),
        }
    }

    /// Classifies a record whose declaration is gone.
    #[must_use]
    pub fn diff_orphan(record: &StateRecord) -> ResourceDiff {
        ResourceDiff {
            name: record.name.clone(),
            kind: record.kind,
            diff_type: DiffType::Delete,
            details: vec![],
            old_hash: Some(record.hash.clone()),
            new_hash: None,
        }
    }

    /// Compares two property maps field by field.
    ///
    /// Unknown fields are always reported and never force a replace.
    #[must_use]
    pub fn property_details(
        kind: ResourceKind,
        old: &Properties,
        new: &Properties,
        unknown: &BTreeSet<String>,
    ) -> Vec<DiffDetail> {
        let fields: BTreeSet<&String> = old.keys().chain(new.keys()).collect();

        fields
            .into_iter()
            .filter_map(|field| {
                let before = old.get(field);
                let after = new.get(field);
                let is_unknown = unknown.contains(field);
                if !is_unknown && before == after {
                    return None;
                }
                Some(DiffDetail {
                    field: field.clone(),
                    old_value: before.cloned(),
                    new_value: after.cloned(),
                    forces_replace: !is_unknown && kind.replaces_on(field),
                })
            })
            .collect()
    }
}

impl DiffType {
    /// Returns true if applying this diff changes something at the provider.
    #[must_use]
    pub const fn is_change(self) -> bool {
        !matches!(self, Self::NoChange | Self::Read)
    }

    /// Symbol used in plan listings.
    #[must_use]
    pub const fn symbol(self) -> &'static str {
        match self {
            Self::Create => "+",
            Self::Update => "~",
            Self::Replace => "-/+",
            Self::NoChange => " ",
            Self::Delete => "-",
            Self::Read => "<=",
        }
    }
}

impl std::fmt::Display for DiffType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Replace => "replace",
            Self::NoChange => "no change",
            Self::Delete => "delete",
            Self::Read => "read",
        };
        write!(f, "{s}")
    }
}

impl std::fmt::Display for ResourceDiff {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.name, self.diff_type)?;
        if !self.details.is_empty() {
            write!(f, " (")?;
            for (i, detail) in self.details.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{}", detail.field)?;
            }
            write!(f, ")")?;
        }
        Ok(())
    }
}
