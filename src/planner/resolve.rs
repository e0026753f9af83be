//! Reference resolution.
//!
//! Turns declared [`PropertyValue`]s into concrete JSON using the outputs of
//! resources that are already provisioned. Apply resolves strictly: a
//! reference whose target has no outputs yet is an error. Plans resolve in
//! preview mode, where outputs that only exist after this run are rendered as
//! [`UNKNOWN_VALUE`].

use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashSet};

use crate::config::{PropertyValue, Reference, TemplatePart};
use crate::error::ReconcileError;
use crate::provider::{Outputs, Properties};
use crate::state::StateRecord;

/// Placeholder for values that are only known after apply.
pub const UNKNOWN_VALUE: &str = "(known after apply)";

/// Where resolved outputs come from.
pub trait OutputSource {
    /// Returns the outputs of the named resource, if it has any.
    fn outputs_of(&self, name: &str) -> Option<&Outputs>;
}

impl OutputSource for BTreeMap<String, StateRecord> {
    fn outputs_of(&self, name: &str) -> Option<&Outputs> {
        self.get(name).map(|r| &r.outputs)
    }
}

impl OutputSource for BTreeMap<String, Outputs> {
    fn outputs_of(&self, name: &str) -> Option<&Outputs> {
        self.get(name)
    }
}

/// Result of resolving a property map.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Resolved {
    /// Concrete property values.
    pub properties: Properties,
    /// Properties that contain at least one unknown value (preview only).
    pub unknown: BTreeSet<String>,
}

/// Resolves references against an [`OutputSource`].
pub struct Resolver<'a> {
    source: &'a dyn OutputSource,
    pending: Option<&'a HashSet<String>>,
}

enum Part {
    Known(Value),
    Unknown,
}

impl<'a> Resolver<'a> {
    /// A resolver that fails on any unavailable output.
    #[must_use]
    pub fn strict(source: &'a dyn OutputSource) -> Self {
        Self {
            source,
            pending: None,
        }
    }

    /// A resolver that marks outputs of `pending` resources, and any
    /// unavailable output, as unknown instead of failing.
    #[must_use]
    pub fn preview(source: &'a dyn OutputSource, pending: &'a HashSet<String>) -> Self {
        Self {
            source,
            pending: Some(pending),
        }
    }

    /// Resolves every property of `owner`.
    ///
    /// # Errors
    ///
    /// In strict mode, returns `ReconcileError::Unresolved` for the first
    /// reference that cannot be satisfied.
    pub fn resolve(
        &self,
        owner: &str,
        properties: &BTreeMap<String, PropertyValue>,
    ) -> Result<Resolved, ReconcileError> {
        let mut resolved = Resolved::default();
        for (name, value) in properties {
            match self.value(owner, value)? {
                Part::Known(v) => {
                    resolved.properties.insert(name.clone(), v);
                }
                Part::Unknown => {
                    resolved
                        .properties
                        .insert(name.clone(), Value::String(UNKNOWN_VALUE.to_string()));
                    resolved.unknown.insert(name.clone());
                }
            }
        }
        Ok(resolved)
    }

    /// Resolves a single value, such as a stack output expression.
    ///
    /// In preview mode an unknown value comes back as [`UNKNOWN_VALUE`].
    ///
    /// # Errors
    ///
    /// In strict mode, returns `ReconcileError::Unresolved`.
    pub fn resolve_value(&self, owner: &str, value: &PropertyValue) -> Result<Value, ReconcileError> {
        Ok(match self.value(owner, value)? {
            Part::Known(v) => v,
            Part::Unknown => Value::String(UNKNOWN_VALUE.to_string()),
        })
    }

    fn value(&self, owner: &str, value: &PropertyValue) -> Result<Part, ReconcileError> {
        Ok(match value {
            PropertyValue::Null => Part::Known(Value::Null),
            PropertyValue::Bool(b) => Part::Known(Value::Bool(*b)),
            PropertyValue::Number(n) => Part::Known(Value::Number(n.clone())),
            PropertyValue::String(s) => Part::Known(Value::String(s.clone())),
            PropertyValue::Reference(r) => self.reference(owner, r)?,
            PropertyValue::List(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    match self.value(owner, item)? {
                        Part::Known(v) => out.push(v),
                        Part::Unknown => return Ok(Part::Unknown),
                    }
                }
                Part::Known(Value::Array(out))
            }
            PropertyValue::Map(map) => {
                let mut out = serde_json::Map::new();
                for (key, item) in map {
                    match self.value(owner, item)? {
                        Part::Known(v) => {
                            out.insert(key.clone(), v);
                        }
                        Part::Unknown => return Ok(Part::Unknown),
                    }
                }
                Part::Known(Value::Object(out))
            }
            PropertyValue::Template(parts) => {
                let mut text = String::new();
                for part in parts {
                    match part {
                        TemplatePart::Literal(s) => text.push_str(s),
                        TemplatePart::Reference(r) => match self.reference(owner, r)? {
                            Part::Known(v) => text.push_str(&stringify(&v)),
                            Part::Unknown => return Ok(Part::Unknown),
                        },
                    }
                }
                Part::Known(Value::String(text))
            }
        })
    }

    fn reference(&self, owner: &str, reference: &Reference) -> Result<Part, ReconcileError> {
        if let Some(pending) = self.pending {
            if pending.contains(&reference.resource) {
                return Ok(Part::Unknown);
            }
        }

        let unresolved = |reason: &str| ReconcileError::Unresolved {
            resource: owner.to_string(),
            target: reference.resource.clone(),
            attribute: reference.attribute.clone(),
            reason: reason.to_string(),
        };

        let found = self
            .source
            .outputs_of(&reference.resource)
            .ok_or_else(|| unresolved("resource has not been provisioned"))
            .and_then(|outputs| {
                outputs
                    .get(&reference.attribute)
                    .filter(|v| !v.is_null())
                    .ok_or_else(|| unresolved("provider reported no value for this attribute"))
            });

        match (found, self.pending) {
            (Ok(value), _) => Ok(Part::Known(value.clone())),
            (Err(_), Some(_)) => Ok(Part::Unknown),
            (Err(e), None) => Err(e),
        }
    }
}

/// Renders a JSON value for embedding in a template string.
fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
