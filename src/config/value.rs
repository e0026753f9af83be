//! Property values as loaded from manifests.
//!
//! A YAML string that is exactly `${name.attr}` becomes a [`PropertyValue::Reference`].
//! A string mixing literal text with one or more references becomes a
//! [`PropertyValue::Template`]. `$${` escapes a literal `${`. References are
//! never evaluated at load time; the planner resolves them once the target
//! resource has outputs.

use std::collections::BTreeMap;

use crate::error::ParseError;

use super::schema::FieldType;
use super::validator::is_valid_name;

/// A data-flow edge to another declaration's output attribute.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Reference {
    /// Logical name of the referenced resource.
    pub resource: String,
    /// Output attribute on that resource.
    pub attribute: String,
}

impl Reference {
    /// Creates a reference.
    #[must_use]
    pub fn new(resource: impl Into<String>, attribute: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            attribute: attribute.into(),
        }
    }

    /// Parses the inside of a `${...}` expression.
    ///
    /// # Errors
    ///
    /// Returns `InvalidReference` if the body is not `resource.attribute`.
    pub fn parse(body: &str) -> Result<Self, ParseError> {
        let invalid = |reason: &str| ParseError::InvalidReference {
            expression: format!("${{{body}}}"),
            reason: reason.to_string(),
        };

        let (resource, attribute) = body
            .split_once('.')
            .ok_or_else(|| invalid("expected `resource.attribute`"))?;

        if !is_valid_name(resource) {
            return Err(invalid("invalid resource name"));
        }
        if !is_valid_attribute(attribute) {
            return Err(invalid("invalid attribute name"));
        }

        Ok(Self::new(resource, attribute))
    }
}

impl std::fmt::Display for Reference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "${{{}.{}}}", self.resource, self.attribute)
    }
}

/// One segment of a template string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemplatePart {
    /// Literal text.
    Literal(String),
    /// An embedded reference.
    Reference(Reference),
}

/// A declared property value.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    /// Explicit null.
    Null,
    /// Boolean literal.
    Bool(bool),
    /// Numeric literal.
    Number(serde_json::Number),
    /// String literal.
    String(String),
    /// List of values.
    List(Vec<PropertyValue>),
    /// Map of values, keys sorted.
    Map(BTreeMap<String, PropertyValue>),
    /// A whole-value reference to another resource's output.
    Reference(Reference),
    /// A string built from literal text and references.
    Template(Vec<TemplatePart>),
}

impl PropertyValue {
    /// Converts a YAML value, parsing reference expressions inside strings.
    ///
    /// # Errors
    ///
    /// Returns a `ParseError` for malformed expressions, non-string map keys
    /// or non-finite numbers.
    pub fn from_yaml(value: &serde_yaml::Value) -> Result<Self, ParseError> {
        match value {
            serde_yaml::Value::Null => Ok(Self::Null),
            serde_yaml::Value::Bool(b) => Ok(Self::Bool(*b)),
            serde_yaml::Value::Number(n) => number_from_yaml(n).map(Self::Number),
            serde_yaml::Value::String(s) => Self::parse_string(s),
            serde_yaml::Value::Sequence(items) => items
                .iter()
                .map(Self::from_yaml)
                .collect::<Result<Vec<_>, _>>()
                .map(Self::List),
            serde_yaml::Value::Mapping(map) => {
                let mut out = BTreeMap::new();
                for (key, value) in map {
                    let key = yaml_key(key)?;
                    out.insert(key, Self::from_yaml(value)?);
                }
                Ok(Self::Map(out))
            }
            serde_yaml::Value::Tagged(tagged) => Self::from_yaml(&tagged.value),
        }
    }

    /// Parses a string, splitting out `${resource.attribute}` expressions.
    ///
    /// # Errors
    ///
    /// Returns `InvalidReference` for unterminated or malformed expressions.
    pub fn parse_string(input: &str) -> Result<Self, ParseError> {
        let mut parts = Vec::new();
        let mut literal = String::new();
        let mut rest = input;

        while let Some(pos) = rest.find('$') {
            literal.push_str(&rest[..pos]);
            let tail = &rest[pos..];

            if let Some(after) = tail.strip_prefix("$${") {
                literal.push_str("${");
                rest = after;
            } else if let Some(after) = tail.strip_prefix("${") {
                let end = after.find('}').ok_or_else(|| ParseError::InvalidReference {
                    expression: tail.to_string(),
                    reason: String::from("unterminated expression"),
                })?;
                let reference = Reference::parse(&after[..end])?;
                if !literal.is_empty() {
                    parts.push(TemplatePart::Literal(std::mem::take(&mut literal)));
                }
                parts.push(TemplatePart::Reference(reference));
                rest = &after[end + 1..];
            } else {
                literal.push('$');
                rest = &tail[1..];
            }
        }
        literal.push_str(rest);

        if parts.is_empty() {
            return Ok(Self::String(literal));
        }
        if !literal.is_empty() {
            parts.push(TemplatePart::Literal(literal));
        }

        match parts.as_slice() {
            [TemplatePart::Reference(r)] => Ok(Self::Reference(r.clone())),
            _ => Ok(Self::Template(parts)),
        }
    }

    /// Collects every reference in this value, in document order.
    #[must_use]
    pub fn references(&self) -> Vec<&Reference> {
        let mut out = Vec::new();
        self.collect_references(&mut out);
        out
    }

    fn collect_references<'a>(&'a self, out: &mut Vec<&'a Reference>) {
        match self {
            Self::Reference(r) => out.push(r),
            Self::Template(parts) => out.extend(parts.iter().filter_map(|p| match p {
                TemplatePart::Reference(r) => Some(r),
                TemplatePart::Literal(_) => None,
            })),
            Self::List(items) => items.iter().for_each(|v| v.collect_references(out)),
            Self::Map(map) => map.values().for_each(|v| v.collect_references(out)),
            Self::Null | Self::Bool(_) | Self::Number(_) | Self::String(_) => {}
        }
    }

    /// Returns true if the value can be stored in a field of type `ty`.
    ///
    /// References are accepted for every type; their shape is only known
    /// after apply. Templates always produce strings. Numbers are accepted
    /// where strings are expected.
    #[must_use]
    pub fn fits(&self, ty: FieldType) -> bool {
        match (self, ty) {
            (_, FieldType::Any) | (Self::Null | Self::Reference(_), _) => true,
            (Self::String(_) | Self::Template(_) | Self::Number(_), FieldType::String)
            | (Self::Bool(_), FieldType::Boolean)
            | (Self::List(_), FieldType::List)
            | (Self::Map(_), FieldType::Map) => true,
            (Self::Number(n), FieldType::Integer) => n.is_i64() || n.is_u64(),
            _ => false,
        }
    }

    /// Renders the value as JSON, writing references back as `${...}` text.
    ///
    /// This is the form used for manifest hashing and for displaying
    /// unresolved values.
    #[must_use]
    pub fn to_expression_json(&self) -> serde_json::Value {
        use serde_json::Value;
        match self {
            Self::Null => Value::Null,
            Self::Bool(b) => Value::Bool(*b),
            Self::Number(n) => Value::Number(n.clone()),
            Self::String(s) => Value::String(s.replace("${", "$${")),
            Self::List(items) => Value::Array(items.iter().map(Self::to_expression_json).collect()),
            Self::Map(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), v.to_expression_json()))
                    .collect(),
            ),
            Self::Reference(r) => Value::String(r.to_string()),
            Self::Template(parts) => Value::String(
                parts
                    .iter()
                    .map(|p| match p {
                        TemplatePart::Literal(s) => s.replace("${", "$${"),
                        TemplatePart::Reference(r) => r.to_string(),
                    })
                    .collect(),
            ),
        }
    }
}

fn is_valid_attribute(attribute: &str) -> bool {
    let mut chars = attribute.chars();
    chars.next().is_some_and(|c| c.is_ascii_lowercase())
        && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

fn number_from_yaml(n: &serde_yaml::Number) -> Result<serde_json::Number, ParseError> {
    if let Some(i) = n.as_i64() {
        return Ok(i.into());
    }
    if let Some(u) = n.as_u64() {
        return Ok(u.into());
    }
    n.as_f64()
        .and_then(serde_json::Number::from_f64)
        .ok_or_else(|| ParseError::syntax(format!("number {n} is not finite"), None))
}

fn yaml_key(key: &serde_yaml::Value) -> Result<String, ParseError> {
    match key {
        serde_yaml::Value::String(s) => Ok(s.clone()),
        serde_yaml::Value::Number(n) => Ok(n.to_string()),
        serde_yaml::Value::Bool(b) => Ok(b.to_string()),
        other => Err(ParseError::syntax(
            format!("map keys must be scalars, found {other:?}"),
            None,
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_string() {
        let v = PropertyValue::parse_string("10.0.0.0/16").unwrap();
        assert_eq!(v, PropertyValue::String("10.0.0.0/16".into()));
    }

    #[test]
    fn test_whole_reference() {
        let v = PropertyValue::parse_string("${vpc.id}").unwrap();
        assert_eq!(v, PropertyValue::Reference(Reference::new("vpc", "id")));
    }

    #[test]
    fn test_template() {
        let v = PropertyValue::parse_string("http://${load-balancer.dns_name}/health").unwrap();
        assert_eq!(
            v,
            PropertyValue::Template(vec![
                TemplatePart::Literal("http://".into()),
                TemplatePart::Reference(Reference::new("load-balancer", "dns_name")),
                TemplatePart::Literal("/health".into()),
            ])
        );
        assert_eq!(v.references().len(), 1);
    }

    #[test]
    fn test_escape_and_lone_dollar() {
        let v = PropertyValue::parse_string("cost $5 and $${literal}").unwrap();
        assert_eq!(v, PropertyValue::String("cost $5 and ${literal}".into()));
        assert_eq!(
            v.to_expression_json(),
            serde_json::json!("cost $5 and $${literal}")
        );
    }

    #[test]
    fn test_malformed_references() {
        assert!(matches!(
            PropertyValue::parse_string("${vpc.id"),
            Err(ParseError::InvalidReference { .. })
        ));
        assert!(matches!(
            PropertyValue::parse_string("${vpc}"),
            Err(ParseError::InvalidReference { .. })
        ));
        assert!(matches!(
            PropertyValue::parse_string("${Vpc.id}"),
            Err(ParseError::InvalidReference { .. })
        ));
        assert!(matches!(
            PropertyValue::parse_string("${vpc.Id}"),
            Err(ParseError::InvalidReference { .. })
        ));
    }

    #[test]
    fn test_nested_references_collected() {
        let yaml: serde_yaml::Value = serde_yaml::from_str(
            r#"
subnets: ["${public-a.id}", "${public-b.id}"]
tags: { owner: "team-${role.name}" }
"#,
        )
        .unwrap();
        let v = PropertyValue::from_yaml(&yaml).unwrap();
        let names: Vec<_> = v.references().iter().map(|r| r.resource.as_str()).collect();
        assert_eq!(names, vec!["public-a", "public-b", "role"]);
    }

    #[test]
    fn test_fits() {
        let int = PropertyValue::Number(3.into());
        assert!(int.fits(FieldType::Integer));
        assert!(int.fits(FieldType::String));
        assert!(!PropertyValue::Bool(true).fits(FieldType::List));
        assert!(PropertyValue::Reference(Reference::new("a", "id")).fits(FieldType::List));
        let template = PropertyValue::parse_string("x-${a.id}").unwrap();
        assert!(!template.fits(FieldType::Integer));
    }
}
