//! Manifest validation.
//!
//! Turns raw resource entries into typed [`ResourceDeclaration`]s, checking
//! names, type tags and every property against its kind's schema. Header
//! sections are checked with `validator` derives plus a few cross-field rules.

use std::collections::{BTreeMap, HashSet};
use tracing::debug;
use validator::Validate;

use crate::error::{ConfigError, ParseError, Result, StackError};

use super::schema::{FieldType, ResourceKind};
use super::spec::{
    Manifest, ProviderBackend, ProviderConfig, RawResource, ResourceDeclaration, StateBackend,
    StateConfig,
};
use super::value::PropertyValue;

/// Validator for manifests.
#[derive(Debug, Default)]
pub struct ManifestValidator;

/// Validation result for header sections.
#[derive(Debug, Default)]
pub struct ValidationReport {
    /// Non-fatal issues.
    pub warnings: Vec<String>,
}

impl ValidationReport {
    /// Returns the number of warnings.
    #[must_use]
    pub const fn warning_count(&self) -> usize {
        self.warnings.len()
    }
}

impl ManifestValidator {
    /// Creates a new validator.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Validates raw resources and converts them into declarations.
    ///
    /// Resources are checked in insertion order and the first problem found
    /// is returned.
    ///
    /// # Errors
    ///
    /// Returns a `ParseError` for invalid names, duplicate names, unknown
    /// type tags, unknown or missing properties and mistyped values.
    pub fn declarations(
        &self,
        raw: Vec<RawResource>,
    ) -> std::result::Result<Vec<ResourceDeclaration>, ParseError> {
        let mut seen = HashSet::new();
        let mut out = Vec::with_capacity(raw.len());

        for (index, resource) in raw.into_iter().enumerate() {
            if !is_valid_name(&resource.name) {
                return Err(ParseError::InvalidName {
                    name: resource.name,
                });
            }
            if !seen.insert(resource.name.clone()) {
                return Err(ParseError::DuplicateName {
                    name: resource.name,
                });
            }
            let kind =
                ResourceKind::from_tag(&resource.type_tag).ok_or_else(|| ParseError::UnknownType {
                    resource: resource.name.clone(),
                    type_tag: resource.type_tag.clone(),
                })?;

            if resource.lookup != kind.is_lookup() {
                let reason = if kind.is_lookup() {
                    "can only be declared under `lookups`"
                } else {
                    "cannot be declared under `lookups`"
                };
                return Err(ParseError::WrongSection {
                    resource: resource.name,
                    type_tag: resource.type_tag,
                    reason: reason.to_string(),
                });
            }

            let properties = Self::properties(&resource.name, kind, &resource.properties)?;

            for dep in &resource.depends_on {
                if !is_valid_name(dep) {
                    return Err(ParseError::InvalidName { name: dep.clone() });
                }
            }

            debug!(resource = %resource.name, %kind, "Declaration validated");
            out.push(ResourceDeclaration {
                index,
                name: resource.name,
                kind,
                properties,
                depends_on: resource.depends_on,
            });
        }

        Ok(out)
    }

    fn properties(
        name: &str,
        kind: ResourceKind,
        raw: &BTreeMap<String, serde_yaml::Value>,
    ) -> std::result::Result<BTreeMap<String, PropertyValue>, ParseError> {
        let mut properties = BTreeMap::new();

        for (property, yaml) in raw {
            let field = kind
                .field(property)
                .ok_or_else(|| ParseError::UnknownProperty {
                    resource: name.to_string(),
                    property: property.clone(),
                })?;
            let value = PropertyValue::from_yaml(yaml)?;
            if !value.fits(field.ty) {
                return Err(ParseError::invalid_value(
                    name,
                    property,
                    describe(field.ty),
                ));
            }
            properties.insert(property.clone(), value);
        }

        for field in kind.fields().iter().filter(|f| f.required) {
            if matches!(properties.get(field.name), None | Some(PropertyValue::Null)) {
                return Err(ParseError::MissingProperty {
                    resource: name.to_string(),
                    property: field.name.to_string(),
                });
            }
        }

        Ok(properties)
    }

    /// Validates the header sections of a loaded manifest.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if a setting is out of range or a backend is
    /// missing a required field.
    pub fn validate(&self, manifest: &Manifest) -> Result<ValidationReport> {
        let mut report = ValidationReport::default();

        if !is_valid_name(&manifest.project.name) {
            return Err(ConfigError::validation(
                format!(
                    "Project name '{}' is invalid. Must be lowercase alphanumeric with hyphens.",
                    manifest.project.name
                ),
                "project.name",
            )
            .into());
        }
        manifest
            .project
            .validate()
            .map_err(|e| ConfigError::validation(e.to_string(), "project"))?;
        manifest
            .settings
            .validate()
            .map_err(|e| ConfigError::validation(e.to_string(), "settings"))?;

        Self::validate_state(&manifest.state, &mut report)?;
        Self::validate_provider(&manifest.provider, &mut report)?;

        if manifest.resources.is_empty() {
            report
                .warnings
                .push(String::from("No resources declared; apply will only remove orphaned records"));
        }

        debug!(warnings = report.warning_count(), "Manifest validation passed");
        Ok(report)
    }

    fn validate_state(state: &StateConfig, report: &mut ValidationReport) -> Result<()> {
        match state.backend {
            StateBackend::S3 => {
                if state.bucket.as_deref().is_none_or(str::is_empty) {
                    return Err(StackError::Config(ConfigError::validation(
                        "S3 bucket name is required when using S3 backend",
                        "state.bucket",
                    )));
                }
                if state.region.is_none() {
                    report.warnings.push(String::from(
                        "No S3 region specified; the AWS default region will be used",
                    ));
                }
            }
            StateBackend::Local => {
                if state.bucket.is_some() {
                    report
                        .warnings
                        .push(String::from("state.bucket is ignored by the local backend"));
                }
            }
        }
        Ok(())
    }

    fn validate_provider(provider: &ProviderConfig, report: &mut ValidationReport) -> Result<()> {
        match provider.backend {
            ProviderBackend::Http => {
                let endpoint = provider.endpoint.as_deref().unwrap_or_default();
                if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
                    return Err(StackError::Config(ConfigError::validation(
                        "provider.endpoint must be an http(s) URL when using the http backend",
                        "provider.endpoint",
                    )));
                }
                if provider.timeout_secs == 0 {
                    return Err(StackError::Config(ConfigError::validation(
                        "provider.timeout_secs must be positive",
                        "provider.timeout_secs",
                    )));
                }
            }
            ProviderBackend::Simulated => {
                if provider.path.is_none() {
                    report.warnings.push(String::from(
                        "Simulated provider has no path; resources will not survive between runs",
                    ));
                }
            }
        }
        Ok(())
    }
}

const fn describe(ty: FieldType) -> &'static str {
    match ty {
        FieldType::String => "a string",
        FieldType::Integer => "an integer",
        FieldType::Boolean => "a boolean",
        FieldType::List => "a list",
        FieldType::Map => "a map",
        FieldType::Any => "any value",
    }
}

/// Validates that a name follows the naming convention.
/// Names must be lowercase alphanumeric with hyphens, starting with a letter.
pub(crate) fn is_valid_name(name: &str) -> bool {
    let mut chars = name.chars();

    if !chars.next().is_some_and(|c| c.is_ascii_lowercase()) {
        return false;
    }
    if !chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-') {
        return false;
    }

    !name.ends_with('-') && !name.contains("--")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::spec::{ProjectConfig, Settings};

    fn raw(name: &str, type_tag: &str, props: &str) -> RawResource {
        RawResource {
            name: name.to_string(),
            type_tag: type_tag.to_string(),
            properties: serde_yaml::from_str(props).unwrap(),
            depends_on: vec![],
            lookup: false,
        }
    }

    fn manifest() -> Manifest {
        Manifest {
            project: ProjectConfig {
                name: "demo".into(),
                stack: "dev".into(),
            },
            state: StateConfig::default(),
            provider: ProviderConfig::default(),
            settings: Settings::default(),
            resources: vec![],
            outputs: vec![],
            sources: vec![],
        }
    }

    #[test]
    fn test_valid_name() {
        assert!(is_valid_name("vpc"));
        assert!(is_valid_name("public-subnet-1"));
        assert!(is_valid_name("a"));
    }

    #[test]
    fn test_invalid_name() {
        assert!(!is_valid_name(""));
        assert!(!is_valid_name("Vpc"));
        assert!(!is_valid_name("1vpc"));
        assert!(!is_valid_name("my_vpc"));
        assert!(!is_valid_name("vpc-"));
        assert!(!is_valid_name("my--vpc"));
    }

    #[test]
    fn test_declarations_keep_order() {
        let decls = ManifestValidator::new()
            .declarations(vec![
                raw("vpc", "network", "cidr_block: 10.0.0.0/16"),
                raw("cluster", "cluster", "name: my-ecs-cluster"),
            ])
            .unwrap();
        assert_eq!(decls[0].index, 0);
        assert_eq!(decls[1].name, "cluster");
        assert_eq!(decls[1].kind, ResourceKind::Cluster);
    }

    #[test]
    fn test_duplicate_name() {
        let err = ManifestValidator::new()
            .declarations(vec![
                raw("vpc", "network", "cidr_block: 10.0.0.0/16"),
                raw("vpc", "network", "cidr_block: 10.1.0.0/16"),
            ])
            .unwrap_err();
        assert_eq!(err, ParseError::DuplicateName { name: "vpc".into() });
    }

    #[test]
    fn test_unknown_type() {
        let err = ManifestValidator::new()
            .declarations(vec![raw("bucket", "bucket", "{}")])
            .unwrap_err();
        assert!(matches!(err, ParseError::UnknownType { type_tag, .. } if type_tag == "bucket"));
    }

    #[test]
    fn test_managed_kind_under_lookups() {
        let mut entry = raw("vpc", "network", "cidr_block: 10.0.0.0/16");
        entry.lookup = true;
        let err = ManifestValidator::new().declarations(vec![entry]).unwrap_err();
        assert!(matches!(err, ParseError::WrongSection { reason, .. } if reason.contains("cannot")));

        let mut entry = raw("ami", "image", "owners: [amazon]\nname_pattern: amzn2-*");
        entry.lookup = true;
        let decls = ManifestValidator::new().declarations(vec![entry]).unwrap();
        assert!(decls[0].is_lookup());
    }

    #[test]
    fn test_missing_required_property() {
        let err = ManifestValidator::new()
            .declarations(vec![raw("vpc", "network", "enable_dns_hostnames: true")])
            .unwrap_err();
        assert_eq!(
            err,
            ParseError::MissingProperty {
                resource: "vpc".into(),
                property: "cidr_block".into()
            }
        );
    }

    #[test]
    fn test_unknown_property_and_bad_value() {
        let err = ManifestValidator::new()
            .declarations(vec![raw("vpc", "network", "cidr_block: x\ncolour: red")])
            .unwrap_err();
        assert!(matches!(err, ParseError::UnknownProperty { .. }));

        let err = ManifestValidator::new()
            .declarations(vec![raw(
                "asg",
                "autoscaling_group",
                "launch_configuration: lc\nsubnet_ids: []\nmin_size: three\nmax_size: 10",
            )])
            .unwrap_err();
        assert!(matches!(err, ParseError::InvalidValue { property, .. } if property == "min_size"));
    }

    #[test]
    fn test_settings_range() {
        let mut m = manifest();
        m.settings.parallelism = 0;
        assert!(ManifestValidator::new().validate(&m).is_err());
        m.settings.parallelism = 64;
        assert!(ManifestValidator::new().validate(&m).is_ok());
    }

    #[test]
    fn test_s3_requires_bucket_and_http_requires_endpoint() {
        let mut m = manifest();
        m.state.backend = StateBackend::S3;
        assert!(ManifestValidator::new().validate(&m).is_err());

        let mut m = manifest();
        m.provider.backend = ProviderBackend::Http;
        assert!(ManifestValidator::new().validate(&m).is_err());
        m.provider.endpoint = Some("https://cloud.internal".into());
        assert!(ManifestValidator::new().validate(&m).is_ok());
    }

    #[test]
    fn test_warnings() {
        let report = ManifestValidator::new().validate(&manifest()).unwrap();
        assert_eq!(report.warning_count(), 2);
    }
}
