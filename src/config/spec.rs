//! Manifest types.
//!
//! [`ManifestDocument`] maps one YAML document as written. [`Manifest`] is the
//! loaded, validated form: the merged header sections of every document plus
//! the ordered [`ResourceDeclaration`]s.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use validator::Validate;

use super::schema::ResourceKind;
use super::value::{PropertyValue, Reference};

/// One YAML document of a manifest set, as written.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ManifestDocument {
    /// Project header; exactly one document in a set carries it.
    #[serde(default)]
    pub project: Option<ProjectConfig>,
    /// State backend section.
    #[serde(default)]
    pub state: Option<StateConfig>,
    /// Provider section.
    #[serde(default)]
    pub provider: Option<ProviderConfig>,
    /// Run settings.
    #[serde(default)]
    pub settings: Option<Settings>,
    /// Resource declarations in document order.
    #[serde(default)]
    pub resources: Vec<RawResource>,
    /// Read-only lookups of things that already exist.
    #[serde(default)]
    pub lookups: Vec<RawResource>,
    /// Stack output expressions.
    #[serde(default)]
    pub outputs: BTreeMap<String, serde_yaml::Value>,
}

/// A resource entry before schema validation.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawResource {
    /// Logical name.
    pub name: String,
    /// Type tag.
    #[serde(rename = "type")]
    pub type_tag: String,
    /// Raw property values.
    #[serde(default)]
    pub properties: BTreeMap<String, serde_yaml::Value>,
    /// Explicit dependencies.
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Set for entries read from the `lookups` section.
    #[serde(skip)]
    pub lookup: bool,
}

/// Project-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Validate)]
#[serde(deny_unknown_fields)]
pub struct ProjectConfig {
    /// Project name.
    #[validate(length(min = 1, max = 63))]
    pub name: String,
    /// Stack name (e.g. "dev", "prod").
    #[serde(default = "default_stack")]
    #[validate(length(min = 1, max = 63))]
    pub stack: String,
}

/// State backend configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct StateConfig {
    /// Backend type.
    #[serde(default)]
    pub backend: StateBackend,
    /// Local state directory.
    #[serde(default)]
    pub path: Option<String>,
    /// S3 bucket name (required for the s3 backend).
    #[serde(default)]
    pub bucket: Option<String>,
    /// S3 key prefix.
    #[serde(default)]
    pub prefix: Option<String>,
    /// S3 region (uses the AWS default chain if not set).
    #[serde(default)]
    pub region: Option<String>,
}

/// State backend types.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StateBackend {
    /// Local file-based state storage.
    #[default]
    Local,
    /// AWS S3-based state storage.
    S3,
}

/// Provider configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ProviderConfig {
    /// Provider backend.
    #[serde(default)]
    pub backend: ProviderBackend,
    /// REST endpoint (required for the http backend).
    #[serde(default)]
    pub endpoint: Option<String>,
    /// File the simulated provider persists to.
    #[serde(default)]
    pub path: Option<String>,
    /// Request timeout for the http backend.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            backend: ProviderBackend::default(),
            endpoint: None,
            path: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// Provider backend types.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProviderBackend {
    /// In-process simulated cloud.
    #[default]
    Simulated,
    /// Generic REST control plane.
    Http,
}

/// Run settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Validate)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    /// Maximum in-flight provider calls.
    #[serde(default = "default_parallelism")]
    #[validate(range(min = 1, max = 64))]
    pub parallelism: usize,
    /// Read recorded resources from the provider before diffing.
    #[serde(default)]
    pub refresh: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            parallelism: default_parallelism(),
            refresh: false,
        }
    }
}

fn default_stack() -> String {
    String::from("dev")
}

const fn default_timeout_secs() -> u64 {
    30
}

const fn default_parallelism() -> usize {
    4
}

/// A validated resource declaration. Immutable once loaded.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceDeclaration {
    /// Insertion position across all loaded files.
    pub index: usize,
    /// Logical name.
    pub name: String,
    /// Resource kind.
    pub kind: ResourceKind,
    /// Declared properties.
    pub properties: BTreeMap<String, PropertyValue>,
    /// Explicit dependencies, as written.
    pub depends_on: Vec<String>,
}

impl ResourceDeclaration {
    /// Returns true if this declaration is a read-only lookup.
    #[must_use]
    pub const fn is_lookup(&self) -> bool {
        self.kind.is_lookup()
    }

    /// Returns every reference found in this declaration's properties.
    #[must_use]
    pub fn references(&self) -> Vec<&Reference> {
        self.properties
            .values()
            .flat_map(PropertyValue::references)
            .collect()
    }

    /// Names of every resource this declaration depends on, through
    /// references or `depends_on`.
    #[must_use]
    pub fn dependency_names(&self) -> BTreeSet<&str> {
        self.references()
            .into_iter()
            .map(|r| r.resource.as_str())
            .chain(self.depends_on.iter().map(String::as_str))
            .collect()
    }
}

/// A named stack output expression.
#[derive(Debug, Clone, PartialEq)]
pub struct StackOutput {
    /// Output name.
    pub name: String,
    /// Expression to resolve after apply.
    pub value: PropertyValue,
}

/// A fully loaded manifest set.
#[derive(Debug, Clone)]
pub struct Manifest {
    /// Project header.
    pub project: ProjectConfig,
    /// State backend.
    pub state: StateConfig,
    /// Provider backend.
    pub provider: ProviderConfig,
    /// Run settings.
    pub settings: Settings,
    /// Declarations in insertion order, lookups included.
    pub resources: Vec<ResourceDeclaration>,
    /// Stack outputs, sorted by name.
    pub outputs: Vec<StackOutput>,
    /// Files the manifest was loaded from.
    pub sources: Vec<PathBuf>,
}

impl Manifest {
    /// Looks up a declaration by logical name.
    #[must_use]
    pub fn resource(&self, name: &str) -> Option<&ResourceDeclaration> {
        self.resources.iter().find(|r| r.name == name)
    }

    /// Returns `project/stack`.
    #[must_use]
    pub fn stack_id(&self) -> String {
        format!("{}/{}", self.project.name, self.project.stack)
    }
}
