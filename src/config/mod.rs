//! Declaration loading.
//!
//! - Parsing manifest files and directories into ordered declarations
//! - Per-kind property schemas and reference expressions
//! - Validation of header sections and declarations
//! - Deterministic hashing for change detection

mod hash;
mod parser;
mod schema;
mod spec;
mod validator;
mod value;

pub use hash::ConfigHasher;
pub use parser::{DEFAULT_MANIFEST_FILES, DeclarationLoader, find_manifest_file};
pub use schema::{FieldSpec, FieldType, ResourceKind};
pub use spec::{
    Manifest, ManifestDocument, ProjectConfig, ProviderBackend, ProviderConfig, RawResource,
    ResourceDeclaration, Settings, StackOutput, StateBackend, StateConfig,
};
pub use validator::{ManifestValidator, ValidationReport};
pub use value::{PropertyValue, Reference, TemplatePart};
