//! Declaration loader.
//!
//! Reads one or more manifest files (or directories of them), merges their
//! YAML documents into a single [`Manifest`] and validates every declaration.
//! Loading only reads input; nothing is resolved or provisioned here.

use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::{ConfigError, ParseError, Result, StackError};

use super::spec::{Manifest, ManifestDocument, StackOutput};
use super::validator::ManifestValidator;
use super::value::PropertyValue;

/// Default manifest file names to search for.
pub const DEFAULT_MANIFEST_FILES: &[&str] = &[
    "stackwright.yaml",
    "stackwright.yml",
    "stack.yaml",
    "stack.yml",
];

/// Loader for manifest files.
#[derive(Debug, Default)]
pub struct DeclarationLoader {
    /// Base path for resolving the `.env` file.
    base_path: Option<PathBuf>,
}

impl DeclarationLoader {
    /// Creates a new loader.
    #[must_use]
    pub const fn new() -> Self {
        Self { base_path: None }
    }

    /// Sets the base path used to find `.env`.
    #[must_use]
    pub fn with_base_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.base_path = Some(path.into());
        self
    }

    /// Loads a single manifest file or directory.
    ///
    /// # Errors
    ///
    /// See [`Self::load_paths`].
    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<Manifest> {
        self.load_paths(&[path.as_ref().to_path_buf()])
    }

    /// Loads a set of manifest files or directories.
    ///
    /// Directories expand to their `*.yaml`/`*.yml` files in lexical order.
    /// Insertion order is file order, then document order within a file.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::FileNotFound` for missing paths and a
    /// `ParseError` for any malformed or invalid declaration.
    pub fn load_paths(&self, paths: &[PathBuf]) -> Result<Manifest> {
        let mut documents = Vec::new();
        let mut sources = Vec::new();

        for path in paths {
            for file in expand_path(path)? {
                info!("Loading manifest from: {}", file.display());
                let content = std::fs::read_to_string(&file).map_err(|e| {
                    ParseError::syntax(
                        format!("Failed to read file: {e}"),
                        Some(file.display().to_string()),
                    )
                })?;
                documents.extend(parse_documents(&content, Some(&file))?);
                sources.push(file);
            }
        }

        self.assemble(documents, sources)
    }

    /// Parses a manifest from a YAML string, which may hold several documents.
    ///
    /// # Errors
    ///
    /// Returns a `ParseError` if the YAML is malformed or invalid.
    pub fn parse_yaml(&self, content: &str, source: Option<&Path>) -> Result<Manifest> {
        let documents = parse_documents(content, source)?;
        let sources = source.map(Path::to_path_buf).into_iter().collect();
        self.assemble(documents, sources)
    }

    fn assemble(&self, documents: Vec<ManifestDocument>, sources: Vec<PathBuf>) -> Result<Manifest> {
        let headers = documents.iter().filter(|d| d.project.is_some()).count();
        if headers != 1 {
            return Err(ParseError::ProjectHeader { found: headers }.into());
        }

        let mut project = None;
        let mut state = None;
        let mut provider = None;
        let mut settings = None;
        let mut resources = Vec::new();
        let mut outputs = BTreeMap::new();

        for doc in documents {
            if doc.project.is_some() {
                project = doc.project;
                state = doc.state;
                provider = doc.provider;
                settings = doc.settings;
            } else if doc.state.is_some() || doc.provider.is_some() || doc.settings.is_some() {
                return Err(ParseError::syntax(
                    "`state`, `provider` and `settings` must be declared alongside `project`",
                    None,
                )
                .into());
            }

            resources.extend(doc.resources);
            resources.extend(doc.lookups.into_iter().map(|mut raw| {
                raw.lookup = true;
                raw
            }));

            for (name, value) in doc.outputs {
                let value = PropertyValue::from_yaml(&value)?;
                if outputs.insert(name.clone(), value).is_some() {
                    return Err(
                        ParseError::syntax(format!("Duplicate output name: {name}"), None).into(),
                    );
                }
            }
        }

        let project = project.ok_or(ParseError::ProjectHeader { found: 0 })?;
        let declarations = ManifestValidator::new().declarations(resources)?;

        let mut manifest = Manifest {
            project,
            state: state.unwrap_or_default(),
            provider: provider.unwrap_or_default(),
            settings: settings.unwrap_or_default(),
            resources: declarations,
            outputs: outputs
                .into_iter()
                .map(|(name, value)| StackOutput { name, value })
                .collect(),
            sources,
        };
        Self::apply_env_overrides(&mut manifest);

        debug!(
            "Loaded {} declarations for {}",
            manifest.resources.len(),
            manifest.stack_id()
        );
        Ok(manifest)
    }

    /// Applies `STACKWRIGHT_*` environment overrides to the header sections.
    pub fn apply_env_overrides(manifest: &mut Manifest) {
        if let Ok(name) = std::env::var("STACKWRIGHT_PROJECT_NAME") {
            debug!("Overriding project.name from environment");
            manifest.project.name = name;
        }

        if let Ok(stack) = std::env::var("STACKWRIGHT_STACK") {
            debug!("Overriding project.stack from environment");
            manifest.project.stack = stack;
        }

        if let Ok(bucket) = std::env::var("STACKWRIGHT_STATE_BUCKET") {
            debug!("Overriding state.bucket from environment");
            manifest.state.bucket = Some(bucket);
        }

        if let Ok(prefix) = std::env::var("STACKWRIGHT_STATE_PREFIX") {
            debug!("Overriding state.prefix from environment");
            manifest.state.prefix = Some(prefix);
        }

        if let Ok(endpoint) = std::env::var("STACKWRIGHT_PROVIDER_ENDPOINT") {
            debug!("Overriding provider.endpoint from environment");
            manifest.provider.endpoint = Some(endpoint);
        }
    }

    /// Loads the `.env` file if present.
    ///
    /// # Errors
    ///
    /// Returns an error if the `.env` file exists but cannot be loaded.
    pub fn load_dotenv(&self) -> Result<()> {
        let env_path = self
            .base_path
            .as_ref()
            .map_or_else(|| PathBuf::from(".env"), |p| p.join(".env"));

        if env_path.exists() {
            info!("Loading environment from: {}", env_path.display());
            dotenvy::from_path(&env_path).map_err(|e| {
                ParseError::syntax(
                    format!("Failed to load .env file: {e}"),
                    Some(env_path.display().to_string()),
                )
            })?;
        } else {
            debug!(".env file not found at: {}", env_path.display());
        }

        Ok(())
    }
}

/// Splits a YAML stream into manifest documents, skipping empty ones.
fn parse_documents(content: &str, source: Option<&Path>) -> Result<Vec<ManifestDocument>> {
    let mut documents = Vec::new();

    for de in serde_yaml::Deserializer::from_str(content) {
        let value = serde_yaml::Value::deserialize(de).map_err(|e| yaml_error(&e, source))?;
        if value.is_null() {
            continue;
        }
        let doc: ManifestDocument =
            serde_yaml::from_value(value).map_err(|e| yaml_error(&e, source))?;
        documents.push(doc);
    }

    Ok(documents)
}

fn yaml_error(error: &serde_yaml::Error, source: Option<&Path>) -> StackError {
    let file = source.map(|p| p.display().to_string());
    let location = match (file, error.location()) {
        (Some(file), Some(loc)) => Some(format!("{file}:{}:{}", loc.line(), loc.column())),
        (None, Some(loc)) => Some(format!("line {}, column {}", loc.line(), loc.column())),
        (file, None) => file,
    };
    let message = match &location {
        Some(location) => format!("{error} ({location})"),
        None => error.to_string(),
    };
    ParseError::syntax(message, location).into()
}

/// Expands a path into the manifest files it names.
fn expand_path(path: &Path) -> Result<Vec<PathBuf>> {
    if path.is_file() {
        return Ok(vec![path.to_path_buf()]);
    }
    if !path.is_dir() {
        return Err(StackError::Config(ConfigError::FileNotFound {
            path: path.to_path_buf(),
        }));
    }

    let mut files: Vec<PathBuf> = std::fs::read_dir(path)?
        .filter_map(std::result::Result::ok)
        .map(|entry| entry.path())
        .filter(|p| {
            p.is_file()
                && p
                    .extension()
                    .and_then(|e| e.to_str())
                    .is_some_and(|e| e == "yaml" || e == "yml")
        })
        .collect();
    files.sort();

    if files.is_empty() {
        return Err(StackError::Config(ConfigError::FileNotFound {
            path: path.join(DEFAULT_MANIFEST_FILES[0]),
        }));
    }
    Ok(files)
}

/// Finds the manifest file in the given directory or its parents.
///
/// # Errors
///
/// Returns an error if no manifest file is found.
pub fn find_manifest_file(start_dir: impl AsRef<Path>) -> Result<PathBuf> {
    let start = start_dir.as_ref();
    let mut current = start.to_path_buf();

    loop {
        for filename in DEFAULT_MANIFEST_FILES {
            let candidate = current.join(filename);
            if candidate.exists() {
                info!("Found manifest file: {}", candidate.display());
                return Ok(candidate);
            }
        }

        if !current.pop() {
            break;
        }
    }

    Err(StackError::Config(ConfigError::FileNotFound {
        path: start.join(DEFAULT_MANIFEST_FILES[0]),
    }))
}
