//! Run context passed explicitly through loading, planning and reconciliation.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;

use crate::config::Manifest;

/// Environment variable holding the provider bearer token.
pub const TOKEN_ENV_VAR: &str = "STACKWRIGHT_PROVIDER_TOKEN";

/// Everything a run needs besides the declarations themselves.
#[derive(Debug, Clone)]
pub struct RunContext {
    /// Project name.
    pub project: String,
    /// Stack name.
    pub stack: String,
    /// Provider credentials.
    pub credentials: ProviderCredentials,
    /// Maximum in-flight provider calls.
    pub parallelism: usize,
    /// Read recorded resources from the provider before diffing.
    pub refresh: bool,
    /// Operator abort signal.
    pub cancel: CancellationHandle,
}

impl RunContext {
    /// Creates a context with no credentials and default settings.
    #[must_use]
    pub fn new(project: impl Into<String>, stack: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            stack: stack.into(),
            credentials: ProviderCredentials::default(),
            parallelism: 4,
            refresh: false,
            cancel: CancellationHandle::new(),
        }
    }

    /// Creates a context from a loaded manifest, reading credentials from the
    /// environment.
    #[must_use]
    pub fn from_manifest(manifest: &Manifest) -> Self {
        Self {
            project: manifest.project.name.clone(),
            stack: manifest.project.stack.clone(),
            credentials: ProviderCredentials::load(),
            parallelism: manifest.settings.parallelism,
            refresh: manifest.settings.refresh,
            cancel: CancellationHandle::new(),
        }
    }

    /// Overrides the parallelism limit. Zero is raised to one.
    #[must_use]
    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism.max(1);
        self
    }

    /// Overrides the refresh flag.
    #[must_use]
    pub const fn with_refresh(mut self, refresh: bool) -> Self {
        self.refresh = refresh;
        self
    }

    /// Sets the credentials.
    #[must_use]
    pub fn with_credentials(mut self, credentials: ProviderCredentials) -> Self {
        self.credentials = credentials;
        self
    }

    /// Returns `project/stack`.
    #[must_use]
    pub fn stack_id(&self) -> String {
        format!("{}/{}", self.project, self.stack)
    }
}

/// Provider credentials. The token is never printed.
#[derive(Clone, Default)]
pub struct ProviderCredentials {
    token: Option<String>,
}

impl ProviderCredentials {
    /// Creates credentials from a token.
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: Some(token.into()),
        }
    }

    /// Reads the token from `STACKWRIGHT_PROVIDER_TOKEN`, falling back to
    /// `<config dir>/stackwright/credentials`.
    #[must_use]
    pub fn load() -> Self {
        if let Ok(token) = std::env::var(TOKEN_ENV_VAR) {
            debug!("Provider token read from environment");
            return Self::new(token);
        }

        let token = credentials_file()
            .and_then(|path| std::fs::read_to_string(path).ok())
            .map(|content| content.trim().to_string())
            .filter(|token| !token.is_empty());
        if token.is_some() {
            debug!("Provider token read from credentials file");
        }
        Self { token }
    }

    /// Returns the bearer token, if any.
    #[must_use]
    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }
}

impl std::fmt::Debug for ProviderCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderCredentials")
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

fn credentials_file() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("stackwright").join("credentials"))
}

/// Cloneable handle used to abort a run.
///
/// Cancelling stops new nodes from being scheduled. Calls already in flight
/// are allowed to finish.
#[derive(Debug, Clone)]
pub struct CancellationHandle {
    flag: Arc<AtomicBool>,
}

impl CancellationHandle {
    /// Creates a handle that is not cancelled.
    #[must_use]
    pub fn new() -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Signals cancellation.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Returns true once [`Self::cancel`] has been called.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

impl Default for CancellationHandle {
    fn default() -> Self {
        Self::new()
    }
}
