//! Provider boundary.
//!
//! The reconciler reaches the outside world only through the [`Provider`]
//! trait. Two implementations ship with the crate:
//! - `HttpProvider`: a generic REST control plane
//! - `MemoryProvider`: an in-process simulated cloud, optionally persisted

mod http;
mod memory;
mod types;

pub use http::HttpProvider;
pub use memory::{CallEvent, CallPhase, CatalogImage, MemoryProvider};
pub use types::{
    Outputs, Properties, Provider, ProviderOperation, ProviderResource, ProviderResult,
};

#[cfg(test)]
pub use types::MockProvider;

use std::sync::Arc;
use tracing::info;

use crate::config::{ProviderBackend, ProviderConfig};
use crate::error::{ConfigError, Result};

/// Builds the provider selected by the manifest.
///
/// # Errors
///
/// Returns an error if the http backend has no endpoint, the HTTP client
/// cannot be built, or the simulated cloud file is unreadable.
pub fn create_provider(config: &ProviderConfig) -> Result<Arc<dyn Provider>> {
    match config.backend {
        ProviderBackend::Http => {
            let endpoint = config.endpoint.as_deref().ok_or_else(|| {
                ConfigError::validation(
                    "provider.endpoint is required for the http backend",
                    "provider.endpoint",
                )
            })?;
            info!("Using HTTP provider at {endpoint}");
            Ok(Arc::new(HttpProvider::new(endpoint, config.timeout_secs)?))
        }
        ProviderBackend::Simulated => {
            let provider = match &config.path {
                Some(path) => MemoryProvider::open(path)?,
                None => MemoryProvider::new(),
            };
            info!("Using simulated provider");
            Ok(Arc::new(provider))
        }
    }
}
