//! Generic REST control-plane provider.
//!
//! Resources live under `{endpoint}/resources/{kind}`. Creates are `POST`s to
//! the collection; reads, updates and deletes address `/{id}`. Lookups are
//! `POST`s of a filter set to `{endpoint}/lookups/{kind}`. Only reads and
//! lookups are retried, and only on transport errors and rate limiting.

use async_trait::async_trait;
use reqwest::{Client, Method, Response, StatusCode, header};
use serde::Serialize;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, trace, warn};

use crate::config::ResourceKind;
use crate::context::RunContext;
use crate::error::{ProviderError, Result};

use super::types::{Properties, Provider, ProviderResource, ProviderResult};

/// Maximum attempts for a read.
const MAX_RETRIES: u32 = 3;

/// Base delay between read attempts.
const RETRY_DELAY_MS: u64 = 1000;

/// Upper bound on a single wait between read attempts.
const MAX_BACKOFF_SECS: u64 = 30;

/// Fallback wait when a 429 carries no usable `retry-after`.
const DEFAULT_RETRY_AFTER_SECS: u64 = 60;

/// REST provider client.
#[derive(Debug, Clone)]
pub struct HttpProvider {
    client: Client,
    endpoint: String,
    retry_delay: Duration,
    max_backoff: Duration,
}

#[derive(Debug, Serialize)]
struct CreateRequest<'a> {
    name: &'a str,
    properties: &'a Properties,
}

#[derive(Debug, Serialize)]
struct UpdateRequest<'a> {
    properties: &'a Properties,
}

#[derive(Debug, Serialize)]
struct LookupRequest<'a> {
    filters: &'a Properties,
}

impl HttpProvider {
    /// Creates a client for the given endpoint.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(endpoint: &str, timeout_secs: u64) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| ProviderError::network(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            retry_delay: Duration::from_millis(RETRY_DELAY_MS),
            max_backoff: Duration::from_secs(MAX_BACKOFF_SECS),
        })
    }

    /// Overrides the read retry timing.
    #[must_use]
    pub const fn with_backoff(mut self, base: Duration, max: Duration) -> Self {
        self.retry_delay = base;
        self.max_backoff = max;
        self
    }

    fn collection_url(&self, kind: ResourceKind) -> String {
        format!("{}/resources/{}", self.endpoint, kind.as_str())
    }

    fn resource_url(&self, kind: ResourceKind, id: &str) -> String {
        format!("{}/{id}", self.collection_url(kind))
    }

    async fn send<B: Serialize + Sync>(
        &self,
        ctx: &RunContext,
        method: Method,
        url: &str,
        body: Option<&B>,
    ) -> ProviderResult<Response> {
        trace!("{method} {url}");

        let mut request = self
            .client
            .request(method, url)
            .header(header::ACCEPT, "application/json");
        if let Some(token) = ctx.credentials.token() {
            request = request.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        request
            .send()
            .await
            .map_err(|e| ProviderError::network(format!("Request failed: {e}")))
    }

    async fn parse_resource(response: Response) -> ProviderResult<ProviderResource> {
        response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse {
                message: format!("Failed to parse response: {e}"),
            })
    }

    async fn read_once(
        &self,
        ctx: &RunContext,
        kind: ResourceKind,
        id: &str,
    ) -> ProviderResult<Option<ProviderResource>> {
        let response = self
            .send::<()>(ctx, Method::GET, &self.resource_url(kind, id), None)
            .await?;
        match check_status(response, kind, id).await {
            Ok(response) => Self::parse_resource(response).await.map(Some),
            Err(ProviderError::NotFound { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn lookup_once(
        &self,
        ctx: &RunContext,
        kind: ResourceKind,
        name: &str,
        query: &Properties,
    ) -> ProviderResult<Option<ProviderResource>> {
        let url = format!("{}/lookups/{}", self.endpoint, kind.as_str());
        let body = LookupRequest { filters: query };
        let response = self.send(ctx, Method::POST, &url, Some(&body)).await?;
        match check_status(response, kind, name).await {
            Ok(response) => Self::parse_resource(response).await.map(Some),
            Err(ProviderError::NotFound { .. }) => Ok(None),
            Err(ProviderError::Conflict { message }) => Err(ProviderError::LookupFailed {
                kind: kind.to_string(),
                name: name.to_string(),
                message,
            }),
            Err(e) => Err(e),
        }
    }

    /// Runs a read-only call, retrying transport errors and rate limits.
    async fn retrying<T, F, Fut>(&self, kind: ResourceKind, target: &str, mut call: F) -> ProviderResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ProviderResult<T>>,
    {
        let mut last_error: Option<ProviderError> = None;

        for attempt in 0..MAX_RETRIES {
            if attempt > 0 {
                let wait = last_error
                    .as_ref()
                    .and_then(ProviderError::retry_delay_secs)
                    .map_or(self.retry_delay * attempt, Duration::from_secs)
                    .min(self.max_backoff);
                debug!("Retry attempt {attempt} of {MAX_RETRIES} in {wait:?}");
                tokio::time::sleep(wait).await;
            }

            match call().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() => {
                    warn!(%kind, target, "Read failed, will retry: {e}");
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error.unwrap_or_else(|| ProviderError::network("Max retries exceeded")))
    }
}

#[async_trait]
impl Provider for HttpProvider {
    async fn create(
        &self,
        ctx: &RunContext,
        kind: ResourceKind,
        name: &str,
        properties: &Properties,
    ) -> ProviderResult<ProviderResource> {
        debug!(%kind, name, "Creating resource");
        let body = CreateRequest { name, properties };
        let response = self
            .send(ctx, Method::POST, &self.collection_url(kind), Some(&body))
            .await?;
        let response = check_status(response, kind, name).await?;
        Self::parse_resource(response).await
    }

    async fn read(
        &self,
        ctx: &RunContext,
        kind: ResourceKind,
        id: &str,
    ) -> ProviderResult<Option<ProviderResource>> {
        self.retrying(kind, id, || self.read_once(ctx, kind, id)).await
    }

    async fn lookup(
        &self,
        ctx: &RunContext,
        kind: ResourceKind,
        name: &str,
        query: &Properties,
    ) -> ProviderResult<Option<ProviderResource>> {
        debug!(%kind, name, "Looking up resource");
        self.retrying(kind, name, || self.lookup_once(ctx, kind, name, query))
            .await
    }

    async fn update(
        &self,
        ctx: &RunContext,
        kind: ResourceKind,
        id: &str,
        properties: &Properties,
    ) -> ProviderResult<ProviderResource> {
        debug!(%kind, id, "Updating resource");
        let body = UpdateRequest { properties };
        let response = self
            .send(ctx, Method::PUT, &self.resource_url(kind, id), Some(&body))
            .await?;
        let response = check_status(response, kind, id).await?;
        Self::parse_resource(response).await
    }

    async fn delete(&self, ctx: &RunContext, kind: ResourceKind, id: &str) -> ProviderResult<()> {
        debug!(%kind, id, "Deleting resource");
        let response = self
            .send::<()>(ctx, Method::DELETE, &self.resource_url(kind, id), None)
            .await?;
        match check_status(response, kind, id).await {
            Ok(_) => Ok(()),
            Err(ProviderError::NotFound { .. }) => {
                debug!(%kind, id, "Resource already gone");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    fn name(&self) -> &'static str {
        "http"
    }
}

/// Maps non-success statuses onto provider errors.
async fn check_status(response: Response, kind: ResourceKind, id: &str) -> ProviderResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    match status {
        StatusCode::TOO_MANY_REQUESTS => {
            let retry_after = response
                .headers()
                .get(header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse().ok())
                .filter(|secs| *secs > 0)
                .unwrap_or(DEFAULT_RETRY_AFTER_SECS);
            Err(ProviderError::RateLimited {
                retry_after_secs: retry_after,
            })
        }
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            Err(ProviderError::AuthenticationFailed {
                message: format!("{status} from provider"),
            })
        }
        StatusCode::NOT_FOUND => Err(ProviderError::NotFound {
            kind: kind.to_string(),
            id: id.to_string(),
        }),
        StatusCode::CONFLICT => Err(ProviderError::Conflict {
            message: response.text().await.unwrap_or_default(),
        }),
        _ => {
            let body = response.text().await.unwrap_or_default();
            Err(ProviderError::api_error(status.as_u16(), body))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ProviderCredentials;
    use serde_json::json;
    use wiremock::matchers::{body_json, header as header_eq, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider(server: &MockServer) -> HttpProvider {
        HttpProvider::new(&server.uri(), 5)
            .unwrap()
            .with_backoff(Duration::from_millis(5), Duration::from_millis(20))
    }

    fn ctx() -> RunContext {
        RunContext::new("demo", "dev").with_credentials(ProviderCredentials::new("tok"))
    }

    fn props() -> Properties {
        Properties::from([("cidr_block".to_string(), json!("10.0.0.0/16"))])
    }

    #[tokio::test]
    async fn test_create_sends_name_properties_and_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/resources/network"))
            .and(header_eq("authorization", "Bearer tok"))
            .and(body_json(json!({
                "name": "vpc",
                "properties": { "cidr_block": "10.0.0.0/16" }
            })))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "id": "vpc-123",
                "properties": { "cidr_block": "10.0.0.0/16" },
                "outputs": { "id": "vpc-123", "arn": "arn:x" }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let resource = provider(&server)
            .create(&ctx(), ResourceKind::Network, "vpc", &props())
            .await
            .unwrap();
        assert_eq!(resource.id, "vpc-123");
        assert_eq!(resource.outputs["arn"], json!("arn:x"));
    }

    #[tokio::test]
    async fn test_status_mapping() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/resources/network/a"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/resources/network/b"))
            .respond_with(ResponseTemplate::new(409).set_body_string("in use"))
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/resources/network/c"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/resources/network/d"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let p = provider(&server);
        let update = |id: &'static str| {
            let p = p.clone();
            async move { p.update(&ctx(), ResourceKind::Network, id, &props()).await }
        };

        assert!(matches!(
            update("a").await,
            Err(ProviderError::AuthenticationFailed { .. })
        ));
        assert_eq!(
            update("b").await,
            Err(ProviderError::Conflict {
                message: "in use".into()
            })
        );
        assert_eq!(update("c").await, Err(ProviderError::api_error(500, "boom")));
        assert!(matches!(
            update("d").await,
            Err(ProviderError::InvalidResponse { .. })
        ));
    }

    #[tokio::test]
    async fn test_read_missing_is_none() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/resources/cluster/c-1"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let found = provider(&server)
            .read(&ctx(), ResourceKind::Cluster, "c-1")
            .await
            .unwrap();
        assert!(found.is_none());
    }

    #[tokio::test]
    async fn test_read_retries_rate_limit() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/resources/cluster/c-1"))
            .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "1"))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/resources/cluster/c-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "c-1" })))
            .mount(&server)
            .await;

        let found = provider(&server)
            .read(&ctx(), ResourceKind::Cluster, "c-1")
            .await
            .unwrap();
        assert_eq!(found.unwrap().id, "c-1");
    }

    #[tokio::test]
    async fn test_rate_limit_waits_for_retry_after() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/resources/cluster/c-1"))
            .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "1"))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/resources/cluster/c-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "c-1" })))
            .mount(&server)
            .await;

        let started = std::time::Instant::now();
        HttpProvider::new(&server.uri(), 5)
            .unwrap()
            .with_backoff(Duration::from_millis(5), Duration::from_secs(5))
            .read(&ctx(), ResourceKind::Cluster, "c-1")
            .await
            .unwrap();
        assert!(started.elapsed() >= Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_lookup_posts_filters() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/lookups/image"))
            .and(body_json(json!({ "filters": { "name_pattern": "amzn2-*" } })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "ami-1",
                "outputs": { "id": "ami-1" }
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/lookups/image"))
            .and(body_json(json!({ "filters": { "name_pattern": "none-*" } })))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let p = provider(&server);
        let query = |pattern: &str| Properties::from([("name_pattern".to_string(), json!(pattern))]);
        let found = p
            .lookup(&ctx(), ResourceKind::Image, "ami", &query("amzn2-*"))
            .await
            .unwrap();
        assert_eq!(found.unwrap().id, "ami-1");
        let missing = p
            .lookup(&ctx(), ResourceKind::Image, "ami", &query("none-*"))
            .await
            .unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn test_create_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/resources/cluster"))
            .respond_with(ResponseTemplate::new(429))
            .expect(1)
            .mount(&server)
            .await;

        let err = provider(&server)
            .create(&ctx(), ResourceKind::Cluster, "cluster", &props())
            .await
            .unwrap_err();
        assert_eq!(
            err,
            ProviderError::RateLimited {
                retry_after_secs: DEFAULT_RETRY_AFTER_SECS
            }
        );
    }

    #[tokio::test]
    async fn test_delete_treats_not_found_as_done() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/resources/subnet/s-1"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        provider(&server)
            .delete(&ctx(), ResourceKind::Subnet, "s-1")
            .await
            .unwrap();
    }
}
