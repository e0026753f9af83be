//! In-process simulated cloud.
//!
//! Ids are deterministic (`{kind}-{seq:04}`, kind with hyphens) and so are the
//! outputs every kind exports. The whole cloud can be persisted to a JSON
//! file so that local runs survive between invocations. Tests use the call
//! journal to check ordering and call counts, and can inject failures per
//! logical name and operation.
//!
//! Lookups are answered from a small image catalog that is not part of the
//! persisted cloud and never counts as a managed resource.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, info};

use crate::config::ResourceKind;
use crate::context::RunContext;
use crate::error::{ProviderError, Result};

use super::types::{
    Outputs, Properties, Provider, ProviderOperation, ProviderResource, ProviderResult,
};

/// Phase of a journaled call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallPhase {
    /// The call was entered.
    Start,
    /// The call returned.
    Finish,
}

/// One journal entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallEvent {
    /// Global sequence number.
    pub seq: u64,
    /// Logical name (or id when the resource is unknown).
    pub name: String,
    /// Operation.
    pub operation: ProviderOperation,
    /// Start or finish.
    pub phase: CallPhase,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredResource {
    kind: ResourceKind,
    name: String,
    properties: Properties,
    outputs: Outputs,
    revision: u64,
}

/// An image the simulated cloud can find through a lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogImage {
    /// Image id.
    pub id: String,
    /// Image name matched by `name_pattern`.
    pub name: String,
    /// Owning account alias.
    pub owner: String,
    /// CPU architecture.
    pub architecture: String,
    /// RFC 3339 creation date; `most_recent` picks the greatest.
    pub creation_date: String,
}

impl CatalogImage {
    fn new(id: &str, name: &str, owner: &str, architecture: &str, creation_date: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            owner: owner.to_string(),
            architecture: architecture.to_string(),
            creation_date: creation_date.to_string(),
        }
    }
}

#[derive(Debug)]
struct Catalog(Vec<CatalogImage>);

impl Default for Catalog {
    fn default() -> Self {
        Self(vec![
            CatalogImage::new(
                "ami-0c1f3a8e5e0a10001",
                "amzn2-ami-ecs-hvm-2.0.20240109-x86_64-ebs",
                "amazon",
                "x86_64",
                "2024-01-09T00:00:00Z",
            ),
            CatalogImage::new(
                "ami-0c1f3a8e5e0a10002",
                "amzn2-ami-ecs-hvm-2.0.20240312-x86_64-ebs",
                "amazon",
                "x86_64",
                "2024-03-12T00:00:00Z",
            ),
            CatalogImage::new(
                "ami-0c1f3a8e5e0a10003",
                "amzn2-ami-ecs-hvm-2.0.20240312-arm64-ebs",
                "amazon",
                "arm64",
                "2024-03-12T00:00:00Z",
            ),
            CatalogImage::new(
                "ami-0c1f3a8e5e0a10004",
                "ubuntu/images/hvm-ssd/ubuntu-jammy-22.04-amd64-server-20240301",
                "099720109477",
                "x86_64",
                "2024-03-01T00:00:00Z",
            ),
        ])
    }
}

/// Image query parsed from lookup properties.
struct ImageFilter {
    owners: Vec<String>,
    pattern: glob::Pattern,
    most_recent: bool,
    architecture: Option<String>,
}

impl ImageFilter {
    fn from_query(query: &Properties) -> std::result::Result<Self, String> {
        let owners = query
            .get("owners")
            .and_then(Value::as_array)
            .map(|owners| owners.iter().filter_map(Value::as_str).map(str::to_string).collect())
            .unwrap_or_default();
        let pattern = query
            .get("name_pattern")
            .and_then(Value::as_str)
            .ok_or_else(|| String::from("name_pattern is required"))?;
        let pattern = glob::Pattern::new(pattern).map_err(|e| format!("invalid name_pattern: {e}"))?;

        Ok(Self {
            owners,
            pattern,
            most_recent: query.get("most_recent").and_then(Value::as_bool).unwrap_or(false),
            architecture: query
                .get("architecture")
                .and_then(Value::as_str)
                .map(str::to_string),
        })
    }

    fn matches(&self, image: &CatalogImage) -> bool {
        (self.owners.is_empty() || self.owners.contains(&image.owner))
            && self.pattern.matches(&image.name)
            && self.architecture.as_ref().is_none_or(|a| *a == image.architecture)
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Cloud {
    next_id: u64,
    resources: BTreeMap<String, StoredResource>,
}

/// Simulated provider.
#[derive(Debug, Default)]
pub struct MemoryProvider {
    cloud: Mutex<Cloud>,
    path: Option<PathBuf>,
    persist: tokio::sync::Mutex<()>,
    latency: Duration,
    failures: Mutex<HashSet<(String, ProviderOperation)>>,
    images: Mutex<Catalog>,
    journal: Mutex<Vec<CallEvent>>,
    seq: AtomicU64,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

fn guard<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MemoryProvider {
    /// Creates an empty, non-persistent cloud.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a cloud persisted at `path`, creating it on first save.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let cloud = if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            serde_json::from_str(&content).map_err(|e| ProviderError::InvalidResponse {
                message: format!("Simulated cloud file {} is corrupted: {e}", path.display()),
            })?
        } else {
            Cloud::default()
        };
        info!(
            "Simulated cloud loaded from {} ({} resources)",
            path.display(),
            cloud.resources.len()
        );

        Ok(Self {
            cloud: Mutex::new(cloud),
            path: Some(path),
            ..Self::default()
        })
    }

    /// Adds a fixed delay to every call.
    #[must_use]
    pub const fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Adds an image that lookups can find.
    pub fn add_image(&self, image: CatalogImage) {
        guard(&self.images).0.push(image);
    }

    /// Makes every `operation` on the resource named `name` fail.
    pub fn fail_on(&self, name: impl Into<String>, operation: ProviderOperation) {
        guard(&self.failures).insert((name.into(), operation));
    }

    /// Clears injected failures.
    pub fn clear_failures(&self) {
        guard(&self.failures).clear();
    }

    /// Number of calls made for an operation.
    #[must_use]
    pub fn calls(&self, operation: ProviderOperation) -> usize {
        guard(&self.journal)
            .iter()
            .filter(|e| e.operation == operation && e.phase == CallPhase::Start)
            .count()
    }

    /// Number of calls made for any operation.
    #[must_use]
    pub fn total_calls(&self) -> usize {
        guard(&self.journal)
            .iter()
            .filter(|e| e.phase == CallPhase::Start)
            .count()
    }

    /// Number of calls touching the named resource.
    #[must_use]
    pub fn calls_for(&self, name: &str) -> usize {
        guard(&self.journal)
            .iter()
            .filter(|e| e.name == name && e.phase == CallPhase::Start)
            .count()
    }

    /// The full call journal.
    #[must_use]
    pub fn events(&self) -> Vec<CallEvent> {
        guard(&self.journal).clone()
    }

    /// Sequence number of the first call started for `name`.
    #[must_use]
    pub fn started_at(&self, name: &str) -> Option<u64> {
        guard(&self.journal)
            .iter()
            .find(|e| e.name == name && e.phase == CallPhase::Start)
            .map(|e| e.seq)
    }

    /// Sequence number of the last call finished for `name`.
    #[must_use]
    pub fn finished_at(&self, name: &str) -> Option<u64> {
        guard(&self.journal)
            .iter()
            .rev()
            .find(|e| e.name == name && e.phase == CallPhase::Finish)
            .map(|e| e.seq)
    }

    /// Highest number of calls observed in flight at once.
    #[must_use]
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// Forgets the journal and counters.
    pub fn reset_journal(&self) {
        guard(&self.journal).clear();
        self.max_in_flight.store(0, Ordering::SeqCst);
    }

    /// Number of resources currently held.
    #[must_use]
    pub fn len(&self) -> usize {
        guard(&self.cloud).resources.len()
    }

    /// Returns true if the cloud holds no resources.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Looks up a resource by logical name.
    #[must_use]
    pub fn resource_by_name(&self, name: &str) -> Option<ProviderResource> {
        guard(&self.cloud)
            .resources
            .iter()
            .find(|(_, r)| r.name == name)
            .map(|(id, r)| to_resource(id, r))
    }

    /// Changes a property behind the engine's back.
    pub fn mutate_out_of_band(&self, name: &str, property: &str, value: Value) {
        let mut cloud = guard(&self.cloud);
        if let Some(resource) = cloud.resources.values_mut().find(|r| r.name == name) {
            resource.properties.insert(property.to_string(), value);
        }
    }

    /// Deletes a resource behind the engine's back.
    pub fn delete_out_of_band(&self, name: &str) {
        guard(&self.cloud).resources.retain(|_, r| r.name != name);
    }

    fn record(&self, name: &str, operation: ProviderOperation, phase: CallPhase) {
        let mut journal = guard(&self.journal);
        let seq = self.seq.fetch_add(1, Ordering::SeqCst);
        journal.push(CallEvent {
            seq,
            name: name.to_string(),
            operation,
            phase,
        });
    }

    async fn enter(&self, name: &str, operation: ProviderOperation) {
        self.record(name, operation, CallPhase::Start);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
    }

    fn leave(&self, name: &str, operation: ProviderOperation) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.record(name, operation, CallPhase::Finish);
    }

    fn injected(&self, kind: ResourceKind, name: &str, operation: ProviderOperation) -> ProviderResult<()> {
        if guard(&self.failures).contains(&(name.to_string(), operation)) {
            return Err(ProviderError::Rejected {
                operation: operation.to_string(),
                kind: kind.to_string(),
                name: name.to_string(),
                message: String::from("injected failure"),
            });
        }
        Ok(())
    }

    fn name_of(&self, id: &str) -> String {
        guard(&self.cloud)
            .resources
            .get(id)
            .map_or_else(|| id.to_string(), |r| r.name.clone())
    }

    async fn save(&self) -> ProviderResult<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let _write = self.persist.lock().await;
        let content = serde_json::to_string_pretty(&*guard(&self.cloud)).map_err(|e| {
            ProviderError::api_error(500, format!("Failed to serialize simulated cloud: {e}"))
        })?;

        let temp = path.with_extension("json.tmp");
        let persist_err =
            |e: std::io::Error| ProviderError::api_error(500, format!("Failed to persist simulated cloud: {e}"));
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(persist_err)?;
        }
        tokio::fs::write(&temp, content).await.map_err(persist_err)?;
        tokio::fs::rename(&temp, path).await.map_err(persist_err)?;
        debug!("Simulated cloud saved to {}", path.display());
        Ok(())
    }

    async fn create_inner(
        &self,
        kind: ResourceKind,
        name: &str,
        properties: &Properties,
    ) -> ProviderResult<ProviderResource> {
        self.injected(kind, name, ProviderOperation::Create)?;
        let resource = {
            let mut cloud = guard(&self.cloud);
            cloud.next_id += 1;
            let id = format!("{}-{:04}", kind.as_str().replace('_', "-"), cloud.next_id);
            let mut stored = StoredResource {
                kind,
                name: name.to_string(),
                properties: properties.clone(),
                outputs: Outputs::new(),
                revision: 1,
            };
            stored.outputs = outputs_for(&id, &stored);
            let resource = to_resource(&id, &stored);
            cloud.resources.insert(id, stored);
            resource
        };
        self.save().await?;
        Ok(resource)
    }

    async fn update_inner(
        &self,
        kind: ResourceKind,
        id: &str,
        name: &str,
        properties: &Properties,
    ) -> ProviderResult<ProviderResource> {
        self.injected(kind, name, ProviderOperation::Update)?;
        let resource = {
            let mut cloud = guard(&self.cloud);
            let stored = cloud
                .resources
                .get_mut(id)
                .filter(|r| r.kind == kind)
                .ok_or_else(|| ProviderError::NotFound {
                    kind: kind.to_string(),
                    id: id.to_string(),
                })?;
            stored.properties = properties.clone();
            stored.revision += 1;
            stored.outputs = outputs_for(id, stored);
            to_resource(id, stored)
        };
        self.save().await?;
        Ok(resource)
    }

    fn lookup_inner(
        &self,
        kind: ResourceKind,
        name: &str,
        query: &Properties,
    ) -> ProviderResult<Option<ProviderResource>> {
        self.injected(kind, name, ProviderOperation::Lookup)?;
        let failed = |message: String| ProviderError::LookupFailed {
            kind: kind.to_string(),
            name: name.to_string(),
            message,
        };
        if kind != ResourceKind::Image {
            return Err(failed(format!("the simulated cloud cannot look up {kind}")));
        }

        let filter = ImageFilter::from_query(query).map_err(failed)?;
        let images = guard(&self.images);
        let mut matches: Vec<&CatalogImage> = images.0.iter().filter(|i| filter.matches(i)).collect();
        matches.sort_by(|a, b| {
            a.creation_date
                .cmp(&b.creation_date)
                .then_with(|| a.id.cmp(&b.id))
        });

        let image = match matches.as_slice() {
            [] => return Ok(None),
            [only] => *only,
            [.., newest] if filter.most_recent => *newest,
            many => {
                return Err(failed(format!(
                    "{} images match; set most_recent to pick the newest",
                    many.len()
                )));
            }
        };
        debug!(name, image = %image.id, "Lookup matched");
        Ok(Some(image_resource(image)))
    }

    async fn delete_inner(&self, kind: ResourceKind, id: &str, name: &str) -> ProviderResult<()> {
        self.injected(kind, name, ProviderOperation::Delete)?;
        let removed = guard(&self.cloud).resources.remove(id).is_some();
        if removed {
            self.save().await?;
        }
        Ok(())
    }
}

fn to_resource(id: &str, stored: &StoredResource) -> ProviderResource {
    ProviderResource {
        id: id.to_string(),
        properties: stored.properties.clone(),
        outputs: stored.outputs.clone(),
    }
}

fn image_resource(image: &CatalogImage) -> ProviderResource {
    let kind = ResourceKind::Image;
    ProviderResource {
        id: image.id.clone(),
        properties: Properties::from([
            ("name".to_string(), Value::String(image.name.clone())),
            ("owner".to_string(), Value::String(image.owner.clone())),
            ("architecture".to_string(), Value::String(image.architecture.clone())),
            ("creation_date".to_string(), Value::String(image.creation_date.clone())),
        ]),
        outputs: Outputs::from([
            ("id".to_string(), Value::String(image.id.clone())),
            ("arn".to_string(), Value::String(format!("arn:stackwright:{kind}:{}", image.id))),
            ("name".to_string(), Value::String(image.name.clone())),
        ]),
    }
}

fn outputs_for(id: &str, stored: &StoredResource) -> Outputs {
    let kind = stored.kind;
    let display_name = stored
        .properties
        .get("name")
        .and_then(Value::as_str)
        .unwrap_or(&stored.name)
        .to_string();

    kind.outputs()
        .iter()
        .map(|&attribute| {
            let value = match attribute {
                "id" => Value::String(id.to_string()),
                "arn" => Value::String(format!("arn:stackwright:{kind}:{id}")),
                "name" => Value::String(display_name.clone()),
                "dns_name" => Value::String(format!("{display_name}-{id}.lb.stackwright.local")),
                "revision" => Value::from(stored.revision),
                other => stored.properties.get(other).cloned().unwrap_or(Value::Null),
            };
            (attribute.to_string(), value)
        })
        .collect()
}

#[async_trait]
impl Provider for MemoryProvider {
    async fn create(
        &self,
        _ctx: &RunContext,
        kind: ResourceKind,
        name: &str,
        properties: &Properties,
    ) -> ProviderResult<ProviderResource> {
        self.enter(name, ProviderOperation::Create).await;
        let result = self.create_inner(kind, name, properties).await;
        self.leave(name, ProviderOperation::Create);
        result
    }

    async fn read(
        &self,
        _ctx: &RunContext,
        kind: ResourceKind,
        id: &str,
    ) -> ProviderResult<Option<ProviderResource>> {
        let name = self.name_of(id);
        self.enter(&name, ProviderOperation::Read).await;
        let result = self.injected(kind, &name, ProviderOperation::Read).map(|()| {
            guard(&self.cloud)
                .resources
                .get(id)
                .filter(|r| r.kind == kind)
                .map(|r| to_resource(id, r))
        });
        self.leave(&name, ProviderOperation::Read);
        result
    }

    async fn update(
        &self,
        _ctx: &RunContext,
        kind: ResourceKind,
        id: &str,
        properties: &Properties,
    ) -> ProviderResult<ProviderResource> {
        let name = self.name_of(id);
        self.enter(&name, ProviderOperation::Update).await;
        let result = self.update_inner(kind, id, &name, properties).await;
        self.leave(&name, ProviderOperation::Update);
        result
    }

    async fn delete(&self, _ctx: &RunContext, kind: ResourceKind, id: &str) -> ProviderResult<()> {
        let name = self.name_of(id);
        self.enter(&name, ProviderOperation::Delete).await;
        let result = self.delete_inner(kind, id, &name).await;
        self.leave(&name, ProviderOperation::Delete);
        result
    }

    async fn lookup(
        &self,
        _ctx: &RunContext,
        kind: ResourceKind,
        name: &str,
        query: &Properties,
    ) -> ProviderResult<Option<ProviderResource>> {
        self.enter(name, ProviderOperation::Lookup).await;
        let result = self.lookup_inner(kind, name, query);
        self.leave(name, ProviderOperation::Lookup);
        result
    }

    fn name(&self) -> &'static str {
        "simulated"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn ctx() -> RunContext {
        RunContext::new("demo", "dev")
    }

    fn props(name: &str) -> Properties {
        Properties::from([("name".to_string(), json!(name))])
    }

    #[tokio::test]
    async fn test_deterministic_ids_and_outputs() {
        let cloud = MemoryProvider::new();
        let sg = cloud
            .create(&ctx(), ResourceKind::SecurityGroup, "web-sg", &Properties::new())
            .await
            .unwrap();
        let lb = cloud
            .create(&ctx(), ResourceKind::LoadBalancer, "lb", &props("front"))
            .await
            .unwrap();

        assert_eq!(sg.id, "security-group-0001");
        assert_eq!(sg.outputs["arn"], json!("arn:stackwright:security_group:security-group-0001"));
        assert_eq!(sg.outputs["name"], json!("web-sg"));
        assert_eq!(lb.id, "load-balancer-0002");
        assert_eq!(
            lb.outputs["dns_name"],
            json!("front-load-balancer-0002.lb.stackwright.local")
        );
    }

    #[tokio::test]
    async fn test_update_and_delete() {
        let cloud = MemoryProvider::new();
        let td = cloud
            .create(&ctx(), ResourceKind::TaskDefinition, "app", &props("x"))
            .await
            .unwrap();
        assert_eq!(td.outputs["revision"], json!(1));

        let updated = cloud
            .update(&ctx(), ResourceKind::TaskDefinition, &td.id, &props("y"))
            .await
            .unwrap();
        assert_eq!(updated.outputs["revision"], json!(2));

        cloud.delete(&ctx(), ResourceKind::TaskDefinition, &td.id).await.unwrap();
        assert!(cloud.is_empty());
        // Deleting again is not an error.
        cloud.delete(&ctx(), ResourceKind::TaskDefinition, &td.id).await.unwrap();

        let err = cloud
            .update(&ctx(), ResourceKind::TaskDefinition, &td.id, &props("z"))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::NotFound { .. }));
        assert_eq!(cloud.calls(ProviderOperation::Delete), 2);
    }

    #[tokio::test]
    async fn test_injected_failure() {
        let cloud = MemoryProvider::new();
        cloud.fail_on("vpc", ProviderOperation::Create);
        let err = cloud
            .create(&ctx(), ResourceKind::Network, "vpc", &Properties::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Rejected { .. }));
        assert_eq!(cloud.calls_for("vpc"), 1);
        assert!(cloud.is_empty());
    }

    #[tokio::test]
    async fn test_out_of_band_changes_visible_to_read() {
        let cloud = MemoryProvider::new();
        let vpc = cloud
            .create(&ctx(), ResourceKind::Network, "vpc", &Properties::new())
            .await
            .unwrap();
        cloud.mutate_out_of_band("vpc", "cidr_block", json!("10.9.0.0/16"));
        let read = cloud.read(&ctx(), ResourceKind::Network, &vpc.id).await.unwrap().unwrap();
        assert_eq!(read.properties["cidr_block"], json!("10.9.0.0/16"));

        cloud.delete_out_of_band("vpc");
        assert!(cloud.read(&ctx(), ResourceKind::Network, &vpc.id).await.unwrap().is_none());
    }

    fn image_query(pattern: &str, most_recent: bool) -> Properties {
        Properties::from([
            ("owners".to_string(), json!(["amazon"])),
            ("name_pattern".to_string(), json!(pattern)),
            ("most_recent".to_string(), json!(most_recent)),
        ])
    }

    #[tokio::test]
    async fn test_image_lookup_picks_newest() {
        let cloud = MemoryProvider::new();
        let image = cloud
            .lookup(
                &ctx(),
                ResourceKind::Image,
                "ecs-ami",
                &image_query("amzn2-ami-ecs-hvm-*-x86_64-*", true),
            )
            .await
            .unwrap()
            .unwrap();

        assert_eq!(image.id, "ami-0c1f3a8e5e0a10002");
        assert_eq!(image.outputs["name"], json!("amzn2-ami-ecs-hvm-2.0.20240312-x86_64-ebs"));
        assert!(cloud.is_empty());
        assert_eq!(cloud.calls(ProviderOperation::Lookup), 1);
    }

    #[tokio::test]
    async fn test_image_lookup_ambiguous_or_missing() {
        let cloud = MemoryProvider::new();
        let err = cloud
            .lookup(
                &ctx(),
                ResourceKind::Image,
                "ecs-ami",
                &image_query("amzn2-ami-ecs-hvm-*", false),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::LookupFailed { message, .. } if message.starts_with("3 images")));

        let none = cloud
            .lookup(&ctx(), ResourceKind::Image, "ecs-ami", &image_query("windows-*", true))
            .await
            .unwrap();
        assert!(none.is_none());

        cloud.add_image(CatalogImage::new("ami-custom", "windows-2022", "amazon", "x86_64", "2024-05-01T00:00:00Z"));
        let found = cloud
            .lookup(&ctx(), ResourceKind::Image, "ecs-ami", &image_query("windows-*", false))
            .await
            .unwrap();
        assert_eq!(found.unwrap().id, "ami-custom");
    }

    #[tokio::test]
    async fn test_persistence_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cloud.json");
        {
            let cloud = MemoryProvider::open(&path).unwrap();
            cloud
                .create(&ctx(), ResourceKind::Cluster, "cluster", &props("my-ecs-cluster"))
                .await
                .unwrap();
        }
        let reopened = MemoryProvider::open(&path).unwrap();
        let cluster = reopened.resource_by_name("cluster").unwrap();
        assert_eq!(cluster.id, "cluster-0001");

        let next = reopened
            .create(&ctx(), ResourceKind::Cluster, "other", &Properties::new())
            .await
            .unwrap();
        assert_eq!(next.id, "cluster-0002");
    }
}
