//! Reconciler for converging provisioned resources towards the manifest.
//!
//! A run has two passes. The delete pass removes records whose declaration
//! is gone, dependents first. The forward pass walks the dependency graph:
//! a node is scheduled once every dependency is `Applied`, up to
//! `parallelism` provider calls are in flight, and a failure fails every
//! transitive dependent without calling the provider for them.
//!
//! The scheduling loop owns the [`DeploymentState`]. Provider calls run in
//! spawned tasks that hand back their outcome; the loop folds each outcome
//! into state and persists it before looking at the next one.

use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use tokio::task::{Id, JoinSet};
use tracing::{debug, error, info, warn};

use crate::config::{ConfigHasher, Manifest, ResourceKind};
use crate::context::RunContext;
use crate::error::{ReconcileError, Result, StackError};
use crate::graph::DependencyGraph;
use crate::planner::{
    DeploymentPlan, DiffEngine, DiffType, DriftEntry, NodeExecutor, NodeTask, Resolver,
    delete_order, orphans_in_delete_order,
};
use crate::provider::Provider;
use crate::state::{DeploymentState, RunHistoryEntry, RunOperation, StateRecord, StateStore};

/// Lifecycle of a node within one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    /// Not started.
    Pending,
    /// Provider call in flight.
    InProgress,
    /// Reached the declared state.
    Applied,
    /// Did not reach the declared state.
    Failed,
}

impl NodeStatus {
    /// Returns true for `Applied` and `Failed`.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Applied | Self::Failed)
    }

    const fn can_become(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::InProgress | Self::Failed)
                | (Self::InProgress, Self::Applied | Self::Failed)
        )
    }
}

impl std::fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::InProgress => "in progress",
            Self::Applied => "applied",
            Self::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// Final outcome of one node.
#[derive(Debug, Clone, Serialize)]
pub struct NodeReport {
    /// Logical name.
    pub name: String,
    /// Resource kind.
    pub kind: ResourceKind,
    /// Action taken, if the node got far enough to be classified.
    pub action: Option<DiffType>,
    /// Final status.
    pub status: NodeStatus,
    /// Provider id after the run, if any.
    pub provider_id: Option<String>,
    /// Error for failed nodes.
    pub error: Option<String>,
}

impl NodeReport {
    fn new(name: &str, kind: ResourceKind, action: Option<DiffType>, provider_id: Option<String>) -> Self {
        Self {
            name: name.to_string(),
            kind,
            action,
            status: NodeStatus::Pending,
            provider_id,
            error: None,
        }
    }

    fn transition(&mut self, next: NodeStatus) -> bool {
        if self.status.can_become(next) {
            self.status = next;
            true
        } else {
            debug!("Ignoring {} -> {next} for {}", self.status, self.name);
            false
        }
    }

    fn fail(&mut self, message: impl Into<String>) {
        if self.transition(NodeStatus::Failed) {
            self.error = Some(message.into());
        }
    }
}

/// Summary of an apply or destroy run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    /// Kind of run.
    pub operation: RunOperation,
    /// Every node touched by the run: deletes first, then graph order.
    pub nodes: Vec<NodeReport>,
    /// Whether the operator aborted the run.
    pub cancelled: bool,
    /// Stack outputs after the run.
    pub outputs: BTreeMap<String, Value>,
}

impl RunReport {
    /// Returns true if every node was applied.
    #[must_use]
    pub fn success(&self) -> bool {
        self.nodes.iter().all(|n| n.status == NodeStatus::Applied)
    }

    /// Number of applied nodes.
    #[must_use]
    pub fn applied_count(&self) -> usize {
        self.nodes.iter().filter(|n| n.status == NodeStatus::Applied).count()
    }

    /// Number of failed nodes.
    #[must_use]
    pub fn failed_count(&self) -> usize {
        self.nodes.iter().filter(|n| n.status == NodeStatus::Failed).count()
    }

    /// Number of applied nodes that called the provider.
    #[must_use]
    pub fn changed_count(&self) -> usize {
        self.nodes
            .iter()
            .filter(|n| n.status == NodeStatus::Applied && n.action.is_some_and(DiffType::is_change))
            .count()
    }

    /// Looks up a node by name.
    #[must_use]
    pub fn node(&self, name: &str) -> Option<&NodeReport> {
        self.nodes.iter().find(|n| n.name == name)
    }

    /// Process exit code: 0 when every node is applied, 1 otherwise.
    #[must_use]
    pub fn exit_code(&self) -> u8 {
        u8::from(!self.success())
    }
}

impl std::fmt::Display for RunReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let status = if self.success() { "complete" } else { "failed" };
        write!(
            f,
            "{} {status}: {} applied ({} changed), {} failed",
            self.operation,
            self.applied_count(),
            self.changed_count(),
            self.failed_count()
        )?;
        if self.cancelled {
            write!(f, " (cancelled)")?;
        }
        Ok(())
    }
}

/// Result of a read-only refresh over every record.
#[derive(Debug, Clone, Serialize)]
pub struct DriftReport {
    /// One entry per record, sorted by name.
    pub entries: Vec<DriftEntry>,
}

impl DriftReport {
    /// Returns true if any record disagrees with the provider.
    #[must_use]
    pub fn has_drift(&self) -> bool {
        self.entries.iter().any(DriftEntry::is_drifted)
    }

    /// Records that disagree with the provider.
    pub fn drifted(&self) -> impl Iterator<Item = &DriftEntry> {
        self.entries.iter().filter(|e| e.is_drifted())
    }
}

impl std::fmt::Display for DriftReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if !self.has_drift() {
            return write!(f, "No drift detected - {} records in sync", self.entries.len());
        }
        writeln!(f, "Drift detected:")?;
        for entry in self.drifted() {
            writeln!(f, "  - {}: {}", entry.name, entry.status)?;
        }
        Ok(())
    }
}

/// Drives plan, apply, destroy and drift checks for one stack.
pub struct Reconciler {
    ctx: RunContext,
    store: Arc<dyn StateStore>,
    executor: NodeExecutor,
    hasher: ConfigHasher,
    diff_engine: DiffEngine,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("stack", &self.ctx.stack_id())
            .field("store", &self.store.backend_type())
            .field("parallelism", &self.ctx.parallelism)
            .finish_non_exhaustive()
    }
}

impl Reconciler {
    /// Creates a reconciler.
    #[must_use]
    pub fn new(ctx: RunContext, provider: Arc<dyn Provider>, store: Arc<dyn StateStore>) -> Self {
        Self {
            executor: NodeExecutor::new(provider, ctx.clone()),
            ctx,
            store,
            hasher: ConfigHasher::new(),
            diff_engine: DiffEngine::new(),
        }
    }

    /// The run context.
    #[must_use]
    pub const fn context(&self) -> &RunContext {
        &self.ctx
    }

    /// The state store this reconciler writes to.
    #[must_use]
    pub const fn store(&self) -> &Arc<dyn StateStore> {
        &self.store
    }

    /// Loads state for this stack, or an empty one.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails or the state belongs to another
    /// project or stack.
    pub async fn load_state(&self) -> Result<DeploymentState> {
        match self.store.load().await? {
            Some(state) => {
                state.check_identity(&self.ctx.project, &self.ctx.stack)?;
                Ok(state)
            }
            None => Ok(DeploymentState::new(&self.ctx.project, &self.ctx.stack)),
        }
    }

    /// Computes what apply would do, without mutating anything.
    ///
    /// # Errors
    ///
    /// Returns an error if state cannot be loaded.
    pub async fn plan(&self, manifest: &Manifest, graph: &DependencyGraph) -> Result<DeploymentPlan> {
        let state = self.load_state().await?;
        let manifest_hash = self.hasher.hash_manifest(manifest);
        let mut plan = DeploymentPlan::build(graph, &state, &manifest_hash, &self.diff_engine);

        if self.ctx.refresh {
            plan.conflicts = self.drift_entries(&state).await.into_iter().filter(DriftEntry::is_drifted).collect();
        }

        info!("Plan for {}: {}", self.ctx.stack_id(), plan.summary());
        Ok(plan)
    }

    /// Reconciles the stack towards `manifest`.
    ///
    /// Per-node failures are reported in the returned [`RunReport`].
    ///
    /// # Errors
    ///
    /// Returns an error only for fatal problems: state that cannot be loaded
    /// or saved.
    pub async fn apply(&self, manifest: &Manifest, graph: &DependencyGraph) -> Result<RunReport> {
        let manifest_hash = self.hasher.hash_manifest(manifest);
        let mut state = self.load_state().await?;
        info!(
            "Applying {} ({} resources, {} recorded, parallelism {})",
            self.ctx.stack_id(),
            graph.len(),
            state.records.len(),
            self.ctx.parallelism
        );

        let orphans: Vec<StateRecord> = orphans_in_delete_order(graph, &state)
            .into_iter()
            .cloned()
            .collect();
        if !orphans.is_empty() {
            info!("Deleting {} resources removed from the manifest", orphans.len());
        }
        let mut nodes = self.delete_pass(&mut state, orphans).await?;
        nodes.extend(self.forward_pass(&mut state, graph).await?);

        let failed: HashSet<&str> = nodes
            .iter()
            .filter(|n| n.status == NodeStatus::Failed)
            .map(|n| n.name.as_str())
            .collect();
        state.outputs = resolve_outputs(manifest, &state.records, &failed);

        let report = RunReport {
            operation: RunOperation::Apply,
            cancelled: self.ctx.cancel.is_cancelled(),
            outputs: state.outputs.clone(),
            nodes,
        };
        self.finish(&mut state, &report, &manifest_hash).await?;
        Ok(report)
    }

    /// Deletes every recorded resource, dependents first.
    ///
    /// # Errors
    ///
    /// Returns an error only if state cannot be loaded or saved.
    pub async fn destroy(&self, manifest_hash: &str) -> Result<RunReport> {
        let mut state = self.load_state().await?;
        info!("Destroying {} ({} records)", self.ctx.stack_id(), state.records.len());

        let records: Vec<&StateRecord> = state.records.values().collect();
        let ordered: Vec<StateRecord> = delete_order(&records).into_iter().cloned().collect();
        let nodes = self.delete_pass(&mut state, ordered).await?;

        if state.records.is_empty() {
            state.outputs.clear();
        }

        let report = RunReport {
            operation: RunOperation::Destroy,
            cancelled: self.ctx.cancel.is_cancelled(),
            outputs: state.outputs.clone(),
            nodes,
        };
        self.finish(&mut state, &report, manifest_hash).await?;
        Ok(report)
    }

    /// Reads every record from the provider and reports disagreements.
    ///
    /// # Errors
    ///
    /// Returns an error if state cannot be loaded.
    pub async fn check_drift(&self) -> Result<DriftReport> {
        let state = self.load_state().await?;
        info!("Checking drift for {} ({} records)", self.ctx.stack_id(), state.records.len());
        Ok(DriftReport {
            entries: self.drift_entries(&state).await,
        })
    }

    async fn drift_entries(&self, state: &DeploymentState) -> Vec<DriftEntry> {
        let mut entries = Vec::with_capacity(state.records.len());
        for record in state.records.values().filter(|r| !r.kind.is_lookup()) {
            entries.push(self.executor.check(record).await);
        }
        entries
    }

    async fn finish(&self, state: &mut DeploymentState, report: &RunReport, manifest_hash: &str) -> Result<()> {
        state.add_history(RunHistoryEntry::new(
            report.operation,
            manifest_hash,
            report.applied_count(),
            report.failed_count(),
        ));
        self.store.save(state).await?;

        if report.success() {
            info!("{report}");
        } else {
            warn!("{report}");
        }
        Ok(())
    }

    fn prepare(&self, graph: &DependencyGraph, index: usize, state: &DeploymentState) -> Result<NodeTask> {
        let decl = graph.node(index);
        let resolved = Resolver::strict(&state.records).resolve(&decl.name, &decl.properties)?;
        let record = state.get_record(&decl.name).cloned();
        let diff = self.diff_engine.diff_node(
            &decl.name,
            decl.kind,
            &resolved.properties,
            &resolved.unknown,
            record.as_ref(),
        );

        Ok(NodeTask {
            name: decl.name.clone(),
            kind: decl.kind,
            action: diff.diff_type,
            hash: diff.new_hash.unwrap_or_default(),
            properties: resolved.properties,
            dependencies: graph.dependency_names(index),
            record,
        })
    }

    async fn forward_pass(&self, state: &mut DeploymentState, graph: &DependencyGraph) -> Result<Vec<NodeReport>> {
        let mut reports: Vec<NodeReport> = graph
            .declarations()
            .iter()
            .map(|d| {
                let provider_id = state.get_record(&d.name).map(|r| r.provider_id.clone());
                NodeReport::new(&d.name, d.kind, None, provider_id)
            })
            .collect();
        let mut waiting: Vec<usize> = (0..graph.len()).map(|i| graph.dependencies(i).len()).collect();
        let mut ready: BTreeSet<usize> = (0..graph.len()).filter(|&i| waiting[i] == 0).collect();

        let mut tasks: JoinSet<Result<StateRecord>> = JoinSet::new();
        let mut running: HashMap<Id, usize> = HashMap::new();

        loop {
            while tasks.len() < self.ctx.parallelism && !self.ctx.cancel.is_cancelled() {
                let Some(index) = ready.pop_first() else {
                    break;
                };
                reports[index].transition(NodeStatus::InProgress);

                let task = match self.prepare(graph, index, state) {
                    Ok(task) => task,
                    Err(e) => {
                        error!("{}: {e}", graph.name(index));
                        fail_with_dependents(graph, &mut reports, index, e.to_string());
                        continue;
                    }
                };
                reports[index].action = Some(task.action);

                if task.action == DiffType::NoChange && !self.ctx.refresh {
                    debug!("{} is up to date", task.name);
                    if let Some(record) = &task.record {
                        if record.dependencies != task.dependencies {
                            let mut record = record.clone();
                            record.dependencies = task.dependencies;
                            state.set_record(record);
                            if let Err(e) = self.store.save(state).await {
                                return Err(drain(&mut tasks, e).await);
                            }
                        }
                    }
                    reports[index].transition(NodeStatus::Applied);
                    release(graph, &reports, &mut waiting, &mut ready, index);
                    continue;
                }

                debug!("Scheduling {} ({})", task.name, task.action);
                let executor = self.executor.clone();
                let handle = tasks.spawn(async move { executor.apply(task).await });
                running.insert(handle.id(), index);
            }

            let Some(joined) = tasks.join_next_with_id().await else {
                break;
            };
            let (id, outcome) = match joined {
                Ok((id, outcome)) => (id, outcome),
                Err(e) => (e.id(), Err(StackError::internal(format!("provider task failed: {e}")))),
            };
            let Some(index) = running.remove(&id) else {
                warn!("Finished task {id} is not tracked");
                continue;
            };

            match outcome {
                Ok(mut record) => {
                    record.dependencies = graph.dependency_names(index);
                    reports[index].provider_id = Some(record.provider_id.clone());
                    state.set_record(record);
                    if let Err(e) = self.store.save(state).await {
                        return Err(drain(&mut tasks, e).await);
                    }
                    reports[index].transition(NodeStatus::Applied);
                    release(graph, &reports, &mut waiting, &mut ready, index);
                }
                Err(e) => {
                    if let StackError::Reconcile(ReconcileError::ReplaceIncomplete { resource, deleted_id, .. }) = &e {
                        warn!("Forgetting {resource}: {deleted_id} is gone and nothing replaced it");
                        state.remove_record(resource);
                        reports[index].provider_id = None;
                        if let Err(e) = self.store.save(state).await {
                            return Err(drain(&mut tasks, e).await);
                        }
                    }
                    fail_with_dependents(graph, &mut reports, index, e.to_string());
                }
            }
        }

        self.close_unstarted(&mut reports);
        Ok(reports)
    }

    async fn delete_pass(&self, state: &mut DeploymentState, records: Vec<StateRecord>) -> Result<Vec<NodeReport>> {
        let positions: HashMap<&str, usize> = records
            .iter()
            .enumerate()
            .map(|(i, r)| (r.name.as_str(), i))
            .collect();
        // `dependencies[i]` are the records that `records[i]` depends on and
        // that may only go once `records[i]` is gone.
        let dependencies: Vec<Vec<usize>> = records
            .iter()
            .enumerate()
            .map(|(i, r)| {
                let mut deps: Vec<usize> = r
                    .dependencies
                    .iter()
                    .filter_map(|d| positions.get(d.as_str()).copied())
                    .filter(|&d| d != i)
                    .collect();
                deps.sort_unstable();
                deps.dedup();
                deps
            })
            .collect();

        let mut blocked_by = vec![0usize; records.len()];
        for deps in &dependencies {
            for &d in deps {
                blocked_by[d] += 1;
            }
        }

        let mut reports: Vec<NodeReport> = records
            .iter()
            .map(|r| NodeReport::new(&r.name, r.kind, Some(DiffType::Delete), Some(r.provider_id.clone())))
            .collect();
        let mut ready: BTreeSet<usize> = (0..records.len()).filter(|&i| blocked_by[i] == 0).collect();

        let mut tasks: JoinSet<Result<()>> = JoinSet::new();
        let mut running: HashMap<Id, usize> = HashMap::new();

        loop {
            while tasks.len() < self.ctx.parallelism && !self.ctx.cancel.is_cancelled() {
                let Some(index) = ready.pop_first() else {
                    break;
                };
                reports[index].transition(NodeStatus::InProgress);
                let executor = self.executor.clone();
                let record = records[index].clone();
                let handle = tasks.spawn(async move { executor.delete(&record).await });
                running.insert(handle.id(), index);
            }

            let Some(joined) = tasks.join_next_with_id().await else {
                break;
            };
            let (id, outcome) = match joined {
                Ok((id, outcome)) => (id, outcome),
                Err(e) => (e.id(), Err(StackError::internal(format!("provider task failed: {e}")))),
            };
            let Some(index) = running.remove(&id) else {
                warn!("Finished task {id} is not tracked");
                continue;
            };

            match outcome {
                Ok(()) => {
                    state.remove_record(&records[index].name);
                    if let Err(e) = self.store.save(state).await {
                        return Err(drain(&mut tasks, e).await);
                    }
                    reports[index].provider_id = None;
                    reports[index].transition(NodeStatus::Applied);
                    for &d in &dependencies[index] {
                        blocked_by[d] -= 1;
                        if blocked_by[d] == 0 && reports[d].status == NodeStatus::Pending {
                            ready.insert(d);
                        }
                    }
                }
                Err(e) => {
                    reports[index].fail(e.to_string());
                    let reason = ReconcileError::DependentFailed {
                        dependent: records[index].name.clone(),
                    }
                    .to_string();
                    let mut stack = dependencies[index].clone();
                    while let Some(d) = stack.pop() {
                        if reports[d].status == NodeStatus::Pending {
                            warn!("Keeping {}: {reason}", records[d].name);
                            reports[d].fail(reason.clone());
                            ready.remove(&d);
                            stack.extend(dependencies[d].iter().copied());
                        }
                    }
                }
            }
        }

        self.close_unstarted(&mut reports);
        Ok(reports)
    }

    fn close_unstarted(&self, reports: &mut [NodeReport]) {
        let reason = if self.ctx.cancel.is_cancelled() {
            "run cancelled"
        } else {
            "never scheduled"
        };
        for report in reports.iter_mut().filter(|r| r.status == NodeStatus::Pending) {
            report.fail(
                ReconcileError::Aborted {
                    reason: reason.to_string(),
                }
                .to_string(),
            );
        }
    }
}

/// Waits for provider calls still in flight, then hands back `error`.
///
/// Used when state can no longer be saved. Nothing new is scheduled, but
/// calls already issued run to completion.
async fn drain<T: 'static>(tasks: &mut JoinSet<T>, error: StackError) -> StackError {
    error!("Could not save state, waiting for {} in-flight calls: {error}", tasks.len());
    while let Some(joined) = tasks.join_next().await {
        if let Err(e) = joined {
            warn!("Provider task failed while draining: {e}");
        }
    }
    error
}

/// Marks `index` failed and every transitive dependent failed with a reason
/// naming it.
fn fail_with_dependents(graph: &DependencyGraph, reports: &mut [NodeReport], index: usize, message: String) {
    reports[index].fail(message);
    let reason = ReconcileError::DependencyFailed {
        dependency: graph.name(index).to_string(),
    }
    .to_string();
    for dependent in graph.dependents_of(index) {
        if reports[dependent].status == NodeStatus::Pending {
            reports[dependent].fail(reason.clone());
        }
    }
}

/// Counts `index` as applied for its dependents and queues those that are
/// now unblocked.
fn release(
    graph: &DependencyGraph,
    reports: &[NodeReport],
    waiting: &mut [usize],
    ready: &mut BTreeSet<usize>,
    index: usize,
) {
    for &dependent in graph.direct_dependents(index) {
        waiting[dependent] -= 1;
        if waiting[dependent] == 0 && reports[dependent].status == NodeStatus::Pending {
            ready.insert(dependent);
        }
    }
}

/// Resolves stack outputs against the records. Outputs that reference a
/// failed node, or cannot be resolved, are omitted.
fn resolve_outputs(
    manifest: &Manifest,
    records: &BTreeMap<String, StateRecord>,
    failed: &HashSet<&str>,
) -> BTreeMap<String, Value> {
    let resolver = Resolver::strict(records);
    manifest
        .outputs
        .iter()
        .filter_map(|output| {
            if let Some(r) = output
                .value
                .references()
                .into_iter()
                .find(|r| failed.contains(r.resource.as_str()))
            {
                warn!("Omitting output '{}': '{}' failed", output.name, r.resource);
                return None;
            }
            match resolver.resolve_value(&output.name, &output.value) {
                Ok(value) => Some((output.name.clone(), value)),
                Err(e) => {
                    warn!("Omitting output '{}': {e}", output.name);
                    None
                }
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PropertyValue, ResourceDeclaration};
    use crate::error::ProviderError;
    use crate::error::StateError;
    use crate::provider::{MemoryProvider, MockProvider, Outputs, Properties, ProviderResource};
    use crate::state::{LocalStateStore, LockInfo};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tempfile::TempDir;

    /// Local store whose saves start failing after `allowed` successes.
    struct FullDisk {
        inner: LocalStateStore,
        allowed: AtomicUsize,
    }

    #[async_trait]
    impl StateStore for FullDisk {
        async fn load(&self) -> Result<Option<DeploymentState>> {
            self.inner.load().await
        }

        async fn save(&self, state: &DeploymentState) -> Result<()> {
            let left = self.allowed.load(Ordering::SeqCst);
            if left == 0 {
                return Err(StateError::write("no space left on device").into());
            }
            self.allowed.store(left - 1, Ordering::SeqCst);
            self.inner.save(state).await
        }

        async fn delete(&self) -> Result<()> {
            self.inner.delete().await
        }

        async fn exists(&self) -> Result<bool> {
            self.inner.exists().await
        }

        async fn acquire_lock(&self, holder: &str) -> Result<LockInfo> {
            self.inner.acquire_lock(holder).await
        }

        async fn refresh_lock(&self, lock_id: &str) -> Result<LockInfo> {
            self.inner.refresh_lock(lock_id).await
        }

        async fn release_lock(&self, lock_id: &str) -> Result<()> {
            self.inner.release_lock(lock_id).await
        }

        async fn get_lock_info(&self) -> Result<Option<LockInfo>> {
            self.inner.get_lock_info().await
        }

        async fn is_locked(&self) -> Result<bool> {
            self.inner.is_locked().await
        }

        fn backend_type(&self) -> &'static str {
            "full-disk"
        }
    }

    fn decl(index: usize, name: &str, properties: &[(&str, &str)]) -> ResourceDeclaration {
        ResourceDeclaration {
            index,
            name: name.to_string(),
            kind: ResourceKind::Network,
            properties: properties
                .iter()
                .map(|(k, v)| ((*k).to_string(), PropertyValue::parse_string(v).unwrap()))
                .collect(),
            depends_on: vec![],
        }
    }

    fn reconciler(mock: MockProvider, temp: &TempDir) -> Reconciler {
        Reconciler::new(
            RunContext::new("demo", "dev"),
            Arc::new(mock),
            Arc::new(LocalStateStore::with_base_dir(temp.path())),
        )
    }

    #[test]
    fn test_status_transitions() {
        assert!(NodeStatus::Pending.can_become(NodeStatus::InProgress));
        assert!(NodeStatus::Pending.can_become(NodeStatus::Failed));
        assert!(!NodeStatus::Pending.can_become(NodeStatus::Applied));
        assert!(!NodeStatus::Applied.can_become(NodeStatus::Failed));
        assert!(!NodeStatus::Failed.can_become(NodeStatus::InProgress));
        assert!(NodeStatus::Failed.is_terminal());
    }

    #[tokio::test]
    async fn test_failed_create_skips_dependents() {
        let mut mock = MockProvider::new();
        mock.expect_create()
            .withf(|_, _, name, _| name == "a")
            .times(1)
            .returning(|_, _, _, _| Err(ProviderError::api_error(500, "boom")));
        mock.expect_create()
            .withf(|_, _, name, _| name == "c")
            .times(1)
            .returning(|_, _, name, _| {
                Ok(ProviderResource {
                    id: format!("network-{name}"),
                    properties: Properties::new(),
                    outputs: Outputs::from([("id".to_string(), json!(format!("network-{name}")))]),
                })
            });

        let decls = vec![
            decl(0, "a", &[("cidr_block", "10.0.0.0/16")]),
            decl(1, "b", &[("cidr_block", "10.1.0.0/16"), ("tags", "${a.id}")]),
            decl(2, "c", &[("cidr_block", "10.2.0.0/16")]),
        ];
        let graph = DependencyGraph::build(&decls).unwrap();
        let temp = TempDir::new().unwrap();
        let reconciler = reconciler(mock, &temp);

        let mut state = DeploymentState::new("demo", "dev");
        let reports = reconciler.forward_pass(&mut state, &graph).await.unwrap();

        assert_eq!(reports[0].status, NodeStatus::Failed);
        assert_eq!(reports[1].status, NodeStatus::Failed);
        assert_eq!(reports[1].error.as_deref(), Some("Dependency 'a' failed"));
        assert!(reports[1].action.is_none());
        assert_eq!(reports[2].status, NodeStatus::Applied);
        assert_eq!(state.record_names(), vec!["c"]);
    }

    #[tokio::test]
    async fn test_unresolvable_reference_fails_node() {
        let mut mock = MockProvider::new();
        mock.expect_create().returning(|_, _, _, _| {
            Ok(ProviderResource {
                id: String::from("network-0001"),
                properties: Properties::new(),
                outputs: Outputs::new(),
            })
        });

        let decls = vec![
            decl(0, "a", &[("cidr_block", "10.0.0.0/16")]),
            decl(1, "b", &[("cidr_block", "10.1.0.0/16"), ("tags", "${a.arn}")]),
        ];
        let graph = DependencyGraph::build(&decls).unwrap();
        let temp = TempDir::new().unwrap();
        let reconciler = reconciler(mock, &temp);

        let mut state = DeploymentState::new("demo", "dev");
        let reports = reconciler.forward_pass(&mut state, &graph).await.unwrap();
        assert_eq!(reports[0].status, NodeStatus::Applied);
        assert_eq!(reports[1].status, NodeStatus::Failed);
        assert!(reports[1].error.as_deref().unwrap().contains("a.arn"));
    }

    #[tokio::test]
    async fn test_failed_delete_keeps_dependencies() {
        let mut mock = MockProvider::new();
        mock.expect_delete()
            .withf(|_, _, id| id == "id-top")
            .times(1)
            .returning(|_, _, _| Err(ProviderError::Conflict { message: "in use".into() }));
        mock.expect_delete().withf(|_, _, id| id != "id-top").never();

        let mut state = DeploymentState::new("demo", "dev");
        for (name, deps) in [("base", vec![]), ("top", vec!["base".to_string()])] {
            state.set_record(StateRecord::new(
                name,
                ResourceKind::Network,
                &format!("id-{name}"),
                Properties::new(),
                Outputs::new(),
                String::new(),
                deps,
            ));
        }

        let temp = TempDir::new().unwrap();
        let reconciler = reconciler(mock, &temp);

        let records: Vec<&StateRecord> = state.records.values().collect();
        let ordered: Vec<StateRecord> = delete_order(&records).into_iter().cloned().collect();
        let reports = reconciler.delete_pass(&mut state, ordered).await.unwrap();
        assert_eq!(reports[0].name, "top");
        assert_eq!(reports[0].status, NodeStatus::Failed);
        assert_eq!(reports[1].name, "base");
        assert_eq!(reports[1].status, NodeStatus::Failed);
        assert_eq!(
            reports[1].error.as_deref(),
            Some("Dependent 'top' could not be deleted")
        );
        assert_eq!(state.records.len(), 2);
    }

    #[tokio::test]
    async fn test_save_failure_waits_for_in_flight_calls() {
        let provider = Arc::new(MemoryProvider::new().with_latency(Duration::from_millis(30)));
        let temp = TempDir::new().unwrap();
        let store = FullDisk {
            inner: LocalStateStore::with_base_dir(temp.path()),
            allowed: AtomicUsize::new(0),
        };
        let reconciler = Reconciler::new(RunContext::new("demo", "dev"), provider.clone(), Arc::new(store));

        let decls = vec![
            decl(0, "a", &[("cidr_block", "10.0.0.0/16")]),
            decl(1, "b", &[("cidr_block", "10.1.0.0/16")]),
            decl(2, "c", &[("cidr_block", "10.2.0.0/16")]),
        ];
        let graph = DependencyGraph::build(&decls).unwrap();

        let mut state = DeploymentState::new("demo", "dev");
        let err = reconciler.forward_pass(&mut state, &graph).await.unwrap_err();
        assert!(matches!(err, StackError::State(StateError::WriteFailed { .. })));

        // Every call that had started ran to completion.
        assert_eq!(provider.len(), 3);
        for name in ["a", "b", "c"] {
            assert!(provider.finished_at(name).is_some(), "{name} was dropped mid-call");
        }
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let mut mock = MockProvider::new();
        mock.expect_create().never();

        let decls = vec![decl(0, "a", &[("cidr_block", "10.0.0.0/16")])];
        let graph = DependencyGraph::build(&decls).unwrap();
        let temp = TempDir::new().unwrap();
        let reconciler = reconciler(mock, &temp);
        reconciler.context().cancel.cancel();

        let mut state = DeploymentState::new("demo", "dev");
        let reports = reconciler.forward_pass(&mut state, &graph).await.unwrap();
        assert_eq!(reports[0].status, NodeStatus::Failed);
        assert!(reports[0].error.as_deref().unwrap().contains("run cancelled"));
    }

    #[test]
    fn test_report_exit_code() {
        let mut report = RunReport {
            operation: RunOperation::Apply,
            nodes: vec![NodeReport::new("a", ResourceKind::Network, Some(DiffType::Create), None)],
            cancelled: false,
            outputs: BTreeMap::new(),
        };
        report.nodes[0].transition(NodeStatus::InProgress);
        report.nodes[0].transition(NodeStatus::Applied);
        assert_eq!(report.exit_code(), 0);
        assert_eq!(report.changed_count(), 1);

        report.nodes.push(NodeReport::new("b", ResourceKind::Network, None, None));
        report.nodes[1].fail("boom");
        assert_eq!(report.exit_code(), 1);
        assert_eq!(report.to_string(), "apply failed: 1 applied (1 changed), 1 failed");
    }
}
