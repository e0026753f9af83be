//! End-to-end reconciliation against the simulated provider and a
//! file-backed state store.

use std::sync::Arc;
use std::time::Duration;

use stackwright::config::{DeclarationLoader, Manifest};
use stackwright::context::RunContext;
use stackwright::error::StackError;
use stackwright::graph::DependencyGraph;
use stackwright::planner::DiffType;
use stackwright::provider::{CallPhase, CatalogImage, MemoryProvider, ProviderOperation};
use stackwright::reconciler::{NodeStatus, Reconciler, RunReport};
use stackwright::state::{LocalStateStore, StateStore};
use tempfile::TempDir;
use tokio_test::{assert_err, assert_ok};

const THREE_NODES: &str = r"
project: { name: demo, stack: test }
resources:
  - name: a
    type: network
    properties:
      cidr_block: 10.0.0.0/16
  - name: b
    type: subnet
    properties:
      network_id: ${a.id}
      cidr_block: 10.0.1.0/24
  - name: c
    type: network
    properties:
      cidr_block: 10.1.0.0/16
outputs:
  subnet: ${b.id}
";

const ONLY_C: &str = r"
project: { name: demo, stack: test }
resources:
  - name: c
    type: network
    properties:
      cidr_block: 10.1.0.0/16
";

const LINKED: &str = r"
project: { name: demo, stack: test }
resources:
  - name: a
    type: network
    properties:
      cidr_block: 10.0.0.0/16
  - name: b
    type: subnet
    properties:
      network_id: ${a.id}
      cidr_block: 10.0.1.0/24
  - name: c
    type: network
    properties:
      cidr_block: 10.1.0.0/16
      tags:
        peer: ${a.id}
";

const WITH_IMAGE: &str = r"
project: { name: demo, stack: test }
lookups:
  - name: ami
    type: image
    properties:
      most_recent: true
      owners: [amazon]
      name_pattern: amzn2-ami-ecs-hvm-*-x86_64-*
resources:
  - name: net
    type: network
    properties:
      cidr_block: 10.0.0.0/16
      tags:
        image: ${ami.id}
";

struct Harness {
    temp: TempDir,
    provider: Arc<MemoryProvider>,
}

impl Harness {
    fn new() -> Self {
        Self::with_provider(MemoryProvider::new())
    }

    fn with_provider(provider: MemoryProvider) -> Self {
        Self {
            temp: TempDir::new().unwrap(),
            provider: Arc::new(provider),
        }
    }

    fn store(&self) -> Arc<LocalStateStore> {
        Arc::new(LocalStateStore::with_base_dir(self.temp.path()))
    }

    fn reconciler(&self, ctx: RunContext) -> Reconciler {
        Reconciler::new(ctx, self.provider.clone(), self.store())
    }

    fn ctx() -> RunContext {
        RunContext::new("demo", "test")
    }

    async fn apply(&self, yaml: &str) -> RunReport {
        let (manifest, graph) = load(yaml);
        assert_ok!(self.reconciler(Self::ctx()).apply(&manifest, &graph).await)
    }
}

fn load(yaml: &str) -> (Manifest, DependencyGraph) {
    let manifest = DeclarationLoader::new().parse_yaml(yaml, None).unwrap();
    let graph = DependencyGraph::build(&manifest.resources).unwrap();
    (manifest, graph)
}

fn status(report: &RunReport, name: &str) -> NodeStatus {
    report.node(name).unwrap().status
}

#[tokio::test]
async fn test_apply_creates_all_nodes_and_records_them() {
    let h = Harness::new();
    let report = h.apply(THREE_NODES).await;

    assert!(report.success());
    assert_eq!(report.exit_code(), 0);
    for name in ["a", "b", "c"] {
        assert_eq!(status(&report, name), NodeStatus::Applied);
        assert_eq!(report.node(name).unwrap().action, Some(DiffType::Create));
    }
    assert_eq!(h.provider.calls(ProviderOperation::Create), 3);

    let state = h.store().load().await.unwrap().unwrap();
    assert_eq!(state.records.len(), 3);
    let a_id = &state.records["a"].provider_id;
    assert_eq!(state.records["b"].properties["network_id"], a_id.as_str());
    assert_eq!(state.records["b"].dependencies, vec!["a".to_string()]);
    assert_eq!(state.outputs["subnet"], state.records["b"].provider_id.as_str());
    assert_eq!(state.history.len(), 1);
}

#[tokio::test]
async fn test_dependency_finishes_before_dependent_starts() {
    let h = Harness::with_provider(MemoryProvider::new().with_latency(Duration::from_millis(20)));
    h.apply(THREE_NODES).await;

    let a_done = h.provider.finished_at("a").unwrap();
    let b_start = h.provider.started_at("b").unwrap();
    assert!(a_done < b_start, "b started at {b_start} before a finished at {a_done}");

    // a and c are independent and overlap with the default parallelism.
    assert!(h.provider.max_in_flight() >= 2);
}

#[tokio::test]
async fn test_second_apply_is_a_no_op() {
    let h = Harness::new();
    h.apply(THREE_NODES).await;
    h.provider.reset_journal();

    // A fresh store instance reads the state back from disk.
    let report = h.apply(THREE_NODES).await;

    assert!(report.success());
    assert_eq!(h.provider.total_calls(), 0);
    for name in ["a", "b", "c"] {
        assert_eq!(report.node(name).unwrap().action, Some(DiffType::NoChange));
        assert_eq!(status(&report, name), NodeStatus::Applied);
    }
    assert_eq!(report.changed_count(), 0);
}

#[tokio::test]
async fn test_failed_create_skips_dependents_only() {
    let h = Harness::new();
    h.provider.fail_on("a", ProviderOperation::Create);

    let report = h.apply(THREE_NODES).await;

    assert!(!report.success());
    assert_eq!(report.exit_code(), 1);
    assert_eq!(status(&report, "a"), NodeStatus::Failed);
    assert_eq!(status(&report, "b"), NodeStatus::Failed);
    assert_eq!(status(&report, "c"), NodeStatus::Applied);
    assert_eq!(h.provider.calls_for("b"), 0);
    assert!(report.node("b").unwrap().error.as_deref().unwrap().contains("'a'"));

    let state = h.store().load().await.unwrap().unwrap();
    assert_eq!(state.record_names(), vec!["c"]);
    assert!(!state.outputs.contains_key("subnet"));
}

#[tokio::test]
async fn test_retry_after_failure_creates_the_rest() {
    let h = Harness::new();
    h.provider.fail_on("a", ProviderOperation::Create);
    h.apply(THREE_NODES).await;

    h.provider.clear_failures();
    h.provider.reset_journal();
    let report = h.apply(THREE_NODES).await;

    assert!(report.success());
    assert_eq!(h.provider.calls(ProviderOperation::Create), 2);
    assert_eq!(report.node("c").unwrap().action, Some(DiffType::NoChange));
}

#[tokio::test]
async fn test_cycle_is_rejected_before_provisioning() {
    let yaml = r"
project: { name: demo }
resources:
  - name: a
    type: network
    depends_on: [b]
    properties: { cidr_block: 10.0.0.0/16 }
  - name: b
    type: network
    depends_on: [a]
    properties: { cidr_block: 10.1.0.0/16 }
";
    let manifest = DeclarationLoader::new().parse_yaml(yaml, None).unwrap();
    let err = assert_err!(DependencyGraph::build(&manifest.resources));

    match err {
        StackError::Cycle(cycle) => {
            assert_eq!(cycle.cycle.len(), 3);
            assert_eq!(cycle.cycle.first(), cycle.cycle.last());
            assert!(cycle.cycle.contains(&"a".to_string()));
            assert!(cycle.cycle.contains(&"b".to_string()));
        }
        other => panic!("expected a cycle error, got {other}"),
    }
}

#[tokio::test]
async fn test_orphans_are_deleted_dependents_first() {
    let h = Harness::new();
    h.apply(THREE_NODES).await;
    h.provider.reset_journal();

    let report = h.apply(ONLY_C).await;

    assert!(report.success());
    assert_eq!(report.node("a").unwrap().action, Some(DiffType::Delete));
    assert_eq!(report.node("b").unwrap().action, Some(DiffType::Delete));
    assert_eq!(h.provider.calls(ProviderOperation::Delete), 2);
    assert!(h.provider.finished_at("b").unwrap() < h.provider.started_at("a").unwrap());

    let state = h.store().load().await.unwrap().unwrap();
    assert_eq!(state.record_names(), vec!["c"]);
    assert_eq!(h.provider.len(), 1);
}

#[tokio::test]
async fn test_destroy_empties_the_store() {
    let h = Harness::new();
    let (manifest, _) = load(THREE_NODES);
    h.apply(THREE_NODES).await;

    let report = assert_ok!(h.reconciler(Harness::ctx()).destroy("hash").await);

    assert!(report.success());
    assert_eq!(report.applied_count(), 3);
    assert!(h.provider.is_empty());
    let state = h.store().load().await.unwrap().unwrap();
    assert!(state.records.is_empty());
    assert!(state.outputs.is_empty());
    assert_eq!(state.project, manifest.project.name);
}

#[tokio::test]
async fn test_cancellation_records_in_flight_nodes() {
    let h = Harness::with_provider(MemoryProvider::new().with_latency(Duration::from_millis(100)));
    let (manifest, graph) = load(THREE_NODES);
    let ctx = Harness::ctx().with_parallelism(1);
    let cancel = ctx.cancel.clone();
    let reconciler = h.reconciler(ctx);

    let (report, ()) = tokio::join!(reconciler.apply(&manifest, &graph), async {
        tokio::time::sleep(Duration::from_millis(30)).await;
        cancel.cancel();
    });
    let report = assert_ok!(report);

    assert!(report.cancelled);
    assert_eq!(status(&report, "a"), NodeStatus::Applied);
    for name in ["b", "c"] {
        assert_eq!(status(&report, name), NodeStatus::Failed);
        assert!(report.node(name).unwrap().error.as_deref().unwrap().contains("run cancelled"));
    }

    let state = h.store().load().await.unwrap().unwrap();
    assert_eq!(state.record_names(), vec!["a"]);
}

#[tokio::test]
async fn test_refresh_reports_missing_resource_as_conflict() {
    let h = Harness::new();
    h.apply(THREE_NODES).await;
    let before = h.store().load().await.unwrap().unwrap();
    h.provider.delete_out_of_band("a");

    let (manifest, graph) = load(THREE_NODES);
    let reconciler = h.reconciler(Harness::ctx().with_refresh(true));

    let plan = assert_ok!(reconciler.plan(&manifest, &graph).await);
    assert_eq!(plan.conflicts.len(), 1);
    assert_eq!(plan.conflicts[0].name, "a");

    let report = assert_ok!(reconciler.apply(&manifest, &graph).await);
    assert_eq!(status(&report, "a"), NodeStatus::Failed);
    assert!(report.node("a").unwrap().error.as_deref().unwrap().contains("State conflict"));
    assert_eq!(status(&report, "b"), NodeStatus::Failed);
    assert_eq!(status(&report, "c"), NodeStatus::Applied);

    let after = h.store().load().await.unwrap().unwrap();
    assert_eq!(after.records["a"], before.records["a"]);
}

#[tokio::test]
async fn test_drift_detects_out_of_band_change() {
    let h = Harness::new();
    h.apply(THREE_NODES).await;
    h.provider.mutate_out_of_band("c", "cidr_block", serde_json::json!("10.9.0.0/16"));

    let report = assert_ok!(h.reconciler(Harness::ctx()).check_drift().await);

    assert!(report.has_drift());
    let drifted: Vec<&str> = report.drifted().map(|e| e.name.as_str()).collect();
    assert_eq!(drifted, vec!["c"]);
}

#[tokio::test]
async fn test_changed_property_updates_in_place() {
    let h = Harness::new();
    h.apply(THREE_NODES).await;
    h.provider.reset_journal();

    let changed = THREE_NODES.replace(
        "    properties:\n      cidr_block: 10.1.0.0/16",
        "    properties:\n      cidr_block: 10.1.0.0/16\n      enable_dns_hostnames: true",
    );
    let report = h.apply(&changed).await;

    assert_eq!(report.node("c").unwrap().action, Some(DiffType::Update));
    assert_eq!(h.provider.calls(ProviderOperation::Update), 1);
    assert_eq!(h.provider.calls(ProviderOperation::Create), 0);
}

#[tokio::test]
async fn test_state_for_another_stack_is_rejected() {
    let h = Harness::new();
    h.apply(THREE_NODES).await;

    let other = Reconciler::new(RunContext::new("demo", "prod"), h.provider.clone(), h.store());
    let err = assert_err!(other.load_state().await);
    assert!(err.is_fatal());
}

/// First journal sequence number of `operation` starting for `name`.
fn first_start(h: &Harness, name: &str, operation: ProviderOperation) -> u64 {
    h.provider
        .events()
        .into_iter()
        .find(|e| e.name == name && e.operation == operation && e.phase == CallPhase::Start)
        .map(|e| e.seq)
        .unwrap()
}

#[tokio::test]
async fn test_replace_propagates_new_id_to_dependents() {
    let h = Harness::new();
    h.apply(LINKED).await;
    let before = h.store().load().await.unwrap().unwrap();
    h.provider.reset_journal();

    let report = h.apply(&LINKED.replace("10.0.0.0/16", "10.9.0.0/16")).await;

    assert!(report.success(), "{report}");
    assert_eq!(report.node("a").unwrap().action, Some(DiffType::Replace));
    // A subnet cannot move between networks.
    assert_eq!(report.node("b").unwrap().action, Some(DiffType::Replace));
    assert_eq!(report.node("c").unwrap().action, Some(DiffType::Update));
    assert!(
        first_start(&h, "a", ProviderOperation::Delete) < first_start(&h, "a", ProviderOperation::Create),
        "the old network must go before the new one is created"
    );

    let after = h.store().load().await.unwrap().unwrap();
    let new_a = after.records["a"].provider_id.as_str();
    assert_ne!(new_a, before.records["a"].provider_id);
    assert_eq!(report.node("a").unwrap().provider_id.as_deref(), Some(new_a));
    assert_eq!(after.records["b"].properties["network_id"], new_a);
    assert_eq!(after.records["c"].properties["tags"]["peer"], new_a);
    assert_eq!(after.records["c"].provider_id, before.records["c"].provider_id);
    assert_eq!(h.provider.len(), 3);
}

#[tokio::test]
async fn test_failed_replace_forgets_deleted_resource() {
    let h = Harness::new();
    h.apply(THREE_NODES).await;
    h.provider.fail_on("a", ProviderOperation::Create);
    let moved = THREE_NODES.replace("10.0.0.0/16", "10.9.0.0/16");

    let report = h.apply(&moved).await;

    assert_eq!(status(&report, "a"), NodeStatus::Failed);
    assert!(report.node("a").unwrap().error.as_deref().unwrap().contains("could not be recreated"));
    assert!(report.node("a").unwrap().provider_id.is_none());
    assert_eq!(status(&report, "b"), NodeStatus::Failed);
    assert_eq!(status(&report, "c"), NodeStatus::Applied);
    assert!(h.provider.resource_by_name("a").is_none());

    let state = h.store().load().await.unwrap().unwrap();
    assert!(state.get_record("a").is_none());

    // A refreshing retry must not trip over the deleted network.
    h.provider.clear_failures();
    let (manifest, graph) = load(&moved);
    let report = assert_ok!(h.reconciler(Harness::ctx().with_refresh(true)).apply(&manifest, &graph).await);

    assert!(report.success(), "{report}");
    assert_eq!(report.node("a").unwrap().action, Some(DiffType::Create));
    let state = h.store().load().await.unwrap().unwrap();
    assert_eq!(
        state.records["b"].properties["network_id"],
        state.records["a"].provider_id.as_str()
    );
}

#[tokio::test]
async fn test_lookup_is_read_every_run_and_never_deleted() {
    let h = Harness::new();
    let (manifest, graph) = load(WITH_IMAGE);

    let plan = assert_ok!(h.reconciler(Harness::ctx()).plan(&manifest, &graph).await);
    assert_eq!(plan.count(DiffType::Read), 1);
    assert_eq!(plan.count(DiffType::Create), 1);

    let report = h.apply(WITH_IMAGE).await;
    assert!(report.success(), "{report}");
    assert_eq!(report.node("ami").unwrap().action, Some(DiffType::Read));
    assert_eq!(report.changed_count(), 1);
    assert_eq!(h.provider.len(), 1);

    let state = h.store().load().await.unwrap().unwrap();
    assert_eq!(state.records["ami"].provider_id, "ami-0c1f3a8e5e0a10002");
    assert_eq!(state.records["net"].properties["tags"]["image"], "ami-0c1f3a8e5e0a10002");

    let drift = assert_ok!(h.reconciler(Harness::ctx()).check_drift().await);
    assert_eq!(drift.entries.len(), 1);
    assert_eq!(drift.entries[0].name, "net");

    // Unchanged catalog: the lookup is repeated, nothing else happens.
    h.provider.reset_journal();
    let report = h.apply(WITH_IMAGE).await;
    assert_eq!(h.provider.calls(ProviderOperation::Lookup), 1);
    assert_eq!(h.provider.total_calls(), 1);
    assert_eq!(report.node("net").unwrap().action, Some(DiffType::NoChange));

    // A newer image flows into the dependent as an in-place update.
    h.provider.add_image(CatalogImage {
        id: String::from("ami-0c1f3a8e5e0a10009"),
        name: String::from("amzn2-ami-ecs-hvm-2.0.20240601-x86_64-ebs"),
        owner: String::from("amazon"),
        architecture: String::from("x86_64"),
        creation_date: String::from("2024-06-01T00:00:00Z"),
    });
    let report = h.apply(WITH_IMAGE).await;
    assert_eq!(report.node("net").unwrap().action, Some(DiffType::Update));
    let state = h.store().load().await.unwrap().unwrap();
    assert_eq!(state.records["net"].properties["tags"]["image"], "ami-0c1f3a8e5e0a10009");

    h.provider.reset_journal();
    let report = assert_ok!(h.reconciler(Harness::ctx()).destroy("hash").await);
    assert!(report.success(), "{report}");
    assert_eq!(h.provider.calls(ProviderOperation::Delete), 1);
    assert!(h.provider.is_empty());
    let state = h.store().load().await.unwrap().unwrap();
    assert!(state.records.is_empty());
}
