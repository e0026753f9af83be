//! The starter manifest written by `stackwright init`.

use std::sync::Arc;

use stackwright::config::{DeclarationLoader, ManifestValidator, ResourceKind};
use stackwright::context::RunContext;
use stackwright::graph::DependencyGraph;
use stackwright::provider::{MemoryProvider, ProviderOperation};
use stackwright::reconciler::Reconciler;
use stackwright::state::LocalStateStore;
use tempfile::TempDir;

const TEMPLATE: &str = include_str!("../templates/stackwright.yaml");

#[test]
fn test_template_builds_a_graph() {
    let manifest = DeclarationLoader::new().parse_yaml(TEMPLATE, None).unwrap();
    ManifestValidator::new().validate(&manifest).unwrap();
    let graph = DependencyGraph::build(&manifest.resources).unwrap();

    assert_eq!(graph.len(), 21);
    let order: Vec<&str> = graph
        .topological_order()
        .into_iter()
        .map(|i| graph.name(i))
        .collect();
    let pos = |name: &str| order.iter().position(|n| *n == name).unwrap();

    assert_eq!(pos("vpc"), 0);
    assert!(pos("ecs-ami") < pos("launch-config"));
    assert!(pos("auto-scaling") < pos("capacity-provider"));
    assert!(pos("capacity-provider") < pos("cluster"));
    assert!(pos("cluster") < pos("my-app"));
    assert!(pos("web") < pos("my-task-runner"));
    assert_eq!(order.last(), Some(&"my-task-runner"));

    let cluster = manifest.resource("cluster").unwrap();
    assert_eq!(cluster.kind, ResourceKind::Cluster);
    assert_eq!(manifest.resource("ecs-ami").unwrap().kind, ResourceKind::Image);
}

#[tokio::test]
async fn test_template_applies_against_simulated_cloud() {
    let temp = TempDir::new().unwrap();
    let manifest = DeclarationLoader::new().parse_yaml(TEMPLATE, None).unwrap();
    let graph = DependencyGraph::build(&manifest.resources).unwrap();
    let provider = Arc::new(MemoryProvider::new());

    let reconciler = Reconciler::new(
        RunContext::from_manifest(&manifest),
        provider.clone(),
        Arc::new(LocalStateStore::with_base_dir(temp.path())),
    );
    let report = reconciler.apply(&manifest, &graph).await.unwrap();

    assert!(report.success(), "{report}");
    assert_eq!(provider.len(), 20);
    assert_eq!(provider.calls(ProviderOperation::Lookup), 1);
    let launch_config = provider.resource_by_name("launch-config").unwrap();
    assert_eq!(launch_config.properties["image_id"], "ami-0c1f3a8e5e0a10002");
    let url = report.outputs["load_balancer_url"].as_str().unwrap();
    assert!(url.starts_with("http://") && url.ends_with(".lb.stackwright.local"));
    assert_eq!(report.outputs["private_subnet_ids"].as_array().unwrap().len(), 2);
}
