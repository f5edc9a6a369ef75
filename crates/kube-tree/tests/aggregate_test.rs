//! Multi-context discovery and listing against HTTP mock servers.

use std::sync::Arc;

use k8s_mock::{
	merge_kubeconfigs, DiscoveryMode, HttpMockK8sServer, MockApiResource, MockDiscovery,
};
use kube::core::GroupVersionKind;
use kube_tree::{Aggregator, ClientRegistry, KubeconfigSource, ResourceScope, WatchOptions};
use serde_json::json;

fn aggregator(kubeconfig: kube::config::Kubeconfig) -> Aggregator {
	let registry = ClientRegistry::new(KubeconfigSource::InMemory(kubeconfig));
	Aggregator::new(Arc::new(registry), WatchOptions::default())
}

fn contexts(names: &[&str]) -> Vec<String> {
	names.iter().map(ToString::to_string).collect()
}

fn config_map(namespace: &str, name: &str) -> serde_json::Value {
	json!({
		"apiVersion": "v1",
		"kind": "ConfigMap",
		"metadata": {"name": name, "namespace": namespace},
		"data": {"key": name}
	})
}

#[tokio::test]
async fn test_catalog_merges_contexts() {
	let dev = HttpMockK8sServer::builder().build().start().await;
	let prod = HttpMockK8sServer::builder()
		.discovery(
			MockDiscovery::empty()
				.with_core(MockApiResource::namespaced("configmaps", "ConfigMap"))
				.with_group("batch/v1", MockApiResource::namespaced("jobs", "Job")),
		)
		.build()
		.start()
		.await;

	let aggregator = aggregator(merge_kubeconfigs([
		dev.kubeconfig_with_context("dev"),
		prod.kubeconfig_with_context("prod"),
	]));
	let catalog = aggregator.catalog_for(&contexts(&["dev", "prod"])).await;

	let kinds: Vec<&str> = catalog.iter().map(|e| e.gvk.kind.as_str()).collect();
	assert_eq!(
		kinds,
		vec!["ConfigMap", "Namespace", "Pod", "Service", "Deployment", "StatefulSet", "Job"]
	);

	let config_maps = &catalog[0];
	assert_eq!(config_maps.contexts, vec!["dev", "prod"]);
	assert!(config_maps.is_everywhere());
	assert_eq!(config_maps.plural(), "configmaps");

	let namespaces = &catalog[1];
	assert_eq!(namespaces.scope(), ResourceScope::ClusterWide);
	assert_eq!(namespaces.contexts, vec!["dev"]);
	assert!(!namespaces.is_everywhere());

	let jobs = &catalog[6];
	assert_eq!(jobs.gvk, GroupVersionKind::gvk("batch", "v1", "Job"));
	assert_eq!(jobs.contexts, vec!["prod"]);
	assert_eq!(jobs.all_count, 2);
}

#[tokio::test]
async fn test_catalog_falls_back_to_legacy_discovery() {
	let server = HttpMockK8sServer::builder()
		.discovery_mode(DiscoveryMode::Legacy)
		.build()
		.start()
		.await;

	let aggregator = aggregator(server.kubeconfig());
	let catalog = aggregator.catalog_for(&contexts(&["mock-context"])).await;

	let deployment = catalog
		.iter()
		.find(|e| e.gvk.kind == "Deployment")
		.expect("deployments are listed");
	assert_eq!(deployment.gvk.api_version(), "apps/v1");
	assert_eq!(deployment.scope(), ResourceScope::Namespaced);
	assert!(catalog.iter().all(|e| e.gvk.kind != "SelfSubjectAccessReview"));
}

#[tokio::test]
async fn test_catalog_skips_unreachable_context() {
	let dev = HttpMockK8sServer::builder().build().start().await;
	let mut kubeconfig = merge_kubeconfigs([
		dev.kubeconfig_with_context("dev"),
		dev.kubeconfig_with_context("gone"),
	]);
	for cluster in &mut kubeconfig.clusters {
		if cluster.name == "gone-cluster" {
			if let Some(cluster) = cluster.cluster.as_mut() {
				cluster.server = Some("http://127.0.0.1:9".to_string());
			}
		}
	}

	let aggregator = aggregator(kubeconfig);
	let catalog = aggregator.catalog_for(&contexts(&["gone", "dev", "missing"])).await;

	assert!(!catalog.is_empty());
	for entry in &catalog {
		assert_eq!(entry.contexts, vec!["dev"]);
		assert_eq!(entry.all_count, 3);
	}
}

#[tokio::test]
async fn test_objects_for_tags_each_context() {
	let dev = HttpMockK8sServer::builder()
		.resources(vec![config_map("default", "app"), config_map("kube-system", "coredns")])
		.build()
		.start()
		.await;
	let prod = HttpMockK8sServer::builder()
		.resources(vec![config_map("default", "app")])
		.build()
		.start()
		.await;

	let aggregator = aggregator(merge_kubeconfigs([
		prod.kubeconfig_with_context("prod"),
		dev.kubeconfig_with_context("dev"),
	]));
	let objects = aggregator
		.objects_for(
			&GroupVersionKind::gvk("", "v1", "ConfigMap"),
			&contexts(&["prod", "dev"]),
		)
		.await;

	let tagged: Vec<(&str, Option<&str>, Option<&str>)> = objects
		.iter()
		.map(|t| {
			(
				t.context.as_str(),
				t.object.metadata.namespace.as_deref(),
				t.object.metadata.name.as_deref(),
			)
		})
		.collect();
	assert_eq!(
		tagged,
		vec![
			("prod", Some("default"), Some("app")),
			("dev", Some("default"), Some("app")),
			("dev", Some("kube-system"), Some("coredns")),
		]
	);
}

#[tokio::test]
async fn test_objects_for_unserved_kind_is_empty() {
	let server = HttpMockK8sServer::builder().build().start().await;
	let aggregator = aggregator(server.kubeconfig());

	let objects = aggregator
		.objects_for(
			&GroupVersionKind::gvk("example.io", "v1", "Widget"),
			&contexts(&["mock-context"]),
		)
		.await;
	assert!(objects.is_empty());
}
