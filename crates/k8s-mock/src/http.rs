//! HTTP-based mock Kubernetes server using wiremock.
//!
//! This provides a real HTTP server that can be used with actual
//! kubeconfig-based connections. It is read-only: discovery, OpenAPI,
//! list and watch.

use std::{
	collections::{BTreeMap, HashMap},
	sync::Arc,
	time::Duration,
};

use bon::Builder;
use kube::config::{
	AuthInfo, Cluster, Context, Kubeconfig, NamedAuthInfo, NamedCluster, NamedContext,
};
use serde_json::{json, Value};
use tracing::{debug, trace};
use wiremock::{
	matchers::{header_regex, method, path, path_regex, query_param},
	Mock, MockServer, Request, ResponseTemplate,
};

use super::{
	discovery::{DiscoveryMode, MockApiResource, MockDiscovery},
	helpers::{
		extract_cluster_wide_path, list_body, parse_resource_path, status_body,
		with_resource_version,
	},
	openapi::mount_openapi,
};

const API_PATHS: &str = r"^/api(s)?/.*";

/// Resources keyed by (collection path, name).
type ResourceMap = Arc<HashMap<(String, String), Value>>;

/// A mock Kubernetes server exposed over HTTP.
#[derive(Builder)]
pub struct HttpMockK8sServer {
	#[builder(default)]
	discovery_mode: DiscoveryMode,
	#[builder(default)]
	discovery: MockDiscovery,
	/// Resources to serve as raw manifests. The server derives API paths from
	/// apiVersion/kind using the discovery data.
	#[builder(default)]
	resources: Vec<Value>,
	/// OpenAPI v3 documents keyed by API path (`api/v1`, `apis/apps/v1`).
	#[builder(default)]
	openapi: BTreeMap<String, Value>,
	/// Watch events (`{"type": "ADDED", "object": {...}}`) delivered on the
	/// first watch request.
	#[builder(default)]
	watch_events: Vec<Value>,
	/// How long the first watch request waits before delivering `watch_events`.
	#[builder(default = Duration::from_millis(200))]
	watch_event_delay: Duration,
	/// How long every other watch request is held open before closing empty.
	#[builder(default = Duration::from_secs(1))]
	watch_idle: Duration,
	/// Answer this many requests with 401 Unauthorized before serving normally.
	#[builder(default)]
	reject_first: u64,
}

/// A running HTTP mock server instance.
pub struct RunningHttpMockK8sServer {
	server: MockServer,
}

impl HttpMockK8sServer {
	/// Start the mock server with all configured resources.
	pub async fn start(self) -> RunningHttpMockK8sServer {
		let server = MockServer::start().await;
		debug!(uri = %server.uri(), "Started mock K8s server");

		let mut resources = HashMap::new();
		for manifest in self.resources {
			if let Some((api_path, name)) = api_path_for_manifest(&manifest, &self.discovery) {
				trace!(api_path = %api_path, name = %name, "Registered resource");
				resources.insert((api_path, name), with_resource_version(manifest));
			}
		}

		if self.reject_first > 0 {
			mount_unauthorized(&server, self.reject_first).await;
		}
		mount_version(&server).await;
		mount_discovery(&server, &self.discovery, self.discovery_mode).await;
		mount_openapi(&server, &self.openapi).await;
		mount_watch(
			&server,
			self.watch_events,
			self.watch_event_delay,
			self.watch_idle,
		)
		.await;
		mount_resources(&server, Arc::new(resources)).await;

		RunningHttpMockK8sServer { server }
	}
}

/// Derive the API path for a manifest using discovery data.
fn api_path_for_manifest(manifest: &Value, discovery: &MockDiscovery) -> Option<(String, String)> {
	let api_version = manifest.get("apiVersion")?.as_str()?;
	let kind = manifest.get("kind")?.as_str()?;
	let name = manifest.pointer("/metadata/name")?.as_str()?.to_string();
	let namespace = manifest
		.pointer("/metadata/namespace")
		.and_then(Value::as_str)
		.unwrap_or("default");

	let resource = discovery.find(api_version, kind)?;
	let root = if api_version.contains('/') { "apis" } else { "api" };
	let path = if resource.namespaced {
		format!("/{root}/{api_version}/namespaces/{namespace}/{}", resource.name)
	} else {
		format!("/{root}/{api_version}/{}", resource.name)
	};

	Some((path, name))
}

impl RunningHttpMockK8sServer {
	/// Get the server's URI (e.g., "http://127.0.0.1:12345").
	pub fn uri(&self) -> String {
		self.server.uri()
	}

	/// Create a Kubeconfig pointing to this mock server.
	pub fn kubeconfig(&self) -> Kubeconfig {
		self.kubeconfig_with_context("mock-context")
	}

	/// Create a Kubeconfig pointing to this mock server with a custom context name.
	///
	/// Cluster and user entries are named after the context, so kubeconfigs of
	/// several servers can be combined with [`merge_kubeconfigs`].
	pub fn kubeconfig_with_context(&self, context_name: &str) -> Kubeconfig {
		let cluster_name = format!("{context_name}-cluster");
		let user_name = format!("{context_name}-user");

		Kubeconfig {
			clusters: vec![NamedCluster {
				name: cluster_name.clone(),
				cluster: Some(Cluster {
					server: Some(self.uri()),
					insecure_skip_tls_verify: Some(true),
					..Default::default()
				}),
			}],
			contexts: vec![NamedContext {
				name: context_name.to_string(),
				context: Some(Context {
					cluster: cluster_name,
					user: Some(user_name.clone()),
					namespace: Some("default".to_string()),
					..Default::default()
				}),
			}],
			auth_infos: vec![NamedAuthInfo {
				name: user_name,
				auth_info: Some(AuthInfo::default()),
			}],
			current_context: Some(context_name.to_string()),
			..Default::default()
		}
	}
}

/// Combine single-context kubeconfigs; the first one's context is current.
pub fn merge_kubeconfigs(kubeconfigs: impl IntoIterator<Item = Kubeconfig>) -> Kubeconfig {
	let mut merged = Kubeconfig::default();
	for kubeconfig in kubeconfigs {
		if merged.current_context.is_none() {
			merged.current_context = kubeconfig.current_context;
		}
		merged.clusters.extend(kubeconfig.clusters);
		merged.contexts.extend(kubeconfig.contexts);
		merged.auth_infos.extend(kubeconfig.auth_infos);
	}
	merged
}

async fn mount_unauthorized(server: &MockServer, times: u64) {
	Mock::given(method("GET"))
		.respond_with(
			ResponseTemplate::new(401).set_body_json(status_body(401, "Unauthorized", "Unauthorized")),
		)
		.up_to_n_times(times)
		.with_priority(1)
		.mount(server)
		.await;
}

async fn mount_version(server: &MockServer) {
	Mock::given(method("GET"))
		.and(path("/version"))
		.respond_with(ResponseTemplate::new(200).set_body_json(json!({
			"major": "1",
			"minor": "31",
			"gitVersion": "v1.31.0",
			"gitCommit": "fake",
			"gitTreeState": "clean",
			"buildDate": "2024-08-13T00:00:00Z",
			"goVersion": "go1.22.5",
			"compiler": "gc",
			"platform": "linux/amd64"
		})))
		.mount(server)
		.await;
}

fn aggregated_resource(r: &MockApiResource, group: &str, version: &str) -> Value {
	json!({
		"resource": r.name,
		"responseKind": {
			"group": group,
			"version": version,
			"kind": r.kind
		},
		"scope": r.scope(),
		"verbs": r.verbs,
	})
}

fn legacy_resource(r: &MockApiResource) -> Value {
	json!({
		"name": r.name,
		"singularName": "",
		"namespaced": r.namespaced,
		"kind": r.kind,
		"verbs": r.verbs,
	})
}

async fn mount_discovery(server: &MockServer, discovery: &MockDiscovery, mode: DiscoveryMode) {
	// The Content-Type must indicate aggregated discovery format for clients to parse it
	const AGGREGATED_DISCOVERY_CONTENT_TYPE: &str =
		"application/json;g=apidiscovery.k8s.io;v=v2;as=APIGroupDiscoveryList";

	match mode {
		DiscoveryMode::Aggregated => {
			let core_body = json!({
				"kind": "APIGroupDiscoveryList",
				"apiVersion": "apidiscovery.k8s.io/v2",
				"items": [{
					"metadata": {"name": ""},
					"versions": [{
						"version": "v1",
						"resources": discovery
							.core_resources
							.iter()
							.map(|r| aggregated_resource(r, "", "v1"))
							.collect::<Vec<_>>(),
						"freshness": "Current"
					}]
				}]
			});

			let groups: Vec<_> = discovery
				.group_resources
				.iter()
				.map(|(gv, rs)| {
					let (group, version) = gv.split_once('/').unwrap_or(("", gv));
					json!({
						"metadata": {"name": group},
						"versions": [{
							"version": version,
							"resources": rs
								.iter()
								.map(|r| aggregated_resource(r, group, version))
								.collect::<Vec<_>>(),
							"freshness": "Current"
						}]
					})
				})
				.collect();
			let apis_body = json!({
				"kind": "APIGroupDiscoveryList",
				"apiVersion": "apidiscovery.k8s.io/v2",
				"items": groups
			});

			// set_body_raw keeps the Content-Type; set_body_json would overwrite it
			for (endpoint, body) in [("/api", core_body), ("/apis", apis_body)] {
				Mock::given(method("GET"))
					.and(path(endpoint))
					.and(header_regex("accept", "apidiscovery"))
					.respond_with(ResponseTemplate::new(200).set_body_raw(
						body.to_string().into_bytes(),
						AGGREGATED_DISCOVERY_CONTENT_TYPE,
					))
					.mount(server)
					.await;
			}
		}
		DiscoveryMode::Legacy => {
			for endpoint in ["/api", "/apis"] {
				Mock::given(method("GET"))
					.and(path(endpoint))
					.and(header_regex("accept", "apidiscovery"))
					.respond_with(ResponseTemplate::new(406))
					.mount(server)
					.await;
			}
		}
	}

	// Legacy discovery endpoints (fallback)
	Mock::given(method("GET"))
		.and(path("/api"))
		.respond_with(ResponseTemplate::new(200).set_body_json(json!({
			"kind": "APIVersions",
			"versions": ["v1"],
			"serverAddressByClientCIDRs": []
		})))
		.mount(server)
		.await;

	let groups: Vec<_> = discovery
		.group_resources
		.keys()
		.map(|gv| {
			let (group, version) = gv.split_once('/').unwrap_or(("", gv));
			json!({
				"name": group,
				"versions": [{"groupVersion": gv, "version": version}],
				"preferredVersion": {"groupVersion": gv, "version": version}
			})
		})
		.collect();

	Mock::given(method("GET"))
		.and(path("/apis"))
		.respond_with(ResponseTemplate::new(200).set_body_json(json!({
			"kind": "APIGroupList",
			"apiVersion": "v1",
			"groups": groups
		})))
		.mount(server)
		.await;

	Mock::given(method("GET"))
		.and(path("/api/v1"))
		.respond_with(ResponseTemplate::new(200).set_body_json(json!({
			"kind": "APIResourceList",
			"apiVersion": "v1",
			"groupVersion": "v1",
			"resources": discovery.core_resources.iter().map(legacy_resource).collect::<Vec<_>>()
		})))
		.mount(server)
		.await;

	for (gv, rs) in &discovery.group_resources {
		Mock::given(method("GET"))
			.and(path(format!("/apis/{}", gv)))
			.respond_with(ResponseTemplate::new(200).set_body_json(json!({
				"kind": "APIResourceList",
				"apiVersion": "v1",
				"groupVersion": gv,
				"resources": rs.iter().map(legacy_resource).collect::<Vec<_>>()
			})))
			.mount(server)
			.await;
	}
}

/// Watch requests: the configured events once, then empty long polls.
async fn mount_watch(server: &MockServer, events: Vec<Value>, delay: Duration, idle: Duration) {
	if !events.is_empty() {
		let body: String = events
			.into_iter()
			.map(|mut event| {
				if let Some(object) = event.get_mut("object") {
					*object = with_resource_version(object.take());
				}
				format!("{event}\n")
			})
			.collect();

		Mock::given(method("GET"))
			.and(path_regex(API_PATHS))
			.and(query_param("watch", "true"))
			.respond_with(
				ResponseTemplate::new(200)
					.set_body_raw(body.into_bytes(), "application/json")
					.set_delay(delay),
			)
			.up_to_n_times(1)
			.with_priority(2)
			.mount(server)
			.await;
	}

	Mock::given(method("GET"))
		.and(path_regex(API_PATHS))
		.and(query_param("watch", "true"))
		.respond_with(
			ResponseTemplate::new(200)
				.set_body_raw(Vec::new(), "application/json")
				.set_delay(idle),
		)
		.with_priority(3)
		.mount(server)
		.await;
}

/// GET for single resources and lists, namespaced or cluster-wide.
async fn mount_resources(server: &MockServer, resources: ResourceMap) {
	Mock::given(method("GET"))
		.and(path_regex(API_PATHS))
		.respond_with(move |req: &Request| {
			let path_str = req.url.path();

			let (api_path, name) = parse_resource_path(path_str);
			if let Some(resource) = resources.get(&(api_path, name.clone())) {
				return ResponseTemplate::new(200).set_body_json(resource.clone());
			}

			let mut items: Vec<_> = resources
				.iter()
				.filter(|((res_api_path, _), _)| {
					res_api_path == path_str
						|| extract_cluster_wide_path(res_api_path).as_deref() == Some(path_str)
				})
				.map(|((_, name), v)| (name.clone(), v.clone()))
				.collect();
			items.sort_by(|(a, _), (b, _)| a.cmp(b));

			if !items.is_empty() {
				return ResponseTemplate::new(200)
					.set_body_json(list_body(items.into_iter().map(|(_, v)| v).collect()));
			}

			// A path ending in a plural with nothing stored is an empty list;
			// anything that looks like a named resource is a 404.
			if looks_like_collection(path_str) {
				ResponseTemplate::new(200).set_body_json(list_body(Vec::new()))
			} else {
				ResponseTemplate::new(404).set_body_json(status_body(404, "NotFound", "not found"))
			}
		})
		.mount(server)
		.await;
}

/// `/api/v1/pods`, `/apis/apps/v1/namespaces/x/deployments`: an even number
/// of segments after the group-version.
fn looks_like_collection(path: &str) -> bool {
	let segments: Vec<_> = path.trim_matches('/').split('/').collect();
	let after_gv = match segments.first() {
		Some(&"api") => segments.len().saturating_sub(2),
		Some(&"apis") => segments.len().saturating_sub(3),
		_ => return false,
	};
	after_gv % 2 == 1
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_looks_like_collection() {
		assert!(looks_like_collection("/api/v1/pods"));
		assert!(looks_like_collection("/api/v1/namespaces/default/pods"));
		assert!(looks_like_collection("/apis/apps/v1/deployments"));
		assert!(!looks_like_collection("/api/v1/namespaces/default"));
		assert!(!looks_like_collection("/apis/apps/v1/namespaces/default/deployments/web"));
	}

	#[test]
	fn test_api_path_for_manifest() {
		let discovery = MockDiscovery::default();
		let deployment = json!({
			"apiVersion": "apps/v1",
			"kind": "Deployment",
			"metadata": {"name": "web", "namespace": "prod"}
		});
		assert_eq!(
			api_path_for_manifest(&deployment, &discovery),
			Some((
				"/apis/apps/v1/namespaces/prod/deployments".to_string(),
				"web".to_string()
			))
		);

		let namespace = json!({"apiVersion": "v1", "kind": "Namespace", "metadata": {"name": "prod"}});
		assert_eq!(
			api_path_for_manifest(&namespace, &discovery),
			Some(("/api/v1/namespaces".to_string(), "prod".to_string()))
		);
	}

	#[test]
	fn test_merge_kubeconfigs_keeps_first_current() {
		let a = Kubeconfig {
			current_context: Some("a".to_string()),
			contexts: vec![NamedContext {
				name: "a".to_string(),
				context: None,
			}],
			..Default::default()
		};
		let b = Kubeconfig {
			current_context: Some("b".to_string()),
			contexts: vec![NamedContext {
				name: "b".to_string(),
				context: None,
			}],
			..Default::default()
		};
		let merged = merge_kubeconfigs([a, b]);
		assert_eq!(merged.current_context.as_deref(), Some("a"));
		assert_eq!(merged.contexts.len(), 2);
	}
}
