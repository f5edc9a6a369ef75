//! Mock Kubernetes API discovery types.

use std::collections::BTreeMap;

/// Discovery mode for the mock server.
#[derive(Debug, Clone, Copy, Default)]
pub enum DiscoveryMode {
	/// Support aggregated discovery (APIGroupDiscoveryList).
	#[default]
	Aggregated,
	/// Return 406 for aggregated discovery, forcing fallback to legacy endpoints.
	Legacy,
}

/// Pre-configured discovery responses.
#[derive(Debug, Clone)]
pub struct MockDiscovery {
	pub core_resources: Vec<MockApiResource>,
	/// Keyed by group-version, e.g. `apps/v1`.
	pub group_resources: BTreeMap<String, Vec<MockApiResource>>,
}

impl Default for MockDiscovery {
	fn default() -> Self {
		Self::empty()
			.with_core(MockApiResource::namespaced("configmaps", "ConfigMap"))
			.with_core(MockApiResource::namespaced("services", "Service"))
			.with_core(MockApiResource::namespaced("pods", "Pod"))
			.with_core(MockApiResource::cluster_scoped("namespaces", "Namespace"))
			.with_group("apps/v1", MockApiResource::namespaced("deployments", "Deployment"))
			.with_group("apps/v1", MockApiResource::namespaced("statefulsets", "StatefulSet"))
			.with_group(
				"authorization.k8s.io/v1",
				MockApiResource::create_only("selfsubjectaccessreviews", "SelfSubjectAccessReview"),
			)
	}
}

impl MockDiscovery {
	/// A server offering no resources at all.
	pub fn empty() -> Self {
		Self {
			core_resources: Vec::new(),
			group_resources: BTreeMap::new(),
		}
	}

	pub fn with_core(mut self, resource: MockApiResource) -> Self {
		self.core_resources.push(resource);
		self
	}

	pub fn with_group(mut self, group_version: &str, resource: MockApiResource) -> Self {
		self.group_resources
			.entry(group_version.to_string())
			.or_default()
			.push(resource);
		self
	}

	/// Find a resource by apiVersion and kind.
	pub fn find(&self, api_version: &str, kind: &str) -> Option<&MockApiResource> {
		let resources = if api_version.contains('/') {
			self.group_resources.get(api_version)?
		} else {
			&self.core_resources
		};
		resources.iter().find(|r| r.kind == kind)
	}
}

/// A mock API resource definition.
#[derive(Debug, Clone)]
pub struct MockApiResource {
	pub name: String,
	pub kind: String,
	pub namespaced: bool,
	pub verbs: Vec<String>,
}

const READ_WRITE_VERBS: &[&str] = &[
	"create", "delete", "get", "list", "patch", "update", "watch",
];

impl MockApiResource {
	pub fn namespaced(name: &str, kind: &str) -> Self {
		Self::with_verbs(name, kind, true, READ_WRITE_VERBS)
	}

	pub fn cluster_scoped(name: &str, kind: &str) -> Self {
		Self::with_verbs(name, kind, false, READ_WRITE_VERBS)
	}

	/// A review-style resource that can only be created, never listed.
	pub fn create_only(name: &str, kind: &str) -> Self {
		Self::with_verbs(name, kind, false, &["create"])
	}

	pub fn with_verbs(name: &str, kind: &str, namespaced: bool, verbs: &[&str]) -> Self {
		Self {
			name: name.to_string(),
			kind: kind.to_string(),
			namespaced,
			verbs: verbs.iter().map(|v| (*v).to_string()).collect(),
		}
	}

	pub(crate) fn scope(&self) -> &'static str {
		if self.namespaced {
			"Namespaced"
		} else {
			"Cluster"
		}
	}
}
