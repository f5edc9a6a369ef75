//! Resource type identities shared by every component.

use std::fmt;

use kube::{
	core::GroupVersionKind,
	discovery::{ApiCapabilities, ApiResource, Scope},
};

/// Kubernetes API resource scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceScope {
	/// Resource is namespaced (e.g., Deployment, ConfigMap).
	Namespaced,

	/// Resource is cluster-wide (e.g., Namespace, ClusterRole).
	ClusterWide,
}

impl From<&Scope> for ResourceScope {
	fn from(scope: &Scope) -> Self {
		match scope {
			Scope::Namespaced => Self::Namespaced,
			Scope::Cluster => Self::ClusterWide,
		}
	}
}

/// A resource kind as offered by one cluster's discovery API.
#[derive(Debug, Clone)]
pub struct DiscoveredResource {
	/// The kube ApiResource for making API calls.
	pub api_resource: ApiResource,
	/// Whether this resource is namespaced or cluster-wide.
	pub scope: ResourceScope,
	/// Verbs the server accepts for this resource.
	pub verbs: Vec<String>,
}

impl DiscoveredResource {
	pub fn new(api_resource: ApiResource, capabilities: &ApiCapabilities) -> Self {
		Self {
			api_resource,
			scope: ResourceScope::from(&capabilities.scope),
			verbs: capabilities.operations.clone(),
		}
	}

	pub fn gvk(&self) -> GroupVersionKind {
		gvk_from_api_resource(&self.api_resource)
	}

	/// Listable resources are the only ones that can back a watch cache.
	pub fn is_listable(&self) -> bool {
		self.verbs.iter().any(|v| v == kube::discovery::verbs::LIST)
	}
}

/// Create a GroupVersionKind from an apiVersion string and kind.
pub fn gvk_from_api_version(api_version: &str, kind: &str) -> GroupVersionKind {
	let (group, version) = match api_version.split_once('/') {
		Some((g, v)) => (g, v),
		None => ("", api_version),
	};
	GroupVersionKind::gvk(group, version, kind)
}

/// Create a GroupVersionKind from a kube ApiResource.
pub fn gvk_from_api_resource(ar: &ApiResource) -> GroupVersionKind {
	GroupVersionKind::gvk(&ar.group, &ar.version, &ar.kind)
}

/// The OpenAPI v3 index key for a group-version (`api/v1`, `apis/apps/v1`).
pub fn openapi_path(gvk: &GroupVersionKind) -> String {
	if gvk.group.is_empty() {
		format!("api/{}", gvk.version)
	} else {
		format!("apis/{}/{}", gvk.group, gvk.version)
	}
}

/// Displays a GVK the way kubectl prints it: `Deployment.v1.apps`.
pub struct DisplayGvk<'a>(pub &'a GroupVersionKind);

impl fmt::Display for DisplayGvk<'_> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let gvk = self.0;
		if gvk.group.is_empty() {
			write!(f, "{}.{}", gvk.kind, gvk.version)
		} else {
			write!(f, "{}.{}.{}", gvk.kind, gvk.version, gvk.group)
		}
	}
}
