//! Helper functions for mock Kubernetes responses.

use serde_json::{json, Value};

/// Resource version stamped on every served object and list.
pub const RESOURCE_VERSION: &str = "1";

/// A `List` body with the given items.
pub fn list_body(items: Vec<Value>) -> Value {
	json!({
		"kind": "List",
		"apiVersion": "v1",
		"metadata": {"resourceVersion": RESOURCE_VERSION},
		"items": items
	})
}

/// A `Status` failure body, as the API server sends with 4xx responses.
pub fn status_body(code: u16, reason: &str, message: &str) -> Value {
	json!({
		"kind": "Status",
		"apiVersion": "v1",
		"metadata": {},
		"status": "Failure",
		"message": message,
		"reason": reason,
		"code": code
	})
}

/// Set `metadata.resourceVersion` when a manifest does not carry one;
/// watches refuse objects without it.
pub fn with_resource_version(mut manifest: Value) -> Value {
	if let Some(metadata) = manifest.get_mut("metadata").and_then(Value::as_object_mut) {
		metadata
			.entry("resourceVersion")
			.or_insert_with(|| Value::String(RESOURCE_VERSION.to_string()));
	}
	manifest
}

/// Parse a Kubernetes API path into (api_path, resource_name).
///
/// Examples:
/// - `/api/v1/namespaces/default/configmaps/my-config` -> (`/api/v1/namespaces/default/configmaps`, `my-config`)
/// - `/api/v1/namespaces/my-ns` -> (`/api/v1/namespaces`, `my-ns`)
pub fn parse_resource_path(path: &str) -> (String, String) {
	let path = path.trim_end_matches('/');
	match path.rsplit_once('/') {
		Some((api_path, name)) => (api_path.to_string(), name.to_string()),
		None => (path.to_string(), String::new()),
	}
}

/// Extract a cluster-wide path from a namespaced API path.
///
/// Examples:
/// - `/api/v1/namespaces/default/configmaps` -> Some(`/api/v1/configmaps`)
/// - `/api/v1/namespaces` -> None (already cluster-wide for namespaces)
pub fn extract_cluster_wide_path(path: &str) -> Option<String> {
	let (before_ns, after_ns) = path.split_once("/namespaces/")?;
	let slash_idx = after_ns.find('/')?;
	Some(format!("{}{}", before_ns, &after_ns[slash_idx..]))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_parse_resource_path() {
		assert_eq!(
			parse_resource_path("/apis/apps/v1/namespaces/default/deployments/web"),
			(
				"/apis/apps/v1/namespaces/default/deployments".to_string(),
				"web".to_string()
			)
		);
	}

	#[test]
	fn test_extract_cluster_wide_path() {
		assert_eq!(
			extract_cluster_wide_path("/apis/apps/v1/namespaces/default/deployments").as_deref(),
			Some("/apis/apps/v1/deployments")
		);
		assert_eq!(extract_cluster_wide_path("/api/v1/namespaces"), None);
	}

	#[test]
	fn test_resource_version_kept_when_present() {
		let manifest = with_resource_version(json!({"metadata": {"name": "a", "resourceVersion": "42"}}));
		assert_eq!(manifest["metadata"]["resourceVersion"], "42");
		let manifest = with_resource_version(json!({"metadata": {"name": "a"}}));
		assert_eq!(manifest["metadata"]["resourceVersion"], RESOURCE_VERSION);
	}
}
