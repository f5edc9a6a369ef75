//! `/openapi/v3` index and per-group-version documents.

use std::collections::BTreeMap;

use serde_json::json;
use wiremock::{
	matchers::{method, path},
	Mock, MockServer, ResponseTemplate,
};

/// Serve `documents`, keyed by API path (`api/v1`, `apis/apps/v1`).
///
/// Document URLs in the index carry a `hash` query, like a real server's.
pub(crate) async fn mount_openapi(server: &MockServer, documents: &BTreeMap<String, serde_json::Value>) {
	let paths: serde_json::Map<String, serde_json::Value> = documents
		.keys()
		.map(|api_path| {
			(
				api_path.clone(),
				json!({"serverRelativeURL": format!("/openapi/v3/{api_path}?hash=MOCK")}),
			)
		})
		.collect();

	Mock::given(method("GET"))
		.and(path("/openapi/v3"))
		.respond_with(ResponseTemplate::new(200).set_body_json(json!({"paths": paths})))
		.mount(server)
		.await;

	for (api_path, document) in documents {
		Mock::given(method("GET"))
			.and(path(format!("/openapi/v3/{api_path}")))
			.respond_with(ResponseTemplate::new(200).set_body_json(document.clone()))
			.mount(server)
			.await;
	}
}
