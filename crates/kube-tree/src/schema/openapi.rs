//! The subset of the OpenAPI v3 documents served by `/openapi/v3` that field
//! trees are built from.

use indexmap::IndexMap;
use kube::core::GroupVersionKind;
use serde::Deserialize;

/// Prefix of every local schema reference in a v3 document.
pub const SCHEMA_REF_PREFIX: &str = "#/components/schemas/";
/// Prefix used by v2 (swagger) documents, accepted for hand-written fixtures.
const DEFINITIONS_REF_PREFIX: &str = "#/definitions/";

/// `GET /openapi/v3`: API path → document location.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OpenApiIndex {
	#[serde(default)]
	pub paths: IndexMap<String, IndexEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IndexEntry {
	#[serde(rename = "serverRelativeURL")]
	pub server_relative_url: String,
}

/// One group-version's document, e.g. `GET /openapi/v3/apis/apps/v1`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OpenApiDocument {
	#[serde(default)]
	pub components: Components,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Components {
	#[serde(default)]
	pub schemas: IndexMap<String, Schema>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Schema {
	#[serde(rename = "type")]
	pub type_: Option<String>,
	pub format: Option<String>,
	pub description: Option<String>,
	#[serde(rename = "$ref")]
	pub reference: Option<String>,
	#[serde(default)]
	pub all_of: Vec<Schema>,
	#[serde(default)]
	pub properties: IndexMap<String, Schema>,
	#[serde(default)]
	pub required: Vec<String>,
	pub items: Option<Box<Schema>>,
	pub additional_properties: Option<AdditionalProperties>,
	#[serde(rename = "enum")]
	pub enum_values: Option<Vec<serde_json::Value>>,
	#[serde(rename = "x-kubernetes-group-version-kind", default)]
	pub group_version_kind: Vec<GvkAnnotation>,
	#[serde(rename = "x-kubernetes-int-or-string", default)]
	pub int_or_string: bool,
	#[serde(rename = "x-kubernetes-preserve-unknown-fields", default)]
	pub preserve_unknown_fields: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum AdditionalProperties {
	Allowed(bool),
	Schema(Box<Schema>),
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GvkAnnotation {
	#[serde(default)]
	pub group: String,
	#[serde(default)]
	pub version: String,
	#[serde(default)]
	pub kind: String,
}

impl GvkAnnotation {
	fn matches(&self, gvk: &GroupVersionKind) -> bool {
		self.group == gvk.group && self.version == gvk.version && self.kind == gvk.kind
	}
}

impl Schema {
	/// The schema's reference, looking through a single-element `allOf`
	/// wrapper (how v3 documents attach a description or default to a `$ref`).
	pub fn reference(&self) -> Option<&str> {
		if let Some(reference) = self.reference.as_deref() {
			return Some(reference);
		}
		match self.all_of.as_slice() {
			[single] => single.reference(),
			_ => None,
		}
	}

	/// The value schema of a map, if this schema is map-shaped.
	pub fn map_values(&self) -> Option<&Schema> {
		match &self.additional_properties {
			Some(AdditionalProperties::Schema(schema)) => Some(schema),
			_ => None,
		}
	}

	/// True for a schema that carries no shape at all, only documentation.
	pub fn is_untyped(&self) -> bool {
		self.type_.is_none()
			&& self.reference().is_none()
			&& self.properties.is_empty()
			&& self.items.is_none()
			&& self.additional_properties.is_none()
			&& !self.int_or_string
			&& !self.preserve_unknown_fields
	}

	/// The primitive type name if this schema is a plain scalar.
	pub fn primitive_type(&self) -> Option<&str> {
		if self.int_or_string {
			return Some("int-or-string");
		}
		if !self.properties.is_empty() || self.items.is_some() || self.map_values().is_some() {
			return None;
		}
		match self.type_.as_deref() {
			Some("object" | "array") | None => None,
			Some(primitive) => Some(primitive),
		}
	}
}

impl OpenApiDocument {
	/// Look up a schema by its `$ref` fragment.
	pub fn resolve(&self, reference: &str) -> Option<&Schema> {
		let name = reference
			.strip_prefix(SCHEMA_REF_PREFIX)
			.or_else(|| reference.strip_prefix(DEFINITIONS_REF_PREFIX))?;
		self.components.schemas.get(name)
	}

	/// Find the schema annotated with the given group/version/kind.
	pub fn find_kind(&self, gvk: &GroupVersionKind) -> Option<(&str, &Schema)> {
		self.components
			.schemas
			.iter()
			.find(|(_, schema)| schema.group_version_kind.iter().any(|a| a.matches(gvk)))
			.map(|(name, schema)| (name.as_str(), schema))
	}
}

/// `#/components/schemas/io.k8s.api.core.v1.PodSpec` → `PodSpec`.
pub fn bare_name(reference: &str) -> &str {
	let name = reference.rsplit('/').next().unwrap_or(reference);
	name.rsplit('.').next().unwrap_or(name)
}
