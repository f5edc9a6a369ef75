//! Field trees: the static shape of a resource kind, derived from the
//! cluster's OpenAPI v3 documents.

mod openapi;
mod resolve;

use std::{collections::HashMap, sync::Arc};

use indexmap::IndexMap;
use kube::core::GroupVersionKind;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::{debug, instrument};

pub use self::{
	openapi::{OpenApiDocument, OpenApiIndex, Schema},
	resolve::field_tree_from_document,
};
use crate::{
	client::{ClientError, ClientRegistry, ClientSet},
	reauth::AuthFailure,
	resource::openapi_path,
};

/// Name of the synthetic leaf standing in for open or scalar-only shapes,
/// and of the wildcard path segment.
pub const WILDCARD: &str = "*";

/// Errors that can occur while building a field tree.
#[derive(Debug, Error)]
pub enum SchemaError {
	#[error(transparent)]
	Client(#[from] ClientError),

	#[error("building OpenAPI request for `{path}`")]
	Request {
		path: String,
		#[source]
		source: http::Error,
	},

	#[error("fetching OpenAPI document `{path}`")]
	Fetch {
		path: String,
		#[source]
		source: Box<kube::Error>,
	},

	#[error("group-version `{0}` is not published in the OpenAPI index")]
	GroupVersionNotPublished(String),

	#[error("kind {gvk} not found in OpenAPI document")]
	KindNotFound { gvk: String },

	#[error("malformed schema at `{path}`: {reason}")]
	MalformedSchema { path: String, reason: &'static str },

	#[error("unresolvable reference `{reference}` at `{path}`")]
	UnresolvableRef { reference: String, path: String },
}

impl AuthFailure for SchemaError {
	fn is_auth_failure(&self) -> bool {
		match self {
			Self::Client(e) => e.is_auth_failure(),
			Self::Fetch { source, .. } => source.is_auth_failure(),
			_ => false,
		}
	}
}

/// How a field's value is shaped.
///
/// Containers carry the kind of their elements, so `[][]string` is
/// `Array(Array(Scalar))`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldKind {
	Scalar,
	Object,
	Array(Box<FieldKind>),
	Map(Box<FieldKind>),
}

/// Top-level fields of a kind (or the children of one field), in schema order.
pub type FieldTree = IndexMap<String, Arc<Field>>;

/// One property path of a kind's schema.
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
	pub name: String,
	/// Property names from the root down to (excluding) this field.
	pub ancestor_path: Vec<String>,
	pub level: usize,
	pub kind: FieldKind,
	/// Display type: `string`, `[]Container`, `map[string]string`, `ObjectMeta`.
	pub type_name: String,
	pub required: bool,
	pub enum_values: Option<Vec<serde_json::Value>>,
	pub description: Option<String>,
	pub format: Option<String>,
	/// For arrays and maps, the children of the element/value shape.
	pub children: FieldTree,
}

impl Field {
	pub fn path(&self) -> Vec<String> {
		let mut path = self.ancestor_path.clone();
		path.push(self.name.clone());
		path
	}

	pub fn is_leaf(&self) -> bool {
		self.children.is_empty()
	}
}

type TreeKey = (String, GroupVersionKind);

/// Builds and caches field trees per (context, GVK).
pub struct SchemaResolver {
	registry: Arc<ClientRegistry>,
	indexes: RwLock<HashMap<String, Arc<OpenApiIndex>>>,
	documents: RwLock<HashMap<(String, String), Arc<OpenApiDocument>>>,
	trees: RwLock<HashMap<TreeKey, FieldTree>>,
}

impl SchemaResolver {
	pub fn new(registry: Arc<ClientRegistry>) -> Self {
		Self {
			registry,
			indexes: RwLock::new(HashMap::new()),
			documents: RwLock::new(HashMap::new()),
			trees: RwLock::new(HashMap::new()),
		}
	}

	/// The field tree of `gvk` as published by `context`.
	#[instrument(skip(self), fields(kind = %gvk.kind))]
	pub async fn field_tree(
		&self,
		context: &str,
		gvk: &GroupVersionKind,
	) -> Result<FieldTree, SchemaError> {
		let context = self.registry.resolve_context(context).await?;
		let key = (context, gvk.clone());

		if let Some(tree) = self.trees.read().get(&key) {
			return Ok(tree.clone());
		}

		let document = self.document(&key.0, gvk).await?;
		let tree = field_tree_from_document(&document, gvk)?;
		debug!(context = %key.0, fields = tree.len(), "built field tree");

		Ok(self.trees.write().entry(key).or_insert(tree).clone())
	}

	/// Drop every cached index, document and tree of a context.
	pub fn invalidate(&self, context: &str) {
		self.indexes.write().remove(context);
		self.documents.write().retain(|(c, _), _| c != context);
		self.trees.write().retain(|(c, _), _| c != context);
	}

	pub fn invalidate_all(&self) {
		self.indexes.write().clear();
		self.documents.write().clear();
		self.trees.write().clear();
	}

	async fn index(&self, context: &str) -> Result<Arc<OpenApiIndex>, SchemaError> {
		if let Some(index) = self.indexes.read().get(context) {
			return Ok(Arc::clone(index));
		}

		let index: OpenApiIndex = self
			.registry
			.with_reauth(context, |clients| get_json(clients, "/openapi/v3".to_string()))
			.await?;
		debug!(context, paths = index.paths.len(), "fetched OpenAPI index");

		let index = Arc::new(index);
		self.indexes
			.write()
			.insert(context.to_string(), Arc::clone(&index));
		Ok(index)
	}

	async fn document(
		&self,
		context: &str,
		gvk: &GroupVersionKind,
	) -> Result<Arc<OpenApiDocument>, SchemaError> {
		let path = openapi_path(gvk);
		let key = (context.to_string(), path);

		if let Some(document) = self.documents.read().get(&key) {
			return Ok(Arc::clone(document));
		}

		let index = self.index(context).await?;
		let url = index
			.paths
			.get(&key.1)
			.map(|entry| entry.server_relative_url.clone())
			.ok_or_else(|| SchemaError::GroupVersionNotPublished(key.1.clone()))?;

		let document: OpenApiDocument = self
			.registry
			.with_reauth(context, |clients| get_json(clients, url.clone()))
			.await?;
		debug!(
			context,
			path = %key.1,
			schemas = document.components.schemas.len(),
			"fetched OpenAPI document"
		);

		let document = Arc::new(document);
		self.documents.write().insert(key, Arc::clone(&document));
		Ok(document)
	}
}

async fn get_json<T: DeserializeOwned>(clients: ClientSet, url: String) -> Result<T, SchemaError> {
	let request = http::Request::get(url.as_str())
		.body(Vec::new())
		.map_err(|source| SchemaError::Request {
			path: url.clone(),
			source,
		})?;

	clients
		.client()
		.request::<T>(request)
		.await
		.map_err(|source| SchemaError::Fetch {
			path: url,
			source: Box::new(source),
		})
}
