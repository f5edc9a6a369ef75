//! Node trees: a field tree materialized against live objects.
//!
//! Arrays get one node per index up to the longest array observed among the
//! objects, maps one node per distinct key. Nodes are stored in an arena
//! keyed by their full path, which is also their identity across rebuilds.

use std::{collections::HashMap, fmt, sync::Arc};

use indexmap::IndexSet;

use crate::schema::{Field, FieldKind, FieldTree, WILDCARD};

/// Full path of a node from the object root.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct NodePath(Vec<String>);

impl NodePath {
	pub fn new<I, S>(segments: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		Self(segments.into_iter().map(Into::into).collect())
	}

	/// Parse a dotted path. `\.` escapes a literal dot inside a segment, so
	/// `metadata.labels.app\.kubernetes\.io/name` has three segments.
	pub fn parse(dotted: &str) -> Self {
		let mut segments = Vec::new();
		let mut current = String::new();
		let mut chars = dotted.chars();

		while let Some(c) = chars.next() {
			match c {
				'\\' => match chars.next() {
					Some(escaped) => current.push(escaped),
					None => current.push('\\'),
				},
				'.' => segments.push(std::mem::take(&mut current)),
				c => current.push(c),
			}
		}
		if !current.is_empty() || !segments.is_empty() {
			segments.push(current);
		}
		Self(segments)
	}

	pub fn segments(&self) -> &[String] {
		&self.0
	}

	pub fn len(&self) -> usize {
		self.0.len()
	}

	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}

	pub fn child(&self, name: &str) -> Self {
		let mut segments = self.0.clone();
		segments.push(name.to_string());
		Self(segments)
	}

	pub fn parent(&self) -> Option<Self> {
		let (_, parent) = self.0.split_last()?;
		Some(Self(parent.to_vec()))
	}

	/// Whether any segment is the `*` wildcard.
	pub fn is_wildcard(&self) -> bool {
		self.0.iter().any(|s| s == WILDCARD)
	}

	/// Whether `concrete` is one of the paths this (possibly wildcard) path
	/// denotes.
	pub fn matches(&self, concrete: &NodePath) -> bool {
		self.len() == concrete.len()
			&& self
				.0
				.iter()
				.zip(&concrete.0)
				.all(|(pattern, segment)| pattern == WILDCARD || pattern == segment)
	}
}

impl fmt::Display for NodePath {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		for (i, segment) in self.0.iter().enumerate() {
			if i > 0 {
				f.write_str(".")?;
			}
			f.write_str(&segment.replace('.', "\\."))?;
		}
		Ok(())
	}
}

/// One element of a node tree.
#[derive(Debug, Clone)]
pub struct Node {
	pub name: String,
	pub ancestor_path: NodePath,
	pub level: usize,
	/// The schema field behind this node; `None` for materialized array
	/// indices and map keys.
	pub field: Option<Arc<Field>>,
	pub expanded: bool,
	pub selected: bool,
	children: Vec<String>,
}

impl Node {
	pub fn path(&self) -> NodePath {
		self.ancestor_path.child(&self.name)
	}

	/// Display type of the backing field, empty for materialized nodes.
	pub fn type_name(&self) -> &str {
		self.field.as_deref().map_or("", |f| f.type_name.as_str())
	}

	pub fn required(&self) -> bool {
		self.field.as_deref().is_some_and(|f| f.required)
	}

	pub fn is_materialized(&self) -> bool {
		self.field.is_none()
	}

	/// Child names in build order.
	pub fn child_names(&self) -> &[String] {
		&self.children
	}

	pub fn is_leaf(&self) -> bool {
		self.children.is_empty()
	}
}

/// A built node tree.
#[derive(Debug, Clone, Default)]
pub struct NodeTree {
	prefix: NodePath,
	roots: Vec<String>,
	nodes: HashMap<NodePath, Node>,
}

impl NodeTree {
	/// Build a fresh tree for `fields` rooted at `prefix` within `objects`.
	pub fn build(fields: &FieldTree, objects: &[serde_json::Value], prefix: &NodePath) -> Self {
		let mut builder = Builder {
			objects,
			nodes: HashMap::new(),
		};
		let roots = builder.fields(fields, prefix);

		Self {
			prefix: prefix.clone(),
			roots,
			nodes: builder.nodes,
		}
	}

	/// Build a new tree, carrying `expanded`/`selected` over from nodes of
	/// `previous` with the same path.
	///
	/// Wildcard paths have no identity of their own and never inherit state.
	pub fn rebuild(
		previous: &NodeTree,
		fields: &FieldTree,
		objects: &[serde_json::Value],
		prefix: &NodePath,
	) -> Self {
		let mut tree = Self::build(fields, objects, prefix);

		for (path, node) in &mut tree.nodes {
			if path.is_wildcard() {
				continue;
			}
			if let Some(old) = previous.nodes.get(path) {
				node.expanded = old.expanded;
				node.selected = old.selected;
			}
		}

		tree
	}

	pub fn prefix(&self) -> &NodePath {
		&self.prefix
	}

	pub fn len(&self) -> usize {
		self.nodes.len()
	}

	pub fn is_empty(&self) -> bool {
		self.nodes.is_empty()
	}

	pub fn get(&self, path: &NodePath) -> Option<&Node> {
		self.nodes.get(path)
	}

	/// Top-level nodes in build order.
	pub fn roots(&self) -> impl Iterator<Item = &Node> {
		self.roots
			.iter()
			.filter_map(|name| self.nodes.get(&self.prefix.child(name)))
	}

	pub fn children<'a>(&'a self, path: &NodePath) -> impl Iterator<Item = &'a Node> + 'a {
		let path = path.clone();
		self.nodes
			.get(&path)
			.map(|node| node.children.as_slice())
			.unwrap_or_default()
			.iter()
			.filter_map(move |name| self.nodes.get(&path.child(name)))
	}

	/// Every node, depth-first in build order.
	pub fn walk(&self) -> Vec<&Node> {
		let mut out = Vec::with_capacity(self.nodes.len());
		let mut stack: Vec<&Node> = self.roots().collect();
		stack.reverse();

		while let Some(node) = stack.pop() {
			out.push(node);
			let path = node.path();
			let mut children: Vec<&Node> = self.children(&path).collect();
			children.reverse();
			stack.extend(children);
		}
		out
	}

	pub fn selected_paths(&self) -> Vec<NodePath> {
		self.walk()
			.into_iter()
			.filter(|n| n.selected)
			.map(Node::path)
			.collect()
	}

	/// Returns false when no node has this path.
	pub fn set_expanded(&mut self, path: &NodePath, expanded: bool) -> bool {
		match self.nodes.get_mut(path) {
			Some(node) => {
				node.expanded = expanded;
				true
			}
			None => false,
		}
	}

	/// Returns false when no node has this path.
	pub fn set_selected(&mut self, path: &NodePath, selected: bool) -> bool {
		match self.nodes.get_mut(path) {
			Some(node) => {
				node.selected = selected;
				true
			}
			None => false,
		}
	}

	/// Every concrete node a wildcard path denotes, in walk order.
	pub fn expand_wildcard(&self, pattern: &NodePath) -> Vec<&Node> {
		self.walk()
			.into_iter()
			.filter(|node| pattern.matches(&node.path()))
			.collect()
	}
}

struct Builder<'a> {
	objects: &'a [serde_json::Value],
	nodes: HashMap<NodePath, Node>,
}

impl Builder<'_> {
	fn fields(&mut self, fields: &FieldTree, parent: &NodePath) -> Vec<String> {
		let mut names = Vec::with_capacity(fields.len());

		for field in fields.values() {
			let path = parent.child(&field.name);
			let children = self.shape(&field.kind, field, &path);
			self.insert(&field.name, parent, Some(Arc::clone(field)), children);
			names.push(field.name.clone());
		}

		names
	}

	/// Children of the node at `path`, whose value has shape `kind`.
	fn shape(&mut self, kind: &FieldKind, field: &Arc<Field>, path: &NodePath) -> Vec<String> {
		match kind {
			FieldKind::Scalar => Vec::new(),
			FieldKind::Object => self.fields(&field.children, path),
			FieldKind::Array(element) => {
				let len = self.max_observed_len(path);
				(0..len)
					.map(|index| self.materialize(index.to_string(), element, field, path))
					.collect()
			}
			FieldKind::Map(value) => self
				.observed_keys(path)
				.into_iter()
				.map(|key| self.materialize(key, value, field, path))
				.collect(),
		}
	}

	fn materialize(
		&mut self,
		name: String,
		kind: &FieldKind,
		field: &Arc<Field>,
		parent: &NodePath,
	) -> String {
		let path = parent.child(&name);
		let children = self.shape(kind, field, &path);
		self.insert(&name, parent, None, children);
		name
	}

	fn insert(
		&mut self,
		name: &str,
		parent: &NodePath,
		field: Option<Arc<Field>>,
		children: Vec<String>,
	) {
		let node = Node {
			name: name.to_string(),
			ancestor_path: parent.clone(),
			level: parent.len(),
			field,
			expanded: false,
			selected: false,
			children,
		};
		self.nodes.insert(node.path(), node);
	}

	fn max_observed_len(&self, path: &NodePath) -> usize {
		self.objects
			.iter()
			.filter_map(|object| value_at(object, path)?.as_array().map(Vec::len))
			.max()
			.unwrap_or(0)
	}

	fn observed_keys(&self, path: &NodePath) -> IndexSet<String> {
		self.objects
			.iter()
			.filter_map(|object| value_at(object, path)?.as_object())
			.flat_map(|map| map.keys().cloned())
			.collect()
	}
}

/// The fields below `prefix`, which must name an object. Index and key
/// segments step through arrays and maps.
pub fn fields_at(fields: &FieldTree, prefix: &NodePath) -> Option<FieldTree> {
	let mut current = fields;
	let mut segments = prefix.segments().iter();
	while let Some(segment) = segments.next() {
		let field = current.get(segment.as_str())?;
		let mut kind = &field.kind;
		while let FieldKind::Array(inner) | FieldKind::Map(inner) = kind {
			segments.next()?;
			kind = inner;
		}
		if *kind != FieldKind::Object {
			return None;
		}
		current = &field.children;
	}
	Some(current.clone())
}

/// Resolve a node path inside one object. Array segments are indices.
pub fn value_at<'v>(object: &'v serde_json::Value, path: &NodePath) -> Option<&'v serde_json::Value> {
	path.segments()
		.iter()
		.try_fold(object, |value, segment| match value {
			serde_json::Value::Object(map) => map.get(segment),
			serde_json::Value::Array(items) => items.get(segment.parse::<usize>().ok()?),
			_ => None,
		})
}

#[cfg(test)]
mod tests {
	use kube::core::GroupVersionKind;
	use serde_json::json;

	use super::*;
	use crate::schema::{field_tree_from_document, OpenApiDocument};

	fn fields() -> FieldTree {
		let doc: OpenApiDocument = serde_json::from_value(json!({"components": {"schemas": {
			"Widget": {
				"type": "object",
				"x-kubernetes-group-version-kind": [
					{"group": "example.io", "version": "v1", "kind": "Widget"}
				],
				"properties": {
					"metadata": {"type": "object", "properties": {
						"name": {"type": "string"},
						"labels": {"type": "object", "additionalProperties": {"type": "string"}}
					}},
					"spec": {"type": "object", "properties": {
						"gears": {"type": "array", "items": {"$ref": "#/components/schemas/Gear"}},
						"matrix": {"type": "array", "items": {
							"type": "array", "items": {"type": "integer"}
						}},
						"byName": {"type": "object", "additionalProperties": {"$ref": "#/components/schemas/Gear"}},
						"raw": {"type": "object"}
					}}
				}
			},
			"Gear": {"type": "object", "required": ["teeth"], "properties": {
				"teeth": {"type": "integer"}
			}}
		}}}))
		.unwrap();
		field_tree_from_document(&doc, &GroupVersionKind::gvk("example.io", "v1", "Widget"))
			.unwrap()
	}

	fn path(dotted: &str) -> NodePath {
		NodePath::parse(dotted)
	}

	fn child_names<'t>(tree: &'t NodeTree, dotted: &str) -> Vec<&'t str> {
		tree.children(&path(dotted))
			.map(|n| n.name.as_str())
			.collect()
	}

	#[test]
	fn test_array_indices_follow_max_observed_length() {
		let objects = vec![
			json!({"spec": {"gears": []}}),
			json!({"spec": {"gears": [{"teeth": 10}, {"teeth": 12}]}}),
			json!({"spec": {"gears": [{"teeth": 8}]}}),
		];
		let tree = NodeTree::build(&fields(), &objects, &NodePath::default());

		assert_eq!(child_names(&tree, "spec.gears"), vec!["0", "1"]);
		assert_eq!(child_names(&tree, "spec.gears.1"), vec!["teeth"]);
		assert!(tree.get(&path("spec.gears.2")).is_none());
	}

	#[test]
	fn test_missing_or_non_sequence_array_has_no_indices() {
		let objects = vec![
			json!({"spec": {}}),
			json!({"spec": {"gears": "not-a-list"}}),
		];
		let tree = NodeTree::build(&fields(), &objects, &NodePath::default());
		assert!(tree.get(&path("spec.gears")).unwrap().is_leaf());

		let empty = NodeTree::build(&fields(), &[], &NodePath::default());
		assert!(empty.get(&path("spec.gears")).unwrap().is_leaf());
	}

	#[test]
	fn test_map_keys_distinct_in_first_seen_order() {
		let objects = vec![
			json!({"metadata": {"labels": {"tier": "web", "app": "shop"}}}),
			json!({"metadata": {"labels": {"app": "shop", "zone": "b"}}}),
		];
		let tree = NodeTree::build(&fields(), &objects, &NodePath::default());

		assert_eq!(
			child_names(&tree, "metadata.labels"),
			vec!["tier", "app", "zone"]
		);
		assert!(tree.get(&path("metadata.labels.app")).unwrap().is_leaf());
	}

	#[test]
	fn test_nested_containers_materialize_each_level() {
		let objects = vec![json!({"spec": {
			"matrix": [[1, 2], [3]],
			"byName": {"left": {"teeth": 3}}
		}})];
		let tree = NodeTree::build(&fields(), &objects, &NodePath::default());

		assert_eq!(child_names(&tree, "spec.matrix"), vec!["0", "1"]);
		assert_eq!(child_names(&tree, "spec.matrix.0"), vec!["0", "1"]);
		assert_eq!(child_names(&tree, "spec.matrix.1"), vec!["0"]);
		assert_eq!(child_names(&tree, "spec.byName.left"), vec!["teeth"]);

		let teeth = tree.get(&path("spec.byName.left.teeth")).unwrap();
		assert!(teeth.required());
		assert_eq!(teeth.type_name(), "integer");
		assert_eq!(teeth.level, 3);
	}

	#[test]
	fn test_materialized_nodes_have_no_field() {
		let objects = vec![json!({"spec": {"gears": [{"teeth": 1}]}})];
		let tree = NodeTree::build(&fields(), &objects, &NodePath::default());

		let index = tree.get(&path("spec.gears.0")).unwrap();
		assert!(index.is_materialized());
		assert_eq!(index.type_name(), "");
		assert!(!index.required());
		assert_eq!(index.ancestor_path, path("spec.gears"));
	}

	#[test]
	fn test_prefix_roots_tree_inside_objects() {
		let gear_fields = fields()["spec"].children["gears"].children.clone();
		let objects = vec![json!({"spec": {"gears": [{"teeth": 1}]}})];
		let prefix = path("spec.gears.0");
		let tree = NodeTree::build(&gear_fields, &objects, &prefix);

		let teeth = tree.roots().next().unwrap();
		assert_eq!(teeth.path(), path("spec.gears.0.teeth"));
		assert_eq!(teeth.level, 3);
	}

	#[test]
	fn test_rebuild_preserves_flags_on_surviving_paths() {
		let fields = fields();
		let before = vec![json!({"spec": {"gears": [{"teeth": 1}, {"teeth": 2}]}})];
		let mut tree = NodeTree::build(&fields, &before, &NodePath::default());
		assert!(tree.set_expanded(&path("spec"), true));
		assert!(tree.set_expanded(&path("spec.gears"), true));
		assert!(tree.set_selected(&path("spec.gears.1.teeth"), true));

		let after = vec![json!({"spec": {"gears": [{"teeth": 1}]}})];
		let rebuilt = NodeTree::rebuild(&tree, &fields, &after, &NodePath::default());

		assert!(rebuilt.get(&path("spec")).unwrap().expanded);
		assert!(rebuilt.get(&path("spec.gears")).unwrap().expanded);
		assert!(rebuilt.get(&path("spec.gears.1.teeth")).is_none());
		assert!(rebuilt.selected_paths().is_empty());

		let new_node = rebuilt.get(&path("spec.gears.0")).unwrap();
		assert!(!new_node.expanded);
		assert!(!new_node.selected);
	}

	#[test]
	fn test_wildcard_paths_do_not_inherit_state() {
		let fields = fields();
		let mut tree = NodeTree::build(&fields, &[], &NodePath::default());
		assert!(tree.set_selected(&path("spec.raw.*"), true));

		let rebuilt = NodeTree::rebuild(&tree, &fields, &[], &NodePath::default());
		assert!(!rebuilt.get(&path("spec.raw.*")).unwrap().selected);
	}

	#[test]
	fn test_expand_wildcard_matches_concrete_siblings() {
		let objects = vec![json!({"spec": {"gears": [{"teeth": 1}, {"teeth": 2}]}})];
		let tree = NodeTree::build(&fields(), &objects, &NodePath::default());

		let matched: Vec<_> = tree
			.expand_wildcard(&path("spec.gears.*.teeth"))
			.into_iter()
			.map(|n| n.path().to_string())
			.collect();
		assert_eq!(matched, vec!["spec.gears.0.teeth", "spec.gears.1.teeth"]);
		assert!(!path("spec.gears.*.teeth").matches(&path("spec.gears.0")));
	}

	#[test]
	fn test_walk_is_depth_first_in_build_order() {
		let objects = vec![json!({"metadata": {"labels": {"a": "1"}}})];
		let tree = NodeTree::build(&fields(), &objects, &NodePath::default());

		let walked: Vec<_> = tree.walk().iter().map(|n| n.path().to_string()).collect();
		assert_eq!(
			walked,
			vec![
				"metadata",
				"metadata.name",
				"metadata.labels",
				"metadata.labels.a",
				"spec",
				"spec.gears",
				"spec.matrix",
				"spec.byName",
				"spec.raw",
				"spec.raw.*",
			]
		);
		assert_eq!(walked.len(), tree.len());
	}

	#[test]
	fn test_path_parse_and_display() {
		let parsed = NodePath::parse(r"metadata.labels.app\.kubernetes\.io/name");
		assert_eq!(
			parsed.segments(),
			["metadata", "labels", "app.kubernetes.io/name"]
		);
		assert_eq!(parsed.to_string(), r"metadata.labels.app\.kubernetes\.io/name");
		assert!(NodePath::parse("").is_empty());
		assert_eq!(parsed.parent(), Some(path("metadata.labels")));
	}

	#[test]
	fn test_value_at() {
		let object = json!({"spec": {"gears": [{"teeth": 4}]}});
		assert_eq!(
			value_at(&object, &path("spec.gears.0.teeth")),
			Some(&json!(4))
		);
		assert_eq!(value_at(&object, &path("spec.gears.x")), None);
		assert_eq!(value_at(&object, &path("spec.gears.0.teeth.deeper")), None);
	}

	#[test]
	fn test_fields_at_steps_through_containers() {
		let fields = fields();
		let gear = fields_at(&fields, &path("spec.gears.0")).unwrap();
		assert_eq!(gear.keys().collect::<Vec<_>>(), vec!["teeth"]);
		let by_name = fields_at(&fields, &path("spec.byName.fast")).unwrap();
		assert_eq!(by_name.keys().collect::<Vec<_>>(), vec!["teeth"]);
		assert_eq!(fields_at(&fields, &NodePath::default()).unwrap().len(), fields.len());

		assert!(fields_at(&fields, &path("spec.gears")).is_none());
		assert!(fields_at(&fields, &path("spec.matrix.0.1")).is_none());
		assert!(fields_at(&fields, &path("spec.missing")).is_none());
	}
}
