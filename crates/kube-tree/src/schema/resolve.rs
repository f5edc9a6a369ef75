//! Expansion of an OpenAPI schema into a [`FieldTree`].

use std::{collections::HashSet, sync::Arc};

use indexmap::IndexMap;
use kube::core::GroupVersionKind;
use tracing::trace;

use super::{
	openapi::{bare_name, AdditionalProperties, OpenApiDocument, Schema, SCHEMA_REF_PREFIX},
	Field, FieldKind, FieldTree, SchemaError, WILDCARD,
};
use crate::resource::DisplayGvk;

/// Build the field tree of a kind from an already-fetched document.
pub fn field_tree_from_document(
	document: &OpenApiDocument,
	gvk: &GroupVersionKind,
) -> Result<FieldTree, SchemaError> {
	let (name, schema) = document
		.find_kind(gvk)
		.ok_or_else(|| SchemaError::KindNotFound {
			gvk: DisplayGvk(gvk).to_string(),
		})?;

	let mut visited = HashSet::new();
	visited.insert(format!("{SCHEMA_REF_PREFIX}{name}"));

	let shape = Resolver { document }.shape(schema, &[], visited)?;
	Ok(match shape.kind {
		FieldKind::Object => shape.children,
		_ => wildcard(&[], shape),
	})
}

/// The resolved shape of one schema, before it is attached to a name.
struct Shape {
	kind: FieldKind,
	type_name: String,
	children: FieldTree,
	format: Option<String>,
	description: Option<String>,
	enum_values: Option<Vec<serde_json::Value>>,
}

impl Shape {
	fn scalar(type_name: &str, schema: &Schema) -> Self {
		Self {
			kind: FieldKind::Scalar,
			type_name: type_name.to_string(),
			children: IndexMap::new(),
			format: schema.format.clone(),
			description: schema.description.clone(),
			enum_values: schema.enum_values.clone(),
		}
	}

	fn object(type_name: &str, schema: &Schema, children: FieldTree) -> Self {
		Self {
			kind: FieldKind::Object,
			type_name: type_name.to_string(),
			children,
			format: None,
			description: schema.description.clone(),
			enum_values: None,
		}
	}
}

struct Resolver<'a> {
	document: &'a OpenApiDocument,
}

impl Resolver<'_> {
	/// Resolve `schema`, located at `path`, into a shape.
	///
	/// `visited` holds the references already expanded in this lineage only.
	/// Every property gets its own copy, so a type repeated in unrelated
	/// branches expands fully in each of them.
	fn shape(
		&self,
		schema: &Schema,
		path: &[String],
		mut visited: HashSet<String>,
	) -> Result<Shape, SchemaError> {
		if let Some(reference) = schema.reference() {
			let target =
				self.document
					.resolve(reference)
					.ok_or_else(|| SchemaError::UnresolvableRef {
						reference: reference.to_string(),
						path: path.join("."),
					})?;

			if let Some(primitive) = target.primitive_type() {
				return Ok(Shape::scalar(primitive, target));
			}

			let type_name = bare_name(reference);
			if !visited.insert(reference.to_string()) {
				trace!(reference, path = %path.join("."), "reference cycle, not expanding");
				return Ok(Shape::object(type_name, target, IndexMap::new()));
			}

			// Named free-form types such as apiextensions JSON.
			if target.is_untyped() {
				let leaf = Shape::scalar("object", target);
				return Ok(Shape::object(type_name, target, wildcard(path, leaf)));
			}

			let mut shape = self.shape(target, path, visited)?;
			if shape.kind == FieldKind::Object {
				shape.type_name = type_name.to_string();
			}
			return Ok(shape);
		}

		if let Some(primitive) = schema.primitive_type() {
			return Ok(Shape::scalar(primitive, schema));
		}

		if schema.type_.as_deref() == Some("array") || schema.items.is_some() {
			let items = schema
				.items
				.as_deref()
				.ok_or_else(|| SchemaError::MalformedSchema {
					path: path.join("."),
					reason: "array without items",
				})?;
			let element = self.shape(items, path, visited)?;
			return Ok(Shape {
				kind: FieldKind::Array(Box::new(element.kind)),
				type_name: format!("[]{}", element.type_name),
				description: schema.description.clone().or(element.description),
				..element
			});
		}

		if let Some(values) = schema.map_values() {
			let value = self.shape(values, path, visited)?;
			return Ok(Shape {
				kind: FieldKind::Map(Box::new(value.kind)),
				type_name: format!("map[string]{}", value.type_name),
				description: schema.description.clone().or(value.description),
				..value
			});
		}

		if !schema.properties.is_empty() {
			let children = self.properties(schema, path, &visited)?;
			return Ok(Shape::object("object", schema, children));
		}

		let open_object = schema.type_.as_deref() == Some("object")
			|| schema.preserve_unknown_fields
			|| matches!(schema.additional_properties, Some(AdditionalProperties::Allowed(true)));
		if open_object {
			let leaf = Shape::scalar("object", schema);
			return Ok(Shape::object(
				"object",
				schema,
				wildcard(path, leaf),
			));
		}

		Err(SchemaError::MalformedSchema {
			path: path.join("."),
			reason: "no type and no reference",
		})
	}

	fn properties(
		&self,
		schema: &Schema,
		path: &[String],
		visited: &HashSet<String>,
	) -> Result<FieldTree, SchemaError> {
		let mut fields = IndexMap::with_capacity(schema.properties.len());

		for (name, property) in &schema.properties {
			let mut field_path = path.to_vec();
			field_path.push(name.clone());

			let shape = self.shape(property, &field_path, visited.clone())?;
			let field = Field {
				name: name.clone(),
				ancestor_path: path.to_vec(),
				level: path.len(),
				kind: shape.kind,
				type_name: shape.type_name,
				required: schema.required.iter().any(|r| r == name),
				enum_values: property.enum_values.clone().or(shape.enum_values),
				description: property.description.clone().or(shape.description),
				format: property.format.clone().or(shape.format),
				children: shape.children,
			};
			fields.insert(name.clone(), Arc::new(field));
		}

		Ok(fields)
	}
}

/// A single synthetic `*` leaf standing in for an open or scalar shape.
fn wildcard(path: &[String], leaf: Shape) -> FieldTree {
	let field = Field {
		name: WILDCARD.to_string(),
		ancestor_path: path.to_vec(),
		level: path.len(),
		kind: FieldKind::Scalar,
		type_name: leaf.type_name,
		required: false,
		enum_values: leaf.enum_values,
		description: leaf.description,
		format: leaf.format,
		children: IndexMap::new(),
	};
	IndexMap::from([(WILDCARD.to_string(), Arc::new(field))])
}
