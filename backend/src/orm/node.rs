//! Scanned entity records

use std::collections::BTreeMap;

use serde::Serialize;
use serde::ser::SerializeMap;

use super::error::{Error, ValidationError};
use super::schema::EntityDescriptor;
use super::value::{FromValue, Id, Value};

/// One entity row plus its edge slots.
///
/// A relation absent from [`Edges`] has not been loaded; a present one was
/// loaded, possibly empty.
#[derive(Debug, Clone)]
pub struct Node {
    entity: &'static EntityDescriptor,
    id: Id,
    fields: BTreeMap<&'static str, Value>,
    foreign_keys: BTreeMap<&'static str, Id>,
    edges: Edges,
}

/// Loaded neighbors keyed by relation name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Edges {
    loaded: BTreeMap<&'static str, Vec<Node>>,
}

impl Edges {
    pub fn is_loaded(&self, edge: &str) -> bool {
        self.loaded.contains_key(edge)
    }

    pub(crate) fn mark_loaded(&mut self, edge: &'static str) {
        self.loaded.entry(edge).or_default();
    }

    pub(crate) fn push(&mut self, edge: &'static str, node: Node) {
        self.loaded.entry(edge).or_default().push(node);
    }

    pub fn get(&self, edge: &str) -> Option<&[Node]> {
        self.loaded.get(edge).map(Vec::as_slice)
    }
}

impl Node {
    pub(crate) fn new(entity: &'static EntityDescriptor, id: Id) -> Self {
        Self {
            entity,
            id,
            fields: BTreeMap::new(),
            foreign_keys: BTreeMap::new(),
            edges: Edges::default(),
        }
    }

    pub fn entity(&self) -> &'static EntityDescriptor {
        self.entity
    }

    pub fn id(&self) -> &Id {
        &self.id
    }

    pub(crate) fn set_value(&mut self, field: &'static str, value: Value) {
        self.fields.insert(field, value);
    }

    pub(crate) fn set_foreign_key(&mut self, column: &'static str, key: Id) {
        self.foreign_keys.insert(column, key);
    }

    /// Raw scalar value, `None` when the column was not selected.
    pub fn value(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    pub fn values(&self) -> &BTreeMap<&'static str, Value> {
        &self.fields
    }

    /// Typed scalar value.
    pub fn get<T: FromValue>(&self, field: &str) -> Result<T, Error> {
        let value = self.fields.get(field).unwrap_or(&Value::Null);
        T::from_value(value).ok_or_else(|| {
            Error::Invariant(format!(
                "{}.{}: cannot decode {} as {}",
                self.entity.label,
                field,
                value.type_name(),
                T::expected()
            ))
        })
    }

    /// Foreign-key value captured while scanning, converted to the
    /// referenced entity's id kind.
    pub fn foreign_key(&self, column: &str) -> Option<&Id> {
        self.foreign_keys.get(column)
    }

    pub fn edges(&self) -> &Edges {
        &self.edges
    }

    pub(crate) fn edges_mut(&mut self) -> &mut Edges {
        &mut self.edges
    }

    fn edge_name(&self, edge: &str) -> Result<&'static str, Error> {
        self.entity
            .relation(edge)
            .map(|r| r.name)
            .ok_or_else(|| {
                Error::Validation(ValidationError::UnknownEdge {
                    entity: self.entity.label,
                    edge: edge.to_string(),
                })
            })
    }

    /// Loaded neighbors over `edge`, or [`Error::NotLoaded`].
    pub fn edge(&self, edge: &str) -> Result<&[Node], Error> {
        let name = self.edge_name(edge)?;
        self.edges.get(name).ok_or(Error::NotLoaded {
            entity: self.entity.label,
            edge: name,
        })
    }

    /// Loaded neighbor over a unique edge; `Ok(None)` when loaded and empty.
    pub fn edge_one(&self, edge: &str) -> Result<Option<&Node>, Error> {
        Ok(self.edge(edge)?.first())
    }

    /// Decode into a typed entity.
    pub fn decode<T: Entity>(&self) -> Result<T, Error> {
        T::from_node(self)
    }
}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self.entity, other.entity)
            && self.id == other.id
            && self.fields == other.fields
            && self.edges == other.edges
    }
}

impl Serialize for Node {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        map.serialize_entry(self.entity.id.column, &self.id)?;
        for (field, value) in &self.fields {
            map.serialize_entry(field, value)?;
        }
        if !self.edges.loaded.is_empty() {
            map.serialize_entry("edges", &self.edges.loaded)?;
        }
        map.end()
    }
}

/// A typed view over [`Node`], usually derived with `#[derive(Entity)]`.
pub trait Entity: Sized {
    fn descriptor() -> &'static EntityDescriptor;

    fn from_node(node: &Node) -> Result<Self, Error>;
}
