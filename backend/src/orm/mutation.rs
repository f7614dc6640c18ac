//! Staged changes for one create, update or delete
//!
//! A [`Mutation`] is owned by a single builder. Staging methods never fail:
//! unknown names and mistyped values are recorded and reported by
//! [`Mutation::check_staging`] before any I/O happens.

use std::collections::{BTreeMap, BTreeSet};

use super::error::ValidationError;
use super::predicate::Predicate;
use super::schema::{ColumnDescriptor, EntityDescriptor, RelationDescriptor};
use super::value::{Id, Value};

/// Kind of operation a mutation belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Create,
    Update,
    UpdateOne,
    Delete,
    DeleteOne,
}

impl Op {
    pub fn as_str(&self) -> &'static str {
        match self {
            Op::Create => "create",
            Op::Update => "update",
            Op::UpdateOne => "update_one",
            Op::Delete => "delete",
            Op::DeleteOne => "delete_one",
        }
    }

    pub fn is_update(&self) -> bool {
        matches!(self, Op::Update | Op::UpdateOne)
    }
}

/// Pending changes on one entity type.
#[derive(Debug, Clone)]
pub struct Mutation {
    entity: &'static EntityDescriptor,
    op: Op,
    id: Option<Id>,
    set: BTreeMap<&'static str, Value>,
    add: BTreeMap<&'static str, Value>,
    cleared: BTreeSet<&'static str>,
    added_edges: BTreeMap<&'static str, BTreeSet<Id>>,
    removed_edges: BTreeMap<&'static str, BTreeSet<Id>>,
    cleared_edges: BTreeSet<&'static str>,
    predicates: Vec<Predicate>,
    staging_errors: Vec<ValidationError>,
}

impl Mutation {
    pub fn new(entity: &'static EntityDescriptor, op: Op) -> Self {
        Self {
            entity,
            op,
            id: None,
            set: BTreeMap::new(),
            add: BTreeMap::new(),
            cleared: BTreeSet::new(),
            added_edges: BTreeMap::new(),
            removed_edges: BTreeMap::new(),
            cleared_edges: BTreeSet::new(),
            predicates: Vec::new(),
            staging_errors: Vec::new(),
        }
    }

    pub fn entity(&self) -> &'static EntityDescriptor {
        self.entity
    }

    pub fn op(&self) -> Op {
        self.op
    }

    pub fn id(&self) -> Option<&Id> {
        self.id.as_ref()
    }

    pub(crate) fn set_id(&mut self, id: Id) {
        self.id = Some(id);
    }

    pub fn predicates(&self) -> &[Predicate] {
        &self.predicates
    }

    pub fn add_predicate(&mut self, predicate: Predicate) {
        self.predicates.push(predicate);
    }

    fn resolve_column(&mut self, field: &str) -> Option<&'static ColumnDescriptor> {
        let column = self.entity.column(field);
        if column.is_none() {
            self.staging_errors.push(ValidationError::UnknownField {
                entity: self.entity.label,
                field: field.to_string(),
            });
        }
        column
    }

    fn resolve_relation(&mut self, edge: &str) -> Option<&'static RelationDescriptor> {
        let relation = self.entity.relation(edge);
        if relation.is_none() {
            self.staging_errors.push(ValidationError::UnknownEdge {
                entity: self.entity.label,
                edge: edge.to_string(),
            });
        }
        relation
    }

    fn typed(&mut self, column: &'static ColumnDescriptor, value: Value) -> Option<Value> {
        let got = value.type_name();
        match value.coerce(column.field_type) {
            Some(Value::Null) if !column.nullable => {
                self.staging_errors.push(ValidationError::NotNullable {
                    entity: self.entity.label,
                    field: column.name,
                });
                None
            }
            Some(v) => Some(v),
            None => {
                self.staging_errors.push(ValidationError::TypeMismatch {
                    entity: self.entity.label,
                    field: column.name,
                    expected: column.field_type.name(),
                    got,
                });
                None
            }
        }
    }

    /// Stage a value for `field`, replacing any previous value or clear.
    pub fn set_field(&mut self, field: &str, value: Value) {
        let Some(column) = self.resolve_column(field) else {
            return;
        };
        if self.op.is_update() && column.immutable {
            self.staging_errors.push(ValidationError::Immutable {
                entity: self.entity.label,
                field: column.name,
            });
            return;
        }
        if let Some(value) = self.typed(column, value) {
            self.cleared.remove(column.name);
            self.set.insert(column.name, value);
        }
    }

    /// Stage a numeric increment for `field`.
    pub fn add_field(&mut self, field: &str, delta: Value) {
        let Some(column) = self.resolve_column(field) else {
            return;
        };
        if !column.field_type.is_numeric() {
            self.staging_errors.push(ValidationError::NotNumeric {
                entity: self.entity.label,
                field: column.name,
            });
            return;
        }
        let Some(delta) = self.typed(column, delta) else {
            return;
        };
        let total = match (self.add.remove(column.name), delta) {
            (Some(Value::Int(a)), Value::Int(b)) => match a.checked_add(b) {
                Some(sum) => Value::Int(sum),
                None => {
                    self.staging_errors.push(ValidationError::Overflow {
                        entity: self.entity.label,
                        field: column.name,
                    });
                    return;
                }
            },
            (Some(a), b) => Value::Float(a.as_f64().unwrap_or(0.0) + b.as_f64().unwrap_or(0.0)),
            (None, b) => b,
        };
        self.add.insert(column.name, total);
    }

    /// Stage a NULL assignment for `field`.
    pub fn clear_field(&mut self, field: &str) {
        let Some(column) = self.resolve_column(field) else {
            return;
        };
        if !column.nullable {
            self.staging_errors.push(ValidationError::NotNullable {
                entity: self.entity.label,
                field: column.name,
            });
            return;
        }
        self.set.remove(column.name);
        self.add.remove(column.name);
        self.cleared.insert(column.name);
    }

    pub fn add_edge_ids<I: Into<Id>>(&mut self, edge: &str, ids: impl IntoIterator<Item = I>) {
        let Some(relation) = self.resolve_relation(edge) else {
            return;
        };
        self.added_edges
            .entry(relation.name)
            .or_default()
            .extend(ids.into_iter().map(Into::into));
    }

    pub fn remove_edge_ids<I: Into<Id>>(&mut self, edge: &str, ids: impl IntoIterator<Item = I>) {
        let Some(relation) = self.resolve_relation(edge) else {
            return;
        };
        self.removed_edges
            .entry(relation.name)
            .or_default()
            .extend(ids.into_iter().map(Into::into));
    }

    pub fn clear_edge(&mut self, edge: &str) {
        let Some(relation) = self.resolve_relation(edge) else {
            return;
        };
        self.added_edges.remove(relation.name);
        self.removed_edges.remove(relation.name);
        self.cleared_edges.insert(relation.name);
    }

    pub fn field(&self, name: &str) -> Option<&Value> {
        self.set.get(name)
    }

    pub fn fields(&self) -> &BTreeMap<&'static str, Value> {
        &self.set
    }

    pub fn added_fields(&self) -> &BTreeMap<&'static str, Value> {
        &self.add
    }

    pub fn cleared_fields(&self) -> &BTreeSet<&'static str> {
        &self.cleared
    }

    pub fn field_cleared(&self, name: &str) -> bool {
        self.cleared.contains(name)
    }

    pub fn edge_ids(&self, edge: &str) -> impl Iterator<Item = &Id> {
        self.added_edges.get(edge).into_iter().flatten()
    }

    pub fn removed_edge_ids(&self, edge: &str) -> impl Iterator<Item = &Id> {
        self.removed_edges.get(edge).into_iter().flatten()
    }

    pub fn edge_cleared(&self, edge: &str) -> bool {
        self.cleared_edges.contains(edge)
    }

    /// No field or edge change staged.
    pub fn is_empty(&self) -> bool {
        self.set.is_empty()
            && self.add.is_empty()
            && self.cleared.is_empty()
            && self.added_edges.is_empty()
            && self.removed_edges.is_empty()
            && self.cleared_edges.is_empty()
    }

    /// First problem recorded while staging.
    pub fn check_staging(&self) -> Result<(), ValidationError> {
        match self.staging_errors.first() {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    /// Fill unset columns from their default generators.
    pub fn apply_defaults(&mut self) {
        for column in self.entity.columns {
            if let Some(default) = column.default {
                self.set.entry(column.name).or_insert_with(default);
            }
        }
    }

    /// Fill update defaults for columns the caller neither set nor cleared.
    pub fn apply_update_defaults(&mut self) {
        for column in self.entity.columns {
            let Some(default) = column.update_default else {
                continue;
            };
            if !self.set.contains_key(column.name) && !self.cleared.contains(column.name) {
                self.set.insert(column.name, default());
            }
        }
    }

    pub fn check_required_fields(&self) -> Result<(), ValidationError> {
        for column in self.entity.columns {
            if column.required && !self.set.contains_key(column.name) {
                return Err(ValidationError::MissingField {
                    entity: self.entity.label,
                    field: column.name,
                });
            }
        }
        Ok(())
    }

    pub fn run_validators(&self) -> Result<(), ValidationError> {
        for column in self.entity.columns {
            let (Some(validator), Some(value)) = (column.validator, self.set.get(column.name))
            else {
                continue;
            };
            if value.is_null() {
                continue;
            }
            validator(value).map_err(|cause| ValidationError::InvalidField {
                entity: self.entity.label,
                field: column.name,
                cause,
            })?;
        }
        Ok(())
    }

    /// A one-to-one or many-to-one edge carries at most one target.
    pub fn check_unique_edges(&self) -> Result<(), ValidationError> {
        for relation in self.entity.relations.iter().filter(|r| r.is_unique()) {
            if self.edge_ids(relation.name).count() > 1 {
                return Err(ValidationError::UniqueEdge {
                    entity: self.entity.label,
                    edge: relation.name,
                });
            }
        }
        Ok(())
    }

    pub fn check_required_edges(&self) -> Result<(), ValidationError> {
        for relation in self.entity.relations.iter().filter(|r| r.required) {
            if self.edge_ids(relation.name).next().is_none() {
                return Err(ValidationError::MissingEdge {
                    entity: self.entity.label,
                    edge: relation.name,
                });
            }
        }
        Ok(())
    }

    /// Updates may not clear a required unique edge without re-assigning it.
    pub fn check_cleared_required_edges(&self) -> Result<(), ValidationError> {
        for relation in self
            .entity
            .relations
            .iter()
            .filter(|r| r.required && r.is_unique())
        {
            if self.edge_cleared(relation.name) && self.edge_ids(relation.name).next().is_none() {
                return Err(ValidationError::ClearedRequiredEdge {
                    entity: self.entity.label,
                    edge: relation.name,
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inventory::{EQUIPMENT, LOCATION, LOCATION_TYPE};
    use assert_matches::assert_matches;

    #[test]
    fn test_unknown_names_are_deferred() {
        let mut m = Mutation::new(&LOCATION, Op::Create);
        m.set_field("nam", "Typo".into());
        m.add_edge_ids("kind", [Id::Int(1)]);

        assert_matches!(
            m.check_staging(),
            Err(ValidationError::UnknownField { entity: "location", .. })
        );
        assert!(m.is_empty());
    }

    #[test]
    fn test_type_mismatch() {
        let mut m = Mutation::new(&LOCATION, Op::Create);
        m.set_field("latitude", "north".into());
        assert_matches!(
            m.check_staging(),
            Err(ValidationError::TypeMismatch { field: "latitude", expected: "float", got: "string", .. })
        );
    }

    #[test]
    fn test_increments_accumulate() {
        let mut m = Mutation::new(&LOCATION_TYPE, Op::UpdateOne);
        m.add_field("sort_index", 2.into());
        m.add_field("sort_index", 3.into());
        assert_eq!(m.added_fields().get("sort_index"), Some(&Value::Int(5)));
        assert_eq!(m.check_staging(), Ok(()));
    }

    #[test]
    fn test_increment_overflow_is_rejected() {
        let mut m = Mutation::new(&LOCATION_TYPE, Op::UpdateOne);
        m.add_field("sort_index", Value::Int(i64::MAX));
        m.add_field("sort_index", 1.into());
        assert_matches!(
            m.check_staging(),
            Err(ValidationError::Overflow { field: "sort_index", .. })
        );
    }

    #[test]
    fn test_int_widened_for_float_column() {
        let mut m = Mutation::new(&LOCATION, Op::Create);
        m.set_field("latitude", 12.into());
        assert_eq!(m.field("latitude"), Some(&Value::Float(12.0)));
        assert_eq!(m.check_staging(), Ok(()));
    }

    #[test]
    fn test_defaults_do_not_override() {
        let mut m = Mutation::new(&LOCATION_TYPE, Op::Create);
        m.set_field("map_zoom_level", 12.into());
        m.apply_defaults();
        assert_eq!(m.field("map_zoom_level"), Some(&Value::Int(12)));
        assert_eq!(m.field("site"), Some(&Value::Bool(false)));
    }

    #[test]
    fn test_required_field_missing() {
        let mut m = Mutation::new(&LOCATION, Op::Create);
        m.apply_defaults();
        assert_eq!(
            m.check_required_fields(),
            Err(ValidationError::MissingField {
                entity: "location",
                field: "name"
            })
        );
    }

    #[test]
    fn test_validator_failure_names_field() {
        let mut m = Mutation::new(&LOCATION, Op::Create);
        m.set_field("latitude", 120.0.into());
        assert_matches!(
            m.run_validators(),
            Err(ValidationError::InvalidField { field: "latitude", .. })
        );
    }

    #[test]
    fn test_unique_edge_with_two_targets() {
        let mut m = Mutation::new(&LOCATION, Op::Create);
        m.add_edge_ids("type", [Id::Int(1), Id::Int(2)]);
        assert_eq!(
            m.check_unique_edges(),
            Err(ValidationError::UniqueEdge {
                entity: "location",
                edge: "type"
            })
        );
    }

    #[test]
    fn test_required_edge_missing() {
        let m = Mutation::new(&EQUIPMENT, Op::Create);
        assert_eq!(
            m.check_required_edges(),
            Err(ValidationError::MissingEdge {
                entity: "equipment",
                edge: "type"
            })
        );
    }

    #[test]
    fn test_update_rules() {
        let mut m = Mutation::new(&LOCATION, Op::Update);
        m.set_field("create_time", chrono::Utc::now().into());
        assert_matches!(m.check_staging(), Err(ValidationError::Immutable { .. }));

        let mut m = Mutation::new(&LOCATION, Op::Update);
        m.clear_field("name");
        assert_matches!(m.check_staging(), Err(ValidationError::NotNullable { field: "name", .. }));

        let mut m = Mutation::new(&LOCATION, Op::Update);
        m.add_field("name", 1.into());
        assert_matches!(m.check_staging(), Err(ValidationError::NotNumeric { .. }));
    }

    #[test]
    fn test_increments_accumulate_update() {
        let mut m = Mutation::new(&LOCATION_TYPE, Op::Update);
        m.add_field("sort_index", 2.into());
        m.add_field("sort_index", 3.into());
        assert_eq!(m.added_fields().get("sort_index"), Some(&Value::Int(5)));
    }

    #[test]
    fn test_update_default_respects_caller() {
        let stamp = chrono::DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        let mut m = Mutation::new(&LOCATION, Op::UpdateOne);
        m.set_field("update_time", stamp.into());
        m.apply_update_defaults();
        assert_eq!(m.field("update_time"), Some(&Value::Time(stamp)));

        let mut m = Mutation::new(&LOCATION, Op::UpdateOne);
        m.apply_update_defaults();
        assert_matches!(m.field("update_time"), Some(Value::Time(_)));
    }

    #[test]
    fn test_clearing_required_edge() {
        let mut m = Mutation::new(&LOCATION, Op::UpdateOne);
        m.clear_edge("type");
        assert_matches!(
            m.check_cleared_required_edges(),
            Err(ValidationError::ClearedRequiredEdge { edge: "type", .. })
        );

        m.add_edge_ids("type", [Id::Int(3)]);
        assert_eq!(m.check_cleared_required_edges(), Ok(()));
    }
}
