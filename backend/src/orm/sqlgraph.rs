//! Graph specs and the translator that builds them
//!
//! Builders never talk SQL. They hand a [`GraphSpec`] or [`QuerySpec`] to the
//! driver, and every spec here is a pure function of the descriptor and the
//! staged mutation or query state: the same input always yields an equal
//! spec, whichever driver later executes it.

use super::error::ValidationError;
use super::mutation::{Mutation, Op};
use super::predicate::{Order, OrderDirection, Predicate};
use super::schema::{Cardinality, EntityDescriptor, RelationDescriptor};
use super::value::{FieldType, Id, IdKind, Value};

/// Limit injected when an offset is given without a limit.
pub const IMPLICIT_LIMIT: u64 = i32::MAX as u64;

/// Identifier column of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdSpec {
    pub column: &'static str,
    pub kind: IdKind,
}

/// The table a spec operates on.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NodeSpec {
    pub entity: &'static EntityDescriptor,
    pub table: &'static str,
    pub id: IdSpec,
}

impl NodeSpec {
    pub fn of(entity: &'static EntityDescriptor) -> Self {
        Self {
            entity,
            table: entity.table,
            id: IdSpec {
                column: entity.id.column,
                kind: entity.id.kind,
            },
        }
    }
}

/// One scalar assignment.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldSpec {
    pub column: &'static str,
    pub field_type: FieldType,
    pub value: Value,
}

/// The far side of an edge operation.
#[derive(Debug, Clone, PartialEq)]
pub struct EdgeTarget {
    pub table: &'static str,
    pub id: IdSpec,
    /// Storage keys of the target nodes; empty means "every neighbor" for
    /// clear operations.
    pub keys: Vec<i64>,
}

/// One edge operation, oriented from the spec's node.
#[derive(Debug, Clone, PartialEq)]
pub struct EdgeSpec {
    pub relation: &'static str,
    pub cardinality: Cardinality,
    pub inverse: bool,
    pub table: &'static str,
    pub columns: Vec<&'static str>,
    pub target: EdgeTarget,
}

impl EdgeSpec {
    fn new(relation: &'static RelationDescriptor, keys: Vec<i64>) -> Self {
        Self {
            relation: relation.name,
            cardinality: relation.cardinality,
            inverse: relation.inverse,
            table: relation.table,
            columns: relation.columns.to_vec(),
            target: EdgeTarget {
                table: relation.target.table,
                id: IdSpec {
                    column: relation.target.id.column,
                    kind: relation.target.id.kind,
                },
                keys,
            },
        }
    }

    /// The spec's own row holds the foreign key.
    pub fn owns_foreign_key(&self) -> bool {
        match self.cardinality {
            Cardinality::ManyToOne => true,
            Cardinality::OneToOne => self.inverse,
            Cardinality::OneToMany | Cardinality::ManyToMany => false,
        }
    }

    pub fn column(&self) -> &'static str {
        self.columns.first().copied().unwrap_or_default()
    }

    /// Join-table columns as (this side, target side).
    pub fn join_columns(&self) -> (&'static str, &'static str) {
        let owner = self.columns.first().copied().unwrap_or_default();
        let target = self.columns.get(1).copied().unwrap_or_default();
        if self.inverse {
            (target, owner)
        } else {
            (owner, target)
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreateSpec {
    pub node: NodeSpec,
    pub fields: Vec<FieldSpec>,
    pub edges: Vec<EdgeSpec>,
}

/// Which rows an update touches.
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateTarget {
    One(i64),
    Where(Vec<Predicate>),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldMutations {
    pub set: Vec<FieldSpec>,
    pub add: Vec<FieldSpec>,
    pub clear: Vec<&'static str>,
}

impl FieldMutations {
    pub fn is_empty(&self) -> bool {
        self.set.is_empty() && self.add.is_empty() && self.clear.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct EdgeMutations {
    pub clear: Vec<EdgeSpec>,
    pub add: Vec<EdgeSpec>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UpdateSpec {
    pub node: NodeSpec,
    pub target: UpdateTarget,
    pub fields: FieldMutations,
    pub edges: EdgeMutations,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeleteSpec {
    pub node: NodeSpec,
    pub target: UpdateTarget,
}

/// A mutation handed to the driver.
#[derive(Debug, Clone, PartialEq)]
pub enum GraphSpec {
    Create(CreateSpec),
    Update(UpdateSpec),
    Delete(DeleteSpec),
}

impl GraphSpec {
    pub fn node(&self) -> &NodeSpec {
        match self {
            GraphSpec::Create(s) => &s.node,
            GraphSpec::Update(s) => &s.node,
            GraphSpec::Delete(s) => &s.node,
        }
    }
}

/// Aggregate function over a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateFn {
    Count,
    Sum,
    Min,
    Max,
    Mean,
}

impl AggregateFn {
    pub fn to_sql(&self) -> &'static str {
        match self {
            AggregateFn::Count => "COUNT",
            AggregateFn::Sum => "SUM",
            AggregateFn::Min => "MIN",
            AggregateFn::Max => "MAX",
            AggregateFn::Mean => "AVG",
        }
    }
}

/// A selected column and the type its values decode as.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ColumnSpec {
    pub name: &'static str,
    pub field_type: FieldType,
    pub aggregate: Option<AggregateFn>,
}

impl ColumnSpec {
    pub fn plain(name: &'static str, field_type: FieldType) -> Self {
        Self {
            name,
            field_type,
            aggregate: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Projection {
    Columns(Vec<ColumnSpec>),
    /// A single `COUNT(*)` over the (limited) result set
    Count,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderSpec {
    pub column: &'static str,
    pub direction: OrderDirection,
}

/// Traversal from a source query to the nodes it reaches over an edge.
#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    pub source: QuerySpec,
    pub edge: EdgeSpec,
}

/// Restrict a many-to-many read to the neighbors of `owners`; the driver
/// appends each row's owner key as a trailing integer column.
#[derive(Debug, Clone, PartialEq)]
pub struct JoinOwners {
    pub table: &'static str,
    pub owner_column: &'static str,
    pub target_column: &'static str,
    pub owners: Vec<i64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct QuerySpec {
    pub node: NodeSpec,
    pub projection: Projection,
    pub predicates: Vec<Predicate>,
    pub order: Vec<OrderSpec>,
    pub group_by: Vec<&'static str>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
    pub from: Option<Box<Step>>,
    pub join_owners: Option<JoinOwners>,
}

/// One row of driver output, aligned with the requested columns.
pub type Row = Vec<Value>;

/// Query parameters shared by every read terminal.
#[derive(Debug, Clone)]
pub struct QueryState {
    pub entity: &'static EntityDescriptor,
    pub predicates: Vec<Predicate>,
    pub order: Vec<Order>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
    pub from: Option<Box<Traversal>>,
}

/// A pending `query_edge` hop.
#[derive(Debug, Clone)]
pub struct Traversal {
    pub source: QueryState,
    pub relation: &'static RelationDescriptor,
}

impl QueryState {
    pub fn new(entity: &'static EntityDescriptor) -> Self {
        Self {
            entity,
            predicates: Vec::new(),
            order: Vec::new(),
            limit: None,
            offset: None,
            from: None,
        }
    }
}

/// What a read returns.
#[derive(Debug, Clone, PartialEq)]
pub enum Select {
    /// Id, every scalar column, and the table's foreign keys if asked
    Nodes { with_foreign_keys: bool },
    Fields(Vec<String>),
    Count,
    Group {
        fields: Vec<String>,
        aggregates: Vec<(AggregateFn, Option<String>)>,
    },
}

fn storage_keys<'a>(
    entity: &'static EntityDescriptor,
    ids: impl Iterator<Item = &'a Id>,
) -> Result<Vec<i64>, ValidationError> {
    ids.map(|id| id.storage_key(entity.label)).collect()
}

fn field_specs<'a>(
    entity: &'static EntityDescriptor,
    values: impl Fn(&'static str) -> Option<&'a Value>,
) -> Vec<FieldSpec> {
    entity
        .columns
        .iter()
        .filter_map(|c| {
            values(c.name).map(|v| FieldSpec {
                column: c.name,
                field_type: c.field_type,
                value: v.clone(),
            })
        })
        .collect()
}

/// Build the insert spec: one assignment per staged scalar in column order,
/// one edge spec per relation with staged targets.
pub fn create_spec(m: &Mutation) -> Result<CreateSpec, ValidationError> {
    let entity = m.entity();
    let fields = field_specs(entity, |name| m.field(name));
    let mut edges = Vec::new();
    for relation in entity.relations {
        let keys = storage_keys(relation.target, m.edge_ids(relation.name))?;
        if !keys.is_empty() {
            edges.push(EdgeSpec::new(relation, keys));
        }
    }
    Ok(CreateSpec {
        node: NodeSpec::of(entity),
        fields,
        edges,
    })
}

fn mutation_target(m: &Mutation) -> Result<UpdateTarget, ValidationError> {
    let entity = m.entity();
    match (m.op(), m.id()) {
        (Op::UpdateOne | Op::DeleteOne, Some(id)) if !id.is_empty() => {
            Ok(UpdateTarget::One(id.storage_key(entity.label)?))
        }
        (Op::UpdateOne | Op::DeleteOne, _) => Err(ValidationError::MissingId {
            entity: entity.label,
        }),
        _ => {
            for p in m.predicates() {
                p.validate(entity)?;
            }
            Ok(UpdateTarget::Where(m.predicates().to_vec()))
        }
    }
}

/// Build the update spec with separate Set / Add / Clear lists and edge
/// Clear / Add lists. Clears come first when the driver applies them.
pub fn update_spec(m: &Mutation) -> Result<UpdateSpec, ValidationError> {
    let entity = m.entity();
    let target = mutation_target(m)?;
    let fields = FieldMutations {
        set: field_specs(entity, |name| m.field(name)),
        add: field_specs(entity, |name| m.added_fields().get(name)),
        clear: entity
            .columns
            .iter()
            .filter(|c| m.field_cleared(c.name))
            .map(|c| c.name)
            .collect(),
    };

    let mut edges = EdgeMutations::default();
    for relation in entity.relations {
        if m.edge_cleared(relation.name) {
            edges.clear.push(EdgeSpec::new(relation, Vec::new()));
        }
        let removed = storage_keys(relation.target, m.removed_edge_ids(relation.name))?;
        if !removed.is_empty() {
            edges.clear.push(EdgeSpec::new(relation, removed));
        }
        let added = storage_keys(relation.target, m.edge_ids(relation.name))?;
        if !added.is_empty() {
            edges.add.push(EdgeSpec::new(relation, added));
        }
    }

    Ok(UpdateSpec {
        node: NodeSpec::of(entity),
        target,
        fields,
        edges,
    })
}

pub fn delete_spec(m: &Mutation) -> Result<DeleteSpec, ValidationError> {
    Ok(DeleteSpec {
        node: NodeSpec::of(m.entity()),
        target: mutation_target(m)?,
    })
}

fn resolve_field(
    entity: &'static EntityDescriptor,
    name: &str,
) -> Result<(&'static str, FieldType), ValidationError> {
    match (entity.static_field(name), entity.field_type(name)) {
        (Some(field), Some(ty)) => Ok((field, ty)),
        _ => Err(ValidationError::UnknownField {
            entity: entity.label,
            field: name.to_string(),
        }),
    }
}

fn node_columns(entity: &'static EntityDescriptor, with_foreign_keys: bool) -> Vec<ColumnSpec> {
    let mut columns = vec![ColumnSpec::plain(entity.id.column, FieldType::Int)];
    columns.extend(
        entity
            .columns
            .iter()
            .map(|c| ColumnSpec::plain(c.name, c.field_type)),
    );
    if with_foreign_keys {
        columns.extend(
            entity
                .foreign_keys
                .iter()
                .map(|fk| ColumnSpec::plain(fk.column, FieldType::Int)),
        );
    }
    columns
}

fn projection(
    entity: &'static EntityDescriptor,
    select: &Select,
) -> Result<(Projection, Vec<&'static str>), ValidationError> {
    Ok(match select {
        Select::Nodes { with_foreign_keys } => (
            Projection::Columns(node_columns(entity, *with_foreign_keys)),
            Vec::new(),
        ),
        Select::Fields(fields) => {
            let columns = fields
                .iter()
                .map(|f| resolve_field(entity, f).map(|(name, ty)| ColumnSpec::plain(name, ty)))
                .collect::<Result<Vec<_>, _>>()?;
            (Projection::Columns(columns), Vec::new())
        }
        Select::Count => (Projection::Count, Vec::new()),
        Select::Group { fields, aggregates } => {
            let mut group_by = Vec::new();
            let mut columns = Vec::new();
            for f in fields {
                let (name, ty) = resolve_field(entity, f)?;
                group_by.push(name);
                columns.push(ColumnSpec::plain(name, ty));
            }
            for (func, field) in aggregates {
                let (name, ty) = match field {
                    Some(f) => resolve_field(entity, f)?,
                    None => (entity.id.column, FieldType::Int),
                };
                let field_type = match func {
                    AggregateFn::Count => FieldType::Int,
                    AggregateFn::Mean => FieldType::Float,
                    _ => ty,
                };
                columns.push(ColumnSpec {
                    name,
                    field_type,
                    aggregate: Some(*func),
                });
            }
            (Projection::Columns(columns), group_by)
        }
    })
}

/// Build a read spec. Offsets without a limit get [`IMPLICIT_LIMIT`].
pub fn query_spec(state: &QueryState, select: &Select) -> Result<QuerySpec, ValidationError> {
    let entity = state.entity;
    for p in &state.predicates {
        p.validate(entity)?;
    }
    let order = state
        .order
        .iter()
        .map(|o| {
            resolve_field(entity, &o.field).map(|(column, _)| OrderSpec {
                column,
                direction: o.direction,
            })
        })
        .collect::<Result<Vec<_>, _>>()?;
    let (projection, group_by) = projection(entity, select)?;

    let limit = match (state.limit, state.offset) {
        (None, Some(_)) => Some(IMPLICIT_LIMIT),
        (limit, _) => limit,
    };

    let from = match &state.from {
        Some(traversal) => Some(Box::new(neighbors(traversal)?)),
        None => None,
    };

    Ok(QuerySpec {
        node: NodeSpec::of(entity),
        projection,
        predicates: state.predicates.clone(),
        order,
        group_by,
        limit,
        offset: state.offset,
        from,
        join_owners: None,
    })
}

/// The traversal step from `traversal.source` over its relation.
pub fn neighbors(traversal: &Traversal) -> Result<Step, ValidationError> {
    let source = query_spec(
        &traversal.source,
        &Select::Fields(vec![traversal.source.entity.id.column.to_string()]),
    )?;
    Ok(Step {
        source,
        edge: EdgeSpec::new(traversal.relation, Vec::new()),
    })
}

/// Many-to-many restriction used when eager loading `relation` for `owners`.
pub fn join_owners(relation: &'static RelationDescriptor, owners: Vec<i64>) -> JoinOwners {
    let (owner_column, target_column) = relation.join_columns();
    JoinOwners {
        table: relation.table,
        owner_column,
        target_column,
        owners,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inventory::{LOCATION, LOCATION_TYPE, USER, USERS_GROUP};
    use pretty_assertions::assert_eq;

    fn staged_location() -> Mutation {
        let mut m = Mutation::new(&LOCATION, Op::Create);
        m.set_field("name", "Core site".into());
        m.set_field("latitude", 32.1.into());
        m.add_edge_ids("type", [Id::Int(4)]);
        m.add_edge_ids("parent", [Id::from("9")]);
        m
    }

    #[test]
    fn test_create_spec_is_deterministic() {
        let a = create_spec(&staged_location()).unwrap();
        let b = create_spec(&staged_location()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_create_spec_fields_in_column_order() {
        let spec = create_spec(&staged_location()).unwrap();
        let columns: Vec<_> = spec.fields.iter().map(|f| f.column).collect();
        assert_eq!(columns, vec!["name", "latitude"]);
        assert_eq!(spec.node.table, "locations");
        assert_eq!(spec.node.id.kind, IdKind::String);
    }

    #[test]
    fn test_create_spec_edge_direction() {
        let spec = create_spec(&staged_location()).unwrap();
        let type_edge = spec.edges.iter().find(|e| e.relation == "type").unwrap();
        assert!(!type_edge.inverse);
        assert!(type_edge.owns_foreign_key());
        assert_eq!(type_edge.columns, vec!["location_type"]);
        assert_eq!(type_edge.target.keys, vec![4]);

        let parent = spec.edges.iter().find(|e| e.relation == "parent").unwrap();
        assert!(parent.inverse);
        assert_eq!(parent.target.keys, vec![9]);
    }

    #[test]
    fn test_update_spec_lists() {
        let mut m = Mutation::new(&LOCATION_TYPE, Op::UpdateOne);
        m.set_id(Id::Int(3));
        m.set_field("name", "Floor".into());
        m.add_field("sort_index", 1.into());
        m.clear_field("map_type");
        m.clear_edge("locations");
        m.add_edge_ids("locations", [Id::from("12")]);

        let spec = update_spec(&m).unwrap();
        assert_eq!(spec.target, UpdateTarget::One(3));
        assert_eq!(spec.fields.set.len(), 1);
        assert_eq!(spec.fields.add[0].value, Value::Int(1));
        assert_eq!(spec.fields.clear, vec!["map_type"]);
        assert_eq!(spec.edges.clear.len(), 1);
        assert!(spec.edges.clear[0].target.keys.is_empty());
        assert_eq!(spec.edges.add[0].target.keys, vec![12]);
    }

    #[test]
    fn test_update_one_without_id() {
        let m = Mutation::new(&LOCATION_TYPE, Op::UpdateOne);
        assert_eq!(
            update_spec(&m),
            Err(ValidationError::MissingId {
                entity: "location_type"
            })
        );
    }

    #[test]
    fn test_offset_without_limit_is_bounded() {
        let mut state = QueryState::new(&LOCATION);
        state.offset = Some(20);
        let spec = query_spec(&state, &Select::Nodes { with_foreign_keys: false }).unwrap();
        assert_eq!(spec.limit, Some(IMPLICIT_LIMIT));
        assert_eq!(spec.offset, Some(20));
    }

    #[test]
    fn test_node_columns_with_foreign_keys() {
        let state = QueryState::new(&LOCATION);
        let spec = query_spec(&state, &Select::Nodes { with_foreign_keys: true }).unwrap();
        let Projection::Columns(columns) = spec.projection else {
            panic!("expected columns");
        };
        assert_eq!(columns.first().map(|c| c.name), Some("id"));
        assert_eq!(
            columns.iter().rev().take(2).map(|c| c.name).collect::<Vec<_>>(),
            vec!["location_children", "location_type"]
        );
    }

    #[test]
    fn test_unknown_order_field() {
        let mut state = QueryState::new(&LOCATION);
        state.order.push(Order::desc("height"));
        assert!(query_spec(&state, &Select::Count).is_err());
    }

    #[test]
    fn test_neighbors_step() {
        let traversal = Traversal {
            source: QueryState::new(&USERS_GROUP),
            relation: USERS_GROUP.relation("members").unwrap(),
        };
        let step = neighbors(&traversal).unwrap();
        assert_eq!(step.edge.cardinality, Cardinality::ManyToMany);
        assert_eq!(step.edge.join_columns(), ("users_group_id", "user_id"));
        assert_eq!(step.source.node.table, "users_groups");

        let inverse = USER.relation("groups").unwrap();
        assert_eq!(inverse.join_columns(), ("user_id", "users_group_id"));
    }
}
