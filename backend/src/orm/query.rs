//! Query builder
//!
//! A [`Query`] accumulates predicates, ordering, pagination, traversal
//! steps and eager-load requests, then resolves to rows through one of its
//! terminals. Eager loading issues one batched follow-up query per requested
//! relation and distributes the neighbors by key; a neighbor whose key does
//! not match any loaded node aborts the whole read.

use std::collections::BTreeMap;
use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::{debug, error};

use super::context::Context;
use super::driver::Driver;
use super::error::{Error, ValidationError};
use super::node::{Entity, Node};
use super::predicate::{Order, Predicate};
use super::schema::{Cardinality, EntityDescriptor, RelationDescriptor};
use super::sqlgraph::{
    AggregateFn, ColumnSpec, Projection, QuerySpec, QueryState, Row, Select, Traversal,
    join_owners, query_spec,
};
use super::value::{FromValue, Id, Value};

/// A relation to load alongside the primary rows.
#[derive(Debug, Clone)]
struct EagerLoad {
    relation: &'static RelationDescriptor,
    query: Query,
}

/// Reads entities of one type.
#[derive(Debug, Clone)]
pub struct Query {
    driver: Arc<dyn Driver>,
    state: QueryState,
    eager: Vec<EagerLoad>,
    staging_errors: Vec<ValidationError>,
}

fn invariant(message: String) -> Error {
    error!(%message, "Eager loading invariant violated");
    Error::Invariant(message)
}

/// Decode one row into a node. Extra trailing values are ignored.
fn scan_node(entity: &'static EntityDescriptor, columns: &[ColumnSpec], row: &Row) -> Result<Node, Error> {
    if row.len() < columns.len() {
        return Err(Error::Invariant(format!(
            "{}: expected {} columns, driver returned {}",
            entity.label,
            columns.len(),
            row.len()
        )));
    }
    let id = match row.first() {
        Some(Value::Int(key)) => Id::Int(*key).to_kind(entity.id.kind),
        other => {
            return Err(Error::Invariant(format!(
                "{}: unexpected id value {other:?}",
                entity.label
            )));
        }
    };
    let mut node = Node::new(entity, id);
    for (column, value) in columns.iter().zip(row).skip(1) {
        if let Some(field) = entity.column(column.name) {
            node.set_value(field.name, value.clone());
        } else if let Some(fk) = entity.foreign_key(column.name) {
            if let Value::Int(key) = value {
                node.set_foreign_key(fk.column, Id::Int(*key).to_kind(fk.references.id.kind));
            }
        }
    }
    Ok(node)
}

fn storage_key(node: &Node) -> Result<i64, Error> {
    Ok(node.id().storage_key(node.entity().label)?)
}

impl Query {
    pub fn new(driver: Arc<dyn Driver>, entity: &'static EntityDescriptor) -> Self {
        Self {
            driver,
            state: QueryState::new(entity),
            eager: Vec::new(),
            staging_errors: Vec::new(),
        }
    }

    pub fn entity(&self) -> &'static EntityDescriptor {
        self.state.entity
    }

    pub fn filter(mut self, predicate: Predicate) -> Self {
        self.state.predicates.push(predicate);
        self
    }

    pub fn filter_all(mut self, predicates: impl IntoIterator<Item = Predicate>) -> Self {
        self.state.predicates.extend(predicates);
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.state.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.state.offset = Some(offset);
        self
    }

    pub fn order(mut self, order: Order) -> Self {
        self.state.order.push(order);
        self
    }

    /// Drop ordering, limit and offset, keeping predicates and eager loads.
    pub(crate) fn unwindowed(mut self) -> Self {
        self.state.order.clear();
        self.state.limit = None;
        self.state.offset = None;
        self
    }

    /// Eager-load `edge` for every returned node.
    pub fn with(self, edge: &str) -> Self {
        self.with_query(edge, |q| q)
    }

    /// Eager-load `edge`, shaping the neighbor query with `configure`.
    pub fn with_query(mut self, edge: &str, configure: impl FnOnce(Query) -> Query) -> Self {
        match self.state.entity.relation(edge) {
            Some(relation) => {
                let query = configure(Query::new(self.driver.clone(), relation.target));
                self.eager.push(EagerLoad { relation, query });
            }
            None => self.staging_errors.push(ValidationError::UnknownEdge {
                entity: self.state.entity.label,
                edge: edge.to_string(),
            }),
        }
        self
    }

    /// Nodes reachable from this query's results over `edge`.
    pub fn query_edge(self, edge: &str) -> Query {
        let Some(relation) = self.state.entity.relation(edge) else {
            let mut query = Query::new(self.driver.clone(), self.state.entity);
            query.staging_errors = self.staging_errors;
            query.staging_errors.push(ValidationError::UnknownEdge {
                entity: self.state.entity.label,
                edge: edge.to_string(),
            });
            return query;
        };
        let mut query = Query::new(self.driver.clone(), relation.target);
        query.staging_errors = self.staging_errors;
        query.state.from = Some(Box::new(Traversal {
            source: self.state,
            relation,
        }));
        query
    }

    fn check_staging(&self) -> Result<(), Error> {
        match self.staging_errors.first() {
            Some(err) => Err(err.clone().into()),
            None => Ok(()),
        }
    }

    async fn fetch(&self, ctx: &Context, spec: &QuerySpec) -> Result<Vec<Row>, Error> {
        debug!(
            entity = spec.node.entity.label,
            table = spec.node.table,
            limit = ?spec.limit,
            offset = ?spec.offset,
            "Executing query spec"
        );
        ctx.run(self.driver.query(ctx, spec)).await
    }

    async fn fetch_select(&self, ctx: &Context, select: &Select) -> Result<Vec<Row>, Error> {
        ctx.check()?;
        self.check_staging()?;
        let spec = query_spec(&self.state, select)?;
        self.fetch(ctx, &spec).await
    }

    /// Every matching node, with requested edges loaded.
    pub async fn all(&self, ctx: &Context) -> Result<Vec<Node>, Error> {
        self.load(ctx).await
    }

    /// Every matching node decoded into `T`.
    pub async fn all_as<T: Entity>(&self, ctx: &Context) -> Result<Vec<T>, Error> {
        self.all(ctx).await?.iter().map(T::from_node).collect()
    }

    fn load<'a>(&'a self, ctx: &'a Context) -> BoxFuture<'a, Result<Vec<Node>, Error>> {
        Box::pin(async move {
            ctx.check()?;
            self.check_staging()?;
            let entity = self.state.entity;
            let spec = query_spec(&self.state, &Select::Nodes { with_foreign_keys: true })?;
            let Projection::Columns(columns) = &spec.projection else {
                return Err(Error::Invariant("node query without columns".into()));
            };
            let rows = self.fetch(ctx, &spec).await?;
            let mut nodes = rows
                .iter()
                .map(|row| scan_node(entity, columns, row))
                .collect::<Result<Vec<_>, _>>()?;
            self.load_edges(ctx, &mut nodes).await?;
            Ok(nodes)
        })
    }

    fn load_edges<'a>(
        &'a self,
        ctx: &'a Context,
        nodes: &'a mut [Node],
    ) -> BoxFuture<'a, Result<(), Error>> {
        Box::pin(async move {
            for eager in &self.eager {
                for node in nodes.iter_mut() {
                    node.edges_mut().mark_loaded(eager.relation.name);
                }
                if nodes.is_empty() {
                    continue;
                }
                if eager.relation.owns_foreign_key() {
                    load_owned(ctx, eager, nodes).await?;
                } else if eager.relation.cardinality == Cardinality::ManyToMany {
                    load_joined(ctx, eager, nodes).await?;
                } else {
                    load_referencing(ctx, eager, nodes).await?;
                }
            }
            Ok(())
        })
    }

    /// First node, or [`Error::NotFound`].
    pub async fn first(&self, ctx: &Context) -> Result<Node, Error> {
        let mut nodes = self.clone().limit(1).all(ctx).await?;
        match nodes.pop() {
            Some(node) => Ok(node),
            None => Err(Error::NotFound {
                entity: self.state.entity.label,
            }),
        }
    }

    /// First node, `None` when nothing matches.
    pub async fn first_opt(&self, ctx: &Context) -> Result<Option<Node>, Error> {
        match self.first(ctx).await {
            Ok(node) => Ok(Some(node)),
            Err(Error::NotFound { .. }) => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// The single matching node; zero is [`Error::NotFound`], more than one
    /// is [`Error::NotSingular`].
    pub async fn only(&self, ctx: &Context) -> Result<Node, Error> {
        let mut nodes = self.clone().limit(2).all(ctx).await?;
        match nodes.len() {
            1 => Ok(nodes.remove(0)),
            0 => Err(Error::NotFound {
                entity: self.state.entity.label,
            }),
            _ => Err(Error::NotSingular {
                entity: self.state.entity.label,
            }),
        }
    }

    /// Identifiers of every matching node.
    pub async fn ids(&self, ctx: &Context) -> Result<Vec<Id>, Error> {
        let entity = self.state.entity;
        let rows = self
            .fetch_select(ctx, &Select::Fields(vec![entity.id.column.to_string()]))
            .await?;
        rows.iter()
            .map(|row| match row.first() {
                Some(Value::Int(key)) => Ok(Id::Int(*key).to_kind(entity.id.kind)),
                other => Err(Error::Invariant(format!(
                    "{}: unexpected id value {other:?}",
                    entity.label
                ))),
            })
            .collect()
    }

    pub async fn first_id(&self, ctx: &Context) -> Result<Id, Error> {
        let mut ids = self.clone().limit(1).ids(ctx).await?;
        ids.pop().ok_or(Error::NotFound {
            entity: self.state.entity.label,
        })
    }

    pub async fn only_id(&self, ctx: &Context) -> Result<Id, Error> {
        let mut ids = self.clone().limit(2).ids(ctx).await?;
        match ids.len() {
            1 => Ok(ids.remove(0)),
            0 => Err(Error::NotFound {
                entity: self.state.entity.label,
            }),
            _ => Err(Error::NotSingular {
                entity: self.state.entity.label,
            }),
        }
    }

    /// Number of matching rows, honoring limit and offset.
    pub async fn count(&self, ctx: &Context) -> Result<u64, Error> {
        let rows = self.fetch_select(ctx, &Select::Count).await?;
        match rows.first().and_then(|row| row.first()) {
            Some(Value::Int(n)) => Ok(u64::try_from(*n).unwrap_or_default()),
            other => Err(Error::Invariant(format!(
                "{}: unexpected count value {other:?}",
                self.state.entity.label
            ))),
        }
    }

    pub async fn exist(&self, ctx: &Context) -> Result<bool, Error> {
        Ok(self.count(ctx).await? > 0)
    }

    /// Project the given fields instead of whole nodes.
    pub fn select(self, fields: &[&str]) -> FieldSelect {
        FieldSelect {
            query: self,
            fields: fields.iter().map(|f| f.to_string()).collect(),
        }
    }

    /// Group by the given fields and compute aggregates per group.
    pub fn group_by(self, fields: &[&str]) -> GroupBy {
        GroupBy {
            query: self,
            fields: fields.iter().map(|f| f.to_string()).collect(),
            aggregates: Vec::new(),
        }
    }
}

/// Many-to-one (and inverse one-to-one): the loaded nodes hold the key.
async fn load_owned(ctx: &Context, eager: &EagerLoad, nodes: &mut [Node]) -> Result<(), Error> {
    let relation = eager.relation;
    let column = relation.column();
    let mut by_target: BTreeMap<Id, Vec<usize>> = BTreeMap::new();
    for (index, node) in nodes.iter().enumerate() {
        if let Some(key) = node.foreign_key(column) {
            by_target.entry(key.clone()).or_default().push(index);
        }
    }
    if by_target.is_empty() {
        return Ok(());
    }

    let neighbors = eager
        .query
        .clone()
        .filter(Predicate::id_in(by_target.keys().cloned()))
        .load(ctx)
        .await?;
    for neighbor in neighbors {
        let Some(indices) = by_target.get(neighbor.id()) else {
            return Err(invariant(format!(
                "unexpected foreign-key \"{column}\" returned {}",
                neighbor.id()
            )));
        };
        for &index in indices {
            nodes[index].edges_mut().push(relation.name, neighbor.clone());
        }
    }
    Ok(())
}

/// One-to-many (and one-to-one): the neighbors hold the key.
async fn load_referencing(ctx: &Context, eager: &EagerLoad, nodes: &mut [Node]) -> Result<(), Error> {
    let relation = eager.relation;
    let column = relation.column();
    let mut by_owner: BTreeMap<i64, Vec<usize>> = BTreeMap::new();
    for (index, node) in nodes.iter().enumerate() {
        by_owner.entry(storage_key(node)?).or_default().push(index);
    }

    let neighbors = eager
        .query
        .clone()
        .filter(Predicate::foreign_key_in(column, by_owner.keys().copied().collect()))
        .load(ctx)
        .await?;
    for neighbor in neighbors {
        let Some(key) = neighbor.foreign_key(column) else {
            return Err(invariant(format!(
                "foreign-key \"{column}\" is nil for node {}",
                neighbor.id()
            )));
        };
        let owner = key.storage_key(relation.target.label)?;
        let Some(indices) = by_owner.get(&owner) else {
            return Err(invariant(format!(
                "unexpected foreign-key \"{column}\" returned {key} for node {}",
                neighbor.id()
            )));
        };
        for &index in indices {
            nodes[index].edges_mut().push(relation.name, neighbor.clone());
        }
    }
    Ok(())
}

/// Many-to-many: the join table pairs owners with neighbors.
async fn load_joined(ctx: &Context, eager: &EagerLoad, nodes: &mut [Node]) -> Result<(), Error> {
    let relation = eager.relation;
    let mut by_owner: BTreeMap<i64, Vec<usize>> = BTreeMap::new();
    for (index, node) in nodes.iter().enumerate() {
        by_owner.entry(storage_key(node)?).or_default().push(index);
    }

    let query = &eager.query;
    query.check_staging()?;
    let mut spec = query_spec(&query.state, &Select::Nodes { with_foreign_keys: true })?;
    spec.join_owners = Some(join_owners(relation, by_owner.keys().copied().collect()));
    let Projection::Columns(columns) = &spec.projection else {
        return Err(Error::Invariant("node query without columns".into()));
    };

    let rows = query.fetch(ctx, &spec).await?;
    let mut owners = Vec::with_capacity(rows.len());
    let mut neighbors = Vec::with_capacity(rows.len());
    for row in &rows {
        let owner = match row.get(columns.len()) {
            Some(Value::Int(owner)) => *owner,
            other => {
                return Err(invariant(format!(
                    "missing join owner for edge \"{}\": {other:?}",
                    relation.name
                )));
            }
        };
        owners.push(owner);
        neighbors.push(scan_node(relation.target, columns, row)?);
    }
    query.load_edges(ctx, &mut neighbors).await?;

    for (owner, neighbor) in owners.into_iter().zip(neighbors) {
        let Some(indices) = by_owner.get(&owner) else {
            return Err(invariant(format!(
                "unexpected join owner {owner} returned for edge \"{}\"",
                relation.name
            )));
        };
        for &index in indices {
            nodes[index].edges_mut().push(relation.name, neighbor.clone());
        }
    }
    Ok(())
}

/// Field projection returned by [`Query::select`].
#[derive(Debug, Clone)]
pub struct FieldSelect {
    query: Query,
    fields: Vec<String>,
}

impl FieldSelect {
    /// Raw rows, one value per selected field.
    pub async fn scan(&self, ctx: &Context) -> Result<Vec<Row>, Error> {
        self.query
            .fetch_select(ctx, &Select::Fields(self.fields.clone()))
            .await
    }

    /// Values of the single selected field.
    pub async fn values<T: FromValue>(&self, ctx: &Context) -> Result<Vec<T>, Error> {
        let entity = self.query.entity();
        if self.fields.len() != 1 {
            return Err(ValidationError::MultipleFields {
                entity: entity.label,
                op: "values",
            }
            .into());
        }
        self.scan(ctx)
            .await?
            .iter()
            .map(|row| {
                let value = row.first().unwrap_or(&Value::Null);
                T::from_value(value).ok_or_else(|| {
                    Error::Invariant(format!(
                        "{}.{}: cannot decode {} as {}",
                        entity.label,
                        self.fields[0],
                        value.type_name(),
                        T::expected()
                    ))
                })
            })
            .collect()
    }

    pub async fn strings(&self, ctx: &Context) -> Result<Vec<String>, Error> {
        self.values(ctx).await
    }

    pub async fn ints(&self, ctx: &Context) -> Result<Vec<i64>, Error> {
        self.values(ctx).await
    }

    pub async fn floats(&self, ctx: &Context) -> Result<Vec<f64>, Error> {
        self.values(ctx).await
    }

    pub async fn bools(&self, ctx: &Context) -> Result<Vec<bool>, Error> {
        self.values(ctx).await
    }
}

/// An aggregate over a group, for [`GroupBy::aggregate`].
#[derive(Debug, Clone, PartialEq)]
pub struct Aggregate {
    func: AggregateFn,
    field: Option<String>,
}

impl Aggregate {
    /// Rows per group.
    pub fn count() -> Self {
        Self {
            func: AggregateFn::Count,
            field: None,
        }
    }

    pub fn sum(field: &str) -> Self {
        Self {
            func: AggregateFn::Sum,
            field: Some(field.to_string()),
        }
    }

    pub fn min(field: &str) -> Self {
        Self {
            func: AggregateFn::Min,
            field: Some(field.to_string()),
        }
    }

    pub fn max(field: &str) -> Self {
        Self {
            func: AggregateFn::Max,
            field: Some(field.to_string()),
        }
    }

    pub fn mean(field: &str) -> Self {
        Self {
            func: AggregateFn::Mean,
            field: Some(field.to_string()),
        }
    }
}

/// Grouped aggregation returned by [`Query::group_by`].
#[derive(Debug, Clone)]
pub struct GroupBy {
    query: Query,
    fields: Vec<String>,
    aggregates: Vec<Aggregate>,
}

impl GroupBy {
    pub fn aggregate(mut self, aggregate: Aggregate) -> Self {
        self.aggregates.push(aggregate);
        self
    }

    /// Rows holding the group fields followed by each aggregate.
    pub async fn scan(&self, ctx: &Context) -> Result<Vec<Row>, Error> {
        let select = Select::Group {
            fields: self.fields.clone(),
            aggregates: self
                .aggregates
                .iter()
                .map(|a| (a.func, a.field.clone()))
                .collect(),
        };
        self.query.fetch_select(ctx, &select).await
    }
}
