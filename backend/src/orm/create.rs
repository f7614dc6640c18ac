//! Create builder

use std::sync::Arc;

use tracing::debug;

use super::context::Context;
use super::driver::{Driver, ExecResult, classify};
use super::error::Error;
use super::hook::Hooks;
use super::mutation::{Mutation, Op};
use super::node::Node;
use super::schema::EntityDescriptor;
use super::sqlgraph::{GraphSpec, create_spec};
use super::value::{Id, Value};

/// Stages one new entity and inserts it on [`Create::save`].
#[derive(Debug)]
pub struct Create {
    driver: Arc<dyn Driver>,
    hooks: Hooks,
    mutation: Mutation,
}

impl Create {
    pub fn new(driver: Arc<dyn Driver>, entity: &'static EntityDescriptor) -> Self {
        Self {
            driver,
            hooks: Hooks::default(),
            mutation: Mutation::new(entity, Op::Create),
        }
    }

    pub(crate) fn with_hooks(mut self, hooks: Hooks) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn set(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.mutation.set_field(field, value.into());
        self
    }

    /// Set `field` only when `value` is `Some`.
    pub fn set_opt<V: Into<Value>>(self, field: &str, value: Option<V>) -> Self {
        match value {
            Some(v) => self.set(field, v),
            None => self,
        }
    }

    pub fn add_edge_ids<I: Into<Id>>(mut self, edge: &str, ids: impl IntoIterator<Item = I>) -> Self {
        self.mutation.add_edge_ids(edge, ids);
        self
    }

    pub fn set_edge_id(self, edge: &str, id: impl Into<Id>) -> Self {
        self.add_edge_ids(edge, [id.into()])
    }

    pub fn mutation(&self) -> &Mutation {
        &self.mutation
    }

    fn validate(&mut self) -> Result<(), Error> {
        let m = &mut self.mutation;
        m.check_staging()?;
        m.apply_defaults();
        m.check_required_fields()?;
        m.run_validators()?;
        m.check_unique_edges()?;
        m.check_required_edges()?;
        Ok(())
    }

    /// Validate, run hooks, insert, and return the new entity.
    pub async fn save(mut self, ctx: &Context) -> Result<Node, Error> {
        ctx.check()?;
        self.validate()?;
        self.hooks.run(ctx, &mut self.mutation).await?;

        let entity = self.mutation.entity();
        let spec = create_spec(&self.mutation)?;
        debug!(entity = entity.label, table = entity.table, "Executing create spec");

        let spec = GraphSpec::Create(spec);
        let result = ctx
            .run(self.driver.exec(ctx, &spec))
            .await
            .map_err(|e| classify(self.driver.as_ref(), entity.label, e))?;
        let id = match result {
            ExecResult::Created(id) => id,
            other => {
                return Err(Error::Invariant(format!(
                    "{}: driver returned {other:?} for a create",
                    entity.label
                )));
            }
        };
        if id.is_empty() {
            return Err(Error::Invariant(format!(
                "{}: driver returned an empty id",
                entity.label
            )));
        }

        Ok(self.into_node(id.to_kind(entity.id.kind)))
    }

    fn into_node(self, id: Id) -> Node {
        let entity = self.mutation.entity();
        let mut node = Node::new(entity, id);
        for column in entity.columns {
            let value = self.mutation.field(column.name).cloned().unwrap_or_default();
            node.set_value(column.name, value);
        }
        for relation in entity.relations.iter().filter(|r| r.owns_foreign_key()) {
            if let Some(target) = self.mutation.edge_ids(relation.name).next() {
                node.set_foreign_key(relation.column(), target.to_kind(relation.target.id.kind));
            }
        }
        node
    }
}
