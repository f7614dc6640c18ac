//! Update builders: bulk [`Update`] by predicate and [`UpdateOne`] by id

use std::sync::Arc;

use tracing::debug;

use super::context::Context;
use super::driver::{Driver, ExecResult, classify};
use super::error::{Error, ValidationError};
use super::hook::Hooks;
use super::mutation::{Mutation, Op};
use super::node::Node;
use super::predicate::Predicate;
use super::query::Query;
use super::schema::EntityDescriptor;
use super::sqlgraph::{GraphSpec, update_spec};
use super::value::{Id, Value};

/// Field and edge staging shared by both update builders.
macro_rules! update_staging {
    () => {
        pub fn set(mut self, field: &str, value: impl Into<Value>) -> Self {
            self.mutation.set_field(field, value.into());
            self
        }

        /// Set `field` when `value` is `Some`, leave it untouched otherwise.
        pub fn set_opt<V: Into<Value>>(self, field: &str, value: Option<V>) -> Self {
            match value {
                Some(v) => self.set(field, v),
                None => self,
            }
        }

        /// Increment a numeric field.
        pub fn add(mut self, field: &str, delta: impl Into<Value>) -> Self {
            self.mutation.add_field(field, delta.into());
            self
        }

        /// Set a nullable field to NULL.
        pub fn clear(mut self, field: &str) -> Self {
            self.mutation.clear_field(field);
            self
        }

        pub fn add_edge_ids<I: Into<Id>>(
            mut self,
            edge: &str,
            ids: impl IntoIterator<Item = I>,
        ) -> Self {
            self.mutation.add_edge_ids(edge, ids);
            self
        }

        pub fn remove_edge_ids<I: Into<Id>>(
            mut self,
            edge: &str,
            ids: impl IntoIterator<Item = I>,
        ) -> Self {
            self.mutation.remove_edge_ids(edge, ids);
            self
        }

        /// Replace the target of a unique edge (clear, then add).
        pub fn set_edge_id(mut self, edge: &str, id: impl Into<Id>) -> Self {
            self.mutation.clear_edge(edge);
            self.mutation.add_edge_ids(edge, [id.into()]);
            self
        }

        pub fn clear_edge(mut self, edge: &str) -> Self {
            self.mutation.clear_edge(edge);
            self
        }

        pub fn mutation(&self) -> &Mutation {
            &self.mutation
        }

        pub(crate) fn with_hooks(mut self, hooks: Hooks) -> Self {
            self.hooks = hooks;
            self
        }
    };
}

fn validate(m: &mut Mutation) -> Result<(), ValidationError> {
    m.check_staging()?;
    m.apply_update_defaults();
    m.run_validators()?;
    m.check_unique_edges()?;
    m.check_cleared_required_edges()?;
    Ok(())
}

async fn execute(
    driver: &dyn Driver,
    hooks: &Hooks,
    ctx: &Context,
    mutation: &mut Mutation,
) -> Result<u64, Error> {
    hooks.run(ctx, mutation).await?;
    let entity = mutation.entity();
    let spec = update_spec(mutation)?;
    debug!(
        entity = entity.label,
        table = entity.table,
        op = mutation.op().as_str(),
        "Executing update spec"
    );

    let spec = GraphSpec::Update(spec);
    let result = ctx
        .run(driver.exec(ctx, &spec))
        .await
        .map_err(|e| classify(driver, entity.label, e))?;
    match result {
        ExecResult::Affected(n) => Ok(n),
        other => Err(Error::Invariant(format!(
            "{}: driver returned {other:?} for an update",
            entity.label
        ))),
    }
}

/// Updates every row matching the staged predicates.
#[derive(Debug)]
pub struct Update {
    driver: Arc<dyn Driver>,
    hooks: Hooks,
    mutation: Mutation,
}

impl Update {
    pub fn new(driver: Arc<dyn Driver>, entity: &'static EntityDescriptor) -> Self {
        Self {
            driver,
            hooks: Hooks::default(),
            mutation: Mutation::new(entity, Op::Update),
        }
    }

    pub fn filter(mut self, predicate: Predicate) -> Self {
        self.mutation.add_predicate(predicate);
        self
    }

    update_staging!();

    /// Apply the update and return the number of matched rows. Zero
    /// matches is not an error.
    pub async fn exec(mut self, ctx: &Context) -> Result<u64, Error> {
        ctx.check()?;
        validate(&mut self.mutation)?;
        execute(self.driver.as_ref(), &self.hooks, ctx, &mut self.mutation).await
    }
}

/// Updates a single row by id and returns it re-read.
#[derive(Debug)]
pub struct UpdateOne {
    driver: Arc<dyn Driver>,
    hooks: Hooks,
    mutation: Mutation,
}

impl UpdateOne {
    pub fn new(driver: Arc<dyn Driver>, entity: &'static EntityDescriptor, id: impl Into<Id>) -> Self {
        let mut mutation = Mutation::new(entity, Op::UpdateOne);
        mutation.set_id(id.into());
        Self {
            driver,
            hooks: Hooks::default(),
            mutation,
        }
    }

    update_staging!();

    async fn apply(&mut self, ctx: &Context) -> Result<Id, Error> {
        ctx.check()?;
        let entity = self.mutation.entity();
        let id = match self.mutation.id() {
            Some(id) if !id.is_empty() => id.clone(),
            _ => {
                return Err(ValidationError::MissingId {
                    entity: entity.label,
                }
                .into());
            }
        };
        validate(&mut self.mutation)?;

        let affected = execute(self.driver.as_ref(), &self.hooks, ctx, &mut self.mutation).await?;
        if affected == 0 {
            return Err(Error::NotFound {
                entity: entity.label,
            });
        }
        Ok(id)
    }

    /// Apply the update and return the entity as stored afterwards.
    pub async fn save(mut self, ctx: &Context) -> Result<Node, Error> {
        let id = self.apply(ctx).await?;
        Query::new(self.driver.clone(), self.mutation.entity())
            .filter(Predicate::id(id))
            .only(ctx)
            .await
    }

    /// Apply the update without reading the row back.
    pub async fn exec(mut self, ctx: &Context) -> Result<(), Error> {
        self.apply(ctx).await.map(|_| ())
    }
}
