//! Delete builders

use std::sync::Arc;

use tracing::debug;

use super::context::Context;
use super::driver::{Driver, ExecResult, classify};
use super::error::{Error, ValidationError};
use super::hook::Hooks;
use super::mutation::{Mutation, Op};
use super::predicate::Predicate;
use super::schema::EntityDescriptor;
use super::sqlgraph::{GraphSpec, delete_spec};
use super::value::Id;

async fn execute(
    driver: &dyn Driver,
    hooks: &Hooks,
    ctx: &Context,
    mutation: &mut Mutation,
) -> Result<u64, Error> {
    ctx.check()?;
    mutation.check_staging()?;
    hooks.run(ctx, mutation).await?;

    let entity = mutation.entity();
    let spec = GraphSpec::Delete(delete_spec(mutation)?);
    debug!(
        entity = entity.label,
        table = entity.table,
        op = mutation.op().as_str(),
        "Executing delete spec"
    );
    let result = ctx
        .run(driver.exec(ctx, &spec))
        .await
        .map_err(|e| classify(driver, entity.label, e))?;
    match result {
        ExecResult::Affected(n) => Ok(n),
        other => Err(Error::Invariant(format!(
            "{}: driver returned {other:?} for a delete",
            entity.label
        ))),
    }
}

/// Deletes every row matching the staged predicates.
#[derive(Debug)]
pub struct Delete {
    driver: Arc<dyn Driver>,
    hooks: Hooks,
    mutation: Mutation,
}

impl Delete {
    pub fn new(driver: Arc<dyn Driver>, entity: &'static EntityDescriptor) -> Self {
        Self {
            driver,
            hooks: Hooks::default(),
            mutation: Mutation::new(entity, Op::Delete),
        }
    }

    pub(crate) fn with_hooks(mut self, hooks: Hooks) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn filter(mut self, predicate: Predicate) -> Self {
        self.mutation.add_predicate(predicate);
        self
    }

    /// Delete matching rows and return how many were removed.
    pub async fn exec(mut self, ctx: &Context) -> Result<u64, Error> {
        execute(self.driver.as_ref(), &self.hooks, ctx, &mut self.mutation).await
    }
}

/// Deletes a single row by id.
#[derive(Debug)]
pub struct DeleteOne {
    driver: Arc<dyn Driver>,
    hooks: Hooks,
    mutation: Mutation,
}

impl DeleteOne {
    pub fn new(driver: Arc<dyn Driver>, entity: &'static EntityDescriptor, id: impl Into<Id>) -> Self {
        let mut mutation = Mutation::new(entity, Op::DeleteOne);
        mutation.set_id(id.into());
        Self {
            driver,
            hooks: Hooks::default(),
            mutation,
        }
    }

    pub(crate) fn with_hooks(mut self, hooks: Hooks) -> Self {
        self.hooks = hooks;
        self
    }

    /// Delete the row; a missing row is [`Error::NotFound`].
    pub async fn exec(mut self, ctx: &Context) -> Result<(), Error> {
        let entity = self.mutation.entity();
        if self.mutation.id().is_none_or(Id::is_empty) {
            return Err(ValidationError::MissingId {
                entity: entity.label,
            }
            .into());
        }
        match execute(self.driver.as_ref(), &self.hooks, ctx, &mut self.mutation).await? {
            0 => Err(Error::NotFound {
                entity: entity.label,
            }),
            _ => Ok(()),
        }
    }
}
