//! Mutation hooks
//!
//! Hooks run for every create, update and delete issued through a client,
//! after validation and before the spec is built. A hook may adjust the
//! mutation or reject it by returning an error.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use super::context::Context;
use super::error::Error;
use super::mutation::{Mutation, Op};

#[async_trait]
pub trait Hook: Send + Sync {
    async fn on_mutation(&self, ctx: &Context, mutation: &mut Mutation) -> Result<(), Error>;
}

/// Restrict a hook to one entity and a set of operations.
pub struct On<H> {
    entity: &'static str,
    ops: &'static [Op],
    hook: H,
}

impl<H: Hook> On<H> {
    pub fn new(entity: &'static str, ops: &'static [Op], hook: H) -> Self {
        Self { entity, ops, hook }
    }
}

#[async_trait]
impl<H: Hook> Hook for On<H> {
    async fn on_mutation(&self, ctx: &Context, mutation: &mut Mutation) -> Result<(), Error> {
        if mutation.entity().label == self.entity && self.ops.contains(&mutation.op()) {
            self.hook.on_mutation(ctx, mutation).await
        } else {
            Ok(())
        }
    }
}

/// Hooks shared by a client and all builders it hands out.
#[derive(Clone, Default)]
pub struct Hooks {
    inner: Arc<RwLock<Vec<Arc<dyn Hook>>>>,
}

impl Hooks {
    pub fn push(&self, hook: Arc<dyn Hook>) {
        self.inner.write().push(hook);
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }

    /// Run every hook in registration order.
    pub async fn run(&self, ctx: &Context, mutation: &mut Mutation) -> Result<(), Error> {
        let hooks: Vec<Arc<dyn Hook>> = self.inner.read().clone();
        for hook in hooks {
            hook.on_mutation(ctx, mutation).await?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for Hooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hooks").field("count", &self.len()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inventory::{LOCATION, LOCATION_TYPE};
    use crate::orm::value::Value;

    struct Stamp;

    #[async_trait]
    impl Hook for Stamp {
        async fn on_mutation(&self, _ctx: &Context, m: &mut Mutation) -> Result<(), Error> {
            m.set_field("external_id", "stamped".into());
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_hooks_run_in_order() {
        let hooks = Hooks::default();
        hooks.push(Arc::new(Stamp));

        let mut m = Mutation::new(&LOCATION, Op::Create);
        hooks.run(&Context::background(), &mut m).await.unwrap();
        assert_eq!(m.field("external_id"), Some(&Value::from("stamped")));
    }

    #[tokio::test]
    async fn test_filtered_hook_skips_other_entities() {
        let hooks = Hooks::default();
        hooks.push(Arc::new(On::new("location", &[Op::Create], Stamp)));

        let mut other = Mutation::new(&LOCATION_TYPE, Op::Create);
        hooks.run(&Context::background(), &mut other).await.unwrap();
        assert!(other.is_empty());

        let mut update = Mutation::new(&LOCATION, Op::Update);
        hooks.run(&Context::background(), &mut update).await.unwrap();
        assert!(update.is_empty());
    }

    #[test]
    fn test_clones_share_hooks() {
        let hooks = Hooks::default();
        let clone = hooks.clone();
        clone.push(Arc::new(Stamp));
        assert_eq!(hooks.len(), 1);
    }
}
