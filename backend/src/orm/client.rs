//! Client and transactions
//!
//! A [`Client`] bundles a driver with the hooks every builder it hands out
//! should run. Builders can also be constructed directly from a driver; the
//! client adds nothing beyond convenience and hook wiring.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tracing::{error, info, warn};

use super::context::Context;
use super::create::Create;
use super::delete::{Delete, DeleteOne};
use super::driver::{Driver, ExecResult, TxDriver};
use super::error::Error;
use super::hook::{Hook, Hooks};
use super::node::Node;
use super::predicate::Predicate;
use super::query::Query;
use super::schema::EntityDescriptor;
use super::sqlgraph::{GraphSpec, QuerySpec, Row};
use super::update::{Update, UpdateOne};
use super::value::Id;

/// Entry point for building mutations and queries.
#[derive(Debug, Clone)]
pub struct Client {
    driver: Arc<dyn Driver>,
    /// Driver the client was created from when bound to a transaction
    base: Option<Arc<dyn Driver>>,
    hooks: Hooks,
}

impl Client {
    pub fn new(driver: Arc<dyn Driver>) -> Self {
        Self {
            driver,
            base: None,
            hooks: Hooks::default(),
        }
    }

    /// Register a hook; clones of this client share it.
    pub fn use_hook(&self, hook: impl Hook + 'static) {
        self.hooks.push(Arc::new(hook));
    }

    pub fn driver(&self) -> Arc<dyn Driver> {
        self.driver.clone()
    }

    pub fn create(&self, entity: &'static EntityDescriptor) -> Create {
        Create::new(self.driver.clone(), entity).with_hooks(self.hooks.clone())
    }

    pub fn update(&self, entity: &'static EntityDescriptor) -> Update {
        Update::new(self.driver.clone(), entity).with_hooks(self.hooks.clone())
    }

    /// Update builder for a loaded node.
    pub fn update_one(&self, node: &Node) -> UpdateOne {
        self.update_one_id(node.entity(), node.id().clone())
    }

    pub fn update_one_id(&self, entity: &'static EntityDescriptor, id: impl Into<Id>) -> UpdateOne {
        UpdateOne::new(self.driver.clone(), entity, id).with_hooks(self.hooks.clone())
    }

    pub fn delete(&self, entity: &'static EntityDescriptor) -> Delete {
        Delete::new(self.driver.clone(), entity).with_hooks(self.hooks.clone())
    }

    pub fn delete_one(&self, node: &Node) -> DeleteOne {
        self.delete_one_id(node.entity(), node.id().clone())
    }

    pub fn delete_one_id(&self, entity: &'static EntityDescriptor, id: impl Into<Id>) -> DeleteOne {
        DeleteOne::new(self.driver.clone(), entity, id).with_hooks(self.hooks.clone())
    }

    pub fn query(&self, entity: &'static EntityDescriptor) -> Query {
        Query::new(self.driver.clone(), entity)
    }

    /// Load one entity by id; a missing row is [`Error::NotFound`].
    pub async fn get(
        &self,
        ctx: &Context,
        entity: &'static EntityDescriptor,
        id: impl Into<Id>,
    ) -> Result<Node, Error> {
        self.query(entity).filter(Predicate::id(id)).only(ctx).await
    }

    /// Query the neighbors of `node` over `edge`.
    pub fn query_edge(&self, node: &Node, edge: &str) -> Query {
        self.query(node.entity())
            .filter(Predicate::id(node.id().clone()))
            .query_edge(edge)
    }

    /// Open a transaction. Builders from [`Tx::client`] run inside it.
    pub async fn tx(&self, ctx: &Context) -> Result<Tx, Error> {
        ctx.check()?;
        if self.base.is_some() {
            return Err(Error::Unsupported("nested transactions"));
        }
        let tx = ctx.run(self.driver.begin(ctx)).await?;
        let closed = Arc::new(AtomicBool::new(false));
        let bound = TxBound {
            inner: tx.driver(),
            closed: closed.clone(),
        };
        info!(dialect = self.driver.dialect(), "Transaction started");
        Ok(Tx {
            client: Client {
                driver: Arc::new(bound),
                base: Some(self.driver.clone()),
                hooks: self.hooks.clone(),
            },
            tx,
            closed,
        })
    }

    /// A client on the underlying non-transactional driver. Returns a clone
    /// when this client is not bound to a transaction.
    pub fn unwrap(&self) -> Client {
        match &self.base {
            Some(base) => Client {
                driver: base.clone(),
                base: None,
                hooks: self.hooks.clone(),
            },
            None => self.clone(),
        }
    }
}

/// An open transaction.
#[derive(Debug)]
pub struct Tx {
    client: Client,
    tx: Arc<dyn TxDriver>,
    closed: Arc<AtomicBool>,
}

impl Tx {
    /// Client whose builders execute inside this transaction.
    pub fn client(&self) -> Client {
        self.client.clone()
    }

    pub async fn commit(self) -> Result<(), Error> {
        self.close()?;
        self.tx.commit().await?;
        info!("Transaction committed");
        Ok(())
    }

    pub async fn rollback(self) -> Result<(), Error> {
        self.close()?;
        self.tx.rollback().await?;
        info!("Transaction rolled back");
        Ok(())
    }

    fn close(&self) -> Result<(), Error> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Err(Error::TxClosed);
        }
        Ok(())
    }
}

impl Drop for Tx {
    fn drop(&mut self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            warn!("Transaction dropped without commit or rollback, discarding");
            self.tx.discard();
        }
    }
}

/// Driver handed to transaction clients; refuses work once the
/// transaction is committed or rolled back.
#[derive(Debug)]
struct TxBound {
    inner: Arc<dyn Driver>,
    closed: Arc<AtomicBool>,
}

impl TxBound {
    fn check_open(&self) -> Result<(), Error> {
        if self.closed.load(Ordering::SeqCst) {
            error!("Use of a client after its transaction was closed");
            return Err(Error::TxClosed);
        }
        Ok(())
    }
}

#[async_trait]
impl Driver for TxBound {
    async fn exec(&self, ctx: &Context, spec: &GraphSpec) -> Result<ExecResult, Error> {
        self.check_open()?;
        self.inner.exec(ctx, spec).await
    }

    async fn query(&self, ctx: &Context, spec: &QuerySpec) -> Result<Vec<Row>, Error> {
        self.check_open()?;
        self.inner.query(ctx, spec).await
    }

    fn is_constraint_error(&self, err: &(dyn std::error::Error + 'static)) -> bool {
        self.inner.is_constraint_error(err)
    }

    async fn begin(&self, _ctx: &Context) -> Result<Arc<dyn TxDriver>, Error> {
        self.check_open()?;
        Err(Error::Unsupported("nested transactions"))
    }

    fn dialect(&self) -> &'static str {
        self.inner.dialect()
    }
}
