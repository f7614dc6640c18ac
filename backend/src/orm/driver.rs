//! Execution collaborator interface
//!
//! A driver renders graph specs into its own dialect, executes them, and
//! classifies its errors. The ORM never builds SQL itself.

use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;

use super::context::Context;
use super::error::Error;
use super::sqlgraph::{GraphSpec, QuerySpec, Row};
use super::value::Id;

/// Outcome of executing a mutation spec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecResult {
    /// Storage id of the inserted row
    Created(Id),
    /// Number of rows matched by an update or delete
    Affected(u64),
}

/// Executes specs against a backing store.
#[async_trait]
pub trait Driver: Send + Sync + Debug {
    /// Execute a create, update or delete spec.
    async fn exec(&self, ctx: &Context, spec: &GraphSpec) -> Result<ExecResult, Error>;

    /// Run a read spec; each row is aligned with the spec's projection.
    async fn query(&self, ctx: &Context, spec: &QuerySpec) -> Result<Vec<Row>, Error>;

    /// Whether a raw error from this driver is a uniqueness, foreign-key or
    /// other integrity violation.
    fn is_constraint_error(&self, err: &(dyn std::error::Error + 'static)) -> bool;

    /// Start a transaction.
    async fn begin(&self, _ctx: &Context) -> Result<Arc<dyn TxDriver>, Error> {
        Err(Error::Unsupported("transactions"))
    }

    fn dialect(&self) -> &'static str;
}

/// A transaction opened by [`Driver::begin`].
#[async_trait]
pub trait TxDriver: Send + Sync + Debug {
    /// Driver that executes inside this transaction.
    fn driver(&self) -> Arc<dyn Driver>;

    async fn commit(&self) -> Result<(), Error>;

    async fn rollback(&self) -> Result<(), Error>;

    /// Abandon the transaction without waiting for the store. Called when a
    /// transaction handle is dropped while still open.
    fn discard(&self) {}
}

/// Turn a driver failure into a constraint error when the driver says so.
pub(crate) fn classify(driver: &dyn Driver, entity: &'static str, err: Error) -> Error {
    match err {
        Error::Driver(raw) if driver.is_constraint_error(raw.as_ref()) => Error::Constraint {
            entity,
            message: raw.to_string(),
            source: Some(raw),
        },
        other => other,
    }
}
