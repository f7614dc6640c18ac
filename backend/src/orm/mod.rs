//! Graph-shaped persistence mapping
//!
//! Entities are described by static [`EntityDescriptor`]s. Builders stage
//! mutations and queries against a descriptor, the translator in
//! [`sqlgraph`] turns them into dialect-neutral specs, and a [`Driver`]
//! executes those specs.

pub mod client;
pub mod context;
pub mod create;
pub mod delete;
pub mod driver;
pub mod error;
pub mod hook;
pub mod mutation;
pub mod node;
pub mod pagination;
pub mod predicate;
pub mod query;
pub mod schema;
pub mod sqlgraph;
pub mod update;
pub mod value;

pub use client::{Client, Tx};
pub use context::Context;
pub use create::Create;
pub use delete::{Delete, DeleteOne};
pub use driver::{Driver, ExecResult, TxDriver};
pub use error::{BoxError, Error, Result, ValidationError};
pub use hook::{Hook, Hooks, On};
pub use mutation::{Mutation, Op};
pub use node::{Edges, Entity, Node};
pub use pagination::{Connection, Edge, PageArgs, PageInfo};
pub use predicate::{CmpOp, Order, OrderDirection, Predicate, StrOp};
pub use query::{Aggregate, FieldSelect, GroupBy, Query};
pub use schema::{
    Cardinality, ColumnDescriptor, EntityDescriptor, ForeignKeyDescriptor, IdDescriptor,
    RelationDescriptor, Registry,
};
pub use value::{FieldType, FromId, FromValue, Id, IdKind, Value};
