//! Inventory graph - descriptor-driven persistence for the network inventory
//!
//! Entities are described once by static [`orm::EntityDescriptor`]s and
//! stored as rows plus foreign-key or join-table edges. One generic engine
//! (create / update / delete / query builders, eager loading, traversal)
//! works over every descriptor through a pluggable [`orm::Driver`]; the
//! `sqlite` feature provides the SQLite driver in [`db`].

// Lets `#[derive(Entity)]` expand to `::inventory_graph::...` paths inside this crate.
extern crate self as inventory_graph;

pub mod config;
#[cfg(feature = "sqlite")]
pub mod db;
pub mod inventory;
pub mod orm;
pub mod prototype;
pub mod telemetry;

pub use inventory_macros::Entity;
