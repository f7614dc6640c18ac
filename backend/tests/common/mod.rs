//! Shared fixtures for integration tests

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tempfile::TempDir;

use inventory_graph::db::Database;
use inventory_graph::inventory::REGISTRY;
use inventory_graph::orm::sqlgraph::{GraphSpec, QuerySpec, Row};
use inventory_graph::orm::{Client, Context, Driver, Error, ExecResult, Id, Node};

/// A migrated SQLite database in a temporary directory.
pub struct TestDb {
    pub db: Database,
    pub client: Client,
    pub ctx: Context,
    _dir: TempDir,
}

pub async fn setup() -> TestDb {
    let dir = tempfile::tempdir().expect("tempdir");
    let url = format!("sqlite://{}", dir.path().join("inventory.db").display());
    let db = Database::connect(&url, 4).await.expect("connect");
    db.sync_schema(&REGISTRY).await.expect("schema sync");
    TestDb {
        client: db.client(),
        db,
        ctx: Context::background(),
        _dir: dir,
    }
}

impl TestDb {
    pub async fn location_type(&self, name: &str) -> Node {
        self.client
            .create(&inventory_graph::inventory::LOCATION_TYPE)
            .set("name", name)
            .save(&self.ctx)
            .await
            .expect("create location type")
    }

    pub async fn location(&self, name: &str, kind: &Node) -> Node {
        self.client
            .create(&inventory_graph::inventory::LOCATION)
            .set("name", name)
            .set_edge_id("type", kind.id().clone())
            .save(&self.ctx)
            .await
            .expect("create location")
    }
}

/// Driver that records every call and never touches storage.
#[derive(Debug, Default)]
pub struct RecordingDriver {
    pub execs: Mutex<Vec<GraphSpec>>,
    pub queries: AtomicUsize,
    next_id: AtomicI64,
}

impl RecordingDriver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> usize {
        self.execs.lock().len() + self.queries.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Driver for RecordingDriver {
    async fn exec(&self, _ctx: &Context, spec: &GraphSpec) -> Result<ExecResult, Error> {
        self.execs.lock().push(spec.clone());
        match spec {
            GraphSpec::Create(_) => Ok(ExecResult::Created(Id::Int(
                self.next_id.fetch_add(1, Ordering::SeqCst) + 1,
            ))),
            _ => Ok(ExecResult::Affected(0)),
        }
    }

    async fn query(&self, _ctx: &Context, _spec: &QuerySpec) -> Result<Vec<Row>, Error> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        Ok(Vec::new())
    }

    fn is_constraint_error(&self, _err: &(dyn std::error::Error + 'static)) -> bool {
        false
    }

    fn dialect(&self) -> &'static str {
        "recording"
    }
}
