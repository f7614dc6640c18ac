//! SQLite driver
//!
//! Renders graph specs into parameterized SQLite statements and runs them
//! through sqlx. Multi-statement mutations run inside a transaction (or a
//! savepoint when the driver is bound to a caller transaction), so dropping
//! the future mid-way rolls everything back.

use std::sync::Arc;

use async_trait::async_trait;
use sqlx::error::ErrorKind;
use sqlx::sqlite::{SqliteConnection, SqlitePool, SqliteQueryResult, SqliteRow};
use sqlx::{Sqlite, Transaction};
use tokio::sync::Mutex;
use tracing::{debug, error};

use crate::orm::sqlgraph::{
    ColumnSpec, CreateSpec, DeleteSpec, EdgeSpec, GraphSpec, NodeSpec, Projection, QuerySpec, Row,
    Step, UpdateSpec, UpdateTarget,
};
use crate::orm::{
    Cardinality, Context, Driver, EntityDescriptor, Error, ExecResult, FieldType, Id, Predicate,
    RelationDescriptor, StrOp, TxDriver, ValidationError, Value,
};

use super::sqlite_helpers::{bind_all, decode_value};

// ============================================================================
// Statement building
// ============================================================================

/// SQL text and the values bound to its `?` placeholders, in order.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub args: Vec<Value>,
}

impl Statement {
    fn push(&mut self, sql: &str) -> &mut Self {
        self.sql.push_str(sql);
        self
    }

    fn bind(&mut self, value: Value) -> &mut Self {
        self.sql.push('?');
        self.args.push(value);
        self
    }

    /// `(?, ?, ...)`
    fn bind_list(&mut self, values: impl IntoIterator<Item = Value>) -> &mut Self {
        self.sql.push('(');
        for (i, value) in values.into_iter().enumerate() {
            if i > 0 {
                self.sql.push_str(", ");
            }
            self.bind(value);
        }
        self.sql.push(')');
        self
    }

    fn append(&mut self, other: Statement) -> &mut Self {
        self.sql.push_str(&other.sql);
        self.args.extend(other.args);
        self
    }
}

fn keys(keys: &[i64]) -> impl Iterator<Item = Value> + '_ {
    keys.iter().map(|k| Value::Int(*k))
}

/// Starts a WHERE clause on first use, joins with AND afterwards.
struct Conditions {
    started: bool,
}

impl Conditions {
    fn new() -> Self {
        Self { started: false }
    }

    fn next<'a>(&mut self, st: &'a mut Statement) -> &'a mut Statement {
        st.push(if self.started { " AND " } else { " WHERE " });
        self.started = true;
        st
    }
}

fn column(entity: &'static EntityDescriptor, field: &str) -> Result<String, Error> {
    match entity.static_field(field) {
        Some(name) => Ok(format!("{}.{}", entity.table, name)),
        None => Err(ValidationError::UnknownField {
            entity: entity.label,
            field: field.to_string(),
        }
        .into()),
    }
}

fn id_column(entity: &'static EntityDescriptor) -> String {
    format!("{}.{}", entity.table, entity.id.column)
}

fn render_all(
    st: &mut Statement,
    entity: &'static EntityDescriptor,
    predicates: &[Predicate],
    joiner: &str,
    empty: &str,
) -> Result<(), Error> {
    if predicates.is_empty() {
        st.push(empty);
        return Ok(());
    }
    st.push("(");
    for (i, p) in predicates.iter().enumerate() {
        if i > 0 {
            st.push(joiner);
        }
        render_predicate(st, entity, p)?;
    }
    st.push(")");
    Ok(())
}

/// Render one predicate against `entity`'s table.
pub(crate) fn render_predicate(
    st: &mut Statement,
    entity: &'static EntityDescriptor,
    predicate: &Predicate,
) -> Result<(), Error> {
    match predicate {
        Predicate::Compare { field, op, value } => {
            st.push(&column(entity, field)?)
                .push(" ")
                .push(op.to_sql())
                .push(" ")
                .bind(value.clone());
        }
        Predicate::In {
            field,
            values,
            negated,
        } => {
            if values.is_empty() {
                st.push(if *negated { "1=1" } else { "1=0" });
            } else {
                st.push(&column(entity, field)?)
                    .push(if *negated { " NOT IN " } else { " IN " })
                    .bind_list(values.iter().cloned());
            }
        }
        Predicate::IsNull { field, negated } => {
            st.push(&column(entity, field)?)
                .push(if *negated { " IS NOT NULL" } else { " IS NULL" });
        }
        Predicate::Str { field, op, value } => {
            let col = column(entity, field)?;
            let v = || Value::String(value.clone());
            match op {
                StrOp::Contains => {
                    st.push("instr(").push(&col).push(", ").bind(v()).push(") > 0");
                }
                StrOp::HasPrefix => {
                    st.push("instr(").push(&col).push(", ").bind(v()).push(") = 1");
                }
                StrOp::HasSuffix if value.is_empty() => {
                    st.push(&col).push(" IS NOT NULL");
                }
                StrOp::HasSuffix => {
                    st.push("substr(")
                        .push(&col)
                        .push(", -length(")
                        .bind(v())
                        .push(")) = ")
                        .bind(v());
                }
                StrOp::EqualFold => {
                    st.push("lower(").push(&col).push(") = lower(").bind(v()).push(")");
                }
                StrOp::ContainsFold => {
                    st.push("instr(lower(")
                        .push(&col)
                        .push("), lower(")
                        .bind(v())
                        .push(")) > 0");
                }
            }
        }
        Predicate::IdCompare { op, id } => {
            let key = id.storage_key(entity.label)?;
            st.push(&id_column(entity))
                .push(" ")
                .push(op.to_sql())
                .push(" ")
                .bind(Value::Int(key));
        }
        Predicate::IdIn { ids, negated } => {
            if ids.is_empty() {
                st.push(if *negated { "1=1" } else { "1=0" });
            } else {
                let keys = ids
                    .iter()
                    .map(|id| id.storage_key(entity.label).map(Value::Int))
                    .collect::<Result<Vec<_>, _>>()?;
                st.push(&id_column(entity))
                    .push(if *negated { " NOT IN " } else { " IN " })
                    .bind_list(keys);
            }
        }
        Predicate::ForeignKeyIn { column, keys: fks } => {
            if fks.is_empty() {
                st.push("1=0");
            } else {
                st.push(&format!("{}.{}", entity.table, column))
                    .push(" IN ")
                    .bind_list(keys(fks));
            }
        }
        Predicate::HasEdge { edge, with } => {
            let Some(relation) = entity.relation(edge) else {
                return Err(ValidationError::UnknownEdge {
                    entity: entity.label,
                    edge: edge.clone(),
                }
                .into());
            };
            render_has_edge(st, entity, relation, with)?;
        }
        Predicate::And(preds) => render_all(st, entity, preds, " AND ", "1=1")?,
        Predicate::Or(preds) => render_all(st, entity, preds, " OR ", "1=0")?,
        Predicate::Not(inner) => {
            st.push("NOT (");
            render_predicate(st, entity, inner)?;
            st.push(")");
        }
    }
    Ok(())
}

fn render_has_edge(
    st: &mut Statement,
    entity: &'static EntityDescriptor,
    relation: &'static RelationDescriptor,
    with: &[Predicate],
) -> Result<(), Error> {
    let target = relation.target;
    let target_id = id_column(target);

    if relation.owns_foreign_key() {
        let fk = format!("{}.{}", entity.table, relation.column());
        if with.is_empty() {
            st.push(&fk).push(" IS NOT NULL");
            return Ok(());
        }
        st.push(&format!("{fk} IN (SELECT {target_id} FROM {} WHERE ", target.table));
        render_all(st, target, with, " AND ", "1=1")?;
        st.push(")");
    } else if relation.cardinality == Cardinality::ManyToMany {
        let (own, other) = relation.join_columns();
        let join = relation.table;
        st.push(&format!(
            "{} IN (SELECT {join}.{own} FROM {join}",
            id_column(entity)
        ));
        if !with.is_empty() {
            st.push(&format!(
                " WHERE {join}.{other} IN (SELECT {target_id} FROM {} WHERE ",
                target.table
            ));
            render_all(st, target, with, " AND ", "1=1")?;
            st.push(")");
        }
        st.push(")");
    } else {
        let fk = format!("{}.{}", relation.table, relation.column());
        st.push(&format!(
            "{} IN (SELECT {fk} FROM {} WHERE {fk} IS NOT NULL",
            id_column(entity),
            relation.table
        ));
        if !with.is_empty() {
            st.push(" AND ");
            render_all(st, target, with, " AND ", "1=1")?;
        }
        st.push(")");
    }
    Ok(())
}

/// `node.id IN (...)` restricted to the neighbors reached by `step`.
fn render_step(st: &mut Statement, node: &NodeSpec, step: &Step) -> Result<(), Error> {
    let source = render_query(&step.source)?;
    let edge = &step.edge;
    let id = format!("{}.{}", node.table, node.id.column);
    let src = step.source.node.table;

    if edge.owns_foreign_key() {
        st.push(&format!(
            "{id} IN (SELECT {src}.{fk} FROM {src} WHERE {src}.{src_id} IN (",
            fk = edge.column(),
            src_id = step.source.node.id.column,
        ));
        st.append(source).push("))");
    } else if edge.cardinality == Cardinality::ManyToMany {
        let (own, other) = edge.join_columns();
        let join = edge.table;
        st.push(&format!(
            "{id} IN (SELECT {join}.{other} FROM {join} WHERE {join}.{own} IN ("
        ));
        st.append(source).push("))");
    } else {
        st.push(&format!("{}.{} IN (", node.table, edge.column()));
        st.append(source).push(")");
    }
    Ok(())
}

fn render_from_where(st: &mut Statement, spec: &QuerySpec) -> Result<(), Error> {
    let node = &spec.node;
    st.push(" FROM ").push(node.table);
    if let Some(join) = &spec.join_owners {
        st.push(&format!(
            " JOIN {j} ON {j}.{target} = {t}.{id}",
            j = join.table,
            target = join.target_column,
            t = node.table,
            id = node.id.column,
        ));
    }

    let mut conditions = Conditions::new();
    if let Some(join) = &spec.join_owners {
        conditions
            .next(st)
            .push(&format!("{}.{} IN ", join.table, join.owner_column))
            .bind_list(keys(&join.owners));
    }
    for p in &spec.predicates {
        render_predicate(conditions.next(st), node.entity, p)?;
    }
    if let Some(step) = &spec.from {
        render_step(conditions.next(st), node, step)?;
    }
    Ok(())
}

fn render_rows(st: &mut Statement, spec: &QuerySpec, columns: &[ColumnSpec]) -> Result<(), Error> {
    let table = spec.node.table;
    let mut selected: Vec<String> = columns
        .iter()
        .map(|c| match c.aggregate {
            Some(func) => format!("{}({table}.{})", func.to_sql(), c.name),
            None => format!("{table}.{}", c.name),
        })
        .collect();
    if let Some(join) = &spec.join_owners {
        selected.push(format!("{}.{}", join.table, join.owner_column));
    }
    st.push("SELECT ").push(&selected.join(", "));
    render_from_where(st, spec)?;

    if !spec.group_by.is_empty() {
        let group: Vec<String> = spec.group_by.iter().map(|c| format!("{table}.{c}")).collect();
        st.push(" GROUP BY ").push(&group.join(", "));
    }

    let aggregated = columns.iter().any(|c| c.aggregate.is_some());
    if !spec.order.is_empty() {
        let order: Vec<String> = spec
            .order
            .iter()
            .map(|o| format!("{table}.{} {}", o.column, o.direction.to_sql()))
            .collect();
        st.push(" ORDER BY ").push(&order.join(", "));
    } else if !aggregated {
        st.push(&format!(" ORDER BY {table}.{}", spec.node.id.column));
    }

    if let Some(limit) = spec.limit {
        st.push(" LIMIT ")
            .bind(Value::Int(i64::try_from(limit).unwrap_or(i64::MAX)));
        if let Some(offset) = spec.offset {
            st.push(" OFFSET ")
                .bind(Value::Int(i64::try_from(offset).unwrap_or(i64::MAX)));
        }
    }
    Ok(())
}

/// Render a read spec into one SELECT statement.
pub fn render_query(spec: &QuerySpec) -> Result<Statement, Error> {
    let mut st = Statement::default();
    match &spec.projection {
        Projection::Columns(columns) => render_rows(&mut st, spec, columns)?,
        Projection::Count if spec.limit.is_some() || spec.offset.is_some() => {
            let id = [ColumnSpec::plain(spec.node.id.column, FieldType::Int)];
            st.push("SELECT COUNT(*) FROM (");
            render_rows(&mut st, spec, &id)?;
            st.push(")");
        }
        Projection::Count => {
            st.push("SELECT COUNT(*)");
            render_from_where(&mut st, spec)?;
        }
    }
    Ok(st)
}

/// Column types of the rows `spec` returns.
fn row_types(spec: &QuerySpec) -> Vec<FieldType> {
    let mut types = match &spec.projection {
        Projection::Columns(columns) => columns.iter().map(|c| c.field_type).collect(),
        Projection::Count => vec![FieldType::Int],
    };
    if spec.join_owners.is_some() {
        types.push(FieldType::Int);
    }
    types
}

fn decode_row(row: &SqliteRow, types: &[FieldType]) -> Result<Row, Error> {
    types
        .iter()
        .enumerate()
        .map(|(i, ty)| decode_value(row, i, *ty).map_err(Error::driver))
        .collect()
}

// ============================================================================
// Execution
// ============================================================================

async fn execute(conn: &mut SqliteConnection, st: &Statement) -> Result<SqliteQueryResult, Error> {
    debug!(sql = %st.sql, args = st.args.len(), "Executing statement");
    bind_all(&st.sql, &st.args)
        .execute(&mut *conn)
        .await
        .map_err(Error::driver)
}

async fn fetch(conn: &mut SqliteConnection, st: &Statement) -> Result<Vec<SqliteRow>, Error> {
    debug!(sql = %st.sql, args = st.args.len(), "Executing query");
    bind_all(&st.sql, &st.args)
        .fetch_all(&mut *conn)
        .await
        .map_err(Error::driver)
}

async fn query_rows(conn: &mut SqliteConnection, spec: &QuerySpec) -> Result<Vec<Row>, Error> {
    let st = render_query(spec)?;
    let types = row_types(spec);
    fetch(conn, &st)
        .await?
        .iter()
        .map(|row| decode_row(row, &types))
        .collect()
}

fn constraint(node: &NodeSpec, message: String) -> Error {
    Error::Constraint {
        entity: node.entity.label,
        message,
        source: None,
    }
}

/// Attach `owners` to the targets of `edge`.
async fn add_edge(
    conn: &mut SqliteConnection,
    node: &NodeSpec,
    owners: &[i64],
    edge: &EdgeSpec,
) -> Result<(), Error> {
    let mut st = Statement::default();
    if edge.owns_foreign_key() {
        let Some(&target) = edge.target.keys.first() else {
            return Ok(());
        };
        st.push(&format!("UPDATE {} SET {} = ", node.table, edge.column()))
            .bind(Value::Int(target))
            .push(&format!(" WHERE {} IN ", node.id.column))
            .bind_list(keys(owners));
        execute(conn, &st).await?;
    } else if edge.cardinality == Cardinality::ManyToMany {
        let (own, other) = edge.join_columns();
        st.push(&format!("INSERT INTO {} ({own}, {other}) VALUES ", edge.table));
        let pairs = owners
            .iter()
            .flat_map(|o| edge.target.keys.iter().map(move |t| (*o, *t)));
        for (i, (owner, target)) in pairs.enumerate() {
            if i > 0 {
                st.push(", ");
            }
            st.bind_list([Value::Int(owner), Value::Int(target)]);
        }
        execute(conn, &st).await?;
    } else {
        let [owner] = owners else {
            return Err(ValidationError::EdgeOnManyNodes {
                entity: node.entity.label,
                edge: edge.relation,
                nodes: owners.len(),
            }
            .into());
        };
        let target = edge.target.table;
        st.push(&format!("UPDATE {target} SET {} = ", edge.column()))
            .bind(Value::Int(*owner))
            .push(&format!(" WHERE {} IN ", edge.target.id.column))
            .bind_list(keys(&edge.target.keys))
            .push(&format!(" AND {} IS NULL", edge.column()));
        let attached = execute(conn, &st).await?.rows_affected();
        if attached != edge.target.keys.len() as u64 {
            return Err(constraint(
                node,
                format!(
                    "edge \"{}\": {} of {} {target} rows are missing or already attached",
                    edge.relation,
                    edge.target.keys.len() as u64 - attached,
                    edge.target.keys.len()
                ),
            ));
        }
    }
    Ok(())
}

/// Detach `owners` from the targets of `edge`; no target keys means all.
async fn clear_edge(
    conn: &mut SqliteConnection,
    node: &NodeSpec,
    owners: &[i64],
    edge: &EdgeSpec,
) -> Result<(), Error> {
    let targets = &edge.target.keys;
    let mut st = Statement::default();
    if edge.owns_foreign_key() {
        st.push(&format!(
            "UPDATE {} SET {col} = NULL WHERE {} IN ",
            node.table,
            node.id.column,
            col = edge.column()
        ))
        .bind_list(keys(owners));
        if !targets.is_empty() {
            st.push(&format!(" AND {} IN ", edge.column()))
                .bind_list(keys(targets));
        }
    } else if edge.cardinality == Cardinality::ManyToMany {
        let (own, other) = edge.join_columns();
        st.push(&format!("DELETE FROM {} WHERE {own} IN ", edge.table))
            .bind_list(keys(owners));
        if !targets.is_empty() {
            st.push(&format!(" AND {other} IN ")).bind_list(keys(targets));
        }
    } else {
        st.push(&format!(
            "UPDATE {} SET {col} = NULL WHERE {col} IN ",
            edge.target.table,
            col = edge.column()
        ))
        .bind_list(keys(owners));
        if !targets.is_empty() {
            st.push(&format!(" AND {} IN ", edge.target.id.column))
                .bind_list(keys(targets));
        }
    }
    execute(conn, &st).await?;
    Ok(())
}

async fn exec_create(conn: &mut SqliteConnection, spec: &CreateSpec) -> Result<ExecResult, Error> {
    let node = &spec.node;
    let mut columns: Vec<&str> = spec.fields.iter().map(|f| f.column).collect();
    let mut values: Vec<Value> = spec.fields.iter().map(|f| f.value.clone()).collect();
    for edge in spec.edges.iter().filter(|e| e.owns_foreign_key()) {
        if let Some(&target) = edge.target.keys.first() {
            columns.push(edge.column());
            values.push(Value::Int(target));
        }
    }

    let mut st = Statement::default();
    if columns.is_empty() {
        st.push(&format!("INSERT INTO {} DEFAULT VALUES", node.table));
    } else {
        st.push(&format!("INSERT INTO {} ({}) VALUES ", node.table, columns.join(", ")))
            .bind_list(values);
    }
    let id = execute(conn, &st).await?.last_insert_rowid();

    for edge in spec.edges.iter().filter(|e| !e.owns_foreign_key()) {
        add_edge(conn, node, &[id], edge).await?;
    }
    Ok(ExecResult::Created(Id::Int(id)))
}

async fn matching_keys(
    conn: &mut SqliteConnection,
    node: &NodeSpec,
    target: &UpdateTarget,
) -> Result<Vec<i64>, Error> {
    let mut st = Statement::default();
    st.push(&format!("SELECT {} FROM {}", id_column(node.entity), node.table));
    match target {
        UpdateTarget::One(key) => {
            st.push(&format!(" WHERE {} = ", id_column(node.entity)))
                .bind(Value::Int(*key));
        }
        UpdateTarget::Where(predicates) => {
            let mut conditions = Conditions::new();
            for p in predicates {
                render_predicate(conditions.next(&mut st), node.entity, p)?;
            }
        }
    }
    let types = [FieldType::Int];
    fetch(conn, &st)
        .await?
        .iter()
        .map(|row| match decode_row(row, &types)?.first() {
            Some(Value::Int(key)) => Ok(*key),
            other => Err(Error::Invariant(format!(
                "{}: unexpected id value {other:?}",
                node.entity.label
            ))),
        })
        .collect()
}

async fn exec_update(conn: &mut SqliteConnection, spec: &UpdateSpec) -> Result<ExecResult, Error> {
    let node = &spec.node;
    let owners = matching_keys(conn, node, &spec.target).await?;
    if owners.is_empty() {
        return Ok(ExecResult::Affected(0));
    }
    for edge in &spec.edges.add {
        if !edge.owns_foreign_key() && edge.cardinality != Cardinality::ManyToMany && owners.len() > 1 {
            return Err(ValidationError::EdgeOnManyNodes {
                entity: node.entity.label,
                edge: edge.relation,
                nodes: owners.len(),
            }
            .into());
        }
    }

    let fields = &spec.fields;
    if !fields.is_empty() {
        let mut st = Statement::default();
        st.push(&format!("UPDATE {} SET ", node.table));
        let mut first = true;
        let mut sep = |st: &mut Statement| {
            if !first {
                st.push(", ");
            }
            first = false;
        };
        for f in &fields.set {
            sep(&mut st);
            st.push(&format!("{} = ", f.column)).bind(f.value.clone());
        }
        for f in &fields.add {
            sep(&mut st);
            st.push(&format!("{col} = COALESCE({col}, 0) + ", col = f.column))
                .bind(f.value.clone());
        }
        for column in &fields.clear {
            sep(&mut st);
            st.push(&format!("{column} = NULL"));
        }
        st.push(&format!(" WHERE {} IN ", node.id.column))
            .bind_list(keys(&owners));
        execute(conn, &st).await?;
    }

    for edge in &spec.edges.clear {
        clear_edge(conn, node, &owners, edge).await?;
    }
    for edge in &spec.edges.add {
        add_edge(conn, node, &owners, edge).await?;
    }
    Ok(ExecResult::Affected(owners.len() as u64))
}

async fn exec_delete(conn: &mut SqliteConnection, spec: &DeleteSpec) -> Result<ExecResult, Error> {
    let node = &spec.node;
    let mut st = Statement::default();
    st.push(&format!("DELETE FROM {}", node.table));
    match &spec.target {
        UpdateTarget::One(key) => {
            st.push(&format!(" WHERE {} = ", id_column(node.entity)))
                .bind(Value::Int(*key));
        }
        UpdateTarget::Where(predicates) => {
            let mut conditions = Conditions::new();
            for p in predicates {
                render_predicate(conditions.next(&mut st), node.entity, p)?;
            }
        }
    }
    let affected = execute(conn, &st).await?.rows_affected();
    Ok(ExecResult::Affected(affected))
}

async fn exec_graph(conn: &mut SqliteConnection, spec: &GraphSpec) -> Result<ExecResult, Error> {
    match spec {
        GraphSpec::Create(s) => exec_create(conn, s).await,
        GraphSpec::Update(s) => exec_update(conn, s).await,
        GraphSpec::Delete(s) => exec_delete(conn, s).await,
    }
}

/// Uniqueness, foreign-key, NOT NULL and CHECK violations.
pub fn is_constraint_violation(err: &(dyn std::error::Error + 'static)) -> bool {
    match err.downcast_ref::<sqlx::Error>() {
        Some(sqlx::Error::Database(db)) => matches!(
            db.kind(),
            ErrorKind::UniqueViolation
                | ErrorKind::ForeignKeyViolation
                | ErrorKind::NotNullViolation
                | ErrorKind::CheckViolation
        ),
        _ => false,
    }
}

// ============================================================================
// Drivers
// ============================================================================

/// Driver over a connection pool.
#[derive(Debug, Clone)]
pub struct SqliteDriver {
    pool: SqlitePool,
}

impl SqliteDriver {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Driver for SqliteDriver {
    async fn exec(&self, _ctx: &Context, spec: &GraphSpec) -> Result<ExecResult, Error> {
        let mut tx = self.pool.begin().await.map_err(Error::driver)?;
        let result = exec_graph(&mut tx, spec).await?;
        tx.commit().await.map_err(Error::driver)?;
        Ok(result)
    }

    async fn query(&self, _ctx: &Context, spec: &QuerySpec) -> Result<Vec<Row>, Error> {
        let mut conn = self.pool.acquire().await.map_err(Error::driver)?;
        query_rows(&mut conn, spec).await
    }

    fn is_constraint_error(&self, err: &(dyn std::error::Error + 'static)) -> bool {
        is_constraint_violation(err)
    }

    async fn begin(&self, _ctx: &Context) -> Result<Arc<dyn TxDriver>, Error> {
        let tx = self.pool.begin().await.map_err(Error::driver)?;
        debug!("Opened SQLite transaction");
        Ok(Arc::new(SqliteTx {
            state: Arc::new(Mutex::new(Some(tx))),
        }))
    }

    fn dialect(&self) -> &'static str {
        "sqlite"
    }
}

/// Driver bound to one open transaction.
#[derive(Clone)]
pub struct SqliteTx {
    state: Arc<Mutex<Option<Transaction<'static, Sqlite>>>>,
}

impl std::fmt::Debug for SqliteTx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteTx").finish_non_exhaustive()
    }
}

fn closed() -> Error {
    error!("SQLite transaction used after commit or rollback");
    Error::TxClosed
}

#[async_trait]
impl Driver for SqliteTx {
    async fn exec(&self, _ctx: &Context, spec: &GraphSpec) -> Result<ExecResult, Error> {
        let mut guard = self.state.lock().await;
        let Some(tx) = guard.as_mut() else {
            return Err(closed());
        };
        let mut savepoint = sqlx::Connection::begin(&mut **tx)
            .await
            .map_err(Error::driver)?;
        let result = exec_graph(&mut savepoint, spec).await?;
        savepoint.commit().await.map_err(Error::driver)?;
        Ok(result)
    }

    async fn query(&self, _ctx: &Context, spec: &QuerySpec) -> Result<Vec<Row>, Error> {
        let mut guard = self.state.lock().await;
        let Some(tx) = guard.as_mut() else {
            return Err(closed());
        };
        query_rows(tx, spec).await
    }

    fn is_constraint_error(&self, err: &(dyn std::error::Error + 'static)) -> bool {
        is_constraint_violation(err)
    }

    async fn begin(&self, _ctx: &Context) -> Result<Arc<dyn TxDriver>, Error> {
        Err(Error::Unsupported("nested transactions"))
    }

    fn dialect(&self) -> &'static str {
        "sqlite"
    }
}

#[async_trait]
impl TxDriver for SqliteTx {
    fn driver(&self) -> Arc<dyn Driver> {
        Arc::new(self.clone())
    }

    async fn commit(&self) -> Result<(), Error> {
        let tx = self.state.lock().await.take().ok_or_else(closed)?;
        tx.commit().await.map_err(Error::driver)
    }

    async fn rollback(&self) -> Result<(), Error> {
        let tx = self.state.lock().await.take().ok_or_else(closed)?;
        tx.rollback().await.map_err(Error::driver)
    }

    /// Dropping the sqlx transaction queues its rollback on the connection.
    /// A statement still in flight holds the lock; the transaction is then
    /// released with the last handle instead.
    fn discard(&self) {
        if let Ok(mut guard) = self.state.try_lock() {
            guard.take();
        }
    }
}
