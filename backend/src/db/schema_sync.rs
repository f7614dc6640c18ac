//! Automatic schema synchronization from entity descriptors
//!
//! - Creates missing entity tables and many-to-many join tables
//! - Adds missing scalar and foreign-key columns to existing tables
//! - Does NOT handle column renames, type changes or dropped columns

use sqlx::SqlitePool;
use tracing::{debug, info, warn};

use crate::orm::{ColumnDescriptor, EntityDescriptor, Registry, RelationDescriptor};

use super::sqlite_helpers::sql_type;

/// Result of a schema sync operation
#[derive(Debug, Default)]
pub struct SchemaSyncResult {
    pub tables_created: Vec<String>,
    pub columns_added: Vec<(String, String)>, // (table, column)
    pub errors: Vec<String>,
}

impl SchemaSyncResult {
    fn merge(&mut self, other: SchemaSyncResult) {
        self.tables_created.extend(other.tables_created);
        self.columns_added.extend(other.columns_added);
        self.errors.extend(other.errors);
    }

    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Check if a table exists in the database
async fn table_exists(pool: &SqlitePool, table_name: &str) -> Result<bool, sqlx::Error> {
    let result: Option<(String,)> =
        sqlx::query_as("SELECT name FROM sqlite_master WHERE type='table' AND name = ?")
            .bind(table_name)
            .fetch_optional(pool)
            .await?;

    Ok(result.is_some())
}

/// Get existing columns for a table
async fn get_table_columns(pool: &SqlitePool, table_name: &str) -> Result<Vec<String>, sqlx::Error> {
    let rows: Vec<(i32, String, String, i32, Option<String>, i32)> =
        sqlx::query_as(&format!("PRAGMA table_info({})", table_name))
            .fetch_all(pool)
            .await?;

    Ok(rows.into_iter().map(|(_, name, _, _, _, _)| name).collect())
}

fn column_sql(col: &ColumnDescriptor) -> String {
    let mut sql = format!("{} {}", col.name, sql_type(col.field_type));
    if !col.nullable {
        sql.push_str(" NOT NULL");
    }
    if col.unique {
        sql.push_str(" UNIQUE");
    }
    sql
}

/// Generate CREATE TABLE IF NOT EXISTS SQL for an entity
pub fn create_table_sql(entity: &EntityDescriptor) -> String {
    let mut defs = vec![format!("{} INTEGER PRIMARY KEY AUTOINCREMENT", entity.id.column)];
    defs.extend(entity.columns.iter().map(column_sql));
    defs.extend(entity.foreign_keys.iter().map(|fk| {
        format!(
            "{} INTEGER{} REFERENCES {}({}) ON DELETE SET NULL",
            fk.column,
            if fk.unique { " UNIQUE" } else { "" },
            fk.references.table,
            fk.references.id.column
        )
    }));

    format!(
        "CREATE TABLE IF NOT EXISTS {} (\n  {}\n)",
        entity.table,
        defs.join(",\n  ")
    )
}

/// Generate the join table for an owning many-to-many relation
pub fn create_join_table_sql(owner: &EntityDescriptor, relation: &RelationDescriptor) -> String {
    let (own, other) = relation.join_columns();
    let target = relation.target;
    format!(
        "CREATE TABLE IF NOT EXISTS {table} (\n  \
         {own} INTEGER NOT NULL REFERENCES {owner_table}({owner_id}) ON DELETE CASCADE,\n  \
         {other} INTEGER NOT NULL REFERENCES {target_table}({target_id}) ON DELETE CASCADE,\n  \
         PRIMARY KEY ({own}, {other})\n)",
        table = relation.table,
        owner_table = owner.table,
        owner_id = owner.id.column,
        target_table = target.table,
        target_id = target.id.column,
    )
}

/// Generate ALTER TABLE ADD COLUMN SQL
///
/// SQLite cannot add PRIMARY KEY or UNIQUE columns, nor NOT NULL columns
/// without a default, so added columns are always plain and nullable.
fn generate_add_column_sql(table_name: &str, column: &str, sql_type: &str) -> String {
    format!("ALTER TABLE {} ADD COLUMN {} {}", table_name, column, sql_type)
}

async fn create_table(pool: &SqlitePool, table: &str, sql: &str) -> SchemaSyncResult {
    let mut result = SchemaSyncResult::default();
    debug!("Creating table {}: {}", table, sql);
    match sqlx::query(sql).execute(pool).await {
        Ok(_) => {
            info!("Created table: {}", table);
            result.tables_created.push(table.to_string());
        }
        Err(e) => {
            let msg = format!("Failed to create table {}: {}", table, e);
            warn!("{}", msg);
            result.errors.push(msg);
        }
    }
    result
}

/// Sync a single entity's table to the database
pub async fn sync_entity(
    pool: &SqlitePool,
    entity: &EntityDescriptor,
) -> Result<SchemaSyncResult, sqlx::Error> {
    let table_name = entity.table;

    if !table_exists(pool, table_name).await? {
        return Ok(create_table(pool, table_name, &create_table_sql(entity)).await);
    }

    let mut result = SchemaSyncResult::default();
    let existing_columns = get_table_columns(pool, table_name).await?;
    let defined = entity
        .columns
        .iter()
        .map(|c| (c.name, sql_type(c.field_type)))
        .chain(entity.foreign_keys.iter().map(|fk| (fk.column, "INTEGER")));

    for (column, ty) in defined {
        if existing_columns.iter().any(|c| c == column) {
            continue;
        }
        let alter_sql = generate_add_column_sql(table_name, column, ty);
        debug!("Adding column to {}: {}", table_name, alter_sql);

        match sqlx::query(&alter_sql).execute(pool).await {
            Ok(_) => {
                info!("Added column {}.{}", table_name, column);
                result
                    .columns_added
                    .push((table_name.to_string(), column.to_string()));
            }
            Err(e) => {
                let msg = format!("Failed to add column {}.{}: {}", table_name, column, e);
                warn!("{}", msg);
                result.errors.push(msg);
            }
        }
    }

    Ok(result)
}

/// Sync every entity table and join table in `registry`.
pub async fn sync_registry(pool: &SqlitePool, registry: &Registry) -> SchemaSyncResult {
    let mut total_result = SchemaSyncResult::default();

    for entity in registry.entities() {
        match sync_entity(pool, entity).await {
            Ok(result) => total_result.merge(result),
            Err(e) => total_result
                .errors
                .push(format!("Error syncing {}: {}", entity.label, e)),
        }
    }

    for (owner, relation) in registry.join_tables() {
        match table_exists(pool, relation.table).await {
            Ok(true) => {}
            Ok(false) => {
                let sql = create_join_table_sql(owner, relation);
                total_result.merge(create_table(pool, relation.table, &sql).await);
            }
            Err(e) => total_result
                .errors
                .push(format!("Error syncing {}: {}", relation.table, e)),
        }
    }

    total_result
}
