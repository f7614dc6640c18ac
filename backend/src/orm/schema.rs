//! Static entity descriptors
//!
//! Every entity type is described once by a `static` [`EntityDescriptor`]:
//! its table, identifier, ordered scalar columns, the foreign-key columns
//! physically stored on the table, and its relations. The generic builders
//! are driven entirely by these descriptors.
//!
//! ```rust,ignore
//! pub static LOCATION_TYPE: EntityDescriptor = EntityDescriptor {
//!     label: "location_type",
//!     table: "location_types",
//!     id: IdDescriptor::int("id"),
//!     columns: &[ColumnDescriptor::new("name", FieldType::String).unique()],
//!     foreign_keys: &[],
//!     relations: &[RelationDescriptor::new("locations", &LOCATION, Cardinality::OneToMany)
//!         .stored_in("locations", &["location_type"])],
//! };
//! ```

use std::collections::HashMap;
use std::fmt;

use once_cell::sync::OnceCell;

use super::value::{FieldType, IdKind, Value};

/// Generates a value for an unset column.
pub type DefaultFn = fn() -> Value;

/// Checks a staged value; the error string becomes the validation cause.
pub type ValidatorFn = fn(&Value) -> Result<(), String>;

/// Identifier column of an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdDescriptor {
    pub column: &'static str,
    pub kind: IdKind,
}

impl IdDescriptor {
    pub const fn int(column: &'static str) -> Self {
        Self {
            column,
            kind: IdKind::Int,
        }
    }

    pub const fn string(column: &'static str) -> Self {
        Self {
            column,
            kind: IdKind::String,
        }
    }
}

/// A scalar column.
#[derive(Clone, Copy)]
pub struct ColumnDescriptor {
    /// Column name in the database
    pub name: &'static str,
    pub field_type: FieldType,
    /// Must be set (or defaulted) on create
    pub required: bool,
    /// Column accepts NULL and may be cleared on update
    pub nullable: bool,
    pub unique: bool,
    /// Cannot be changed once created
    pub immutable: bool,
    pub default: Option<DefaultFn>,
    /// Applied on update when the caller leaves the column untouched
    pub update_default: Option<DefaultFn>,
    pub validator: Option<ValidatorFn>,
}

impl ColumnDescriptor {
    pub const fn new(name: &'static str, field_type: FieldType) -> Self {
        Self {
            name,
            field_type,
            required: true,
            nullable: false,
            unique: false,
            immutable: false,
            default: None,
            update_default: None,
            validator: None,
        }
    }

    /// Not required on create, stored as NULL when absent.
    pub const fn optional(mut self) -> Self {
        self.required = false;
        self.nullable = true;
        self
    }

    pub const fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub const fn immutable(mut self) -> Self {
        self.immutable = true;
        self
    }

    pub const fn default(mut self, f: DefaultFn) -> Self {
        self.default = Some(f);
        self
    }

    pub const fn update_default(mut self, f: DefaultFn) -> Self {
        self.update_default = Some(f);
        self
    }

    pub const fn validate(mut self, f: ValidatorFn) -> Self {
        self.validator = Some(f);
        self
    }
}

impl fmt::Debug for ColumnDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ColumnDescriptor")
            .field("name", &self.name)
            .field("field_type", &self.field_type)
            .field("required", &self.required)
            .field("nullable", &self.nullable)
            .field("unique", &self.unique)
            .field("immutable", &self.immutable)
            .field("default", &self.default.is_some())
            .field("update_default", &self.update_default.is_some())
            .field("validator", &self.validator.is_some())
            .finish()
    }
}

/// A foreign-key column stored on an entity's own table.
#[derive(Clone, Copy)]
pub struct ForeignKeyDescriptor {
    pub column: &'static str,
    pub references: &'static EntityDescriptor,
    /// One-to-one edges keep the column unique
    pub unique: bool,
}

impl ForeignKeyDescriptor {
    pub const fn new(column: &'static str, references: &'static EntityDescriptor) -> Self {
        Self {
            column,
            references,
            unique: false,
        }
    }

    pub const fn unique(mut self) -> Self {
        self.unique = true;
        self
    }
}

impl fmt::Debug for ForeignKeyDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ForeignKeyDescriptor")
            .field("column", &self.column)
            .field("references", &self.references.label)
            .field("unique", &self.unique)
            .finish()
    }
}

/// Relationship cardinality, seen from the descriptor that declares it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Cardinality {
    OneToOne,
    OneToMany,
    ManyToOne,
    ManyToMany,
}

impl Cardinality {
    /// At most one target per source node.
    pub fn is_unique(&self) -> bool {
        matches!(self, Cardinality::OneToOne | Cardinality::ManyToOne)
    }
}

/// A relation from one entity to another.
///
/// `table` / `columns` name where the edge is stored: the table holding the
/// foreign-key column, or for many-to-many the join table with
/// `[owner_column, target_column]` as declared by the owning (non-inverse)
/// side. Inverse relations repeat the owning side's table and columns.
#[derive(Clone, Copy)]
pub struct RelationDescriptor {
    pub name: &'static str,
    pub target: &'static EntityDescriptor,
    pub cardinality: Cardinality,
    pub inverse: bool,
    pub table: &'static str,
    pub columns: &'static [&'static str],
    pub required: bool,
}

impl RelationDescriptor {
    pub const fn new(
        name: &'static str,
        target: &'static EntityDescriptor,
        cardinality: Cardinality,
    ) -> Self {
        Self {
            name,
            target,
            cardinality,
            inverse: false,
            table: "",
            columns: &[],
            required: false,
        }
    }

    pub const fn stored_in(mut self, table: &'static str, columns: &'static [&'static str]) -> Self {
        self.table = table;
        self.columns = columns;
        self
    }

    pub const fn inverse(mut self) -> Self {
        self.inverse = true;
        self
    }

    pub const fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn is_unique(&self) -> bool {
        self.cardinality.is_unique()
    }

    /// The source row itself holds the foreign key (many-to-one, or the
    /// inverse side of a one-to-one).
    pub fn owns_foreign_key(&self) -> bool {
        match self.cardinality {
            Cardinality::ManyToOne => true,
            Cardinality::OneToOne => self.inverse,
            Cardinality::OneToMany | Cardinality::ManyToMany => false,
        }
    }

    /// Foreign-key column for non many-to-many relations.
    pub fn column(&self) -> &'static str {
        self.columns.first().copied().unwrap_or_default()
    }

    /// Join-table columns as (source side, target side).
    pub fn join_columns(&self) -> (&'static str, &'static str) {
        let owner = self.columns.first().copied().unwrap_or_default();
        let target = self.columns.get(1).copied().unwrap_or_default();
        if self.inverse {
            (target, owner)
        } else {
            (owner, target)
        }
    }
}

impl fmt::Debug for RelationDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelationDescriptor")
            .field("name", &self.name)
            .field("target", &self.target.label)
            .field("cardinality", &self.cardinality)
            .field("inverse", &self.inverse)
            .field("table", &self.table)
            .field("columns", &self.columns)
            .field("required", &self.required)
            .finish()
    }
}

/// Static description of one entity type.
#[derive(Debug)]
pub struct EntityDescriptor {
    /// Singular label used in errors and logs (e.g. "location")
    pub label: &'static str,
    pub table: &'static str,
    pub id: IdDescriptor,
    pub columns: &'static [ColumnDescriptor],
    pub foreign_keys: &'static [ForeignKeyDescriptor],
    pub relations: &'static [RelationDescriptor],
}

impl EntityDescriptor {
    pub fn column(&self, name: &str) -> Option<&'static ColumnDescriptor> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn relation(&self, name: &str) -> Option<&'static RelationDescriptor> {
        self.relations.iter().find(|r| r.name == name)
    }

    pub fn foreign_key(&self, column: &str) -> Option<&'static ForeignKeyDescriptor> {
        self.foreign_keys.iter().find(|f| f.column == column)
    }

    /// The id column or a scalar column, with its type.
    pub fn field_type(&self, name: &str) -> Option<FieldType> {
        if name == self.id.column {
            return Some(FieldType::Int);
        }
        self.column(name).map(|c| c.field_type)
    }

    pub fn column_names(&self) -> Vec<&'static str> {
        self.columns.iter().map(|c| c.name).collect()
    }

    /// Resolve a field name to its `'static` spelling.
    pub fn static_field(&self, name: &str) -> Option<&'static str> {
        if name == self.id.column {
            return Some(self.id.column);
        }
        self.column(name).map(|c| c.name)
    }

    /// Check that relation storage refers to columns that exist.
    pub fn validate(&self) -> Result<(), String> {
        for rel in self.relations {
            match rel.cardinality {
                Cardinality::ManyToMany => {
                    if rel.columns.len() != 2 {
                        return Err(format!(
                            "{}.{}: join table needs two columns",
                            self.label, rel.name
                        ));
                    }
                }
                _ => {
                    if rel.columns.len() != 1 {
                        return Err(format!(
                            "{}.{}: expected exactly one foreign-key column",
                            self.label, rel.name
                        ));
                    }
                    let holder = if rel.owns_foreign_key() { self } else { rel.target };
                    if holder.table != rel.table {
                        return Err(format!(
                            "{}.{}: edge stored in {} but foreign key belongs to {}",
                            self.label, rel.name, rel.table, holder.table
                        ));
                    }
                    let Some(fk) = holder.foreign_key(rel.column()) else {
                        return Err(format!(
                            "{}.{}: {} has no foreign key {}",
                            self.label,
                            rel.name,
                            holder.table,
                            rel.column()
                        ));
                    };
                    let referenced = if rel.owns_foreign_key() { rel.target } else { self };
                    if !std::ptr::eq(fk.references, referenced) {
                        return Err(format!(
                            "{}.{}: {}.{} references {}",
                            self.label, rel.name, holder.table, fk.column, fk.references.table
                        ));
                    }
                }
            }
        }
        Ok(())
    }
}

impl PartialEq for EntityDescriptor {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self, other)
    }
}

/// The set of descriptors an application works with.
pub struct Registry {
    entities: &'static [&'static EntityDescriptor],
    by_label: OnceCell<HashMap<&'static str, &'static EntityDescriptor>>,
}

impl Registry {
    pub const fn new(entities: &'static [&'static EntityDescriptor]) -> Self {
        Self {
            entities,
            by_label: OnceCell::new(),
        }
    }

    pub fn entities(&self) -> &'static [&'static EntityDescriptor] {
        self.entities
    }

    pub fn lookup(&self, label: &str) -> Option<&'static EntityDescriptor> {
        self.by_label
            .get_or_init(|| self.entities.iter().map(|e| (e.label, *e)).collect())
            .get(label)
            .copied()
    }

    /// Many-to-many join tables declared by owning relations.
    pub fn join_tables(&self) -> Vec<(&'static EntityDescriptor, &'static RelationDescriptor)> {
        self.entities
            .iter()
            .flat_map(|e| e.relations.iter().map(move |r| (*e, r)))
            .filter(|(_, r)| r.cardinality == Cardinality::ManyToMany && !r.inverse)
            .collect()
    }

    /// Validate every descriptor.
    pub fn validate(&self) -> Result<(), String> {
        for entity in self.entities {
            entity.validate()?;
            for rel in entity.relations {
                if self.lookup(rel.target.label).is_none() {
                    return Err(format!(
                        "{}.{}: target {} is not registered",
                        entity.label, rel.name, rel.target.label
                    ));
                }
            }
        }
        Ok(())
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.entities.iter().map(|e| e.label))
            .finish()
    }
}
