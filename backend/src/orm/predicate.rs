//! Query predicates and ordering

use super::error::ValidationError;
use super::schema::EntityDescriptor;
use super::value::{Id, Value};

/// Comparison operator for scalar predicates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
}

impl CmpOp {
    pub fn to_sql(&self) -> &'static str {
        match self {
            CmpOp::Eq => "=",
            CmpOp::Ne => "<>",
            CmpOp::Gt => ">",
            CmpOp::Gte => ">=",
            CmpOp::Lt => "<",
            CmpOp::Lte => "<=",
        }
    }
}

/// String matching operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrOp {
    Contains,
    HasPrefix,
    HasSuffix,
    EqualFold,
    ContainsFold,
}

/// A filter over one entity type.
///
/// Field names are resolved against the entity descriptor when the query or
/// mutation runs; unknown names are validation errors.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Compare {
        field: String,
        op: CmpOp,
        value: Value,
    },
    In {
        field: String,
        values: Vec<Value>,
        negated: bool,
    },
    IsNull {
        field: String,
        negated: bool,
    },
    Str {
        field: String,
        op: StrOp,
        value: String,
    },
    IdCompare {
        op: CmpOp,
        id: Id,
    },
    IdIn {
        ids: Vec<Id>,
        negated: bool,
    },
    /// Foreign-key column membership, used when eager loading.
    ForeignKeyIn {
        column: &'static str,
        keys: Vec<i64>,
    },
    HasEdge {
        edge: String,
        with: Vec<Predicate>,
    },
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    Not(Box<Predicate>),
}

#[allow(clippy::should_implement_trait)]
impl Predicate {
    fn compare(field: &str, op: CmpOp, value: impl Into<Value>) -> Self {
        Predicate::Compare {
            field: field.to_string(),
            op,
            value: value.into(),
        }
    }

    pub fn eq(field: &str, value: impl Into<Value>) -> Self {
        Self::compare(field, CmpOp::Eq, value)
    }

    pub fn ne(field: &str, value: impl Into<Value>) -> Self {
        Self::compare(field, CmpOp::Ne, value)
    }

    pub fn gt(field: &str, value: impl Into<Value>) -> Self {
        Self::compare(field, CmpOp::Gt, value)
    }

    pub fn gte(field: &str, value: impl Into<Value>) -> Self {
        Self::compare(field, CmpOp::Gte, value)
    }

    pub fn lt(field: &str, value: impl Into<Value>) -> Self {
        Self::compare(field, CmpOp::Lt, value)
    }

    pub fn lte(field: &str, value: impl Into<Value>) -> Self {
        Self::compare(field, CmpOp::Lte, value)
    }

    pub fn is_in<V: Into<Value>>(field: &str, values: impl IntoIterator<Item = V>) -> Self {
        Predicate::In {
            field: field.to_string(),
            values: values.into_iter().map(Into::into).collect(),
            negated: false,
        }
    }

    pub fn not_in<V: Into<Value>>(field: &str, values: impl IntoIterator<Item = V>) -> Self {
        Predicate::In {
            field: field.to_string(),
            values: values.into_iter().map(Into::into).collect(),
            negated: true,
        }
    }

    pub fn is_null(field: &str) -> Self {
        Predicate::IsNull {
            field: field.to_string(),
            negated: false,
        }
    }

    pub fn not_null(field: &str) -> Self {
        Predicate::IsNull {
            field: field.to_string(),
            negated: true,
        }
    }

    fn string(field: &str, op: StrOp, value: impl Into<String>) -> Self {
        Predicate::Str {
            field: field.to_string(),
            op,
            value: value.into(),
        }
    }

    pub fn contains(field: &str, value: impl Into<String>) -> Self {
        Self::string(field, StrOp::Contains, value)
    }

    pub fn has_prefix(field: &str, value: impl Into<String>) -> Self {
        Self::string(field, StrOp::HasPrefix, value)
    }

    pub fn has_suffix(field: &str, value: impl Into<String>) -> Self {
        Self::string(field, StrOp::HasSuffix, value)
    }

    pub fn equal_fold(field: &str, value: impl Into<String>) -> Self {
        Self::string(field, StrOp::EqualFold, value)
    }

    pub fn contains_fold(field: &str, value: impl Into<String>) -> Self {
        Self::string(field, StrOp::ContainsFold, value)
    }

    pub fn id(id: impl Into<Id>) -> Self {
        Predicate::IdCompare {
            op: CmpOp::Eq,
            id: id.into(),
        }
    }

    pub fn id_cmp(op: CmpOp, id: impl Into<Id>) -> Self {
        Predicate::IdCompare { op, id: id.into() }
    }

    pub fn id_in<I: Into<Id>>(ids: impl IntoIterator<Item = I>) -> Self {
        Predicate::IdIn {
            ids: ids.into_iter().map(Into::into).collect(),
            negated: false,
        }
    }

    pub fn id_not_in<I: Into<Id>>(ids: impl IntoIterator<Item = I>) -> Self {
        Predicate::IdIn {
            ids: ids.into_iter().map(Into::into).collect(),
            negated: true,
        }
    }

    pub(crate) fn foreign_key_in(column: &'static str, keys: Vec<i64>) -> Self {
        Predicate::ForeignKeyIn { column, keys }
    }

    /// At least one neighbor over `edge`.
    pub fn has_edge(edge: &str) -> Self {
        Predicate::HasEdge {
            edge: edge.to_string(),
            with: Vec::new(),
        }
    }

    /// At least one neighbor over `edge` matching all of `with`.
    pub fn has_edge_with(edge: &str, with: impl IntoIterator<Item = Predicate>) -> Self {
        Predicate::HasEdge {
            edge: edge.to_string(),
            with: with.into_iter().collect(),
        }
    }

    pub fn and(preds: impl IntoIterator<Item = Predicate>) -> Self {
        Predicate::And(preds.into_iter().collect())
    }

    pub fn or(preds: impl IntoIterator<Item = Predicate>) -> Self {
        Predicate::Or(preds.into_iter().collect())
    }

    pub fn not(pred: Predicate) -> Self {
        Predicate::Not(Box::new(pred))
    }

    /// Check every name against `entity`, recursing into edge predicates
    /// with the edge's target descriptor.
    pub fn validate(&self, entity: &'static EntityDescriptor) -> Result<(), ValidationError> {
        let unknown_field = |field: &str| ValidationError::UnknownField {
            entity: entity.label,
            field: field.to_string(),
        };
        match self {
            Predicate::Compare { field, .. }
            | Predicate::In { field, .. }
            | Predicate::IsNull { field, .. } => {
                entity
                    .static_field(field)
                    .ok_or_else(|| unknown_field(field))?;
            }
            Predicate::Str { field, .. } => {
                if entity.column(field).map(|c| c.field_type)
                    != Some(super::value::FieldType::String)
                {
                    return Err(unknown_field(field));
                }
            }
            Predicate::IdCompare { id, .. } => {
                id.storage_key(entity.label)?;
            }
            Predicate::IdIn { ids, .. } => {
                for id in ids {
                    id.storage_key(entity.label)?;
                }
            }
            Predicate::ForeignKeyIn { column, .. } => {
                entity
                    .foreign_key(column)
                    .ok_or_else(|| unknown_field(column))?;
            }
            Predicate::HasEdge { edge, with } => {
                let rel = entity
                    .relation(edge)
                    .ok_or_else(|| ValidationError::UnknownEdge {
                        entity: entity.label,
                        edge: edge.clone(),
                    })?;
                for p in with {
                    p.validate(rel.target)?;
                }
            }
            Predicate::And(preds) | Predicate::Or(preds) => {
                for p in preds {
                    p.validate(entity)?;
                }
            }
            Predicate::Not(p) => p.validate(entity)?,
        }
        Ok(())
    }
}

/// Sort direction for ORDER BY clauses.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum OrderDirection {
    #[default]
    Asc,
    Desc,
}

impl OrderDirection {
    pub fn to_sql(&self) -> &'static str {
        match self {
            OrderDirection::Asc => "ASC",
            OrderDirection::Desc => "DESC",
        }
    }
}

/// One ORDER BY term.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    pub field: String,
    pub direction: OrderDirection,
}

impl Order {
    pub fn asc(field: &str) -> Self {
        Self {
            field: field.to_string(),
            direction: OrderDirection::Asc,
        }
    }

    pub fn desc(field: &str) -> Self {
        Self {
            field: field.to_string(),
            direction: OrderDirection::Desc,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inventory::{LOCATION, LOCATION_TYPE};

    #[test]
    fn test_validate_known_fields() {
        let p = Predicate::and([
            Predicate::eq("name", "Rack room"),
            Predicate::gt("latitude", 10.5),
            Predicate::not(Predicate::is_null("external_id")),
        ]);
        assert_eq!(p.validate(&LOCATION), Ok(()));
    }

    #[test]
    fn test_validate_unknown_field() {
        let err = Predicate::eq("colour", "red").validate(&LOCATION).unwrap_err();
        assert_eq!(
            err,
            ValidationError::UnknownField {
                entity: "location",
                field: "colour".into()
            }
        );
    }

    #[test]
    fn test_validate_edge_predicate_uses_target() {
        let ok = Predicate::has_edge_with("type", [Predicate::eq("site", true)]);
        assert_eq!(ok.validate(&LOCATION), Ok(()));

        let bad = Predicate::has_edge_with("type", [Predicate::eq("latitude", 1.0)]);
        assert!(matches!(
            bad.validate(&LOCATION),
            Err(ValidationError::UnknownField { entity: "location_type", .. })
        ));

        let missing = Predicate::has_edge("owners").validate(&LOCATION_TYPE);
        assert!(matches!(missing, Err(ValidationError::UnknownEdge { .. })));
    }

    #[test]
    fn test_string_ops_need_string_columns() {
        assert!(Predicate::contains("latitude", "1").validate(&LOCATION).is_err());
        assert!(Predicate::has_prefix("name", "Bld").validate(&LOCATION).is_ok());
    }

    #[test]
    fn test_string_id_must_parse() {
        assert!(Predicate::id("abc").validate(&LOCATION).is_err());
        assert!(Predicate::id_in(["1", "2"]).validate(&LOCATION).is_ok());
    }
}
