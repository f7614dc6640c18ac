//! Network inventory entity descriptors
//!
//! Locations form a tree and are typed by a location type; equipment sits in
//! a location and is typed by an equipment type; properties hang off
//! locations and equipment and are typed by property types. Users belong to
//! groups and may have a profile photo file.

mod records;

use chrono::{SubsecRound, Utc};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::orm::{
    Cardinality, ColumnDescriptor, EntityDescriptor, FieldType, ForeignKeyDescriptor,
    IdDescriptor, Registry, RelationDescriptor, Value,
};

pub use records::{
    Equipment, EquipmentType, File, Location, LocationType, Property, PropertyType, User,
    UsersGroup,
};

// ============================================================================
// Defaults
// ============================================================================

/// Current time at the precision timestamps are stored with.
fn now() -> Value {
    Value::Time(Utc::now().trunc_subsecs(6))
}

fn zero_int() -> Value {
    Value::Int(0)
}

fn zero_float() -> Value {
    Value::Float(0.0)
}

fn falsy() -> Value {
    Value::Bool(false)
}

fn truthy() -> Value {
    Value::Bool(true)
}

fn default_zoom() -> Value {
    Value::Int(8)
}

fn active() -> Value {
    Value::String("ACTIVE".into())
}

fn user_role() -> Value {
    Value::String("USER".into())
}

fn store_key() -> Value {
    Value::String(uuid::Uuid::new_v4().to_string())
}

// ============================================================================
// Validators
// ============================================================================

fn not_empty(value: &Value) -> Result<(), String> {
    match value.as_str() {
        Some(s) if s.trim().is_empty() => Err("must not be empty".into()),
        _ => Ok(()),
    }
}

fn in_range(value: &Value, min: f64, max: f64) -> Result<(), String> {
    match value.as_f64() {
        Some(v) if !(min..=max).contains(&v) => Err(format!("{v} is outside [{min}, {max}]")),
        _ => Ok(()),
    }
}

fn latitude(value: &Value) -> Result<(), String> {
    in_range(value, -90.0, 90.0)
}

fn longitude(value: &Value) -> Result<(), String> {
    in_range(value, -180.0, 180.0)
}

fn non_negative(value: &Value) -> Result<(), String> {
    match value.as_i64() {
        Some(v) if v < 0 => Err(format!("{v} is negative")),
        _ => Ok(()),
    }
}

static EMAIL: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").ok());

fn email(value: &Value) -> Result<(), String> {
    let (Some(s), Some(pattern)) = (value.as_str(), EMAIL.as_ref()) else {
        return Ok(());
    };
    if pattern.is_match(s) {
        Ok(())
    } else {
        Err(format!("{s:?} is not an email address"))
    }
}

// ============================================================================
// Descriptors
// ============================================================================

const CREATE_TIME: ColumnDescriptor = ColumnDescriptor::new("create_time", FieldType::Time)
    .immutable()
    .default(now);

const UPDATE_TIME: ColumnDescriptor = ColumnDescriptor::new("update_time", FieldType::Time)
    .default(now)
    .update_default(now);

pub static LOCATION_TYPE: EntityDescriptor = EntityDescriptor {
    label: "location_type",
    table: "location_types",
    id: IdDescriptor::int("id"),
    columns: &[
        CREATE_TIME,
        UPDATE_TIME,
        ColumnDescriptor::new("name", FieldType::String)
            .unique()
            .validate(not_empty),
        ColumnDescriptor::new("map_type", FieldType::String).optional(),
        ColumnDescriptor::new("map_zoom_level", FieldType::Int).default(default_zoom),
        ColumnDescriptor::new("sort_index", FieldType::Int).default(zero_int),
        ColumnDescriptor::new("site", FieldType::Bool).default(falsy),
    ],
    foreign_keys: &[],
    relations: &[
        RelationDescriptor::new("locations", &LOCATION, Cardinality::OneToMany)
            .stored_in("locations", &["location_type"]),
        RelationDescriptor::new("property_types", &PROPERTY_TYPE, Cardinality::OneToMany)
            .stored_in("property_types", &["location_type_property_types"]),
    ],
};

pub static LOCATION: EntityDescriptor = EntityDescriptor {
    label: "location",
    table: "locations",
    id: IdDescriptor::string("id"),
    columns: &[
        CREATE_TIME,
        UPDATE_TIME,
        ColumnDescriptor::new("name", FieldType::String).validate(not_empty),
        ColumnDescriptor::new("external_id", FieldType::String)
            .optional()
            .unique(),
        ColumnDescriptor::new("latitude", FieldType::Float)
            .default(zero_float)
            .validate(latitude),
        ColumnDescriptor::new("longitude", FieldType::Float)
            .default(zero_float)
            .validate(longitude),
        ColumnDescriptor::new("site_survey_needed", FieldType::Bool).optional(),
    ],
    foreign_keys: &[
        ForeignKeyDescriptor::new("location_type", &LOCATION_TYPE),
        ForeignKeyDescriptor::new("location_children", &LOCATION),
    ],
    relations: &[
        RelationDescriptor::new("type", &LOCATION_TYPE, Cardinality::ManyToOne)
            .stored_in("locations", &["location_type"])
            .required(),
        RelationDescriptor::new("parent", &LOCATION, Cardinality::ManyToOne)
            .stored_in("locations", &["location_children"])
            .inverse(),
        RelationDescriptor::new("children", &LOCATION, Cardinality::OneToMany)
            .stored_in("locations", &["location_children"]),
        RelationDescriptor::new("equipment", &EQUIPMENT, Cardinality::OneToMany)
            .stored_in("equipment", &["location_equipment"]),
        RelationDescriptor::new("properties", &PROPERTY, Cardinality::OneToMany)
            .stored_in("properties", &["location_properties"]),
        RelationDescriptor::new("files", &FILE, Cardinality::OneToMany)
            .stored_in("files", &["location_files"]),
    ],
};

pub static EQUIPMENT_TYPE: EntityDescriptor = EntityDescriptor {
    label: "equipment_type",
    table: "equipment_types",
    id: IdDescriptor::int("id"),
    columns: &[
        CREATE_TIME,
        UPDATE_TIME,
        ColumnDescriptor::new("name", FieldType::String)
            .unique()
            .validate(not_empty),
    ],
    foreign_keys: &[],
    relations: &[
        RelationDescriptor::new("equipment", &EQUIPMENT, Cardinality::OneToMany)
            .stored_in("equipment", &["equipment_type"]),
        RelationDescriptor::new("property_types", &PROPERTY_TYPE, Cardinality::OneToMany)
            .stored_in("property_types", &["equipment_type_property_types"]),
    ],
};

pub static EQUIPMENT: EntityDescriptor = EntityDescriptor {
    label: "equipment",
    table: "equipment",
    id: IdDescriptor::int("id"),
    columns: &[
        CREATE_TIME,
        UPDATE_TIME,
        ColumnDescriptor::new("name", FieldType::String).validate(not_empty),
        ColumnDescriptor::new("future_state", FieldType::String).optional(),
        ColumnDescriptor::new("device_id", FieldType::String).optional(),
        ColumnDescriptor::new("external_id", FieldType::String).optional(),
    ],
    foreign_keys: &[
        ForeignKeyDescriptor::new("equipment_type", &EQUIPMENT_TYPE),
        ForeignKeyDescriptor::new("location_equipment", &LOCATION),
    ],
    relations: &[
        RelationDescriptor::new("type", &EQUIPMENT_TYPE, Cardinality::ManyToOne)
            .stored_in("equipment", &["equipment_type"])
            .required(),
        RelationDescriptor::new("location", &LOCATION, Cardinality::ManyToOne)
            .stored_in("equipment", &["location_equipment"])
            .inverse(),
        RelationDescriptor::new("properties", &PROPERTY, Cardinality::OneToMany)
            .stored_in("properties", &["equipment_properties"]),
    ],
};

pub static PROPERTY_TYPE: EntityDescriptor = EntityDescriptor {
    label: "property_type",
    table: "property_types",
    id: IdDescriptor::int("id"),
    columns: &[
        CREATE_TIME,
        UPDATE_TIME,
        ColumnDescriptor::new("kind", FieldType::String).validate(not_empty),
        ColumnDescriptor::new("name", FieldType::String).validate(not_empty),
        ColumnDescriptor::new("sort_index", FieldType::Int).default(zero_int),
        ColumnDescriptor::new("string_val", FieldType::String).optional(),
        ColumnDescriptor::new("int_val", FieldType::Int).optional(),
        ColumnDescriptor::new("bool_val", FieldType::Bool).optional(),
        ColumnDescriptor::new("float_val", FieldType::Float).optional(),
        ColumnDescriptor::new("is_instance_property", FieldType::Bool).default(truthy),
        ColumnDescriptor::new("editable", FieldType::Bool).default(truthy),
        ColumnDescriptor::new("mandatory", FieldType::Bool).default(falsy),
        ColumnDescriptor::new("deleted", FieldType::Bool).default(falsy),
    ],
    foreign_keys: &[
        ForeignKeyDescriptor::new("location_type_property_types", &LOCATION_TYPE),
        ForeignKeyDescriptor::new("equipment_type_property_types", &EQUIPMENT_TYPE),
    ],
    relations: &[
        RelationDescriptor::new("location_type", &LOCATION_TYPE, Cardinality::ManyToOne)
            .stored_in("property_types", &["location_type_property_types"])
            .inverse(),
        RelationDescriptor::new("equipment_type", &EQUIPMENT_TYPE, Cardinality::ManyToOne)
            .stored_in("property_types", &["equipment_type_property_types"])
            .inverse(),
        RelationDescriptor::new("properties", &PROPERTY, Cardinality::OneToMany)
            .stored_in("properties", &["property_type"]),
    ],
};

pub static PROPERTY: EntityDescriptor = EntityDescriptor {
    label: "property",
    table: "properties",
    id: IdDescriptor::int("id"),
    columns: &[
        CREATE_TIME,
        UPDATE_TIME,
        ColumnDescriptor::new("string_val", FieldType::String).optional(),
        ColumnDescriptor::new("int_val", FieldType::Int).optional(),
        ColumnDescriptor::new("bool_val", FieldType::Bool).optional(),
        ColumnDescriptor::new("float_val", FieldType::Float).optional(),
        ColumnDescriptor::new("latitude_val", FieldType::Float)
            .optional()
            .validate(latitude),
        ColumnDescriptor::new("longitude_val", FieldType::Float)
            .optional()
            .validate(longitude),
    ],
    foreign_keys: &[
        ForeignKeyDescriptor::new("property_type", &PROPERTY_TYPE),
        ForeignKeyDescriptor::new("location_properties", &LOCATION),
        ForeignKeyDescriptor::new("equipment_properties", &EQUIPMENT),
    ],
    relations: &[
        RelationDescriptor::new("type", &PROPERTY_TYPE, Cardinality::ManyToOne)
            .stored_in("properties", &["property_type"])
            .required(),
        RelationDescriptor::new("location", &LOCATION, Cardinality::ManyToOne)
            .stored_in("properties", &["location_properties"])
            .inverse(),
        RelationDescriptor::new("equipment", &EQUIPMENT, Cardinality::ManyToOne)
            .stored_in("properties", &["equipment_properties"])
            .inverse(),
    ],
};

pub static FILE: EntityDescriptor = EntityDescriptor {
    label: "file",
    table: "files",
    id: IdDescriptor::int("id"),
    columns: &[
        CREATE_TIME,
        UPDATE_TIME,
        ColumnDescriptor::new("category", FieldType::String).validate(not_empty),
        ColumnDescriptor::new("name", FieldType::String).validate(not_empty),
        ColumnDescriptor::new("size", FieldType::Int)
            .optional()
            .validate(non_negative),
        ColumnDescriptor::new("modified_at", FieldType::Time).optional(),
        ColumnDescriptor::new("uploaded_at", FieldType::Time).optional(),
        ColumnDescriptor::new("content_type", FieldType::String),
        ColumnDescriptor::new("store_key", FieldType::String)
            .immutable()
            .default(store_key),
    ],
    foreign_keys: &[
        ForeignKeyDescriptor::new("location_files", &LOCATION),
        ForeignKeyDescriptor::new("user_profile_photo", &USER).unique(),
    ],
    relations: &[
        RelationDescriptor::new("location", &LOCATION, Cardinality::ManyToOne)
            .stored_in("files", &["location_files"])
            .inverse(),
        RelationDescriptor::new("user", &USER, Cardinality::OneToOne)
            .stored_in("files", &["user_profile_photo"])
            .inverse(),
    ],
};

pub static USER: EntityDescriptor = EntityDescriptor {
    label: "user",
    table: "users",
    id: IdDescriptor::int("id"),
    columns: &[
        CREATE_TIME,
        UPDATE_TIME,
        ColumnDescriptor::new("auth_id", FieldType::String)
            .unique()
            .immutable()
            .validate(not_empty),
        ColumnDescriptor::new("first_name", FieldType::String).optional(),
        ColumnDescriptor::new("last_name", FieldType::String).optional(),
        ColumnDescriptor::new("email", FieldType::String)
            .optional()
            .validate(email),
        ColumnDescriptor::new("status", FieldType::String).default(active),
        ColumnDescriptor::new("role", FieldType::String).default(user_role),
    ],
    foreign_keys: &[],
    relations: &[
        RelationDescriptor::new("profile_photo", &FILE, Cardinality::OneToOne)
            .stored_in("files", &["user_profile_photo"]),
        RelationDescriptor::new("groups", &USERS_GROUP, Cardinality::ManyToMany)
            .stored_in("users_group_members", &["users_group_id", "user_id"])
            .inverse(),
    ],
};

pub static USERS_GROUP: EntityDescriptor = EntityDescriptor {
    label: "users_group",
    table: "users_groups",
    id: IdDescriptor::int("id"),
    columns: &[
        CREATE_TIME,
        UPDATE_TIME,
        ColumnDescriptor::new("name", FieldType::String)
            .unique()
            .validate(not_empty),
        ColumnDescriptor::new("description", FieldType::String).optional(),
        ColumnDescriptor::new("status", FieldType::String).default(active),
    ],
    foreign_keys: &[],
    relations: &[
        RelationDescriptor::new("members", &USER, Cardinality::ManyToMany)
            .stored_in("users_group_members", &["users_group_id", "user_id"]),
    ],
};

/// Every inventory entity, in dependency order for table creation.
pub static REGISTRY: Registry = Registry::new(&[
    &LOCATION_TYPE,
    &LOCATION,
    &EQUIPMENT_TYPE,
    &EQUIPMENT,
    &PROPERTY_TYPE,
    &PROPERTY,
    &USER,
    &FILE,
    &USERS_GROUP,
]);
