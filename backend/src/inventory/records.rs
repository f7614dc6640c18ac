//! Typed records decoded from inventory nodes

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::Entity;

use super::{
    EQUIPMENT, EQUIPMENT_TYPE, FILE, LOCATION, LOCATION_TYPE, PROPERTY, PROPERTY_TYPE, USER,
    USERS_GROUP,
};

/// Location type record
#[derive(Debug, Clone, PartialEq, Serialize, Entity)]
pub struct LocationType {
    #[entity(id)]
    pub id: i64,
    pub name: String,
    pub map_type: Option<String>,
    pub map_zoom_level: i64,
    pub sort_index: i64,
    pub site: bool,
    pub create_time: DateTime<Utc>,
    pub update_time: DateTime<Utc>,
}

/// Location record; ids are exposed as strings
#[derive(Debug, Clone, PartialEq, Serialize, Entity)]
pub struct Location {
    #[entity(id)]
    pub id: String,
    pub name: String,
    pub external_id: Option<String>,
    pub latitude: f64,
    pub longitude: f64,
    pub site_survey_needed: Option<bool>,
    pub create_time: DateTime<Utc>,
    pub update_time: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Entity)]
pub struct EquipmentType {
    #[entity(id)]
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Entity)]
pub struct Equipment {
    #[entity(id)]
    pub id: i64,
    pub name: String,
    pub future_state: Option<String>,
    pub device_id: Option<String>,
    pub external_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Entity)]
pub struct PropertyType {
    #[entity(id)]
    pub id: i64,
    pub kind: String,
    pub name: String,
    pub sort_index: i64,
    pub string_val: Option<String>,
    pub int_val: Option<i64>,
    pub bool_val: Option<bool>,
    pub float_val: Option<f64>,
    pub is_instance_property: bool,
    pub editable: bool,
    pub mandatory: bool,
    pub deleted: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Entity)]
pub struct Property {
    #[entity(id)]
    pub id: i64,
    pub string_val: Option<String>,
    pub int_val: Option<i64>,
    pub bool_val: Option<bool>,
    pub float_val: Option<f64>,
    pub latitude_val: Option<f64>,
    pub longitude_val: Option<f64>,
}

/// Stored file metadata; content lives in the object store under `store_key`
#[derive(Debug, Clone, PartialEq, Serialize, Entity)]
pub struct File {
    #[entity(id)]
    pub id: i64,
    pub category: String,
    pub name: String,
    pub size: Option<i64>,
    pub modified_at: Option<DateTime<Utc>>,
    pub uploaded_at: Option<DateTime<Utc>>,
    pub content_type: String,
    pub store_key: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Entity)]
pub struct User {
    #[entity(id)]
    pub id: i64,
    pub auth_id: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub status: String,
    pub role: String,
}

impl User {
    /// "First Last", falling back to the auth id
    pub fn display_name(&self) -> String {
        match (&self.first_name, &self.last_name) {
            (Some(first), Some(last)) => format!("{first} {last}"),
            (Some(name), None) | (None, Some(name)) => name.clone(),
            (None, None) => self.auth_id.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Entity)]
pub struct UsersGroup {
    #[entity(id)]
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub status: String,
    /// Filled by callers from the loaded "members" edge
    #[entity(skip)]
    pub member_count: usize,
}
