//! Integration tests for create, update, delete and lookup against SQLite

mod common;

use assert_matches::assert_matches;

use chrono::SubsecRound;

use inventory_graph::inventory::{
    EQUIPMENT, EQUIPMENT_TYPE, FILE, LOCATION, LOCATION_TYPE, Location,
};
use inventory_graph::orm::{Error, Id, Predicate, ValidationError, Value};

use common::setup;

// ============================================================================
// Create
// ============================================================================

mod create {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_create_returns_id_and_defaults() {
        let t = setup().await;
        let kind = t.location_type("Building").await;

        assert!(!kind.id().is_empty());
        assert_eq!(kind.get::<String>("name").unwrap(), "Building");
        assert_eq!(kind.get::<bool>("site").unwrap(), false);
        assert_eq!(kind.get::<i64>("map_zoom_level").unwrap(), 8);
        assert_matches!(kind.value("create_time"), Some(Value::Time(_)));
    }

    #[tokio::test]
    async fn test_created_node_matches_stored_row() {
        let t = setup().await;
        let kind = t.location_type("Building").await;
        let created = t
            .client
            .create(&LOCATION)
            .set("name", "HQ")
            .set("latitude", 32.08)
            .set("longitude", 34.78)
            .set_edge_id("type", kind.id().clone())
            .save(&t.ctx)
            .await
            .unwrap();

        let stored = t
            .client
            .query(&LOCATION)
            .filter(Predicate::id(created.id().clone()))
            .only(&t.ctx)
            .await
            .unwrap();

        assert_eq!(stored.values(), created.values());
        assert_eq!(stored.foreign_key("location_type"), Some(kind.id()));
    }

    #[tokio::test]
    async fn test_caller_timestamp_matches_stored_row() {
        let t = setup().await;
        let modified = chrono::DateTime::from_timestamp(1_700_000_000, 431_988_114).unwrap();
        let created = t
            .client
            .create(&FILE)
            .set("category", "IMAGE")
            .set("name", "rack.png")
            .set("content_type", "image/png")
            .set("modified_at", modified)
            .set("uploaded_at", chrono::Utc::now())
            .save(&t.ctx)
            .await
            .unwrap();

        let stored = t
            .client
            .query(&FILE)
            .filter(Predicate::id(created.id().clone()))
            .only(&t.ctx)
            .await
            .unwrap();

        assert_eq!(stored.values(), created.values());
        assert_eq!(
            stored.get::<Option<chrono::DateTime<chrono::Utc>>>("modified_at").unwrap(),
            Some(modified.trunc_subsecs(6))
        );
    }

    #[tokio::test]
    async fn test_string_ids_for_locations() {
        let t = setup().await;
        let kind = t.location_type("Room").await;
        let room = t.location("Rack room", &kind).await;
        assert_matches!(room.id(), Id::Str(_));

        let fetched = t.client.get(&t.ctx, &LOCATION, room.id().clone()).await.unwrap();
        let typed: Location = fetched.decode().unwrap();
        assert_eq!(typed.id, room.id().to_string());
        assert_eq!(typed.name, "Rack room");
    }

    #[tokio::test]
    async fn test_missing_required_edge() {
        let t = setup().await;
        let err = t
            .client
            .create(&EQUIPMENT)
            .set("name", "Router")
            .save(&t.ctx)
            .await
            .unwrap_err();
        assert_matches!(
            err,
            Error::Validation(ValidationError::MissingEdge { entity: "equipment", edge: "type" })
        );
    }

    #[tokio::test]
    async fn test_unique_violation_is_constraint() {
        let t = setup().await;
        t.location_type("Building").await;
        let err = t
            .client
            .create(&LOCATION_TYPE)
            .set("name", "Building")
            .save(&t.ctx)
            .await
            .unwrap_err();
        assert!(err.is_constraint(), "got {err:?}");
        assert!(std::error::Error::source(&err).is_some());
    }

    #[tokio::test]
    async fn test_dangling_reference_is_constraint() {
        let t = setup().await;
        let err = t
            .client
            .create(&LOCATION)
            .set("name", "Orphan")
            .set_edge_id("type", Id::Int(404))
            .save(&t.ctx)
            .await
            .unwrap_err();
        assert!(err.is_constraint(), "got {err:?}");
    }

    #[tokio::test]
    async fn test_create_attaches_children() {
        let t = setup().await;
        let kind = t.location_type("Floor").await;
        let a = t.location("Room A", &kind).await;
        let b = t.location("Room B", &kind).await;

        let floor = t
            .client
            .create(&LOCATION)
            .set("name", "Floor 1")
            .set_edge_id("type", kind.id().clone())
            .add_edge_ids("children", [a.id().clone(), b.id().clone()])
            .save(&t.ctx)
            .await
            .unwrap();

        let children = t
            .client
            .query_edge(&floor, "children")
            .order(inventory_graph::orm::Order::asc("name"))
            .select(&["name"])
            .strings(&t.ctx)
            .await
            .unwrap();
        assert_eq!(children, vec!["Room A", "Room B"]);
    }

    #[tokio::test]
    async fn test_attaching_taken_child_is_constraint() {
        let t = setup().await;
        let kind = t.location_type("Floor").await;
        let room = t.location("Room", &kind).await;
        t.client
            .create(&LOCATION)
            .set("name", "First parent")
            .set_edge_id("type", kind.id().clone())
            .add_edge_ids("children", [room.id().clone()])
            .save(&t.ctx)
            .await
            .unwrap();

        let err = t
            .client
            .create(&LOCATION)
            .set("name", "Second parent")
            .set_edge_id("type", kind.id().clone())
            .add_edge_ids("children", [room.id().clone()])
            .save(&t.ctx)
            .await
            .unwrap_err();
        assert!(err.is_constraint());

        // The failed create left nothing behind
        let parents = t
            .client
            .query(&LOCATION)
            .filter(Predicate::eq("name", "Second parent"))
            .count(&t.ctx)
            .await
            .unwrap();
        assert_eq!(parents, 0);
    }
}

// ============================================================================
// Update
// ============================================================================

mod update {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_update_one_returns_stored_row() {
        let t = setup().await;
        let kind = t.location_type("Building").await;
        let before = kind.get::<chrono::DateTime<chrono::Utc>>("update_time").unwrap();

        let updated = t
            .client
            .update_one(&kind)
            .set("map_type", "satellite")
            .add("sort_index", 3)
            .save(&t.ctx)
            .await
            .unwrap();

        assert_eq!(updated.get::<Option<String>>("map_type").unwrap().as_deref(), Some("satellite"));
        assert_eq!(updated.get::<i64>("sort_index").unwrap(), 3);
        assert!(updated.get::<chrono::DateTime<chrono::Utc>>("update_time").unwrap() >= before);
        assert_eq!(updated.value("create_time"), kind.value("create_time"));
    }

    #[tokio::test]
    async fn test_overflowing_increment_is_rejected() {
        let t = setup().await;
        let kind = t.location_type("Building").await;
        let err = t
            .client
            .update_one(&kind)
            .add("sort_index", i64::MAX)
            .add("sort_index", 1)
            .save(&t.ctx)
            .await
            .unwrap_err();
        assert_matches!(err, Error::Validation(ValidationError::Overflow { .. }));

        let stored = t.client.get(&t.ctx, &LOCATION_TYPE, kind.id().clone()).await.unwrap();
        assert_eq!(stored.get::<i64>("sort_index").unwrap(), 0);
    }

    #[tokio::test]
    async fn test_update_one_unknown_id() {
        let t = setup().await;
        let err = t
            .client
            .update_one_id(&LOCATION_TYPE, 999_i64)
            .set("name", "Ghost")
            .exec(&t.ctx)
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_bulk_update_counts_matches() {
        let t = setup().await;
        for name in ["A", "B", "C"] {
            t.location_type(name).await;
        }

        let n = t
            .client
            .update(&LOCATION_TYPE)
            .filter(Predicate::is_in("name", ["A", "B"]))
            .set("site", true)
            .exec(&t.ctx)
            .await
            .unwrap();
        assert_eq!(n, 2);

        let none = t
            .client
            .update(&LOCATION_TYPE)
            .filter(Predicate::eq("name", "Z"))
            .set("site", true)
            .exec(&t.ctx)
            .await
            .unwrap();
        assert_eq!(none, 0);

        let sites = t
            .client
            .query(&LOCATION_TYPE)
            .filter(Predicate::eq("site", true))
            .count(&t.ctx)
            .await
            .unwrap();
        assert_eq!(sites, 2);
    }

    #[tokio::test]
    async fn test_clear_optional_field() {
        let t = setup().await;
        let kind = t.location_type("Building").await;
        let kind = t
            .client
            .update_one(&kind)
            .set("map_type", "roadmap")
            .save(&t.ctx)
            .await
            .unwrap();
        let kind = t
            .client
            .update_one(&kind)
            .clear("map_type")
            .save(&t.ctx)
            .await
            .unwrap();
        assert_eq!(kind.value("map_type"), Some(&Value::Null));
    }

    #[tokio::test]
    async fn test_reparent_location() {
        let t = setup().await;
        let kind = t.location_type("Site").await;
        let old = t.location("Old site", &kind).await;
        let new = t.location("New site", &kind).await;
        let room = t
            .client
            .create(&LOCATION)
            .set("name", "Room")
            .set_edge_id("type", kind.id().clone())
            .set_edge_id("parent", old.id().clone())
            .save(&t.ctx)
            .await
            .unwrap();

        t.client
            .update_one(&room)
            .set_edge_id("parent", new.id().clone())
            .exec(&t.ctx)
            .await
            .unwrap();

        let parent = t
            .client
            .query_edge(&room, "parent")
            .only(&t.ctx)
            .await
            .unwrap();
        assert_eq!(parent.id(), new.id());
        assert!(!t.client.query_edge(&old, "children").exist(&t.ctx).await.unwrap());
    }

    #[tokio::test]
    async fn test_add_edge_to_many_nodes_rejected() {
        let t = setup().await;
        let kind = t.location_type("Site").await;
        t.location("A", &kind).await;
        t.location("B", &kind).await;
        let child = t.location("Child", &kind).await;

        let err = t
            .client
            .update(&LOCATION)
            .filter(Predicate::is_in("name", ["A", "B"]))
            .add_edge_ids("children", [child.id().clone()])
            .exec(&t.ctx)
            .await
            .unwrap_err();
        assert_matches!(
            err,
            Error::Validation(ValidationError::EdgeOnManyNodes { edge: "children", nodes: 2, .. })
        );
    }

    #[tokio::test]
    async fn test_clearing_required_edge_rejected() {
        let t = setup().await;
        let kind = t.location_type("Site").await;
        let site = t.location("HQ", &kind).await;
        let err = t
            .client
            .update_one(&site)
            .clear_edge("type")
            .exec(&t.ctx)
            .await
            .unwrap_err();
        assert!(err.is_validation());
    }
}

// ============================================================================
// Delete
// ============================================================================

mod delete {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_bulk_delete_counts_matches() {
        let t = setup().await;
        let routers = t.client.create(&EQUIPMENT_TYPE).set("name", "Router").save(&t.ctx).await.unwrap();
        for i in 0..5 {
            t.client
                .create(&EQUIPMENT)
                .set("name", format!("eq-{i}"))
                .set_opt("device_id", (i % 2 == 0).then(|| format!("dev-{i}")))
                .set_edge_id("type", routers.id().clone())
                .save(&t.ctx)
                .await
                .unwrap();
        }

        let deleted = t
            .client
            .delete(&EQUIPMENT)
            .filter(Predicate::not_null("device_id"))
            .exec(&t.ctx)
            .await
            .unwrap();
        assert_eq!(deleted, 3);
        assert_eq!(t.client.query(&EQUIPMENT).count(&t.ctx).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_delete_one_unknown_id() {
        let t = setup().await;
        let err = t
            .client
            .delete_one_id(&EQUIPMENT, 12345_i64)
            .exec(&t.ctx)
            .await
            .unwrap_err();
        assert_matches!(err, Error::NotFound { entity: "equipment" });
    }

    #[tokio::test]
    async fn test_delete_one_then_lookup() {
        let t = setup().await;
        let kind = t.location_type("Building").await;
        t.client.delete_one(&kind).exec(&t.ctx).await.unwrap();
        let err = t.client.get(&t.ctx, &LOCATION_TYPE, kind.id().clone()).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_delete_referenced_type_detaches_locations() {
        let t = setup().await;
        let kind = t.location_type("Building").await;
        let hq = t.location("HQ", &kind).await;
        t.client.delete_one(&kind).exec(&t.ctx).await.unwrap();

        let hq = t.client.get(&t.ctx, &LOCATION, hq.id().clone()).await.unwrap();
        assert_eq!(hq.foreign_key("location_type"), None);
    }
}
