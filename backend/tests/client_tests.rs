//! Integration tests for transactions, hooks, cancellation and validation
//! ordering

mod common;

use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use async_trait::async_trait;

use inventory_graph::inventory::{LOCATION, LOCATION_TYPE};
use inventory_graph::orm::{
    Client, Context, Error, Hook, Id, Mutation, On, Op, Predicate, ValidationError, Value,
};

use common::{RecordingDriver, setup};

// ============================================================================
// Transactions
// ============================================================================

mod transactions {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_commit_persists() {
        let t = setup().await;
        let tx = t.client.tx(&t.ctx).await.unwrap();
        tx.client()
            .create(&LOCATION_TYPE)
            .set("name", "Building")
            .save(&t.ctx)
            .await
            .unwrap();
        tx.commit().await.unwrap();

        assert_eq!(t.client.query(&LOCATION_TYPE).count(&t.ctx).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_rollback_discards() {
        let t = setup().await;
        let tx = t.client.tx(&t.ctx).await.unwrap();
        let kind = tx
            .client()
            .create(&LOCATION_TYPE)
            .set("name", "Building")
            .save(&t.ctx)
            .await
            .unwrap();

        // Visible inside the transaction only
        assert!(tx.client().get(&t.ctx, &LOCATION_TYPE, kind.id().clone()).await.is_ok());
        tx.rollback().await.unwrap();

        assert_eq!(t.client.query(&LOCATION_TYPE).count(&t.ctx).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_client_after_commit_is_closed() {
        let t = setup().await;
        let tx = t.client.tx(&t.ctx).await.unwrap();
        let client = tx.client();
        tx.commit().await.unwrap();

        let err = client.query(&LOCATION_TYPE).all(&t.ctx).await.unwrap_err();
        assert_matches!(err, Error::TxClosed);
        let err = client
            .create(&LOCATION_TYPE)
            .set("name", "Late")
            .save(&t.ctx)
            .await
            .unwrap_err();
        assert_matches!(err, Error::TxClosed);
    }

    #[tokio::test]
    async fn test_dropped_tx_rolls_back_and_closes() {
        let t = setup().await;
        let tx = t.client.tx(&t.ctx).await.unwrap();
        let client = tx.client();
        client
            .create(&LOCATION_TYPE)
            .set("name", "Building")
            .save(&t.ctx)
            .await
            .unwrap();
        drop(tx);

        let err = client
            .create(&LOCATION_TYPE)
            .set("name", "Shed")
            .save(&t.ctx)
            .await
            .unwrap_err();
        assert_matches!(err, Error::TxClosed);
        let err = client.query(&LOCATION_TYPE).count(&t.ctx).await.unwrap_err();
        assert_matches!(err, Error::TxClosed);
        drop(client);

        assert_eq!(t.client.query(&LOCATION_TYPE).count(&t.ctx).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_unwrap_reads_outside_transaction() {
        let t = setup().await;
        let tx = t.client.tx(&t.ctx).await.unwrap();
        tx.client()
            .create(&LOCATION_TYPE)
            .set("name", "Pending")
            .save(&t.ctx)
            .await
            .unwrap();

        let outside = tx.client().unwrap();
        assert_eq!(outside.query(&LOCATION_TYPE).count(&t.ctx).await.unwrap(), 0);
        tx.commit().await.unwrap();
        assert_eq!(outside.query(&LOCATION_TYPE).count(&t.ctx).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_nested_transaction_unsupported() {
        let t = setup().await;
        let tx = t.client.tx(&t.ctx).await.unwrap();
        let err = tx.client().tx(&t.ctx).await.unwrap_err();
        assert_matches!(err, Error::Unsupported(_));
        tx.rollback().await.unwrap();
    }

    #[tokio::test]
    async fn test_failed_statement_keeps_transaction_usable() {
        let t = setup().await;
        let tx = t.client.tx(&t.ctx).await.unwrap();
        let client = tx.client();
        client.create(&LOCATION_TYPE).set("name", "Building").save(&t.ctx).await.unwrap();

        let err = client
            .create(&LOCATION_TYPE)
            .set("name", "Building")
            .save(&t.ctx)
            .await
            .unwrap_err();
        assert!(err.is_constraint());

        client.create(&LOCATION_TYPE).set("name", "Room").save(&t.ctx).await.unwrap();
        tx.commit().await.unwrap();
        assert_eq!(t.client.query(&LOCATION_TYPE).count(&t.ctx).await.unwrap(), 2);
    }
}

// ============================================================================
// Hooks
// ============================================================================

mod hooks {
    use super::*;
    use pretty_assertions::assert_eq;

    struct DefaultMapType;

    #[async_trait]
    impl Hook for DefaultMapType {
        async fn on_mutation(&self, _ctx: &Context, m: &mut Mutation) -> Result<(), Error> {
            if m.field("map_type").is_none() {
                m.set_field("map_type", "roadmap".into());
            }
            Ok(())
        }
    }

    struct ReadOnly;

    #[async_trait]
    impl Hook for ReadOnly {
        async fn on_mutation(&self, _ctx: &Context, m: &mut Mutation) -> Result<(), Error> {
            Err(Error::Invariant(format!("{} is read-only", m.entity().label)))
        }
    }

    #[tokio::test]
    async fn test_hook_adjusts_mutation() {
        let t = setup().await;
        t.client.use_hook(On::new("location_type", &[Op::Create], DefaultMapType));

        let kind = t.location_type("Building").await;
        assert_eq!(kind.value("map_type"), Some(&Value::from("roadmap")));

        let stored = t.client.get(&t.ctx, &LOCATION_TYPE, kind.id().clone()).await.unwrap();
        assert_eq!(stored.get::<String>("map_type").unwrap(), "roadmap");
    }

    #[tokio::test]
    async fn test_hook_applies_inside_transaction() {
        let t = setup().await;
        t.client.use_hook(On::new("location_type", &[Op::Create], DefaultMapType));

        let tx = t.client.tx(&t.ctx).await.unwrap();
        let kind = tx
            .client()
            .create(&LOCATION_TYPE)
            .set("name", "Building")
            .save(&t.ctx)
            .await
            .unwrap();
        tx.commit().await.unwrap();
        assert_eq!(kind.get::<String>("map_type").unwrap(), "roadmap");
    }

    #[tokio::test]
    async fn test_rejecting_hook_prevents_writes() {
        let recorder = RecordingDriver::new();
        let client = Client::new(recorder.clone());
        client.use_hook(On::new("location_type", &[Op::Delete, Op::DeleteOne], ReadOnly));

        let err = client
            .delete(&LOCATION_TYPE)
            .filter(Predicate::eq("name", "Building"))
            .exec(&Context::background())
            .await
            .unwrap_err();
        assert_matches!(err, Error::Invariant(_));
        assert_eq!(recorder.calls(), 0);

        // Other operations are untouched
        client
            .create(&LOCATION_TYPE)
            .set("name", "Building")
            .save(&Context::background())
            .await
            .unwrap();
        assert_eq!(recorder.calls(), 1);
    }
}

// ============================================================================
// Cancellation and deadlines
// ============================================================================

mod cancellation {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_cancelled_context_skips_driver() {
        let recorder = RecordingDriver::new();
        let client = Client::new(recorder.clone());
        let ctx = Context::background();
        ctx.cancel();

        let err = client.query(&LOCATION).all(&ctx).await.unwrap_err();
        assert_matches!(err, Error::Cancelled);
        let err = client
            .create(&LOCATION_TYPE)
            .set("name", "Building")
            .save(&ctx)
            .await
            .unwrap_err();
        assert_matches!(err, Error::Cancelled);
        assert_eq!(recorder.calls(), 0);
    }

    #[tokio::test]
    async fn test_expired_deadline() {
        let t = setup().await;
        let ctx = t.ctx.with_timeout(Duration::ZERO);
        let err = t.client.query(&LOCATION).count(&ctx).await.unwrap_err();
        assert_matches!(err, Error::DeadlineExceeded);
    }

    #[tokio::test]
    async fn test_child_cancelled_with_parent() {
        let parent = Context::background();
        let child = parent.with_timeout(Duration::from_secs(60));
        parent.cancel();
        assert_matches!(child.check(), Err(Error::Cancelled));
    }
}

// ============================================================================
// Validation happens before any driver call
// ============================================================================

mod validation {
    use super::*;
    use pretty_assertions::assert_eq;

    fn spy() -> (Arc<RecordingDriver>, Client) {
        let recorder = RecordingDriver::new();
        let client = Client::new(recorder.clone());
        (recorder, client)
    }

    #[tokio::test]
    async fn test_missing_required_field() {
        let (recorder, client) = spy();
        let err = client
            .create(&LOCATION)
            .set_edge_id("type", Id::Int(1))
            .save(&Context::background())
            .await
            .unwrap_err();
        assert_matches!(
            err,
            Error::Validation(ValidationError::MissingField { entity: "location", field: "name" })
        );
        assert_eq!(recorder.calls(), 0);
    }

    #[tokio::test]
    async fn test_two_targets_on_unique_edge() {
        let (recorder, client) = spy();
        let err = client
            .create(&LOCATION)
            .set("name", "HQ")
            .add_edge_ids("type", [Id::Int(1), Id::Int(2)])
            .save(&Context::background())
            .await
            .unwrap_err();
        assert_matches!(
            err,
            Error::Validation(ValidationError::UniqueEdge { entity: "location", edge: "type" })
        );
        assert_eq!(recorder.calls(), 0);
    }

    #[tokio::test]
    async fn test_validator_failure() {
        let (recorder, client) = spy();
        let err = client
            .create(&LOCATION)
            .set("name", "Pole")
            .set("latitude", 95.0)
            .set_edge_id("type", Id::Int(1))
            .save(&Context::background())
            .await
            .unwrap_err();
        assert_matches!(
            err,
            Error::Validation(ValidationError::InvalidField { field: "latitude", .. })
        );
        assert_eq!(recorder.calls(), 0);
    }

    #[tokio::test]
    async fn test_create_spec_reaches_driver() {
        let (recorder, client) = spy();
        let node = client
            .create(&LOCATION)
            .set("name", "HQ")
            .set_edge_id("type", Id::Int(1))
            .save(&Context::background())
            .await
            .unwrap();
        assert_eq!(node.id(), &Id::Str("1".into()));
        assert_eq!(recorder.execs.lock().len(), 1);
    }
}
