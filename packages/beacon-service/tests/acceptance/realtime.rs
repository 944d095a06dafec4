use std::{sync::Arc, time::Duration};

use sqlx::postgres::PgListener;

use beacon_domain::change_event::{ChangeEvent, ChangeOperation};
use beacon_service::{CancelFlag, IncrementalUpdater, PublishChangeRequest, TriggerState};

#[tokio::test]
#[ignore = "Requires external Postgres. Set BEACON_PG_DSN to run."]
async fn installed_triggers_feed_the_incremental_updater() {
	let Some(test_db) = super::test_db().await else {
		eprintln!("Skipping installed_triggers_feed_the_incremental_updater; BEACON_PG_DSN unset.");

		return;
	};
	let (providers, _calls) = super::hash_providers();
	let cfg = super::test_config(test_db.dsn());
	let service = Arc::new(super::build_service(cfg, providers).await);

	super::create_orders_table(&service.db.pool).await;

	let setup = service.setup_triggers().await.expect("Trigger setup failed.");

	assert_eq!((setup.succeeded, setup.failed), (1, 0));

	let status = service.trigger_status().await.expect("Trigger status failed.");

	assert!(status.in_sync);
	assert_eq!(status.tables[0].state, TriggerState::Installed);

	let shutdown = CancelFlag::new();
	let updater = IncrementalUpdater::new(service.clone());
	let handle = {
		let shutdown = shutdown.clone();

		tokio::spawn(async move { updater.run(shutdown).await })
	};

	// LISTEN is issued asynchronously; give it a moment before writing.
	tokio::time::sleep(Duration::from_millis(500)).await;
	super::insert_order(&service.db.pool, 3, "Gift cards", "Stored value balances").await;

	let mut registered = None;

	for _ in 0..50 {
		if let Ok(resource) = service.get_resource("orders:3").await
			&& resource.vectorization_status == "completed"
		{
			registered = Some(resource);

			break;
		}

		tokio::time::sleep(Duration::from_millis(100)).await;
	}

	let registered = registered.expect("Insert should be applied by the updater.");

	assert_eq!(registered.name, "Gift cards");

	shutdown.cancel();
	tokio::time::timeout(Duration::from_secs(5), handle)
		.await
		.expect("Updater should stop.")
		.expect("Updater task should not panic.")
		.expect("Updater should exit cleanly.");

	let removed = service.remove_triggers().await.expect("Trigger removal failed.");

	assert_eq!(removed.succeeded, 1);
	let status = service.trigger_status().await.expect("Trigger status failed.");

	assert_eq!(status.missing, vec!["orders"]);

	drop(service);
	test_db.cleanup().await.expect("Failed to cleanup test database.");
}

#[tokio::test]
#[ignore = "Requires external Postgres. Set BEACON_PG_DSN to run."]
async fn published_changes_use_the_trigger_channel_and_payload_guard() {
	let Some(test_db) = super::test_db().await else {
		eprintln!(
			"Skipping published_changes_use_the_trigger_channel_and_payload_guard; BEACON_PG_DSN unset."
		);

		return;
	};
	let (providers, _calls) = super::hash_providers();
	let service = super::build_service(super::test_config(test_db.dsn()), providers).await;

	super::create_orders_table(&service.db.pool).await;
	super::insert_order(&service.db.pool, 5, "Loyalty points", &"x".repeat(20_000)).await;

	let mut listener =
		PgListener::connect_with(&service.db.pool).await.expect("Failed to connect listener.");

	listener.listen("beacon_changes_orders").await.expect("Failed to listen.");

	let published = service
		.publish_change(PublishChangeRequest {
			table: "orders".to_string(),
			operation: ChangeOperation::Update,
			record_id: "5".to_string(),
		})
		.await
		.expect("Publish failed.");

	assert_eq!(published.channel, "beacon_changes_orders");
	assert!(!published.event.truncated, "Large text fields are clipped, not dropped.");
	assert_eq!(published.event.fields["description"].as_str().map(str::len), Some(100));

	let notification = tokio::time::timeout(Duration::from_secs(5), listener.recv())
		.await
		.expect("Notification should arrive.")
		.expect("Listener should receive.");
	let event = ChangeEvent::parse(notification.payload(), 7_000).expect("Payload should parse.");

	assert_eq!(event.resource_id(), "orders:5");
	assert_eq!(event.operation, ChangeOperation::Update);

	let missing = service
		.publish_change(PublishChangeRequest {
			table: "orders".to_string(),
			operation: ChangeOperation::Insert,
			record_id: "404".to_string(),
		})
		.await;

	assert!(matches!(missing, Err(beacon_service::Error::NotFound { .. })));

	drop(service);
	test_db.cleanup().await.expect("Failed to cleanup test database.");
}
