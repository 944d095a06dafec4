use beacon_service::{CancelFlag, SyncRequest};
use beacon_storage::queries;

#[tokio::test]
#[ignore = "Requires external Postgres. Set BEACON_PG_DSN to run."]
async fn edited_rows_are_modified_once_then_unchanged() {
	let Some(test_db) = super::test_db().await else {
		eprintln!(
			"Skipping edited_rows_are_modified_once_then_unchanged; set BEACON_PG_DSN to run."
		);

		return;
	};
	let (providers, _calls) = super::hash_providers();
	let service = super::build_service(super::test_config(test_db.dsn()), providers).await;
	let cancel = CancelFlag::new();

	super::create_orders_table(&service.db.pool).await;
	super::insert_order(&service.db.pool, 1, "Monthly invoices", "A").await;

	let first = service.sync(SyncRequest::default(), &cancel).await.expect("First sync failed.");

	assert_eq!((first.added, first.modified, first.failed), (1, 0, 0));

	let before = service.get_resource("orders:1").await.expect("Resource should exist.");

	assert_eq!(before.vectorization_status, "completed");
	assert_eq!(super::vector_count(&service.db.pool, "orders:1").await, 1);

	sqlx::query("UPDATE orders SET description = 'B' WHERE id = 1")
		.execute(&service.db.pool)
		.await
		.expect("Failed to update order.");

	let second = service.sync(SyncRequest::default(), &cancel).await.expect("Second sync failed.");

	assert_eq!((second.added, second.modified, second.unchanged), (0, 1, 0));

	let after = service.get_resource("orders:1").await.expect("Resource should exist.");

	assert_eq!(after.description, "B");
	assert!(after.vector_updated_at > before.vector_updated_at);

	let third = service.sync(SyncRequest::default(), &cancel).await.expect("Third sync failed.");

	assert_eq!((third.added, third.modified, third.deleted, third.unchanged), (0, 0, 0, 1));

	let operation =
		service.get_operation(third.operation_id).await.expect("Operation should be recorded.");

	assert_eq!(operation.operation_type, "sync");
	assert_eq!(operation.status, "completed");

	drop(service);
	test_db.cleanup().await.expect("Failed to cleanup test database.");
}

#[tokio::test]
#[ignore = "Requires external Postgres. Set BEACON_PG_DSN to run."]
async fn concurrent_sync_is_rejected_and_cancelled_sync_stops() {
	let Some(test_db) = super::test_db().await else {
		eprintln!(
			"Skipping concurrent_sync_is_rejected_and_cancelled_sync_stops; set BEACON_PG_DSN to run."
		);

		return;
	};
	let (providers, _calls) = super::hash_providers();
	let service = super::build_service(super::test_config(test_db.dsn()), providers).await;

	super::create_orders_table(&service.db.pool).await;
	super::insert_order(&service.db.pool, 1, "Monthly invoices", "A").await;

	let held = service
		.db
		.try_session_lock(beacon_storage::db::SYNC_LOCK_ID)
		.await
		.expect("Failed to take lock.")
		.expect("Lock should be free.");
	let rejected = service.sync(SyncRequest::default(), &CancelFlag::new()).await;

	assert!(matches!(rejected, Err(beacon_service::Error::Conflict { .. })));

	held.release().await.expect("Failed to release lock.");

	let cancel = CancelFlag::new();

	cancel.cancel();

	let report =
		service.sync(SyncRequest::default(), &cancel).await.expect("Cancelled sync should report.");

	assert!(report.cancelled);
	assert_eq!(report.added, 0);

	let operation =
		service.get_operation(report.operation_id).await.expect("Operation should be recorded.");

	assert_eq!(operation.status, "cancelled");

	drop(service);
	test_db.cleanup().await.expect("Failed to cleanup test database.");
}

#[tokio::test]
#[ignore = "Requires external Postgres. Set BEACON_PG_DSN to run."]
async fn table_description_edits_reach_the_composite_vector() {
	let Some(test_db) = super::test_db().await else {
		eprintln!(
			"Skipping table_description_edits_reach_the_composite_vector; set BEACON_PG_DSN to run."
		);

		return;
	};
	let (providers, _calls) = super::hash_providers();
	let mut cfg = super::test_config(test_db.dsn());
	let service = super::build_service(cfg.clone(), providers).await;
	let cancel = CancelFlag::new();

	super::create_orders_table(&service.db.pool).await;
	super::insert_order(&service.db.pool, 1, "Monthly invoices", "Billing export").await;

	let first = service.sync(SyncRequest::default(), &cancel).await.expect("First sync failed.");

	assert_eq!(first.added, 1);

	cfg.resources[0].description = Some("Archived orders".to_string());
	service.config.replace(cfg).expect("Config replacement failed.");

	let second = service.sync(SyncRequest::default(), &cancel).await.expect("Second sync failed.");

	assert_eq!((second.modified, second.unchanged), (1, 0));

	let vectors =
		queries::list_vectors(&service.db.pool, "orders:1").await.expect("Failed to list vectors.");

	assert_eq!(vectors.len(), 1);
	assert!(vectors[0].content.contains("Archived orders"));

	drop(service);
	test_db.cleanup().await.expect("Failed to cleanup test database.");
}
