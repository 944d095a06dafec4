use beacon_domain::{
	change_event::{ChangeEvent, ChangeOperation},
	identifier::AllowList,
};
use beacon_service::{
	BeaconService, CancelFlag, ChangeOutcome, Error, MatchRequest, SyncRequest, VectorizeOutcome,
};
use beacon_storage::sources::{self, SourceRow};
use serde_json::Map;

fn event(operation: ChangeOperation, record_id: &str, timestamp: f64) -> ChangeEvent {
	ChangeEvent {
		table_name: "orders".to_string(),
		operation,
		record_id: record_id.to_string(),
		timestamp,
		fields: Map::new(),
		truncated: false,
	}
}

/// Database clock in epoch seconds, the same clock triggers stamp events with.
async fn db_epoch(pool: &sqlx::PgPool) -> f64 {
	sqlx::query_scalar("SELECT extract(epoch FROM clock_timestamp())::float8")
		.fetch_one(pool)
		.await
		.expect("Failed to read database clock.")
}

async fn read_order_page(service: &BeaconService) -> Vec<SourceRow> {
	let allow_list = AllowList::from_config(&service.cfg());

	sources::fetch_page(&service.db.pool, &allow_list, "orders", None, 10)
		.await
		.expect("Failed to read orders page.")
}

#[tokio::test]
#[ignore = "Requires external Postgres. Set BEACON_PG_DSN to run."]
async fn deleted_rows_leave_registry_vectors_and_matches() {
	let Some(test_db) = super::test_db().await else {
		eprintln!(
			"Skipping deleted_rows_leave_registry_vectors_and_matches; set BEACON_PG_DSN to run."
		);

		return;
	};
	let (providers, _calls) = super::hash_providers();
	let service = super::build_service(super::test_config(test_db.dsn()), providers).await;
	let cancel = CancelFlag::new();

	super::create_orders_table(&service.db.pool).await;
	super::insert_order(&service.db.pool, 1, "Monthly invoices", "Billing export").await;
	super::insert_order(&service.db.pool, 2, "Shipping labels", "Carrier labels").await;

	let first = service.sync(SyncRequest::default(), &cancel).await.expect("First sync failed.");

	assert_eq!(first.added, 2);

	sqlx::query("DELETE FROM orders WHERE id = 2")
		.execute(&service.db.pool)
		.await
		.expect("Failed to delete order.");

	let second = service.sync(SyncRequest::default(), &cancel).await.expect("Second sync failed.");

	assert_eq!((second.deleted, second.unchanged), (1, 1));
	assert!(matches!(service.get_resource("orders:2").await, Err(Error::NotFound { .. })));
	assert_eq!(super::vector_count(&service.db.pool, "orders:2").await, 0);

	let response = service
		.match_resources(MatchRequest {
			query: "Shipping labels".to_string(),
			top_k: None,
			min_confidence: 0.0,
			resource_types: None,
			context: None,
		})
		.await
		.expect("Match failed.");

	assert!(response.matches.iter().all(|item| item.resource.resource_id != "orders:2"));

	drop(service);
	test_db.cleanup().await.expect("Failed to cleanup test database.");
}

#[tokio::test]
#[ignore = "Requires external Postgres. Set BEACON_PG_DSN to run."]
async fn late_insert_events_do_not_resurrect_deleted_rows() {
	let Some(test_db) = super::test_db().await else {
		eprintln!(
			"Skipping late_insert_events_do_not_resurrect_deleted_rows; set BEACON_PG_DSN to run."
		);

		return;
	};
	let (providers, _calls) = super::hash_providers();
	let service = super::build_service(super::test_config(test_db.dsn()), providers).await;

	super::create_orders_table(&service.db.pool).await;
	super::insert_order(&service.db.pool, 7, "Refund queue", "Pending refunds").await;

	let inserted = service
		.apply_change(&event(ChangeOperation::Insert, "7", 1_700_000_010.0))
		.await
		.expect("Insert event failed.");

	assert_eq!(inserted, ChangeOutcome::Vectorized);

	let deleted = service
		.apply_change(&event(ChangeOperation::Delete, "7", 1_700_000_020.0))
		.await
		.expect("Delete event failed.");

	assert_eq!(deleted, ChangeOutcome::Deleted);
	assert_eq!(super::vector_count(&service.db.pool, "orders:7").await, 0);

	// The source row still exists, so only the tombstone stands in the way.
	let late = service
		.apply_change(&event(ChangeOperation::Update, "7", 1_700_000_015.0))
		.await
		.expect("Late event failed.");

	assert_eq!(late, ChangeOutcome::Stale);
	assert!(matches!(service.get_resource("orders:7").await, Err(Error::NotFound { .. })));

	let unknown = ChangeEvent {
		table_name: "unknown".to_string(),
		..event(ChangeOperation::Insert, "1", 1.0)
	};
	let ignored = service.apply_change(&unknown).await.expect("Unknown table should be ignored.");

	assert_eq!(ignored, ChangeOutcome::Ignored);

	drop(service);
	test_db.cleanup().await.expect("Failed to cleanup test database.");
}

#[tokio::test]
#[ignore = "Requires external Postgres. Set BEACON_PG_DSN to run."]
async fn rows_read_before_a_delete_event_stay_deleted() {
	let Some(test_db) = super::test_db().await else {
		eprintln!(
			"Skipping rows_read_before_a_delete_event_stay_deleted; set BEACON_PG_DSN to run."
		);

		return;
	};
	let (providers, _calls) = super::hash_providers();
	let service = super::build_service(super::test_config(test_db.dsn()), providers).await;

	super::create_orders_table(&service.db.pool).await;
	super::insert_order(&service.db.pool, 11, "Returned parcels", "Carrier returns").await;

	let page = read_order_page(&service).await;

	assert_eq!(page.len(), 1);

	sqlx::query("DELETE FROM orders WHERE id = 11")
		.execute(&service.db.pool)
		.await
		.expect("Failed to delete order.");

	let deleted_at = db_epoch(&service.db.pool).await;
	let deleted = service
		.apply_change(&event(ChangeOperation::Delete, "11", deleted_at))
		.await
		.expect("Delete event failed.");

	assert_eq!(deleted, ChangeOutcome::Deleted);

	// The same write a sync pass makes for a row from its page.
	let row = &page[0];
	let late = service
		.vectorize_record("orders", &row.source_id, &row.record, Some(row.read_at))
		.await
		.expect("Late page write failed.");

	assert_eq!(late.outcome, VectorizeOutcome::Stale);
	assert!(matches!(service.get_resource("orders:11").await, Err(Error::NotFound { .. })));
	assert_eq!(super::vector_count(&service.db.pool, "orders:11").await, 0);

	drop(service);
	test_db.cleanup().await.expect("Failed to cleanup test database.");
}

#[tokio::test]
#[ignore = "Requires external Postgres. Set BEACON_PG_DSN to run."]
async fn rows_read_before_an_update_event_do_not_overwrite_it() {
	let Some(test_db) = super::test_db().await else {
		eprintln!(
			"Skipping rows_read_before_an_update_event_do_not_overwrite_it; set BEACON_PG_DSN to run."
		);

		return;
	};
	let (providers, _calls) = super::hash_providers();
	let service = super::build_service(super::test_config(test_db.dsn()), providers).await;

	super::create_orders_table(&service.db.pool).await;
	super::insert_order(&service.db.pool, 12, "Draft invoice", "Unsent").await;

	let page = read_order_page(&service).await;

	sqlx::query("UPDATE orders SET name = 'Final invoice', description = 'Sent' WHERE id = 12")
		.execute(&service.db.pool)
		.await
		.expect("Failed to update order.");

	let updated_at = db_epoch(&service.db.pool).await;
	let updated = service
		.apply_change(&event(ChangeOperation::Update, "12", updated_at))
		.await
		.expect("Update event failed.");

	assert_eq!(updated, ChangeOutcome::Vectorized);

	let row = &page[0];
	let late = service
		.vectorize_record("orders", &row.source_id, &row.record, Some(row.read_at))
		.await
		.expect("Late page write failed.");

	assert_eq!(late.outcome, VectorizeOutcome::Stale);

	let current = service.get_resource("orders:12").await.expect("Resource should exist.");

	assert_eq!(current.name, "Final invoice");
	assert_eq!(current.description, "Sent");

	// A sync started after the update reads the new row and leaves it as is.
	let report =
		service.sync(SyncRequest::default(), &CancelFlag::new()).await.expect("Sync failed.");

	assert_eq!((report.added, report.unchanged), (0, 1));

	drop(service);
	test_db.cleanup().await.expect("Failed to cleanup test database.");
}
