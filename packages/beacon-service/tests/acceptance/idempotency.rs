use std::sync::atomic::Ordering;

use beacon_domain::resource::ResourceType;
use beacon_service::{RegisterResourceRequest, VectorizeOutcome};
use beacon_storage::queries;
use serde_json::json;

fn orders_api() -> RegisterResourceRequest {
	RegisterResourceRequest {
		resource_id: Some("api:orders".to_string()),
		name: "Orders API".to_string(),
		resource_type: ResourceType::Api,
		description: "Query order data".to_string(),
		capabilities: vec!["list".to_string(), "get".to_string()],
		tags: vec!["commerce".to_string()],
		metadata: None,
	}
}

#[tokio::test]
#[ignore = "Requires external Postgres. Set BEACON_PG_DSN to run."]
async fn revectorizing_unchanged_content_keeps_one_row_per_vector_type() {
	let Some(test_db) = super::test_db().await else {
		eprintln!(
			"Skipping revectorizing_unchanged_content_keeps_one_row_per_vector_type; set BEACON_PG_DSN to run."
		);

		return;
	};
	let (providers, calls) = super::hash_providers();
	let service = super::build_service(super::test_config(test_db.dsn()), providers).await;
	let first = service.register_resource(orders_api()).await.expect("First registration failed.");

	assert!(first.created);
	assert_eq!(first.vectorization.outcome, VectorizeOutcome::Vectorized);
	assert_eq!(first.vectorization.vectors_written.len(), 4);

	let before = queries::list_vectors(&service.db.pool, "api:orders")
		.await
		.expect("Failed to list vectors.");
	let calls_after_first = calls.load(Ordering::SeqCst);
	let second =
		service.register_resource(orders_api()).await.expect("Second registration failed.");

	assert!(!second.created);
	assert_eq!(second.vectorization.outcome, VectorizeOutcome::Unchanged);

	let forced =
		service.vectorize_resource("api:orders").await.expect("Forced vectorization failed.");

	assert!(forced.success);
	assert!(forced.vectors_written.is_empty(), "Unchanged facets must reuse stored vectors.");
	assert_eq!(calls.load(Ordering::SeqCst), calls_after_first);

	let after = queries::list_vectors(&service.db.pool, "api:orders")
		.await
		.expect("Failed to list vectors.");

	assert_eq!(after.len(), 4);

	for (lhs, rhs) in before.iter().zip(after.iter()) {
		assert_eq!(lhs.vector_type, rhs.vector_type);
		assert_eq!(lhs.content_hash, rhs.content_hash);
	}

	drop(service);
	test_db.cleanup().await.expect("Failed to cleanup test database.");
}

#[tokio::test]
#[ignore = "Requires external Postgres. Set BEACON_PG_DSN to run."]
async fn repeated_source_records_are_vectorized_once() {
	let Some(test_db) = super::test_db().await else {
		eprintln!(
			"Skipping repeated_source_records_are_vectorized_once; set BEACON_PG_DSN to run."
		);

		return;
	};
	let (providers, calls) = super::hash_providers();
	let service = super::build_service(super::test_config(test_db.dsn()), providers).await;
	let record = json!({ "id": 9, "name": "Shipping labels", "description": "Carrier labels" });
	let record = record.as_object().expect("Record must be an object.");
	let first = service
		.vectorize_record("orders", "9", record, None)
		.await
		.expect("First vectorization failed.");

	assert_eq!(first.resource_id, "orders:9");
	assert_eq!(first.outcome, VectorizeOutcome::Vectorized);

	let calls_after_first = calls.load(Ordering::SeqCst);
	let second = service
		.vectorize_record("orders", "9", record, None)
		.await
		.expect("Second vectorization failed.");

	assert_eq!(second.outcome, VectorizeOutcome::Unchanged);
	assert_eq!(calls.load(Ordering::SeqCst), calls_after_first);
	assert_eq!(super::vector_count(&service.db.pool, "orders:9").await, 1);
	assert!(service.vectorize_record("invoices", "9", record, None).await.is_err());

	drop(service);
	test_db.cleanup().await.expect("Failed to cleanup test database.");
}
