use beacon_domain::resource::ResourceType;
use beacon_service::{MatchRequest, RegisterResourceRequest};

fn request(
	id: &str,
	name: &str,
	resource_type: ResourceType,
	description: &str,
	capabilities: &[&str],
) -> RegisterResourceRequest {
	RegisterResourceRequest {
		resource_id: Some(id.to_string()),
		name: name.to_string(),
		resource_type,
		description: description.to_string(),
		capabilities: capabilities.iter().map(|capability| capability.to_string()).collect(),
		tags: Vec::new(),
		metadata: None,
	}
}

fn match_request(query: &str) -> MatchRequest {
	MatchRequest {
		query: query.to_string(),
		top_k: Some(5),
		min_confidence: 0.0,
		resource_types: None,
		context: None,
	}
}

#[tokio::test]
#[ignore = "Requires external Postgres. Set BEACON_PG_DSN to run."]
async fn exact_name_query_returns_the_resource_first() {
	let Some(test_db) = super::test_db().await else {
		eprintln!("Skipping exact_name_query_returns_the_resource_first; BEACON_PG_DSN unset.");

		return;
	};
	let (providers, _calls) = super::hash_providers();
	let cfg = super::test_config(test_db.dsn());
	let threshold = cfg.vector.similarity_threshold;
	let service = super::build_service(cfg, providers).await;

	service
		.register_resource(request(
			"api:orders",
			"Orders API",
			ResourceType::Api,
			"Query order data",
			&["list", "get"],
		))
		.await
		.expect("Failed to register orders.");
	service
		.register_resource(request(
			"tool:weather",
			"Weather Forecast",
			ResourceType::Tool,
			"Daily temperature and rain outlook",
			&["forecast"],
		))
		.await
		.expect("Failed to register weather.");

	let response =
		service.match_resources(match_request("Orders API")).await.expect("Match failed.");

	assert!(!response.embedding_fallback);

	let top = response.matches.first().expect("Expected at least one match.");

	assert_eq!(top.resource.resource_id, "api:orders");
	assert!(
		top.similarity_score > threshold,
		"similarity {} should exceed {threshold}",
		top.similarity_score
	);
	assert!(top.reasoning.contains("name 1.00"));

	let again = service.match_resources(match_request("Orders API")).await.expect("Match failed.");
	let first_ids: Vec<&str> =
		response.matches.iter().map(|item| item.resource.resource_id.as_str()).collect();
	let second_ids: Vec<&str> =
		again.matches.iter().map(|item| item.resource.resource_id.as_str()).collect();

	assert_eq!(first_ids, second_ids);

	let filtered = service
		.match_resources(MatchRequest {
			resource_types: Some(vec![ResourceType::Tool]),
			..match_request("Orders API")
		})
		.await
		.expect("Filtered match failed.");

	assert!(filtered.matches.iter().all(|item| item.resource.resource_type == "tool"));

	drop(service);
	test_db.cleanup().await.expect("Failed to cleanup test database.");
}
