//! Service behavior that is decided before any database round trip.

use std::sync::Arc;

use sqlx::postgres::PgPoolOptions;

use beacon_config::{Config, EmbeddingProviderConfig};
use beacon_domain::{resource::ResourceType, scoring};
use beacon_service::{
	BeaconService, BoxFuture, CancelFlag, ConfigHandle, EmbeddingProvider, Error, MatchRequest,
	Providers, SyncRequest,
};
use beacon_storage::db::Db;

const CONFIG: &str = r#"
[service]
log_level = "info"

[storage.postgres]
dsn = "postgres://127.0.0.1:1/beacon"
pool_max_conns = 1

[providers.embedding]
provider_id = "test"
api_base = "http://127.0.0.1:1"
api_key = "test-key"
path = "/"
model = "m"
dimensions = 4
timeout_ms = 1000

[vector]
timeout_seconds = 1

[matcher.history]
enabled = false

[matcher.resource_type_weights.api]
name = 0.7
composite = 0.3

[[resources]]
table = "orders"
fields = ["name"]
tool = "order_lookup"
"#;

fn config() -> Config {
	toml::from_str(CONFIG).expect("Config should parse.")
}

fn service(cfg: Config, embedding: Arc<dyn EmbeddingProvider>) -> BeaconService {
	let pool = PgPoolOptions::new()
		.max_connections(1)
		.connect_lazy(&cfg.storage.postgres.dsn)
		.expect("Lazy pool should build.");

	BeaconService::with_providers(ConfigHandle::new(cfg), Db { pool }, Providers::new(embedding))
}

struct FailingEmbedding;
impl EmbeddingProvider for FailingEmbedding {
	fn embed<'a>(
		&'a self,
		_cfg: &'a EmbeddingProviderConfig,
		_texts: &'a [String],
	) -> BoxFuture<'a, beacon_providers::Result<Vec<Vec<f32>>>> {
		Box::pin(async {
			Err(beacon_providers::Error::InvalidResponse { message: "upstream down".to_string() })
		})
	}
}

struct ShortEmbedding;
impl EmbeddingProvider for ShortEmbedding {
	fn embed<'a>(
		&'a self,
		_cfg: &'a EmbeddingProviderConfig,
		texts: &'a [String],
	) -> BoxFuture<'a, beacon_providers::Result<Vec<Vec<f32>>>> {
		let vectors = texts.iter().map(|_| vec![1.0, 0.0]).collect();

		Box::pin(async move { Ok(vectors) })
	}
}

struct SlowEmbedding;
impl EmbeddingProvider for SlowEmbedding {
	fn embed<'a>(
		&'a self,
		_cfg: &'a EmbeddingProviderConfig,
		_texts: &'a [String],
	) -> BoxFuture<'a, beacon_providers::Result<Vec<Vec<f32>>>> {
		Box::pin(async {
			tokio::time::sleep(std::time::Duration::from_secs(30)).await;

			Ok(Vec::new())
		})
	}
}

#[tokio::test]
async fn provider_failures_fall_back_to_zero_vectors() {
	let cfg = config();
	let texts = vec!["orders".to_string(), "invoices".to_string()];

	for embedding in [
		Arc::new(FailingEmbedding) as Arc<dyn EmbeddingProvider>,
		Arc::new(ShortEmbedding),
	] {
		let service = service(cfg.clone(), embedding);
		let embedded = service.embed_or_zero(&cfg, &texts).await;

		assert!(embedded.is_fallback());
		assert_eq!(embedded.vectors, vec![vec![0.0; 4]; 2]);
	}
}

#[tokio::test]
async fn slow_providers_time_out_into_zero_vectors() {
	let cfg = config();
	let service = service(cfg.clone(), Arc::new(SlowEmbedding));
	let embedded = service.embed_or_zero(&cfg, &["orders".to_string()]).await;

	assert!(embedded.fallback.is_some_and(|reason| reason.contains("timed out")));
	assert_eq!(embedded.vectors, vec![vec![0.0; 4]]);
}

#[tokio::test]
async fn blank_input_is_zero_filled_without_calling_the_provider() {
	let cfg = config();
	let service = service(cfg.clone(), Arc::new(SlowEmbedding));
	let embedded = service.embed_or_zero(&cfg, &["  ".to_string()]).await;

	assert!(embedded.is_fallback());
	assert_eq!(embedded.vectors, vec![vec![0.0; 4]]);
}

#[tokio::test]
async fn blank_queries_are_rejected() {
	let service = service(config(), Arc::new(FailingEmbedding));
	let result = service
		.match_resources(MatchRequest {
			query: "   ".to_string(),
			top_k: None,
			min_confidence: 0.0,
			resource_types: None,
			context: None,
		})
		.await;

	assert!(matches!(result, Err(Error::InvalidRequest { .. })));
}

#[tokio::test]
async fn failed_query_embedding_returns_no_matches() {
	let service = service(config(), Arc::new(FailingEmbedding));
	let response = service
		.match_resources(MatchRequest {
			query: "orders".to_string(),
			top_k: Some(3),
			min_confidence: 0.0,
			resource_types: None,
			context: None,
		})
		.await
		.expect("Fallback should not be an error.");

	assert!(response.embedding_fallback);
	assert!(response.matches.is_empty());
}

#[tokio::test]
async fn sync_refuses_invalid_configuration() {
	let mut cfg = config();

	cfg.vector.similarity_threshold = 1.5;

	let service = service(cfg, Arc::new(FailingEmbedding));
	let result = service.sync(SyncRequest::default(), &CancelFlag::new()).await;

	match result {
		Err(Error::InvalidConfig { errors }) => {
			assert!(errors.iter().any(|error| error.contains("similarity_threshold")));
		},
		other => panic!("Expected InvalidConfig, got {other:?}."),
	}
}

#[test]
fn type_specific_weights_override_only_their_type() {
	let cfg = config();
	let api = scoring::resolve_vector_weights(&cfg.matcher, ResourceType::Api);
	let tool = scoring::resolve_vector_weights(&cfg.matcher, ResourceType::Tool);

	assert!((api.name - 0.7).abs() < f32::EPSILON);
	assert_eq!(api.description, 0.0);
	assert!((tool.name - cfg.matcher.vector_type_weights.name).abs() < f32::EPSILON);
	assert!((tool.description - cfg.matcher.vector_type_weights.description).abs() < f32::EPSILON);
}
