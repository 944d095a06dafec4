use serde_json::Value;
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Clone, Debug, sqlx::FromRow)]
pub struct RegistryEntry {
	pub resource_id: String,
	pub name: String,
	pub resource_type: String,
	pub description: String,
	pub capabilities: Vec<String>,
	pub tags: Vec<String>,
	pub metadata: Value,
	pub is_active: bool,
	pub status: String,
	pub source_table: Option<String>,
	pub source_id: Option<String>,
	pub content_hash: String,
	pub source_version_at: Option<OffsetDateTime>,
	pub vectorization_status: String,
	pub vectorization_error: Option<String>,
	pub usage_count: i64,
	pub success_rate: f32,
	pub avg_response_time_ms: Option<f32>,
	pub vector_updated_at: Option<OffsetDateTime>,
	pub created_at: OffsetDateTime,
	pub updated_at: OffsetDateTime,
}

/// The columns incremental sync needs to classify a row.
#[derive(Clone, Debug, sqlx::FromRow)]
pub struct RegistrySnapshot {
	pub resource_id: String,
	pub source_table: Option<String>,
	pub content_hash: String,
	pub is_active: bool,
	pub vectorization_status: String,
}

#[derive(Clone, Debug, sqlx::FromRow)]
pub struct VectorRecord {
	pub resource_id: String,
	pub vector_type: String,
	pub content: String,
	pub content_hash: String,
	pub dimension: i32,
	pub model_name: String,
	pub updated_at: OffsetDateTime,
}

/// One stored vector joined with the registry signals the matcher scores on.
#[derive(Clone, Debug, sqlx::FromRow)]
pub struct CandidateRow {
	pub resource_id: String,
	pub vector_type: String,
	pub embedding: Vec<f32>,
	pub resource_type: String,
	pub tags: Vec<String>,
	pub capabilities: Vec<String>,
	pub usage_count: i64,
	pub success_rate: f32,
	pub avg_response_time_ms: Option<f32>,
}

#[derive(Clone, Debug, sqlx::FromRow)]
pub struct OperationRecord {
	pub operation_id: Uuid,
	pub operation_type: String,
	pub status: String,
	pub total_items: i32,
	pub successful_items: i32,
	pub failed_items: i32,
	pub error_message: Option<String>,
	pub result_data: Value,
	pub started_at: OffsetDateTime,
	pub completed_at: Option<OffsetDateTime>,
	pub duration_ms: Option<i64>,
}

#[derive(Clone, Debug, sqlx::FromRow)]
pub struct Tombstone {
	pub resource_id: String,
	pub source_table: String,
	pub source_id: String,
	pub deleted_at: OffsetDateTime,
}

#[derive(Clone, Debug, sqlx::FromRow)]
pub struct MatchHistoryEntry {
	pub history_id: Uuid,
	pub query: String,
	pub resource_types: Vec<String>,
	pub top_k: i32,
	pub min_confidence: f32,
	pub result_ids: Vec<String>,
	pub top_score: Option<f32>,
	pub duration_ms: i64,
	pub created_at: OffsetDateTime,
}

#[derive(Clone, Debug, PartialEq, Eq, sqlx::FromRow)]
pub struct InstalledTrigger {
	pub trigger_name: String,
	pub schema_name: String,
	pub table_name: String,
	pub function_name: String,
	pub enabled: bool,
}
