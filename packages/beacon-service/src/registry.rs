use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{BeaconService, Error, Result, VectorizeResult, vectorize::VectorizeOutcome};
use beacon_domain::{
	composite::ContentKind,
	resource::{ResourceDraft, ResourceType, UnknownVariant},
};
use beacon_storage::{
	models::RegistryEntry,
	queries::{self, RegistryUpsert},
};

#[derive(Clone, Debug, Deserialize)]
pub struct RegisterResourceRequest {
	/// Defaults to `{type}:{uuid v5 of the name}`.
	#[serde(default)]
	pub resource_id: Option<String>,
	pub name: String,
	pub resource_type: ResourceType,
	#[serde(default)]
	pub description: String,
	#[serde(default)]
	pub capabilities: Vec<String>,
	#[serde(default)]
	pub tags: Vec<String>,
	#[serde(default)]
	pub metadata: Option<Value>,
}

#[derive(Clone, Debug, Serialize)]
pub struct RegisterResourceResponse {
	pub resource_id: String,
	pub created: bool,
	pub vectorization: VectorizeResult,
}

#[derive(Clone, Debug, Deserialize)]
pub struct RecordUsageRequest {
	pub resource_id: String,
	pub success: bool,
	#[serde(default)]
	pub response_time_ms: Option<f32>,
}

#[derive(Clone, Debug, Serialize)]
pub struct ResourceView {
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
	pub vectorization_status: String,
	pub vectorization_error: Option<String>,
	pub usage_count: i64,
	pub success_rate: f32,
	pub avg_response_time_ms: Option<f32>,
	#[serde(with = "crate::time_serde::option")]
	pub vector_updated_at: Option<OffsetDateTime>,
	#[serde(with = "crate::time_serde")]
	pub created_at: OffsetDateTime,
	#[serde(with = "crate::time_serde")]
	pub updated_at: OffsetDateTime,
}
impl From<RegistryEntry> for ResourceView {
	fn from(entry: RegistryEntry) -> Self {
		Self {
			resource_id: entry.resource_id,
			name: entry.name,
			resource_type: entry.resource_type,
			description: entry.description,
			capabilities: entry.capabilities,
			tags: entry.tags,
			metadata: entry.metadata,
			is_active: entry.is_active,
			status: entry.status,
			source_table: entry.source_table,
			source_id: entry.source_id,
			vectorization_status: entry.vectorization_status,
			vectorization_error: entry.vectorization_error,
			usage_count: entry.usage_count,
			success_rate: entry.success_rate,
			avg_response_time_ms: entry.avg_response_time_ms,
			vector_updated_at: entry.vector_updated_at,
			created_at: entry.created_at,
			updated_at: entry.updated_at,
		}
	}
}

impl BeaconService {
	/// Registers or updates a resource that has no source table, then vectorizes its four facets.
	pub async fn register_resource(
		&self,
		req: RegisterResourceRequest,
	) -> Result<RegisterResourceResponse> {
		let cfg = self.cfg();
		let name = req.name.trim().to_string();

		if name.is_empty() {
			return Err(Error::InvalidRequest { message: "name must not be empty.".to_string() });
		}

		let resource_id = match req.resource_id.map(|id| id.trim().to_string()) {
			Some(id) if id.is_empty() =>
				return Err(Error::InvalidRequest {
					message: "resource_id must not be empty.".to_string(),
				}),
			Some(id) => id,
			None => default_resource_id(req.resource_type, &name),
		};

		if let Some((prefix, _)) = resource_id.split_once(':')
			&& cfg.resources.iter().any(|resource| resource.table == prefix)
		{
			return Err(Error::InvalidRequest {
				message: format!(
					"resource_id prefix {prefix:?} is reserved for a configured table."
				),
			});
		}

		let existing = queries::get_registry_entry(&self.db.pool, &resource_id).await?;

		if existing.as_ref().is_some_and(|entry| entry.source_table.is_some()) {
			return Err(Error::Conflict {
				message: format!("Resource {resource_id} is owned by a source table."),
			});
		}

		let metadata = match req.metadata {
			None | Some(Value::Null) => Value::Object(Default::default()),
			Some(value @ Value::Object(_)) => value,
			Some(_) =>
				return Err(Error::InvalidRequest {
					message: "metadata must be a JSON object.".to_string(),
				}),
		};
		let draft = ResourceDraft {
			resource_id: resource_id.clone(),
			name,
			resource_type: req.resource_type,
			description: req.description.trim().to_string(),
			capabilities: clean_list(req.capabilities),
			tags: clean_list(req.tags),
			metadata,
			source_table: None,
			source_id: None,
		};
		let content_hash = draft.content_hash();
		let status = queries::upsert_registry(
			&self.db.pool,
			&RegistryUpsert { draft: &draft, content_hash: &content_hash, source_version_at: None },
		)
		.await?;
		let vectorization = match status.as_deref() {
			Some("completed") => VectorizeResult {
				success: true,
				resource_id: resource_id.clone(),
				outcome: VectorizeOutcome::Unchanged,
				vectors_written: Vec::new(),
				error: None,
			},
			_ => self.write_vectors(&cfg, &draft, ContentKind::Registry, None, None).await?,
		};

		tracing::info!(
			resource_id = %resource_id,
			created = existing.is_none(),
			outcome = ?vectorization.outcome,
			"Resource registered."
		);

		Ok(RegisterResourceResponse { resource_id, created: existing.is_none(), vectorization })
	}

	pub async fn get_resource(&self, resource_id: &str) -> Result<ResourceView> {
		queries::get_registry_entry(&self.db.pool, resource_id)
			.await?
			.map(ResourceView::from)
			.ok_or_else(|| Error::NotFound {
				message: format!("Resource {resource_id} not found."),
			})
	}

	/// Folds one call outcome into the usage statistics the matcher ranks on.
	pub async fn record_usage(&self, req: RecordUsageRequest) -> Result<ResourceView> {
		if let Some(ms) = req.response_time_ms
			&& (!ms.is_finite() || ms < 0.0)
		{
			return Err(Error::InvalidRequest {
				message: "response_time_ms must be a non-negative number.".to_string(),
			});
		}

		let entry = queries::record_usage(
			&self.db.pool,
			&req.resource_id,
			req.success,
			req.response_time_ms,
		)
		.await?
			.ok_or_else(|| Error::NotFound {
				message: format!("Resource {} not found.", req.resource_id),
			})?;

		tracing::debug!(
			resource_id = %entry.resource_id,
			success = req.success,
			usage_count = entry.usage_count,
			"Usage recorded."
		);

		Ok(entry.into())
	}
}

/// Rebuilds the draft of a registry-native entry from its stored row.
pub(crate) fn draft_from_entry(entry: &RegistryEntry) -> Result<ResourceDraft> {
	let resource_type = entry.resource_type.parse().map_err(|err: UnknownVariant| Error::Storage {
		message: format!("Resource {}: {err}", entry.resource_id),
	})?;

	Ok(ResourceDraft {
		resource_id: entry.resource_id.clone(),
		name: entry.name.clone(),
		resource_type,
		description: entry.description.clone(),
		capabilities: entry.capabilities.clone(),
		tags: entry.tags.clone(),
		metadata: entry.metadata.clone(),
		source_table: entry.source_table.clone(),
		source_id: entry.source_id.clone(),
	})
}

fn default_resource_id(resource_type: ResourceType, name: &str) -> String {
	let key = format!("{}:{}", resource_type.as_str(), name.to_lowercase());

	format!("{}:{}", resource_type.as_str(), Uuid::new_v5(&Uuid::NAMESPACE_OID, key.as_bytes()))
}

fn clean_list(values: Vec<String>) -> Vec<String> {
	let mut out: Vec<String> = Vec::with_capacity(values.len());

	for value in values {
		let value = value.trim();

		if !value.is_empty() && !out.iter().any(|existing| existing == value) {
			out.push(value.to_string());
		}
	}

	out
}
