use std::collections::{BTreeSet, HashMap};

use futures_util::{StreamExt, stream};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{BeaconService, Error, Result, embedding_version, registry};
use beacon_config::{Config, ResourceConfig};
use beacon_domain::{
	composite::{self, ContentKind, VectorizationInput, strategy_for},
	fingerprint,
	identifier::AllowList,
	resource::{self, OperationState, OperationType, ResourceDraft, VectorType, VectorizationStatus},
};
use beacon_storage::{
	operations::{self as operation_store, OperationCounts},
	queries::{self, RegistryUpsert, VectorUpsert},
	sources,
};

const DEFAULT_BATCH_LIMIT: u32 = 1_000;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VectorizeOutcome {
	/// New or changed vectors were written.
	Vectorized,
	/// Content hash matched completed vectors; nothing was written.
	Unchanged,
	/// A newer version or a tombstone already covers this resource.
	Stale,
	Failed,
}

#[derive(Clone, Debug, Serialize)]
pub struct VectorizeResult {
	pub success: bool,
	pub resource_id: String,
	pub outcome: VectorizeOutcome,
	pub vectors_written: Vec<VectorType>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub error: Option<String>,
}
impl VectorizeResult {
	fn vectorized(resource_id: &str, vectors_written: Vec<VectorType>) -> Self {
		Self {
			success: true,
			resource_id: resource_id.to_string(),
			outcome: VectorizeOutcome::Vectorized,
			vectors_written,
			error: None,
		}
	}

	fn skipped(resource_id: &str, outcome: VectorizeOutcome) -> Self {
		Self {
			success: true,
			resource_id: resource_id.to_string(),
			outcome,
			vectors_written: Vec::new(),
			error: None,
		}
	}

	pub(crate) fn failed(resource_id: &str, error: String) -> Self {
		Self {
			success: false,
			resource_id: resource_id.to_string(),
			outcome: VectorizeOutcome::Failed,
			vectors_written: Vec::new(),
			error: Some(error),
		}
	}
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct VectorizeBatchRequest {
	/// Explicit ids. When absent, the pending and failed queue is drained.
	#[serde(default)]
	pub resource_ids: Option<Vec<String>>,
	#[serde(default)]
	pub limit: Option<u32>,
}

#[derive(Clone, Debug, Serialize)]
pub struct VectorizeBatchReport {
	pub operation_id: Uuid,
	pub total: u32,
	pub succeeded: u32,
	pub failed: u32,
	pub results: Vec<VectorizeResult>,
}

pub(crate) struct RecordInput<'a> {
	pub resource: &'a ResourceConfig,
	pub source_id: &'a str,
	pub record: &'a Map<String, Value>,
	/// Orders this write against change events and tombstones.
	pub version: OffsetDateTime,
	/// Re-checks vectors even when the registry already reports them completed.
	pub force: bool,
}

impl BeaconService {
	/// Registers a configured source row and vectorizes it when its content changed. Without a
	/// version the record is stamped with the current time.
	pub async fn vectorize_record(
		&self,
		table: &str,
		source_id: &str,
		record: &Map<String, Value>,
		version: Option<OffsetDateTime>,
	) -> Result<VectorizeResult> {
		let cfg = self.cfg();
		let allow_list = AllowList::from_config(&cfg);
		let resource = allow_list.resource(table)?;
		let version = version.unwrap_or_else(OffsetDateTime::now_utc);

		self.vectorize_source_row(
			&cfg,
			RecordInput { resource, source_id, record, version, force: false },
		)
		.await
	}

	/// Re-vectorizes one registry entry from its current source.
	pub async fn vectorize_resource(&self, resource_id: &str) -> Result<VectorizeResult> {
		let cfg = self.cfg();
		let entry = queries::get_registry_entry(&self.db.pool, resource_id)
			.await?
			.ok_or_else(|| Error::NotFound {
				message: format!("Resource {resource_id} not found."),
			})?;

		let Some(table) = entry.source_table.as_deref() else {
			let draft = registry::draft_from_entry(&entry)?;

			return self.write_vectors(&cfg, &draft, ContentKind::Registry, None, None).await;
		};
		let allow_list = AllowList::from_config(&cfg);
		let resource = allow_list.resource(table).map_err(|_| Error::InvalidRequest {
			message: format!("Table {table} is not an enabled resource."),
		})?;
		let source_id = entry.source_id.as_deref().ok_or_else(|| Error::InvalidRequest {
			message: format!("Resource {resource_id} has no source id."),
		})?;
		let row = sources::fetch_row(&self.db.pool, &allow_list, table, source_id)
			.await?
			.ok_or_else(|| Error::NotFound {
				message: format!("Source row {source_id} of {table} not found."),
			})?;

		self.vectorize_source_row(
			&cfg,
			RecordInput {
				resource,
				source_id,
				record: &row.record,
				version: row.read_at,
				force: true,
			},
		)
		.await
	}

	/// Vectorizes many resources with bounded concurrency under one operation record.
	pub async fn vectorize_batch(
		&self,
		req: VectorizeBatchRequest,
	) -> Result<VectorizeBatchReport> {
		let cfg = self.cfg();
		let ids = match req.resource_ids {
			Some(ids) => ids.into_iter().collect::<BTreeSet<_>>().into_iter().collect::<Vec<_>>(),
			None => {
				let limit = req.limit.unwrap_or(DEFAULT_BATCH_LIMIT).max(1);

				queries::list_vectorization_queue(&self.db.pool, i64::from(limit)).await?
			},
		};
		let total = ids.len() as u32;
		let operation_id = self.begin_operation(OperationType::Vectorization, total as i32).await?;
		let concurrency = (cfg.vector.max_concurrent_tasks as usize).max(1);
		let interval = cfg.vector.progress_interval.max(1);
		let mut results = Vec::with_capacity(ids.len());
		let mut succeeded = 0_u32;
		let mut failed = 0_u32;
		let mut in_flight = stream::iter(ids.iter())
			.map(|resource_id| async move {
				(resource_id, self.vectorize_resource(resource_id).await)
			})
			.buffer_unordered(concurrency);

		while let Some((resource_id, result)) = in_flight.next().await {
			let result = result.unwrap_or_else(|err| {
				tracing::warn!(resource_id = %resource_id, error = %err, "Vectorization failed.");

				VectorizeResult::failed(resource_id, err.to_string())
			});

			if result.success {
				succeeded += 1;
			} else {
				failed += 1;
			}

			results.push(result);

			let done = succeeded + failed;

			if done % interval == 0 {
				tracing::info!(%operation_id, done, total, failed, "Vectorization progress.");

				let counts = OperationCounts {
					total: total as i32,
					successful: succeeded as i32,
					failed: failed as i32,
				};

				if let Err(err) =
					operation_store::update_progress(&self.db.pool, operation_id, counts).await
				{
					tracing::warn!(%operation_id, error = %err, "Failed to record progress.");
				}
			}
		}

		drop(in_flight);
		results.sort_by(|lhs, rhs| lhs.resource_id.cmp(&rhs.resource_id));

		let counts = OperationCounts {
			total: total as i32,
			successful: succeeded as i32,
			failed: failed as i32,
		};
		let error = (failed > 0).then(|| format!("{failed} of {total} resources failed."));

		operation_store::finish_operation(
			&self.db.pool,
			operation_id,
			OperationState::Completed,
			counts,
			error.as_deref(),
			&serde_json::json!({ "succeeded": succeeded, "failed": failed }),
		)
		.await?;
		tracing::info!(%operation_id, total, succeeded, failed, "Vectorization batch finished.");

		Ok(VectorizeBatchReport { operation_id, total, succeeded, failed, results })
	}

	pub(crate) async fn vectorize_source_row(
		&self,
		cfg: &Config,
		input: RecordInput<'_>,
	) -> Result<VectorizeResult> {
		let draft = resource::draft_from_record(input.resource, input.source_id, input.record);
		let content_hash = composite::record_content_hash(input.resource, &draft, input.record);
		let status = queries::upsert_registry(
			&self.db.pool,
			&RegistryUpsert {
				draft: &draft,
				content_hash: &content_hash,
				source_version_at: Some(input.version),
			},
		)
		.await?;

		let Some(status) = status else {
			tracing::debug!(resource_id = %draft.resource_id, "Skipping stale change.");

			return Ok(VectorizeResult::skipped(&draft.resource_id, VectorizeOutcome::Stale));
		};

		if status == VectorizationStatus::Completed.as_str() && !input.force {
			return Ok(VectorizeResult::skipped(&draft.resource_id, VectorizeOutcome::Unchanged));
		}

		let kind = ContentKind::for_record(input.resource, input.record);

		self.write_vectors(cfg, &draft, kind, Some(input.resource), Some(input.record)).await
	}

	/// Embeds and stores the vectors of a registered resource. Storage errors leave the resource
	/// marked failed before they propagate.
	pub(crate) async fn write_vectors(
		&self,
		cfg: &Config,
		draft: &ResourceDraft,
		kind: ContentKind,
		resource: Option<&ResourceConfig>,
		record: Option<&Map<String, Value>>,
	) -> Result<VectorizeResult> {
		let resource_id = draft.resource_id.as_str();
		let result = self.write_vectors_inner(cfg, draft, kind, resource, record).await;

		if let Err(err) = &result {
			let message = err.to_string();

			if let Err(mark_err) = queries::set_vectorization_status(
				&self.db.pool,
				resource_id,
				VectorizationStatus::Failed,
				Some(&message),
			)
			.await
			{
				tracing::warn!(resource_id, error = %mark_err, "Failed to mark resource failed.");
			}
		}

		result
	}

	async fn write_vectors_inner(
		&self,
		cfg: &Config,
		draft: &ResourceDraft,
		kind: ContentKind,
		resource: Option<&ResourceConfig>,
		record: Option<&Map<String, Value>>,
	) -> Result<VectorizeResult> {
		let resource_id = draft.resource_id.as_str();
		let input = VectorizationInput { draft, config: resource, record };
		let texts = strategy_for(kind).vector_texts(&input);

		if texts.is_empty() {
			let message = "Resource has no content to vectorize.";

			queries::delete_stale_vectors(&self.db.pool, resource_id, &[]).await?;
			queries::set_vectorization_status(
				&self.db.pool,
				resource_id,
				VectorizationStatus::Failed,
				Some(message),
			)
			.await?;
			tracing::warn!(
				resource_id,
				kind = kind.as_str(),
				"Resource has no content to vectorize."
			);

			return Ok(VectorizeResult::failed(resource_id, message.to_string()));
		}

		queries::set_vectorization_status(
			&self.db.pool,
			resource_id,
			VectorizationStatus::Processing,
			None,
		)
		.await?;

		let model_name = embedding_version(cfg);
		let dimension = cfg.providers.embedding.dimensions as i32;
		let existing: HashMap<String, (String, String, i32)> =
			queries::list_vectors(&self.db.pool, resource_id)
				.await?
				.into_iter()
				.map(|vector| {
					(vector.vector_type, (vector.content_hash, vector.model_name, vector.dimension))
				})
				.collect();
		let hashes: Vec<String> =
			texts.iter().map(|text| fingerprint::text_hash(&text.content)).collect();
		let pending: Vec<usize> = (0..texts.len())
			.filter(|idx| {
				let current = existing.get(texts[*idx].vector_type.as_str());

				current.is_none_or(|(hash, model, dim)| {
					hash != &hashes[*idx] || model != &model_name || *dim != dimension
				})
			})
			.collect();
		let contents: Vec<String> = pending.iter().map(|idx| texts[*idx].content.clone()).collect();
		let embedded = self.embed_or_zero(cfg, &contents).await;

		if let Some(reason) = embedded.fallback {
			queries::set_vectorization_status(
				&self.db.pool,
				resource_id,
				VectorizationStatus::Failed,
				Some(&reason),
			)
			.await?;

			return Ok(VectorizeResult::failed(resource_id, reason));
		}

		let keep: Vec<String> =
			texts.iter().map(|text| text.vector_type.as_str().to_string()).collect();
		let mut tx = self.db.pool.begin().await?;

		for (slot, idx) in pending.iter().enumerate() {
			let text = &texts[*idx];

			queries::upsert_vector(
				&mut *tx,
				&VectorUpsert {
					resource_id,
					vector_type: text.vector_type.as_str(),
					content: &text.content,
					content_hash: &hashes[*idx],
					embedding: &embedded.vectors[slot],
					model_name: &model_name,
				},
			)
			.await?;
		}

		queries::delete_stale_vectors(&mut *tx, resource_id, &keep).await?;
		queries::mark_vectorized(&mut *tx, resource_id).await?;
		tx.commit().await?;

		let written: Vec<VectorType> = pending.iter().map(|idx| texts[*idx].vector_type).collect();

		tracing::debug!(
			resource_id,
			kind = kind.as_str(),
			written = written.len(),
			reused = texts.len() - written.len(),
			"Resource vectorized."
		);

		Ok(VectorizeResult::vectorized(resource_id, written))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn failed_results_carry_the_reason() {
		let result = VectorizeResult::failed("orders:1", "Empty input.".to_string());
		let json = serde_json::to_value(&result).expect("Result should serialize.");

		assert!(!result.success);
		assert_eq!(json["outcome"], "failed");
		assert_eq!(json["error"], "Empty input.");
	}

	#[test]
	fn skipped_results_omit_error() {
		let result = VectorizeResult::skipped("orders:1", VectorizeOutcome::Unchanged);
		let json = serde_json::to_value(&result).expect("Result should serialize.");

		assert!(result.success);
		assert_eq!(json["outcome"], "unchanged");
		assert!(json.get("error").is_none());
	}
}
