use serde::Serialize;
use serde_json::Value;
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use crate::{BeaconService, Error, Result};
use beacon_domain::resource::{OperationState, OperationType};
use beacon_storage::{
	models::OperationRecord,
	operations::{self as operation_store, OperationCounts},
	queries,
};

const MAX_LIST_LIMIT: u32 = 500;

#[derive(Clone, Debug, Serialize)]
pub struct OperationView {
	pub operation_id: Uuid,
	pub operation_type: String,
	pub status: String,
	pub total_items: i32,
	pub successful_items: i32,
	pub failed_items: i32,
	pub error_message: Option<String>,
	pub result_data: Value,
	#[serde(with = "crate::time_serde")]
	pub started_at: OffsetDateTime,
	#[serde(with = "crate::time_serde::option")]
	pub completed_at: Option<OffsetDateTime>,
	pub duration_ms: Option<i64>,
}
impl From<OperationRecord> for OperationView {
	fn from(record: OperationRecord) -> Self {
		Self {
			operation_id: record.operation_id,
			operation_type: record.operation_type,
			status: record.status,
			total_items: record.total_items,
			successful_items: record.successful_items,
			failed_items: record.failed_items,
			error_message: record.error_message,
			result_data: record.result_data,
			started_at: record.started_at,
			completed_at: record.completed_at,
			duration_ms: record.duration_ms,
		}
	}
}

#[derive(Clone, Debug, Serialize)]
pub struct CleanupReport {
	pub operation_id: Uuid,
	pub vectors_removed: u64,
	pub tombstones_purged: u64,
}

impl BeaconService {
	pub async fn get_operation(&self, operation_id: Uuid) -> Result<OperationView> {
		operation_store::get_operation(&self.db.pool, operation_id)
			.await?
			.map(OperationView::from)
			.ok_or_else(|| Error::NotFound {
				message: format!("Operation {operation_id} not found."),
			})
	}

	/// Most recent first.
	pub async fn list_operations(&self, limit: u32) -> Result<Vec<OperationView>> {
		let limit = limit.clamp(1, MAX_LIST_LIMIT);
		let records = operation_store::list_operations(&self.db.pool, i64::from(limit)).await?;

		Ok(records.into_iter().map(OperationView::from).collect())
	}

	/// Records a `pending` operation and moves it to `running` as its work starts.
	pub(crate) async fn begin_operation(
		&self,
		operation_type: OperationType,
		total_items: i32,
	) -> Result<Uuid> {
		let operation_id =
			operation_store::create_operation(&self.db.pool, operation_type, total_items).await?;

		operation_store::mark_running(&self.db.pool, operation_id).await?;
		tracing::debug!(
			%operation_id,
			operation_type = operation_type.as_str(),
			"Operation running."
		);

		Ok(operation_id)
	}

	/// Drops vectors of inactive resources and tombstones past the retention window.
	pub async fn cleanup(&self) -> Result<CleanupReport> {
		let cfg = self.cfg();
		let operation_id = self.begin_operation(OperationType::Cleanup, 0).await?;
		let retention = Duration::days(cfg.sync.tombstone_retention_days.max(0));
		let cutoff = OffsetDateTime::now_utc() - retention;
		let outcome = async {
			let mut tx = self.db.pool.begin().await?;
			let vectors_removed = queries::delete_inactive_vectors(&mut *tx).await?;
			let tombstones_purged = queries::purge_tombstones(&mut *tx, cutoff).await?;

			tx.commit().await?;

			Ok::<_, Error>((vectors_removed, tombstones_purged))
		}
		.await;

		match outcome {
			Ok((vectors_removed, tombstones_purged)) => {
				let total = (vectors_removed + tombstones_purged).min(i32::MAX as u64) as i32;

				operation_store::finish_operation(
					&self.db.pool,
					operation_id,
					OperationState::Completed,
					OperationCounts { total, successful: total, failed: 0 },
					None,
					&serde_json::json!({
						"vectors_removed": vectors_removed,
						"tombstones_purged": tombstones_purged,
					}),
				)
				.await?;
				tracing::info!(
					%operation_id,
					vectors_removed,
					tombstones_purged,
					"Cleanup finished."
				);

				Ok(CleanupReport { operation_id, vectors_removed, tombstones_purged })
			},
			Err(err) => {
				let message = err.to_string();

				operation_store::finish_operation(
					&self.db.pool,
					operation_id,
					OperationState::Failed,
					OperationCounts::default(),
					Some(&message),
					&serde_json::json!({}),
				)
				.await?;
				tracing::error!(%operation_id, error = %message, "Cleanup failed.");

				Err(err)
			},
		}
	}
}
