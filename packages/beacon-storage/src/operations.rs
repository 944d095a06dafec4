use serde_json::Value;
use sqlx::{Executor, Postgres};
use uuid::Uuid;

use crate::{Result, models::OperationRecord};
use beacon_domain::resource::{OperationState, OperationType};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct OperationCounts {
	pub total: i32,
	pub successful: i32,
	pub failed: i32,
}

/// Records a new operation as `pending`. Call [`mark_running`] when its work begins.
pub async fn create_operation<'e, E>(
	executor: E,
	operation_type: OperationType,
	total_items: i32,
) -> Result<Uuid>
where
	E: Executor<'e, Database = Postgres>,
{
	let operation_id = Uuid::new_v4();

	sqlx::query(
		"\
INSERT INTO operation_status (operation_id, operation_type, status, total_items, started_at)
VALUES ($1, $2, 'pending', $3, clock_timestamp())",
	)
	.bind(operation_id)
	.bind(operation_type.as_str())
	.bind(total_items)
	.execute(executor)
	.await?;

	Ok(operation_id)
}

/// Moves a pending operation to `running` and restarts its clock. Returns false when the
/// operation was not pending.
pub async fn mark_running<'e, E>(executor: E, operation_id: Uuid) -> Result<bool>
where
	E: Executor<'e, Database = Postgres>,
{
	let result = sqlx::query(
		"\
UPDATE operation_status
SET status = 'running', started_at = clock_timestamp()
WHERE operation_id = $1 AND status = 'pending'",
	)
	.bind(operation_id)
	.execute(executor)
	.await?;

	Ok(result.rows_affected() > 0)
}

pub async fn update_progress<'e, E>(
	executor: E,
	operation_id: Uuid,
	counts: OperationCounts,
) -> Result<()>
where
	E: Executor<'e, Database = Postgres>,
{
	sqlx::query(
		"\
UPDATE operation_status
SET total_items = $2, successful_items = $3, failed_items = $4
WHERE operation_id = $1 AND status = 'running'",
	)
	.bind(operation_id)
	.bind(counts.total)
	.bind(counts.successful)
	.bind(counts.failed)
	.execute(executor)
	.await?;

	Ok(())
}

pub async fn finish_operation<'e, E>(
	executor: E,
	operation_id: Uuid,
	state: OperationState,
	counts: OperationCounts,
	error_message: Option<&str>,
	result_data: &Value,
) -> Result<()>
where
	E: Executor<'e, Database = Postgres>,
{
	sqlx::query(
		"\
UPDATE operation_status
SET
	status = $2,
	total_items = $3,
	successful_items = $4,
	failed_items = $5,
	error_message = $6,
	result_data = $7,
	completed_at = clock_timestamp(),
	duration_ms = (extract(epoch FROM clock_timestamp() - started_at) * 1000)::bigint
WHERE operation_id = $1 AND status IN ('pending', 'running')",
	)
	.bind(operation_id)
	.bind(state.as_str())
	.bind(counts.total)
	.bind(counts.successful)
	.bind(counts.failed)
	.bind(error_message)
	.bind(result_data)
	.execute(executor)
	.await?;

	Ok(())
}

pub async fn get_operation<'e, E>(
	executor: E,
	operation_id: Uuid,
) -> Result<Option<OperationRecord>>
where
	E: Executor<'e, Database = Postgres>,
{
	let record = sqlx::query_as::<_, OperationRecord>(
		"\
SELECT
	operation_id,
	operation_type,
	status,
	total_items,
	successful_items,
	failed_items,
	error_message,
	result_data,
	started_at,
	completed_at,
	duration_ms
FROM operation_status
WHERE operation_id = $1",
	)
	.bind(operation_id)
	.fetch_optional(executor)
	.await?;

	Ok(record)
}

pub async fn list_operations<'e, E>(executor: E, limit: i64) -> Result<Vec<OperationRecord>>
where
	E: Executor<'e, Database = Postgres>,
{
	let records = sqlx::query_as::<_, OperationRecord>(
		"\
SELECT
	operation_id,
	operation_type,
	status,
	total_items,
	successful_items,
	failed_items,
	error_message,
	result_data,
	started_at,
	completed_at,
	duration_ms
FROM operation_status
ORDER BY started_at DESC, operation_id
LIMIT $1",
	)
	.bind(limit)
	.fetch_all(executor)
	.await?;

	Ok(records)
}
