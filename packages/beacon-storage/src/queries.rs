//! Registry, vector and tombstone statements. Every mutation is scoped by primary key.

use sqlx::{Executor, PgConnection, Postgres};
use time::OffsetDateTime;

use crate::{
	Result,
	db::Db,
	models::{CandidateRow, RegistryEntry, RegistrySnapshot, Tombstone, VectorRecord},
};
use beacon_domain::resource::{ResourceDraft, VectorizationStatus};

const REGISTRY_COLUMNS: &str = "\
resource_id,
	name,
	resource_type,
	description,
	capabilities,
	tags,
	metadata,
	is_active,
	status,
	source_table,
	source_id,
	content_hash,
	source_version_at,
	vectorization_status,
	vectorization_error,
	usage_count,
	success_rate,
	avg_response_time_ms,
	vector_updated_at,
	created_at,
	updated_at";

pub struct RegistryUpsert<'a> {
	pub draft: &'a ResourceDraft,
	pub content_hash: &'a str,
	/// Source change time. `None` only for native entries; an unversioned write never replaces a
	/// versioned row and any tombstone blocks it.
	pub source_version_at: Option<OffsetDateTime>,
}

pub struct VectorUpsert<'a> {
	pub resource_id: &'a str,
	pub vector_type: &'a str,
	pub content: &'a str,
	pub content_hash: &'a str,
	pub embedding: &'a [f32],
	pub model_name: &'a str,
}

pub struct Deletion<'a> {
	pub resource_id: &'a str,
	pub source_table: &'a str,
	pub source_id: &'a str,
	pub deleted_at: OffsetDateTime,
}

/// Inserts or updates a registry row. Returns the resulting vectorization status, or `None` when
/// the write lost to a newer stored version or a newer tombstone.
pub async fn upsert_registry<'e, E>(
	executor: E,
	row: &RegistryUpsert<'_>,
) -> Result<Option<String>>
where
	E: Executor<'e, Database = Postgres>,
{
	let draft = row.draft;
	let status: Option<String> = sqlx::query_scalar(
		"\
INSERT INTO resource_registry (
	resource_id,
	name,
	resource_type,
	description,
	capabilities,
	tags,
	metadata,
	source_table,
	source_id,
	content_hash,
	source_version_at
)
SELECT $1, $2, $3, $4, $5::text[], $6::text[], $7::jsonb, $8, $9, $10, $11::timestamptz
WHERE NOT EXISTS (
	SELECT 1
	FROM resource_tombstones t
	WHERE t.resource_id = $1
		AND ($11::timestamptz IS NULL OR t.deleted_at >= $11::timestamptz)
)
ON CONFLICT (resource_id) DO UPDATE
SET
	name = EXCLUDED.name,
	resource_type = EXCLUDED.resource_type,
	description = EXCLUDED.description,
	capabilities = EXCLUDED.capabilities,
	tags = EXCLUDED.tags,
	metadata = EXCLUDED.metadata,
	is_active = true,
	status = 'active',
	source_table = EXCLUDED.source_table,
	source_id = EXCLUDED.source_id,
	content_hash = EXCLUDED.content_hash,
	source_version_at = COALESCE(EXCLUDED.source_version_at, resource_registry.source_version_at),
	vectorization_status = CASE
		WHEN resource_registry.content_hash = EXCLUDED.content_hash
			AND resource_registry.vectorization_status = 'completed'
		THEN 'completed'
		ELSE 'pending'
	END,
	updated_at = now()
WHERE resource_registry.source_version_at IS NULL
	OR resource_registry.source_version_at <= EXCLUDED.source_version_at
RETURNING vectorization_status",
	)
	.bind(&draft.resource_id)
	.bind(&draft.name)
	.bind(draft.resource_type.as_str())
	.bind(&draft.description)
	.bind(&draft.capabilities)
	.bind(&draft.tags)
	.bind(&draft.metadata)
	.bind(draft.source_table.as_deref())
	.bind(draft.source_id.as_deref())
	.bind(row.content_hash)
	.bind(row.source_version_at)
	.fetch_optional(executor)
	.await?;

	Ok(status)
}

pub async fn get_registry_entry<'e, E>(
	executor: E,
	resource_id: &str,
) -> Result<Option<RegistryEntry>>
where
	E: Executor<'e, Database = Postgres>,
{
	let sql = format!("SELECT {REGISTRY_COLUMNS} FROM resource_registry WHERE resource_id = $1");
	let entry = sqlx::query_as::<_, RegistryEntry>(&sql)
		.bind(resource_id)
		.fetch_optional(executor)
		.await?;

	Ok(entry)
}

pub async fn get_registry_entries<'e, E>(
	executor: E,
	resource_ids: &[String],
) -> Result<Vec<RegistryEntry>>
where
	E: Executor<'e, Database = Postgres>,
{
	let sql =
		format!("SELECT {REGISTRY_COLUMNS} FROM resource_registry WHERE resource_id = ANY($1)");
	let entries = sqlx::query_as::<_, RegistryEntry>(&sql)
		.bind(resource_ids)
		.fetch_all(executor)
		.await?;

	Ok(entries)
}

pub async fn set_vectorization_status<'e, E>(
	executor: E,
	resource_id: &str,
	status: VectorizationStatus,
	error: Option<&str>,
) -> Result<()>
where
	E: Executor<'e, Database = Postgres>,
{
	sqlx::query(
		"\
UPDATE resource_registry
SET vectorization_status = $2, vectorization_error = $3, updated_at = now()
WHERE resource_id = $1",
	)
	.bind(resource_id)
	.bind(status.as_str())
	.bind(error)
	.execute(executor)
	.await?;

	Ok(())
}

pub async fn mark_vectorized<'e, E>(executor: E, resource_id: &str) -> Result<()>
where
	E: Executor<'e, Database = Postgres>,
{
	sqlx::query(
		"\
UPDATE resource_registry
SET
	vectorization_status = 'completed',
	vectorization_error = NULL,
	vector_updated_at = clock_timestamp(),
	updated_at = now()
WHERE resource_id = $1",
	)
	.bind(resource_id)
	.execute(executor)
	.await?;

	Ok(())
}

pub async fn list_source_snapshots<'e, E>(executor: E) -> Result<Vec<RegistrySnapshot>>
where
	E: Executor<'e, Database = Postgres>,
{
	let rows = sqlx::query_as::<_, RegistrySnapshot>(
		"\
SELECT resource_id, source_table, content_hash, is_active, vectorization_status
FROM resource_registry
WHERE source_table IS NOT NULL",
	)
	.fetch_all(executor)
	.await?;

	Ok(rows)
}

pub async fn list_native_ids<'e, E>(executor: E) -> Result<Vec<String>>
where
	E: Executor<'e, Database = Postgres>,
{
	let ids = sqlx::query_scalar(
		"\
SELECT resource_id
FROM resource_registry
WHERE source_table IS NULL AND is_active
ORDER BY resource_id",
	)
	.fetch_all(executor)
	.await?;

	Ok(ids)
}

/// Active resources waiting for vectors, oldest first.
pub async fn list_vectorization_queue<'e, E>(executor: E, limit: i64) -> Result<Vec<String>>
where
	E: Executor<'e, Database = Postgres>,
{
	let ids = sqlx::query_scalar(
		"\
SELECT resource_id
FROM resource_registry
WHERE is_active AND vectorization_status IN ('pending', 'failed')
ORDER BY updated_at ASC, resource_id ASC
LIMIT $1",
	)
	.bind(limit)
	.fetch_all(executor)
	.await?;

	Ok(ids)
}

/// Soft-disables every row that came from `table`.
pub async fn deactivate_table<'e, E>(executor: E, table: &str) -> Result<u64>
where
	E: Executor<'e, Database = Postgres>,
{
	let result = sqlx::query(
		"\
UPDATE resource_registry
SET is_active = false, status = 'inactive', updated_at = now()
WHERE source_table = $1 AND is_active",
	)
	.bind(table)
	.execute(executor)
	.await?;

	Ok(result.rows_affected())
}

pub async fn delete_resource<'e, E>(executor: E, resource_id: &str) -> Result<bool>
where
	E: Executor<'e, Database = Postgres>,
{
	let result = sqlx::query("DELETE FROM resource_registry WHERE resource_id = $1")
		.bind(resource_id)
		.execute(executor)
		.await?;

	Ok(result.rows_affected() > 0)
}

/// Deletes a source-backed row unless it holds a newer version, and records a tombstone so older
/// events cannot bring it back. Returns whether a row was removed.
pub async fn delete_with_tombstone(db: &Db, deletion: &Deletion<'_>) -> Result<bool> {
	let mut tx = db.pool.begin().await?;

	sqlx::query(
		"\
INSERT INTO resource_tombstones (resource_id, source_table, source_id, deleted_at)
VALUES ($1, $2, $3, $4)
ON CONFLICT (resource_id) DO UPDATE
SET
	deleted_at = GREATEST(resource_tombstones.deleted_at, EXCLUDED.deleted_at),
	recorded_at = now()",
	)
	.bind(deletion.resource_id)
	.bind(deletion.source_table)
	.bind(deletion.source_id)
	.bind(deletion.deleted_at)
	.execute(&mut *tx)
	.await?;

	let result = sqlx::query(
		"\
DELETE FROM resource_registry
WHERE resource_id = $1
	AND (source_version_at IS NULL OR source_version_at <= $2)",
	)
	.bind(deletion.resource_id)
	.bind(deletion.deleted_at)
	.execute(&mut *tx)
	.await?;

	tx.commit().await?;

	Ok(result.rows_affected() > 0)
}

pub async fn get_tombstone<'e, E>(executor: E, resource_id: &str) -> Result<Option<Tombstone>>
where
	E: Executor<'e, Database = Postgres>,
{
	let tombstone = sqlx::query_as::<_, Tombstone>(
		"\
SELECT resource_id, source_table, source_id, deleted_at
FROM resource_tombstones
WHERE resource_id = $1",
	)
	.bind(resource_id)
	.fetch_optional(executor)
	.await?;

	Ok(tombstone)
}

pub async fn purge_tombstones<'e, E>(executor: E, before: OffsetDateTime) -> Result<u64>
where
	E: Executor<'e, Database = Postgres>,
{
	let result = sqlx::query("DELETE FROM resource_tombstones WHERE recorded_at < $1")
		.bind(before)
		.execute(executor)
		.await?;

	Ok(result.rows_affected())
}

/// Removes every source-backed registry row. Vectors follow through the foreign key.
pub async fn delete_source_backed<'e, E>(executor: E) -> Result<u64>
where
	E: Executor<'e, Database = Postgres>,
{
	let result = sqlx::query("DELETE FROM resource_registry WHERE source_table IS NOT NULL")
		.execute(executor)
		.await?;

	Ok(result.rows_affected())
}

pub async fn delete_all_vectors<'e, E>(executor: E) -> Result<u64>
where
	E: Executor<'e, Database = Postgres>,
{
	let result = sqlx::query("DELETE FROM resource_vectors").execute(executor).await?;

	Ok(result.rows_affected())
}

pub async fn upsert_vector<'e, E>(executor: E, vector: &VectorUpsert<'_>) -> Result<()>
where
	E: Executor<'e, Database = Postgres>,
{
	sqlx::query(
		"\
INSERT INTO resource_vectors (
	resource_id,
	vector_type,
	content,
	content_hash,
	embedding,
	dimension,
	model_name
)
VALUES ($1, $2, $3, $4, $5, $6, $7)
ON CONFLICT (resource_id, vector_type) DO UPDATE
SET
	content = EXCLUDED.content,
	content_hash = EXCLUDED.content_hash,
	embedding = EXCLUDED.embedding,
	dimension = EXCLUDED.dimension,
	model_name = EXCLUDED.model_name,
	updated_at = now()",
	)
	.bind(vector.resource_id)
	.bind(vector.vector_type)
	.bind(vector.content)
	.bind(vector.content_hash)
	.bind(vector.embedding)
	.bind(vector.embedding.len() as i32)
	.bind(vector.model_name)
	.execute(executor)
	.await?;

	Ok(())
}

/// Drops facets that the current content no longer produces.
pub async fn delete_stale_vectors<'e, E>(
	executor: E,
	resource_id: &str,
	keep: &[String],
) -> Result<u64>
where
	E: Executor<'e, Database = Postgres>,
{
	let result = sqlx::query(
		"DELETE FROM resource_vectors WHERE resource_id = $1 AND NOT (vector_type = ANY($2))",
	)
	.bind(resource_id)
	.bind(keep)
	.execute(executor)
	.await?;

	Ok(result.rows_affected())
}

pub async fn list_vectors<'e, E>(executor: E, resource_id: &str) -> Result<Vec<VectorRecord>>
where
	E: Executor<'e, Database = Postgres>,
{
	let rows = sqlx::query_as::<_, VectorRecord>(
		"\
SELECT resource_id, vector_type, content, content_hash, dimension, model_name, updated_at
FROM resource_vectors
WHERE resource_id = $1
ORDER BY vector_type",
	)
	.bind(resource_id)
	.fetch_all(executor)
	.await?;

	Ok(rows)
}

/// Stored vectors of active resources with the given dimension, optionally limited to some
/// resource types.
pub async fn fetch_candidates<'e, E>(
	executor: E,
	resource_types: Option<&[String]>,
	dimension: i32,
) -> Result<Vec<CandidateRow>>
where
	E: Executor<'e, Database = Postgres>,
{
	let rows = sqlx::query_as::<_, CandidateRow>(
		"\
SELECT
	v.resource_id,
	v.vector_type,
	v.embedding,
	r.resource_type,
	r.tags,
	r.capabilities,
	r.usage_count,
	r.success_rate,
	r.avg_response_time_ms
FROM resource_vectors v
JOIN resource_registry r ON r.resource_id = v.resource_id
WHERE r.is_active
	AND r.status = 'active'
	AND v.dimension = $2
	AND ($1::text[] IS NULL OR r.resource_type = ANY($1::text[]))",
	)
	.bind(resource_types)
	.bind(dimension)
	.fetch_all(executor)
	.await?;

	Ok(rows)
}

/// Folds one call outcome into the running usage statistics.
pub async fn record_usage<'e, E>(
	executor: E,
	resource_id: &str,
	success: bool,
	response_time_ms: Option<f32>,
) -> Result<Option<RegistryEntry>>
where
	E: Executor<'e, Database = Postgres>,
{
	let sql = format!(
		"\
UPDATE resource_registry
SET
	usage_count = usage_count + 1,
	success_count = success_count + CASE WHEN $2 THEN 1 ELSE 0 END,
	success_rate = (success_count + CASE WHEN $2 THEN 1 ELSE 0 END)::real / (usage_count + 1)::real,
	avg_response_time_ms = CASE
		WHEN $3::real IS NULL THEN avg_response_time_ms
		WHEN avg_response_time_ms IS NULL THEN $3::real
		ELSE avg_response_time_ms + ($3::real - avg_response_time_ms) / (usage_count + 1)::real
	END,
	updated_at = now()
WHERE resource_id = $1
RETURNING {REGISTRY_COLUMNS}"
	);
	let entry = sqlx::query_as::<_, RegistryEntry>(&sql)
		.bind(resource_id)
		.bind(success)
		.bind(response_time_ms)
		.fetch_optional(executor)
		.await?;

	Ok(entry)
}

/// Drops vectors of inactive resources and marks them for re-vectorization on reactivation.
pub async fn delete_inactive_vectors(conn: &mut PgConnection) -> Result<u64> {
	let result = sqlx::query(
		"\
DELETE FROM resource_vectors v
USING resource_registry r
WHERE r.resource_id = v.resource_id AND NOT r.is_active",
	)
	.execute(&mut *conn)
	.await?;

	sqlx::query(
		"\
UPDATE resource_registry
SET vectorization_status = 'pending', vector_updated_at = NULL
WHERE NOT is_active AND vectorization_status = 'completed'",
	)
	.execute(&mut *conn)
	.await?;

	Ok(result.rows_affected())
}
