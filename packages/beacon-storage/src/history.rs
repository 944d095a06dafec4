use sqlx::{Executor, Postgres};

use crate::{Result, models::MatchHistoryEntry};

pub async fn insert_match_history<'e, E>(executor: E, entry: &MatchHistoryEntry) -> Result<()>
where
	E: Executor<'e, Database = Postgres>,
{
	sqlx::query(
		"\
INSERT INTO match_history (
	history_id,
	query,
	resource_types,
	top_k,
	min_confidence,
	result_ids,
	top_score,
	duration_ms,
	created_at
)
VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
	)
	.bind(entry.history_id)
	.bind(&entry.query)
	.bind(&entry.resource_types)
	.bind(entry.top_k)
	.bind(entry.min_confidence)
	.bind(&entry.result_ids)
	.bind(entry.top_score)
	.bind(entry.duration_ms)
	.bind(entry.created_at)
	.execute(executor)
	.await?;

	Ok(())
}

pub async fn recent_match_history<'e, E>(executor: E, limit: i64) -> Result<Vec<MatchHistoryEntry>>
where
	E: Executor<'e, Database = Postgres>,
{
	let rows = sqlx::query_as::<_, MatchHistoryEntry>(
		"\
SELECT
	history_id,
	query,
	resource_types,
	top_k,
	min_confidence,
	result_ids,
	top_score,
	duration_ms,
	created_at
FROM match_history
ORDER BY created_at DESC, history_id
LIMIT $1",
	)
	.bind(limit)
	.fetch_all(executor)
	.await?;

	Ok(rows)
}
