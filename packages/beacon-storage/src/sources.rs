//! Reads from configured source tables. Table and column names come only from the allow-list.

use serde_json::{Map, Value};
use sqlx::{Executor, Postgres, Row};
use time::OffsetDateTime;

use crate::{Error, Result};
use beacon_domain::identifier::AllowList;

#[derive(Clone, Debug)]
pub struct SourceRow {
	pub source_id: String,
	pub record: Map<String, Value>,
	/// Start of the reading statement. The row reflects every change committed before it, so
	/// a change stamped later is newer than this copy.
	pub read_at: OffsetDateTime,
}

/// One keyset page ordered by the textual id, starting after `after`.
pub async fn fetch_page<'e, E>(
	executor: E,
	allow_list: &AllowList,
	table: &str,
	after: Option<&str>,
	limit: i64,
) -> Result<Vec<SourceRow>>
where
	E: Executor<'e, Database = Postgres>,
{
	let resource = allow_list.resource(table)?;
	let quoted_table = allow_list.quoted_table(table)?;
	let id_column = allow_list.quoted_column(table, &resource.id_column)?;
	let sql = format!(
		"\
SELECT t.{id_column}::text AS source_id, to_jsonb(t) AS record, statement_timestamp() AS read_at
FROM {quoted_table} AS t
WHERE t.{id_column} IS NOT NULL AND ($1::text IS NULL OR t.{id_column}::text > $1::text)
ORDER BY t.{id_column}::text
LIMIT $2"
	);
	let rows = sqlx::query(&sql).bind(after).bind(limit).fetch_all(executor).await?;

	rows.into_iter().map(|row| source_row(&row)).collect()
}

pub async fn fetch_row<'e, E>(
	executor: E,
	allow_list: &AllowList,
	table: &str,
	source_id: &str,
) -> Result<Option<SourceRow>>
where
	E: Executor<'e, Database = Postgres>,
{
	let resource = allow_list.resource(table)?;
	let quoted_table = allow_list.quoted_table(table)?;
	let id_column = allow_list.quoted_column(table, &resource.id_column)?;
	let sql = format!(
		"\
SELECT t.{id_column}::text AS source_id, to_jsonb(t) AS record, statement_timestamp() AS read_at
FROM {quoted_table} AS t
WHERE t.{id_column}::text = $1"
	);
	let row = sqlx::query(&sql).bind(source_id).fetch_optional(executor).await?;

	row.as_ref().map(source_row).transpose()
}

pub async fn table_exists<'e, E>(executor: E, table: &str) -> Result<bool>
where
	E: Executor<'e, Database = Postgres>,
{
	let exists = sqlx::query_scalar("SELECT to_regclass($1) IS NOT NULL")
		.bind(table)
		.fetch_one(executor)
		.await?;

	Ok(exists)
}

fn source_row(row: &sqlx::postgres::PgRow) -> Result<SourceRow> {
	let source_id: String = row.try_get("source_id")?;
	let record: Value = row.try_get("record")?;
	let read_at: OffsetDateTime = row.try_get("read_at")?;
	let Value::Object(record) = record else {
		return Err(Error::InvalidArgument(format!("Row {source_id} did not decode to an object.")));
	};

	Ok(SourceRow { source_id, record, read_at })
}
