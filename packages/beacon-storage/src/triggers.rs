use sqlx::{Executor, Postgres};

use crate::{Result, db::Db, models::InstalledTrigger};

/// Runs generated DDL in one transaction so a table never keeps a half-installed trigger.
pub async fn execute_statements(db: &Db, statements: &[String]) -> Result<()> {
	let mut tx = db.pool.begin().await?;

	for statement in statements {
		sqlx::query(statement).execute(&mut *tx).await?;
	}

	tx.commit().await?;

	Ok(())
}

pub async fn list_installed<'e, E>(executor: E, prefix: &str) -> Result<Vec<InstalledTrigger>>
where
	E: Executor<'e, Database = Postgres>,
{
	let pattern = format!("{}%", escape_like(prefix));
	let rows = sqlx::query_as::<_, InstalledTrigger>(
		"\
SELECT
	t.tgname::text AS trigger_name,
	n.nspname::text AS schema_name,
	c.relname::text AS table_name,
	p.proname::text AS function_name,
	t.tgenabled <> 'D' AS enabled
FROM pg_trigger t
JOIN pg_class c ON c.oid = t.tgrelid
JOIN pg_namespace n ON n.oid = c.relnamespace
JOIN pg_proc p ON p.oid = t.tgfoid
WHERE NOT t.tgisinternal AND t.tgname LIKE $1 ESCAPE '\\'
ORDER BY t.tgname",
	)
	.bind(pattern)
	.fetch_all(executor)
	.await?;

	Ok(rows)
}

pub async fn notify<'e, E>(executor: E, channel: &str, payload: &str) -> Result<()>
where
	E: Executor<'e, Database = Postgres>,
{
	sqlx::query("SELECT pg_notify($1, $2)").bind(channel).bind(payload).execute(executor).await?;

	Ok(())
}

fn escape_like(raw: &str) -> String {
	let mut escaped = String::with_capacity(raw.len());

	for ch in raw.chars() {
		if matches!(ch, '%' | '_' | '\\') {
			escaped.push('\\');
		}

		escaped.push(ch);
	}

	escaped
}
