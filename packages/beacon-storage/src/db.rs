use std::time::Duration;

use sqlx::{PgPool, pool::PoolConnection, postgres::PgPoolOptions};

use crate::{Result, schema};
use beacon_config::Postgres;

const SCHEMA_LOCK_ID: i64 = 7_120_114;

/// Session-level advisory lock key that serializes registry reconciliation across processes.
pub const SYNC_LOCK_ID: i64 = 7_120_115;

#[derive(Clone, Debug)]
pub struct Db {
	pub pool: PgPool,
}
impl Db {
	pub async fn connect(cfg: &Postgres, acquire_timeout: Duration) -> Result<Self> {
		let pool = PgPoolOptions::new()
			.max_connections(cfg.pool_max_conns)
			.acquire_timeout(acquire_timeout)
			.connect(&cfg.dsn)
			.await?;

		tracing::debug!(max_connections = cfg.pool_max_conns, "Postgres pool connected.");

		Ok(Self { pool })
	}

	pub async fn ensure_schema(&self) -> Result<()> {
		let sql = schema::render_schema();
		// Advisory locks are held per connection. Use a single transaction so the lock is scoped to
		// one connection and automatically released when the transaction ends.
		let mut tx = self.pool.begin().await?;

		sqlx::query("SELECT pg_advisory_xact_lock($1)")
			.bind(SCHEMA_LOCK_ID)
			.execute(&mut *tx)
			.await?;

		let mut statements = 0_usize;

		for statement in sql.split(';') {
			let trimmed = statement.trim();

			if trimmed.is_empty() {
				continue;
			}

			sqlx::query(trimmed).execute(&mut *tx).await?;

			statements += 1;
		}

		tx.commit().await?;
		tracing::info!(statements, "Schema ensured.");

		Ok(())
	}

	/// Tries to take a session advisory lock on a dedicated connection. Returns `None` when another
	/// session holds it.
	pub async fn try_session_lock(&self, key: i64) -> Result<Option<SessionLock>> {
		let mut conn = self.pool.acquire().await?;
		let acquired: bool = sqlx::query_scalar("SELECT pg_try_advisory_lock($1)")
			.bind(key)
			.fetch_one(&mut *conn)
			.await?;

		if !acquired {
			tracing::debug!(key, "Advisory lock is held by another session.");

			return Ok(None);
		}

		// A lock that is never explicitly released dies with its connection.
		conn.close_on_drop();

		Ok(Some(SessionLock { conn, key }))
	}
}

pub struct SessionLock {
	conn: PoolConnection<sqlx::Postgres>,
	key: i64,
}
impl SessionLock {
	pub async fn release(mut self) -> Result<()> {
		let released: bool = sqlx::query_scalar("SELECT pg_advisory_unlock($1)")
			.bind(self.key)
			.fetch_one(&mut *self.conn)
			.await?;

		if !released {
			tracing::warn!(key = self.key, "Advisory lock was not held at release.");
		}

		Ok(())
	}
}
