//! Reconciles the registry with the configured source tables.
//!
//! One run at a time: an in-process gate rejects overlapping calls on the same service and a
//! Postgres session advisory lock rejects runs from other processes. Cancellation is cooperative
//! and checked between pages.

use std::{
	collections::{HashMap, HashSet},
	sync::{
		Arc,
		atomic::{AtomicBool, Ordering},
	},
	time::Instant,
};

use futures_util::{StreamExt, stream};
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use uuid::Uuid;

use crate::{BeaconService, Error, Result, vectorize::RecordInput};
use beacon_config::{Config, ResourceConfig};
use beacon_domain::{
	composite,
	identifier::AllowList,
	resource::{self, OperationState, OperationType, VectorizationStatus},
};
use beacon_storage::{
	db::SYNC_LOCK_ID,
	models::RegistrySnapshot,
	operations::{self as operation_store, OperationCounts},
	queries,
	sources::{self, SourceRow},
};

#[derive(Clone, Debug, Default)]
pub struct CancelFlag {
	inner: Arc<CancelInner>,
}
impl CancelFlag {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn cancel(&self) {
		self.inner.cancelled.store(true, Ordering::SeqCst);
		self.inner.notify.notify_waiters();
	}

	pub fn is_cancelled(&self) -> bool {
		self.inner.cancelled.load(Ordering::SeqCst)
	}

	/// Resolves once `cancel` has been called.
	pub async fn cancelled(&self) {
		loop {
			let notified = self.inner.notify.notified();

			if self.is_cancelled() {
				return;
			}

			notified.await;
		}
	}
}

#[derive(Debug, Default)]
struct CancelInner {
	cancelled: AtomicBool,
	notify: Notify,
}

#[derive(Clone, Copy, Debug, Default, Deserialize)]
pub struct SyncRequest {
	#[serde(default)]
	pub force_full_sync: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
	Full,
	Incremental,
}

#[derive(Clone, Debug, Serialize)]
pub struct SyncReport {
	pub operation_id: Uuid,
	pub mode: SyncMode,
	pub added: u32,
	pub modified: u32,
	pub deleted: u32,
	pub deactivated: u32,
	pub unchanged: u32,
	pub failed: u32,
	pub skipped_tables: Vec<String>,
	pub cancelled: bool,
	pub duration_seconds: f64,
}

#[derive(Clone, Debug, Default, Serialize)]
struct SyncTally {
	added: u32,
	modified: u32,
	deleted: u32,
	deactivated: u32,
	unchanged: u32,
	failed: u32,
	skipped_tables: Vec<String>,
	cancelled: bool,
}
impl SyncTally {
	fn counts(&self) -> OperationCounts {
		let successful = self.added + self.modified + self.deleted + self.unchanged;

		OperationCounts {
			total: (successful + self.failed) as i32,
			successful: successful as i32,
			failed: self.failed as i32,
		}
	}
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Change {
	Added,
	Modified,
}

struct TableScan<'a> {
	resource: &'a ResourceConfig,
	allow_list: &'a AllowList,
	snapshots: &'a HashMap<String, RegistrySnapshot>,
}
impl TableScan<'_> {
	/// `None` when the stored entry is active, completed and hashes the same content.
	fn classify(&self, resource_id: &str, row: &SourceRow) -> Option<Change> {
		let Some(snapshot) = self.snapshots.get(resource_id) else {
			return Some(Change::Added);
		};
		let draft = resource::draft_from_record(self.resource, &row.source_id, &row.record);
		let content_hash = composite::record_content_hash(self.resource, &draft, &row.record);
		let current = snapshot.content_hash == content_hash
			&& snapshot.is_active
			&& snapshot.vectorization_status == VectorizationStatus::Completed.as_str();

		if current { None } else { Some(Change::Modified) }
	}
}

impl BeaconService {
	/// Runs one synchronization pass. Refuses to start on an invalid configuration or while
	/// another run holds the registry.
	pub async fn sync(&self, req: SyncRequest, cancel: &CancelFlag) -> Result<SyncReport> {
		let cfg = self.cfg();
		let validation = beacon_config::validate_report(&cfg);

		if !validation.valid {
			return Err(Error::InvalidConfig { errors: validation.errors });
		}

		let Ok(_gate) = self.sync_gate.try_lock() else {
			return Err(Error::Conflict { message: "A sync is already running.".to_string() });
		};
		let Some(lock) = self.db.try_session_lock(SYNC_LOCK_ID).await? else {
			return Err(Error::Conflict {
				message: "A sync is already running in another process.".to_string(),
			});
		};
		let result = self.run_sync(&cfg, req, cancel).await;

		if let Err(err) = lock.release().await {
			tracing::warn!(error = %err, "Failed to release sync lock.");
		}

		result
	}

	async fn run_sync(
		&self,
		cfg: &Config,
		req: SyncRequest,
		cancel: &CancelFlag,
	) -> Result<SyncReport> {
		let started = Instant::now();
		let mode = if req.force_full_sync { SyncMode::Full } else { SyncMode::Incremental };
		let operation_id = self.begin_operation(OperationType::Sync, 0).await?;
		let mut tally = SyncTally::default();

		tracing::info!(%operation_id, ?mode, "Sync started.");

		let outcome = self.sync_passes(cfg, mode, operation_id, cancel, &mut tally).await;
		let duration_seconds = started.elapsed().as_secs_f64();

		if let Err(err) = outcome {
			let message = err.to_string();

			operation_store::finish_operation(
				&self.db.pool,
				operation_id,
				OperationState::Failed,
				tally.counts(),
				Some(&message),
				&serde_json::to_value(&tally).unwrap_or_default(),
			)
			.await?;
			tracing::error!(%operation_id, error = %message, "Sync failed.");

			return Err(err);
		}

		let state =
			if tally.cancelled { OperationState::Cancelled } else { OperationState::Completed };
		let error = tally.cancelled.then_some("Sync was cancelled.");

		operation_store::finish_operation(
			&self.db.pool,
			operation_id,
			state,
			tally.counts(),
			error,
			&serde_json::to_value(&tally).unwrap_or_default(),
		)
		.await?;
		tracing::info!(
			%operation_id,
			added = tally.added,
			modified = tally.modified,
			deleted = tally.deleted,
			deactivated = tally.deactivated,
			unchanged = tally.unchanged,
			failed = tally.failed,
			cancelled = tally.cancelled,
			duration_seconds,
			"Sync finished."
		);

		Ok(SyncReport {
			operation_id,
			mode,
			added: tally.added,
			modified: tally.modified,
			deleted: tally.deleted,
			deactivated: tally.deactivated,
			unchanged: tally.unchanged,
			failed: tally.failed,
			skipped_tables: tally.skipped_tables,
			cancelled: tally.cancelled,
			duration_seconds,
		})
	}

	async fn sync_passes(
		&self,
		cfg: &Config,
		mode: SyncMode,
		operation_id: Uuid,
		cancel: &CancelFlag,
		tally: &mut SyncTally,
	) -> Result<()> {
		if mode == SyncMode::Full {
			let mut tx = self.db.pool.begin().await?;
			let vectors = queries::delete_all_vectors(&mut *tx).await?;
			let rows = queries::delete_source_backed(&mut *tx).await?;

			tx.commit().await?;
			tracing::info!(
				%operation_id,
				vectors,
				rows,
				"Cleared source-backed resources for full sync."
			);
		}

		let allow_list = AllowList::from_config(cfg);
		let snapshots = queries::list_source_snapshots(&self.db.pool).await?;
		let snapshots: HashMap<String, RegistrySnapshot> = snapshots
			.into_iter()
			.map(|snapshot| (snapshot.resource_id.clone(), snapshot))
			.collect();
		let mut tables: Vec<&ResourceConfig> = allow_list.tables().collect();
		let mut seen = HashSet::new();
		let mut scanned = HashSet::new();

		tables.sort_by(|lhs, rhs| lhs.table.cmp(&rhs.table));

		for resource in tables {
			if cancel.is_cancelled() {
				tally.cancelled = true;

				break;
			}
			if !sources::table_exists(&self.db.pool, &resource.table).await? {
				tracing::warn!(table = %resource.table, "Source table does not exist. Skipping.");
				tally.skipped_tables.push(resource.table.clone());

				continue;
			}

			let scan = TableScan { resource, allow_list: &allow_list, snapshots: &snapshots };

			if self.sync_table(cfg, &scan, cancel, &mut seen, tally).await {
				scanned.insert(resource.table.clone());
			} else if !tally.cancelled {
				tally.skipped_tables.push(resource.table.clone());
			}

			if let Err(err) =
				operation_store::update_progress(&self.db.pool, operation_id, tally.counts()).await
			{
				tracing::warn!(%operation_id, error = %err, "Failed to record sync progress.");
			}
		}

		if tally.cancelled {
			return Ok(());
		}

		self.deactivate_unconfigured(cfg, &snapshots, tally).await?;

		for snapshot in snapshots.values() {
			let Some(table) = snapshot.source_table.as_deref() else {
				continue;
			};

			if !scanned.contains(table) || seen.contains(&snapshot.resource_id) {
				continue;
			}

			match queries::delete_resource(&self.db.pool, &snapshot.resource_id).await {
				Ok(true) => tally.deleted += 1,
				Ok(false) => {},
				Err(err) => {
					tracing::warn!(
						resource_id = %snapshot.resource_id,
						error = %err,
						"Failed to delete resource."
					);

					tally.failed += 1;
				},
			}
		}

		if mode == SyncMode::Full {
			self.revectorize_native(tally).await?;
		}

		Ok(())
	}

	/// Pages through one table. Returns whether every page was read, which is what makes the
	/// table's missing rows safe to delete.
	async fn sync_table(
		&self,
		cfg: &Config,
		scan: &TableScan<'_>,
		cancel: &CancelFlag,
		seen: &mut HashSet<String>,
		tally: &mut SyncTally,
	) -> bool {
		let table = scan.resource.table.as_str();
		let page_size = i64::from(cfg.vector.batch_size.max(1));
		let concurrency = (cfg.vector.max_concurrent_tasks as usize).max(1);
		let mut after: Option<String> = None;

		loop {
			if cancel.is_cancelled() {
				tally.cancelled = true;

				return false;
			}

			let after_id = after.as_deref();
			let page =
				sources::fetch_page(&self.db.pool, scan.allow_list, table, after_id, page_size);
			let page = match page.await {
				Ok(page) => page,
				Err(err) => {
					tracing::error!(table, error = %err, "Failed to read source table.");

					return false;
				},
			};
			let Some(last) = page.last() else {
				return true;
			};

			after = Some(last.source_id.clone());

			let mut work = Vec::new();

			for row in &page {
				let resource_id = resource::resource_id_for(table, &row.source_id);
				let change = scan.classify(&resource_id, row);

				seen.insert(resource_id);

				match change {
					Some(change) => work.push((change, row)),
					None => tally.unchanged += 1,
				}
			}

			let tasks: Vec<_> = work
				.into_iter()
				.map(|(change, row)| async move {
					let input = RecordInput {
						resource: scan.resource,
						source_id: &row.source_id,
						record: &row.record,
						version: row.read_at,
						force: true,
					};

					(change, row, self.vectorize_source_row(cfg, input).await)
				})
				.collect();
			let results: Vec<_> = stream::iter(tasks)
				.buffer_unordered(concurrency)
				.collect()
				.await;

			for (change, row, result) in results {
				match result {
					Ok(result) if result.success => match change {
						Change::Added => tally.added += 1,
						Change::Modified => tally.modified += 1,
					},
					Ok(result) => {
						tracing::warn!(
							table,
							source_id = %row.source_id,
							error = result.error.as_deref().unwrap_or_default(),
							"Vectorization failed during sync."
						);

						tally.failed += 1;
					},
					Err(err) => {
						tracing::warn!(
							table,
							source_id = %row.source_id,
							error = %err,
							"Sync failed for row."
						);

						tally.failed += 1;
					},
				}
			}

			if (page.len() as i64) < page_size {
				return true;
			}
		}
	}

	/// Soft-disables rows whose table is disabled or no longer configured.
	async fn deactivate_unconfigured(
		&self,
		cfg: &Config,
		snapshots: &HashMap<String, RegistrySnapshot>,
		tally: &mut SyncTally,
	) -> Result<()> {
		let enabled: HashSet<&str> =
			cfg.enabled_resources().map(|resource| resource.table.as_str()).collect();
		let stale_tables: HashSet<&str> = snapshots
			.values()
			.filter(|snapshot| snapshot.is_active)
			.filter_map(|snapshot| snapshot.source_table.as_deref())
			.filter(|table| !enabled.contains(table))
			.collect();

		for table in stale_tables {
			let count = queries::deactivate_table(&self.db.pool, table).await?;

			tracing::info!(table, count, "Deactivated resources of a disabled table.");

			tally.deactivated += count as u32;
		}

		Ok(())
	}

	async fn revectorize_native(&self, tally: &mut SyncTally) -> Result<()> {
		let ids = queries::list_native_ids(&self.db.pool).await?;

		for resource_id in ids {
			match self.vectorize_resource(&resource_id).await {
				Ok(result) if result.success => tally.modified += 1,
				Ok(result) => {
					tracing::warn!(
						resource_id = %resource_id,
						error = result.error.as_deref().unwrap_or_default(),
						"Native resource vectorization failed."
					);

					tally.failed += 1;
				},
				Err(err) => {
					tracing::warn!(
						resource_id = %resource_id,
						error = %err,
						"Native resource vectorization failed."
					);

					tally.failed += 1;
				},
			}
		}

		Ok(())
	}
}
