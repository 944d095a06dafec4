//! Applies trigger change events as they arrive.
//!
//! The receive loop only parses and routes. Events are sharded by resource id onto a fixed set of
//! workers, so one resource is always handled by one worker in arrival order. Each worker coalesces
//! events per resource within `trigger.batch_delay_ms` and keeps the newest. A full shard queue
//! defers the event to that shard's overflow instead of dropping it.

use std::{
	collections::{HashMap, HashSet},
	hash::{DefaultHasher, Hash, Hasher},
	mem,
	sync::{Arc, Mutex, PoisonError},
	time::Duration,
};

use serde::Serialize;
use sqlx::postgres::PgListener;
use time::OffsetDateTime;
use tokio::{
	sync::{
		Notify,
		mpsc::{self, error::TrySendError},
	},
	task::JoinHandle,
	time::{self as tokio_time, Instant},
};

use crate::{
	BeaconService, CancelFlag, Result,
	vectorize::{RecordInput, VectorizeOutcome},
};
use beacon_config::Config;
use beacon_domain::{
	change_event::{ChangeEvent, ChangeOperation},
	identifier::AllowList,
	trigger_sql::TriggerNames,
};
use beacon_storage::{
	queries::{self, Deletion},
	sources,
};

const RECONNECT_DELAY: Duration = Duration::from_secs(5);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeOutcome {
	Vectorized,
	Unchanged,
	/// Older than the stored version or a tombstone.
	Stale,
	Deleted,
	/// The row was gone by the time the event was handled.
	Missing,
	Failed,
	/// The table is not an enabled resource.
	Ignored,
}

impl BeaconService {
	/// Applies one change event. Registry writes carry the event time so late events cannot
	/// overwrite newer state.
	pub async fn apply_change(&self, event: &ChangeEvent) -> Result<ChangeOutcome> {
		let cfg = self.cfg();
		let allow_list = AllowList::from_config(&cfg);
		let Ok(resource) = allow_list.resource(&event.table_name) else {
			return Ok(ChangeOutcome::Ignored);
		};
		let version = event_time(event.timestamp);

		if event.operation == ChangeOperation::Delete {
			let resource_id = event.resource_id();

			queries::delete_with_tombstone(
				&self.db,
				&Deletion {
					resource_id: &resource_id,
					source_table: &resource.table,
					source_id: &event.record_id,
					deleted_at: version.unwrap_or_else(OffsetDateTime::now_utc),
				},
			)
			.await?;

			return Ok(ChangeOutcome::Deleted);
		}

		let row =
			sources::fetch_row(&self.db.pool, &allow_list, &event.table_name, &event.record_id);
		let Some(row) = row.await? else {
			return Ok(ChangeOutcome::Missing);
		};
		let result = self
			.vectorize_source_row(
				&cfg,
				RecordInput {
					resource,
					source_id: &row.source_id,
					record: &row.record,
					version: version.unwrap_or(row.read_at),
					force: false,
				},
			)
			.await?;

		Ok(match result.outcome {
			VectorizeOutcome::Vectorized => ChangeOutcome::Vectorized,
			VectorizeOutcome::Unchanged => ChangeOutcome::Unchanged,
			VectorizeOutcome::Stale => ChangeOutcome::Stale,
			VectorizeOutcome::Failed => ChangeOutcome::Failed,
		})
	}
}

/// Listens on the change channels of every enabled resource until `shutdown` fires. A
/// configuration reload re-subscribes with the new channel set.
pub struct IncrementalUpdater {
	service: Arc<BeaconService>,
}
impl IncrementalUpdater {
	pub fn new(service: Arc<BeaconService>) -> Self {
		Self { service }
	}

	pub async fn run(&self, shutdown: CancelFlag) -> Result<()> {
		let mut config_rx = self.service.config.subscribe();

		loop {
			let cfg = config_rx.borrow_and_update().clone();

			if !cfg.trigger.enable_realtime || cfg.enabled_resources().next().is_none() {
				tracing::info!("Realtime updates are off. Waiting for a configuration change.");
				tokio::select! {
					_ = shutdown.cancelled() => return Ok(()),
					changed = config_rx.changed() => {
						if changed.is_err() {
							return Ok(());
						}

						continue;
					},
				}
			}

			let channels = channels(&cfg);
			let mut listener = match self.listen(&channels).await {
				Ok(listener) => listener,
				Err(err) => {
					tracing::warn!(error = %err, "Failed to start change listener. Retrying.");
					tokio::select! {
						_ = shutdown.cancelled() => return Ok(()),
						_ = tokio_time::sleep(RECONNECT_DELAY) => continue,
					}
				},
			};
			let dispatcher = Dispatcher::spawn(self.service.clone(), &cfg);

			tracing::info!(
				channels = channels.len(),
				workers = dispatcher.shards.len(),
				"Listening for change events."
			);

			let stop = loop {
				tokio::select! {
					_ = shutdown.cancelled() => break true,
					changed = config_rx.changed() => break changed.is_err(),
					notification = listener.recv() => match notification {
						Ok(notification) =>
							dispatcher.dispatch(notification.channel(), notification.payload()),
						Err(err) => {
							tracing::warn!(error = %err, "Change listener failed. Reconnecting.");

							break false;
						},
					},
				}
			};

			dispatcher.shutdown().await;

			if stop {
				tracing::info!("Change listener stopped.");

				return Ok(());
			}
		}
	}

	async fn listen(&self, channels: &[String]) -> Result<PgListener> {
		let mut listener = PgListener::connect_with(&self.service.db.pool).await?;

		listener.listen_all(channels.iter().map(String::as_str)).await?;

		Ok(listener)
	}
}

struct Dispatcher {
	shards: Vec<Shard>,
	workers: Vec<JoinHandle<()>>,
	tables: HashSet<String>,
	max_bytes: usize,
}
impl Dispatcher {
	fn spawn(service: Arc<BeaconService>, cfg: &Config) -> Self {
		let count = (cfg.trigger.workers as usize).max(1);
		let capacity = (cfg.trigger.queue_capacity as usize / count).max(1);
		let delay = Duration::from_millis(cfg.trigger.batch_delay_ms);
		let mut shards = Vec::with_capacity(count);
		let mut workers = Vec::with_capacity(count);

		for shard in 0..count {
			let (tx, rx) = mpsc::channel(capacity);
			let overflow = Arc::new(Overflow::default());

			let worker = run_shard(service.clone(), shard, rx, overflow.clone(), delay);

			workers.push(tokio::spawn(worker));
			shards.push(Shard { tx, overflow });
		}

		Self {
			shards,
			workers,
			tables: cfg.enabled_resources().map(|resource| resource.table.clone()).collect(),
			max_bytes: cfg.trigger.max_payload_bytes as usize,
		}
	}

	fn dispatch(&self, channel: &str, payload: &str) {
		let event = match ChangeEvent::parse(payload, self.max_bytes) {
			Ok(event) => event,
			Err(err) => {
				tracing::warn!(channel, error = %err, "Dropping malformed change event.");

				return;
			},
		};

		if !self.tables.contains(&event.table_name) {
			tracing::debug!(
				channel,
				table = %event.table_name,
				"Ignoring change for an unknown table."
			);

			return;
		}

		let resource_id = event.resource_id();
		let index = shard_for(&resource_id, self.shards.len());
		let shard = &self.shards[index];

		match shard.tx.try_send(event) {
			Ok(()) => {},
			Err(TrySendError::Full(event)) => {
				tracing::debug!(%resource_id, shard = index, "Change queue full. Deferring.");
				shard.overflow.push(event);
			},
			Err(TrySendError::Closed(_)) => {
				tracing::warn!(
					resource_id = %resource_id,
					shard = index,
					"Change worker stopped. Dropping event."
				);
			},
		}
	}

	/// Closes the queues and waits for workers to finish what they already received.
	async fn shutdown(self) {
		drop(self.shards);

		for worker in self.workers {
			if let Err(err) = worker.await {
				tracing::error!(error = %err, "Change worker panicked.");
			}
		}
	}
}

struct Shard {
	tx: mpsc::Sender<ChangeEvent>,
	overflow: Arc<Overflow>,
}

/// Events that found their shard queue full, newest per resource. The shard worker drains it
/// with every batch.
#[derive(Debug, Default)]
struct Overflow {
	pending: Mutex<Coalescer>,
	notify: Notify,
}
impl Overflow {
	fn push(&self, event: ChangeEvent) {
		self.pending.lock().unwrap_or_else(PoisonError::into_inner).push(event);
		self.notify.notify_one();
	}

	fn take(&self) -> Coalescer {
		mem::take(&mut *self.pending.lock().unwrap_or_else(PoisonError::into_inner))
	}
}

async fn run_shard(
	service: Arc<BeaconService>,
	shard: usize,
	mut rx: mpsc::Receiver<ChangeEvent>,
	overflow: Arc<Overflow>,
	delay: Duration,
) {
	while let Some(events) = next_batch(&mut rx, &overflow, delay).await {
		for event in events {
			match service.apply_change(&event).await {
				Ok(outcome) => tracing::debug!(
					shard,
					resource_id = %event.resource_id(),
					operation = event.operation.as_str(),
					?outcome,
					"Change applied."
				),
				Err(err) => tracing::warn!(
					shard,
					resource_id = %event.resource_id(),
					operation = event.operation.as_str(),
					error = %err,
					"Failed to apply change."
				),
			}
		}
	}
}

/// Waits for queued or deferred events, gathers what arrives within `delay` and merges the
/// overflow. Returns `None` once the queue is closed and drained.
async fn next_batch(
	rx: &mut mpsc::Receiver<ChangeEvent>,
	overflow: &Overflow,
	delay: Duration,
) -> Option<Vec<ChangeEvent>> {
	let mut batch = Coalescer::default();
	let mut open = true;

	tokio::select! {
		biased;
		received = rx.recv() => match received {
			Some(event) => batch.push(event),
			None => open = false,
		},
		_ = overflow.notify.notified() => {},
	}

	if open && !delay.is_zero() {
		let deadline = Instant::now() + delay;

		while let Ok(Some(event)) = tokio_time::timeout_at(deadline, rx.recv()).await {
			batch.push(event);
		}
	}
	while let Ok(event) = rx.try_recv() {
		batch.push(event);
	}

	batch.extend(overflow.take());

	if !open && batch.is_empty() {
		return None;
	}

	Some(batch.into_events())
}

/// Keeps the newest event per resource, in first-seen order.
#[derive(Debug, Default)]
struct Coalescer {
	events: Vec<ChangeEvent>,
	index: HashMap<String, usize>,
}
impl Coalescer {
	fn push(&mut self, event: ChangeEvent) {
		let resource_id = event.resource_id();

		match self.index.get(&resource_id) {
			Some(slot) => {
				if event.timestamp >= self.events[*slot].timestamp {
					self.events[*slot] = event;
				}
			},
			None => {
				self.index.insert(resource_id, self.events.len());
				self.events.push(event);
			},
		}
	}

	fn extend(&mut self, other: Self) {
		for event in other.events {
			self.push(event);
		}
	}

	fn is_empty(&self) -> bool {
		self.events.is_empty()
	}

	fn into_events(self) -> Vec<ChangeEvent> {
		self.events
	}
}

fn channels(cfg: &Config) -> Vec<String> {
	let mut channels: Vec<String> = cfg
		.enabled_resources()
		.map(|resource| TriggerNames::for_table(&resource.table, &cfg.trigger).channel)
		.collect();

	channels.sort();
	channels.dedup();

	channels
}

fn shard_for(resource_id: &str, shards: usize) -> usize {
	let mut hasher = DefaultHasher::new();

	resource_id.hash(&mut hasher);

	(hasher.finish() % shards.max(1) as u64) as usize
}

fn event_time(timestamp: f64) -> Option<OffsetDateTime> {
	if !timestamp.is_finite() {
		return None;
	}

	let seconds = timestamp.floor();
	let nanos = ((timestamp - seconds) * 1e9).round() as i64;

	OffsetDateTime::from_unix_timestamp(seconds as i64)
		.ok()
		.map(|at| at + time::Duration::nanoseconds(nanos))
}

#[cfg(test)]
mod tests {
	use serde_json::Map;

	use super::*;

	fn event(record_id: &str, operation: ChangeOperation, timestamp: f64) -> ChangeEvent {
		ChangeEvent {
			table_name: "orders".to_string(),
			operation,
			record_id: record_id.to_string(),
			timestamp,
			fields: Map::new(),
			truncated: false,
		}
	}

	#[test]
	fn coalescing_keeps_the_newest_event_per_resource() {
		let mut batch = Coalescer::default();

		batch.push(event("1", ChangeOperation::Insert, 10.0));
		batch.push(event("2", ChangeOperation::Insert, 11.0));
		batch.push(event("1", ChangeOperation::Delete, 12.0));
		batch.push(event("1", ChangeOperation::Update, 9.0));

		let events = batch.into_events();

		assert_eq!(events.len(), 2);
		assert_eq!(events[0].record_id, "1");
		assert_eq!(events[0].operation, ChangeOperation::Delete);
		assert_eq!(events[1].record_id, "2");
	}

	fn single_shard(capacity: usize) -> (Dispatcher, mpsc::Receiver<ChangeEvent>, Arc<Overflow>) {
		let (tx, rx) = mpsc::channel(capacity);
		let overflow = Arc::new(Overflow::default());
		let dispatcher = Dispatcher {
			shards: vec![Shard { tx, overflow: overflow.clone() }],
			workers: Vec::new(),
			tables: HashSet::from(["orders".to_string()]),
			max_bytes: 8_000,
		};

		(dispatcher, rx, overflow)
	}

	fn payload(record_id: &str, operation: ChangeOperation, timestamp: f64) -> String {
		event(record_id, operation, timestamp).encode().expect("Event should encode.")
	}

	#[tokio::test]
	async fn full_queues_defer_events_instead_of_dropping_them() {
		let (dispatcher, mut rx, overflow) = single_shard(1);

		dispatcher.dispatch("orders_changes", &payload("1", ChangeOperation::Insert, 10.0));
		dispatcher.dispatch("orders_changes", &payload("2", ChangeOperation::Insert, 11.0));
		dispatcher.dispatch("orders_changes", &payload("2", ChangeOperation::Delete, 12.0));
		dispatcher.dispatch("orders_changes", &payload("3", ChangeOperation::Update, 13.0));

		let events =
			next_batch(&mut rx, &overflow, Duration::ZERO).await.expect("Queue is still open.");
		let applied: Vec<(&str, ChangeOperation)> =
			events.iter().map(|event| (event.record_id.as_str(), event.operation)).collect();

		assert_eq!(
			applied,
			vec![
				("1", ChangeOperation::Insert),
				("2", ChangeOperation::Delete),
				("3", ChangeOperation::Update),
			]
		);

		drop(dispatcher);

		assert!(next_batch(&mut rx, &overflow, Duration::ZERO).await.is_none());
	}

	#[tokio::test]
	async fn deferred_events_wake_an_idle_worker() {
		let (dispatcher, mut rx, overflow) = single_shard(1);
		let waiting = {
			let overflow = overflow.clone();

			tokio::spawn(async move {
				let events = next_batch(&mut rx, &overflow, Duration::ZERO).await;

				(events, rx)
			})
		};

		tokio::task::yield_now().await;
		overflow.push(event("5", ChangeOperation::Insert, 20.0));

		let (events, _rx) = tokio_time::timeout(Duration::from_secs(1), waiting)
			.await
			.expect("Worker should wake.")
			.expect("Worker should not panic.");
		let events = events.expect("Queue is still open.");

		assert_eq!(events.len(), 1);
		assert_eq!(events[0].record_id, "5");

		drop(dispatcher);
	}

	#[test]
	fn sharding_is_stable_and_bounded() {
		for shards in 1..8 {
			let first = shard_for("orders:42", shards);

			assert!(first < shards);
			assert_eq!(first, shard_for("orders:42", shards));
		}
	}

	#[test]
	fn event_time_keeps_sub_second_precision() {
		let at = event_time(1_700_000_000.25).expect("Timestamp should convert.");

		assert_eq!(at.unix_timestamp(), 1_700_000_000);
		assert_eq!(at.millisecond(), 250);
		assert!(event_time(f64::NAN).is_none());
	}
}
