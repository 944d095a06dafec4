use tokio::sync::mpsc::{self, error::TrySendError};

use beacon_storage::{db::Db, history, models::MatchHistoryEntry};

/// Best-effort match history writer. Sends never wait; entries are dropped when the queue is full.
#[derive(Clone, Debug)]
pub struct HistorySink {
	tx: Option<mpsc::Sender<MatchHistoryEntry>>,
}
impl HistorySink {
	/// Spawns the writer task. Must be called inside a Tokio runtime.
	pub fn spawn(db: Db, capacity: usize) -> Self {
		let (tx, mut rx) = mpsc::channel::<MatchHistoryEntry>(capacity.max(1));

		tokio::spawn(async move {
			while let Some(entry) = rx.recv().await {
				if let Err(err) = history::insert_match_history(&db.pool, &entry).await {
					tracing::warn!(
						error = %err,
						history_id = %entry.history_id,
						"Failed to write match history."
					);
				}
			}
		});

		Self { tx: Some(tx) }
	}

	pub fn disabled() -> Self {
		Self { tx: None }
	}

	pub fn is_enabled(&self) -> bool {
		self.tx.is_some()
	}

	/// Returns whether the entry was queued.
	pub fn record(&self, entry: MatchHistoryEntry) -> bool {
		let Some(tx) = self.tx.as_ref() else {
			return false;
		};

		match tx.try_send(entry) {
			Ok(()) => true,
			Err(TrySendError::Full(entry)) => {
				tracing::debug!(
					history_id = %entry.history_id,
					"Match history queue full. Dropping entry."
				);

				false
			},
			Err(TrySendError::Closed(_)) => false,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn disabled_sink_drops_everything() {
		let sink = HistorySink::disabled();
		let entry = MatchHistoryEntry {
			history_id: uuid::Uuid::new_v4(),
			query: "orders".to_string(),
			resource_types: Vec::new(),
			top_k: 5,
			min_confidence: 0.0,
			result_ids: Vec::new(),
			top_score: None,
			duration_ms: 1,
			created_at: time::OffsetDateTime::now_utc(),
		};

		assert!(!sink.is_enabled());
		assert!(!sink.record(entry));
	}
}
