pub mod config_handle;
pub mod embed;
pub mod history;
pub mod incremental;
pub mod matcher;
pub mod operations;
pub mod registry;
pub mod sync;
pub mod time_serde;
pub mod triggers;
pub mod vectorize;

mod error;

pub use config_handle::ConfigHandle;
pub use error::{Error, Result};
pub use history::HistorySink;
pub use incremental::{ChangeOutcome, IncrementalUpdater};
pub use matcher::{MatchItem, MatchRequest, MatchResponse};
pub use operations::{CleanupReport, OperationView};
pub use registry::{
	RecordUsageRequest, RegisterResourceRequest, RegisterResourceResponse, ResourceView,
};
pub use sync::{CancelFlag, SyncMode, SyncReport, SyncRequest};
pub use triggers::{
	PublishChangeRequest, PublishChangeResponse, TableTriggerState, TriggerReport, TriggerState,
	TriggerStatus, TriggerSyncReport, TriggerTableResult,
};
pub use vectorize::{VectorizeBatchRequest, VectorizeBatchReport, VectorizeOutcome, VectorizeResult};

use std::{future::Future, pin::Pin, sync::Arc};

use tokio::sync::Mutex;

use beacon_config::{Config, EmbeddingProviderConfig};
use beacon_providers::embedding;
use beacon_storage::db::Db;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

pub trait EmbeddingProvider
where
	Self: Send + Sync,
{
	fn embed<'a>(
		&'a self,
		cfg: &'a EmbeddingProviderConfig,
		texts: &'a [String],
	) -> BoxFuture<'a, beacon_providers::Result<Vec<Vec<f32>>>>;
}

#[derive(Clone)]
pub struct Providers {
	pub embedding: Arc<dyn EmbeddingProvider>,
}
impl Providers {
	pub fn new(embedding: Arc<dyn EmbeddingProvider>) -> Self {
		Self { embedding }
	}
}
impl Default for Providers {
	fn default() -> Self {
		Self { embedding: Arc::new(HttpEmbedding) }
	}
}

pub struct BeaconService {
	pub config: ConfigHandle,
	pub db: Db,
	pub providers: Providers,
	history: HistorySink,
	sync_gate: Mutex<()>,
}
impl BeaconService {
	/// Builds the service. When match history is enabled this spawns the history writer, so it
	/// must run inside a Tokio runtime.
	pub fn new(config: ConfigHandle, db: Db) -> Self {
		Self::with_providers(config, db, Providers::default())
	}

	pub fn with_providers(config: ConfigHandle, db: Db, providers: Providers) -> Self {
		let cfg = config.current();
		let history = if cfg.matcher.history.enabled {
			HistorySink::spawn(db.clone(), cfg.matcher.history.queue_capacity as usize)
		} else {
			HistorySink::disabled()
		};

		Self { config, db, providers, history, sync_gate: Mutex::new(()) }
	}

	pub fn cfg(&self) -> Arc<Config> {
		self.config.current()
	}
}

struct HttpEmbedding;

impl EmbeddingProvider for HttpEmbedding {
	fn embed<'a>(
		&'a self,
		cfg: &'a EmbeddingProviderConfig,
		texts: &'a [String],
	) -> BoxFuture<'a, beacon_providers::Result<Vec<Vec<f32>>>> {
		Box::pin(embedding::embed(cfg, texts))
	}
}

/// Identifies the embedding space a stored vector belongs to.
pub(crate) fn embedding_version(cfg: &Config) -> String {
	format!(
		"{}:{}:{}",
		cfg.providers.embedding.provider_id,
		cfg.providers.embedding.model,
		cfg.providers.embedding.dimensions
	)
}
