use std::{
	path::{Path, PathBuf},
	sync::Arc,
};

use tokio::sync::watch;

use crate::{Error, Result};
use beacon_config::{Config, ValidationReport};

/// Shared access to the current configuration snapshot. Reloads publish a new snapshot; readers
/// holding an older `Arc<Config>` keep a consistent view until they ask again.
#[derive(Clone)]
pub struct ConfigHandle {
	tx: Arc<watch::Sender<Arc<Config>>>,
	path: Option<PathBuf>,
}
impl ConfigHandle {
	pub fn new(cfg: Config) -> Self {
		let (tx, _rx) = watch::channel(Arc::new(cfg));

		Self { tx: Arc::new(tx), path: None }
	}

	pub fn from_path(path: &Path) -> Result<Self> {
		let cfg = beacon_config::load(path)?;
		let mut handle = Self::new(cfg);

		handle.path = Some(path.to_path_buf());

		Ok(handle)
	}

	pub fn current(&self) -> Arc<Config> {
		self.tx.borrow().clone()
	}

	pub fn subscribe(&self) -> watch::Receiver<Arc<Config>> {
		self.tx.subscribe()
	}

	/// Publishes `cfg` if it validates. The previous snapshot stays in place otherwise.
	pub fn replace(&self, cfg: Config) -> Result<ValidationReport> {
		let report = beacon_config::validate_report(&cfg);

		if !report.valid {
			return Err(Error::InvalidConfig { errors: report.errors });
		}

		self.tx.send_replace(Arc::new(cfg));

		Ok(report)
	}

	/// Re-reads the file this handle was loaded from.
	pub fn reload(&self) -> Result<ValidationReport> {
		let Some(path) = self.path.as_deref() else {
			return Err(Error::InvalidRequest {
				message: "Configuration was not loaded from a file.".to_string(),
			});
		};
		let cfg = beacon_config::read(path)?;
		let report = self.replace(cfg)?;

		tracing::info!(
			path = %path.display(),
			warnings = report.warnings.len(),
			"Configuration reloaded."
		);

		Ok(report)
	}
}
