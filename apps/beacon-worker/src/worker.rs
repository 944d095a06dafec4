use std::{sync::Arc, time::Duration};

use color_eyre::Result;
use tokio::{task::JoinHandle, time};

use beacon_service::{BeaconService, CancelFlag, Error, IncrementalUpdater, SyncRequest};

/// Runs the change listener and the periodic sync until ctrl-c. SIGHUP reloads the configuration
/// file; both loops pick up the new snapshot on their next pass.
pub async fn run(service: Arc<BeaconService>) -> Result<()> {
	let shutdown = CancelFlag::new();

	if service.cfg().trigger.enable_realtime {
		match service.sync_triggers().await {
			Ok(report) => tracing::info!(
				created = report.created.succeeded,
				failed = report.created.failed,
				extra = report.extra.len(),
				"Triggers reconciled."
			),
			Err(err) => tracing::warn!(error = %err, "Trigger reconciliation failed."),
		}
	}

	let updater = {
		let updater = IncrementalUpdater::new(service.clone());
		let shutdown = shutdown.clone();

		tokio::spawn(async move { updater.run(shutdown).await })
	};
	let syncer = tokio::spawn(periodic_sync(service.clone(), shutdown.clone()));

	wait_for_shutdown(&service).await?;
	tracing::info!("Shutting down.");
	shutdown.cancel();

	join("Incremental updater", updater).await;
	join("Periodic sync", syncer).await;

	Ok(())
}

async fn periodic_sync(
	service: Arc<BeaconService>,
	shutdown: CancelFlag,
) -> beacon_service::Result<()> {
	let mut config_rx = service.config.subscribe();

	loop {
		let interval = service.cfg().sync.interval_seconds;

		if interval == 0 {
			tokio::select! {
				_ = shutdown.cancelled() => return Ok(()),
				changed = config_rx.changed() => if changed.is_err() {
					return Ok(());
				},
			}

			continue;
		}

		match service.sync(SyncRequest::default(), &shutdown).await {
			Ok(report) => tracing::info!(
				operation_id = %report.operation_id,
				added = report.added,
				modified = report.modified,
				deleted = report.deleted,
				failed = report.failed,
				cancelled = report.cancelled,
				"Periodic sync finished."
			),
			Err(Error::Conflict { message }) => tracing::info!(%message, "Periodic sync skipped."),
			Err(err) => tracing::error!(error = %err, "Periodic sync failed."),
		}

		tokio::select! {
			_ = shutdown.cancelled() => return Ok(()),
			_ = time::sleep(Duration::from_secs(interval)) => {},
			changed = config_rx.changed() => if changed.is_err() {
				return Ok(());
			},
		}
	}
}

#[cfg(unix)]
async fn wait_for_shutdown(service: &BeaconService) -> Result<()> {
	use tokio::signal::unix::{SignalKind, signal};

	let mut hangup = signal(SignalKind::hangup())?;

	loop {
		tokio::select! {
			result = tokio::signal::ctrl_c() => return Ok(result?),
			_ = hangup.recv() => {
				if let Err(err) = service.config.reload() {
					tracing::error!(
						error = %err,
						"Configuration reload rejected. Keeping the previous configuration."
					);
				}
			},
		}
	}
}

#[cfg(not(unix))]
async fn wait_for_shutdown(_service: &BeaconService) -> Result<()> {
	tokio::signal::ctrl_c().await?;

	Ok(())
}

async fn join(name: &str, handle: JoinHandle<beacon_service::Result<()>>) {
	match time::timeout(Duration::from_secs(30), handle).await {
		Ok(Ok(Ok(()))) => {},
		Ok(Ok(Err(err))) =>
			tracing::error!(task = name, error = %err, "Task exited with an error."),
		Ok(Err(err)) => tracing::error!(task = name, error = %err, "Task panicked."),
		Err(_) => tracing::warn!(task = name, "Task did not stop in time."),
	}
}
