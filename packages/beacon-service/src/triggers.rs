use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::Map;
use time::OffsetDateTime;

use crate::{BeaconService, Error, Result};
use beacon_config::{Config, ResourceConfig};
use beacon_domain::{
	change_event::{ChangeEvent, ChangeOperation, PayloadLimits},
	identifier::AllowList,
	trigger_sql::{self, TriggerNames},
};
use beacon_storage::{models::InstalledTrigger, sources, triggers as trigger_store};

#[derive(Clone, Debug, Serialize)]
pub struct TriggerTableResult {
	pub table: String,
	pub trigger: String,
	pub channel: String,
	pub success: bool,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub error: Option<String>,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct TriggerReport {
	pub succeeded: u32,
	pub failed: u32,
	pub results: Vec<TriggerTableResult>,
}
impl TriggerReport {
	fn push(&mut self, result: TriggerTableResult) {
		if result.success {
			self.succeeded += 1;
		} else {
			self.failed += 1;
		}

		self.results.push(result);
	}
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerState {
	Installed,
	/// Present in the catalog but disabled with `ALTER TABLE ... DISABLE TRIGGER`.
	Disabled,
	Missing,
}

#[derive(Clone, Debug, Serialize)]
pub struct TableTriggerState {
	pub table: String,
	pub trigger: String,
	pub channel: String,
	pub state: TriggerState,
}

#[derive(Clone, Debug, Serialize)]
pub struct TriggerStatus {
	pub realtime_enabled: bool,
	pub tables: Vec<TableTriggerState>,
	pub missing: Vec<String>,
	/// Installed triggers carrying the prefix that no enabled resource expects.
	pub extra: Vec<String>,
	pub in_sync: bool,
}

#[derive(Clone, Debug, Serialize)]
pub struct TriggerSyncReport {
	pub created: TriggerReport,
	/// Reported only. Use `remove_triggers` to drop them.
	pub extra: Vec<String>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct PublishChangeRequest {
	pub table: String,
	pub operation: ChangeOperation,
	pub record_id: String,
}

#[derive(Clone, Debug, Serialize)]
pub struct PublishChangeResponse {
	pub channel: String,
	pub payload_bytes: usize,
	pub event: ChangeEvent,
}

impl BeaconService {
	/// Installs or replaces the trigger of every enabled resource. A failing table does not stop
	/// the others.
	pub async fn setup_triggers(&self) -> Result<TriggerReport> {
		let cfg = self.cfg();
		let mut report = TriggerReport::default();

		for resource in sorted_resources(&cfg) {
			let result = self.install_trigger(&cfg, resource).await;

			report.push(result);
		}

		tracing::info!(
			succeeded = report.succeeded,
			failed = report.failed,
			"Trigger setup finished."
		);

		Ok(report)
	}

	/// Drops every installed trigger carrying the configured prefix, configured or not.
	pub async fn remove_triggers(&self) -> Result<TriggerReport> {
		let cfg = self.cfg();
		let installed =
			trigger_store::list_installed(&self.db.pool, &cfg.trigger.trigger_prefix).await?;
		let mut report = TriggerReport::default();

		for trigger in installed {
			let channel = TriggerNames::for_table(&trigger.table_name, &cfg.trigger).channel;
			let outcome = match trigger_sql::render_drop_installed(
				&trigger.schema_name,
				&trigger.table_name,
				&trigger.trigger_name,
				&trigger.function_name,
			) {
				Ok(statements) => trigger_store::execute_statements(&self.db, &statements)
					.await
					.map_err(|err| err.to_string()),
				Err(err) => Err(err.to_string()),
			};

			if let Err(err) = &outcome {
				tracing::warn!(
					trigger = %trigger.trigger_name,
					error = %err,
					"Failed to remove trigger."
				);
			}

			report.push(TriggerTableResult {
				table: format!("{}.{}", trigger.schema_name, trigger.table_name),
				trigger: trigger.trigger_name,
				channel,
				success: outcome.is_ok(),
				error: outcome.err(),
			});
		}

		tracing::info!(
			succeeded = report.succeeded,
			failed = report.failed,
			"Trigger removal finished."
		);

		Ok(report)
	}

	/// Compares the triggers enabled resources expect with those in the catalog.
	pub async fn trigger_status(&self) -> Result<TriggerStatus> {
		let cfg = self.cfg();
		let installed =
			trigger_store::list_installed(&self.db.pool, &cfg.trigger.trigger_prefix).await?;

		Ok(diff_triggers(&cfg, &installed))
	}

	/// Creates missing triggers. Extras are listed, never dropped.
	pub async fn sync_triggers(&self) -> Result<TriggerSyncReport> {
		let cfg = self.cfg();
		let status = self.trigger_status().await?;
		let missing: BTreeSet<&str> = status.missing.iter().map(String::as_str).collect();
		let mut created = TriggerReport::default();

		for resource in sorted_resources(&cfg) {
			if missing.contains(resource.table.as_str()) {
				created.push(self.install_trigger(&cfg, resource).await);
			}
		}

		if !status.extra.is_empty() {
			tracing::warn!(extra = ?status.extra, "Installed triggers have no enabled resource.");
		}

		Ok(TriggerSyncReport { created, extra: status.extra })
	}

	/// Emits the change event a trigger would have sent for one row.
	pub async fn publish_change(&self, req: PublishChangeRequest) -> Result<PublishChangeResponse> {
		let cfg = self.cfg();
		let allow_list = AllowList::from_config(&cfg);
		let resource = allow_list.resource(&req.table)?;
		let record_id = req.record_id.trim();

		if record_id.is_empty() {
			return Err(Error::InvalidRequest {
				message: "record_id must not be empty.".to_string(),
			});
		}

		let row = sources::fetch_row(&self.db.pool, &allow_list, &req.table, record_id).await?;
		let record = match (row, req.operation) {
			(Some(row), _) => row.record,
			(None, ChangeOperation::Delete) => Map::new(),
			(None, _) =>
				return Err(Error::NotFound {
					message: format!("Row {record_id} of {} not found.", req.table),
				}),
		};
		let timestamp = OffsetDateTime::now_utc().unix_timestamp_nanos() as f64 / 1e9;
		let event = ChangeEvent::compact(
			&resource.table,
			req.operation,
			record_id,
			timestamp,
			&record,
			&resource.fields,
			&PayloadLimits::from_config(&cfg.trigger),
		);
		let payload = event
			.encode()
			.map_err(|err| Error::InvalidRequest {
				message: format!("Failed to encode event: {err}"),
			})?;
		let channel = TriggerNames::for_table(&resource.table, &cfg.trigger).channel;

		trigger_store::notify(&self.db.pool, &channel, &payload).await?;
		tracing::debug!(
			table = %resource.table,
			record_id,
			operation = req.operation.as_str(),
			truncated = event.truncated,
			"Change published."
		);

		Ok(PublishChangeResponse { channel, payload_bytes: payload.len(), event })
	}

	async fn install_trigger(&self, cfg: &Config, resource: &ResourceConfig) -> TriggerTableResult {
		let names = TriggerNames::for_table(&resource.table, &cfg.trigger);
		let outcome = async {
			if !sources::table_exists(&self.db.pool, &resource.table).await? {
				return Err(Error::NotFound {
					message: format!("Source table {} does not exist.", resource.table),
				});
			}

			let statements = trigger_sql::render_install(resource, &cfg.trigger)?;

			trigger_store::execute_statements(&self.db, &statements).await?;

			Ok(())
		}
		.await;

		match &outcome {
			Ok(()) => tracing::info!(
				table = %resource.table,
				trigger = %names.trigger,
				"Trigger installed."
			),
			Err(err) => {
				tracing::warn!(table = %resource.table, error = %err, "Failed to install trigger.")
			},
		}

		TriggerTableResult {
			table: names.table,
			trigger: names.trigger,
			channel: names.channel,
			success: outcome.is_ok(),
			error: outcome.err().map(|err| err.to_string()),
		}
	}
}

fn sorted_resources(cfg: &Config) -> Vec<&ResourceConfig> {
	let mut resources: Vec<&ResourceConfig> = cfg.enabled_resources().collect();

	resources.sort_by(|lhs, rhs| lhs.table.cmp(&rhs.table));

	resources
}

fn diff_triggers(cfg: &Config, installed: &[InstalledTrigger]) -> TriggerStatus {
	let by_name: BTreeMap<&str, &InstalledTrigger> =
		installed.iter().map(|trigger| (trigger.trigger_name.as_str(), trigger)).collect();
	let mut expected_names = BTreeSet::new();
	let mut tables = Vec::new();
	let mut missing = Vec::new();

	for resource in sorted_resources(cfg) {
		let names = TriggerNames::for_table(&resource.table, &cfg.trigger);
		let state = match by_name.get(names.trigger.as_str()) {
			Some(trigger) if trigger.enabled => TriggerState::Installed,
			Some(_) => TriggerState::Disabled,
			None => {
				missing.push(resource.table.clone());

				TriggerState::Missing
			},
		};

		expected_names.insert(names.trigger.clone());
		tables.push(TableTriggerState {
			table: names.table,
			trigger: names.trigger,
			channel: names.channel,
			state,
		});
	}

	let extra: Vec<String> = installed
		.iter()
		.filter(|trigger| !expected_names.contains(&trigger.trigger_name))
		.map(|trigger| trigger.trigger_name.clone())
		.collect();
	let in_sync = missing.is_empty()
		&& extra.is_empty()
		&& tables.iter().all(|table| table.state == TriggerState::Installed);

	TriggerStatus { realtime_enabled: cfg.trigger.enable_realtime, tables, missing, extra, in_sync }
}

#[cfg(test)]
mod tests {
	use super::*;

	fn config() -> Config {
		toml::from_str(
			r#"
[service]
log_level = "info"

[storage.postgres]
dsn = "postgres://localhost/beacon"
pool_max_conns = 4

[providers.embedding]
provider_id = "local"
api_base = "http://localhost"
api_key = "key"
path = "/embeddings"
model = "m"
dimensions = 3
timeout_ms = 1000

[[resources]]
table = "orders"
fields = ["title"]
tool = "order_lookup"

[[resources]]
table = "invoices"
fields = ["number"]
tool = "invoice_lookup"
"#,
		)
		.expect("Config should parse.")
	}

	fn installed(name: &str, table: &str, enabled: bool) -> InstalledTrigger {
		InstalledTrigger {
			trigger_name: name.to_string(),
			schema_name: "public".to_string(),
			table_name: table.to_string(),
			function_name: format!("{name}_notify"),
			enabled,
		}
	}

	#[test]
	fn status_reports_missing_disabled_and_extra() {
		let status = diff_triggers(&config(), &[
			installed("beacon_orders", "orders", false),
			installed("beacon_legacy", "legacy", true),
		]);

		assert_eq!(status.missing, vec!["invoices".to_string()]);
		assert_eq!(status.extra, vec!["beacon_legacy".to_string()]);
		assert_eq!(status.tables[0].table, "invoices");
		assert_eq!(status.tables[0].state, TriggerState::Missing);
		assert_eq!(status.tables[1].state, TriggerState::Disabled);
		assert!(!status.in_sync);
	}

	#[test]
	fn status_is_in_sync_when_everything_matches() {
		let status = diff_triggers(&config(), &[
			installed("beacon_orders", "orders", true),
			installed("beacon_invoices", "invoices", true),
		]);

		assert!(status.in_sync);
		assert!(status.missing.is_empty());
	}
}
