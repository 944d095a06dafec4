pub mod worker;

use std::{path::PathBuf, sync::Arc, time::Duration};

use clap::{Parser, Subcommand, ValueEnum};
use color_eyre::eyre;
use serde::Serialize;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use beacon_domain::{change_event::ChangeOperation, resource::ResourceType, scoring::MatchContext};
use beacon_service::{
	BeaconService, CancelFlag, ConfigHandle, MatchRequest, PublishChangeRequest, SyncRequest,
	VectorizeBatchRequest,
};
use beacon_storage::db::Db;

#[derive(Debug, Parser)]
#[command(
	version = beacon_cli::VERSION,
	rename_all = "kebab",
	styles = beacon_cli::styles(),
)]
pub struct Args {
	#[arg(long, short = 'c', value_name = "FILE")]
	pub config: PathBuf,
	#[command(subcommand)]
	pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
	/// Listen for change events and run the periodic sync until interrupted.
	Run,
	/// Run one sync pass against the configured source tables.
	Sync {
		/// Rebuild every source-backed resource from scratch.
		#[arg(long)]
		full: bool,
	},
	/// Match a free-text query against the registry.
	Match {
		query: String,
		#[arg(long)]
		top_k: Option<u32>,
		#[arg(long, default_value_t = 0.0)]
		min_confidence: f32,
		/// Restrict results to these resource types. Repeatable.
		#[arg(long = "type", value_name = "TYPE")]
		resource_types: Vec<ResourceType>,
		#[arg(long = "tag")]
		tags: Vec<String>,
		#[arg(long = "tool")]
		tools: Vec<String>,
	},
	/// Manage change-capture triggers on the source tables.
	Triggers {
		#[command(subcommand)]
		action: TriggerAction,
	},
	/// Emit a change event for a source row without a trigger.
	Publish {
		table: String,
		#[arg(value_enum)]
		operation: Operation,
		record_id: String,
	},
	/// Vectorize the given resources, or the pending and failed queue when none are given.
	Vectorize {
		resource_ids: Vec<String>,
		#[arg(long)]
		limit: Option<u32>,
	},
	/// Remove orphaned vectors and expired tombstones.
	Cleanup,
	/// Show one operation record, or the most recent ones.
	Operations {
		#[arg(long)]
		id: Option<Uuid>,
		#[arg(long, default_value_t = 20)]
		limit: u32,
	},
	/// Check the configuration file and print the validation report.
	Validate,
}

#[derive(Clone, Copy, Debug, Subcommand)]
pub enum TriggerAction {
	Setup,
	Remove,
	Status,
	/// Install missing triggers and report unexpected ones.
	Sync,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum Operation {
	Insert,
	Update,
	Delete,
}
impl From<Operation> for ChangeOperation {
	fn from(operation: Operation) -> Self {
		match operation {
			Operation::Insert => Self::Insert,
			Operation::Update => Self::Update,
			Operation::Delete => Self::Delete,
		}
	}
}

pub async fn run(args: Args) -> color_eyre::Result<()> {
	if let Command::Validate = args.command {
		return validate(&args.config);
	}

	let config = ConfigHandle::from_path(&args.config)?;
	let cfg = config.current();

	init_tracing(&cfg.service.log_level);

	let acquire_timeout = Duration::from_secs(cfg.vector.timeout_seconds);
	let db = Db::connect(&cfg.storage.postgres, acquire_timeout).await?;

	db.ensure_schema().await?;

	let service = Arc::new(BeaconService::new(config, db));

	match args.command {
		Command::Run => worker::run(service).await,
		Command::Sync { full } => {
			let cancel = CancelFlag::new();
			let sync = service.sync(SyncRequest { force_full_sync: full }, &cancel);

			tokio::pin!(sync);

			let finished = tokio::select! {
				report = &mut sync => Some(report?),
				_ = tokio::signal::ctrl_c() => None,
			};
			let report = match finished {
				Some(report) => report,
				None => {
					tracing::info!("Interrupt received. Cancelling sync.");
					cancel.cancel();

					sync.await?
				},
			};

			print_json(&report)
		},
		Command::Match { query, top_k, min_confidence, resource_types, tags, tools } => {
			let context =
				(!tags.is_empty() || !tools.is_empty()).then_some(MatchContext { tags, tools });
			let response = service
				.match_resources(MatchRequest {
					query,
					top_k,
					min_confidence,
					resource_types: (!resource_types.is_empty()).then_some(resource_types),
					context,
				})
				.await?;

			print_json(&response)
		},
		Command::Triggers { action } => match action {
			TriggerAction::Setup => print_json(&service.setup_triggers().await?),
			TriggerAction::Remove => print_json(&service.remove_triggers().await?),
			TriggerAction::Status => print_json(&service.trigger_status().await?),
			TriggerAction::Sync => print_json(&service.sync_triggers().await?),
		},
		Command::Publish { table, operation, record_id } => {
			let response = service
				.publish_change(PublishChangeRequest {
					table,
					operation: operation.into(),
					record_id,
				})
				.await?;

			print_json(&response)
		},
		Command::Vectorize { resource_ids, limit } => {
			let resource_ids = (!resource_ids.is_empty()).then_some(resource_ids);
			let report =
				service.vectorize_batch(VectorizeBatchRequest { resource_ids, limit }).await?;

			print_json(&report)
		},
		Command::Cleanup => print_json(&service.cleanup().await?),
		Command::Operations { id: Some(id), .. } => print_json(&service.get_operation(id).await?),
		Command::Operations { id: None, limit } =>
			print_json(&service.list_operations(limit).await?),
		Command::Validate => Ok(()),
	}
}

fn validate(path: &std::path::Path) -> color_eyre::Result<()> {
	let cfg = beacon_config::read(path)?;
	let report = beacon_config::validate_report(&cfg);

	print_json(&report)?;

	if !report.valid {
		return Err(eyre::eyre!("Configuration has {} error(s).", report.errors.len()));
	}

	Ok(())
}

fn init_tracing(log_level: &str) {
	let filter = EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("info"));

	tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn print_json<T>(value: &T) -> color_eyre::Result<()>
where
	T: Serialize,
{
	println!("{}", serde_json::to_string_pretty(value)?);

	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn match_flags_parse_into_filters() {
		let args = Args::try_parse_from([
			"beacon-worker",
			"-c",
			"beacon.toml",
			"match",
			"monthly invoices",
			"--top-k",
			"3",
			"--type",
			"api",
			"--type",
			"database",
			"--tag",
			"billing",
		])
		.expect("Arguments should parse.");

		let Command::Match { query, top_k, resource_types, tags, tools, .. } = args.command else {
			panic!("Expected the match command.");
		};

		assert_eq!(query, "monthly invoices");
		assert_eq!(top_k, Some(3));
		assert_eq!(resource_types, vec![ResourceType::Api, ResourceType::Database]);
		assert_eq!(tags, vec!["billing"]);
		assert!(tools.is_empty());
	}

	#[test]
	fn unknown_resource_types_are_rejected() {
		let result = Args::try_parse_from([
			"beacon-worker",
			"-c",
			"beacon.toml",
			"match",
			"q",
			"--type",
			"spreadsheet",
		]);

		assert!(result.is_err());
	}

	#[test]
	fn trigger_and_publish_commands_parse() {
		let args = Args::try_parse_from(["beacon-worker", "-c", "b.toml", "triggers", "status"])
			.expect("Arguments should parse.");

		assert!(matches!(args.command, Command::Triggers { action: TriggerAction::Status }));

		let args = Args::try_parse_from([
			"beacon-worker",
			"-c",
			"b.toml",
			"publish",
			"orders",
			"delete",
			"42",
		])
		.expect("Arguments should parse.");

		let Command::Publish { table, operation, record_id } = args.command else {
			panic!("Expected the publish command.");
		};

		assert_eq!(table, "orders");
		assert_eq!(ChangeOperation::from(operation), ChangeOperation::Delete);
		assert_eq!(record_id, "42");
	}

	#[test]
	fn full_sync_flag_defaults_off() {
		let args = Args::try_parse_from(["beacon-worker", "-c", "b.toml", "sync"])
			.expect("Arguments should parse.");

		assert!(matches!(args.command, Command::Sync { full: false }));
	}
}
