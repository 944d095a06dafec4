use std::{
	env, fs,
	path::PathBuf,
	sync::atomic::{AtomicU64, Ordering},
	time::{SystemTime, UNIX_EPOCH},
};

use beacon_config::{Config, Error, ResourceConfig};

const SAMPLE_CONFIG_TOML: &str = include_str!("fixtures/sample_config.toml");

fn write_temp_config(payload: &str) -> PathBuf {
	static COUNTER: AtomicU64 = AtomicU64::new(0);

	let nanos = SystemTime::now()
		.duration_since(UNIX_EPOCH)
		.expect("System time must be valid.")
		.as_nanos();
	let ordinal = COUNTER.fetch_add(1, Ordering::SeqCst);
	let pid = std::process::id();
	let mut path = env::temp_dir();

	path.push(format!("beacon_config_test_{nanos}_{pid}_{ordinal}.toml"));

	fs::write(&path, payload).expect("Failed to write test config.");

	path
}

fn base_config() -> Config {
	toml::from_str(SAMPLE_CONFIG_TOML).expect("Failed to parse sample config.")
}

fn resource(table: &str) -> ResourceConfig {
	ResourceConfig {
		table: table.to_string(),
		fields: vec!["name".to_string()],
		tool: "lookup".to_string(),
		description: Some("Lookup table".to_string()),
		enabled: true,
		id_column: "id".to_string(),
		resource_type: "database".to_string(),
		kind: "auto".to_string(),
	}
}

#[test]
fn sample_config_loads_and_validates() {
	let path = write_temp_config(SAMPLE_CONFIG_TOML);
	let result = beacon_config::load(&path);

	fs::remove_file(&path).expect("Failed to remove test config.");

	let cfg = result.expect("Sample config should be valid.");

	assert_eq!(cfg.resources.len(), 2);
	assert_eq!(cfg.resources[0].id_column, "id");
	assert!(cfg.resources[1].enabled);
	assert_eq!(cfg.matcher.resource_type_weights["database"]["composite"], 1.0);
}

#[test]
fn omitted_sections_use_defaults() {
	let cfg = base_config();

	assert_eq!(cfg.vector.progress_interval, 5);
	assert_eq!(cfg.trigger.max_payload_bytes, 7_000);
	assert_eq!(cfg.trigger.large_field_chars, 100);
	assert_eq!(cfg.matcher.scoring.performance_target_ms, 1_000.0);
}

#[test]
fn duplicate_enabled_tables_are_rejected() {
	let mut cfg = base_config();

	cfg.resources = vec![resource("orders"), resource("orders")];

	let report = beacon_config::validate_report(&cfg);

	assert!(!report.valid);
	assert!(
		report.errors.iter().any(|error| error.contains("configured more than once")),
		"Unexpected errors: {:?}",
		report.errors
	);
}

#[test]
fn disabled_duplicate_is_only_a_warning() {
	let mut cfg = base_config();
	let mut disabled = resource("orders");

	disabled.enabled = false;
	cfg.resources = vec![resource("orders"), disabled];

	let report = beacon_config::validate_report(&cfg);

	assert!(report.valid, "Unexpected errors: {:?}", report.errors);
	assert!(report.warnings.iter().any(|warning| warning.contains("is disabled")));
}

#[test]
fn missing_table_fields_and_tool_are_reported_together() {
	let mut cfg = base_config();
	let mut broken = resource("");

	broken.fields.clear();
	broken.tool = String::new();
	cfg.resources = vec![broken];

	let report = beacon_config::validate_report(&cfg);

	assert!(!report.valid);
	assert!(report.errors.iter().any(|error| error.ends_with(".table must be non-empty.")));
	assert!(report.errors.iter().any(|error| error.ends_with(".fields must be non-empty.")));
	assert!(report.errors.iter().any(|error| error.ends_with(".tool must be non-empty.")));
}

#[test]
fn unsafe_identifiers_are_rejected() {
	let mut cfg = base_config();
	let mut hostile = resource("orders; DROP TABLE users");

	hostile.fields = vec!["name\"".to_string()];
	cfg.resources = vec![hostile];

	let report = beacon_config::validate_report(&cfg);

	assert!(report.errors.iter().any(|error| error.contains("must be a plain SQL identifier")));
	assert!(report.errors.iter().any(|error| error.contains("must be a plain column name")));
}

#[test]
fn similarity_threshold_must_be_in_range() {
	let mut cfg = base_config();

	cfg.vector.similarity_threshold = 1.5;

	let err = beacon_config::validate(&cfg).expect_err("Expected threshold validation error.");

	assert!(
		err.to_string().contains("vector.similarity_threshold must be in the range 0.0-1.0."),
		"Unexpected error: {err}"
	);
}

#[test]
fn confidence_weights_may_not_exceed_one() {
	let mut cfg = base_config();

	cfg.matcher.confidence_weights.usage = 0.5;

	let report = beacon_config::validate_report(&cfg);

	assert!(!report.valid);
	assert!(report.errors.iter().any(|error| error.contains("must sum to 1.0 or less")));
}

#[test]
fn confidence_weights_below_one_only_warn() {
	let mut cfg = base_config();

	cfg.matcher.confidence_weights.context = 0.0;

	let report = beacon_config::validate_report(&cfg);

	assert!(report.valid, "Unexpected errors: {:?}", report.errors);
	assert!(report.warnings.iter().any(|warning| warning.contains("will not reach 1.0")));
}

#[test]
fn unknown_weight_keys_are_rejected() {
	let mut cfg = base_config();

	cfg.matcher
		.resource_type_weights
		.entry("spreadsheet".to_string())
		.or_default()
		.insert("title".to_string(), 0.5);

	let report = beacon_config::validate_report(&cfg);

	assert!(report.errors.iter().any(|error| error.contains("unknown resource type")));
	assert!(report.errors.iter().any(|error| error.contains("unknown vector type")));
}

#[test]
fn payload_threshold_stays_below_notify_limit() {
	let mut cfg = base_config();

	cfg.trigger.max_payload_bytes = 8_000;

	let err = beacon_config::validate(&cfg).expect_err("Expected payload validation error.");

	assert!(matches!(err, Error::Validation { .. }));
}

#[test]
fn blank_description_is_normalized_away() {
	let payload = SAMPLE_CONFIG_TOML.replace(
		"description = \"Knowledge base documents\"",
		"description = \"   \"",
	);
	let path = write_temp_config(&payload);
	let result = beacon_config::load(&path);

	fs::remove_file(&path).expect("Failed to remove test config.");

	let cfg = result.expect("Config should still be valid.");

	assert!(cfg.resources[1].description.is_none());
}

#[test]
fn identifiers_allow_schema_qualified_tables() {
	assert!(beacon_config::is_sql_identifier("public.orders"));
	assert!(beacon_config::is_sql_identifier("_staging"));
	assert!(!beacon_config::is_sql_identifier("1orders"));
	assert!(!beacon_config::is_sql_identifier("a.b.c"));
	assert!(!beacon_config::is_sql_identifier(""));
}
