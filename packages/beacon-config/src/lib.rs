mod error;
mod types;

pub use error::{Error, Result};
pub use types::{
	CONTENT_KINDS, ConfidenceWeights, Config, EmbeddingProviderConfig, MatchHistory, Matcher,
	MatcherScoring, Postgres, Providers, RESOURCE_TYPES, ResourceConfig, Service, Storage, Sync,
	Trigger, VECTOR_TYPES, Vector, VectorTypeWeights,
};

use std::{collections::HashSet, fs, path::Path};

use serde::Serialize;

/// Postgres truncates identifiers longer than this many bytes.
pub const MAX_IDENTIFIER_BYTES: usize = 63;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
	pub valid: bool,
	pub errors: Vec<String>,
	pub warnings: Vec<String>,
}
impl ValidationReport {
	fn error(&mut self, message: impl Into<String>) {
		self.errors.push(message.into());
	}

	fn warning(&mut self, message: impl Into<String>) {
		self.warnings.push(message.into());
	}
}

pub fn load(path: &Path) -> Result<Config> {
	let cfg = read(path)?;

	validate(&cfg)?;

	Ok(cfg)
}

/// Reads and normalizes a config file without validating it.
pub fn read(path: &Path) -> Result<Config> {
	let raw = fs::read_to_string(path)
		.map_err(|err| Error::ReadConfig { path: path.to_path_buf(), source: err })?;
	let mut cfg: Config = toml::from_str(&raw)
		.map_err(|err| Error::ParseConfig { path: path.to_path_buf(), source: err })?;

	normalize(&mut cfg);

	Ok(cfg)
}

pub fn validate(cfg: &Config) -> Result<()> {
	let report = validate_report(cfg);

	if report.valid {
		return Ok(());
	}

	Err(Error::Validation { errors: report.errors })
}

pub fn validate_report(cfg: &Config) -> ValidationReport {
	let mut report = ValidationReport::default();

	validate_storage(cfg, &mut report);
	validate_vector(cfg, &mut report);
	validate_matcher(cfg, &mut report);
	validate_trigger(cfg, &mut report);
	validate_resources(cfg, &mut report);

	report.valid = report.errors.is_empty();

	report
}

/// Accepts `name` or `schema.name`, each part an unquoted Postgres identifier.
pub fn is_sql_identifier(raw: &str) -> bool {
	let mut parts = raw.split('.');
	let valid_part = |part: &str| {
		let mut chars = part.chars();
		let Some(first) = chars.next() else {
			return false;
		};

		part.len() <= MAX_IDENTIFIER_BYTES
			&& (first.is_ascii_alphabetic() || first == '_')
			&& chars.all(|ch| ch.is_ascii_alphanumeric() || ch == '_')
	};

	match (parts.next(), parts.next(), parts.next()) {
		(Some(name), None, None) => valid_part(name),
		(Some(schema), Some(name), None) => valid_part(schema) && valid_part(name),
		_ => false,
	}
}

fn validate_storage(cfg: &Config, report: &mut ValidationReport) {
	if cfg.storage.postgres.dsn.trim().is_empty() {
		report.error("storage.postgres.dsn must be non-empty.");
	}
	if cfg.storage.postgres.pool_max_conns == 0 {
		report.error("storage.postgres.pool_max_conns must be greater than zero.");
	}
	if cfg.providers.embedding.dimensions == 0 {
		report.error("providers.embedding.dimensions must be greater than zero.");
	}
	if cfg.providers.embedding.model.trim().is_empty() {
		report.error("providers.embedding.model must be non-empty.");
	}
	if cfg.providers.embedding.timeout_ms == 0 {
		report.error("providers.embedding.timeout_ms must be greater than zero.");
	}
}

fn validate_vector(cfg: &Config, report: &mut ValidationReport) {
	let vector = &cfg.vector;

	if !vector.similarity_threshold.is_finite()
		|| !(0.0..=1.0).contains(&vector.similarity_threshold)
	{
		report.error("vector.similarity_threshold must be in the range 0.0-1.0.");
	}

	for (label, value) in [
		("vector.max_results", u64::from(vector.max_results)),
		("vector.batch_size", u64::from(vector.batch_size)),
		("vector.timeout_seconds", vector.timeout_seconds),
		("vector.max_concurrent_tasks", u64::from(vector.max_concurrent_tasks)),
		("vector.progress_interval", u64::from(vector.progress_interval)),
	] {
		if value == 0 {
			report.error(format!("{label} must be greater than zero."));
		}
	}
}

fn validate_matcher(cfg: &Config, report: &mut ValidationReport) {
	let matcher = &cfg.matcher;
	let confidence = &matcher.confidence_weights;

	for (label, weight) in [
		("matcher.confidence_weights.similarity", confidence.similarity),
		("matcher.confidence_weights.usage", confidence.usage),
		("matcher.confidence_weights.performance", confidence.performance),
		("matcher.confidence_weights.context", confidence.context),
	] {
		check_weight(label, weight, report);
	}

	let confidence_sum = confidence.sum();

	if confidence_sum > 1.0 + f32::EPSILON * 4.0 {
		report.error(format!(
			"matcher.confidence_weights must sum to 1.0 or less (got {confidence_sum:.3})."
		));
	} else if (confidence_sum - 1.0).abs() > 1e-3 {
		report.warning(format!(
			"matcher.confidence_weights sum to {confidence_sum:.3}; confidence scores will not reach 1.0."
		));
	}

	let vector_weights = &matcher.vector_type_weights;

	for (label, weight) in [
		("matcher.vector_type_weights.name", vector_weights.name),
		("matcher.vector_type_weights.description", vector_weights.description),
		("matcher.vector_type_weights.capabilities", vector_weights.capabilities),
		("matcher.vector_type_weights.composite", vector_weights.composite),
	] {
		check_weight(label, weight, report);
	}

	if (vector_weights.sum() - 1.0).abs() > 1e-3 {
		report.warning(format!(
			"matcher.vector_type_weights sum to {:.3} rather than 1.0.",
			vector_weights.sum()
		));
	}

	for (resource_type, weights) in &matcher.resource_type_weights {
		if !RESOURCE_TYPES.contains(&resource_type.as_str()) {
			report.error(format!(
				"matcher.resource_type_weights has unknown resource type {resource_type:?}."
			));
		}

		for (vector_type, weight) in weights {
			if !VECTOR_TYPES.contains(&vector_type.as_str()) {
				report.error(format!(
					"matcher.resource_type_weights.{resource_type} has unknown vector type {vector_type:?}."
				));
			}

			check_weight(
				&format!("matcher.resource_type_weights.{resource_type}.{vector_type}"),
				*weight,
				report,
			);
		}
	}

	if !(matcher.scoring.usage_half_saturation.is_finite()
		&& matcher.scoring.usage_half_saturation > 0.0)
	{
		report.error("matcher.scoring.usage_half_saturation must be greater than zero.");
	}
	if !(matcher.scoring.performance_target_ms.is_finite()
		&& matcher.scoring.performance_target_ms > 0.0)
	{
		report.error("matcher.scoring.performance_target_ms must be greater than zero.");
	}
	if matcher.history.enabled && matcher.history.queue_capacity == 0 {
		report.error("matcher.history.queue_capacity must be greater than zero when enabled.");
	}
}

fn validate_trigger(cfg: &Config, report: &mut ValidationReport) {
	let trigger = &cfg.trigger;

	for (label, prefix) in [
		("trigger.trigger_prefix", &trigger.trigger_prefix),
		("trigger.notify_channel_prefix", &trigger.notify_channel_prefix),
	] {
		if !is_sql_identifier(prefix) || prefix.contains('.') {
			report.error(format!("{label} must be a plain SQL identifier."));
		}
	}

	for (label, value) in [
		("trigger.max_payload_bytes", trigger.max_payload_bytes),
		("trigger.max_payload_fields", trigger.max_payload_fields),
		("trigger.large_field_chars", trigger.large_field_chars),
		("trigger.workers", trigger.workers),
		("trigger.queue_capacity", trigger.queue_capacity),
	] {
		if value == 0 {
			report.error(format!("{label} must be greater than zero."));
		}
	}

	// pg_notify rejects payloads of 8000 bytes or more.
	if trigger.max_payload_bytes >= 8_000 {
		report.error("trigger.max_payload_bytes must be less than 8000.");
	}
	if trigger.enable_realtime && trigger.batch_delay_ms == 0 {
		report.warning("trigger.batch_delay_ms is zero; change events will not be coalesced.");
	}
}

fn validate_resources(cfg: &Config, report: &mut ValidationReport) {
	let mut seen_tables = HashSet::new();

	for (index, resource) in cfg.resources.iter().enumerate() {
		let label = if resource.table.trim().is_empty() {
			format!("resources[{index}]")
		} else {
			format!("resources[{index}] ({})", resource.table)
		};

		if resource.table.trim().is_empty() {
			report.error(format!("{label}.table must be non-empty."));
		} else if !is_sql_identifier(&resource.table) {
			report.error(format!("{label}.table must be a plain SQL identifier."));
		}
		if resource.fields.is_empty() {
			report.error(format!("{label}.fields must be non-empty."));
		}

		for field in &resource.fields {
			if !is_sql_identifier(field) || field.contains('.') {
				report.error(format!(
					"{label}.fields entry {field:?} must be a plain column name."
				));
			}
		}

		if resource.tool.trim().is_empty() {
			report.error(format!("{label}.tool must be non-empty."));
		}
		if !is_sql_identifier(&resource.id_column) || resource.id_column.contains('.') {
			report.error(format!("{label}.id_column must be a plain column name."));
		}
		if !RESOURCE_TYPES.contains(&resource.resource_type.as_str()) {
			report.error(format!(
				"{label}.resource_type must be one of {}.",
				RESOURCE_TYPES.join(", ")
			));
		}
		if !CONTENT_KINDS.contains(&resource.kind.as_str()) {
			report.error(format!("{label}.kind must be one of {}.", CONTENT_KINDS.join(", ")));
		}
		if resource.description.as_deref().map(|text| text.trim().is_empty()).unwrap_or(true) {
			report.warning(format!("{label} has no description."));
		}
		if !resource.enabled {
			report.warning(format!("{label} is disabled."));

			continue;
		}
		if !seen_tables.insert(resource.table.as_str()) {
			report.error(format!("{label}.table is configured more than once."));
		}
	}

	if cfg.enabled_resources().next().is_none() {
		report.warning("No enabled resources are configured.");
	}
}

fn check_weight(label: &str, weight: f32, report: &mut ValidationReport) {
	if !weight.is_finite() {
		report.error(format!("{label} must be a finite number."));
	} else if weight < 0.0 {
		report.error(format!("{label} must be zero or greater."));
	}
}

fn normalize(cfg: &mut Config) {
	for resource in &mut cfg.resources {
		resource.table = resource.table.trim().to_string();
		resource.tool = resource.tool.trim().to_string();
		resource.fields = resource
			.fields
			.iter()
			.map(|field| field.trim().to_string())
			.filter(|field| !field.is_empty())
			.collect();

		if resource.description.as_deref().map(|text| text.trim().is_empty()).unwrap_or(false) {
			resource.description = None;
		}
	}
}
