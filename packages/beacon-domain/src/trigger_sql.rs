//! DDL for the row-level change triggers. Each statement is returned separately so callers can run
//! them one at a time.

use crate::{
	change_event::is_large_text_field,
	identifier::{IdentifierError, quote_identifier},
};
use beacon_config::{ResourceConfig, Trigger};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TriggerNames {
	pub table: String,
	pub trigger: String,
	pub function: String,
	pub channel: String,
}
impl TriggerNames {
	pub fn for_table(table: &str, cfg: &Trigger) -> Self {
		let flat = table.replace('.', "_");

		Self {
			table: table.to_string(),
			trigger: format!("{}{flat}", cfg.trigger_prefix),
			function: format!("{}{flat}_notify", cfg.trigger_prefix),
			channel: format!("{}{flat}", cfg.notify_channel_prefix),
		}
	}
}

pub fn render_install(
	resource: &ResourceConfig,
	cfg: &Trigger,
) -> Result<Vec<String>, IdentifierError> {
	let names = TriggerNames::for_table(&resource.table, cfg);
	let table = quote_identifier(&resource.table)?;
	let trigger = quote_identifier(&names.trigger)?;
	let function = quote_identifier(&names.function)?;

	// Channel names are bounded like any other identifier.
	quote_identifier(&names.channel)?;

	let id_column = quote_identifier(&resource.id_column)?;
	let mut field_pairs = Vec::new();

	for field in resource.fields.iter().take(cfg.max_payload_fields as usize) {
		let column = quote_identifier(field)?;
		let value = if is_large_text_field(field) {
			format!("left(rec.{column}::text, {})", cfg.large_field_chars)
		} else {
			format!("rec.{column}")
		};

		field_pairs.push(format!("'{field}', {value}"));
	}

	let header = format!(
		"'table_name', '{table_name}', 'operation', TG_OP, 'record_id', rec.{id_column}::text, \
		 'timestamp', extract(epoch from clock_timestamp())",
		table_name = resource.table,
	);
	let function_sql = format!(
		"CREATE OR REPLACE FUNCTION {function}() RETURNS trigger LANGUAGE plpgsql AS $beacon$
DECLARE
	rec RECORD;
	payload TEXT;
BEGIN
	IF TG_OP = 'DELETE' THEN
		rec := OLD;
	ELSE
		rec := NEW;
	END IF;

	payload := jsonb_build_object({header}, 'fields', jsonb_build_object({fields}))::text;

	IF octet_length(payload) > {max_bytes} THEN
		payload := jsonb_build_object({header}, 'truncated', true)::text;
	END IF;

	PERFORM pg_notify('{channel}', payload);

	RETURN NULL;
END;
$beacon$",
		fields = field_pairs.join(", "),
		max_bytes = cfg.max_payload_bytes,
		channel = names.channel,
	);

	Ok(vec![
		function_sql,
		format!("DROP TRIGGER IF EXISTS {trigger} ON {table}"),
		format!(
			"CREATE TRIGGER {trigger} AFTER INSERT OR UPDATE OR DELETE ON {table} \
			 FOR EACH ROW EXECUTE FUNCTION {function}()"
		),
	])
}

pub fn render_remove(table: &str, cfg: &Trigger) -> Result<Vec<String>, IdentifierError> {
	let names = TriggerNames::for_table(table, cfg);
	let quoted_table = quote_identifier(table)?;
	let trigger = quote_identifier(&names.trigger)?;
	let function = quote_identifier(&names.function)?;

	Ok(vec![
		format!("DROP TRIGGER IF EXISTS {trigger} ON {quoted_table}"),
		format!("DROP FUNCTION IF EXISTS {function}()"),
	])
}

/// Drops a trigger found in the catalog, addressed by the names Postgres reports for it.
pub fn render_drop_installed(
	schema: &str,
	table: &str,
	trigger: &str,
	function: &str,
) -> Result<Vec<String>, IdentifierError> {
	let quoted_table = quote_identifier(&format!("{schema}.{table}"))?;
	let trigger = quote_identifier(trigger)?;
	let function = quote_identifier(&format!("{schema}.{function}"))?;

	Ok(vec![
		format!("DROP TRIGGER IF EXISTS {trigger} ON {quoted_table}"),
		format!("DROP FUNCTION IF EXISTS {function}()"),
	])
}
