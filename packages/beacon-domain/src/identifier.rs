use std::collections::HashMap;

use beacon_config::{Config, ResourceConfig};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum IdentifierError {
	#[error("Table {0:?} is not a configured resource table.")]
	UnknownTable(String),
	#[error("Column {column:?} is not configured for table {table:?}.")]
	UnknownColumn { table: String, column: String },
	#[error("{0:?} is not a safe SQL identifier.")]
	Unsafe(String),
}

/// Double-quotes each dotted part. Callers validate with [`beacon_config::is_sql_identifier`]
/// first, so quoting only preserves case here.
pub fn quote_identifier(raw: &str) -> Result<String, IdentifierError> {
	if !beacon_config::is_sql_identifier(raw) {
		return Err(IdentifierError::Unsafe(raw.to_string()));
	}

	Ok(raw.split('.').map(|part| format!("\"{part}\"")).collect::<Vec<_>>().join("."))
}

/// Table and column names that may appear in generated SQL, derived from the enabled resources.
#[derive(Clone, Debug, Default)]
pub struct AllowList {
	tables: HashMap<String, ResourceConfig>,
}
impl AllowList {
	pub fn from_config(cfg: &Config) -> Self {
		let tables = cfg
			.enabled_resources()
			.filter(|resource| beacon_config::is_sql_identifier(&resource.table))
			.map(|resource| (resource.table.clone(), resource.clone()))
			.collect();

		Self { tables }
	}

	pub fn resource(&self, table: &str) -> Result<&ResourceConfig, IdentifierError> {
		self.tables.get(table).ok_or_else(|| IdentifierError::UnknownTable(table.to_string()))
	}

	pub fn contains(&self, table: &str) -> bool {
		self.tables.contains_key(table)
	}

	pub fn tables(&self) -> impl Iterator<Item = &ResourceConfig> {
		self.tables.values()
	}

	pub fn quoted_table(&self, table: &str) -> Result<String, IdentifierError> {
		let resource = self.resource(table)?;

		quote_identifier(&resource.table)
	}

	pub fn quoted_column(&self, table: &str, column: &str) -> Result<String, IdentifierError> {
		let resource = self.resource(table)?;

		if resource.id_column != column && !resource.fields.iter().any(|field| field == column) {
			return Err(IdentifierError::UnknownColumn {
				table: table.to_string(),
				column: column.to_string(),
			});
		}
		if column.contains('.') {
			return Err(IdentifierError::Unsafe(column.to_string()));
		}

		quote_identifier(column)
	}
}
