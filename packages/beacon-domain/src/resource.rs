use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::fingerprint;
use beacon_config::ResourceConfig;

const NAME_FIELDS: [&str; 4] = ["name", "title", "table_name", "question"];
const MAX_DERIVED_NAME_CHARS: usize = 200;

#[derive(Debug, thiserror::Error)]
#[error("Unknown {kind} value {value:?}.")]
pub struct UnknownVariant {
	pub kind: &'static str,
	pub value: String,
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceType {
	Database,
	Api,
	Tool,
	KnowledgeBase,
	Text2sql,
}
impl ResourceType {
	pub fn as_str(self) -> &'static str {
		match self {
			Self::Database => "database",
			Self::Api => "api",
			Self::Tool => "tool",
			Self::KnowledgeBase => "knowledge_base",
			Self::Text2sql => "text2sql",
		}
	}
}
impl FromStr for ResourceType {
	type Err = UnknownVariant;

	fn from_str(raw: &str) -> Result<Self, Self::Err> {
		match raw {
			"database" => Ok(Self::Database),
			"api" => Ok(Self::Api),
			"tool" => Ok(Self::Tool),
			"knowledge_base" => Ok(Self::KnowledgeBase),
			"text2sql" => Ok(Self::Text2sql),
			other => Err(UnknownVariant { kind: "resource type", value: other.to_string() }),
		}
	}
}
impl fmt::Display for ResourceType {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceStatus {
	Active,
	Inactive,
	Maintenance,
	Error,
}
impl ResourceStatus {
	pub fn as_str(self) -> &'static str {
		match self {
			Self::Active => "active",
			Self::Inactive => "inactive",
			Self::Maintenance => "maintenance",
			Self::Error => "error",
		}
	}
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VectorType {
	Name,
	Description,
	Capabilities,
	Composite,
}
impl VectorType {
	pub const ALL: [Self; 4] = [Self::Name, Self::Description, Self::Capabilities, Self::Composite];

	pub fn as_str(self) -> &'static str {
		match self {
			Self::Name => "name",
			Self::Description => "description",
			Self::Capabilities => "capabilities",
			Self::Composite => "composite",
		}
	}
}
impl FromStr for VectorType {
	type Err = UnknownVariant;

	fn from_str(raw: &str) -> Result<Self, Self::Err> {
		match raw {
			"name" => Ok(Self::Name),
			"description" => Ok(Self::Description),
			"capabilities" => Ok(Self::Capabilities),
			"composite" => Ok(Self::Composite),
			other => Err(UnknownVariant { kind: "vector type", value: other.to_string() }),
		}
	}
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VectorizationStatus {
	Pending,
	Processing,
	Completed,
	Failed,
}
impl VectorizationStatus {
	pub fn as_str(self) -> &'static str {
		match self {
			Self::Pending => "pending",
			Self::Processing => "processing",
			Self::Completed => "completed",
			Self::Failed => "failed",
		}
	}
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationType {
	Discovery,
	Vectorization,
	Sync,
	Cleanup,
}
impl OperationType {
	pub fn as_str(self) -> &'static str {
		match self {
			Self::Discovery => "discovery",
			Self::Vectorization => "vectorization",
			Self::Sync => "sync",
			Self::Cleanup => "cleanup",
		}
	}
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationState {
	Pending,
	Running,
	Completed,
	Failed,
	Cancelled,
}
impl OperationState {
	pub fn as_str(self) -> &'static str {
		match self {
			Self::Pending => "pending",
			Self::Running => "running",
			Self::Completed => "completed",
			Self::Failed => "failed",
			Self::Cancelled => "cancelled",
		}
	}
}

/// Registry content before it is written. Everything that affects vectorization lives here.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ResourceDraft {
	pub resource_id: String,
	pub name: String,
	pub resource_type: ResourceType,
	pub description: String,
	pub capabilities: Vec<String>,
	pub tags: Vec<String>,
	pub metadata: Value,
	pub source_table: Option<String>,
	pub source_id: Option<String>,
}
impl ResourceDraft {
	pub fn content_hash(&self) -> String {
		fingerprint::resource_content_hash(self)
	}
}

pub fn resource_id_for(table: &str, source_id: &str) -> String {
	format!("{table}:{source_id}")
}

/// Renders a source column value as embeddable text. Nulls and blank strings yield `None`.
pub fn value_text(value: &Value) -> Option<String> {
	let text = match value {
		Value::Null => return None,
		Value::String(text) => text.trim().to_string(),
		Value::Bool(flag) => flag.to_string(),
		Value::Number(number) => number.to_string(),
		Value::Array(_) | Value::Object(_) => fingerprint::canonical_json(value),
	};

	if text.is_empty() { None } else { Some(text) }
}

pub fn draft_from_record(
	cfg: &ResourceConfig,
	source_id: &str,
	record: &Map<String, Value>,
) -> ResourceDraft {
	let resource_type = cfg.resource_type.parse().unwrap_or(ResourceType::Database);
	let name = NAME_FIELDS
		.iter()
		.find_map(|field| record.get(*field).and_then(value_text))
		.map(|name| truncate_chars(&name, MAX_DERIVED_NAME_CHARS))
		.unwrap_or_else(|| format!("{} #{source_id}", cfg.table));
	let description = record
		.get("description")
		.and_then(value_text)
		.or_else(|| cfg.description.clone())
		.unwrap_or_default();
	let mut fields = Map::new();

	for field in &cfg.fields {
		if let Some(value) = record.get(field)
			&& !value.is_null()
		{
			fields.insert(field.clone(), value.clone());
		}
	}

	let mut tags = vec![cfg.table.clone()];

	if let Some(content_type) = record.get("content_type").and_then(value_text) {
		tags.push(content_type);
	}

	ResourceDraft {
		resource_id: resource_id_for(&cfg.table, source_id),
		name,
		resource_type,
		description,
		capabilities: vec![cfg.tool.clone()],
		tags,
		metadata: serde_json::json!({
			"table": cfg.table,
			"tool": cfg.tool,
			"fields": Value::Object(fields),
		}),
		source_table: Some(cfg.table.clone()),
		source_id: Some(source_id.to_string()),
	}
}

pub(crate) fn truncate_chars(text: &str, max_chars: usize) -> String {
	if text.chars().count() <= max_chars {
		return text.to_string();
	}

	text.chars().take(max_chars).collect()
}
