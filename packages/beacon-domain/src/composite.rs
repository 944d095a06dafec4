//! Per-kind text builders. Every content kind answers the same two questions: which vector types
//! it produces, and what text each of those vectors embeds.

use serde_json::{Map, Value};

use crate::{
	fingerprint,
	resource::{ResourceDraft, VectorType, value_text},
	sql_text::{self, DdlContext},
};
use beacon_config::ResourceConfig;

const COMPOSITE_SEPARATOR: &str = " | ";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ContentKind {
	/// A configured source-table row.
	Record,
	/// A natively registered API, tool or database entry.
	Registry,
	/// A row holding table DDL.
	Ddl,
	/// A row holding a question and its SQL.
	SqlExample,
}
impl ContentKind {
	pub fn as_str(self) -> &'static str {
		match self {
			Self::Record => "record",
			Self::Registry => "registry",
			Self::Ddl => "ddl",
			Self::SqlExample => "sql_example",
		}
	}

	/// Resolves the kind for a configured row. `auto` inspects the row's `content_type` column.
	pub fn for_record(cfg: &ResourceConfig, record: &Map<String, Value>) -> Self {
		match cfg.kind.as_str() {
			"record" => Self::Record,
			"ddl" => Self::Ddl,
			"sql_example" => Self::SqlExample,
			_ => match record
				.get("content_type")
				.and_then(Value::as_str)
				.map(|raw| raw.trim().to_ascii_lowercase())
				.as_deref()
			{
				Some("ddl" | "schema") => Self::Ddl,
				Some("sql" | "qa" | "sql_example" | "example") => Self::SqlExample,
				_ => Self::Record,
			},
		}
	}
}

#[derive(Clone, Copy, Debug)]
pub struct VectorizationInput<'a> {
	pub draft: &'a ResourceDraft,
	pub config: Option<&'a ResourceConfig>,
	pub record: Option<&'a Map<String, Value>>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VectorText {
	pub vector_type: VectorType,
	pub content: String,
}

pub trait TextStrategy
where
	Self: Send + Sync,
{
	fn vector_types(&self) -> &'static [VectorType];

	fn composite_text(&self, input: &VectorizationInput<'_>) -> String;

	fn facet_text(&self, vector_type: VectorType, input: &VectorizationInput<'_>) -> String {
		match vector_type {
			VectorType::Composite => self.composite_text(input),
			VectorType::Name => input.draft.name.trim().to_string(),
			VectorType::Description => input.draft.description.trim().to_string(),
			VectorType::Capabilities => join_non_empty(&input.draft.capabilities, ", "),
		}
	}

	/// Texts to embed, one per vector type. Empty facets are omitted.
	fn vector_texts(&self, input: &VectorizationInput<'_>) -> Vec<VectorText> {
		self.vector_types()
			.iter()
			.filter_map(|vector_type| {
				let content = self.facet_text(*vector_type, input);

				if content.trim().is_empty() {
					None
				} else {
					Some(VectorText { vector_type: *vector_type, content })
				}
			})
			.collect()
	}
}

struct RecordStrategy;
struct RegistryStrategy;
struct DdlStrategy;
struct SqlExampleStrategy;

static RECORD: RecordStrategy = RecordStrategy;
static REGISTRY: RegistryStrategy = RegistryStrategy;
static DDL: DdlStrategy = DdlStrategy;
static SQL_EXAMPLE: SqlExampleStrategy = SqlExampleStrategy;

pub fn strategy_for(kind: ContentKind) -> &'static dyn TextStrategy {
	match kind {
		ContentKind::Record => &RECORD,
		ContentKind::Registry => &REGISTRY,
		ContentKind::Ddl => &DDL,
		ContentKind::SqlExample => &SQL_EXAMPLE,
	}
}

impl TextStrategy for RecordStrategy {
	fn vector_types(&self) -> &'static [VectorType] {
		&[VectorType::Composite]
	}

	fn composite_text(&self, input: &VectorizationInput<'_>) -> String {
		let mut parts = Vec::new();

		if let Some(cfg) = input.config {
			parts.push(cfg.table.clone());
			parts.push(cfg.tool.clone());

			if let Some(description) = cfg.description.as_deref() {
				parts.push(description.to_string());
			}
			if let Some(record) = input.record {
				for field in &cfg.fields {
					if let Some(text) = record.get(field).and_then(value_text) {
						parts.push(format!("{field}: {text}"));
					}
				}
			}
		} else {
			parts.push(input.draft.name.clone());
			parts.push(input.draft.description.clone());
		}

		join_non_empty(&parts, COMPOSITE_SEPARATOR)
	}
}

impl TextStrategy for RegistryStrategy {
	fn vector_types(&self) -> &'static [VectorType] {
		&VectorType::ALL
	}

	fn composite_text(&self, input: &VectorizationInput<'_>) -> String {
		let draft = input.draft;
		let parts = [
			draft.name.clone(),
			draft.resource_type.as_str().to_string(),
			draft.description.clone(),
			join_non_empty(&draft.capabilities, ", "),
			join_non_empty(&draft.tags, ", "),
		];

		// A bare type label carries no content of its own.
		if parts.iter().enumerate().all(|(idx, part)| idx == 1 || part.trim().is_empty()) {
			return String::new();
		}

		join_non_empty(&parts, COMPOSITE_SEPARATOR)
	}
}

impl TextStrategy for DdlStrategy {
	fn vector_types(&self) -> &'static [VectorType] {
		&[VectorType::Composite]
	}

	fn composite_text(&self, input: &VectorizationInput<'_>) -> String {
		let Some(record) = input.record else {
			return RECORD.composite_text(input);
		};
		let field =
			|names: &[&str]| names.iter().find_map(|name| record.get(*name).and_then(value_text));
		let Some(ddl) = field(&["content", "ddl"]) else {
			return RECORD.composite_text(input);
		};
		let table_hint = field(&["table_name"]);
		let database = field(&["database_name", "database", "db_name"]);
		let datasource = field(&["datasource_name", "datasource"]);

		sql_text::ddl_phrase(
			&ddl,
			&DdlContext {
				table_hint: table_hint.as_deref(),
				database: database.as_deref(),
				datasource: datasource.as_deref(),
			},
		)
	}
}

impl TextStrategy for SqlExampleStrategy {
	fn vector_types(&self) -> &'static [VectorType] {
		&[VectorType::Composite]
	}

	fn composite_text(&self, input: &VectorizationInput<'_>) -> String {
		let Some(record) = input.record else {
			return RECORD.composite_text(input);
		};
		let question = record.get("question").and_then(value_text);
		let sql = ["sql", "content"].iter().find_map(|name| record.get(*name).and_then(value_text));
		let phrase = sql_text::sql_example_phrase(question.as_deref(), sql.as_deref());

		if phrase.is_empty() { RECORD.composite_text(input) } else { phrase }
	}
}

/// Change-detection hash of a configured row: its draft plus the texts its content kind embeds.
pub fn record_content_hash(
	cfg: &ResourceConfig,
	draft: &ResourceDraft,
	record: &Map<String, Value>,
) -> String {
	let kind = ContentKind::for_record(cfg, record);
	let input = VectorizationInput { draft, config: Some(cfg), record: Some(record) };

	fingerprint::embedded_content_hash(draft, &strategy_for(kind).vector_texts(&input))
}

fn join_non_empty(parts: &[String], separator: &str) -> String {
	parts
		.iter()
		.map(|part| part.trim())
		.filter(|part| !part.is_empty())
		.collect::<Vec<_>>()
		.join(separator)
}
