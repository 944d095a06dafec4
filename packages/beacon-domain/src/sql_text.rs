//! Natural-language phrases for schema and SQL content. Embeddings of phrases like these match
//! free-text queries far better than embeddings of raw DDL or SQL.

use std::sync::LazyLock;

use regex::Regex;

pub const MAX_DDL_FIELDS: usize = 5;

const CONSTRAINT_KEYWORDS: [&str; 9] =
	["PRIMARY", "CONSTRAINT", "KEY", "INDEX", "UNIQUE", "FOREIGN", "CHECK", "FULLTEXT", "SPATIAL"];

static CREATE_TABLE: LazyLock<Option<Regex>> = LazyLock::new(|| {
	Regex::new(
		r#"(?is)CREATE\s+(?:TEMP(?:ORARY)?\s+)?TABLE\s+(?:IF\s+NOT\s+EXISTS\s+)?[`"\[]?([\w.]+)"#,
	)
	.ok()
});
static COLUMN_NAME: LazyLock<Option<Regex>> =
	LazyLock::new(|| Regex::new(r#"^[`"\[]?(\w+)[`"\]]?\s+\w"#).ok());
static COLUMN_COMMENT: LazyLock<Option<Regex>> =
	LazyLock::new(|| Regex::new(r"(?i)\bCOMMENT\s+'([^']*)'").ok());
static FROM_TABLE: LazyLock<Option<Regex>> =
	LazyLock::new(|| Regex::new(r#"(?i)\bFROM\s+[`"\[]?([\w.]+)"#).ok());
static INTO_TABLE: LazyLock<Option<Regex>> =
	LazyLock::new(|| Regex::new(r#"(?i)\bINTO\s+[`"\[]?([\w.]+)"#).ok());
static UPDATE_TABLE: LazyLock<Option<Regex>> =
	LazyLock::new(|| Regex::new(r#"(?i)^\s*UPDATE\s+[`"\[]?([\w.]+)"#).ok());

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DdlField {
	pub name: String,
	pub comment: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DdlContext<'a> {
	pub table_hint: Option<&'a str>,
	pub database: Option<&'a str>,
	pub datasource: Option<&'a str>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SqlOperation {
	Select { table: Option<String> },
	Insert { table: Option<String> },
	Update { table: Option<String> },
	Delete { table: Option<String> },
	Other { verb: String },
}
impl SqlOperation {
	pub fn summary(&self) -> String {
		match self {
			Self::Select { table: Some(table) } => format!("query {table} table data"),
			Self::Select { table: None } => "query data".to_string(),
			Self::Insert { table: Some(table) } => format!("insert data into {table} table"),
			Self::Insert { table: None } => "insert data".to_string(),
			Self::Update { table: Some(table) } => format!("update {table} table data"),
			Self::Update { table: None } => "update data".to_string(),
			Self::Delete { table: Some(table) } => format!("delete data from {table} table"),
			Self::Delete { table: None } => "delete data".to_string(),
			Self::Other { verb } if verb.is_empty() => "execute SQL statement".to_string(),
			Self::Other { verb } => format!("execute {} statement", verb.to_ascii_uppercase()),
		}
	}
}

pub fn ddl_table_name(ddl: &str) -> Option<String> {
	capture(&CREATE_TABLE, ddl)
}

pub fn extract_ddl_fields(ddl: &str, limit: usize) -> Vec<DdlField> {
	let Some(body) = table_body(ddl) else {
		return Vec::new();
	};
	let lines: Vec<&str> = body.lines().filter(|line| !line.trim().is_empty()).collect();
	let units: Vec<String> = if lines.len() > 1 {
		lines.into_iter().map(str::to_string).collect()
	} else {
		split_top_level(body)
	};
	let mut fields = Vec::new();

	for unit in units {
		if fields.len() >= limit {
			break;
		}

		let (definition, line_comment) = match unit.split_once("--") {
			Some((definition, comment)) => (definition.trim(), Some(comment.trim().to_string())),
			None => (unit.trim(), None),
		};
		let definition = definition.trim_end_matches(',').trim();
		let Some(name) = capture(&COLUMN_NAME, definition) else {
			continue;
		};

		if CONSTRAINT_KEYWORDS.iter().any(|keyword| name.eq_ignore_ascii_case(keyword)) {
			continue;
		}

		let comment = capture(&COLUMN_COMMENT, definition)
			.or(line_comment)
			.filter(|comment| !comment.is_empty());

		fields.push(DdlField { name, comment });
	}

	fields
}

pub fn ddl_phrase(ddl: &str, context: &DdlContext<'_>) -> String {
	let table = ddl_table_name(ddl)
		.or_else(|| context.table_hint.map(str::to_string))
		.unwrap_or_else(|| "unknown".to_string());
	let mut phrase = format!("Table {table}");
	let mut located = Vec::new();

	if let Some(database) = context.database.filter(|value| !value.trim().is_empty()) {
		located.push(format!("database {}", database.trim()));
	}
	if let Some(datasource) = context.datasource.filter(|value| !value.trim().is_empty()) {
		located.push(format!("datasource {}", datasource.trim()));
	}
	if !located.is_empty() {
		phrase.push_str(&format!(" in {}", located.join(", ")));
	}

	let fields = extract_ddl_fields(ddl, MAX_DDL_FIELDS);

	if !fields.is_empty() {
		let rendered: Vec<String> = fields
			.iter()
			.map(|field| match &field.comment {
				Some(comment) => format!("{} ({comment})", field.name),
				None => field.name.clone(),
			})
			.collect();

		phrase.push_str(&format!(" with fields: {}", rendered.join(", ")));
	}

	phrase
}

pub fn infer_sql_operation(sql: &str) -> SqlOperation {
	let stripped = strip_sql_comments(sql);
	let verb = stripped
		.split(|ch: char| ch.is_whitespace() || ch == '(')
		.find(|word| !word.is_empty())
		.unwrap_or_default()
		.to_ascii_uppercase();

	match verb.as_str() {
		"SELECT" | "WITH" =>
			SqlOperation::Select { table: capture_top_level(&FROM_TABLE, &stripped) },
		"INSERT" => SqlOperation::Insert { table: capture_top_level(&INTO_TABLE, &stripped) },
		"UPDATE" => SqlOperation::Update { table: capture(&UPDATE_TABLE, &stripped) },
		"DELETE" => SqlOperation::Delete { table: capture_top_level(&FROM_TABLE, &stripped) },
		_ => SqlOperation::Other { verb: verb.to_ascii_lowercase() },
	}
}

pub fn sql_example_phrase(question: Option<&str>, sql: Option<&str>) -> String {
	let question = question.map(str::trim).filter(|text| !text.is_empty());
	let summary = sql.map(str::trim).filter(|text| !text.is_empty()).map(infer_sql_operation);

	match (question, summary) {
		(Some(question), Some(operation)) => format!("{question} ({})", operation.summary()),
		(Some(question), None) => question.to_string(),
		(None, Some(operation)) => operation.summary(),
		(None, None) => String::new(),
	}
}

fn capture(pattern: &LazyLock<Option<Regex>>, text: &str) -> Option<String> {
	let regex = pattern.as_ref()?;

	regex.captures(text).and_then(|caps| caps.get(1)).map(|m| m.as_str().to_string())
}

/// Like [`capture`], but skips matches inside parentheses or string literals, such as the `FROM`
/// of `EXTRACT(year FROM created_at)` or of a subquery.
fn capture_top_level(pattern: &LazyLock<Option<Regex>>, text: &str) -> Option<String> {
	let regex = pattern.as_ref()?;

	regex
		.captures_iter(text)
		.find(|caps| caps.get(0).is_some_and(|m| is_top_level(text, m.start())))
		.and_then(|caps| caps.get(1))
		.map(|m| m.as_str().to_string())
}

fn is_top_level(text: &str, offset: usize) -> bool {
	let mut depth = 0_i32;
	let mut quoted = false;

	for ch in text.get(..offset).unwrap_or_default().chars() {
		match ch {
			'\'' => quoted = !quoted,
			'(' if !quoted => depth += 1,
			')' if !quoted => depth -= 1,
			_ => {},
		}
	}

	depth <= 0 && !quoted
}

fn table_body(ddl: &str) -> Option<&str> {
	let start = ddl.find('(')?;
	let end = ddl.rfind(')')?;

	if end <= start {
		return None;
	}

	ddl.get(start + 1..end)
}

fn split_top_level(body: &str) -> Vec<String> {
	let mut parts = Vec::new();
	let mut depth = 0_i32;
	let mut current = String::new();

	for ch in body.chars() {
		match ch {
			'(' => depth += 1,
			')' => depth -= 1,
			',' if depth == 0 => {
				parts.push(std::mem::take(&mut current));

				continue;
			},
			_ => {},
		}

		current.push(ch);
	}

	if !current.trim().is_empty() {
		parts.push(current);
	}

	parts
}

fn strip_sql_comments(sql: &str) -> String {
	sql.lines()
		.map(|line| line.split_once("--").map(|(code, _)| code).unwrap_or(line))
		.collect::<Vec<_>>()
		.join("\n")
}
