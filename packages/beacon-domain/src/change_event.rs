use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::resource::{resource_id_for, truncate_chars};
use beacon_config::Trigger;

/// Column-name fragments whose values are clipped in change payloads.
pub const LARGE_FIELD_MARKERS: [&str; 7] =
	["content", "question", "sql", "description", "ddl", "body", "text"];

#[derive(Debug, thiserror::Error)]
pub enum ChangeEventError {
	#[error("Change payload is {size} bytes, above the {limit} byte limit.")]
	Oversized { size: usize, limit: usize },
	#[error("Change payload is not valid JSON: {0}")]
	Malformed(#[from] serde_json::Error),
	#[error("Change payload is missing {0}.")]
	Missing(&'static str),
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeOperation {
	Insert,
	Update,
	Delete,
}
impl ChangeOperation {
	pub fn as_str(self) -> &'static str {
		match self {
			Self::Insert => "INSERT",
			Self::Update => "UPDATE",
			Self::Delete => "DELETE",
		}
	}
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PayloadLimits {
	pub max_bytes: usize,
	pub max_fields: usize,
	pub large_field_chars: usize,
}
impl PayloadLimits {
	pub fn from_config(cfg: &Trigger) -> Self {
		Self {
			max_bytes: cfg.max_payload_bytes as usize,
			max_fields: cfg.max_payload_fields as usize,
			large_field_chars: cfg.large_field_chars as usize,
		}
	}
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct ChangeEvent {
	pub table_name: String,
	pub operation: ChangeOperation,
	#[serde(deserialize_with = "record_id_text")]
	pub record_id: String,
	/// Seconds since the Unix epoch, as produced by the trigger's clock.
	pub timestamp: f64,
	#[serde(default)]
	pub fields: Map<String, Value>,
	#[serde(default, skip_serializing_if = "std::ops::Not::not")]
	pub truncated: bool,
}
impl ChangeEvent {
	/// Builds the payload a trigger would publish for `record`. Falls back to the truncated
	/// marker when the serialized event exceeds `limits.max_bytes`.
	pub fn compact(
		table_name: &str,
		operation: ChangeOperation,
		record_id: &str,
		timestamp: f64,
		record: &Map<String, Value>,
		fields: &[String],
		limits: &PayloadLimits,
	) -> Self {
		let mut selected = Map::new();

		for field in fields.iter().take(limits.max_fields) {
			let Some(value) = record.get(field) else {
				continue;
			};
			let value = match value {
				Value::String(text) if is_large_text_field(field) =>
					Value::String(truncate_chars(text, limits.large_field_chars)),
				other => other.clone(),
			};

			selected.insert(field.clone(), value);
		}

		let event = Self {
			table_name: table_name.to_string(),
			operation,
			record_id: record_id.to_string(),
			timestamp,
			fields: selected,
			truncated: false,
		};

		if event.encoded_len() > limits.max_bytes { event.into_truncated() } else { event }
	}

	pub fn parse(payload: &str, max_bytes: usize) -> Result<Self, ChangeEventError> {
		if payload.len() > max_bytes {
			return Err(ChangeEventError::Oversized { size: payload.len(), limit: max_bytes });
		}

		let event: Self = serde_json::from_str(payload)?;

		if event.table_name.trim().is_empty() {
			return Err(ChangeEventError::Missing("table_name"));
		}
		if event.record_id.trim().is_empty() {
			return Err(ChangeEventError::Missing("record_id"));
		}
		if !event.timestamp.is_finite() {
			return Err(ChangeEventError::Missing("timestamp"));
		}

		Ok(event)
	}

	pub fn encode(&self) -> Result<String, serde_json::Error> {
		serde_json::to_string(self)
	}

	pub fn resource_id(&self) -> String {
		resource_id_for(&self.table_name, &self.record_id)
	}

	pub fn into_truncated(self) -> Self {
		Self { fields: Map::new(), truncated: true, ..self }
	}

	fn encoded_len(&self) -> usize {
		self.encode().map(|encoded| encoded.len()).unwrap_or(usize::MAX)
	}
}

pub fn is_large_text_field(field: &str) -> bool {
	let lowered = field.to_ascii_lowercase();

	LARGE_FIELD_MARKERS.iter().any(|marker| lowered.contains(marker))
}

fn record_id_text<'de, D>(deserializer: D) -> Result<String, D::Error>
where
	D: Deserializer<'de>,
{
	match Value::deserialize(deserializer)? {
		Value::String(text) => Ok(text),
		Value::Number(number) => Ok(number.to_string()),
		other => Err(serde::de::Error::custom(format!(
			"record_id must be a string or number, got {other}"
		))),
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn limits() -> PayloadLimits {
		PayloadLimits { max_bytes: 7_000, max_fields: 3, large_field_chars: 100 }
	}

	#[test]
	fn compact_event_clips_large_text_and_bounds_fields() {
		let record = serde_json::json!({
			"question": "q".repeat(300),
			"status": "open",
			"amount": 12,
			"owner": "ops",
		});
		let fields: Vec<String> =
			["question", "status", "amount", "owner"].iter().map(|f| f.to_string()).collect();
		let event = ChangeEvent::compact(
			"tickets",
			ChangeOperation::Update,
			"5",
			1_700_000_000.5,
			record.as_object().expect("Record must be an object."),
			&fields,
			&limits(),
		);

		assert!(!event.truncated);
		assert_eq!(event.fields.len(), 3);
		assert_eq!(event.fields["question"].as_str().map(str::len), Some(100));
		assert!(!event.fields.contains_key("owner"));
	}

	#[test]
	fn parse_accepts_numeric_record_ids() {
		let event = ChangeEvent::parse(
			r#"{"table_name":"orders","operation":"DELETE","record_id":42,"timestamp":1.5}"#,
			7_000,
		)
		.expect("Payload should parse.");

		assert_eq!(event.record_id, "42");
		assert_eq!(event.operation, ChangeOperation::Delete);
		assert_eq!(event.resource_id(), "orders:42");
		assert!(event.fields.is_empty());
	}

	#[test]
	fn parse_rejects_malformed_payloads() {
		assert!(matches!(
			ChangeEvent::parse("not json", 7_000),
			Err(ChangeEventError::Malformed(_))
		));
		assert!(matches!(
			ChangeEvent::parse(
				r#"{"table_name":"","operation":"INSERT","record_id":"1","timestamp":1}"#,
				7_000
			),
			Err(ChangeEventError::Missing("table_name"))
		));
		assert!(matches!(
			ChangeEvent::parse(
				r#"{"table_name":"t","operation":"MERGE","record_id":"1","timestamp":1}"#,
				7_000
			),
			Err(ChangeEventError::Malformed(_))
		));
	}

	#[test]
	fn large_field_markers_match_case_insensitively() {
		assert!(is_large_text_field("Description"));
		assert!(is_large_text_field("sql_text"));
		assert!(!is_large_text_field("status"));
	}
}
