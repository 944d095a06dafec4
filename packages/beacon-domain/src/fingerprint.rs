use serde_json::Value;

use crate::{composite::VectorText, resource::ResourceDraft};

/// Serializes JSON with object keys sorted at every depth, so logically equal documents hash
/// identically regardless of the key order they were produced in.
pub fn canonical_json(value: &Value) -> String {
	let mut out = String::new();

	write_canonical(value, &mut out);

	out
}

/// Hash over the fields a native entry is vectorized from: name, description, capabilities, tags
/// and metadata.
pub fn resource_content_hash(draft: &ResourceDraft) -> String {
	draft_hasher(draft).finalize().to_hex().to_string()
}

/// Resource hash extended with every text the resource embeds. Source rows use this one, since
/// some content kinds read columns that never reach the draft.
pub fn embedded_content_hash(draft: &ResourceDraft, texts: &[VectorText]) -> String {
	let mut hasher = draft_hasher(draft);

	for text in texts {
		hasher.update(text.vector_type.as_str().as_bytes());
		hasher.update(&[0x1e]);
		hasher.update(text.content.as_bytes());
		hasher.update(&[0x1f]);
	}

	hasher.finalize().to_hex().to_string()
}

pub fn text_hash(text: &str) -> String {
	blake3::hash(text.as_bytes()).to_hex().to_string()
}

fn draft_hasher(draft: &ResourceDraft) -> blake3::Hasher {
	let capabilities = canonical_json(&Value::from(draft.capabilities.clone()));
	let tags = canonical_json(&Value::from(draft.tags.clone()));
	let metadata = canonical_json(&draft.metadata);
	let mut hasher = blake3::Hasher::new();

	for part in [
		draft.name.as_str(),
		draft.description.as_str(),
		capabilities.as_str(),
		tags.as_str(),
		metadata.as_str(),
	] {
		hasher.update(part.as_bytes());
		hasher.update(&[0x1f]);
	}

	hasher
}

fn write_canonical(value: &Value, out: &mut String) {
	match value {
		Value::Object(map) => {
			let mut keys: Vec<&String> = map.keys().collect();

			keys.sort();
			out.push('{');

			for (idx, key) in keys.into_iter().enumerate() {
				if idx > 0 {
					out.push(',');
				}

				out.push_str(&Value::String(key.clone()).to_string());
				out.push(':');

				if let Some(inner) = map.get(key) {
					write_canonical(inner, out);
				}
			}

			out.push('}');
		},
		Value::Array(items) => {
			out.push('[');

			for (idx, item) in items.iter().enumerate() {
				if idx > 0 {
					out.push(',');
				}

				write_canonical(item, out);
			}

			out.push(']');
		},
		scalar => out.push_str(&scalar.to_string()),
	}
}
