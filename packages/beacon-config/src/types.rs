use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::{Map, Value};

pub const RESOURCE_TYPES: [&str; 5] = ["database", "api", "tool", "knowledge_base", "text2sql"];
pub const VECTOR_TYPES: [&str; 4] = ["name", "description", "capabilities", "composite"];
pub const CONTENT_KINDS: [&str; 4] = ["auto", "record", "ddl", "sql_example"];

#[derive(Clone, Debug, Deserialize)]
pub struct Config {
	pub service: Service,
	pub storage: Storage,
	pub providers: Providers,
	#[serde(default)]
	pub vector: Vector,
	#[serde(default)]
	pub matcher: Matcher,
	#[serde(default)]
	pub trigger: Trigger,
	#[serde(default)]
	pub sync: Sync,
	#[serde(default)]
	pub resources: Vec<ResourceConfig>,
}
impl Config {
	pub fn enabled_resources(&self) -> impl Iterator<Item = &ResourceConfig> {
		self.resources.iter().filter(|resource| resource.enabled)
	}
}

#[derive(Clone, Debug, Deserialize)]
pub struct Service {
	pub log_level: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Storage {
	pub postgres: Postgres,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Postgres {
	pub dsn: String,
	pub pool_max_conns: u32,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Providers {
	pub embedding: EmbeddingProviderConfig,
}

#[derive(Clone, Debug, Deserialize)]
pub struct EmbeddingProviderConfig {
	pub provider_id: String,
	pub api_base: String,
	pub api_key: String,
	pub path: String,
	pub model: String,
	pub dimensions: u32,
	pub timeout_ms: u64,
	#[serde(default)]
	pub default_headers: Map<String, Value>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Vector {
	/// Minimum raw cosine similarity for a stored vector to count as a candidate.
	pub similarity_threshold: f32,
	pub max_results: u32,
	pub batch_size: u32,
	pub timeout_seconds: u64,
	pub max_concurrent_tasks: u32,
	/// Log progress every N processed resources.
	pub progress_interval: u32,
}
impl Default for Vector {
	fn default() -> Self {
		Self {
			similarity_threshold: 0.3,
			max_results: 20,
			batch_size: 50,
			timeout_seconds: 30,
			max_concurrent_tasks: 4,
			progress_interval: 5,
		}
	}
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct Matcher {
	pub confidence_weights: ConfidenceWeights,
	pub vector_type_weights: VectorTypeWeights,
	/// Keyed by resource type, then by vector type. A present entry replaces the global
	/// vector-type weights for that resource type; vector types it omits weigh zero.
	pub resource_type_weights: BTreeMap<String, BTreeMap<String, f32>>,
	pub scoring: MatcherScoring,
	pub history: MatchHistory,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct ConfidenceWeights {
	pub similarity: f32,
	pub usage: f32,
	pub performance: f32,
	pub context: f32,
}
impl ConfidenceWeights {
	pub fn sum(&self) -> f32 {
		self.similarity + self.usage + self.performance + self.context
	}
}
impl Default for ConfidenceWeights {
	fn default() -> Self {
		Self { similarity: 0.6, usage: 0.2, performance: 0.1, context: 0.1 }
	}
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct VectorTypeWeights {
	pub name: f32,
	pub description: f32,
	pub capabilities: f32,
	pub composite: f32,
}
impl VectorTypeWeights {
	pub fn sum(&self) -> f32 {
		self.name + self.description + self.capabilities + self.composite
	}
}
impl Default for VectorTypeWeights {
	fn default() -> Self {
		Self { name: 0.3, description: 0.4, capabilities: 0.2, composite: 0.1 }
	}
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct MatcherScoring {
	/// Usage count at which the historical signal trusts `success_rate` halfway.
	pub usage_half_saturation: f32,
	/// Average response time that maps to a neutral performance signal.
	pub performance_target_ms: f32,
}
impl Default for MatcherScoring {
	fn default() -> Self {
		Self { usage_half_saturation: 10.0, performance_target_ms: 1_000.0 }
	}
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct MatchHistory {
	pub enabled: bool,
	pub queue_capacity: u32,
}
impl Default for MatchHistory {
	fn default() -> Self {
		Self { enabled: true, queue_capacity: 256 }
	}
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Trigger {
	pub trigger_prefix: String,
	pub notify_channel_prefix: String,
	pub enable_realtime: bool,
	pub batch_delay_ms: u64,
	pub max_payload_bytes: u32,
	pub max_payload_fields: u32,
	pub large_field_chars: u32,
	pub workers: u32,
	pub queue_capacity: u32,
}
impl Default for Trigger {
	fn default() -> Self {
		Self {
			trigger_prefix: "beacon_".to_string(),
			notify_channel_prefix: "beacon_changes_".to_string(),
			enable_realtime: true,
			batch_delay_ms: 200,
			max_payload_bytes: 7_000,
			max_payload_fields: 8,
			large_field_chars: 100,
			workers: 4,
			queue_capacity: 1_024,
		}
	}
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Sync {
	/// Periodic incremental sync interval. Zero disables the schedule.
	pub interval_seconds: u64,
	pub tombstone_retention_days: i64,
}
impl Default for Sync {
	fn default() -> Self {
		Self { interval_seconds: 300, tombstone_retention_days: 7 }
	}
}

#[derive(Clone, Debug, Deserialize)]
pub struct ResourceConfig {
	pub table: String,
	pub fields: Vec<String>,
	pub tool: String,
	#[serde(default)]
	pub description: Option<String>,
	#[serde(default = "default_enabled")]
	pub enabled: bool,
	#[serde(default = "default_id_column")]
	pub id_column: String,
	#[serde(default = "default_resource_type")]
	pub resource_type: String,
	#[serde(default = "default_kind")]
	pub kind: String,
}

fn default_enabled() -> bool {
	true
}

fn default_id_column() -> String {
	"id".to_string()
}

fn default_resource_type() -> String {
	"database".to_string()
}

fn default_kind() -> String {
	"auto".to_string()
}
