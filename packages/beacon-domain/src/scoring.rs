use std::{cmp::Ordering, collections::BTreeMap};

use serde::{Deserialize, Serialize};

use crate::resource::{ResourceType, VectorType};
use beacon_config::{ConfidenceWeights, Matcher};

/// Signal value used when there is no evidence either way.
pub const NEUTRAL_SIGNAL: f32 = 0.5;

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct MatchContext {
	#[serde(default)]
	pub tags: Vec<String>,
	#[serde(default)]
	pub tools: Vec<String>,
}
impl MatchContext {
	fn is_empty(&self) -> bool {
		self.tags.is_empty() && self.tools.is_empty()
	}
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct VectorWeights {
	pub name: f32,
	pub description: f32,
	pub capabilities: f32,
	pub composite: f32,
}
impl VectorWeights {
	pub fn weight(&self, vector_type: VectorType) -> f32 {
		match vector_type {
			VectorType::Name => self.name,
			VectorType::Description => self.description,
			VectorType::Capabilities => self.capabilities,
			VectorType::Composite => self.composite,
		}
	}
}

#[derive(Clone, Debug)]
pub struct CandidateSignals<'a> {
	pub resource_id: &'a str,
	pub resource_type: ResourceType,
	pub similarities: BTreeMap<VectorType, f32>,
	pub usage_count: i64,
	pub success_rate: f32,
	pub avg_response_time_ms: Option<f32>,
	pub tags: &'a [String],
	pub capabilities: &'a [String],
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct SignalBreakdown {
	pub similarity: f32,
	pub usage: f32,
	pub performance: f32,
	pub context: f32,
}

#[derive(Clone, Debug, Serialize)]
pub struct ScoredCandidate {
	pub resource_id: String,
	pub similarity_score: f32,
	pub confidence_score: f32,
	pub final_score: f32,
	pub vector_similarities: BTreeMap<VectorType, f32>,
	pub signals: SignalBreakdown,
	pub reasoning: String,
}

pub fn cosine_similarity(lhs: &[f32], rhs: &[f32]) -> Option<f32> {
	if lhs.is_empty() || lhs.len() != rhs.len() {
		return None;
	}

	let mut dot = 0.0_f32;
	let mut lhs_norm = 0.0_f32;
	let mut rhs_norm = 0.0_f32;

	for (l, r) in lhs.iter().zip(rhs.iter()) {
		dot += l * r;
		lhs_norm += l * l;
		rhs_norm += r * r;
	}

	if lhs_norm <= f32::EPSILON || rhs_norm <= f32::EPSILON {
		return None;
	}

	Some((dot / (lhs_norm.sqrt() * rhs_norm.sqrt())).clamp(-1.0, 1.0))
}

/// Type-specific weights replace the global ones wholesale; vector types they omit weigh zero.
pub fn resolve_vector_weights(cfg: &Matcher, resource_type: ResourceType) -> VectorWeights {
	if let Some(overrides) = cfg.resource_type_weights.get(resource_type.as_str()) {
		let weight = |vector_type: VectorType| {
			overrides.get(vector_type.as_str()).copied().unwrap_or(0.0)
		};

		return VectorWeights {
			name: weight(VectorType::Name),
			description: weight(VectorType::Description),
			capabilities: weight(VectorType::Capabilities),
			composite: weight(VectorType::Composite),
		};
	}

	let global = &cfg.vector_type_weights;

	VectorWeights {
		name: global.name,
		description: global.description,
		capabilities: global.capabilities,
		composite: global.composite,
	}
}

/// Weighted sum over the vector types present. Missing types contribute nothing and the
/// remaining weights are not renormalized.
pub fn combine_similarity(
	similarities: &BTreeMap<VectorType, f32>,
	weights: &VectorWeights,
) -> f32 {
	similarities
		.iter()
		.map(|(vector_type, similarity)| weights.weight(*vector_type) * similarity.max(0.0))
		.sum()
}

pub fn usage_signal(usage_count: i64, success_rate: f32, half_saturation: f32) -> f32 {
	if usage_count <= 0 {
		return NEUTRAL_SIGNAL;
	}

	let count = usage_count as f32;
	let trust = count / (count + half_saturation.max(f32::EPSILON));
	let success_rate = success_rate.clamp(0.0, 1.0);

	trust * success_rate + (1.0 - trust) * NEUTRAL_SIGNAL
}

pub fn performance_signal(avg_response_time_ms: Option<f32>, target_ms: f32) -> f32 {
	match avg_response_time_ms {
		Some(avg) if avg.is_finite() && avg > 0.0 => target_ms / (target_ms + avg),
		_ => NEUTRAL_SIGNAL,
	}
}

pub fn context_signal(
	context: Option<&MatchContext>,
	tags: &[String],
	capabilities: &[String],
) -> f32 {
	let Some(context) = context.filter(|context| !context.is_empty()) else {
		return NEUTRAL_SIGNAL;
	};
	let contains = |haystack: &[String], needle: &str| {
		haystack.iter().any(|item| item.eq_ignore_ascii_case(needle.trim()))
	};
	let requested = context.tags.len() + context.tools.len();
	let matched = context.tags.iter().filter(|tag| contains(tags, tag)).count()
		+ context.tools.iter().filter(|tool| contains(capabilities, tool)).count();

	matched as f32 / requested as f32
}

pub fn confidence(weights: &ConfidenceWeights, signals: &SignalBreakdown) -> f32 {
	weights.similarity * signals.similarity
		+ weights.usage * signals.usage
		+ weights.performance * signals.performance
		+ weights.context * signals.context
}

pub fn score_candidate(
	cfg: &Matcher,
	candidate: CandidateSignals<'_>,
	context: Option<&MatchContext>,
) -> ScoredCandidate {
	let weights = resolve_vector_weights(cfg, candidate.resource_type);
	let similarity = combine_similarity(&candidate.similarities, &weights);
	let signals = SignalBreakdown {
		similarity,
		usage: usage_signal(
			candidate.usage_count,
			candidate.success_rate,
			cfg.scoring.usage_half_saturation,
		),
		performance: performance_signal(
			candidate.avg_response_time_ms,
			cfg.scoring.performance_target_ms,
		),
		context: context_signal(context, candidate.tags, candidate.capabilities),
	};
	let confidence_score = confidence(&cfg.confidence_weights, &signals);
	let reasoning = build_reasoning(&candidate.similarities, &signals);

	ScoredCandidate {
		resource_id: candidate.resource_id.to_string(),
		similarity_score: similarity,
		confidence_score,
		final_score: confidence_score,
		vector_similarities: candidate.similarities,
		signals,
		reasoning,
	}
}

/// Orders by final score, then similarity, then resource id, so equal inputs rank identically.
pub fn compare_ranked(lhs: &ScoredCandidate, rhs: &ScoredCandidate) -> Ordering {
	rhs.final_score
		.total_cmp(&lhs.final_score)
		.then_with(|| rhs.similarity_score.total_cmp(&lhs.similarity_score))
		.then_with(|| lhs.resource_id.cmp(&rhs.resource_id))
}

pub fn rank_candidates(
	mut candidates: Vec<ScoredCandidate>,
	min_confidence: f32,
	top_k: usize,
) -> Vec<ScoredCandidate> {
	candidates.retain(|candidate| candidate.confidence_score >= min_confidence);
	candidates.sort_by(compare_ranked);
	candidates.truncate(top_k);

	candidates
}

fn build_reasoning(similarities: &BTreeMap<VectorType, f32>, signals: &SignalBreakdown) -> String {
	let matched: Vec<String> = similarities
		.iter()
		.map(|(vector_type, similarity)| format!("{} {similarity:.2}", vector_type.as_str()))
		.collect();
	let matched = if matched.is_empty() { "none".to_string() } else { matched.join(", ") };

	format!(
		"Vector similarity {:.2} (matched {matched}); usage {:.2}; performance {:.2}; context {:.2}.",
		signals.similarity, signals.usage, signals.performance, signals.context
	)
}
