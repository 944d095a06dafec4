use std::{
	collections::{BTreeMap, HashMap},
	time::Instant,
};

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{BeaconService, Error, Result, ResourceView};
use beacon_config::Matcher;
use beacon_domain::{
	resource::{ResourceType, VectorType},
	scoring::{self, CandidateSignals, MatchContext, ScoredCandidate, SignalBreakdown},
};
use beacon_storage::{
	models::{CandidateRow, MatchHistoryEntry},
	queries,
};

#[derive(Clone, Debug, Deserialize)]
pub struct MatchRequest {
	pub query: String,
	/// Capped at `vector.max_results`.
	#[serde(default)]
	pub top_k: Option<u32>,
	#[serde(default)]
	pub min_confidence: f32,
	#[serde(default)]
	pub resource_types: Option<Vec<ResourceType>>,
	#[serde(default)]
	pub context: Option<MatchContext>,
}

#[derive(Clone, Debug, Serialize)]
pub struct MatchItem {
	pub resource: ResourceView,
	pub similarity_score: f32,
	pub confidence_score: f32,
	pub final_score: f32,
	pub vector_similarities: BTreeMap<VectorType, f32>,
	pub signals: SignalBreakdown,
	pub reasoning: String,
}

#[derive(Clone, Debug, Serialize)]
pub struct MatchResponse {
	pub query: String,
	pub matches: Vec<MatchItem>,
	pub candidates_considered: usize,
	/// Set when the query could not be embedded; `matches` is empty in that case.
	pub embedding_fallback: bool,
	pub duration_ms: u64,
}

impl BeaconService {
	pub async fn match_resources(&self, req: MatchRequest) -> Result<MatchResponse> {
		let started = Instant::now();
		let cfg = self.cfg();
		let query = req.query.trim().to_string();

		if query.is_empty() {
			return Err(Error::InvalidRequest { message: "query must not be empty.".to_string() });
		}
		if !req.min_confidence.is_finite() || !(0.0..=1.0).contains(&req.min_confidence) {
			return Err(Error::InvalidRequest {
				message: "min_confidence must be between 0 and 1.".to_string(),
			});
		}

		let max_results = cfg.vector.max_results.max(1);
		let top_k = req.top_k.unwrap_or(max_results).clamp(1, max_results) as usize;
		let embedded = self.embed_or_zero(&cfg, std::slice::from_ref(&query)).await;

		if let Some(reason) = embedded.fallback {
			tracing::warn!(reason = %reason, "Query embedding failed. Returning no matches.");

			return Ok(MatchResponse {
				query,
				matches: Vec::new(),
				candidates_considered: 0,
				embedding_fallback: true,
				duration_ms: started.elapsed().as_millis() as u64,
			});
		}

		let Some(query_vec) = embedded.vectors.first() else {
			return Err(Error::Provider {
				message: "Embedding provider returned no vectors.".to_string(),
			});
		};
		let type_filter: Option<Vec<String>> = req
			.resource_types
			.as_ref()
			.map(|types| types.iter().map(|kind| kind.as_str().to_string()).collect());
		let rows = queries::fetch_candidates(
			&self.db.pool,
			type_filter.as_deref(),
			cfg.providers.embedding.dimensions as i32,
		)
		.await?;
		let candidates = collect_candidates(&rows, query_vec, cfg.vector.similarity_threshold);
		let candidates_considered = candidates.len();
		let ranked =
			rank(&cfg.matcher, &candidates, req.context.as_ref(), req.min_confidence, top_k);
		let ids: Vec<String> =
			ranked.iter().map(|candidate| candidate.resource_id.clone()).collect();
		let entries = queries::get_registry_entries(&self.db.pool, &ids).await?;
		let mut entries: HashMap<String, ResourceView> = entries
			.into_iter()
			.map(|entry| (entry.resource_id.clone(), ResourceView::from(entry)))
			.collect();
		let matches: Vec<MatchItem> = ranked
			.into_iter()
			.filter_map(|candidate| {
				let resource = entries.remove(&candidate.resource_id)?;

				Some(MatchItem {
					resource,
					similarity_score: candidate.similarity_score,
					confidence_score: candidate.confidence_score,
					final_score: candidate.final_score,
					vector_similarities: candidate.vector_similarities,
					signals: candidate.signals,
					reasoning: candidate.reasoning,
				})
			})
			.collect();
		let duration_ms = started.elapsed().as_millis() as u64;

		self.history.record(MatchHistoryEntry {
			history_id: Uuid::new_v4(),
			query: query.clone(),
			resource_types: type_filter.unwrap_or_default(),
			top_k: top_k as i32,
			min_confidence: req.min_confidence,
			result_ids: matches.iter().map(|item| item.resource.resource_id.clone()).collect(),
			top_score: matches.first().map(|item| item.final_score),
			duration_ms: duration_ms as i64,
			created_at: OffsetDateTime::now_utc(),
		});
		tracing::debug!(
			candidates = candidates_considered,
			returned = matches.len(),
			duration_ms,
			"Match completed."
		);

		Ok(MatchResponse {
			query,
			matches,
			candidates_considered,
			embedding_fallback: false,
			duration_ms,
		})
	}
}

/// Per-resource signals gathered from stored vectors.
#[derive(Clone, Debug)]
struct Candidate<'a> {
	row: &'a CandidateRow,
	resource_type: ResourceType,
	similarities: BTreeMap<VectorType, f32>,
}

/// Groups vectors by resource. A vector counts only when its raw cosine reaches `threshold`; a
/// resource with no such vector is not a candidate.
fn collect_candidates<'a>(
	rows: &'a [CandidateRow],
	query: &[f32],
	threshold: f32,
) -> BTreeMap<&'a str, Candidate<'a>> {
	let mut candidates: BTreeMap<&str, Candidate<'_>> = BTreeMap::new();

	for row in rows {
		let (Ok(vector_type), Ok(resource_type)) =
			(row.vector_type.parse::<VectorType>(), row.resource_type.parse::<ResourceType>())
		else {
			continue;
		};
		let Some(similarity) = scoring::cosine_similarity(query, &row.embedding) else {
			continue;
		};

		if similarity < threshold {
			continue;
		}

		candidates
			.entry(row.resource_id.as_str())
			.or_insert_with(|| Candidate { row, resource_type, similarities: BTreeMap::new() })
			.similarities
			.insert(vector_type, similarity);
	}

	candidates
}

fn rank(
	cfg: &Matcher,
	candidates: &BTreeMap<&str, Candidate<'_>>,
	context: Option<&MatchContext>,
	min_confidence: f32,
	top_k: usize,
) -> Vec<ScoredCandidate> {
	let scored = candidates
		.values()
		.map(|candidate| {
			scoring::score_candidate(
				cfg,
				CandidateSignals {
					resource_id: &candidate.row.resource_id,
					resource_type: candidate.resource_type,
					similarities: candidate.similarities.clone(),
					usage_count: candidate.row.usage_count,
					success_rate: candidate.row.success_rate,
					avg_response_time_ms: candidate.row.avg_response_time_ms,
					tags: &candidate.row.tags,
					capabilities: &candidate.row.capabilities,
				},
				context,
			)
		})
		.collect();

	scoring::rank_candidates(scored, min_confidence, top_k)
}
