use std::time::Duration;

use tokio::time;

use crate::BeaconService;
use beacon_config::Config;

/// Embedding results. `fallback` carries the reason when the vectors are zero-filled
/// substitutes rather than provider output.
#[derive(Clone, Debug)]
pub struct Embedded {
	pub vectors: Vec<Vec<f32>>,
	pub fallback: Option<String>,
}
impl Embedded {
	pub fn is_fallback(&self) -> bool {
		self.fallback.is_some()
	}
}

impl BeaconService {
	/// Embeds `texts` in provider batches. Never fails: provider errors, timeouts, malformed
	/// responses and blank input all yield zero vectors of the configured dimension.
	pub async fn embed_or_zero(&self, cfg: &Config, texts: &[String]) -> Embedded {
		let dimensions = cfg.providers.embedding.dimensions as usize;

		if texts.iter().any(|text| text.trim().is_empty()) {
			return zero_filled(texts.len(), dimensions, "Empty input.".to_string());
		}

		let timeout = Duration::from_secs(cfg.vector.timeout_seconds);
		let batch_size = (cfg.vector.batch_size as usize).max(1);
		let mut vectors = Vec::with_capacity(texts.len());

		for batch in texts.chunks(batch_size) {
			let call = self.providers.embedding.embed(&cfg.providers.embedding, batch);
			let reason = match time::timeout(timeout, call).await {
				Ok(Ok(embedded)) => match shape_error(&embedded, batch.len(), dimensions) {
					None => {
						vectors.extend(embedded);

						continue;
					},
					Some(reason) => reason,
				},
				Ok(Err(err)) => format!("Embedding provider failed: {err}"),
				Err(_) => format!("Embedding provider timed out after {}s.", timeout.as_secs()),
			};

			tracing::warn!(
				provider_id = %cfg.providers.embedding.provider_id,
				texts = texts.len(),
				reason = %reason,
				"Embedding failed. Substituting zero vectors."
			);

			return zero_filled(texts.len(), dimensions, reason);
		}

		Embedded { vectors, fallback: None }
	}
}

fn shape_error(vectors: &[Vec<f32>], expected: usize, dimensions: usize) -> Option<String> {
	if vectors.len() != expected {
		return Some(format!(
			"Embedding provider returned {} vectors for {expected} texts.",
			vectors.len()
		));
	}

	vectors.iter().find(|vector| vector.len() != dimensions).map(|vector| {
		format!("Embedding dimension mismatch: expected {dimensions}, got {}.", vector.len())
	})
}

fn zero_filled(count: usize, dimensions: usize, reason: String) -> Embedded {
	Embedded { vectors: vec![vec![0.0; dimensions]; count], fallback: Some(reason) }
}
