use reverie_plan::{AnalysisStep, SubQuestion, TimeRange, VectorQuery};
use reverie_providers::datastore::{EntryMatch, SemanticSearchArgs};

use crate::{PlanEngine, context::SubQuestionResult};

impl PlanEngine {
	pub(crate) async fn run_vector_portion(
		&self,
		sub: &SubQuestion,
		step: &AnalysisStep,
		subject_id: &str,
		result: &mut SubQuestionResult,
	) {
		let Some(vector) = step.vector_query() else { return };

		match self.search_vector(vector, step.time_range(), subject_id).await {
			Ok(rows) => {
				tracing::debug!(sub_question = %sub.id, rows = rows.len(), "Vector step returned entries.");

				result.vector_rows.get_or_insert_with(Vec::new).extend(rows);
			},
			Err(err) => {
				tracing::warn!(sub_question = %sub.id, error = %err, "Vector step failed.");

				result.errors.push(format!("Vector search failed: {err}"));
				result.vector_rows.get_or_insert_with(Vec::new);
			},
		}
	}

	async fn search_vector(
		&self,
		vector: &VectorQuery,
		time_range: Option<&TimeRange>,
		subject_id: &str,
	) -> color_eyre::Result<Vec<EntryMatch>> {
		let embedding =
			self.providers.embedding.embed(&self.cfg.providers.embedding, &vector.query).await?;

		self.search_with_embedding(&embedding, vector.threshold, vector.limit, time_range, subject_id)
			.await
	}

	/// Routes to the bounded search procedure only when the range has at least
	/// one bound; otherwise the unbounded one is used.
	pub(crate) async fn search_with_embedding(
		&self,
		embedding: &[f32],
		threshold: f32,
		limit: u32,
		time_range: Option<&TimeRange>,
		subject_id: &str,
	) -> color_eyre::Result<Vec<EntryMatch>> {
		let args = SemanticSearchArgs {
			embedding,
			threshold,
			limit,
			subject_id,
			start: time_range.and_then(|range| range.start),
			end: time_range.and_then(|range| range.end),
		};

		match time_range {
			Some(range) if range.is_bounded() =>
				self.providers.semantic.search_bounded(&self.cfg.datastore, args).await,
			_ => self.providers.semantic.search(&self.cfg.datastore, args).await,
		}
	}
}
