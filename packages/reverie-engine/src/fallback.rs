//! Progressive recovery when a SQL step cannot produce rows.
//!
//! Four levels run in order, each only if the previous one found nothing:
//! lowered-threshold retries inside the original time range, widened time
//! ranges, an unconstrained search, and finally a plain fetch of the most
//! recent entries. The first level that matches wins and stamps the result
//! with its provenance.

use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};

use reverie_plan::{SubQuestion, SubjectId, TimeRange, VectorQuery};
use reverie_providers::datastore::EntryMatch;

use crate::{PlanEngine, sql_step};

pub(crate) struct FallbackRequest<'a> {
	pub sub_question: &'a SubQuestion,
	pub vector_query: Option<&'a VectorQuery>,
	pub time_range: Option<&'a TimeRange>,
	pub subject_id: &'a str,
	pub trigger: FallbackTrigger,
}

#[derive(Clone, Debug)]
pub(crate) enum FallbackTrigger {
	Sanitization(String),
	MissingSqlQuery,
	Connectivity(String),
	EmptyFiltering,
}
impl FallbackTrigger {
	pub(crate) fn describe(&self) -> String {
		match self {
			Self::Sanitization(message) => format!("Subject validation failed: {message}"),
			Self::MissingSqlQuery => "SQL step carried no query text.".to_string(),
			Self::Connectivity(message) => format!("SQL connectivity failure: {message}"),
			Self::EmptyFiltering => "Filtering query matched no entries.".to_string(),
		}
	}
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackLevel {
	TimeConstrainedSearch,
	ExpandedTimeRange,
	UnconstrainedSearch,
	BaselineFetch,
}

/// Records which fallback level produced the rows and under what terms, so a
/// caller can tell relaxed results from first-try results.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FallbackProvenance {
	pub level: FallbackLevel,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub threshold: Option<f32>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub original_range: Option<TimeRange>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub substituted_range: Option<TimeRange>,
	pub time_constraint_dropped: bool,
	pub trigger: String,
}

#[derive(Debug, Default)]
pub(crate) struct FallbackOutcome {
	pub rows: Vec<EntryMatch>,
	pub provenance: Option<FallbackProvenance>,
	pub errors: Vec<String>,
}

struct LadderContext<'a> {
	embedding: &'a [f32],
	primary_threshold: f32,
	base_limit: u32,
	subject_id: &'a str,
	sub_question_id: &'a str,
	trigger: &'a str,
}

impl PlanEngine {
	pub(crate) async fn run_fallback(&self, request: FallbackRequest<'_>) -> FallbackOutcome {
		let mut outcome = FallbackOutcome::default();
		let trigger = request.trigger.describe();
		let query_text = request
			.vector_query
			.map(|vector| vector.query.as_str())
			.unwrap_or(request.sub_question.question.as_str());
		let primary_threshold = request
			.vector_query
			.map(|vector| vector.threshold)
			.unwrap_or(self.cfg.engine.default_threshold);
		let base_limit =
			request.vector_query.map(|vector| vector.limit).unwrap_or(self.cfg.engine.default_limit);

		tracing::info!(
			sub_question = %request.sub_question.id,
			trigger = %trigger,
			"Entering fallback ladder."
		);

		let embedding = match self
			.providers
			.embedding
			.embed(&self.cfg.providers.embedding, query_text)
			.await
		{
			Ok(embedding) => Some(embedding),
			Err(err) => {
				outcome.errors.push(format!("Fallback embedding failed: {err}"));

				None
			},
		};
		let bounded = request.time_range.filter(|range| range.is_bounded());

		if let Some(embedding) = embedding.as_deref() {
			let ladder = LadderContext {
				embedding,
				primary_threshold,
				base_limit,
				subject_id: request.subject_id,
				sub_question_id: &request.sub_question.id,
				trigger: &trigger,
			};

			if let Some(range) = bounded {
				self.bounded_retries(&ladder, range, &mut outcome).await;

				if outcome.rows.is_empty() {
					self.expanded_ranges(&ladder, range, OffsetDateTime::now_utc(), &mut outcome).await;
				}
			}
			if outcome.rows.is_empty() {
				self.unconstrained_retries(&ladder, bounded, &mut outcome).await;
			}
		}
		if outcome.rows.is_empty() {
			self.baseline_fetch(request.subject_id, bounded, &trigger, &mut outcome).await;
		}
		if outcome.rows.is_empty() {
			tracing::warn!(
				sub_question = %request.sub_question.id,
				"Fallback ladder exhausted without matches."
			);
		}

		outcome
	}

	async fn bounded_retries(
		&self,
		ladder: &LadderContext<'_>,
		range: &TimeRange,
		outcome: &mut FallbackOutcome,
	) {
		let policy = &self.cfg.fallback;
		let limit = ladder.base_limit.saturating_mul(policy.bounded_limit_multiplier);

		for threshold in threshold_ladder(
			ladder.primary_threshold,
			policy.threshold_decrement,
			policy.ladder_steps,
			policy.threshold_floor_bounded,
		) {
			match self
				.search_with_embedding(ladder.embedding, threshold, limit, Some(range), ladder.subject_id)
				.await
			{
				Ok(rows) if rows.is_empty() => {},
				Ok(rows) => {
					tracing::info!(
						sub_question = %ladder.sub_question_id,
						threshold,
						rows = rows.len(),
						"Time-constrained fallback search matched."
					);

					outcome.rows = rows;
					outcome.provenance = Some(FallbackProvenance {
						level: FallbackLevel::TimeConstrainedSearch,
						threshold: Some(threshold),
						original_range: Some(range.clone()),
						substituted_range: None,
						time_constraint_dropped: false,
						trigger: ladder.trigger.to_string(),
					});

					return;
				},
				Err(err) =>
					outcome.errors.push(format!("Time-constrained fallback search failed: {err}")),
			}
		}
	}

	async fn expanded_ranges(
		&self,
		ladder: &LadderContext<'_>,
		range: &TimeRange,
		now: OffsetDateTime,
		outcome: &mut FallbackOutcome,
	) {
		let policy = &self.cfg.fallback;
		let limit = ladder.base_limit.saturating_mul(policy.bounded_limit_multiplier);
		// Widened ranges are probed at the loosest threshold the bounded ladder
		// already reached.
		let threshold = threshold_ladder(
			ladder.primary_threshold,
			policy.threshold_decrement,
			policy.ladder_steps,
			policy.threshold_floor_bounded,
		)
		.last()
		.copied()
		.unwrap_or(ladder.primary_threshold);

		for candidate in expansion_candidates(range, now, &policy.expansion_lookback_days) {
			match self
				.search_with_embedding(
					ladder.embedding,
					threshold,
					limit,
					Some(&candidate),
					ladder.subject_id,
				)
				.await
			{
				Ok(rows) if rows.is_empty() => {},
				Ok(rows) => {
					tracing::info!(
						sub_question = %ladder.sub_question_id,
						threshold,
						rows = rows.len(),
						"Expanded time range fallback search matched."
					);

					outcome.rows = rows;
					outcome.provenance = Some(FallbackProvenance {
						level: FallbackLevel::ExpandedTimeRange,
						threshold: Some(threshold),
						original_range: Some(range.clone()),
						substituted_range: Some(candidate),
						time_constraint_dropped: false,
						trigger: ladder.trigger.to_string(),
					});

					return;
				},
				Err(err) =>
					outcome.errors.push(format!("Expanded time range fallback search failed: {err}")),
			}
		}
	}

	async fn unconstrained_retries(
		&self,
		ladder: &LadderContext<'_>,
		original_range: Option<&TimeRange>,
		outcome: &mut FallbackOutcome,
	) {
		let policy = &self.cfg.fallback;

		for threshold in threshold_ladder(
			ladder.primary_threshold,
			policy.threshold_decrement,
			policy.ladder_steps,
			policy.threshold_floor_unbounded,
		) {
			match self
				.search_with_embedding(ladder.embedding, threshold, ladder.base_limit, None, ladder.subject_id)
				.await
			{
				Ok(rows) if rows.is_empty() => {},
				Ok(rows) => {
					tracing::warn!(
						sub_question = %ladder.sub_question_id,
						threshold,
						rows = rows.len(),
						"Unconstrained fallback search matched; time constraints dropped."
					);

					outcome.rows = rows;
					outcome.provenance = Some(FallbackProvenance {
						level: FallbackLevel::UnconstrainedSearch,
						threshold: Some(threshold),
						original_range: original_range.cloned(),
						substituted_range: None,
						time_constraint_dropped: original_range.is_some(),
						trigger: ladder.trigger.to_string(),
					});

					return;
				},
				Err(err) => outcome.errors.push(format!("Unconstrained fallback search failed: {err}")),
			}
		}
	}

	/// Last resort: fetch the subject's most recent entries through the SQL
	/// procedure. Requires a valid subject, so a sanitization trigger can never
	/// reach the datastore from here either.
	async fn baseline_fetch(
		&self,
		subject_id: &str,
		original_range: Option<&TimeRange>,
		trigger: &str,
		outcome: &mut FallbackOutcome,
	) {
		let subject = match SubjectId::parse(subject_id) {
			Ok(subject) => subject,
			Err(err) => {
				outcome.errors.push(format!("Baseline fetch skipped: {err}"));

				return;
			},
		};
		let query = sql_step::baseline_query(&subject, self.cfg.fallback.baseline_limit);

		match self.providers.relational.exec(&self.cfg.datastore, &query, subject.as_str()).await {
			Ok(response) if response.success => {
				let rows: Vec<EntryMatch> = response
					.rows
					.into_iter()
					.filter_map(|row| serde_json::from_value(row).ok())
					.collect();

				if rows.is_empty() {
					return;
				}

				tracing::info!(rows = rows.len(), "Baseline fetch returned recent entries.");

				outcome.rows = rows;
				outcome.provenance = Some(FallbackProvenance {
					level: FallbackLevel::BaselineFetch,
					threshold: None,
					original_range: original_range.cloned(),
					substituted_range: None,
					time_constraint_dropped: original_range.is_some(),
					trigger: trigger.to_string(),
				});
			},
			Ok(response) => outcome.errors.push(format!(
				"Baseline fetch failed: {}",
				response.error.unwrap_or_else(|| "unknown error".to_string())
			)),
			Err(err) => outcome.errors.push(format!("Baseline fetch failed: {err}")),
		}
	}
}

/// Descending thresholds starting at the primary value, decremented per step
/// and clamped so they never rise above the primary or sink below the floor.
/// Consecutive duplicates collapse, so a primary already at the floor yields a
/// single probe.
pub(crate) fn threshold_ladder(primary: f32, decrement: f32, steps: u32, floor: f32) -> Vec<f32> {
	let floor = floor.min(primary);
	let mut ladder = Vec::with_capacity(steps as usize);

	for step in 0..steps {
		let candidate = round_threshold((primary - decrement * step as f32).max(floor));

		if ladder.last().map(|last: &f32| (last - candidate).abs() > f32::EPSILON).unwrap_or(true) {
			ladder.push(candidate);
		}
	}

	ladder
}

// Keeps decrement arithmetic from leaking float noise into request payloads.
fn round_threshold(value: f32) -> f32 {
	(value * 10_000.0).round() / 10_000.0
}

/// Candidate replacement ranges, widest-intent first: the original range
/// doubled around its midpoint (capped at `now`), the original extended
/// backwards by its own span, then fixed lookback windows ending at the
/// original end when they are strictly wider than the original span.
pub(crate) fn expansion_candidates(
	range: &TimeRange,
	now: OffsetDateTime,
	lookback_days: &[i64],
) -> Vec<TimeRange> {
	let mut candidates = Vec::new();
	let end = range.end.unwrap_or(now);
	let span = range.start.filter(|start| *start <= end).map(|start| end - start);

	if let Some(start) = range.start
		&& let Some(span) = span
	{
		let half: Duration = span / 2;

		push_candidate(&mut candidates, TimeRange {
			start: Some(start - half),
			end: Some((end + half).min(now)),
		});
		push_candidate(&mut candidates, TimeRange { start: Some(start - span), end: Some(end) });
	}

	for days in lookback_days {
		let lookback = Duration::days(*days);

		if span.map(|span| lookback > span).unwrap_or(true) {
			push_candidate(&mut candidates, TimeRange { start: Some(end - lookback), end: Some(end) });
		}
	}

	candidates
}

fn push_candidate(candidates: &mut Vec<TimeRange>, candidate: TimeRange) {
	if !candidates.contains(&candidate) {
		candidates.push(candidate);
	}
}
