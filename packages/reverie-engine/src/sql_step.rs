use serde_json::Value;

use reverie_plan::{AnalysisStep, SqlQueryType, SubQuestion, SubjectId};

use crate::{
	PlanEngine,
	context::SubQuestionResult,
	fallback::{FallbackRequest, FallbackTrigger},
};

/// Planner-facing stand-in for the journal owner inside SQL text. Every
/// occurrence is replaced with the validated subject id before execution.
pub(crate) const SUBJECT_PLACEHOLDER: &str = "auth.uid()";

const AGGREGATE_KEY_HINTS: &[&str] = &["count", "total", "avg", "average", "sum", "percentage"];
const CONNECTIVITY_HINTS: &[&str] = &[
	"timeout",
	"timed out",
	"connect",
	"network",
	"unreachable",
	"refused",
	"temporarily unavailable",
	"dns",
	"fetch failed",
];

enum SqlStepOutcome {
	Rows(Vec<Value>),
	NeedsFallback(FallbackTrigger),
	Failed(String),
}

impl PlanEngine {
	pub(crate) async fn run_sql_portion(
		&self,
		sub: &SubQuestion,
		step: &AnalysisStep,
		subject_id: &str,
		result: &mut SubQuestionResult,
	) {
		match self.execute_sql_step(step, subject_id).await {
			SqlStepOutcome::Rows(rows) => {
				tracing::debug!(sub_question = %sub.id, rows = rows.len(), "SQL step returned rows.");

				result.sql_rows.get_or_insert_with(Vec::new).extend(rows);
			},
			SqlStepOutcome::Failed(message) => {
				tracing::warn!(
					sub_question = %sub.id,
					error = %message,
					"SQL step failed with no fallback path."
				);

				result.errors.push(message);
			},
			SqlStepOutcome::NeedsFallback(trigger) => {
				// An empty filtering result is a legitimate SQL outcome, not an error.
				if matches!(trigger, FallbackTrigger::EmptyFiltering) {
					result.sql_rows.get_or_insert_with(Vec::new);
				} else {
					result.errors.push(trigger.describe());
				}

				let outcome = self
					.run_fallback(FallbackRequest {
						sub_question: sub,
						vector_query: step.vector_query(),
						time_range: step.time_range(),
						subject_id,
						trigger,
					})
					.await;

				result.errors.extend(outcome.errors);

				if !outcome.rows.is_empty() {
					result.vector_rows.get_or_insert_with(Vec::new).extend(outcome.rows);
				}
				if outcome.provenance.is_some() {
					result.fallback = outcome.provenance;
				}
			},
		}
	}

	async fn execute_sql_step(&self, step: &AnalysisStep, subject_id: &str) -> SqlStepOutcome {
		let subject = match SubjectId::parse(subject_id) {
			Ok(subject) => subject,
			Err(err) =>
				return SqlStepOutcome::NeedsFallback(FallbackTrigger::Sanitization(err.to_string())),
		};
		let Some(raw_query) = step.sql_query() else {
			return SqlStepOutcome::NeedsFallback(FallbackTrigger::MissingSqlQuery);
		};
		let query = prepare_query(raw_query, &subject);

		match self.providers.relational.exec(&self.cfg.datastore, &query, subject.as_str()).await {
			Ok(response) if response.success => interpret_rows(step.sql_query_type(), response.rows),
			Ok(response) => classify_exec_failure(
				response.error.unwrap_or_else(|| "SQL execution failed without detail.".to_string()),
			),
			Err(err) => classify_exec_failure(format!("SQL execution failed: {err}")),
		}
	}
}

fn classify_exec_failure(message: String) -> SqlStepOutcome {
	if is_connectivity_error(&message) {
		SqlStepOutcome::NeedsFallback(FallbackTrigger::Connectivity(message))
	} else {
		SqlStepOutcome::Failed(message)
	}
}

fn interpret_rows(declared: Option<SqlQueryType>, rows: Vec<Value>) -> SqlStepOutcome {
	if resolve_query_type(declared, &rows) == SqlQueryType::Filtering && rows.is_empty() {
		SqlStepOutcome::NeedsFallback(FallbackTrigger::EmptyFiltering)
	} else {
		SqlStepOutcome::Rows(rows)
	}
}

/// A declared query type always wins; otherwise the first row's shape decides,
/// and a rowless result is treated as filtering so the fallback ladder engages.
fn resolve_query_type(declared: Option<SqlQueryType>, rows: &[Value]) -> SqlQueryType {
	match declared {
		Some(declared) => declared,
		None => match rows.first() {
			Some(row) if is_aggregate_row(row) => SqlQueryType::Analysis,
			_ => SqlQueryType::Filtering,
		},
	}
}

fn is_aggregate_row(row: &Value) -> bool {
	let Some(map) = row.as_object() else { return false };

	map.keys().any(|key| {
		let key = key.to_ascii_lowercase();

		AGGREGATE_KEY_HINTS.iter().any(|hint| key.contains(hint))
	})
}

/// Trims the statement, strips trailing terminators and substitutes the
/// subject placeholder with the quoted normalized id.
fn prepare_query(raw: &str, subject: &SubjectId) -> String {
	let mut query = raw.trim();

	while let Some(stripped) = query.strip_suffix(';') {
		query = stripped.trim_end();
	}

	query.replace(SUBJECT_PLACEHOLDER, &format!("'{}'", subject.as_str()))
}

pub(crate) fn baseline_query(subject: &SubjectId, limit: u32) -> String {
	let canned = format!(
		"SELECT id, content, created_at, themes, emotions FROM journal_entries WHERE user_id = {SUBJECT_PLACEHOLDER} ORDER BY created_at DESC LIMIT {limit}"
	);

	prepare_query(&canned, subject)
}

fn is_connectivity_error(message: &str) -> bool {
	let lowered = message.to_ascii_lowercase();

	CONNECTIVITY_HINTS.iter().any(|hint| lowered.contains(hint))
}
