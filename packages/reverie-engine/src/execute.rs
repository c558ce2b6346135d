use std::{collections::BTreeMap, time::Duration};

use futures::future;
use tokio::time::{Instant, timeout_at};

use reverie_plan::{QueryPlan, SubQuestion};

use crate::{
	PlanEngine,
	classify::{self, ExecutionSummary},
	context::{ExecutionContext, SubQuestionResult},
	error::Result,
};

impl PlanEngine {
	/// Runs a plan to completion and returns one summary per sub-question, in
	/// the plan's original order.
	///
	/// Stages execute in ascending order and a stage never starts before the
	/// previous one finished; sub-questions inside one stage run concurrently.
	/// Only structural plan defects fail the call. Anything that goes wrong
	/// inside a sub-question is recorded on its summary instead.
	pub async fn execute_plan(
		&self,
		mut plan: QueryPlan,
		subject_id: &str,
		total_entries: i64,
	) -> Result<Vec<ExecutionSummary>> {
		reverie_plan::normalize(&mut plan);
		reverie_plan::validate(&plan)?;

		let deadline = self
			.cfg
			.engine
			.plan_deadline_ms
			.map(|ms| Instant::now() + Duration::from_millis(ms));
		let stages = stage_partition(&plan);
		let mut ctx = ExecutionContext::default();

		tracing::info!(
			sub_questions = plan.sub_questions.len(),
			stages = stages.len(),
			"Executing query plan."
		);

		for (stage, subs) in &stages {
			if let Some(deadline) = deadline
				&& Instant::now() >= deadline
			{
				record_expired(&mut ctx, *stage, subs);

				continue;
			}

			tracing::debug!(stage, sub_questions = subs.len(), "Starting execution stage.");

			let batch =
				future::join_all(subs.iter().map(|sub| self.run_sub_question(sub, subject_id, &ctx)));
			let results = match deadline {
				Some(deadline) => match timeout_at(deadline, batch).await {
					Ok(results) => results,
					Err(_) => {
						record_expired(&mut ctx, *stage, subs);

						continue;
					},
				},
				None => batch.await,
			};

			for result in results {
				if !result.errors.is_empty() {
					tracing::warn!(
						sub_question = %result.sub_question.id,
						errors = result.errors.len(),
						"Sub-question completed with recorded errors."
					);
				}

				ctx.insert(result);
			}
		}

		tracing::info!(recorded = ctx.len(), "Plan execution finished; classifying results.");

		Ok(plan
			.sub_questions
			.iter()
			.map(|sub| summarize(&ctx, sub, total_entries, &self.cfg.engine))
			.collect())
	}

	async fn run_sub_question(
		&self,
		sub: &SubQuestion,
		subject_id: &str,
		ctx: &ExecutionContext,
	) -> SubQuestionResult {
		for dependency in &sub.dependencies {
			if let Some(result) = ctx.result(dependency) {
				tracing::debug!(
					sub_question = %sub.id,
					dependency = %dependency,
					rows = result.row_count(),
					"Dependency result available from an earlier stage."
				);
			}
		}

		let mut result = SubQuestionResult::new(sub.clone());

		// Steps inside one sub-question run sequentially; a hybrid step runs
		// its SQL portion before its vector portion.
		for step in &sub.analysis_steps {
			if step.runs_sql() {
				self.run_sql_portion(sub, step, subject_id, &mut result).await;
			}
			if step.runs_vector() {
				self.run_vector_portion(sub, step, subject_id, &mut result).await;
			}
		}

		result
	}
}

fn stage_partition(plan: &QueryPlan) -> BTreeMap<u32, Vec<&SubQuestion>> {
	let mut stages: BTreeMap<u32, Vec<&SubQuestion>> = BTreeMap::new();

	for sub in &plan.sub_questions {
		stages.entry(sub.execution_stage).or_default().push(sub);
	}

	stages
}

fn record_expired(ctx: &mut ExecutionContext, stage: u32, subs: &[&SubQuestion]) {
	tracing::warn!(stage, "Plan deadline exceeded; skipping stage.");

	for sub in subs {
		let mut result = SubQuestionResult::new((*sub).clone());

		result.errors.push("Sub-question did not complete before the plan deadline.".to_string());
		ctx.insert(result);
	}
}

fn summarize(
	ctx: &ExecutionContext,
	sub: &SubQuestion,
	total_entries: i64,
	cfg: &reverie_config::Engine,
) -> ExecutionSummary {
	match ctx.result(&sub.id) {
		Some(result) => classify::classify(result, total_entries, cfg),
		None => {
			let mut result = SubQuestionResult::new(sub.clone());

			result.errors.push("No execution result was recorded.".to_string());

			classify::classify(&result, total_entries, cfg)
		},
	}
}
