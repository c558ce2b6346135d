mod error;
mod model;
mod subject;
pub mod time_serde;

pub use error::{Error, Result};
pub use model::{
	AnalysisStep, ExecutionMode, QueryPlan, SqlQueryType, SubQuestion, TimeRange, VectorQuery,
};
pub use subject::SubjectId;

use std::collections::HashMap;

pub fn parse_plan(raw: &str) -> Result<QueryPlan> {
	let mut plan: QueryPlan = serde_json::from_str(raw)?;

	normalize(&mut plan);

	validate(&plan)?;

	Ok(plan)
}

/// Assigns `sq{n}` ids to sub-questions that arrived without one, by 1-based
/// plan position.
pub fn normalize(plan: &mut QueryPlan) {
	for (index, sub) in plan.sub_questions.iter_mut().enumerate() {
		sub.id = sub.id.trim().to_string();

		if sub.id.is_empty() {
			sub.id = format!("sq{}", index + 1);
		}
	}
}

pub fn validate(plan: &QueryPlan) -> Result<()> {
	if plan.sub_questions.is_empty() {
		return Err(Error::InvalidPlan {
			message: "Plan must contain at least one sub-question.".to_string(),
		});
	}

	let mut stages = HashMap::new();

	for sub in &plan.sub_questions {
		if sub.id.is_empty() {
			return Err(Error::InvalidPlan {
				message: "Sub-question ids must be non-empty; run normalize first.".to_string(),
			});
		}
		if stages.insert(sub.id.as_str(), sub.execution_stage).is_some() {
			return Err(Error::InvalidPlan {
				message: format!("Sub-question id {:?} appears more than once.", sub.id),
			});
		}
		if sub.question.trim().is_empty() {
			return Err(Error::InvalidPlan {
				message: format!("Sub-question {} must have a non-empty question.", sub.id),
			});
		}
		if sub.execution_stage == 0 {
			return Err(Error::InvalidPlan {
				message: format!("Sub-question {} executionStage must be 1 or greater.", sub.id),
			});
		}
		if sub.analysis_steps.is_empty() {
			return Err(Error::InvalidPlan {
				message: format!(
					"Sub-question {} must declare at least one analysis step.",
					sub.id
				),
			});
		}

		for (index, step) in sub.analysis_steps.iter().enumerate() {
			validate_step(&sub.id, index, step)?;
		}
	}

	// A dependency must land in a strictly earlier stage; the stage barrier
	// makes anything else unsatisfiable, and the rule also rules out cycles.
	for sub in &plan.sub_questions {
		for dependency in &sub.dependencies {
			match stages.get(dependency.as_str()) {
				None =>
					return Err(Error::InvalidPlan {
						message: format!(
							"Sub-question {} references unknown dependency {dependency:?}.",
							sub.id
						),
					}),
				Some(stage) if *stage >= sub.execution_stage =>
					return Err(Error::InvalidPlan {
						message: format!(
							"Sub-question {} dependency {dependency:?} must run in an earlier execution stage.",
							sub.id
						),
					}),
				Some(_) => {},
			}
		}
	}

	Ok(())
}

fn validate_step(sub_id: &str, index: usize, step: &AnalysisStep) -> Result<()> {
	if let Some(vector) = step.vector_query() {
		if vector.query.trim().is_empty() {
			return Err(Error::InvalidPlan {
				message: format!(
					"Sub-question {sub_id} step {index} vector query text must be non-empty."
				),
			});
		}
		if !vector.threshold.is_finite() || vector.threshold <= 0.0 || vector.threshold > 1.0 {
			return Err(Error::InvalidPlan {
				message: format!(
					"Sub-question {sub_id} step {index} vector threshold must be greater than zero and 1.0 or less."
				),
			});
		}
		if vector.limit == 0 {
			return Err(Error::InvalidPlan {
				message: format!(
					"Sub-question {sub_id} step {index} vector limit must be greater than zero."
				),
			});
		}
	}

	if let Some(range) = step.time_range()
		&& let (Some(start), Some(end)) = (range.start, range.end)
		&& start > end
	{
		return Err(Error::InvalidPlan {
			message: format!(
				"Sub-question {sub_id} step {index} timeRange start must not be after end."
			),
		});
	}

	Ok(())
}
