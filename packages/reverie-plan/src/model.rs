use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryPlan {
	pub sub_questions: Vec<SubQuestion>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubQuestion {
	#[serde(default)]
	pub id: String,
	pub question: String,
	#[serde(default = "default_stage")]
	pub execution_stage: u32,
	#[serde(default)]
	pub dependencies: Vec<String>,
	/// Advisory hint from the planner. Steps inside a sub-question always run
	/// sequentially; the unit of concurrency is the execution stage.
	#[serde(default)]
	pub execution_mode: ExecutionMode,
	pub analysis_steps: Vec<AnalysisStep>,
	#[serde(default)]
	pub is_mandatory_final_step: bool,
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
	#[default]
	Parallel,
	Sequential,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(tag = "queryType", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum AnalysisStep {
	SqlAnalysis {
		#[serde(default)]
		sql_query: Option<String>,
		#[serde(default)]
		sql_query_type: Option<SqlQueryType>,
		#[serde(default)]
		vector_search: Option<VectorQuery>,
		#[serde(default)]
		time_range: Option<TimeRange>,
	},
	VectorSearch {
		vector_search: VectorQuery,
		#[serde(default)]
		time_range: Option<TimeRange>,
	},
	HybridSearch {
		#[serde(default)]
		sql_query: Option<String>,
		#[serde(default)]
		sql_query_type: Option<SqlQueryType>,
		vector_search: VectorQuery,
		#[serde(default)]
		time_range: Option<TimeRange>,
	},
}
impl AnalysisStep {
	pub fn runs_sql(&self) -> bool {
		matches!(self, Self::SqlAnalysis { .. } | Self::HybridSearch { .. })
	}

	pub fn runs_vector(&self) -> bool {
		matches!(self, Self::VectorSearch { .. } | Self::HybridSearch { .. })
	}

	pub fn sql_query(&self) -> Option<&str> {
		match self {
			Self::SqlAnalysis { sql_query, .. } | Self::HybridSearch { sql_query, .. } =>
				sql_query.as_deref(),
			Self::VectorSearch { .. } => None,
		}
	}

	pub fn sql_query_type(&self) -> Option<SqlQueryType> {
		match self {
			Self::SqlAnalysis { sql_query_type, .. } | Self::HybridSearch { sql_query_type, .. } =>
				*sql_query_type,
			Self::VectorSearch { .. } => None,
		}
	}

	pub fn vector_query(&self) -> Option<&VectorQuery> {
		match self {
			Self::SqlAnalysis { vector_search, .. } => vector_search.as_ref(),
			Self::VectorSearch { vector_search, .. } | Self::HybridSearch { vector_search, .. } =>
				Some(vector_search),
		}
	}

	pub fn time_range(&self) -> Option<&TimeRange> {
		match self {
			Self::SqlAnalysis { time_range, .. }
			| Self::VectorSearch { time_range, .. }
			| Self::HybridSearch { time_range, .. } => time_range.as_ref(),
		}
	}
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SqlQueryType {
	Analysis,
	Filtering,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VectorQuery {
	pub query: String,
	pub threshold: f32,
	pub limit: u32,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeRange {
	#[serde(default, with = "crate::time_serde::option", skip_serializing_if = "Option::is_none")]
	pub start: Option<OffsetDateTime>,
	#[serde(default, with = "crate::time_serde::option", skip_serializing_if = "Option::is_none")]
	pub end: Option<OffsetDateTime>,
}
impl TimeRange {
	pub fn is_bounded(&self) -> bool {
		self.start.is_some() || self.end.is_some()
	}
}

fn default_stage() -> u32 {
	1
}
