use std::collections::HashMap;

use serde_json::Value;

use reverie_plan::SubQuestion;
use reverie_providers::datastore::EntryMatch;

use crate::fallback::FallbackProvenance;

/// Everything one sub-question produced during execution.
///
/// `sql_rows` distinguishes "never ran SQL" (`None`) from "ran SQL and matched
/// nothing" (`Some` of an empty vec); classification relies on that difference.
#[derive(Clone, Debug)]
pub struct SubQuestionResult {
	pub sub_question: SubQuestion,
	pub sql_rows: Option<Vec<Value>>,
	pub vector_rows: Option<Vec<EntryMatch>>,
	pub errors: Vec<String>,
	pub fallback: Option<FallbackProvenance>,
}
impl SubQuestionResult {
	pub fn new(sub_question: SubQuestion) -> Self {
		Self { sub_question, sql_rows: None, vector_rows: None, errors: Vec::new(), fallback: None }
	}

	pub fn row_count(&self) -> usize {
		self.sql_rows.as_ref().map(Vec::len).unwrap_or(0)
			+ self.vector_rows.as_ref().map(Vec::len).unwrap_or(0)
	}
}

/// Results accumulated across stages, keyed by sub-question id.
///
/// Later stages read earlier results from here; nothing is ever overwritten
/// because ids are unique after plan validation.
#[derive(Debug, Default)]
pub struct ExecutionContext {
	results: HashMap<String, SubQuestionResult>,
}
impl ExecutionContext {
	pub fn insert(&mut self, result: SubQuestionResult) {
		self.results.insert(result.sub_question.id.clone(), result);
	}

	pub fn result(&self, id: &str) -> Option<&SubQuestionResult> {
		self.results.get(id)
	}

	pub fn len(&self) -> usize {
		self.results.len()
	}

	pub fn is_empty(&self) -> bool {
		self.results.is_empty()
	}
}
