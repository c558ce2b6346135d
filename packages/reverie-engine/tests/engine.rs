use std::{sync::Arc, time::Duration};

use serde_json::json;
use time::OffsetDateTime;

use reverie_config::Config;
use reverie_engine::{DataType, Error, FallbackLevel, PlanEngine, ResultType};
use reverie_plan::{
	AnalysisStep, ExecutionMode, QueryPlan, SqlQueryType, SubQuestion, TimeRange, VectorQuery,
};
use reverie_testkit::{
	FailingEmbedding, ScriptedStore, StaticEmbedding, engine_config, entry, scripted_providers,
};

const SUBJECT: &str = "6fa459ea-ee8a-3ca4-894e-db77e160355e";

fn vector_query(text: &str) -> VectorQuery {
	VectorQuery { query: text.to_string(), threshold: 0.3, limit: 5 }
}

fn sql_step(query: &str) -> AnalysisStep {
	AnalysisStep::SqlAnalysis {
		sql_query: Some(query.to_string()),
		sql_query_type: None,
		vector_search: None,
		time_range: None,
	}
}

fn filtering_step(query: &str, hint: &str, time_range: Option<TimeRange>) -> AnalysisStep {
	AnalysisStep::SqlAnalysis {
		sql_query: Some(query.to_string()),
		sql_query_type: Some(SqlQueryType::Filtering),
		vector_search: Some(vector_query(hint)),
		time_range,
	}
}

fn vector_step(text: &str) -> AnalysisStep {
	AnalysisStep::VectorSearch { vector_search: vector_query(text), time_range: None }
}

fn sub_question(id: &str, stage: u32, steps: Vec<AnalysisStep>) -> SubQuestion {
	SubQuestion {
		id: id.to_string(),
		question: format!("What does {id} ask about my journal?"),
		execution_stage: stage,
		dependencies: Vec::new(),
		execution_mode: ExecutionMode::default(),
		analysis_steps: steps,
		is_mandatory_final_step: false,
	}
}

fn plan_of(sub_questions: Vec<SubQuestion>) -> QueryPlan {
	QueryPlan { sub_questions }
}

fn engine(store: &Arc<ScriptedStore>) -> PlanEngine {
	engine_with(engine_config(), store)
}

fn engine_with(cfg: Config, store: &Arc<ScriptedStore>) -> PlanEngine {
	PlanEngine::with_providers(
		cfg,
		scripted_providers(Arc::new(StaticEmbedding(vec![0.1, 0.2, 0.3])), store.clone()),
	)
}

#[tokio::test]
async fn summaries_follow_plan_order_across_stages() {
	let store = ScriptedStore::new();

	store.push_exec_rows(vec![json!({ "total_entries": 12 })]);
	store.push_search(vec![entry(1, "stage one entry", Some(0.9))]);
	store.push_search(vec![entry(2, "stage two entry", Some(0.8))]);

	// sq2 runs in stage 2 but sits second in the plan; output order must not
	// follow execution order.
	let plan = plan_of(vec![
		sub_question("sq1", 1, vec![sql_step("SELECT COUNT(*) AS total_entries FROM journal_entries WHERE user_id = auth.uid()")]),
		sub_question("sq2", 2, vec![vector_step("what did the later stage find")]),
		sub_question("sq3", 1, vec![vector_step("what did the earlier stage find")]),
	]);
	let summaries = engine(&store).execute_plan(plan, SUBJECT, 40).await.unwrap();

	assert_eq!(summaries.len(), 3);
	assert_eq!(summaries[0].sub_question_id, "sq1");
	assert_eq!(summaries[0].result_type, ResultType::CountAnalysis);
	assert_eq!(summaries[0].count, 12);
	assert_eq!(summaries[1].sub_question_id, "sq2");
	assert_eq!(summaries[1].sample_entries[0].content, "stage two entry");
	assert_eq!(summaries[2].sub_question_id, "sq3");
	assert_eq!(summaries[2].sample_entries[0].content, "stage one entry");

	// The stage barrier means sq3's search was served before sq2's.
	let searches = store.recorded_searches();

	assert_eq!(searches.len(), 2);
}

#[tokio::test]
async fn sql_placeholder_is_substituted_before_execution() {
	let store = ScriptedStore::new();

	store.push_exec_rows(vec![json!({ "total_entries": 3 })]);

	let plan = plan_of(vec![sub_question(
		"sq1",
		1,
		vec![sql_step("SELECT COUNT(*) AS total_entries FROM journal_entries WHERE user_id = auth.uid();")],
	)]);

	engine(&store).execute_plan(plan, SUBJECT, 10).await.unwrap();

	let executed = store.executed_sql();

	assert_eq!(executed.len(), 1);
	assert!(executed[0].contains("'6fa459ea-ee8a-3ca4-894e-db77e160355e'"));
	assert!(!executed[0].contains("auth.uid()"));
	assert!(!executed[0].ends_with(';'));
}

#[tokio::test]
async fn invalid_subject_never_reaches_sql() {
	let store = ScriptedStore::new();

	// Fallback still probes the semantic index, which takes the subject as an
	// opaque filter value.
	store.push_search(Vec::new());
	store.push_search(Vec::new());
	store.push_search(Vec::new());

	let plan = plan_of(vec![sub_question(
		"sq1",
		1,
		vec![sql_step("SELECT COUNT(*) FROM journal_entries WHERE user_id = auth.uid()")],
	)]);
	let subject = "not-a-uuid'; DROP TABLE journal_entries;--";
	let summaries = engine(&store).execute_plan(plan, subject, 10).await.unwrap();

	assert!(store.executed_sql().is_empty());
	assert_eq!(summaries[0].result_type, ResultType::NoResults);

	let errors = summaries[0].errors.join(" ");

	assert!(errors.contains("Subject validation failed"));
	assert!(errors.contains("Baseline fetch skipped"));
}

#[tokio::test]
async fn failed_sql_is_recorded_and_other_sub_questions_continue() {
	let store = ScriptedStore::new();

	store.push_exec_transport_error("permission denied for table journal_entries");
	store.push_search(vec![entry(7, "an unrelated memory", Some(0.7))]);

	let plan = plan_of(vec![
		sub_question("sq1", 1, vec![sql_step("SELECT COUNT(*) FROM journal_entries WHERE user_id = auth.uid()")]),
		sub_question("sq2", 1, vec![vector_step("what else happened")]),
	]);
	let summaries = engine(&store).execute_plan(plan, SUBJECT, 10).await.unwrap();

	// A non-connectivity SQL failure is terminal for the step: no fallback
	// searches beyond sq2's own.
	assert_eq!(store.recorded_searches().len(), 1);
	assert_eq!(summaries[0].result_type, ResultType::NoResults);
	assert!(summaries[0].errors[0].contains("permission denied"));
	assert_eq!(summaries[1].result_type, ResultType::SemanticSearch);
}

#[tokio::test]
async fn empty_filtering_walks_the_threshold_ladder_then_expands_the_range() {
	let store = ScriptedStore::new();
	let now = OffsetDateTime::now_utc();
	let range = TimeRange {
		start: Some(now - time::Duration::days(40)),
		end: Some(now - time::Duration::days(30)),
	};

	store.push_exec_rows(Vec::new());
	// Bounded ladder: 0.3, 0.25, 0.2 all come back empty.
	store.push_search(Vec::new());
	store.push_search(Vec::new());
	store.push_search(Vec::new());
	// Expansion: the doubled range misses, the backward extension hits.
	store.push_search(Vec::new());
	store.push_search(vec![entry(3, "an older entry about running", Some(0.4))]);

	let plan = plan_of(vec![sub_question(
		"sq1",
		1,
		vec![filtering_step(
			"SELECT id, content FROM journal_entries WHERE user_id = auth.uid() AND content ILIKE '%running%'",
			"entries about running",
			Some(range.clone()),
		)],
	)]);
	let summaries = engine(&store).execute_plan(plan, SUBJECT, 40).await.unwrap();
	let searches = store.recorded_searches();

	assert_eq!(searches.len(), 5);

	for (search, threshold) in searches.iter().zip([0.3f32, 0.25, 0.2, 0.2, 0.2]) {
		assert!(search.bounded);
		assert_eq!(search.threshold, threshold);
		assert_eq!(search.limit, 10);
	}

	// The first three probes keep the original bounds.
	assert_eq!(searches[0].start, range.start);
	assert_eq!(searches[0].end, range.end);

	let summary = &summaries[0];

	assert_eq!(summary.result_type, ResultType::SemanticSearch);
	assert_eq!(summary.data_type, DataType::Entries);

	let fallback = summary.fallback.as_ref().unwrap();

	assert_eq!(fallback.level, FallbackLevel::ExpandedTimeRange);
	assert_eq!(fallback.threshold, Some(0.2));
	assert_eq!(fallback.original_range, Some(range.clone()));
	assert_eq!(
		fallback.substituted_range,
		Some(TimeRange {
			start: Some(now - time::Duration::days(50)),
			end: Some(now - time::Duration::days(30)),
		})
	);
	assert!(!fallback.time_constraint_dropped);
}

#[tokio::test]
async fn connectivity_failure_falls_back_to_unconstrained_search() {
	let store = ScriptedStore::new();

	store.push_exec_transport_error("connection timed out");
	store.push_search(Vec::new());
	store.push_search(vec![entry(4, "a walk in the park", Some(0.5))]);

	let plan = plan_of(vec![sub_question(
		"sq1",
		1,
		vec![sql_step("SELECT COUNT(*) FROM journal_entries WHERE user_id = auth.uid()")],
	)]);
	let summaries = engine(&store).execute_plan(plan, SUBJECT, 10).await.unwrap();
	let searches = store.recorded_searches();

	// No time range on the step, so the ladder goes straight to unconstrained
	// probes and stops at the first hit.
	assert_eq!(searches.len(), 2);
	assert!(searches.iter().all(|search| !search.bounded));

	let fallback = summaries[0].fallback.as_ref().unwrap();

	assert_eq!(fallback.level, FallbackLevel::UnconstrainedSearch);
	assert_eq!(fallback.threshold, Some(0.25));
	assert!(!fallback.time_constraint_dropped);
	assert!(fallback.trigger.contains("connectivity"));
	assert!(summaries[0].errors.iter().any(|error| error.contains("connection timed out")));
}

#[tokio::test]
async fn exhausted_ladder_lands_on_the_baseline_fetch() {
	let store = ScriptedStore::new();

	store.push_exec_transport_error("network unreachable");
	store.push_search(Vec::new());
	store.push_search(Vec::new());
	store.push_search(Vec::new());
	store.push_exec_rows(vec![
		json!({ "id": 9, "content": "most recent entry", "created_at": "2026-08-20T10:00:00Z" }),
		json!({ "id": 8, "content": "the one before it", "created_at": "2026-08-19T10:00:00Z" }),
	]);

	let plan = plan_of(vec![sub_question(
		"sq1",
		1,
		vec![sql_step("SELECT COUNT(*) FROM journal_entries WHERE user_id = auth.uid()")],
	)]);
	let summaries = engine(&store).execute_plan(plan, SUBJECT, 10).await.unwrap();
	let executed = store.executed_sql();

	assert_eq!(executed.len(), 2);
	assert!(executed[1].starts_with("SELECT id, content, created_at, themes, emotions"));
	assert!(executed[1].contains("'6fa459ea-ee8a-3ca4-894e-db77e160355e'"));
	assert!(executed[1].ends_with("LIMIT 5"));

	let summary = &summaries[0];
	let fallback = summary.fallback.as_ref().unwrap();

	assert_eq!(fallback.level, FallbackLevel::BaselineFetch);
	assert_eq!(fallback.threshold, None);
	assert_eq!(summary.result_type, ResultType::SemanticSearch);
	assert_eq!(summary.count, 2);
	// Baseline rows carry no similarity scores.
	assert_eq!(summary.analysis.get("averageSimilarity"), Some(&serde_json::Value::Null));
}

#[tokio::test]
async fn embedding_failure_skips_search_levels_and_goes_to_baseline() {
	let store = ScriptedStore::new();
	let now = OffsetDateTime::now_utc();
	let range = TimeRange { start: Some(now - time::Duration::days(7)), end: Some(now) };

	store.push_exec_rows(Vec::new());
	store.push_exec_rows(vec![json!({ "id": 1, "content": "latest entry" })]);

	let plan = plan_of(vec![sub_question(
		"sq1",
		1,
		vec![filtering_step(
			"SELECT id, content FROM journal_entries WHERE user_id = auth.uid()",
			"recent reflections",
			Some(range),
		)],
	)]);
	let providers = scripted_providers(
		Arc::new(FailingEmbedding("embedding service exploded".to_string())),
		store.clone(),
	);
	let summaries = PlanEngine::with_providers(engine_config(), providers)
		.execute_plan(plan, SUBJECT, 10)
		.await
		.unwrap();

	assert!(store.recorded_searches().is_empty());
	assert_eq!(store.executed_sql().len(), 2);

	let summary = &summaries[0];
	let fallback = summary.fallback.as_ref().unwrap();

	assert_eq!(fallback.level, FallbackLevel::BaselineFetch);
	assert!(fallback.time_constraint_dropped);
	assert!(summary.errors.iter().any(|error| error.contains("Fallback embedding failed")));
}

#[tokio::test]
async fn missing_sql_query_triggers_the_fallback_ladder() {
	let store = ScriptedStore::new();

	store.push_search(vec![entry(5, "a relevant memory", Some(0.6))]);

	let step = AnalysisStep::SqlAnalysis {
		sql_query: None,
		sql_query_type: None,
		vector_search: None,
		time_range: None,
	};
	let plan = plan_of(vec![sub_question("sq1", 1, vec![step])]);
	let summaries = engine(&store).execute_plan(plan, SUBJECT, 10).await.unwrap();

	assert!(store.executed_sql().is_empty());
	assert_eq!(summaries[0].result_type, ResultType::SemanticSearch);

	let fallback = summaries[0].fallback.as_ref().unwrap();

	assert_eq!(fallback.level, FallbackLevel::UnconstrainedSearch);
	assert_eq!(fallback.trigger, "SQL step carried no query text.");
}

#[tokio::test]
async fn hybrid_steps_merge_sql_statistics_with_vector_samples() {
	let store = ScriptedStore::new();

	store.push_exec_rows(vec![json!({ "avg_sentiment": 0.42, "month": "03" })]);
	store.push_search(vec![entry(6, "a tense week at work", Some(0.8))]);

	let step = AnalysisStep::HybridSearch {
		sql_query: Some(
			"SELECT AVG(sentiment) AS avg_sentiment FROM journal_entries WHERE user_id = auth.uid()"
				.to_string(),
		),
		sql_query_type: None,
		vector_search: vector_query("stress at work"),
		time_range: None,
	};
	let plan = plan_of(vec![sub_question("sq1", 1, vec![step])]);
	let summaries = engine(&store).execute_plan(plan, SUBJECT, 10).await.unwrap();
	let summary = &summaries[0];

	assert_eq!(summary.result_type, ResultType::StatisticalAnalysis);
	assert_eq!(summary.data_type, DataType::Mixed);
	assert_eq!(summary.sample_entries.len(), 1);
	assert_eq!(summary.sample_entries[0].content, "a tense week at work");
}

#[tokio::test]
async fn mandatory_final_step_returns_journal_content_retrieval() {
	let store = ScriptedStore::new();

	store.push_search(vec![entry(1, "a quiet afternoon", Some(0.9))]);

	let mut sub = sub_question("sq1", 1, vec![vector_step("gather final context")]);

	sub.is_mandatory_final_step = true;

	let summaries = engine(&store).execute_plan(plan_of(vec![sub]), SUBJECT, 10).await.unwrap();

	assert_eq!(summaries[0].result_type, ResultType::JournalContentRetrieval);
	assert!(summaries[0].is_mandatory_final_step);
}

#[tokio::test]
async fn plan_deadline_skips_unfinished_and_remaining_stages() {
	let store = ScriptedStore::new();

	store.set_search_delay(Duration::from_millis(200));
	store.push_search(vec![entry(1, "never delivered", Some(0.9))]);

	let mut cfg = engine_config();

	cfg.engine.plan_deadline_ms = Some(40);

	let plan = plan_of(vec![
		sub_question("sq1", 1, vec![vector_step("a slow lookup")]),
		sub_question("sq2", 2, vec![vector_step("never reached")]),
	]);
	let summaries = engine_with(cfg, &store).execute_plan(plan, SUBJECT, 10).await.unwrap();

	// sq1's search was dispatched but its stage timed out; sq2 never ran.
	assert_eq!(store.recorded_searches().len(), 1);
	assert_eq!(summaries.len(), 2);

	for summary in &summaries {
		assert_eq!(summary.result_type, ResultType::NoResults);
		assert!(summary.errors.iter().any(|error| error.contains("plan deadline")));
	}
}

#[tokio::test]
async fn emotion_rows_classify_as_emotion_analysis() {
	let store = ScriptedStore::new();

	store.push_exec_rows(vec![
		json!({ "emotion": "joy", "score": 0.9, "occurrences": 3 }),
		json!({ "emotion": "calm", "score": 0.5, "occurrences": 2 }),
	]);

	let plan = plan_of(vec![sub_question(
		"sq1",
		1,
		vec![sql_step(
			"SELECT emotion, AVG(score) AS score, COUNT(*) AS occurrences FROM journal_emotions WHERE user_id = auth.uid() GROUP BY emotion",
		)],
	)]);
	let summaries = engine(&store).execute_plan(plan, SUBJECT, 10).await.unwrap();

	assert_eq!(summaries[0].result_type, ResultType::EmotionAnalysis);
	assert_eq!(summaries[0].data_type, DataType::Emotions);
	assert!(summaries[0].summary.starts_with("Top emotions: joy"));
}

#[tokio::test]
async fn same_stage_dependencies_fail_the_whole_plan() {
	let store = ScriptedStore::new();
	let mut dependent = sub_question("sq2", 1, vec![vector_step("needs sq1 first")]);

	dependent.dependencies = vec!["sq1".to_string()];

	let plan = plan_of(vec![
		sub_question("sq1", 1, vec![vector_step("runs alongside")]),
		dependent,
	]);
	let result = engine(&store).execute_plan(plan, SUBJECT, 10).await;

	assert!(matches!(result, Err(Error::Plan(_))));
	assert!(store.recorded_searches().is_empty());
}

#[tokio::test]
async fn camel_case_plans_execute_end_to_end() {
	let store = ScriptedStore::new();

	store.push_exec_rows(vec![json!({ "total_entries": 21 })]);
	store.push_search(vec![entry(2, "an evening by the lake", Some(0.88))]);

	let raw = r#"{
		"subQuestions": [
			{
				"question": "How many entries mention water?",
				"analysisSteps": [
					{
						"queryType": "sql_analysis",
						"sqlQuery": "SELECT COUNT(*) AS total_entries FROM journal_entries WHERE user_id = auth.uid() AND content ILIKE '%water%'",
						"sqlQueryType": "analysis"
					}
				]
			},
			{
				"question": "What did I write near water?",
				"executionStage": 2,
				"dependencies": ["sq1"],
				"isMandatoryFinalStep": true,
				"analysisSteps": [
					{
						"queryType": "vector_search",
						"vectorSearch": { "query": "moments near lakes and rivers", "threshold": 0.3, "limit": 5 }
					}
				]
			}
		]
	}"#;
	let plan = reverie_plan::parse_plan(raw).unwrap();
	let summaries = engine(&store).execute_plan(plan, SUBJECT, 30).await.unwrap();

	assert_eq!(summaries[0].sub_question_id, "sq1");
	assert_eq!(summaries[0].count, 21);
	assert_eq!(summaries[1].sub_question_id, "sq2");
	assert_eq!(summaries[1].result_type, ResultType::JournalContentRetrieval);
	assert_eq!(summaries[1].total_entries_context, 30);
}

#[tokio::test]
async fn vector_search_errors_are_fail_soft() {
	let store = ScriptedStore::new();

	store.push_search_error("vector index rebuilding");

	let plan = plan_of(vec![sub_question("sq1", 1, vec![vector_step("anything at all")])]);
	let summaries = engine(&store).execute_plan(plan, SUBJECT, 10).await.unwrap();

	// A vector failure records the error and leaves an empty result; it never
	// re-enters SQL fallback.
	assert_eq!(store.executed_sql().len(), 0);
	assert_eq!(store.recorded_searches().len(), 1);
	assert_eq!(summaries[0].result_type, ResultType::NoResults);
	assert!(summaries[0].errors[0].contains("vector index rebuilding"));
}
