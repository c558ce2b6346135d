//! Turns raw per-sub-question rows into a typed summary.
//!
//! Classification is shape-driven: SQL rows are inspected for count, emotion
//! and entry shapes in that order, vector rows fill in when SQL produced
//! nothing, and the empty cases distinguish "ran and matched nothing" from
//! "never produced data".

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use reverie_providers::datastore::EntryMatch;

use crate::{context::SubQuestionResult, fallback::FallbackProvenance};

const COUNT_KEYS: &[&str] = &["total_entries", "entry_count", "total", "count"];
const EMOTION_LABEL_KEYS: &[&str] = &["emotion", "emotion_label"];
const EMOTION_SCORE_KEYS: &[&str] = &["score", "avg_score", "average_score", "intensity", "value"];
const EMOTION_OCCURRENCE_KEYS: &[&str] = &["occurrences", "count", "frequency"];
const MAX_RAW_RESULT_ROWS: usize = 5;

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultType {
	CountAnalysis,
	EmotionAnalysis,
	FilteredEntries,
	StatisticalAnalysis,
	SemanticSearch,
	JournalContentRetrieval,
	NoEntriesFound,
	NoResults,
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
	Count,
	Emotions,
	Statistics,
	Entries,
	None,
	Mixed,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SampleEntry {
	pub id: Value,
	pub content: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub date: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub similarity: Option<f32>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub themes: Option<Value>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub emotions: Option<Value>,
}

/// The per-sub-question output of a plan run.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionSummary {
	pub sub_question_id: String,
	pub question: String,
	pub result_type: ResultType,
	pub data_type: DataType,
	pub summary: String,
	pub count: i64,
	pub analysis: Value,
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub sample_entries: Vec<SampleEntry>,
	pub total_entries_context: i64,
	pub is_mandatory_final_step: bool,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub fallback: Option<FallbackProvenance>,
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub errors: Vec<String>,
}

pub fn classify(
	result: &SubQuestionResult,
	total_entries: i64,
	cfg: &reverie_config::Engine,
) -> ExecutionSummary {
	let sub = &result.sub_question;
	let sql_rows = result.sql_rows.as_deref();
	let vector_rows = result.vector_rows.as_deref().unwrap_or(&[]);
	let mut summary = ExecutionSummary {
		sub_question_id: sub.id.clone(),
		question: sub.question.clone(),
		result_type: ResultType::NoResults,
		data_type: DataType::None,
		summary: String::new(),
		count: 0,
		analysis: Value::Null,
		sample_entries: Vec::new(),
		total_entries_context: total_entries,
		is_mandatory_final_step: sub.is_mandatory_final_step,
		fallback: result.fallback.clone(),
		errors: result.errors.clone(),
	};

	let sql_classified = match sql_rows {
		Some(rows) if !rows.is_empty() => {
			if let Some(count) = count_value(rows) {
				apply_count(&mut summary, count);
			} else if let Some(report) = aggregate_emotions(rows) {
				apply_emotions(&mut summary, report);
			} else if rows.first().map(is_entry_row).unwrap_or(false) {
				apply_filtered_entries(&mut summary, rows, total_entries, cfg);
			} else {
				apply_statistics(&mut summary, rows);
			}

			true
		},
		_ => false,
	};

	if sql_classified {
		// SQL wins the result type; vector rows still mark the data as mixed
		// and backfill samples when the SQL shape offered none.
		if !vector_rows.is_empty() {
			summary.data_type = DataType::Mixed;

			if summary.sample_entries.is_empty() {
				summary.sample_entries = vector_samples(vector_rows, cfg);
			}
		}
	} else if !vector_rows.is_empty() {
		apply_semantic(&mut summary, vector_rows, cfg);
	} else if sql_rows.is_some() {
		apply_no_entries(&mut summary, total_entries);
	} else {
		summary.summary = "No results were produced for this question.".to_string();
	}

	summary
}

fn apply_count(summary: &mut ExecutionSummary, count: i64) {
	summary.result_type = ResultType::CountAnalysis;
	summary.data_type = DataType::Count;
	summary.count = count;
	summary.summary = format!("Counted {count} matching journal entries.");
	summary.analysis = json!({ "totalEntries": count });
}

fn apply_emotions(summary: &mut ExecutionSummary, report: Vec<(String, f64, i64)>) {
	let top: Vec<String> = report
		.iter()
		.take(3)
		.map(|(label, score, _)| format!("{label} ({score:.2})"))
		.collect();
	let mut emotions = Map::new();

	for (label, score, occurrences) in &report {
		emotions
			.insert(label.clone(), json!({ "score": score, "occurrences": occurrences }));
	}

	summary.result_type = ResultType::EmotionAnalysis;
	summary.data_type = DataType::Emotions;
	summary.count = report.len() as i64;
	summary.summary = format!("Top emotions: {}.", top.join(", "));
	summary.analysis = json!({ "emotions": emotions });
}

fn apply_filtered_entries(
	summary: &mut ExecutionSummary,
	rows: &[Value],
	total_entries: i64,
	cfg: &reverie_config::Engine,
) {
	let matched = rows.len() as i64;
	let percentage = percentage(matched, total_entries);

	summary.result_type = ResultType::FilteredEntries;
	summary.data_type = DataType::Entries;
	summary.count = matched;
	summary.summary = if total_entries > 0 {
		format!("Matched {matched} of {total_entries} journal entries ({percentage}%).")
	} else {
		format!("Matched {matched} journal entries.")
	};
	summary.analysis = json!({
		"matchedEntries": matched,
		"totalEntries": total_entries,
		"percentage": percentage,
	});
	summary.sample_entries = sql_samples(rows, cfg);
}

fn apply_statistics(summary: &mut ExecutionSummary, rows: &[Value]) {
	let raw: Vec<Value> = rows.iter().take(MAX_RAW_RESULT_ROWS).cloned().collect();

	summary.result_type = ResultType::StatisticalAnalysis;
	summary.data_type = DataType::Statistics;
	summary.count = rows.len() as i64;
	summary.summary = format!("Produced {} statistical result rows.", rows.len());
	summary.analysis = json!({ "rawResults": raw });
}

fn apply_semantic(
	summary: &mut ExecutionSummary,
	rows: &[EntryMatch],
	cfg: &reverie_config::Engine,
) {
	let matched = rows.len();
	let average = average_similarity(rows);

	summary.result_type = if summary.is_mandatory_final_step {
		ResultType::JournalContentRetrieval
	} else {
		ResultType::SemanticSearch
	};
	summary.data_type = DataType::Entries;
	summary.count = matched as i64;
	summary.summary = match (summary.is_mandatory_final_step, average) {
		(true, _) => format!("Retrieved {matched} journal entries for final context."),
		(false, Some(average)) =>
			format!("Found {matched} related journal entries (average similarity {average})."),
		(false, None) => format!("Found {matched} related journal entries."),
	};
	summary.analysis = json!({ "matchedEntries": matched, "averageSimilarity": average });
	summary.sample_entries = vector_samples(rows, cfg);
}

fn apply_no_entries(summary: &mut ExecutionSummary, total_entries: i64) {
	summary.result_type = ResultType::NoEntriesFound;
	summary.summary = "No journal entries matched this question.".to_string();
	summary.analysis = json!({
		"matchedEntries": 0,
		"totalEntries": total_entries,
		"percentage": 0.0,
	});
}

/// A lone row holding one of the recognized count keys is a count result.
/// Numeric strings are accepted because SQL procedures serialize bigints as
/// text.
fn count_value(rows: &[Value]) -> Option<i64> {
	let [row] = rows else { return None };
	let map = row.as_object()?;

	for key in COUNT_KEYS {
		if let Some(value) = map.get(*key) {
			if let Some(count) = value.as_i64() {
				return Some(count);
			}
			if let Some(count) = value.as_f64() {
				return Some(count as i64);
			}
			if let Some(count) = value.as_str().and_then(|raw| raw.trim().parse::<i64>().ok()) {
				return Some(count);
			}
		}
	}

	None
}

/// Per-label mean score and summed occurrences, sorted by mean descending.
/// Rows can be flat (`emotion` label plus a score key) or carry a nested
/// `emotions` object; entry-shaped rows never count as nested emotion rows.
fn aggregate_emotions(rows: &[Value]) -> Option<Vec<(String, f64, i64)>> {
	let mut sums: BTreeMap<String, (f64, i64, i64)> = BTreeMap::new();

	for row in rows {
		let Some(map) = row.as_object() else { continue };

		if let Some(label) = emotion_label(map) {
			let Some(score) = emotion_score(map) else { continue };
			let slot = sums.entry(label).or_insert((0.0, 0, 0));

			slot.0 += score;
			slot.1 += 1;
			slot.2 += emotion_occurrences(map);
		} else if !is_entry_row(row)
			&& let Some(nested) = map.get("emotions").and_then(Value::as_object)
		{
			for (label, value) in nested {
				let Some(score) = value.as_f64() else { continue };
				let slot = sums.entry(label.clone()).or_insert((0.0, 0, 0));

				slot.0 += score;
				slot.1 += 1;
				slot.2 += 1;
			}
		}
	}

	if sums.is_empty() {
		return None;
	}

	let mut report: Vec<(String, f64, i64)> = sums
		.into_iter()
		.map(|(label, (sum, scored, occurrences))| (label, round2(sum / scored as f64), occurrences))
		.collect();

	report.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

	Some(report)
}

fn emotion_label(map: &Map<String, Value>) -> Option<String> {
	EMOTION_LABEL_KEYS
		.iter()
		.find_map(|key| map.get(*key).and_then(Value::as_str))
		.map(str::to_string)
}

fn emotion_score(map: &Map<String, Value>) -> Option<f64> {
	EMOTION_SCORE_KEYS.iter().find_map(|key| map.get(*key).and_then(Value::as_f64))
}

fn emotion_occurrences(map: &Map<String, Value>) -> i64 {
	EMOTION_OCCURRENCE_KEYS
		.iter()
		.find_map(|key| map.get(*key).and_then(Value::as_i64))
		.unwrap_or(1)
}

fn is_entry_row(row: &Value) -> bool {
	row.as_object()
		.map(|map| {
			map.contains_key("id") && map.get("content").map(Value::is_string).unwrap_or(false)
		})
		.unwrap_or(false)
}

fn sql_samples(rows: &[Value], cfg: &reverie_config::Engine) -> Vec<SampleEntry> {
	rows.iter()
		.filter_map(|row| serde_json::from_value::<EntryMatch>(row.clone()).ok())
		.take(cfg.max_sample_entries)
		.map(|entry| to_sample(entry, cfg.max_sample_chars))
		.collect()
}

fn vector_samples(rows: &[EntryMatch], cfg: &reverie_config::Engine) -> Vec<SampleEntry> {
	rows.iter()
		.take(cfg.max_sample_entries)
		.map(|entry| to_sample(entry.clone(), cfg.max_sample_chars))
		.collect()
}

fn to_sample(entry: EntryMatch, max_chars: usize) -> SampleEntry {
	SampleEntry {
		id: entry.id,
		content: truncate_chars(&entry.content, max_chars),
		date: entry.created_at,
		similarity: entry.similarity,
		themes: entry.themes,
		emotions: entry.emotions,
	}
}

fn truncate_chars(input: &str, max_chars: usize) -> String {
	if input.chars().count() <= max_chars {
		return input.to_string();
	}

	let truncated: String = input.chars().take(max_chars).collect();

	format!("{truncated}...")
}

fn average_similarity(rows: &[EntryMatch]) -> Option<f64> {
	let scores: Vec<f64> =
		rows.iter().filter_map(|entry| entry.similarity).map(f64::from).collect();

	if scores.is_empty() {
		return None;
	}

	Some(round3(scores.iter().sum::<f64>() / scores.len() as f64))
}

fn percentage(matched: i64, total: i64) -> f64 {
	if total <= 0 {
		return 0.0;
	}

	round1(matched as f64 * 100.0 / total as f64)
}

fn round1(value: f64) -> f64 {
	(value * 10.0).round() / 10.0
}

fn round2(value: f64) -> f64 {
	(value * 100.0).round() / 100.0
}

fn round3(value: f64) -> f64 {
	(value * 1_000.0).round() / 1_000.0
}
