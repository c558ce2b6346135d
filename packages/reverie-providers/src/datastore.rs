use std::time::Duration;

use color_eyre::{Result, eyre};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::{OffsetDateTime, format_description::well_known::Rfc3339};

/// One journal entry as the data procedures return it. Rows are decoded
/// tolerantly; anything beyond the known fields is dropped.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct EntryMatch {
	#[serde(default)]
	pub id: Value,
	#[serde(default)]
	pub content: String,
	#[serde(default, alias = "createdAt")]
	pub created_at: Option<String>,
	#[serde(default)]
	pub similarity: Option<f32>,
	#[serde(default)]
	pub themes: Option<Value>,
	#[serde(default)]
	pub emotions: Option<Value>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct SqlExecResponse {
	#[serde(default)]
	pub success: bool,
	#[serde(default)]
	pub rows: Vec<Value>,
	#[serde(default)]
	pub error: Option<String>,
}

pub struct SemanticSearchArgs<'a> {
	pub embedding: &'a [f32],
	pub threshold: f32,
	pub limit: u32,
	pub subject_id: &'a str,
	pub start: Option<OffsetDateTime>,
	pub end: Option<OffsetDateTime>,
}

pub async fn exec_sql(
	cfg: &reverie_config::Datastore,
	query: &str,
	subject_id: &str,
) -> Result<SqlExecResponse> {
	let client = Client::builder().timeout(Duration::from_millis(cfg.timeout_ms)).build()?;
	let url = format!("{}{}", cfg.api_base, cfg.exec_path);
	let body = serde_json::json!({
		"query": query,
		"subjectId": subject_id,
	});
	let res = client
		.post(url)
		.headers(crate::request_headers(&cfg.api_key, &cfg.default_headers)?)
		.json(&body)
		.send()
		.await?;
	let json: Value = res.error_for_status()?.json().await?;

	parse_exec_response(json)
}

pub async fn search_entries(
	cfg: &reverie_config::Datastore,
	args: &SemanticSearchArgs<'_>,
) -> Result<Vec<EntryMatch>> {
	let url = format!("{}{}", cfg.api_base, cfg.search_path);

	post_search(cfg, url, search_body(args, false)?).await
}

pub async fn search_entries_bounded(
	cfg: &reverie_config::Datastore,
	args: &SemanticSearchArgs<'_>,
) -> Result<Vec<EntryMatch>> {
	let url = format!("{}{}", cfg.api_base, cfg.search_bounded_path);

	post_search(cfg, url, search_body(args, true)?).await
}

async fn post_search(
	cfg: &reverie_config::Datastore,
	url: String,
	body: Value,
) -> Result<Vec<EntryMatch>> {
	let client = Client::builder().timeout(Duration::from_millis(cfg.timeout_ms)).build()?;
	let res = client
		.post(url)
		.headers(crate::request_headers(&cfg.api_key, &cfg.default_headers)?)
		.json(&body)
		.send()
		.await?;
	let json: Value = res.error_for_status()?.json().await?;

	parse_search_response(json)
}

fn search_body(args: &SemanticSearchArgs<'_>, bounded: bool) -> Result<Value> {
	let mut body = serde_json::json!({
		"embedding": args.embedding,
		"threshold": args.threshold,
		"limit": args.limit,
		"subjectId": args.subject_id,
	});

	if bounded {
		let Some(map) = body.as_object_mut() else {
			return Err(eyre::eyre!("Search body must be an object."));
		};

		if let Some(start) = args.start {
			map.insert("startTime".to_string(), Value::String(start.format(&Rfc3339)?));
		}
		if let Some(end) = args.end {
			map.insert("endTime".to_string(), Value::String(end.format(&Rfc3339)?));
		}
	}

	Ok(body)
}

fn parse_exec_response(json: Value) -> Result<SqlExecResponse> {
	match json {
		Value::Array(rows) => Ok(SqlExecResponse { success: true, rows, error: None }),
		Value::Object(_) => serde_json::from_value(json)
			.map_err(|err| eyre::eyre!("Exec response has an unexpected shape: {err}.")),
		other => Err(eyre::eyre!("Exec response must be an array or object, got {other}.")),
	}
}

fn parse_search_response(json: Value) -> Result<Vec<EntryMatch>> {
	let rows = match json {
		Value::Array(rows) => rows,
		Value::Object(mut map) => match map.remove("entries") {
			Some(Value::Array(rows)) => rows,
			_ => return Err(eyre::eyre!("Search response is missing entries array.")),
		},
		other => return Err(eyre::eyre!("Search response must be an array or object, got {other}.")),
	};

	rows.into_iter()
		.map(|row| {
			serde_json::from_value(row)
				.map_err(|err| eyre::eyre!("Search row has an unexpected shape: {err}."))
		})
		.collect()
}
