//! Scripted provider doubles for engine tests.
//!
//! [`ScriptedStore`] answers SQL and semantic search calls from queued
//! responses while recording every call it served, so tests can assert both
//! the outputs and the exact requests the engine made.

use std::{
	collections::VecDeque,
	sync::{Arc, Mutex},
	time::Duration,
};

use color_eyre::eyre::eyre;
use serde_json::{Map, Value};
use time::OffsetDateTime;

use reverie_config::Config;
use reverie_engine::{BoxFuture, EmbeddingProvider, Providers, RelationalProvider, SemanticProvider};
use reverie_providers::datastore::{EntryMatch, SemanticSearchArgs, SqlExecResponse};

/// Resolves every embed call to the same vector.
pub struct StaticEmbedding(pub Vec<f32>);
impl EmbeddingProvider for StaticEmbedding {
	fn embed<'a>(
		&'a self,
		_cfg: &'a reverie_config::EmbeddingProviderConfig,
		_text: &'a str,
	) -> BoxFuture<'a, color_eyre::Result<Vec<f32>>> {
		let vector = self.0.clone();

		Box::pin(async move { Ok(vector) })
	}
}

/// Fails every embed call with the given message.
pub struct FailingEmbedding(pub String);
impl EmbeddingProvider for FailingEmbedding {
	fn embed<'a>(
		&'a self,
		_cfg: &'a reverie_config::EmbeddingProviderConfig,
		_text: &'a str,
	) -> BoxFuture<'a, color_eyre::Result<Vec<f32>>> {
		let message = self.0.clone();

		Box::pin(async move { Err(eyre!("{message}")) })
	}
}

#[derive(Clone, Debug)]
pub struct RecordedSearch {
	pub threshold: f32,
	pub limit: u32,
	pub bounded: bool,
	pub start: Option<OffsetDateTime>,
	pub end: Option<OffsetDateTime>,
}

#[derive(Default)]
pub struct ScriptedStore {
	exec_responses: Mutex<VecDeque<Result<SqlExecResponse, String>>>,
	search_responses: Mutex<VecDeque<Result<Vec<EntryMatch>, String>>>,
	exec_log: Mutex<Vec<String>>,
	search_log: Mutex<Vec<RecordedSearch>>,
	search_delay: Mutex<Option<Duration>>,
}
impl ScriptedStore {
	pub fn new() -> Arc<Self> {
		Arc::new(Self::default())
	}

	pub fn push_exec_rows(&self, rows: Vec<Value>) {
		self.lock_execs().push_back(Ok(SqlExecResponse { success: true, rows, error: None }));
	}

	pub fn push_exec_failure(&self, message: &str) {
		self.lock_execs().push_back(Ok(SqlExecResponse {
			success: false,
			rows: Vec::new(),
			error: Some(message.to_string()),
		}));
	}

	pub fn push_exec_transport_error(&self, message: &str) {
		self.lock_execs().push_back(Err(message.to_string()));
	}

	pub fn push_search(&self, rows: Vec<EntryMatch>) {
		self.lock_searches().push_back(Ok(rows));
	}

	pub fn push_search_error(&self, message: &str) {
		self.lock_searches().push_back(Err(message.to_string()));
	}

	/// Delays every search response; combine with a plan deadline to force a
	/// timeout.
	pub fn set_search_delay(&self, delay: Duration) {
		*self.search_delay.lock().unwrap_or_else(|err| err.into_inner()) = Some(delay);
	}

	pub fn executed_sql(&self) -> Vec<String> {
		self.exec_log.lock().unwrap_or_else(|err| err.into_inner()).clone()
	}

	pub fn recorded_searches(&self) -> Vec<RecordedSearch> {
		self.search_log.lock().unwrap_or_else(|err| err.into_inner()).clone()
	}

	fn lock_execs(&self) -> std::sync::MutexGuard<'_, VecDeque<Result<SqlExecResponse, String>>> {
		self.exec_responses.lock().unwrap_or_else(|err| err.into_inner())
	}

	fn lock_searches(&self) -> std::sync::MutexGuard<'_, VecDeque<Result<Vec<EntryMatch>, String>>> {
		self.search_responses.lock().unwrap_or_else(|err| err.into_inner())
	}

	fn serve_search(&self, args: &SemanticSearchArgs<'_>, bounded: bool) -> SearchTicket {
		self.search_log.lock().unwrap_or_else(|err| err.into_inner()).push(RecordedSearch {
			threshold: args.threshold,
			limit: args.limit,
			bounded,
			start: args.start,
			end: args.end,
		});

		SearchTicket {
			response: self.lock_searches().pop_front(),
			delay: *self.search_delay.lock().unwrap_or_else(|err| err.into_inner()),
		}
	}
}
impl RelationalProvider for ScriptedStore {
	fn exec<'a>(
		&'a self,
		_cfg: &'a reverie_config::Datastore,
		query: &'a str,
		_subject_id: &'a str,
	) -> BoxFuture<'a, color_eyre::Result<SqlExecResponse>> {
		self.exec_log.lock().unwrap_or_else(|err| err.into_inner()).push(query.to_string());

		let next = self.lock_execs().pop_front();

		Box::pin(async move {
			match next {
				Some(Ok(response)) => Ok(response),
				Some(Err(message)) => Err(eyre!("{message}")),
				None => Err(eyre!("Scripted store ran out of exec responses.")),
			}
		})
	}
}
impl SemanticProvider for ScriptedStore {
	fn search<'a>(
		&'a self,
		_cfg: &'a reverie_config::Datastore,
		args: SemanticSearchArgs<'a>,
	) -> BoxFuture<'a, color_eyre::Result<Vec<EntryMatch>>> {
		let ticket = self.serve_search(&args, false);

		Box::pin(ticket.resolve())
	}

	fn search_bounded<'a>(
		&'a self,
		_cfg: &'a reverie_config::Datastore,
		args: SemanticSearchArgs<'a>,
	) -> BoxFuture<'a, color_eyre::Result<Vec<EntryMatch>>> {
		let ticket = self.serve_search(&args, true);

		Box::pin(ticket.resolve())
	}
}

struct SearchTicket {
	response: Option<Result<Vec<EntryMatch>, String>>,
	delay: Option<Duration>,
}
impl SearchTicket {
	async fn resolve(self) -> color_eyre::Result<Vec<EntryMatch>> {
		if let Some(delay) = self.delay {
			tokio::time::sleep(delay).await;
		}

		match self.response {
			Some(Ok(rows)) => Ok(rows),
			Some(Err(message)) => Err(eyre!("{message}")),
			None => Err(eyre!("Scripted store ran out of search responses.")),
		}
	}
}

pub fn scripted_providers(
	embedding: Arc<dyn EmbeddingProvider>,
	store: Arc<ScriptedStore>,
) -> Providers {
	Providers::new(embedding, store.clone(), store)
}

pub fn entry(id: i64, content: &str, similarity: Option<f32>) -> EntryMatch {
	EntryMatch {
		id: Value::from(id),
		content: content.to_string(),
		similarity,
		..Default::default()
	}
}

/// A fully-populated config pointing at addresses no test ever dials; the
/// scripted providers intercept every call before networking matters.
pub fn engine_config() -> Config {
	Config {
		service: reverie_config::Service { log_level: "info".to_string() },
		providers: reverie_config::Providers {
			embedding: reverie_config::EmbeddingProviderConfig {
				provider_id: "scripted".to_string(),
				api_base: "http://127.0.0.1:1".to_string(),
				api_key: "test-key".to_string(),
				path: "/v1/embeddings".to_string(),
				model: "test-embedding".to_string(),
				dimensions: 3,
				timeout_ms: 1_000,
				default_headers: Map::new(),
			},
		},
		datastore: reverie_config::Datastore {
			api_base: "http://127.0.0.1:1".to_string(),
			api_key: "test-key".to_string(),
			exec_path: "/rest/v1/rpc/execute_sql".to_string(),
			search_path: "/rest/v1/rpc/search_entries".to_string(),
			search_bounded_path: "/rest/v1/rpc/search_entries_bounded".to_string(),
			timeout_ms: 1_000,
			default_headers: Map::new(),
		},
		engine: reverie_config::Engine::default(),
		fallback: reverie_config::Fallback::default(),
	}
}
