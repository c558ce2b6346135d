//! Staged execution engine for journal query plans.
//!
//! [`PlanEngine::execute_plan`] drives a validated plan stage by stage: sub-questions
//! in the same stage run concurrently, later stages see everything earlier stages
//! produced, and per-sub-question failures are recorded rather than propagated. The
//! remote side (SQL procedures, semantic search, embeddings) is reached through the
//! provider traits so tests can script every exchange.

pub mod classify;
pub mod context;
mod error;
pub mod fallback;

mod execute;
mod sql_step;
mod vector_step;

pub use classify::{DataType, ExecutionSummary, ResultType, SampleEntry, classify};
pub use context::{ExecutionContext, SubQuestionResult};
pub use error::{Error, Result};
pub use fallback::{FallbackLevel, FallbackProvenance};

use std::{future::Future, pin::Pin, sync::Arc};

use reverie_config::{Config, Datastore, EmbeddingProviderConfig};
use reverie_providers::datastore::{self, EntryMatch, SemanticSearchArgs, SqlExecResponse};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

pub trait EmbeddingProvider
where
	Self: Send + Sync,
{
	fn embed<'a>(
		&'a self,
		cfg: &'a EmbeddingProviderConfig,
		text: &'a str,
	) -> BoxFuture<'a, color_eyre::Result<Vec<f32>>>;
}

pub trait RelationalProvider
where
	Self: Send + Sync,
{
	fn exec<'a>(
		&'a self,
		cfg: &'a Datastore,
		query: &'a str,
		subject_id: &'a str,
	) -> BoxFuture<'a, color_eyre::Result<SqlExecResponse>>;
}

pub trait SemanticProvider
where
	Self: Send + Sync,
{
	fn search<'a>(
		&'a self,
		cfg: &'a Datastore,
		args: SemanticSearchArgs<'a>,
	) -> BoxFuture<'a, color_eyre::Result<Vec<EntryMatch>>>;

	fn search_bounded<'a>(
		&'a self,
		cfg: &'a Datastore,
		args: SemanticSearchArgs<'a>,
	) -> BoxFuture<'a, color_eyre::Result<Vec<EntryMatch>>>;
}

#[derive(Clone)]
pub struct Providers {
	pub embedding: Arc<dyn EmbeddingProvider>,
	pub relational: Arc<dyn RelationalProvider>,
	pub semantic: Arc<dyn SemanticProvider>,
}
impl Providers {
	pub fn new(
		embedding: Arc<dyn EmbeddingProvider>,
		relational: Arc<dyn RelationalProvider>,
		semantic: Arc<dyn SemanticProvider>,
	) -> Self {
		Self { embedding, relational, semantic }
	}
}
impl Default for Providers {
	fn default() -> Self {
		let default = Arc::new(DefaultProviders);

		Self { embedding: default.clone(), relational: default.clone(), semantic: default }
	}
}

struct DefaultProviders;
impl EmbeddingProvider for DefaultProviders {
	fn embed<'a>(
		&'a self,
		cfg: &'a EmbeddingProviderConfig,
		text: &'a str,
	) -> BoxFuture<'a, color_eyre::Result<Vec<f32>>> {
		Box::pin(reverie_providers::embedding::embed(cfg, text))
	}
}
impl RelationalProvider for DefaultProviders {
	fn exec<'a>(
		&'a self,
		cfg: &'a Datastore,
		query: &'a str,
		subject_id: &'a str,
	) -> BoxFuture<'a, color_eyre::Result<SqlExecResponse>> {
		Box::pin(datastore::exec_sql(cfg, query, subject_id))
	}
}
impl SemanticProvider for DefaultProviders {
	fn search<'a>(
		&'a self,
		cfg: &'a Datastore,
		args: SemanticSearchArgs<'a>,
	) -> BoxFuture<'a, color_eyre::Result<Vec<EntryMatch>>> {
		Box::pin(async move { datastore::search_entries(cfg, &args).await })
	}

	fn search_bounded<'a>(
		&'a self,
		cfg: &'a Datastore,
		args: SemanticSearchArgs<'a>,
	) -> BoxFuture<'a, color_eyre::Result<Vec<EntryMatch>>> {
		Box::pin(async move { datastore::search_entries_bounded(cfg, &args).await })
	}
}

pub struct PlanEngine {
	pub cfg: Config,
	pub providers: Providers,
}
impl PlanEngine {
	pub fn new(cfg: Config) -> Self {
		Self { cfg, providers: Providers::default() }
	}

	pub fn with_providers(cfg: Config, providers: Providers) -> Self {
		Self { cfg, providers }
	}
}
