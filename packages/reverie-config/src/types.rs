use serde::Deserialize;
use serde_json::{Map, Value};

#[derive(Clone, Debug, Deserialize)]
pub struct Config {
	pub service: Service,
	pub providers: Providers,
	pub datastore: Datastore,
	#[serde(default)]
	pub engine: Engine,
	#[serde(default)]
	pub fallback: Fallback,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Service {
	pub log_level: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Providers {
	pub embedding: EmbeddingProviderConfig,
}

#[derive(Clone, Debug, Deserialize)]
pub struct EmbeddingProviderConfig {
	pub provider_id: String,
	pub api_base: String,
	pub api_key: String,
	pub path: String,
	pub model: String,
	pub dimensions: u32,
	pub timeout_ms: u64,
	#[serde(default)]
	pub default_headers: Map<String, Value>,
}

/// Remote data procedures: the SQL `exec` endpoint and the two semantic
/// search endpoints (unbounded and time-bounded).
#[derive(Clone, Debug, Deserialize)]
pub struct Datastore {
	pub api_base: String,
	pub api_key: String,
	pub exec_path: String,
	pub search_path: String,
	pub search_bounded_path: String,
	pub timeout_ms: u64,
	#[serde(default)]
	pub default_headers: Map<String, Value>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Engine {
	pub default_threshold: f32,
	pub default_limit: u32,
	pub max_sample_entries: usize,
	pub max_sample_chars: usize,
	pub plan_deadline_ms: Option<u64>,
}
impl Default for Engine {
	fn default() -> Self {
		Self {
			default_threshold: 0.3,
			default_limit: 5,
			max_sample_entries: 3,
			max_sample_chars: 220,
			plan_deadline_ms: None,
		}
	}
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Fallback {
	pub threshold_decrement: f32,
	pub threshold_floor_bounded: f32,
	pub threshold_floor_unbounded: f32,
	pub ladder_steps: u32,
	pub bounded_limit_multiplier: u32,
	pub expansion_lookback_days: Vec<i64>,
	pub baseline_limit: u32,
}
impl Default for Fallback {
	fn default() -> Self {
		Self {
			threshold_decrement: 0.05,
			threshold_floor_bounded: 0.1,
			threshold_floor_unbounded: 0.05,
			ladder_steps: 3,
			bounded_limit_multiplier: 2,
			expansion_lookback_days: vec![30, 90, 180],
			baseline_limit: 5,
		}
	}
}
