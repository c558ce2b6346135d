mod error;
mod types;

pub use error::{Error, Result};
pub use types::{Config, Datastore, EmbeddingProviderConfig, Engine, Fallback, Providers, Service};

use std::{fs, path::Path};

pub fn load(path: &Path) -> Result<Config> {
	let raw = fs::read_to_string(path)
		.map_err(|source| Error::ReadConfig { path: path.to_path_buf(), source })?;
	let mut cfg = toml::from_str::<Config>(&raw)
		.map_err(|source| Error::ParseConfig { path: path.to_path_buf(), source })?;

	normalize(&mut cfg);
	validate(&cfg)?;

	Ok(cfg)
}

pub fn validate(cfg: &Config) -> Result<()> {
	if cfg.service.log_level.trim().is_empty() {
		return Err(Error::Validation {
			message: "service.log_level must be non-empty.".to_string(),
		});
	}

	for (label, value) in [
		("providers.embedding.api_base", &cfg.providers.embedding.api_base),
		("providers.embedding.api_key", &cfg.providers.embedding.api_key),
		("providers.embedding.model", &cfg.providers.embedding.model),
		("datastore.api_base", &cfg.datastore.api_base),
		("datastore.api_key", &cfg.datastore.api_key),
	] {
		if value.trim().is_empty() {
			return Err(Error::Validation { message: format!("{label} must be non-empty.") });
		}
	}

	for (label, path) in [
		("providers.embedding.path", &cfg.providers.embedding.path),
		("datastore.exec_path", &cfg.datastore.exec_path),
		("datastore.search_path", &cfg.datastore.search_path),
		("datastore.search_bounded_path", &cfg.datastore.search_bounded_path),
	] {
		if !path.starts_with('/') {
			return Err(Error::Validation {
				message: format!("{label} must start with a '/'."),
			});
		}
	}

	if cfg.providers.embedding.dimensions == 0 {
		return Err(Error::Validation {
			message: "providers.embedding.dimensions must be greater than zero.".to_string(),
		});
	}
	if cfg.providers.embedding.timeout_ms == 0 {
		return Err(Error::Validation {
			message: "providers.embedding.timeout_ms must be greater than zero.".to_string(),
		});
	}
	if cfg.datastore.timeout_ms == 0 {
		return Err(Error::Validation {
			message: "datastore.timeout_ms must be greater than zero.".to_string(),
		});
	}

	for (label, threshold) in [
		("engine.default_threshold", cfg.engine.default_threshold),
		("fallback.threshold_floor_bounded", cfg.fallback.threshold_floor_bounded),
		("fallback.threshold_floor_unbounded", cfg.fallback.threshold_floor_unbounded),
	] {
		if !threshold.is_finite() {
			return Err(Error::Validation {
				message: format!("{label} must be a finite number."),
			});
		}
		if threshold <= 0.0 || threshold > 1.0 {
			return Err(Error::Validation {
				message: format!("{label} must be greater than zero and 1.0 or less."),
			});
		}
	}

	if cfg.engine.default_limit == 0 {
		return Err(Error::Validation {
			message: "engine.default_limit must be greater than zero.".to_string(),
		});
	}
	if cfg.engine.max_sample_entries == 0 {
		return Err(Error::Validation {
			message: "engine.max_sample_entries must be greater than zero.".to_string(),
		});
	}
	if cfg.engine.max_sample_chars == 0 {
		return Err(Error::Validation {
			message: "engine.max_sample_chars must be greater than zero.".to_string(),
		});
	}

	if let Some(ms) = cfg.engine.plan_deadline_ms
		&& ms == 0
	{
		return Err(Error::Validation {
			message: "engine.plan_deadline_ms must be greater than zero when set.".to_string(),
		});
	}

	if !cfg.fallback.threshold_decrement.is_finite() || cfg.fallback.threshold_decrement <= 0.0 {
		return Err(Error::Validation {
			message: "fallback.threshold_decrement must be a finite number greater than zero."
				.to_string(),
		});
	}
	if cfg.fallback.ladder_steps == 0 {
		return Err(Error::Validation {
			message: "fallback.ladder_steps must be greater than zero.".to_string(),
		});
	}
	if cfg.fallback.bounded_limit_multiplier == 0 {
		return Err(Error::Validation {
			message: "fallback.bounded_limit_multiplier must be greater than zero.".to_string(),
		});
	}
	if cfg.fallback.expansion_lookback_days.is_empty() {
		return Err(Error::Validation {
			message: "fallback.expansion_lookback_days must be non-empty.".to_string(),
		});
	}

	let mut previous_days = 0;

	for days in &cfg.fallback.expansion_lookback_days {
		if *days <= previous_days {
			return Err(Error::Validation {
				message: "fallback.expansion_lookback_days must be positive and strictly ascending."
					.to_string(),
			});
		}

		previous_days = *days;
	}

	if cfg.fallback.baseline_limit == 0 {
		return Err(Error::Validation {
			message: "fallback.baseline_limit must be greater than zero.".to_string(),
		});
	}

	Ok(())
}

fn normalize(cfg: &mut Config) {
	trim_base(&mut cfg.providers.embedding.api_base);
	trim_base(&mut cfg.datastore.api_base);
}

fn trim_base(api_base: &mut String) {
	while api_base.ends_with('/') {
		api_base.pop();
	}
}
