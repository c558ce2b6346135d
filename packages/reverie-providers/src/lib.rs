pub mod datastore;
pub mod embedding;

use color_eyre::{Result, eyre::eyre};
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderName, HeaderValue};
use serde_json::{Map, Value};

/// Bearer auth plus any configured extra headers (Supabase-style datastores
/// want their `apikey` header next to the bearer token).
pub fn request_headers(api_key: &str, extra: &Map<String, Value>) -> Result<HeaderMap> {
	let mut headers = HeaderMap::new();
	headers.insert(AUTHORIZATION, HeaderValue::try_from(format!("Bearer {api_key}"))?);
	for (name, value) in extra {
		let text = value.as_str().ok_or_else(|| eyre!("Header {name} must be a string value."))?;
		headers.insert(HeaderName::from_bytes(name.as_bytes())?, HeaderValue::try_from(text)?);
	}
	Ok(headers)
}
