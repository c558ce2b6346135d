pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("Invalid plan: {message}")]
	InvalidPlan { message: String },
	#[error("Invalid subject: {message}")]
	InvalidSubject { message: String },
	#[error("Failed to parse plan JSON.")]
	ParsePlan(#[from] serde_json::Error),
}
