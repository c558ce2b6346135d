use uuid::Uuid;

use crate::error::{Error, Result};

/// Validated journal-owner identity. Only the normalized form is ever
/// substituted into SQL text.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SubjectId(String);

impl SubjectId {
	pub fn parse(raw: &str) -> Result<Self> {
		let trimmed = raw.trim();

		if trimmed.is_empty() {
			return Err(Error::InvalidSubject {
				message: "Subject id must be non-empty.".to_string(),
			});
		}

		let uuid = Uuid::parse_str(trimmed).map_err(|_| Error::InvalidSubject {
			message: format!("Subject id {trimmed:?} is not a valid UUID."),
		})?;

		Ok(Self(uuid.as_hyphenated().to_string()))
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl std::fmt::Display for SubjectId {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(&self.0)
	}
}
