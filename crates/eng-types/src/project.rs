//! Project identifiers.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Maximum length of a project or user identifier.
const MAX_IDENTIFIER_LEN: usize = 100;

/// Error returned when an identifier fails validation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid identifier {value:?}: {reason}")]
pub struct InvalidIdentifier {
    /// The rejected value.
    pub value: String,
    /// Why it was rejected.
    pub reason: &'static str,
}

/// Validates a slug-style identifier (letters, digits, `-`, `_`, `.`).
pub(crate) fn validate_slug(value: &str) -> Result<(), InvalidIdentifier> {
    let reject = |reason| {
        Err(InvalidIdentifier {
            value: value.to_string(),
            reason,
        })
    };

    if value.is_empty() {
        return reject("must not be empty");
    }
    if value.len() > MAX_IDENTIFIER_LEN {
        return reject("too long");
    }
    if value.starts_with('.') || value.starts_with('-') {
        return reject("must start with a letter, digit or underscore");
    }
    if !value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    {
        return reject("contains characters outside [A-Za-z0-9._-]");
    }
    Ok(())
}

/// Identifier of a project hosted on the platform.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ProjectId(String);

impl ProjectId {
    /// Parses and validates a project identifier.
    pub fn parse(value: impl Into<String>) -> Result<Self, InvalidIdentifier> {
        let value = value.into();
        validate_slug(&value)?;
        Ok(Self(value))
    }

    /// Returns the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for ProjectId {
    type Error = InvalidIdentifier;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<ProjectId> for String {
    fn from(id: ProjectId) -> Self {
        id.0
    }
}

impl fmt::Display for ProjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_project_ids() {
        for id in ["gearbox", "rover-2", "cad_lib", "v1.0-sim"] {
            assert!(ProjectId::parse(id).is_ok(), "{id} should be valid");
        }
    }

    #[test]
    fn test_invalid_project_ids() {
        let long = "x".repeat(101);
        for id in ["", "-lead", ".hidden", "has space", "a/b", long.as_str()] {
            assert!(ProjectId::parse(id).is_err(), "{id} should be rejected");
        }
    }

    #[test]
    fn test_project_id_serde() {
        let id = ProjectId::parse("gearbox").unwrap();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"gearbox\"");

        let parsed: ProjectId = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, id);

        assert!(serde_json::from_str::<ProjectId>("\"bad id\"").is_err());
    }
}
