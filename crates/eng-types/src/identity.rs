//! User identity types.
//!
//! A user's `handle` is the single canonical identifier. The legacy
//! `username` field is accepted on input as an alias of `handle` and
//! `display_name` is purely presentational.

use crate::project::{validate_slug, InvalidIdentifier};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Canonical user identifier (the user's handle).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct UserId(String);

impl UserId {
    /// Parses and validates a user handle.
    pub fn parse(value: impl Into<String>) -> Result<Self, InvalidIdentifier> {
        let value = value.into();
        validate_slug(&value)?;
        Ok(Self(value))
    }

    /// Returns the handle as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for UserId {
    type Error = InvalidIdentifier;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<UserId> for String {
    fn from(id: UserId) -> Self {
        id.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Public profile of a platform user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    /// Canonical identifier.
    #[serde(alias = "username")]
    pub handle: UserId,
    /// Free-form name shown in the UI.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

impl UserProfile {
    /// Creates a profile with no display name.
    pub fn new(handle: UserId) -> Self {
        Self {
            handle,
            display_name: None,
        }
    }

    /// Returns the display name, falling back to the handle.
    pub fn label(&self) -> &str {
        self.display_name
            .as_deref()
            .filter(|name| !name.trim().is_empty())
            .unwrap_or(self.handle.as_str())
    }
}
