//! Common types used throughout `eng`.
//!
//! This crate provides the identifiers shared by the version-control and
//! real-time collaboration subsystems of eng.com.

mod error;
mod identity;
mod project;

pub use error::ErrorKind;
pub use identity::{UserId, UserProfile};
pub use project::{InvalidIdentifier, ProjectId};

use std::time::{SystemTime, UNIX_EPOCH};

/// Returns the current Unix timestamp in seconds.
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Returns the current Unix timestamp in milliseconds.
pub fn unix_now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind_display_matches_serde() {
        let kind = ErrorKind::NotFound;
        assert_eq!(kind.to_string(), "not_found");
        assert_eq!(serde_json::to_string(&kind).unwrap(), "\"not_found\"");
    }

    #[test]
    fn test_clock_is_past_epoch() {
        assert!(unix_now() > 1_600_000_000);
        assert!(unix_now_millis() / 1000 >= unix_now() - 1);
    }
}
