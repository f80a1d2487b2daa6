//! Subscription management for real-time channels.

use crate::error::RealtimeError;
use eng_types::ProjectId;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Maximum subscriptions per client.
pub const MAX_SUBSCRIPTIONS_PER_CLIENT: usize = 100;

/// A channel that clients can subscribe to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Channel {
    /// Channel type.
    pub channel_type: ChannelType,
    /// Project id or session id.
    pub identifier: String,
    /// Optional sub-channel filter.
    pub filter: Option<ProjectFilter>,
}

/// Sub-channels of a project channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProjectFilter {
    /// Pull request events.
    Pulls,
    /// Branch and commit events.
    Branches,
}

impl ProjectFilter {
    fn as_str(&self) -> &'static str {
        match self {
            ProjectFilter::Pulls => "pulls",
            ProjectFilter::Branches => "branches",
        }
    }
}

impl Channel {
    /// Parse a channel string into a Channel.
    ///
    /// Formats:
    /// - `project:<id>` - All events for a project
    /// - `project:<id>/pulls` - Pull request events only
    /// - `project:<id>/branches` - Branch and commit events only
    /// - `session:<id>` - Collaboration session events
    pub fn parse(s: &str) -> Result<Self, RealtimeError> {
        let Some((prefix, rest)) = s.split_once(':') else {
            return Err(RealtimeError::InvalidChannel(format!(
                "missing channel type prefix: {}",
                s
            )));
        };

        match prefix {
            "project" => {
                let (id, filter) = match rest.split_once('/') {
                    Some((id, "pulls")) => (id, Some(ProjectFilter::Pulls)),
                    Some((id, "branches")) => (id, Some(ProjectFilter::Branches)),
                    Some((_, other)) => {
                        return Err(RealtimeError::InvalidChannel(format!(
                            "unknown project sub-channel: {}",
                            other
                        )))
                    }
                    None => (rest, None),
                };
                let project = ProjectId::parse(id)
                    .map_err(|e| RealtimeError::InvalidChannel(e.to_string()))?;
                Ok(Self::project(&project, filter))
            }
            "session" => {
                if rest.is_empty() || rest.contains('/') {
                    return Err(RealtimeError::InvalidChannel(format!(
                        "invalid session identifier: {}",
                        s
                    )));
                }
                Ok(Self::session(rest))
            }
            _ => Err(RealtimeError::InvalidChannel(format!(
                "unknown channel type: {}",
                prefix
            ))),
        }
    }

    /// Channel for a project, optionally narrowed to a sub-channel.
    pub fn project(project: &ProjectId, filter: Option<ProjectFilter>) -> Self {
        Self {
            channel_type: ChannelType::Project,
            identifier: project.to_string(),
            filter,
        }
    }

    /// Channel for a collaboration session.
    pub fn session(id: &str) -> Self {
        Self {
            channel_type: ChannelType::Session,
            identifier: id.to_string(),
            filter: None,
        }
    }

    /// Check if an event channel matches this subscription channel.
    pub fn matches(&self, event_channel: &str) -> bool {
        let event_chan = match Channel::parse(event_channel) {
            Ok(c) => c,
            Err(_) => return false,
        };

        if self.channel_type != event_chan.channel_type {
            return false;
        }

        if self.identifier != event_chan.identifier {
            return false;
        }

        // If subscription has no filter, it matches all sub-channels
        if self.filter.is_none() {
            return true;
        }

        // If subscription has a filter, event must match exactly
        self.filter == event_chan.filter
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let prefix = match self.channel_type {
            ChannelType::Project => "project",
            ChannelType::Session => "session",
        };

        match &self.filter {
            Some(filter) => write!(f, "{}:{}/{}", prefix, self.identifier, filter.as_str()),
            None => write!(f, "{}:{}", prefix, self.identifier),
        }
    }
}

/// Channel types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelType {
    /// Project channel (e.g., project:gearbox).
    Project,
    /// Collaboration session channel (e.g., session:1f3c...).
    Session,
}

/// Manages subscriptions for a single client.
#[derive(Debug, Default)]
pub struct ClientSubscriptions {
    /// Set of subscribed channels.
    channels: HashSet<Channel>,
}

impl ClientSubscriptions {
    /// Create a new subscription manager.
    pub fn new() -> Self {
        Self {
            channels: HashSet::new(),
        }
    }

    /// Subscribe to a channel. Returns false if already subscribed.
    pub fn subscribe(&mut self, channel: Channel) -> Result<bool, RealtimeError> {
        if self.channels.contains(&channel) {
            return Ok(false);
        }
        if self.channels.len() >= MAX_SUBSCRIPTIONS_PER_CLIENT {
            return Err(RealtimeError::SubscriptionLimit(
                MAX_SUBSCRIPTIONS_PER_CLIENT,
            ));
        }

        Ok(self.channels.insert(channel))
    }

    /// Unsubscribe from a channel.
    pub fn unsubscribe(&mut self, channel: &Channel) -> bool {
        self.channels.remove(channel)
    }

    /// Check if subscribed to a channel.
    pub fn is_subscribed(&self, channel: &Channel) -> bool {
        self.channels.contains(channel)
    }

    /// Check if any subscription matches the event channel.
    pub fn matches_event(&self, event_channel: &str) -> bool {
        self.channels.iter().any(|c| c.matches(event_channel))
    }

    /// Get all subscribed channels.
    pub fn channels(&self) -> impl Iterator<Item = &Channel> {
        self.channels.iter()
    }

    /// Get subscription count.
    pub fn count(&self) -> usize {
        self.channels.len()
    }

    /// Clear all subscriptions.
    pub fn clear(&mut self) {
        self.channels.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_project_channel() {
        let channel = Channel::parse("project:gearbox").unwrap();
        assert_eq!(channel.channel_type, ChannelType::Project);
        assert_eq!(channel.identifier, "gearbox");
        assert_eq!(channel.filter, None);
    }

    #[test]
    fn test_parse_project_sub_channels() {
        let pulls = Channel::parse("project:gearbox/pulls").unwrap();
        assert_eq!(pulls.filter, Some(ProjectFilter::Pulls));
        let branches = Channel::parse("project:gearbox/branches").unwrap();
        assert_eq!(branches.filter, Some(ProjectFilter::Branches));
    }

    #[test]
    fn test_parse_session_channel() {
        let channel = Channel::parse("session:abc-123").unwrap();
        assert_eq!(channel.channel_type, ChannelType::Session);
        assert_eq!(channel.identifier, "abc-123");
    }

    #[test]
    fn test_parse_invalid_channels() {
        for s in [
            "gearbox",
            "repo:alice/x",
            "project:",
            "project:bad id",
            "project:gearbox/issues",
            "session:",
            "session:a/b",
        ] {
            assert!(Channel::parse(s).is_err(), "{s} should be rejected");
        }
    }

    #[test]
    fn test_channel_display_roundtrip() {
        for s in ["project:gearbox", "project:gearbox/pulls", "session:s-1"] {
            assert_eq!(Channel::parse(s).unwrap().to_string(), s);
        }
    }

    #[test]
    fn test_channel_matching() {
        let all = Channel::parse("project:gearbox").unwrap();
        assert!(all.matches("project:gearbox"));
        assert!(all.matches("project:gearbox/pulls"));
        assert!(all.matches("project:gearbox/branches"));
        assert!(!all.matches("project:rover"));
        assert!(!all.matches("session:gearbox"));

        let pulls = Channel::parse("project:gearbox/pulls").unwrap();
        assert!(pulls.matches("project:gearbox/pulls"));
        assert!(!pulls.matches("project:gearbox"));
        assert!(!pulls.matches("project:gearbox/branches"));
    }

    #[test]
    fn test_subscription_limit() {
        let mut subs = ClientSubscriptions::new();
        for i in 0..MAX_SUBSCRIPTIONS_PER_CLIENT {
            assert!(subs.subscribe(Channel::session(&format!("s{i}"))).unwrap());
        }
        // Re-subscribing to an existing channel is not an error.
        assert!(!subs.subscribe(Channel::session("s0")).unwrap());
        assert!(matches!(
            subs.subscribe(Channel::session("overflow")),
            Err(RealtimeError::SubscriptionLimit(_))
        ));
    }
}
