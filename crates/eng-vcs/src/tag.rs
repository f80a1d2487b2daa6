//! Tag registry: immutable, named references to commits.

use crate::{Result, VcsError};
use eng_storage::ContentId;
use eng_types::{unix_now, ProjectId, UserId};
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::info;

static SEMVER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^v?\d+\.\d+\.\d+").expect("Invalid regex"));

static SEMVER_PRERELEASE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^v?\d+\.\d+\.\d+-[0-9A-Za-z]").expect("Invalid regex"));

/// What a tag marks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TagType {
    /// A published release; the name must be a semantic version.
    Release,
    /// A hotfix release.
    Hotfix,
    /// A project milestone.
    Milestone,
}

/// A named reference to a commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub id: u64,
    pub project_id: ProjectId,
    pub name: String,
    pub commit_id: ContentId,
    pub tag_type: TagType,
    pub is_prerelease: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<UserId>,
    pub created_at: u64,
    /// The only field that changes after creation.
    pub download_count: u64,
}

/// Parameters for a new tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewTag {
    pub name: String,
    pub commit_id: ContentId,
    pub tag_type: TagType,
    /// Inferred from a `-suffix` on the version when absent.
    #[serde(default)]
    pub is_prerelease: Option<bool>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub created_by: Option<UserId>,
}

impl NewTag {
    /// A tag with no message, author or explicit prerelease flag.
    pub fn new(name: impl Into<String>, commit_id: ContentId, tag_type: TagType) -> Self {
        Self {
            name: name.into(),
            commit_id,
            tag_type,
            is_prerelease: None,
            message: None,
            created_by: None,
        }
    }
}

/// Checks a tag name against its type.
pub fn validate_tag_name(name: &str, tag_type: TagType) -> Result<()> {
    if name.trim().is_empty() {
        return Err(VcsError::InvalidName {
            name: name.to_string(),
            reason: "must not be empty".to_string(),
        });
    }
    if tag_type == TagType::Release && !SEMVER.is_match(name) {
        return Err(VcsError::InvalidVersionFormat(name.to_string()));
    }
    Ok(())
}

/// Returns true for names like `v2.0.0-rc.1`.
pub fn is_prerelease_version(name: &str) -> bool {
    SEMVER_PRERELEASE.is_match(name)
}

/// Thread-safe registry of a project's tags, keyed by name.
#[derive(Debug)]
pub struct TagRegistry {
    project_id: ProjectId,
    tags: RwLock<BTreeMap<String, Tag>>,
    next_id: AtomicU64,
}

impl TagRegistry {
    /// Creates an empty registry.
    pub fn new(project_id: ProjectId) -> Self {
        Self {
            project_id,
            tags: RwLock::new(BTreeMap::new()),
            next_id: AtomicU64::new(0),
        }
    }

    /// Rebuilds a registry from saved tags.
    pub fn restore(project_id: ProjectId, tags: Vec<Tag>) -> Self {
        let next_id = tags.iter().map(|t| t.id).max().unwrap_or(0);
        Self {
            project_id,
            tags: RwLock::new(tags.into_iter().map(|t| (t.name.clone(), t)).collect()),
            next_id: AtomicU64::new(next_id),
        }
    }

    /// Replaces the registry contents. Used to roll back a write that could
    /// not be saved.
    pub(crate) fn reset(&self, tags: Vec<Tag>) {
        *self.tags.write() = tags.into_iter().map(|t| (t.name.clone(), t)).collect();
    }

    /// Creates a tag. The caller must have verified the commit exists.
    pub fn create(&self, new: NewTag) -> Result<Tag> {
        validate_tag_name(&new.name, new.tag_type)?;

        let mut tags = self.tags.write();
        if tags.contains_key(&new.name) {
            return Err(VcsError::AlreadyExists {
                kind: "tag",
                name: new.name,
            });
        }

        let tag = Tag {
            id: self.next_id.fetch_add(1, Ordering::SeqCst) + 1,
            project_id: self.project_id.clone(),
            is_prerelease: new
                .is_prerelease
                .unwrap_or_else(|| is_prerelease_version(&new.name)),
            name: new.name,
            commit_id: new.commit_id,
            tag_type: new.tag_type,
            message: new.message,
            created_by: new.created_by,
            created_at: unix_now(),
            download_count: 0,
        };
        tags.insert(tag.name.clone(), tag.clone());

        info!(
            project = %self.project_id,
            tag = %tag.name,
            commit = %tag.commit_id.short(),
            "Tag created"
        );
        Ok(tag)
    }

    /// Gets a tag by name.
    pub fn get(&self, name: &str) -> Result<Tag> {
        self.tags
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| VcsError::TagNotFound(name.to_string()))
    }

    /// Lists tags, oldest first.
    pub fn list(&self) -> Vec<Tag> {
        let mut list: Vec<Tag> = self.tags.read().values().cloned().collect();
        list.sort_by_key(|t| t.id);
        list
    }

    /// Deletes a tag. Moving a tag is delete followed by create.
    pub fn delete(&self, name: &str) -> Result<Tag> {
        let tag = self
            .tags
            .write()
            .remove(name)
            .ok_or_else(|| VcsError::TagNotFound(name.to_string()))?;
        info!(project = %self.project_id, tag = %name, "Tag deleted");
        Ok(tag)
    }

    /// Increments a tag's download counter.
    pub fn record_download(&self, name: &str) -> Result<Tag> {
        let mut tags = self.tags.write();
        let tag = tags
            .get_mut(name)
            .ok_or_else(|| VcsError::TagNotFound(name.to_string()))?;
        tag.download_count += 1;
        Ok(tag.clone())
    }
}
