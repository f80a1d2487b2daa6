//! Branch registry: named, mutable pointers to commits.

use crate::{ProtectionRule, ProtectionRules, Result, VcsError};
use eng_storage::ContentId;
use eng_types::{unix_now, ProjectId, UserId};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::info;

/// Maximum branch name length.
const MAX_BRANCH_NAME_LEN: usize = 255;

/// Unique identifier for a branch.
pub type BranchId = u64;

/// Lifecycle state of a branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BranchStatus {
    /// Accepts commits and merges.
    Active,
    /// Merged into another branch; kept for inspection.
    Merged,
    /// Soft-deleted; history remains walkable.
    Deleted,
}

impl std::fmt::Display for BranchStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BranchStatus::Active => write!(f, "active"),
            BranchStatus::Merged => write!(f, "merged"),
            BranchStatus::Deleted => write!(f, "deleted"),
        }
    }
}

/// A named line of development.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Branch {
    /// Unique identifier within the project.
    pub id: BranchId,
    /// Owning project.
    pub project_id: ProjectId,
    /// Branch name, unique among live branches of the project.
    pub name: String,
    /// Commit the branch points at.
    pub head_commit_id: ContentId,
    /// Protection settings.
    pub protection_rules: ProtectionRules,
    /// Lifecycle state.
    pub status: BranchStatus,
    /// Whether this is the project's default branch.
    pub is_default: bool,
    /// Who created the branch.
    pub created_by: Option<UserId>,
    /// Unix timestamp of creation.
    pub created_at: u64,
    /// Unix timestamp of the last head change.
    pub updated_at: u64,
    /// Unix timestamp when merged.
    pub merged_at: Option<u64>,
    /// Branch this one was merged into.
    pub merged_into: Option<BranchId>,
    /// Unix timestamp when soft-deleted.
    pub deleted_at: Option<u64>,
}

impl Branch {
    /// Returns true if the branch accepts new commits.
    pub fn is_active(&self) -> bool {
        self.status == BranchStatus::Active
    }

    pub(crate) fn ensure_active(&self) -> Result<()> {
        if self.is_active() {
            Ok(())
        } else {
            Err(VcsError::BranchNotActive {
                branch: self.name.clone(),
                status: self.status.to_string(),
            })
        }
    }
}

/// Validates a branch name.
///
/// Names may contain letters, digits, `-`, `_` and `/`. Slash-separated
/// segments must be non-empty.
pub fn validate_branch_name(name: &str) -> Result<()> {
    let reject = |reason: &str| {
        Err(VcsError::InvalidName {
            name: name.to_string(),
            reason: reason.to_string(),
        })
    };

    if name.is_empty() {
        return reject("must not be empty");
    }
    if name.len() > MAX_BRANCH_NAME_LEN {
        return reject("too long");
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '/'))
    {
        return reject("only letters, digits, '-', '_' and '/' are allowed");
    }
    if name.split('/').any(str::is_empty) {
        return reject("empty path segment");
    }
    Ok(())
}

/// Thread-safe registry of a project's branches.
///
/// The head pointer is the only mutable piece of version-control state, and
/// every head change goes through [`BranchRegistry::compare_and_swap_head`]
/// or [`BranchRegistry::finish_merge`].
#[derive(Debug)]
pub struct BranchRegistry {
    project_id: ProjectId,
    branches: RwLock<HashMap<BranchId, Branch>>,
    patterns: RwLock<Vec<ProtectionRule>>,
    next_id: AtomicU64,
}

impl BranchRegistry {
    /// Creates an empty registry for a project.
    pub fn new(project_id: ProjectId) -> Self {
        Self {
            project_id,
            branches: RwLock::new(HashMap::new()),
            patterns: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(0),
        }
    }

    /// Rebuilds a registry from saved branches.
    pub fn restore(project_id: ProjectId, branches: Vec<Branch>, patterns: Vec<ProtectionRule>) -> Self {
        let next_id = branches.iter().map(|b| b.id).max().unwrap_or(0);
        Self {
            project_id,
            branches: RwLock::new(branches.into_iter().map(|b| (b.id, b)).collect()),
            patterns: RwLock::new(patterns),
            next_id: AtomicU64::new(next_id),
        }
    }

    /// The project this registry belongs to.
    pub fn project_id(&self) -> &ProjectId {
        &self.project_id
    }

    /// Adds a pattern rule applied to branches created afterwards.
    pub fn add_protection_pattern(&self, rule: ProtectionRule) {
        self.patterns.write().push(rule);
    }

    /// Lists pattern rules.
    pub fn protection_patterns(&self) -> Vec<ProtectionRule> {
        self.patterns.read().clone()
    }

    /// Registers a new branch pointing at `head`.
    ///
    /// The caller must have verified that `head` exists.
    pub fn insert(
        &self,
        name: &str,
        head: ContentId,
        is_default: bool,
        created_by: Option<UserId>,
    ) -> Result<Branch> {
        validate_branch_name(name)?;

        let protection_rules = self
            .patterns
            .read()
            .iter()
            .find(|rule| rule.matches(name))
            .map(|rule| rule.rules.clone())
            .unwrap_or_default();

        let mut branches = self.branches.write();
        if branches
            .values()
            .any(|b| b.name == name && b.status != BranchStatus::Deleted)
        {
            return Err(VcsError::AlreadyExists {
                kind: "branch",
                name: name.to_string(),
            });
        }

        let now = unix_now();
        let branch = Branch {
            id: self.next_id.fetch_add(1, Ordering::SeqCst) + 1,
            project_id: self.project_id.clone(),
            name: name.to_string(),
            head_commit_id: head,
            protection_rules,
            status: BranchStatus::Active,
            is_default,
            created_by,
            created_at: now,
            updated_at: now,
            merged_at: None,
            merged_into: None,
            deleted_at: None,
        };
        branches.insert(branch.id, branch.clone());

        info!(project = %self.project_id, branch = %name, head = %head.short(), "Branch created");
        Ok(branch)
    }

    /// Gets a branch by id.
    pub fn get(&self, id: BranchId) -> Result<Branch> {
        self.branches
            .read()
            .get(&id)
            .cloned()
            .ok_or_else(|| VcsError::BranchNotFound(id.to_string()))
    }

    /// Gets the live (non-deleted) branch with the given name.
    pub fn get_by_name(&self, name: &str) -> Result<Branch> {
        self.branches
            .read()
            .values()
            .find(|b| b.name == name && b.status != BranchStatus::Deleted)
            .cloned()
            .ok_or_else(|| VcsError::BranchNotFound(name.to_string()))
    }

    /// Returns the default branch.
    pub fn default_branch(&self) -> Result<Branch> {
        self.branches
            .read()
            .values()
            .find(|b| b.is_default)
            .cloned()
            .ok_or_else(|| VcsError::BranchNotFound("<default>".to_string()))
    }

    /// Lists branches sorted by id, optionally including deleted ones.
    pub fn list(&self, include_deleted: bool) -> Vec<Branch> {
        let mut list: Vec<Branch> = self
            .branches
            .read()
            .values()
            .filter(|b| include_deleted || b.status != BranchStatus::Deleted)
            .cloned()
            .collect();
        list.sort_by_key(|b| b.id);
        list
    }

    /// Atomically moves a branch head from `expected` to `new_head`.
    ///
    /// Fails with [`VcsError::ConcurrentModification`] if the head is no
    /// longer `expected`, and with [`VcsError::BranchNotActive`] if the
    /// branch was merged or deleted.
    pub fn compare_and_swap_head(
        &self,
        id: BranchId,
        expected: ContentId,
        new_head: ContentId,
    ) -> Result<Branch> {
        let mut branches = self.branches.write();
        let branch = branches
            .get_mut(&id)
            .ok_or_else(|| VcsError::BranchNotFound(id.to_string()))?;

        branch.ensure_active()?;
        if branch.head_commit_id != expected {
            return Err(VcsError::ConcurrentModification {
                branch: branch.name.clone(),
                expected: expected.to_hex(),
                actual: branch.head_commit_id.to_hex(),
            });
        }

        branch.head_commit_id = new_head;
        branch.updated_at = unix_now();
        Ok(branch.clone())
    }

    /// Soft-deletes a branch.
    pub fn mark_deleted(&self, id: BranchId) -> Result<Branch> {
        let mut branches = self.branches.write();
        let branch = branches
            .get_mut(&id)
            .ok_or_else(|| VcsError::BranchNotFound(id.to_string()))?;

        if branch.status == BranchStatus::Deleted {
            return Err(VcsError::BranchNotFound(branch.name.clone()));
        }
        if branch.is_default {
            return Err(VcsError::ProtectedBranch(branch.name.clone()));
        }
        if !branch.protection_rules.allows_deletion() {
            return Err(VcsError::BranchProtected {
                branch: branch.name.clone(),
                reason: "deletion is not allowed".to_string(),
            });
        }

        let now = unix_now();
        branch.status = BranchStatus::Deleted;
        branch.deleted_at = Some(now);
        branch.updated_at = now;

        info!(project = %self.project_id, branch = %branch.name, "Branch deleted");
        Ok(branch.clone())
    }

    /// Moves `target` to `new_head` and marks `source` merged into it, as one
    /// step.
    ///
    /// Both heads must still be the ones the merge was computed from and both
    /// branches must be active; otherwise nothing changes. Returns the
    /// updated `(source, target)`.
    pub fn finish_merge(
        &self,
        source_id: BranchId,
        expected_source: ContentId,
        target_id: BranchId,
        expected_target: ContentId,
        new_head: ContentId,
    ) -> Result<(Branch, Branch)> {
        let mut branches = self.branches.write();
        for (id, expected) in [(source_id, expected_source), (target_id, expected_target)] {
            let branch = branches
                .get(&id)
                .ok_or_else(|| VcsError::BranchNotFound(id.to_string()))?;
            branch.ensure_active()?;
            if branch.head_commit_id != expected {
                return Err(VcsError::ConcurrentModification {
                    branch: branch.name.clone(),
                    expected: expected.to_hex(),
                    actual: branch.head_commit_id.to_hex(),
                });
            }
        }

        let now = unix_now();
        let target = branches
            .get_mut(&target_id)
            .ok_or_else(|| VcsError::BranchNotFound(target_id.to_string()))?;
        target.head_commit_id = new_head;
        target.updated_at = now;
        let target = target.clone();

        let source = branches
            .get_mut(&source_id)
            .ok_or_else(|| VcsError::BranchNotFound(source_id.to_string()))?;
        source.status = BranchStatus::Merged;
        source.merged_at = Some(now);
        source.merged_into = Some(target_id);
        source.updated_at = now;
        Ok((source.clone(), target))
    }

    /// Replaces the registry contents. Used to roll back a write that could
    /// not be saved; the id counter is left alone.
    pub(crate) fn reset(&self, branches: Vec<Branch>, patterns: Vec<ProtectionRule>) {
        *self.branches.write() = branches.into_iter().map(|b| (b.id, b)).collect();
        *self.patterns.write() = patterns;
    }

    /// Replaces a branch's protection rules.
    pub fn set_protection(&self, id: BranchId, rules: ProtectionRules) -> Result<Branch> {
        let mut branches = self.branches.write();
        let branch = branches
            .get_mut(&id)
            .ok_or_else(|| VcsError::BranchNotFound(id.to_string()))?;
        branch.protection_rules = rules;
        branch.updated_at = unix_now();
        Ok(branch.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn registry() -> BranchRegistry {
        BranchRegistry::new(ProjectId::parse("gearbox").unwrap())
    }

    fn commit(n: u8) -> ContentId {
        ContentId::from_bytes([n; 32])
    }

    #[test]
    fn test_branch_name_validation() {
        for ok in ["main", "feature/x", "fix_42", "release/v1-2/hotfix"] {
            assert!(validate_branch_name(ok).is_ok(), "{ok}");
        }
        for bad in ["", "has space", "feature/", "/lead", "a//b", "v1.0", "name~1", "ünï"] {
            assert!(
                matches!(validate_branch_name(bad), Err(VcsError::InvalidName { .. })),
                "{bad}"
            );
        }
    }

    #[test]
    fn test_insert_and_lookup() {
        let reg = registry();
        let main = reg.insert("main", commit(1), true, None).unwrap();
        assert_eq!(main.id, 1);
        assert!(main.is_default);
        assert_eq!(reg.get_by_name("main").unwrap().id, main.id);
        assert_eq!(reg.default_branch().unwrap().id, main.id);
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let reg = registry();
        reg.insert("main", commit(1), true, None).unwrap();
        assert!(matches!(
            reg.insert("main", commit(2), false, None),
            Err(VcsError::AlreadyExists { kind: "branch", .. })
        ));
    }

    #[test]
    fn test_deleted_name_can_be_reused() {
        let reg = registry();
        let b = reg.insert("spike", commit(1), false, None).unwrap();
        reg.mark_deleted(b.id).unwrap();
        let again = reg.insert("spike", commit(2), false, None).unwrap();
        assert_ne!(again.id, b.id);
        assert_eq!(reg.get_by_name("spike").unwrap().id, again.id);
        assert_eq!(reg.list(false).len(), 1);
        assert_eq!(reg.list(true).len(), 2);
    }

    #[test]
    fn test_compare_and_swap() {
        let reg = registry();
        let b = reg.insert("main", commit(1), true, None).unwrap();

        let moved = reg.compare_and_swap_head(b.id, commit(1), commit(2)).unwrap();
        assert_eq!(moved.head_commit_id, commit(2));

        let stale = reg.compare_and_swap_head(b.id, commit(1), commit(3));
        assert!(matches!(stale, Err(VcsError::ConcurrentModification { .. })));
        assert_eq!(reg.get(b.id).unwrap().head_commit_id, commit(2));
    }

    #[test]
    fn test_concurrent_cas_single_winner() {
        let reg = Arc::new(registry());
        let b = reg.insert("main", commit(0), true, None).unwrap();

        let handles: Vec<_> = (1..=8u8)
            .map(|n| {
                let reg = reg.clone();
                std::thread::spawn(move || reg.compare_and_swap_head(b.id, commit(0), commit(n)))
            })
            .collect();

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(results
            .iter()
            .filter(|r| r.is_err())
            .all(|r| matches!(r, Err(VcsError::ConcurrentModification { .. }))));
    }

    #[test]
    fn test_finish_merge_is_all_or_nothing() {
        let reg = registry();
        let main = reg.insert("main", commit(1), true, None).unwrap();
        let feature = reg.insert("feature/x", commit(2), false, None).unwrap();

        for (source, target) in [(commit(9), commit(1)), (commit(2), commit(9))] {
            assert!(matches!(
                reg.finish_merge(feature.id, source, main.id, target, commit(3)),
                Err(VcsError::ConcurrentModification { .. })
            ));
        }
        assert_eq!(reg.get(main.id).unwrap().head_commit_id, commit(1));
        assert_eq!(reg.get(feature.id).unwrap().status, BranchStatus::Active);

        let (source, target) = reg
            .finish_merge(feature.id, commit(2), main.id, commit(1), commit(3))
            .unwrap();
        assert_eq!(target.head_commit_id, commit(3));
        assert_eq!(source.status, BranchStatus::Merged);
        assert_eq!(source.merged_into, Some(main.id));
        assert!(source.merged_at.is_some());

        // Merged is terminal; a second finish changes nothing.
        assert!(matches!(
            reg.finish_merge(feature.id, commit(2), main.id, commit(3), commit(4)),
            Err(VcsError::BranchNotActive { .. })
        ));
        assert_eq!(reg.get(main.id).unwrap().head_commit_id, commit(3));
    }

    #[test]
    fn test_finish_merge_of_deleted_source_leaves_target() {
        let reg = registry();
        let main = reg.insert("main", commit(1), true, None).unwrap();
        let feature = reg.insert("feature/x", commit(2), false, None).unwrap();
        reg.mark_deleted(feature.id).unwrap();

        assert!(matches!(
            reg.finish_merge(feature.id, commit(2), main.id, commit(1), commit(3)),
            Err(VcsError::BranchNotActive { .. })
        ));
        assert_eq!(reg.get(main.id).unwrap().head_commit_id, commit(1));
        assert_eq!(reg.get(feature.id).unwrap().merged_into, None);
    }

    #[test]
    fn test_concurrent_finish_merge_and_delete() {
        for _ in 0..32 {
            let reg = Arc::new(registry());
            let main = reg.insert("main", commit(1), true, None).unwrap();
            let feature = reg.insert("feature/x", commit(2), false, None).unwrap();

            let merge = {
                let reg = reg.clone();
                std::thread::spawn(move || {
                    reg.finish_merge(feature.id, commit(2), main.id, commit(1), commit(3))
                })
            };
            let delete = {
                let reg = reg.clone();
                std::thread::spawn(move || reg.mark_deleted(feature.id))
            };
            let merged = merge.join().unwrap().is_ok();
            assert!(delete.join().unwrap().is_ok());

            let head = reg.get(main.id).unwrap().head_commit_id;
            let source = reg.get(feature.id).unwrap();
            assert_eq!(head == commit(3), merged);
            assert_eq!(source.merged_into.is_some(), merged);
        }
    }

    #[test]
    fn test_reset_restores_previous_state() {
        let reg = registry();
        let main = reg.insert("main", commit(1), true, None).unwrap();
        let before = (reg.list(true), reg.protection_patterns());

        reg.compare_and_swap_head(main.id, commit(1), commit(2)).unwrap();
        reg.insert("spike", commit(2), false, None).unwrap();
        reg.add_protection_pattern(ProtectionRule::new("release/*", ProtectionRules::protected(1)));

        reg.reset(before.0, before.1);
        assert_eq!(reg.get(main.id).unwrap().head_commit_id, commit(1));
        assert!(reg.get_by_name("spike").is_err());
        assert!(reg.protection_patterns().is_empty());
        // Ids are never reused.
        assert_eq!(reg.insert("next", commit(1), false, None).unwrap().id, 3);
    }

    #[test]
    fn test_delete_default_branch_rejected() {
        let reg = registry();
        let main = reg.insert("main", commit(1), true, None).unwrap();
        assert!(matches!(reg.mark_deleted(main.id), Err(VcsError::ProtectedBranch(_))));
    }

    #[test]
    fn test_delete_protected_branch_rejected() {
        let reg = registry();
        reg.add_protection_pattern(ProtectionRule::new("release/*", ProtectionRules::protected(1)));
        let rel = reg.insert("release/v1-0", commit(1), false, None).unwrap();
        assert!(!rel.protection_rules.allow_deletion);
        assert!(matches!(
            reg.mark_deleted(rel.id),
            Err(VcsError::BranchProtected { .. })
        ));
    }

    #[test]
    fn test_soft_delete_keeps_record() {
        let reg = registry();
        let b = reg.insert("spike", commit(1), false, None).unwrap();
        let deleted = reg.mark_deleted(b.id).unwrap();
        assert_eq!(deleted.status, BranchStatus::Deleted);
        assert!(deleted.deleted_at.is_some());
        assert_eq!(reg.get(b.id).unwrap().head_commit_id, commit(1));
        assert!(reg.get_by_name("spike").is_err());
        assert!(matches!(
            reg.compare_and_swap_head(b.id, commit(1), commit(2)),
            Err(VcsError::BranchNotActive { .. })
        ));
    }

    #[test]
    fn test_restore_continues_ids() {
        let reg = registry();
        reg.insert("main", commit(1), true, None).unwrap();
        reg.insert("dev", commit(1), false, None).unwrap();

        let restored = BranchRegistry::restore(
            reg.project_id().clone(),
            reg.list(true),
            reg.protection_patterns(),
        );
        assert_eq!(restored.insert("next", commit(1), false, None).unwrap().id, 3);
    }
}
