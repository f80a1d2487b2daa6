//! Per-project repository: the entry point for all version-control operations.

use crate::change::apply_edits;
use crate::diff::{detect_renames, diff_trees};
use crate::merge::three_way_merge;
use crate::{
    Branch, BranchId, BranchRegistry, Change, CommitGraph, MergeConflict, MergeLabels,
    MergeStrategy, NewTag, ProtectionRule, ProtectionRules, RepoEvent, Resolution, Result, Tag,
    TagRegistry, VcsError,
};
use eng_storage::{Commit, CommitDraft, ContentId, FileChange, ObjectStore, Tree};
use eng_types::{unix_now, ProjectId, UserId};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::sync::broadcast;
use tracing::{info, warn};

/// Name of the branch created by [`Repository::init`].
pub const DEFAULT_BRANCH: &str = "main";

const EVENT_CAPACITY: usize = 256;

/// How a merge lands on the target branch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MergeMethod {
    /// Two-parent merge commit.
    #[default]
    Merge,
    /// One commit with the combined changes and a single parent.
    Squash,
    /// Replay the source's commits onto the target.
    Rebase,
}

/// Repository settings.
#[derive(Debug, Clone, Default)]
pub struct RepositoryOptions {
    /// Strategy for files changed on both sides of a merge.
    pub merge_strategy: MergeStrategy,
    /// Where branch and tag state is saved. `None` keeps it in memory only.
    pub snapshot_path: Option<PathBuf>,
}

/// Input to [`Repository::create_commit`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitRequest {
    pub author: UserId,
    pub message: String,
    pub changes: Vec<Change>,
    /// Head the caller based its changes on. Defaults to the current head.
    #[serde(default)]
    pub expected_head: Option<ContentId>,
}

impl CommitRequest {
    /// Creates a request based on the current head.
    pub fn new(author: UserId, message: impl Into<String>, changes: Vec<Change>) -> Self {
        Self {
            author,
            message: message.into(),
            changes,
            expected_head: None,
        }
    }

    /// Pins the head the changes were based on.
    pub fn expecting(mut self, head: ContentId) -> Self {
        self.expected_head = Some(head);
        self
    }
}

/// Input to [`Repository::merge_branch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeOptions {
    pub author: UserId,
    pub method: MergeMethod,
    /// Overrides the generated commit message.
    pub message: Option<String>,
    /// Human decisions for conflicting paths.
    pub resolutions: BTreeMap<String, Resolution>,
    /// Set by the pull request orchestrator; allows merging into branches
    /// that require pull requests.
    pub via_pull_request: bool,
    /// Source head the resolutions were reviewed against.
    pub expected_source_head: Option<ContentId>,
    /// Target head the resolutions were reviewed against.
    pub expected_target_head: Option<ContentId>,
}

impl MergeOptions {
    /// A plain merge commit with no resolutions.
    pub fn new(author: UserId) -> Self {
        Self {
            author,
            method: MergeMethod::Merge,
            message: None,
            resolutions: BTreeMap::new(),
            via_pull_request: false,
            expected_source_head: None,
            expected_target_head: None,
        }
    }

    /// Sets the merge method.
    pub fn method(mut self, method: MergeMethod) -> Self {
        self.method = method;
        self
    }

    /// Adds a resolution for a conflicting path.
    pub fn resolve(mut self, path: impl Into<String>, resolution: Resolution) -> Self {
        self.resolutions.insert(path.into(), resolution);
        self
    }

    /// Pins the heads the merge must run against.
    pub fn expecting_heads(mut self, source: ContentId, target: ContentId) -> Self {
        self.expected_source_head = Some(source);
        self.expected_target_head = Some(target);
        self
    }
}

/// Conflict check between two branches, pinned to the heads it used.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeCheck {
    pub base: ContentId,
    pub source_head: ContentId,
    pub target_head: ContentId,
    pub conflicts: Vec<MergeConflict>,
}

impl MergeCheck {
    /// Returns true if the branches merge without conflicts.
    pub fn is_clean(&self) -> bool {
        self.conflicts.is_empty()
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct RefsSnapshot {
    project_id: ProjectId,
    branches: Vec<Branch>,
    tags: Vec<Tag>,
    #[serde(default)]
    protection_patterns: Vec<ProtectionRule>,
}

/// A project's version-control state.
///
/// Objects live in the shared [`ObjectStore`]; branches and tags are held
/// here. Branch heads only move through compare-and-swap, after the objects
/// they point at are stored.
///
/// With a snapshot path configured, every branch or tag change is saved
/// before the operation returns. If the save fails the in-memory change is
/// rolled back and the error is returned.
pub struct Repository {
    project_id: ProjectId,
    store: ObjectStore,
    graph: CommitGraph,
    branches: BranchRegistry,
    tags: TagRegistry,
    strategy: MergeStrategy,
    events: broadcast::Sender<RepoEvent>,
    snapshot_path: Option<PathBuf>,
    /// Serializes ref writes with their snapshot save.
    refs_lock: Mutex<()>,
}

impl std::fmt::Debug for Repository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repository")
            .field("project_id", &self.project_id)
            .field("strategy", &self.strategy)
            .field("snapshot_path", &self.snapshot_path)
            .finish_non_exhaustive()
    }
}

impl Repository {
    fn assemble(
        project_id: ProjectId,
        store: ObjectStore,
        options: RepositoryOptions,
        branches: BranchRegistry,
        tags: TagRegistry,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            graph: CommitGraph::new(store.clone()),
            project_id,
            store,
            branches,
            tags,
            strategy: options.merge_strategy,
            events,
            snapshot_path: options.snapshot_path,
            refs_lock: Mutex::new(()),
        }
    }

    /// Creates a repository with a `main` branch at a root commit over the
    /// empty tree.
    pub fn init(
        project_id: ProjectId,
        store: ObjectStore,
        options: RepositoryOptions,
        author: UserId,
    ) -> Result<Self> {
        let tree_id = store.put_tree(&Tree::new())?;
        let root = store.put_commit(CommitDraft {
            parents: vec![],
            author: author.clone(),
            message: "Initialize repository".to_string(),
            timestamp: unix_now(),
            tree_id,
            file_changes: vec![],
        })?;

        let repo = Self::assemble(
            project_id.clone(),
            store,
            options,
            BranchRegistry::new(project_id.clone()),
            TagRegistry::new(project_id.clone()),
        );
        repo.graph.remember(&root);
        repo.branches
            .insert(DEFAULT_BRANCH, root.id, true, Some(author))?;
        repo.save()?;

        info!(project = %project_id, root = %root.id.short(), "Repository initialized");
        Ok(repo)
    }

    /// Loads a repository from its saved snapshot.
    pub fn load(project_id: ProjectId, store: ObjectStore, options: RepositoryOptions) -> Result<Self> {
        let path = options.snapshot_path.clone().ok_or_else(|| {
            VcsError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "no snapshot path configured",
            ))
        })?;
        let snapshot: RefsSnapshot = serde_json::from_slice(&std::fs::read(&path)?)?;

        for branch in &snapshot.branches {
            if !store.contains(&branch.head_commit_id)? {
                return Err(VcsError::CommitNotFound(branch.head_commit_id.to_hex()));
            }
        }

        let repo = Self::assemble(
            project_id.clone(),
            store,
            options,
            BranchRegistry::restore(
                project_id.clone(),
                snapshot.branches,
                snapshot.protection_patterns,
            ),
            TagRegistry::restore(project_id.clone(), snapshot.tags),
        );
        info!(project = %project_id, path = %path.display(), "Repository loaded");
        Ok(repo)
    }

    /// Writes branch and tag state to the snapshot file, if configured.
    ///
    /// The file is replaced atomically.
    pub fn save(&self) -> Result<()> {
        let _guard = self.refs_lock.lock();
        self.write_snapshot()
    }

    fn write_snapshot(&self) -> Result<()> {
        let Some(path) = &self.snapshot_path else {
            return Ok(());
        };
        let snapshot = RefsSnapshot {
            project_id: self.project_id.clone(),
            branches: self.branches.list(true),
            tags: self.tags.list(),
            protection_patterns: self.branches.protection_patterns(),
        };
        let data = serde_json::to_vec_pretty(&snapshot)?;
        write_atomic(path, &data)?;
        Ok(())
    }

    /// Runs a ref mutation and saves the result.
    ///
    /// On a failed save the branch and tag registries are put back as they
    /// were before `update`.
    fn update_refs<T>(&self, update: impl FnOnce() -> Result<T>) -> Result<T> {
        let _guard = self.refs_lock.lock();
        let before = self.snapshot_path.as_ref().map(|_| {
            (
                self.branches.list(true),
                self.branches.protection_patterns(),
                self.tags.list(),
            )
        });

        let value = update()?;
        if let Err(e) = self.write_snapshot() {
            warn!(project = %self.project_id, error = %e, "Failed to save repository state, rolling back");
            if let Some((branches, patterns, tags)) = before {
                self.branches.reset(branches, patterns);
                self.tags.reset(tags);
            }
            return Err(e);
        }
        Ok(value)
    }

    fn emit(&self, event: RepoEvent) {
        // No subscribers is not an error.
        let _ = self.events.send(event);
    }

    /// Subscribes to repository events.
    pub fn subscribe(&self) -> broadcast::Receiver<RepoEvent> {
        self.events.subscribe()
    }

    /// The project this repository belongs to.
    pub fn project_id(&self) -> &ProjectId {
        &self.project_id
    }

    /// The object store.
    pub fn store(&self) -> &ObjectStore {
        &self.store
    }

    /// The configured merge strategy.
    pub fn merge_strategy(&self) -> MergeStrategy {
        self.strategy
    }

    // ==================== Branches ====================

    /// Creates `name` pointing at the head of `from`.
    pub fn create_branch(
        &self,
        name: &str,
        from: BranchId,
        created_by: Option<UserId>,
    ) -> Result<Branch> {
        let source = self.branches.get(from)?;
        if source.status == crate::BranchStatus::Deleted {
            return Err(VcsError::BranchNotFound(source.name));
        }
        let branch = self.update_refs(|| {
            self.branches
                .insert(name, source.head_commit_id, false, created_by)
        })?;

        self.emit(RepoEvent::BranchCreated {
            project: self.project_id.clone(),
            branch_id: branch.id,
            name: branch.name.clone(),
            head: branch.head_commit_id,
        });
        Ok(branch)
    }

    /// Soft-deletes a branch.
    pub fn delete_branch(&self, id: BranchId) -> Result<Branch> {
        let branch = self.update_refs(|| self.branches.mark_deleted(id))?;
        self.emit(RepoEvent::BranchDeleted {
            project: self.project_id.clone(),
            branch_id: branch.id,
            name: branch.name.clone(),
        });
        Ok(branch)
    }

    /// Gets a branch by id.
    pub fn branch(&self, id: BranchId) -> Result<Branch> {
        self.branches.get(id)
    }

    /// Gets a live branch by name.
    pub fn branch_by_name(&self, name: &str) -> Result<Branch> {
        self.branches.get_by_name(name)
    }

    /// The default branch.
    pub fn default_branch(&self) -> Result<Branch> {
        self.branches.default_branch()
    }

    /// Lists branches.
    pub fn list_branches(&self, include_deleted: bool) -> Vec<Branch> {
        self.branches.list(include_deleted)
    }

    /// Adds a protection pattern for branches created afterwards.
    pub fn add_protection_pattern(&self, rule: ProtectionRule) -> Result<()> {
        self.update_refs(|| {
            self.branches.add_protection_pattern(rule);
            Ok(())
        })
    }

    /// Replaces a branch's protection rules.
    pub fn set_branch_protection(&self, id: BranchId, rules: ProtectionRules) -> Result<Branch> {
        self.update_refs(|| self.branches.set_protection(id, rules))
    }

    // ==================== Commits ====================

    /// Creates a commit on a branch and advances its head.
    ///
    /// The commit's single parent is the head the caller expected (or the
    /// current head). If the head moved in the meantime the commit is not
    /// referenced and [`VcsError::ConcurrentModification`] is returned.
    pub fn create_commit(&self, branch_id: BranchId, request: CommitRequest) -> Result<Commit> {
        if request.message.trim().is_empty() {
            return Err(VcsError::EmptyMessage);
        }
        if request.changes.is_empty() {
            return Err(VcsError::NoChanges);
        }
        for change in &request.changes {
            change.validate()?;
        }

        let branch = self.branches.get(branch_id)?;
        branch.ensure_active()?;
        if !branch.protection_rules.allows_direct_commit() {
            return Err(VcsError::BranchProtected {
                branch: branch.name,
                reason: "changes must go through a pull request".to_string(),
            });
        }

        let parent = request.expected_head.unwrap_or(branch.head_commit_id);
        if parent != branch.head_commit_id {
            return Err(VcsError::ConcurrentModification {
                branch: branch.name,
                expected: parent.to_hex(),
                actual: branch.head_commit_id.to_hex(),
            });
        }

        let parent_tree = self.commit_tree(&parent)?;
        let tree = apply_edits(&self.store, &parent_tree, &request.changes)?;
        if tree == parent_tree {
            return Err(VcsError::NoChanges);
        }
        let file_changes = detect_renames(diff_trees(&self.store, &parent_tree, &tree)?);

        let commit = self.store.put_commit(CommitDraft {
            parents: vec![parent],
            author: request.author,
            message: request.message,
            timestamp: unix_now(),
            tree_id: self.store.put_tree(&tree)?,
            file_changes,
        })?;
        self.graph.remember(&commit);

        let branch = self.update_refs(|| {
            self.branches
                .compare_and_swap_head(branch_id, parent, commit.id)
        })?;

        info!(
            project = %self.project_id,
            branch = %branch.name,
            commit = %commit.id.short(),
            files = commit.file_changes.len(),
            "Commit created"
        );
        self.emit(RepoEvent::CommitCreated {
            project: self.project_id.clone(),
            branch_id,
            branch: branch.name,
            commit: commit.id,
        });
        Ok(commit)
    }

    /// Loads a commit.
    pub fn commit(&self, id: &ContentId) -> Result<Commit> {
        self.graph.commit(id)
    }

    /// Loads the tree a commit records.
    pub fn commit_tree(&self, id: &ContentId) -> Result<Tree> {
        let commit = self.graph.commit(id)?;
        Ok(self.store.get_tree(&commit.tree_id)?)
    }

    /// Reads a file as of a commit.
    pub fn read_file(&self, commit: &ContentId, path: &str) -> Result<bytes::Bytes> {
        let tree = self.commit_tree(commit)?;
        let entry = tree
            .get(path)
            .ok_or_else(|| VcsError::PathNotFound(path.to_string()))?;
        Ok(self.store.get(&entry.content_id)?)
    }

    /// History of a branch, newest first.
    pub fn get_history(&self, branch_id: BranchId, limit: usize, offset: usize) -> Result<Vec<Commit>> {
        let branch = self.branches.get(branch_id)?;
        self.graph.history(&branch.head_commit_id, limit, offset)
    }

    /// Nearest common ancestor of two commits.
    pub fn find_merge_base(&self, a: &ContentId, b: &ContentId) -> Result<Commit> {
        self.graph.merge_base(a, b)
    }

    /// Returns true if `ancestor` is reachable from `descendant`.
    pub fn is_ancestor(&self, ancestor: &ContentId, descendant: &ContentId) -> Result<bool> {
        self.graph.is_ancestor(ancestor, descendant)
    }

    /// File changes between two commits.
    pub fn diff(&self, from: &ContentId, to: &ContentId) -> Result<Vec<FileChange>> {
        let from_tree = self.commit_tree(from)?;
        let to_tree = self.commit_tree(to)?;
        diff_trees(&self.store, &from_tree, &to_tree)
    }

    // ==================== Merging ====================

    fn merge_labels(source: &Branch, target: &Branch) -> MergeLabels {
        MergeLabels::new(target.name.clone(), source.name.clone())
    }

    /// Computes the conflicts a merge of `source` into `target` would hit.
    pub fn check_merge(&self, source_id: BranchId, target_id: BranchId) -> Result<MergeCheck> {
        let source = self.branches.get(source_id)?;
        let target = self.branches.get(target_id)?;
        let base = self
            .graph
            .merge_base(&source.head_commit_id, &target.head_commit_id)?;

        let outcome = three_way_merge(
            &self.store,
            &self.store.get_tree(&base.tree_id)?,
            &self.commit_tree(&source.head_commit_id)?,
            &self.commit_tree(&target.head_commit_id)?,
            self.strategy,
            &Self::merge_labels(&source, &target),
        )?;

        Ok(MergeCheck {
            base: base.id,
            source_head: source.head_commit_id,
            target_head: target.head_commit_id,
            conflicts: outcome.conflicts,
        })
    }

    /// Conflicts between two branches.
    pub fn detect_conflicts(&self, source_id: BranchId, target_id: BranchId) -> Result<Vec<MergeConflict>> {
        Ok(self.check_merge(source_id, target_id)?.conflicts)
    }

    /// Merges `source` into `target` and marks `source` merged.
    ///
    /// Returns the commit the target head now points at.
    pub fn merge_branch(
        &self,
        source_id: BranchId,
        target_id: BranchId,
        options: MergeOptions,
    ) -> Result<Commit> {
        if source_id == target_id {
            return Err(VcsError::InvalidName {
                name: source_id.to_string(),
                reason: "cannot merge a branch into itself".to_string(),
            });
        }

        let source = self.branches.get(source_id)?;
        let target = self.branches.get(target_id)?;
        source.ensure_active()?;
        target.ensure_active()?;
        ensure_head(&source, options.expected_source_head)?;
        ensure_head(&target, options.expected_target_head)?;
        if !options.via_pull_request && !target.protection_rules.allows_direct_commit() {
            return Err(VcsError::BranchProtected {
                branch: target.name,
                reason: "merges must go through a pull request".to_string(),
            });
        }

        let base = self
            .graph
            .merge_base(&source.head_commit_id, &target.head_commit_id)?;
        if base.id == source.head_commit_id {
            return Err(VcsError::NoChanges);
        }

        let head = match options.method {
            MergeMethod::Merge | MergeMethod::Squash => {
                self.combine(&source, &target, &base, &options)?
            }
            MergeMethod::Rebase => self.replay(&source, &target, &base, &options)?,
        };

        self.update_refs(|| {
            self.branches.finish_merge(
                source_id,
                source.head_commit_id,
                target_id,
                target.head_commit_id,
                head.id,
            )
        })?;

        info!(
            project = %self.project_id,
            source = %source.name,
            target = %target.name,
            method = ?options.method,
            commit = %head.id.short(),
            "Branch merged"
        );
        self.emit(RepoEvent::BranchMerged {
            project: self.project_id.clone(),
            source_id,
            target_id,
            commit: head.id,
        });
        Ok(head)
    }

    /// Builds the merge or squash commit.
    fn combine(
        &self,
        source: &Branch,
        target: &Branch,
        base: &Commit,
        options: &MergeOptions,
    ) -> Result<Commit> {
        let target_tree = self.commit_tree(&target.head_commit_id)?;
        let outcome = three_way_merge(
            &self.store,
            &self.store.get_tree(&base.tree_id)?,
            &self.commit_tree(&source.head_commit_id)?,
            &target_tree,
            self.strategy,
            &Self::merge_labels(source, target),
        )?;
        let tree = outcome.resolve(&self.store, &options.resolutions)?;

        let (parents, default_message) = match options.method {
            MergeMethod::Squash => (
                vec![target.head_commit_id],
                format!("Squash merge branch '{}' into '{}'", source.name, target.name),
            ),
            _ => (
                vec![target.head_commit_id, source.head_commit_id],
                format!("Merge branch '{}' into '{}'", source.name, target.name),
            ),
        };

        let commit = self.store.put_commit(CommitDraft {
            parents,
            author: options.author.clone(),
            message: options.message.clone().unwrap_or(default_message),
            timestamp: unix_now(),
            tree_id: self.store.put_tree(&tree)?,
            file_changes: detect_renames(diff_trees(&self.store, &target_tree, &tree)?),
        })?;
        self.graph.remember(&commit);
        Ok(commit)
    }

    /// Replays the source's first-parent commits since `base` onto the
    /// target, or fast-forwards when the target has not moved.
    fn replay(
        &self,
        source: &Branch,
        target: &Branch,
        base: &Commit,
        options: &MergeOptions,
    ) -> Result<Commit> {
        if base.id == target.head_commit_id {
            return self.graph.commit(&source.head_commit_id);
        }

        let mut pending = Vec::new();
        let mut cursor = Some(source.head_commit_id);
        while let Some(id) = cursor {
            if self.graph.is_ancestor(&id, &base.id)? {
                break;
            }
            let commit = self.graph.commit(&id)?;
            cursor = commit.first_parent();
            pending.push(commit);
        }
        pending.reverse();

        let labels = Self::merge_labels(source, target);
        let mut head = self.graph.commit(&target.head_commit_id)?;
        let mut head_tree = self.store.get_tree(&head.tree_id)?;

        for original in pending {
            let parent_tree = match original.first_parent() {
                Some(parent) => self.commit_tree(&parent)?,
                None => Tree::new(),
            };
            let outcome = three_way_merge(
                &self.store,
                &parent_tree,
                &self.store.get_tree(&original.tree_id)?,
                &head_tree,
                self.strategy,
                &labels,
            )?;
            let tree = outcome.resolve(&self.store, &options.resolutions)?;
            if tree == head_tree {
                continue;
            }

            let commit = self.store.put_commit(CommitDraft {
                parents: vec![head.id],
                author: original.author.clone(),
                message: original.message.clone(),
                timestamp: unix_now(),
                tree_id: self.store.put_tree(&tree)?,
                file_changes: detect_renames(diff_trees(&self.store, &head_tree, &tree)?),
            })?;
            self.graph.remember(&commit);
            head = commit;
            head_tree = tree;
        }

        if head.id == target.head_commit_id {
            return Err(VcsError::NoChanges);
        }
        Ok(head)
    }

    // ==================== Tags ====================

    /// Creates a tag on an existing commit.
    pub fn create_tag(&self, new: NewTag) -> Result<Tag> {
        self.graph.commit(&new.commit_id)?;
        let tag = self.update_refs(|| self.tags.create(new))?;
        self.emit(RepoEvent::TagCreated {
            project: self.project_id.clone(),
            name: tag.name.clone(),
            commit: tag.commit_id,
        });
        Ok(tag)
    }

    /// Gets a tag by name.
    pub fn get_tag(&self, name: &str) -> Result<Tag> {
        self.tags.get(name)
    }

    /// Lists tags.
    pub fn list_tags(&self) -> Vec<Tag> {
        self.tags.list()
    }

    /// Deletes a tag.
    pub fn delete_tag(&self, name: &str) -> Result<Tag> {
        let tag = self.update_refs(|| self.tags.delete(name))?;
        self.emit(RepoEvent::TagDeleted {
            project: self.project_id.clone(),
            name: tag.name.clone(),
        });
        Ok(tag)
    }

    /// Counts a download of a tagged release.
    pub fn record_download(&self, name: &str) -> Result<Tag> {
        self.update_refs(|| self.tags.record_download(name))
    }
}

fn ensure_head(branch: &Branch, expected: Option<ContentId>) -> Result<()> {
    match expected {
        Some(expected) if expected != branch.head_commit_id => {
            Err(VcsError::ConcurrentModification {
                branch: branch.name.clone(),
                expected: expected.to_hex(),
                actual: branch.head_commit_id.to_hex(),
            })
        }
        _ => Ok(()),
    }
}

fn write_atomic(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir)?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(data)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}
