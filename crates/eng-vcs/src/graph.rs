//! Commit graph traversal: history, ancestry and merge bases.

use crate::{Result, VcsError};
use eng_storage::{Commit, ContentId, ObjectStore};
use parking_lot::RwLock;
use std::collections::{BinaryHeap, HashMap, HashSet, VecDeque};
use tracing::debug;

/// Read-only view of the commit DAG stored in an [`ObjectStore`].
///
/// Commits are immutable, so decoded commits are cached without
/// invalidation.
#[derive(Debug)]
pub struct CommitGraph {
    store: ObjectStore,
    cache: RwLock<HashMap<ContentId, Commit>>,
}

impl CommitGraph {
    /// Creates a graph over a store.
    pub fn new(store: ObjectStore) -> Self {
        Self {
            store,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Loads a commit.
    pub fn commit(&self, id: &ContentId) -> Result<Commit> {
        if let Some(commit) = self.cache.read().get(id) {
            return Ok(commit.clone());
        }
        let commit = self
            .store
            .get_commit(id)
            .map_err(|e| VcsError::commit_lookup(id, e))?;
        self.cache.write().insert(*id, commit.clone());
        Ok(commit)
    }

    /// Records a freshly stored commit.
    pub fn remember(&self, commit: &Commit) {
        self.cache.write().insert(commit.id, commit.clone());
    }

    fn parents(&self, id: &ContentId) -> Result<Vec<ContentId>> {
        Ok(self.commit(id)?.parents)
    }

    /// Returns true if `ancestor` is reachable from `descendant` by following
    /// parents. A commit is its own ancestor.
    pub fn is_ancestor(&self, ancestor: &ContentId, descendant: &ContentId) -> Result<bool> {
        if ancestor == descendant {
            return Ok(true);
        }
        let mut seen = HashSet::new();
        let mut queue = VecDeque::from([*descendant]);
        while let Some(id) = queue.pop_front() {
            if !seen.insert(id) {
                continue;
            }
            for parent in self.parents(&id)? {
                if parent == *ancestor {
                    return Ok(true);
                }
                queue.push_back(parent);
            }
        }
        Ok(false)
    }

    /// All commits reachable from `head`, including it.
    pub fn reachable(&self, head: &ContentId) -> Result<HashMap<ContentId, Commit>> {
        let mut found = HashMap::new();
        let mut stack = vec![*head];
        while let Some(id) = stack.pop() {
            if found.contains_key(&id) {
                continue;
            }
            let commit = self.commit(&id)?;
            stack.extend(commit.parents.iter().copied());
            found.insert(id, commit);
        }
        Ok(found)
    }

    /// History of `head`, newest first.
    ///
    /// The order is topological (a commit always precedes its parents);
    /// among commits whose children have all been emitted, the newest goes
    /// first, with ties broken by id.
    pub fn history(&self, head: &ContentId, limit: usize, offset: usize) -> Result<Vec<Commit>> {
        let mut commits = self.reachable(head)?;

        let mut pending_children: HashMap<ContentId, usize> = HashMap::new();
        for commit in commits.values() {
            let unique: HashSet<_> = commit.parents.iter().collect();
            for parent in unique {
                *pending_children.entry(*parent).or_default() += 1;
            }
        }

        let mut ready = BinaryHeap::new();
        if let Some(commit) = commits.get(head) {
            ready.push((commit.timestamp, *head));
        }

        let mut ordered = Vec::new();
        while let Some((_, id)) = ready.pop() {
            let Some(commit) = commits.remove(&id) else {
                continue;
            };
            let unique: HashSet<_> = commit.parents.iter().copied().collect();
            for parent in unique {
                if let Some(count) = pending_children.get_mut(&parent) {
                    *count -= 1;
                    if *count == 0 {
                        if let Some(p) = commits.get(&parent) {
                            ready.push((p.timestamp, parent));
                        }
                    }
                }
            }
            if ordered.len() >= offset + limit {
                break;
            }
            ordered.push(commit);
        }

        Ok(ordered.into_iter().skip(offset).take(limit).collect())
    }

    /// Nearest common ancestor of `a` and `b`.
    ///
    /// Walks backwards from both commits in lock-step. A node reached from
    /// both sides is a candidate and is not expanded further. Candidates that
    /// are ancestors of other candidates are discarded, and the newest
    /// remaining one (ties broken by id) is returned, so the result does not
    /// depend on argument order.
    pub fn merge_base(&self, a: &ContentId, b: &ContentId) -> Result<Commit> {
        if a == b {
            return self.commit(a);
        }

        let mut visited_a = HashSet::from([*a]);
        let mut visited_b = HashSet::from([*b]);
        let mut frontier_a = vec![*a];
        let mut frontier_b = vec![*b];
        let mut candidates: HashSet<ContentId> = HashSet::new();

        while !frontier_a.is_empty() || !frontier_b.is_empty() {
            frontier_a = self.step(frontier_a, &mut visited_a, &visited_b, &mut candidates)?;
            frontier_b = self.step(frontier_b, &mut visited_b, &visited_a, &mut candidates)?;
        }

        // Either start commit may itself be the answer.
        if visited_a.contains(b) {
            candidates.insert(*b);
        }
        if visited_b.contains(a) {
            candidates.insert(*a);
        }

        let candidates: Vec<ContentId> = candidates.into_iter().collect();
        let mut best = Vec::new();
        for c in &candidates {
            let mut dominated = false;
            for other in candidates.iter().filter(|o| *o != c) {
                if self.is_ancestor(c, other)? {
                    dominated = true;
                    break;
                }
            }
            if !dominated {
                best.push(self.commit(c)?);
            }
        }

        let base = best
            .into_iter()
            .max_by(|x, y| (x.timestamp, x.id).cmp(&(y.timestamp, y.id)))
            .ok_or_else(|| VcsError::NoCommonAncestor {
                a: a.to_hex(),
                b: b.to_hex(),
            })?;

        debug!(a = %a.short(), b = %b.short(), base = %base.id.short(), "Merge base found");
        Ok(base)
    }

    fn step(
        &self,
        frontier: Vec<ContentId>,
        visited: &mut HashSet<ContentId>,
        other: &HashSet<ContentId>,
        candidates: &mut HashSet<ContentId>,
    ) -> Result<Vec<ContentId>> {
        let mut next = Vec::new();
        for id in frontier {
            if candidates.contains(&id) {
                continue;
            }
            for parent in self.parents(&id)? {
                if !visited.insert(parent) {
                    continue;
                }
                if other.contains(&parent) {
                    candidates.insert(parent);
                } else {
                    next.push(parent);
                }
            }
        }
        Ok(next)
    }
}
