// Copyright 2020 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Component A: an in-memory, value-semantics snapshot of a repository.
//!
//! An [`Ast`] is built in one shot by [`Ast::new`], which performs every
//! construction-time invariant check. Once constructed it is logically
//! immutable; mutation is expressed by [`Ast::copy`], a sparse
//! field-override builder in the style of `CommitBuilder::for_rewrite_from`.

use std::collections::BTreeMap;
use std::sync::Arc;

use itertools::Itertools as _;

use crate::error::{XrepoError, XrepoResult};
use crate::object_id::CommitId;
use crate::repo_path::RepoPathBuf;

/// A tagged sum describing the difference a commit, the index, or a
/// conflict side introduces at one path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeEntry {
    Blob { content: Vec<u8>, executable: bool },
    /// `commit` is `None` only legally inside the index/worktree (a child
    /// declared but not yet pointed at a commit); a commit must never
    /// contain a null child pointer.
    ChildPointer { url: String, commit: Option<CommitId> },
    Removed,
    Conflict {
        ancestor: Option<Box<ChangeEntry>>,
        ours: Box<ChangeEntry>,
        theirs: Box<ChangeEntry>,
    },
}

impl ChangeEntry {
    /// Projects a conflict to its *ours* side, per `render_index`'s
    /// projection rule; non-conflict entries project to themselves.
    pub fn projected(&self) -> &ChangeEntry {
        match self {
            ChangeEntry::Conflict { ours, .. } => ours,
            other => other,
        }
    }

    pub fn is_child_pointer(&self) -> bool {
        matches!(self, ChangeEntry::ChildPointer { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    pub name: String,
    pub email: String,
}

/// An ordered list of parents, a sparse per-path diff against the first
/// parent, and identity metadata. A commit with zero parents describes
/// absolute state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Commit {
    pub parents: Vec<CommitId>,
    pub changes: BTreeMap<RepoPathBuf, ChangeEntry>,
    pub message: String,
    pub author: Signature,
    pub committer: Signature,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Branch {
    pub tip: CommitId,
    pub upstream: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Remote {
    pub url: String,
    pub branches: BTreeMap<String, CommitId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequencerKind {
    Rebase,
    CherryPick,
    Merge,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequencerState {
    pub kind: SequencerKind,
    pub original_head: (CommitId, Option<String>),
    pub target: (CommitId, Option<String>),
    pub commits: Vec<CommitId>,
    pub current_index: usize,
    pub message: Option<Vec<u8>>,
}

impl SequencerState {
    fn validate(&self, commits: &BTreeMap<CommitId, Commit>) -> XrepoResult<()> {
        if self.commits.is_empty() {
            return Err(XrepoError::invalid_shape(
                "sequencer must track at least one commit",
            ));
        }
        if self.current_index >= self.commits.len() {
            return Err(XrepoError::invalid_shape(format!(
                "sequencer current_index {} out of range for {} commits",
                self.current_index,
                self.commits.len()
            )));
        }
        for id in self
            .commits
            .iter()
            .chain([&self.original_head.0, &self.target.0])
        {
            if !commits.contains_key(id) {
                return Err(XrepoError::invalid_shape(format!(
                    "sequencer references unknown commit {id}"
                )));
            }
        }
        Ok(())
    }
}

/// The relationship between a child's index-pointed commit and its
/// worktree head (or, symmetrically, the index pointer and the commit
/// pointer).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildRelation {
    Same,
    Ahead,
    Behind,
    Unrelated,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitPointer {
    pub sha: CommitId,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexPointer {
    pub sha: Option<CommitId>,
    pub url: String,
    pub relation_to_commit: ChildRelation,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkdirStatus {
    pub inner_status: Box<RepoStatus>,
    pub relation_to_index: ChildRelation,
}

/// Per-child status: a closed child has no `workdir`; a newly-added child
/// has no `commit_pointer`; a deleted child has no `index_pointer`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ChildStatus {
    pub commit_pointer: Option<CommitPointer>,
    pub index_pointer: Option<IndexPointer>,
    pub workdir: Option<WorkdirStatus>,
}

/// The aggregate status of one repository (outer or an open child),
/// assembled by the Status Engine (component E).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RepoStatus {
    pub branch: Option<String>,
    pub head: Option<CommitId>,
    pub staged_changes: BTreeMap<RepoPathBuf, ChangeEntry>,
    pub workdir_changes: BTreeMap<RepoPathBuf, Option<Vec<u8>>>,
    pub children: BTreeMap<RepoPathBuf, ChildStatus>,
    pub sequencer: Option<SequencerState>,
}

/// A sparse field-override set for [`Ast::copy`]. Every field defaults to
/// "leave unchanged"; `Some` replaces the field wholesale (branches/refs/
/// etc. are whole-map replacements, matching the AST's value semantics --
/// callers compute the new map from the old one and pass it back).
#[derive(Debug, Clone, Default)]
pub struct AstOverrides {
    pub commits: Option<BTreeMap<CommitId, Commit>>,
    pub branches: Option<BTreeMap<String, Branch>>,
    pub refs: Option<BTreeMap<String, CommitId>>,
    pub head: Option<Option<CommitId>>,
    pub current_branch: Option<Option<String>>,
    pub remotes: Option<BTreeMap<String, Remote>>,
    pub index: Option<BTreeMap<RepoPathBuf, ChangeEntry>>,
    pub workdir: Option<BTreeMap<RepoPathBuf, Option<Vec<u8>>>>,
    pub children: Option<BTreeMap<RepoPathBuf, Ast>>,
    pub sequencer: Option<Option<SequencerState>>,
    pub bare: Option<bool>,
    pub sparse: Option<bool>,
    pub sparse_patterns: Option<Vec<RepoPathBuf>>,
    pub notes: Option<BTreeMap<String, BTreeMap<CommitId, Vec<u8>>>>,
}

/// An immutable, value-semantics repository snapshot. Every invariant is
/// checked once, at construction, by [`Ast::new`].
#[derive(Debug, Clone, PartialEq)]
pub struct Ast {
    commits: Arc<BTreeMap<CommitId, Commit>>,
    branches: BTreeMap<String, Branch>,
    refs: BTreeMap<String, CommitId>,
    head: Option<CommitId>,
    current_branch: Option<String>,
    remotes: BTreeMap<String, Remote>,
    index: BTreeMap<RepoPathBuf, ChangeEntry>,
    workdir: BTreeMap<RepoPathBuf, Option<Vec<u8>>>,
    children: BTreeMap<RepoPathBuf, Ast>,
    sequencer: Option<SequencerState>,
    bare: bool,
    sparse: bool,
    /// Directory prefixes materialized under a sparse checkout. Every
    /// workdir entry must be consistent with this declared sparse-checkout
    /// specification, represented as a list of included directory prefixes
    /// (cone-style).
    sparse_patterns: Vec<RepoPathBuf>,
    notes: BTreeMap<String, BTreeMap<CommitId, Vec<u8>>>,
}

impl PartialEq for RepoStatus {
    fn eq(&self, other: &Self) -> bool {
        self.branch == other.branch
            && self.head == other.head
            && self.staged_changes == other.staged_changes
            && self.workdir_changes == other.workdir_changes
            && self.children == other.children
            && self.sequencer == other.sequencer
    }
}
impl Eq for RepoStatus {}

impl Ast {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        commits: BTreeMap<CommitId, Commit>,
        branches: BTreeMap<String, Branch>,
        refs: BTreeMap<String, CommitId>,
        head: Option<CommitId>,
        current_branch: Option<String>,
        remotes: BTreeMap<String, Remote>,
        index: BTreeMap<RepoPathBuf, ChangeEntry>,
        workdir: BTreeMap<RepoPathBuf, Option<Vec<u8>>>,
        children: BTreeMap<RepoPathBuf, Ast>,
        sequencer: Option<SequencerState>,
        bare: bool,
        sparse: bool,
        sparse_patterns: Vec<RepoPathBuf>,
        notes: BTreeMap<String, BTreeMap<CommitId, Vec<u8>>>,
    ) -> XrepoResult<Self> {
        let ast = Ast {
            commits: Arc::new(commits),
            branches,
            refs,
            head,
            current_branch,
            remotes,
            index,
            workdir,
            children,
            sequencer,
            bare,
            sparse,
            sparse_patterns,
            notes,
        };
        ast.validate()?;
        Ok(ast)
    }

    /// Produces a new AST by applying a sparse set of field overrides,
    /// re-validating the result.
    pub fn copy(&self, overrides: AstOverrides) -> XrepoResult<Ast> {
        let ast = Ast {
            commits: overrides
                .commits
                .map(Arc::new)
                .unwrap_or_else(|| self.commits.clone()),
            branches: overrides.branches.unwrap_or_else(|| self.branches.clone()),
            refs: overrides.refs.unwrap_or_else(|| self.refs.clone()),
            head: overrides.head.unwrap_or_else(|| self.head.clone()),
            current_branch: overrides
                .current_branch
                .unwrap_or_else(|| self.current_branch.clone()),
            remotes: overrides.remotes.unwrap_or_else(|| self.remotes.clone()),
            index: overrides.index.unwrap_or_else(|| self.index.clone()),
            workdir: overrides.workdir.unwrap_or_else(|| self.workdir.clone()),
            children: overrides.children.unwrap_or_else(|| self.children.clone()),
            sequencer: overrides.sequencer.unwrap_or_else(|| self.sequencer.clone()),
            bare: overrides.bare.unwrap_or(self.bare),
            sparse: overrides.sparse.unwrap_or(self.sparse),
            sparse_patterns: overrides
                .sparse_patterns
                .unwrap_or_else(|| self.sparse_patterns.clone()),
            notes: overrides.notes.unwrap_or_else(|| self.notes.clone()),
        };
        ast.validate()?;
        Ok(ast)
    }

    pub fn commits(&self) -> &BTreeMap<CommitId, Commit> {
        &self.commits
    }

    pub fn branches(&self) -> &BTreeMap<String, Branch> {
        &self.branches
    }

    pub fn refs(&self) -> &BTreeMap<String, CommitId> {
        &self.refs
    }

    pub fn head(&self) -> Option<&CommitId> {
        self.head.as_ref()
    }

    pub fn current_branch(&self) -> Option<&str> {
        self.current_branch.as_deref()
    }

    pub fn remotes(&self) -> &BTreeMap<String, Remote> {
        &self.remotes
    }

    pub fn index(&self) -> &BTreeMap<RepoPathBuf, ChangeEntry> {
        &self.index
    }

    pub fn workdir(&self) -> &BTreeMap<RepoPathBuf, Option<Vec<u8>>> {
        &self.workdir
    }

    pub fn children(&self) -> &BTreeMap<RepoPathBuf, Ast> {
        &self.children
    }

    pub fn sequencer(&self) -> Option<&SequencerState> {
        self.sequencer.as_ref()
    }

    pub fn is_bare(&self) -> bool {
        self.bare
    }

    pub fn is_sparse(&self) -> bool {
        self.sparse
    }

    pub fn sparse_patterns(&self) -> &[RepoPathBuf] {
        &self.sparse_patterns
    }

    pub fn notes(&self) -> &BTreeMap<String, BTreeMap<CommitId, Vec<u8>>> {
        &self.notes
    }

    /// The rendered head overlaid with index changes. Conflict entries
    /// project to their *ours* side.
    pub fn render_index(&self) -> BTreeMap<RepoPathBuf, ChangeEntry> {
        render_index(&self.commits, self.head.as_ref(), &self.index)
    }

    /// The accumulation of first-parent changes from root to `id`.
    pub fn render_commit(&self, id: &CommitId) -> BTreeMap<RepoPathBuf, ChangeEntry> {
        render_commit(&self.commits, id)
    }

    fn validate(&self) -> XrepoResult<()> {
        self.check_ids_exist()?;
        self.check_commits_reachable()?;
        self.check_first_parent_diffs()?;
        self.check_removal_preconditions()?;
        self.check_index_workdir_require_head()?;
        self.check_current_branch()?;
        self.check_children_match_pointers()?;
        self.check_bare()?;
        self.check_sparse()?;
        if let Some(sequencer) = &self.sequencer {
            sequencer.validate(&self.commits)?;
        }
        Ok(())
    }

    // Invariant 1.
    fn check_ids_exist(&self) -> XrepoResult<()> {
        let missing = |id: &CommitId| !self.commits.contains_key(id);
        for branch in self.branches.values() {
            if missing(&branch.tip) {
                return Err(XrepoError::invalid_shape(format!(
                    "branch tip {} not in commits",
                    branch.tip
                )));
            }
        }
        for tip in self.refs.values() {
            if missing(tip) {
                return Err(XrepoError::invalid_shape(format!(
                    "ref tip {tip} not in commits"
                )));
            }
        }
        if let Some(head) = &self.head {
            if missing(head) {
                return Err(XrepoError::invalid_shape(format!(
                    "head {head} not in commits"
                )));
            }
        }
        for remote in self.remotes.values() {
            for tip in remote.branches.values() {
                if missing(tip) {
                    return Err(XrepoError::invalid_shape(format!(
                        "remote branch tip {tip} not in commits"
                    )));
                }
            }
        }
        for commit in self.commits.values() {
            for parent in &commit.parents {
                if missing(parent) {
                    return Err(XrepoError::invalid_shape(format!(
                        "commit parent {parent} not in commits"
                    )));
                }
            }
        }
        Ok(())
    }

    // Invariant 2.
    fn check_commits_reachable(&self) -> XrepoResult<()> {
        let mut reachable = std::collections::HashSet::new();
        let roots: Vec<&CommitId> = self
            .branches
            .values()
            .map(|b| &b.tip)
            .chain(self.refs.values())
            .chain(self.head.iter())
            .chain(self.remotes.values().flat_map(|r| r.branches.values()))
            .collect();
        let mut stack: Vec<&CommitId> = roots;
        while let Some(id) = stack.pop() {
            if !reachable.insert(id.clone()) {
                continue;
            }
            if let Some(commit) = self.commits.get(id) {
                for parent in &commit.parents {
                    stack.push(parent);
                }
            }
        }
        for id in self.commits.keys() {
            if !reachable.contains(id) {
                return Err(XrepoError::invalid_shape(format!(
                    "commit {id} is not reachable from any branch, ref, remote branch, or head"
                )));
            }
        }
        Ok(())
    }

    // Invariant 3: a change must differ from the first-parent accumulation
    // at that path; non-first-parent chains may duplicate (merge commits).
    fn check_first_parent_diffs(&self) -> XrepoResult<()> {
        for (id, commit) in self.commits.iter() {
            let Some(first_parent) = commit.parents.first() else {
                continue;
            };
            let base = render_commit(&self.commits, first_parent);
            for (path, change) in &commit.changes {
                if base.get(path) == Some(change) {
                    return Err(XrepoError::invalid_shape(format!(
                        "commit {id} duplicates an unchanged first-parent value at {path}"
                    )));
                }
            }
        }
        Ok(())
    }

    // Invariant 4.
    fn check_removal_preconditions(&self) -> XrepoResult<()> {
        for (id, commit) in self.commits.iter() {
            let Some(first_parent) = commit.parents.first() else {
                for (path, change) in &commit.changes {
                    if matches!(change, ChangeEntry::Removed) {
                        return Err(XrepoError::invalid_shape(format!(
                            "root commit {id} deletes nonexistent path {path}"
                        )));
                    }
                }
                continue;
            };
            let base = render_commit(&self.commits, first_parent);
            for (path, change) in &commit.changes {
                if matches!(change, ChangeEntry::Removed) && !base.contains_key(path) {
                    return Err(XrepoError::invalid_shape(format!(
                        "commit {id} deletes path {path} absent from its first parent"
                    )));
                }
            }
        }
        Ok(())
    }

    // Invariant 5.
    fn check_index_workdir_require_head(&self) -> XrepoResult<()> {
        if self.head.is_none() && (!self.index.is_empty() || !self.workdir.is_empty()) {
            return Err(XrepoError::invalid_shape(
                "index and workdir must be empty when head is null",
            ));
        }
        Ok(())
    }

    // Invariant 6.
    fn check_current_branch(&self) -> XrepoResult<()> {
        if let Some(name) = &self.current_branch {
            let branch = self.branches.get(name).ok_or_else(|| {
                XrepoError::invalid_shape(format!("current_branch {name} is not a known branch"))
            })?;
            if let Some(head) = &self.head {
                if head != &branch.tip {
                    return Err(XrepoError::invalid_shape(format!(
                        "head {head} does not match current_branch {name}'s tip {}",
                        branch.tip
                    )));
                }
            }
        }
        Ok(())
    }

    // Invariant 7.
    fn check_children_match_pointers(&self) -> XrepoResult<()> {
        let rendered = self.render_index();
        let pointer_paths: std::collections::BTreeSet<&RepoPathBuf> = rendered
            .iter()
            .filter(|(_, change)| change.is_child_pointer())
            .map(|(path, _)| path)
            .collect();
        let child_paths: std::collections::BTreeSet<&RepoPathBuf> = self.children.keys().collect();
        if pointer_paths != child_paths {
            return Err(XrepoError::invalid_shape(format!(
                "children keys {:?} do not match child-pointer paths {:?}",
                child_paths.iter().map(|p| p.to_internal_string()).collect_vec(),
                pointer_paths.iter().map(|p| p.to_internal_string()).collect_vec(),
            )));
        }
        Ok(())
    }

    // Invariant 8.
    fn check_bare(&self) -> XrepoResult<()> {
        if self.bare
            && (!self.index.is_empty() || !self.workdir.is_empty() || self.sequencer.is_some())
        {
            return Err(XrepoError::invalid_shape(
                "a bare repository must have an empty index/workdir and no sequencer",
            ));
        }
        Ok(())
    }

    // Invariant 9.
    fn check_sparse(&self) -> XrepoResult<()> {
        if !self.sparse {
            return Ok(());
        }
        for path in self.workdir.keys() {
            let included = self
                .sparse_patterns
                .iter()
                .any(|prefix| prefix.contains(path));
            if !included {
                return Err(XrepoError::invalid_shape(format!(
                    "workdir entry {path} is outside the declared sparse-checkout patterns"
                )));
            }
        }
        Ok(())
    }
}

/// Accumulates the first-parent chain from root to `id`. Memoizable by
/// commit id; this crate recomputes it, leaving memoization to callers that
/// call it in a hot loop (the Planner levelizes before calling it, so it's
/// called at most once per commit on the common path).
pub fn render_commit(
    commits: &BTreeMap<CommitId, Commit>,
    id: &CommitId,
) -> BTreeMap<RepoPathBuf, ChangeEntry> {
    let Some(commit) = commits.get(id) else {
        return BTreeMap::new();
    };
    let mut base = match commit.parents.first() {
        Some(parent) => render_commit(commits, parent),
        None => BTreeMap::new(),
    };
    for (path, change) in &commit.changes {
        if matches!(change, ChangeEntry::Removed) {
            base.remove(path);
        } else {
            base.insert(path.clone(), change.clone());
        }
    }
    base
}

/// The rendered head overlaid with index changes; conflict entries project
/// to their *ours* side for rendering.
pub fn render_index(
    commits: &BTreeMap<CommitId, Commit>,
    head: Option<&CommitId>,
    index: &BTreeMap<RepoPathBuf, ChangeEntry>,
) -> BTreeMap<RepoPathBuf, ChangeEntry> {
    let mut base = match head {
        Some(id) => render_commit(commits, id),
        None => BTreeMap::new(),
    };
    for (path, change) in index {
        if matches!(change, ChangeEntry::Removed) {
            base.remove(path);
        } else {
            base.insert(path.clone(), change.clone());
        }
    }
    // Conflict entries are projected to their `ours` side for rendering.
    for change in base.values_mut() {
        if let ChangeEntry::Conflict { ours, .. } = change {
            *change = (**ours).clone();
        }
    }
    base
}

#[cfg(test)]
mod tests {
    use super::*;
    use maplit::btreemap;

    fn sig() -> Signature {
        Signature {
            name: "Test User".to_string(),
            email: "test@example.com".to_string(),
        }
    }

    fn blob(s: &str) -> ChangeEntry {
        ChangeEntry::Blob {
            content: s.as_bytes().to_vec(),
            executable: false,
        }
    }

    #[test]
    fn single_root_commit_round_trips_render() {
        let root = CommitId::from("1");
        let commits = btreemap! {
            root.clone() => Commit {
                parents: vec![],
                changes: btreemap!{ RepoPathBuf::from("a") => blob("A") },
                message: "root".to_string(),
                author: sig(),
                committer: sig(),
            },
        };
        let ast = Ast::new(
            commits,
            btreemap! { "main".to_string() => Branch { tip: root.clone(), upstream: None } },
            BTreeMap::new(),
            Some(root.clone()),
            Some("main".to_string()),
            BTreeMap::new(),
            BTreeMap::new(),
            BTreeMap::new(),
            BTreeMap::new(),
            None,
            false,
            false,
            vec![],
            BTreeMap::new(),
        )
        .unwrap();
        assert_eq!(ast.render_commit(&root).get(&RepoPathBuf::from("a")), Some(&blob("A")));
    }

    #[test]
    fn unreachable_commit_is_rejected() {
        let root = CommitId::from("1");
        let orphan = CommitId::from("2");
        let commits = btreemap! {
            root.clone() => Commit { parents: vec![], changes: BTreeMap::new(), message: String::new(), author: sig(), committer: sig() },
            orphan => Commit { parents: vec![], changes: BTreeMap::new(), message: String::new(), author: sig(), committer: sig() },
        };
        let result = Ast::new(
            commits,
            btreemap! { "main".to_string() => Branch { tip: root.clone(), upstream: None } },
            BTreeMap::new(),
            Some(root),
            Some("main".to_string()),
            BTreeMap::new(),
            BTreeMap::new(),
            BTreeMap::new(),
            BTreeMap::new(),
            None,
            false,
            false,
            vec![],
            BTreeMap::new(),
        );
        assert!(matches!(result, Err(XrepoError::InvalidRepoShape(_))));
    }

    #[test]
    fn duplicate_first_parent_value_is_rejected() {
        let root = CommitId::from("1");
        let child = CommitId::from("2");
        let commits = btreemap! {
            root.clone() => Commit {
                parents: vec![],
                changes: btreemap!{ RepoPathBuf::from("a") => blob("A") },
                message: String::new(), author: sig(), committer: sig(),
            },
            child.clone() => Commit {
                parents: vec![root.clone()],
                changes: btreemap!{ RepoPathBuf::from("a") => blob("A") },
                message: String::new(), author: sig(), committer: sig(),
            },
        };
        let result = Ast::new(
            commits,
            btreemap! { "main".to_string() => Branch { tip: child.clone(), upstream: None } },
            BTreeMap::new(),
            Some(child),
            Some("main".to_string()),
            BTreeMap::new(),
            BTreeMap::new(),
            BTreeMap::new(),
            BTreeMap::new(),
            None,
            false,
            false,
            vec![],
            BTreeMap::new(),
        );
        assert!(matches!(result, Err(XrepoError::InvalidRepoShape(_))));
    }

    #[test]
    fn bare_repo_forbids_index_and_workdir() {
        let root = CommitId::from("1");
        let commits = btreemap! {
            root.clone() => Commit { parents: vec![], changes: BTreeMap::new(), message: String::new(), author: sig(), committer: sig() },
        };
        let result = Ast::new(
            commits,
            BTreeMap::new(),
            BTreeMap::new(),
            Some(root),
            None,
            BTreeMap::new(),
            btreemap! { RepoPathBuf::from("a") => blob("A") },
            BTreeMap::new(),
            BTreeMap::new(),
            None,
            true,
            false,
            vec![],
            BTreeMap::new(),
        );
        assert!(matches!(result, Err(XrepoError::InvalidRepoShape(_))));
    }
}
