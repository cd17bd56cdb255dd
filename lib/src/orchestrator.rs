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

//! Component H: the Merge/Cherry-pick/Rebase Orchestrator.
//!
//! Every operation moves the wrapped [`Ast`] through the same shape of state
//! machine: `Idle` (no sequencer) `-> Planning` (compute the commit-ish
//! range and merge base) `-> Integrating` (three-way-merge each step)
//! `-> Conflicted` (index holds `ChangeEntry::Conflict` entries, sequencer
//! persisted, operation returns `XrepoError::Conflict`) or `-> Finalizing`
//! (new commit(s) written, head/branch advanced) `-> Idle`. The sequencer
//! only exists as data (`self.ast.sequencer()`); whether we're "Idle" or
//! "Conflicted" is simply whether that field is populated, so resuming after
//! a restart only requires reloading the same `Ast`.

use std::collections::{BTreeMap, BTreeSet};
use std::hash::{Hash, Hasher};

use crate::error::{ConflictingPath, XrepoError, XrepoResult};
use crate::object_id::CommitId;
use crate::object_model::{
    Ast, AstOverrides, ChangeEntry, Commit, SequencerKind, SequencerState, Signature,
};
use crate::repo_path::RepoPathBuf;
use crate::{dag_walk, status};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeMode {
    /// Fast-forward when possible, otherwise create a merge commit.
    FastForward,
    /// Fail unless the merge can be expressed as a fast-forward.
    FfOnly,
    /// Always create a merge commit, even when a fast-forward is possible.
    ForceCommit,
}

/// The result of resolving every child-pointer path between two trees
/// before the outer three-way merge runs: children that fast-forward or
/// merge cleanly get a pre-resolved, matching entry on both
/// sides so the outer merge passes them through instead of reporting a
/// spurious conflict. Children that themselves conflict are recorded in
/// `conflicted` so the caller can force a `ChangeEntry::Conflict` at that
/// path even when `ours`/`theirs` alone wouldn't trip the outer three-way
/// merge's ordinary equality check (e.g. a cherry-pick step where our side
/// never touched the child, so `ours == base` at that path).
struct ChildMergeResult {
    resolved_ours: BTreeMap<RepoPathBuf, ChangeEntry>,
    resolved_theirs: BTreeMap<RepoPathBuf, ChangeEntry>,
    updated_children: BTreeMap<RepoPathBuf, Ast>,
    conflicted: Vec<RepoPathBuf>,
}

/// Wraps an [`Ast`] and drives it through merge/cherry-pick/rebase. Callers
/// get the (possibly updated) `Ast` back via [`Orchestrator::ast`] /
/// [`Orchestrator::into_ast`] regardless of whether the last call returned
/// `Ok` or a conflict: conflict state is recorded in the `Ast` itself, not
/// thrown away with the error.
///
/// Every three-way step (a merge, or one commit of a cherry-pick/rebase
/// sequence) is itself cross-repo: before the outer tree is merged,
/// [`Orchestrator::merge_children`] recurses into every open child whose
/// pointer differs between the two sides, using a fresh `Orchestrator` over
/// that child's own `Ast`. A child that fast-forwards or merges cleanly
/// gets its new head folded back into the outer merge as an already-agreed
/// value; a child that conflicts leaves its outer path unresolved, so the
/// whole cross-repo operation conflicts at that path the same way a single
/// repository would conflict on a file.
pub struct Orchestrator {
    ast: Ast,
}

impl Orchestrator {
    pub fn new(ast: Ast) -> Self {
        Orchestrator { ast }
    }

    pub fn ast(&self) -> &Ast {
        &self.ast
    }

    pub fn into_ast(self) -> Ast {
        self.ast
    }

    /// Merges `other` into the current head per `mode`. On conflict, the
    /// index is left holding `ChangeEntry::Conflict` entries and a
    /// `SequencerKind::Merge` sequencer is persisted; resolve the conflicts
    /// in the index and call [`Orchestrator::continue_operation`], or call
    /// [`Orchestrator::abort`] to roll back.
    pub fn merge(&mut self, other: CommitId, mode: MergeMode, author: Signature) -> XrepoResult<()> {
        status::ensure_clean_and_consistent(&status::status(&self.ast))?;
        let head = self
            .ast
            .head()
            .cloned()
            .ok_or_else(|| XrepoError::user("cannot merge with no head"))?;

        if is_ancestor(&self.ast, &other, &head) {
            return Ok(()); // already merged, nothing to do
        }
        if is_ancestor(&self.ast, &head, &other) && mode != MergeMode::ForceCommit {
            self.set_head(&other)?;
            return Ok(());
        }
        if mode == MergeMode::FfOnly {
            return Err(XrepoError::user(
                "fast-forward-only merge requires the current head to be an ancestor of the target",
            ));
        }

        let base = merge_base(&self.ast, &head, &other);
        let base_tree = self.ast.render_commit(&base);
        let head_tree = self.ast.render_commit(&head);
        let other_tree = self.ast.render_commit(&other);
        let child_result = self.merge_children(&base_tree, &head_tree, &other_tree, &author)?;
        if !child_result.updated_children.is_empty() {
            self.apply_children(child_result.updated_children.clone())?;
        }
        let (mut merged_tree, mut conflicts) =
            three_way_merge(&base_tree, &child_result.resolved_ours, &child_result.resolved_theirs);
        force_child_conflicts(
            &mut merged_tree,
            &mut conflicts,
            &child_result.conflicted,
            &base_tree,
            &head_tree,
            &other_tree,
        );

        if conflicts.is_empty() {
            let changes = diff_trees(&head_tree, &merged_tree);
            let commit = Commit {
                parents: vec![head, other.clone()],
                changes,
                message: format!("Merge {other}"),
                author: author.clone(),
                committer: author,
            };
            self.apply_new_commit(commit)?;
            Ok(())
        } else {
            self.enter_conflicted(
                SequencerKind::Merge,
                (head.clone(), self.ast.current_branch().map(String::from)),
                (other, None),
                vec![],
                0,
                &head_tree,
                merged_tree,
                conflicts,
            )
        }
    }

    /// Applies `commits` (oldest-to-newest) on top of the current head, one
    /// at a time.
    pub fn cherry_pick(&mut self, commits: Vec<CommitId>, author: Signature) -> XrepoResult<()> {
        status::ensure_clean_and_consistent(&status::status(&self.ast))?;
        if commits.is_empty() {
            return Err(XrepoError::user("cherry-pick requires at least one commit"));
        }
        let head = self
            .ast
            .head()
            .cloned()
            .ok_or_else(|| XrepoError::user("cannot cherry-pick with no head"))?;
        let branch = self.ast.current_branch().map(String::from);
        let target = (commits.last().unwrap().clone(), None);
        self.run_sequence(SequencerKind::CherryPick, (head, branch), target, commits, 0, author)
    }

    /// Replays the commits in `upstream..head` onto `onto`, the way `git
    /// rebase --onto onto upstream` does. Like `git rebase`, HEAD detaches
    /// from the current branch for the duration: each replayed commit only
    /// moves HEAD, and the branch's tip is repointed to the final result
    /// once the whole sequence lands, so a conflict partway through leaves
    /// the branch exactly where it started.
    pub fn rebase(&mut self, upstream: CommitId, onto: CommitId, author: Signature) -> XrepoResult<()> {
        status::ensure_clean_and_consistent(&status::status(&self.ast))?;
        let head = self
            .ast
            .head()
            .cloned()
            .ok_or_else(|| XrepoError::user("cannot rebase with no head"))?;
        let branch = self.ast.current_branch().map(String::from);
        let commits = commits_between(&self.ast, &upstream, &head);
        self.ast = self.ast.copy(AstOverrides {
            head: Some(Some(onto.clone())),
            current_branch: Some(None),
            ..Default::default()
        })?;
        if commits.is_empty() {
            return self.finish_rebase(&branch);
        }
        self.run_sequence(
            SequencerKind::Rebase,
            (head, branch.clone()),
            (onto, None),
            commits,
            0,
            author,
        )?;
        self.finish_rebase(&branch)
    }

    /// Repoints `branch`'s tip at the current (detached) head and restores
    /// it as the checked-out branch. Called once a rebase sequence has fully
    /// landed; never reached when a step conflicts, since `run_sequence`
    /// returns before this is called.
    fn finish_rebase(&mut self, branch: &Option<String>) -> XrepoResult<()> {
        let Some(name) = branch else {
            return Ok(());
        };
        let new_head = self
            .ast
            .head()
            .cloned()
            .expect("head is always set once a rebase sequence completes");
        let mut branches = self.ast.branches().clone();
        if let Some(b) = branches.get_mut(name) {
            b.tip = new_head;
        }
        self.ast = self.ast.copy(AstOverrides {
            branches: Some(branches),
            current_branch: Some(Some(name.clone())),
            ..Default::default()
        })?;
        Ok(())
    }

    /// Resumes an in-progress sequencer step after the caller has resolved
    /// every conflict in the index (replaced each `ChangeEntry::Conflict`
    /// with a concrete resolution). Fails with `XrepoError::Conflict` again,
    /// listing whatever conflicts remain, if any are still unresolved.
    pub fn continue_operation(&mut self, author: Signature) -> XrepoResult<()> {
        let Some(sequencer) = self.ast.sequencer().cloned() else {
            return Err(XrepoError::user("no in-progress operation to continue"));
        };
        // `render_index` projects any remaining conflict to its *ours* side
        // for display, so unresolved conflicts must be detected from the raw
        // index entries, not the rendered tree.
        let remaining: Vec<RepoPathBuf> = self
            .ast
            .index()
            .iter()
            .filter(|(_, change)| matches!(change, ChangeEntry::Conflict { .. }))
            .map(|(path, _)| path.clone())
            .collect();
        if !remaining.is_empty() {
            return Err(XrepoError::Conflict(
                remaining
                    .into_iter()
                    .map(|path| ConflictingPath {
                        path,
                        reason: "unresolved conflict".to_string(),
                    })
                    .collect(),
            ));
        }
        let resolved_tree = self.ast.render_index();

        match sequencer.kind {
            SequencerKind::Merge => {
                let head = self
                    .ast
                    .head()
                    .cloned()
                    .expect("head must be set while a merge sequencer is active");
                let head_tree = self.ast.render_commit(&head);
                let changes = diff_trees(&head_tree, &resolved_tree);
                let message = sequencer
                    .message
                    .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
                    .unwrap_or_else(|| format!("Merge {}", sequencer.target.0));
                let commit = Commit {
                    parents: vec![head, sequencer.target.0],
                    changes,
                    message,
                    author: author.clone(),
                    committer: author,
                };
                self.apply_new_commit(commit)?;
                self.ast = self.ast.copy(AstOverrides {
                    index: Some(BTreeMap::new()),
                    sequencer: Some(None),
                    ..Default::default()
                })?;
                Ok(())
            }
            SequencerKind::CherryPick | SequencerKind::Rebase => {
                let head = self
                    .ast
                    .head()
                    .cloned()
                    .expect("head must be set while a sequencer is active");
                let head_tree = self.ast.render_commit(&head);
                let changes = diff_trees(&head_tree, &resolved_tree);
                let picked = sequencer.commits[sequencer.current_index].clone();
                let picked_commit = self
                    .ast
                    .commits()
                    .get(&picked)
                    .expect("sequencer only ever references known commits")
                    .clone();
                let commit = Commit {
                    parents: vec![head],
                    changes,
                    message: picked_commit.message,
                    author: picked_commit.author,
                    committer: author.clone(),
                };
                self.apply_new_commit(commit)?;
                self.ast = self.ast.copy(AstOverrides {
                    index: Some(BTreeMap::new()),
                    sequencer: Some(None),
                    ..Default::default()
                })?;
                let kind = sequencer.kind;
                let original_branch = sequencer.original_head.1.clone();
                self.run_sequence(
                    sequencer.kind,
                    sequencer.original_head,
                    sequencer.target,
                    sequencer.commits,
                    sequencer.current_index + 1,
                    author,
                )?;
                if kind == SequencerKind::Rebase {
                    self.finish_rebase(&original_branch)?;
                }
                Ok(())
            }
        }
    }

    /// Rolls back to the state recorded as `original_head` in the active
    /// sequencer, discarding the index and the sequencer itself.
    pub fn abort(&mut self) -> XrepoResult<()> {
        let Some(sequencer) = self.ast.sequencer().cloned() else {
            return Err(XrepoError::user("no in-progress operation to abort"));
        };
        let (original_head, original_branch) = sequencer.original_head;
        let mut branches = self.ast.branches().clone();
        if let Some(name) = &original_branch {
            if let Some(branch) = branches.get_mut(name) {
                branch.tip = original_head.clone();
            }
        }
        self.ast = self.ast.copy(AstOverrides {
            head: Some(Some(original_head)),
            current_branch: Some(original_branch),
            branches: Some(branches),
            index: Some(BTreeMap::new()),
            sequencer: Some(None),
            ..Default::default()
        })?;
        Ok(())
    }

    fn run_sequence(
        &mut self,
        kind: SequencerKind,
        original_head: (CommitId, Option<String>),
        target: (CommitId, Option<String>),
        commits_to_apply: Vec<CommitId>,
        start_index: usize,
        author: Signature,
    ) -> XrepoResult<()> {
        for index in start_index..commits_to_apply.len() {
            let picked_id = commits_to_apply[index].clone();
            let picked = self
                .ast
                .commits()
                .get(&picked_id)
                .expect("sequencer only ever references known commits")
                .clone();
            let head = self
                .ast
                .head()
                .cloned()
                .expect("head must be set while a sequencer step runs");
            let base_tree = match picked.parents.first() {
                Some(parent) => self.ast.render_commit(parent),
                None => BTreeMap::new(),
            };
            let head_tree = self.ast.render_commit(&head);
            let picked_tree = self.ast.render_commit(&picked_id);
            let child_result = self.merge_children(&base_tree, &head_tree, &picked_tree, &author)?;
            if !child_result.updated_children.is_empty() {
                self.apply_children(child_result.updated_children.clone())?;
            }
            let (mut merged_tree, mut conflicts) =
                three_way_merge(&base_tree, &child_result.resolved_ours, &child_result.resolved_theirs);
            force_child_conflicts(
                &mut merged_tree,
                &mut conflicts,
                &child_result.conflicted,
                &base_tree,
                &head_tree,
                &picked_tree,
            );

            if !conflicts.is_empty() {
                return self.enter_conflicted(
                    kind,
                    original_head,
                    target,
                    commits_to_apply,
                    index,
                    &head_tree,
                    merged_tree,
                    conflicts,
                );
            }

            let changes = diff_trees(&head_tree, &merged_tree);
            let commit = Commit {
                parents: vec![head],
                changes,
                message: picked.message,
                author: picked.author,
                committer: author.clone(),
            };
            self.apply_new_commit(commit)?;
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn enter_conflicted(
        &mut self,
        kind: SequencerKind,
        original_head: (CommitId, Option<String>),
        target: (CommitId, Option<String>),
        commits: Vec<CommitId>,
        current_index: usize,
        head_tree: &BTreeMap<RepoPathBuf, ChangeEntry>,
        merged_tree: BTreeMap<RepoPathBuf, ChangeEntry>,
        conflicts: Vec<RepoPathBuf>,
    ) -> XrepoResult<()> {
        let index_changes = diff_trees(head_tree, &merged_tree);
        let commits = if commits.is_empty() {
            vec![target.0.clone()]
        } else {
            commits
        };
        let sequencer = SequencerState {
            kind,
            original_head,
            target,
            commits,
            current_index,
            message: None,
        };
        self.ast = self.ast.copy(AstOverrides {
            index: Some(index_changes),
            sequencer: Some(Some(sequencer)),
            ..Default::default()
        })?;
        Err(XrepoError::Conflict(
            conflicts
                .into_iter()
                .map(|path| ConflictingPath {
                    path,
                    reason: "conflicting change".to_string(),
                })
                .collect(),
        ))
    }

    fn set_head(&mut self, new_head: &CommitId) -> XrepoResult<()> {
        let mut branches = self.ast.branches().clone();
        if let Some(name) = self.ast.current_branch() {
            if let Some(branch) = branches.get_mut(name) {
                branch.tip = new_head.clone();
            }
        }
        self.ast = self.ast.copy(AstOverrides {
            branches: Some(branches),
            head: Some(Some(new_head.clone())),
            ..Default::default()
        })?;
        Ok(())
    }

    fn apply_new_commit(&mut self, commit: Commit) -> XrepoResult<CommitId> {
        let id = mint_commit_id(self.ast.commits(), &commit);
        let mut commits = self.ast.commits().clone();
        commits.insert(id.clone(), commit);
        let mut branches = self.ast.branches().clone();
        if let Some(name) = self.ast.current_branch() {
            if let Some(branch) = branches.get_mut(name) {
                branch.tip = id.clone();
            }
        }
        self.ast = self.ast.copy(AstOverrides {
            commits: Some(commits),
            branches: Some(branches),
            head: Some(Some(id.clone())),
            ..Default::default()
        })?;
        Ok(id)
    }

    /// Folds `updated` into `self.ast`'s children map, replacing any entry
    /// that already exists at that path (a child that was merged, whether
    /// cleanly or into a conflict, always has new state to record).
    fn apply_children(&mut self, updated: BTreeMap<RepoPathBuf, Ast>) -> XrepoResult<()> {
        let mut children = self.ast.children().clone();
        children.extend(updated);
        self.ast = self.ast.copy(AstOverrides {
            children: Some(children),
            ..Default::default()
        })?;
        Ok(())
    }

    /// Resolves every child-pointer path that differs between `ours_tree`
    /// and `theirs_tree` by recursively merging the open child at that
    /// path. A path whose child isn't currently open, or whose pointer was
    /// added on one side and removed on the other (an underspecified
    /// added-in-theirs/removed-in-ours case), is left untouched so the
    /// caller's three-way merge reports it as an ordinary conflict.
    fn merge_children(
        &self,
        base_tree: &BTreeMap<RepoPathBuf, ChangeEntry>,
        ours_tree: &BTreeMap<RepoPathBuf, ChangeEntry>,
        theirs_tree: &BTreeMap<RepoPathBuf, ChangeEntry>,
        author: &Signature,
    ) -> XrepoResult<ChildMergeResult> {
        let mut resolved_ours = ours_tree.clone();
        let mut resolved_theirs = theirs_tree.clone();
        let mut updated_children = BTreeMap::new();
        let mut conflicted = Vec::new();

        let child_paths: BTreeSet<RepoPathBuf> = base_tree
            .keys()
            .chain(ours_tree.keys())
            .chain(theirs_tree.keys())
            .filter(|path| {
                matches!(ours_tree.get(*path), Some(ChangeEntry::ChildPointer { .. }))
                    || matches!(theirs_tree.get(*path), Some(ChangeEntry::ChildPointer { .. }))
            })
            .cloned()
            .collect();

        for path in child_paths {
            let ours_v = ours_tree.get(&path);
            let theirs_v = theirs_tree.get(&path);
            if ours_v == theirs_v {
                continue;
            }
            let (
                Some(ChangeEntry::ChildPointer {
                    url: ours_url,
                    commit: Some(_ours_commit),
                }),
                Some(ChangeEntry::ChildPointer {
                    commit: Some(theirs_commit),
                    ..
                }),
            ) = (ours_v, theirs_v)
            else {
                continue;
            };
            let Some(child_ast) = self.ast.children().get(&path) else {
                continue;
            };
            let mut child_orchestrator = Orchestrator::new(child_ast.clone());
            match child_orchestrator.merge(theirs_commit.clone(), MergeMode::FastForward, author.clone()) {
                Ok(()) => {
                    let new_head = child_orchestrator
                        .ast()
                        .head()
                        .cloned()
                        .expect("a successful child merge always leaves head set");
                    let resolved = ChangeEntry::ChildPointer {
                        url: ours_url.clone(),
                        commit: Some(new_head),
                    };
                    resolved_ours.insert(path.clone(), resolved.clone());
                    resolved_theirs.insert(path.clone(), resolved);
                    updated_children.insert(path, child_orchestrator.into_ast());
                }
                Err(XrepoError::Conflict(_)) => {
                    // Left unresolved in resolved_ours/resolved_theirs, and
                    // recorded in `conflicted` so the caller forces a
                    // `ChangeEntry::Conflict` at this path even if `ours`
                    // happens to equal `base` here (e.g. a cherry-pick step
                    // that never touched this child on our side, which
                    // would otherwise make the plain three-way merge take
                    // `theirs` without ever detecting the child's own
                    // unresolved divergence). The child's own sequencer
                    // (persisted inside its `Ast`) is carried along so a
                    // later `continue_operation` can recurse into it.
                    conflicted.push(path.clone());
                    updated_children.insert(path, child_orchestrator.into_ast());
                }
                Err(other) => return Err(other),
            }
        }

        Ok(ChildMergeResult {
            resolved_ours,
            resolved_theirs,
            conflicted,
            updated_children,
        })
    }
}

/// Mints a `CommitId` for a commit fabricated outside a `Backend`. Hashes
/// the commit's content plus the number of existing commits as a
/// disambiguator, matching `MemoryBackend::write_commit`'s approach: two
/// structurally identical commits minted in two different ASTs still get
/// the same id, but minting the "same" commit twice into a growing AST
/// never collides.
fn mint_commit_id(commits: &BTreeMap<CommitId, Commit>, commit: &Commit) -> CommitId {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    format!(
        "{:?}|{}|{:?}|{}",
        commit.parents, commit.message, commit.changes, commits.len()
    )
    .hash(&mut hasher);
    CommitId::new(hasher.finish().to_be_bytes().to_vec())
}

fn ancestor_set(ast: &Ast, id: &CommitId) -> BTreeSet<CommitId> {
    dag_walk::dfs([id.clone()], |id: &CommitId| id.clone(), |id: &CommitId| {
        ast.commits().get(id).map(|c| c.parents.clone()).unwrap_or_default()
    })
    .collect()
}

fn is_ancestor(ast: &Ast, ancestor: &CommitId, descendant: &CommitId) -> bool {
    ancestor_set(ast, descendant).contains(ancestor)
}

/// A simple nearest-common-ancestor search: walks `a`'s own ancestry
/// (closest-first) and returns the first commit that's also an ancestor of
/// `b`. Doesn't attempt to find the single lowest common ancestor among
/// several candidates the way a full merge-base algorithm would; sufficient
/// here since every caller only needs *a* valid merge base to three-way
/// merge against, not the unique best one.
fn merge_base(ast: &Ast, a: &CommitId, b: &CommitId) -> CommitId {
    let b_ancestors = ancestor_set(ast, b);
    dag_walk::topo_order_reverse([a.clone()], |id: &CommitId| id.clone(), |id: &CommitId| {
        ast.commits().get(id).map(|c| c.parents.clone()).unwrap_or_default()
    })
    .into_iter()
    .find(|id| b_ancestors.contains(id))
    .unwrap_or_else(|| a.clone())
}

/// The commits in `upstream..head`, oldest first: reachable from `head`,
/// excluding everything reachable from `upstream`.
fn commits_between(ast: &Ast, upstream: &CommitId, head: &CommitId) -> Vec<CommitId> {
    let upstream_ancestors = ancestor_set(ast, upstream);
    dag_walk::topo_order_forward(
        [head.clone()],
        |id: &CommitId| id.clone(),
        |id: &CommitId| {
            if upstream_ancestors.contains(id) {
                vec![]
            } else {
                ast.commits().get(id).map(|c| c.parents.clone()).unwrap_or_default()
            }
        },
    )
    .into_iter()
    .filter(|id| !upstream_ancestors.contains(id))
    .collect()
}

/// Forces a `ChangeEntry::Conflict` at every path in `paths` that isn't
/// already one, using the *unresolved* `ours`/`theirs` values (not the
/// ones `merge_children` may have rewritten). A child whose own merge
/// conflicted must surface as a conflict at its outer path even when our
/// side never touched that child (`ours == base`), which the plain
/// equality-based three-way merge would otherwise resolve by silently
/// taking `theirs`: a conflict in any child must cause the whole
/// cross-repo operation to enter `Conflicted`.
fn force_child_conflicts(
    merged_tree: &mut BTreeMap<RepoPathBuf, ChangeEntry>,
    conflicts: &mut Vec<RepoPathBuf>,
    paths: &[RepoPathBuf],
    base_tree: &BTreeMap<RepoPathBuf, ChangeEntry>,
    ours_tree: &BTreeMap<RepoPathBuf, ChangeEntry>,
    theirs_tree: &BTreeMap<RepoPathBuf, ChangeEntry>,
) {
    for path in paths {
        if conflicts.contains(path) {
            continue;
        }
        conflicts.push(path.clone());
        merged_tree.insert(
            path.clone(),
            ChangeEntry::Conflict {
                ancestor: base_tree.get(path).cloned().map(Box::new),
                ours: Box::new(ours_tree.get(path).cloned().unwrap_or(ChangeEntry::Removed)),
                theirs: Box::new(theirs_tree.get(path).cloned().unwrap_or(ChangeEntry::Removed)),
            },
        );
    }
}

/// Three-way merges `ours_tree`/`theirs_tree` against `base_tree` per path,
/// returning the merged tree and the list of paths that ended up as
/// `ChangeEntry::Conflict` entries.
fn three_way_merge(
    base_tree: &BTreeMap<RepoPathBuf, ChangeEntry>,
    ours_tree: &BTreeMap<RepoPathBuf, ChangeEntry>,
    theirs_tree: &BTreeMap<RepoPathBuf, ChangeEntry>,
) -> (BTreeMap<RepoPathBuf, ChangeEntry>, Vec<RepoPathBuf>) {
    let mut merged = BTreeMap::new();
    let mut conflicts = Vec::new();
    let paths: BTreeSet<&RepoPathBuf> = base_tree
        .keys()
        .chain(ours_tree.keys())
        .chain(theirs_tree.keys())
        .collect();

    for path in paths {
        let base_v = base_tree.get(path);
        let ours_v = ours_tree.get(path);
        let theirs_v = theirs_tree.get(path);

        if ours_v == theirs_v {
            if let Some(v) = ours_v {
                merged.insert(path.clone(), v.clone());
            }
            continue;
        }
        if ours_v == base_v {
            if let Some(v) = theirs_v {
                merged.insert(path.clone(), v.clone());
            }
            continue;
        }
        if theirs_v == base_v {
            if let Some(v) = ours_v {
                merged.insert(path.clone(), v.clone());
            }
            continue;
        }

        conflicts.push(path.clone());
        merged.insert(
            path.clone(),
            ChangeEntry::Conflict {
                ancestor: base_v.cloned().map(Box::new),
                ours: Box::new(ours_v.cloned().unwrap_or(ChangeEntry::Removed)),
                theirs: Box::new(theirs_v.cloned().unwrap_or(ChangeEntry::Removed)),
            },
        );
    }
    (merged, conflicts)
}

/// A sparse diff from `from` to `to`, in the same shape as `Commit::changes`
/// / the index: only paths whose value changed, `Removed` for paths that
/// disappeared.
fn diff_trees(
    from: &BTreeMap<RepoPathBuf, ChangeEntry>,
    to: &BTreeMap<RepoPathBuf, ChangeEntry>,
) -> BTreeMap<RepoPathBuf, ChangeEntry> {
    let mut changes = BTreeMap::new();
    for (path, value) in to {
        if from.get(path) != Some(value) {
            changes.insert(path.clone(), value.clone());
        }
    }
    for path in from.keys() {
        if !to.contains_key(path) {
            changes.insert(path.clone(), ChangeEntry::Removed);
        }
    }
    changes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object_model::Branch;
    use assert_matches::assert_matches;
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

    fn commit(parents: Vec<CommitId>, changes: BTreeMap<RepoPathBuf, ChangeEntry>) -> Commit {
        Commit {
            parents,
            changes,
            message: "msg".to_string(),
            author: sig(),
            committer: sig(),
        }
    }

    fn linear_ast() -> Ast {
        let root = CommitId::from("1");
        let second = CommitId::from("2");
        let commits = btreemap! {
            root.clone() => commit(vec![], btreemap! { RepoPathBuf::from("a") => blob("A") }),
            second.clone() => commit(vec![root.clone()], btreemap! { RepoPathBuf::from("b") => blob("B") }),
        };
        Ast::new(
            commits,
            btreemap! { "main".to_string() => Branch { tip: second.clone(), upstream: None } },
            BTreeMap::new(),
            Some(second),
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
        .unwrap()
    }

    #[test]
    fn fast_forward_merge_moves_head_without_a_new_commit() {
        let ast = linear_ast();
        let root = CommitId::from("1");
        let second = CommitId::from("2");
        // Pretend head is still at root, and "second" is the incoming target.
        let ast = ast
            .copy(AstOverrides {
                head: Some(Some(root.clone())),
                branches: Some(btreemap! { "main".to_string() => Branch { tip: root.clone(), upstream: None } }),
                ..Default::default()
            })
            .unwrap();
        let mut orchestrator = Orchestrator::new(ast);
        orchestrator.merge(second.clone(), MergeMode::FastForward, sig()).unwrap();
        assert_eq!(orchestrator.ast().head(), Some(&second));
        assert_eq!(orchestrator.ast().commits().len(), 2);
    }

    #[test]
    fn diverging_merge_without_conflicts_creates_a_merge_commit() {
        let root = CommitId::from("1");
        let ours = CommitId::from("2");
        let theirs = CommitId::from("3");
        let commits = btreemap! {
            root.clone() => commit(vec![], btreemap! { RepoPathBuf::from("a") => blob("A") }),
            ours.clone() => commit(vec![root.clone()], btreemap! { RepoPathBuf::from("b") => blob("B") }),
            theirs.clone() => commit(vec![root.clone()], btreemap! { RepoPathBuf::from("c") => blob("C") }),
        };
        let ast = Ast::new(
            commits,
            btreemap! { "main".to_string() => Branch { tip: ours.clone(), upstream: None } },
            BTreeMap::new(),
            Some(ours),
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
        let mut orchestrator = Orchestrator::new(ast);
        orchestrator.merge(theirs, MergeMode::FastForward, sig()).unwrap();
        let head = orchestrator.ast().head().cloned().unwrap();
        let merged_commit = orchestrator.ast().commits().get(&head).unwrap();
        assert_eq!(merged_commit.parents.len(), 2);
        let rendered = orchestrator.ast().render_commit(&head);
        assert!(rendered.contains_key(&RepoPathBuf::from("a")));
        assert!(rendered.contains_key(&RepoPathBuf::from("b")));
        assert!(rendered.contains_key(&RepoPathBuf::from("c")));
    }

    #[test]
    fn conflicting_merge_persists_sequencer_and_can_be_aborted() {
        let root = CommitId::from("1");
        let ours = CommitId::from("2");
        let theirs = CommitId::from("3");
        let commits = btreemap! {
            root.clone() => commit(vec![], btreemap! { RepoPathBuf::from("a") => blob("A") }),
            ours.clone() => commit(vec![root.clone()], btreemap! { RepoPathBuf::from("a") => blob("ours") }),
            theirs.clone() => commit(vec![root.clone()], btreemap! { RepoPathBuf::from("a") => blob("theirs") }),
        };
        let ast = Ast::new(
            commits,
            btreemap! { "main".to_string() => Branch { tip: ours.clone(), upstream: None } },
            BTreeMap::new(),
            Some(ours.clone()),
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
        let mut orchestrator = Orchestrator::new(ast);
        let result = orchestrator.merge(theirs, MergeMode::FastForward, sig());
        assert_matches!(result, Err(XrepoError::Conflict(_)));
        assert!(orchestrator.ast().sequencer().is_some());
        let conflict_entry = orchestrator
            .ast()
            .index()
            .get(&RepoPathBuf::from("a"))
            .cloned();
        assert_matches!(conflict_entry, Some(ChangeEntry::Conflict { .. }));

        orchestrator.abort().unwrap();
        assert!(orchestrator.ast().sequencer().is_none());
        assert_eq!(orchestrator.ast().head(), Some(&ours));
        assert!(orchestrator.ast().index().is_empty());
    }

    #[test]
    fn cherry_pick_applies_commits_in_order() {
        let root = CommitId::from("1");
        let head = CommitId::from("2");
        let pick = CommitId::from("3");
        let commits = btreemap! {
            root.clone() => commit(vec![], btreemap! { RepoPathBuf::from("a") => blob("A") }),
            head.clone() => commit(vec![root.clone()], btreemap! { RepoPathBuf::from("b") => blob("B") }),
            pick.clone() => commit(vec![root.clone()], btreemap! { RepoPathBuf::from("c") => blob("C") }),
        };
        let ast = Ast::new(
            commits,
            btreemap! { "main".to_string() => Branch { tip: head.clone(), upstream: None } },
            BTreeMap::new(),
            Some(head),
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
        let mut orchestrator = Orchestrator::new(ast);
        orchestrator.cherry_pick(vec![pick], sig()).unwrap();
        let new_head = orchestrator.ast().head().cloned().unwrap();
        let rendered = orchestrator.ast().render_commit(&new_head);
        assert!(rendered.contains_key(&RepoPathBuf::from("b")));
        assert!(rendered.contains_key(&RepoPathBuf::from("c")));
        assert!(orchestrator.ast().sequencer().is_none());
    }

    #[test]
    fn rebase_replays_commits_onto_the_new_base() {
        let root = CommitId::from("1");
        let onto = CommitId::from("2");
        let feature = CommitId::from("3");
        let commits = btreemap! {
            root.clone() => commit(vec![], btreemap! { RepoPathBuf::from("a") => blob("A") }),
            onto.clone() => commit(vec![root.clone()], btreemap! { RepoPathBuf::from("b") => blob("B") }),
            feature.clone() => commit(vec![root.clone()], btreemap! { RepoPathBuf::from("c") => blob("C") }),
        };
        let ast = Ast::new(
            commits,
            btreemap! { "main".to_string() => Branch { tip: feature.clone(), upstream: None } },
            BTreeMap::new(),
            Some(feature),
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
        let mut orchestrator = Orchestrator::new(ast);
        orchestrator.rebase(root, onto.clone(), sig()).unwrap();
        let new_head = orchestrator.ast().head().cloned().unwrap();
        assert_ne!(new_head, onto);
        let rendered = orchestrator.ast().render_commit(&new_head);
        assert!(rendered.contains_key(&RepoPathBuf::from("b")));
        assert!(rendered.contains_key(&RepoPathBuf::from("c")));
        let new_commit = orchestrator.ast().commits().get(&new_head).unwrap();
        assert_eq!(new_commit.parents, vec![onto]);
        assert_eq!(orchestrator.ast().current_branch(), Some("main"));
        assert_eq!(orchestrator.ast().branches().get("main").map(|b| &b.tip), Some(&new_head));
    }

    #[test]
    fn rebase_conflict_leaves_the_branch_at_its_original_tip() {
        let root = CommitId::from("1");
        let onto = CommitId::from("2");
        let feature = CommitId::from("3");
        let commits = btreemap! {
            root.clone() => commit(vec![], btreemap! { RepoPathBuf::from("a") => blob("base") }),
            onto.clone() => commit(vec![root.clone()], btreemap! { RepoPathBuf::from("a") => blob("onto") }),
            feature.clone() => commit(vec![root.clone()], btreemap! { RepoPathBuf::from("a") => blob("feature") }),
        };
        let ast = Ast::new(
            commits,
            btreemap! { "main".to_string() => Branch { tip: feature.clone(), upstream: None } },
            BTreeMap::new(),
            Some(feature.clone()),
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
        let mut orchestrator = Orchestrator::new(ast);
        let result = orchestrator.rebase(root, onto.clone(), sig());
        assert_matches!(result, Err(XrepoError::Conflict(_)));
        assert!(orchestrator.ast().sequencer().is_some());
        // The branch hasn't moved from where the rebase started, even though
        // HEAD has already detached onto the new base.
        assert_eq!(orchestrator.ast().branches().get("main").map(|b| &b.tip), Some(&feature));
        assert_eq!(orchestrator.ast().head(), Some(&onto));
        assert_eq!(orchestrator.ast().current_branch(), None);

        orchestrator.abort().unwrap();
        assert!(orchestrator.ast().sequencer().is_none());
        assert_eq!(orchestrator.ast().head(), Some(&feature));
        assert_eq!(orchestrator.ast().current_branch(), Some("main"));
        assert_eq!(orchestrator.ast().branches().get("main").map(|b| &b.tip), Some(&feature));
    }

    /// "Cross-repo merge with child fast-forward" scenario:
    /// merging `other` into `main` should fast-forward the open child `s`
    /// from its current head to a strict descendant and produce an outer
    /// merge commit whose tree points `s` at the child's new head. The
    /// child's open head matches what `main` has recorded for it, so the
    /// cleanliness precondition in `merge()` is satisfied going in; only
    /// `other`'s recorded pointer is ahead.
    #[test]
    fn cross_repo_merge_fast_forwards_an_open_child() {
        let child_root = CommitId::from("1");
        let child_current = CommitId::from("2");
        let child_target = CommitId::from("3");
        let child_commits = btreemap! {
            child_root.clone() => commit(vec![], btreemap! { RepoPathBuf::from("q") => blob("u") }),
            child_current.clone() => commit(vec![child_root.clone()], btreemap! { RepoPathBuf::from("q2") => blob("w") }),
            child_target.clone() => commit(vec![child_current.clone()], btreemap! { RepoPathBuf::from("q3") => blob("y") }),
        };
        let child_ast = Ast::new(
            child_commits,
            btreemap! { "x".to_string() => Branch { tip: child_current.clone(), upstream: None } },
            BTreeMap::new(),
            Some(child_current.clone()),
            Some("x".to_string()),
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

        let outer_root = CommitId::from("4");
        let outer_other = CommitId::from("5");
        let outer_commits = btreemap! {
            outer_root.clone() => commit(
                vec![],
                btreemap! {
                    RepoPathBuf::from("s") => ChangeEntry::ChildPointer {
                        url: "./a".to_string(),
                        commit: Some(child_current.clone()),
                    },
                },
            ),
            outer_other.clone() => commit(
                vec![outer_root.clone()],
                btreemap! {
                    RepoPathBuf::from("s") => ChangeEntry::ChildPointer {
                        url: "./a".to_string(),
                        commit: Some(child_target.clone()),
                    },
                },
            ),
        };
        let outer_ast = Ast::new(
            outer_commits,
            btreemap! {
                "main".to_string() => Branch { tip: outer_root.clone(), upstream: None },
                "other".to_string() => Branch { tip: outer_other.clone(), upstream: None },
            },
            BTreeMap::new(),
            Some(outer_root.clone()),
            Some("main".to_string()),
            BTreeMap::new(),
            BTreeMap::new(),
            BTreeMap::new(),
            btreemap! { RepoPathBuf::from("s") => child_ast },
            None,
            false,
            false,
            vec![],
            BTreeMap::new(),
        )
        .unwrap();

        let mut orchestrator = Orchestrator::new(outer_ast);
        orchestrator
            .merge(outer_other.clone(), MergeMode::ForceCommit, sig())
            .unwrap();

        let new_head = orchestrator.ast().head().cloned().unwrap();
        let new_commit = orchestrator.ast().commits().get(&new_head).unwrap();
        assert_eq!(new_commit.parents, vec![outer_root, outer_other]);
        let rendered = orchestrator.ast().render_commit(&new_head);
        assert_matches!(
            rendered.get(&RepoPathBuf::from("s")),
            Some(ChangeEntry::ChildPointer { commit: Some(id), .. }) if *id == child_target
        );
        let child = orchestrator.ast().children().get(&RepoPathBuf::from("s")).unwrap();
        assert_eq!(child.head(), Some(&child_target));
    }

    /// A merge where both sides advance an open child down genuinely
    /// diverging histories must surface as a conflict on the child's own
    /// path, not silently pick a winner.
    #[test]
    fn cross_repo_merge_conflicts_when_a_child_diverges() {
        let child_root = CommitId::from("1");
        let child_ours = CommitId::from("2");
        let child_theirs = CommitId::from("3");
        let child_commits = btreemap! {
            child_root.clone() => commit(vec![], btreemap! { RepoPathBuf::from("q") => blob("base") }),
            child_ours.clone() => commit(vec![child_root.clone()], btreemap! { RepoPathBuf::from("q") => blob("ours") }),
            child_theirs.clone() => commit(vec![child_root.clone()], btreemap! { RepoPathBuf::from("q") => blob("theirs") }),
        };
        let child_ast = Ast::new(
            child_commits,
            btreemap! { "x".to_string() => Branch { tip: child_ours.clone(), upstream: None } },
            BTreeMap::new(),
            Some(child_ours.clone()),
            Some("x".to_string()),
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

        let outer_root = CommitId::from("4");
        let outer_other = CommitId::from("5");
        let outer_commits = btreemap! {
            outer_root.clone() => commit(
                vec![],
                btreemap! {
                    RepoPathBuf::from("s") => ChangeEntry::ChildPointer {
                        url: "./a".to_string(),
                        commit: Some(child_ours.clone()),
                    },
                },
            ),
            outer_other.clone() => commit(
                vec![outer_root.clone()],
                btreemap! {
                    RepoPathBuf::from("s") => ChangeEntry::ChildPointer {
                        url: "./a".to_string(),
                        commit: Some(child_theirs),
                    },
                },
            ),
        };
        let outer_ast = Ast::new(
            outer_commits,
            btreemap! {
                "main".to_string() => Branch { tip: outer_root.clone(), upstream: None },
            },
            BTreeMap::new(),
            Some(outer_root),
            Some("main".to_string()),
            BTreeMap::new(),
            BTreeMap::new(),
            BTreeMap::new(),
            btreemap! { RepoPathBuf::from("s") => child_ast },
            None,
            false,
            false,
            vec![],
            BTreeMap::new(),
        )
        .unwrap();

        let mut orchestrator = Orchestrator::new(outer_ast);
        let result = orchestrator.merge(outer_other, MergeMode::ForceCommit, sig());
        assert_matches!(result, Err(XrepoError::Conflict(ref paths)) if paths.iter().any(|p| p.path == RepoPathBuf::from("s")));
        assert!(orchestrator.ast().sequencer().is_some());
        let child = orchestrator.ast().children().get(&RepoPathBuf::from("s")).unwrap();
        assert!(child.sequencer().is_some());
    }
}
