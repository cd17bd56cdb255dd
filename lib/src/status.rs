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

//! Component E: the Status Engine. Assembles a [`RepoStatus`] for one
//! repository (outer or an open child), recursing into every open child so
//! that a single call returns the whole tree's state in one pass.

use std::collections::{BTreeMap, BTreeSet};

use crate::error::{XrepoError, XrepoResult};
use crate::object_id::CommitId;
use crate::object_model::{
    Ast, ChangeEntry, ChildRelation, ChildStatus, Commit, CommitPointer, IndexPointer, RepoStatus,
    WorkdirStatus,
};
use crate::repo_path::RepoPathBuf;

/// Computes the aggregate status of `ast`, recursing into every child that
/// is currently open (present in `ast.children()`). A closed child still
/// appears in `children`, but with `workdir: None` and
/// `relation_to_commit: ChildRelation::Unknown` wherever ancestry would need
/// to be walked in a commit graph this function doesn't have access to.
pub fn status(ast: &Ast) -> RepoStatus {
    let head_tree = ast.head().map(|id| ast.render_commit(id));
    let index_tree = ast.render_index();

    let mut child_paths: BTreeSet<RepoPathBuf> = BTreeSet::new();
    if let Some(tree) = &head_tree {
        child_paths.extend(tree.iter().filter(|(_, c)| c.is_child_pointer()).map(|(p, _)| p.clone()));
    }
    child_paths.extend(
        index_tree
            .iter()
            .filter(|(_, c)| c.is_child_pointer())
            .map(|(p, _)| p.clone()),
    );
    child_paths.extend(ast.children().keys().cloned());

    let children = child_paths
        .into_iter()
        .map(|path| {
            let status = child_status(ast, &path, head_tree.as_ref(), &index_tree);
            (path, status)
        })
        .collect();

    RepoStatus {
        branch: ast.current_branch().map(String::from),
        head: ast.head().cloned(),
        staged_changes: ast.index().clone(),
        workdir_changes: ast.workdir().clone(),
        children,
        sequencer: ast.sequencer().cloned(),
    }
}

fn child_pointer_at(
    tree: &BTreeMap<RepoPathBuf, ChangeEntry>,
    path: &RepoPathBuf,
) -> Option<(&str, Option<&CommitId>)> {
    match tree.get(path) {
        Some(ChangeEntry::ChildPointer { url, commit }) => Some((url.as_str(), commit.as_ref())),
        _ => None,
    }
}

fn child_status(
    outer: &Ast,
    path: &RepoPathBuf,
    head_tree: Option<&BTreeMap<RepoPathBuf, ChangeEntry>>,
    index_tree: &BTreeMap<RepoPathBuf, ChangeEntry>,
) -> ChildStatus {
    let commit_pointer = head_tree
        .and_then(|tree| child_pointer_at(tree, path))
        .and_then(|(url, commit)| {
            commit.map(|sha| CommitPointer {
                sha: sha.clone(),
                url: url.to_string(),
            })
        });

    let open_child = outer.children().get(path);
    let child_commits = open_child.map(|child| child.commits());

    let index_pointer = child_pointer_at(index_tree, path).map(|(url, commit)| IndexPointer {
        sha: commit.cloned(),
        url: url.to_string(),
        relation_to_commit: relation(
            child_commits,
            commit,
            commit_pointer.as_ref().map(|p| &p.sha),
        ),
    });

    let workdir = open_child.map(|child| {
        let inner_status = status(child);
        let relation_to_index = relation(
            child_commits,
            inner_status.head.as_ref(),
            index_pointer.as_ref().and_then(|p| p.sha.as_ref()),
        );
        WorkdirStatus {
            inner_status: Box::new(inner_status),
            relation_to_index,
        }
    });

    ChildStatus {
        commit_pointer,
        index_pointer,
        workdir,
    }
}

/// Classifies `from` relative to `to` within `commits`' ancestry. `Unknown`
/// when `commits` is `None` (the child is closed, so its history isn't
/// available to walk) and at least one side is a real commit to compare.
fn relation(
    commits: Option<&BTreeMap<CommitId, Commit>>,
    from: Option<&CommitId>,
    to: Option<&CommitId>,
) -> ChildRelation {
    if from == to {
        return ChildRelation::Same;
    }
    let (Some(from), Some(to)) = (from, to) else {
        return ChildRelation::Unrelated;
    };
    let Some(commits) = commits else {
        return ChildRelation::Unknown;
    };
    if is_ancestor(commits, from, to) {
        ChildRelation::Behind
    } else if is_ancestor(commits, to, from) {
        ChildRelation::Ahead
    } else {
        ChildRelation::Unrelated
    }
}

/// Walks `descendant`'s parent chain looking for `ancestor`.
fn is_ancestor(commits: &BTreeMap<CommitId, Commit>, ancestor: &CommitId, descendant: &CommitId) -> bool {
    let mut stack = vec![descendant.clone()];
    let mut seen = BTreeSet::new();
    while let Some(id) = stack.pop() {
        if &id == ancestor {
            return true;
        }
        if !seen.insert(id.clone()) {
            continue;
        }
        if let Some(commit) = commits.get(&id) {
            stack.extend(commit.parents.iter().cloned());
        }
    }
    false
}

/// Spec §4.E's precondition for operations that must not start against a
/// dirty or indeterminate tree: every repository in the tree (outer plus
/// every open child, recursively) must have no staged or workdir changes,
/// and every child's commit/index/workdir pointers must agree
/// ([`ChildRelation::Same`]).
pub fn ensure_clean_and_consistent(status: &RepoStatus) -> XrepoResult<()> {
    if !status.staged_changes.is_empty() {
        return Err(XrepoError::user("repository has staged changes"));
    }
    if !status.workdir_changes.is_empty() {
        return Err(XrepoError::user("repository has uncommitted workdir changes"));
    }
    for (path, child) in &status.children {
        if let Some(index_pointer) = &child.index_pointer {
            if index_pointer.relation_to_commit != ChildRelation::Same {
                return Err(XrepoError::user(format!(
                    "child {path} index pointer is not in sync with its commit pointer"
                )));
            }
        }
        if let Some(workdir) = &child.workdir {
            if workdir.relation_to_index != ChildRelation::Same {
                return Err(XrepoError::user(format!(
                    "child {path} working copy is not in sync with its index pointer"
                )));
            }
            ensure_clean_and_consistent(&workdir.inner_status)?;
        }
    }
    Ok(())
}

/// Restricts a status tree to entries under `prefix` ("deep path
/// filtering"): top-level changes are filtered by path prefix, and a child
/// whose own path is under `prefix` is kept whole, while a child whose path
/// is itself a prefix of `prefix` (the filter reaches *inside* it) is kept
/// with its inner status recursively filtered by the remaining suffix.
pub fn filter_by_path(status: &RepoStatus, prefix: &RepoPathBuf) -> RepoStatus {
    let staged_changes = status
        .staged_changes
        .iter()
        .filter(|(path, _)| prefix.contains(path) || path.contains(prefix))
        .map(|(p, c)| (p.clone(), c.clone()))
        .collect();
    let workdir_changes = status
        .workdir_changes
        .iter()
        .filter(|(path, _)| prefix.contains(path) || path.contains(prefix))
        .map(|(p, c)| (p.clone(), c.clone()))
        .collect();
    let children = status
        .children
        .iter()
        .filter(|(path, _)| prefix.contains(path) || path.contains(prefix))
        .map(|(path, child)| {
            let filtered = if path.contains(prefix) && path != prefix {
                ChildStatus {
                    workdir: child.workdir.as_ref().map(|w| WorkdirStatus {
                        inner_status: Box::new(filter_by_path(&w.inner_status, prefix)),
                        relation_to_index: w.relation_to_index,
                    }),
                    ..child.clone()
                }
            } else {
                child.clone()
            };
            (path.clone(), filtered)
        })
        .collect();
    RepoStatus {
        branch: status.branch.clone(),
        head: status.head.clone(),
        staged_changes,
        workdir_changes,
        children,
        sequencer: status.sequencer.clone(),
    }
}
