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

//! Component K: the Stash / Shadow Engine. Captures dirty state across the
//! outer repository and every open child as one logical unit (a
//! *meta-stash*), fabricating an inner commit per dirty repository the way
//! [`crate::orchestrator`] fabricates merge commits, and restores it with
//! the same recursive structure it was captured with.
//!
//! A dirty child's own stash commit is produced by recursing [`save`] into
//! it -- an `Ast`'s children are themselves `Ast`s, so the outer repository
//! and a child are stashed by literally the same logic, each recursion
//! level anchoring the level below it by reference.

use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};

use crate::error::{XrepoError, XrepoResult};
use crate::object_id::CommitId;
use crate::object_model::{Ast, AstOverrides, ChangeEntry, Commit, RepoStatus};
use crate::repo_path::RepoPathBuf;
use crate::settings::EngineSettings;
use crate::status;

/// Whether a meta-stash is an ordinary, user-visible stash or a *shadow*
/// commit used purely for transport. Carried as metadata only;
/// callers decide whether to append a [`StashEntry`] to their own visible
/// stash log based on this, since the log itself lives outside this
/// module (an `Ast` has no concept of stash history, the way it has no
/// concept of operation history).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StashKind {
    Stash,
    Shadow,
}

/// One child's contribution to a meta-stash: the path it was stashed at
/// and the commit its dirty state was captured into. Kept for
/// introspection (a caller listing what a stash touched); restoring a
/// stash does not consult this list, since the stash commit's own tree
/// already encodes which paths are nested child stashes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildStashEntry {
    pub path: RepoPathBuf,
    pub commit: CommitId,
}

/// A single meta-stash, returned by [`save`] and consumed by [`apply`] and
/// [`pop`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StashEntry {
    pub kind: StashKind,
    pub outer_commit: CommitId,
    pub children: Vec<ChildStashEntry>,
    pub message: String,
}

fn is_dirty(status: &RepoStatus) -> bool {
    !status.staged_changes.is_empty()
        || !status.workdir_changes.is_empty()
        || status
            .children
            .values()
            .any(|child| child.workdir.as_ref().is_some_and(|w| is_dirty(&w.inner_status)))
}

/// Folds `workdir`'s raw overlay on top of `index`'s staged diff into a
/// single change set, the tree a stash commit needs to capture everything
/// dirty about a repository.
fn combined_changes(
    index: &BTreeMap<RepoPathBuf, ChangeEntry>,
    workdir: &BTreeMap<RepoPathBuf, Option<Vec<u8>>>,
) -> BTreeMap<RepoPathBuf, ChangeEntry> {
    let mut changes = index.clone();
    for (path, content) in workdir {
        let entry = match content {
            Some(bytes) => ChangeEntry::Blob {
                content: bytes.clone(),
                executable: false,
            },
            None => ChangeEntry::Removed,
        };
        changes.insert(path.clone(), entry);
    }
    changes
}

fn child_pointer_url(ast: &Ast, path: &RepoPathBuf) -> String {
    let head_tree = ast.head().map(|id| ast.render_commit(id)).unwrap_or_default();
    if let Some(ChangeEntry::ChildPointer { url, .. }) = head_tree.get(path) {
        return url.clone();
    }
    if let Some(ChangeEntry::ChildPointer { url, .. }) = ast.index().get(path) {
        return url.clone();
    }
    String::new()
}

/// Deterministically derives a commit id from its content, the same
/// content-hash scheme `orchestrator::mint_commit_id` uses for fabricated
/// merge commits.
fn mint_stash_commit_id(commits: &BTreeMap<CommitId, Commit>, commit: &Commit) -> CommitId {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    format!(
        "stash|{:?}|{}|{:?}|{}",
        commit.parents,
        commit.message,
        commit.changes,
        commits.len()
    )
    .hash(&mut hasher);
    CommitId::new(hasher.finish().to_be_bytes().to_vec())
}

/// Captures dirty state across `ast` and every open child into a single
/// [`StashEntry`], returning the cleaned `Ast` alongside it. Returns `None`
/// -- a no-op -- when nothing is dirty anywhere in the tree.
pub fn save(ast: &Ast, settings: &EngineSettings, kind: StashKind) -> XrepoResult<Option<(Ast, StashEntry)>> {
    let own_status = status::status(ast);
    if !is_dirty(&own_status) {
        return Ok(None);
    }

    let mut updated_children = ast.children().clone();
    let mut child_entries = Vec::new();
    // Path order gives deterministic output when an operation touches
    // multiple children.
    for (path, child) in ast.children() {
        if let Some((new_child, entry)) = save(child, settings, kind)? {
            child_entries.push(ChildStashEntry {
                path: path.clone(),
                commit: entry.outer_commit,
            });
            updated_children.insert(path.clone(), new_child);
        }
    }

    let head = ast
        .head()
        .cloned()
        .ok_or_else(|| XrepoError::user("cannot stash a repository with no head"))?;
    let mut changes = combined_changes(ast.index(), ast.workdir());
    for entry in &child_entries {
        changes.insert(
            entry.path.clone(),
            ChangeEntry::ChildPointer {
                url: child_pointer_url(ast, &entry.path),
                commit: Some(entry.commit.clone()),
            },
        );
    }

    let identity = settings.fabricated_identity();
    let message = settings.stash_message_template().replace("{path}", "<root>");
    let stash_commit = Commit {
        parents: vec![head],
        changes,
        message: message.clone(),
        author: identity.clone(),
        committer: identity,
    };
    let stash_commit_id = mint_stash_commit_id(ast.commits(), &stash_commit);

    let mut commits = ast.commits().clone();
    commits.insert(stash_commit_id.clone(), stash_commit);

    let cleaned = ast.copy(AstOverrides {
        commits: Some(commits),
        index: Some(BTreeMap::new()),
        workdir: Some(BTreeMap::new()),
        children: Some(updated_children),
        ..Default::default()
    })?;

    Ok(Some((
        cleaned,
        StashEntry {
            kind,
            outer_commit: stash_commit_id,
            children: child_entries,
            message,
        },
    )))
}

/// Restores `changes` into `ast`: a `ChildPointer` entry whose path is an
/// open child is itself a nested stash and is applied recursively; every
/// other entry lands directly in the index, the way an ordinary stash pop
/// re-stages what it captured.
fn restore_into(ast: &Ast, changes: &BTreeMap<RepoPathBuf, ChangeEntry>) -> XrepoResult<Ast> {
    let mut updated_children = ast.children().clone();
    let mut index = ast.index().clone();

    for (path, value) in changes {
        match (value, ast.children().get(path)) {
            (ChangeEntry::ChildPointer { commit: Some(commit), .. }, Some(child_ast)) => {
                let child_stash_commit = child_ast
                    .commits()
                    .get(commit)
                    .ok_or_else(|| XrepoError::user(format!("child {path} stash commit {commit} not found")))?
                    .clone();
                let restored_child = restore_into(child_ast, &child_stash_commit.changes)?;
                updated_children.insert(path.clone(), restored_child);
            }
            _ => {
                index.insert(path.clone(), value.clone());
            }
        }
    }

    ast.copy(AstOverrides {
        index: Some(index),
        children: Some(updated_children),
        ..Default::default()
    })
}

/// Applies `entry` into `ast` without removing it from any log; callers
/// that want stash-pop semantics should use [`pop`] instead, which also
/// removes the entry on success.
pub fn apply(ast: &Ast, entry: &StashEntry) -> XrepoResult<Ast> {
    let stash_commit = ast
        .commits()
        .get(&entry.outer_commit)
        .ok_or_else(|| XrepoError::user("stash commit not found"))?
        .clone();
    restore_into(ast, &stash_commit.changes)
}

/// Applies the most recently saved entry in `log` into `ast` and removes it
/// from `log` on success, the way `git stash pop` both restores and drops
/// the stash. Fails with `UserError` if `log` is empty.
pub fn pop(ast: &Ast, log: &mut Vec<StashEntry>) -> XrepoResult<Ast> {
    let entry = log.last().cloned().ok_or_else(|| XrepoError::user("no stash entries to pop"))?;
    let restored = apply(ast, &entry)?;
    log.pop();
    Ok(restored)
}
