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

//! Component I: the Publish Engine. Computes the minimal set of child
//! commits an outer push needs to carry along, lands each on a
//! deterministic synthetic-anchor reference in its own remote, and only
//! then advances the outer branch -- so a server can never observe the
//! outer ref pointing at a child commit it doesn't have.

use std::collections::BTreeMap;

use itertools::Itertools as _;
use tracing::{info, instrument, warn};

use crate::backend::BackendError;
use crate::dag_walk;
use crate::error::{XrepoError, XrepoResult};
use crate::object_id::CommitId;
use crate::object_model::{Ast, ChangeEntry, Remote};
use crate::repo_path::RepoPathBuf;
use crate::work_queue;

/// The reserved namespace synthetic-anchor references live under (spec
/// §6). Not a user-visible branch or tag namespace.
const ANCHOR_NAMESPACE: &str = "refs/xrepo/anchor";

/// The deterministic synthetic-anchor reference name for `commit` (spec
/// §6): a function of the commit sha alone, so two pushes of the same
/// commit land on the same ref and a server retains it even once nothing
/// else points at it.
pub fn anchor_ref_name(commit: &CommitId) -> String {
    format!("{ANCHOR_NAMESPACE}/{}", commit.hex())
}

/// Abstracts "push to a remote" so the Publish Engine's ancestry and
/// ordering logic is testable without a real network remote, the way
/// [`crate::backend::Backend`] abstracts object storage. A production
/// implementation pushes through a temporary ref and a refspec the way the
/// teacher's `push_commit` does, landing on `anchor_ref_name` instead of a
/// user branch.
pub trait RemoteTransport {
    /// Pushes `commit` to `url`'s synthetic-anchor ref for that commit.
    /// Force-capable and idempotent: pushing an already-anchored commit
    /// again succeeds without error.
    fn push_anchor(&self, url: &str, commit: &CommitId) -> Result<(), BackendError>;

    /// Force-updates `branch` in `url` to `commit`. Called only after every
    /// child publish in the same operation has already succeeded.
    fn push_branch(&self, url: &str, branch: &str, commit: &CommitId) -> Result<(), BackendError>;
}

/// One child whose publish failed, collected so every failing child is
/// reported together rather than only the first.
#[derive(Debug, Clone)]
pub struct ChildPublishFailure {
    pub path: RepoPathBuf,
    pub reason: String,
}

impl std::fmt::Display for ChildPublishFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.path, self.reason)
    }
}

/// One child due to be published: its declared path, resolved url, and
/// the commit to anchor.
struct PendingChild {
    path: RepoPathBuf,
    url: String,
    commit: CommitId,
}

/// Publishes `branch` to `remote_name`/`remote_branch`. Returns an updated
/// `Ast` recording the new remote-tracking tip on
/// success; on any child publish failure, returns
/// `XrepoError::user` aggregating every failing child's path and reason
/// and leaves the outer ref computation out of it entirely -- the caller's
/// `Ast` is never partially advanced.
#[instrument(skip(ast, transport))]
pub async fn publish(
    ast: &Ast,
    branch: &str,
    remote_name: &str,
    remote_branch: &str,
    transport: &dyn RemoteTransport,
) -> XrepoResult<Ast> {
    let tip = ast
        .branches()
        .get(branch)
        .map(|b| b.tip.clone())
        .ok_or_else(|| XrepoError::user(format!("no such branch {branch}")))?;
    let remote = ast
        .remotes()
        .get(remote_name)
        .ok_or_else(|| XrepoError::user(format!("no such remote {remote_name}")))?
        .clone();
    let nearest_published = remote.branches.get(remote_branch).cloned();

    // Step 1: the commits this push would introduce, proxy-bounded by the
    // nearest ancestor we already believe is published.
    let to_publish = dag_walk::first_unpublished_ancestor(
        tip.clone(),
        |id| Some(id) == nearest_published.as_ref(),
        |id| {
            ast.commits()
                .get(id)
                .map(|commit| commit.parents.clone())
                .unwrap_or_default()
        },
    );
    if to_publish.is_empty() {
        info!(%branch, "nothing to publish, already up to date");
        return Ok(ast.clone());
    }

    // Step 2: diff the tip against the nearest published ancestor's tree
    // to enumerate the child paths this push touches.
    let base_tree = nearest_published
        .as_ref()
        .map(|id| ast.render_commit(id))
        .unwrap_or_default();
    let tip_tree = ast.render_commit(&tip);
    let changed = changed_child_pointers(&base_tree, &tip_tree);

    // Step 3: drop any child whose commit isn't available locally -- a
    // later, more exhaustive push can cover it.
    let mut pending = Vec::new();
    for (path, url, commit) in changed {
        let available = ast
            .children()
            .get(&path)
            .is_some_and(|child| child.commits().contains_key(&commit));
        if available {
            pending.push(PendingChild { path, url, commit });
        } else {
            warn!(%path, commit = %commit, "child commit not available locally, dropping from publish plan");
        }
    }

    // Step 4: push each child to its synthetic-anchor ref, in parallel --
    // children are independent of each other within a single publish.
    let results: Vec<(PendingChild, Result<(), BackendError>)> =
        work_queue::run(pending, None, |child| async move {
            let outcome = transport.push_anchor(&child.url, &child.commit);
            Ok::<_, std::convert::Infallible>((child, outcome))
        })
        .await
        .unwrap_or_else(|never: std::convert::Infallible| match never {});

    let mut failures = Vec::new();
    for (child, outcome) in results {
        match outcome {
            Ok(()) => info!(path = %child.path, commit = %child.commit, "published child to synthetic anchor"),
            Err(err) => failures.push(ChildPublishFailure {
                path: child.path,
                reason: err.to_string(),
            }),
        }
    }
    if !failures.is_empty() {
        return Err(XrepoError::user(format!(
            "publish failed for {} child(ren): {}",
            failures.len(),
            failures.iter().map(ChildPublishFailure::to_string).join(", ")
        )));
    }

    // Step 5: only now advance the outer ref.
    transport
        .push_branch(&remote.url, remote_branch, &tip)
        .map_err(|err| XrepoError::user(format!("push of {remote_branch} failed: {err}")))?;

    let mut remotes = ast.remotes().clone();
    remotes
        .entry(remote_name.to_string())
        .or_insert_with(|| Remote {
            url: remote.url.clone(),
            branches: BTreeMap::new(),
        })
        .branches
        .insert(remote_branch.to_string(), tip);

    ast.copy(crate::object_model::AstOverrides {
        remotes: Some(remotes),
        ..Default::default()
    })
}

/// A synchronous entry point for callers that aren't themselves async --
/// blocks the calling thread on [`publish`], the way a `Backend` blocks on
/// its own async reads and writes at its synchronous trait boundary.
pub fn publish_blocking(
    ast: &Ast,
    branch: &str,
    remote_name: &str,
    remote_branch: &str,
    transport: &dyn RemoteTransport,
) -> XrepoResult<Ast> {
    use pollster::FutureExt as _;
    publish(ast, branch, remote_name, remote_branch, transport).block_on()
}

/// Collects every path where `to` has a `ChildPointer` with a concrete
/// commit that differs from (or is absent in) `from`.
fn changed_child_pointers(
    from: &BTreeMap<RepoPathBuf, ChangeEntry>,
    to: &BTreeMap<RepoPathBuf, ChangeEntry>,
) -> Vec<(RepoPathBuf, String, CommitId)> {
    to.iter()
        .filter_map(|(path, entry)| match entry {
            ChangeEntry::ChildPointer { url, commit: Some(commit) } if from.get(path) != Some(entry) => {
                Some((path.clone(), url.clone(), commit.clone()))
            }
            _ => None,
        })
        .collect()
}
