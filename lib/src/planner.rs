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

//! Component G: the Cross-Repo Commit Planner. Levelizes a write set of
//! commits by dependency (a commit's parents, plus any child commit ids its
//! changes point at) and emits each level through the Work Queue, so
//! independent commits in the same level run concurrently while a commit
//! that references another's not-yet-written child commit always waits for
//! a later level.
//!
//! A cross-repo merge commit naturally falls out of this without special
//! casing: its changes reference the child commits each side of the merge
//! pins, so those child commits land in strictly earlier levels and are
//! guaranteed to have already run by the time the merge commit's level
//! starts.

use std::collections::BTreeMap;
use std::future::Future;

use crate::dag_walk;
use crate::object_id::CommitId;
use crate::object_model::{ChangeEntry, Commit};
use crate::work_queue;

/// A dependency-ordered batching of a write set: `levels[0]` has no
/// dependencies within the write set, `levels[n]` depends only on commits in
/// `levels[0..n]`.
#[derive(Debug, Clone)]
pub struct Plan {
    pub levels: Vec<Vec<CommitId>>,
}

impl Plan {
    pub fn is_empty(&self) -> bool {
        self.levels.iter().all(Vec::is_empty)
    }

    pub fn len(&self) -> usize {
        self.levels.iter().map(Vec::len).sum()
    }
}

/// Builds a plan for writing every commit reachable from `heads` within
/// `commits`.
pub fn plan(commits: &BTreeMap<CommitId, Commit>, heads: &[CommitId]) -> Plan {
    let levels = dag_walk::levelize(
        heads.iter().cloned(),
        |id: &CommitId| id.clone(),
        |id: &CommitId| dependencies(commits, id),
    );
    Plan { levels }
}

fn dependencies(commits: &BTreeMap<CommitId, Commit>, id: &CommitId) -> Vec<CommitId> {
    let Some(commit) = commits.get(id) else {
        return vec![];
    };
    let mut deps = commit.parents.clone();
    for change in commit.changes.values() {
        collect_child_commit_refs(change, &mut deps);
    }
    deps
}

fn collect_child_commit_refs(change: &ChangeEntry, deps: &mut Vec<CommitId>) {
    match change {
        ChangeEntry::ChildPointer { commit: Some(id), .. } => deps.push(id.clone()),
        ChangeEntry::Conflict { ancestor, ours, theirs } => {
            if let Some(ancestor) = ancestor {
                collect_child_commit_refs(ancestor, deps);
            }
            collect_child_commit_refs(ours, deps);
            collect_child_commit_refs(theirs, deps);
        }
        ChangeEntry::ChildPointer { commit: None, .. } | ChangeEntry::Blob { .. } | ChangeEntry::Removed => {}
    }
}

/// Runs `worker` over every commit in `plan`, one level at a time (a level
/// is a barrier: the next level doesn't start until every commit in the
/// current one has finished), with up to `limit` commits in flight within a
/// level. Fails fast the way [`work_queue::run`] does: the first error in a
/// level aborts that level's remaining scheduling and is returned without
/// starting later levels.
pub async fn execute<T, E, F, Fut>(
    plan: &Plan,
    limit: Option<usize>,
    worker: F,
) -> Result<BTreeMap<CommitId, T>, E>
where
    F: Fn(CommitId) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut results = BTreeMap::new();
    for level in &plan.levels {
        let level_results = work_queue::run(level.clone(), limit, |id| {
            let worker = &worker;
            async move {
                let value = worker(id.clone()).await?;
                Ok((id, value))
            }
        })
        .await?;
        results.extend(level_results);
    }
    Ok(results)
}
