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

//! Cross-cutting properties that don't belong to any single scenario:
//! round-tripping an `Ast` through the object store,
//! the planner's dependency-before-dependent ordering, the orchestrator's
//! all-or-nothing ref movement, and a stash's idempotent apply.

use std::collections::BTreeMap;

use assert_matches::assert_matches;
use maplit::btreemap;
use pretty_assertions::assert_eq;
use xrepo_lib::object_id::CommitId;
use xrepo_lib::object_model::{self, ChangeEntry, Commit, Signature};
use xrepo_lib::orchestrator::Orchestrator;
use xrepo_lib::planner;
use xrepo_lib::repo_path::RepoPathBuf;
use xrepo_lib::stash::{self, StashKind};
use xrepo_lib::{bridge, error::XrepoError};
use xrepo_testutils::{engine_settings, materialize, test_signature};

fn sig() -> Signature {
    test_signature()
}

fn commit(parents: Vec<CommitId>, changes: BTreeMap<RepoPathBuf, ChangeEntry>) -> Commit {
    Commit {
        parents,
        changes,
        message: String::new(),
        author: sig(),
        committer: sig(),
    }
}

fn blob(s: &str) -> ChangeEntry {
    ChangeEntry::Blob {
        content: s.as_bytes().to_vec(),
        executable: false,
    }
}

/// Property 1: writing a commit graph to the object store and reading it
/// back reconstructs the identical rendered tree at every head, modulo the
/// logical/physical id remapping the bijection records.
#[test]
fn ast_round_trips_through_the_object_store() {
    let root = CommitId::from("1");
    let tip = CommitId::from("2");
    let commits = btreemap! {
        root.clone() => commit(vec![], btreemap! { RepoPathBuf::from("a") => blob("v") }),
        tip.clone() => commit(vec![root.clone()], btreemap! { RepoPathBuf::from("b") => blob("w") }),
    };
    let heads = vec![tip.clone()];

    let materialized = materialize(&commits, &heads).unwrap();
    let physical_tip = materialized.bijection.physical(&tip).cloned().unwrap();

    let reconstructed = bridge::read(materialized.backend.as_ref(), &[physical_tip.clone()]).unwrap();

    let original_tree = object_model::render_commit(&commits, &tip);
    let reconstructed_tree = object_model::render_commit(&reconstructed, &physical_tip);
    assert_eq!(original_tree, reconstructed_tree);
}

/// Property 4: every commit in a planner level depends only on commits --
/// its own parents, and any child commit its changes point at -- that
/// landed in a strictly earlier level.
#[test]
fn planner_levels_only_ever_depend_on_strictly_earlier_levels() {
    let child_root = CommitId::from("c1");
    let child_tip = CommitId::from("c2");
    let outer_root = CommitId::from("o1");
    let outer_tip = CommitId::from("o2");
    let commits = btreemap! {
        child_root.clone() => commit(vec![], BTreeMap::new()),
        child_tip.clone() => commit(vec![child_root.clone()], BTreeMap::new()),
        outer_root.clone() => commit(vec![], btreemap! {
            RepoPathBuf::from("s") => ChangeEntry::ChildPointer { url: "s".to_string(), commit: Some(child_root.clone()) },
        }),
        outer_tip.clone() => commit(vec![outer_root.clone()], btreemap! {
            RepoPathBuf::from("s") => ChangeEntry::ChildPointer { url: "s".to_string(), commit: Some(child_tip.clone()) },
        }),
    };
    let heads = vec![outer_tip.clone(), child_tip.clone()];
    let plan = planner::plan(&commits, &heads);

    let level_of = |id: &CommitId| plan.levels.iter().position(|level| level.contains(id)).unwrap();

    for (this_id, commit) in &commits {
        let this_level = level_of(this_id);
        for parent in &commit.parents {
            assert!(level_of(parent) < this_level, "parent must land before its child");
        }
        for change in commit.changes.values() {
            if let ChangeEntry::ChildPointer { commit: Some(referenced), .. } = change {
                assert!(
                    level_of(referenced) < this_level,
                    "referenced child commit must land before the outer commit pointing at it"
                );
            }
        }
    }
}

/// Property 5: a conflicting cross-repo operation never partially advances
/// the outer ref -- head and branch are exactly where they started -- and
/// `abort` restores that same starting point even after the sequencer has
/// been persisted.
#[test]
fn a_conflicting_merge_leaves_the_outer_ref_untouched_and_abort_restores_it() {
    let base = CommitId::from("1");
    let left = CommitId::from("2");
    let right = CommitId::from("3");
    let commits = btreemap! {
        base.clone() => commit(vec![], btreemap! { RepoPathBuf::from("q") => blob("base") }),
        left.clone() => commit(vec![base.clone()], btreemap! { RepoPathBuf::from("q") => blob("u") }),
        right.clone() => commit(vec![base.clone()], btreemap! { RepoPathBuf::from("q") => blob("w") }),
    };
    let ast = xrepo_lib::object_model::Ast::new(
        commits,
        btreemap! { "main".to_string() => xrepo_lib::object_model::Branch { tip: left.clone(), upstream: None } },
        BTreeMap::new(),
        Some(left.clone()),
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

    let mut orchestrator = Orchestrator::new(ast.clone());
    let err = orchestrator
        .merge(right.clone(), xrepo_lib::orchestrator::MergeMode::FastForward, sig())
        .unwrap_err();
    assert_matches!(err, XrepoError::Conflict(_));

    let conflicted = orchestrator.ast();
    assert_eq!(conflicted.head(), Some(&left));
    assert_eq!(conflicted.branches().get("main").map(|b| &b.tip), Some(&left));

    orchestrator.abort().unwrap();
    let restored = orchestrator.into_ast();
    assert_eq!(restored.head(), ast.head());
    assert_eq!(restored.branches(), ast.branches());
    assert!(restored.sequencer().is_none());
    assert!(restored.index().is_empty());
}

/// Property 8: applying the same saved stash twice produces the same
/// restored state both times -- `apply` inspects the stash commit without
/// mutating it, so it's safe to apply a stash more than once (e.g. after a
/// first apply is itself discarded).
#[test]
fn applying_the_same_stash_twice_is_idempotent() {
    let root = CommitId::from("1");
    let commits = btreemap! { root.clone() => commit(vec![], btreemap! { RepoPathBuf::from("a") => blob("A") }) };
    let ast = xrepo_lib::object_model::Ast::new(
        commits,
        BTreeMap::new(),
        BTreeMap::new(),
        Some(root),
        None,
        BTreeMap::new(),
        btreemap! { RepoPathBuf::from("a") => blob("B") },
        BTreeMap::new(),
        BTreeMap::new(),
        None,
        false,
        false,
        vec![],
        BTreeMap::new(),
    )
    .unwrap();

    let settings = engine_settings();
    let (cleaned, entry) = stash::save(&ast, &settings, StashKind::Stash).unwrap().unwrap();

    let first = stash::apply(&cleaned, &entry).unwrap();
    let second = stash::apply(&cleaned, &entry).unwrap();
    assert_eq!(first, second);
    assert_eq!(first.index().get(&RepoPathBuf::from("a")), Some(&blob("B")));
}
