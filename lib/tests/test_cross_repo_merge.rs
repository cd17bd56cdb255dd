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

//! End-to-end "cross-repo merge" scenario: merging two outer branches whose
//! only difference is a child pointer fast-forwards the child in place and
//! folds the new pointer into an ordinary two-parent outer merge commit,
//! with no conflict.

use test_case::test_case;
use xrepo_lib::object_id::CommitId;
use xrepo_lib::object_model::ChangeEntry;
use xrepo_lib::orchestrator::{MergeMode, Orchestrator};
use xrepo_lib::repo_path::RepoPathBuf;
use xrepo_testutils::test_signature;

#[test]
fn merging_branches_that_only_differ_by_a_child_pointer_fast_forwards_the_child() {
    let repos = xrepo_testutils::shorthand_ast::parse_and_build_multi(
        "s=N:C1 f=v;C2-1 f=v2;Bmain=1;H1;Kmain \
         | x=N:C1 s=Ss:1;C3-1;C4-1 s=Ss:2;Bmain=3;Bother=4;H3;Kmain;Os",
    )
    .unwrap();
    let x = repos["x"].clone();

    let mut orchestrator = Orchestrator::new(x);
    orchestrator
        .merge(CommitId::from("4"), MergeMode::FastForward, test_signature())
        .unwrap();
    let merged = orchestrator.into_ast();

    assert!(merged.sequencer().is_none());
    let head = merged.head().cloned().expect("head set after a clean merge");
    let changes = merged.render_commit(&head);
    assert_eq!(
        changes.get(&RepoPathBuf::from("s")),
        Some(&ChangeEntry::ChildPointer {
            url: "s".to_string(),
            commit: Some(CommitId::from("2")),
        })
    );

    let child = merged.children().get(&RepoPathBuf::from("s")).unwrap();
    assert_eq!(child.head(), Some(&CommitId::from("2")));
}

/// A two-parent merge can never be expressed as a fast-forward, so
/// `FfOnly` must refuse it regardless of how `FastForward`/`ForceCommit`
/// would have handled the same pair of branches.
#[test_case(MergeMode::FastForward ; "fast_forward falls back to a merge commit")]
#[test_case(MergeMode::ForceCommit ; "force_commit always makes a merge commit")]
fn merging_unrelated_branches_makes_a_two_parent_commit_under_non_ff_only_modes(mode: MergeMode) {
    let repos = xrepo_testutils::shorthand_ast::parse_and_build_multi(
        "s=N:C1 f=v;Bmain=1;H1;Kmain \
         | x=N:C1 s=Ss:1;C3-1;C4-1;Bmain=3;Bother=4;H3;Kmain;Os",
    )
    .unwrap();
    let x = repos["x"].clone();

    let mut orchestrator = Orchestrator::new(x);
    orchestrator.merge(CommitId::from("4"), mode, test_signature()).unwrap();
    let merged = orchestrator.into_ast();

    assert!(merged.sequencer().is_none());
    let head = merged.head().cloned().expect("head set after a clean merge");
    let parents = &merged.commits().get(&head).expect("head commit recorded").parents;
    assert_eq!(parents, &vec![CommitId::from("3"), CommitId::from("4")]);
}

#[test]
fn merging_unrelated_branches_under_ff_only_fails() {
    let repos = xrepo_testutils::shorthand_ast::parse_and_build_multi(
        "s=N:C1 f=v;Bmain=1;H1;Kmain \
         | x=N:C1 s=Ss:1;C3-1;C4-1;Bmain=3;Bother=4;H3;Kmain;Os",
    )
    .unwrap();
    let x = repos["x"].clone();

    let mut orchestrator = Orchestrator::new(x);
    orchestrator
        .merge(CommitId::from("4"), MergeMode::FfOnly, test_signature())
        .unwrap_err();
}
