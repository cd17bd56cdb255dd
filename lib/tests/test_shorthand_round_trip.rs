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

//! Parsing a fixture, writing it back out, and re-parsing it must produce
//! the identical `ParsedRepo`, and building both into `Ast`s must agree on
//! every rendered commit -- the shorthand writer is only ever exercised by
//! tests, so nothing else would catch a drift between `parse` and `write`.

use xrepo_lib::object_id::CommitId;
use xrepo_lib::shorthand;
use xrepo_testutils::shorthand_ast;

const FIXTURES: &[&str] = &[
    "S:C2-1 x/y/z=meh;Bmaster=2",
    "N:C1 a=hello;Bmain=1;H1;Kmain",
    "B:C2-1;Bfoo=2",
    "S:I a= b=x*",
    "S:I s={B:Bmaster=1}",
    "N:C3-1 s=Sa:1",
    "S:Rorigin=b master=1 dev=2",
];

#[test]
fn writing_and_reparsing_a_fixture_reproduces_the_same_parsed_repo() {
    for fixture in FIXTURES {
        let parsed = shorthand::parse(fixture).unwrap();
        let written = shorthand::write(&parsed);
        let reparsed = shorthand::parse(&written).unwrap();
        assert_eq!(parsed, reparsed, "round-trip mismatch for {fixture:?}");
    }
}

#[test]
fn writing_and_reparsing_preserves_the_built_ast() {
    let input = "N:C1 a=v;C2-1 a=v2;Bmain=2;H2;Kmain";
    let parsed = shorthand::parse(input).unwrap();
    let written = shorthand::write(&parsed);
    let reparsed = shorthand::parse(&written).unwrap();

    let original_ast = shorthand_ast::build(&parsed).unwrap();
    let rebuilt_ast = shorthand_ast::build(&reparsed).unwrap();

    assert_eq!(
        original_ast.render_commit(&CommitId::from("2")),
        rebuilt_ast.render_commit(&CommitId::from("2"))
    );
    assert_eq!(original_ast.head(), rebuilt_ast.head());
    assert_eq!(original_ast.current_branch(), rebuilt_ast.current_branch());
}

#[test]
fn writing_and_reparsing_a_multi_repo_fixture_round_trips() {
    let input = "a=B:C2-1;Bfoo=2 | x=Ca";
    let parsed = shorthand::parse_multi(input).unwrap();
    let written = shorthand::write_multi(&parsed);
    let reparsed = shorthand::parse_multi(&written).unwrap();
    assert_eq!(parsed, reparsed);
}
