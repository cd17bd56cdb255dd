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

//! Interprets [`shorthand::ParsedRepo`] values into [`Ast`]s, so fixtures can
//! be written as shorthand text instead of by hand with `Ast::new`.
//!
//! A `CloneOf(name)` repo starts from the named repo's fields and layers its
//! own directives on top; an `OpenChild` directive resolves the child
//! pointer already present at its path to the multi-repo entry whose name
//! equals the pointer's url, and opens it there. A `ShorthandValue::NestedChild`
//! is a second, inline way to open a child: it needs no corresponding
//! multi-repo entry, since the child's whole definition is written in place.

use std::collections::BTreeMap;

use xrepo_lib::error::{XrepoError, XrepoResult};
use xrepo_lib::object_id::CommitId;
use xrepo_lib::object_model::{
    self, Ast, Branch, ChangeEntry, Commit, Remote, SequencerKind, SequencerState, Signature,
};
use xrepo_lib::repo_path::RepoPathBuf;
use xrepo_lib::shorthand::{self, Directive, ParsedRepo, RepoKind, ShorthandValue};

use crate::test_signature;

/// Parses and builds a single repo's shorthand text.
pub fn parse_and_build(input: &str) -> XrepoResult<Ast> {
    build(&shorthand::parse(input)?)
}

/// Parses and builds the multi-repo form, keyed by repo name.
pub fn parse_and_build_multi(input: &str) -> XrepoResult<BTreeMap<String, Ast>> {
    build_multi(&shorthand::parse_multi(input)?)
}

/// Builds one already-parsed repo with no multi-repo context: `CloneOf` and
/// `OpenChild` are unusable here, since both resolve against sibling entries
/// this function never sees.
pub fn build(repo: &ParsedRepo) -> XrepoResult<Ast> {
    let empty = BTreeMap::new();
    let mut built = BTreeMap::new();
    build_from(repo, None, &empty, &mut built)
}

/// Builds every repo in a multi-repo fixture, resolving `CloneOf` and
/// `OpenChild` references against the other entries in `repos`.
pub fn build_multi(repos: &BTreeMap<String, ParsedRepo>) -> XrepoResult<BTreeMap<String, Ast>> {
    let mut built = BTreeMap::new();
    for name in repos.keys() {
        resolve(name, repos, &mut built)?;
    }
    Ok(built)
}

fn resolve(
    name: &str,
    repos: &BTreeMap<String, ParsedRepo>,
    built: &mut BTreeMap<String, Ast>,
) -> XrepoResult<Ast> {
    if let Some(ast) = built.get(name) {
        return Ok(ast.clone());
    }
    let repo = repos
        .get(name)
        .ok_or_else(|| XrepoError::user(format!("no repo named '{name}' in this fixture")))?;
    let base = match &repo.kind {
        RepoKind::CloneOf(base_name) => Some(resolve(base_name, repos, built)?),
        _ => None,
    };
    let ast = build_from(repo, base.as_ref(), repos, built)?;
    built.insert(name.to_string(), ast.clone());
    Ok(ast)
}

fn build_from(
    repo: &ParsedRepo,
    base: Option<&Ast>,
    repos: &BTreeMap<String, ParsedRepo>,
    built: &mut BTreeMap<String, Ast>,
) -> XrepoResult<Ast> {
    let (bare, sparse) = kind_flags(&repo.kind, base);

    let mut commits = base.map(|a| a.commits().clone()).unwrap_or_default();
    let mut branches = base.map(|a| a.branches().clone()).unwrap_or_default();
    let mut refs = base.map(|a| a.refs().clone()).unwrap_or_default();
    let mut head = base.and_then(|a| a.head().cloned());
    let mut current_branch = base.and_then(|a| a.current_branch().map(str::to_string));
    let mut remotes = base.map(|a| a.remotes().clone()).unwrap_or_default();
    let mut index = base.map(|a| a.index().clone()).unwrap_or_default();
    let mut workdir = base.map(|a| a.workdir().clone()).unwrap_or_default();
    let mut children = base.map(|a| a.children().clone()).unwrap_or_default();
    let mut sequencer = base.and_then(|a| a.sequencer().cloned());
    let mut notes = base.map(|a| a.notes().clone()).unwrap_or_default();

    for directive in &repo.directives {
        match directive {
            Directive::Commit { id, parents, changes } => {
                let mut entries = BTreeMap::new();
                for (path, value) in changes {
                    let path = RepoPathBuf::from(path.as_str());
                    let entry = convert_value(value, path.clone(), repos, built, &mut children)?;
                    entries.insert(path, entry);
                }
                commits.insert(
                    CommitId::from(id.as_str()),
                    Commit {
                        parents: parents.iter().map(|p| CommitId::from(p.as_str())).collect(),
                        changes: entries,
                        message: format!("commit {id}"),
                        author: test_signature(),
                        committer: test_signature(),
                    },
                );
            }
            Directive::Branch { name, commit } => {
                branches.insert(
                    name.clone(),
                    Branch {
                        tip: CommitId::from(commit.as_str()),
                        upstream: None,
                    },
                );
            }
            Directive::Ref { name, commit } => {
                refs.insert(name.clone(), CommitId::from(commit.as_str()));
            }
            Directive::Head { commit } => {
                head = commit.as_deref().map(CommitId::from);
            }
            Directive::CurrentBranch { name } => {
                current_branch = name.clone();
            }
            Directive::Remote {
                name,
                repo_ref,
                branches: remote_branches,
            } => {
                remotes.insert(
                    name.clone(),
                    Remote {
                        url: repo_ref.clone(),
                        branches: remote_branches
                            .iter()
                            .map(|(branch, sha)| (branch.clone(), CommitId::from(sha.as_str())))
                            .collect(),
                    },
                );
            }
            Directive::IndexChange { changes } => {
                for (path, value) in changes {
                    let path = RepoPathBuf::from(path.as_str());
                    let entry = convert_value(value, path.clone(), repos, built, &mut children)?;
                    index.insert(path, entry);
                }
            }
            Directive::WorkdirChange { changes } => {
                for (path, content) in changes {
                    workdir.insert(
                        RepoPathBuf::from(path.as_str()),
                        content.as_ref().map(|s| s.as_bytes().to_vec()),
                    );
                }
            }
            Directive::OpenChild { path } => {
                let path = RepoPathBuf::from(path.as_str());
                let rendered = object_model::render_index(&commits, head.as_ref(), &index);
                let url = match rendered.get(&path) {
                    Some(ChangeEntry::ChildPointer { url, .. }) => url.clone(),
                    _ => {
                        return Err(XrepoError::user(format!(
                            "open-child directive at {path} has no child pointer to resolve"
                        )))
                    }
                };
                let child_ast = resolve(&url, repos, built)?;
                children.insert(path, child_ast);
            }
            Directive::Sequencer {
                kind,
                target,
                original,
                commits: seq_commits,
                current_index,
            } => {
                sequencer = Some(SequencerState {
                    kind: parse_sequencer_kind(kind)?,
                    original_head: (CommitId::from(original.as_str()), None),
                    target: (CommitId::from(target.as_str()), None),
                    commits: seq_commits.iter().map(|c| CommitId::from(c.as_str())).collect(),
                    current_index: *current_index,
                    message: None,
                });
            }
            Directive::Note {
                reference,
                commit,
                message,
            } => {
                notes
                    .entry(reference.clone())
                    .or_default()
                    .insert(CommitId::from(commit.as_str()), message.as_bytes().to_vec());
            }
        }
    }

    Ast::new(
        commits,
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
        vec![RepoPathBuf::root()],
        notes,
    )
}

fn convert_value(
    value: &ShorthandValue,
    path: RepoPathBuf,
    repos: &BTreeMap<String, ParsedRepo>,
    built: &mut BTreeMap<String, Ast>,
    children: &mut BTreeMap<RepoPathBuf, Ast>,
) -> XrepoResult<ChangeEntry> {
    match value {
        ShorthandValue::Deleted => Ok(ChangeEntry::Removed),
        ShorthandValue::Blob { content, executable } => Ok(ChangeEntry::Blob {
            content: content.as_bytes().to_vec(),
            executable: *executable,
        }),
        ShorthandValue::ChildPointer { url, sha } => Ok(ChangeEntry::ChildPointer {
            url: url.clone(),
            commit: Some(CommitId::from(sha.as_str())),
        }),
        ShorthandValue::NestedChild(nested) => {
            let child_ast = build_from(nested, None, repos, built)?;
            let commit = child_ast.head().cloned();
            let url = format!("embedded:{path}");
            children.insert(path, child_ast);
            Ok(ChangeEntry::ChildPointer { url, commit })
        }
    }
}

fn parse_sequencer_kind(kind: &str) -> XrepoResult<SequencerKind> {
    match kind {
        "merge" => Ok(SequencerKind::Merge),
        "cherry-pick" => Ok(SequencerKind::CherryPick),
        "rebase" => Ok(SequencerKind::Rebase),
        other => Err(XrepoError::user(format!("unknown sequencer kind '{other}'"))),
    }
}

fn kind_flags(kind: &RepoKind, base: Option<&Ast>) -> (bool, bool) {
    match kind {
        RepoKind::Normal => (false, false),
        RepoKind::Sparse => (false, true),
        RepoKind::Bare => (true, false),
        RepoKind::BareSparse => (true, true),
        RepoKind::CloneOf(_) => base.map(|a| (a.is_bare(), a.is_sparse())).unwrap_or((false, false)),
    }
}
