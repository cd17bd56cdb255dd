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

//! Component C: the shorthand grammar, a compact textual DSL that test
//! fixtures use to express ASTs and AST-multimaps.
//!
//! The grammar is parsed with a hand-written, brace-depth-aware scanner
//! rather than `pest`: it is a small line-oriented DSL, not an expression
//! grammar, and a hand parser gives precise byte offsets for
//! [`XrepoError::InvalidShorthand`] with less machinery.
//!
//! `Repo := Kind [':' Directive (';' Directive)*]`, with directive letters
//! assigned one per production: `C` commit, `B` branch,
//! `F` ref, `H` head, `K` current branch, `R` remote, `I` index change, `W`
//! workdir change, `O` open child, `Q` sequencer, `T` note. Kind letters:
//! `N` normal, `S` sparse, `B` bare, `%` prefix toggles bare onto the kind
//! that follows (e.g. `%S` is bare *and* sparse), `C` followed by a lowercase
//! name (e.g. `Ca`) means "clone of `a`" in the multi-repo form. A value can
//! be a bare literal (blob content, with a trailing `*` marking the
//! executable bit), `'S' url ':' sha` (a child pointer), empty (a deletion),
//! or a brace-wrapped nested `Repo` (an inline child AST).

use std::collections::BTreeMap;
use std::fmt::Write as _;

use crate::error::{XrepoError, XrepoResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RepoKind {
    Normal,
    Sparse,
    Bare,
    BareSparse,
    /// Multi-repo-only: carries over the named repo's commits/branches/refs
    /// before this repo's own directives apply on top.
    CloneOf(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShorthandValue {
    Blob { content: String, executable: bool },
    ChildPointer { url: String, sha: String },
    NestedChild(Box<ParsedRepo>),
    Deleted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive {
    Commit {
        id: String,
        parents: Vec<String>,
        changes: Vec<(String, ShorthandValue)>,
    },
    Branch {
        name: String,
        commit: String,
    },
    Ref {
        name: String,
        commit: String,
    },
    Head {
        commit: Option<String>,
    },
    CurrentBranch {
        name: Option<String>,
    },
    Remote {
        name: String,
        repo_ref: String,
        branches: Vec<(String, String)>,
    },
    IndexChange {
        changes: Vec<(String, ShorthandValue)>,
    },
    WorkdirChange {
        changes: Vec<(String, Option<String>)>,
    },
    OpenChild {
        path: String,
    },
    Sequencer {
        kind: String,
        target: String,
        original: String,
        commits: Vec<String>,
        current_index: usize,
    },
    Note {
        reference: String,
        commit: String,
        message: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedRepo {
    pub kind: RepoKind,
    pub directives: Vec<Directive>,
}

struct Scanner<'a> {
    input: &'a str,
    pos: usize,
    base_offset: usize,
}

impl<'a> Scanner<'a> {
    fn new(input: &'a str, base_offset: usize) -> Self {
        Scanner {
            input,
            pos: 0,
            base_offset,
        }
    }

    fn peek(&self) -> Option<char> {
        self.input[self.pos..].chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn eof(&self) -> bool {
        self.pos >= self.input.len()
    }

    fn err(&self, reason: impl Into<String>) -> XrepoError {
        XrepoError::InvalidShorthand {
            position: self.base_offset + self.pos,
            reason: reason.into(),
        }
    }

    fn expect(&mut self, ch: char) -> XrepoResult<()> {
        if self.peek() == Some(ch) {
            self.bump();
            Ok(())
        } else {
            Err(self.err(format!("expected '{ch}'")))
        }
    }

    /// Consumes text up to (not including) the first `stop`-set character
    /// encountered at brace depth 0, or to end of input. A `{` at depth 0
    /// always opens a nested region consumed wholesale, regardless of
    /// whether `{`/`}` are in `stop`.
    fn read_segment(&mut self, stop: &[char]) -> &'a str {
        let start = self.pos;
        let mut depth = 0i32;
        while let Some(c) = self.peek() {
            if depth == 0 && stop.contains(&c) {
                break;
            }
            if c == '{' {
                depth += 1;
            } else if c == '}' {
                depth -= 1;
            }
            self.bump();
        }
        &self.input[start..self.pos]
    }
}

/// Parses the multi-repo form: `name '=' Repo ('|' name '=' Repo)*`.
pub fn parse_multi(input: &str) -> XrepoResult<BTreeMap<String, ParsedRepo>> {
    let mut scanner = Scanner::new(input, 0);
    let mut repos = BTreeMap::new();
    loop {
        let name = scanner.read_segment(&['=']).trim().to_string();
        if name.is_empty() {
            return Err(scanner.err("expected a repo name before '='"));
        }
        scanner.expect('=')?;
        let repo_start = scanner.pos;
        let repo_text = scanner.read_segment(&['|']).trim();
        let repo = parse_repo_at(repo_text, scanner.base_offset + repo_start)?;
        repos.insert(name, repo);
        if scanner.peek() == Some('|') {
            scanner.bump();
            while scanner.peek() == Some(' ') {
                scanner.bump();
            }
        } else {
            break;
        }
    }
    Ok(repos)
}

/// Parses a single repo's shorthand: `Kind [':' Directive (';' Directive)*]`.
pub fn parse(input: &str) -> XrepoResult<ParsedRepo> {
    parse_repo_at(input, 0)
}

fn parse_repo_at(input: &str, base_offset: usize) -> XrepoResult<ParsedRepo> {
    let mut scanner = Scanner::new(input, base_offset);
    let kind = parse_kind(&mut scanner)?;
    let mut directives = vec![];
    if scanner.peek() == Some(':') {
        scanner.bump();
        loop {
            let text = scanner.read_segment(&[';']);
            let directive_offset = scanner.base_offset + scanner.pos - text.len();
            directives.push(parse_directive(text, directive_offset)?);
            if scanner.peek() == Some(';') {
                scanner.bump();
            } else {
                break;
            }
        }
    }
    if !scanner.eof() {
        return Err(scanner.err("unexpected trailing input"));
    }
    Ok(ParsedRepo { kind, directives })
}

fn parse_kind(scanner: &mut Scanner) -> XrepoResult<RepoKind> {
    let bare_prefix = if scanner.peek() == Some('%') {
        scanner.bump();
        true
    } else {
        false
    };
    let kind_start = scanner.pos;
    let Some(letter) = scanner.bump() else {
        return Err(scanner.err("expected a repo kind"));
    };
    let kind = match letter {
        'N' => RepoKind::Normal,
        'S' => RepoKind::Sparse,
        'B' => RepoKind::Bare,
        'C' => {
            let name = scanner.read_segment(&[':', '|']);
            if name.is_empty() {
                return Err(scanner.err("'C' kind requires a repo name to clone"));
            }
            RepoKind::CloneOf(name.to_string())
        }
        other => {
            return Err(XrepoError::InvalidShorthand {
                position: scanner.base_offset + kind_start,
                reason: format!("unknown repo kind '{other}'"),
            })
        }
    };
    Ok(if bare_prefix {
        match kind {
            RepoKind::Sparse => RepoKind::BareSparse,
            RepoKind::Normal => RepoKind::Bare,
            other => other,
        }
    } else {
        kind
    })
}

fn parse_directive(text: &str, base_offset: usize) -> XrepoResult<Directive> {
    let mut scanner = Scanner::new(text, base_offset);
    let Some(tag) = scanner.bump() else {
        return Err(scanner.err("empty directive"));
    };
    match tag {
        'C' => parse_commit(&mut scanner),
        'B' => {
            let name = scanner.read_segment(&['=']).to_string();
            scanner.expect('=')?;
            let commit = scanner.read_segment(&[]).to_string();
            Ok(Directive::Branch { name, commit })
        }
        'F' => {
            let name = scanner.read_segment(&['=']).to_string();
            scanner.expect('=')?;
            let commit = scanner.read_segment(&[]).to_string();
            Ok(Directive::Ref { name, commit })
        }
        'H' => {
            let commit = scanner.read_segment(&[]).to_string();
            Ok(Directive::Head {
                commit: if commit.is_empty() { None } else { Some(commit) },
            })
        }
        'K' => {
            let name = scanner.read_segment(&[]).to_string();
            Ok(Directive::CurrentBranch {
                name: if name.is_empty() { None } else { Some(name) },
            })
        }
        'R' => parse_remote(&mut scanner),
        'I' => Ok(Directive::IndexChange {
            changes: parse_path_value_pairs(&mut scanner)?,
        }),
        'W' => {
            let changes = parse_path_value_pairs(&mut scanner)?
                .into_iter()
                .map(|(path, value)| {
                    let content = match value {
                        ShorthandValue::Deleted => None,
                        ShorthandValue::Blob { content, .. } => Some(content),
                        _ => None,
                    };
                    (path, content)
                })
                .collect();
            Ok(Directive::WorkdirChange { changes })
        }
        'O' => {
            let path = scanner.read_segment(&[]).to_string();
            Ok(Directive::OpenChild { path })
        }
        'Q' => parse_sequencer(&mut scanner),
        'T' => {
            let reference = scanner.read_segment(&[':']).to_string();
            scanner.expect(':')?;
            let commit = scanner.read_segment(&['=']).to_string();
            scanner.expect('=')?;
            let message = scanner.read_segment(&[]).to_string();
            Ok(Directive::Note {
                reference,
                commit,
                message,
            })
        }
        other => Err(scanner.err(format!("unknown directive '{other}'"))),
    }
}

fn parse_commit(scanner: &mut Scanner) -> XrepoResult<Directive> {
    let id = scanner.read_segment(&['-', ' ']).to_string();
    if id.is_empty() {
        return Err(scanner.err("commit directive requires an id"));
    }
    let mut parents = vec![];
    if scanner.peek() == Some('-') {
        scanner.bump();
        loop {
            let parent = scanner.read_segment(&[',', ' ']).to_string();
            if parent.is_empty() {
                return Err(scanner.err("expected a parent id"));
            }
            parents.push(parent);
            if scanner.peek() == Some(',') {
                scanner.bump();
            } else {
                break;
            }
        }
    }
    let changes = parse_path_value_pairs(scanner)?;
    Ok(Directive::Commit { id, parents, changes })
}

fn parse_remote(scanner: &mut Scanner) -> XrepoResult<Directive> {
    let name = scanner.read_segment(&['=']).to_string();
    scanner.expect('=')?;
    let repo_ref = scanner.read_segment(&[' ']).to_string();
    let mut branches = vec![];
    while scanner.peek() == Some(' ') {
        scanner.bump();
        let branch = scanner.read_segment(&['=']).to_string();
        scanner.expect('=')?;
        let sha = scanner.read_segment(&[' ']).to_string();
        branches.push((branch, sha));
    }
    Ok(Directive::Remote {
        name,
        repo_ref,
        branches,
    })
}

fn parse_sequencer(scanner: &mut Scanner) -> XrepoResult<Directive> {
    let kind = scanner.read_segment(&['(']).to_string();
    scanner.expect('(')?;
    let target = scanner.read_segment(&[',']).to_string();
    scanner.expect(',')?;
    let original = scanner.read_segment(&[')']).to_string();
    scanner.expect(')')?;
    scanner.expect('[')?;
    let mut commits = vec![];
    loop {
        let commit = scanner.read_segment(&[',', ']']).to_string();
        if !commit.is_empty() {
            commits.push(commit);
        }
        if scanner.peek() == Some(',') {
            scanner.bump();
        } else {
            break;
        }
    }
    scanner.expect(']')?;
    scanner.expect('@')?;
    let index_text = scanner.read_segment(&[]);
    let current_index = index_text
        .parse()
        .map_err(|_| scanner.err("sequencer current_index must be an integer"))?;
    Ok(Directive::Sequencer {
        kind,
        target,
        original,
        commits,
        current_index,
    })
}

/// Parses zero or more leading-space-separated `path=value` pairs, the tail
/// shared by `C`, `I` and `W` directives.
fn parse_path_value_pairs(scanner: &mut Scanner) -> XrepoResult<Vec<(String, ShorthandValue)>> {
    let mut pairs = vec![];
    while scanner.peek() == Some(' ') {
        scanner.bump();
        let path = scanner.read_segment(&['=']).to_string();
        if path.is_empty() {
            return Err(scanner.err("expected a path before '='"));
        }
        scanner.expect('=')?;
        let value_offset = scanner.base_offset + scanner.pos;
        let value_text = scanner.read_segment(&[' ']);
        pairs.push((path, parse_value(value_text, value_offset)?));
    }
    Ok(pairs)
}

fn parse_value(text: &str, base_offset: usize) -> XrepoResult<ShorthandValue> {
    if text.is_empty() {
        return Ok(ShorthandValue::Deleted);
    }
    if let Some(inner) = text.strip_prefix('{').and_then(|t| t.strip_suffix('}')) {
        return Ok(ShorthandValue::NestedChild(Box::new(parse_repo_at(
            inner,
            base_offset + 1,
        )?)));
    }
    if let Some(rest) = text.strip_prefix('S') {
        if let Some(idx) = rest.rfind(':') {
            return Ok(ShorthandValue::ChildPointer {
                url: rest[..idx].to_string(),
                sha: rest[idx + 1..].to_string(),
            });
        }
    }
    let executable = text.ends_with('*');
    let content = if executable { &text[..text.len() - 1] } else { text };
    Ok(ShorthandValue::Blob {
        content: content.to_string(),
        executable,
    })
}

/// Serializes a [`ParsedRepo`] back to canonical shorthand text. Writing
/// then parsing is idempotent; parsing then writing is canonical-form
/// idempotent (it does not preserve incidental whitespace the input may
/// have had, since `read_segment` already strips it on parse).
pub fn write(repo: &ParsedRepo) -> String {
    let mut out = String::new();
    write_kind(&mut out, &repo.kind);
    if !repo.directives.is_empty() {
        out.push(':');
        for (i, directive) in repo.directives.iter().enumerate() {
            if i > 0 {
                out.push(';');
            }
            write_directive(&mut out, directive);
        }
    }
    out
}

pub fn write_multi(repos: &BTreeMap<String, ParsedRepo>) -> String {
    let mut out = String::new();
    for (i, (name, repo)) in repos.iter().enumerate() {
        if i > 0 {
            out.push_str(" | ");
        }
        let _ = write!(out, "{name}={}", write(repo));
    }
    out
}

fn write_kind(out: &mut String, kind: &RepoKind) {
    match kind {
        RepoKind::Normal => out.push('N'),
        RepoKind::Sparse => out.push('S'),
        RepoKind::Bare => out.push('B'),
        RepoKind::BareSparse => out.push_str("%S"),
        RepoKind::CloneOf(name) => {
            out.push('C');
            out.push_str(name);
        }
    }
}

fn write_directive(out: &mut String, directive: &Directive) {
    match directive {
        Directive::Commit { id, parents, changes } => {
            let _ = write!(out, "C{id}");
            if !parents.is_empty() {
                let _ = write!(out, "-{}", parents.join(","));
            }
            write_pairs(out, changes);
        }
        Directive::Branch { name, commit } => {
            let _ = write!(out, "B{name}={commit}");
        }
        Directive::Ref { name, commit } => {
            let _ = write!(out, "F{name}={commit}");
        }
        Directive::Head { commit } => {
            let _ = write!(out, "H{}", commit.as_deref().unwrap_or(""));
        }
        Directive::CurrentBranch { name } => {
            let _ = write!(out, "K{}", name.as_deref().unwrap_or(""));
        }
        Directive::Remote {
            name,
            repo_ref,
            branches,
        } => {
            let _ = write!(out, "R{name}={repo_ref}");
            for (branch, sha) in branches {
                let _ = write!(out, " {branch}={sha}");
            }
        }
        Directive::IndexChange { changes } => {
            out.push('I');
            write_pairs(out, changes);
        }
        Directive::WorkdirChange { changes } => {
            out.push('W');
            for (path, content) in changes {
                let _ = write!(out, " {path}={}", content.as_deref().unwrap_or(""));
            }
        }
        Directive::OpenChild { path } => {
            let _ = write!(out, "O{path}");
        }
        Directive::Sequencer {
            kind,
            target,
            original,
            commits,
            current_index,
        } => {
            let _ = write!(
                out,
                "Q{kind}({target},{original})[{}]@{current_index}",
                commits.join(",")
            );
        }
        Directive::Note {
            reference,
            commit,
            message,
        } => {
            let _ = write!(out, "T{reference}:{commit}={message}");
        }
    }
}

fn write_pairs(out: &mut String, pairs: &[(String, ShorthandValue)]) {
    for (path, value) in pairs {
        out.push(' ');
        let _ = write!(out, "{path}=");
        write_value(out, value);
    }
}

fn write_value(out: &mut String, value: &ShorthandValue) {
    match value {
        ShorthandValue::Deleted => {}
        ShorthandValue::Blob { content, executable } => {
            out.push_str(content);
            if *executable {
                out.push('*');
            }
        }
        ShorthandValue::ChildPointer { url, sha } => {
            let _ = write!(out, "S{url}:{sha}");
        }
        ShorthandValue::NestedChild(repo) => {
            out.push('{');
            out.push_str(&write(repo));
            out.push('}');
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_commit_with_parent_and_path_change() {
        let repo = parse("S:C2-1 x/y/z=meh;Bmaster=2").unwrap();
        assert_eq!(repo.kind, RepoKind::Sparse);
        assert_eq!(
            repo.directives[0],
            Directive::Commit {
                id: "2".to_string(),
                parents: vec!["1".to_string()],
                changes: vec![(
                    "x/y/z".to_string(),
                    ShorthandValue::Blob {
                        content: "meh".to_string(),
                        executable: false
                    }
                )],
            }
        );
        assert_eq!(
            repo.directives[1],
            Directive::Branch {
                name: "master".to_string(),
                commit: "2".to_string(),
            }
        );
    }

    #[test]
    fn parses_child_pointer_value() {
        let repo = parse("S:C3-1 s=Sa:1").unwrap();
        let Directive::Commit { changes, .. } = &repo.directives[0] else {
            panic!("expected commit directive");
        };
        assert_eq!(
            changes[0].1,
            ShorthandValue::ChildPointer {
                url: "a".to_string(),
                sha: "1".to_string()
            }
        );
    }

    #[test]
    fn parses_multi_repo_with_clone_of_and_open_child() {
        let repos = parse_multi("a=B:C2-1;Bfoo=2 | x=Ca").unwrap();
        assert_eq!(repos["a"].kind, RepoKind::Bare);
        assert_eq!(repos["x"].kind, RepoKind::CloneOf("a".to_string()));
    }

    #[test]
    fn parses_remote_directive_with_multiple_branches() {
        let repo = parse("S:Rorigin=b master=1 dev=2").unwrap();
        assert_eq!(
            repo.directives[0],
            Directive::Remote {
                name: "origin".to_string(),
                repo_ref: "b".to_string(),
                branches: vec![
                    ("master".to_string(), "1".to_string()),
                    ("dev".to_string(), "2".to_string())
                ],
            }
        );
    }

    #[test]
    fn round_trips_through_write() {
        let input = "S:C2-1 x/y/z=meh;Bmaster=2";
        let repo = parse(input).unwrap();
        assert_eq!(write(&repo), input);
    }

    #[test]
    fn rejects_unknown_kind_with_position() {
        let err = parse("Z:C1").unwrap_err();
        let XrepoError::InvalidShorthand { position, .. } = err else {
            panic!("expected InvalidShorthand");
        };
        assert_eq!(position, 0);
    }

    #[test]
    fn parses_deletion_and_executable_bit() {
        let repo = parse("S:I a= b=x*").unwrap();
        let Directive::IndexChange { changes } = &repo.directives[0] else {
            panic!("expected index change");
        };
        assert_eq!(changes[0], ("a".to_string(), ShorthandValue::Deleted));
        assert_eq!(
            changes[1],
            (
                "b".to_string(),
                ShorthandValue::Blob {
                    content: "x".to_string(),
                    executable: true
                }
            )
        );
    }

    #[test]
    fn parses_nested_child_in_braces() {
        let repo = parse("S:I s={B:Bmaster=1}").unwrap();
        let Directive::IndexChange { changes } = &repo.directives[0] else {
            panic!("expected index change");
        };
        let ShorthandValue::NestedChild(nested) = &changes[0].1 else {
            panic!("expected nested child");
        };
        assert_eq!(nested.kind, RepoKind::Bare);
    }
}
