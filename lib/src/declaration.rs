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

//! The declaration file at an outer repository's root: `[child "path"] url
//! = <url>` stanzas per declared child.
//!
//! Parsing and writing must be byte-exact with the underlying ecosystem's
//! conventional file of this shape, so the bridge's write path can
//! synthesize it and the registry (component D) can read it back without
//! drift. On write, stanzas are normalized to lexicographic child-path
//! order regardless of the input map's iteration order, so two writes of a
//! logically-equal declaration are byte-identical.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use crate::error::{XrepoError, XrepoResult};
use crate::repo_path::RepoPathBuf;

/// One declared child, keyed by its repo-relative path.
pub type Declarations = BTreeMap<String, String>;

/// The declaration file's name at the outer repository's root. The bridge
/// writes it as a plain blob at this path in every commit whose rendered
/// tree contains at least one child pointer, and reads it back from that
/// same path to recover child URLs rather than from any caller-supplied map.
pub const DECLARATION_FILE_NAME: &str = ".xrepo-children";

/// The declaration file's repo-relative path.
pub fn path() -> RepoPathBuf {
    RepoPathBuf::from(DECLARATION_FILE_NAME)
}

/// Parses a declaration file's byte-exact contents.
pub fn parse(contents: &str) -> XrepoResult<Declarations> {
    let mut declarations = Declarations::new();
    let mut current_path: Option<String> = None;
    for (line_no, raw_line) in contents.lines().enumerate() {
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }
        if let Some(path) = parse_header(line) {
            if declarations.contains_key(&path) {
                return Err(XrepoError::user(format!(
                    "declaration file line {}: duplicate child {path:?}",
                    line_no + 1
                )));
            }
            current_path = Some(path);
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            return Err(XrepoError::user(format!(
                "declaration file line {}: expected `key = value`, got {line:?}",
                line_no + 1
            )));
        };
        let key = key.trim();
        let value = value.trim();
        if key != "url" {
            return Err(XrepoError::user(format!(
                "declaration file line {}: unsupported key {key:?}",
                line_no + 1
            )));
        }
        let Some(path) = &current_path else {
            return Err(XrepoError::user(format!(
                "declaration file line {}: `url` outside of a `[child \"path\"]` stanza",
                line_no + 1
            )));
        };
        declarations.insert(path.clone(), value.to_string());
    }
    Ok(declarations)
}

fn parse_header(line: &str) -> Option<String> {
    let rest = line.strip_prefix("[child \"")?;
    let end = rest.find('"')?;
    let (path, tail) = rest.split_at(end);
    if tail.trim_start_matches('"').trim() != "]" {
        return None;
    }
    Some(path.to_string())
}

/// Serializes declarations byte-exactly, one stanza per child, in
/// lexicographic path order.
pub fn write(declarations: &Declarations) -> String {
    let mut out = String::new();
    for (path, url) in declarations {
        let _ = writeln!(out, "[child \"{path}\"]");
        let _ = writeln!(out, "\turl = {url}");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use maplit::btreemap;

    #[test]
    fn parses_single_stanza() {
        let contents = "[child \"libs/s\"]\n\turl = ../s\n";
        let parsed = parse(contents).unwrap();
        assert_eq!(parsed, btreemap! { "libs/s".to_string() => "../s".to_string() });
    }

    #[test]
    fn round_trips_multiple_children_in_sorted_order() {
        let declarations = btreemap! {
            "z".to_string() => "url-z".to_string(),
            "a".to_string() => "url-a".to_string(),
        };
        let written = write(&declarations);
        assert_eq!(
            written,
            "[child \"a\"]\n\turl = url-a\n[child \"z\"]\n\turl = url-z\n"
        );
        assert_eq!(parse(&written).unwrap(), declarations);
    }

    #[test]
    fn rejects_url_outside_stanza() {
        assert!(parse("url = oops\n").is_err());
    }

    #[test]
    fn rejects_duplicate_child() {
        let contents = "[child \"s\"]\n\turl = a\n[child \"s\"]\n\turl = b\n";
        assert!(parse(contents).is_err());
    }

    #[test]
    fn ignores_blank_lines_and_comments() {
        let contents = "# comment\n\n[child \"s\"]\n\turl = a\n\n";
        assert_eq!(parse(contents).unwrap(), btreemap! { "s".to_string() => "a".to_string() });
    }
}
