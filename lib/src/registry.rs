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

//! Component D: the Child-Repo Registry. Enumerates children declared at a
//! commit or in the index, tracks which are open (materialized) vs closed,
//! opens a closed child on demand, and resolves a child's relative URL
//! against the outer repository's own remote.
//!
//! One [`Registry`] is scoped to a single outer operation -- open child
//! handles are tracked here and closed when that operation ends, matching
//! a per-operation `Workspace` handle lifetime rather than a process-wide
//! cache.

use std::collections::BTreeMap;
use std::sync::Mutex;

use tracing::{debug, instrument};

use crate::error::{XrepoError, XrepoResult};
use crate::object_model::{Ast, ChangeEntry};
use crate::repo_path::RepoPathBuf;

/// One declared child: its declared URL and, if open, its materialized
/// [`Ast`] handle.
#[derive(Debug, Clone)]
pub struct ChildHandle {
    pub url: String,
    pub ast: Option<Ast>,
}

impl ChildHandle {
    pub fn is_open(&self) -> bool {
        self.ast.is_some()
    }
}

/// Opens children without materializing worktrees, for server-side batch
/// operations ("force-bare" mode).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    Normal,
    ForceBare,
}

/// Scoped to one outer operation. Construct from a rendered snapshot (the
/// outer head tree or index) plus the declaration file's URL map; call
/// [`Registry::open`] on demand as children are touched.
#[derive(Debug)]
pub struct Registry {
    declared: BTreeMap<RepoPathBuf, String>,
    open: Mutex<BTreeMap<RepoPathBuf, ChildHandle>>,
}

impl Registry {
    /// Enumerates declared children from a rendered snapshot: every path
    /// whose `ChangeEntry` is a `ChildPointer`.
    pub fn from_snapshot(snapshot: &BTreeMap<RepoPathBuf, ChangeEntry>) -> Self {
        let declared = snapshot
            .iter()
            .filter_map(|(path, entry)| match entry {
                ChangeEntry::ChildPointer { url, .. } => Some((path.clone(), url.clone())),
                _ => None,
            })
            .collect();
        Registry {
            declared,
            open: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn declared_children(&self) -> impl Iterator<Item = (&RepoPathBuf, &str)> {
        self.declared.iter().map(|(path, url)| (path, url.as_str()))
    }

    pub fn is_declared(&self, path: &RepoPathBuf) -> bool {
        self.declared.contains_key(path)
    }

    pub fn is_open(&self, path: &RepoPathBuf) -> bool {
        self.open.lock().unwrap().contains_key(path)
    }

    /// Opens the child at `path`, materializing it via `materialize` unless
    /// `mode` is [`OpenMode::ForceBare`]. Idempotent: a second call for an
    /// already-open child returns the existing handle without calling
    /// `materialize` again. Atomic under failure: if `materialize` fails,
    /// no handle is recorded, so the child is observed as closed afterward.
    #[instrument(skip(self, materialize))]
    pub fn open<F>(&self, path: &RepoPathBuf, mode: OpenMode, materialize: F) -> XrepoResult<ChildHandle>
    where
        F: FnOnce(&str) -> XrepoResult<Ast>,
    {
        let mut open = self.open.lock().unwrap();
        if let Some(existing) = open.get(path) {
            debug!(%path, "child already open, returning cached handle");
            return Ok(existing.clone());
        }
        let Some(url) = self.declared.get(path) else {
            return Err(XrepoError::user(format!("{path} is not a declared child")));
        };
        let handle = match mode {
            OpenMode::ForceBare => ChildHandle {
                url: url.clone(),
                ast: None,
            },
            OpenMode::Normal => {
                let ast = materialize(url)?;
                ChildHandle {
                    url: url.clone(),
                    ast: Some(ast),
                }
            }
        };
        open.insert(path.clone(), handle.clone());
        Ok(handle)
    }

    /// Closes the child at `path`, dropping its handle. A no-op if the
    /// child isn't open. Called for every remaining open child when the
    /// outer operation ends.
    pub fn close(&self, path: &RepoPathBuf) {
        self.open.lock().unwrap().remove(path);
    }

    pub fn close_all(&self) {
        self.open.lock().unwrap().clear();
    }

    /// Resolves a child's relative URL (`./x`, `../y`) against the outer
    /// repository's configured remote URL. An absolute URL (anything not
    /// starting with `.`) is returned unchanged.
    pub fn resolve_url(outer_remote_url: &str, child_url: &str) -> String {
        if !child_url.starts_with('.') {
            return child_url.to_string();
        }
        let mut base_segments: Vec<&str> = outer_remote_url.trim_end_matches('/').split('/').collect();
        // Drop the outer repo's own path segment: a relative child URL is
        // resolved against the outer remote's *parent* the way a relative
        // git submodule URL is resolved against the superproject's remote.
        base_segments.pop();
        for segment in child_url.split('/') {
            match segment {
                "." | "" => {}
                ".." => {
                    base_segments.pop();
                }
                other => base_segments.push(other),
            }
        }
        base_segments.join("/")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object_id::CommitId;
    use maplit::btreemap;

    fn snapshot() -> BTreeMap<RepoPathBuf, ChangeEntry> {
        btreemap! {
            RepoPathBuf::from("libs/s") => ChangeEntry::ChildPointer {
                url: "./s".to_string(),
                commit: Some(CommitId::from("1")),
            },
        }
    }

    #[test]
    fn enumerates_declared_children_from_a_snapshot() {
        let registry = Registry::from_snapshot(&snapshot());
        assert!(registry.is_declared(&RepoPathBuf::from("libs/s")));
        assert!(!registry.is_declared(&RepoPathBuf::from("libs/other")));
    }

    #[test]
    fn open_is_idempotent() {
        let registry = Registry::from_snapshot(&snapshot());
        let path = RepoPathBuf::from("libs/s");
        let mut calls = 0;
        let ast = || -> XrepoResult<Ast> {
            Ast::new(
                BTreeMap::new(),
                BTreeMap::new(),
                BTreeMap::new(),
                None,
                None,
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
        };
        registry.open(&path, OpenMode::Normal, |_| { calls += 1; ast() }).unwrap();
        registry.open(&path, OpenMode::Normal, |_| { calls += 1; ast() }).unwrap();
        assert_eq!(calls, 1);
    }

    #[test]
    fn open_is_atomic_on_failure() {
        let registry = Registry::from_snapshot(&snapshot());
        let path = RepoPathBuf::from("libs/s");
        let err = registry.open(&path, OpenMode::Normal, |_| Err(XrepoError::user("clone failed")));
        assert!(err.is_err());
        assert!(!registry.is_open(&path));
    }

    #[test]
    fn force_bare_skips_materialization() {
        let registry = Registry::from_snapshot(&snapshot());
        let path = RepoPathBuf::from("libs/s");
        let handle = registry
            .open(&path, OpenMode::ForceBare, |_| panic!("must not materialize"))
            .unwrap();
        assert!(!handle.is_open());
    }

    #[test]
    fn resolves_relative_urls_against_outer_remote() {
        assert_eq!(
            Registry::resolve_url("https://example.com/org/outer.git", "./s"),
            "https://example.com/org/s"
        );
        assert_eq!(
            Registry::resolve_url("https://example.com/org/outer.git", "../other/s"),
            "https://example.com/other/s"
        );
        assert_eq!(
            Registry::resolve_url("https://example.com/org/outer.git", "https://elsewhere/s"),
            "https://elsewhere/s"
        );
    }
}
