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

//! The interface to the conventional content-addressed Git object model,
//! assumed to be provided by a lower layer. This module only defines that
//! interface (the [`Backend`] trait) plus the small set of
//! value types (`Tree`, `TreeValue`, `Commit`, `Conflict`) the rest of this
//! crate needs to talk about trees and commits; it does not implement a
//! real Git backend. [`memory::MemoryBackend`] is a concrete, in-process
//! implementation used by tests and by `xrepo-testutils`.

pub mod memory;

use std::collections::BTreeMap;
use std::fmt::Debug;

use thiserror::Error;

use crate::object_id::{ChangeId, CommitId, ConflictId, FileId, TreeId};
use crate::repo_path::RepoPathComponent;

#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum BackendError {
    #[error("object not found: {0}")]
    NotFound(String),
    #[error("backend error: {0}")]
    Other(String),
}

pub type BackendResult<T> = Result<T, BackendError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    pub name: String,
    pub email: String,
    /// Milliseconds since epoch. A real backend would also carry a time
    /// zone offset; omitted here since nothing in this crate renders
    /// timestamps for humans.
    pub timestamp_millis: u64,
}

/// One side of a [`Conflict`]: a tree value plus (for removes) the sign it
/// contributes, using an `add`/`remove` list representation of a
/// multi-way conflict rather than a single ancestor/ours/theirs triple, so
/// conflicts surviving a rebase of a rebase stay representable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictPart {
    pub value: TreeValue,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Conflict {
    pub removes: Vec<ConflictPart>,
    pub adds: Vec<ConflictPart>,
}

/// A tree entry value. `GitSubmodule` is this backend's physical
/// counterpart of the AST's logical `ChildPointer`: a child repository's
/// pointed-to commit, recorded at the child's path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TreeValue {
    Normal { id: FileId, executable: bool },
    Symlink(FileId),
    Tree(TreeId),
    GitSubmodule(CommitId),
    Conflict(ConflictId),
}

#[derive(Debug, Default, Clone)]
pub struct Tree {
    entries: BTreeMap<RepoPathComponent, TreeValue>,
}

impl Tree {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> impl Iterator<Item = (&RepoPathComponent, &TreeValue)> {
        self.entries.iter()
    }

    pub fn set(&mut self, name: RepoPathComponent, value: TreeValue) {
        self.entries.insert(name, value);
    }

    pub fn remove(&mut self, name: &RepoPathComponent) {
        self.entries.remove(name);
    }

    pub fn value(&self, name: &RepoPathComponent) -> Option<&TreeValue> {
        self.entries.get(name)
    }
}

#[derive(Debug, Clone)]
pub struct Commit {
    pub parents: Vec<CommitId>,
    pub root_tree: TreeId,
    pub change_id: ChangeId,
    pub description: String,
    pub author: Signature,
    pub committer: Signature,
}

/// The interface a physical object store must satisfy. Every method is a
/// suspension point: a real implementation performs file-system or network
/// I/O; no method here may be called while this crate holds a lock across
/// it.
pub trait Backend: Send + Sync + Debug {
    fn empty_tree_id(&self) -> TreeId;

    fn read_file(&self, id: &FileId) -> BackendResult<Vec<u8>>;

    fn write_file(&self, contents: &[u8]) -> BackendResult<FileId>;

    fn read_tree(&self, id: &TreeId) -> BackendResult<Tree>;

    fn write_tree(&self, contents: &Tree) -> BackendResult<TreeId>;

    fn read_commit(&self, id: &CommitId) -> BackendResult<Commit>;

    fn write_commit(&self, contents: Commit) -> BackendResult<CommitId>;

    fn read_conflict(&self, id: &ConflictId) -> BackendResult<Conflict>;

    fn write_conflict(&self, contents: &Conflict) -> BackendResult<ConflictId>;
}
