// Copyright 2023 The Jujutsu Authors
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

//! An in-process [`Backend`] implementation. It's meant to be strict, so
//! that tests catch bugs where the rest of the crate makes the wrong
//! assumptions about what a real backend guarantees (in particular: two
//! trees are never `==` unless every entry is `==`, and ids are genuinely
//! content-derived so two logically-identical writes produce the same id).

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Mutex;

use crate::backend::{Backend, BackendError, BackendResult, Commit, Conflict, Tree};
use crate::object_id::{CommitId, ConflictId, FileId, TreeId};

fn content_hash<T: Hash>(value: &T) -> Vec<u8> {
    let mut hasher = DefaultHasher::new();
    value.hash(&mut hasher);
    hasher.finish().to_be_bytes().to_vec()
}

impl Hash for Tree {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for (name, value) in self.entries() {
            name.value().hash(state);
            format!("{value:?}").hash(state);
        }
    }
}

#[derive(Debug, Default)]
struct MemoryBackendData {
    files: HashMap<FileId, Vec<u8>>,
    trees: HashMap<TreeId, Tree>,
    commits: HashMap<CommitId, Commit>,
    conflicts: HashMap<ConflictId, Conflict>,
}

#[derive(Debug, Default)]
pub struct MemoryBackend {
    data: Mutex<MemoryBackendData>,
    empty_tree_id: TreeId,
}

impl MemoryBackend {
    pub fn init() -> Self {
        let empty_tree_id = TreeId::new(content_hash(&Tree::default()));
        let mut data = MemoryBackendData::default();
        data.trees.insert(empty_tree_id.clone(), Tree::default());
        MemoryBackend {
            data: Mutex::new(data),
            empty_tree_id,
        }
    }
}

impl Backend for MemoryBackend {
    fn empty_tree_id(&self) -> TreeId {
        self.empty_tree_id.clone()
    }

    fn read_file(&self, id: &FileId) -> BackendResult<Vec<u8>> {
        self.data
            .lock()
            .unwrap()
            .files
            .get(id)
            .cloned()
            .ok_or_else(|| BackendError::NotFound(format!("file {id}")))
    }

    fn write_file(&self, contents: &[u8]) -> BackendResult<FileId> {
        let id = FileId::new(content_hash(&contents.to_vec()));
        self.data
            .lock()
            .unwrap()
            .files
            .insert(id.clone(), contents.to_vec());
        Ok(id)
    }

    fn read_tree(&self, id: &TreeId) -> BackendResult<Tree> {
        self.data
            .lock()
            .unwrap()
            .trees
            .get(id)
            .cloned()
            .ok_or_else(|| BackendError::NotFound(format!("tree {id}")))
    }

    fn write_tree(&self, contents: &Tree) -> BackendResult<TreeId> {
        let id = TreeId::new(content_hash(contents));
        self.data
            .lock()
            .unwrap()
            .trees
            .insert(id.clone(), contents.clone());
        Ok(id)
    }

    fn read_commit(&self, id: &CommitId) -> BackendResult<Commit> {
        self.data
            .lock()
            .unwrap()
            .commits
            .get(id)
            .cloned()
            .ok_or_else(|| BackendError::NotFound(format!("commit {id}")))
    }

    fn write_commit(&self, contents: Commit) -> BackendResult<CommitId> {
        // Real backends derive the id from the serialized commit; here a
        // monotonically increasing counter keyed by content length plus
        // parents is sufficient uniqueness for an in-process store, and
        // keeps commit ids legible in test failures via their hex form.
        let mut data = self.data.lock().unwrap();
        let id = CommitId::new(content_hash(&format!(
            "{:?}|{}|{:?}|{}",
            contents.parents,
            contents.root_tree.hex(),
            contents.change_id,
            data.commits.len()
        )));
        data.commits.insert(id.clone(), contents);
        Ok(id)
    }

    fn read_conflict(&self, id: &ConflictId) -> BackendResult<Conflict> {
        self.data
            .lock()
            .unwrap()
            .conflicts
            .get(id)
            .cloned()
            .ok_or_else(|| BackendError::NotFound(format!("conflict {id}")))
    }

    fn write_conflict(&self, contents: &Conflict) -> BackendResult<ConflictId> {
        let id = ConflictId::new(content_hash(&format!("{contents:?}")));
        self.data
            .lock()
            .unwrap()
            .conflicts
            .insert(id.clone(), contents.clone());
        Ok(id)
    }
}
