// Copyright 2020 The Jujutsu Authors
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

//! Writes a full `ChangeEntry` snapshot (as produced by [`crate::object_model::Ast::render_commit`]
//! or [`crate::object_model::render_index`]) onto a backend as a tree, by
//! overlaying the snapshot's entries onto a base tree and writing only the
//! subtrees whose contents actually changed.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::backend::{Backend, BackendResult, Conflict, ConflictPart, Tree, TreeValue};
use crate::object_model::ChangeEntry;
use crate::repo_path::{RepoPathBuf, RepoPathComponent};

enum Override {
    Tombstone,
    Replace(ChangeEntry),
}

/// Builds a tree by overlaying path overrides onto a base tree. One instance
/// is used per render: construct it, set or remove every path the snapshot
/// names relative to the base, then call [`TreeBuilder::write_tree`].
pub struct TreeBuilder {
    backend: Arc<dyn Backend>,
    base_tree_id: crate::object_id::TreeId,
    overrides: BTreeMap<RepoPathBuf, Override>,
}

impl TreeBuilder {
    pub fn new(backend: Arc<dyn Backend>, base_tree_id: crate::object_id::TreeId) -> Self {
        TreeBuilder {
            backend,
            base_tree_id,
            overrides: BTreeMap::new(),
        }
    }

    pub fn set(&mut self, path: RepoPathBuf, value: ChangeEntry) {
        assert!(!path.is_root());
        self.overrides.insert(path, Override::Replace(value));
    }

    pub fn remove(&mut self, path: RepoPathBuf) {
        assert!(!path.is_root());
        self.overrides.insert(path, Override::Tombstone);
    }

    /// Convenience for callers holding a full rendered snapshot: every path
    /// in `snapshot` is set, and nothing else is touched (the base tree
    /// supplies paths the snapshot doesn't mention). Callers that need
    /// deletions relative to a *different* base must call [`Self::remove`]
    /// themselves for paths present in the base but absent from `snapshot`.
    pub fn overlay_snapshot(&mut self, snapshot: &BTreeMap<RepoPathBuf, ChangeEntry>) {
        for (path, entry) in snapshot {
            self.set(path.clone(), entry.clone());
        }
    }

    /// Writes every tree touched by an override, in reverse lexicographic
    /// order (children before parents), and returns the new root tree id.
    /// Returns the unchanged base tree id if there are no overrides.
    pub fn write_tree(self) -> BackendResult<crate::object_id::TreeId> {
        if self.overrides.is_empty() {
            return Ok(self.base_tree_id);
        }

        let backend = self.backend.clone();
        let mut trees_to_write = self.get_base_trees()?;

        for (path, over) in self.overrides {
            let (dir, basename) = path.split().expect("non-root path has a parent");
            let tree = trees_to_write.get_mut(&dir).expect("dir was populated");
            match over {
                Override::Replace(entry) => {
                    let value = write_change_entry(backend.as_ref(), &entry)?;
                    tree.set(basename.clone(), value);
                }
                Override::Tombstone => {
                    tree.remove(basename);
                }
            }
        }

        while let Some((dir, tree)) = trees_to_write.pop_last() {
            if let Some((parent, basename)) = dir.split() {
                let basename = basename.clone();
                let parent_tree = trees_to_write.get_mut(&parent).expect("parent populated");
                if tree.is_empty() {
                    if let Some(TreeValue::Tree(_)) = parent_tree.value(&basename) {
                        parent_tree.remove(&basename);
                    }
                } else {
                    let tree_id = backend.write_tree(&tree)?;
                    parent_tree.set(basename, TreeValue::Tree(tree_id));
                }
            } else {
                debug_assert!(trees_to_write.is_empty());
                return backend.write_tree(&tree);
            }
        }

        unreachable!("trees_to_write must contain the root tree");
    }

    fn get_base_trees(&self) -> BackendResult<BTreeMap<RepoPathBuf, Tree>> {
        let backend = &self.backend;
        let root = backend.read_tree(&self.base_tree_id)?;
        let mut tree_cache = BTreeMap::from([(RepoPathBuf::root(), root)]);

        fn populate<'a>(
            cache: &'a mut BTreeMap<RepoPathBuf, Tree>,
            backend: &Arc<dyn Backend>,
            dir: &RepoPathBuf,
        ) -> BackendResult<&'a Tree> {
            if cache.contains_key(dir) {
                return Ok(cache.get(dir).unwrap());
            }
            let (parent, basename) = dir.split().expect("root must already be populated");
            let tree = match populate(cache, backend, &parent)?.value(&basename) {
                Some(TreeValue::Tree(id)) => backend.read_tree(id)?,
                _ => Tree::default(),
            };
            Ok(cache.entry(dir.clone()).or_insert(tree))
        }

        for path in self.overrides.keys() {
            let parent = path.parent().expect("override path has a parent");
            populate(&mut tree_cache, backend, &parent)?;
        }

        Ok(tree_cache)
    }
}

/// Converts one rendered [`ChangeEntry`] into its physical [`TreeValue`],
/// writing blob/conflict content to the backend as needed.
fn write_change_entry(backend: &dyn Backend, entry: &ChangeEntry) -> BackendResult<TreeValue> {
    match entry {
        ChangeEntry::Blob { content, executable } => {
            let id = backend.write_file(content)?;
            Ok(TreeValue::Normal {
                id,
                executable: *executable,
            })
        }
        ChangeEntry::ChildPointer { commit, .. } => {
            let commit = commit
                .clone()
                .expect("a rendered snapshot never contains a null child pointer");
            Ok(TreeValue::GitSubmodule(commit))
        }
        ChangeEntry::Removed => {
            unreachable!("Removed entries are filtered out before reaching the tree, not written")
        }
        ChangeEntry::Conflict { ancestor, ours, theirs } => {
            let mut conflict = Conflict::default();
            if let Some(ancestor) = ancestor {
                conflict.removes.push(ConflictPart {
                    value: write_change_entry(backend, ancestor)?,
                });
            }
            conflict.adds.push(ConflictPart {
                value: write_change_entry(backend, ours)?,
            });
            conflict.adds.push(ConflictPart {
                value: write_change_entry(backend, theirs)?,
            });
            let id = backend.write_conflict(&conflict)?;
            Ok(TreeValue::Conflict(id))
        }
    }
}
