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

//! Component B: the boundary between an [`Ast`]'s logical commit graph and a
//! [`Backend`]'s physical object store.
//!
//! This module bridges exactly the part of an [`Ast`] a `Backend` actually
//! knows about: the `commits` map. Branches, refs, remotes, the index, the
//! working copy, children, and the sequencer have no physical counterpart in
//! the conventional content-addressed Git object model, and are assembled
//! by the Registry (component D), Status Engine (component E) and
//! Orchestrator (component H) from their own sources of truth, not read back
//! out of a `Backend`.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::instrument;

use crate::backend::{Backend, TreeValue};
use crate::dag_walk;
use crate::declaration::{self, Declarations};
use crate::error::{XrepoError, XrepoResult};
use crate::object_id::{CommitId, TreeId};
use crate::object_model::{self, ChangeEntry, Commit, Signature};
use crate::repo_path::{RepoPathBuf, RepoPathComponent};
use crate::tree_builder::TreeBuilder;

/// A per-repository bijection between logical commit ids (as they appear in
/// an [`Ast`](crate::object_model::Ast)) and the physical ids a `Backend`
/// assigned them on write. Every commit a `write` call touches gets an
/// entry, including ones that were already physical (an id that round-trips
/// to itself).
#[derive(Debug, Default, Clone)]
pub struct IdBijection {
    logical_to_physical: BTreeMap<CommitId, CommitId>,
    physical_to_logical: BTreeMap<CommitId, CommitId>,
}

impl IdBijection {
    fn insert(&mut self, logical: CommitId, physical: CommitId) {
        self.physical_to_logical
            .insert(physical.clone(), logical.clone());
        self.logical_to_physical.insert(logical, physical);
    }

    pub fn physical(&self, logical: &CommitId) -> Option<&CommitId> {
        self.logical_to_physical.get(logical)
    }

    pub fn logical(&self, physical: &CommitId) -> Option<&CommitId> {
        self.physical_to_logical.get(physical)
    }
}

/// Writes every commit reachable from `heads` (in `commits`) to `backend`,
/// parents before children, and returns the bijection assigning each
/// logical id its physical counterpart. Idempotent: a commit already
/// present under its content-derived physical id writes to the same id
/// again.
#[instrument(skip(commits, backend))]
pub fn write(
    commits: &BTreeMap<CommitId, Commit>,
    heads: &[CommitId],
    backend: &dyn Backend,
) -> XrepoResult<IdBijection> {
    let order = dag_walk::topo_order_forward(
        heads.iter().cloned(),
        |id: &CommitId| id.clone(),
        |id: &CommitId| {
            commits
                .get(id)
                .map(|c| c.parents.clone())
                .unwrap_or_default()
        },
    );

    let mut bijection = IdBijection::default();
    let mut tree_ids: BTreeMap<CommitId, TreeId> = BTreeMap::new();
    let empty_tree = backend.empty_tree_id();

    for logical_id in order {
        let Some(commit) = commits.get(&logical_id) else {
            continue;
        };
        // TreeBuilder needs an owned `Arc<dyn Backend>`; `backend` here is a
        // borrowed trait object, so route writes through a thin adapter that
        // forwards every call to it.
        let adapter: Arc<dyn Backend> = Arc::new(BorrowedBackend(backend));
        let base_tree = base_tree_id_of(commit, &tree_ids, &empty_tree);
        let mut builder = TreeBuilder::new(adapter, base_tree);
        builder.overlay_snapshot(&commit.changes);
        if let Some(declarations) = declarations_at(commits, &logical_id) {
            builder.set(
                declaration::path(),
                ChangeEntry::Blob {
                    content: declaration::write(&declarations).into_bytes(),
                    executable: false,
                },
            );
        }
        let tree_id = builder.write_tree()?;
        tree_ids.insert(logical_id.clone(), tree_id.clone());

        let physical_parents: Vec<CommitId> = commit
            .parents
            .iter()
            .map(|p| bijection.physical(p).cloned().unwrap_or_else(|| p.clone()))
            .collect();

        let backend_commit = crate::backend::Commit {
            parents: physical_parents,
            root_tree: tree_id,
            change_id: crate::object_id::ChangeId::new(logical_id.as_bytes().to_vec()),
            description: commit.message.clone(),
            author: to_backend_signature(&commit.author),
            committer: to_backend_signature(&commit.committer),
        };
        let physical_id = backend.write_commit(backend_commit)?;
        bijection.insert(logical_id.clone(), physical_id);
    }

    Ok(bijection)
}

/// The declaration file contents for `id`'s rendered tree: every
/// `ChildPointer` reachable at `id` (not just the ones this commit's own
/// sparse change set touches), keyed by path. `None` when `id` has no
/// children at all, so callers skip writing the file entirely rather than
/// writing an empty one.
fn declarations_at(commits: &BTreeMap<CommitId, Commit>, id: &CommitId) -> Option<Declarations> {
    let rendered = object_model::render_commit(commits, id);
    let declarations: Declarations = rendered
        .into_iter()
        .filter_map(|(path, entry)| match entry {
            ChangeEntry::ChildPointer { url, .. } => Some((path.to_internal_string(), url)),
            _ => None,
        })
        .collect();
    if declarations.is_empty() {
        None
    } else {
        Some(declarations)
    }
}

fn base_tree_id_of(
    commit: &Commit,
    tree_ids: &BTreeMap<CommitId, TreeId>,
    empty_tree: &TreeId,
) -> TreeId {
    commit
        .parents
        .first()
        .and_then(|p| tree_ids.get(p))
        .cloned()
        .unwrap_or_else(|| empty_tree.clone())
}

/// Reconstructs the `commits` map reachable from `heads` by walking the
/// backend's commit DAG and diffing each commit's tree against its first
/// parent's tree. Each child pointer's URL is resolved from the declaration
/// file detected at that commit's own root tree (`read_declarations`), since
/// a `TreeValue::GitSubmodule` entry carries only a pointed-to commit id, not
/// a URL; the declaration file itself is never exposed as a `ChangeEntry` --
/// it's plumbing `write` synthesizes and `read` consumes, not part of the
/// logical `Ast`.
#[instrument(skip(backend))]
pub fn read(backend: &dyn Backend, heads: &[CommitId]) -> XrepoResult<BTreeMap<CommitId, Commit>> {
    let mut commits = BTreeMap::new();
    let mut stack: Vec<CommitId> = heads.to_vec();
    let mut seen = std::collections::HashSet::new();
    while let Some(id) = stack.pop() {
        if !seen.insert(id.clone()) {
            continue;
        }
        let backend_commit = backend.read_commit(&id)?;
        for parent in &backend_commit.parents {
            stack.push(parent.clone());
        }
        let base_tree = match backend_commit.parents.first() {
            Some(parent) => backend.read_commit(parent)?.root_tree,
            None => backend.empty_tree_id(),
        };
        let declarations = read_declarations(backend, &backend_commit.root_tree)?;
        let mut changes = BTreeMap::new();
        diff_trees(
            backend,
            &declarations,
            Some(&base_tree),
            &backend_commit.root_tree,
            &RepoPathBuf::root(),
            &mut changes,
        )?;
        commits.insert(
            id,
            Commit {
                parents: backend_commit.parents,
                changes,
                message: backend_commit.description,
                author: to_ast_signature(&backend_commit.author),
                committer: to_ast_signature(&backend_commit.committer),
            },
        );
    }
    Ok(commits)
}

/// Detects and parses the declaration file at a tree's root, if present.
/// Returns an empty map for a tree with no children at all.
fn read_declarations(backend: &dyn Backend, root_tree: &TreeId) -> XrepoResult<Declarations> {
    let tree = backend.read_tree(root_tree)?;
    let component = RepoPathComponent::from(declaration::DECLARATION_FILE_NAME);
    match tree.value(&component) {
        Some(TreeValue::Normal { id, .. }) => {
            let bytes = backend.read_file(id)?;
            declaration::parse(&String::from_utf8_lossy(&bytes))
        }
        _ => Ok(Declarations::new()),
    }
}

fn diff_trees(
    backend: &dyn Backend,
    declarations: &Declarations,
    old: Option<&TreeId>,
    new: &TreeId,
    prefix: &RepoPathBuf,
    out: &mut BTreeMap<RepoPathBuf, ChangeEntry>,
) -> XrepoResult<()> {
    let new_tree = backend.read_tree(new)?;
    let old_tree = match old {
        Some(id) => backend.read_tree(id)?,
        None => crate::backend::Tree::default(),
    };

    let mut components: Vec<&RepoPathComponent> = new_tree
        .entries()
        .map(|(name, _)| name)
        .chain(old_tree.entries().map(|(name, _)| name))
        .collect();
    components.sort();
    components.dedup();

    for name in components {
        // The declaration file is this bridge's own plumbing, synthesized by
        // `write` and consumed by `read_declarations` above; it never
        // appears as a visible change in the reconstructed `Ast`.
        if prefix.is_root() && name.value() == declaration::DECLARATION_FILE_NAME {
            continue;
        }
        let path = prefix.join(name);
        let new_value = new_tree.value(name);
        let old_value = old_tree.value(name);
        if new_value == old_value {
            continue;
        }
        match new_value {
            None => {
                out.insert(path, ChangeEntry::Removed);
            }
            Some(TreeValue::Tree(new_id)) => {
                let old_id = match old_value {
                    Some(TreeValue::Tree(id)) => Some(id),
                    _ => None,
                };
                diff_trees(backend, declarations, old_id, new_id, &path, out)?;
            }
            Some(value) => {
                out.insert(path.clone(), tree_value_to_change_entry(backend, declarations, &path, value)?);
            }
        }
    }
    Ok(())
}

fn tree_value_to_change_entry(
    backend: &dyn Backend,
    declarations: &Declarations,
    path: &RepoPathBuf,
    value: &TreeValue,
) -> XrepoResult<ChangeEntry> {
    match value {
        TreeValue::Normal { id, executable } => Ok(ChangeEntry::Blob {
            content: backend.read_file(id)?,
            executable: *executable,
        }),
        TreeValue::Symlink(id) => Ok(ChangeEntry::Blob {
            content: backend.read_file(id)?,
            executable: false,
        }),
        TreeValue::GitSubmodule(commit_id) => {
            let url = declarations.get(&path.to_internal_string()).cloned().ok_or_else(|| {
                XrepoError::invalid_shape(format!(
                    "child at {path} has no matching declaration entry"
                ))
            })?;
            Ok(ChangeEntry::ChildPointer {
                url,
                commit: Some(commit_id.clone()),
            })
        }
        TreeValue::Conflict(id) => {
            let conflict = backend.read_conflict(id)?;
            let ancestor = conflict
                .removes
                .first()
                .map(|part| tree_value_to_change_entry(backend, declarations, path, &part.value))
                .transpose()?
                .map(Box::new);
            let mut adds = conflict.adds.iter();
            let ours = adds
                .next()
                .map(|part| tree_value_to_change_entry(backend, declarations, path, &part.value))
                .transpose()?
                .ok_or_else(|| XrepoError::invalid_shape("conflict has no sides to project"))?;
            let theirs = adds
                .next()
                .map(|part| tree_value_to_change_entry(backend, declarations, path, &part.value))
                .transpose()?
                .unwrap_or_else(|| ours.clone());
            Ok(ChangeEntry::Conflict {
                ancestor,
                ours: Box::new(ours),
                theirs: Box::new(theirs),
            })
        }
        TreeValue::Tree(_) => unreachable!("directories are handled by the caller's recursion"),
    }
}

fn to_backend_signature(sig: &Signature) -> crate::backend::Signature {
    crate::backend::Signature {
        name: sig.name.clone(),
        email: sig.email.clone(),
        timestamp_millis: 0,
    }
}

fn to_ast_signature(sig: &crate::backend::Signature) -> Signature {
    Signature {
        name: sig.name.clone(),
        email: sig.email.clone(),
    }
}

/// Forwards every [`Backend`] method to a borrowed trait object, so
/// [`TreeBuilder`] (which owns an `Arc<dyn Backend>`) can be driven without
/// requiring callers here to already hold one.
#[derive(Debug)]
struct BorrowedBackend<'a>(&'a dyn Backend);

impl<'a> Backend for BorrowedBackend<'a> {
    fn empty_tree_id(&self) -> TreeId {
        self.0.empty_tree_id()
    }
    fn read_file(&self, id: &crate::object_id::FileId) -> crate::backend::BackendResult<Vec<u8>> {
        self.0.read_file(id)
    }
    fn write_file(&self, contents: &[u8]) -> crate::backend::BackendResult<crate::object_id::FileId> {
        self.0.write_file(contents)
    }
    fn read_tree(&self, id: &TreeId) -> crate::backend::BackendResult<crate::backend::Tree> {
        self.0.read_tree(id)
    }
    fn write_tree(&self, contents: &crate::backend::Tree) -> crate::backend::BackendResult<TreeId> {
        self.0.write_tree(contents)
    }
    fn read_commit(&self, id: &CommitId) -> crate::backend::BackendResult<crate::backend::Commit> {
        self.0.read_commit(id)
    }
    fn write_commit(&self, contents: crate::backend::Commit) -> crate::backend::BackendResult<CommitId> {
        self.0.write_commit(contents)
    }
    fn read_conflict(
        &self,
        id: &crate::object_id::ConflictId,
    ) -> crate::backend::BackendResult<crate::backend::Conflict> {
        self.0.read_conflict(id)
    }
    fn write_conflict(
        &self,
        contents: &crate::backend::Conflict,
    ) -> crate::backend::BackendResult<crate::object_id::ConflictId> {
        self.0.write_conflict(contents)
    }
}

/// The two remaining note-ref formats this bridge persists, on top of the
/// declaration file: a *converted-commit note
/// ref* recording, per original (logical) commit, the physical sha `write`
/// assigned it (or nothing, if `write` never reached it), and a *reference
/// note ref* pairing each physical commit with its origin outer sha and the
/// origin sha of each child it points at -- the provenance a later `read`
/// has no other way to recover, since a `Backend` only ever sees physical
/// ids. Both are derived from an [`IdBijection`] plus the logical `Commit`s
/// it was built from; neither is computed by `write` itself, since not
/// every caller needs them (only publish-adjacent tooling that has to
/// explain a physical commit back to its logical origin).
pub mod notes {
    use std::collections::BTreeMap;

    use serde::{Deserialize, Serialize};

    use super::IdBijection;
    use crate::error::{XrepoError, XrepoResult};
    use crate::object_id::CommitId;
    use crate::object_model::{ChangeEntry, Commit};

    /// Reserved note-ref name for the converted-commit note.
    pub const CONVERTED_COMMIT_NOTE_REF: &str = "refs/notes/xrepo/converted-commits";
    /// Reserved note-ref name for the reference note.
    pub const REFERENCE_NOTE_REF: &str = "refs/notes/xrepo/reference";

    /// JSON payload stored under [`REFERENCE_NOTE_REF`] at a physical
    /// commit's sha: the outer sha it was converted from, and the origin
    /// sha of every child pointer present in that commit's changes.
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct ReferenceNotePayload {
        pub origin_outer: String,
        pub origin_children: BTreeMap<String, String>,
    }

    /// The bytes to store at `original`'s entry in the converted-commit
    /// note: its physical sha as hex, or empty if `write` skipped it
    /// (neither reachable from the heads it was given, nor otherwise
    /// converted).
    pub fn converted_commit_note_value(bijection: &IdBijection, original: &CommitId) -> Vec<u8> {
        bijection
            .physical(original)
            .map(|physical| physical.hex().into_bytes())
            .unwrap_or_default()
    }

    /// Builds the reference-note payload for `original`, pulling each child
    /// pointer's origin sha straight out of its (logical) `Commit`.
    pub fn reference_note_payload(original: &CommitId, commit: &Commit) -> ReferenceNotePayload {
        let origin_children: BTreeMap<String, String> = commit
            .changes
            .iter()
            .filter_map(|(path, entry)| match entry {
                ChangeEntry::ChildPointer {
                    commit: Some(child_commit),
                    ..
                } => Some((path.to_internal_string(), child_commit.hex())),
                _ => None,
            })
            .collect();
        ReferenceNotePayload {
            origin_outer: original.hex(),
            origin_children,
        }
    }

    /// Serializes a [`ReferenceNotePayload`] to the bytes stored under
    /// [`REFERENCE_NOTE_REF`] at the commit's physical sha.
    pub fn encode_reference_note(payload: &ReferenceNotePayload) -> XrepoResult<Vec<u8>> {
        serde_json::to_vec(payload)
            .map_err(|err| XrepoError::invalid_shape(format!("encoding reference note: {err}")))
    }

    /// The inverse of [`encode_reference_note`].
    pub fn decode_reference_note(bytes: &[u8]) -> XrepoResult<ReferenceNotePayload> {
        serde_json::from_slice(bytes)
            .map_err(|err| XrepoError::invalid_shape(format!("decoding reference note: {err}")))
    }

    /// Builds both note refs for every commit `bijection` converted,
    /// keyed by the *physical* sha each note ref is conventionally looked
    /// up by, except the converted-commit note ref, which is keyed by the
    /// original sha it documents a conversion *of*.
    pub fn build_note_maps(
        bijection: &IdBijection,
        commits: &BTreeMap<CommitId, Commit>,
    ) -> XrepoResult<(
        BTreeMap<CommitId, Vec<u8>>,
        BTreeMap<CommitId, Vec<u8>>,
    )> {
        let mut converted = BTreeMap::new();
        let mut reference = BTreeMap::new();
        for (original, commit) in commits {
            converted.insert(
                original.clone(),
                converted_commit_note_value(bijection, original),
            );
            if let Some(physical) = bijection.physical(original) {
                let payload = reference_note_payload(original, commit);
                reference.insert(physical.clone(), encode_reference_note(&payload)?);
            }
        }
        Ok((converted, reference))
    }
}
