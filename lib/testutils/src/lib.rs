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

//! Test fixtures shared across `lib/tests/*.rs`: an in-memory `Backend`,
//! a fabricated identity, and a shorthand-to-`Ast` builder (`shorthand_ast`).

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use xrepo_lib::backend::memory::MemoryBackend;
use xrepo_lib::backend::Backend;
use xrepo_lib::bridge::{self, IdBijection};
use xrepo_lib::declaration::{self, Declarations};
use xrepo_lib::error::{XrepoError, XrepoResult};
use xrepo_lib::object_id::CommitId;
use xrepo_lib::object_model::{Commit, Signature};
use xrepo_lib::settings::EngineSettings;

pub mod shorthand_ast;

/// The identity attached to commits test fixtures create directly (outside
/// anything the engine itself fabricates, which goes through
/// [`EngineSettings::fabricated_identity`]).
pub fn test_signature() -> Signature {
    Signature {
        name: "Test User".to_string(),
        email: "test.user@example.com".to_string(),
    }
}

/// Engine settings with every default left in place, suitable whenever a
/// test doesn't care about a specific work-queue limit or message template.
pub fn engine_settings() -> EngineSettings {
    EngineSettings::default()
}

/// A fresh, empty in-memory backend, boxed behind the trait object every
/// production call site expects.
pub fn memory_backend() -> Arc<dyn Backend> {
    Arc::new(MemoryBackend::init())
}

/// Bundles an in-memory backend with the logical/physical id bijection from
/// materializing one `Ast`'s commit graph onto it, the shape most
/// end-to-end tests want: an `Ast` to drive engine operations against, plus
/// a backend to assert the right physical objects got written.
pub struct MaterializedRepo {
    pub backend: Arc<dyn Backend>,
    pub bijection: IdBijection,
}

/// Writes every commit reachable from `heads` onto a fresh in-memory
/// backend. `bridge::write` synthesizes the declaration file itself from
/// each commit's own child pointers, so fixtures never need to supply one.
pub fn materialize(commits: &BTreeMap<CommitId, Commit>, heads: &[CommitId]) -> XrepoResult<MaterializedRepo> {
    let backend = memory_backend();
    let bijection = bridge::write(commits, heads, backend.as_ref())?;
    Ok(MaterializedRepo { backend, bijection })
}

/// Writes `declarations` through [`declaration::write`] to a real temporary
/// file and re-parses the bytes read back off disk, exercising the
/// byte-exact contract the bridge's write path depends on over actual
/// filesystem I/O rather than only the in-memory string round trip
/// `declaration`'s own unit tests cover.
pub fn declaration_round_trip_via_tempfile(declarations: &Declarations) -> XrepoResult<Declarations> {
    use std::io::Write as _;

    let mut file = tempfile::NamedTempFile::new().map_err(|err| XrepoError::user(err.to_string()))?;
    file.write_all(declaration::write(declarations).as_bytes())
        .map_err(|err| XrepoError::user(err.to_string()))?;
    let contents = fs::read_to_string(file.path()).map_err(|err| XrepoError::user(err.to_string()))?;
    declaration::parse(&contents)
}

/// Asserts every `test_*.rs` file under `test_dir` is declared as a `mod` in
/// its `runner.rs`, so a new test file left un-wired never silently fails to
/// run.
pub fn assert_no_forgotten_test_files(test_dir: &Path) {
    let runner_path = test_dir.join("runner.rs");
    let runner = fs::read_to_string(&runner_path).unwrap();
    for entry in fs::read_dir(test_dir).unwrap() {
        let path = entry.unwrap().path();
        let Some(ext) = path.extension() else { continue };
        let name = path.file_stem().unwrap();
        if ext == "rs" && name != "runner" {
            let search = format!("mod {};", name.to_str().unwrap());
            assert!(
                runner.contains(&search),
                "missing `{search}` declaration in {}",
                runner_path.display()
            );
        }
    }
}
