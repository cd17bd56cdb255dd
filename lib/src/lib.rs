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

//! Cross-repository operation engine.
//!
//! This crate treats an outer repository and its currently materialized
//! child repositories ("submodules") as a single logical project. It
//! computes a unified status across the outer repository and its children
//! (`status`), drives merge/cherry-pick/rebase across all of them with
//! correct ordering and rollback (`orchestrator`), publishes new content via
//! synthetic anchoring references (`publish`), and exposes an in-memory
//! object model (`object_model`) used by property-style tests.
//!
//! Sub-command dispatch, textual rendering, remote transport, and on-disk
//! object storage primitives are *not* implemented here: this crate depends
//! on a [`backend::Backend`] implementation for the last of those, and
//! leaves the others to an embedding binary.

pub mod backend;
pub mod bridge;
pub mod dag_walk;
pub mod declaration;
pub mod error;
pub mod object_id;
pub mod object_model;
pub mod orchestrator;
pub mod planner;
pub mod publish;
pub mod registry;
pub mod repo_path;
pub mod settings;
pub mod shorthand;
pub mod stash;
pub mod status;
pub mod tree_builder;
pub mod work_queue;

pub use error::{XrepoError, XrepoResult};
