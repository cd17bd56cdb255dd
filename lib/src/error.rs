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

//! The error taxonomy every fallible operation in this crate returns.

use std::fmt;

use thiserror::Error;

use crate::backend::BackendError;
use crate::repo_path::RepoPathBuf;

/// A single child path paired with the reason it is keeping an operation
/// from proceeding, used by [`XrepoError::Conflict`] and by
/// `status::ensure_clean_and_consistent`'s accumulated refusal reasons.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictingPath {
    pub path: RepoPathBuf,
    pub reason: String,
}

impl fmt::Display for ConflictingPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path, self.reason)
    }
}

/// Expected, user-recoverable failures (`UserError`) are rendered as their
/// message alone; everything else is treated as an internal error and may
/// carry a full trace by the embedding binary.
#[derive(Debug, Error)]
pub enum XrepoError {
    /// Fully recoverable from the user's point of view: a dirty tree, an
    /// unresolvable commit-ish, a missing remote, an invalid path argument.
    #[error("{0}")]
    UserError(String),

    /// An AST constructor precondition was violated. Raised only from the
    /// test/bridge layer.
    #[error("invalid repository shape: {0}")]
    InvalidRepoShape(String),

    /// A shorthand-grammar fixture failed to parse.
    #[error("invalid shorthand at byte {position}: {reason}")]
    InvalidShorthand { position: usize, reason: String },

    /// Propagated from the underlying object store. Fatal unless
    /// specifically caught and converted (e.g. publish catching fetch
    /// failures and converting them to `UserError`).
    #[error("store error: {0}")]
    StoreError(#[from] BackendError),

    /// A structured, non-terminal signal that a cross-repo operation has
    /// paused with conflicts recorded in the outer index. Not "an error" in
    /// the exceptional sense: the orchestrator returns this so the caller
    /// can persist sequencer state and exit with the conventional non-zero
    /// code, rather than unwinding.
    #[error("conflicts in {} path(s)", .0.len())]
    Conflict(Vec<ConflictingPath>),
}

pub type XrepoResult<T> = Result<T, XrepoError>;

impl XrepoError {
    pub fn user<S: Into<String>>(message: S) -> Self {
        XrepoError::UserError(message.into())
    }

    pub fn invalid_shape<S: Into<String>>(detail: S) -> Self {
        XrepoError::InvalidRepoShape(detail.into())
    }

    /// `true` for the variant the orchestrator must render without a stack
    /// trace.
    pub fn is_user_facing(&self) -> bool {
        matches!(self, XrepoError::UserError(_) | XrepoError::Conflict(_))
    }
}
