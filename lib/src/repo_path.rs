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

//! Slash-separated paths relative to a repository root.
//!
//! Component iteration in root-to-leaf order is the primitive the Tree
//! Builder (`tree_builder`) recurses over, and the primitive the Child-Repo
//! Registry (`registry`) uses to test whether one child's path is nested
//! under another.

use std::fmt;

#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Debug, Hash)]
pub struct RepoPathComponent {
    value: String,
}

impl RepoPathComponent {
    pub fn value(&self) -> &str {
        &self.value
    }
}

impl From<&str> for RepoPathComponent {
    fn from(value: &str) -> Self {
        assert!(!value.contains('/'), "path component must not contain '/'");
        assert!(!value.is_empty(), "path component must not be empty");
        RepoPathComponent {
            value: value.to_owned(),
        }
    }
}

impl fmt::Display for RepoPathComponent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.value)
    }
}

/// An owned, normalized, repo-relative path. The empty path is the
/// repository root.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct RepoPathBuf {
    components: Vec<RepoPathComponent>,
}

impl RepoPathBuf {
    pub fn root() -> Self {
        RepoPathBuf { components: vec![] }
    }

    pub fn from_internal_string(value: &str) -> Self {
        if value.is_empty() {
            return Self::root();
        }
        RepoPathBuf {
            components: value.split('/').map(RepoPathComponent::from).collect(),
        }
    }

    pub fn is_root(&self) -> bool {
        self.components.is_empty()
    }

    pub fn components(&self) -> &[RepoPathComponent] {
        &self.components
    }

    pub fn join(&self, component: &RepoPathComponent) -> RepoPathBuf {
        let mut components = self.components.clone();
        components.push(component.clone());
        RepoPathBuf { components }
    }

    /// Splits into the parent directory and the final component. `None` for
    /// the root.
    pub fn split(&self) -> Option<(RepoPathBuf, &RepoPathComponent)> {
        let (last, rest) = self.components.split_last()?;
        Some((
            RepoPathBuf {
                components: rest.to_vec(),
            },
            last,
        ))
    }

    pub fn parent(&self) -> Option<RepoPathBuf> {
        self.split().map(|(parent, _)| parent)
    }

    /// The leading component, used to group a sparse change set by
    /// top-level component.
    pub fn first_component(&self) -> Option<&RepoPathComponent> {
        self.components.first()
    }

    /// The path with its leading component stripped, or `None` at the root.
    pub fn without_first_component(&self) -> Option<RepoPathBuf> {
        if self.components.is_empty() {
            None
        } else {
            Some(RepoPathBuf {
                components: self.components[1..].to_vec(),
            })
        }
    }

    /// `true` if `other` is this path or nested under it.
    pub fn contains(&self, other: &RepoPathBuf) -> bool {
        other.components.starts_with(&self.components)
    }

    pub fn to_internal_string(&self) -> String {
        self.components
            .iter()
            .map(RepoPathComponent::value)
            .collect::<Vec<_>>()
            .join("/")
    }
}

impl fmt::Display for RepoPathBuf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_internal_string())
    }
}

impl fmt::Debug for RepoPathBuf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RepoPathBuf({:?})", self.to_internal_string())
    }
}

impl From<&str> for RepoPathBuf {
    fn from(value: &str) -> Self {
        RepoPathBuf::from_internal_string(value)
    }
}
