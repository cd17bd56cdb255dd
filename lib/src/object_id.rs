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

//! Content-address newtypes.
//!
//! Two parallel universes of ids exist: *logical* ids, used inside the AST
//! and the shorthand grammar, and *physical* ids assigned by
//! a [`crate::backend::Backend`]. The bridge (`crate::bridge`) maintains a
//! bijection between the two per repository; this module only defines the
//! opaque, hashable wrapper type both universes share.

use std::fmt;

macro_rules! id_type {
    ($name:ident) => {
        #[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(Vec<u8>);

        impl $name {
            pub fn new(value: Vec<u8>) -> Self {
                Self(value)
            }

            pub fn from_hex(hex: &str) -> Self {
                Self(hex::decode(hex).expect("valid hex id"))
            }

            pub fn as_bytes(&self) -> &[u8] {
                &self.0
            }

            pub fn hex(&self) -> String {
                hex::encode(&self.0)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.debug_tuple(stringify!($name)).field(&self.hex()).finish()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.hex())
            }
        }

        impl From<&str> for $name {
            /// Builds a deterministic test id from a short label, by padding
            /// the label's bytes so fixtures can write `CommitId::from("2")`
            /// instead of spelling out real hex. Not used outside tests and
            /// the shorthand grammar, which only ever sees labels of this
            /// kind.
            fn from(label: &str) -> Self {
                let mut bytes = label.as_bytes().to_vec();
                bytes.resize(4.max(bytes.len()), 0);
                Self(bytes)
            }
        }
    };
}

id_type!(CommitId);
id_type!(ChangeId);
id_type!(TreeId);
id_type!(FileId);
id_type!(ConflictId);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distinct_labels_are_distinct_ids() {
        assert_ne!(CommitId::from("1"), CommitId::from("2"));
    }

    #[test]
    fn hex_round_trips() {
        let id = CommitId::new(vec![0xab, 0xcd]);
        assert_eq!(CommitId::from_hex(&id.hex()), id);
    }
}
