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

//! Engine-wide configuration, read through the `config` crate the way the
//! teacher's `UserSettings` wraps a `config::Config` rather than parsing its
//! own ad hoc file format.

use crate::backend::Signature as BackendSignature;
use crate::object_model::Signature;

/// Defaults applied when a config key is absent, kept next to the settings
/// struct so every caller sees the same fallback instead of rederiving it.
const DEFAULT_WORK_QUEUE_LIMIT: usize = 8;
const DEFAULT_FABRICATED_NAME: &str = "xrepo";
const DEFAULT_FABRICATED_EMAIL: &str = "xrepo@localhost";

#[derive(Debug, Clone)]
pub struct EngineSettings {
    config: config::Config,
}

impl EngineSettings {
    pub fn from_config(config: config::Config) -> Self {
        EngineSettings { config }
    }

    /// Loads engine configuration with the conventional layering: a
    /// user-level file, overridden by a repo-level file, overridden by
    /// `XREPO_` environment variables.
    pub fn from_sources(
        user_config_path: Option<&std::path::Path>,
        repo_config_path: Option<&std::path::Path>,
    ) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();
        if let Some(path) = user_config_path {
            builder = builder.add_source(
                config::File::from(path)
                    .required(false)
                    .format(config::FileFormat::Toml),
            );
        }
        if let Some(path) = repo_config_path {
            builder = builder.add_source(
                config::File::from(path)
                    .required(false)
                    .format(config::FileFormat::Toml),
            );
        }
        builder = builder.add_source(config::Environment::with_prefix("XREPO").separator("_"));
        Ok(Self::from_config(builder.build()?))
    }

    /// The Work Queue's default concurrency bound. Operations may still
    /// override this with an explicit limit.
    pub fn work_queue_limit(&self) -> usize {
        self.config
            .get_int("work_queue.limit")
            .ok()
            .and_then(|n| usize::try_from(n).ok())
            .unwrap_or(DEFAULT_WORK_QUEUE_LIMIT)
    }

    /// The identity attached to commits the engine fabricates itself
    /// (stash/shadow commits, inner merge commits produced without a user
    /// action).
    pub fn fabricated_identity(&self) -> Signature {
        Signature {
            name: self
                .config
                .get_string("fabricated.name")
                .unwrap_or_else(|_| DEFAULT_FABRICATED_NAME.to_string()),
            email: self
                .config
                .get_string("fabricated.email")
                .unwrap_or_else(|_| DEFAULT_FABRICATED_EMAIL.to_string()),
        }
    }

    pub fn fabricated_backend_identity(&self) -> BackendSignature {
        let sig = self.fabricated_identity();
        BackendSignature {
            name: sig.name,
            email: sig.email,
            timestamp_millis: 0,
        }
    }

    /// The commit message template for stash commits, `{path}` substituted
    /// with the dirty child's repo-relative path.
    pub fn stash_message_template(&self) -> String {
        self.config
            .get_string("stash.message_template")
            .unwrap_or_else(|_| "xrepo stash: {path}".to_string())
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        EngineSettings::from_config(config::Config::default())
    }
}
