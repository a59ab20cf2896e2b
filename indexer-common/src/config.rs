// This file is part of utxo-indexer.
// Copyright (C) 2025 The utxo-indexer authors
// SPDX-License-Identifier: Apache-2.0
// Licensed under the Apache License, Version 2.0 (the "License");
// You may not use this file except in compliance with the License.
// You may obtain a copy of the License at
// http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::Deserialize;
use std::{env, path::Path};

/// Environment variable naming the configuration file.
const CONFIG_FILE_ENV: &str = "INDEXER_CONFIG_FILE";

/// Configuration file used when [CONFIG_FILE_ENV] is not set.
const DEFAULT_CONFIG_FILE: &str = "indexer.yaml";

/// Prefix of environment variable overrides; nesting is expressed with
/// `"__"`, e.g. `INDEXER__SYNCER__NODE_ADDRESS`.
const ENV_PREFIX: &str = "INDEXER__";

/// Loading for configuration structs: a YAML file overlaid with environment
/// variables, so deployments can override single values without editing the
/// file.
pub trait ConfigExt
where
    Self: for<'de> Deserialize<'de>,
{
    /// Load from the file named by the `INDEXER_CONFIG_FILE` environment
    /// variable, or from `indexer.yaml` when it is not set.
    fn load() -> Result<Self, Box<figment::Error>> {
        let config_file =
            env::var(CONFIG_FILE_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_FILE.to_owned());
        Self::load_from(config_file)
    }

    /// Load from the given file, with `INDEXER__` prefixed environment
    /// variables taking precedence over its values. The file must exist.
    fn load_from(path: impl AsRef<Path>) -> Result<Self, Box<figment::Error>> {
        Figment::from(Yaml::file_exact(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .map_err(Box::new)
    }
}

impl<T> ConfigExt for T where T: for<'de> Deserialize<'de> {}
