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

mod metrics;

pub mod indexer;
pub mod syncer;

pub use indexer::{AddressCheck, BlockIndexer};
pub use syncer::{ChainSyncer, SyncerState};

use crate::domain::{ConfirmedBlockHandler, NodeClient, storage::Storage};
use anyhow::Context;
use serde::Deserialize;

/// Application configuration: the syncer and indexer halves.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(rename = "syncer")]
    pub syncer_config: syncer::Config,

    #[serde(rename = "indexer")]
    pub indexer_config: indexer::Config,
}

/// Wire the block indexer to a chain syncer and drive the session until it
/// terminates.
///
/// Transient errors are retried inside the syncer when `restart_on_error` is
/// set; only terminal errors reach the error channel and end this function.
pub async fn run<N, S, C>(
    config: Config,
    node: N,
    storage: S,
    confirmed_handler: C,
) -> anyhow::Result<()>
where
    N: NodeClient,
    S: Storage,
    C: ConfirmedBlockHandler,
{
    let Config {
        syncer_config,
        indexer_config,
    } = config;

    let indexer = BlockIndexer::new(indexer_config, storage, confirmed_handler);
    let syncer = ChainSyncer::new(syncer_config, node, indexer);
    let mut errors = syncer
        .errors()
        .context("error channel has already been taken")?;

    syncer.sync().await.context("start chain-sync session")?;

    match errors.recv().await {
        Some(error) => {
            syncer.close().await;
            Err(error).context("chain-sync session terminated")
        }

        None => Ok(()),
    }
}
