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

//! Feeds a scripted chain through the syncer and indexer into an in-memory
//! SQLite store and logs every confirmed block. A wire-level [NodeClient]
//! implementation would replace [ReplayNode] to follow a real node.
//!
//! Run with `RUST_LOG=debug cargo run --example sync`.

use anyhow::Context;
use indexer_common::{error::BoxError, telemetry};
use log::info;
use std::time::Duration;
use utxo_indexer::{
    application::{AddressCheck, BlockIndexer, ChainSyncer, indexer, syncer},
    domain::{
        BlockPoint, ChainSyncEvent, ConfirmedBlock, ConfirmedBlockHandler, Era, NodeTx, RawHeader,
        Tip, Tx, TxInput, TxOutput, storage::Storage,
    },
    infra::{
        node::in_mem::ReplayNode,
        pool::{self, SqlitePool},
        storage::sqlite::SqliteStorage,
    },
};

const WALLET: &str = "addr1_demo_wallet";

/// Logs each confirmed block and drains the unprocessed-transaction queue,
/// like a downstream consumer would.
struct LogHandler {
    storage: SqliteStorage,
}

impl ConfirmedBlockHandler for LogHandler {
    async fn on_block_confirmed(&self, block: &ConfirmedBlock, txs: &[Tx]) -> Result<(), BoxError> {
        info!(
            number = block.point.number,
            slot = block.point.slot,
            hash:% = block.point.hash,
            era:% = block.era,
            all_txs = block.tx_hashes.len(),
            our_txs = txs.len();
            "confirmed block"
        );

        let last_blocks = self.storage.get_latest_confirmed_blocks(5).await?;
        let last_blocks = last_blocks
            .iter()
            .map(|block| block.point.to_string())
            .collect::<Vec<_>>();
        info!(last_blocks:? = last_blocks; "last confirmed blocks");

        let unprocessed = self.storage.get_unprocessed_confirmed_txs(0).await?;
        for tx in &unprocessed {
            info!(hash:% = tx.hash, fee = tx.fee, inputs = tx.inputs.len(); "processed tx");
        }
        self.storage.mark_confirmed_txs_processed(&unprocessed).await?;

        Ok(())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Plain text logs read better for a local replay.
    telemetry::init(telemetry::Config {
        logging_config: telemetry::LoggingConfig { json_format: false },
        ..Default::default()
    });

    let pool = SqlitePool::new(pool::Config::default())
        .await
        .context("create DB pool for Sqlite")?;
    pool.migrate().await.context("run Sqlite migrations")?;
    let storage = SqliteStorage::new(pool);

    let node = ReplayNode::default();
    script_chain(&node);

    let syncer_config = syncer::Config {
        network_magic: 42,
        node_address: "localhost:3001".to_string(),
        restart_on_error: false,
        restart_delay: Duration::from_secs(2),
        keep_alive: true,
    };
    let indexer_config = indexer::Config {
        starting_block_point: None,
        confirmation_block_count: 2,
        addresses_of_interest: vec![WALLET.to_string()],
        address_check: AddressCheck::All,
        keep_all_tx_outputs_in_db: false,
        soft_delete_utxo: false,
        keep_all_tx_hashes_in_block: true,
    };

    let indexer = BlockIndexer::new(
        indexer_config,
        storage.clone(),
        LogHandler {
            storage: storage.clone(),
        },
    );
    let syncer = ChainSyncer::new(syncer_config, node, indexer);
    let mut errors = syncer.errors().context("take error channel")?;

    syncer.sync().await.context("start syncing")?;

    // The replay session ends once the script is drained.
    if let Some(error) = errors.recv().await {
        info!(error:% = error; "session ended");
    }
    syncer.close().await;

    let utxos = storage
        .get_all_tx_outputs(WALLET, true)
        .await
        .context("get wallet utxos")?;
    for entry in &utxos {
        if let Some(output) = &entry.output {
            info!(
                tx:% = entry.input.hash,
                index = entry.input.index,
                amount = output.amount;
                "wallet utxo"
            );
        }
    }

    Ok(())
}

/// Seven blocks from genesis: block 1 funds the demo wallet twice, block 3
/// spends one of the two outputs again.
fn script_chain(node: &ReplayNode) {
    let point = |number: u64| BlockPoint {
        slot: number * 20,
        hash: vec![number as u8 + 1; 32].into(),
        number,
    };

    for number in 0..=6 {
        let point = point(number);
        node.push_event(ChainSyncEvent::RollForward {
            header: RawHeader {
                era_id: Era::Conway.id(),
                slot: point.slot,
                hash: point.hash.clone(),
                number,
            },
            tip: Tip::default(),
        });
        node.put_block_txs(&point.hash, vec![]);
    }

    let funding = NodeTx {
        hash: vec![0xa1; 32].into(),
        fee: 168_000,
        valid: true,
        metadata: None,
        inputs: vec![],
        outputs: vec![
            TxOutput {
                address: WALLET.to_string(),
                amount: 2_500_000,
                ..Default::default()
            },
            TxOutput {
                address: WALLET.to_string(),
                amount: 1_500_000,
                ..Default::default()
            },
        ],
    };
    let spending = NodeTx {
        hash: vec![0xa3; 32].into(),
        fee: 171_000,
        valid: true,
        metadata: None,
        inputs: vec![TxInput {
            hash: funding.hash.clone(),
            index: 1,
        }],
        outputs: vec![TxOutput {
            address: "addr1_somewhere_else".to_string(),
            amount: 1_329_000,
            ..Default::default()
        }],
    };

    node.put_block_txs(&point(1).hash, vec![funding]);
    node.put_block_txs(&point(3).hash, vec![spending]);
}
