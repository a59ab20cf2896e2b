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

//! End-to-end scenarios: a scripted node feeds the chain syncer, which drives
//! the block indexer against a real (in-memory) SQLite store.

use assert_matches::assert_matches;
use indexer_common::error::BoxError;
use std::{
    sync::{Arc, Mutex},
    time::Duration,
};
use utxo_indexer::{
    application::{AddressCheck, BlockIndexer, ChainSyncer, indexer, syncer},
    domain::{
        BlockPoint, ChainSyncEvent, ConfirmedBlock, ConfirmedBlockHandler, Era, Intersection,
        NodeTx, RawHeader, Tip, Tx, TxInput, TxOutput, storage::Storage,
    },
    infra::{
        node::in_mem::ReplayNode,
        pool::{self, SqlitePool},
        storage::sqlite::SqliteStorage,
    },
};

const WALLET: &str = "addr1_watched_wallet";

fn syncer_config(restart_on_error: bool) -> syncer::Config {
    syncer::Config {
        network_magic: 42,
        node_address: "localhost:3001".to_string(),
        restart_on_error,
        restart_delay: Duration::from_millis(10),
        keep_alive: true,
    }
}

fn indexer_config(confirmation_block_count: usize) -> indexer::Config {
    indexer::Config {
        starting_block_point: Some(point(0)),
        confirmation_block_count,
        addresses_of_interest: vec![WALLET.to_string()],
        address_check: AddressCheck::All,
        keep_all_tx_outputs_in_db: false,
        soft_delete_utxo: false,
        keep_all_tx_hashes_in_block: false,
    }
}

fn point(number: u64) -> BlockPoint {
    BlockPoint {
        slot: number * 10,
        hash: vec![number as u8; 32].into(),
        number,
    }
}

fn forward(number: u64) -> ChainSyncEvent {
    let point = point(number);
    ChainSyncEvent::RollForward {
        header: RawHeader {
            era_id: Era::Conway.id(),
            slot: point.slot,
            hash: point.hash,
            number,
        },
        tip: Tip::default(),
    }
}

fn backward(point: BlockPoint) -> ChainSyncEvent {
    ChainSyncEvent::RollBackward {
        point,
        tip: Tip::default(),
    }
}

fn pay_to(tag: u8, address: &str, amount: u64) -> NodeTx {
    NodeTx {
        hash: vec![tag; 32].into(),
        fee: 170_000,
        valid: true,
        metadata: None,
        inputs: vec![],
        outputs: vec![TxOutput {
            address: address.to_string(),
            amount,
            ..Default::default()
        }],
    }
}

fn spend(tag: u8, input: TxInput, address: &str, amount: u64) -> NodeTx {
    NodeTx {
        inputs: vec![input],
        ..pay_to(tag, address, amount)
    }
}

#[derive(Clone, Default)]
struct Recorder(Arc<Mutex<Vec<(ConfirmedBlock, Vec<Tx>)>>>);

impl Recorder {
    fn confirmed(&self) -> Vec<(ConfirmedBlock, Vec<Tx>)> {
        self.0.lock().unwrap().clone()
    }

    fn confirmed_numbers(&self) -> Vec<u64> {
        self.confirmed()
            .iter()
            .map(|(block, _)| block.point.number)
            .collect()
    }
}

impl ConfirmedBlockHandler for Recorder {
    async fn on_block_confirmed(&self, block: &ConfirmedBlock, txs: &[Tx]) -> Result<(), BoxError> {
        self.0.lock().unwrap().push((block.clone(), txs.to_vec()));
        Ok(())
    }
}

async fn sqlite_storage() -> SqliteStorage {
    let pool = SqlitePool::new(pool::Config::default())
        .await
        .expect("pool can be created");
    pool.migrate().await.expect("migrations run");
    SqliteStorage::new(pool)
}

/// Run the syncer over the scripted node until the script is drained, then
/// close it. Returns the terminal error.
async fn drive(
    node: ReplayNode,
    storage: SqliteStorage,
    recorder: Recorder,
    syncer_config: syncer::Config,
    indexer_config: indexer::Config,
) -> indexer_common::error::ChainError {
    let indexer = BlockIndexer::new(indexer_config, storage, recorder);
    let syncer = ChainSyncer::new(syncer_config, node, indexer);
    let mut errors = syncer.errors().expect("error channel can be taken");

    syncer.sync().await.expect("sync succeeds");
    let error = tokio::time::timeout(Duration::from_secs(5), errors.recv())
        .await
        .expect("terminal error arrives in time")
        .expect("error channel is open");
    syncer.close().await;

    error
}

#[tokio::test]
async fn test_confirmation_pipeline() {
    let node = ReplayNode::default();
    let storage = sqlite_storage().await;
    let recorder = Recorder::default();

    // Block 1 pays the wallet, block 3 spends that output again; every other
    // block is empty.
    let funding = pay_to(0xa1, WALLET, 1_000_000);
    let funded = TxInput {
        hash: funding.hash.clone(),
        index: 0,
    };
    let spending = spend(0xa3, funded.clone(), "addr1_elsewhere", 900_000);

    for number in 1..=8 {
        node.push_event(forward(number));
        node.put_block_txs(&point(number).hash, vec![]);
    }
    node.put_block_txs(&point(1).hash, vec![funding]);
    node.put_block_txs(
        &point(3).hash,
        vec![pay_to(0xbb, "addr1_unrelated", 5), spending],
    );

    let error = drive(
        node,
        storage.clone(),
        recorder.clone(),
        syncer_config(false),
        indexer_config(3),
    )
    .await;
    assert!(!error.is_fatal());

    // Headers 1..=8 with a window of 3 confirm blocks 1..=5.
    assert_eq!(recorder.confirmed_numbers(), vec![1, 2, 3, 4, 5]);

    let confirmed = recorder.confirmed();
    assert_eq!(confirmed[0].1.len(), 1);
    assert_eq!(confirmed[0].1[0].hash, vec![0xa1u8; 32].into());

    // The spend in block 3 is of interest by its input, which arrives
    // resolved to the funding output.
    assert_eq!(confirmed[2].1.len(), 1);
    let spend_tx = &confirmed[2].1[0];
    assert_eq!(spend_tx.index_in_block, 1);
    assert_matches!(
        spend_tx.inputs.as_slice(),
        [entry] if entry.input == funded
            && entry.output.as_ref().is_some_and(|output| output.address == WALLET)
    );

    // The funding output was consumed again.
    assert_eq!(storage.get_tx_output(&funded).await.expect("get"), None);

    // The resume point tracks the newest confirmed block.
    assert_eq!(
        storage.get_latest_block_point().await.expect("point"),
        Some(point(5))
    );

    let blocks = storage
        .get_latest_confirmed_blocks(10)
        .await
        .expect("blocks");
    assert_eq!(blocks.len(), 5);

    let unprocessed = storage
        .get_unprocessed_confirmed_txs(0)
        .await
        .expect("unprocessed");
    assert_eq!(unprocessed.len(), 2);
}

#[tokio::test]
async fn test_resume_from_store() {
    let node = ReplayNode::default();
    let storage = sqlite_storage().await;

    for number in 1..=5 {
        node.push_event(forward(number));
        node.put_block_txs(&point(number).hash, vec![]);
    }

    let error = drive(
        node,
        storage.clone(),
        Recorder::default(),
        syncer_config(false),
        indexer_config(3),
    )
    .await;
    assert!(!error.is_fatal());

    // A fresh indexer over the same store resumes past the confirmed blocks.
    let node = ReplayNode::default();
    let indexer = BlockIndexer::new(indexer_config(3), storage, Recorder::default());
    let syncer = ChainSyncer::new(syncer_config(false), node.clone(), indexer);
    syncer.sync().await.expect("sync succeeds");
    syncer.close().await;

    let resume = point(2);
    let intersect = Intersection::Point {
        slot: resume.slot,
        hash: resume.hash,
    };
    assert_matches!(
        node.last_connect_options(),
        Some(options) if options.intersect == intersect
    );
}

#[tokio::test]
async fn test_rollback_inside_window() {
    let node = ReplayNode::default();
    let storage = sqlite_storage().await;
    let recorder = Recorder::default();

    for number in 1..=4 {
        node.push_event(forward(number));
        node.put_block_txs(&point(number).hash, vec![]);
    }
    // The node drops block 4 again and serves a different continuation.
    node.push_event(backward(point(3)));
    let replacement = BlockPoint {
        slot: 41,
        hash: vec![0x44; 32].into(),
        number: 4,
    };
    node.push_event(ChainSyncEvent::RollForward {
        header: RawHeader {
            era_id: Era::Conway.id(),
            slot: replacement.slot,
            hash: replacement.hash.clone(),
            number: 0, // boundary-style, reconciled to 4
        },
        tip: Tip::default(),
    });
    node.put_block_txs(&replacement.hash, vec![]);
    for number in 5..=7 {
        node.push_event(forward(number));
        node.put_block_txs(&point(number).hash, vec![]);
    }

    let error = drive(
        node,
        storage.clone(),
        recorder.clone(),
        syncer_config(false),
        indexer_config(3),
    )
    .await;
    assert!(!error.is_fatal());

    // 1 confirmed before the rollback, 2..=4 after it.
    assert_eq!(recorder.confirmed_numbers(), vec![1, 2, 3, 4]);

    // The replacement block 4 is the one that got confirmed.
    let confirmed_4 = &recorder.confirmed()[3].0;
    assert_eq!(confirmed_4.point, replacement);

    let blocks = storage
        .get_confirmed_blocks_from(0, 10)
        .await
        .expect("blocks");
    let slots = blocks
        .iter()
        .map(|block| block.point.slot)
        .collect::<Vec<_>>();
    assert_eq!(slots, vec![10, 20, 30, 41]);
}

#[tokio::test]
async fn test_rollback_past_confirmation_is_fatal() {
    let node = ReplayNode::default();
    let storage = sqlite_storage().await;
    let recorder = Recorder::default();

    for number in 1..=4 {
        node.push_event(forward(number));
        node.put_block_txs(&point(number).hash, vec![]);
    }
    let unknown = BlockPoint {
        slot: 5,
        hash: vec![0xff; 32].into(),
        number: 0,
    };
    node.push_event(backward(unknown));
    // Never reached: the rollback is fatal, restart_on_error or not.
    node.push_event(forward(5));
    node.put_block_txs(&point(5).hash, vec![]);

    let error = drive(
        node,
        storage.clone(),
        recorder.clone(),
        syncer_config(true),
        indexer_config(3),
    )
    .await;
    assert!(error.is_fatal());

    assert_eq!(recorder.confirmed_numbers(), vec![1]);
    assert_eq!(
        storage.get_latest_block_point().await.expect("point"),
        Some(point(1))
    );
}
