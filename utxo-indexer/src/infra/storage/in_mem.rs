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

use crate::domain::{
    BlockPoint, ConfirmedBlock, Tx, TxInput, TxInputOutput, TxOutput,
    storage::{Storage, StorageError, WriteTx},
};
use parking_lot::RwLock;
use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
};

/// In-memory implementation of [Storage], organized like an embedded
/// key-value backend would be: one ordered bucket per namespace, keyed by the
/// stable byte keys of the records. Used by the standalone demo and by tests.
#[derive(Debug, Clone, Default)]
pub struct InMemStorage(Arc<RwLock<Buckets>>);

#[derive(Debug, Default)]
struct Buckets {
    tx_outputs: BTreeMap<Vec<u8>, TxInputOutput>,
    latest_block_point: Option<BlockPoint>,
    confirmed_blocks: BTreeMap<[u8; 8], ConfirmedBlock>,
    confirmed_txs: BTreeMap<[u8; 12], Tx>,
    unprocessed_txs: BTreeSet<[u8; 12]>,
}

impl Storage for InMemStorage {
    type Tx = InMemWriteTx;

    async fn get_latest_block_point(&self) -> Result<Option<BlockPoint>, StorageError> {
        Ok(self.0.read().latest_block_point.clone())
    }

    async fn get_tx_output(&self, input: &TxInput) -> Result<Option<TxOutput>, StorageError> {
        let output = self
            .0
            .read()
            .tx_outputs
            .get(&input.storage_key())
            .and_then(|entry| entry.output.clone());

        Ok(output)
    }

    fn begin(&self) -> InMemWriteTx {
        InMemWriteTx {
            storage: self.clone(),
            confirmed_blocks: vec![],
            confirmed_txs: vec![],
            latest_block_point: None,
            added_outputs: vec![],
            removed_inputs: vec![],
        }
    }

    async fn get_latest_confirmed_blocks(
        &self,
        n: usize,
    ) -> Result<Vec<ConfirmedBlock>, StorageError> {
        let blocks = self
            .0
            .read()
            .confirmed_blocks
            .values()
            .rev()
            .take(n)
            .cloned()
            .collect();

        Ok(blocks)
    }

    async fn get_confirmed_blocks_from(
        &self,
        slot: u64,
        n: usize,
    ) -> Result<Vec<ConfirmedBlock>, StorageError> {
        let blocks = self
            .0
            .read()
            .confirmed_blocks
            .range(slot.to_be_bytes()..)
            .take(n)
            .map(|(_, block)| block.clone())
            .collect();

        Ok(blocks)
    }

    async fn get_all_tx_outputs(
        &self,
        address: &str,
        only_not_used: bool,
    ) -> Result<Vec<TxInputOutput>, StorageError> {
        let mut entries = self
            .0
            .read()
            .tx_outputs
            .values()
            .filter(|entry| {
                entry.output.as_ref().is_some_and(|output| {
                    output.address == address && (!only_not_used || !output.is_used)
                })
            })
            .cloned()
            .collect::<Vec<_>>();

        // Same order as the sqlite backend.
        entries.sort_by(|a, b| {
            let slot = |entry: &TxInputOutput| entry.output.as_ref().map(|output| output.slot);
            (slot(a), &a.input.hash.0, a.input.index).cmp(&(slot(b), &b.input.hash.0, b.input.index))
        });

        Ok(entries)
    }

    async fn get_unprocessed_confirmed_txs(&self, n: usize) -> Result<Vec<Tx>, StorageError> {
        let buckets = self.0.read();

        let take = if n == 0 {
            buckets.unprocessed_txs.len()
        } else {
            n
        };
        let txs = buckets
            .unprocessed_txs
            .iter()
            .take(take)
            .filter_map(|key| buckets.confirmed_txs.get(key).cloned())
            .collect();

        Ok(txs)
    }

    async fn mark_confirmed_txs_processed(&self, txs: &[Tx]) -> Result<(), StorageError> {
        let mut buckets = self.0.write();
        for tx in txs {
            buckets.unprocessed_txs.remove(&tx.storage_key());
        }

        Ok(())
    }
}

/// Buffered write transaction for [InMemStorage]; applied under one write
/// lock, so readers never observe a partial commit.
pub struct InMemWriteTx {
    storage: InMemStorage,
    confirmed_blocks: Vec<ConfirmedBlock>,
    confirmed_txs: Vec<Tx>,
    latest_block_point: Option<BlockPoint>,
    added_outputs: Vec<TxInputOutput>,
    removed_inputs: Vec<(TxInput, bool)>,
}

impl WriteTx for InMemWriteTx {
    fn add_confirmed_block(&mut self, block: ConfirmedBlock) {
        self.confirmed_blocks.push(block);
    }

    fn add_confirmed_txs(&mut self, mut txs: Vec<Tx>) {
        self.confirmed_txs.append(&mut txs);
    }

    fn set_latest_block_point(&mut self, point: BlockPoint) {
        self.latest_block_point = Some(point);
    }

    fn add_tx_outputs(&mut self, mut outputs: Vec<TxInputOutput>) {
        self.added_outputs.append(&mut outputs);
    }

    fn remove_tx_outputs(&mut self, inputs: Vec<TxInput>, soft: bool) {
        self.removed_inputs
            .extend(inputs.into_iter().map(|input| (input, soft)));
    }

    async fn execute(self) -> Result<(), StorageError> {
        let mut buckets = self.storage.0.write();

        for entry in self.added_outputs {
            if entry.output.is_some() {
                buckets.tx_outputs.insert(entry.input.storage_key(), entry);
            }
        }

        for (input, soft) in self.removed_inputs {
            if soft {
                if let Some(entry) = buckets.tx_outputs.get_mut(&input.storage_key()) {
                    if let Some(output) = entry.output.as_mut() {
                        output.is_used = true;
                    }
                }
            } else {
                buckets.tx_outputs.remove(&input.storage_key());
            }
        }

        for tx in self.confirmed_txs {
            let key = tx.storage_key();
            buckets.unprocessed_txs.insert(key);
            buckets.confirmed_txs.insert(key, tx);
        }

        for block in self.confirmed_blocks {
            buckets
                .confirmed_blocks
                .insert(block.point.slot_key(), block);
        }

        if let Some(point) = self.latest_block_point {
            buckets.latest_block_point = Some(point);
        }

        Ok(())
    }
}
