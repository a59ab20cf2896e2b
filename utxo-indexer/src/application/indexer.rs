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

use crate::{
    application::metrics::Metrics,
    domain::{
        BlockHeader, BlockPoint, ChainSyncHandler, ConfirmedBlock, ConfirmedBlockHandler, NodeTx,
        Tip, Tx, TxFetcher, TxInput, TxInputOutput, TxOutput,
        storage::{Storage, StorageError, WriteTx},
    },
};
use fastrace::trace;
use indexer_common::error::ChainError;
use log::{debug, info, warn};
use serde::Deserialize;
use std::collections::{HashSet, VecDeque};
use tokio::sync::Mutex;

/// Configuration for the block indexer.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Resume point used when the store holds no confirmed block yet.
    #[serde(default)]
    pub starting_block_point: Option<BlockPoint>,

    /// How many descendant blocks a block needs before it is considered
    /// final.
    pub confirmation_block_count: usize,

    /// Addresses the indexer cares about; empty means everything is of
    /// interest.
    #[serde(default)]
    pub addresses_of_interest: Vec<String>,

    #[serde(default)]
    pub address_check: AddressCheck,

    /// Index every output, regardless of address.
    #[serde(default)]
    pub keep_all_tx_outputs_in_db: bool,

    /// Flag consumed outputs as used instead of removing them.
    #[serde(default)]
    pub soft_delete_utxo: bool,

    /// Record every transaction hash on a confirmed block, not just the
    /// hashes of the transactions of interest.
    #[serde(default)]
    pub keep_all_tx_hashes_in_block: bool,
}

/// Which side of a transaction is tested against the addresses of interest.
/// At least one side is always checked.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AddressCheck {
    Inputs,
    Outputs,
    #[default]
    All,
}

impl AddressCheck {
    pub fn inputs(self) -> bool {
        matches!(self, Self::Inputs | Self::All)
    }

    pub fn outputs(self) -> bool {
        matches!(self, Self::Outputs | Self::All)
    }
}

/// The confirmation/UTxO indexer.
///
/// Holds the sliding window of unconfirmed headers and, once the window is
/// full, promotes the oldest header to confirmed: its transactions are
/// classified, the UTxO projection and the resume point are updated in one
/// store transaction, and the consumer is notified.
pub struct BlockIndexer<S, C>
where
    S: Storage,
    C: ConfirmedBlockHandler,
{
    config: Config,
    storage: S,
    confirmed_handler: C,
    addresses_of_interest: HashSet<String>,
    state: Mutex<WindowState>,
    metrics: Metrics,
}

/// State guarded by the indexer mutex: the indexer is the single logical
/// writer of both the window and the store.
struct WindowState {
    latest_block_point: Option<BlockPoint>,
    unconfirmed: VecDeque<BlockHeader>,
}

impl WindowState {
    fn next_block_number(&self) -> u64 {
        self.unconfirmed
            .back()
            .map(|header| header.point.number)
            .or_else(|| self.latest_block_point.as_ref().map(|point| point.number))
            .unwrap_or(u64::MAX)
            .wrapping_add(1)
    }
}

impl<S, C> BlockIndexer<S, C>
where
    S: Storage,
    C: ConfirmedBlockHandler,
{
    pub fn new(config: Config, storage: S, confirmed_handler: C) -> Self {
        let addresses_of_interest = config.addresses_of_interest.iter().cloned().collect();
        let unconfirmed = VecDeque::with_capacity(config.confirmation_block_count);

        Self {
            config,
            storage,
            confirmed_handler,
            addresses_of_interest,
            state: Mutex::new(WindowState {
                latest_block_point: None,
                unconfirmed,
            }),
            metrics: Metrics::new(),
        }
    }

    fn is_address_of_interest(&self, address: &str) -> bool {
        self.addresses_of_interest.is_empty() || self.addresses_of_interest.contains(address)
    }

    async fn is_tx_of_interest(&self, tx: &NodeTx) -> Result<bool, StorageError> {
        if self.addresses_of_interest.is_empty() {
            return Ok(true);
        }

        if self.config.address_check.outputs()
            && tx
                .outputs
                .iter()
                .any(|output| self.addresses_of_interest.contains(&output.address))
        {
            return Ok(true);
        }

        if self.config.address_check.inputs() {
            for input in &tx.inputs {
                // An input whose referent was never indexed is simply not of
                // interest by the input check.
                if let Some(output) = self.storage.get_tx_output(input).await? {
                    if !output.is_used && self.addresses_of_interest.contains(&output.address) {
                        return Ok(true);
                    }
                }
            }
        }

        Ok(false)
    }

    /// The outputs to index and the inputs to consume for one confirmed
    /// block.
    fn write_sets(
        &self,
        header: &BlockHeader,
        txs: &[NodeTx],
        of_interest: &[(u32, &NodeTx)],
    ) -> (Vec<TxInputOutput>, Vec<TxInput>) {
        let mut outputs_to_add = Vec::new();
        let mut inputs_to_remove = Vec::new();

        if self.config.keep_all_tx_outputs_in_db {
            for tx in txs {
                for (index, output) in tx.outputs.iter().enumerate() {
                    outputs_to_add.push(self.utxo_entry(header, tx, index as u32, output));
                }
                inputs_to_remove.extend(tx.inputs.iter().cloned());
            }
        } else {
            for (_, tx) in of_interest {
                for (index, output) in tx.outputs.iter().enumerate() {
                    if self.is_address_of_interest(&output.address) {
                        outputs_to_add.push(self.utxo_entry(header, tx, index as u32, output));
                    }
                }
                inputs_to_remove.extend(tx.inputs.iter().cloned());
            }
        }

        (outputs_to_add, inputs_to_remove)
    }

    fn utxo_entry(
        &self,
        header: &BlockHeader,
        tx: &NodeTx,
        index: u32,
        output: &TxOutput,
    ) -> TxInputOutput {
        TxInputOutput {
            input: TxInput {
                hash: tx.hash.clone(),
                index,
            },
            output: Some(TxOutput {
                slot: header.point.slot,
                is_used: false,
                ..output.clone()
            }),
        }
    }

    /// Materialize a transaction of interest: resolve every input against the
    /// store, keeping unresolved references as `None`.
    async fn materialize_tx(
        &self,
        header: &BlockHeader,
        index_in_block: u32,
        tx: &NodeTx,
    ) -> Result<Tx, StorageError> {
        let mut inputs = Vec::with_capacity(tx.inputs.len());
        for input in &tx.inputs {
            let output = self.storage.get_tx_output(input).await?;
            inputs.push(TxInputOutput {
                input: input.clone(),
                output,
            });
        }

        let outputs = tx
            .outputs
            .iter()
            .map(|output| TxOutput {
                slot: header.point.slot,
                is_used: false,
                ..output.clone()
            })
            .collect();

        Ok(Tx {
            index_in_block,
            hash: tx.hash.clone(),
            fee: tx.fee,
            valid: tx.valid,
            block_point: header.point.clone(),
            metadata: tx.metadata.clone(),
            inputs,
            outputs,
        })
    }

    /// Classify the transactions of the newly confirmed block and commit the
    /// confirmation as one store transaction.
    ///
    /// Input lookups see the store as of the start of the transaction:
    /// outputs consumed within the same block are only deleted or flagged at
    /// commit time, which is sound because an input must reference an output
    /// of an earlier confirmed block.
    #[trace]
    async fn process_confirmed(
        &self,
        header: &BlockHeader,
        txs: &[NodeTx],
    ) -> Result<(ConfirmedBlock, Vec<Tx>), ChainError> {
        let mut of_interest = Vec::with_capacity(txs.len());
        for (index, tx) in txs.iter().enumerate() {
            if self.is_tx_of_interest(tx).await.map_err(ChainError::from)? {
                of_interest.push((index as u32, tx));
            }
        }

        let (outputs_to_add, inputs_to_remove) = self.write_sets(header, txs, &of_interest);

        let mut confirmed_txs = Vec::with_capacity(of_interest.len());
        for (index_in_block, tx) in &of_interest {
            let tx = self
                .materialize_tx(header, *index_in_block, tx)
                .await
                .map_err(ChainError::from)?;
            confirmed_txs.push(tx);
        }

        let tx_hashes = if self.config.keep_all_tx_hashes_in_block {
            txs.iter().map(|tx| tx.hash.clone()).collect()
        } else {
            of_interest.iter().map(|(_, tx)| tx.hash.clone()).collect()
        };
        let block = ConfirmedBlock {
            point: header.point.clone(),
            era: header.era,
            tx_hashes,
        };

        let mut db_tx = self.storage.begin();
        db_tx.add_tx_outputs(outputs_to_add);
        db_tx.remove_tx_outputs(inputs_to_remove, self.config.soft_delete_utxo);
        if !confirmed_txs.is_empty() {
            db_tx.add_confirmed_txs(confirmed_txs.clone());
        }
        db_tx.add_confirmed_block(block.clone());
        db_tx.set_latest_block_point(header.point.clone());
        db_tx.execute().await.map_err(ChainError::from)?;

        Ok((block, confirmed_txs))
    }
}

impl<S, C> ChainSyncHandler for BlockIndexer<S, C>
where
    S: Storage,
    C: ConfirmedBlockHandler,
{
    async fn resume_point(&self) -> Result<BlockPoint, ChainError> {
        let mut state = self.state.lock().await;

        if let Some(point) = &state.latest_block_point {
            return Ok(point.clone());
        }

        let point = match self
            .storage
            .get_latest_block_point()
            .await
            .map_err(ChainError::from)?
        {
            Some(point) => point,
            None => self
                .config
                .starting_block_point
                .clone()
                .unwrap_or_else(BlockPoint::origin),
        };

        info!(point:% = point; "resuming");
        state.latest_block_point = Some(point.clone());

        Ok(point)
    }

    async fn next_block_number(&self) -> u64 {
        self.state.lock().await.next_block_number()
    }

    async fn roll_forward<F>(
        &self,
        header: BlockHeader,
        fetch: &mut F,
        _tip: &Tip,
    ) -> Result<(), ChainError>
    where
        F: TxFetcher,
    {
        let mut state = self.state.lock().await;

        if state.unconfirmed.len() < self.config.confirmation_block_count {
            debug!(
                number = header.point.number,
                slot = header.point.slot,
                hash:% = header.point.hash;
                "header queued"
            );
            state.unconfirmed.push_back(header);
            self.metrics.header_queued(state.unconfirmed.len());

            return Ok(());
        }

        // The window is full: the oldest header now has enough descendants.
        // With a window of capacity 0 the incoming header itself is final.
        let confirmed = match state.unconfirmed.front() {
            Some(oldest) => oldest.clone(),
            None => header.clone(),
        };

        let txs = fetch
            .fetch_txs(&confirmed.point)
            .await
            .map_err(ChainError::from)?;
        let (block, confirmed_txs) = self.process_confirmed(&confirmed, &txs).await?;

        state.latest_block_point = Some(confirmed.point.clone());
        if state.unconfirmed.pop_front().is_some() {
            state.unconfirmed.push_back(header);
        }

        info!(
            number = block.point.number,
            slot = block.point.slot,
            hash:% = block.point.hash,
            txs_of_interest = confirmed_txs.len();
            "block confirmed"
        );
        self.metrics
            .block_confirmed(&block, confirmed_txs.len(), state.unconfirmed.len());

        self.confirmed_handler
            .on_block_confirmed(&block, &confirmed_txs)
            .await
            .map_err(ChainError::transient)?;

        Ok(())
    }

    async fn roll_backward(&self, point: BlockPoint, _tip: &Tip) -> Result<(), ChainError> {
        let mut state = self.state.lock().await;

        // Linear scan is fine, the window is small.
        for i in (0..state.unconfirmed.len()).rev() {
            if state.unconfirmed[i].point.same_block(&point) {
                state.unconfirmed.truncate(i + 1);
                warn!(
                    slot = point.slot,
                    hash:% = point.hash,
                    window_len = state.unconfirmed.len();
                    "rolled back inside the unconfirmed window"
                );
                self.metrics.rolled_back(state.unconfirmed.len());

                return Ok(());
            }
        }

        if state
            .latest_block_point
            .as_ref()
            .is_some_and(|latest| latest.same_block(&point))
        {
            state.unconfirmed.clear();
            warn!(slot = point.slot, hash:% = point.hash; "rolled back to the latest confirmed block");
            self.metrics.rolled_back(0);

            return Ok(());
        }

        // The node wants a block un-confirmed: the store is ahead of the
        // canonical chain. There is no safe way to recover.
        Err(ChainError::fatal(format!(
            "roll backward to unknown block (slot {}, hash {})",
            point.slot, point.hash
        )))
    }
}
