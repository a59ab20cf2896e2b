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
    block::{BlockPoint, ConfirmedBlock},
    transaction::{Tx, TxInput, TxInputOutput, TxOutput},
};
use indexer_common::error::{BoxError, ChainError};
use thiserror::Error;

/// Durable store for the UTxO projection, confirmed blocks, confirmed
/// transactions and the resume point.
///
/// Absence is modeled as `None`, never as an error. Readers see a consistent
/// snapshot and never observe a partially applied [WriteTx].
#[trait_variant::make(Send)]
pub trait Storage: Clone + Send + Sync + 'static {
    type Tx: WriteTx;

    /// The point of the most recently confirmed block, if any block has been
    /// confirmed yet.
    async fn get_latest_block_point(&self) -> Result<Option<BlockPoint>, StorageError>;

    /// Look up an indexed output by its reference. Also returns soft-deleted
    /// rows; callers check [TxOutput::is_used].
    async fn get_tx_output(&self, input: &TxInput) -> Result<Option<TxOutput>, StorageError>;

    /// Begin a write transaction. Operations are buffered and applied
    /// atomically by [WriteTx::execute].
    fn begin(&self) -> Self::Tx;

    /// The `n` most recently confirmed blocks, newest first.
    async fn get_latest_confirmed_blocks(&self, n: usize)
    -> Result<Vec<ConfirmedBlock>, StorageError>;

    /// Up to `n` confirmed blocks with slot ≥ `slot`, chronological.
    async fn get_confirmed_blocks_from(
        &self,
        slot: u64,
        n: usize,
    ) -> Result<Vec<ConfirmedBlock>, StorageError>;

    /// All indexed outputs for `address`, chronological. With `only_not_used`
    /// soft-deleted rows are filtered out.
    async fn get_all_tx_outputs(
        &self,
        address: &str,
        only_not_used: bool,
    ) -> Result<Vec<TxInputOutput>, StorageError>;

    /// Confirmed transactions not yet marked processed, chronological. An `n`
    /// of 0 returns all of them.
    async fn get_unprocessed_confirmed_txs(&self, n: usize) -> Result<Vec<Tx>, StorageError>;

    /// Remove the given transactions from the unprocessed queue.
    async fn mark_confirmed_txs_processed(&self, txs: &[Tx]) -> Result<(), StorageError>;
}

/// A buffered write transaction. Nothing is visible to readers until
/// [WriteTx::execute] commits, which is all-or-nothing: a failed execute
/// leaves the store unchanged.
#[trait_variant::make(Send)]
pub trait WriteTx: Send {
    fn add_confirmed_block(&mut self, block: ConfirmedBlock);

    /// Persist confirmed transactions and enqueue them as unprocessed.
    fn add_confirmed_txs(&mut self, txs: Vec<Tx>);

    fn set_latest_block_point(&mut self, point: BlockPoint);

    fn add_tx_outputs(&mut self, outputs: Vec<TxInputOutput>);

    /// With `soft` the rows are flagged [TxOutput::is_used] instead of being
    /// removed.
    fn remove_tx_outputs(&mut self, inputs: Vec<TxInput>, soft: bool);

    async fn execute(self) -> Result<(), StorageError>;
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage i/o error")]
    Io(#[source] BoxError),

    #[error("storage corruption")]
    Corruption(#[source] BoxError),

    /// The store is temporarily locked by another writer; retryable at the
    /// caller's discretion.
    #[error("storage busy")]
    Busy,
}

impl From<StorageError> for ChainError {
    fn from(error: StorageError) -> Self {
        match error {
            StorageError::Corruption(_) => ChainError::fatal(error),
            _ => ChainError::transient(error),
        }
    }
}
