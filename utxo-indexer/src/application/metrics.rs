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

use crate::domain::ConfirmedBlock;
use metrics::{Counter, Gauge, counter, gauge};

pub struct Metrics {
    confirmed_block_number: Counter,
    confirmed_blocks: Counter,
    txs_of_interest: Counter,
    window_len: Gauge,
    rollbacks: Counter,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            confirmed_block_number: counter!("indexer_confirmed_block_number"),
            confirmed_blocks: counter!("indexer_confirmed_blocks_total"),
            txs_of_interest: counter!("indexer_txs_of_interest_total"),
            window_len: gauge!("indexer_unconfirmed_window_len"),
            rollbacks: counter!("indexer_rollbacks_total"),
        }
    }

    pub fn header_queued(&self, window_len: usize) {
        self.window_len.set(window_len as f64);
    }

    pub fn block_confirmed(
        &self,
        block: &ConfirmedBlock,
        txs_of_interest: usize,
        window_len: usize,
    ) {
        self.confirmed_block_number.absolute(block.point.number);
        self.confirmed_blocks.increment(1);
        self.txs_of_interest.increment(txs_of_interest as u64);
        self.window_len.set(window_len as f64);
    }

    pub fn rolled_back(&self, window_len: usize) {
        self.rollbacks.increment(1);
        self.window_len.set(window_len as f64);
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
