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

use crate::domain::block::BlockPoint;
use indexer_common::domain::{ByteArray, ByteVec};
use serde::{Deserialize, Serialize};

/// Hash of a transaction body.
pub type TxHash = ByteVec;

/// Hash of the minting policy of a native token.
pub type PolicyId = ByteArray<28>;

/// Reference to a transaction output: the hash of the producing transaction
/// plus the output index. The primary key of the UTxO table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TxInput {
    pub hash: TxHash,
    pub index: u32,
}

impl TxInput {
    /// Stable storage key: `hash ‖ 0x00 ‖ ascii(index)`. The separator keeps
    /// keys collision-free across indices of different width.
    pub fn storage_key(&self) -> Vec<u8> {
        let index = self.index.to_string();

        let mut key = Vec::with_capacity(self.hash.len() + 1 + index.len());
        key.extend_from_slice(self.hash.as_ref());
        key.push(0);
        key.extend_from_slice(index.as_bytes());

        key
    }
}

/// A native token bundled with an output.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenAmount {
    pub policy_id: PolicyId,
    pub name: String,
    pub amount: u64,
}

/// A transaction output.
///
/// `slot` and `is_used` are assigned at indexing time: `slot` records the slot
/// of the block that created the output, `is_used` marks outputs consumed
/// under the soft-delete policy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOutput {
    pub slot: u64,
    pub address: String,
    pub amount: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tokens: Vec<TokenAmount>,
    pub datum: Option<ByteVec>,
    pub datum_hash: Option<ByteVec>,
    pub is_used: bool,
}

/// A UTxO entry: an output reference together with the output it points at.
///
/// On materialized transactions `output` is `None` when the referenced output
/// was never indexed; that is an unresolved reference, not an error.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxInputOutput {
    pub input: TxInput,
    pub output: Option<TxOutput>,
}

/// A confirmed transaction of interest, as persisted and as handed to the
/// consumer. Inputs carry the resolved output each consumes, so downstream
/// consumers never need a second lookup.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tx {
    pub index_in_block: u32,
    pub hash: TxHash,
    pub fee: u64,
    pub valid: bool,
    pub block_point: BlockPoint,
    pub metadata: Option<ByteVec>,
    pub inputs: Vec<TxInputOutput>,
    pub outputs: Vec<TxOutput>,
}

impl Tx {
    /// Chronological storage key: `be64(block slot) ‖ be32(index in block)`.
    pub fn storage_key(&self) -> [u8; 12] {
        let mut key = [0; 12];
        key[..8].copy_from_slice(&self.block_point.slot.to_be_bytes());
        key[8..].copy_from_slice(&self.index_in_block.to_be_bytes());

        key
    }
}
