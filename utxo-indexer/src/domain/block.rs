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

use crate::domain::transaction::{Tx, TxHash};
use indexer_common::{domain::ByteVec, error::BoxError};
use serde::{Deserialize, Serialize};
use std::{
    cmp::Ordering,
    fmt::{self, Display},
};
use thiserror::Error;

/// Hash of a block header. Empty for the origin point.
pub type BlockHash = ByteVec;

/// Identity of a block on the chain: slot, header hash and block number.
///
/// Ordered chronologically by `(number, slot)`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockPoint {
    pub slot: u64,
    pub hash: BlockHash,
    pub number: u64,
}

impl BlockPoint {
    /// The origin point: slot 0, empty hash. The block number is chosen so
    /// that its wrapping successor is 0.
    pub fn origin() -> Self {
        Self {
            slot: 0,
            hash: BlockHash::default(),
            number: u64::MAX,
        }
    }

    pub fn is_origin(&self) -> bool {
        self.hash.is_empty()
    }

    /// Whether two points reference the same block. Roll-backward points from
    /// the node carry no block number, so only slot and hash are compared.
    pub fn same_block(&self, other: &BlockPoint) -> bool {
        self.slot == other.slot && self.hash == other.hash
    }

    /// Chronological storage key: the slot in big-endian, so that
    /// lexicographic order equals numeric order.
    pub fn slot_key(&self) -> [u8; 8] {
        self.slot.to_be_bytes()
    }
}

impl PartialOrd for BlockPoint {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for BlockPoint {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.number, self.slot, &self.hash.0).cmp(&(other.number, other.slot, &other.hash.0))
    }
}

impl Display for BlockPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.number, self.slot, self.hash)
    }
}

/// Protocol era of a block. The id is the on-chain era tag; headers of
/// different eras have distinct formats, which the wire client decodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Era {
    Byron,
    Shelley,
    Allegra,
    Mary,
    Alonzo,
    Babbage,
    Conway,
}

impl Era {
    pub fn id(self) -> u8 {
        match self {
            Self::Byron => 0,
            Self::Shelley => 1,
            Self::Allegra => 2,
            Self::Mary => 3,
            Self::Alonzo => 4,
            Self::Babbage => 5,
            Self::Conway => 6,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Byron => "byron",
            Self::Shelley => "shelley",
            Self::Allegra => "allegra",
            Self::Mary => "mary",
            Self::Alonzo => "alonzo",
            Self::Babbage => "babbage",
            Self::Conway => "conway",
        }
    }
}

impl TryFrom<u8> for Era {
    type Error = UnknownEraError;

    fn try_from(id: u8) -> Result<Self, Self::Error> {
        match id {
            0 => Ok(Self::Byron),
            1 => Ok(Self::Shelley),
            2 => Ok(Self::Allegra),
            3 => Ok(Self::Mary),
            4 => Ok(Self::Alonzo),
            5 => Ok(Self::Babbage),
            6 => Ok(Self::Conway),
            _ => Err(UnknownEraError(id)),
        }
    }
}

impl Display for Era {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// A header with an era id this indexer cannot decode; always fatal.
#[derive(Debug, Error)]
#[error("unknown era id {0}")]
pub struct UnknownEraError(pub u8);

/// A block's identity plus its protocol era, as tracked in the unconfirmed
/// window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockHeader {
    pub point: BlockPoint,
    pub era: Era,
}

/// The persisted summary of a confirmed block: its point, era and either all
/// of its transaction hashes or only those of interest (configurable).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmedBlock {
    pub point: BlockPoint,
    pub era: Era,
    pub tx_hashes: Vec<TxHash>,
}

/// Downstream consumer of confirmed blocks.
///
/// Invoked exactly once per confirmation, after the store transaction has
/// committed. A failure is classified transient and restarts the session; the
/// in-memory state has already advanced by then, so the consumer may see the
/// same `(block, txs)` pair again and must be prepared for at-least-once
/// delivery.
#[trait_variant::make(Send)]
pub trait ConfirmedBlockHandler: Send + Sync + 'static {
    async fn on_block_confirmed(&self, block: &ConfirmedBlock, txs: &[Tx]) -> Result<(), BoxError>;
}
