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
    block::{BlockHash, BlockHeader, BlockPoint},
    transaction::{TxHash, TxInput, TxOutput},
};
use indexer_common::{
    domain::ByteVec,
    error::{BoxError, ChainError},
};
use thiserror::Error;

/// A transaction as decoded from a fetched block body. Inputs are references
/// only; they are resolved against the UTxO projection at indexing time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeTx {
    pub hash: TxHash,
    pub fee: u64,
    pub valid: bool,
    pub metadata: Option<ByteVec>,
    pub inputs: Vec<TxInput>,
    pub outputs: Vec<TxOutput>,
}

/// An era-tagged header as delivered by the chain-sync protocol, before the
/// syncer turns it into a typed [BlockHeader].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawHeader {
    pub era_id: u8,
    pub slot: u64,
    pub hash: BlockHash,
    /// Boundary headers carry 0 here; the syncer substitutes the handler's
    /// next block number.
    pub number: u64,
}

/// The node's view of its chain tip, reported alongside every event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tip {
    pub point: BlockPoint,
}

/// One step of the chain-sync protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainSyncEvent {
    RollForward { header: RawHeader, tip: Tip },
    RollBackward { point: BlockPoint, tip: Tip },
}

/// The point the node is asked to start serving from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intersection {
    Origin,
    Point { slot: u64, hash: BlockHash },
}

impl From<&BlockPoint> for Intersection {
    fn from(point: &BlockPoint) -> Self {
        if point.is_origin() {
            Self::Origin
        } else {
            Self::Point {
                slot: point.slot,
                hash: point.hash.clone(),
            }
        }
    }
}

/// Options for establishing a session, derived from the syncer configuration.
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    pub network_magic: u32,
    pub node_address: String,
    pub keep_alive: bool,
    pub intersect: Intersection,
}

/// Wire-level client for the full node. Implementations own the protocol
/// plumbing (handshake, chain-sync, block-fetch, keep-alive); the syncer only
/// drives this contract.
#[trait_variant::make(Send)]
pub trait NodeClient: Clone + Send + Sync + 'static {
    type Session: NodeSession;

    /// Open a duplex connection, negotiate the protocols with the configured
    /// network magic and request synchronization from the intersection.
    async fn connect(&self, options: ConnectOptions) -> Result<Self::Session, NodeError>;
}

/// An established session: the chain-sync event stream plus the block-fetch
/// sub-protocol. Dropping the session tears the connection down.
#[trait_variant::make(Send)]
pub trait NodeSession: Send + 'static {
    /// The next chain-sync event, in the node's order.
    async fn next_event(&mut self) -> Result<ChainSyncEvent, NodeError>;

    /// Fetch the transactions of the block at the given point.
    async fn fetch_block_txs(&mut self, point: &BlockPoint) -> Result<Vec<NodeTx>, NodeError>;
}

/// On-demand access to a block's transactions, handed to
/// [ChainSyncHandler::roll_forward]. The indexer uses it at most once per
/// event, for the single header it is about to confirm.
#[trait_variant::make(Send)]
pub trait TxFetcher: Send {
    async fn fetch_txs(&mut self, point: &BlockPoint) -> Result<Vec<NodeTx>, NodeError>;
}

impl<S> TxFetcher for S
where
    S: NodeSession,
{
    async fn fetch_txs(&mut self, point: &BlockPoint) -> Result<Vec<NodeTx>, NodeError> {
        self.fetch_block_txs(point).await
    }
}

/// Contract between the syncer and the component consuming its events,
/// implemented by the block indexer.
#[trait_variant::make(Send)]
pub trait ChainSyncHandler: Send + Sync + 'static {
    /// The point syncing must continue from; origin (empty hash) requests a
    /// genesis intersection.
    async fn resume_point(&self) -> Result<BlockPoint, ChainError>;

    /// The block number the next roll-forward header is expected to carry.
    async fn next_block_number(&self) -> u64;

    /// Called once per new header, in the node's order.
    async fn roll_forward<F>(
        &self,
        header: BlockHeader,
        fetch: &mut F,
        tip: &Tip,
    ) -> Result<(), ChainError>
    where
        F: TxFetcher;

    /// Called when the node reports a fork; `point` is the tip the handler
    /// must rewind to.
    async fn roll_backward(&self, point: BlockPoint, tip: &Tip) -> Result<(), ChainError>;
}

/// Errors surfaced by the wire client.
#[derive(Debug, Error)]
pub enum NodeError {
    #[error("cannot connect to node")]
    Connect(#[source] BoxError),

    #[error("handshake rejected: {0}")]
    Handshake(String),

    #[error("chain-sync protocol violation: {0}")]
    Protocol(String),

    #[error("node operation timed out")]
    Timeout,

    #[error("session closed")]
    Closed,
}

impl From<NodeError> for ChainError {
    fn from(error: NodeError) -> Self {
        match error {
            NodeError::Protocol(_) => ChainError::protocol(error),
            _ => ChainError::transient(error),
        }
    }
}
