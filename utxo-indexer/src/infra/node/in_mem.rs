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
    BlockHash, BlockPoint, ChainSyncEvent, ConnectOptions, NodeClient, NodeError, NodeSession,
    NodeTx,
};
use parking_lot::Mutex;
use std::{
    collections::{HashMap, VecDeque},
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

/// An in-memory [NodeClient] that replays a scripted sequence of chain-sync
/// events. All sessions share one event queue, so after a reconnect the next
/// session continues where the previous one stopped; a drained queue ends the
/// session with [NodeError::Closed]. Used by the standalone demo and by
/// tests.
#[derive(Debug, Clone, Default)]
pub struct ReplayNode {
    events: Arc<Mutex<VecDeque<ChainSyncEvent>>>,
    blocks: Arc<Mutex<HashMap<Vec<u8>, Vec<NodeTx>>>>,
    connects: Arc<AtomicUsize>,
    last_connect: Arc<Mutex<Option<ConnectOptions>>>,
}

impl ReplayNode {
    /// Append an event to the script.
    pub fn push_event(&self, event: ChainSyncEvent) {
        self.events.lock().push_back(event);
    }

    /// Register the transactions of the block with the given hash, to be
    /// served by block-fetch.
    pub fn put_block_txs(&self, hash: &BlockHash, txs: Vec<NodeTx>) {
        self.blocks.lock().insert(hash.as_ref().to_vec(), txs);
    }

    /// How often a session has been established.
    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::Relaxed)
    }

    /// The options of the most recent connect.
    pub fn last_connect_options(&self) -> Option<ConnectOptions> {
        self.last_connect.lock().clone()
    }
}

impl NodeClient for ReplayNode {
    type Session = ReplaySession;

    async fn connect(&self, options: ConnectOptions) -> Result<ReplaySession, NodeError> {
        self.connects.fetch_add(1, Ordering::Relaxed);
        *self.last_connect.lock() = Some(options);

        Ok(ReplaySession {
            events: self.events.clone(),
            blocks: self.blocks.clone(),
        })
    }
}

/// A session over the shared script of a [ReplayNode].
pub struct ReplaySession {
    events: Arc<Mutex<VecDeque<ChainSyncEvent>>>,
    blocks: Arc<Mutex<HashMap<Vec<u8>, Vec<NodeTx>>>>,
}

impl NodeSession for ReplaySession {
    async fn next_event(&mut self) -> Result<ChainSyncEvent, NodeError> {
        self.events.lock().pop_front().ok_or(NodeError::Closed)
    }

    async fn fetch_block_txs(&mut self, point: &BlockPoint) -> Result<Vec<NodeTx>, NodeError> {
        self.blocks
            .lock()
            .get(point.hash.as_ref())
            .cloned()
            .ok_or_else(|| {
                NodeError::Protocol(format!(
                    "no block body for point (slot {}, hash {})",
                    point.slot, point.hash
                ))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Intersection, RawHeader, Tip};
    use assert_matches::assert_matches;

    #[tokio::test]
    async fn test_replay() {
        let node = ReplayNode::default();

        let hash = BlockHash::from(vec![1; 32]);
        node.push_event(ChainSyncEvent::RollForward {
            header: RawHeader {
                era_id: 5,
                slot: 10,
                hash: hash.clone(),
                number: 1,
            },
            tip: Tip::default(),
        });
        node.put_block_txs(&hash, vec![NodeTx::default()]);

        let options = ConnectOptions {
            network_magic: 42,
            node_address: "localhost:3001".to_string(),
            keep_alive: true,
            intersect: Intersection::Origin,
        };
        let mut session = node.connect(options).await.expect("connect succeeds");
        assert_eq!(node.connect_count(), 1);

        let event = session.next_event().await.expect("event is scripted");
        let point = match event {
            ChainSyncEvent::RollForward { header, .. } => BlockPoint {
                slot: header.slot,
                hash: header.hash,
                number: header.number,
            },
            ChainSyncEvent::RollBackward { .. } => panic!("unexpected roll backward"),
        };

        let txs = session
            .fetch_block_txs(&point)
            .await
            .expect("block body is registered");
        assert_eq!(txs.len(), 1);

        assert_matches!(session.next_event().await, Err(NodeError::Closed));
        let unknown = BlockPoint {
            slot: 11,
            hash: vec![9; 32].into(),
            number: 2,
        };
        assert_matches!(
            session.fetch_block_txs(&unknown).await,
            Err(NodeError::Protocol(_))
        );
    }
}
