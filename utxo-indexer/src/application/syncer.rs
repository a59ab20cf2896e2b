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
    BlockHeader, BlockPoint, ChainSyncEvent, ChainSyncHandler, ConnectOptions, Era, Intersection,
    NodeClient, NodeError, NodeSession, RawHeader,
};
use indexer_common::error::{ChainError, StdErrorExt};
use log::{debug, error, info, warn};
use metrics::counter;
use serde::Deserialize;
use std::{
    fmt::{self, Display},
    sync::Arc,
    time::Duration,
};
use tokio::{sync::mpsc, task::JoinHandle, time};
use tokio_util::sync::CancellationToken;

const ERROR_CHANNEL_CAPACITY: usize = 16;

/// Configuration for the chain syncer.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub network_magic: u32,

    /// `host:port`, or a Unix socket path when it starts with `/`.
    pub node_address: String,

    /// Reconnect after transient session errors.
    #[serde(default)]
    pub restart_on_error: bool,

    /// Wait before reconnecting.
    #[serde(default = "restart_delay_default", with = "humantime_serde")]
    pub restart_delay: Duration,

    /// Enable the node's keep-alive sub-protocol.
    #[serde(default = "keep_alive_default")]
    pub keep_alive: bool,
}

impl Config {
    pub fn protocol(&self) -> Protocol {
        if self.node_address.starts_with('/') {
            Protocol::Unix
        } else {
            Protocol::Tcp
        }
    }
}

/// Transport derived from the node address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Tcp,
    Unix,
}

/// Lifecycle of the syncer session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncerState {
    Idle,
    Connecting,
    Syncing,
    Reconnecting,
    Closed,
}

impl Display for SyncerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Syncing => "syncing",
            Self::Reconnecting => "reconnecting",
            Self::Closed => "closed",
        };
        write!(f, "{state}")
    }
}

/// The chain-follow engine.
///
/// Owns the session against the full node: it resumes from the handler's
/// resume point, delivers roll-forward and roll-backward events strictly in
/// the node's order, reconciles block numbers of boundary headers, and
/// applies the restart policy on session errors. Asynchronous session errors
/// surface on the channel returned by [ChainSyncer::errors].
pub struct ChainSyncer<N, H>
where
    N: NodeClient,
    H: ChainSyncHandler,
{
    config: Config,
    node: N,
    handler: Arc<H>,
    state: Arc<parking_lot::Mutex<SyncerState>>,
    errors_tx: mpsc::Sender<ChainError>,
    errors_rx: parking_lot::Mutex<Option<mpsc::Receiver<ChainError>>>,
    running: tokio::sync::Mutex<Option<Running>>,
}

struct Running {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl<N, H> ChainSyncer<N, H>
where
    N: NodeClient,
    H: ChainSyncHandler,
{
    pub fn new(config: Config, node: N, handler: H) -> Self {
        let (errors_tx, errors_rx) = mpsc::channel(ERROR_CHANNEL_CAPACITY);

        Self {
            config,
            node,
            handler: Arc::new(handler),
            state: Arc::new(parking_lot::Mutex::new(SyncerState::Idle)),
            errors_tx,
            errors_rx: parking_lot::Mutex::new(Some(errors_rx)),
            running: tokio::sync::Mutex::new(None),
        }
    }

    pub fn state(&self) -> SyncerState {
        *self.state.lock()
    }

    /// The channel carrying terminal session errors; can be taken once.
    pub fn errors(&self) -> Option<mpsc::Receiver<ChainError>> {
        self.errors_rx.lock().take()
    }

    /// (Re)establish the session and start delivering events to the handler.
    ///
    /// A previous session is closed first. The initial connection attempt is
    /// made synchronously so configuration mistakes fail fast; afterwards a
    /// background task delivers events and applies the restart policy.
    pub async fn sync(&self) -> Result<(), ChainError> {
        let mut running = self.running.lock().await;
        if let Some(previous) = running.take() {
            previous.cancel.cancel();
            let _ = previous.task.await;
        }

        let session_loop = SessionLoop {
            config: self.config.clone(),
            node: self.node.clone(),
            handler: self.handler.clone(),
            state: self.state.clone(),
            errors_tx: self.errors_tx.clone(),
        };

        set_state(&self.state, SyncerState::Connecting);
        let session = match session_loop.connect().await {
            Ok(session) => session,
            Err(error) => {
                set_state(&self.state, SyncerState::Idle);
                return Err(error);
            }
        };
        set_state(&self.state, SyncerState::Syncing);

        let cancel = CancellationToken::new();
        let task = tokio::spawn(session_loop.run(session, cancel.clone()));
        *running = Some(Running { cancel, task });

        Ok(())
    }

    /// Terminate the session; idempotent. An in-flight roll-forward either
    /// completes or is aborted.
    pub async fn close(&self) {
        let running = self.running.lock().await.take();
        if let Some(Running { cancel, task }) = running {
            cancel.cancel();
            let _ = task.await;
        }

        set_state(&self.state, SyncerState::Closed);
    }
}

/// Everything the background delivery task needs, detached from the syncer so
/// the task owns its state.
struct SessionLoop<N, H>
where
    N: NodeClient,
    H: ChainSyncHandler,
{
    config: Config,
    node: N,
    handler: Arc<H>,
    state: Arc<parking_lot::Mutex<SyncerState>>,
    errors_tx: mpsc::Sender<ChainError>,
}

impl<N, H> SessionLoop<N, H>
where
    N: NodeClient,
    H: ChainSyncHandler,
{
    async fn connect(&self) -> Result<N::Session, ChainError> {
        let resume_point = self.handler.resume_point().await?;

        info!(
            address:% = self.config.node_address,
            network_magic = self.config.network_magic,
            protocol:? = self.config.protocol(),
            resume:% = resume_point;
            "connecting to node"
        );

        let options = ConnectOptions {
            network_magic: self.config.network_magic,
            node_address: self.config.node_address.clone(),
            keep_alive: self.config.keep_alive,
            intersect: Intersection::from(&resume_point),
        };

        let session = self.node.connect(options).await?;

        Ok(session)
    }

    async fn run(self, mut session: N::Session, cancel: CancellationToken) {
        loop {
            let error = self.deliver(&mut session, &cancel).await;

            if cancel.is_cancelled() {
                set_state(&self.state, SyncerState::Closed);
                debug!("chain-sync session closed");
                return;
            }

            if error.is_fatal() {
                error!(error = error.as_chain(); "fatal chain-sync error");
                self.report(error);
                set_state(&self.state, SyncerState::Closed);
                return;
            }

            if !self.config.restart_on_error {
                warn!(error = error.as_chain(); "chain-sync session failed");
                self.report(error);
                set_state(&self.state, SyncerState::Closed);
                return;
            }

            warn!(
                error = error.as_chain(),
                delay:? = self.config.restart_delay;
                "chain-sync session failed, restarting"
            );

            session = match self.reconnect(&cancel).await {
                Some(session) => session,
                None => return,
            };
            set_state(&self.state, SyncerState::Syncing);
        }
    }

    /// Wait out the restart delay and connect again, repeating on transient
    /// connect failures. `None` when cancelled or failed fatally.
    async fn reconnect(&self, cancel: &CancellationToken) -> Option<N::Session> {
        loop {
            set_state(&self.state, SyncerState::Reconnecting);
            counter!("chain_syncer_reconnects_total").increment(1);

            tokio::select! {
                _ = cancel.cancelled() => {
                    set_state(&self.state, SyncerState::Closed);
                    debug!("chain-sync session closed");
                    return None;
                }
                _ = time::sleep(self.config.restart_delay) => {}
            }

            set_state(&self.state, SyncerState::Connecting);
            match self.connect().await {
                Ok(session) => return Some(session),

                Err(error) if error.is_fatal() => {
                    error!(error = error.as_chain(); "fatal error while reconnecting");
                    self.report(error);
                    set_state(&self.state, SyncerState::Closed);
                    return None;
                }

                Err(error) => {
                    warn!(error = error.as_chain(); "reconnect failed");
                }
            }
        }
    }

    /// Deliver events until the session or the handler fails. Cancellation
    /// aborts the step in flight and shows up as a transient error.
    async fn deliver(&self, session: &mut N::Session, cancel: &CancellationToken) -> ChainError {
        loop {
            let result = tokio::select! {
                _ = cancel.cancelled() => return NodeError::Closed.into(),
                result = self.step(session) => result,
            };

            if let Err(error) = result {
                return error;
            }
        }
    }

    async fn step(&self, session: &mut N::Session) -> Result<(), ChainError> {
        match session.next_event().await? {
            ChainSyncEvent::RollForward { header, tip } => {
                let header = self.make_block_header(header).await?;
                debug!(
                    number = header.point.number,
                    slot = header.point.slot,
                    hash:% = header.point.hash,
                    tip_slot = tip.point.slot;
                    "roll forward"
                );

                self.handler.roll_forward(header, session, &tip).await
            }

            ChainSyncEvent::RollBackward { point, tip } => {
                debug!(
                    slot = point.slot,
                    hash:% = point.hash,
                    tip_slot = tip.point.slot;
                    "roll backward"
                );

                self.handler.roll_backward(point, &tip).await
            }
        }
    }

    /// Turn an era-tagged raw header into a typed [BlockHeader].
    ///
    /// Boundary headers carry block number 0 and get the handler's next block
    /// number instead; any other disagreement with the handler means the
    /// session has desynced from the chain, which is fatal.
    async fn make_block_header(&self, raw: RawHeader) -> Result<BlockHeader, ChainError> {
        let era = Era::try_from(raw.era_id).map_err(ChainError::fatal)?;

        let next_block_number = self.handler.next_block_number().await;
        let number = if raw.number == 0 {
            next_block_number
        } else if raw.number != next_block_number {
            return Err(ChainError::fatal(format!(
                "header desync: block number {} at slot {}, expected {}",
                raw.number, raw.slot, next_block_number
            )));
        } else {
            raw.number
        };

        Ok(BlockHeader {
            point: BlockPoint {
                slot: raw.slot,
                hash: raw.hash,
                number,
            },
            era,
        })
    }

    fn report(&self, error: ChainError) {
        if self.errors_tx.try_send(error).is_err() {
            warn!("error channel full or closed, dropping error");
        }
    }
}

fn set_state(state: &Arc<parking_lot::Mutex<SyncerState>>, to: SyncerState) {
    let mut state = state.lock();
    if *state != to {
        debug!(from:% = *state, to:% = to; "syncer state");
        *state = to;
    }
}
