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

use std::error::Error as StdError;
use thiserror::Error;

/// Boxed dynamic error, `Send + Sync + 'static` so it can cross task
/// boundaries and feed into `anyhow`.
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Classified error for the chain-follow and indexing pipeline.
///
/// Only [ChainError::Fatal] stops the syncer for good; everything else is
/// eligible for the restart loop.
#[derive(Debug, Error)]
pub enum ChainError {
    /// Unrecoverable: header desync, rollback past a confirmed block, store
    /// corruption.
    #[error("fatal: {0}")]
    Fatal(#[source] BoxError),

    /// Recoverable by reconnecting after a delay: connection loss, timeouts,
    /// a failing downstream consumer.
    #[error("transient: {0}")]
    Transient(#[source] BoxError),

    /// The node violated the wire protocol; treated like a transient error by
    /// the restart gate, but kept apart for diagnostics.
    #[error("protocol: {0}")]
    Protocol(#[source] BoxError),
}

impl ChainError {
    pub fn fatal(error: impl Into<BoxError>) -> Self {
        Self::Fatal(error.into())
    }

    pub fn transient(error: impl Into<BoxError>) -> Self {
        Self::Transient(error.into())
    }

    pub fn protocol(error: impl Into<BoxError>) -> Self {
        Self::Protocol(error.into())
    }

    /// Whether this error must short-circuit the restart loop.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal(_))
    }
}

/// Extension methods for types implementing `std::error::Error`.
pub trait StdErrorExt
where
    Self: StdError,
{
    /// This error and all its recursive sources, colon separated, for log
    /// fields: `warn!(error = error.as_chain(); "session failed")`.
    fn as_chain(&self) -> String {
        let mut chain = self.to_string();

        let mut source = self.source();
        while let Some(error) = source {
            chain.push_str(": ");
            chain.push_str(&error.to_string());
            source = error.source();
        }

        chain
    }
}

impl<T> StdErrorExt for T where T: StdError {}
