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

use log::{debug, info};
use serde::Deserialize;
use sqlx::{
    migrate::{MigrateError, Migrator},
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
};
use std::{ops::Deref, time::Duration};
use thiserror::Error;

static MIGRATOR: Migrator = sqlx::migrate!("migrations/sqlite");

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// New type for `sqlx::SqlitePool`, set up for this store's access pattern:
/// a single connection (the indexer is the only writer, and SQLite serializes
/// writers anyway), WAL journaling so readers are not blocked while a
/// confirmation commits, and a busy timeout instead of immediate lock errors.
///
/// Use the `Deref` implementation (`&*pool`) where a `&sqlx::SqlitePool` is
/// needed.
#[derive(Debug, Clone)]
pub struct SqlitePool(sqlx::SqlitePool);

impl SqlitePool {
    /// Open the database at the configured URL, creating it when missing.
    pub async fn new(config: Config) -> Result<Self, Error> {
        let options = config
            .url
            .parse::<SqliteConnectOptions>()
            .map_err(Error::ParseUrl)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(BUSY_TIMEOUT);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(Error::Connect)?;
        debug!(url:% = config.url; "sqlite pool ready");

        Ok(Self(pool))
    }

    /// Bring the schema up to date; a no-op when nothing is pending. Safe to
    /// run on every start.
    pub async fn migrate(&self) -> Result<(), Error> {
        MIGRATOR.run(&self.0).await.map_err(Error::Migrate)?;
        info!(migrations = MIGRATOR.migrations.len(); "database schema up to date");

        Ok(())
    }
}

impl Deref for SqlitePool {
    type Target = sqlx::SqlitePool;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// Error possibly returned by [SqlitePool::new] and [SqlitePool::migrate].
#[derive(Debug, Error)]
pub enum Error {
    #[error("cannot parse sqlite database url")]
    ParseUrl(#[source] sqlx::Error),

    #[error("cannot open sqlite database")]
    Connect(#[source] sqlx::Error),

    #[error("cannot run sqlite migrations")]
    Migrate(#[source] MigrateError),
}

/// Configuration for [SqlitePool].
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Database URL; defaults to an in-memory database.
    #[serde(default = "url_default")]
    pub url: String,
}

impl Default for Config {
    fn default() -> Self {
        Self { url: url_default() }
    }
}

fn url_default() -> String {
    "sqlite::memory:".to_string()
}

#[cfg(test)]
mod tests {
    use crate::infra::pool::{Config, SqlitePool};

    #[tokio::test]
    async fn test_pool() {
        let pool = SqlitePool::new(Config::default()).await;
        assert!(pool.is_ok());
        let pool = pool.unwrap();

        let result = sqlx::query("CREATE TABLE test (id integer PRIMARY KEY)")
            .execute(&*pool)
            .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_migrate() {
        let pool = SqlitePool::new(Config::default())
            .await
            .expect("pool can be created");

        pool.migrate().await.expect("migrations run");
        pool.migrate().await.expect("migrations are idempotent");

        let result = sqlx::query("SELECT count(*) FROM confirmed_blocks")
            .execute(&*pool)
            .await;
        assert!(result.is_ok());
    }
}
