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
    domain::{
        BlockPoint, ConfirmedBlock, Era, TokenAmount, Tx, TxHash, TxInput, TxInputOutput, TxOutput,
        storage::{Storage, StorageError, WriteTx},
    },
    infra::pool::SqlitePool,
};
use fastrace::trace;
use indoc::indoc;
use sqlx::{QueryBuilder, Row, Sqlite, sqlite::SqliteRow, types::Json};

type DbTx = sqlx::Transaction<'static, Sqlite>;

/// Sqlite based implementation of [Storage].
#[derive(Debug, Clone)]
pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    /// Create a new [SqliteStorage].
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

impl Storage for SqliteStorage {
    type Tx = SqliteWriteTx;

    async fn get_latest_block_point(&self) -> Result<Option<BlockPoint>, StorageError> {
        let query = indoc! {"
            SELECT slot, hash, number
            FROM latest_block_point
            WHERE id = 0
        "};

        let point = sqlx::query_as::<_, (i64, Vec<u8>, i64)>(query)
            .fetch_optional(&*self.pool)
            .await
            .map_err(storage_error)?
            .map(|(slot, hash, number)| BlockPoint {
                slot: slot as u64,
                hash: hash.into(),
                number: number as u64,
            });

        Ok(point)
    }

    async fn get_tx_output(&self, input: &TxInput) -> Result<Option<TxOutput>, StorageError> {
        let query = indoc! {"
            SELECT slot, address, amount, tokens, datum, datum_hash, is_used
            FROM tx_outputs
            WHERE tx_hash = $1 AND output_index = $2
        "};

        sqlx::query(query)
            .bind(&input.hash)
            .bind(input.index as i64)
            .fetch_optional(&*self.pool)
            .await
            .map_err(storage_error)?
            .map(|row| decode_tx_output(&row).map_err(storage_error))
            .transpose()
    }

    fn begin(&self) -> SqliteWriteTx {
        SqliteWriteTx {
            pool: self.pool.clone(),
            confirmed_blocks: vec![],
            confirmed_txs: vec![],
            latest_block_point: None,
            added_outputs: vec![],
            removed_inputs: vec![],
        }
    }

    async fn get_latest_confirmed_blocks(
        &self,
        n: usize,
    ) -> Result<Vec<ConfirmedBlock>, StorageError> {
        let query = indoc! {"
            SELECT slot, hash, number, era_id, era_name, tx_hashes
            FROM confirmed_blocks
            ORDER BY slot DESC
            LIMIT $1
        "};

        let rows = sqlx::query(query)
            .bind(n as i64)
            .fetch_all(&*self.pool)
            .await
            .map_err(storage_error)?;

        rows.iter()
            .map(|row| decode_confirmed_block(row).map_err(storage_error))
            .collect()
    }

    async fn get_confirmed_blocks_from(
        &self,
        slot: u64,
        n: usize,
    ) -> Result<Vec<ConfirmedBlock>, StorageError> {
        let query = indoc! {"
            SELECT slot, hash, number, era_id, era_name, tx_hashes
            FROM confirmed_blocks
            WHERE slot >= $1
            ORDER BY slot ASC
            LIMIT $2
        "};

        let rows = sqlx::query(query)
            .bind(slot as i64)
            .bind(n as i64)
            .fetch_all(&*self.pool)
            .await
            .map_err(storage_error)?;

        rows.iter()
            .map(|row| decode_confirmed_block(row).map_err(storage_error))
            .collect()
    }

    async fn get_all_tx_outputs(
        &self,
        address: &str,
        only_not_used: bool,
    ) -> Result<Vec<TxInputOutput>, StorageError> {
        let query = if only_not_used {
            indoc! {"
                SELECT tx_hash, output_index, slot, address, amount, tokens, datum, datum_hash, is_used
                FROM tx_outputs
                WHERE address = $1 AND is_used = FALSE
                ORDER BY slot, tx_hash, output_index
            "}
        } else {
            indoc! {"
                SELECT tx_hash, output_index, slot, address, amount, tokens, datum, datum_hash, is_used
                FROM tx_outputs
                WHERE address = $1
                ORDER BY slot, tx_hash, output_index
            "}
        };

        let rows = sqlx::query(query)
            .bind(address)
            .fetch_all(&*self.pool)
            .await
            .map_err(storage_error)?;

        rows.iter()
            .map(|row| {
                let input = TxInput {
                    hash: row.try_get::<Vec<u8>, _>("tx_hash")?.into(),
                    index: row.try_get::<i64, _>("output_index")? as u32,
                };
                let output = decode_tx_output(row)?;

                Ok(TxInputOutput {
                    input,
                    output: Some(output),
                })
            })
            .collect::<Result<_, sqlx::Error>>()
            .map_err(storage_error)
    }

    async fn get_unprocessed_confirmed_txs(&self, n: usize) -> Result<Vec<Tx>, StorageError> {
        let query = indoc! {"
            SELECT body
            FROM confirmed_txs
            JOIN unprocessed_txs USING (block_slot, tx_index)
            ORDER BY block_slot, tx_index
            LIMIT $1
        "};

        let limit = if n == 0 { -1 } else { n as i64 };

        let txs = sqlx::query_as::<_, (Json<Tx>,)>(query)
            .bind(limit)
            .fetch_all(&*self.pool)
            .await
            .map_err(storage_error)?
            .into_iter()
            .map(|(Json(tx),)| tx)
            .collect();

        Ok(txs)
    }

    async fn mark_confirmed_txs_processed(&self, txs: &[Tx]) -> Result<(), StorageError> {
        let mut db_tx = self.pool.begin().await.map_err(storage_error)?;

        for tx in txs {
            sqlx::query("DELETE FROM unprocessed_txs WHERE block_slot = $1 AND tx_index = $2")
                .bind(tx.block_point.slot as i64)
                .bind(tx.index_in_block as i64)
                .execute(&mut *db_tx)
                .await
                .map_err(storage_error)?;
        }

        db_tx.commit().await.map_err(storage_error)
    }
}

/// Buffered write transaction for [SqliteStorage]; applied in a single
/// database transaction by [WriteTx::execute].
pub struct SqliteWriteTx {
    pool: SqlitePool,
    confirmed_blocks: Vec<ConfirmedBlock>,
    confirmed_txs: Vec<Tx>,
    latest_block_point: Option<BlockPoint>,
    added_outputs: Vec<TxInputOutput>,
    removed_inputs: Vec<(TxInput, bool)>,
}

impl WriteTx for SqliteWriteTx {
    fn add_confirmed_block(&mut self, block: ConfirmedBlock) {
        self.confirmed_blocks.push(block);
    }

    fn add_confirmed_txs(&mut self, mut txs: Vec<Tx>) {
        self.confirmed_txs.append(&mut txs);
    }

    fn set_latest_block_point(&mut self, point: BlockPoint) {
        self.latest_block_point = Some(point);
    }

    fn add_tx_outputs(&mut self, mut outputs: Vec<TxInputOutput>) {
        self.added_outputs.append(&mut outputs);
    }

    fn remove_tx_outputs(&mut self, inputs: Vec<TxInput>, soft: bool) {
        self.removed_inputs
            .extend(inputs.into_iter().map(|input| (input, soft)));
    }

    #[trace]
    async fn execute(self) -> Result<(), StorageError> {
        let mut db_tx = self.pool.begin().await.map_err(storage_error)?;

        // Additions before removals, matching the order the indexer buffers
        // them in.
        for entry in &self.added_outputs {
            let Some(output) = &entry.output else {
                continue;
            };
            insert_tx_output(&entry.input, output, &mut db_tx)
                .await
                .map_err(storage_error)?;
        }

        for (input, soft) in &self.removed_inputs {
            remove_tx_output(input, *soft, &mut db_tx)
                .await
                .map_err(storage_error)?;
        }

        if !self.confirmed_txs.is_empty() {
            insert_confirmed_txs(&self.confirmed_txs, &mut db_tx)
                .await
                .map_err(storage_error)?;
        }

        for block in &self.confirmed_blocks {
            insert_confirmed_block(block, &mut db_tx)
                .await
                .map_err(storage_error)?;
        }

        if let Some(point) = &self.latest_block_point {
            set_latest_block_point(point, &mut db_tx)
                .await
                .map_err(storage_error)?;
        }

        db_tx.commit().await.map_err(storage_error)
    }
}

async fn insert_tx_output(
    input: &TxInput,
    output: &TxOutput,
    db_tx: &mut DbTx,
) -> Result<(), sqlx::Error> {
    let query = indoc! {"
        INSERT OR REPLACE INTO tx_outputs (
            tx_hash,
            output_index,
            slot,
            address,
            amount,
            tokens,
            datum,
            datum_hash,
            is_used
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
    "};

    sqlx::query(query)
        .bind(&input.hash)
        .bind(input.index as i64)
        .bind(output.slot as i64)
        .bind(&output.address)
        .bind(output.amount as i64)
        .bind(Json(&output.tokens))
        .bind(&output.datum)
        .bind(&output.datum_hash)
        .bind(output.is_used)
        .execute(&mut **db_tx)
        .await?;

    Ok(())
}

async fn remove_tx_output(input: &TxInput, soft: bool, db_tx: &mut DbTx) -> Result<(), sqlx::Error> {
    let query = if soft {
        "UPDATE tx_outputs SET is_used = TRUE WHERE tx_hash = $1 AND output_index = $2"
    } else {
        "DELETE FROM tx_outputs WHERE tx_hash = $1 AND output_index = $2"
    };

    sqlx::query(query)
        .bind(&input.hash)
        .bind(input.index as i64)
        .execute(&mut **db_tx)
        .await?;

    Ok(())
}

async fn insert_confirmed_txs(txs: &[Tx], db_tx: &mut DbTx) -> Result<(), sqlx::Error> {
    let query = indoc! {"
        INSERT OR REPLACE INTO confirmed_txs (
            block_slot,
            tx_index,
            hash,
            body
        )
    "};

    QueryBuilder::<Sqlite>::new(query)
        .push_values(txs.iter(), |mut q, tx| {
            q.push_bind(tx.block_point.slot as i64)
                .push_bind(tx.index_in_block as i64)
                .push_bind(&tx.hash)
                .push_bind(Json(tx));
        })
        .build()
        .execute(&mut **db_tx)
        .await?;

    QueryBuilder::<Sqlite>::new("INSERT OR REPLACE INTO unprocessed_txs (block_slot, tx_index)")
        .push_values(txs.iter(), |mut q, tx| {
            q.push_bind(tx.block_point.slot as i64)
                .push_bind(tx.index_in_block as i64);
        })
        .build()
        .execute(&mut **db_tx)
        .await?;

    Ok(())
}

async fn insert_confirmed_block(
    block: &ConfirmedBlock,
    db_tx: &mut DbTx,
) -> Result<(), sqlx::Error> {
    let query = indoc! {"
        INSERT OR REPLACE INTO confirmed_blocks (
            slot,
            hash,
            number,
            era_id,
            era_name,
            tx_hashes
        )
        VALUES ($1, $2, $3, $4, $5, $6)
    "};

    sqlx::query(query)
        .bind(block.point.slot as i64)
        .bind(&block.point.hash)
        .bind(block.point.number as i64)
        .bind(block.era.id() as i64)
        .bind(block.era.name())
        .bind(Json(&block.tx_hashes))
        .execute(&mut **db_tx)
        .await?;

    Ok(())
}

async fn set_latest_block_point(point: &BlockPoint, db_tx: &mut DbTx) -> Result<(), sqlx::Error> {
    let query = indoc! {"
        INSERT OR REPLACE INTO latest_block_point (id, slot, hash, number)
        VALUES (0, $1, $2, $3)
    "};

    sqlx::query(query)
        .bind(point.slot as i64)
        .bind(&point.hash)
        .bind(point.number as i64)
        .execute(&mut **db_tx)
        .await?;

    Ok(())
}

fn decode_tx_output(row: &SqliteRow) -> Result<TxOutput, sqlx::Error> {
    Ok(TxOutput {
        slot: row.try_get::<i64, _>("slot")? as u64,
        address: row.try_get("address")?,
        amount: row.try_get::<i64, _>("amount")? as u64,
        tokens: row.try_get::<Json<Vec<TokenAmount>>, _>("tokens")?.0,
        datum: row.try_get::<Option<Vec<u8>>, _>("datum")?.map(Into::into),
        datum_hash: row
            .try_get::<Option<Vec<u8>>, _>("datum_hash")?
            .map(Into::into),
        is_used: row.try_get("is_used")?,
    })
}

fn decode_confirmed_block(row: &SqliteRow) -> Result<ConfirmedBlock, sqlx::Error> {
    let era_id = row.try_get::<i64, _>("era_id")? as u8;
    let era = Era::try_from(era_id).map_err(|error| sqlx::Error::Decode(error.into()))?;

    Ok(ConfirmedBlock {
        point: BlockPoint {
            slot: row.try_get::<i64, _>("slot")? as u64,
            hash: row.try_get::<Vec<u8>, _>("hash")?.into(),
            number: row.try_get::<i64, _>("number")? as u64,
        },
        era,
        tx_hashes: row.try_get::<Json<Vec<TxHash>>, _>("tx_hashes")?.0,
    })
}

fn storage_error(error: sqlx::Error) -> StorageError {
    match error {
        sqlx::Error::PoolTimedOut => StorageError::Busy,
        sqlx::Error::Database(error) if error.message().contains("locked") => StorageError::Busy,
        sqlx::Error::Decode(error) => StorageError::Corruption(error),
        sqlx::Error::ColumnDecode { source, .. } => StorageError::Corruption(source),
        error => StorageError::Io(error.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{domain::PolicyId, infra::pool};
    use assert_matches::assert_matches;

    async fn storage() -> SqliteStorage {
        let pool = SqlitePool::new(pool::Config::default())
            .await
            .expect("pool can be created");
        pool.migrate().await.expect("migrations run");
        SqliteStorage::new(pool)
    }

    fn point(slot: u64, number: u64) -> BlockPoint {
        BlockPoint {
            slot,
            hash: vec![number as u8; 32].into(),
            number,
        }
    }

    fn utxo(tag: u8, index: u32, address: &str, slot: u64) -> TxInputOutput {
        TxInputOutput {
            input: TxInput {
                hash: vec![tag; 32].into(),
                index,
            },
            output: Some(TxOutput {
                slot,
                address: address.to_string(),
                amount: 1_000_000,
                tokens: vec![TokenAmount {
                    policy_id: PolicyId::from([tag; 28]),
                    name: "token".to_string(),
                    amount: 7,
                }],
                datum: None,
                datum_hash: Some(vec![tag; 32].into()),
                is_used: false,
            }),
        }
    }

    fn confirmed_block(slot: u64, number: u64, tx_hashes: Vec<TxHash>) -> ConfirmedBlock {
        ConfirmedBlock {
            point: point(slot, number),
            era: Era::Babbage,
            tx_hashes,
        }
    }

    fn confirmed_tx(block: &ConfirmedBlock, index_in_block: u32, tag: u8) -> Tx {
        Tx {
            index_in_block,
            hash: vec![tag; 32].into(),
            fee: 170_000,
            valid: true,
            block_point: block.point.clone(),
            metadata: Some(vec![0xd8, 0x79].into()),
            inputs: vec![],
            outputs: vec![],
        }
    }

    #[tokio::test]
    async fn test_latest_block_point_round_trip() {
        let storage = storage().await;
        assert_eq!(
            storage.get_latest_block_point().await.expect("point"),
            None
        );

        let mut db_tx = storage.begin();
        db_tx.set_latest_block_point(point(42, 7));
        db_tx.execute().await.expect("execute succeeds");

        assert_eq!(
            storage.get_latest_block_point().await.expect("point"),
            Some(point(42, 7))
        );
    }

    #[tokio::test]
    async fn test_tx_output_round_trip() {
        let storage = storage().await;
        let entry = utxo(1, 3, "addr1_wallet", 100);

        let mut db_tx = storage.begin();
        db_tx.add_tx_outputs(vec![entry.clone()]);
        db_tx.execute().await.expect("execute succeeds");

        let output = storage
            .get_tx_output(&entry.input)
            .await
            .expect("get output");
        assert_eq!(output, entry.output);

        let unknown = TxInput {
            hash: vec![0xff; 32].into(),
            index: 0,
        };
        assert_eq!(storage.get_tx_output(&unknown).await.expect("get"), None);
    }

    #[tokio::test]
    async fn test_remove_tx_outputs_hard_and_soft() {
        let storage = storage().await;
        let hard = utxo(1, 0, "addr1_wallet", 100);
        let soft = utxo(2, 0, "addr1_wallet", 100);

        let mut db_tx = storage.begin();
        db_tx.add_tx_outputs(vec![hard.clone(), soft.clone()]);
        db_tx.execute().await.expect("execute succeeds");

        let mut db_tx = storage.begin();
        db_tx.remove_tx_outputs(vec![hard.input.clone()], false);
        db_tx.remove_tx_outputs(vec![soft.input.clone()], true);
        db_tx.execute().await.expect("execute succeeds");

        assert_eq!(storage.get_tx_output(&hard.input).await.expect("get"), None);
        // Soft-deleted rows stay readable.
        assert_matches!(
            storage.get_tx_output(&soft.input).await.expect("get"),
            Some(output) if output.is_used
        );
    }

    #[tokio::test]
    async fn test_get_all_tx_outputs() {
        let storage = storage().await;

        let mut db_tx = storage.begin();
        db_tx.add_tx_outputs(vec![
            utxo(2, 0, "addr1_wallet", 200),
            utxo(1, 0, "addr1_wallet", 100),
            utxo(3, 0, "addr1_other", 300),
        ]);
        db_tx.remove_tx_outputs(
            vec![TxInput {
                hash: vec![2; 32].into(),
                index: 0,
            }],
            true,
        );
        db_tx.execute().await.expect("execute succeeds");

        let all = storage
            .get_all_tx_outputs("addr1_wallet", false)
            .await
            .expect("get all");
        let slots = all
            .iter()
            .filter_map(|entry| entry.output.as_ref().map(|output| output.slot))
            .collect::<Vec<_>>();
        assert_eq!(slots, vec![100, 200]);

        let not_used = storage
            .get_all_tx_outputs("addr1_wallet", true)
            .await
            .expect("get not used");
        assert_eq!(not_used.len(), 1);
        assert_eq!(not_used[0].input.hash, vec![1u8; 32].into());
    }

    #[tokio::test]
    async fn test_confirmed_blocks_are_chronological() {
        let storage = storage().await;

        for (slot, number) in [(10, 1), (20, 2), (30, 3), (40, 4)] {
            let mut db_tx = storage.begin();
            db_tx.add_confirmed_block(confirmed_block(slot, number, vec![]));
            db_tx.execute().await.expect("execute succeeds");
        }

        let latest = storage
            .get_latest_confirmed_blocks(2)
            .await
            .expect("latest blocks");
        let numbers = latest
            .iter()
            .map(|block| block.point.number)
            .collect::<Vec<_>>();
        assert_eq!(numbers, vec![4, 3]);

        let from = storage
            .get_confirmed_blocks_from(20, 2)
            .await
            .expect("blocks from slot");
        let numbers = from
            .iter()
            .map(|block| block.point.number)
            .collect::<Vec<_>>();
        assert_eq!(numbers, vec![2, 3]);
    }

    #[tokio::test]
    async fn test_confirmed_block_round_trip() {
        let storage = storage().await;
        let block = confirmed_block(10, 1, vec![vec![0xaa; 32].into(), vec![0xbb; 32].into()]);

        let mut db_tx = storage.begin();
        db_tx.add_confirmed_block(block.clone());
        db_tx.execute().await.expect("execute succeeds");

        let blocks = storage
            .get_latest_confirmed_blocks(1)
            .await
            .expect("latest blocks");
        assert_eq!(blocks, vec![block]);
    }

    #[tokio::test]
    async fn test_unprocessed_txs_queue() {
        let storage = storage().await;
        let block = confirmed_block(10, 1, vec![]);
        let tx_1 = confirmed_tx(&block, 0, 0xaa);
        let tx_2 = confirmed_tx(&block, 1, 0xbb);

        let mut db_tx = storage.begin();
        db_tx.add_confirmed_txs(vec![tx_1.clone(), tx_2.clone()]);
        db_tx.add_confirmed_block(block);
        db_tx.execute().await.expect("execute succeeds");

        let unprocessed = storage
            .get_unprocessed_confirmed_txs(0)
            .await
            .expect("unprocessed txs");
        assert_eq!(unprocessed, vec![tx_1.clone(), tx_2.clone()]);

        let limited = storage
            .get_unprocessed_confirmed_txs(1)
            .await
            .expect("unprocessed txs");
        assert_eq!(limited, vec![tx_1.clone()]);

        storage
            .mark_confirmed_txs_processed(&[tx_1])
            .await
            .expect("mark processed");
        let unprocessed = storage
            .get_unprocessed_confirmed_txs(0)
            .await
            .expect("unprocessed txs");
        assert_eq!(unprocessed, vec![tx_2]);
    }

    #[tokio::test]
    async fn test_replayed_confirmation_is_idempotent() {
        let storage = storage().await;
        let block = confirmed_block(10, 1, vec![vec![0xaa; 32].into()]);
        let tx = confirmed_tx(&block, 0, 0xaa);

        for _ in 0..2 {
            let mut db_tx = storage.begin();
            db_tx.add_tx_outputs(vec![utxo(1, 0, "addr1_wallet", 10)]);
            db_tx.add_confirmed_txs(vec![tx.clone()]);
            db_tx.add_confirmed_block(block.clone());
            db_tx.set_latest_block_point(block.point.clone());
            db_tx.execute().await.expect("execute succeeds");
        }

        assert_eq!(
            storage.get_latest_confirmed_blocks(10).await.expect("blocks"),
            vec![block.clone()]
        );
        assert_eq!(
            storage.get_unprocessed_confirmed_txs(0).await.expect("txs"),
            vec![tx]
        );
        assert_eq!(
            storage
                .get_all_tx_outputs("addr1_wallet", false)
                .await
                .expect("outputs")
                .len(),
            1
        );
        assert_eq!(
            storage.get_latest_block_point().await.expect("point"),
            Some(block.point)
        );
    }
}
