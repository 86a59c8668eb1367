use crate::db::{db_err, u32_from_db, u64_from_db};
use dg_node_core::blockchain::coin::Coin;
use dg_node_core::blockchain::coin_record::CoinRecord;
use dg_node_core::blockchain::sized_bytes::{Bytes32, SizedBytes};
use dg_node_core::errors::{ConsensusError, ErrorCode, ValidationError};
use log::{debug, info};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqlitePool};
use std::collections::{HashMap, HashSet};
use std::io::{Error, ErrorKind};

const COIN_COLUMNS: &str =
    "coin_name, confirmed_index, spent_index, coinbase, puzzle_hash, coin_parent, amount, timestamp";

/// Persistent coin set. Every coin ever created is kept, spent coins carry the
/// height they were spent at.
#[derive(Clone)]
pub struct CoinStore {
    pool: SqlitePool,
}
impl CoinStore {
    pub async fn create(pool: SqlitePool) -> Result<Self, Error> {
        let mut conn = pool.acquire().await.map_err(db_err)?;
        for statement in [
            "CREATE TABLE IF NOT EXISTS coin_record(
                coin_name BLOB PRIMARY KEY,
                confirmed_index BIGINT NOT NULL,
                spent_index BIGINT,
                coinbase INTEGER NOT NULL,
                puzzle_hash BLOB NOT NULL,
                coin_parent BLOB NOT NULL,
                amount BLOB NOT NULL,
                timestamp BIGINT NOT NULL)",
            "CREATE INDEX IF NOT EXISTS coin_confirmed_index ON coin_record(confirmed_index)",
            "CREATE INDEX IF NOT EXISTS coin_spent_index ON coin_record(spent_index)",
            "CREATE INDEX IF NOT EXISTS coin_puzzle_hash ON coin_record(puzzle_hash)",
            "CREATE INDEX IF NOT EXISTS coin_parent_index ON coin_record(coin_parent)",
        ] {
            sqlx::query(statement)
                .execute(&mut *conn)
                .await
                .map_err(db_err)?;
        }
        info!("Coin store initialized");
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn get_coin_record(&self, name: &Bytes32) -> Result<Option<CoinRecord>, Error> {
        let mut conn = self.pool.acquire().await.map_err(db_err)?;
        Self::coin_record(&mut conn, name).await
    }

    pub async fn get_coin_records_by_names(
        &self,
        include_spent: bool,
        names: &[Bytes32],
    ) -> Result<Vec<CoinRecord>, Error> {
        let mut conn = self.pool.acquire().await.map_err(db_err)?;
        let mut records = vec![];
        for name in names {
            if let Some(record) = Self::coin_record(&mut conn, name).await? {
                if include_spent || !record.spent() {
                    records.push(record);
                }
            }
        }
        Ok(records)
    }

    /// Coins locked to `puzzle_hash`. With `as_of_height` the set is evaluated as it
    /// stood at that height, so later confirmations are hidden and later spends count as unspent.
    pub async fn get_coin_records_by_puzzle_hash(
        &self,
        puzzle_hash: &Bytes32,
        include_spent: bool,
        as_of_height: Option<u32>,
    ) -> Result<Vec<CoinRecord>, Error> {
        let mut conn = self.pool.acquire().await.map_err(db_err)?;
        let rows = sqlx::query(&format!(
            "SELECT {COIN_COLUMNS} FROM coin_record WHERE puzzle_hash = ? ORDER BY confirmed_index"
        ))
        .bind(puzzle_hash.as_slice())
        .fetch_all(&mut *conn)
        .await
        .map_err(db_err)?;
        let mut records = vec![];
        for row in &rows {
            let mut record = row_to_coin_record(row)?;
            if let Some(height) = as_of_height {
                if record.confirmed_block_index > height {
                    continue;
                }
                if record.spent_block_index.is_some_and(|s| s > height) {
                    record.spent_block_index = None;
                }
            }
            if include_spent || !record.spent() {
                records.push(record);
            }
        }
        Ok(records)
    }

    pub async fn get_coins_added_at_height(&self, height: u32) -> Result<Vec<CoinRecord>, Error> {
        self.query_records(
            &format!("SELECT {COIN_COLUMNS} FROM coin_record WHERE confirmed_index = ?"),
            height,
        )
        .await
    }

    pub async fn get_coins_removed_at_height(&self, height: u32) -> Result<Vec<CoinRecord>, Error> {
        self.query_records(
            &format!("SELECT {COIN_COLUMNS} FROM coin_record WHERE spent_index = ?"),
            height,
        )
        .await
    }

    pub async fn get_unspent_coin_records(&self) -> Result<Vec<CoinRecord>, Error> {
        let mut conn = self.pool.acquire().await.map_err(db_err)?;
        let rows = sqlx::query(&format!(
            "SELECT {COIN_COLUMNS} FROM coin_record WHERE spent_index IS NULL ORDER BY confirmed_index"
        ))
        .fetch_all(&mut *conn)
        .await
        .map_err(db_err)?;
        rows.iter().map(row_to_coin_record).collect()
    }

    async fn query_records(&self, sql: &str, height: u32) -> Result<Vec<CoinRecord>, Error> {
        let mut conn = self.pool.acquire().await.map_err(db_err)?;
        let rows = sqlx::query(sql)
            .bind(i64::from(height))
            .fetch_all(&mut *conn)
            .await
            .map_err(db_err)?;
        rows.iter().map(row_to_coin_record).collect()
    }

    /// Applies a block's coin changes in their own transaction.
    pub async fn new_block(
        &self,
        height: u32,
        timestamp: u64,
        additions: &[Coin],
        removals: &[Bytes32],
        reward_coins: &[Coin],
    ) -> Result<(), ConsensusError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        Self::apply_block(&mut tx, height, timestamp, additions, removals, reward_coins).await?;
        tx.commit().await.map_err(db_err)?;
        Ok(())
    }

    /// Undoes every change above `height`. Returns the records as they were before the rollback.
    pub async fn rollback_to_height(&self, height: u32) -> Result<Vec<CoinRecord>, Error> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        let changed = Self::rollback(&mut tx, Some(height)).await?;
        tx.commit().await.map_err(db_err)?;
        Ok(changed)
    }

    pub async fn coin_record(
        conn: &mut SqliteConnection,
        name: &Bytes32,
    ) -> Result<Option<CoinRecord>, Error> {
        sqlx::query(&format!(
            "SELECT {COIN_COLUMNS} FROM coin_record WHERE coin_name = ?"
        ))
        .bind(name.as_slice())
        .fetch_optional(&mut *conn)
        .await
        .map_err(db_err)?
        .as_ref()
        .map(row_to_coin_record)
        .transpose()
    }

    /// Validates the whole change set first, so a rejected block leaves the store untouched.
    pub async fn apply_block(
        conn: &mut SqliteConnection,
        height: u32,
        timestamp: u64,
        additions: &[Coin],
        removals: &[Bytes32],
        reward_coins: &[Coin],
    ) -> Result<(), ConsensusError> {
        let mut new_records: HashMap<Bytes32, CoinRecord> = HashMap::new();
        for (coin, coinbase) in reward_coins
            .iter()
            .map(|c| (c, true))
            .chain(additions.iter().map(|c| (c, false)))
        {
            let record = CoinRecord {
                coin: *coin,
                confirmed_block_index: height,
                spent_block_index: None,
                coinbase,
                timestamp,
            };
            if new_records.insert(coin.name(), record).is_some() {
                return Err(ValidationError::with_message(
                    ErrorCode::DuplicateOutput,
                    format!("coin {} created twice", coin.name()),
                )
                .into());
            }
            if Self::coin_record(conn, &coin.name()).await?.is_some() {
                return Err(ValidationError::with_message(
                    ErrorCode::DuplicateOutput,
                    format!("coin {} already exists", coin.name()),
                )
                .into());
            }
        }
        let mut seen_removals = HashSet::new();
        for name in removals {
            if !seen_removals.insert(*name) {
                return Err(ValidationError::with_message(
                    ErrorCode::DoubleSpend,
                    format!("coin {name} removed twice"),
                )
                .into());
            }
            if new_records.contains_key(name) {
                continue;
            }
            match Self::coin_record(conn, name).await? {
                None => {
                    return Err(ValidationError::with_message(
                        ErrorCode::UnknownUnspent,
                        format!("coin {name}"),
                    )
                    .into())
                }
                Some(record) if record.spent() => {
                    return Err(ValidationError::with_message(
                        ErrorCode::DoubleSpend,
                        format!("coin {name} spent at {:?}", record.spent_block_index),
                    )
                    .into())
                }
                Some(_) => {}
            }
        }
        for record in new_records.values() {
            insert_coin_record(conn, record).await?;
        }
        for name in removals {
            let result = sqlx::query(
                "UPDATE coin_record SET spent_index = ? WHERE coin_name = ? AND spent_index IS NULL",
            )
            .bind(i64::from(height))
            .bind(name.as_slice())
            .execute(&mut *conn)
            .await
            .map_err(db_err)?;
            if result.rows_affected() != 1 {
                return Err(ConsensusError::Storage(Error::new(
                    ErrorKind::Other,
                    format!("Failed to mark coin {name} spent"),
                )));
            }
        }
        debug!(
            "Coin store applied height {height}: {} additions, {} removals",
            new_records.len(),
            removals.len()
        );
        Ok(())
    }

    /// Undoes every change above `fork_height`, or everything when there is no common block.
    pub async fn rollback(
        conn: &mut SqliteConnection,
        fork_height: Option<u32>,
    ) -> Result<Vec<CoinRecord>, Error> {
        let height = fork_height.map_or(-1, i64::from);
        let rows = sqlx::query(&format!(
            "SELECT {COIN_COLUMNS} FROM coin_record WHERE confirmed_index > ? OR spent_index > ?"
        ))
        .bind(height)
        .bind(height)
        .fetch_all(&mut *conn)
        .await
        .map_err(db_err)?;
        let changed = rows
            .iter()
            .map(row_to_coin_record)
            .collect::<Result<Vec<_>, _>>()?;
        sqlx::query("DELETE FROM coin_record WHERE confirmed_index > ?")
            .bind(height)
            .execute(&mut *conn)
            .await
            .map_err(db_err)?;
        sqlx::query("UPDATE coin_record SET spent_index = NULL WHERE spent_index > ?")
            .bind(height)
            .execute(&mut *conn)
            .await
            .map_err(db_err)?;
        if !changed.is_empty() {
            debug!("Coin store rolled back {} records to {height}", changed.len());
        }
        Ok(changed)
    }
}

async fn insert_coin_record(conn: &mut SqliteConnection, record: &CoinRecord) -> Result<(), Error> {
    let timestamp = i64::try_from(record.timestamp)
        .map_err(|_| Error::new(ErrorKind::InvalidInput, "Timestamp out of range"))?;
    sqlx::query(&format!(
        "INSERT INTO coin_record({COIN_COLUMNS}) VALUES(?, ?, ?, ?, ?, ?, ?, ?)"
    ))
    .bind(record.name().as_slice())
    .bind(i64::from(record.confirmed_block_index))
    .bind(record.spent_block_index.map(i64::from))
    .bind(record.coinbase)
    .bind(record.coin.puzzle_hash.as_slice())
    .bind(record.coin.parent_coin_info.as_slice())
    .bind(record.coin.amount.to_be_bytes().to_vec())
    .bind(timestamp)
    .execute(&mut *conn)
    .await
    .map_err(db_err)?;
    Ok(())
}

fn row_to_coin_record(row: &SqliteRow) -> Result<CoinRecord, Error> {
    let amount_bytes: Vec<u8> = row.try_get("amount").map_err(db_err)?;
    let amount = <[u8; 8]>::try_from(amount_bytes.as_slice())
        .map(u64::from_be_bytes)
        .map_err(|_| Error::new(ErrorKind::InvalidData, "Invalid coin amount in db"))?;
    let parent: Vec<u8> = row.try_get("coin_parent").map_err(db_err)?;
    let puzzle_hash: Vec<u8> = row.try_get("puzzle_hash").map_err(db_err)?;
    let spent_index: Option<i64> = row.try_get("spent_index").map_err(db_err)?;
    Ok(CoinRecord {
        coin: Coin::new(
            Bytes32::try_from_slice(&parent)?,
            Bytes32::try_from_slice(&puzzle_hash)?,
            amount,
        ),
        confirmed_block_index: u32_from_db(row.try_get("confirmed_index").map_err(db_err)?)?,
        spent_block_index: spent_index.map(u32_from_db).transpose()?,
        coinbase: row.try_get("coinbase").map_err(db_err)?,
        timestamp: u64_from_db(row.try_get("timestamp").map_err(db_err)?)?,
    })
}
