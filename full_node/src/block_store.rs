use crate::db::{db_err, u32_from_db};
use dg_node_core::blockchain::block_record::BlockRecord;
use dg_node_core::blockchain::full_block::FullBlock;
use dg_node_core::blockchain::sized_bytes::{Bytes32, SizedBytes};
use dg_node_serialize::Streamable;
use log::info;
use sqlx::{Row, SqliteConnection, SqlitePool};
use std::collections::HashMap;
use std::io::Error;

const PEAK_KEY: i64 = 0;

/// Persistent store of full blocks and their records, orphans included.
#[derive(Clone)]
pub struct BlockStore {
    pool: SqlitePool,
}
impl BlockStore {
    pub async fn create(pool: SqlitePool) -> Result<Self, Error> {
        let mut conn = pool.acquire().await.map_err(db_err)?;
        for statement in [
            "CREATE TABLE IF NOT EXISTS full_blocks(
                header_hash BLOB PRIMARY KEY,
                prev_hash BLOB NOT NULL,
                height BIGINT NOT NULL,
                in_main_chain INTEGER NOT NULL,
                block BLOB NOT NULL,
                block_record BLOB NOT NULL)",
            "CREATE INDEX IF NOT EXISTS full_block_height ON full_blocks(height)",
            "CREATE INDEX IF NOT EXISTS main_chain ON full_blocks(height, in_main_chain)",
            "CREATE TABLE IF NOT EXISTS current_peak(key INTEGER PRIMARY KEY, hash BLOB NOT NULL)",
        ] {
            sqlx::query(statement)
                .execute(&mut *conn)
                .await
                .map_err(db_err)?;
        }
        info!("Block store initialized");
        Ok(Self { pool })
    }

    /// Stores a block outside of any chain update, it starts out of the main chain.
    pub async fn put_block(&self, block: &FullBlock, record: &BlockRecord) -> Result<(), Error> {
        let mut conn = self.pool.acquire().await.map_err(db_err)?;
        Self::insert_block(&mut conn, block, record).await
    }

    pub async fn get_block(&self, header_hash: &Bytes32) -> Result<Option<FullBlock>, Error> {
        let mut conn = self.pool.acquire().await.map_err(db_err)?;
        let row = sqlx::query("SELECT block FROM full_blocks WHERE header_hash = ?")
            .bind(header_hash.as_slice())
            .fetch_optional(&mut *conn)
            .await
            .map_err(db_err)?;
        match row {
            Some(row) => {
                let bytes: Vec<u8> = row.try_get("block").map_err(db_err)?;
                Ok(Some(FullBlock::from_slice(&bytes)?))
            }
            None => Ok(None),
        }
    }

    pub async fn get_block_record(&self, header_hash: &Bytes32) -> Result<Option<BlockRecord>, Error> {
        let mut conn = self.pool.acquire().await.map_err(db_err)?;
        let row = sqlx::query("SELECT block_record FROM full_blocks WHERE header_hash = ?")
            .bind(header_hash.as_slice())
            .fetch_optional(&mut *conn)
            .await
            .map_err(db_err)?;
        match row {
            Some(row) => {
                let bytes: Vec<u8> = row.try_get("block_record").map_err(db_err)?;
                Ok(Some(BlockRecord::from_slice(&bytes)?))
            }
            None => Ok(None),
        }
    }

    /// Main chain blocks at the given heights, in the order asked for. Missing heights are skipped.
    pub async fn get_blocks_at_heights(&self, heights: &[u32]) -> Result<Vec<FullBlock>, Error> {
        let mut conn = self.pool.acquire().await.map_err(db_err)?;
        let mut blocks = Vec::with_capacity(heights.len());
        for height in heights {
            let row = sqlx::query(
                "SELECT block FROM full_blocks WHERE height = ? AND in_main_chain = 1",
            )
            .bind(i64::from(*height))
            .fetch_optional(&mut *conn)
            .await
            .map_err(db_err)?;
            if let Some(row) = row {
                let bytes: Vec<u8> = row.try_get("block").map_err(db_err)?;
                blocks.push(FullBlock::from_slice(&bytes)?);
            }
        }
        Ok(blocks)
    }

    pub async fn height_to_hash(&self, height: u32) -> Result<Option<Bytes32>, Error> {
        let mut conn = self.pool.acquire().await.map_err(db_err)?;
        let row = sqlx::query(
            "SELECT header_hash FROM full_blocks WHERE height = ? AND in_main_chain = 1",
        )
        .bind(i64::from(height))
        .fetch_optional(&mut *conn)
        .await
        .map_err(db_err)?;
        match row {
            Some(row) => {
                let bytes: Vec<u8> = row.try_get("header_hash").map_err(db_err)?;
                Ok(Some(Bytes32::try_from_slice(&bytes)?))
            }
            None => Ok(None),
        }
    }

    pub async fn get_peak(&self) -> Result<Option<(Bytes32, u32)>, Error> {
        let mut conn = self.pool.acquire().await.map_err(db_err)?;
        let row = sqlx::query(
            "SELECT full_blocks.header_hash, full_blocks.height FROM current_peak
             INNER JOIN full_blocks ON current_peak.hash = full_blocks.header_hash
             WHERE current_peak.key = ?",
        )
        .bind(PEAK_KEY)
        .fetch_optional(&mut *conn)
        .await
        .map_err(db_err)?;
        match row {
            Some(row) => {
                let bytes: Vec<u8> = row.try_get("header_hash").map_err(db_err)?;
                Ok(Some((
                    Bytes32::try_from_slice(&bytes)?,
                    u32_from_db(row.try_get("height").map_err(db_err)?)?,
                )))
            }
            None => Ok(None),
        }
    }

    /// Every stored record, orphans included, with the peak hash if one is set.
    pub async fn get_block_records_from_peak(
        &self,
    ) -> Result<(HashMap<Bytes32, BlockRecord>, Option<Bytes32>), Error> {
        let peak = self.get_peak().await?.map(|(hash, _)| hash);
        let mut conn = self.pool.acquire().await.map_err(db_err)?;
        let rows = sqlx::query("SELECT header_hash, block_record FROM full_blocks")
            .fetch_all(&mut *conn)
            .await
            .map_err(db_err)?;
        let mut records = HashMap::with_capacity(rows.len());
        for row in rows {
            let hash: Vec<u8> = row.try_get("header_hash").map_err(db_err)?;
            let record: Vec<u8> = row.try_get("block_record").map_err(db_err)?;
            records.insert(
                Bytes32::try_from_slice(&hash)?,
                BlockRecord::from_slice(&record)?,
            );
        }
        Ok((records, peak))
    }

    pub async fn insert_block(
        conn: &mut SqliteConnection,
        block: &FullBlock,
        record: &BlockRecord,
    ) -> Result<(), Error> {
        sqlx::query(
            "INSERT OR IGNORE INTO full_blocks(header_hash, prev_hash, height, in_main_chain, block, block_record)
             VALUES(?, ?, ?, 0, ?, ?)",
        )
        .bind(record.header_hash.as_slice())
        .bind(record.prev_hash.as_slice())
        .bind(i64::from(record.height))
        .bind(block.to_bytes())
        .bind(record.to_bytes())
        .execute(&mut *conn)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    pub async fn set_peak(conn: &mut SqliteConnection, header_hash: &Bytes32) -> Result<(), Error> {
        sqlx::query("INSERT OR REPLACE INTO current_peak(key, hash) VALUES(?, ?)")
            .bind(PEAK_KEY)
            .bind(header_hash.as_slice())
            .execute(&mut *conn)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    /// Drops every block above `fork_height` from the main chain, all of them for `None`.
    pub async fn rollback(conn: &mut SqliteConnection, fork_height: Option<u32>) -> Result<(), Error> {
        sqlx::query("UPDATE full_blocks SET in_main_chain = 0 WHERE height > ? AND in_main_chain = 1")
            .bind(fork_height.map_or(-1, i64::from))
            .execute(&mut *conn)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    pub async fn set_in_chain(
        conn: &mut SqliteConnection,
        header_hashes: &[Bytes32],
    ) -> Result<(), Error> {
        for header_hash in header_hashes {
            sqlx::query("UPDATE full_blocks SET in_main_chain = 1 WHERE header_hash = ?")
                .bind(header_hash.as_slice())
                .execute(&mut *conn)
                .await
                .map_err(db_err)?;
        }
        Ok(())
    }
}
