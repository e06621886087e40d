//! Embedded SQLite chain + mempool store.
use anyhow::{ensure, Context};
use async_trait::async_trait;
use bitcoin::{consensus, Amount, Block, BlockHash, OutPoint, ScriptBuf, Transaction, TxOut, Txid};
use rusqlite::{params, Connection, OptionalExtension};
use std::{path::PathBuf, str::FromStr, sync::Arc};
use tokio::task;

use crate::chain::{ChainSnapshot, ChainSource, StaleSnapshot};

const SCHEMA: &str = r#"
    PRAGMA journal_mode=WAL;
    PRAGMA synchronous=NORMAL;

    CREATE TABLE IF NOT EXISTS state (
        key   TEXT PRIMARY KEY,
        value TEXT NOT NULL
    );
    CREATE TABLE IF NOT EXISTS blocks (
        hash   TEXT PRIMARY KEY,
        height INTEGER NOT NULL,
        raw    BLOB NOT NULL
    );
    CREATE TABLE IF NOT EXISTS active_chain (
        height INTEGER PRIMARY KEY,
        hash   TEXT NOT NULL UNIQUE
    );
    CREATE TABLE IF NOT EXISTS outputs (
        txid   TEXT NOT NULL,
        vout   INTEGER NOT NULL,
        value  INTEGER NOT NULL,
        script BLOB NOT NULL,
        PRIMARY KEY (txid, vout)
    );
    CREATE TABLE IF NOT EXISTS mempool (
        seq  INTEGER PRIMARY KEY AUTOINCREMENT,
        txid TEXT NOT NULL UNIQUE,
        raw  BLOB NOT NULL
    );
"#;

/// Tables:
///   state(key, value)              : `generation`: u64 decimal, bumped by every write
///   blocks(hash, height, raw)      : every stored block, active or stale
///   active_chain(height, hash)     : the active chain
///   outputs(txid, vout, value, script) : outputs of active-chain and mempool txs
///   mempool(seq, txid, raw)        : unconfirmed txs in arrival order
///
/// Snapshots are optimistic: they remember the generation they were taken at,
/// and every read re-checks it inside its own read transaction.
pub struct SqliteChainStore {
    path: PathBuf,
}

impl SqliteChainStore {
    /// Creates/initializes the SQLite file at `path`.
    pub fn new(path: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let path = path.into();
        let conn = Connection::open(&path)
            .with_context(|| format!("open sqlite at {}", path.display()))?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { path })
    }

    fn generation(conn: &Connection) -> anyhow::Result<u64> {
        let v: Option<String> = conn
            .query_row(
                "SELECT value FROM state WHERE key = 'generation'",
                [],
                |row| row.get(0),
            )
            .optional()?;
        Ok(match v {
            Some(s) => s.parse().context("parse generation")?,
            None => 0,
        })
    }

    fn bump_generation(conn: &Connection) -> anyhow::Result<u64> {
        let next = Self::generation(conn)? + 1;
        conn.execute(
            "INSERT INTO state(key,value) VALUES('generation',?1)
             ON CONFLICT(key) DO UPDATE SET value=excluded.value",
            params![next.to_string()],
        )?;
        Ok(next)
    }

    fn tip(conn: &Connection) -> anyhow::Result<Option<(u32, BlockHash)>> {
        let row: Option<(u32, String)> = conn
            .query_row(
                "SELECT height, hash FROM active_chain ORDER BY height DESC LIMIT 1",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        row.map(|(h, hash)| -> anyhow::Result<(u32, BlockHash)> {
            Ok((h, BlockHash::from_str(&hash).context("parse tip hash")?))
        })
        .transpose()
    }

    fn insert_outputs(conn: &Connection, tx: &Transaction) -> anyhow::Result<()> {
        let txid = tx.compute_txid().to_string();
        for (vout, txout) in tx.output.iter().enumerate() {
            conn.execute(
                "INSERT OR REPLACE INTO outputs(txid,vout,value,script) VALUES(?1,?2,?3,?4)",
                params![
                    txid,
                    vout as u32,
                    txout.value.to_sat() as i64,
                    txout.script_pubkey.as_bytes()
                ],
            )?;
        }
        Ok(())
    }

    fn load_block(conn: &Connection, hash: BlockHash) -> anyhow::Result<Option<(u32, Block)>> {
        let row: Option<(u32, Vec<u8>)> = conn
            .query_row(
                "SELECT height, raw FROM blocks WHERE hash = ?1",
                params![hash.to_string()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        row.map(|(h, raw)| -> anyhow::Result<(u32, Block)> {
            let block: Block = consensus::encode::deserialize(&raw).context("block deserialize")?;
            Ok((h, block))
        })
        .transpose()
    }

    fn load_mempool(conn: &Connection) -> anyhow::Result<Vec<Transaction>> {
        let mut stmt = conn.prepare("SELECT raw FROM mempool ORDER BY seq")?;
        let rows = stmt.query_map([], |row| row.get::<_, Vec<u8>>(0))?;
        let mut txs: Vec<Transaction> = Vec::new();
        for raw in rows {
            txs.push(consensus::encode::deserialize(&raw?).context("mempool tx deserialize")?);
        }
        Ok(txs)
    }

    async fn write<T, F>(&self, f: F) -> anyhow::Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> anyhow::Result<T> + Send + 'static,
    {
        let path = self.path.clone();
        task::spawn_blocking(move || {
            let conn = Connection::open(path)?;
            let tx = conn.unchecked_transaction()?;
            let out = f(&conn)?;
            Self::bump_generation(&conn)?;
            tx.commit()?;
            Ok(out)
        })
        .await?
    }

    /// Append `block` to the active chain and evict its transactions from the mempool.
    /// Returns the new height.
    pub async fn connect_block(&self, block: Block) -> anyhow::Result<u32> {
        self.write(move |conn| {
            let hash = block.block_hash();
            let height = match Self::tip(conn)? {
                Some((h, tip)) => {
                    ensure!(
                        block.header.prev_blockhash == tip,
                        "block {hash} does not extend tip {tip}"
                    );
                    h + 1
                }
                None => 0,
            };

            conn.execute(
                "INSERT OR REPLACE INTO blocks(hash,height,raw) VALUES(?1,?2,?3)",
                params![hash.to_string(), height, consensus::encode::serialize(&block)],
            )?;
            conn.execute(
                "INSERT INTO active_chain(height,hash) VALUES(?1,?2)",
                params![height, hash.to_string()],
            )?;
            for tx in &block.txdata {
                Self::insert_outputs(conn, tx)?;
                conn.execute(
                    "DELETE FROM mempool WHERE txid = ?1",
                    params![tx.compute_txid().to_string()],
                )?;
            }
            Ok(height)
        })
        .await
    }

    /// Detach the tip; the block stays stored and its non-coinbase transactions
    /// re-enter the mempool.
    pub async fn disconnect_tip(&self) -> anyhow::Result<Option<BlockHash>> {
        self.write(|conn| {
            let Some((height, hash)) = Self::tip(conn)? else {
                return Ok(None);
            };
            let (_, block) = Self::load_block(conn, hash)?
                .with_context(|| format!("active block {hash} missing from storage"))?;

            conn.execute("DELETE FROM active_chain WHERE height = ?1", params![height])?;

            let (coinbase, returned): (Vec<&Transaction>, Vec<&Transaction>) =
                block.txdata.iter().partition(|tx| tx.is_coinbase());
            for tx in coinbase {
                conn.execute(
                    "DELETE FROM outputs WHERE txid = ?1",
                    params![tx.compute_txid().to_string()],
                )?;
            }

            // returned txs go in front of the current pool, in block order
            let front: i64 = conn.query_row(
                "SELECT COALESCE(MIN(seq), 1) FROM mempool",
                [],
                |row| row.get(0),
            )?;
            let first = front - returned.len() as i64;
            for (i, tx) in returned.into_iter().enumerate() {
                conn.execute(
                    "INSERT OR IGNORE INTO mempool(seq,txid,raw) VALUES(?1,?2,?3)",
                    params![
                        first + i as i64,
                        tx.compute_txid().to_string(),
                        consensus::encode::serialize(tx)
                    ],
                )?;
            }
            Ok(Some(hash))
        })
        .await
    }

    /// Store a block that is known but not on the active chain (e.g. from a losing fork).
    pub async fn store_stale_block(&self, block: Block, height: u32) -> anyhow::Result<BlockHash> {
        self.write(move |conn| {
            let hash = block.block_hash();
            let active: Option<i64> = conn
                .query_row(
                    "SELECT 1 FROM active_chain WHERE hash = ?1",
                    params![hash.to_string()],
                    |row| row.get(0),
                )
                .optional()?;
            ensure!(active.is_none(), "block {hash} is on the active chain");

            conn.execute(
                "INSERT OR REPLACE INTO blocks(hash,height,raw) VALUES(?1,?2,?3)",
                params![hash.to_string(), height, consensus::encode::serialize(&block)],
            )?;
            Ok(hash)
        })
        .await
    }

    /// Add an unconfirmed transaction.
    pub async fn add_to_mempool(&self, tx: Transaction) -> anyhow::Result<Txid> {
        self.write(move |conn| {
            let txid = tx.compute_txid();
            conn.execute(
                "INSERT OR IGNORE INTO mempool(txid,raw) VALUES(?1,?2)",
                params![txid.to_string(), consensus::encode::serialize(&tx)],
            )?;
            Self::insert_outputs(conn, &tx)?;
            Ok(txid)
        })
        .await
    }

    /// Active tip `(height, hash)`.
    pub async fn tip_block(&self) -> anyhow::Result<Option<(u32, BlockHash)>> {
        let path = self.path.clone();
        task::spawn_blocking(move || {
            let conn = Connection::open(path)?;
            Self::tip(&conn)
        })
        .await?
    }
}

/// Generation-checked view of a [`SqliteChainStore`].
#[derive(Debug, Clone)]
pub struct SqliteSnapshot {
    path: PathBuf,
    generation: u64,
    mempool: Arc<Vec<Transaction>>,
}

impl SqliteSnapshot {
    /// Generation this snapshot reads at.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    async fn read<T, F>(&self, f: F) -> anyhow::Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> anyhow::Result<T> + Send + 'static,
    {
        let path = self.path.clone();
        let expected = self.generation;
        task::spawn_blocking(move || {
            let conn = Connection::open(path)?;
            let tx = conn.unchecked_transaction()?;
            let found = SqliteChainStore::generation(&conn)?;
            if found != expected {
                return Err(StaleSnapshot { expected, found }.into());
            }
            let out = f(&conn)?;
            tx.commit()?;
            Ok(out)
        })
        .await?
    }
}

#[async_trait]
impl ChainSource for SqliteChainStore {
    type Snapshot = SqliteSnapshot;

    async fn snapshot(&self) -> anyhow::Result<SqliteSnapshot> {
        let path = self.path.clone();
        let (generation, mempool) = task::spawn_blocking(move || {
            let conn = Connection::open(path)?;
            let tx = conn.unchecked_transaction()?;
            let generation = Self::generation(&conn)?;
            let mempool = Self::load_mempool(&conn)?;
            tx.commit()?;
            anyhow::Ok((generation, mempool))
        })
        .await??;

        Ok(SqliteSnapshot {
            path: self.path.clone(),
            generation,
            mempool: Arc::new(mempool),
        })
    }
}

#[async_trait]
impl ChainSnapshot for SqliteSnapshot {
    async fn block(&self, hash: BlockHash) -> anyhow::Result<Option<Block>> {
        self.read(move |conn| Ok(SqliteChainStore::load_block(conn, hash)?.map(|(_, b)| b)))
            .await
    }

    async fn is_on_active_chain(&self, hash: BlockHash) -> anyhow::Result<bool> {
        self.read(move |conn| {
            let found: Option<u32> = conn
                .query_row(
                    "SELECT height FROM active_chain WHERE hash = ?1",
                    params![hash.to_string()],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(found.is_some())
        })
        .await
    }

    async fn block_height(&self, hash: BlockHash) -> anyhow::Result<Option<u32>> {
        self.read(move |conn| {
            Ok(conn
                .query_row(
                    "SELECT height FROM blocks WHERE hash = ?1",
                    params![hash.to_string()],
                    |row| row.get(0),
                )
                .optional()?)
        })
        .await
    }

    async fn prev_output(&self, outpoint: OutPoint) -> anyhow::Result<Option<TxOut>> {
        self.read(move |conn| {
            let row: Option<(i64, Vec<u8>)> = conn
                .query_row(
                    "SELECT value, script FROM outputs WHERE txid = ?1 AND vout = ?2",
                    params![outpoint.txid.to_string(), outpoint.vout],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;
            row.map(|(value, script)| -> anyhow::Result<TxOut> {
                Ok(TxOut {
                    value: Amount::from_sat(u64::try_from(value).context("negative output value")?),
                    script_pubkey: ScriptBuf::from_bytes(script),
                })
            })
            .transpose()
        })
        .await
    }

    async fn mempool_transactions(&self) -> anyhow::Result<Vec<Transaction>> {
        Ok(self.mempool.as_ref().clone())
    }
}
