//! SQLite store.
//!
//! Tables: `chain_status` (single row), `blocks`, `actions`, `events`, `abis`.
//! Structured action columns (authorization, data, summary, RAM deltas,
//! notified receivers) are JSON text.
//!
//! # Usage
//! ```rust,no_run
//! use shipindex_storage::sqlite::SqliteStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = SqliteStore::open("./shipindex.db").await?;
//! let scratch = SqliteStore::in_memory().await?;
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use indexmap::IndexSet;
use sqlx::sqlite::{SqlitePoolOptions, SqliteRow};
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use tracing::debug;

use shipindex_core::error::IndexerError;
use shipindex_core::store::{ChainStore, StoreTransaction};
use shipindex_core::types::{
    BlockPosition, BlockRecord, ChainEvent, ChainStatus, EventKind, FlattenedAction, StoredAbi,
};

use crate::StoredAction;

/// Placeholders per `IN (...)` delete, under SQLite's bind limit.
const DELETE_CHUNK: usize = 500;

fn storage_err(e: impl ToString) -> IndexerError {
    IndexerError::Storage(e.to_string())
}

fn to_json<T: serde::Serialize + ?Sized>(value: &T) -> Result<String, IndexerError> {
    serde_json::to_string(value).map_err(storage_err)
}

fn from_json<T: serde::de::DeserializeOwned>(column: &str, text: &str) -> Result<T, IndexerError> {
    serde_json::from_str(text).map_err(|e| IndexerError::Storage(format!("column {column}: {e}")))
}

/// SQLite-backed chain store.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (or create) a database at `path`. Accepts a plain path or a
    /// full `sqlite:` URL.
    pub async fn open(path: &str) -> Result<Self, IndexerError> {
        let url = if path.starts_with("sqlite:") {
            if path.contains('?') || path.contains(":memory:") {
                path.to_string()
            } else {
                format!("{path}?mode=rwc")
            }
        } else {
            format!("sqlite:{path}?mode=rwc")
        };

        let pool = SqlitePool::connect(&url).await.map_err(storage_err)?;
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    /// A private in-memory database, gone when the store is dropped.
    pub async fn in_memory() -> Result<Self, IndexerError> {
        // Every connection to `:memory:` is its own database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .map_err(storage_err)?;
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<(), IndexerError> {
        sqlx::query("PRAGMA journal_mode=WAL;")
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;

        let statements = [
            "CREATE TABLE IF NOT EXISTS chain_status (
                id           INTEGER PRIMARY KEY CHECK (id = 1),
                head         INTEGER NOT NULL,
                irreversible INTEGER NOT NULL
            );",
            "CREATE TABLE IF NOT EXISTS blocks (
                block_num INTEGER PRIMARY KEY,
                block_id  TEXT    NOT NULL,
                timestamp TEXT    NOT NULL,
                producer  TEXT    NOT NULL
            );",
            "CREATE TABLE IF NOT EXISTS actions (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                global_sequence INTEGER NOT NULL,
                parent          INTEGER NOT NULL,
                block_num       INTEGER NOT NULL,
                trx_id          TEXT    NOT NULL,
                producer        TEXT    NOT NULL,
                timestamp       TEXT    NOT NULL,
                account         TEXT    NOT NULL,
                name            TEXT    NOT NULL,
                authorization   TEXT    NOT NULL,
                data            TEXT    NOT NULL,
                summary         TEXT,
                ram_deltas      TEXT    NOT NULL,
                notified        TEXT    NOT NULL
            );",
            "CREATE INDEX IF NOT EXISTS idx_actions_block ON actions (block_num);",
            "CREATE INDEX IF NOT EXISTS idx_actions_contract ON actions (account, name);",
            "CREATE TABLE IF NOT EXISTS events (
                id         INTEGER PRIMARY KEY AUTOINCREMENT,
                kind       INTEGER NOT NULL,
                action_ids TEXT    NOT NULL,
                block_num  INTEGER NOT NULL,
                timestamp  TEXT    NOT NULL
            );",
            "CREATE TABLE IF NOT EXISTS abis (
                account    TEXT    PRIMARY KEY,
                abi        TEXT    NOT NULL,
                block_num  INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );",
        ];
        for sql in statements {
            sqlx::query(sql)
                .execute(&self.pool)
                .await
                .map_err(storage_err)?;
        }
        Ok(())
    }

    // ─── Read helpers ────────────────────────────────────────────────────────

    /// Committed actions in id order, optionally limited to one block.
    pub async fn actions(&self, block_num: Option<u32>) -> Result<Vec<StoredAction>, IndexerError> {
        let rows = match block_num {
            Some(num) => sqlx::query("SELECT * FROM actions WHERE block_num = ? ORDER BY id")
                .bind(i64::from(num))
                .fetch_all(&self.pool)
                .await,
            None => sqlx::query("SELECT * FROM actions ORDER BY id")
                .fetch_all(&self.pool)
                .await,
        }
        .map_err(storage_err)?;

        rows.iter().map(action_from_row).collect()
    }

    pub async fn events(&self) -> Result<Vec<ChainEvent>, IndexerError> {
        let rows = sqlx::query("SELECT kind, action_ids, block_num, timestamp FROM events ORDER BY id")
            .fetch_all(&self.pool)
            .await
            .map_err(storage_err)?;

        let mut events = Vec::with_capacity(rows.len());
        for row in rows {
            let code: i64 = row.get("kind");
            let kind = EventKind::from_code(code)
                .ok_or_else(|| IndexerError::Storage(format!("unknown event kind {code}")))?;
            let ids: String = row.get("action_ids");
            let action_ids = ids
                .split(',')
                .filter(|s| !s.is_empty())
                .map(|s| s.parse::<i64>().map_err(storage_err))
                .collect::<Result<Vec<_>, _>>()?;
            events.push(ChainEvent {
                kind,
                action_ids,
                block_num: row.get::<i64, _>("block_num") as u32,
                timestamp: row.get("timestamp"),
            });
        }
        Ok(events)
    }

    pub async fn block_count(&self) -> Result<u64, IndexerError> {
        let row = sqlx::query("SELECT COUNT(*) as cnt FROM blocks")
            .fetch_one(&self.pool)
            .await
            .map_err(storage_err)?;
        Ok(row.get::<i64, _>("cnt") as u64)
    }
}

fn action_from_row(row: &SqliteRow) -> Result<StoredAction, IndexerError> {
    let summary: Option<String> = row.get("summary");
    let action = FlattenedAction {
        global_sequence: row.get::<i64, _>("global_sequence") as u64,
        parent: row.get::<i64, _>("parent") as u64,
        block_num: row.get::<i64, _>("block_num") as u32,
        trx_id: row.get("trx_id"),
        producer: row.get("producer"),
        timestamp: row.get("timestamp"),
        account: row.get("account"),
        name: row.get("name"),
        authorization: from_json("authorization", row.get("authorization"))?,
        data: from_json("data", row.get("data"))?,
        summary: summary.as_deref().map(|s| from_json("summary", s)).transpose()?,
        ram_deltas: from_json("ram_deltas", row.get("ram_deltas"))?,
        notified: from_json::<IndexSet<String>>("notified", row.get("notified"))?,
    };
    Ok(StoredAction {
        id: row.get("id"),
        action,
    })
}

// ─── ChainStore impl ─────────────────────────────────────────────────────────

#[async_trait]
impl ChainStore for SqliteStore {
    async fn load_status(&self) -> Result<ChainStatus, IndexerError> {
        let row = sqlx::query("SELECT head, irreversible FROM chain_status WHERE id = 1")
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err)?;

        Ok(row
            .map(|r| ChainStatus {
                head: r.get::<i64, _>("head") as u32,
                irreversible: r.get::<i64, _>("irreversible") as u32,
            })
            .unwrap_or_default())
    }

    async fn block_positions(&self, from: u32, to: u32) -> Result<Vec<BlockPosition>, IndexerError> {
        let rows = sqlx::query(
            "SELECT block_num, block_id FROM blocks
             WHERE block_num >= ? AND block_num <= ? ORDER BY block_num",
        )
        .bind(i64::from(from))
        .bind(i64::from(to))
        .fetch_all(&self.pool)
        .await
        .map_err(storage_err)?;

        Ok(rows
            .into_iter()
            .map(|r| BlockPosition {
                block_num: r.get::<i64, _>("block_num") as u32,
                block_id: r.get("block_id"),
            })
            .collect())
    }

    async fn load_abi(&self, account: &str) -> Result<Option<StoredAbi>, IndexerError> {
        let row = sqlx::query("SELECT account, abi, block_num FROM abis WHERE account = ? AND abi != ''")
            .bind(account)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err)?;

        Ok(row.map(|r| StoredAbi {
            account: r.get("account"),
            abi_json: r.get("abi"),
            block_num: r.get::<i64, _>("block_num") as u32,
        }))
    }

    async fn save_abi(
        &self,
        account: &str,
        abi_json: Option<&str>,
        block_num: u32,
    ) -> Result<(), IndexerError> {
        sqlx::query(
            "INSERT OR REPLACE INTO abis (account, abi, block_num, updated_at)
             VALUES (?, ?, ?, ?)",
        )
        .bind(account)
        .bind(abi_json.unwrap_or_default())
        .bind(i64::from(block_num))
        .bind(chrono::Utc::now().timestamp())
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        debug!(account, block = block_num, cleared = abi_json.is_none(), "abi saved");
        Ok(())
    }

    async fn begin(&self) -> Result<Box<dyn StoreTransaction>, IndexerError> {
        let tx = self.pool.begin().await.map_err(storage_err)?;
        Ok(Box::new(SqliteTransaction { tx }))
    }
}

// ─── StoreTransaction impl ───────────────────────────────────────────────────

struct SqliteTransaction {
    tx: Transaction<'static, Sqlite>,
}

#[async_trait]
impl StoreTransaction for SqliteTransaction {
    async fn write_status(&mut self, status: ChainStatus) -> Result<(), IndexerError> {
        sqlx::query(
            "INSERT INTO chain_status (id, head, irreversible) VALUES (1, ?, ?)
             ON CONFLICT(id) DO UPDATE SET head = excluded.head, irreversible = excluded.irreversible",
        )
        .bind(i64::from(status.head))
        .bind(i64::from(status.irreversible))
        .execute(&mut *self.tx)
        .await
        .map_err(storage_err)?;
        Ok(())
    }

    async fn action_ids_from(&mut self, from: u32) -> Result<Vec<i64>, IndexerError> {
        let rows = sqlx::query("SELECT id FROM actions WHERE block_num >= ? ORDER BY id")
            .bind(i64::from(from))
            .fetch_all(&mut *self.tx)
            .await
            .map_err(storage_err)?;
        Ok(rows.into_iter().map(|r| r.get::<i64, _>("id")).collect())
    }

    async fn delete_actions(&mut self, ids: &[i64]) -> Result<(), IndexerError> {
        for chunk in ids.chunks(DELETE_CHUNK) {
            let placeholders = vec!["?"; chunk.len()].join(",");
            let sql = format!("DELETE FROM actions WHERE id IN ({placeholders})");
            let mut query = sqlx::query(&sql);
            for id in chunk {
                query = query.bind(*id);
            }
            query.execute(&mut *self.tx).await.map_err(storage_err)?;
        }
        Ok(())
    }

    async fn delete_blocks_from(&mut self, from: u32) -> Result<(), IndexerError> {
        sqlx::query("DELETE FROM blocks WHERE block_num >= ?")
            .bind(i64::from(from))
            .execute(&mut *self.tx)
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    async fn delete_blocks_below(&mut self, below: u32) -> Result<(), IndexerError> {
        sqlx::query("DELETE FROM blocks WHERE block_num < ?")
            .bind(i64::from(below))
            .execute(&mut *self.tx)
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    async fn insert_block(&mut self, block: &BlockRecord) -> Result<(), IndexerError> {
        sqlx::query(
            "INSERT INTO blocks (block_num, block_id, timestamp, producer) VALUES (?, ?, ?, ?)",
        )
        .bind(i64::from(block.block_num))
        .bind(&block.block_id)
        .bind(&block.timestamp)
        .bind(&block.producer)
        .execute(&mut *self.tx)
        .await
        .map_err(storage_err)?;
        Ok(())
    }

    async fn insert_actions(&mut self, actions: &[FlattenedAction]) -> Result<Vec<i64>, IndexerError> {
        let mut ids = Vec::with_capacity(actions.len());
        for action in actions {
            let summary = action.summary.as_ref().map(to_json).transpose()?;
            let result = sqlx::query(
                "INSERT INTO actions
                 (global_sequence, parent, block_num, trx_id, producer, timestamp, account, name,
                  authorization, data, summary, ram_deltas, notified)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(action.global_sequence as i64)
            .bind(action.parent as i64)
            .bind(i64::from(action.block_num))
            .bind(&action.trx_id)
            .bind(&action.producer)
            .bind(&action.timestamp)
            .bind(&action.account)
            .bind(&action.name)
            .bind(to_json(&action.authorization)?)
            .bind(to_json(&action.data)?)
            .bind(summary)
            .bind(to_json(&action.ram_deltas)?)
            .bind(to_json(&action.notified)?)
            .execute(&mut *self.tx)
            .await
            .map_err(storage_err)?;
            ids.push(result.last_insert_rowid());
        }
        Ok(ids)
    }

    async fn insert_event(&mut self, event: &ChainEvent) -> Result<(), IndexerError> {
        let ids = event
            .action_ids
            .iter()
            .map(i64::to_string)
            .collect::<Vec<_>>()
            .join(",");
        sqlx::query("INSERT INTO events (kind, action_ids, block_num, timestamp) VALUES (?, ?, ?, ?)")
            .bind(event.kind.code())
            .bind(ids)
            .bind(i64::from(event.block_num))
            .bind(&event.timestamp)
            .execute(&mut *self.tx)
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), IndexerError> {
        self.tx.commit().await.map_err(storage_err)
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use shipindex_core::types::{ActionSummary, PermissionLevel};

    fn block(num: u32) -> BlockRecord {
        BlockRecord {
            block_num: num,
            block_id: format!("{num:064x}"),
            timestamp: "2021-06-01T12:00:00.500".into(),
            producer: "eosproducer1".into(),
        }
    }

    fn transfer(block_num: u32, seq: u64) -> FlattenedAction {
        FlattenedAction {
            global_sequence: seq,
            parent: 0,
            block_num,
            trx_id: "ab".repeat(32),
            producer: "eosproducer1".into(),
            timestamp: "2021-06-01T12:00:00.500".into(),
            account: "eosio.token".into(),
            name: "transfer".into(),
            authorization: vec![PermissionLevel {
                actor: "alice".into(),
                permission: "active".into(),
            }],
            data: serde_json::json!({"from": "alice", "to": "bob", "amount": 1.5, "symbol": "EOS"}),
            summary: Some(ActionSummary::Transfer {
                from: "alice".into(),
                to: "bob".into(),
                amount: 1.5,
                symbol: "EOS".into(),
                memo: String::new(),
            }),
            ram_deltas: Vec::new(),
            notified: IndexSet::from(["eosio.token".to_string(), "alice".to_string(), "bob".to_string()]),
        }
    }

    #[tokio::test]
    async fn empty_database_has_unset_status() {
        let store = SqliteStore::in_memory().await.unwrap();
        assert!(store.load_status().await.unwrap().is_unset());
        assert!(store.block_positions(1, 100).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn block_commit_roundtrip() {
        let store = SqliteStore::in_memory().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        tx.write_status(ChainStatus { head: 42, irreversible: 40 }).await.unwrap();
        tx.insert_block(&block(42)).await.unwrap();
        let ids = tx.insert_actions(&[transfer(42, 900), transfer(42, 901)]).await.unwrap();
        assert_eq!(ids.len(), 2);
        tx.insert_event(&ChainEvent {
            kind: EventKind::NewActions,
            action_ids: ids.clone(),
            block_num: 42,
            timestamp: "2021-06-01T12:00:00.500".into(),
        })
        .await
        .unwrap();
        tx.commit().await.unwrap();

        assert_eq!(store.load_status().await.unwrap(), ChainStatus { head: 42, irreversible: 40 });
        assert_eq!(store.block_positions(40, 50).await.unwrap(), vec![block(42).position()]);

        let actions = store.actions(Some(42)).await.unwrap();
        assert_eq!(actions.len(), 2);
        assert_eq!(actions[0].action, transfer(42, 900));
        assert_eq!(
            actions[0].action.notified.iter().collect::<Vec<_>>(),
            vec!["eosio.token", "alice", "bob"]
        );

        let events = store.events().await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].action_ids, ids);
    }

    #[tokio::test]
    async fn uncommitted_block_is_rolled_back() {
        let store = SqliteStore::in_memory().await.unwrap();
        {
            let mut tx = store.begin().await.unwrap();
            tx.write_status(ChainStatus { head: 7, irreversible: 7 }).await.unwrap();
            tx.insert_block(&block(7)).await.unwrap();
        }
        assert!(store.load_status().await.unwrap().is_unset());
        assert_eq!(store.block_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn fork_and_prune_deletes() {
        let store = SqliteStore::in_memory().await.unwrap();
        let mut tx = store.begin().await.unwrap();
        for n in 1..=5 {
            tx.insert_block(&block(n)).await.unwrap();
        }
        tx.insert_actions(&[transfer(3, 1), transfer(4, 2), transfer(5, 3)]).await.unwrap();
        tx.commit().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        let ids = tx.action_ids_from(4).await.unwrap();
        assert_eq!(ids.len(), 2);
        tx.delete_actions(&ids).await.unwrap();
        tx.delete_blocks_from(4).await.unwrap();
        tx.delete_blocks_below(2).await.unwrap();
        tx.commit().await.unwrap();

        let nums: Vec<u32> = store
            .block_positions(0, 10)
            .await
            .unwrap()
            .into_iter()
            .map(|p| p.block_num)
            .collect();
        assert_eq!(nums, vec![2, 3]);
        assert_eq!(store.actions(None).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn duplicate_block_number_fails() {
        let store = SqliteStore::in_memory().await.unwrap();
        let mut tx = store.begin().await.unwrap();
        tx.insert_block(&block(9)).await.unwrap();
        assert!(matches!(
            tx.insert_block(&block(9)).await,
            Err(IndexerError::Storage(_))
        ));
    }

    #[tokio::test]
    async fn abi_upsert_and_clear() {
        let store = SqliteStore::in_memory().await.unwrap();
        store.save_abi("eosio", Some(r#"{"version":"eosio::abi/1.1"}"#), 2).await.unwrap();
        store.save_abi("eosio", Some(r#"{"version":"eosio::abi/1.2"}"#), 8).await.unwrap();

        let abi = store.load_abi("eosio").await.unwrap().unwrap();
        assert_eq!(abi.block_num, 8);
        assert!(abi.abi_json.contains("1.2"));

        store.save_abi("eosio", None, 9).await.unwrap();
        assert!(store.load_abi("eosio").await.unwrap().is_none());
    }
}
