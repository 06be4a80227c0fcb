//! Durable store contract.
//!
//! Everything written for one block goes through a single
//! [`StoreTransaction`]; the block is either fully committed or not at all.
//! ABI writes happen outside block transactions.
//!
//! Implementations live in `shipindex-storage` (`MemoryStore`, `SqliteStore`).

use async_trait::async_trait;

use crate::error::IndexerError;
use crate::types::{BlockPosition, BlockRecord, ChainEvent, ChainStatus, FlattenedAction, StoredAbi};

#[async_trait]
pub trait ChainStore: Send + Sync {
    /// The persisted status, or the zero status on a fresh store.
    async fn load_status(&self) -> Result<ChainStatus, IndexerError>;

    /// Stored block positions with `from <= block_num <= to`, ascending.
    async fn block_positions(&self, from: u32, to: u32) -> Result<Vec<BlockPosition>, IndexerError>;

    /// The last ABI saved for `account`. A cleared ABI reads as `None`.
    async fn load_abi(&self, account: &str) -> Result<Option<StoredAbi>, IndexerError>;

    /// Upsert an account's ABI JSON. `None` records that the ABI was cleared.
    async fn save_abi(
        &self,
        account: &str,
        abi_json: Option<&str>,
        block_num: u32,
    ) -> Result<(), IndexerError>;

    /// Open the unit of work for one block.
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>, IndexerError>;
}

/// One block's unit of work. Dropping it without [`commit`](Self::commit)
/// discards every write.
#[async_trait]
pub trait StoreTransaction: Send {
    async fn write_status(&mut self, status: ChainStatus) -> Result<(), IndexerError>;

    /// Ids of stored actions with `block_num >= from`, ascending.
    async fn action_ids_from(&mut self, from: u32) -> Result<Vec<i64>, IndexerError>;

    async fn delete_actions(&mut self, ids: &[i64]) -> Result<(), IndexerError>;

    /// Delete block rows with `block_num >= from`.
    async fn delete_blocks_from(&mut self, from: u32) -> Result<(), IndexerError>;

    /// Delete block rows with `block_num < below`.
    async fn delete_blocks_below(&mut self, below: u32) -> Result<(), IndexerError>;

    async fn insert_block(&mut self, block: &BlockRecord) -> Result<(), IndexerError>;

    /// Insert actions in order, returning their assigned ids in the same order.
    async fn insert_actions(&mut self, actions: &[FlattenedAction]) -> Result<Vec<i64>, IndexerError>;

    async fn insert_event(&mut self, event: &ChainEvent) -> Result<(), IndexerError>;

    async fn commit(self: Box<Self>) -> Result<(), IndexerError>;
}
