//! In-memory store.
//!
//! A transaction records only its own writes and applies them under the lock
//! on commit, so an uncommitted block leaves no trace and a commit costs what
//! the block wrote, not what the store holds. Useful for tests and replays
//! that don't need persistence.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use shipindex_core::error::IndexerError;
use shipindex_core::store::{ChainStore, StoreTransaction};
use shipindex_core::types::{
    BlockPosition, BlockRecord, ChainEvent, ChainStatus, FlattenedAction, StoredAbi,
};

use crate::StoredAction;

/// The tables a block transaction touches.
#[derive(Debug, Default)]
struct ChainTables {
    status: ChainStatus,
    blocks: BTreeMap<u32, BlockRecord>,
    actions: BTreeMap<i64, FlattenedAction>,
    /// block number → ids of the actions stored for it
    actions_by_block: BTreeMap<u32, Vec<i64>>,
    events: Vec<ChainEvent>,
    next_action_id: i64,
}

impl ChainTables {
    fn remove_action(&mut self, id: i64) {
        let Some(action) = self.actions.remove(&id) else {
            return;
        };
        if let Some(ids) = self.actions_by_block.get_mut(&action.block_num) {
            ids.retain(|i| *i != id);
            if ids.is_empty() {
                self.actions_by_block.remove(&action.block_num);
            }
        }
    }

    fn insert_action(&mut self, id: i64, action: FlattenedAction) {
        self.actions_by_block.entry(action.block_num).or_default().push(id);
        self.actions.insert(id, action);
        self.next_action_id = self.next_action_id.max(id);
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    chain: ChainTables,
    abis: HashMap<String, StoredAbi>,
}

/// In-memory chain store. Clones share the same data.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

fn lock(state: &Mutex<MemoryState>) -> MutexGuard<'_, MemoryState> {
    state.lock().unwrap_or_else(|e| e.into_inner())
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current committed status.
    pub fn status(&self) -> ChainStatus {
        lock(&self.state).chain.status
    }

    pub fn blocks(&self) -> Vec<BlockRecord> {
        lock(&self.state).chain.blocks.values().cloned().collect()
    }

    /// Committed actions in id order.
    pub fn actions(&self) -> Vec<StoredAction> {
        lock(&self.state)
            .chain
            .actions
            .iter()
            .map(|(id, action)| StoredAction {
                id: *id,
                action: action.clone(),
            })
            .collect()
    }

    pub fn events(&self) -> Vec<ChainEvent> {
        lock(&self.state).chain.events.clone()
    }

    /// Raw ABI row, including cleared ones.
    pub fn abi_row(&self, account: &str) -> Option<StoredAbi> {
        lock(&self.state).abis.get(account).cloned()
    }
}

#[async_trait]
impl ChainStore for MemoryStore {
    async fn load_status(&self) -> Result<ChainStatus, IndexerError> {
        Ok(self.status())
    }

    async fn block_positions(&self, from: u32, to: u32) -> Result<Vec<BlockPosition>, IndexerError> {
        if from > to {
            return Ok(Vec::new());
        }
        Ok(lock(&self.state)
            .chain
            .blocks
            .range(from..=to)
            .map(|(_, b)| b.position())
            .collect())
    }

    async fn load_abi(&self, account: &str) -> Result<Option<StoredAbi>, IndexerError> {
        Ok(lock(&self.state)
            .abis
            .get(account)
            .filter(|a| !a.abi_json.is_empty())
            .cloned())
    }

    async fn save_abi(
        &self,
        account: &str,
        abi_json: Option<&str>,
        block_num: u32,
    ) -> Result<(), IndexerError> {
        lock(&self.state).abis.insert(
            account.to_string(),
            StoredAbi {
                account: account.to_string(),
                abi_json: abi_json.unwrap_or_default().to_string(),
                block_num,
            },
        );
        Ok(())
    }

    async fn begin(&self) -> Result<Box<dyn StoreTransaction>, IndexerError> {
        let next_action_id = lock(&self.state).chain.next_action_id;
        Ok(Box::new(MemoryTransaction {
            state: Arc::clone(&self.state),
            next_action_id,
            status: None,
            removed_actions: HashSet::new(),
            removed_blocks_from: None,
            removed_blocks_below: None,
            blocks: BTreeMap::new(),
            actions: Vec::new(),
            events: Vec::new(),
        }))
    }
}

/// Writes of one block, not yet visible to readers.
///
/// Deletes recorded here apply to committed rows; rows inserted by this
/// transaction are removed from the pending lists directly.
struct MemoryTransaction {
    state: Arc<Mutex<MemoryState>>,
    next_action_id: i64,
    status: Option<ChainStatus>,
    removed_actions: HashSet<i64>,
    removed_blocks_from: Option<u32>,
    removed_blocks_below: Option<u32>,
    blocks: BTreeMap<u32, BlockRecord>,
    actions: Vec<(i64, FlattenedAction)>,
    events: Vec<ChainEvent>,
}

impl MemoryTransaction {
    /// Whether a committed block row survives this transaction's range deletes.
    fn keeps_committed_block(&self, num: u32) -> bool {
        self.removed_blocks_from.map_or(true, |from| num < from)
            && self.removed_blocks_below.map_or(true, |below| num >= below)
    }
}

#[async_trait]
impl StoreTransaction for MemoryTransaction {
    async fn write_status(&mut self, status: ChainStatus) -> Result<(), IndexerError> {
        self.status = Some(status);
        Ok(())
    }

    async fn action_ids_from(&mut self, from: u32) -> Result<Vec<i64>, IndexerError> {
        let mut ids: Vec<i64> = lock(&self.state)
            .chain
            .actions_by_block
            .range(from..)
            .flat_map(|(_, ids)| ids.iter().copied())
            .filter(|id| !self.removed_actions.contains(id))
            .collect();
        ids.extend(
            self.actions
                .iter()
                .filter(|(_, a)| a.block_num >= from)
                .map(|(id, _)| *id),
        );
        ids.sort_unstable();
        Ok(ids)
    }

    async fn delete_actions(&mut self, ids: &[i64]) -> Result<(), IndexerError> {
        let ids: HashSet<i64> = ids.iter().copied().collect();
        self.actions.retain(|(id, _)| !ids.contains(id));
        self.removed_actions.extend(ids);
        Ok(())
    }

    async fn delete_blocks_from(&mut self, from: u32) -> Result<(), IndexerError> {
        self.blocks.retain(|num, _| *num < from);
        self.removed_blocks_from = Some(self.removed_blocks_from.map_or(from, |f| f.min(from)));
        Ok(())
    }

    async fn delete_blocks_below(&mut self, below: u32) -> Result<(), IndexerError> {
        self.blocks.retain(|num, _| *num >= below);
        self.removed_blocks_below = Some(self.removed_blocks_below.map_or(below, |b| b.max(below)));
        Ok(())
    }

    async fn insert_block(&mut self, block: &BlockRecord) -> Result<(), IndexerError> {
        let num = block.block_num;
        let committed = lock(&self.state).chain.blocks.contains_key(&num);
        if self.blocks.contains_key(&num) || (committed && self.keeps_committed_block(num)) {
            return Err(IndexerError::Storage(format!("block {num} already stored")));
        }
        self.blocks.insert(num, block.clone());
        Ok(())
    }

    async fn insert_actions(&mut self, actions: &[FlattenedAction]) -> Result<Vec<i64>, IndexerError> {
        let mut ids = Vec::with_capacity(actions.len());
        for action in actions {
            self.next_action_id += 1;
            let id = self.next_action_id;
            self.actions.push((id, action.clone()));
            ids.push(id);
        }
        Ok(ids)
    }

    async fn insert_event(&mut self, event: &ChainEvent) -> Result<(), IndexerError> {
        self.events.push(event.clone());
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), IndexerError> {
        let tx = *self;
        let mut guard = lock(&tx.state);
        let chain = &mut guard.chain;

        if let Some(status) = tx.status {
            chain.status = status;
        }
        for id in tx.removed_actions {
            chain.remove_action(id);
        }
        if let Some(from) = tx.removed_blocks_from {
            chain.blocks.split_off(&from);
        }
        if let Some(below) = tx.removed_blocks_below {
            chain.blocks = chain.blocks.split_off(&below);
        }
        chain.blocks.extend(tx.blocks);
        for (id, action) in tx.actions {
            chain.insert_action(id, action);
        }
        chain.events.extend(tx.events);
        Ok(())
    }
}
