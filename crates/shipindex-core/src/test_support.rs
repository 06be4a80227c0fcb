//! ABI-only store for unit tests of the cache and flattener.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::IndexerError;
use crate::store::{ChainStore, StoreTransaction};
use crate::types::{BlockPosition, ChainStatus, StoredAbi};

#[derive(Default)]
pub struct StubStore {
    pub abis: Mutex<HashMap<String, StoredAbi>>,
}

#[async_trait]
impl ChainStore for StubStore {
    async fn load_status(&self) -> Result<ChainStatus, IndexerError> {
        Ok(ChainStatus::default())
    }

    async fn block_positions(&self, _from: u32, _to: u32) -> Result<Vec<BlockPosition>, IndexerError> {
        Ok(Vec::new())
    }

    async fn load_abi(&self, account: &str) -> Result<Option<StoredAbi>, IndexerError> {
        Ok(self
            .abis
            .lock()
            .unwrap()
            .get(account)
            .filter(|a| !a.abi_json.is_empty())
            .cloned())
    }

    async fn save_abi(&self, account: &str, abi_json: Option<&str>, block_num: u32) -> Result<(), IndexerError> {
        self.abis.lock().unwrap().insert(
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
        Err(IndexerError::Storage("stub store has no transactions".into()))
    }
}
