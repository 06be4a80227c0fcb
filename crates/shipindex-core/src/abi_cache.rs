//! Per-account contract ABI cache.
//!
//! Lookup order on a miss: memory, then the store, then the remote provider
//! (bounded by a timeout). A remote hit is written back to the store. There is
//! one entry per account: a `setabi` replaces it outright, so actions are
//! always decoded with the newest ABI seen, not the one in force at their
//! block.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use shipindex_abi::{AbiDef, AbiProvider, AbiValue, CodecError, TypeRegistry};
use tracing::{debug, info};

use crate::error::IndexerError;
use crate::store::ChainStore;

/// A compiled contract ABI.
#[derive(Debug, Clone)]
pub struct ContractAbi {
    pub account: String,
    pub def: AbiDef,
    pub registry: TypeRegistry,
}

impl ContractAbi {
    pub fn new(account: impl Into<String>, def: AbiDef) -> Result<Self, CodecError> {
        let registry = TypeRegistry::new(&def)?;
        Ok(Self {
            account: account.into(),
            def,
            registry,
        })
    }

    pub fn decode_action(&self, name: &str, data: &[u8]) -> Result<AbiValue, CodecError> {
        self.registry.decode_action(name, data)
    }
}

/// Where a resolved ABI came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbiSource {
    Memory,
    Store,
    Remote,
}

pub struct AbiCache {
    entries: HashMap<String, Arc<ContractAbi>>,
    store: Arc<dyn ChainStore>,
    provider: Arc<dyn AbiProvider>,
    /// Accounts whose `setabi` actions are applied.
    parse_abis: HashSet<String>,
    timeout: Duration,
}

impl AbiCache {
    pub fn new(
        store: Arc<dyn ChainStore>,
        provider: Arc<dyn AbiProvider>,
        parse_abis: impl IntoIterator<Item = String>,
        timeout: Duration,
    ) -> Self {
        Self {
            entries: HashMap::new(),
            store,
            provider,
            parse_abis: parse_abis.into_iter().collect(),
            timeout,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, account: &str) -> bool {
        self.entries.contains_key(account)
    }

    /// Whether `setabi` for `account` is applied.
    pub fn tracks(&self, account: &str) -> bool {
        self.parse_abis.contains(account)
    }

    /// The ABI for `account`. `block_num` is recorded with a remote fetch.
    pub async fn resolve(
        &mut self,
        account: &str,
        block_num: u32,
    ) -> Result<Arc<ContractAbi>, IndexerError> {
        self.resolve_with_source(account, block_num)
            .await
            .map(|(abi, _)| abi)
    }

    pub async fn resolve_with_source(
        &mut self,
        account: &str,
        block_num: u32,
    ) -> Result<(Arc<ContractAbi>, AbiSource), IndexerError> {
        if let Some(abi) = self.entries.get(account) {
            return Ok((Arc::clone(abi), AbiSource::Memory));
        }

        let (def, source) = match self.store.load_abi(account).await? {
            Some(stored) => {
                debug!(account, block = stored.block_num, "abi loaded from store");
                let def = AbiDef::from_json(&stored.abi_json)
                    .map_err(|e| IndexerError::resolution(account, e))?;
                (def, AbiSource::Store)
            }
            None => {
                let bytes = tokio::time::timeout(self.timeout, self.provider.fetch_abi(account))
                    .await
                    .map_err(|_| {
                        IndexerError::resolution(
                            account,
                            format!("remote fetch timed out after {:?}", self.timeout),
                        )
                    })?
                    .map_err(|e| IndexerError::resolution(account, e))?;
                let def = AbiDef::from_bin(&bytes).map_err(|e| IndexerError::resolution(account, e))?;
                let json = def.to_json()?;
                self.store.save_abi(account, Some(&json), block_num).await?;
                info!(account, block = block_num, "abi fetched from remote");
                (def, AbiSource::Remote)
            }
        };

        let abi = Arc::new(
            ContractAbi::new(account, def).map_err(|e| IndexerError::resolution(account, e))?,
        );
        self.entries.insert(account.to_string(), Arc::clone(&abi));
        Ok((abi, source))
    }

    /// Apply a `setabi` seen at `block_num`. Empty `abi_bytes` clears the
    /// account's ABI. Returns `false` when the account is not tracked.
    pub async fn apply_setabi(
        &mut self,
        account: &str,
        abi_bytes: &[u8],
        block_num: u32,
    ) -> Result<bool, IndexerError> {
        if !self.tracks(account) {
            return Ok(false);
        }
        info!(account, block = block_num, "contract abi updated");

        if abi_bytes.is_empty() {
            self.entries.remove(account);
            self.store.save_abi(account, None, block_num).await?;
            return Ok(true);
        }

        let def = AbiDef::from_bin(abi_bytes).map_err(|e| IndexerError::resolution(account, e))?;
        let json = def.to_json()?;
        let abi = ContractAbi::new(account, def).map_err(|e| IndexerError::resolution(account, e))?;
        self.entries.insert(account.to_string(), Arc::new(abi));
        self.store.save_abi(account, Some(&json), block_num).await?;
        Ok(true)
    }

    /// Seed an entry directly, bypassing store and remote.
    pub fn insert(&mut self, abi: ContractAbi) {
        self.entries.insert(abi.account.clone(), Arc::new(abi));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::StubStore;
    use async_trait::async_trait;
    use shipindex_abi::{RemoteError, StaticAbiProvider};

    const HELLO_ABI: &str = r#"{
        "version": "eosio::abi/1.1",
        "structs": [{"name": "hi", "base": "", "fields": [{"name": "user", "type": "name"}]}],
        "actions": [{"name": "hi", "type": "hi", "ricardian_contract": ""}]
    }"#;

    fn hello_bin() -> Vec<u8> {
        AbiDef::from_json(HELLO_ABI).unwrap().to_bin().unwrap()
    }

    fn cache_with(store: Arc<StubStore>, provider: impl AbiProvider + 'static) -> AbiCache {
        AbiCache::new(
            store,
            Arc::new(provider),
            ["eosio".to_string(), "hello".to_string()],
            Duration::from_millis(200),
        )
    }

    #[tokio::test]
    async fn remote_hit_is_persisted_then_served_from_memory() {
        let store = Arc::new(StubStore::default());
        let mut cache = cache_with(store.clone(), StaticAbiProvider::new().with_abi("hello", hello_bin()));

        let (abi, source) = cache.resolve_with_source("hello", 77).await.unwrap();
        assert_eq!(source, AbiSource::Remote);
        assert_eq!(abi.registry.action_type("hi"), Some("hi"));
        let saved = store.abis.lock().unwrap().get("hello").cloned().unwrap();
        assert_eq!(saved.block_num, 77);

        let (_, source) = cache.resolve_with_source("hello", 78).await.unwrap();
        assert_eq!(source, AbiSource::Memory);
    }

    #[tokio::test]
    async fn store_is_consulted_before_remote() {
        let store = Arc::new(StubStore::default());
        store.save_abi("hello", Some(HELLO_ABI), 5).await.unwrap();
        let mut cache = cache_with(store, StaticAbiProvider::new());

        let (_, source) = cache.resolve_with_source("hello", 9).await.unwrap();
        assert_eq!(source, AbiSource::Store);
    }

    #[tokio::test]
    async fn missing_abi_is_a_resolution_error() {
        let mut cache = cache_with(Arc::new(StubStore::default()), StaticAbiProvider::new());
        let err = cache.resolve("nobody", 1).await.unwrap_err();
        assert!(matches!(err, IndexerError::SchemaResolution { ref account, .. } if account == "nobody"));
        assert!(!cache.contains("nobody"));
    }

    #[tokio::test]
    async fn malformed_remote_blob_is_a_resolution_error() {
        let provider = StaticAbiProvider::new().with_abi("junk", vec![1, 2, 3]);
        let mut cache = cache_with(Arc::new(StubStore::default()), provider);
        assert!(matches!(
            cache.resolve("junk", 1).await,
            Err(IndexerError::SchemaResolution { .. })
        ));
    }

    struct SlowProvider;

    #[async_trait]
    impl AbiProvider for SlowProvider {
        async fn fetch_abi(&self, _account: &str) -> Result<Vec<u8>, RemoteError> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn remote_call_is_bounded_by_timeout() {
        let mut cache = cache_with(Arc::new(StubStore::default()), SlowProvider);
        let err = cache.resolve("hello", 1).await.unwrap_err();
        assert!(err.to_string().contains("timed out"), "{err}");
    }

    #[tokio::test]
    async fn setabi_replaces_and_clears_tracked_accounts_only() {
        let store = Arc::new(StubStore::default());
        let mut cache = cache_with(store.clone(), StaticAbiProvider::new());

        assert!(cache.apply_setabi("hello", &hello_bin(), 10).await.unwrap());
        assert!(cache.contains("hello"));
        assert_eq!(store.abis.lock().unwrap()["hello"].block_num, 10);

        assert!(cache.apply_setabi("hello", &[], 11).await.unwrap());
        assert!(!cache.contains("hello"));
        assert!(store.load_abi("hello").await.unwrap().is_none());

        assert!(!cache.apply_setabi("other", &hello_bin(), 12).await.unwrap());
        assert!(!cache.contains("other"));
    }
}
