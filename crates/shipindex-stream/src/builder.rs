//! Fluent builder for [`SessionDriver`].
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use shipindex_stream::SessionBuilder;
//! # use shipindex_core::ChainStore;
//!
//! # async fn example(store: Arc<dyn ChainStore>) -> Result<(), Box<dyn std::error::Error>> {
//! let mut session = SessionBuilder::new()
//!     .state_history_server("ws://127.0.0.1:8080")
//!     .filter_on(["eosio.token:*"])
//!     .max_messages_in_flight(10)
//!     .store(store)
//!     .build()?;
//! session.run().await?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use shipindex_abi::{AbiProvider, HttpAbiProvider};
use shipindex_core::abi_cache::AbiCache;
use shipindex_core::config::{Compression, IndexerConfig};
use shipindex_core::error::IndexerError;
use shipindex_core::store::ChainStore;
use shipindex_core::types::ChainStatus;

use crate::processor::{BlockProcessor, ProcessorOptions};
use crate::session::{SessionDriver, SessionSettings};
use crate::transport::{Connector, WsConnector};

#[derive(Default)]
pub struct SessionBuilder {
    config: IndexerConfig,
    store: Option<Arc<dyn ChainStore>>,
    provider: Option<Arc<dyn AbiProvider>>,
    connector: Option<Arc<dyn Connector>>,
}

fn strings<S: Into<String>>(items: impl IntoIterator<Item = S>) -> Vec<String> {
    items.into_iter().map(Into::into).collect()
}

impl SessionBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from a loaded configuration.
    pub fn from_config(config: IndexerConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    pub fn state_history_server(mut self, url: impl Into<String>) -> Self {
        self.config.state_history_server = url.into();
        self
    }

    pub fn get_abi_url(mut self, url: impl Into<String>) -> Self {
        self.config.get_abi_url = url.into();
        self
    }

    /// `account:action` patterns to include, `*` as wildcard.
    pub fn filter_on<S: Into<String>>(mut self, patterns: impl IntoIterator<Item = S>) -> Self {
        self.config.filter_on = strings(patterns);
        self
    }

    /// `account:action` patterns to exclude.
    pub fn filter_out<S: Into<String>>(mut self, patterns: impl IntoIterator<Item = S>) -> Self {
        self.config.filter_out = strings(patterns);
        self
    }

    /// Accounts whose `setabi` updates are applied.
    pub fn parse_abis<S: Into<String>>(mut self, accounts: impl IntoIterator<Item = S>) -> Self {
        self.config.parse_abis = strings(accounts);
        self
    }

    pub fn irreversible_only(mut self, yes: bool) -> Self {
        self.config.irreversible_only = yes;
        self
    }

    pub fn max_messages_in_flight(mut self, window: u32) -> Self {
        self.config.max_messages_in_flight = window;
        self
    }

    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.config.queue_capacity = Some(capacity);
        self
    }

    pub fn fetch_deltas(mut self, yes: bool) -> Self {
        self.config.fetch_deltas = yes;
        self
    }

    pub fn traces_compression(mut self, compression: Compression) -> Self {
        self.config.traces_compression = compression;
        self
    }

    pub fn deltas_compression(mut self, compression: Compression) -> Self {
        self.config.deltas_compression = compression;
        self
    }

    pub fn abi_timeout_ms(mut self, ms: u64) -> Self {
        self.config.abi_timeout_ms = ms;
        self
    }

    /// Block rows kept below the irreversible block.
    pub fn retain_blocks(mut self, blocks: u32) -> Self {
        self.config.retain_blocks = blocks;
        self
    }

    pub fn store(mut self, store: Arc<dyn ChainStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Defaults to HTTP `get_raw_abi` at `get_abi_url`.
    pub fn abi_provider(mut self, provider: Arc<dyn AbiProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Defaults to a WebSocket to `state_history_server`.
    pub fn connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = Some(connector);
        self
    }

    pub fn config(&self) -> &IndexerConfig {
        &self.config
    }

    pub fn build(self) -> Result<SessionDriver, IndexerError> {
        let config = self.config;
        config.validate()?;
        let store = self
            .store
            .ok_or_else(|| IndexerError::Config("no store configured".into()))?;

        let provider: Arc<dyn AbiProvider> = match self.provider {
            Some(p) => p,
            None => Arc::new(
                HttpAbiProvider::new(config.get_abi_url.clone(), config.abi_timeout())
                    .map_err(|e| IndexerError::Config(e.to_string()))?,
            ),
        };
        let connector: Arc<dyn Connector> = match self.connector {
            Some(c) => c,
            None => Arc::new(WsConnector::new(config.state_history_server.clone())),
        };

        let cache = AbiCache::new(
            Arc::clone(&store),
            provider,
            config.parse_abis.iter().cloned(),
            config.abi_timeout(),
        );
        let options = ProcessorOptions {
            filter: config.filter(),
            traces_compression: config.traces_compression,
            deltas_compression: config.deltas_compression,
            fetch_deltas: config.fetch_deltas,
            retain_blocks: config.retain_blocks,
        };
        let processor = BlockProcessor::new(Arc::clone(&store), cache, options, ChainStatus::default());
        let settings = SessionSettings {
            max_messages_in_flight: config.max_messages_in_flight,
            queue_capacity: config.queue_capacity(),
            irreversible_only: config.irreversible_only,
            fetch_deltas: config.fetch_deltas,
        };
        Ok(SessionDriver::new(connector, store, processor, settings))
    }
}
