//! Indexer configuration.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use crate::error::IndexerError;
use crate::filter::ActionFilter;

/// Compression applied by the node to a result payload.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    #[default]
    None,
    Zlib,
    Gzip,
}

/// Log level per component.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogConfig {
    /// Global default level: "trace" | "debug" | "info" | "warn" | "error"
    #[serde(default = "default_level")]
    pub level: String,
    /// Override per component: crate name → level
    #[serde(default)]
    pub components: HashMap<String, String>,
    /// Emit JSON structured logs (true) or human-readable text (false)
    #[serde(default)]
    pub json: bool,
}

fn default_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            components: HashMap::new(),
            json: false,
        }
    }
}

/// Top-level configuration, loaded from YAML by the CLI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexerConfig {
    /// State-history WebSocket endpoint
    #[serde(default = "default_ship_url")]
    pub state_history_server: String,
    /// Chain API `get_raw_abi` endpoint
    #[serde(default = "default_abi_url")]
    pub get_abi_url: String,
    /// Store connection, e.g. `sqlite:./shipindex.db` or `memory`
    #[serde(default = "default_database_url")]
    pub database_url: String,
    /// `account:action` patterns to include
    #[serde(default = "default_filter_on")]
    pub filter_on: Vec<String>,
    /// `account:action` patterns to exclude
    #[serde(default)]
    pub filter_out: Vec<String>,
    /// Accounts whose `setabi` updates are applied and persisted
    #[serde(default = "default_parse_abis")]
    pub parse_abis: Vec<String>,
    #[serde(default)]
    pub irreversible_only: bool,
    /// Flow-control window requested from the node
    #[serde(default = "default_window")]
    pub max_messages_in_flight: u32,
    /// Local queue depth; defaults to the flow-control window
    #[serde(default)]
    pub queue_capacity: Option<usize>,
    #[serde(default)]
    pub fetch_deltas: bool,
    #[serde(default)]
    pub traces_compression: Compression,
    #[serde(default = "default_deltas_compression")]
    pub deltas_compression: Compression,
    /// Remote ABI call timeout in milliseconds
    #[serde(default = "default_abi_timeout_ms")]
    pub abi_timeout_ms: u64,
    /// Block rows kept below the irreversible block
    #[serde(default = "default_retain_blocks")]
    pub retain_blocks: u32,
    #[serde(default)]
    pub log: LogConfig,
}

fn default_ship_url() -> String {
    "ws://127.0.0.1:8080".into()
}
fn default_abi_url() -> String {
    "http://127.0.0.1:8888/v1/chain/get_raw_abi".into()
}
fn default_database_url() -> String {
    "sqlite:./shipindex.db".into()
}
fn default_filter_on() -> Vec<String> {
    vec!["*:*".into()]
}
fn default_parse_abis() -> Vec<String> {
    vec!["eosio".into()]
}
fn default_window() -> u32 {
    5
}
fn default_deltas_compression() -> Compression {
    Compression::Zlib
}
fn default_abi_timeout_ms() -> u64 {
    3_000
}
fn default_retain_blocks() -> u32 {
    200
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            state_history_server: default_ship_url(),
            get_abi_url: default_abi_url(),
            database_url: default_database_url(),
            filter_on: default_filter_on(),
            filter_out: Vec::new(),
            parse_abis: default_parse_abis(),
            irreversible_only: false,
            max_messages_in_flight: default_window(),
            queue_capacity: None,
            fetch_deltas: false,
            traces_compression: Compression::None,
            deltas_compression: default_deltas_compression(),
            abi_timeout_ms: default_abi_timeout_ms(),
            retain_blocks: default_retain_blocks(),
            log: LogConfig::default(),
        }
    }
}

impl IndexerConfig {
    pub fn filter(&self) -> ActionFilter {
        ActionFilter::from_strings(&self.filter_on, &self.filter_out)
    }

    pub fn abi_timeout(&self) -> Duration {
        Duration::from_millis(self.abi_timeout_ms)
    }

    /// Effective local queue depth.
    pub fn queue_capacity(&self) -> usize {
        self.queue_capacity
            .unwrap_or(self.max_messages_in_flight as usize)
            .max(1)
    }

    pub fn validate(&self) -> Result<(), IndexerError> {
        if self.state_history_server.is_empty() {
            return Err(IndexerError::Config("state_history_server is empty".into()));
        }
        if self.max_messages_in_flight == 0 {
            return Err(IndexerError::Config(
                "max_messages_in_flight must be at least 1".into(),
            ));
        }
        if self.queue_capacity == Some(0) {
            return Err(IndexerError::Config("queue_capacity must be at least 1".into()));
        }
        Ok(())
    }
}
