//! Configuration file loading.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use shipindex_core::config::IndexerConfig;
use shipindex_core::store::ChainStore;
use shipindex_storage::{MemoryStore, SqliteStore};

/// Read a YAML (or JSON) config file. No path means all defaults.
pub fn load(path: Option<&Path>) -> Result<IndexerConfig> {
    let config = match path {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("reading config {}", path.display()))?;
            parse(&text).with_context(|| format!("parsing config {}", path.display()))?
        }
        None => IndexerConfig::default(),
    };
    config.validate()?;
    Ok(config)
}

/// Open the store named by `database_url`: `memory`, or a SQLite path/URL.
pub async fn open_store(database_url: &str) -> Result<Arc<dyn ChainStore>> {
    if database_url == "memory" {
        return Ok(Arc::new(MemoryStore::new()));
    }
    let store = SqliteStore::open(database_url)
        .await
        .with_context(|| format!("opening store {database_url}"))?;
    Ok(Arc::new(store))
}

fn parse(text: &str) -> Result<IndexerConfig> {
    if text.trim().is_empty() {
        return Ok(IndexerConfig::default());
    }
    Ok(serde_yaml::from_str(text)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use shipindex_core::config::Compression;

    #[test]
    fn yaml_overrides_defaults() {
        let config = parse(
            "state_history_server: ws://node:8080\n\
             filter_on:\n  - eosio.token:transfer\n\
             traces_compression: zlib\n\
             log:\n  level: debug\n  components:\n    shipindex-stream: trace\n",
        )
        .unwrap();
        assert_eq!(config.state_history_server, "ws://node:8080");
        assert_eq!(config.filter_on, vec!["eosio.token:transfer".to_string()]);
        assert_eq!(config.traces_compression, Compression::Zlib);
        assert_eq!(config.log.level, "debug");
        assert_eq!(config.max_messages_in_flight, 5);
    }

    #[test]
    fn json_is_accepted_and_empty_means_defaults() {
        let config = parse(r#"{"irreversible_only": true}"#).unwrap();
        assert!(config.irreversible_only);
        assert_eq!(parse("  \n").unwrap(), IndexerConfig::default());
    }

    #[tokio::test]
    async fn memory_store_starts_empty() {
        let store = open_store("memory").await.unwrap();
        assert!(store.load_status().await.unwrap().is_unset());
    }
}
