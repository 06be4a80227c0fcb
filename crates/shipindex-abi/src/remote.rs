//! Remote ABI resolution.
//!
//! The node's chain API serves an account's current ABI as an encoded binary
//! `abi_def`:
//!
//! ```text
//! POST /v1/chain/get_raw_abi   {"account_name": "eosio.token"}
//! -> {"account_name": "eosio.token", "abi": "DmVvc2lvOjphYmkvMS4x..."}
//! ```
//!
//! `abi` is base64 (padding optional) on current nodes and hex on some older
//! ones. [`HttpAbiProvider`] needs the `remote` feature (`reqwest` + `base64`).

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

// ─── Error ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("No ABI published for account '{0}'")]
    NotFound(String),

    #[error("Invalid ABI blob for '{account}': {reason}")]
    InvalidBlob { account: String, reason: String },
}

// ─── Provider trait ───────────────────────────────────────────────────────────

/// Source of binary `abi_def` blobs by account name.
#[async_trait]
pub trait AbiProvider: Send + Sync {
    async fn fetch_abi(&self, account: &str) -> Result<Vec<u8>, RemoteError>;
}

/// In-process provider backed by a map. Used for tests and offline replays.
#[derive(Debug, Default)]
pub struct StaticAbiProvider {
    abis: RwLock<HashMap<String, Vec<u8>>>,
}

impl StaticAbiProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_abi(self, account: impl Into<String>, abi: Vec<u8>) -> Self {
        self.insert(account, abi);
        self
    }

    pub fn insert(&self, account: impl Into<String>, abi: Vec<u8>) {
        self.abis
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(account.into(), abi);
    }
}

#[async_trait]
impl AbiProvider for StaticAbiProvider {
    async fn fetch_abi(&self, account: &str) -> Result<Vec<u8>, RemoteError> {
        self.abis
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(account)
            .cloned()
            .ok_or_else(|| RemoteError::NotFound(account.to_string()))
    }
}

#[cfg(feature = "remote")]
pub use http::*;

#[cfg(feature = "remote")]
mod http {
    use std::time::Duration;

    use async_trait::async_trait;
    use base64::alphabet;
    use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig};
    use base64::engine::DecodePaddingMode;
    use base64::Engine;
    use reqwest::Client;
    use serde::{Deserialize, Serialize};
    use tracing::debug;

    use super::{AbiProvider, RemoteError};
    use crate::abi::BINARY_ABI_HEX_PREFIX;

    const LENIENT_BASE64: GeneralPurpose = GeneralPurpose::new(
        &alphabet::STANDARD,
        GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
    );

    #[derive(Debug, Serialize)]
    struct RawAbiRequest<'a> {
        account_name: &'a str,
    }

    #[derive(Debug, Deserialize)]
    struct RawAbiResponse {
        #[serde(default)]
        abi: Option<String>,
    }

    /// Decode the `abi` field of a `get_raw_abi` response.
    pub fn decode_abi_blob(account: &str, text: &str) -> Result<Vec<u8>, RemoteError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(RemoteError::NotFound(account.to_string()));
        }
        let invalid = |reason: String| RemoteError::InvalidBlob {
            account: account.to_string(),
            reason,
        };
        if text.starts_with(BINARY_ABI_HEX_PREFIX) {
            hex::decode(text).map_err(|e| invalid(e.to_string()))
        } else {
            LENIENT_BASE64.decode(text).map_err(|e| invalid(e.to_string()))
        }
    }

    /// Fetches ABIs from a node's `get_raw_abi` endpoint.
    pub struct HttpAbiProvider {
        client: Client,
        url: String,
    }

    impl HttpAbiProvider {
        /// `timeout` bounds each request end to end.
        pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, RemoteError> {
            let client = Client::builder()
                .timeout(timeout)
                .user_agent(concat!("shipindex/", env!("CARGO_PKG_VERSION")))
                .build()
                .map_err(|e| RemoteError::Http(e.to_string()))?;
            Ok(Self {
                client,
                url: url.into(),
            })
        }

        pub fn url(&self) -> &str {
            &self.url
        }
    }

    #[async_trait]
    impl AbiProvider for HttpAbiProvider {
        async fn fetch_abi(&self, account: &str) -> Result<Vec<u8>, RemoteError> {
            debug!(account, url = %self.url, "fetching raw abi");
            let resp = self
                .client
                .post(&self.url)
                .json(&RawAbiRequest {
                    account_name: account,
                })
                .send()
                .await
                .map_err(|e| RemoteError::Http(e.to_string()))?;

            if !resp.status().is_success() {
                return Err(RemoteError::Http(format!(
                    "{} returned {}",
                    self.url,
                    resp.status()
                )));
            }

            let body: RawAbiResponse = resp
                .json()
                .await
                .map_err(|e| RemoteError::Http(e.to_string()))?;
            decode_abi_blob(account, body.abi.as_deref().unwrap_or(""))
        }
    }

}
