//! Error types for the ingestion pipeline.

use shipindex_abi::CodecError;
use thiserror::Error;

/// Errors that can occur while ingesting the state-history feed.
///
/// None of these are retried: any of them ends the session, and the store's
/// per-block atomicity guarantees a restart resumes from the last commit.
#[derive(Debug, Error)]
pub enum IndexerError {
    #[error("Protocol violation: {0}")]
    Protocol(String),

    #[error("Skipped block: head is {head}, received {received}")]
    SkippedBlock { head: u32, received: u32 },

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("ABI resolution failed for '{account}': {reason}")]
    SchemaResolution { account: String, reason: String },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl IndexerError {
    /// The failure class, for log fields.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Protocol(_) | Self::SkippedBlock { .. } => "protocol_violation",
            Self::Codec(_) => "codec",
            Self::SchemaResolution { .. } => "schema_resolution",
            Self::Storage(_) => "storage",
            Self::Transport(_) => "transport",
            Self::Config(_) => "config",
        }
    }

    pub(crate) fn resolution(account: &str, reason: impl ToString) -> Self {
        Self::SchemaResolution {
            account: account.to_string(),
            reason: reason.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn categories() {
        let skipped = IndexerError::SkippedBlock { head: 10, received: 12 };
        assert_eq!(skipped.category(), "protocol_violation");
        assert_eq!(skipped.to_string(), "Skipped block: head is 10, received 12");

        let codec: IndexerError = CodecError::UnknownType("foo".into()).into();
        assert_eq!(codec.category(), "codec");
    }
}
