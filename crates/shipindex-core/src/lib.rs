//! # shipindex-core
//!
//! Chain-agnostic core of the state-history ingestion pipeline.
//!
//! ## Components
//!
//! - [`ChainContinuity`] tracks head/irreversible and classifies each block
//!   as an advance, a gap or a fork
//! - [`AbiCache`] resolves per-account contract ABIs (memory, store, remote)
//! - [`TraceFlattener`] turns transaction trace trees into a deduplicated,
//!   enriched action list
//! - [`ChainStore`] / [`StoreTransaction`] are the durable store contract
//! - [`IndexerConfig`] is the configuration surface

pub mod abi_cache;
pub mod config;
pub mod continuity;
pub mod enrich;
pub mod error;
pub mod filter;
pub mod flatten;
pub mod store;
pub mod trace;
pub mod types;

#[cfg(test)]
mod test_support;

pub use abi_cache::{AbiCache, AbiSource, ContractAbi};
pub use config::{Compression, IndexerConfig, LogConfig};
pub use continuity::{BlockPlan, ChainContinuity};
pub use error::IndexerError;
pub use filter::{ActionFilter, FilterPair};
pub use flatten::{BlockContext, TraceFlattener};
pub use store::{ChainStore, StoreTransaction};
pub use trace::{transaction_traces, ActionTraceNode, TransactionTrace};
pub use types::{
    AccountDelta, ActionSummary, BlockPosition, BlockRecord, ChainEvent, ChainStatus, EventKind,
    FlattenedAction, PermissionLevel, StoredAbi,
};
