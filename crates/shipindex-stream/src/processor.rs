//! Block processing: one `get_blocks_result` to one committed store transaction.
//!
//! Per block:
//!
//! 1. classify against [`ChainContinuity`] (advance, fork, or fatal gap)
//! 2. decode header, traces and deltas
//! 3. flatten traces (this may resolve and persist contract ABIs)
//! 4. in one [`StoreTransaction`](shipindex_core::StoreTransaction): status,
//!    fork rollback, pruning, block row, action rows, events
//! 5. advance the in-memory continuity only after the commit

use std::sync::Arc;

use serde_json::Value;
use shipindex_abi::AbiValue;
use shipindex_core::abi_cache::AbiCache;
use shipindex_core::config::Compression;
use shipindex_core::continuity::{BlockPlan, ChainContinuity};
use shipindex_core::error::IndexerError;
use shipindex_core::filter::ActionFilter;
use shipindex_core::flatten::{BlockContext, TraceFlattener};
use shipindex_core::store::ChainStore;
use shipindex_core::trace::{transaction_traces, TransactionTrace};
use shipindex_core::types::{
    BlockPosition, BlockRecord, ChainEvent, ChainStatus, EventKind, FlattenedAction,
};
use tracing::{debug, error, info, warn};

use crate::compression::decompress;
use crate::protocol::{BlockPayload, BlocksResult, ShipProtocol};

/// Progress is logged on block numbers divisible by this while catching up.
const PROGRESS_INTERVAL: u64 = 100;
/// Longer `setcode` payloads are stored as `"..."`.
const MAX_STORED_CODE_LEN: usize = 10;
const UNKNOWN_PRODUCER: &str = "unknown";

/// Processing options that come from configuration.
#[derive(Debug, Clone)]
pub struct ProcessorOptions {
    pub filter: ActionFilter,
    pub traces_compression: Compression,
    pub deltas_compression: Compression,
    pub fetch_deltas: bool,
    pub retain_blocks: u32,
}

/// What one block did to the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockOutcome {
    pub block_num: u32,
    pub status: ChainStatus,
    /// Action rows written for this block.
    pub actions: Vec<i64>,
    /// Action rows a fork superseded.
    pub rolled_back: Vec<i64>,
    pub fork: bool,
    /// Table deltas seen, when deltas are fetched.
    pub deltas: usize,
}

pub struct BlockProcessor {
    store: Arc<dyn ChainStore>,
    cache: AbiCache,
    options: ProcessorOptions,
    continuity: ChainContinuity,
    blocks_processed: u64,
    rows_since_log: usize,
    failed_block: Option<u32>,
}

impl BlockProcessor {
    pub fn new(
        store: Arc<dyn ChainStore>,
        cache: AbiCache,
        options: ProcessorOptions,
        status: ChainStatus,
    ) -> Self {
        let continuity = ChainContinuity::new(status, options.retain_blocks);
        Self {
            store,
            cache,
            options,
            continuity,
            blocks_processed: 0,
            rows_since_log: 0,
            failed_block: None,
        }
    }

    /// Restart continuity from a status loaded at session start.
    pub fn resume_from(&mut self, status: ChainStatus) {
        self.continuity = ChainContinuity::new(status, self.options.retain_blocks);
    }

    pub fn continuity(&self) -> &ChainContinuity {
        &self.continuity
    }

    pub fn status(&self) -> ChainStatus {
        self.continuity.status()
    }

    pub fn blocks_processed(&self) -> u64 {
        self.blocks_processed
    }

    pub fn abi_cache(&self) -> &AbiCache {
        &self.cache
    }

    /// The block whose processing last failed, if any.
    pub fn failed_block(&self) -> Option<u32> {
        self.failed_block
    }

    /// Process one block result. `Ok(None)` when the result carries no block.
    pub async fn process(
        &mut self,
        protocol: &ShipProtocol,
        result: BlocksResult,
    ) -> Result<Option<BlockOutcome>, IndexerError> {
        let Some(this_block) = result.this_block.clone() else {
            debug!(head = result.head.block_num, "blocks result without this_block");
            return Ok(None);
        };
        let block_num = this_block.block_num;
        match self.process_block(protocol, result, this_block).await {
            Ok(outcome) => Ok(Some(outcome)),
            Err(e) => {
                self.failed_block = Some(block_num);
                error!(
                    block = block_num,
                    error = %e,
                    category = e.category(),
                    "block processing failed"
                );
                Err(e)
            }
        }
    }

    async fn process_block(
        &mut self,
        protocol: &ShipProtocol,
        result: BlocksResult,
        this_block: BlockPosition,
    ) -> Result<BlockOutcome, IndexerError> {
        let block_num = this_block.block_num;
        let plan = self
            .continuity
            .plan(block_num, result.last_irreversible.block_num)?;

        let (timestamp, producer) = block_header(protocol, result.block.as_ref(), block_num)?;
        let traces = self.decode_traces(protocol, result.traces.as_deref())?;
        let deltas = self.count_deltas(protocol, result.deltas.as_deref())?;

        let ctx = BlockContext {
            block_num,
            timestamp: timestamp.clone(),
            producer: producer.clone(),
        };
        let flattened = TraceFlattener::new(&self.options.filter, &mut self.cache)
            .flatten(&ctx, &traces)
            .await?;
        let rows = storable(flattened);

        let record = BlockRecord {
            block_num,
            block_id: this_block.block_id,
            timestamp,
            producer,
        };
        let (actions, rolled_back) = self.commit(&plan, &record, &rows).await?;
        self.continuity.commit(&plan);
        self.blocks_processed += 1;
        self.rows_since_log += actions.len();

        if plan.is_fork() {
            warn!(
                block = block_num,
                superseded = rolled_back.len(),
                "fork: replaced blocks at and above this one"
            );
        }
        debug!(
            block = block_num,
            actions = actions.len(),
            deltas,
            irreversible = plan.status.irreversible,
            "block committed"
        );
        self.log_progress(block_num, result.last_irreversible.block_num);

        Ok(BlockOutcome {
            block_num,
            status: plan.status,
            actions,
            rolled_back,
            fork: plan.is_fork(),
            deltas,
        })
    }

    async fn commit(
        &self,
        plan: &BlockPlan,
        record: &BlockRecord,
        rows: &[FlattenedAction],
    ) -> Result<(Vec<i64>, Vec<i64>), IndexerError> {
        let mut tx = self.store.begin().await?;
        tx.write_status(plan.status).await?;

        let mut rolled_back = Vec::new();
        if let Some(from) = plan.fork_from {
            rolled_back = tx.action_ids_from(from).await?;
            tx.delete_actions(&rolled_back).await?;
            tx.delete_blocks_from(from).await?;
            if !rolled_back.is_empty() {
                tx.insert_event(&ChainEvent {
                    kind: EventKind::ForkRollback,
                    action_ids: rolled_back.clone(),
                    block_num: record.block_num,
                    timestamp: record.timestamp.clone(),
                })
                .await?;
            }
        }
        if plan.prune_below > 0 {
            tx.delete_blocks_below(plan.prune_below).await?;
        }

        tx.insert_block(record).await?;
        let ids = tx.insert_actions(rows).await?;
        if !ids.is_empty() {
            tx.insert_event(&ChainEvent {
                kind: EventKind::NewActions,
                action_ids: ids.clone(),
                block_num: record.block_num,
                timestamp: record.timestamp.clone(),
            })
            .await?;
        }
        tx.commit().await?;
        Ok((ids, rolled_back))
    }

    fn decode_traces(
        &self,
        protocol: &ShipProtocol,
        bytes: Option<&[u8]>,
    ) -> Result<Vec<TransactionTrace>, IndexerError> {
        let Some(bytes) = bytes.filter(|b| !b.is_empty()) else {
            return Ok(Vec::new());
        };
        let raw = decompress(self.options.traces_compression, bytes)?;
        transaction_traces(&protocol.decode_traces(&raw)?)
    }

    fn count_deltas(&self, protocol: &ShipProtocol, bytes: Option<&[u8]>) -> Result<usize, IndexerError> {
        if !self.options.fetch_deltas {
            return Ok(0);
        }
        let Some(bytes) = bytes.filter(|b| !b.is_empty()) else {
            return Ok(0);
        };
        let raw = decompress(self.options.deltas_compression, bytes)?;
        let deltas = protocol.decode_deltas(&raw)?;
        Ok(deltas.as_array().map_or(0, <[AbiValue]>::len))
    }

    fn log_progress(&mut self, block_num: u32, last_irreversible: u32) {
        if progress_due(block_num, last_irreversible, self.rows_since_log) {
            info!(
                block = block_num,
                head = self.continuity.head(),
                irreversible = self.continuity.irreversible(),
                rows = self.rows_since_log,
                "progress"
            );
            self.rows_since_log = 0;
        }
    }
}

/// Every hundredth block number, and every block with new rows once caught up.
fn progress_due(block_num: u32, last_irreversible: u32, rows_since_log: usize) -> bool {
    u64::from(block_num) % PROGRESS_INTERVAL == 0
        || (block_num >= last_irreversible && rows_since_log > 0)
}

/// Header timestamp and producer, or now/"unknown" without a header.
fn block_header(
    protocol: &ShipProtocol,
    payload: Option<&BlockPayload>,
    block_num: u32,
) -> Result<(String, String), IndexerError> {
    let decoded;
    let header = match payload {
        Some(BlockPayload::Packed(bytes)) if !bytes.is_empty() => {
            decoded = protocol.decode_block(bytes)?;
            Some(&decoded)
        }
        Some(BlockPayload::Decoded(value)) => Some(value),
        _ => None,
    };
    let field = |name: &str| {
        header
            .and_then(|h| h.field(name))
            .and_then(AbiValue::as_str)
            .map(str::to_string)
    };
    match (field("timestamp"), field("producer")) {
        (Some(timestamp), Some(producer)) => Ok((timestamp, producer)),
        _ => {
            debug!(block = block_num, "block without header");
            let now = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%S%.3f").to_string();
            Ok((now, UNKNOWN_PRODUCER.to_string()))
        }
    }
}

/// Drop `eosio:setabi` rows and elide long `setcode` payloads.
fn storable(actions: Vec<FlattenedAction>) -> Vec<FlattenedAction> {
    actions
        .into_iter()
        .filter(|a| !a.is("eosio", "setabi"))
        .map(|mut a| {
            if a.is("eosio", "setcode") {
                if let Some(code) = a.data.get_mut("code") {
                    if code.as_str().map_or(false, |c| c.len() > MAX_STORED_CODE_LEN) {
                        *code = Value::String("...".into());
                    }
                }
            }
            a
        })
        .collect()
}
