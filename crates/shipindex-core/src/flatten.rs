//! Trace flattening: one block's transaction trees into an ordered action list.
//!
//! Each executed transaction's action tree is walked depth-first in delivery
//! order. Per node:
//!
//! 1. no receipt: skipped along with its subtree
//! 2. `eosio:setabi` is always decoded, `eosio:onblock` never, anything else
//!    only if the [`ActionFilter`] admits it
//! 3. a nested node whose enriched payload fingerprint equals its enclosing
//!    action's is a redelivery (`require_recipient`): it is not recorded, its
//!    receiver joins the enclosing action's notified set
//! 4. a root node whose receiver differs from the acting account is skipped,
//!    as is a nested one that is not a redelivery
//! 5. anything else is recorded, parent before children, with `parent` set to
//!    the enclosing receipt's global sequence (`0` at the root)

use std::time::{Duration, Instant};

use futures::future::{BoxFuture, FutureExt};
use indexmap::IndexSet;
use serde_json::Value;
use shipindex_abi::AbiValue;
use tracing::{debug, error, warn};

use crate::abi_cache::AbiCache;
use crate::enrich::enrich;
use crate::error::IndexerError;
use crate::filter::ActionFilter;
use crate::trace::{ActionTraceNode, TransactionTrace};
use crate::types::{ActionSummary, FlattenedAction};

const SLOW_TRANSACTION: Duration = Duration::from_millis(100);
const SLOW_BLOCK: Duration = Duration::from_millis(10);

/// Block header fields stamped onto every action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockContext {
    pub block_num: u32,
    pub timestamp: String,
    pub producer: String,
}

/// What a node inherits from the action that contains it.
#[derive(Debug, Clone, Default)]
struct AncestorContext {
    /// Receipt sequence of the enclosing action; `None` at the root.
    global_sequence: Option<u64>,
    /// Fingerprint of the enclosing action's decoded payload, if it was decoded.
    fingerprint: Option<String>,
}

struct TrxScope<'a> {
    block: &'a BlockContext,
    trx_id: &'a str,
}

pub struct TraceFlattener<'a> {
    filter: &'a ActionFilter,
    cache: &'a mut AbiCache,
}

impl<'a> TraceFlattener<'a> {
    pub fn new(filter: &'a ActionFilter, cache: &'a mut AbiCache) -> Self {
        Self { filter, cache }
    }

    /// Flatten every executed transaction of one block.
    ///
    /// `eosio:setabi` actions update the ABI cache as they are met, so later
    /// actions in the same block decode against the new ABI.
    pub async fn flatten(
        &mut self,
        block: &BlockContext,
        traces: &[TransactionTrace],
    ) -> Result<Vec<FlattenedAction>, IndexerError> {
        let started = Instant::now();
        let mut out = Vec::new();

        for trx in traces.iter().filter(|t| t.is_executed()) {
            let trx_started = Instant::now();
            let scope = TrxScope {
                block,
                trx_id: &trx.id,
            };
            for node in &trx.action_traces {
                self.visit(node, &scope, AncestorContext::default(), &mut out)
                    .await?;
            }
            let elapsed = trx_started.elapsed();
            if elapsed > SLOW_TRANSACTION {
                warn!(
                    block = block.block_num,
                    trx = %trx.id,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "slow transaction: actions took over 100ms"
                );
            }
        }

        let elapsed = started.elapsed();
        if elapsed > SLOW_BLOCK {
            warn!(
                block = block.block_num,
                elapsed_ms = elapsed.as_millis() as u64,
                "slow block: traces took over 10ms"
            );
        }
        debug!(block = block.block_num, actions = out.len(), "traces flattened");
        Ok(out)
    }

    fn eligible(&self, account: &str, name: &str) -> bool {
        match (account, name) {
            ("eosio", "setabi") => true,
            ("eosio", "onblock") => false,
            _ => self.filter.matches(account, name),
        }
    }

    /// Visit one node and its subtree. Returns the receivers of redeliveries
    /// found at this level, for the enclosing action's notified set.
    fn visit<'s>(
        &'s mut self,
        node: &'s ActionTraceNode,
        scope: &'s TrxScope<'s>,
        ancestor: AncestorContext,
        out: &'s mut Vec<FlattenedAction>,
    ) -> BoxFuture<'s, Result<IndexSet<String>, IndexerError>> {
        async move {
            let mut redelivered = IndexSet::new();
            let Some(receipt) = node.receipt.as_ref() else {
                return Ok(redelivered);
            };
            let nested = ancestor.global_sequence.is_some();
            let own_delivery = receipt.receiver == node.account;
            if !own_delivery && !nested {
                return Ok(redelivered);
            }

            if !self.eligible(&node.account, &node.name) {
                if own_delivery {
                    let inherited = AncestorContext {
                        global_sequence: Some(receipt.global_sequence),
                        fingerprint: None,
                    };
                    for child in &node.inline_traces {
                        self.visit(child, scope, inherited.clone(), out).await?;
                    }
                }
                return Ok(redelivered);
            }

            let block_num = scope.block.block_num;
            let decoded = self.decode(node, block_num).await?;
            let mut data = decoded.to_json();
            let summary = enrich(&node.account, &node.name, &mut data);
            let fingerprint = fingerprint(&data, summary.as_ref());
            let inherited = AncestorContext {
                global_sequence: Some(receipt.global_sequence),
                fingerprint: Some(fingerprint.clone()),
            };

            if nested && ancestor.fingerprint.as_deref() == Some(fingerprint.as_str()) {
                redelivered.insert(receipt.receiver.clone());
                for child in &node.inline_traces {
                    let found = self.visit(child, scope, inherited.clone(), out).await?;
                    redelivered.extend(found);
                }
                return Ok(redelivered);
            }
            if !own_delivery {
                return Ok(redelivered);
            }

            if node.account == "eosio" && node.name == "setabi" {
                self.apply_setabi(&decoded, block_num).await?;
            }

            let index = out.len();
            out.push(FlattenedAction {
                global_sequence: receipt.global_sequence,
                parent: ancestor.global_sequence.unwrap_or(0),
                block_num,
                trx_id: scope.trx_id.to_string(),
                producer: scope.block.producer.clone(),
                timestamp: scope.block.timestamp.clone(),
                account: node.account.clone(),
                name: node.name.clone(),
                authorization: node.authorization.clone(),
                data,
                summary,
                ram_deltas: node.ram_deltas.clone(),
                notified: IndexSet::from([receipt.receiver.clone()]),
            });
            for child in &node.inline_traces {
                let found = self.visit(child, scope, inherited.clone(), out).await?;
                out[index].notified.extend(found);
            }
            Ok(redelivered)
        }
        .boxed()
    }

    async fn decode(&mut self, node: &ActionTraceNode, block_num: u32) -> Result<AbiValue, IndexerError> {
        let abi = self.cache.resolve(&node.account, block_num).await?;
        abi.decode_action(&node.name, &node.data).map_err(|e| {
            error!(
                block = block_num,
                account = %node.account,
                action = %node.name,
                error = %e,
                "action payload does not match contract abi"
            );
            IndexerError::Codec(e)
        })
    }

    async fn apply_setabi(&mut self, decoded: &AbiValue, block_num: u32) -> Result<(), IndexerError> {
        let account = decoded
            .field("account")
            .and_then(AbiValue::as_str)
            .ok_or_else(|| IndexerError::Protocol("setabi payload without 'account'".into()))?;
        let abi = decoded.field("abi").and_then(AbiValue::as_bytes).unwrap_or_default();
        self.cache.apply_setabi(account, abi, block_num).await?;
        Ok(())
    }
}

/// Dedup key: the enriched payload plus its summary.
fn fingerprint(data: &Value, summary: Option<&ActionSummary>) -> String {
    match summary {
        Some(summary) => format!(
            "{data}|{}",
            serde_json::to_string(summary).unwrap_or_default()
        ),
        None => data.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use shipindex_abi::{AbiDef, StaticAbiProvider, TypeRegistry};

    use super::*;
    use crate::test_support::StubStore;
    use crate::trace::fixtures::{action, transaction};
    use crate::trace::TransactionTrace;

    const TOKEN_ABI: &str = r#"{
        "version": "eosio::abi/1.1",
        "structs": [
            {"name": "transfer", "base": "", "fields": [
                {"name": "from", "type": "name"},
                {"name": "to", "type": "name"},
                {"name": "quantity", "type": "asset"},
                {"name": "memo", "type": "string"}
            ]},
            {"name": "issue", "base": "", "fields": [
                {"name": "to", "type": "name"},
                {"name": "quantity", "type": "asset"},
                {"name": "memo", "type": "string"}
            ]}
        ],
        "actions": [
            {"name": "transfer", "type": "transfer", "ricardian_contract": ""},
            {"name": "issue", "type": "issue", "ricardian_contract": ""}
        ]
    }"#;

    const SYSTEM_ABI: &str = r#"{
        "version": "eosio::abi/1.1",
        "structs": [
            {"name": "setabi", "base": "", "fields": [
                {"name": "account", "type": "name"},
                {"name": "abi", "type": "bytes"}
            ]},
            {"name": "onblock", "base": "", "fields": [{"name": "header", "type": "bytes"}]}
        ],
        "actions": [
            {"name": "setabi", "type": "setabi", "ricardian_contract": ""},
            {"name": "onblock", "type": "onblock", "ricardian_contract": ""}
        ]
    }"#;

    fn transfer_bytes(from: &str, to: &str, quantity: &str) -> Vec<u8> {
        let reg = TypeRegistry::new(&AbiDef::from_json(TOKEN_ABI).unwrap()).unwrap();
        reg.encode_action(
            "transfer",
            &AbiValue::record([
                ("from", AbiValue::from(from)),
                ("to", AbiValue::from(to)),
                ("quantity", AbiValue::from(quantity)),
                ("memo", AbiValue::from("")),
            ]),
        )
        .unwrap()
    }

    fn cache(provider: StaticAbiProvider, parse_abis: &[&str]) -> AbiCache {
        AbiCache::new(
            Arc::new(StubStore::default()),
            Arc::new(provider),
            parse_abis.iter().map(|s| s.to_string()),
            Duration::from_secs(3),
        )
    }

    fn token_provider() -> StaticAbiProvider {
        StaticAbiProvider::new()
            .with_abi("eosio.token", AbiDef::from_json(TOKEN_ABI).unwrap().to_bin().unwrap())
            .with_abi("eosio", AbiDef::from_json(SYSTEM_ABI).unwrap().to_bin().unwrap())
    }

    fn block() -> BlockContext {
        BlockContext {
            block_num: 42,
            timestamp: "2020-01-01T00:00:00.000".into(),
            producer: "prod".into(),
        }
    }

    async fn run(filter: &ActionFilter, cache: &mut AbiCache, trx: AbiValue) -> Vec<FlattenedAction> {
        let trace = TransactionTrace::from_value(&trx).unwrap();
        TraceFlattener::new(filter, cache)
            .flatten(&block(), &[trace])
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn redeliveries_merge_into_notified_set() {
        let filter = ActionFilter::all();
        let mut cache = cache(token_provider(), &[]);
        let payload = transfer_bytes("alice", "bob", "1.0000 EOS");
        let other = transfer_bytes("bob", "carol", "0.5000 EOS");

        let trx = transaction(
            "aa",
            0,
            vec![
                action(1, 0, "eosio.token", "eosio.token", "transfer", payload.clone(), 100),
                action(2, 1, "alice", "eosio.token", "transfer", payload.clone(), 101),
                action(3, 1, "bob", "eosio.token", "transfer", payload, 102),
                action(4, 1, "eosio.token", "eosio.token", "transfer", other, 103),
            ],
        );
        let actions = run(&filter, &mut cache, trx).await;

        assert_eq!(actions.len(), 2);
        let root = &actions[0];
        assert_eq!(root.global_sequence, 100);
        assert_eq!(root.parent, 0);
        assert_eq!(
            root.notified.iter().map(String::as_str).collect::<Vec<_>>(),
            ["eosio.token", "alice", "bob"]
        );
        assert!(matches!(root.summary, Some(ActionSummary::Transfer { ref to, .. }) if to == "bob"));

        let inline = &actions[1];
        assert_eq!(inline.global_sequence, 103);
        assert_eq!(inline.parent, 100);
        assert_eq!(inline.notified.len(), 1);
        assert_eq!(inline.trx_id, "aa");
        assert_eq!(inline.producer, "prod");
    }

    #[tokio::test]
    async fn filter_and_system_rules_apply() {
        let filter = ActionFilter::new(
            vec![crate::filter::FilterPair::new("eosio.token", "*")],
            vec![crate::filter::FilterPair::new("eosio.token", "issue")],
        );
        let mut cache = cache(token_provider(), &[]);
        let issue = TypeRegistry::new(&AbiDef::from_json(TOKEN_ABI).unwrap())
            .unwrap()
            .encode_action(
                "issue",
                &AbiValue::record([
                    ("to", AbiValue::from("alice")),
                    ("quantity", AbiValue::from("1.0000 EOS")),
                    ("memo", AbiValue::from("")),
                ]),
            )
            .unwrap();

        let trx = transaction(
            "bb",
            0,
            vec![
                action(1, 0, "eosio", "eosio", "onblock", vec![0], 1),
                action(2, 0, "eosio.token", "eosio.token", "issue", issue, 2),
                action(3, 0, "eosio.token", "eosio.token", "transfer", transfer_bytes("a", "b", "1.0000 EOS"), 3),
            ],
        );
        let actions = run(&filter, &mut cache, trx).await;
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].name, "transfer");
    }

    #[tokio::test]
    async fn failed_transactions_and_notification_roots_are_skipped() {
        let filter = ActionFilter::all();
        let mut cache = cache(token_provider(), &[]);
        let payload = transfer_bytes("alice", "bob", "1.0000 EOS");

        let failed = TransactionTrace::from_value(&transaction(
            "cc",
            1,
            vec![action(1, 0, "eosio.token", "eosio.token", "transfer", payload.clone(), 5)],
        ))
        .unwrap();
        let notification_root = TransactionTrace::from_value(&transaction(
            "dd",
            0,
            vec![action(1, 0, "bob", "eosio.token", "transfer", payload, 6)],
        ))
        .unwrap();

        let actions = TraceFlattener::new(&filter, &mut cache)
            .flatten(&block(), &[failed, notification_root])
            .await
            .unwrap();
        assert!(actions.is_empty());
    }

    #[tokio::test]
    async fn setabi_takes_effect_within_the_block() {
        let filter = ActionFilter::all();
        let mut cache = cache(token_provider(), &["eosio", "game"]);

        let game_abi = AbiDef::from_json(
            r#"{"version": "eosio::abi/1.1",
                "structs": [{"name": "play", "base": "", "fields": [{"name": "move", "type": "uint8"}]}],
                "actions": [{"name": "play", "type": "play", "ricardian_contract": ""}]}"#,
        )
        .unwrap()
        .to_bin()
        .unwrap();
        let system = TypeRegistry::new(&AbiDef::from_json(SYSTEM_ABI).unwrap()).unwrap();
        let setabi = system
            .encode_action(
                "setabi",
                &AbiValue::record([
                    ("account", AbiValue::from("game")),
                    ("abi", AbiValue::Bytes(game_abi)),
                ]),
            )
            .unwrap();

        let trx = transaction(
            "ee",
            0,
            vec![
                action(1, 0, "eosio", "eosio", "setabi", setabi, 10),
                action(2, 0, "game", "game", "play", vec![3], 11),
            ],
        );
        let actions = run(&filter, &mut cache, trx).await;
        assert_eq!(actions.len(), 2);
        assert!(actions[0].is("eosio", "setabi"));
        assert_eq!(actions[1].data, serde_json::json!({"move": 3}));
    }
}
