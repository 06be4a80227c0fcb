//! Transaction trace tree, built from decoded `transaction_trace` values.
//!
//! State-history nodes deliver each transaction's action traces as a flat,
//! ordinal-linked list (`action_ordinal` / `creator_action_ordinal`). The
//! flattener wants a tree, so children are re-attached to their creator here,
//! keeping delivery order. Older feeds that already nest `inline_traces` are
//! taken as they are.

use std::collections::HashMap;

use shipindex_abi::AbiValue;

use crate::error::IndexerError;
use crate::types::{AccountDelta, PermissionLevel};

/// `transaction_trace.status` for an executed transaction.
pub const STATUS_EXECUTED: u64 = 0;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionReceipt {
    pub receiver: String,
    pub global_sequence: u64,
}

/// One action delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionTraceNode {
    pub account: String,
    pub name: String,
    pub authorization: Vec<PermissionLevel>,
    /// Packed action payload.
    pub data: Vec<u8>,
    pub receipt: Option<ActionReceipt>,
    pub inline_traces: Vec<ActionTraceNode>,
    pub ram_deltas: Vec<AccountDelta>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionTrace {
    /// Lowercase hex transaction id.
    pub id: String,
    pub status: u64,
    /// Root action traces in delivery order.
    pub action_traces: Vec<ActionTraceNode>,
}

impl TransactionTrace {
    pub fn is_executed(&self) -> bool {
        self.status == STATUS_EXECUTED
    }

    /// Build from one decoded `transaction_trace` variant.
    pub fn from_value(value: &AbiValue) -> Result<Self, IndexerError> {
        let trace = value.unwrap_variant();
        let id = str_field(trace, "id")?.to_lowercase();
        let status = trace
            .field("status")
            .and_then(AbiValue::as_u64)
            .ok_or_else(|| malformed("transaction_trace", "status"))?;
        let raw = trace
            .field("action_traces")
            .and_then(AbiValue::as_array)
            .ok_or_else(|| malformed("transaction_trace", "action_traces"))?;
        Ok(Self {
            id,
            status,
            action_traces: build_tree(raw)?,
        })
    }
}

/// Build every trace of a decoded `transaction_trace[]`.
pub fn transaction_traces(value: &AbiValue) -> Result<Vec<TransactionTrace>, IndexerError> {
    value
        .as_array()
        .ok_or_else(|| malformed("transaction_trace[]", "array"))?
        .iter()
        .map(TransactionTrace::from_value)
        .collect()
}

fn malformed(ty: &str, field: &str) -> IndexerError {
    IndexerError::Protocol(format!("malformed {ty}: missing or invalid '{field}'"))
}

fn str_field<'a>(value: &'a AbiValue, field: &str) -> Result<&'a str, IndexerError> {
    value
        .field(field)
        .and_then(AbiValue::as_str)
        .ok_or_else(|| malformed("trace", field))
}

struct FlatNode {
    ordinal: u64,
    creator: u64,
    node: ActionTraceNode,
}

fn build_tree(raw: &[AbiValue]) -> Result<Vec<ActionTraceNode>, IndexerError> {
    let nested = raw
        .first()
        .map_or(false, |t| t.unwrap_variant().field("inline_traces").is_some());
    if nested {
        return raw.iter().map(node_from_value).collect();
    }

    let mut flat = Vec::with_capacity(raw.len());
    for (i, item) in raw.iter().enumerate() {
        let trace = item.unwrap_variant();
        let ordinal = trace
            .field("action_ordinal")
            .and_then(AbiValue::as_u64)
            .unwrap_or(i as u64 + 1);
        let creator = trace
            .field("creator_action_ordinal")
            .and_then(AbiValue::as_u64)
            .unwrap_or(0);
        flat.push(Some(FlatNode {
            ordinal,
            creator,
            node: node_from_value(item)?,
        }));
    }

    // children[i] = indices whose creator is flat[i]; a creator must precede
    // its children, otherwise the node is treated as a root.
    let mut children: Vec<Vec<usize>> = vec![Vec::new(); flat.len()];
    let mut roots = Vec::new();
    let mut by_ordinal: HashMap<u64, usize> = HashMap::with_capacity(flat.len());
    for (i, slot) in flat.iter().enumerate() {
        let Some(node) = slot.as_ref() else { continue };
        let parent = (node.creator != 0)
            .then(|| by_ordinal.get(&node.creator).copied())
            .flatten();
        match parent {
            Some(p) => children[p].push(i),
            None => roots.push(i),
        }
        by_ordinal.entry(node.ordinal).or_insert(i);
    }

    fn attach(idx: usize, flat: &mut [Option<FlatNode>], children: &[Vec<usize>]) -> Option<ActionTraceNode> {
        let mut node = flat[idx].take()?.node;
        for &child in &children[idx] {
            if let Some(c) = attach(child, flat, children) {
                node.inline_traces.push(c);
            }
        }
        Some(node)
    }

    Ok(roots
        .into_iter()
        .filter_map(|r| attach(r, &mut flat, &children))
        .collect())
}

fn node_from_value(value: &AbiValue) -> Result<ActionTraceNode, IndexerError> {
    let trace = value.unwrap_variant();
    let act = trace
        .field("act")
        .ok_or_else(|| malformed("action_trace", "act"))?;

    let authorization = act
        .field("authorization")
        .and_then(AbiValue::as_array)
        .unwrap_or_default()
        .iter()
        .map(|p| {
            Ok(PermissionLevel {
                actor: str_field(p, "actor")?.to_string(),
                permission: str_field(p, "permission")?.to_string(),
            })
        })
        .collect::<Result<Vec<_>, IndexerError>>()?;

    let receipt = match trace.field("receipt") {
        None | Some(AbiValue::Null) => None,
        Some(r) => {
            let r = r.unwrap_variant();
            Some(ActionReceipt {
                receiver: str_field(r, "receiver")?.to_string(),
                global_sequence: r
                    .field("global_sequence")
                    .and_then(AbiValue::as_u64)
                    .ok_or_else(|| malformed("action_receipt", "global_sequence"))?,
            })
        }
    };

    let ram_deltas = trace
        .field("account_ram_deltas")
        .and_then(AbiValue::as_array)
        .unwrap_or_default()
        .iter()
        .map(|d| {
            Ok(AccountDelta {
                account: str_field(d, "account")?.to_string(),
                delta: d
                    .field("delta")
                    .and_then(AbiValue::as_i64)
                    .ok_or_else(|| malformed("account_delta", "delta"))?,
            })
        })
        .collect::<Result<Vec<_>, IndexerError>>()?;

    let inline_traces = match trace.field("inline_traces").and_then(AbiValue::as_array) {
        Some(inner) => inner.iter().map(node_from_value).collect::<Result<_, _>>()?,
        None => Vec::new(),
    };

    Ok(ActionTraceNode {
        account: str_field(act, "account")?.to_string(),
        name: str_field(act, "name")?.to_string(),
        authorization,
        data: act
            .field("data")
            .and_then(AbiValue::as_bytes)
            .map(<[u8]>::to_vec)
            .unwrap_or_default(),
        receipt,
        inline_traces,
        ram_deltas,
    })
}

#[cfg(test)]
pub(crate) mod fixtures {
    //! Builders for decoded trace values, shaped like `action_trace_v1`.
    use super::*;

    pub fn action(
        ordinal: u64,
        creator: u64,
        receiver: &str,
        account: &str,
        name: &str,
        data: Vec<u8>,
        global_sequence: u64,
    ) -> AbiValue {
        AbiValue::variant(
            "action_trace_v1",
            AbiValue::record([
                ("action_ordinal", AbiValue::Uint(ordinal)),
                ("creator_action_ordinal", AbiValue::Uint(creator)),
                (
                    "receipt",
                    AbiValue::variant(
                        "action_receipt_v0",
                        AbiValue::record([
                            ("receiver", AbiValue::from(receiver)),
                            ("global_sequence", AbiValue::Uint(global_sequence)),
                        ]),
                    ),
                ),
                ("receiver", AbiValue::from(receiver)),
                (
                    "act",
                    AbiValue::record([
                        ("account", AbiValue::from(account)),
                        ("name", AbiValue::from(name)),
                        (
                            "authorization",
                            AbiValue::Array(vec![AbiValue::record([
                                ("actor", AbiValue::from(receiver)),
                                ("permission", AbiValue::from("active")),
                            ])]),
                        ),
                        ("data", AbiValue::Bytes(data)),
                    ]),
                ),
                ("account_ram_deltas", AbiValue::Array(Vec::new())),
            ]),
        )
    }

    pub fn transaction(id: &str, status: u64, actions: Vec<AbiValue>) -> AbiValue {
        AbiValue::variant(
            "transaction_trace_v0",
            AbiValue::record([
                ("id", AbiValue::from(id)),
                ("status", AbiValue::Uint(status)),
                ("action_traces", AbiValue::Array(actions)),
            ]),
        )
    }
}
