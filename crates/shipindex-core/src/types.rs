//! Shared row types for the ingestion pipeline.

use indexmap::IndexSet;
use serde::{Deserialize, Serialize};
use std::fmt;

// ─── Chain position ───────────────────────────────────────────────────────────

/// The single row of persisted chain progress.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainStatus {
    /// Last committed block. `0` means nothing has been committed yet.
    pub head: u32,
    /// Last irreversible block as of the last commit, never above `head`.
    pub irreversible: u32,
}

impl ChainStatus {
    pub fn is_unset(&self) -> bool {
        self.head == 0
    }
}

impl fmt::Display for ChainStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "head={} irreversible={}", self.head, self.irreversible)
    }
}

/// A block the client has committed, reported back to the node on resume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockPosition {
    pub block_num: u32,
    /// Hex block id. Changes across forks for the same number.
    pub block_id: String,
}

/// A block row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRecord {
    pub block_num: u32,
    pub block_id: String,
    pub timestamp: String,
    pub producer: String,
}

impl BlockRecord {
    pub fn position(&self) -> BlockPosition {
        BlockPosition {
            block_num: self.block_num,
            block_id: self.block_id.clone(),
        }
    }
}

// ─── Actions ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionLevel {
    pub actor: String,
    pub permission: String,
}

/// RAM usage change charged to an account by one action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountDelta {
    pub account: String,
    pub delta: i64,
}

/// Fields derived from well-known action payloads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ActionSummary {
    Transfer {
        from: String,
        to: String,
        amount: f64,
        symbol: String,
        memo: String,
    },
    NewAccount {
        newact: String,
        owner: serde_json::Value,
        active: serde_json::Value,
    },
    UpdateAuth {
        permission: String,
        parent: String,
        auth: serde_json::Value,
    },
}

/// One logical action, as persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlattenedAction {
    pub global_sequence: u64,
    /// Receipt sequence of the action that created this one inline; `0` at the root.
    pub parent: u64,
    pub block_num: u32,
    pub trx_id: String,
    pub producer: String,
    pub timestamp: String,
    pub account: String,
    pub name: String,
    pub authorization: Vec<PermissionLevel>,
    /// Decoded (and enriched) payload.
    pub data: serde_json::Value,
    pub summary: Option<ActionSummary>,
    pub ram_deltas: Vec<AccountDelta>,
    /// Receivers of redeliveries of this same payload, in delivery order.
    pub notified: IndexSet<String>,
}

impl FlattenedAction {
    /// `account:name`.
    pub fn qualified_name(&self) -> String {
        format!("{}:{}", self.account, self.name)
    }

    pub fn is(&self, account: &str, name: &str) -> bool {
        self.account == account && self.name == name
    }
}

// ─── Events ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    NewActions,
    ForkRollback,
}

impl EventKind {
    /// Numeric kind as stored.
    pub fn code(self) -> i64 {
        match self {
            Self::NewActions => 1,
            Self::ForkRollback => 2,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            1 => Some(Self::NewActions),
            2 => Some(Self::ForkRollback),
            _ => None,
        }
    }
}

/// A change notification for downstream consumers: either the ids of newly
/// written actions, or the ids of actions a fork superseded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainEvent {
    pub kind: EventKind,
    pub action_ids: Vec<i64>,
    pub block_num: u32,
    pub timestamp: String,
}

/// A persisted contract ABI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredAbi {
    pub account: String,
    /// `abi_def` as JSON text.
    pub abi_json: String,
    /// Block of the `setabi` (or remote fetch) that produced it.
    pub block_num: u32,
}
