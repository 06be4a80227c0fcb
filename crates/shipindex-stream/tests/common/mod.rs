//! Fixtures for in-process sessions: a trimmed protocol ABI, contract ABIs,
//! and builders for packed node results.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use shipindex_abi::keys::{signature_to_string, KeyType};
use shipindex_abi::{AbiDef, AbiValue, StaticAbiProvider, TypeRegistry};
use shipindex_core::error::IndexerError;
use shipindex_core::store::{ChainStore, StoreTransaction};
use shipindex_core::types::{BlockPosition, ChainStatus, StoredAbi};
use shipindex_storage::MemoryStore;
use shipindex_stream::transport::{Connector, Frame, FrameSink, FrameSource};
use shipindex_stream::{SessionBuilder, ShipProtocol};
use tokio::sync::mpsc;

pub const SHIP_ABI: &str = include_str!("../data/ship_abi.json");

pub const TOKEN_ABI: &str = r#"{
    "version": "eosio::abi/1.1",
    "structs": [
        {"name": "transfer", "base": "", "fields": [
            {"name": "from", "type": "name"},
            {"name": "to", "type": "name"},
            {"name": "quantity", "type": "asset"},
            {"name": "memo", "type": "string"}
        ]}
    ],
    "actions": [{"name": "transfer", "type": "transfer", "ricardian_contract": ""}]
}"#;

pub const SYSTEM_ABI: &str = r#"{
    "version": "eosio::abi/1.1",
    "structs": [
        {"name": "setabi", "base": "", "fields": [
            {"name": "account", "type": "name"},
            {"name": "abi", "type": "bytes"}
        ]},
        {"name": "setcode", "base": "", "fields": [
            {"name": "account", "type": "name"},
            {"name": "vmtype", "type": "uint8"},
            {"name": "vmversion", "type": "uint8"},
            {"name": "code", "type": "bytes"}
        ]}
    ],
    "actions": [
        {"name": "setabi", "type": "setabi", "ricardian_contract": ""},
        {"name": "setcode", "type": "setcode", "ricardian_contract": ""}
    ]
}"#;

pub fn ship() -> ShipProtocol {
    ShipProtocol::from_abi_json(SHIP_ABI).unwrap()
}

pub fn abi_bin(json: &str) -> Vec<u8> {
    AbiDef::from_json(json).unwrap().to_bin().unwrap()
}

pub fn provider() -> StaticAbiProvider {
    StaticAbiProvider::new()
        .with_abi("eosio.token", abi_bin(TOKEN_ABI))
        .with_abi("eosio", abi_bin(SYSTEM_ABI))
}

/// A session builder over `store` with static ABIs and every action admitted.
pub fn builder(store: Arc<dyn ChainStore>) -> SessionBuilder {
    SessionBuilder::new()
        .store(store)
        .abi_provider(Arc::new(provider()))
}

/// Block id for `num` on fork `branch`.
pub fn block_id(num: u32, branch: u8) -> String {
    format!("{branch:02x}{num:062x}")
}

pub fn transfer(from: &str, to: &str, quantity: &str, memo: &str) -> Vec<u8> {
    let registry = TypeRegistry::new(&AbiDef::from_json(TOKEN_ABI).unwrap()).unwrap();
    registry
        .encode_action(
            "transfer",
            &AbiValue::record([
                ("from", AbiValue::from(from)),
                ("to", AbiValue::from(to)),
                ("quantity", AbiValue::from(quantity)),
                ("memo", AbiValue::from(memo)),
            ]),
        )
        .unwrap()
}

pub fn system_action(name: &str, fields: AbiValue) -> Vec<u8> {
    let registry = TypeRegistry::new(&AbiDef::from_json(SYSTEM_ABI).unwrap()).unwrap();
    registry.encode_action(name, &fields).unwrap()
}

/// An `action_trace_v0` with a receipt.
pub fn action_trace(
    ordinal: u32,
    creator: u32,
    receiver: &str,
    account: &str,
    name: &str,
    data: Vec<u8>,
    global_sequence: u64,
) -> AbiValue {
    AbiValue::variant(
        "action_trace_v0",
        AbiValue::record([
            ("action_ordinal", AbiValue::from(ordinal)),
            ("creator_action_ordinal", AbiValue::from(creator)),
            (
                "receipt",
                AbiValue::variant(
                    "action_receipt_v0",
                    AbiValue::record([
                        ("receiver", AbiValue::from(receiver)),
                        ("act_digest", AbiValue::from("00".repeat(32))),
                        ("global_sequence", AbiValue::Uint(global_sequence)),
                        ("recv_sequence", AbiValue::Uint(global_sequence)),
                        ("auth_sequence", AbiValue::Array(Vec::new())),
                        ("code_sequence", AbiValue::from(1u32)),
                        ("abi_sequence", AbiValue::from(1u32)),
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
                            ("actor", AbiValue::from(account)),
                            ("permission", AbiValue::from("active")),
                        ])]),
                    ),
                    ("data", AbiValue::Bytes(data)),
                ]),
            ),
            ("context_free", AbiValue::from(false)),
            ("elapsed", AbiValue::Int(0)),
            ("console", AbiValue::from("")),
            ("account_ram_deltas", AbiValue::Array(Vec::new())),
            ("except", AbiValue::Null),
            ("error_code", AbiValue::Null),
        ]),
    )
}

/// An executed `transaction_trace_v0`.
pub fn transaction_trace(id_byte: u8, actions: Vec<AbiValue>) -> AbiValue {
    AbiValue::variant(
        "transaction_trace_v0",
        AbiValue::record([
            ("id", AbiValue::from(format!("{id_byte:02x}").repeat(32))),
            ("status", AbiValue::from(0u32)),
            ("cpu_usage_us", AbiValue::from(100u32)),
            ("net_usage_words", AbiValue::from(12u32)),
            ("elapsed", AbiValue::Int(50)),
            ("net_usage", AbiValue::Uint(96)),
            ("scheduled", AbiValue::from(false)),
            ("action_traces", AbiValue::Array(actions)),
            ("account_ram_delta", AbiValue::Null),
            ("except", AbiValue::Null),
            ("error_code", AbiValue::Null),
            ("failed_dtrx_trace", AbiValue::Null),
        ]),
    )
}

pub fn traces(transactions: Vec<AbiValue>) -> Vec<u8> {
    ship()
        .registry()
        .serialize("transaction_trace[]", &AbiValue::Array(transactions))
        .unwrap()
}

/// Traces holding one token transfer for `block_num`.
pub fn one_transfer(block_num: u32) -> Vec<u8> {
    let seq = u64::from(block_num) * 10;
    traces(vec![transaction_trace(
        (block_num % 256) as u8,
        vec![action_trace(
            1,
            0,
            "eosio.token",
            "eosio.token",
            "transfer",
            transfer("alice", "bob", "1.0000 EOS", &format!("block {block_num}")),
            seq,
        )],
    )])
}

fn position(num: u32, branch: u8) -> AbiValue {
    AbiValue::record([
        ("block_num", AbiValue::from(num)),
        ("block_id", AbiValue::from(block_id(num, branch))),
    ])
}

fn signed_block(producer: &str) -> AbiValue {
    AbiValue::record([
        ("timestamp", AbiValue::from("2021-06-01T12:00:00.500")),
        ("producer", AbiValue::from(producer)),
        ("confirmed", AbiValue::from(0u32)),
        ("previous", AbiValue::from("00".repeat(32))),
        ("transaction_mroot", AbiValue::from("00".repeat(32))),
        ("action_mroot", AbiValue::from("00".repeat(32))),
        ("schedule_version", AbiValue::from(1u32)),
        ("header_extensions", AbiValue::Array(Vec::new())),
        (
            "producer_signature",
            AbiValue::from(signature_to_string(KeyType::K1, &[0u8; 65])),
        ),
        ("transactions", AbiValue::Array(Vec::new())),
        ("block_extensions", AbiValue::Array(Vec::new())),
    ])
}

/// A packed `get_blocks_result_v1` for block `num` on `branch`.
pub fn blocks_result(num: u32, branch: u8, last_irreversible: u32, traces: Option<Vec<u8>>) -> Vec<u8> {
    let value = AbiValue::variant(
        "get_blocks_result_v1",
        AbiValue::record([
            ("head", position(num, branch)),
            ("last_irreversible", position(last_irreversible, 0)),
            ("this_block", position(num, branch)),
            ("prev_block", AbiValue::Null),
            ("block", signed_block("producer1")),
            ("traces", traces.map_or(AbiValue::Null, AbiValue::Bytes)),
            ("deltas", AbiValue::Null),
        ]),
    );
    ship().registry().serialize("result", &value).unwrap()
}

/// A packed `get_blocks_result_v0` with the block as packed bytes.
pub fn blocks_result_v0(num: u32, last_irreversible: u32, traces: Option<Vec<u8>>) -> Vec<u8> {
    let protocol = ship();
    let block = protocol
        .registry()
        .serialize("signed_block", &signed_block("producer2"))
        .unwrap();
    let value = AbiValue::variant(
        "get_blocks_result_v0",
        AbiValue::record([
            ("head", position(num, 0)),
            ("last_irreversible", position(last_irreversible, 0)),
            ("this_block", position(num, 0)),
            ("prev_block", AbiValue::Null),
            ("block", AbiValue::Bytes(block)),
            ("traces", traces.map_or(AbiValue::Null, AbiValue::Bytes)),
            ("deltas", AbiValue::Null),
        ]),
    );
    protocol.registry().serialize("result", &value).unwrap()
}

pub fn status_result(head: u32, irreversible: u32) -> Vec<u8> {
    let value = AbiValue::variant(
        "get_status_result_v0",
        AbiValue::record([
            ("head", position(head, 0)),
            ("last_irreversible", position(irreversible, 0)),
            ("trace_begin_block", AbiValue::from(1u32)),
            ("trace_end_block", AbiValue::from(head)),
            ("chain_state_begin_block", AbiValue::from(1u32)),
            ("chain_state_end_block", AbiValue::from(head)),
        ]),
    );
    ship().registry().serialize("result", &value).unwrap()
}

/// Decoded request tags, in send order.
pub fn request_tags(requests: &[Vec<u8>]) -> Vec<String> {
    let protocol = ship();
    requests
        .iter()
        .map(|r| {
            protocol
                .registry()
                .deserialize("request", r)
                .unwrap()
                .variant_tag()
                .unwrap()
                .to_string()
        })
        .collect()
}

pub fn decode_request(bytes: &[u8]) -> AbiValue {
    ship().registry().deserialize("request", bytes).unwrap()
}

// ─── Event log ────────────────────────────────────────────────────────────────

/// Shared, ordered record of what a session did.
pub type EventLog = Arc<Mutex<Vec<String>>>;

/// Connector whose sink records each request's variant index.
pub struct RecordingConnector {
    frames: Mutex<Option<mpsc::UnboundedReceiver<Frame>>>,
    log: EventLog,
}

impl RecordingConnector {
    pub fn new(frames: Vec<Frame>, log: EventLog) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        for frame in frames {
            tx.send(frame).unwrap();
        }
        Self {
            frames: Mutex::new(Some(rx)),
            log,
        }
    }
}

struct RecordingSink {
    log: EventLog,
}

#[async_trait]
impl FrameSink for RecordingSink {
    async fn send(&mut self, bytes: Vec<u8>) -> Result<(), IndexerError> {
        self.log.lock().unwrap().push(format!("send:{}", bytes[0]));
        Ok(())
    }

    async fn close(&mut self) -> Result<(), IndexerError> {
        Ok(())
    }
}

struct QueuedSource {
    frames: mpsc::UnboundedReceiver<Frame>,
}

#[async_trait]
impl FrameSource for QueuedSource {
    async fn next_frame(&mut self) -> Result<Option<Frame>, IndexerError> {
        Ok(self.frames.recv().await)
    }
}

#[async_trait]
impl Connector for RecordingConnector {
    async fn connect(&self) -> Result<(Box<dyn FrameSink>, Box<dyn FrameSource>), IndexerError> {
        let frames = self.frames.lock().unwrap().take().unwrap();
        Ok((
            Box::new(RecordingSink { log: self.log.clone() }),
            Box::new(QueuedSource { frames }),
        ))
    }
}

/// Store that records when each block transaction begins.
pub struct RecordingStore {
    pub inner: MemoryStore,
    log: EventLog,
}

impl RecordingStore {
    pub fn new(log: EventLog) -> Self {
        Self {
            inner: MemoryStore::new(),
            log,
        }
    }
}

#[async_trait]
impl ChainStore for RecordingStore {
    async fn load_status(&self) -> Result<ChainStatus, IndexerError> {
        self.inner.load_status().await
    }

    async fn block_positions(&self, from: u32, to: u32) -> Result<Vec<BlockPosition>, IndexerError> {
        self.inner.block_positions(from, to).await
    }

    async fn load_abi(&self, account: &str) -> Result<Option<StoredAbi>, IndexerError> {
        self.inner.load_abi(account).await
    }

    async fn save_abi(&self, account: &str, abi_json: Option<&str>, block_num: u32) -> Result<(), IndexerError> {
        self.inner.save_abi(account, abi_json, block_num).await
    }

    async fn begin(&self) -> Result<Box<dyn StoreTransaction>, IndexerError> {
        self.log.lock().unwrap().push("begin".into());
        self.inner.begin().await
    }
}
