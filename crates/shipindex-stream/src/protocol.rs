//! State-history session messages.
//!
//! The node opens every session by sending its protocol ABI as JSON text.
//! Every later frame, in both directions, is a `request` or `result` variant
//! packed against that ABI. The variants the driver understands are closed
//! enums here; any other tag is a protocol violation.

use shipindex_abi::{AbiDef, AbiValue, CodecError, TypeRegistry};
use shipindex_core::error::IndexerError;
use shipindex_core::types::BlockPosition;

/// Last block number, meaning "stream forever".
pub const END_OF_CHAIN: u32 = u32::MAX;

// ─── Requests ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlocksRequest {
    pub start_block_num: u32,
    pub end_block_num: u32,
    pub max_messages_in_flight: u32,
    /// Reversible blocks already stored, so the node can detect a fork on resume.
    pub have_positions: Vec<BlockPosition>,
    pub irreversible_only: bool,
    pub fetch_block: bool,
    pub fetch_traces: bool,
    pub fetch_deltas: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Status,
    Blocks(BlocksRequest),
    Ack { num_messages: u32 },
}

impl Request {
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Status => "get_status_request_v0",
            Self::Blocks(_) => "get_blocks_request_v0",
            Self::Ack { .. } => "get_blocks_ack_request_v0",
        }
    }

    fn to_value(&self) -> AbiValue {
        let body = match self {
            Self::Status => AbiValue::Struct(Default::default()),
            Self::Blocks(req) => AbiValue::record([
                ("start_block_num", AbiValue::from(req.start_block_num)),
                ("end_block_num", AbiValue::from(req.end_block_num)),
                ("max_messages_in_flight", AbiValue::from(req.max_messages_in_flight)),
                (
                    "have_positions",
                    AbiValue::Array(req.have_positions.iter().map(position_value).collect()),
                ),
                ("irreversible_only", AbiValue::from(req.irreversible_only)),
                ("fetch_block", AbiValue::from(req.fetch_block)),
                ("fetch_traces", AbiValue::from(req.fetch_traces)),
                ("fetch_deltas", AbiValue::from(req.fetch_deltas)),
            ]),
            Self::Ack { num_messages } => {
                AbiValue::record([("num_messages", AbiValue::from(*num_messages))])
            }
        };
        AbiValue::variant(self.tag(), body)
    }
}

fn position_value(p: &BlockPosition) -> AbiValue {
    AbiValue::record([
        ("block_num", AbiValue::from(p.block_num)),
        ("block_id", AbiValue::from(p.block_id.as_str())),
    ])
}

// ─── Results ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusResult {
    pub head: BlockPosition,
    pub last_irreversible: BlockPosition,
    pub trace_begin_block: u32,
    pub trace_end_block: u32,
    pub chain_state_begin_block: u32,
    pub chain_state_end_block: u32,
}

/// The block header, as delivered by the result version.
#[derive(Debug, Clone, PartialEq)]
pub enum BlockPayload {
    /// `get_blocks_result_v0`: a packed `signed_block`.
    Packed(Vec<u8>),
    /// `get_blocks_result_v1`: already decoded with the result.
    Decoded(AbiValue),
}

#[derive(Debug, Clone, PartialEq)]
pub struct BlocksResult {
    pub head: BlockPosition,
    pub last_irreversible: BlockPosition,
    pub this_block: Option<BlockPosition>,
    pub prev_block: Option<BlockPosition>,
    pub block: Option<BlockPayload>,
    pub traces: Option<Vec<u8>>,
    pub deltas: Option<Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ShipResult {
    Status(StatusResult),
    Blocks(BlocksResult),
}

fn malformed(tag: &str, field: &str) -> IndexerError {
    IndexerError::Protocol(format!("malformed {tag}: missing or invalid '{field}'"))
}

fn position(tag: &str, value: &AbiValue, field: &str) -> Result<Option<BlockPosition>, IndexerError> {
    match value.field(field) {
        None | Some(AbiValue::Null) => Ok(None),
        Some(p) => {
            let block_num = p
                .field("block_num")
                .and_then(AbiValue::as_u64)
                .and_then(|n| u32::try_from(n).ok())
                .ok_or_else(|| malformed(tag, field))?;
            let block_id = p
                .field("block_id")
                .and_then(AbiValue::as_str)
                .ok_or_else(|| malformed(tag, field))?;
            Ok(Some(BlockPosition {
                block_num,
                block_id: block_id.to_lowercase(),
            }))
        }
    }
}

fn required_position(tag: &str, value: &AbiValue, field: &str) -> Result<BlockPosition, IndexerError> {
    position(tag, value, field)?.ok_or_else(|| malformed(tag, field))
}

fn block_number(value: &AbiValue, field: &str) -> u32 {
    value
        .field(field)
        .and_then(AbiValue::as_u64)
        .and_then(|n| u32::try_from(n).ok())
        .unwrap_or(0)
}

fn optional_bytes(value: &AbiValue, field: &str) -> Option<Vec<u8>> {
    value.field(field).and_then(AbiValue::as_bytes).map(<[u8]>::to_vec)
}

// ─── Protocol ─────────────────────────────────────────────────────────────────

/// The node's protocol ABI, compiled.
#[derive(Debug, Clone)]
pub struct ShipProtocol {
    registry: TypeRegistry,
}

impl ShipProtocol {
    /// Compile the handshake ABI.
    pub fn from_abi_json(text: &str) -> Result<Self, IndexerError> {
        let def = AbiDef::from_json(text)
            .map_err(|e| IndexerError::Protocol(format!("invalid protocol abi: {e}")))?;
        let registry = TypeRegistry::new(&def)?;
        for required in ["request", "result"] {
            if registry.variant_types(required).is_none() {
                return Err(IndexerError::Protocol(format!(
                    "protocol abi has no '{required}' variant"
                )));
            }
        }
        Ok(Self { registry })
    }

    pub fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    pub fn encode_request(&self, request: &Request) -> Result<Vec<u8>, IndexerError> {
        Ok(self.registry.serialize("request", &request.to_value())?)
    }

    /// Decode one inbound frame.
    pub fn decode_result(&self, bytes: &[u8]) -> Result<ShipResult, IndexerError> {
        let value = self.registry.deserialize("result", bytes)?;
        let AbiValue::Variant(tag, body) = &value else {
            return Err(IndexerError::Protocol("result is not a variant".into()));
        };
        match tag.as_str() {
            "get_status_result_v0" => Ok(ShipResult::Status(StatusResult {
                head: required_position(tag, body, "head")?,
                last_irreversible: required_position(tag, body, "last_irreversible")?,
                trace_begin_block: block_number(body, "trace_begin_block"),
                trace_end_block: block_number(body, "trace_end_block"),
                chain_state_begin_block: block_number(body, "chain_state_begin_block"),
                chain_state_end_block: block_number(body, "chain_state_end_block"),
            })),
            "get_blocks_result_v0" | "get_blocks_result_v1" => {
                let block = match body.field("block") {
                    None | Some(AbiValue::Null) => None,
                    Some(AbiValue::Bytes(b)) => Some(BlockPayload::Packed(b.clone())),
                    Some(decoded) => Some(BlockPayload::Decoded(decoded.clone())),
                };
                Ok(ShipResult::Blocks(BlocksResult {
                    head: required_position(tag, body, "head")?,
                    last_irreversible: required_position(tag, body, "last_irreversible")?,
                    this_block: position(tag, body, "this_block")?,
                    prev_block: position(tag, body, "prev_block")?,
                    block,
                    traces: optional_bytes(body, "traces"),
                    deltas: optional_bytes(body, "deltas"),
                }))
            }
            other => Err(IndexerError::Protocol(format!("unsupported result type '{other}'"))),
        }
    }

    /// Decode a packed `signed_block`.
    pub fn decode_block(&self, bytes: &[u8]) -> Result<AbiValue, CodecError> {
        self.registry.deserialize("signed_block", bytes)
    }

    /// Decode an uncompressed `transaction_trace[]` payload.
    pub fn decode_traces(&self, bytes: &[u8]) -> Result<AbiValue, CodecError> {
        self.registry.deserialize("transaction_trace[]", bytes)
    }

    /// Decode an uncompressed `table_delta[]` payload.
    pub fn decode_deltas(&self, bytes: &[u8]) -> Result<AbiValue, CodecError> {
        self.registry.deserialize("table_delta[]", bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SHIP_ABI: &str = include_str!("../tests/data/ship_abi.json");

    fn protocol() -> ShipProtocol {
        ShipProtocol::from_abi_json(SHIP_ABI).unwrap()
    }

    fn id(n: u32) -> String {
        format!("{n:064x}")
    }

    fn pos(n: u32) -> AbiValue {
        position_value(&BlockPosition { block_num: n, block_id: id(n) })
    }

    #[test]
    fn requests_use_protocol_variant_indices() {
        let p = protocol();
        assert_eq!(p.encode_request(&Request::Status).unwrap(), vec![0]);
        assert_eq!(
            p.encode_request(&Request::Ack { num_messages: 1 }).unwrap(),
            vec![2, 1, 0, 0, 0]
        );

        let blocks = Request::Blocks(BlocksRequest {
            start_block_num: 101,
            end_block_num: END_OF_CHAIN,
            max_messages_in_flight: 5,
            have_positions: vec![BlockPosition { block_num: 100, block_id: id(100) }],
            irreversible_only: false,
            fetch_block: true,
            fetch_traces: true,
            fetch_deltas: false,
        });
        let bytes = p.encode_request(&blocks).unwrap();
        let decoded = p.registry().deserialize("request", &bytes).unwrap();
        assert_eq!(decoded.variant_tag(), Some("get_blocks_request_v0"));
        assert_eq!(decoded.field("start_block_num").and_then(AbiValue::as_u64), Some(101));
        assert_eq!(
            decoded.field("end_block_num").and_then(AbiValue::as_u64),
            Some(u64::from(u32::MAX))
        );
        let have = decoded.field("have_positions").and_then(AbiValue::as_array).unwrap();
        assert_eq!(have[0].field("block_id").and_then(AbiValue::as_str), Some(id(100).as_str()));
    }

    #[test]
    fn blocks_result_v0_is_decoded() {
        let p = protocol();
        let value = AbiValue::variant(
            "get_blocks_result_v0",
            AbiValue::record([
                ("head", pos(12)),
                ("last_irreversible", pos(8)),
                ("this_block", pos(10)),
                ("prev_block", AbiValue::Null),
                ("block", AbiValue::Null),
                ("traces", AbiValue::Bytes(vec![0])),
                ("deltas", AbiValue::Null),
            ]),
        );
        let bytes = p.registry().serialize("result", &value).unwrap();
        let ShipResult::Blocks(result) = p.decode_result(&bytes).unwrap() else {
            panic!("expected blocks result");
        };
        assert_eq!(result.head.block_num, 12);
        assert_eq!(result.last_irreversible.block_num, 8);
        assert_eq!(result.this_block.unwrap().block_id, id(10));
        assert!(result.prev_block.is_none());
        assert!(result.block.is_none());
        assert_eq!(result.traces, Some(vec![0]));
        assert_eq!(p.decode_traces(&[0]).unwrap(), AbiValue::Array(Vec::new()));
    }

    #[test]
    fn status_result_is_decoded() {
        let p = protocol();
        let value = AbiValue::variant(
            "get_status_result_v0",
            AbiValue::record([
                ("head", pos(500)),
                ("last_irreversible", pos(480)),
                ("trace_begin_block", AbiValue::from(2u32)),
                ("trace_end_block", AbiValue::from(501u32)),
                ("chain_state_begin_block", AbiValue::from(2u32)),
                ("chain_state_end_block", AbiValue::from(501u32)),
            ]),
        );
        let bytes = p.registry().serialize("result", &value).unwrap();
        let ShipResult::Status(status) = p.decode_result(&bytes).unwrap() else {
            panic!("expected status result");
        };
        assert_eq!(status.head.block_num, 500);
        assert_eq!(status.trace_end_block, 501);
    }

    #[test]
    fn out_of_range_result_tag_is_rejected() {
        let p = protocol();
        let err = p.decode_result(&[7]).unwrap_err();
        assert!(matches!(err, IndexerError::Codec(ref e) if e.is_schema_mismatch()), "{err}");
    }

    #[test]
    fn unsupported_result_tag_is_a_protocol_error() {
        let abi = r#"{"version": "eosio::abi/1.1",
            "structs": [{"name": "ping_v0", "fields": []}],
            "variants": [
                {"name": "request", "types": ["ping_v0"]},
                {"name": "result", "types": ["ping_v0"]}
            ]}"#;
        let p = ShipProtocol::from_abi_json(abi).unwrap();
        let err = p.decode_result(&[0]).unwrap_err();
        assert!(matches!(err, IndexerError::Protocol(ref m) if m.contains("ping_v0")), "{err}");
    }

    #[test]
    fn handshake_without_result_variant_is_rejected() {
        let abi = r#"{"version": "eosio::abi/1.1", "variants": [
            {"name": "request", "types": ["uint8"]}
        ]}"#;
        assert!(matches!(
            ShipProtocol::from_abi_json(abi),
            Err(IndexerError::Protocol(_))
        ));
        assert!(matches!(
            ShipProtocol::from_abi_json("not json"),
            Err(IndexerError::Protocol(_))
        ));
    }
}
